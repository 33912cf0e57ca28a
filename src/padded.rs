//! Cache-line aligned storage for per-thread hot state

use std::ops::{Deref, DerefMut};

use crate::config::CACHE_LINE_SIZE;

/// Aligns and pads a value to [`CACHE_LINE_SIZE`] so that neighbouring
/// values owned by different threads never share a line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(align(128))]
pub struct CacheAligned<T>(T);

const _: () = assert!(std::mem::align_of::<CacheAligned<u8>>() == CACHE_LINE_SIZE);

impl<T> CacheAligned<T> {
    pub const fn new(value: T) -> Self {
        Self(value)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for CacheAligned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T> From<T> for CacheAligned<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}
