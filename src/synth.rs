//! Synthetic render workload: a bank of sine partials
//!
//! Every sample is a pure function of the absolute frame index, so partial
//! groups can be rendered by any thread in any order.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;

/// Partials rendered by one work item
pub const SINES_PER_ITEM: usize = 8;

const BASE_FREQUENCY: f64 = 110.0;
const FREQUENCY_STEP: f64 = 7.0;
const PHASE_SEED: u64 = 0x5eed_cafe;

#[derive(Debug, Clone, Copy)]
struct Partial {
    frequency: f64,
    phase: f64,
}

/// Sum of `num_sines` equal-amplitude sine partials
#[derive(Debug, Clone)]
pub struct SineBank {
    partials: Vec<Partial>,
    sample_rate: f64,
    amplitude: f64,
}

impl SineBank {
    pub fn new(num_sines: usize, sample_rate: u32) -> Self {
        let mut rng = StdRng::seed_from_u64(PHASE_SEED);
        let partials = (0..num_sines)
            .map(|k| Partial {
                frequency: BASE_FREQUENCY + FREQUENCY_STEP * k as f64,
                phase: rng.gen_range(0.0..TAU),
            })
            .collect();

        Self {
            partials,
            sample_rate: sample_rate.max(1) as f64,
            amplitude: if num_sines == 0 {
                0.0
            } else {
                1.0 / num_sines as f64
            },
        }
    }

    pub fn num_sines(&self) -> usize {
        self.partials.len()
    }

    /// Number of work items a cycle is split into
    pub fn num_items(&self) -> usize {
        self.partials.len().div_ceil(SINES_PER_ITEM)
    }

    /// Render partial group `item` for frames `start_frame..start_frame + out.len()`
    ///
    /// Overwrites `out`. An out-of-range item renders silence.
    pub fn render_item(&self, item: usize, start_frame: u64, out: &mut [f32]) {
        out.fill(0.0);

        let begin = item.saturating_mul(SINES_PER_ITEM).min(self.partials.len());
        let end = (begin + SINES_PER_ITEM).min(self.partials.len());

        for partial in &self.partials[begin..end] {
            let step = TAU * partial.frequency / self.sample_rate;
            // Reduce the start phase first; frame counts grow without bound
            let cycles = partial.frequency * start_frame as f64 / self.sample_rate;
            let mut phase = TAU * cycles.fract() + partial.phase;
            for sample in out.iter_mut() {
                *sample += (self.amplitude * phase.sin()) as f32;
                phase += step;
            }
        }
    }

    /// Sum per-item buffers into `out`
    pub fn mix_into<'a, I>(outputs: I, out: &mut [f32])
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        out.fill(0.0);
        for buffer in outputs {
            for (o, s) in out.iter_mut().zip(buffer) {
                *o += *s;
            }
        }
    }
}

/// Largest absolute sample value
pub fn peak(buffer: &[f32]) -> f32 {
    buffer.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_count() {
        assert_eq!(SineBank::new(0, 44_100).num_items(), 0);
        assert_eq!(SineBank::new(1, 44_100).num_items(), 1);
        assert_eq!(SineBank::new(SINES_PER_ITEM, 44_100).num_items(), 1);
        assert_eq!(SineBank::new(SINES_PER_ITEM + 1, 44_100).num_items(), 2);
    }

    #[test]
    fn test_output_is_bounded() {
        let bank = SineBank::new(64, 44_100);
        let mut outputs = vec![vec![0.0f32; 256]; bank.num_items()];
        for (item, buffer) in outputs.iter_mut().enumerate() {
            bank.render_item(item, 1_000_000, buffer);
        }
        let mut mixed = vec![0.0f32; 256];
        SineBank::mix_into(outputs.iter().map(|b| b.as_slice()), &mut mixed);

        assert!(peak(&mixed) <= 1.0 + 1e-5);
        assert!(peak(&mixed) > 0.0);
    }

    #[test]
    fn test_render_is_continuous_across_cycles() {
        let bank = SineBank::new(3, 48_000);
        let mut whole = vec![0.0f32; 64];
        bank.render_item(0, 0, &mut whole);

        let mut first = vec![0.0f32; 32];
        let mut second = vec![0.0f32; 32];
        bank.render_item(0, 0, &mut first);
        bank.render_item(0, 32, &mut second);

        for (a, b) in whole.iter().zip(first.iter().chain(second.iter())) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_out_of_range_item_is_silent() {
        let bank = SineBank::new(4, 44_100);
        let mut buffer = vec![1.0f32; 16];
        bank.render_item(5, 0, &mut buffer);
        assert!(buffer.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_same_seed_same_output() {
        let a = SineBank::new(16, 44_100);
        let b = SineBank::new(16, 44_100);
        let mut out_a = vec![0.0f32; 32];
        let mut out_b = vec![0.0f32; 32];
        a.render_item(1, 77, &mut out_a);
        b.render_item(1, 77, &mut out_b);
        assert_eq!(out_a, out_b);
    }
}
