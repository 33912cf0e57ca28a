//! Activity timeline: a fixed-width ring of peak-held samples
//!
//! Converts a stream of timed measurements (for example one thread's drive
//! durations) into a series with one point per horizontal unit of a view
//! that shows `duration` seconds. Points hold the peak of everything written
//! into them; the ring keeps `extra_buffering_duration` seconds of history
//! beyond what is visible so a paused (frozen) view can be scrolled back.

/// Minimum gap, in points, that is written out as silence
const MIN_GAP_POINTS: f64 = 0.1;

/// One point of the timeline; `tag` is `None` for gaps and unwritten points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityPoint<T> {
    pub value: f64,
    pub tag: Option<T>,
}

impl<T> ActivityPoint<T> {
    const EMPTY: Self = Self {
        value: 0.0,
        tag: None,
    };
}

#[derive(Debug, Clone)]
struct FrozenState<T> {
    points: Vec<ActivityPoint<T>>,
    start_time: f64,
    end_time: Option<f64>,
}

/// Ring buffer behind an activity graph
#[derive(Debug, Clone)]
pub struct ActivityTimeline<T> {
    width: f64,
    duration: f64,
    extra_buffering_duration: f64,
    start_time: f64,
    points: Vec<ActivityPoint<T>>,
    end_time: Option<f64>,
    last_write_position: Option<f64>,
    frozen: Option<FrozenState<T>>,
}

impl<T: Copy + PartialEq> ActivityTimeline<T> {
    /// Timeline `width` points wide showing `duration` seconds
    pub fn new(width: usize, duration: f64, extra_buffering_duration: f64) -> Self {
        let mut timeline = Self {
            width: width as f64,
            duration: duration.max(0.0),
            extra_buffering_duration: extra_buffering_duration.max(0.0),
            start_time: 0.0,
            points: Vec::new(),
            end_time: None,
            last_write_position: None,
            frozen: None,
        };
        timeline.initialize_points();
        timeline
    }

    pub fn set_width(&mut self, width: usize) {
        self.width = width as f64;
        self.initialize_points();
    }

    pub fn set_duration(&mut self, duration: f64) {
        self.duration = duration.max(0.0);
        self.initialize_points();
    }

    pub fn set_extra_buffering_duration(&mut self, extra_buffering_duration: f64) {
        self.extra_buffering_duration = extra_buffering_duration.max(0.0);
        self.initialize_points();
    }

    /// Left edge of the visible window, in seconds
    pub fn set_start_time(&mut self, start_time: f64) {
        self.start_time = start_time;
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// End of the most recent sample
    pub fn end_time(&self) -> Option<f64> {
        self.end_time
    }

    /// Ring size in points
    pub fn capacity(&self) -> usize {
        self.points.len()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    /// Freeze or thaw the visible series; writes continue underneath
    pub fn set_frozen(&mut self, frozen: bool) {
        if frozen == self.is_frozen() {
            return;
        }
        self.frozen = frozen.then(|| FrozenState {
            points: self.points.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
        });
    }

    /// Record `value` over `[time, time + sample_duration)`
    ///
    /// A gap since the previous sample is written as empty points first.
    pub fn add_sample(&mut self, time: f64, sample_duration: f64, value: f64, tag: T) {
        if let Some(end_time) = self.end_time {
            let missing = self.time_to_position(time - end_time);
            if missing >= MIN_GAP_POINTS {
                let gap_start = self.time_to_position(end_time);
                self.add_points(gap_start, missing, ActivityPoint::EMPTY);
            }
        }

        let start_position = self.time_to_position(time);
        let length = self.time_to_position(sample_duration);
        self.add_points(start_position, length, ActivityPoint { value, tag: Some(tag) });

        self.end_time = Some(time + sample_duration);
    }

    /// Points from the window's start time up to the last written time
    pub fn visible(&self) -> Vec<ActivityPoint<T>> {
        match &self.frozen {
            Some(frozen) => self.collect(frozen.start_time, frozen.end_time, &frozen.points),
            None => self.collect(self.start_time, self.end_time, &self.points),
        }
    }

    fn collect(
        &self,
        start_time: f64,
        end_time: Option<f64>,
        points: &[ActivityPoint<T>],
    ) -> Vec<ActivityPoint<T>> {
        let Some(end_time) = end_time else {
            return Vec::new();
        };
        if end_time <= start_time || points.is_empty() {
            return Vec::new();
        }

        let start_position = self.time_to_position(start_time);
        let end_position = self.time_to_position((start_time + self.duration).min(end_time));
        let draw_width = (end_position - start_position).max(0.0) as usize;
        let read_index = ring_index(start_position, points.len());

        (0..draw_width)
            .map(|x| points[(read_index + x) % points.len()])
            .collect()
    }

    fn initialize_points(&mut self) {
        let extra_points = self.points_per_second() * self.extra_buffering_duration;
        let num_points = (self.width + extra_points).max(0.0) as usize;
        if self.points.len() != num_points {
            self.points = vec![ActivityPoint::EMPTY; num_points];
            self.end_time = None;
            self.last_write_position = None;
        }
    }

    fn add_points(&mut self, position: f64, length: f64, point: ActivityPoint<T>) {
        self.add_point(position, point);

        let pinned_length = length.min(self.points.len() as f64);
        let end = position + pinned_length;
        let first = position.floor() + 1.0;
        // Count steps as integers; far from zero `p += 1.0` stops advancing
        for step in 0..pinned_length.max(0.0).ceil() as usize {
            let p = first + step as f64;
            if p >= end {
                break;
            }
            self.add_point(p, point);
        }
    }

    fn add_point(&mut self, position: f64, point: ActivityPoint<T>) {
        if self.points.is_empty() {
            return;
        }

        let i = ring_index(position, self.points.len());
        let same_point = self
            .last_write_position
            .is_some_and(|last| last.floor() == position.floor());
        let value = if same_point {
            self.points[i].value.max(point.value)
        } else {
            point.value
        };

        self.points[i] = ActivityPoint {
            value,
            tag: point.tag,
        };
        self.last_write_position = Some(position);
    }

    fn points_per_second(&self) -> f64 {
        if self.duration == 0.0 {
            0.0
        } else {
            self.width / self.duration
        }
    }

    fn time_to_position(&self, time: f64) -> f64 {
        time * self.points_per_second()
    }
}

fn ring_index(position: f64, len: usize) -> usize {
    (position.rem_euclid(len as f64) as usize).min(len - 1)
}
