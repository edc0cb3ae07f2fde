//! Noise floor tracking: fixed-capacity FIFO of ambient amplitude measurements.

use std::collections::VecDeque;

/// Rolling window of per-frame amplitudes. Oldest sample is evicted first.
#[derive(Debug, Clone)]
pub struct NoiseFloorTracker {
    samples: VecDeque<f32>,
    capacity: usize,
    default_level: f32,
    /// Running sum so `current_level` stays O(1).
    sum: f64,
}

impl NoiseFloorTracker {
    /// `capacity` is clamped to at least one sample.
    pub fn new(capacity: usize, default_level: f32) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            default_level,
            sum: 0.0,
        }
    }

    /// Record one frame's amplitude. Non-finite readings are ignored.
    #[inline]
    pub fn update(&mut self, amplitude: f32) {
        if !amplitude.is_finite() {
            return;
        }
        let amplitude = amplitude.abs();
        if self.samples.len() == self.capacity {
            if let Some(evicted) = self.samples.pop_front() {
                self.sum -= f64::from(evicted);
            }
        }
        self.samples.push_back(amplitude);
        self.sum += f64::from(amplitude);
    }

    /// Mean amplitude over the window, or the default level when empty.
    pub fn current_level(&self) -> f32 {
        if self.samples.is_empty() {
            return self.default_level;
        }
        (self.sum / self.samples.len() as f64).max(0.0) as f32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples oldest-first.
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.iter().copied()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.sum = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tracker_reports_default() {
        let tracker = NoiseFloorTracker::new(10, 42.0);
        assert!(tracker.is_empty());
        assert_eq!(tracker.current_level(), 42.0);
    }

    #[test]
    fn level_is_mean_of_window() {
        let mut tracker = NoiseFloorTracker::new(4, 0.0);
        for a in [100.0, 200.0, 300.0] {
            tracker.update(a);
        }
        assert!((tracker.current_level() - 200.0).abs() < 1e-3);
    }

    #[test]
    fn never_exceeds_capacity_and_evicts_fifo() {
        let mut tracker = NoiseFloorTracker::new(3, 0.0);
        for a in 1..=10 {
            tracker.update(a as f32);
            assert!(tracker.len() <= 3);
        }
        let kept: Vec<f32> = tracker.samples().collect();
        assert_eq!(kept, vec![8.0, 9.0, 10.0]);
        assert!((tracker.current_level() - 9.0).abs() < 1e-4);
    }

    #[test]
    fn ignores_non_finite_readings() {
        let mut tracker = NoiseFloorTracker::new(3, 0.0);
        tracker.update(f32::NAN);
        tracker.update(f32::INFINITY);
        assert!(tracker.is_empty());
        tracker.update(-50.0);
        assert_eq!(tracker.current_level(), 50.0);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut tracker = NoiseFloorTracker::new(0, 0.0);
        tracker.update(1.0);
        tracker.update(2.0);
        assert_eq!(tracker.capacity(), 1);
        assert_eq!(tracker.current_level(), 2.0);
        tracker.clear();
        assert!(tracker.is_empty());
    }
}
