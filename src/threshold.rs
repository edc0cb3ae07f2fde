//! Adaptive confidence threshold: noise level → required confidence.
//! Louder rooms demand more confidence; quiet rooms relax toward the band floor.

use serde::Serialize;
use tracing::trace;

use crate::config::HotwordConfig;
use crate::noise::NoiseFloorTracker;

/// Band and mapping parameters, copied out of `HotwordConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdBand {
    pub adaptive: bool,
    pub static_threshold: f32,
    pub floor: f32,
    pub ceiling: f32,
    pub quiet_level: f32,
    pub loud_level: f32,
}

impl ThresholdBand {
    pub fn from_config(cfg: &HotwordConfig) -> Self {
        Self {
            adaptive: cfg.adaptive_threshold,
            static_threshold: cfg.min_confidence,
            floor: cfg.min_confidence_floor,
            ceiling: cfg.max_confidence_floor,
            quiet_level: cfg.noise_quiet_level,
            loud_level: cfg.noise_loud_level,
        }
    }

    /// Threshold for a given noise level.
    ///
    /// Linear interpolation between `quiet_level` and `loud_level`, clamped to
    /// `[floor, ceiling]`. Monotonic non-decreasing and continuous in `level`.
    /// Returns the static threshold when adaptation is off.
    pub fn threshold_for_level(&self, level: f32) -> f32 {
        if !self.adaptive {
            return self.static_threshold;
        }
        let span = self.loud_level - self.quiet_level;
        let position = if span > 0.0 && level.is_finite() {
            ((level - self.quiet_level) / span).clamp(0.0, 1.0)
        } else if level == f32::INFINITY {
            1.0
        } else {
            0.0
        };
        (self.floor + position * (self.ceiling - self.floor)).clamp(self.floor, self.ceiling)
    }
}

/// Noise tracker plus band. Kept together so one lock covers buffer mutation
/// and threshold reads.
#[derive(Debug, Clone)]
pub struct ThresholdEngine {
    band: ThresholdBand,
    tracker: NoiseFloorTracker,
    min_samples: usize,
}

impl ThresholdEngine {
    pub fn new(cfg: &HotwordConfig) -> Self {
        Self {
            band: ThresholdBand::from_config(cfg),
            tracker: NoiseFloorTracker::new(cfg.noise_floor_window, cfg.noise_default_level),
            min_samples: cfg.noise_min_samples,
        }
    }

    /// Feed one frame's amplitude to the tracker.
    #[inline]
    pub fn observe(&mut self, amplitude: f32) {
        self.tracker.update(amplitude);
    }

    /// Threshold for the current buffer contents. Until `noise_min_samples`
    /// ambient frames are buffered the static `min_confidence` applies.
    pub fn current_threshold(&self) -> f32 {
        let level = self.tracker.current_level();
        let warming_up = self.is_warming_up();
        let threshold = if warming_up {
            self.band.static_threshold
        } else {
            self.band.threshold_for_level(level)
        };
        trace!(
            noise_level = level,
            threshold,
            adaptive = self.band.adaptive,
            warming_up,
            "threshold_computed"
        );
        threshold
    }

    /// True while the adaptive band lacks enough ambient samples.
    pub fn is_warming_up(&self) -> bool {
        self.band.adaptive && self.tracker.len() < self.min_samples
    }

    pub fn noise_level(&self) -> f32 {
        self.tracker.current_level()
    }

    pub fn band(&self) -> &ThresholdBand {
        &self.band
    }

    pub fn tracker(&self) -> &NoiseFloorTracker {
        &self.tracker
    }
}
