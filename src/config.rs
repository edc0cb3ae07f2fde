//! Session configuration: one validated struct built once at startup.
//! Values come from environment variables; invalid combinations are rejected here,
//! never clamped at use time.

use serde::Serialize;
use tracing::info;

use crate::confirmation::{CONFIRMATION_CONF_THRESHOLD, CONFIRMATION_LENGTH_THRESHOLD};
use crate::error::{HotwordError, Result};

/// Earshot only classifies 16 kHz audio.
pub const VAD_SAMPLE_RATE: u32 = 16_000;

/// Every tunable of the detection engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotwordConfig {
    /// Static threshold used when adaptation is off.
    pub min_confidence: f32,
    /// Minimum recognized-text length, in characters.
    pub min_chars: usize,
    pub adaptive_threshold: bool,
    /// Noise samples kept by the tracker.
    pub noise_floor_window: usize,
    /// Ambient samples needed before the threshold adapts; until then `min_confidence` applies.
    pub noise_min_samples: usize,
    /// Lower bound of the adaptive band.
    pub min_confidence_floor: f32,
    /// Upper bound of the adaptive band.
    pub max_confidence_floor: f32,
    /// Level reported by an empty tracker.
    pub noise_default_level: f32,
    /// Noise level (mean absolute amplitude) mapped to the band floor.
    pub noise_quiet_level: f32,
    /// Noise level mapped to the band ceiling.
    pub noise_loud_level: f32,

    pub wake_phrase: String,
    pub aliases: Vec<String>,
    /// Require a whole-word match rather than a substring.
    pub strict_word_match: bool,
    pub debounce_ms: u64,

    pub sample_rate: u32,
    /// Samples per captured chunk.
    pub chunk_size: usize,
    pub max_utterance_ms: u64,
    pub silence_tail_ms: u64,
    /// Hard ceiling on one capture phase, silence included.
    pub max_capture_ms: u64,
    pub capture_backoff_ms: u64,
    pub max_capture_retries: u32,

    pub use_vad: bool,
    pub vad_aggressiveness: u8,

    pub confirmation_conf_threshold: f32,
    pub confirmation_length_threshold: usize,
}

impl Default for HotwordConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.48,
            min_chars: 3,
            adaptive_threshold: true,
            noise_floor_window: 100,
            noise_min_samples: 50,
            min_confidence_floor: 0.5,
            max_confidence_floor: 0.9,
            noise_default_level: 0.0,
            noise_quiet_level: 0.0,
            noise_loud_level: 1000.0,
            wake_phrase: "kim".into(),
            aliases: vec!["ким".into()],
            strict_word_match: true,
            debounce_ms: 1200,
            sample_rate: 16_000,
            chunk_size: 4000, // 250ms at 16kHz
            max_utterance_ms: 2000,
            silence_tail_ms: 500,
            max_capture_ms: 4000,
            capture_backoff_ms: 100,
            max_capture_retries: 5,
            use_vad: false,
            vad_aggressiveness: 2,
            confirmation_conf_threshold: CONFIRMATION_CONF_THRESHOLD,
            confirmation_length_threshold: CONFIRMATION_LENGTH_THRESHOLD,
        }
    }
}

impl HotwordConfig {
    /// Build from the process environment and validate.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (tests inject a map here) and validate.
    /// Missing keys keep their defaults; unparsable values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let env = EnvReader { lookup: &lookup };

        env.f32("HOTWORD_MIN_CONFIDENCE", &mut cfg.min_confidence)?;
        env.usize("HOTWORD_MIN_CHARS", &mut cfg.min_chars)?;
        env.bool("HOTWORD_ADAPTIVE_THRESHOLD", &mut cfg.adaptive_threshold)?;
        env.usize("HOTWORD_NOISE_FLOOR_WINDOW", &mut cfg.noise_floor_window)?;
        env.usize("HOTWORD_NOISE_MIN_SAMPLES", &mut cfg.noise_min_samples)?;
        env.f32("HOTWORD_MIN_CONFIDENCE_FLOOR", &mut cfg.min_confidence_floor)?;
        env.f32("HOTWORD_MAX_CONFIDENCE_FLOOR", &mut cfg.max_confidence_floor)?;
        env.f32("HOTWORD_NOISE_DEFAULT_LEVEL", &mut cfg.noise_default_level)?;
        env.f32("HOTWORD_NOISE_QUIET_LEVEL", &mut cfg.noise_quiet_level)?;
        env.f32("HOTWORD_NOISE_LOUD_LEVEL", &mut cfg.noise_loud_level)?;
        if let Some(phrase) = env.raw("HOTWORD_WAKE_PHRASE") {
            cfg.wake_phrase = phrase.trim().to_string();
        }
        if let Some(list) = env.raw("HOTWORD_ALIASES") {
            cfg.aliases = list
                .split(',')
                .map(str::trim)
                .filter(|alias| !alias.is_empty())
                .map(String::from)
                .collect();
        }
        env.bool("HOTWORD_STRICT_WORD_MATCH", &mut cfg.strict_word_match)?;
        env.u64("HOTWORD_DEBOUNCE_MS", &mut cfg.debounce_ms)?;
        env.u64("HOTWORD_MAX_UTTERANCE_MS", &mut cfg.max_utterance_ms)?;
        env.u64("HOTWORD_SILENCE_TAIL_MS", &mut cfg.silence_tail_ms)?;
        env.u64("HOTWORD_MAX_CAPTURE_MS", &mut cfg.max_capture_ms)?;
        env.u64("HOTWORD_CAPTURE_BACKOFF_MS", &mut cfg.capture_backoff_ms)?;
        env.u32("HOTWORD_MAX_CAPTURE_RETRIES", &mut cfg.max_capture_retries)?;
        env.u32("MIC_SAMPLE_RATE", &mut cfg.sample_rate)?;
        env.usize("MIC_CHUNK_SIZE", &mut cfg.chunk_size)?;
        env.bool("STT_USE_VAD", &mut cfg.use_vad)?;
        env.u8("STT_VAD_AGGRESSIVENESS", &mut cfg.vad_aggressiveness)?;
        env.f32("CONFIRMATION_CONF_THRESHOLD", &mut cfg.confirmation_conf_threshold)?;
        env.usize("CONFIRMATION_LENGTH_THRESHOLD", &mut cfg.confirmation_length_threshold)?;

        cfg.validate()?;
        info!(
            min_confidence = cfg.min_confidence,
            min_chars = cfg.min_chars,
            adaptive = cfg.adaptive_threshold,
            band_floor = cfg.min_confidence_floor,
            band_ceiling = cfg.max_confidence_floor,
            use_vad = cfg.use_vad,
            vad_aggressiveness = cfg.vad_aggressiveness,
            wake_phrase = %cfg.wake_phrase,
            "hotword_config_loaded"
        );
        Ok(cfg)
    }

    /// Check every invariant. Called by `from_lookup` and by the listener/evaluator constructors.
    pub fn validate(&self) -> Result<()> {
        unit_interval("HOTWORD_MIN_CONFIDENCE", self.min_confidence)?;
        unit_interval("HOTWORD_MIN_CONFIDENCE_FLOOR", self.min_confidence_floor)?;
        unit_interval("HOTWORD_MAX_CONFIDENCE_FLOOR", self.max_confidence_floor)?;
        unit_interval("CONFIRMATION_CONF_THRESHOLD", self.confirmation_conf_threshold)?;

        if self.min_confidence_floor > self.max_confidence_floor {
            return Err(HotwordError::config(
                "HOTWORD_MIN_CONFIDENCE_FLOOR",
                format!(
                    "floor {} exceeds ceiling {}",
                    self.min_confidence_floor, self.max_confidence_floor
                ),
            ));
        }
        if self.min_chars == 0 {
            return Err(HotwordError::config("HOTWORD_MIN_CHARS", "must be at least 1"));
        }
        if self.noise_floor_window == 0 {
            return Err(HotwordError::config(
                "HOTWORD_NOISE_FLOOR_WINDOW",
                "must hold at least one sample",
            ));
        }
        if self.noise_min_samples > self.noise_floor_window {
            return Err(HotwordError::config(
                "HOTWORD_NOISE_MIN_SAMPLES",
                format!(
                    "{} exceeds HOTWORD_NOISE_FLOOR_WINDOW ({})",
                    self.noise_min_samples, self.noise_floor_window
                ),
            ));
        }
        if !self.noise_default_level.is_finite() || self.noise_default_level < 0.0 {
            return Err(HotwordError::config(
                "HOTWORD_NOISE_DEFAULT_LEVEL",
                format!("must be a finite non-negative level, got {}", self.noise_default_level),
            ));
        }
        if !self.noise_quiet_level.is_finite()
            || !self.noise_loud_level.is_finite()
            || self.noise_quiet_level >= self.noise_loud_level
        {
            return Err(HotwordError::config(
                "HOTWORD_NOISE_LOUD_LEVEL",
                format!(
                    "loud level {} must be above quiet level {}",
                    self.noise_loud_level, self.noise_quiet_level
                ),
            ));
        }
        if self.wake_phrase.trim().is_empty() {
            return Err(HotwordError::config("HOTWORD_WAKE_PHRASE", "must not be empty"));
        }
        if self.sample_rate == 0 {
            return Err(HotwordError::config("MIC_SAMPLE_RATE", "must be positive"));
        }
        if self.chunk_size == 0 {
            return Err(HotwordError::config("MIC_CHUNK_SIZE", "must be positive"));
        }
        if self.chunk_size as u64 * 1000 > self.max_capture_ms * u64::from(self.sample_rate) {
            return Err(HotwordError::config(
                "MIC_CHUNK_SIZE",
                format!(
                    "one chunk ({} samples) is longer than HOTWORD_MAX_CAPTURE_MS ({})",
                    self.chunk_size, self.max_capture_ms
                ),
            ));
        }
        if self.max_utterance_ms == 0 || self.max_utterance_ms > self.max_capture_ms {
            return Err(HotwordError::config(
                "HOTWORD_MAX_UTTERANCE_MS",
                format!(
                    "must be between 1 and HOTWORD_MAX_CAPTURE_MS ({}), got {}",
                    self.max_capture_ms, self.max_utterance_ms
                ),
            ));
        }
        if self.silence_tail_ms >= self.max_utterance_ms {
            return Err(HotwordError::config(
                "HOTWORD_SILENCE_TAIL_MS",
                format!(
                    "must be below HOTWORD_MAX_UTTERANCE_MS ({}), got {}",
                    self.max_utterance_ms, self.silence_tail_ms
                ),
            ));
        }
        if self.vad_aggressiveness > 3 {
            return Err(HotwordError::config(
                "STT_VAD_AGGRESSIVENESS",
                format!("must be between 0 and 3, got {}", self.vad_aggressiveness),
            ));
        }
        if self.use_vad && self.sample_rate != VAD_SAMPLE_RATE {
            return Err(HotwordError::config(
                "MIC_SAMPLE_RATE",
                format!(
                    "voice activity detection requires {VAD_SAMPLE_RATE} Hz, got {}",
                    self.sample_rate
                ),
            ));
        }
        Ok(())
    }

    /// Duration of one captured chunk in milliseconds (at least 1).
    pub fn chunk_ms(&self) -> u64 {
        ((self.chunk_size as u64 * 1000) / u64::from(self.sample_rate)).max(1)
    }

    /// Chunks needed to cover at least `ms`, rounded up, never zero.
    pub fn chunks_for(&self, ms: u64) -> usize {
        (self.samples_in(ms).div_ceil(self.chunk_size as u64) as usize).max(1)
    }

    /// Whole chunks that fit inside `ms`, rounded down, never zero.
    /// Used for limits that must not be overshot.
    pub fn chunks_within(&self, ms: u64) -> usize {
        ((self.samples_in(ms) / self.chunk_size as u64) as usize).max(1)
    }

    fn samples_in(&self, ms: u64) -> u64 {
        ms * u64::from(self.sample_rate) / 1000
    }
}

fn unit_interval(key: &'static str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(HotwordError::config(
            key,
            format!("must be between 0.0 and 1.0, got {value}"),
        ));
    }
    Ok(())
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &'static str, slot: &mut T) -> Result<()>
    where
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.raw(key) {
            *slot = value
                .trim()
                .parse()
                .map_err(|e| HotwordError::config(key, format!("'{value}': {e}")))?;
        }
        Ok(())
    }

    fn f32(&self, key: &'static str, slot: &mut f32) -> Result<()> {
        self.parsed(key, slot)
    }

    fn usize(&self, key: &'static str, slot: &mut usize) -> Result<()> {
        self.parsed(key, slot)
    }

    fn u64(&self, key: &'static str, slot: &mut u64) -> Result<()> {
        self.parsed(key, slot)
    }

    fn u32(&self, key: &'static str, slot: &mut u32) -> Result<()> {
        self.parsed(key, slot)
    }

    fn u8(&self, key: &'static str, slot: &mut u8) -> Result<()> {
        self.parsed(key, slot)
    }

    fn bool(&self, key: &'static str, slot: &mut bool) -> Result<()> {
        if let Some(value) = self.raw(key) {
            *slot = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(HotwordError::config(
                        key,
                        format!("expected a boolean, got '{other}'"),
                    ))
                }
            };
        }
        Ok(())
    }
}
