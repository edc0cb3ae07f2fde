//! Detection policy: length rule, confidence threshold and lexical wake-phrase check.
//! All three must pass. Pure: the same inputs always give the same verdict.

use serde::Serialize;
use tracing::debug;

use crate::config::HotwordConfig;

/// Why a detection was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    TooShort,
    LowConfidence,
    NoWakePhrase,
    /// Would have been accepted, but came too soon after the previous trigger.
    Debounced,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::TooShort => "too_short",
            RejectReason::LowConfidence => "low_confidence",
            RejectReason::NoWakePhrase => "no_wake_phrase",
            RejectReason::Debounced => "debounced",
        }
    }
}

/// Verdict for one utterance. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    recognized_text: String,
    confidence: f32,
    threshold: f32,
    /// Always `rejection.is_none()`.
    accepted: bool,
    rejection: Option<RejectReason>,
}

impl DetectionResult {
    pub fn recognized_text(&self) -> &str {
        &self.recognized_text
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Threshold the confidence was compared against.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn accepted(&self) -> bool {
        self.accepted
    }

    pub fn rejection(&self) -> Option<RejectReason> {
        self.rejection
    }

    /// Same utterance, rejected as a repeat trigger.
    pub(crate) fn into_debounced(self) -> Self {
        Self {
            accepted: false,
            rejection: Some(RejectReason::Debounced),
            ..self
        }
    }
}

/// Wake phrase plus aliases, normalized once.
#[derive(Debug, Clone)]
pub struct WakePhrase {
    /// Each entry is one phrase split into normalized words.
    phrases: Vec<Vec<String>>,
    strict: bool,
}

impl WakePhrase {
    pub fn new<I, S>(phrase: &str, aliases: I, strict: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = std::iter::once(phrase.to_string())
            .chain(aliases.into_iter().map(|a| a.as_ref().to_string()))
            .map(|p| normalize_words(&p))
            .filter(|words| !words.is_empty())
            .collect();
        Self { phrases, strict }
    }

    pub fn from_config(cfg: &HotwordConfig) -> Self {
        Self::new(&cfg.wake_phrase, &cfg.aliases, cfg.strict_word_match)
    }

    /// Whether `text` contains the phrase or an alias.
    ///
    /// Strict mode needs the phrase's words as a contiguous run of whole words
    /// ("kim, turn on" matches, "kimberly" does not). Relaxed mode accepts any
    /// substring of the normalized text.
    pub fn matches(&self, text: &str) -> bool {
        let words = normalize_words(text);
        if words.is_empty() {
            return false;
        }
        if self.strict {
            self.phrases.iter().any(|phrase| {
                words
                    .windows(phrase.len())
                    .any(|window| window == phrase.as_slice())
            })
        } else {
            let joined = words.join(" ");
            self.phrases
                .iter()
                .any(|phrase| joined.contains(&phrase.join(" ")))
        }
    }
}

/// Lowercase, punctuation to spaces, split on whitespace.
pub fn normalize_words(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().map(String::from).collect()
}

/// Accept/reject decision for scored utterances.
#[derive(Debug, Clone)]
pub struct DetectionPolicy {
    wake: WakePhrase,
}

impl DetectionPolicy {
    pub fn new(wake: WakePhrase) -> Self {
        Self { wake }
    }

    pub fn from_config(cfg: &HotwordConfig) -> Self {
        Self::new(WakePhrase::from_config(cfg))
    }

    /// Accepts iff the trimmed text has at least `min_chars` characters, the
    /// confidence reaches `threshold` (inclusive), and the wake phrase is present.
    /// The first failing rule is reported.
    pub fn evaluate(
        &self,
        text: &str,
        confidence: f32,
        threshold: f32,
        min_chars: usize,
    ) -> DetectionResult {
        let text = text.trim();
        let length = text.chars().count();

        let rejection = if length < min_chars {
            Some(RejectReason::TooShort)
        } else if confidence.is_nan() || confidence < threshold {
            Some(RejectReason::LowConfidence)
        } else if !self.wake.matches(text) {
            Some(RejectReason::NoWakePhrase)
        } else {
            None
        };

        debug!(
            text,
            length,
            confidence,
            threshold,
            accepted = rejection.is_none(),
            reason = rejection.map(RejectReason::as_str),
            "detection_evaluated"
        );

        DetectionResult {
            recognized_text: text.to_string(),
            confidence,
            threshold,
            accepted: rejection.is_none(),
            rejection,
        }
    }
}
