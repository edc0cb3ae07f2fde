//! Confirmation gating for transcripts that follow an accepted wake word.
//! Short confident commands run immediately; uncertain or long ones are read back first.

use serde::Serialize;
use tracing::debug;

use crate::config::HotwordConfig;

/// Below this average confidence the transcript is read back.
pub const CONFIRMATION_CONF_THRESHOLD: f32 = 0.75;
/// Above this many characters the transcript is read back.
pub const CONFIRMATION_LENGTH_THRESHOLD: usize = 25;

/// Which rule asked for confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmationReason {
    LowConfidence,
    LongPhrase,
    None,
}

impl ConfirmationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfirmationReason::LowConfidence => "low_confidence",
            ConfirmationReason::LongPhrase => "long_phrase",
            ConfirmationReason::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfirmationVerdict {
    pub requires_confirmation: bool,
    pub reason: ConfirmationReason,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfirmationPolicy {
    confidence_threshold: f32,
    length_threshold: usize,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self::new(CONFIRMATION_CONF_THRESHOLD, CONFIRMATION_LENGTH_THRESHOLD)
    }
}

impl ConfirmationPolicy {
    pub fn new(confidence_threshold: f32, length_threshold: usize) -> Self {
        Self {
            confidence_threshold,
            length_threshold,
        }
    }

    pub fn from_config(cfg: &HotwordConfig) -> Self {
        Self::new(
            cfg.confirmation_conf_threshold,
            cfg.confirmation_length_threshold,
        )
    }

    /// Confirmation is required iff `avg_confidence < confidence_threshold` or
    /// `transcript_length > length_threshold`. Low confidence is reported first
    /// when both hold.
    pub fn evaluate(&self, avg_confidence: f32, transcript_length: usize) -> ConfirmationVerdict {
        let reason = if avg_confidence.is_nan() || avg_confidence < self.confidence_threshold {
            ConfirmationReason::LowConfidence
        } else if transcript_length > self.length_threshold {
            ConfirmationReason::LongPhrase
        } else {
            ConfirmationReason::None
        };
        let verdict = ConfirmationVerdict {
            requires_confirmation: reason != ConfirmationReason::None,
            reason,
        };
        debug!(
            avg_confidence,
            transcript_length,
            requires_confirmation = verdict.requires_confirmation,
            reason = reason.as_str(),
            "confirmation_evaluated"
        );
        verdict
    }
}

/// The user's answer to "did you say ...?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConfirmationReply {
    Confirmed,
    Declined,
}

const DECLINE_MARKERS: &[&str] = &["нет", "неверно", "не так", "неправильно", "no", "wrong"];

impl ConfirmationReply {
    /// Declined when the reply contains a negative marker as a whole word or
    /// word sequence; anything else, including unclear replies, confirms.
    pub fn interpret(reply: &str) -> Self {
        let words = crate::detection::normalize_words(reply);
        let declined = DECLINE_MARKERS.iter().any(|marker| {
            let marker: Vec<&str> = marker.split_whitespace().collect();
            words
                .windows(marker.len())
                .any(|window| window.iter().map(String::as_str).eq(marker.iter().copied()))
        });
        if declined {
            ConfirmationReply::Declined
        } else {
            ConfirmationReply::Confirmed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_confident_commands_proceed() {
        let verdict = ConfirmationPolicy::default().evaluate(0.9, 10);
        assert!(!verdict.requires_confirmation);
        assert_eq!(verdict.reason, ConfirmationReason::None);
    }

    #[test]
    fn low_confidence_needs_confirmation() {
        let verdict = ConfirmationPolicy::default().evaluate(0.5, 10);
        assert!(verdict.requires_confirmation);
        assert_eq!(verdict.reason, ConfirmationReason::LowConfidence);
    }

    #[test]
    fn long_phrases_need_confirmation() {
        let verdict = ConfirmationPolicy::default().evaluate(0.9, 30);
        assert!(verdict.requires_confirmation);
        assert_eq!(verdict.reason, ConfirmationReason::LongPhrase);
    }

    #[test]
    fn boundaries_do_not_trigger() {
        let verdict = ConfirmationPolicy::default().evaluate(0.75, 25);
        assert!(!verdict.requires_confirmation);
        assert_eq!(verdict.reason, ConfirmationReason::None);
    }

    #[test]
    fn low_confidence_reported_before_length() {
        let verdict = ConfirmationPolicy::default().evaluate(0.2, 80);
        assert_eq!(verdict.reason, ConfirmationReason::LowConfidence);
    }

    #[test]
    fn thresholds_follow_config() {
        let cfg = HotwordConfig {
            confirmation_conf_threshold: 0.5,
            confirmation_length_threshold: 5,
            ..HotwordConfig::default()
        };
        let policy = ConfirmationPolicy::from_config(&cfg);
        assert_eq!(policy.evaluate(0.6, 5).reason, ConfirmationReason::None);
        assert_eq!(policy.evaluate(0.6, 6).reason, ConfirmationReason::LongPhrase);
    }

    #[test]
    fn replies_with_negative_markers_decline() {
        assert_eq!(ConfirmationReply::interpret("Нет, не так"), ConfirmationReply::Declined);
        assert_eq!(ConfirmationReply::interpret("no"), ConfirmationReply::Declined);
        assert_eq!(ConfirmationReply::interpret("да"), ConfirmationReply::Confirmed);
        assert_eq!(ConfirmationReply::interpret("yes, nothing else"), ConfirmationReply::Confirmed);
        assert_eq!(ConfirmationReply::interpret(""), ConfirmationReply::Confirmed);
    }
}
