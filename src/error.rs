//! Error taxonomy for the detection engine.
//! Rejections (detection or confirmation) are outcomes, not errors, and never appear here.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, HotwordError>;

#[derive(Debug, Error)]
pub enum HotwordError {
    /// Audio device or stream failure. Ends the current cycle; the listen loop backs off and retries.
    #[error("audio capture failed: {message}")]
    Capture { message: String },

    /// The external spotting model reported an error. The cycle is skipped.
    #[error("hotword scoring failed: {message}")]
    Scoring { message: String },

    /// Downstream speech-to-text failed after an accepted detection.
    #[error("transcription failed: {message}")]
    Transcription { message: String },

    /// Invalid settings. Raised at construction, before any audio is processed.
    #[error("invalid configuration for {key}: {message}")]
    Configuration { key: &'static str, message: String },
}

impl HotwordError {
    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture {
            message: message.into(),
        }
    }

    pub fn scoring(message: impl Into<String>) -> Self {
        Self::Scoring {
            message: message.into(),
        }
    }

    pub fn transcription(message: impl Into<String>) -> Self {
        Self::Transcription {
            message: message.into(),
        }
    }

    pub fn config(key: &'static str, message: impl Into<String>) -> Self {
        Self::Configuration {
            key,
            message: message.into(),
        }
    }

    /// Whether the listen loop can recover from this error by moving on to the next cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Capture { .. } | Self::Scoring { .. } | Self::Transcription { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_fatal() {
        let err = HotwordError::config("HOTWORD_MIN_CONFIDENCE_FLOOR", "floor above ceiling");
        assert!(!err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "invalid configuration for HOTWORD_MIN_CONFIDENCE_FLOOR: floor above ceiling"
        );
    }

    #[test]
    fn runtime_errors_are_recoverable() {
        assert!(HotwordError::capture("device unplugged").is_recoverable());
        assert!(HotwordError::scoring("model crashed").is_recoverable());
        assert!(HotwordError::transcription("timeout").is_recoverable());
    }
}
