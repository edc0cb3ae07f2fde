//! Hotword scoring seam.
//! The spotting model itself is external: it turns an utterance into recognized
//! text plus a confidence. Model errors surface as `HotwordError::Scoring`,
//! never as a zero-confidence match.

use serde::Deserialize;

use crate::error::{HotwordError, Result};

/// What the spotting model heard.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub text: String,
    /// In [0.0, 1.0].
    pub confidence: f32,
}

impl Score {
    /// Validates the confidence; out-of-range or NaN values are scoring failures.
    pub fn new(text: impl Into<String>, confidence: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(HotwordError::scoring(format!(
                "model returned confidence {confidence} outside [0, 1]"
            )));
        }
        Ok(Self {
            text: text.into(),
            confidence,
        })
    }
}

/// Spotting-model adapter. Called once per utterance; not cancellable.
///
/// The listener runs `score` and `reset` on tokio's blocking pool, so
/// implementations may do heavy synchronous inference but must not expect an
/// async runtime context on the calling thread.
pub trait HotwordScorer: Send {
    /// Score one utterance of mono i16 PCM.
    fn score(&mut self, utterance: &[i16]) -> Result<Score>;

    /// Reset recognizer state between utterances.
    fn reset(&mut self) {}
}

impl<S: HotwordScorer + ?Sized> HotwordScorer for Box<S> {
    fn score(&mut self, utterance: &[i16]) -> Result<Score> {
        (**self).score(utterance)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Kaldi/Vosk-style recognizer result.
///
/// ```json
/// {"text": "kim turn on", "result": [{"word": "kim", "conf": 0.93}, ...]}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RecognizerOutput {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub result: Vec<WordConfidence>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WordConfidence {
    #[serde(default)]
    pub word: String,
    #[serde(default)]
    pub conf: Option<f32>,
}

impl RecognizerOutput {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| HotwordError::scoring(format!("malformed recognizer output: {e}")))
    }

    /// Explicit confidence if present, else the mean of per-word confidences,
    /// else 1.0 (recognizers omit confidences when they are certain).
    pub fn average_confidence(&self) -> f32 {
        if let Some(conf) = self.confidence {
            return conf;
        }
        let confs: Vec<f32> = self.result.iter().filter_map(|w| w.conf).collect();
        if confs.is_empty() {
            return 1.0;
        }
        confs.iter().sum::<f32>() / confs.len() as f32
    }

    pub fn into_score(self) -> Result<Score> {
        let confidence = self.average_confidence();
        Score::new(self.text.trim(), confidence)
    }
}
