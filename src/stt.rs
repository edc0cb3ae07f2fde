//! Downstream speech-to-text seam, run after the wake word is accepted.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// Full-utterance transcript from the STT engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcript {
    pub text: String,
    /// Mean per-word confidence, in [0.0, 1.0].
    pub avg_confidence: f32,
}

impl Transcript {
    /// Length used by the confirmation policy: characters of the trimmed text.
    pub fn char_len(&self) -> usize {
        self.text.trim().chars().count()
    }
}

/// Speech-to-text engine that records and transcribes the command following the wake word.
#[async_trait]
pub trait Transcriber: Send {
    /// Returns `Ok(None)` when nothing intelligible was said.
    async fn transcribe(&mut self) -> Result<Option<Transcript>>;
}
