//! Listen loop: one detection cycle at a time.
//!
//! ```text
//! Idle ──chunk──▶ Capturing ──boundary──▶ Scoring ──▶ Accepted ─┐
//!   ▲                 │ capture error        │ scoring     Rejected ─┤
//!   └─────────────────┴──────────────────────┴─ error ◀─────────────┘
//! ```
//!
//! Only ambient audio updates the noise floor. With VAD enabled that means the
//! silent chunks; speech never reaches the tracker. Without VAD every chunk may
//! be speech, so its levels are fed after the cycle's threshold has been read
//! and only affect later cycles. Silent chunks are left out of the utterance; a
//! chunk-count ceiling still forces scoring when nothing but silence arrives.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::audio::vad::{gate_from_config, VoiceGate};
use crate::audio::wake::{HotwordScorer, Score};
use crate::audio::{mean_abs_amplitude, AudioSource};
use crate::config::HotwordConfig;
use crate::confirmation::{ConfirmationPolicy, ConfirmationVerdict};
use crate::detection::{DetectionPolicy, DetectionResult};
use crate::error::{HotwordError, Result};
use crate::metrics::{metric_names, CycleIds, MetricsRegistry};
use crate::state_machine::{ListenState, StateMachine};
use crate::stt::{Transcriber, Transcript};
use crate::threshold::ThresholdEngine;

/// Upper bound on the capture backoff multiplier.
const MAX_BACKOFF_FACTOR: u32 = 32;

/// Why capture stopped and scoring began.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureEnd {
    /// Speech followed by enough trailing silence.
    SilenceTail,
    /// Speech filled the utterance window.
    UtteranceFull,
    /// Capture ceiling reached; scoring forced.
    Ceiling,
}

/// Transcript and confirmation verdict for the command after an accepted wake word.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub transcript: Transcript,
    pub verdict: ConfirmationVerdict,
}

/// Result of one listen cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleOutcome {
    pub cycle_id: String,
    pub sequence: u64,
    pub detection: DetectionResult,
    /// Noise level the threshold was derived from.
    pub noise_level: f32,
    /// Chunks consumed during capture.
    pub chunks_captured: usize,
    pub capture_end: CaptureEnd,
    /// Present when the wake word was accepted and a transcriber produced text.
    pub command: Option<CommandOutcome>,
}

impl CycleOutcome {
    pub fn accepted(&self) -> bool {
        self.detection.accepted()
    }
}

/// Read access to the noise tracker and threshold from other tasks.
/// Reads take the same lock the listen loop mutates under.
#[derive(Clone)]
pub struct ThresholdHandle(Arc<Mutex<ThresholdEngine>>);

impl ThresholdHandle {
    pub fn current_threshold(&self) -> f32 {
        self.0.lock().current_threshold()
    }

    pub fn noise_level(&self) -> f32 {
        self.0.lock().noise_level()
    }

    /// Consistent copy of tracker and band.
    pub fn snapshot(&self) -> ThresholdEngine {
        self.0.lock().clone()
    }
}

struct CapturedUtterance {
    samples: Vec<i16>,
    chunks: usize,
    end: CaptureEnd,
    /// Levels of chunks a pass-through gate let in, fed to the tracker after the threshold read.
    deferred_levels: Vec<f32>,
}

/// Adaptive hotword listener over an audio source and a spotting model.
pub struct HotwordListener<S, C> {
    config: HotwordConfig,
    source: S,
    /// Lent to the blocking pool while scoring; `None` only if a cycle was dropped mid-score.
    scorer: Option<C>,
    gate: Box<dyn VoiceGate>,
    engine: Arc<Mutex<ThresholdEngine>>,
    detection: DetectionPolicy,
    confirmation: ConfirmationPolicy,
    transcriber: Option<Box<dyn Transcriber>>,
    state: Arc<StateMachine>,
    metrics: Arc<MetricsRegistry>,
    last_trigger: Option<Instant>,
    sequence: u64,
}

impl<S, C> HotwordListener<S, C>
where
    S: AudioSource,
    C: HotwordScorer + 'static,
{
    /// Validates the configuration and picks the voice gate. Fails before any audio is read.
    pub fn new(config: HotwordConfig, source: S, scorer: C) -> Result<Self> {
        config.validate()?;
        let gate = gate_from_config(&config)?;
        info!(
            adaptive = config.adaptive_threshold,
            gate = gate.name(),
            chunk_ms = config.chunk_ms(),
            "hotword_listener_created"
        );
        Ok(Self {
            engine: Arc::new(Mutex::new(ThresholdEngine::new(&config))),
            detection: DetectionPolicy::from_config(&config),
            confirmation: ConfirmationPolicy::from_config(&config),
            config,
            source,
            scorer: Some(scorer),
            gate,
            transcriber: None,
            state: Arc::new(StateMachine::new()),
            metrics: Arc::new(MetricsRegistry::new()),
            last_trigger: None,
            sequence: 0,
        })
    }

    /// Replace the configured gate (custom VAD backends, tests).
    pub fn with_gate(mut self, gate: Box<dyn VoiceGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Run STT and the confirmation policy after each accepted detection.
    pub fn with_transcriber(mut self, transcriber: Box<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &HotwordConfig {
        &self.config
    }

    pub fn state(&self) -> Arc<StateMachine> {
        Arc::clone(&self.state)
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    pub fn threshold_handle(&self) -> ThresholdHandle {
        ThresholdHandle(Arc::clone(&self.engine))
    }

    /// Run exactly one cycle: wait for audio, capture an utterance, score it.
    pub async fn listen_once(&mut self) -> Result<CycleOutcome> {
        let first = self.source.next_chunk().await;
        self.run_cycle(first).await
    }

    /// Run cycles until `cancel` fires, handing each outcome to `on_outcome`.
    ///
    /// The token is checked between cycles and while idle; a cycle that has
    /// started capturing runs to completion. Scoring failures skip the cycle.
    /// Capture failures back off exponentially; after `max_capture_retries`
    /// consecutive failures the last error is returned.
    pub async fn listen<F>(&mut self, cancel: CancellationToken, mut on_outcome: F) -> Result<()>
    where
        F: FnMut(CycleOutcome),
    {
        info!("hotword listen loop started");
        let mut capture_failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let first = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                chunk = self.source.next_chunk() => chunk,
            };

            match self.run_cycle(first).await {
                Ok(outcome) => {
                    capture_failures = 0;
                    on_outcome(outcome);
                }
                Err(HotwordError::Capture { message }) => {
                    capture_failures += 1;
                    if capture_failures > self.config.max_capture_retries {
                        warn!(failures = capture_failures, error = %message, "capture retries exhausted");
                        return Err(HotwordError::Capture { message });
                    }
                    let factor = 2u32
                        .saturating_pow(capture_failures - 1)
                        .min(MAX_BACKOFF_FACTOR);
                    let backoff =
                        Duration::from_millis(self.config.capture_backoff_ms) * factor;
                    warn!(
                        failures = capture_failures,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %message,
                        "capture failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(HotwordError::Scoring { message }) => {
                    capture_failures = 0;
                    warn!(error = %message, "scoring failed, skipping cycle");
                }
                Err(other) => return Err(other),
            }
        }

        self.state.force_idle();
        info!(cycles = self.sequence, "hotword listen loop stopped");
        Ok(())
    }

    async fn run_cycle(&mut self, first: Result<Vec<i16>>) -> Result<CycleOutcome> {
        let first = match first {
            Ok(chunk) => chunk,
            Err(e) => {
                self.metrics.increment(metric_names::CAPTURE_FAILURES);
                return Err(e);
            }
        };

        self.sequence += 1;
        let ids = CycleIds::new(self.sequence);
        let span = info_span!("hotword_cycle", cycle_id = %ids.cycle_id, seq = ids.sequence);
        let cycle = self.metrics.span(metric_names::CYCLE);

        let result = self.cycle_body(ids, first).instrument(span).await;

        self.gate.reset();
        self.state.force_idle();
        if result.is_ok() {
            cycle.finish();
        }
        result
    }

    async fn cycle_body(&mut self, ids: CycleIds, first: Vec<i16>) -> Result<CycleOutcome> {
        self.metrics.increment(metric_names::CYCLES);
        self.transition(ListenState::Capturing);

        let capture = self.metrics.span(metric_names::CAPTURE);
        let utterance = match self.capture_utterance(first).await {
            Ok(utterance) => utterance,
            Err(e) => {
                self.metrics.increment(metric_names::CAPTURE_FAILURES);
                warn!(error = %e, "capture aborted");
                return Err(e);
            }
        };
        capture.finish();
        if utterance.end == CaptureEnd::Ceiling {
            self.metrics.increment(metric_names::FORCED_SCORING);
        }

        // The threshold reflects ambient noise heard before this utterance.
        let (threshold, noise_level) = {
            let mut engine = self.engine.lock();
            let read = (engine.current_threshold(), engine.noise_level());
            for &level in &utterance.deferred_levels {
                engine.observe(level);
            }
            read
        };

        self.transition(ListenState::Scoring);
        let scoring = self.metrics.span(metric_names::SCORING);
        let score = match self.score(utterance.samples).await {
            Ok(score) => score,
            Err(e) => {
                self.metrics.increment(metric_names::SCORING_FAILURES);
                return Err(e);
            }
        };
        scoring.finish();

        let mut detection = self.detection.evaluate(
            &score.text,
            score.confidence,
            threshold,
            self.config.min_chars,
        );

        if detection.accepted() && self.within_debounce() {
            detection = detection.into_debounced();
        }

        let command = if detection.accepted() {
            self.last_trigger = Some(Instant::now());
            self.metrics.increment(metric_names::ACCEPTED);
            self.transition(ListenState::Accepted);
            info!(
                text = detection.recognized_text(),
                confidence = detection.confidence(),
                threshold,
                noise_level,
                "hotword accepted"
            );
            self.run_command().await
        } else {
            let reason = detection.rejection().map(|r| r.as_str()).unwrap_or("unknown");
            self.metrics.increment(metric_names::rejected(reason));
            self.transition(ListenState::Rejected);
            debug!(
                text = detection.recognized_text(),
                confidence = detection.confidence(),
                threshold,
                reason,
                "hotword rejected"
            );
            None
        };

        Ok(CycleOutcome {
            cycle_id: ids.cycle_id,
            sequence: ids.sequence,
            detection,
            noise_level,
            chunks_captured: utterance.chunks,
            capture_end: utterance.end,
            command,
        })
    }

    /// Run the scorer on the blocking pool so model inference never stalls the runtime.
    async fn score(&mut self, samples: Vec<i16>) -> Result<Score> {
        let mut scorer = self
            .scorer
            .take()
            .ok_or_else(|| HotwordError::scoring("scorer lost by an interrupted cycle"))?;
        let (scorer, scored) = tokio::task::spawn_blocking(move || {
            let scored = scorer.score(&samples);
            scorer.reset();
            (scorer, scored)
        })
        .await
        .map_err(|e| HotwordError::scoring(format!("scoring task failed: {e}")))?;
        self.scorer = Some(scorer);
        scored
    }

    /// Collect chunks until an utterance boundary or the capture ceiling.
    async fn capture_utterance(&mut self, first: Vec<i16>) -> Result<CapturedUtterance> {
        let max_speech_chunks = self.config.chunks_within(self.config.max_utterance_ms);
        let silence_tail_chunks = self.config.chunks_for(self.config.silence_tail_ms);
        let ceiling_chunks = self.config.chunks_within(self.config.max_capture_ms);
        let pass_through = self.gate.is_pass_through();

        let mut speech: Vec<i16> = Vec::new();
        let mut everything: Vec<i16> = Vec::new();
        let mut deferred_levels: Vec<f32> = Vec::new();
        let mut chunks = 0usize;
        let mut speech_chunks = 0usize;
        let mut trailing_silence = 0usize;
        let mut next = Some(first);

        loop {
            let chunk = match next.take() {
                Some(chunk) => chunk,
                None => self.source.next_chunk().await?,
            };
            chunks += 1;

            let amplitude = mean_abs_amplitude(&chunk);
            let is_speech = self.gate.is_speech(&chunk);
            trace!(chunk = chunks, amplitude, is_speech, "chunk_captured");
            if !is_speech {
                self.engine.lock().observe(amplitude);
            } else if pass_through {
                deferred_levels.push(amplitude);
            }

            if is_speech {
                speech.extend_from_slice(&chunk);
                speech_chunks += 1;
                trailing_silence = 0;
            } else if speech_chunks > 0 {
                trailing_silence += 1;
            }
            if speech_chunks == 0 {
                everything.extend_from_slice(&chunk);
            }

            let end = if speech_chunks >= max_speech_chunks {
                Some(CaptureEnd::UtteranceFull)
            } else if speech_chunks > 0 && trailing_silence >= silence_tail_chunks {
                Some(CaptureEnd::SilenceTail)
            } else if chunks >= ceiling_chunks {
                Some(CaptureEnd::Ceiling)
            } else {
                None
            };

            if let Some(end) = end {
                // Nothing passed the gate: score the raw capture rather than an empty buffer.
                let samples = if speech_chunks > 0 { speech } else { everything };
                debug!(chunks, speech_chunks, end = ?end, samples = samples.len(), "utterance_captured");
                return Ok(CapturedUtterance {
                    samples,
                    chunks,
                    end,
                    deferred_levels,
                });
            }
        }
    }

    async fn run_command(&mut self) -> Option<CommandOutcome> {
        let transcriber = self.transcriber.as_mut()?;
        let span = self.metrics.span(metric_names::TRANSCRIPTION);
        match transcriber.transcribe().await {
            Ok(Some(transcript)) => {
                span.finish();
                let verdict = self
                    .confirmation
                    .evaluate(transcript.avg_confidence, transcript.char_len());
                self.metrics
                    .increment(metric_names::confirmation(verdict.reason.as_str()));
                info!(
                    text = %transcript.text,
                    avg_confidence = transcript.avg_confidence,
                    requires_confirmation = verdict.requires_confirmation,
                    reason = verdict.reason.as_str(),
                    "command transcribed"
                );
                Some(CommandOutcome {
                    transcript,
                    verdict,
                })
            }
            Ok(None) => {
                span.finish();
                info!("no command recognized after wake word");
                None
            }
            Err(e) => {
                self.metrics.increment(metric_names::TRANSCRIPTION_FAILURES);
                warn!(error = %e, "transcription failed after wake word");
                None
            }
        }
    }

    fn within_debounce(&self) -> bool {
        let window = Duration::from_millis(self.config.debounce_ms);
        match self.last_trigger {
            Some(at) if !window.is_zero() => at.elapsed() < window,
            _ => false,
        }
    }

    fn transition(&self, next: ListenState) {
        // Out-of-order transitions are logged, not fatal.
        if let Err(e) = self.state.transition(next) {
            warn!(error = %e, "unexpected state transition");
        }
    }
}
