//! Kim hotword: adaptive wake-word detection.
//! Main library: module wiring, public re-exports, tracing setup.

pub mod accuracy;
pub mod audio;
pub mod config;
pub mod confirmation;
pub mod detection;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod noise;
pub mod state_machine;
pub mod stt;
pub mod threshold;

pub use accuracy::{auto_tune, AccuracyReport, Evaluator, LabeledSample, TuningOutcome};
pub use audio::vad::{AlwaysSpeech, EarshotGate, VoiceGate};
pub use audio::wake::{HotwordScorer, RecognizerOutput, Score};
pub use audio::{AudioSource, CpalSource};
pub use config::HotwordConfig;
pub use confirmation::{
    ConfirmationPolicy, ConfirmationReason, ConfirmationReply, ConfirmationVerdict,
};
pub use detection::{DetectionPolicy, DetectionResult, RejectReason, WakePhrase};
pub use error::{HotwordError, Result};
pub use listener::{CaptureEnd, CommandOutcome, CycleOutcome, HotwordListener, ThresholdHandle};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use noise::NoiseFloorTracker;
pub use state_machine::{ListenState, StateMachine};
pub use stt::{Transcriber, Transcript};
pub use threshold::{ThresholdBand, ThresholdEngine};

use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "kim_hotword=debug";

/// Install the global fmt subscriber. `RUST_LOG` overrides the default filter;
/// `HOTWORD_LOG_FORMAT=json` switches to JSON lines. Logs go to stderr. Safe to call twice.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("HOTWORD_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_ok() {
        tracing::info!(json, "kim hotword tracing initialized");
    }
}
