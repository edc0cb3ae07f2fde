//! End-to-end tests through the public API.
//!
//! Audio is synthesized; no device is opened.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use kim_hotword::{
    auto_tune, AudioSource, CaptureEnd, ConfirmationReason, ConfirmationReply, Evaluator,
    HotwordConfig, HotwordListener, HotwordScorer, LabeledSample, ListenState, MetricsRegistry,
    RecognizerOutput, RejectReason, Result, Score, Transcriber, Transcript,
};
use tokio_util::sync::CancellationToken;

const SAMPLE_RATE: u32 = 16_000;
const CHUNK: usize = 1600;

fn sine_chunk(amplitude: f32) -> Vec<i16> {
    (0..CHUNK)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            (amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()) as i16
        })
        .collect()
}

struct SyntheticMic {
    chunks: VecDeque<Vec<i16>>,
}

impl SyntheticMic {
    fn new(amplitude: f32, count: usize) -> Self {
        Self {
            chunks: (0..count).map(|_| sine_chunk(amplitude)).collect(),
        }
    }
}

#[async_trait]
impl AudioSource for SyntheticMic {
    async fn next_chunk(&mut self) -> Result<Vec<i16>> {
        match self.chunks.pop_front() {
            Some(chunk) => Ok(chunk),
            None => std::future::pending().await,
        }
    }
}

/// Replays recognizer JSON, one document per utterance.
struct RecognizerReplay {
    outputs: VecDeque<&'static str>,
}

impl HotwordScorer for RecognizerReplay {
    fn score(&mut self, _utterance: &[i16]) -> Result<Score> {
        let raw = self.outputs.pop_front().unwrap_or(r#"{"text":""}"#);
        RecognizerOutput::from_json(raw)?.into_score()
    }
}

struct CannedTranscriber(Option<Transcript>);

#[async_trait]
impl Transcriber for CannedTranscriber {
    async fn transcribe(&mut self) -> Result<Option<Transcript>> {
        Ok(self.0.take())
    }
}

fn config_from(pairs: &[(&str, &str)]) -> HotwordConfig {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    HotwordConfig::from_lookup(|key| map.get(key).cloned()).unwrap()
}

fn base_pairs() -> Vec<(&'static str, &'static str)> {
    vec![
        ("MIC_CHUNK_SIZE", "1600"),
        ("HOTWORD_MAX_UTTERANCE_MS", "500"),
        ("HOTWORD_SILENCE_TAIL_MS", "200"),
        ("HOTWORD_MAX_CAPTURE_MS", "1000"),
        ("HOTWORD_DEBOUNCE_MS", "0"),
    ]
}

#[tokio::test]
async fn loud_room_demands_more_confidence() {
    const WAKE: &str = r#"{"text":"ким включи свет","result":[{"word":"ким","conf":0.7},{"word":"включи","conf":0.6},{"word":"свет","conf":0.65}]}"#;
    let replay = || RecognizerReplay {
        outputs: VecDeque::from([WAKE, WAKE]),
    };
    let mut pairs = base_pairs();
    pairs.push(("HOTWORD_NOISE_MIN_SAMPLES", "5"));

    // A 1400-amplitude sine averages ~890. The first utterance is judged before
    // any ambient level is known; the second against the room it revealed.
    let mut loud = HotwordListener::new(
        config_from(&pairs),
        SyntheticMic::new(1400.0, 10),
        replay(),
    )
    .unwrap();
    let first = loud.listen_once().await.unwrap();
    assert!(first.accepted(), "{first:?}");
    assert!((first.detection.threshold() - 0.48).abs() < 1e-6);

    let second = loud.listen_once().await.unwrap();
    assert_eq!(second.detection.rejection(), Some(RejectReason::LowConfidence));
    assert!(second.detection.threshold() > 0.8);
    assert!(second.noise_level > 800.0);

    let mut quiet = HotwordListener::new(
        config_from(&pairs),
        SyntheticMic::new(50.0, 10),
        replay(),
    )
    .unwrap();
    assert!(quiet.listen_once().await.unwrap().accepted());
    let second = quiet.listen_once().await.unwrap();
    assert!(second.accepted(), "{second:?}");
    assert!(second.detection.threshold() < 0.55);
}

#[tokio::test]
async fn silence_with_vad_is_scored_at_the_ceiling() {
    let mut pairs = base_pairs();
    pairs.extend([("STT_USE_VAD", "true"), ("STT_VAD_AGGRESSIVENESS", "3")]);
    let mut listener = HotwordListener::new(
        config_from(&pairs),
        SyntheticMic::new(0.0, 30),
        RecognizerReplay {
            outputs: VecDeque::new(),
        },
    )
    .unwrap();

    let outcome = listener.listen_once().await.unwrap();
    assert_eq!(outcome.capture_end, CaptureEnd::Ceiling);
    assert_eq!(outcome.chunks_captured, 10);
    assert!(!outcome.accepted());
    assert_eq!(listener.state().current(), ListenState::Idle);
}

#[tokio::test]
async fn wake_then_command_then_confirmation() {
    let metrics = Arc::new(MetricsRegistry::new());
    let mut listener = HotwordListener::new(
        config_from(&base_pairs()),
        SyntheticMic::new(50.0, 10),
        RecognizerReplay {
            outputs: VecDeque::from([r#"{"text":"привет"}"#, r#"{"text":"Ким!","confidence":0.95}"#]),
        },
    )
    .unwrap()
    .with_metrics(Arc::clone(&metrics))
    .with_transcriber(Box::new(CannedTranscriber(Some(Transcript {
        text: "поставь будильник".into(),
        avg_confidence: 0.6,
    }))));

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    let mut outcomes = Vec::new();
    listener
        .listen(cancel, |outcome| {
            let accepted = outcome.accepted();
            outcomes.push(outcome);
            if accepted {
                stop.cancel();
            }
        })
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].detection.rejection(), Some(RejectReason::NoWakePhrase));
    let command = outcomes[1].command.as_ref().unwrap();
    assert_eq!(command.verdict.reason, ConfirmationReason::LowConfidence);
    assert_eq!(ConfirmationReply::interpret("нет, не так"), ConfirmationReply::Declined);

    let counters = metrics.counters();
    assert_eq!(counters["cycles"], 2);
    assert_eq!(counters["accepted"], 1);
    assert_eq!(counters["rejected.no_wake_phrase"], 1);
    assert_eq!(counters["confirmation.low_confidence"], 1);
}

#[test]
fn manifest_evaluation_and_tuning() {
    let samples: Vec<LabeledSample> = serde_json::from_str(
        r#"[
            {"name": "positive_kim_1.wav", "text": "ким, включи музыку", "confidence": 0.92},
            {"name": "positive_kim_2.wav", "text": "kim", "confidence": 0.81, "noise_level": 300},
            {"name": "negative_1.wav", "text": "кино", "confidence": 0.97},
            {"name": "negative_2.wav", "text": "ким", "confidence": 0.58},
            {"name": "background_noise.wav", "text": "", "confidence": 0.0}
        ]"#,
    )
    .unwrap();
    let config = HotwordConfig::default();

    let report = Evaluator::new(&config).unwrap().run(&samples);
    assert_eq!(report.counts.tp, 2);
    assert_eq!(report.counts.fp, 1);
    assert_eq!(report.counts.tn, 2);

    let tuned = auto_tune(&config, &samples, 10).unwrap();
    assert_eq!(tuned.report.counts.fp, 0);
    assert_eq!(tuned.report.counts.tp, 2);
    assert!(tuned.config.min_confidence_floor > 0.58);
    assert_eq!(Evaluator::new(&tuned.config).unwrap().run(&samples), tuned.report);
}
