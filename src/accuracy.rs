//! Offline accuracy harness over pre-scored samples.
//!
//! Each sample carries what the spotting model said about one recording plus
//! the ambient noise level it was captured in. The evaluator replays the same
//! detection policy and threshold band the listener uses, so results are
//! deterministic and need no audio device.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::HotwordConfig;
use crate::detection::{DetectionPolicy, DetectionResult, RejectReason};
use crate::error::Result;
use crate::threshold::ThresholdBand;

/// Precision the tuner aims for.
pub const TARGET_PRECISION: f32 = 0.9;
const CONFIDENCE_STEP: f32 = 0.02;
const MAX_TUNED_CONFIDENCE: f32 = 0.99;
const MAX_TUNED_MIN_CHARS: usize = 20;

/// One recording as scored by the spotting model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    /// File name; labels the sample when `expected` is absent.
    pub name: String,
    pub text: String,
    pub confidence: f32,
    /// Ambient level during capture; the configured default when absent.
    #[serde(default)]
    pub noise_level: Option<f32>,
    #[serde(default)]
    pub expected: Option<bool>,
}

impl LabeledSample {
    pub fn expected_trigger(&self) -> bool {
        self.expected
            .unwrap_or_else(|| expected_trigger_for_name(&self.name))
    }
}

/// Label from the file name. Negative markers win over positive ones;
/// unmarked files are expected not to trigger.
pub fn expected_trigger_for_name(name: &str) -> bool {
    let name = name.to_lowercase();
    let negative = name.contains("negative")
        || name.contains("no_kim")
        || name.contains("no-kim")
        || (name.contains("background") && name.contains("noise"))
        || (name.contains("other") && name.contains("command"));
    if negative {
        return false;
    }
    name.contains("positive") || name.contains("kim") || name.contains("ким")
}

/// Replays detection for labelled samples under one configuration.
#[derive(Debug, Clone)]
pub struct Evaluator {
    policy: DetectionPolicy,
    band: ThresholdBand,
    default_level: f32,
    min_chars: usize,
}

impl Evaluator {
    pub fn new(cfg: &HotwordConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            policy: DetectionPolicy::from_config(cfg),
            band: ThresholdBand::from_config(cfg),
            default_level: cfg.noise_default_level,
            min_chars: cfg.min_chars,
        })
    }

    /// Whether the sample would trigger. Pure.
    pub fn evaluate(&self, sample: &LabeledSample) -> bool {
        self.detect(sample).accepted()
    }

    /// Full verdict for the sample, threshold included.
    pub fn detect(&self, sample: &LabeledSample) -> DetectionResult {
        let level = sample.noise_level.unwrap_or(self.default_level);
        let threshold = self.band.threshold_for_level(level);
        self.policy
            .evaluate(&sample.text, sample.confidence, threshold, self.min_chars)
    }

    /// Evaluate every sample and tally the confusion matrix.
    pub fn run(&self, samples: &[LabeledSample]) -> AccuracyReport {
        let mut counts = ConfusionCounts::default();
        let results: Vec<SampleResult> = samples
            .iter()
            .map(|sample| {
                let expected = sample.expected_trigger();
                let detection = self.detect(sample);
                let triggered = detection.accepted();
                let outcome = counts.record(expected, triggered);
                debug!(
                    sample = %sample.name,
                    expected,
                    triggered,
                    outcome = outcome.as_str(),
                    "sample_evaluated"
                );
                SampleResult {
                    name: sample.name.clone(),
                    expected,
                    triggered,
                    outcome,
                    text: detection.recognized_text().to_string(),
                    confidence: detection.confidence(),
                    threshold: detection.threshold(),
                    rejection: detection.rejection(),
                }
            })
            .collect();

        AccuracyReport {
            precision: counts.precision(),
            recall: counts.recall(),
            f1: counts.f1(),
            accuracy: counts.accuracy(),
            counts,
            results,
        }
    }
}

/// Confusion-matrix cell for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SampleOutcome {
    TruePositive,
    FalsePositive,
    FalseNegative,
    TrueNegative,
}

impl SampleOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SampleOutcome::TruePositive => "TP",
            SampleOutcome::FalsePositive => "FP",
            SampleOutcome::FalseNegative => "FN",
            SampleOutcome::TrueNegative => "TN",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionCounts {
    pub tp: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub tn: usize,
}

impl ConfusionCounts {
    fn record(&mut self, expected: bool, triggered: bool) -> SampleOutcome {
        match (expected, triggered) {
            (true, true) => {
                self.tp += 1;
                SampleOutcome::TruePositive
            }
            (false, true) => {
                self.fp += 1;
                SampleOutcome::FalsePositive
            }
            (true, false) => {
                self.fn_ += 1;
                SampleOutcome::FalseNegative
            }
            (false, false) => {
                self.tn += 1;
                SampleOutcome::TrueNegative
            }
        }
    }

    pub fn total(&self) -> usize {
        self.tp + self.fp + self.fn_ + self.tn
    }

    pub fn precision(&self) -> f32 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f32 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f1(&self) -> f32 {
        let (p, r) = (self.precision(), self.recall());
        if p + r > 0.0 {
            2.0 * p * r / (p + r)
        } else {
            0.0
        }
    }

    pub fn accuracy(&self) -> f32 {
        ratio(self.tp + self.tn, self.total())
    }
}

fn ratio(num: usize, den: usize) -> f32 {
    if den == 0 {
        0.0
    } else {
        num as f32 / den as f32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleResult {
    pub name: String,
    pub expected: bool,
    pub triggered: bool,
    pub outcome: SampleOutcome,
    pub text: String,
    pub confidence: f32,
    pub threshold: f32,
    pub rejection: Option<RejectReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyReport {
    pub counts: ConfusionCounts,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    pub accuracy: f32,
    pub results: Vec<SampleResult>,
}

/// Final configuration and report of an auto-tune run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningOutcome {
    pub config: HotwordConfig,
    pub report: AccuracyReport,
    pub iterations: usize,
}

/// Tighten the detector until precision reaches [`TARGET_PRECISION`].
///
/// Each round that misses the target and still has false positives raises the
/// confidence threshold by 0.02 (capped at 0.99; in adaptive mode the band
/// floor moves too, capped at the ceiling). When false positives outnumber
/// true positives, `min_chars` also grows by one, capped at 20. Stops at the
/// target, when nothing more can be raised, or after `max_iterations` rounds.
pub fn auto_tune(
    cfg: &HotwordConfig,
    samples: &[LabeledSample],
    max_iterations: usize,
) -> Result<TuningOutcome> {
    let mut config = cfg.clone();
    let mut iterations = 0;

    loop {
        iterations += 1;
        let report = Evaluator::new(&config)?.run(samples);
        info!(
            iteration = iterations,
            min_confidence = config.min_confidence,
            band_floor = config.min_confidence_floor,
            min_chars = config.min_chars,
            precision = report.precision,
            recall = report.recall,
            fp = report.counts.fp,
            "tuning_round"
        );

        let satisfied = report.precision >= TARGET_PRECISION || report.counts.fp == 0;
        if satisfied || iterations >= max_iterations.max(1) || !tighten(&mut config, &report.counts)
        {
            return Ok(TuningOutcome {
                config,
                report,
                iterations,
            });
        }
    }
}

/// One tuning step. Returns false when every knob is already at its cap.
fn tighten(config: &mut HotwordConfig, counts: &ConfusionCounts) -> bool {
    let before = (
        config.min_confidence,
        config.min_confidence_floor,
        config.min_chars,
    );

    config.min_confidence = step_up(config.min_confidence, MAX_TUNED_CONFIDENCE);
    if config.adaptive_threshold {
        config.min_confidence_floor =
            step_up(config.min_confidence_floor, config.max_confidence_floor);
    }
    if counts.fp > counts.tp {
        config.min_chars = (config.min_chars + 1).min(MAX_TUNED_MIN_CHARS.max(config.min_chars));
    }

    before
        != (
            config.min_confidence,
            config.min_confidence_floor,
            config.min_chars,
        )
}

/// Add one confidence step, rounded to hundredths, never past `cap`.
fn step_up(value: f32, cap: f32) -> f32 {
    let next = ((value + CONFIDENCE_STEP) * 100.0).round() / 100.0;
    next.min(cap).max(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, text: &str, confidence: f32) -> LabeledSample {
        LabeledSample {
            name: name.into(),
            text: text.into(),
            confidence,
            noise_level: None,
            expected: None,
        }
    }

    fn static_config(min_confidence: f32) -> HotwordConfig {
        HotwordConfig {
            adaptive_threshold: false,
            min_confidence,
            ..HotwordConfig::default()
        }
    }

    #[test]
    fn file_names_label_samples() {
        assert!(expected_trigger_for_name("positive_1.wav"));
        assert!(expected_trigger_for_name("Kim_turn_on.wav"));
        assert!(expected_trigger_for_name("ким_привет.wav"));
        assert!(!expected_trigger_for_name("negative_kim_like.wav"));
        assert!(!expected_trigger_for_name("no_kim_test.wav"));
        assert!(!expected_trigger_for_name("NO-KIM.wav"));
        assert!(!expected_trigger_for_name("background_noise.wav"));
        assert!(!expected_trigger_for_name("other_command_kim.wav"));
        assert!(!expected_trigger_for_name("random.wav"));
    }

    #[test]
    fn explicit_label_overrides_name() {
        let mut s = sample("positive_1.wav", "kim", 0.9);
        s.expected = Some(false);
        assert!(!s.expected_trigger());
    }

    #[test]
    fn counts_and_metrics() {
        let samples = vec![
            sample("positive_1.wav", "kim turn on", 0.9),
            sample("positive_2.wav", "kim", 0.2),
            sample("negative_1.wav", "kim", 0.8),
            sample("negative_2.wav", "hello there", 0.9),
        ];
        let report = Evaluator::new(&static_config(0.5)).unwrap().run(&samples);

        assert_eq!(
            report.counts,
            ConfusionCounts {
                tp: 1,
                fp: 1,
                fn_: 1,
                tn: 1
            }
        );
        assert_eq!(report.precision, 0.5);
        assert_eq!(report.recall, 0.5);
        assert_eq!(report.f1, 0.5);
        assert_eq!(report.accuracy, 0.5);
        assert_eq!(report.results[1].outcome, SampleOutcome::FalseNegative);
        assert_eq!(report.results[1].rejection, Some(RejectReason::LowConfidence));
        assert_eq!(report.results[3].rejection, Some(RejectReason::NoWakePhrase));
    }

    #[test]
    fn empty_run_reports_zeros() {
        let report = Evaluator::new(&HotwordConfig::default()).unwrap().run(&[]);
        assert_eq!(report.counts.total(), 0);
        assert_eq!(report.precision, 0.0);
        assert_eq!(report.accuracy, 0.0);
    }

    #[test]
    fn runs_are_deterministic() {
        let samples = vec![
            sample("positive_1.wav", "kim, lights", 0.71),
            LabeledSample {
                noise_level: Some(640.0),
                ..sample("positive_2.wav", "ким", 0.74)
            },
            sample("negative_1.wav", "tim", 0.99),
        ];
        let evaluator = Evaluator::new(&HotwordConfig::default()).unwrap();
        let first = evaluator.run(&samples);
        for _ in 0..5 {
            assert_eq!(evaluator.run(&samples), first);
        }
    }

    #[test]
    fn sample_noise_level_moves_the_threshold() {
        let evaluator = Evaluator::new(&HotwordConfig::default()).unwrap();
        let quiet = sample("positive_1.wav", "kim", 0.6);
        let noisy = LabeledSample {
            noise_level: Some(800.0),
            ..quiet.clone()
        };
        assert!(evaluator.evaluate(&quiet));
        assert!(!evaluator.evaluate(&noisy));
        assert!((evaluator.detect(&noisy).threshold() - 0.82).abs() < 1e-5);
    }

    #[test]
    fn tuning_raises_confidence_until_false_positives_vanish() {
        let samples = vec![
            sample("positive_1.wav", "kim turn on", 0.9),
            sample("positive_2.wav", "kim lights", 0.9),
            sample("negative_1.wav", "kim", 0.55),
            sample("negative_2.wav", "kim", 0.55),
        ];
        let outcome = auto_tune(&static_config(0.48), &samples, 10).unwrap();

        assert_eq!(outcome.iterations, 5);
        assert!((outcome.config.min_confidence - 0.56).abs() < 1e-4);
        assert_eq!(outcome.config.min_chars, 3);
        assert_eq!(outcome.report.counts.fp, 0);
        assert_eq!(outcome.report.counts.tp, 2);
    }

    #[test]
    fn tuning_moves_the_band_floor_in_adaptive_mode() {
        let samples = vec![
            sample("positive_1.wav", "kim turn on", 0.9),
            sample("negative_1.wav", "kim", 0.55),
        ];
        let outcome = auto_tune(&HotwordConfig::default(), &samples, 10).unwrap();

        assert_eq!(outcome.iterations, 4);
        assert!((outcome.config.min_confidence_floor - 0.56).abs() < 1e-4);
        assert_eq!(outcome.report.precision, 1.0);
    }

    #[test]
    fn many_false_positives_raise_min_chars() {
        let samples = vec![
            sample("positive_1.wav", "kim lights", 0.95),
            sample("other_command_1.wav", "kim", 0.95),
            sample("other_command_2.wav", "kim", 0.95),
            sample("other_command_3.wav", "kim", 0.95),
        ];
        let outcome = auto_tune(&static_config(0.48), &samples, 10).unwrap();

        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.config.min_chars, 4);
        assert_eq!(outcome.report.counts.fp, 0);
    }

    #[test]
    fn tuning_stops_at_max_iterations() {
        let samples = vec![
            sample("positive_1.wav", "kim turn on", 1.0),
            sample("negative_1.wav", "kim, what is the weather like", 1.0),
            sample("negative_2.wav", "kim, play something relaxing", 1.0),
        ];
        let outcome = auto_tune(&static_config(0.48), &samples, 3).unwrap();
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.report.counts.fp, 2);
    }

    #[test]
    fn samples_parse_from_json() {
        let samples: Vec<LabeledSample> = serde_json::from_str(
            r#"[{"name":"positive_1.wav","text":"kim","confidence":0.8},
                {"name":"x.wav","text":"hi","confidence":0.3,"noise_level":120.5,"expected":true}]"#,
        )
        .unwrap();
        assert_eq!(samples[0].noise_level, None);
        assert!(samples[1].expected_trigger());
    }
}
