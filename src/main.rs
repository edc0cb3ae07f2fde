use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use kim_hotword::{auto_tune, Evaluator, HotwordConfig, HotwordError, LabeledSample, TuningOutcome};

/// Replay pre-scored recordings through the hotword detector and report accuracy.
#[derive(Parser)]
#[command(name = "kim-hotword-eval", version, about)]
struct Cli {
    /// JSON array of samples: {"name", "text", "confidence", "noise_level"?, "expected"?}
    manifest: PathBuf,

    /// Tighten thresholds until precision reaches 0.9
    #[arg(long)]
    auto_tune: bool,

    /// Upper bound on tuning rounds
    #[arg(long, default_value = "10")]
    max_iterations: usize,

    /// Pretty-print the JSON report
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, thiserror::Error)]
enum EvalError {
    #[error("cannot read manifest {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed manifest: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Hotword(#[from] HotwordError),
}

fn main() -> ExitCode {
    kim_hotword::init_tracing();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("kim-hotword-eval: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), EvalError> {
    let config = HotwordConfig::from_env()?;
    let raw = std::fs::read_to_string(&cli.manifest).map_err(|source| EvalError::Manifest {
        path: cli.manifest.clone(),
        source,
    })?;
    let samples: Vec<LabeledSample> = serde_json::from_str(&raw)?;
    info!(samples = samples.len(), auto_tune = cli.auto_tune, "evaluating manifest");

    let outcome = if cli.auto_tune {
        auto_tune(&config, &samples, cli.max_iterations)?
    } else {
        TuningOutcome {
            report: Evaluator::new(&config)?.run(&samples),
            config,
            iterations: 1,
        }
    };

    info!(
        precision = outcome.report.precision,
        recall = outcome.report.recall,
        f1 = outcome.report.f1,
        accuracy = outcome.report.accuracy,
        iterations = outcome.iterations,
        "evaluation finished"
    );

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&outcome)?
    } else {
        serde_json::to_string(&outcome)?
    };
    println!("{rendered}");
    Ok(())
}
