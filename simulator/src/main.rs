use anyhow::Context;
use clap::{Parser, ValueEnum};
use gammacore::config::StrategyKind;
use gammacore::localization::LocalizationOutcome;
use gammacore::prelude::CancelToken;
use log::warn;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::WorkflowConfig;
use workflow::runner::{Runner, WorkflowResult};

mod generator;
mod workflow;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    GridSearch,
    Interpolation,
}

impl From<StrategyArg> for StrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::GridSearch => StrategyKind::GridSearch,
            StrategyArg::Interpolation => StrategyKind::Interpolation,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about = "Synthetic gamma survey workflow driver")]
struct Args {
    /// Run on the calling thread without waiting for Ctrl+C
    #[arg(long, default_value_t = false)]
    offline: bool,
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Seed for the synthetic flight
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
    /// Abort localization after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
    /// Where to write the JSON report
    #[arg(long, default_value = "tools/data/survey_report.json")]
    report: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let workflow_config = match &args.workflow {
        Some(path) => WorkflowConfig::load(path)?,
        None => WorkflowConfig::default(),
    }
    .with_overrides(args.seed, args.strategy.map(Into::into), args.deadline_secs);

    let cancel = match workflow_config.deadline() {
        Some(deadline) => CancelToken::with_timeout(deadline),
        None => CancelToken::new(),
    };
    let runner = Runner::new(workflow_config);

    let result = if args.offline {
        runner.execute(&cancel)?
    } else {
        let runtime = TokioBuilder::new_multi_thread()
            .enable_all()
            .build()
            .context("creating runtime for signal handling")?;
        runtime.block_on(async {
            let token = cancel.clone();
            let mut worker = tokio::task::spawn_blocking(move || runner.execute(&token));
            tokio::select! {
                joined = &mut worker => joined.context("joining workflow task")?,
                interrupted = signal::ctrl_c() => {
                    interrupted.context("awaiting Ctrl+C")?;
                    warn!("Ctrl+C received, cancelling workflow");
                    cancel.cancel();
                    worker.await.context("joining workflow task")?
                }
            }
        })?
    };

    print_summary(&result);
    write_report(&args.report, &result)?;
    Ok(())
}

fn print_summary(result: &WorkflowResult) {
    let location = match &result.localization {
        LocalizationOutcome::Located(report) => format!(
            "source ({:.6}, {:.6}) activity {:.3e} Bq ± {:.3e} [{:?}]",
            report.result.coordinate.lat,
            report.result.coordinate.lon,
            report.result.activity,
            report.result.deviation,
            report.signal
        ),
        LocalizationOutcome::InsufficientData {
            available,
            required,
        } => format!("localization declined ({} of {} samples)", available, required),
    };
    println!(
        "Flight {} -> {} records, mean dose {:.4} µSv/h, p1 {:.4} -> {:.4}, {} in {} ms",
        result.flight_id,
        result.measurements,
        result.dose_summary.mean_usv_h,
        result.calibration.previous.p1,
        result.calibration.updated.p1,
        location,
        result.elapsed_ms
    );
}

fn write_report(path: &Path, result: &WorkflowResult) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating report directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(result).context("serializing workflow report")?;
    fs::write(path, json).with_context(|| format!("writing report {}", path.display()))?;
    Ok(())
}
