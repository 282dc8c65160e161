//! tokenbench command line
//!
//! Usage:
//!   tokenbench --corpus data/moby-dick.txt              # all strategies, live backends
//!   tokenbench --corpus book.txt --backend memory       # no servers needed
//!   tokenbench --corpus book.txt --only sketch,sorted-set --top-k 5 --json

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tokenbench::bench::{BenchmarkRunner, ProgressUpdate, RunPlan};
use tokenbench::config::HarnessConfig;
use tokenbench::corpus::{Corpus, Tokenizer};
use tokenbench::error::user_friendly_message;
use tokenbench::models::RunReport;
use tokenbench::report;
use tokenbench::store::{BackendMode, Backends};
use tokenbench::strategy::{build_strategies, StrategyKind};
use tokenbench::util::parse_duration;
use tokenbench::{BenchError, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tokenbench", version, about = "Exact vs. probabilistic token query benchmark")]
struct Cli {
    /// Configuration file (defaults to the user config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Text file to tokenize and load.
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Token used for presence and item-count queries.
    #[arg(long)]
    probe: Option<String>,

    /// Number of most frequent tokens to ask for.
    #[arg(long)]
    top_k: Option<usize>,

    /// Per-operation deadline, e.g. "30s" or "2m"; "none" disables it.
    #[arg(long)]
    timeout: Option<String>,

    /// Which backends to run against.
    #[arg(long, value_enum, default_value = "live")]
    backend: BackendArg,

    /// Run only these strategies (comma-separated: exact-unindexed, exact-indexed, sorted-set, sketch).
    #[arg(long, value_delimiter = ',')]
    only: Vec<StrategyKind>,

    /// Print the run report as JSON instead of tables.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Live,
    Memory,
}

impl From<BackendArg> for BackendMode {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Live => BackendMode::Live,
            BackendArg::Memory => BackendMode::Memory,
        }
    }
}

impl Cli {
    /// Layer command-line overrides over the loaded configuration
    fn apply(&self, mut config: HarnessConfig) -> Result<HarnessConfig> {
        if let Some(path) = &self.corpus {
            config = config.with_corpus_path(path.clone());
        }
        if let Some(probe) = &self.probe {
            config = config.with_probe_token(probe.to_lowercase());
        }
        if let Some(k) = self.top_k {
            config = config.with_top_k(k);
        }
        if let Some(timeout) = &self.timeout {
            let timeout = if timeout.trim().eq_ignore_ascii_case("none") {
                None
            } else {
                Some(parse_duration(timeout).map_err(BenchError::Config)?)
            };
            config = config.with_operation_timeout(timeout);
        }
        Ok(config)
    }

    fn strategy_kinds(&self) -> Vec<StrategyKind> {
        if self.only.is_empty() {
            StrategyKind::ALL.to_vec()
        } else {
            self.only.clone()
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "benchmark failed");
        eprintln!("Error: {}", user_friendly_message(&e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.apply(HarnessConfig::load(cli.config.as_deref())?)?;
    config.validate()?;

    let corpus_path = config.corpus.path.clone().ok_or_else(|| {
        BenchError::Corpus("no corpus file given (use --corpus or [corpus].path)".to_string())
    })?;
    let corpus = Corpus::load(&corpus_path, &Tokenizer::new(&config.corpus)).await?;

    let backends = Backends::open(cli.backend.into(), &config).await?;
    let outcome = execute(&cli, &config, &corpus, &backends).await;
    backends.close().await;
    let report = outcome?;

    if cli.json {
        report::print_json(&report)?;
    } else {
        report::print_report(&report)?;
    }
    Ok(())
}

async fn execute(
    cli: &Cli,
    config: &HarnessConfig,
    corpus: &Corpus,
    backends: &Backends,
) -> Result<RunReport> {
    backends.reset().await?;

    let mut strategies = build_strategies(&cli.strategy_kinds(), backends, config, corpus).await?;

    let (tx, rx) = mpsc::channel(64);
    let progress = spawn_progress(rx);

    let runner = BenchmarkRunner::new(RunPlan::from_config(config)).with_progress(tx);
    let result = runner.run(&mut strategies, corpus).await;

    // Dropping the runner closes the channel and stops the progress bar.
    drop(runner);
    progress.await.ok();

    result
}

fn spawn_progress(mut rx: mpsc::Receiver<ProgressUpdate>) -> JoinHandle<()> {
    let pb = indicatif::ProgressBar::new(100);
    if let Ok(style) =
        indicatif::ProgressStyle::with_template("{spinner} [{elapsed}] {bar:30} {percent:>3}% {msg}")
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            pb.set_position(progress_position(&update));
            pb.set_message(format!(
                "[{}/{}] {}: {}",
                update.step, update.total_steps, update.strategy, update.operation
            ));
        }
        pb.finish_and_clear();
    })
}

/// Bar position out of 100 before `update`'s step runs
fn progress_position(update: &ProgressUpdate) -> u64 {
    (update.completion_percentage() * 100.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "tokenbench",
            "--corpus",
            "book.txt",
            "--probe",
            "Whale",
            "--top-k",
            "20",
            "--timeout",
            "5s",
            "--only",
            "sketch,exact-indexed",
        ]);
        let config = cli.apply(HarnessConfig::default()).unwrap();

        assert_eq!(config.corpus.path, Some(PathBuf::from("book.txt")));
        assert_eq!(config.run.probe_token, "whale");
        assert_eq!(config.run.top_k, 20);
        assert!(config.sketch.topk_capacity >= 20);
        assert_eq!(config.run.operation_timeout, Some(Duration::from_secs(5)));
        assert_eq!(
            cli.strategy_kinds(),
            vec![StrategyKind::Sketch, StrategyKind::ExactIndexed]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timeout_none_disables_deadline() {
        let cli = Cli::parse_from(["tokenbench", "--timeout", "none", "--backend", "memory"]);
        let config = cli.apply(HarnessConfig::default()).unwrap();
        assert_eq!(config.run.operation_timeout, None);
        assert!(matches!(cli.backend, BackendArg::Memory));
        assert_eq!(cli.strategy_kinds(), StrategyKind::ALL.to_vec());
    }

    #[test]
    fn test_progress_position_tracks_completed_steps() {
        let update = |step| ProgressUpdate {
            step,
            total_steps: 24,
            strategy: "sketch".to_string(),
            operation: tokenbench::models::Operation::TopK,
        };
        assert_eq!(progress_position(&update(1)), 0);
        assert_eq!(progress_position(&update(13)), 50);
        assert_eq!(progress_position(&update(24)), 96);
    }

    #[test]
    fn test_bad_timeout_is_config_error() {
        let cli = Cli::parse_from(["tokenbench", "--timeout", "soon"]);
        assert!(matches!(
            cli.apply(HarnessConfig::default()),
            Err(BenchError::Config(_))
        ));
    }
}
