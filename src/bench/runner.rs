//! Benchmark runner
//!
//! Drives every strategy through the fixed sequence
//! initialize -> presence -> item count -> cardinality -> top-K -> sizes,
//! timing each call and recording exactly one measurement per
//! (strategy, operation) pair.

use crate::config::HarnessConfig;
use crate::corpus::Corpus;
use crate::error::{kind, severity, Severity};
use crate::models::{Answer, Measurement, Operation, RunReport, SizeReport};
use crate::strategy::Strategy;
use crate::{BenchError, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Parameters shared by every strategy in a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub probe_token: String,
    pub top_k: usize,
    /// Deadline applied to each individual operation
    pub operation_timeout: Option<Duration>,
}

impl RunPlan {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            probe_token: config.run.probe_token.clone(),
            top_k: config.run.top_k,
            operation_timeout: config.run.operation_timeout,
        }
    }
}

/// Progress event sent before each step starts
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// 1-based index of the step about to run
    pub step: usize,
    pub total_steps: usize,
    pub strategy: String,
    pub operation: Operation,
}

impl ProgressUpdate {
    /// Completion fraction (0.0 to 1.0) before this step runs
    pub fn completion_percentage(&self) -> f64 {
        if self.total_steps == 0 {
            0.0
        } else {
            (self.step.saturating_sub(1) as f64) / (self.total_steps as f64)
        }
    }
}

pub struct BenchmarkRunner {
    plan: RunPlan,
    progress_tx: Option<mpsc::Sender<ProgressUpdate>>,
}

impl BenchmarkRunner {
    pub fn new(plan: RunPlan) -> Self {
        Self {
            plan,
            progress_tx: None,
        }
    }

    /// Stream progress events to `tx`; a full or closed channel never stalls the run
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Run the whole sequence over `strategies`
    ///
    /// Returns `Err` only for run-fatal failures (an unreachable backend);
    /// everything else is recorded in the report.
    pub async fn run(
        &self,
        strategies: &mut [Box<dyn Strategy>],
        corpus: &Corpus,
    ) -> Result<RunReport> {
        let mut report = RunReport::new(corpus.len(), &self.plan.probe_token, self.plan.top_k);
        report.strategies = strategies.iter().map(|s| s.name().to_string()).collect();

        let mut retired: Vec<Option<String>> = vec![None; strategies.len()];
        let total_steps = strategies.len() * Operation::ALL.len();
        let mut step = 0;

        tracing::info!(
            strategies = strategies.len(),
            tokens = corpus.len(),
            probe = %self.plan.probe_token,
            k = self.plan.top_k,
            "benchmark started"
        );

        for (i, strategy) in strategies.iter_mut().enumerate() {
            step += 1;
            let name = strategy.name().to_string();
            self.notify(step, total_steps, &name, Operation::Initialize);

            let (elapsed, result) =
                timed(self.plan.operation_timeout, strategy.initialize(corpus)).await;
            self.abandon_if_expired(strategy.as_ref(), &result).await;
            self.record(
                &mut report,
                &mut retired[i],
                &name,
                Operation::Initialize,
                elapsed,
                result.map(|()| Answer::Unit),
            )?;
        }

        for operation in Operation::QUERIES {
            for (i, strategy) in strategies.iter().enumerate() {
                step += 1;
                let name = strategy.name();
                if let Some(reason) = &retired[i] {
                    report
                        .measurements
                        .push(Measurement::skipped(name, operation, reason.clone()));
                    continue;
                }
                self.notify(step, total_steps, name, operation);

                let (elapsed, result) = self.query(strategy.as_ref(), operation).await;
                self.abandon_if_expired(strategy.as_ref(), &result).await;
                self.record(&mut report, &mut retired[i], name, operation, elapsed, result)?;
            }
        }

        for (i, strategy) in strategies.iter().enumerate() {
            step += 1;
            let name = strategy.name();
            if let Some(reason) = &retired[i] {
                report.measurements.push(Measurement::skipped(
                    name,
                    Operation::ReportSize,
                    reason.clone(),
                ));
                continue;
            }
            self.notify(step, total_steps, name, Operation::ReportSize);

            let mut sizes = SizeReport::new();
            let (elapsed, result) =
                timed(self.plan.operation_timeout, strategy.report_size(&mut sizes)).await;
            self.abandon_if_expired(strategy.as_ref(), &result).await;
            if result.is_ok() {
                report.sizes.merge(sizes);
            }
            self.record(
                &mut report,
                &mut retired[i],
                name,
                Operation::ReportSize,
                elapsed,
                result.map(|()| Answer::Unit),
            )?;
        }

        tracing::info!(
            measurements = report.measurements.len(),
            failures = report.failure_count(),
            "benchmark finished"
        );

        Ok(report)
    }

    async fn query(
        &self,
        strategy: &dyn Strategy,
        operation: Operation,
    ) -> (Duration, Result<Answer>) {
        let deadline = self.plan.operation_timeout;
        let probe = self.plan.probe_token.as_str();
        match operation {
            Operation::PresenceCheck => {
                timed(deadline, async {
                    strategy.presence_check(probe).await.map(Answer::Present)
                })
                .await
            }
            Operation::ItemCount => {
                timed(deadline, async {
                    strategy.item_count(probe).await.map(Answer::Count)
                })
                .await
            }
            Operation::CardinalityCheck => {
                timed(deadline, async {
                    strategy.cardinality_check().await.map(Answer::Count)
                })
                .await
            }
            Operation::TopK => {
                timed(deadline, async {
                    strategy.top_k(self.plan.top_k).await.map(Answer::Tokens)
                })
                .await
            }
            Operation::Initialize | Operation::ReportSize => (
                Duration::ZERO,
                Err(BenchError::InvalidState(format!(
                    "{} is not a query operation",
                    operation
                ))),
            ),
        }
    }

    /// Cancel the backend work behind a step that missed its deadline, so
    /// it doesn't inflate the timing of whatever runs next
    async fn abandon_if_expired<T>(&self, strategy: &dyn Strategy, result: &Result<T>) {
        if !matches!(result, Err(BenchError::Timeout(_))) {
            return;
        }

        let (_, cancelled) = timed(self.plan.operation_timeout, strategy.abandon()).await;
        match cancelled {
            Ok(()) => tracing::debug!(strategy = strategy.name(), "abandoned work cancelled"),
            Err(e) => tracing::warn!(
                strategy = strategy.name(),
                error = %e,
                "could not cancel abandoned work"
            ),
        }
    }

    /// Append the measurement for one step and apply the failure policy
    fn record(
        &self,
        report: &mut RunReport,
        retired: &mut Option<String>,
        strategy: &str,
        operation: Operation,
        elapsed: Duration,
        result: Result<Answer>,
    ) -> Result<()> {
        let err = match result {
            Ok(answer) => {
                tracing::debug!(strategy, %operation, ?elapsed, %answer, "step completed");
                report
                    .measurements
                    .push(Measurement::completed(strategy, operation, elapsed, answer));
                return Ok(());
            }
            Err(err) => err,
        };

        report.measurements.push(Measurement::failed(
            strategy,
            operation,
            elapsed,
            kind(&err),
            err.to_string(),
        ));

        match severity(&err) {
            Severity::RunFatal => {
                tracing::error!(strategy, %operation, error = %err, "run aborted");
                Err(err)
            }
            Severity::StrategyFatal => {
                tracing::warn!(strategy, %operation, error = %err, "strategy retired");
                *retired = Some(format!("retired after {} failed ({})", operation, kind(&err)));
                Ok(())
            }
            Severity::Recoverable => {
                tracing::warn!(strategy, %operation, error = %err, "step failed");
                // An unfinished initialize leaves nothing to query.
                if operation == Operation::Initialize {
                    *retired = Some(format!("retired after {} failed ({})", operation, kind(&err)));
                }
                Ok(())
            }
        }
    }

    fn notify(&self, step: usize, total_steps: usize, strategy: &str, operation: Operation) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.try_send(ProgressUpdate {
                step,
                total_steps,
                strategy: strategy.to_string(),
                operation,
            });
        }
    }
}

/// Time `task`, failing it with `Timeout` once `deadline` expires
pub async fn timed<T, F>(deadline: Option<Duration>, task: F) -> (Duration, Result<T>)
where
    F: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let result = match deadline {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(result) => result,
            Err(_) => Err(BenchError::Timeout(limit)),
        },
        None => task.await,
    };
    (start.elapsed(), result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timed_reports_timeout() {
        let (elapsed, result) = timed(Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(BenchError::Timeout(_))));
        assert!(elapsed >= Duration::from_millis(10));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_timed_passes_result_through() {
        let (_, result) = timed(None, async { Ok(7u64) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_progress_completion() {
        let update = ProgressUpdate {
            step: 3,
            total_steps: 4,
            strategy: "sketch".to_string(),
            operation: Operation::ItemCount,
        };
        assert!((update.completion_percentage() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_plan_from_config() {
        let config = HarnessConfig::default()
            .with_probe_token("whale")
            .with_top_k(3);
        let plan = RunPlan::from_config(&config);
        assert_eq!(plan.probe_token, "whale");
        assert_eq!(plan.top_k, 3);
        assert_eq!(plan.operation_timeout, config.run.operation_timeout);
    }
}
