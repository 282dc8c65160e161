//! Benchmark result data models
//!
//! Measurements recorded by the runner, the merged size report, and the
//! run report handed to the reporter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Every timed step of the benchmark sequence, in run order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Initialize,
    PresenceCheck,
    ItemCount,
    CardinalityCheck,
    TopK,
    ReportSize,
}

impl Operation {
    /// The query operations, in the order the runner issues them
    pub const QUERIES: [Operation; 4] = [
        Operation::PresenceCheck,
        Operation::ItemCount,
        Operation::CardinalityCheck,
        Operation::TopK,
    ];

    /// All operations in run order
    pub const ALL: [Operation; 6] = [
        Operation::Initialize,
        Operation::PresenceCheck,
        Operation::ItemCount,
        Operation::CardinalityCheck,
        Operation::TopK,
        Operation::ReportSize,
    ];

    /// Section title used in reports
    pub fn title(&self) -> &'static str {
        match self {
            Operation::Initialize => "Init",
            Operation::PresenceCheck => "Presence Check",
            Operation::ItemCount => "Item Count",
            Operation::CardinalityCheck => "Cardinality",
            Operation::TopK => "Top K",
            Operation::ReportSize => "Size Report",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Value a successful operation produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Answer {
    /// Initialize and ReportSize produce no value
    Unit,
    Present(bool),
    Count(u64),
    Tokens(Vec<String>),
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Unit => Ok(()),
            Answer::Present(present) => write!(f, "{}", present),
            Answer::Count(count) => write!(f, "{}", count),
            Answer::Tokens(tokens) => write!(f, "[{}]", tokens.join(", ")),
        }
    }
}

/// How a timed operation ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Outcome {
    Completed { answer: Answer },
    Failed { kind: String, message: String },
    /// Not attempted because the strategy was retired earlier in the run
    Skipped { reason: String },
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }

    pub fn answer(&self) -> Option<&Answer> {
        match self {
            Outcome::Completed { answer } => Some(answer),
            _ => None,
        }
    }
}

/// One (strategy, operation, elapsed) record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub strategy: String,
    pub operation: Operation,
    /// Wall time measured with a monotonic clock; zero for skipped steps
    #[serde(with = "duration_serde")]
    pub elapsed: Duration,
    pub outcome: Outcome,
}

impl Measurement {
    pub fn completed(
        strategy: impl Into<String>,
        operation: Operation,
        elapsed: Duration,
        answer: Answer,
    ) -> Self {
        Self {
            strategy: strategy.into(),
            operation,
            elapsed,
            outcome: Outcome::Completed { answer },
        }
    }

    pub fn failed(
        strategy: impl Into<String>,
        operation: Operation,
        elapsed: Duration,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            strategy: strategy.into(),
            operation,
            elapsed,
            outcome: Outcome::Failed {
                kind: kind.into(),
                message: message.into(),
            },
        }
    }

    pub fn skipped(strategy: impl Into<String>, operation: Operation, reason: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            operation,
            elapsed: Duration::ZERO,
            outcome: Outcome::Skipped {
                reason: reason.into(),
            },
        }
    }
}

/// Byte sizes keyed by `"<strategy-key>.<structure>"`
///
/// Entries accumulate across strategies and are never cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeReport {
    entries: BTreeMap<String, u64>,
}

impl SizeReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one structure's size; an existing label is overwritten
    pub fn record(&mut self, label: impl Into<String>, bytes: u64) {
        let label = label.into();
        if let Some(previous) = self.entries.insert(label.clone(), bytes) {
            tracing::warn!(%label, previous, bytes, "size label reported twice");
        }
    }

    /// Merge another report's entries into this one
    pub fn merge(&mut self, other: SizeReport) {
        for (label, bytes) in other.entries {
            self.record(label, bytes);
        }
    }

    pub fn get(&self, label: &str) -> Option<u64> {
        self.entries.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in label order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(label, bytes)| (label.as_str(), *bytes))
    }
}

/// Everything one benchmark run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Number of tokens in the corpus
    pub corpus_tokens: usize,
    /// Token used for presence and item-count queries
    pub probe_token: String,
    /// `k` used for top-K queries
    pub top_k: usize,
    /// Strategy names in the order they were driven
    pub strategies: Vec<String>,
    pub measurements: Vec<Measurement>,
    pub sizes: SizeReport,
}

impl RunReport {
    pub fn new(corpus_tokens: usize, probe_token: impl Into<String>, top_k: usize) -> Self {
        Self {
            started_at: Utc::now(),
            corpus_tokens,
            probe_token: probe_token.into(),
            top_k,
            strategies: Vec::new(),
            measurements: Vec::new(),
            sizes: SizeReport::new(),
        }
    }

    /// Measurements of one operation, in strategy order
    pub fn for_operation(&self, operation: Operation) -> impl Iterator<Item = &Measurement> {
        self.measurements
            .iter()
            .filter(move |m| m.operation == operation)
    }

    /// The measurement recorded for a (strategy, operation) pair
    pub fn measurement(&self, strategy: &str, operation: Operation) -> Option<&Measurement> {
        self.measurements
            .iter()
            .find(|m| m.strategy == strategy && m.operation == operation)
    }

    /// Fastest completed measurement of an operation
    pub fn fastest(&self, operation: Operation) -> Option<&Measurement> {
        self.for_operation(operation)
            .filter(|m| m.outcome.is_completed())
            .min_by_key(|m| m.elapsed)
    }

    /// Number of measurements that did not complete
    pub fn failure_count(&self) -> usize {
        self.measurements
            .iter()
            .filter(|m| matches!(m.outcome, Outcome::Failed { .. }))
            .count()
    }

    /// Serialize the report as pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

// Durations are serialized as integer nanoseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_nanos() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}
