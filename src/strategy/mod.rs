//! Query strategies under benchmark
//!
//! Every strategy answers the same four questions about the corpus
//! (membership, occurrence count, cardinality, most frequent tokens) and
//! reports the bytes its structures occupy. The runner only sees the
//! `Strategy` trait.

use crate::config::HarnessConfig;
use crate::corpus::Corpus;
use crate::models::SizeReport;
use crate::store::Backends;
use crate::{BenchError, Result};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

pub mod exact;
pub mod sketch;
pub mod sorted_set;

pub use exact::ExactStrategy;
pub use sketch::SketchStrategy;
pub use sorted_set::SortedSetStrategy;

/// Uniform contract every strategy implements
///
/// `initialize` must succeed exactly once before any query or `report_size`;
/// queries never modify stored data.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Display name used in measurements and reports
    fn name(&self) -> &str;

    /// Load the corpus into the strategy's backing structures
    async fn initialize(&mut self, corpus: &Corpus) -> Result<()>;

    /// Whether `token` occurs in the corpus (may be a false positive for sketches)
    async fn presence_check(&self, token: &str) -> Result<bool>;

    /// Number of occurrences of `token`
    async fn item_count(&self, token: &str) -> Result<u64>;

    /// Number of distinct tokens
    async fn cardinality_check(&self) -> Result<u64>;

    /// Up to `k` tokens, highest frequency first
    async fn top_k(&self, k: usize) -> Result<Vec<String>>;

    /// Add this strategy's structure sizes to `sizes`
    async fn report_size(&self, sizes: &mut SizeReport) -> Result<()>;

    /// Stop backend work left running by a call that missed its deadline
    async fn abandon(&self) -> Result<()> {
        Ok(())
    }
}

/// Initialization state of a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Uninitialized,
    Initialized,
}

impl Lifecycle {
    /// Fails if the strategy was already initialized
    pub fn check_uninitialized(&self, strategy: &str) -> Result<()> {
        match self {
            Lifecycle::Uninitialized => Ok(()),
            Lifecycle::Initialized => Err(BenchError::InvalidState(format!(
                "{} is already initialized",
                strategy
            ))),
        }
    }

    /// Fails unless the strategy finished initializing
    pub fn check_initialized(&self, strategy: &str) -> Result<()> {
        match self {
            Lifecycle::Initialized => Ok(()),
            Lifecycle::Uninitialized => Err(BenchError::InvalidState(format!(
                "{} has not been initialized",
                strategy
            ))),
        }
    }
}

/// The strategies the harness knows how to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    ExactUnindexed,
    ExactIndexed,
    SortedSet,
    Sketch,
}

impl StrategyKind {
    /// Every kind, in benchmark order
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::ExactUnindexed,
        StrategyKind::ExactIndexed,
        StrategyKind::SortedSet,
        StrategyKind::Sketch,
    ];

    /// Prefix of this strategy's size labels
    pub fn key(&self) -> &'static str {
        match self {
            StrategyKind::ExactUnindexed => "exact_unindexed",
            StrategyKind::ExactIndexed => "exact_indexed",
            StrategyKind::SortedSet => "sorted_set",
            StrategyKind::Sketch => "sketch",
        }
    }

    /// Name shown in reports
    pub fn display_name(&self) -> &'static str {
        match self {
            StrategyKind::ExactUnindexed => "exact unindexed",
            StrategyKind::ExactIndexed => "exact indexed",
            StrategyKind::SortedSet => "sorted set",
            StrategyKind::Sketch => "sketch",
        }
    }

    /// Spelling accepted on the command line
    pub fn slug(&self) -> &'static str {
        match self {
            StrategyKind::ExactUnindexed => "exact-unindexed",
            StrategyKind::ExactIndexed => "exact-indexed",
            StrategyKind::SortedSet => "sorted-set",
            StrategyKind::Sketch => "sketch",
        }
    }

    /// Whether answers are exact rather than estimates
    pub fn is_exact(&self) -> bool {
        !matches!(self, StrategyKind::Sketch)
    }

    /// Build an uninitialized strategy of this kind on its own backend session
    ///
    /// Anything derived from the corpus is computed here, outside the timed
    /// initialization.
    pub async fn build(
        &self,
        backends: &Backends,
        config: &HarnessConfig,
        corpus: &Corpus,
    ) -> Result<Box<dyn Strategy>> {
        let strategy: Box<dyn Strategy> = match self {
            StrategyKind::ExactUnindexed => {
                Box::new(ExactStrategy::unindexed(backends.row_session().await?))
            }
            StrategyKind::ExactIndexed => {
                Box::new(ExactStrategy::indexed(backends.row_session().await?))
            }
            StrategyKind::SortedSet => Box::new(SortedSetStrategy::new(
                backends.kv_session().await?,
                config.run.fanout_limit,
            )),
            StrategyKind::Sketch => {
                let mut sketch = config.sketch.clone();
                if sketch.bloom_capacity.is_none() {
                    sketch.bloom_capacity = Some(corpus.distinct_count() as u64);
                }
                Box::new(SketchStrategy::new(
                    backends.kv_session().await?,
                    sketch,
                    config.run.load_chunk_size,
                    config.run.fanout_limit,
                ))
            }
        };
        Ok(strategy)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.slug() == normalized)
            .ok_or_else(|| {
                let known: Vec<&str> = StrategyKind::ALL.iter().map(|k| k.slug()).collect();
                format!("unknown strategy '{}' (expected one of: {})", s, known.join(", "))
            })
    }
}

/// Build the requested strategies in benchmark order, dropping duplicates
pub async fn build_strategies(
    kinds: &[StrategyKind],
    backends: &Backends,
    config: &HarnessConfig,
    corpus: &Corpus,
) -> Result<Vec<Box<dyn Strategy>>> {
    let mut strategies = Vec::new();
    for kind in StrategyKind::ALL.into_iter().filter(|kind| kinds.contains(kind)) {
        strategies.push(kind.build(backends, config, corpus).await?);
    }
    Ok(strategies)
}
