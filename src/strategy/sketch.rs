//! Probabilistic sketch strategy
//!
//! Four fixed-size structures in the key/value store, one per question:
//!
//! - membership: bloom filter (false positives possible, no false negatives)
//! - occurrence count: count-min sketch (never under-counts)
//! - cardinality: HyperLogLog
//! - most frequent: top-K tracker
//!
//! Initialization reserves every structure first, then streams the corpus
//! into all four at once in chunks.

use super::{Lifecycle, Strategy, StrategyKind};
use crate::bench::fanout::TaskGroup;
use crate::config::SketchConfig;
use crate::corpus::Corpus;
use crate::models::SizeReport;
use crate::store::KeyValueStore;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

const BLOOM_KEY: &str = "bloom";
const CMS_KEY: &str = "cms";
const HLL_KEY: &str = "hll";
const TOPK_KEY: &str = "topK";
/// Filter capacity when none was configured or derived from the corpus
const DEFAULT_BLOOM_CAPACITY: u64 = 100;

/// Which structure a chunk is written to
#[derive(Debug, Clone, Copy)]
enum Structure {
    Bloom,
    CountMin,
    HyperLogLog,
    TopK,
}

impl Structure {
    const ALL: [Structure; 4] = [
        Structure::Bloom,
        Structure::CountMin,
        Structure::HyperLogLog,
        Structure::TopK,
    ];

    fn key(&self) -> &'static str {
        match self {
            Structure::Bloom => BLOOM_KEY,
            Structure::CountMin => CMS_KEY,
            Structure::HyperLogLog => HLL_KEY,
            Structure::TopK => TOPK_KEY,
        }
    }

    /// Suffix of the size label
    fn label(&self) -> &'static str {
        match self {
            Structure::Bloom => "bloom",
            Structure::CountMin => "cms",
            Structure::HyperLogLog => "hll",
            Structure::TopK => "topk",
        }
    }

    async fn add(&self, store: &dyn KeyValueStore, items: &[String]) -> Result<()> {
        match self {
            Structure::Bloom => store.bf_madd(BLOOM_KEY, items).await,
            Structure::CountMin => store.cms_incrby(CMS_KEY, items).await,
            Structure::HyperLogLog => store.pfadd(HLL_KEY, items).await,
            Structure::TopK => store.topk_add(TOPK_KEY, items).await,
        }
    }
}

pub struct SketchStrategy {
    store: Arc<dyn KeyValueStore>,
    config: SketchConfig,
    chunk_size: usize,
    fanout_limit: usize,
    state: Lifecycle,
}

impl SketchStrategy {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        config: SketchConfig,
        chunk_size: usize,
        fanout_limit: usize,
    ) -> Self {
        Self {
            store,
            config,
            chunk_size: chunk_size.max(1),
            fanout_limit,
            state: Lifecycle::Uninitialized,
        }
    }

    async fn reserve(&self) -> Result<()> {
        let capacity = self
            .config
            .bloom_capacity
            .unwrap_or(DEFAULT_BLOOM_CAPACITY)
            .max(1);

        self.store
            .bf_reserve(BLOOM_KEY, self.config.bloom_error_rate, capacity)
            .await?;
        self.store
            .cms_init_by_prob(CMS_KEY, self.config.cms_error, self.config.cms_probability)
            .await?;
        self.store
            .topk_reserve(TOPK_KEY, self.config.topk_capacity)
            .await?;

        tracing::debug!(
            bloom_capacity = capacity,
            bloom_error_rate = self.config.bloom_error_rate,
            topk_capacity = self.config.topk_capacity,
            "sketch structures reserved"
        );
        Ok(())
    }
}

#[async_trait]
impl Strategy for SketchStrategy {
    fn name(&self) -> &str {
        StrategyKind::Sketch.display_name()
    }

    async fn initialize(&mut self, corpus: &Corpus) -> Result<()> {
        self.state.check_uninitialized(self.name())?;
        self.reserve().await?;

        let tokens = corpus.shared();
        let chunk_size = self.chunk_size;
        let mut group = TaskGroup::with_limit(self.fanout_limit);
        for structure in Structure::ALL {
            for start in (0..tokens.len()).step_by(chunk_size) {
                let end = (start + chunk_size).min(tokens.len());
                let store = self.store.clone();
                let tokens = tokens.clone();
                group.spawn(async move { structure.add(store.as_ref(), &tokens[start..end]).await });
            }
        }
        let writes = group.len();
        group.join().await?;

        tracing::debug!(strategy = self.name(), writes, chunk_size, "sketches loaded");
        self.state = Lifecycle::Initialized;
        Ok(())
    }

    async fn presence_check(&self, token: &str) -> Result<bool> {
        self.state.check_initialized(self.name())?;
        self.store.bf_exists(BLOOM_KEY, token).await
    }

    async fn item_count(&self, token: &str) -> Result<u64> {
        self.state.check_initialized(self.name())?;
        self.store.cms_query(CMS_KEY, token).await
    }

    async fn cardinality_check(&self) -> Result<u64> {
        self.state.check_initialized(self.name())?;
        self.store.pfcount(HLL_KEY).await
    }

    async fn top_k(&self, k: usize) -> Result<Vec<String>> {
        self.state.check_initialized(self.name())?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut tracked = self.store.topk_list(TOPK_KEY).await?;
        tracked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        tracked.truncate(k);
        Ok(tracked.into_iter().map(|(token, _)| token).collect())
    }

    async fn report_size(&self, sizes: &mut SizeReport) -> Result<()> {
        self.state.check_initialized(self.name())?;
        for structure in Structure::ALL {
            let bytes = self.store.memory_usage(structure.key()).await?;
            sizes.record(
                format!("{}.{}", StrategyKind::Sketch.key(), structure.label()),
                bytes,
            );
        }
        Ok(())
    }
}
