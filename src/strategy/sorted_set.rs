//! Sorted-set ("brute force") strategy
//!
//! An exact frequency table kept in one ordered set: member = token,
//! score = occurrence count. Every occurrence is a separate increment.

use super::{Lifecycle, Strategy, StrategyKind};
use crate::bench::fanout::TaskGroup;
use crate::corpus::Corpus;
use crate::models::SizeReport;
use crate::store::KeyValueStore;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

const SORTED_SET_KEY: &str = "sortedSet";

pub struct SortedSetStrategy {
    store: Arc<dyn KeyValueStore>,
    fanout_limit: usize,
    state: Lifecycle,
}

impl SortedSetStrategy {
    pub fn new(store: Arc<dyn KeyValueStore>, fanout_limit: usize) -> Self {
        Self {
            store,
            fanout_limit,
            state: Lifecycle::Uninitialized,
        }
    }
}

#[async_trait]
impl Strategy for SortedSetStrategy {
    fn name(&self) -> &str {
        StrategyKind::SortedSet.display_name()
    }

    async fn initialize(&mut self, corpus: &Corpus) -> Result<()> {
        self.state.check_uninitialized(self.name())?;

        let tokens = corpus.shared();
        let mut group = TaskGroup::with_limit(self.fanout_limit);
        for i in 0..tokens.len() {
            let store = self.store.clone();
            let tokens = tokens.clone();
            group.spawn(async move {
                store.zincrby(SORTED_SET_KEY, &tokens[i], 1.0).await?;
                Ok(())
            });
        }
        let increments = group.len();
        group.join().await?;

        tracing::debug!(strategy = self.name(), increments, "sorted set loaded");
        self.state = Lifecycle::Initialized;
        Ok(())
    }

    async fn presence_check(&self, token: &str) -> Result<bool> {
        self.state.check_initialized(self.name())?;
        Ok(self.store.zscore(SORTED_SET_KEY, token).await?.is_some())
    }

    async fn item_count(&self, token: &str) -> Result<u64> {
        self.state.check_initialized(self.name())?;
        let score = self.store.zscore(SORTED_SET_KEY, token).await?;
        Ok(score.map(|s| s.max(0.0) as u64).unwrap_or(0))
    }

    async fn cardinality_check(&self) -> Result<u64> {
        self.state.check_initialized(self.name())?;
        self.store.zcard(SORTED_SET_KEY).await
    }

    async fn top_k(&self, k: usize) -> Result<Vec<String>> {
        self.state.check_initialized(self.name())?;
        if k == 0 {
            return Ok(Vec::new());
        }
        // ZREVRANGE bounds are inclusive.
        let stop = isize::try_from(k - 1).unwrap_or(isize::MAX);
        self.store.zrevrange(SORTED_SET_KEY, 0, stop).await
    }

    async fn report_size(&self, sizes: &mut SizeReport) -> Result<()> {
        self.state.check_initialized(self.name())?;
        let bytes = self.store.memory_usage(SORTED_SET_KEY).await?;
        sizes.record(format!("{}.zset", StrategyKind::SortedSet.key()), bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKeyValueStore;
    use crate::BenchError;

    async fn loaded(tokens: &[&str]) -> SortedSetStrategy {
        let mut strategy = SortedSetStrategy::new(Arc::new(MemoryKeyValueStore::new()), 4);
        strategy
            .initialize(&Corpus::from_tokens(tokens.iter().copied()))
            .await
            .unwrap();
        strategy
    }

    #[tokio::test]
    async fn test_counts_every_occurrence() {
        let strategy = loaded(&["the", "whale", "the", "sea", "the"]).await;
        assert!(strategy.presence_check("whale").await.unwrap());
        assert!(!strategy.presence_check("ahab").await.unwrap());
        assert_eq!(strategy.item_count("the").await.unwrap(), 3);
        assert_eq!(strategy.item_count("ahab").await.unwrap(), 0);
        assert_eq!(strategy.cardinality_check().await.unwrap(), 3);
        assert_eq!(strategy.top_k(1).await.unwrap(), vec!["the"]);
    }

    #[tokio::test]
    async fn test_top_k_returns_exactly_k_entries() {
        let strategy = loaded(&["a", "b", "b", "c", "c", "c", "d", "d", "d", "d"]).await;
        assert_eq!(strategy.top_k(2).await.unwrap(), vec!["d", "c"]);
        assert_eq!(strategy.top_k(4).await.unwrap().len(), 4);
        assert_eq!(strategy.top_k(10).await.unwrap().len(), 4);
        assert!(strategy.top_k(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_size_is_reported_under_its_own_label() {
        let strategy = loaded(&["the", "sea"]).await;
        let mut sizes = SizeReport::new();
        strategy.report_size(&mut sizes).await.unwrap();
        assert_eq!(sizes.len(), 1);
        assert!(sizes.get("sorted_set.zset").unwrap() > 0);
    }

    #[tokio::test]
    async fn test_rejected_increment_fails_initialize() {
        let store = Arc::new(MemoryKeyValueStore::new());
        store.pfadd(SORTED_SET_KEY, &["x".to_string()]).await.unwrap();

        let mut strategy = SortedSetStrategy::new(store, 4);
        let result = strategy.initialize(&Corpus::from_tokens(["the"])).await;
        assert!(matches!(result, Err(BenchError::BackendRejected(_))));
        assert!(matches!(
            strategy.cardinality_check().await,
            Err(BenchError::InvalidState(_))
        ));
    }
}
