//! Exact relational strategies
//!
//! One row per token occurrence. The indexed variant adds a secondary index
//! on the token column before loading, trading load time and disk space for
//! fast point lookups.

use super::{Lifecycle, Strategy, StrategyKind};
use crate::corpus::Corpus;
use crate::models::SizeReport;
use crate::store::RowStore;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub struct ExactStrategy {
    kind: StrategyKind,
    table: &'static str,
    indexed: bool,
    store: Arc<dyn RowStore>,
    state: Lifecycle,
}

impl ExactStrategy {
    pub fn unindexed(store: Arc<dyn RowStore>) -> Self {
        Self {
            kind: StrategyKind::ExactUnindexed,
            table: "words_unindexed",
            indexed: false,
            store,
            state: Lifecycle::Uninitialized,
        }
    }

    pub fn indexed(store: Arc<dyn RowStore>) -> Self {
        Self {
            kind: StrategyKind::ExactIndexed,
            table: "words_indexed",
            indexed: true,
            store,
            state: Lifecycle::Uninitialized,
        }
    }
}

#[async_trait]
impl Strategy for ExactStrategy {
    fn name(&self) -> &str {
        self.kind.display_name()
    }

    async fn initialize(&mut self, corpus: &Corpus) -> Result<()> {
        self.state.check_uninitialized(self.name())?;

        self.store.create_token_table(self.table, self.indexed).await?;
        let rows = self.store.bulk_load(self.table, corpus).await?;
        tracing::debug!(
            strategy = self.name(),
            table = self.table,
            indexed = self.indexed,
            rows,
            "token table loaded"
        );

        self.state = Lifecycle::Initialized;
        Ok(())
    }

    async fn presence_check(&self, token: &str) -> Result<bool> {
        self.state.check_initialized(self.name())?;
        Ok(self.store.count_occurrences(self.table, token).await? > 0)
    }

    async fn item_count(&self, token: &str) -> Result<u64> {
        self.state.check_initialized(self.name())?;
        self.store.count_occurrences(self.table, token).await
    }

    async fn cardinality_check(&self) -> Result<u64> {
        self.state.check_initialized(self.name())?;
        self.store.count_distinct(self.table).await
    }

    async fn top_k(&self, k: usize) -> Result<Vec<String>> {
        self.state.check_initialized(self.name())?;
        if k == 0 {
            return Ok(Vec::new());
        }
        self.store.most_frequent(self.table, k).await
    }

    async fn report_size(&self, sizes: &mut SizeReport) -> Result<()> {
        self.state.check_initialized(self.name())?;
        let bytes = self.store.relation_size(self.table).await?;
        sizes.record(format!("{}.table", self.kind.key()), bytes);
        Ok(())
    }

    async fn abandon(&self) -> Result<()> {
        self.store.cancel_running().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRowStore;
    use crate::BenchError;

    fn corpus() -> Corpus {
        Corpus::from_tokens(["the", "whale", "the", "sea", "the"])
    }

    #[tokio::test]
    async fn test_queries_before_initialize_fail() {
        let strategy = ExactStrategy::unindexed(Arc::new(MemoryRowStore::new()));
        assert!(matches!(
            strategy.item_count("the").await,
            Err(BenchError::InvalidState(_))
        ));
        let mut sizes = SizeReport::new();
        assert!(strategy.report_size(&mut sizes).await.is_err());
        assert!(sizes.is_empty());
    }

    #[tokio::test]
    async fn test_exact_answers() {
        for mut strategy in [
            ExactStrategy::unindexed(Arc::new(MemoryRowStore::new())),
            ExactStrategy::indexed(Arc::new(MemoryRowStore::new())),
        ] {
            strategy.initialize(&corpus()).await.unwrap();

            assert!(strategy.presence_check("the").await.unwrap());
            assert!(!strategy.presence_check("ahab").await.unwrap());
            assert_eq!(strategy.item_count("the").await.unwrap(), 3);
            assert_eq!(strategy.item_count("ahab").await.unwrap(), 0);
            assert_eq!(strategy.cardinality_check().await.unwrap(), 3);
            assert_eq!(strategy.top_k(1).await.unwrap(), vec!["the"]);
            assert_eq!(strategy.top_k(3).await.unwrap(), vec!["the", "sea", "whale"]);
            assert!(strategy.top_k(0).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_second_initialize_is_rejected() {
        let mut strategy = ExactStrategy::indexed(Arc::new(MemoryRowStore::new()));
        strategy.initialize(&corpus()).await.unwrap();
        assert!(matches!(
            strategy.initialize(&corpus()).await,
            Err(BenchError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_both_variants_share_a_store() {
        let store: Arc<dyn RowStore> = Arc::new(MemoryRowStore::new());
        let mut unindexed = ExactStrategy::unindexed(store.clone());
        let mut indexed = ExactStrategy::indexed(store);
        unindexed.initialize(&corpus()).await.unwrap();
        indexed.initialize(&corpus()).await.unwrap();

        let mut sizes = SizeReport::new();
        unindexed.report_size(&mut sizes).await.unwrap();
        indexed.report_size(&mut sizes).await.unwrap();

        let plain = sizes.get("exact_unindexed.table").unwrap();
        let with_index = sizes.get("exact_indexed.table").unwrap();
        assert!(with_index > plain);
    }
}
