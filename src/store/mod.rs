//! Backend store abstractions
//!
//! Strategies talk to their backends only through these traits, so the same
//! strategy code runs against live servers (Postgres, Redis with RedisBloom)
//! or against the in-memory stores used by tests and dry runs.

use crate::config::{HarnessConfig, PostgresConfig, RedisConfig};
use crate::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

pub mod memory;
pub mod postgres;
pub mod redis;

pub use memory::{MemoryKeyValueStore, MemoryRowStore};
pub use postgres::PostgresStore;
pub use redis::RedisStore;

/// Exact row-oriented store holding one row per token occurrence
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Backend name for logs
    fn backend(&self) -> &'static str;

    /// Drop every table (external reset protocol)
    async fn reset(&self) -> Result<()>;

    /// Create an empty token table, optionally with a secondary index on the token column
    async fn create_token_table(&self, table: &str, indexed: bool) -> Result<()>;

    /// Bulk-load tokens in one pass; returns the number of rows written
    async fn bulk_load(&self, table: &str, tokens: &[String]) -> Result<u64>;

    /// Number of rows holding `token`
    async fn count_occurrences(&self, table: &str, token: &str) -> Result<u64>;

    /// Number of distinct tokens
    async fn count_distinct(&self, table: &str) -> Result<u64>;

    /// Up to `limit` tokens by descending frequency, ties by ascending token
    async fn most_frequent(&self, table: &str, limit: usize) -> Result<Vec<String>>;

    /// On-disk footprint of the table and its indexes
    async fn relation_size(&self, table: &str) -> Result<u64>;

    /// Ask the server to stop whatever this session is still running
    async fn cancel_running(&self) -> Result<()> {
        Ok(())
    }
}

/// Key/value store with ordered sets and probabilistic structures
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Backend name for logs
    fn backend(&self) -> &'static str;

    /// Drop every key (external reset protocol)
    async fn flush(&self) -> Result<()>;

    /// Backend-reported memory footprint of a key; 0 when the key is absent
    async fn memory_usage(&self, key: &str) -> Result<u64>;

    // ordered set
    async fn zincrby(&self, key: &str, member: &str, by: f64) -> Result<f64>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;
    async fn zcard(&self, key: &str) -> Result<u64>;
    /// Members by descending score, ranks `start..=stop`
    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    // membership filter
    async fn bf_reserve(&self, key: &str, error_rate: f64, capacity: u64) -> Result<()>;
    async fn bf_madd(&self, key: &str, items: &[String]) -> Result<()>;
    async fn bf_exists(&self, key: &str, item: &str) -> Result<bool>;

    // frequency sketch
    async fn cms_init_by_prob(&self, key: &str, error: f64, probability: f64) -> Result<()>;
    /// Increment every item by one
    async fn cms_incrby(&self, key: &str, items: &[String]) -> Result<()>;
    async fn cms_query(&self, key: &str, item: &str) -> Result<u64>;

    // cardinality estimator
    async fn pfadd(&self, key: &str, items: &[String]) -> Result<()>;
    async fn pfcount(&self, key: &str) -> Result<u64>;

    // top-K tracker
    async fn topk_reserve(&self, key: &str, capacity: usize) -> Result<()>;
    async fn topk_add(&self, key: &str, items: &[String]) -> Result<()>;
    /// Tracked items with their counts, in no particular order
    async fn topk_list(&self, key: &str) -> Result<Vec<(String, u64)>>;
}

/// Which backends a run talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    /// Postgres and Redis servers from the configuration
    Live,
    /// In-process stores; nothing leaves the process
    Memory,
}

/// A connection handed out by `Backends`, released by `Backends::close`
enum Session {
    Postgres(Arc<PostgresStore>),
    Redis(Arc<RedisStore>),
    Memory,
}

/// Connections for one run
///
/// `rows` and `kv` are the control sessions used for the reset protocol.
/// Every strategy gets its own session through `row_session` / `kv_session`,
/// so work abandoned by one strategy never queues in front of another's.
pub struct Backends {
    pub rows: Arc<dyn RowStore>,
    pub kv: Arc<dyn KeyValueStore>,
    mode: BackendMode,
    postgres: PostgresConfig,
    redis: RedisConfig,
    sessions: Mutex<Vec<Session>>,
}

impl Backends {
    /// Connect the control sessions to both live backends
    pub async fn connect(config: &HarnessConfig) -> Result<Self> {
        let postgres = Arc::new(PostgresStore::connect(&config.postgres).await?);
        let redis = Arc::new(RedisStore::connect(&config.redis).await?);

        Ok(Self {
            rows: postgres.clone(),
            kv: redis.clone(),
            mode: BackendMode::Live,
            postgres: config.postgres.clone(),
            redis: config.redis.clone(),
            sessions: Mutex::new(vec![Session::Postgres(postgres), Session::Redis(redis)]),
        })
    }

    /// Fresh in-memory backends
    pub fn in_memory() -> Self {
        Self {
            rows: Arc::new(MemoryRowStore::new()),
            kv: Arc::new(MemoryKeyValueStore::new()),
            mode: BackendMode::Memory,
            postgres: PostgresConfig::default(),
            redis: RedisConfig::default(),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Open backends for the given mode
    pub async fn open(mode: BackendMode, config: &HarnessConfig) -> Result<Self> {
        match mode {
            BackendMode::Live => Self::connect(config).await,
            BackendMode::Memory => Ok(Self::in_memory()),
        }
    }

    /// Open a row store session owned by a single strategy
    pub async fn row_session(&self) -> Result<Arc<dyn RowStore>> {
        match self.mode {
            BackendMode::Live => {
                let store = Arc::new(PostgresStore::connect(&self.postgres).await?);
                self.track(Session::Postgres(store.clone()));
                Ok(store)
            }
            BackendMode::Memory => {
                self.track(Session::Memory);
                Ok(Arc::new(MemoryRowStore::new()))
            }
        }
    }

    /// Open a key/value session owned by a single strategy
    pub async fn kv_session(&self) -> Result<Arc<dyn KeyValueStore>> {
        match self.mode {
            BackendMode::Live => {
                let store = Arc::new(RedisStore::connect(&self.redis).await?);
                self.track(Session::Redis(store.clone()));
                Ok(store)
            }
            BackendMode::Memory => {
                self.track(Session::Memory);
                Ok(Arc::new(MemoryKeyValueStore::new()))
            }
        }
    }

    /// Number of sessions currently open, control sessions included
    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    fn sessions(&self) -> MutexGuard<'_, Vec<Session>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn track(&self, session: Session) {
        self.sessions().push(session);
    }

    /// Clear both backends so every strategy starts from a pristine store
    pub async fn reset(&self) -> Result<()> {
        self.rows.reset().await?;
        self.kv.flush().await?;
        tracing::info!(
            rows = self.rows.backend(),
            kv = self.kv.backend(),
            "backends reset"
        );
        Ok(())
    }

    /// Release every session
    pub async fn close(self) {
        let sessions = match self.sessions.into_inner() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        };

        let count = sessions.len();
        for session in sessions {
            match session {
                Session::Postgres(store) => store.close().await,
                Session::Redis(store) => store.close(),
                Session::Memory => {}
            }
        }
        tracing::debug!(sessions = count, "backends closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BenchError;

    #[tokio::test]
    async fn test_each_session_is_exclusive() {
        let backends = Backends::in_memory();
        let first = backends.row_session().await.unwrap();
        let second = backends.row_session().await.unwrap();
        assert_eq!(backends.session_count(), 2);

        first.create_token_table("words", false).await.unwrap();
        first.bulk_load("words", &["the".to_string()]).await.unwrap();
        assert_eq!(first.count_occurrences("words", "the").await.unwrap(), 1);
        assert!(matches!(
            second.count_occurrences("words", "the").await,
            Err(BenchError::BackendRejected(_))
        ));

        let kv = backends.kv_session().await.unwrap();
        kv.zincrby("sortedSet", "the", 1.0).await.unwrap();
        assert_eq!(backends.kv.zcard("sortedSet").await.unwrap(), 0);
        assert_eq!(backends.session_count(), 3);

        backends.close().await;
    }
}
