//! Redis key/value store (via redis-rs)
//!
//! Ordered sets are core Redis; the bloom filter, count-min sketch and top-K
//! tracker commands need the RedisBloom module loaded on the server.

use crate::config::RedisConfig;
use crate::store::KeyValueStore;
use crate::{BenchError, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Value;
use std::sync::Mutex;

pub struct RedisStore {
    url: String,
    /// `None` once the session is closed
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisStore {
    /// Open a multiplexed connection; clones of it share one socket
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| BenchError::Config(format!("invalid redis url {}: {}", config.url, e)))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BenchError::BackendUnavailable(format!("redis at {}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "connected to redis");

        Ok(Self {
            url: config.url.clone(),
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Release the session's handle
    ///
    /// The multiplexed driver task shuts the socket down once its last
    /// handle is gone, so in-flight clones finish before the socket closes.
    pub fn close(&self) {
        let conn = match self.conn.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if conn.is_some() {
            tracing::debug!(url = %self.url, "redis session closed");
        }
    }

    fn conn(&self) -> Result<MultiplexedConnection> {
        let guard = match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_ref().cloned().ok_or_else(|| {
            BenchError::BackendUnavailable(format!("redis session to {} is closed", self.url))
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn flush(&self) -> Result<()> {
        let () = redis::cmd("FLUSHDB").query_async(&mut self.conn()?).await?;
        Ok(())
    }

    async fn memory_usage(&self, key: &str) -> Result<u64> {
        let usage: Option<i64> = redis::cmd("MEMORY")
            .arg("USAGE")
            .arg(key)
            .query_async(&mut self.conn()?)
            .await?;
        Ok(usage.unwrap_or(0).max(0) as u64)
    }

    async fn zincrby(&self, key: &str, member: &str, by: f64) -> Result<f64> {
        let score: f64 = redis::cmd("ZINCRBY")
            .arg(key)
            .arg(by)
            .arg(member)
            .query_async(&mut self.conn()?)
            .await?;
        Ok(score)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn()?)
            .await?;
        Ok(score)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let card: u64 = redis::cmd("ZCARD")
            .arg(key)
            .query_async(&mut self.conn()?)
            .await?;
        Ok(card)
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let members: Vec<String> = redis::cmd("ZREVRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut self.conn()?)
            .await?;
        Ok(members)
    }

    async fn bf_reserve(&self, key: &str, error_rate: f64, capacity: u64) -> Result<()> {
        let () = redis::cmd("BF.RESERVE")
            .arg(key)
            .arg(error_rate)
            .arg(capacity)
            .query_async(&mut self.conn()?)
            .await?;
        Ok(())
    }

    async fn bf_madd(&self, key: &str, items: &[String]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let _: Value = redis::cmd("BF.MADD")
            .arg(key)
            .arg(items)
            .query_async(&mut self.conn()?)
            .await?;
        Ok(())
    }

    async fn bf_exists(&self, key: &str, item: &str) -> Result<bool> {
        let exists: i64 = redis::cmd("BF.EXISTS")
            .arg(key)
            .arg(item)
            .query_async(&mut self.conn()?)
            .await?;
        Ok(exists == 1)
    }

    async fn cms_init_by_prob(&self, key: &str, error: f64, probability: f64) -> Result<()> {
        let () = redis::cmd("CMS.INITBYPROB")
            .arg(key)
            .arg(error)
            .arg(probability)
            .query_async(&mut self.conn()?)
            .await?;
        Ok(())
    }

    async fn cms_incrby(&self, key: &str, items: &[String]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("CMS.INCRBY");
        cmd.arg(key);
        for item in items {
            cmd.arg(item).arg(1);
        }
        let _: Value = cmd.query_async(&mut self.conn()?).await?;
        Ok(())
    }

    async fn cms_query(&self, key: &str, item: &str) -> Result<u64> {
        let counts: Vec<i64> = redis::cmd("CMS.QUERY")
            .arg(key)
            .arg(item)
            .query_async(&mut self.conn()?)
            .await?;
        Ok(counts.first().copied().unwrap_or(0).max(0) as u64)
    }

    async fn pfadd(&self, key: &str, items: &[String]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let _: Value = redis::cmd("PFADD")
            .arg(key)
            .arg(items)
            .query_async(&mut self.conn()?)
            .await?;
        Ok(())
    }

    async fn pfcount(&self, key: &str) -> Result<u64> {
        let count: u64 = redis::cmd("PFCOUNT")
            .arg(key)
            .query_async(&mut self.conn()?)
            .await?;
        Ok(count)
    }

    async fn topk_reserve(&self, key: &str, capacity: usize) -> Result<()> {
        let () = redis::cmd("TOPK.RESERVE")
            .arg(key)
            .arg(capacity)
            .query_async(&mut self.conn()?)
            .await?;
        Ok(())
    }

    async fn topk_add(&self, key: &str, items: &[String]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let _: Value = redis::cmd("TOPK.ADD")
            .arg(key)
            .arg(items)
            .query_async(&mut self.conn()?)
            .await?;
        Ok(())
    }

    async fn topk_list(&self, key: &str) -> Result<Vec<(String, u64)>> {
        let flat: Vec<Value> = redis::cmd("TOPK.LIST")
            .arg(key)
            .arg("WITHCOUNT")
            .query_async(&mut self.conn()?)
            .await?;
        parse_counted_list(&flat)
    }
}

/// Decode the flat `item, count, item, count, ...` reply of `TOPK.LIST WITHCOUNT`
fn parse_counted_list(flat: &[Value]) -> Result<Vec<(String, u64)>> {
    if flat.len() % 2 != 0 {
        return Err(BenchError::BackendRejected(format!(
            "TOPK.LIST returned an odd number of elements: {}",
            flat.len()
        )));
    }

    let mut entries = Vec::with_capacity(flat.len() / 2);
    for pair in flat.chunks(2) {
        // Unused slots come back as nil.
        if matches!(pair[0], Value::Nil) {
            continue;
        }
        let item: String = redis::from_redis_value(&pair[0])?;
        let count: i64 = redis::from_redis_value(&pair[1])?;
        entries.push((item, count.max(0) as u64));
    }
    Ok(entries)
}
