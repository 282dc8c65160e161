//! Postgres row store (via tokio-postgres)
//!
//! Tables hold one row per token occurrence: `id BIGINT PRIMARY KEY, word TEXT`.
//! Loads use a single binary COPY so per-row round trips don't dominate the
//! initialization timing.

use crate::config::PostgresConfig;
use crate::store::RowStore;
use crate::{BenchError, Result};
use async_trait::async_trait;
use futures::pin_mut;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls};

pub struct PostgresStore {
    client: Client,
    connection: Mutex<Option<JoinHandle<()>>>,
}

impl PostgresStore {
    /// Open a connection and spawn its driver task
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .user(&config.user)
            .password(&config.password)
            .dbname(&config.database)
            .connect_timeout(config.connect_timeout);

        let (client, connection) = pg.connect(NoTls).await.map_err(|e| {
            BenchError::BackendUnavailable(format!(
                "postgres at {}:{}: {}",
                config.host, config.port, e
            ))
        })?;

        let handle = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection error");
            }
        });

        tracing::info!(host = %config.host, port = config.port, "connected to postgres");

        Ok(Self {
            client,
            connection: Mutex::new(Some(handle)),
        })
    }

    /// Stop the connection driver
    pub async fn close(&self) {
        let handle = match self.connection.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    async fn scalar_count(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        let row = self.client.query_one(sql, params).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass
fn check_identifier(table: &str) -> Result<&str> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());

    if valid {
        Ok(table)
    } else {
        Err(BenchError::BackendRejected(format!(
            "invalid table name: {:?}",
            table
        )))
    }
}

#[async_trait]
impl RowStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn reset(&self) -> Result<()> {
        self.client
            .batch_execute("DROP SCHEMA public CASCADE; CREATE SCHEMA public;")
            .await?;
        Ok(())
    }

    async fn create_token_table(&self, table: &str, indexed: bool) -> Result<()> {
        let table = check_identifier(table)?;
        self.client
            .batch_execute(&format!(
                "CREATE TABLE {table} (id BIGINT PRIMARY KEY, word TEXT NOT NULL)"
            ))
            .await?;

        if indexed {
            self.client
                .batch_execute(&format!("CREATE INDEX {table}_word_idx ON {table} (word)"))
                .await?;
        }

        Ok(())
    }

    async fn bulk_load(&self, table: &str, tokens: &[String]) -> Result<u64> {
        let table = check_identifier(table)?;
        let sink = self
            .client
            .copy_in(&format!("COPY {table} (id, word) FROM STDIN (FORMAT BINARY)"))
            .await?;

        let writer = BinaryCopyInWriter::new(sink, &[Type::INT8, Type::TEXT]);
        pin_mut!(writer);

        for (i, token) in tokens.iter().enumerate() {
            let id = i as i64;
            writer
                .as_mut()
                .write(&[&id as &(dyn ToSql + Sync), token as &(dyn ToSql + Sync)])
                .await?;
        }

        Ok(writer.finish().await?)
    }

    async fn count_occurrences(&self, table: &str, token: &str) -> Result<u64> {
        let table = check_identifier(table)?;
        self.scalar_count(
            &format!("SELECT count(*) FROM {table} WHERE word = $1"),
            &[&token],
        )
        .await
    }

    async fn count_distinct(&self, table: &str) -> Result<u64> {
        let table = check_identifier(table)?;
        self.scalar_count(&format!("SELECT count(DISTINCT word) FROM {table}"), &[])
            .await
    }

    async fn most_frequent(&self, table: &str, limit: usize) -> Result<Vec<String>> {
        let table = check_identifier(table)?;
        let limit = limit as i64;
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT word FROM {table} GROUP BY word ORDER BY count(*) DESC, word ASC LIMIT $1"
                ),
                &[&limit],
            )
            .await?;

        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(BenchError::from))
            .collect()
    }

    async fn relation_size(&self, table: &str) -> Result<u64> {
        let table = check_identifier(table)?;
        self.scalar_count(
            "SELECT pg_table_size($1::text::regclass) + pg_indexes_size($1::text::regclass)",
            &[&table],
        )
        .await
    }

    async fn cancel_running(&self) -> Result<()> {
        self.client.cancel_token().cancel_query(NoTls).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_identifier() {
        assert!(check_identifier("words_indexed").is_ok());
        assert!(check_identifier("t2").is_ok());

        assert!(check_identifier("").is_err());
        assert!(check_identifier("2t").is_err());
        assert!(check_identifier("words; DROP TABLE x").is_err());
        assert!(check_identifier("Words").is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_is_backend_unavailable() {
        let config = PostgresConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout: std::time::Duration::from_millis(200),
            ..PostgresConfig::default()
        };

        match PostgresStore::connect(&config).await {
            Err(BenchError::BackendUnavailable(msg)) => assert!(msg.contains("127.0.0.1:1")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("nothing should listen on port 1"),
        }
    }
}
