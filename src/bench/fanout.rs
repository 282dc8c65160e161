//! Bounded fan-out of independent backend writes
//!
//! A `TaskGroup` spawns futures onto a `JoinSet`, optionally limiting how many
//! run at once, and joins them all. The first failure aborts whatever is
//! still running and is returned to the caller.

use crate::{BenchError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub struct TaskGroup {
    tasks: JoinSet<Result<()>>,
    limit: Option<Arc<Semaphore>>,
}

impl TaskGroup {
    /// Group with no concurrency bound
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            limit: None,
        }
    }

    /// Group running at most `limit` tasks at once; 0 means unbounded
    pub fn with_limit(limit: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            limit: (limit > 0).then(|| Arc::new(Semaphore::new(limit))),
        }
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let limit = self.limit.clone();
        self.tasks.spawn(async move {
            let _permit = match limit {
                Some(semaphore) => Some(
                    semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| BenchError::TaskFailed(e.to_string()))?,
                ),
                None => None,
            };
            task.await
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task; on the first error abort the rest and return it
    pub async fn join(mut self) -> Result<()> {
        while let Some(joined) = self.tasks.join_next().await {
            let outcome = joined.map_err(BenchError::from).and_then(|result| result);
            if let Err(e) = outcome {
                self.tasks.abort_all();
                while self.tasks.join_next().await.is_some() {}
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}
