// src/runtime/work_queue.rs
//! Bounded-concurrency work queue with forkable groups
//!
//! A `WorkQueue` owns a semaphore sized to the concurrency limit. Each caller
//! forks its own `WorkGroup`: groups share the queue's permits, but each
//! group only waits for its own tasks, so one recording's slow or failing
//! work never blocks another recording's `wait_idle`.
//!
//! ```text
//! WorkQueue (permits: 10)
//! ├─ WorkGroup (recording A): [part 0, part 1, part 2]
//! └─ WorkGroup (recording B): [part 0, part 1]
//! ```

use crate::utils::errors::{Result, UplinkError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, trace};

/// Shared bounded pool
#[derive(Clone)]
pub struct WorkQueue {
    name: Arc<str>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
}

impl WorkQueue {
    /// Create a queue running at most `concurrency` tasks at once
    pub fn new(name: &str, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        debug!("Work queue '{}' created with concurrency {}", name, concurrency);

        Self {
            name: Arc::from(name),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    /// Start a new group of tasks sharing this queue's permits
    pub fn fork<T: Send + 'static>(&self) -> WorkGroup<T> {
        WorkGroup {
            name: Arc::clone(&self.name),
            semaphore: Arc::clone(&self.semaphore),
            tasks: JoinSet::new(),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Tasks currently holding a permit across all groups
    pub fn running(&self) -> usize {
        self.concurrency - self.semaphore.available_permits()
    }
}

/// A caller-owned set of tasks executed through a [`WorkQueue`]
pub struct WorkGroup<T> {
    name: Arc<str>,
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<T>,
}

impl<T: Send + 'static> WorkGroup<T> {
    /// Enqueue a task; it starts once a permit is free
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let name = Arc::clone(&self.name);

        self.tasks.spawn(async move {
            // The semaphore is never closed, so acquisition only waits.
            let _permit = semaphore.acquire_owned().await;
            trace!("Task started on work queue '{}'", name);
            task.await
        });
    }

    /// Tasks in this group that have not been collected yet
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every task in the group, returning outputs in completion order
    pub async fn wait_idle(&mut self) -> Result<Vec<T>> {
        let mut outputs = Vec::with_capacity(self.tasks.len());

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    return Err(UplinkError::InvariantViolation(format!(
                        "Task on work queue '{}' did not complete: {}",
                        self.name, e
                    )));
                }
            }
        }

        Ok(outputs)
    }

    /// Abort every task still queued or running in this group
    pub fn abort_all(&mut self) {
        self.tasks.abort_all();
    }
}
