// src/telemetry/task_queue.rs
//! Buffer side effects until two preconditions are known
//!
//! Actions pushed before both gates resolve wait; actions pushed afterwards
//! run immediately. Every action runs at most once and its error is
//! swallowed here. `flush_and_close` waits for the tracked actions but never
//! longer than [`FLUSH_TIMEOUT`].

use crate::observability::TELEMETRY_DROPPED;
use crate::runtime::deferred::Deferred;
use crate::runtime::timeout::race_timeout;
use crate::utils::errors::Result;
use futures::future::{join_all, try_join};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on how long shutdown waits for queued actions
pub const FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Waiting,
    Running,
    Finished,
}

struct TrackedTask {
    status: Arc<Mutex<TaskStatus>>,
    done: Deferred<()>,
}

/// Queue gated on an identity value `I` and a session value `S`
pub struct AuthenticatedTaskQueue<I, S> {
    name: String,
    identity: Deferred<I>,
    session: Deferred<S>,
    tasks: Mutex<Vec<TrackedTask>>,
    closed: AtomicBool,
}

impl<I, S> AuthenticatedTaskQueue<I, S>
where
    I: Clone + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
{
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            identity: Deferred::new(),
            session: Deferred::new(),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Open (or permanently fail) the identity gate
    pub fn settle_identity(&self, identity: Result<I>) {
        if self.identity.settle(identity).is_err() {
            debug!("Identity gate of '{}' already settled", self.name);
        }
    }

    /// Open (or permanently fail) the session gate
    pub fn settle_session(&self, session: Result<S>) {
        if self.session.settle(session).is_err() {
            debug!("Session gate of '{}' already settled", self.name);
        }
    }

    /// Both gates resolved successfully
    pub fn is_ready(&self) -> bool {
        matches!(self.identity.peek(), Some(Ok(_))) && matches!(self.session.peek(), Some(Ok(_)))
    }

    /// Queue `action`; returns false if the queue is already closed
    pub fn push<F, Fut>(&self, action: F) -> bool
    where
        F: FnOnce(I, S) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            warn!("Task pushed to closed queue '{}' was dropped", self.name);
            metrics::counter!(TELEMETRY_DROPPED).increment(1);
            return false;
        }

        let status = Arc::new(Mutex::new(TaskStatus::Waiting));
        let done = Deferred::new();
        let identity = self.identity.clone();
        let session = self.session.clone();
        let name = self.name.clone();

        {
            let mut tasks = self.tasks.lock();
            tasks.retain(|t| !t.done.is_settled());
            tasks.push(TrackedTask {
                status: Arc::clone(&status),
                done: done.clone(),
            });
        }

        tokio::spawn(async move {
            match try_join(identity.wait(), session.wait()).await {
                Ok((identity, session)) => {
                    *status.lock() = TaskStatus::Running;
                    if let Err(e) = action(identity, session).await {
                        debug!("Task on queue '{}' failed: {}", name, e);
                    }
                }
                Err(e) => debug!("Task on queue '{}' skipped: {}", name, e),
            }
            *status.lock() = TaskStatus::Finished;
            let _ = done.resolve(());
        });

        true
    }

    /// Tracked actions that have not finished
    pub fn pending_count(&self) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|t| *t.status.lock() != TaskStatus::Finished)
            .count()
    }

    /// Stop accepting work and wait for tracked actions, bounded by
    /// [`FLUSH_TIMEOUT`]. Returns true if everything finished in time.
    pub async fn flush_and_close(&self) -> bool {
        self.closed.store(true, Ordering::SeqCst);

        let waits: Vec<Deferred<()>> = self.tasks.lock().iter().map(|t| t.done.clone()).collect();
        let all = join_all(waits.iter().map(|d| d.wait()));

        if race_timeout(all, FLUSH_TIMEOUT).await.is_some() {
            return true;
        }

        let dropped = waits.iter().filter(|d| !d.is_settled()).count();
        warn!(
            "Queue '{}' closed with {} unfinished tasks after {:?}",
            self.name, dropped, FLUSH_TIMEOUT
        );
        metrics::counter!(TELEMETRY_DROPPED).increment(dropped as u64);
        false
    }
}
