// src/runtime/deferred.rs
//! Resolvable/rejectable completion handle
//!
//! A `Deferred` is settled exactly once, can be awaited by any number of
//! clones, and carries an immutable context payload set at creation (for
//! example the session a pending RPC command belongs to).

use crate::utils::errors::{Result, UplinkError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

/// Settlement state of a [`Deferred`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredStatus {
    Pending,
    Resolved,
    Rejected,
}

struct Inner<T, C> {
    outcome: Mutex<Option<Result<T>>>,
    notify: Notify,
    data: C,
}

/// Completion handle with typed context data
pub struct Deferred<T, C = ()> {
    inner: Arc<Inner<T, C>>,
}

impl<T, C> Clone for Deferred<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Deferred<T, ()> {
    pub fn new() -> Self {
        Self::with_data(())
    }
}

impl<T> Default for Deferred<T, ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C> Deferred<T, C> {
    /// Create a pending handle carrying `data`
    pub fn with_data(data: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                outcome: Mutex::new(None),
                notify: Notify::new(),
                data,
            }),
        }
    }

    /// Context attached at creation
    pub fn data(&self) -> &C {
        &self.inner.data
    }

    pub fn status(&self) -> DeferredStatus {
        match &*self.inner.outcome.lock() {
            None => DeferredStatus::Pending,
            Some(Ok(_)) => DeferredStatus::Resolved,
            Some(Err(_)) => DeferredStatus::Rejected,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status() != DeferredStatus::Pending
    }

    /// Settle with a value; fails with `AlreadySettled` on a second call
    pub fn resolve(&self, value: T) -> Result<()> {
        self.settle(Ok(value))
    }

    /// Settle with an error; fails with `AlreadySettled` on a second call
    pub fn reject(&self, error: UplinkError) -> Result<()> {
        self.settle(Err(error))
    }

    /// Settle from a result, whichever way it went
    pub fn settle(&self, outcome: Result<T>) -> Result<()> {
        {
            let mut slot = self.inner.outcome.lock();
            if slot.is_some() {
                return Err(UplinkError::AlreadySettled);
            }
            *slot = Some(outcome);
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

impl<T: Clone, C> Deferred<T, C> {
    /// Current outcome without waiting
    pub fn peek(&self) -> Option<Result<T>> {
        self.inner.outcome.lock().clone()
    }

    /// Wait until the handle is settled
    pub async fn wait(&self) -> Result<T> {
        loop {
            // Register before checking so a concurrent settle cannot be missed.
            let notified = self.inner.notify.notified();
            if let Some(outcome) = self.peek() {
                return outcome;
            }
            notified.await;
        }
    }
}

impl<T, C: std::fmt::Debug> std::fmt::Debug for Deferred<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("status", &self.status())
            .field("data", &self.inner.data)
            .finish()
    }
}
