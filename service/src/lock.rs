// Copyright 2023-, GraphOps and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! The single process-wide mutual-exclusion primitive (`SCRIPT_LOCK`).
//! Mutual exclusion across allocation and the mutating paths of the
//! ingestor and watchdog; fairness is not required, a 30s bounded wait is.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::instrument;

use crate::metrics;

/// Default bound on how long a caller waits to acquire the lock.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    #[error("lock acquisition timed out")]
    Timeout,
}

/// A held lock. Releasing is idempotent by construction: there is exactly
/// one `OwnedMutexGuard` inside, and dropping it (explicitly via
/// `release()`, or implicitly when the token falls out of scope on any
/// exit path including a panic unwind) is the only way to let it go.
pub struct LockToken {
    _guard: OwnedMutexGuard<()>,
}

impl LockToken {
    /// Explicit release for readability at call sites; equivalent to `drop(token)`.
    pub fn release(self) {
        drop(self);
    }
}

/// Wraps the named lock. Cloning shares the same underlying mutex.
#[derive(Clone)]
pub struct ScriptLock {
    inner: Arc<Mutex<()>>,
}

impl Default for ScriptLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptLock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
        }
    }

    #[instrument(skip(self))]
    pub async fn try_acquire(&self, timeout: Duration) -> Result<LockToken, LockError> {
        let started = Instant::now();
        match tokio::time::timeout(timeout, self.inner.clone().lock_owned()).await {
            Ok(guard) => {
                metrics::record_lock_wait(started.elapsed().as_millis() as u64);
                Ok(LockToken { _guard: guard })
            }
            Err(_) => {
                metrics::record_lock_timeout();
                Err(LockError::Timeout)
            }
        }
    }

    /// Convenience over the default 30s bound.
    pub async fn acquire_default(&self) -> Result<LockToken, LockError> {
        self.try_acquire(DEFAULT_TIMEOUT).await
    }
}
