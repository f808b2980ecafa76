// ============================================
// File: crates/nextun-common/src/scope.rs
// ============================================
//! # Cancellation Scope
//!
//! ## Creation Reason
//! Every long-lived task of the server (channel pool loop, listeners,
//! connections, packet delivery) shares one shutdown signal and reports
//! its outstanding work so shutdown can wait for it.
//!
//! ## Main Functionality
//! - `Scope`: a cloneable `CancellationToken` + `TaskTracker` pair
//! - `Scope::work()`: registers one outstanding unit, released on drop
//! - `Scope::cancelled()`: awaitable signal for `tokio::select!`
//! - `Scope::child()`: cancellable sub-scope sharing the work count
//!
//! ## Usage
//! ```
//! use nextun_common::scope::Scope;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let scope = Scope::new();
//! let worker = scope.clone();
//! scope.spawn(async move {
//!     worker.cancelled().await;
//! });
//!
//! scope.cancel();
//! scope.wait().await;
//! assert_eq!(scope.outstanding(), 0);
//! # }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Pass the scope explicitly; there is no global instance
//! - Cancellation is cooperative: tasks must poll `cancelled()` themselves
//!
//! ## Last Modified
//! v0.1.0 - Initial scope implementation

use std::future::Future;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Guard for one unit of outstanding work. Dropping it releases the unit.
pub type WorkGuard = TaskTrackerToken;

/// Shared shutdown and work-tracking context.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Scope {
    /// Creates a new, uncancelled scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scope that is cancelled with this one but can also be
    /// cancelled on its own. Work tracking is shared with the parent.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            tracker: self.tracker.clone(),
        }
    }

    /// Registers one unit of outstanding work.
    #[must_use = "the work unit is released as soon as the guard is dropped"]
    pub fn work(&self) -> WorkGuard {
        self.tracker.token()
    }

    /// Spawns a task tracked by this scope.
    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(future)
    }

    /// Returns `true` once the scope has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the scope is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Cancels the scope. Idempotent.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!(outstanding = self.tracker.len(), "Scope cancelled");
        }
        self.token.cancel();
    }

    /// Number of outstanding work units and tracked tasks.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every work unit and tracked task has finished.
    ///
    /// Does not cancel the scope by itself.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_work_guard_counts() {
        let scope = Scope::new();
        assert_eq!(scope.outstanding(), 0);

        let guard = scope.work();
        let other = scope.work();
        assert_eq!(scope.outstanding(), 2);

        drop(guard);
        drop(other);
        assert_eq!(scope.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let scope = Scope::new();
        let child = scope.clone();

        let task = tokio::spawn(async move {
            child.cancelled().await;
            child.is_cancelled()
        });

        assert!(!scope.is_cancelled());
        scope.cancel();
        scope.cancel();

        let observed = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(observed);
    }

    #[tokio::test]
    async fn test_child_scope() {
        let parent = Scope::new();
        let child = parent.child();
        let sibling = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!sibling.is_cancelled());

        let guard = sibling.work();
        assert_eq!(parent.outstanding(), 1);
        drop(guard);

        parent.cancel();
        assert!(sibling.is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_blocks_on_work() {
        let scope = Scope::new();
        let guard = scope.work();

        let waiting = scope.clone();
        let waiter = tokio::spawn(async move { waiting.wait().await });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
