// ============================================
// File: crates/nextun-server/src/services/users.rs
// ============================================
//! # User Store
//!
//! ## Creation Reason
//! Tracks logged-in users and owns the two packet queues that connect
//! each user's data channel connections to the controller.
//!
//! ## Main Functionality
//! - `User`: identity, virtual address, queues and counters
//! - `UserStore`: register, look up and remove users
//!
//! ## Queue Layout
//! ```text
//!                 from_client (bounded)
//!  connection ─┐ ─────────────────────────► controller pump ──► TUN
//!  connection ─┤
//!  connection ─┘ ◄───────────────────────── delivery loop  ◄── TUN
//!                 to_client (bounded, shared receiver)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Users live in memory only; a restart logs everybody out
//! - The to-client sender lives in `User`: once the last `Arc<User>` is
//!   gone, every connection of that user sees its queue close
//!
//! ## Last Modified
//! v0.1.0 - Initial user store

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

use nextun_common::ip::Ip;
use nextun_common::types::UserId;
use nextun_transport::traits::{SharedReceiver, UserChannel};

use crate::error::{Result, ServerError};

// ============================================
// User Statistics
// ============================================

/// Per-user packet counters.
#[allow(missing_docs)]
#[derive(Debug, Default)]
pub struct UserStats {
    pub bytes_rx: AtomicU64,
    pub bytes_tx: AtomicU64,
    pub packets_rx: AtomicU64,
    pub packets_tx: AtomicU64,
    pub packets_dropped: AtomicU64,
    pub spoofed_rejected: AtomicU64,
}

#[allow(missing_docs)]
impl UserStats {
    pub fn record_rx(&self, bytes: u64) {
        self.bytes_rx.fetch_add(bytes, Ordering::Relaxed);
        self.packets_rx.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx(&self, bytes: u64) {
        self.bytes_tx.fetch_add(bytes, Ordering::Relaxed);
        self.packets_tx.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spoofed(&self) {
        self.spoofed_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_rx: self.bytes_rx.load(Ordering::Relaxed),
            bytes_tx: self.bytes_tx.load(Ordering::Relaxed),
            packets_rx: self.packets_rx.load(Ordering::Relaxed),
            packets_tx: self.packets_tx.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            spoofed_rejected: self.spoofed_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`UserStats`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub bytes_rx: u64,
    pub bytes_tx: u64,
    pub packets_rx: u64,
    pub packets_tx: u64,
    pub packets_dropped: u64,
    pub spoofed_rejected: u64,
}

// ============================================
// User
// ============================================

/// A logged-in user.
pub struct User {
    /// Id carried in the data channel `Hello` frame.
    pub id: UserId,
    /// Display name given at login.
    pub name: String,
    /// Virtual address assigned at login.
    pub address: Ip,
    /// Packet counters.
    pub stats: UserStats,
    from_client_tx: mpsc::Sender<Bytes>,
    from_client_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    to_client_tx: mpsc::Sender<Bytes>,
    to_client_rx: SharedReceiver,
    logged_in_at: Instant,
}

impl User {
    fn new(id: UserId, name: String, address: Ip, queue_depth: usize) -> Self {
        let (from_client_tx, from_client_rx) = mpsc::channel(queue_depth);
        let (to_client_tx, to_client_rx) = mpsc::channel(queue_depth);
        Self {
            id,
            name,
            address,
            stats: UserStats::default(),
            from_client_tx,
            from_client_rx: Mutex::new(Some(from_client_rx)),
            to_client_tx,
            to_client_rx: Arc::new(tokio::sync::Mutex::new(to_client_rx)),
            logged_in_at: Instant::now(),
        }
    }

    /// Queues a data channel connection attaches to.
    #[must_use]
    pub fn channel(&self) -> UserChannel {
        UserChannel {
            from_client: self.from_client_tx.clone(),
            to_client: Arc::clone(&self.to_client_rx),
        }
    }

    /// Takes the receiving end of the from-client queue. Only the first
    /// call returns it.
    pub fn take_from_client(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.from_client_rx.lock().take()
    }

    /// Queues a packet for the client without waiting.
    ///
    /// Returns `false` and counts a drop if the queue is full.
    pub fn try_deliver(&self, packet: Bytes) -> bool {
        let len = packet.len() as u64;
        match self.to_client_tx.try_send(packet) {
            Ok(()) => {
                self.stats.record_tx(len);
                true
            }
            Err(TrySendError::Full(_) | TrySendError::Closed(_)) => {
                self.stats.record_dropped();
                false
            }
        }
    }

    /// Time since login.
    #[must_use]
    pub fn session_age(&self) -> Duration {
        self.logged_in_at.elapsed()
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("address", &self.address)
            .field("session_age", &self.session_age())
            .finish_non_exhaustive()
    }
}

// ============================================
// UserStore
// ============================================

/// All logged-in users.
pub struct UserStore {
    users: DashMap<UserId, Arc<User>>,
    next_id: AtomicU32,
    max_users: usize,
    queue_depth: usize,
}

impl UserStore {
    /// Creates a store holding at most `max_users` users, each with
    /// queues of `queue_depth` packets.
    #[must_use]
    pub fn new(max_users: usize, queue_depth: usize) -> Self {
        Self {
            users: DashMap::new(),
            next_id: AtomicU32::new(1),
            max_users,
            queue_depth,
        }
    }

    /// Registers a user at `address` under a fresh id.
    ///
    /// # Errors
    /// Returns `UserLimitReached` if the store is full.
    pub fn register(&self, name: impl Into<String>, address: Ip) -> Result<Arc<User>> {
        if self.users.len() >= self.max_users {
            return Err(ServerError::UserLimitReached {
                limit: self.max_users,
            });
        }

        let id = UserId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let user = Arc::new(User::new(id, name.into(), address, self.queue_depth));
        self.users.insert(id, Arc::clone(&user));

        info!(user = %id, name = %user.name, address = %address, "User registered");
        Ok(user)
    }

    /// Looks up a logged-in user.
    #[must_use]
    pub fn find(&self, id: UserId) -> Option<Arc<User>> {
        self.users.get(&id).map(|r| Arc::clone(r.value()))
    }

    /// Looks up a logged-in user.
    ///
    /// # Errors
    /// Returns `UserNotFound` if `id` is not logged in.
    pub fn find_or_error(&self, id: UserId) -> Result<Arc<User>> {
        self.find(id).ok_or(ServerError::UserNotFound(id))
    }

    /// Removes a user, returning them if they were logged in.
    pub fn remove(&self, id: UserId) -> Option<Arc<User>> {
        let removed = self.users.remove(&id).map(|(_, user)| user);

        if let Some(ref user) = removed {
            let stats = user.stats.snapshot();
            info!(
                user = %id,
                address = %user.address,
                packets_rx = stats.packets_rx,
                packets_tx = stats.packets_tx,
                packets_dropped = stats.packets_dropped,
                "User removed"
            );
        } else {
            debug!(user = %id, "Remove of unknown user ignored");
        }

        removed
    }

    /// Number of logged-in users.
    #[must_use]
    pub fn count(&self) -> usize {
        self.users.len()
    }

    /// Returns `true` if nobody is logged in.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Snapshot of every logged-in user.
    #[must_use]
    pub fn all_users(&self) -> Vec<Arc<User>> {
        self.users.iter().map(|r| Arc::clone(r.value())).collect()
    }
}

impl std::fmt::Debug for UserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserStore")
            .field("users", &self.count())
            .field("max_users", &self.max_users)
            .field("queue_depth", &self.queue_depth)
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_find() {
        let store = UserStore::new(10, 4);
        let alice = store.register("alice", Ip::new(10, 8, 0, 2)).unwrap();
        let bob = store.register("bob", Ip::new(10, 8, 0, 3)).unwrap();

        assert_ne!(alice.id, bob.id);
        assert_eq!(store.count(), 2);
        assert_eq!(store.find(alice.id).unwrap().name, "alice");
        assert!(matches!(
            store.find_or_error(UserId::new(99)),
            Err(ServerError::UserNotFound(_))
        ));
    }

    #[test]
    fn test_user_limit() {
        let store = UserStore::new(1, 4);
        store.register("a", Ip::new(10, 8, 0, 2)).unwrap();

        let err = store.register("b", Ip::new(10, 8, 0, 3)).unwrap_err();
        assert!(matches!(err, ServerError::UserLimitReached { limit: 1 }));
    }

    #[test]
    fn test_remove() {
        let store = UserStore::new(10, 4);
        let user = store.register("a", Ip::new(10, 8, 0, 2)).unwrap();

        assert!(store.remove(user.id).is_some());
        assert!(store.remove(user.id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_from_client_taken_once() {
        let store = UserStore::new(10, 4);
        let user = store.register("a", Ip::new(10, 8, 0, 2)).unwrap();

        assert!(user.take_from_client().is_some());
        assert!(user.take_from_client().is_none());
    }

    #[tokio::test]
    async fn test_deliver_drops_when_full() {
        let store = UserStore::new(10, 2);
        let user = store.register("a", Ip::new(10, 8, 0, 2)).unwrap();

        assert!(user.try_deliver(Bytes::from_static(b"1")));
        assert!(user.try_deliver(Bytes::from_static(b"2")));
        assert!(!user.try_deliver(Bytes::from_static(b"3")));

        let stats = user.stats.snapshot();
        assert_eq!(stats.packets_tx, 2);
        assert_eq!(stats.packets_dropped, 1);

        let channel = user.channel();
        let first = channel.to_client.lock().await.recv().await;
        assert_eq!(first, Some(Bytes::from_static(b"1")));
    }

    #[tokio::test]
    async fn test_channel_feeds_from_client_queue() {
        let store = UserStore::new(10, 4);
        let user = store.register("a", Ip::new(10, 8, 0, 2)).unwrap();
        let mut rx = user.take_from_client().unwrap();

        user.channel()
            .from_client
            .send(Bytes::from_static(b"up"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"up")));
    }
}
