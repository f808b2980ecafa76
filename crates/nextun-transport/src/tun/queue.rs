// ============================================
// File: crates/nextun-transport/src/tun/queue.rs
// ============================================
//! # In-Memory Virtual Interface
//!
//! ## Creation Reason
//! The kernel device driver lives outside this workspace. `QueueTun`
//! stands in for it: packets "from the network" are injected, packets
//! the server writes are captured.
//!
//! ## Main Functionality
//! - Bounded inbound and outbound packet queues
//! - `read()` waits for an injected packet or error
//! - `next_written()` waits for a packet the server wrote
//!
//! ## Usage
//! ```
//! use bytes::Bytes;
//! use nextun_transport::traits::{TunConfig, TunDevice};
//! use nextun_transport::tun::QueueTun;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tun = QueueTun::new(TunConfig::new("queue0"));
//!
//! tun.inject(Bytes::from_static(b"from network"))?;
//! assert_eq!(tun.read().await?, Bytes::from_static(b"from network"));
//!
//! tun.write(Bytes::from_static(b"to network")).await?;
//! assert_eq!(tun.take_written(), vec![Bytes::from_static(b"to network")]);
//! # Ok(())
//! # }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Wakeups use `notify_one`, which stores a permit when nobody is
//!   waiting yet; never switch to `notify_waiters` here
//! - Full queues are reported as errors, not by blocking
//!
//! ## Last Modified
//! v0.1.0 - Initial in-memory device

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use nextun_common::ip::Ip;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Result, TransportError};
use crate::traits::{TunConfig, TunDevice};

// ============================================
// Constants
// ============================================

/// Default number of packets each queue holds.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

// ============================================
// PacketQueue
// ============================================

struct PacketQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> PacketQueue<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    fn push(&self, item: T) -> bool {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return false;
        }
        items.push_back(item);
        drop(items);
        self.notify.notify_one();
        true
    }

    async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.items.lock().pop_front() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

// ============================================
// QueueTun
// ============================================

/// Virtual interface backed by in-memory queues.
pub struct QueueTun {
    config: TunConfig,
    inbound: PacketQueue<Result<Bytes>>,
    outbound: PacketQueue<Bytes>,
    is_up: AtomicBool,
}

impl QueueTun {
    /// Creates a device with the default queue capacity.
    #[must_use]
    pub fn new(config: TunConfig) -> Self {
        Self::with_capacity(config, DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates a device whose queues hold at most `capacity` packets.
    #[must_use]
    pub fn with_capacity(config: TunConfig, capacity: usize) -> Self {
        Self {
            config,
            inbound: PacketQueue::new(capacity),
            outbound: PacketQueue::new(capacity),
            is_up: AtomicBool::new(false),
        }
    }

    /// Queues a packet to be returned by `read()`.
    ///
    /// # Errors
    /// Returns `TunReadFailed` if the inbound queue is full.
    pub fn inject(&self, packet: Bytes) -> Result<()> {
        self.push_inbound(Ok(packet))
    }

    /// Queues an error to be returned by `read()`, in order with the
    /// injected packets.
    ///
    /// # Errors
    /// Returns `TunReadFailed` if the inbound queue is full.
    pub fn inject_error(&self, error: TransportError) -> Result<()> {
        self.push_inbound(Err(error))
    }

    fn push_inbound(&self, item: Result<Bytes>) -> Result<()> {
        if self.inbound.push(item) {
            Ok(())
        } else {
            Err(TransportError::TunReadFailed {
                reason: "inbound queue full".into(),
            })
        }
    }

    /// Waits for the next packet written by the server.
    pub async fn next_written(&self) -> Bytes {
        self.outbound.pop().await
    }

    /// Takes every packet written so far.
    #[must_use]
    pub fn take_written(&self) -> Vec<Bytes> {
        self.outbound.drain()
    }

    /// Number of injected packets and errors not read yet.
    #[must_use]
    pub fn pending_read_count(&self) -> usize {
        self.inbound.len()
    }

    /// Number of written packets not taken yet.
    #[must_use]
    pub fn written_count(&self) -> usize {
        self.outbound.len()
    }
}

#[async_trait]
impl TunDevice for QueueTun {
    async fn read(&self) -> Result<Bytes> {
        self.inbound.pop().await
    }

    async fn write(&self, packet: Bytes) -> Result<()> {
        if self.outbound.push(packet) {
            Ok(())
        } else {
            Err(TransportError::TunWriteFailed {
                reason: "outbound queue full".into(),
            })
        }
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn mtu(&self) -> u16 {
        self.config.mtu
    }

    fn ip_addr(&self) -> Ip {
        self.config.address
    }

    fn netmask(&self) -> Ip {
        self.config.netmask
    }

    async fn up(&self) -> Result<()> {
        self.is_up.store(true, Ordering::Release);
        Ok(())
    }

    async fn down(&self) -> Result<()> {
        self.is_up.store(false, Ordering::Release);
        Ok(())
    }

    fn is_up(&self) -> bool {
        self.is_up.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for QueueTun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueTun")
            .field("name", &self.config.name)
            .field("address", &self.config.address)
            .field("mtu", &self.config.mtu)
            .field("is_up", &self.is_up())
            .field("pending_reads", &self.pending_read_count())
            .field("written_packets", &self.written_count())
            .finish()
    }
}

impl Default for QueueTun {
    fn default() -> Self {
        Self::new(TunConfig::default())
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_up_down() {
        let tun = QueueTun::new(TunConfig::new("queue0"));
        assert_eq!(tun.name(), "queue0");
        assert!(!tun.is_up());

        tun.up().await.unwrap();
        assert!(tun.is_up());

        tun.down().await.unwrap();
        assert!(!tun.is_up());
    }

    #[tokio::test]
    async fn test_read_preserves_order() {
        let tun = QueueTun::default();
        for packet in [&b"one"[..], b"two", b"three"] {
            tun.inject(Bytes::copy_from_slice(packet)).unwrap();
        }
        assert_eq!(tun.pending_read_count(), 3);

        assert_eq!(tun.read().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(tun.read().await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(tun.read().await.unwrap(), Bytes::from_static(b"three"));
        assert_eq!(tun.pending_read_count(), 0);
    }

    #[tokio::test]
    async fn test_blocked_read_is_woken() {
        let tun = Arc::new(QueueTun::default());
        let reader = {
            let tun = Arc::clone(&tun);
            tokio::spawn(async move { tun.read().await })
        };

        tokio::task::yield_now().await;
        tun.inject(Bytes::from_static(b"late")).unwrap();

        let packet = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(packet, Bytes::from_static(b"late"));
    }

    #[tokio::test]
    async fn test_queues_are_bounded() {
        let tun = QueueTun::with_capacity(TunConfig::default(), 1);

        tun.inject(Bytes::from_static(b"a")).unwrap();
        assert!(tun.inject(Bytes::from_static(b"b")).is_err());

        tun.write(Bytes::from_static(b"a")).await.unwrap();
        let err = tun.write(Bytes::from_static(b"b")).await.unwrap_err();
        assert!(err.is_tun_error());

        assert_eq!(tun.next_written().await, Bytes::from_static(b"a"));
        assert_eq!(tun.written_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_error_read_in_order() {
        let tun = QueueTun::default();
        tun.inject(Bytes::from_static(b"before")).unwrap();
        tun.inject_error(TransportError::TunReadFailed {
            reason: "device gone".into(),
        })
        .unwrap();
        tun.inject(Bytes::from_static(b"after")).unwrap();
        assert_eq!(tun.pending_read_count(), 3);

        assert_eq!(tun.read().await.unwrap(), Bytes::from_static(b"before"));
        assert!(tun.read().await.unwrap_err().is_tun_error());
        assert_eq!(tun.read().await.unwrap(), Bytes::from_static(b"after"));
    }
}
