// ============================================
// File: crates/nextun-server/src/services/channel_pool.rs
// ============================================
//! # Data Channel Pool
//!
//! ## Creation Reason
//! Clients spread their traffic over several data channels. The pool
//! keeps a target number of listeners alive, replaces any that exit,
//! and answers "which port should this client use".
//!
//! ## Main Functionality
//! - `ChannelPool::run`: maintenance loop, grows the pool to the target
//! - `ChannelPool::active_ports` / `one_active_port`: selection queries
//! - `ChannelDelegate`: told about every topology change
//!
//! ## Slot Table
//! ```text
//!  index:   0        1        2        3
//!        ┌────────┬────────┬────────┬────────┐
//!        │ :41022 │ (free) │ :39811 │ :40777 │
//!        └────────┴────────┴────────┴────────┘
//!                     ▲
//!                     └── next add_listener() fills this one
//! ```
//! - Slots are reused lowest index first; the table never shrinks
//! - A slot is freed exactly once, by the exit guard of its listener
//!
//! ## Maintenance Loop
//! ```text
//! ┌──► populated < target ? ──yes──► add_listener ──ok──► delegate(ports)
//! │          │ no                         │ err
//! │          ▼                            ▼
//! │   wait(cancel | exit event)     sleep(retry_delay | cancel)
//! └──────────┴────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The slot lock is never held across `.await`
//! - Exit events only wake the loop; the decision always re-counts the
//!   slots, so coalesced or early events cannot desynchronise it
//! - `add_listener` must only run on the maintenance loop (or in tests
//!   with no loop running): two concurrent calls could pick the same
//!   free slot
//!
//! ## Last Modified
//! v0.1.0 - Initial pool implementation

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use nextun_common::scope::Scope;
use nextun_transport::traits::{DataChannelListener, ListenerFactory};

use crate::error::Result;

// ============================================
// Constants
// ============================================

/// Default delay before retrying a failed listener creation.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

// ============================================
// ChannelDelegate
// ============================================

/// Receives the active port list whenever the pool adds a listener.
///
/// Called from the maintenance loop only, so calls never overlap.
/// Implementations must not block.
pub trait ChannelDelegate: Send + Sync + 'static {
    /// Active ports, in slot order.
    fn on_channel_topology_update(&self, ports: &[u16]);
}

// ============================================
// Slot Table
// ============================================

struct ListenerHandle<L> {
    port: u16,
    _listener: Arc<L>,
}

struct SlotTable<L> {
    slots: Mutex<Vec<Option<ListenerHandle<L>>>>,
    exits: mpsc::UnboundedSender<usize>,
}

impl<L> SlotTable<L> {
    /// Returns the first free index, appending one if none is free.
    fn reserve(&self) -> usize {
        let mut slots = self.slots.lock();
        if let Some(idx) = slots.iter().position(Option::is_none) {
            return idx;
        }
        slots.push(None);
        slots.len() - 1
    }

    fn fill(&self, idx: usize, handle: ListenerHandle<L>) {
        self.slots.lock()[idx] = Some(handle);
    }

    fn release(&self, idx: usize) {
        if let Some(slot) = self.slots.lock().get_mut(idx) {
            *slot = None;
        }
        // Receiver gone means the pool is being dropped.
        let _ = self.exits.send(idx);
    }

    fn ports(&self) -> Vec<u16> {
        self.slots
            .lock()
            .iter()
            .filter_map(|slot| slot.as_ref().map(|handle| handle.port))
            .collect()
    }

    fn populated(&self) -> usize {
        self.slots.lock().iter().filter(|slot| slot.is_some()).count()
    }

    fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Frees its slot when dropped: after `serve` returns, while a panic
/// unwinds, or when the task is dropped unpolled.
struct ExitGuard<L> {
    table: Arc<SlotTable<L>>,
    slot: usize,
    port: u16,
}

impl<L> Drop for ExitGuard<L> {
    fn drop(&mut self) {
        debug!(slot = self.slot, port = self.port, "Data channel listener exited");
        self.table.release(self.slot);
    }
}

// ============================================
// ChannelPool
// ============================================

/// Keeps a target number of data channel listeners alive.
pub struct ChannelPool<F: ListenerFactory> {
    factory: F,
    delegate: Arc<dyn ChannelDelegate>,
    scope: Scope,
    table: Arc<SlotTable<F::Listener>>,
    exit_rx: Mutex<Option<mpsc::UnboundedReceiver<usize>>>,
    rng: Mutex<StdRng>,
    retry_delay: Duration,
}

impl<F: ListenerFactory> ChannelPool<F> {
    /// Creates an empty pool. Nothing is bound until [`run`](Self::run).
    pub fn new(factory: F, delegate: Arc<dyn ChannelDelegate>, scope: Scope) -> Self {
        let (exits, exit_rx) = mpsc::unbounded_channel();
        Self {
            factory,
            delegate,
            scope,
            table: Arc::new(SlotTable {
                slots: Mutex::new(Vec::new()),
                exits,
            }),
            exit_rx: Mutex::new(Some(exit_rx)),
            rng: Mutex::new(StdRng::from_entropy()),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Replaces the random source used by [`one_active_port`](Self::one_active_port).
    #[must_use]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// Sets the delay before retrying a failed listener creation.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Runs the maintenance loop until the scope is cancelled.
    ///
    /// Running listeners are not stopped here; they observe the same
    /// scope. Only the first call runs the loop.
    pub async fn run(&self, target: usize) {
        let Some(mut exits) = self.exit_rx.lock().take() else {
            warn!("Data channel pool is already running");
            return;
        };
        let _work = self.scope.work();

        info!(target, "Data channel pool started");

        while !self.scope.is_cancelled() {
            while let Ok(slot) = exits.try_recv() {
                debug!(slot, "Slot freed");
            }

            if self.table.populated() < target {
                match self.add_listener().await {
                    Ok((slot, port)) => {
                        let ports = self.active_ports();
                        info!(slot, port, active = ports.len(), "Data channel added");
                        self.delegate.on_channel_topology_update(&ports);
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            retryable = e.is_retryable(),
                            retry_ms = u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX),
                            "Failed to add data channel"
                        );
                        tokio::select! {
                            () = self.scope.cancelled() => break,
                            () = tokio::time::sleep(self.retry_delay) => {}
                        }
                    }
                }
            } else {
                tokio::select! {
                    () = self.scope.cancelled() => break,
                    exit = exits.recv() => {
                        if let Some(slot) = exit {
                            debug!(slot, "Slot freed");
                        }
                    }
                }
            }
        }

        info!("Data channel pool stopped");
    }

    /// Creates one listener in the first free slot and starts serving it.
    async fn add_listener(&self) -> Result<(usize, u16)> {
        let slot = self.table.reserve();
        let listener = self.factory.create(&self.scope).await?;
        let port = listener.port();

        self.table.fill(
            slot,
            ListenerHandle {
                port,
                _listener: Arc::clone(&listener),
            },
        );

        let guard = ExitGuard {
            table: Arc::clone(&self.table),
            slot,
            port,
        };
        self.scope.spawn(async move {
            let _guard = guard;
            listener.serve().await;
        });

        Ok((slot, port))
    }

    /// Ports of every running listener, in slot order.
    #[must_use]
    pub fn active_ports(&self) -> Vec<u16> {
        self.table.ports()
    }

    /// A uniformly random active port, or `None` when nothing is running.
    #[must_use]
    pub fn one_active_port(&self) -> Option<u16> {
        let ports = self.active_ports();
        ports.choose(&mut *self.rng.lock()).copied()
    }

    /// Number of slots ever allocated (the high-water mark).
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.table.len()
    }
}

impl<F: ListenerFactory> std::fmt::Debug for ChannelPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPool")
            .field("active_ports", &self.active_ports())
            .field("slots", &self.slot_count())
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use nextun_transport::error::TransportError;
    use tokio_util::sync::CancellationToken;

    const WAIT: Duration = Duration::from_secs(5);

    // ========================================
    // Fakes
    // ========================================

    struct FakeListener {
        port: u16,
        scope: Scope,
        stop: CancellationToken,
        panic_on_serve: bool,
    }

    #[async_trait]
    impl DataChannelListener for FakeListener {
        fn port(&self) -> u16 {
            self.port
        }

        async fn serve(self: Arc<Self>) {
            assert!(!self.panic_on_serve, "listener blew up");
            tokio::select! {
                () = self.scope.cancelled() => {}
                () = self.stop.cancelled() => {}
            }
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        next_port: AtomicU16,
        attempts: AtomicUsize,
        failures_left: AtomicUsize,
        panic_next: AtomicUsize,
        created: Mutex<Vec<Arc<FakeListener>>>,
    }

    impl FakeFactory {
        fn failing(times: usize) -> Self {
            let factory = Self::default();
            factory.failures_left.store(times, Ordering::SeqCst);
            factory
        }

        fn stop(&self, port: u16) {
            if let Some(listener) = self.created.lock().iter().find(|l| l.port == port) {
                listener.stop.cancel();
            }
        }
    }

    #[async_trait]
    impl ListenerFactory for FakeFactory {
        type Listener = FakeListener;

        async fn create(&self, scope: &Scope) -> nextun_transport::Result<Arc<FakeListener>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TransportError::bind_failed(
                    "127.0.0.1:0".parse().unwrap(),
                    "no ports left",
                ));
            }

            let panic_on_serve = self
                .panic_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            let listener = Arc::new(FakeListener {
                port: 40_000 + self.next_port.fetch_add(1, Ordering::SeqCst),
                scope: scope.clone(),
                stop: CancellationToken::new(),
                panic_on_serve,
            });
            self.created.lock().push(Arc::clone(&listener));
            Ok(listener)
        }
    }

    #[derive(Default)]
    struct RecordingDelegate {
        updates: Mutex<Vec<Vec<u16>>>,
    }

    impl ChannelDelegate for RecordingDelegate {
        fn on_channel_topology_update(&self, ports: &[u16]) {
            self.updates.lock().push(ports.to_vec());
        }
    }

    struct Fixture {
        factory: Arc<FakeFactory>,
        delegate: Arc<RecordingDelegate>,
        scope: Scope,
        pool: Arc<ChannelPool<Arc<FakeFactory>>>,
    }

    fn fixture(factory: FakeFactory) -> Fixture {
        let factory = Arc::new(factory);
        let delegate = Arc::new(RecordingDelegate::default());
        let scope = Scope::new();
        let pool = ChannelPool::new(Arc::clone(&factory), delegate.clone(), scope.clone())
            .with_rng(StdRng::seed_from_u64(7))
            .with_retry_delay(Duration::from_millis(10));
        Fixture {
            factory,
            delegate,
            scope,
            pool: Arc::new(pool),
        }
    }

    fn start(f: &Fixture, target: usize) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(&f.pool);
        tokio::spawn(async move { pool.run(target).await })
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(WAIT, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    // ========================================
    // Maintenance loop
    // ========================================

    #[tokio::test]
    async fn test_start_four_yields_four_distinct_ports() {
        let f = fixture(FakeFactory::default());
        let _run = start(&f, 4);

        wait_until(|| f.pool.active_ports().len() == 4).await;

        let ports = f.pool.active_ports();
        let distinct: HashSet<_> = ports.iter().collect();
        assert_eq!(distinct.len(), 4);
        assert_eq!(f.pool.slot_count(), 4);

        let updates = f.delegate.updates.lock().clone();
        assert_eq!(updates.len(), 4);
        assert_eq!(updates.last(), Some(&ports));
        for (n, update) in updates.iter().enumerate() {
            assert_eq!(update.len(), n + 1);
        }
    }

    #[tokio::test]
    async fn test_exit_of_slot_zero_is_refilled() {
        let f = fixture(FakeFactory::default());
        let _run = start(&f, 2);
        wait_until(|| f.pool.active_ports().len() == 2).await;

        let before = f.pool.active_ports();
        f.factory.stop(before[0]);

        wait_until(|| {
            let ports = f.pool.active_ports();
            ports.len() == 2 && ports[0] != before[0]
        })
        .await;

        let after = f.pool.active_ports();
        assert_eq!(after[1], before[1]);
        assert!(!after.contains(&before[0]));
        assert_eq!(f.pool.slot_count(), 2);
    }

    #[tokio::test]
    async fn test_two_exits_before_loop_wakes_recover_fully() {
        let f = fixture(FakeFactory::default());
        let _run = start(&f, 3);
        wait_until(|| f.pool.active_ports().len() == 3).await;

        let before = f.pool.active_ports();
        f.factory.stop(before[0]);
        f.factory.stop(before[2]);

        wait_until(|| {
            let ports = f.pool.active_ports();
            ports.len() == 3 && !ports.contains(&before[0]) && !ports.contains(&before[2])
        })
        .await;

        assert_eq!(f.pool.slot_count(), 3);
        assert_eq!(f.factory.attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_creation_failure_is_retried() {
        let f = fixture(FakeFactory::failing(2));
        let _run = start(&f, 1);

        wait_until(|| f.pool.active_ports().len() == 1).await;

        assert_eq!(f.factory.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(f.pool.slot_count(), 1);
        assert_eq!(f.delegate.updates.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_listener_frees_its_slot() {
        let factory = FakeFactory::default();
        factory.panic_next.store(1, Ordering::SeqCst);
        let f = fixture(factory);
        let _run = start(&f, 1);

        wait_until(|| f.factory.attempts.load(Ordering::SeqCst) >= 2 && f.pool.active_ports().len() == 1)
            .await;
        assert_eq!(f.pool.slot_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_loop_and_listeners() {
        let f = fixture(FakeFactory::default());
        let run = start(&f, 2);
        wait_until(|| f.pool.active_ports().len() == 2).await;

        f.scope.cancel();
        tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
        tokio::time::timeout(WAIT, f.scope.wait()).await.unwrap();

        assert!(f.pool.active_ports().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_returns_immediately() {
        let f = fixture(FakeFactory::default());
        let _run = start(&f, 1);
        wait_until(|| f.pool.active_ports().len() == 1).await;

        tokio::time::timeout(WAIT, f.pool.run(5)).await.unwrap();
        assert_eq!(f.pool.active_ports().len(), 1);
    }

    // ========================================
    // Slots and selection
    // ========================================

    #[tokio::test]
    async fn test_lowest_free_slot_is_reused() {
        let f = fixture(FakeFactory::default());
        for expected in 0..3 {
            let (slot, _) = f.pool.add_listener().await.unwrap();
            assert_eq!(slot, expected);
        }
        let before = f.pool.active_ports();

        f.factory.stop(before[1]);
        wait_until(|| f.pool.active_ports().len() == 2).await;

        let (slot, port) = f.pool.add_listener().await.unwrap();
        assert_eq!(slot, 1);
        assert_eq!(f.pool.slot_count(), 3);
        assert_eq!(f.pool.active_ports(), vec![before[0], port, before[2]]);
    }

    #[tokio::test]
    async fn test_failed_add_leaves_slot_empty() {
        let f = fixture(FakeFactory::failing(1));

        assert!(f.pool.add_listener().await.is_err());
        assert!(f.pool.active_ports().is_empty());

        let (slot, _) = f.pool.add_listener().await.unwrap();
        assert_eq!(slot, 0);
        assert_eq!(f.pool.slot_count(), 1);
    }

    #[tokio::test]
    async fn test_one_active_port_is_member() {
        let f = fixture(FakeFactory::default());
        assert_eq!(f.pool.one_active_port(), None);

        for _ in 0..3 {
            f.pool.add_listener().await.unwrap();
        }
        let ports = f.pool.active_ports();

        let mut seen = HashSet::new();
        for _ in 0..200 {
            let port = f.pool.one_active_port().unwrap();
            assert!(ports.contains(&port));
            seen.insert(port);
        }
        assert_eq!(seen.len(), 3);
    }
}
