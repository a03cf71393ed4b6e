//! The control protocol and the worker pool every facility runs on.
//!
//! A [`Pool`] owns a control queue, a live-worker counter and a running
//! flag. Each worker multiplexes three sources: the control queue, its
//! facility's work source and a heartbeat tick that re-checks the running
//! flag. No source has priority over the others.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{self, MissedTickBehavior};

use crate::model::Facility;

/// Capacity of a pool's control queue.
pub const CONTROL_QUEUE_SIZE: usize = 5;

/// Messages an orchestrator sends to a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlMessage {
    /// Terminate the worker that receives it.
    Stop,
    /// Terminate every worker of the pool.
    Shutdown,
    /// Start one more worker.
    Spawn,
    /// Log the receiving worker's status.
    Status,
}

/// What a facility plugs into a [`Pool`].
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    type Item: Send + 'static;

    /// Waits for the next unit of work. `None` means nothing is available
    /// right now; the worker waits for its next heartbeat before asking again.
    async fn next_item(&self) -> Option<Self::Item>;

    /// Handles one unit of work. Must not fail: errors are logged and dropped.
    async fn process(&self, id: usize, item: Self::Item);
}

/// Observes whether a pool is running. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct RunningFlag(Arc<AtomicBool>);

impl RunningFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, running: bool) {
        self.0.store(running, Ordering::Release);
    }

    /// Sets the flag and returns true if it was clear.
    fn raise(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct Inner<W: Worker> {
    facility: Facility,
    heartbeat: Duration,
    running: RunningFlag,
    live: RwLock<usize>,
    next_id: AtomicUsize,
    control_tx: mpsc::Sender<ControlMessage>,
    control_rx: Mutex<mpsc::Receiver<ControlMessage>>,
    worker: Arc<W>,
}

/// Decrements the live counter when a worker task ends, however it ends.
struct LiveGuard<'a, W: Worker>(&'a Inner<W>);

impl<W: Worker> Drop for LiveGuard<'_, W> {
    fn drop(&mut self) {
        let mut live = self.0.live.write().unwrap_or_else(PoisonError::into_inner);
        *live = live.saturating_sub(1);
    }
}

impl<W: Worker> Inner<W> {
    /// Launches one worker. The counter goes up before the task starts so
    /// that `count()` never under-reports a worker that is starting.
    fn spawn_worker(self: &Arc<Self>) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *self.live.write().unwrap_or_else(PoisonError::into_inner) += 1;

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.run(id).await });
        id
    }

    fn count(&self) -> usize {
        *self.live.read().unwrap_or_else(PoisonError::into_inner)
    }

    async fn recv_control(&self) -> Option<ControlMessage> {
        self.control_rx.lock().await.recv().await
    }

    async fn run(self: Arc<Self>, id: usize) {
        let _guard = LiveGuard(&self);
        let mut heartbeat = time::interval(self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut idle = false;

        debug!("{} worker {id} starting up", self.facility);

        while self.running.is_set() {
            tokio::select! {
                msg = self.recv_control() => match msg {
                    Some(ControlMessage::Stop) | None => {
                        info!("{} worker {id} stopping", self.facility);
                        return;
                    }
                    Some(ControlMessage::Shutdown) => {
                        info!("{} worker {id} shutting down the pool", self.facility);
                        self.running.set(false);
                        return;
                    }
                    Some(ControlMessage::Spawn) => {
                        let new_id = self.spawn_worker();
                        debug!("{} worker {id} spawned worker {new_id}", self.facility);
                    }
                    Some(ControlMessage::Status) => {
                        info!(
                            "{} worker {id} is alive, {} workers running",
                            self.facility,
                            self.count()
                        );
                    }
                },
                item = self.worker.next_item(), if !idle => match item {
                    Some(item) => self.worker.process(id, item).await,
                    None => idle = true,
                },
                _ = heartbeat.tick() => idle = false,
            }
        }

        debug!("{} worker {id} noticed the pool is no longer running", self.facility);
    }
}

/// A resizable group of workers sharing one control queue.
pub struct Pool<W: Worker> {
    inner: Arc<Inner<W>>,
}

impl<W: Worker> Pool<W> {
    pub fn new(facility: Facility, heartbeat: Duration, worker: W) -> Self {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_SIZE);
        Self {
            inner: Arc::new(Inner {
                facility,
                heartbeat,
                running: RunningFlag::default(),
                live: RwLock::new(0),
                next_id: AtomicUsize::new(1),
                control_tx,
                control_rx: Mutex::new(control_rx),
                worker: Arc::new(worker),
            }),
        }
    }

    /// Sets the running flag and launches `n` workers. Does nothing and
    /// returns false if the pool is already running.
    pub fn start(&self, n: usize) -> bool {
        if !self.inner.running.raise() {
            debug!("{} pool is already running", self.inner.facility);
            return false;
        }

        info!("Starting {} pool with {n} workers", self.inner.facility);
        for _ in 0..n {
            self.inner.spawn_worker();
        }
        true
    }

    /// Clears the running flag. Workers exit at their next liveness check.
    pub fn stop(&self) {
        self.inner.running.set(false);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.is_set()
    }

    pub fn running_flag(&self) -> RunningFlag {
        self.inner.running.clone()
    }

    /// Number of live workers.
    pub fn count(&self) -> usize {
        self.inner.count()
    }

    pub fn facility(&self) -> Facility {
        self.inner.facility
    }

    /// A handle the orchestrator writes control messages into.
    pub fn control_sender(&self) -> mpsc::Sender<ControlMessage> {
        self.inner.control_tx.clone()
    }

    pub async fn send(&self, msg: ControlMessage) {
        // the pool itself holds the receiver, so the queue never closes
        let _ = self.inner.control_tx.send(msg).await;
    }

    pub fn worker(&self) -> &Arc<W> {
        &self.inner.worker
    }
}

impl<W: Worker> Drop for Pool<W> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex as StdMutex;

    /// Records which worker ids handled which items.
    struct Recorder {
        rx: Mutex<mpsc::Receiver<u64>>,
        seen: StdMutex<Vec<(usize, u64)>>,
        processed: AtomicU64,
    }

    #[async_trait]
    impl Worker for Recorder {
        type Item = u64;

        async fn next_item(&self) -> Option<u64> {
            self.rx.lock().await.recv().await
        }

        async fn process(&self, id: usize, item: u64) {
            self.seen.lock().unwrap().push((id, item));
            self.processed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool() -> (Pool<Recorder>, mpsc::Sender<u64>) {
        let (tx, rx) = mpsc::channel(16);
        let worker = Recorder {
            rx: Mutex::new(rx),
            seen: StdMutex::new(Vec::new()),
            processed: AtomicU64::new(0),
        };
        (
            Pool::new(Facility::Scanner, Duration::from_millis(20), worker),
            tx,
        )
    }

    async fn wait_for_count<W: Worker>(pool: &Pool<W>, want: usize) {
        time::timeout(Duration::from_secs(5), async {
            while pool.count() != want {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("pool never reached {want} workers, has {}", pool.count()));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (pool, _tx) = pool();
        assert!(pool.start(2));
        assert!(!pool.start(5));
        wait_for_count(&pool, 2).await;
        assert!(pool.is_running());
    }

    #[tokio::test]
    async fn spawn_then_stop() {
        let (pool, _tx) = pool();
        pool.start(2);
        wait_for_count(&pool, 2).await;

        pool.send(ControlMessage::Spawn).await;
        wait_for_count(&pool, 3).await;

        pool.send(ControlMessage::Stop).await;
        wait_for_count(&pool, 2).await;

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.count(), 2);
    }

    #[tokio::test]
    async fn shutdown_ends_every_worker() {
        let (pool, _tx) = pool();
        pool.start(4);
        wait_for_count(&pool, 4).await;

        pool.send(ControlMessage::Shutdown).await;
        wait_for_count(&pool, 0).await;
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn status_keeps_worker_alive() {
        let (pool, _tx) = pool();
        pool.start(1);
        pool.send(ControlMessage::Status).await;
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.count(), 1);
    }

    #[tokio::test]
    async fn items_are_processed() {
        let (pool, tx) = pool();
        pool.start(3);
        for i in 0..10 {
            tx.send(i).await.unwrap();
        }

        let recorder = Arc::clone(pool.worker());
        time::timeout(Duration::from_secs(5), async {
            while recorder.processed.load(Ordering::SeqCst) < 10 {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let mut items: Vec<u64> = recorder.seen.lock().unwrap().iter().map(|&(_, i)| i).collect();
        items.sort_unstable();
        assert_eq!(items, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn worker_ids_are_never_reused() {
        let (pool, _tx) = pool();
        pool.start(1);
        let first = pool.inner.spawn_worker();
        let second = pool.inner.spawn_worker();
        assert!(second > first);
        assert!(first > 1);
    }

    #[tokio::test]
    async fn stopped_pool_drains_on_heartbeat() {
        let (pool, _tx) = pool();
        pool.start(3);
        wait_for_count(&pool, 3).await;
        pool.stop();
        wait_for_count(&pool, 0).await;
    }
}
