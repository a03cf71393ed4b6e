//! The scanner facility.
//!
//! A feeder task pulls random batches of known hosts out of storage together
//! with the ports already scanned on them. A dispatcher picks one unscanned
//! port per host and queues a [`ScanRequest`]. The pool's workers run the
//! matching probe and store the result, successful or not, so the port is
//! never offered again.
pub mod port_strategy;
pub mod probes;

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time;

use crate::control::{Pool, RunningFlag, Worker};
use crate::error::Result;
use crate::model::{Facility, Host, HostWithPorts, RecordId, ScanRequest};
use crate::storage::Storage;
use port_strategy::{select_port, NO_PORT};
use probes::{ProbeConfig, Prober};

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub heartbeat: Duration,
    /// Hosts fetched from storage per round.
    pub batch_size: usize,
    /// Capacity of the internal host and request queues.
    pub queue_size: usize,
    pub probes: ProbeConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(2),
            batch_size: 80,
            queue_size: 16,
            probes: ProbeConfig::default(),
        }
    }
}

/// (host, port) pairs queued or being probed right now.
type InFlight = Arc<StdMutex<HashSet<(RecordId, u16)>>>;

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashSet<(RecordId, u16)>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ScanWorker {
    storage: Arc<dyn Storage>,
    prober: Prober,
    requests: Mutex<mpsc::Receiver<ScanRequest>>,
    in_flight: InFlight,
}

#[async_trait]
impl Worker for ScanWorker {
    type Item = ScanRequest;

    async fn next_item(&self) -> Option<ScanRequest> {
        self.requests.lock().await.recv().await
    }

    async fn process(&self, id: usize, req: ScanRequest) {
        let result = self.prober.scan(&req.host, req.port).await;
        match (&result.banner, &result.error) {
            (Some(banner), _) => info!(
                "Scanner worker {id}: {}:{} ({}) {banner:?}",
                result.address(),
                result.port,
                result.host_name()
            ),
            (None, Some(e)) => debug!(
                "Scanner worker {id}: {}:{} failed: {e}",
                result.address(),
                result.port
            ),
            (None, None) => debug!(
                "Scanner worker {id}: {}:{} sent nothing useful",
                result.address(),
                result.port
            ),
        }

        if let Err(e) = self.storage.port_add(&result).await {
            warn!(
                "Scanner worker {id}: cannot store result for {}:{}: {e}",
                result.address(),
                result.port
            );
        }

        if let Some(host_id) = req.host.id {
            lock(&self.in_flight).remove(&(host_id, req.port));
        }
    }
}

/// Sends `item`, retrying every heartbeat while the pool keeps running.
/// Returns false if the pool stopped or the receiver went away.
async fn send_while_running<T>(
    tx: &mpsc::Sender<T>,
    mut item: T,
    heartbeat: Duration,
    running: &RunningFlag,
) -> bool {
    loop {
        match tx.send_timeout(item, heartbeat).await {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) if running.is_set() => item = back,
            Err(_) => return false,
        }
    }
}

async fn feed(
    storage: Arc<dyn Storage>,
    config: ScannerConfig,
    running: RunningFlag,
    hosts: mpsc::Sender<Host>,
) {
    while running.is_set() {
        let batch = match storage.host_get_random(config.batch_size).await {
            Ok(batch) if !batch.is_empty() => batch,
            Ok(_) => {
                debug!("Scanner: no hosts to scan yet");
                time::sleep(config.heartbeat).await;
                continue;
            }
            Err(e) => {
                warn!("Scanner: cannot fetch hosts: {e}");
                time::sleep(config.heartbeat).await;
                continue;
            }
        };

        for host in batch {
            if !send_while_running(&hosts, host, config.heartbeat, &running).await {
                return;
            }
        }
    }
}

fn ports_in_flight(
    in_flight: &HashSet<(RecordId, u16)>,
    host_id: RecordId,
) -> impl Iterator<Item = u16> + '_ {
    in_flight
        .iter()
        .filter(move |(h, _)| *h == host_id)
        .map(|&(_, p)| p)
}

/// Picks the next port for `target` and marks it in flight. `busy` holds
/// the ports that were in flight before `target.ports` was read.
fn plan(target: &HostWithPorts, busy: &HashSet<u16>, in_flight: &InFlight) -> Option<u16> {
    let host_id = target.host.id?;
    let mut flight = lock(in_flight);
    let scanned: HashSet<u16> = target
        .ports
        .iter()
        .map(|p| p.port)
        .chain(busy.iter().copied())
        .chain(ports_in_flight(&flight, host_id))
        .collect();

    match select_port(&target.host, &scanned) {
        NO_PORT => None,
        port => {
            flight.insert((host_id, port));
            Some(port)
        }
    }
}

async fn dispatch(
    storage: Arc<dyn Storage>,
    in_flight: InFlight,
    heartbeat: Duration,
    running: RunningFlag,
    mut hosts: mpsc::Receiver<Host>,
    requests: mpsc::Sender<ScanRequest>,
) {
    while running.is_set() {
        let host = match time::timeout(heartbeat, hosts.recv()).await {
            Ok(Some(host)) => host,
            Ok(None) => return,
            Err(_) => continue,
        };
        let Some(host_id) = host.id else {
            error!("Scanner: storage returned {} without an id", host.address);
            continue;
        };

        // taken before reading storage, so a probe that finishes in
        // between shows up in one or the other
        let busy: HashSet<u16> = ports_in_flight(&lock(&in_flight), host_id).collect();
        let ports = match storage.port_get_by_host(host_id).await {
            Ok(ports) => ports,
            Err(e) => {
                warn!("Scanner: cannot fetch ports of {}: {e}", host.address);
                continue;
            }
        };

        let target = HostWithPorts { host, ports };
        let Some(port) = plan(&target, &busy, &in_flight) else {
            debug!("Scanner: every port of {} is done", target.host.name);
            continue;
        };

        let req = ScanRequest {
            host: target.host,
            port,
        };
        if !send_while_running(&requests, req, heartbeat, &running).await {
            lock(&in_flight).remove(&(host_id, port));
            return;
        }
    }
}

/// The scanner facility. Dereferences to its [`Pool`].
pub struct Scanner {
    pool: Pool<ScanWorker>,
    storage: Arc<dyn Storage>,
    config: ScannerConfig,
    requests: mpsc::Sender<ScanRequest>,
    in_flight: InFlight,
    pipeline: StdMutex<Vec<JoinHandle<()>>>,
}

impl Scanner {
    pub fn new(config: ScannerConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        let prober = Prober::new(config.probes.clone())?;
        let (requests, rx) = mpsc::channel(config.queue_size.max(1));
        let in_flight = InFlight::default();

        let worker = ScanWorker {
            storage: Arc::clone(&storage),
            prober,
            requests: Mutex::new(rx),
            in_flight: Arc::clone(&in_flight),
        };

        Ok(Self {
            pool: Pool::new(Facility::Scanner, config.heartbeat, worker),
            storage,
            config,
            requests,
            in_flight,
            pipeline: StdMutex::new(Vec::new()),
        })
    }

    fn pipeline(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts `n` workers plus the feeder and dispatcher tasks. Does nothing
    /// and returns false if the scanner is already running.
    pub fn start(&self, n: usize) -> bool {
        if !self.pool.start(n) {
            return false;
        }

        let mut pipeline = self.pipeline();
        for task in pipeline.drain(..) {
            task.abort();
        }

        let running = self.pool.running_flag();
        let (hosts_tx, hosts_rx) = mpsc::channel(self.config.queue_size.max(1));
        pipeline.push(tokio::spawn(feed(
            Arc::clone(&self.storage),
            self.config.clone(),
            running.clone(),
            hosts_tx,
        )));
        pipeline.push(tokio::spawn(dispatch(
            Arc::clone(&self.storage),
            Arc::clone(&self.in_flight),
            self.config.heartbeat,
            running,
            hosts_rx,
            self.requests.clone(),
        )));
        true
    }

    /// Stops the workers and tears down the feeding pipeline.
    pub fn stop(&self) {
        self.pool.stop();
        for task in self.pipeline().drain(..) {
            task.abort();
        }
    }

    /// Number of (host, port) pairs queued or being probed.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

impl Deref for Scanner {
    type Target = Pool<ScanWorker>;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.stop();
    }
}
