//! Finds hosts by resolving random IPv4 addresses back to names.
use std::net::{IpAddr, Ipv4Addr};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use rand::Rng;
use tokio::sync::mpsc;

use crate::blacklist::{AddressBlacklist, NameBlacklist};
use crate::control::{Pool, Worker};
use crate::model::{Facility, Host, HostSource};
use crate::resolver::Resolve;
use crate::storage::HostCache;

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub heartbeat: Duration,
    /// Capacity of the outgoing host queue.
    pub queue_size: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(2),
            queue_size: 8,
        }
    }
}

/// The per-address pipeline shared by every generator worker.
pub struct GeneratorWorker {
    names: Arc<NameBlacklist>,
    addresses: Arc<AddressBlacklist>,
    cache: Arc<dyn HostCache>,
    resolver: Arc<dyn Resolve>,
    hosts: mpsc::Sender<Host>,
}

impl GeneratorWorker {
    /// Pulls addresses from `next` until one is outside every blacklisted
    /// network.
    pub fn draw_address(&self, mut next: impl FnMut() -> Ipv4Addr) -> Ipv4Addr {
        loop {
            let addr = next();
            if !self.addresses.matches(&IpAddr::V4(addr)) {
                return addr;
            }
        }
    }

    fn random_address(&self) -> Ipv4Addr {
        let mut rng = rand::rng();
        self.draw_address(|| Ipv4Addr::from(rng.random::<u32>()))
    }

    /// Returns true if `key` was tried before. Cache failures count as a miss.
    async fn seen_before(&self, key: &str) -> bool {
        match self.cache.has_key(key).await {
            Ok(true) => true,
            Ok(false) => {
                if let Err(e) = self.cache.add_key(key).await {
                    warn!("Cannot add {key} to the host cache: {e}");
                }
                false
            }
            Err(e) => {
                warn!("Cannot look up {key} in the host cache: {e}");
                false
            }
        }
    }
}

#[async_trait]
impl Worker for GeneratorWorker {
    type Item = Ipv4Addr;

    async fn next_item(&self) -> Option<Ipv4Addr> {
        let addr = self.random_address();
        // drawing never suspends, give the other branches a chance
        tokio::task::yield_now().await;
        Some(addr)
    }

    async fn process(&self, id: usize, addr: Ipv4Addr) {
        let key = addr.to_string();
        if self.seen_before(&key).await {
            debug!("Generator worker {id}: {key} was tried before");
            return;
        }

        let names = match self.resolver.reverse(IpAddr::V4(addr)).await {
            Ok(names) => names,
            Err(e) => {
                debug!("Generator worker {id}: reverse lookup of {key} failed: {e}");
                return;
            }
        };

        let Some(name) = names.into_iter().next() else {
            debug!("Generator worker {id}: {key} has no name");
            return;
        };

        if self.names.matches(&name) {
            debug!("Generator worker {id}: {name} is blacklisted");
            return;
        }

        debug!("Generator worker {id}: found {name} ({key})");
        let host = Host::new(IpAddr::V4(addr), name, HostSource::Generated);
        if self.hosts.send(host).await.is_err() {
            debug!("Generator worker {id}: nobody is listening for hosts anymore");
        }
    }
}

/// The generator facility. Dereferences to its [`Pool`].
pub struct HostGenerator {
    pool: Pool<GeneratorWorker>,
}

impl HostGenerator {
    /// Builds the generator and hands back the receiving end of its host
    /// queue. Workers block once the queue is full.
    pub fn new(
        config: &GeneratorConfig,
        names: Arc<NameBlacklist>,
        addresses: Arc<AddressBlacklist>,
        cache: Arc<dyn HostCache>,
        resolver: Arc<dyn Resolve>,
    ) -> (Self, mpsc::Receiver<Host>) {
        let (hosts, rx) = mpsc::channel(config.queue_size.max(1));
        let worker = GeneratorWorker {
            names,
            addresses,
            cache,
            resolver,
            hosts,
        };

        let generator = Self {
            pool: Pool::new(Facility::Generator, config.heartbeat, worker),
        };
        (generator, rx)
    }
}

impl Deref for HostGenerator {
    type Target = Pool<GeneratorWorker>;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}
