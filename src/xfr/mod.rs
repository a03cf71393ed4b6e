//! Harvests hosts from DNS zone transfers.
//!
//! Every hostname pushed into the request queue names a zone: the hostname
//! minus its leftmost label. Each zone is attempted once. Its nameservers
//! are asked for an AXFR in turn until one of them hands the zone over, and
//! the A, AAAA, NS and MX records of the zone become new hosts.
pub mod axfr;

use std::net::{IpAddr, SocketAddr};
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use hickory_resolver::proto::rr::{RData, Record};
use itertools::Itertools;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Mutex};

use crate::blacklist::{AddressBlacklist, NameBlacklist};
use crate::control::{Pool, Worker};
use crate::error::{Error, Result};
use crate::model::{Facility, Host, HostSource, XfrStatus, ZoneTransfer};
use crate::resolver::Resolve;
use crate::storage::Storage;

use self::axfr::{Axfr, Trace};

/// Nameserver names resolved at the same time.
const NS_LOOKUP_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct XfrConfig {
    pub heartbeat: Duration,
    /// Capacity of the request queue.
    pub queue_size: usize,
    /// Port zone transfers are requested on.
    pub port: u16,
    /// Connect and per-message read timeout.
    pub timeout: Duration,
    /// Where per-zone traces go. No traces are written without one.
    pub trace_dir: Option<PathBuf>,
}

impl Default for XfrConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(2),
            queue_size: 2,
            port: 53,
            timeout: Duration::from_secs(30),
            trace_dir: None,
        }
    }
}

/// The zone a hostname belongs to: everything after the first label.
/// Hostnames without a parent zone yield `None`.
pub fn zone_of(hostname: &str) -> Option<&str> {
    let (label, zone) = hostname.split_once('.')?;
    if label.is_empty() || zone.is_empty() {
        return None;
    }
    Some(zone)
}

pub struct XfrWorker {
    config: XfrConfig,
    requests: Mutex<mpsc::Receiver<String>>,
    names: Arc<NameBlacklist>,
    addresses: Arc<AddressBlacklist>,
    storage: Arc<dyn Storage>,
    resolver: Arc<dyn Resolve>,
}

impl XfrWorker {
    /// Transfers `zone` from the first nameserver willing to hand it over.
    /// Returns the number of records received.
    pub async fn perform(&self, zone: &str) -> Result<usize> {
        let servers = self.nameserver_addresses(zone).await?;
        if servers.is_empty() {
            return Err(Error::transfer(zone, "no nameserver could be resolved"));
        }

        let mut last_error = None;
        for server in &servers {
            let target = SocketAddr::new(*server, self.config.port);
            match self.attempt(zone, target).await {
                Ok(records) => {
                    info!("Received {records} records of {zone} from {target}");
                    return Ok(records);
                }
                Err(e) => {
                    debug!("AXFR of {zone} from {target} failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        let reason = last_error.map_or_else(String::new, |e| e.to_string());
        Err(Error::transfer(
            zone,
            format!("none of {} servers agreed, last error: {reason}", servers.len()),
        ))
    }

    async fn nameserver_addresses(&self, zone: &str) -> Result<Vec<IpAddr>> {
        let names = self.resolver.nameservers(zone).await?;

        let addresses: Vec<Vec<IpAddr>> = stream::iter(names)
            .map(|ns| async move {
                match self.resolver.addresses(&ns).await {
                    Ok(addrs) => addrs,
                    Err(e) => {
                        debug!("Cannot resolve nameserver {ns} of {zone}: {e}");
                        Vec::new()
                    }
                }
            })
            .buffer_unordered(NS_LOOKUP_CONCURRENCY)
            .collect()
            .await;

        Ok(addresses.into_iter().flatten().unique().collect())
    }

    /// One AXFR from one server. Hosts ingested before a failure stay.
    async fn attempt(&self, zone: &str, server: SocketAddr) -> Result<usize> {
        let mut axfr = Axfr::request(zone, server, self.config.timeout).await?;
        let mut trace = match &self.config.trace_dir {
            Some(dir) => match Trace::create(dir, zone).await {
                Ok(trace) => Some(trace),
                Err(e) => {
                    warn!("Cannot trace AXFR of {zone} in {}: {e}", dir.display());
                    None
                }
            },
            None => None,
        };

        let mut received = 0;
        let mut failure = None;
        while let Some(envelope) = axfr.next_envelope().await {
            match envelope {
                Ok(records) => {
                    for rr in &records {
                        if let Some(trace) = trace.as_mut() {
                            trace.record(rr).await;
                        }
                        received += 1;
                        self.ingest(rr).await;
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(trace) = trace {
            trace.finish().await;
        }

        match failure {
            Some(e) => Err(e),
            None if received == 0 => Err(Error::transfer(zone, format!("{server} sent no records"))),
            None => Ok(received),
        }
    }

    /// Turns one record into zero or more hosts.
    pub async fn ingest(&self, rr: &Record) {
        let owner = rr.name().to_string();
        match rr.data() {
            Some(RData::A(a)) => {
                self.add_address(&owner, IpAddr::V4(a.0), HostSource::ARecord)
                    .await;
            }
            Some(RData::AAAA(aaaa)) => {
                self.add_address(&owner, IpAddr::V6(aaaa.0), HostSource::ARecord)
                    .await;
            }
            Some(RData::NS(ns)) => {
                self.add_named(&ns.0.to_string(), HostSource::NsRecord)
                    .await;
            }
            Some(RData::MX(mx)) => {
                self.add_named(&mx.exchange().to_string(), HostSource::MxRecord)
                    .await;
            }
            _ => {}
        }
    }

    async fn add_address(&self, name: &str, address: IpAddr, source: HostSource) {
        if self.names.matches(name) || self.addresses.matches(&address) {
            return;
        }
        self.add_if_new(Host::new(address, name, source)).await;
    }

    /// Resolves `name` and adds every acceptable address under it.
    async fn add_named(&self, name: &str, source: HostSource) {
        if self.names.matches(name) {
            return;
        }

        let addresses = match self.resolver.addresses(name).await {
            Ok(addresses) => addresses,
            Err(e) => {
                debug!("Cannot resolve {source} host {name}: {e}");
                return;
            }
        };

        for address in addresses {
            if self.addresses.matches(&address) {
                continue;
            }
            self.add_if_new(Host::new(address, name, source)).await;
        }
    }

    async fn add_if_new(&self, mut host: Host) {
        match self.storage.host_exists(host.address).await {
            Ok(true) => {}
            Ok(false) => match self.storage.host_add(&mut host).await {
                Ok(_) => debug!("Added {} host {} ({})", host.source, host.name, host.address),
                Err(e) => warn!("Cannot add host {}/{}: {e}", host.name, host.address),
            },
            Err(e) => warn!("Cannot check whether {} is known: {e}", host.address),
        }
    }
}

#[async_trait]
impl Worker for XfrWorker {
    type Item = String;

    async fn next_item(&self) -> Option<String> {
        self.requests.lock().await.recv().await
    }

    async fn process(&self, id: usize, hostname: String) {
        let Some(zone) = zone_of(&hostname) else {
            warn!("XFR worker {id}: cannot extract a zone from {hostname}");
            return;
        };
        debug!("XFR worker {id}: {hostname} belongs to {zone}");

        match self.storage.zone_get_by_name(zone).await {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => {
                warn!("XFR worker {id}: cannot look up zone {zone}: {e}");
                return;
            }
        }

        let mut xfr = ZoneTransfer::new(zone);
        if let Err(e) = self.storage.zone_add(&mut xfr).await {
            warn!("XFR worker {id}: cannot record zone {zone}: {e}");
            return;
        }
        if xfr.id.is_none() {
            error!("XFR worker {id}: zone {zone} was stored but has no id");
            return;
        }

        let status = match self.perform(zone).await {
            Ok(_) => XfrStatus::Success,
            Err(e) => {
                info!("XFR worker {id}: {e}");
                XfrStatus::Refused
            }
        };

        if let Err(e) = self.storage.zone_finish(&mut xfr, status).await {
            warn!("XFR worker {id}: cannot finish zone {zone} as {status}: {e}");
        }
    }
}

/// The zone transfer facility. Dereferences to its [`Pool`].
pub struct XfrClient {
    pool: Pool<XfrWorker>,
}

impl XfrClient {
    /// Builds the client and hands back the sending end of its request queue.
    pub fn new(
        config: XfrConfig,
        names: Arc<NameBlacklist>,
        addresses: Arc<AddressBlacklist>,
        storage: Arc<dyn Storage>,
        resolver: Arc<dyn Resolve>,
    ) -> (Self, mpsc::Sender<String>) {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let heartbeat = config.heartbeat;
        let worker = XfrWorker {
            config,
            requests: Mutex::new(rx),
            names,
            addresses,
            storage,
            resolver,
        };

        let client = Self {
            pool: Pool::new(Facility::Xfr, heartbeat, worker),
        };
        (client, tx)
    }
}

impl Deref for XfrClient {
    type Target = Pool<XfrWorker>;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parameterized::parameterized;

    #[parameterized(hostname = {
        "www.krylon.net.", "ns1.debian.org", "a.b.c.d.", "mail.kernel.org.",
    }, zone = {
        "krylon.net.", "debian.org", "b.c.d.", "kernel.org.",
    })]
    fn zone_drops_first_label(hostname: &str, zone: &str) {
        assert_eq!(zone_of(hostname), Some(zone));
    }

    #[parameterized(hostname = { "localhost", "com.", ".krylon.net", "" })]
    fn no_zone(hostname: &str) {
        assert_eq!(zone_of(hostname), None);
    }
}
