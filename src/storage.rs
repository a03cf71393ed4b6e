//! Contracts for the persistent repository and the generator's dedup cache,
//! plus in-memory implementations of both.
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;

use crate::error::{Error, Result};
use crate::model::{Host, Port, RecordId, ScanResult, XfrStatus, ZoneTransfer};

/// Where hosts, scanned ports and zone transfers are kept.
///
/// Calls may block for an unspecified time under contention; the engine
/// never holds a lock of its own across them.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn host_exists(&self, address: IpAddr) -> Result<bool>;

    /// Persists `host`, assigns its id and returns it.
    async fn host_add(&self, host: &mut Host) -> Result<RecordId>;

    /// Up to `n` hosts picked at random.
    async fn host_get_random(&self, n: usize) -> Result<Vec<Host>>;

    async fn port_get_by_host(&self, host_id: RecordId) -> Result<Vec<Port>>;

    async fn port_add(&self, result: &ScanResult) -> Result<()>;

    async fn zone_get_by_name(&self, zone: &str) -> Result<Option<ZoneTransfer>>;

    /// Persists `xfr`, assigns its id and returns it.
    async fn zone_add(&self, xfr: &mut ZoneTransfer) -> Result<RecordId>;

    /// Records the terminal status and end time of `xfr`.
    async fn zone_finish(&self, xfr: &mut ZoneTransfer, status: XfrStatus) -> Result<()>;
}

/// Remembers which addresses the generator has already tried.
#[async_trait]
pub trait HostCache: Send + Sync {
    async fn has_key(&self, key: &str) -> Result<bool>;

    async fn add_key(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct Tables {
    hosts: Vec<Host>,
    by_address: HashMap<IpAddr, RecordId>,
    ports: HashMap<RecordId, Vec<Port>>,
    zones: HashMap<String, ZoneTransfer>,
    next_id: RecordId,
}

impl Tables {
    fn next_id(&mut self) -> RecordId {
        self.next_id += 1;
        self.next_id
    }
}

/// A `Storage` that lives and dies with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every stored host.
    pub fn hosts(&self) -> Vec<Host> {
        self.tables().hosts.clone()
    }

    /// Snapshot of every stored zone transfer.
    pub fn zones(&self) -> Vec<ZoneTransfer> {
        self.tables().zones.values().cloned().collect()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn host_exists(&self, address: IpAddr) -> Result<bool> {
        Ok(self.tables().by_address.contains_key(&address))
    }

    async fn host_add(&self, host: &mut Host) -> Result<RecordId> {
        let mut tables = self.tables();
        if tables.by_address.contains_key(&host.address) {
            return Err(Error::Storage(format!(
                "host {} is already known",
                host.address
            )));
        }

        let id = tables.next_id();
        host.id = Some(id);
        tables.by_address.insert(host.address, id);
        tables.hosts.push(host.clone());
        Ok(id)
    }

    async fn host_get_random(&self, n: usize) -> Result<Vec<Host>> {
        let mut hosts = self.tables().hosts.clone();
        hosts.shuffle(&mut rand::rng());
        hosts.truncate(n);
        Ok(hosts)
    }

    async fn port_get_by_host(&self, host_id: RecordId) -> Result<Vec<Port>> {
        Ok(self
            .tables()
            .ports
            .get(&host_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn port_add(&self, result: &ScanResult) -> Result<()> {
        let Some(host_id) = result.host.id else {
            return Err(Error::Storage(format!(
                "cannot record port {} of unsaved host {}",
                result.port, result.host.address
            )));
        };

        let mut tables = self.tables();
        let id = tables.next_id();
        tables.ports.entry(host_id).or_default().push(Port {
            id: Some(id),
            host_id,
            port: result.port,
            timestamp: result.stamp,
            reply: result.banner.clone(),
            error: result.error.clone(),
        });
        Ok(())
    }

    async fn zone_get_by_name(&self, zone: &str) -> Result<Option<ZoneTransfer>> {
        Ok(self.tables().zones.get(zone).cloned())
    }

    async fn zone_add(&self, xfr: &mut ZoneTransfer) -> Result<RecordId> {
        let mut tables = self.tables();
        if tables.zones.contains_key(&xfr.zone) {
            return Err(Error::Storage(format!(
                "zone {} was already attempted",
                xfr.zone
            )));
        }

        let id = tables.next_id();
        xfr.id = Some(id);
        tables.zones.insert(xfr.zone.clone(), xfr.clone());
        Ok(id)
    }

    async fn zone_finish(&self, xfr: &mut ZoneTransfer, status: XfrStatus) -> Result<()> {
        xfr.status = status;
        xfr.end = Some(Utc::now());

        let mut tables = self.tables();
        match tables.zones.get_mut(&xfr.zone) {
            Some(stored) => {
                *stored = xfr.clone();
                Ok(())
            }
            None => Err(Error::Storage(format!("unknown zone {}", xfr.zone))),
        }
    }
}

/// A `HostCache` backed by a set.
#[derive(Debug, Default)]
pub struct MemoryCache {
    keys: Mutex<HashSet<String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HostCache for MemoryCache {
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key))
    }

    async fn add_key(&self, key: &str) -> Result<()> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HostSource;

    fn host(addr: &str) -> Host {
        Host::new(addr.parse().unwrap(), "www.krylon.net.", HostSource::User)
    }

    #[tokio::test]
    async fn host_add_assigns_id_and_rejects_duplicates() {
        let db = MemoryStorage::new();
        let mut h = host("198.252.206.16");

        let id = db.host_add(&mut h).await.unwrap();
        assert_eq!(h.id, Some(id));
        assert!(db.host_exists(h.address).await.unwrap());

        let mut again = host("198.252.206.16");
        assert!(db.host_add(&mut again).await.is_err());
        assert!(again.id.is_none());
    }

    #[tokio::test]
    async fn random_hosts_are_bounded() {
        let db = MemoryStorage::new();
        for i in 1..=5 {
            db.host_add(&mut host(&format!("91.198.174.{i}"))).await.unwrap();
        }
        assert_eq!(db.host_get_random(3).await.unwrap().len(), 3);
        assert_eq!(db.host_get_random(50).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn ports_are_kept_per_host() {
        let db = MemoryStorage::new();
        let mut h = host("91.198.174.192");
        let id = db.host_add(&mut h).await.unwrap();

        db.port_add(&ScanResult::new(&h, 80, Some("nginx".into())))
            .await
            .unwrap();
        db.port_add(&ScanResult::failed(&h, 21, "refused"))
            .await
            .unwrap();

        let ports = db.port_get_by_host(id).await.unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].reply_string(), "nginx");
        assert!(ports[1].reply.is_none());
    }

    #[tokio::test]
    async fn port_of_unsaved_host_is_rejected() {
        let db = MemoryStorage::new();
        let res = ScanResult::new(&host("91.198.174.192"), 80, None);
        assert!(db.port_add(&res).await.is_err());
    }

    #[tokio::test]
    async fn zone_lifecycle() {
        let db = MemoryStorage::new();
        let mut xfr = ZoneTransfer::new("krylon.net.");
        db.zone_add(&mut xfr).await.unwrap();
        assert!(xfr.id.is_some());

        db.zone_finish(&mut xfr, XfrStatus::Refused).await.unwrap();
        let stored = db.zone_get_by_name("krylon.net.").await.unwrap().unwrap();
        assert_eq!(stored.status, XfrStatus::Refused);
        assert!(stored.end.is_some());
        assert!(stored.is_finished());
    }

    #[tokio::test]
    async fn cache_remembers_keys() {
        let cache = MemoryCache::new();
        assert!(!cache.has_key("8.8.8.8").await.unwrap());
        cache.add_key("8.8.8.8").await.unwrap();
        assert!(cache.has_key("8.8.8.8").await.unwrap());
        assert_eq!(cache.len(), 1);
    }
}
