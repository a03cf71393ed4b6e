//! The DNS lookups the facilities depend on.
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use async_trait::async_trait;
use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    TokioAsyncResolver,
};
use itertools::Itertools;
use log::debug;
use tokio::{fs, io};

use crate::error::Result;

/// Reverse, nameserver and address lookups. Names are fully qualified and
/// keep their trailing dot.
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Names pointing back at `address`. Empty if there are none.
    async fn reverse(&self, address: IpAddr) -> Result<Vec<String>>;

    /// Nameserver names of `zone`.
    async fn nameservers(&self, zone: &str) -> Result<Vec<String>>;

    /// Addresses `name` resolves to.
    async fn addresses(&self, name: &str) -> Result<Vec<IpAddr>>;
}

/// [`Resolve`] backed by hickory.
pub struct DnsResolver {
    inner: TokioAsyncResolver,
}

impl DnsResolver {
    /// Builds a resolver from a comma-delimited list of server addresses or
    /// a file holding one address per line. Without one, the system
    /// configuration is used, falling back to Cloudflare.
    pub async fn new(resolver: Option<&str>) -> Self {
        let inner = match resolver {
            Some(r) => {
                let config = config_for(&resolver_ips(r).await);
                TokioAsyncResolver::tokio(config, ResolverOpts::default())
            }
            None => TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
                TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
            }),
        };

        Self { inner }
    }
}

/// Asks each of `ips` over UDP port 53.
fn config_for(ips: &[IpAddr]) -> ResolverConfig {
    let mut config = ResolverConfig::new();
    for &ip in ips {
        config.add_name_server(NameServerConfig::new(
            SocketAddr::new(ip, 53),
            Protocol::Udp,
        ));
    }
    config
}

/// A lookup that found nothing is an empty answer, not a failure.
fn empty_on_no_records<T>(res: std::result::Result<Vec<T>, ResolveError>) -> Result<Vec<T>> {
    match res {
        Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(Vec::new()),
        other => Ok(other?),
    }
}

#[async_trait]
impl Resolve for DnsResolver {
    async fn reverse(&self, address: IpAddr) -> Result<Vec<String>> {
        let res = self
            .inner
            .reverse_lookup(address)
            .await
            .map(|lookup| lookup.iter().map(|ptr| ptr.0.to_string()).collect());
        empty_on_no_records(res)
    }

    async fn nameservers(&self, zone: &str) -> Result<Vec<String>> {
        let res = self
            .inner
            .ns_lookup(zone)
            .await
            .map(|lookup| lookup.iter().map(|ns| ns.0.to_string()).collect());
        empty_on_no_records(res)
    }

    async fn addresses(&self, name: &str) -> Result<Vec<IpAddr>> {
        let res = self
            .inner
            .lookup_ip(name)
            .await
            .map(|lookup| lookup.iter().unique().collect());
        empty_on_no_records(res)
    }
}

/// Reads resolver addresses from the file at `list`, or parses `list` as a
/// comma-delimited list when it is not a readable file.
async fn resolver_ips(list: &str) -> Vec<IpAddr> {
    match read_resolver_from_file(list).await {
        Ok(ips) => ips,
        Err(e) => {
            debug!("{list} is not a resolver file ({e}), reading it as a list");
            list.split(',')
                .filter_map(|r| IpAddr::from_str(r.trim()).ok())
                .collect()
        }
    }
}

/// Parses an input file of IPs for use in DNS resolution.
async fn read_resolver_from_file(path: &str) -> io::Result<Vec<IpAddr>> {
    let ips = fs::read_to_string(path)
        .await?
        .lines()
        .filter_map(|line| IpAddr::from_str(line.trim()).ok())
        .collect();

    Ok(ips)
}
