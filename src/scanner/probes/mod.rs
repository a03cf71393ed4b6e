//! Protocol probes that pull a banner out of a service.
//!
//! Every probe returns `Ok(Some(banner))`, `Ok(None)` when the service
//! answered without anything worth keeping, or an error. [`Prober::scan`]
//! turns errors into a [`ScanResult`] that carries the error instead of a
//! banner.
mod dns;
mod finger;
mod http;
mod plain;
mod snmp;
pub mod telnet;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use log::debug;
use tokio::net::TcpStream;
use tokio::time;

use crate::error::{Error, Result};
use crate::model::{Host, ScanResult};
use crate::scanner::port_strategy::probe_for;

/// The probes there are. Which one a port gets is decided by
/// [`CANDIDATE_PORTS`](crate::scanner::port_strategy::CANDIDATE_PORTS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    Plain,
    Finger,
    Dns,
    Http,
    Snmp,
    Telnet,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Connect timeout, and read timeout where a probe has no deadline of its own.
    pub timeout: Duration,
    pub finger_timeout: Duration,
    pub http_timeout: Duration,
    pub snmp_community: String,
    pub snmp_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            finger_timeout: Duration::from_secs(5),
            http_timeout: Duration::from_secs(15),
            snmp_community: "public".to_owned(),
            snmp_timeout: Duration::from_secs(5),
        }
    }
}

/// Runs the right probe for a port.
pub struct Prober {
    config: ProbeConfig,
    http: reqwest::Client,
}

impl Prober {
    pub fn new(config: ProbeConfig) -> Result<Self> {
        let http = http::client(config.http_timeout)?;
        Ok(Self { config, http })
    }

    pub async fn probe(&self, host: &Host, port: u16) -> Result<ScanResult> {
        let target = SocketAddr::new(host.address, port);
        let kind = probe_for(port);
        debug!("Probing {target} ({}) with {kind:?}", host.name);

        let banner = match kind {
            ProbeKind::Plain => plain::grab(target, self.config.timeout).await?,
            ProbeKind::Finger => {
                finger::grab(target, self.config.timeout, self.config.finger_timeout).await?
            }
            ProbeKind::Dns => dns::grab(target, self.config.timeout).await?,
            ProbeKind::Http => http::grab(&self.http, target).await?,
            ProbeKind::Snmp => {
                snmp::grab(
                    target,
                    &self.config.snmp_community,
                    self.config.snmp_timeout,
                )
                .await?
            }
            ProbeKind::Telnet => telnet::grab(target, self.config.timeout).await?,
        };

        Ok(ScanResult::new(host, port, banner))
    }

    /// Like [`Prober::probe`], but a failed probe still yields a result.
    pub async fn scan(&self, host: &Host, port: u16) -> ScanResult {
        match self.probe(host, port).await {
            Ok(result) => result,
            Err(e) => {
                debug!("Probe of {}:{port} failed: {e}", host.address);
                ScanResult::failed(host, port, e)
            }
        }
    }
}

/// Awaits `fut` for at most `timeout`.
async fn within<T, E, F>(target: SocketAddr, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    Error: From<E>,
{
    time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::Timeout { target, timeout })?
        .map_err(Error::from)
}

async fn connect(target: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    within(target, timeout, TcpStream::connect(target)).await
}

/// Strips trailing line terminators.
fn chomp(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HostSource;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn chomp_strips_only_line_ends() {
        assert_eq!(chomp("SSH-2.0-OpenSSH_9.2\r\n"), "SSH-2.0-OpenSSH_9.2");
        assert_eq!(chomp(" banner \n\n"), " banner ");
        assert_eq!(chomp(""), "");
    }

    #[tokio::test]
    async fn failed_probe_becomes_a_result() {
        // bind then drop, so nothing listens on the port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = Prober::new(ProbeConfig::default()).unwrap();
        let host = Host::new("127.0.0.1".parse().unwrap(), "localhost.", HostSource::User);
        let res = prober.scan(&host, port).await;

        assert_eq!(res.port, port);
        assert!(res.banner.is_none());
        assert!(res.error.is_some());
    }

    #[tokio::test]
    async fn unknown_port_uses_plain_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"+OK Dovecot ready.\r\n").await.unwrap();
        });

        let prober = Prober::new(ProbeConfig::default()).unwrap();
        let host = Host::new("127.0.0.1".parse().unwrap(), "pop.krylon.net.", HostSource::User);
        let res = prober.scan(&host, port).await;

        assert_eq!(res.reply_string(), "+OK Dovecot ready.");
        assert!(res.error.is_none());
    }
}
