//! Values that flow between the acquisition facilities, the scanner and storage.
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};

/// Identifier handed out by storage.
pub type RecordId = i64;

/// The moving parts of the engine. Used to name pools and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facility {
    Generator,
    Scanner,
    Xfr,
}

impl Facility {
    pub const fn all() -> [Self; 3] {
        [Self::Generator, Self::Scanner, Self::Xfr]
    }
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Generator => "Generator",
            Self::Scanner => "Scanner",
            Self::Xfr => "XFR",
        };
        f.write_str(name)
    }
}

/// How a host ended up in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostSource {
    User,
    Generated,
    ARecord,
    MxRecord,
    NsRecord,
}

impl fmt::Display for HostSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::User => "User",
            Self::Generated => "Generated",
            Self::ARecord => "A-record",
            Self::MxRecord => "MX-record",
            Self::NsRecord => "NS-record",
        };
        f.write_str(name)
    }
}

/// A host somewhere on the Internet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Absent until storage has accepted the host.
    pub id: Option<RecordId>,
    pub address: IpAddr,
    pub name: String,
    pub source: HostSource,
    pub added: DateTime<Utc>,
}

impl Host {
    pub fn new(address: IpAddr, name: impl Into<String>, source: HostSource) -> Self {
        Self {
            id: None,
            address,
            name: name.into(),
            source,
            added: Utc::now(),
        }
    }
}

/// A port that has already been scanned on a host, as storage reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: Option<RecordId>,
    pub host_id: RecordId,
    pub port: u16,
    pub timestamp: DateTime<Utc>,
    pub reply: Option<String>,
    /// Why the probe failed, if it did.
    pub error: Option<String>,
}

impl Port {
    pub fn reply_string(&self) -> &str {
        self.reply.as_deref().unwrap_or_default()
    }
}

/// A host together with every port already scanned on it.
#[derive(Debug, Clone)]
pub struct HostWithPorts {
    pub host: Host,
    pub ports: Vec<Port>,
}

/// A request to probe one port on one host.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub host: Host,
    pub port: u16,
}

/// Outcome of a single (host, port) scan attempt.
///
/// `banner == None && error == None` means the probe completed but learned
/// nothing; a failed probe carries its error message instead.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub host: Host,
    pub port: u16,
    pub banner: Option<String>,
    pub stamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl ScanResult {
    pub fn new(host: &Host, port: u16, banner: Option<String>) -> Self {
        Self {
            host: host.clone(),
            port,
            banner,
            stamp: Utc::now(),
            error: None,
        }
    }

    /// Records a probe that failed, so the port is not offered again.
    pub fn failed(host: &Host, port: u16, error: impl fmt::Display) -> Self {
        Self {
            host: host.clone(),
            port,
            banner: None,
            stamp: Utc::now(),
            error: Some(error.to_string()),
        }
    }

    pub fn host_name(&self) -> &str {
        &self.host.name
    }

    pub const fn address(&self) -> IpAddr {
        self.host.address
    }

    pub fn reply_string(&self) -> &str {
        self.banner.as_deref().unwrap_or_default()
    }
}

/// Lifecycle of a zone transfer. `Unfinished` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum XfrStatus {
    Unfinished,
    Success,
    Refused,
    Abort,
}

impl fmt::Display for XfrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unfinished => "Unfinished",
            Self::Success => "Finished/Success",
            Self::Refused => "Finished/Refused",
            Self::Abort => "Finished/Aborted",
        };
        f.write_str(name)
    }
}

/// Bookkeeping for one attempted zone transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneTransfer {
    pub id: Option<RecordId>,
    pub zone: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub status: XfrStatus,
}

impl ZoneTransfer {
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            id: None,
            zone: zone.into(),
            start: Utc::now(),
            end: None,
            status: XfrStatus::Unfinished,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != XfrStatus::Unfinished
    }
}
