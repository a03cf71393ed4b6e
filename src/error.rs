//! Error type shared by every facility.
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use hickory_resolver::error::ResolveError;
use hickory_resolver::proto::error::ProtoError;
use thiserror::Error;

/// Everything that can go wrong inside the engine.
///
/// None of these are fatal to a pool; workers log them and move on to the
/// next work item.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("DNS lookup failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("DNS message error: {0}")]
    Proto(#[from] ProtoError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid blacklist pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("invalid blacklist network {network:?}: {reason}")]
    Network { network: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("host cache error: {0}")]
    Cache(String),

    #[error("{target} did not answer within {timeout:?}")]
    Timeout { target: SocketAddr, timeout: Duration },

    #[error("{target} closed the connection without sending data")]
    Closed { target: SocketAddr },

    #[error("protocol error talking to {target}: {reason}")]
    Protocol { target: SocketAddr, reason: String },

    #[error("zone transfer of {zone} failed: {reason}")]
    Transfer { zone: String, reason: String },
}

impl Error {
    pub(crate) fn protocol(target: SocketAddr, reason: impl Into<String>) -> Self {
        Self::Protocol {
            target,
            reason: reason.into(),
        }
    }

    pub(crate) fn transfer(zone: &str, reason: impl Into<String>) -> Self {
        Self::Transfer {
            zone: zone.to_owned(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
