//! This crate exposes the internal functionality of the `reconscan`
//! Internet reconnaissance engine.
//!
//! reconscan discovers hosts on the public Internet in two independent ways:
//! resolving random IPv4 addresses back to names, and harvesting whole zones
//! through DNS zone transfers. Every accepted host is then probed on a small
//! set of well-known ports to collect service banners.
//!
//! ## Architecture Overview
//!
//! Three facilities do the work, each running on the same resizable
//! [`Pool`](crate::control::Pool):
//!
//! 1. **Generator**: [`HostGenerator`](crate::generator::HostGenerator) draws
//!    random addresses, drops blacklisted ones, and emits hosts whose reverse
//!    name passes the name blacklist.
//! 2. **Zone transfers**: [`XfrClient`](crate::xfr::XfrClient) derives a zone
//!    from each hostname it is fed, asks the zone's nameservers for an AXFR
//!    and stores every new host in the answer.
//! 3. **Scanner**: [`Scanner`](crate::scanner::Scanner) picks stored hosts,
//!    chooses one unscanned port for each and runs the matching protocol
//!    probe.
//!
//! An orchestrator resizes and stops the pools by writing
//! [`ControlMessage`](crate::control::ControlMessage)s into their control
//! queues. Hosts, ports and zone transfers live behind the
//! [`Storage`](crate::storage::Storage) trait.
//!
//! ## Basic Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use reconscan::scanner::{Scanner, ScannerConfig};
//! use reconscan::storage::MemoryStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = Arc::new(MemoryStorage::new());
//!     let scanner = Scanner::new(ScannerConfig::default(), storage.clone())?;
//!     scanner.start(4);
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     println!("{} hosts known", storage.hosts().len());
//!     Ok(())
//! }
//! ```
#![allow(clippy::needless_doctest_main)]

pub mod blacklist;

pub mod config;

pub mod control;

pub mod dns;

pub mod error;

pub mod generator;

pub mod model;

pub mod resolver;

pub mod scanner;

pub mod storage;

pub mod xfr;
