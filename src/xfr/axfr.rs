//! The AXFR exchange and the per-zone trace file.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::proto::rr::{DNSClass, Name, Record, RecordType};
use log::{debug, warn};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time;

use crate::dns;
use crate::error::{Error, Result};

/// An open zone transfer. Each call to [`Axfr::next_envelope`] yields the
/// records of one response message, or the error that ended the transfer.
///
/// The stream ends after the closing SOA record, when the server closes
/// the connection, or after the first error.
pub struct Axfr {
    stream: TcpStream,
    zone: String,
    server: SocketAddr,
    timeout: Duration,
    id: u16,
    soa_seen: usize,
    done: bool,
}

impl Axfr {
    /// Connects to `server` and requests the zone.
    pub async fn request(zone: &str, server: SocketAddr, timeout: Duration) -> Result<Self> {
        let name = Name::from_str(zone)?;
        let mut stream = time::timeout(timeout, TcpStream::connect(server))
            .await
            .map_err(|_| Error::Timeout {
                target: server,
                timeout,
            })??;

        let msg = dns::query(name, RecordType::AXFR, DNSClass::IN);
        dns::write_message(&mut stream, &msg).await?;
        debug!("Requested AXFR of {zone} from {server}");

        Ok(Self {
            stream,
            zone: zone.to_owned(),
            server,
            timeout,
            id: msg.id(),
            soa_seen: 0,
            done: false,
        })
    }

    pub async fn next_envelope(&mut self) -> Option<Result<Vec<Record>>> {
        if self.done {
            return None;
        }

        let envelope = self.read_envelope().await;
        match &envelope {
            Some(Ok(_)) => {}
            _ => self.done = true,
        }
        envelope
    }

    async fn read_envelope(&mut self) -> Option<Result<Vec<Record>>> {
        let read = time::timeout(self.timeout, dns::read_message(&mut self.stream)).await;
        let msg = match read {
            Err(_) => {
                return Some(Err(Error::Timeout {
                    target: self.server,
                    timeout: self.timeout,
                }))
            }
            Ok(Err(e)) => return Some(Err(e)),
            Ok(Ok(None)) => return None,
            Ok(Ok(Some(msg))) => msg,
        };

        if msg.id() != self.id {
            return Some(Err(Error::transfer(
                &self.zone,
                format!("{} answered with unexpected id {}", self.server, msg.id()),
            )));
        }

        if msg.response_code() != ResponseCode::NoError {
            return Some(Err(Error::transfer(
                &self.zone,
                format!("{} answered {}", self.server, msg.response_code()),
            )));
        }

        let records = msg.answers().to_vec();
        if records.is_empty() {
            self.done = true;
            return Some(Ok(records));
        }

        self.soa_seen += records
            .iter()
            .filter(|rr| rr.record_type() == RecordType::SOA)
            .count();
        if self.soa_seen >= 2 {
            self.done = true;
        }

        Some(Ok(records))
    }
}

/// Copy of every record received for a zone, one per line.
pub struct Trace {
    path: PathBuf,
    file: File,
    records: usize,
}

/// The trace file name for `zone`. Zone names come off the wire and may
/// carry path separators inside a label.
pub fn file_name(zone: &str) -> String {
    let name: String = zone
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    match name.as_str() {
        "" | "." | ".." => format!("_{name}"),
        _ => name,
    }
}

impl Trace {
    pub async fn create(dir: &Path, zone: &str) -> Result<Self> {
        fs::create_dir_all(dir).await?;
        let path = dir.join(file_name(zone));
        let file = File::create(&path).await?;
        Ok(Self {
            path,
            file,
            records: 0,
        })
    }

    pub async fn record(&mut self, rr: &Record) {
        self.records += 1;
        if let Err(e) = self.file.write_all(format!("{rr}\n").as_bytes()).await {
            debug!("Cannot write to {}: {e}", self.path.display());
        }
    }

    /// Flushes the trace, or deletes it if nothing was recorded.
    pub async fn finish(mut self) {
        if self.records == 0 {
            drop(self.file);
            if let Err(e) = fs::remove_file(&self.path).await {
                warn!("Cannot remove empty trace {}: {e}", self.path.display());
            }
        } else if let Err(e) = self.file.flush().await {
            warn!("Cannot flush trace {}: {e}", self.path.display());
        }
    }
}
