//! Line-oriented services greet first: read one line.
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

use super::{chomp, connect, within};
use crate::error::{Error, Result};

/// Longest greeting read before the line is cut.
const LINE_LIMIT: u64 = 4096;

pub async fn grab(target: SocketAddr, timeout: Duration) -> Result<Option<String>> {
    let stream = connect(target, timeout).await?;
    let mut reader = BufReader::new(stream).take(LINE_LIMIT);
    let mut line = Vec::new();

    let n = within(target, timeout, reader.read_until(b'\n', &mut line)).await?;
    if n == 0 {
        return Err(Error::Closed { target });
    }

    let line = String::from_utf8_lossy(&line);
    Ok(Some(chomp(&line).to_owned()))
}
