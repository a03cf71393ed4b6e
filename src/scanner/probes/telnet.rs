//! Telnet option negotiation, just far enough to get the login banner.
//!
//! Servers usually open with a burst of `IAC` commands. We answer with a
//! fixed set of refusals, then keep declining whatever else is offered
//! until the first byte of plain text shows up.
use std::net::SocketAddr;
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{chomp, connect, within};
use crate::error::{Error, Result};

pub const IAC: u8 = 0xff;
pub const DONT: u8 = 0xfe;
pub const DO: u8 = 0xfd;
pub const WONT: u8 = 0xfc;
pub const WILL: u8 = 0xfb;
pub const SB: u8 = 0xfa;
pub const SE: u8 = 0xf0;

/// Sent once after the server's first burst.
pub const PROBE: [u8; 18] = [
    IAC, WONT, 0x25, // authentication
    IAC, DO, 0x03, // suppress go ahead
    IAC, WONT, 0x18, // terminal type
    IAC, WONT, 0x1f, // window size
    IAC, WONT, 0x20, // terminal speed
    IAC, WILL, 0x22, // linemode
];

/// Reads before giving up on a server that never stops negotiating.
const MAX_ROUNDS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    ReadingNegotiation,
    TextFound,
}

/// What the negotiator wants next.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    /// All input was negotiation. Send `reply` and read again.
    NeedMore { reply: Vec<u8> },
    /// Plain text started. `reply` still answers whatever preceded it.
    Text { reply: Vec<u8>, text: Vec<u8> },
}

#[derive(Debug)]
pub struct Negotiator {
    state: State,
    /// An incomplete command left over from the previous read.
    pending: Vec<u8>,
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new()
    }
}

impl Negotiator {
    pub const fn new() -> Self {
        Self {
            state: State::ReadingNegotiation,
            pending: Vec::new(),
        }
    }

    pub const fn state(&self) -> State {
        self.state
    }

    /// Consumes the next chunk read from the server.
    pub fn feed(&mut self, data: &[u8]) -> Step {
        self.pending.extend_from_slice(data);
        let buf = std::mem::take(&mut self.pending);

        let mut reply = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            if buf[pos] != IAC && buf[pos] >= 0x80 {
                // stray high byte between commands
                pos += 1;
                continue;
            }
            if buf[pos] != IAC {
                self.state = State::TextFound;
                return Step::Text {
                    reply,
                    text: buf[pos..].to_vec(),
                };
            }

            let Some(&command) = buf.get(pos + 1) else {
                break;
            };
            match command {
                WILL | WONT | DO | DONT => {
                    let Some(&option) = buf.get(pos + 2) else {
                        break;
                    };
                    let refusal = if matches!(command, WILL | WONT) { DONT } else { WONT };
                    reply.extend_from_slice(&[IAC, refusal, option]);
                    pos += 3;
                }
                SB => {
                    let end = buf[pos + 2..]
                        .windows(2)
                        .position(|w| w == [IAC, SE]);
                    match end {
                        Some(offset) => pos += 2 + offset + 2,
                        None => break,
                    }
                }
                IAC => {
                    // escaped 0xff is data
                    self.state = State::TextFound;
                    return Step::Text {
                        reply,
                        text: buf[pos + 1..].to_vec(),
                    };
                }
                _ => pos += 2,
            }
        }

        self.pending = buf[pos..].to_vec();
        Step::NeedMore { reply }
    }
}

/// Turns the text that followed negotiation into a banner: leading
/// unprintable bytes are skipped, the text ends at the first NUL.
pub fn banner_from(text: &[u8]) -> Option<String> {
    let start = text.iter().position(u8::is_ascii_graphic)?;
    let text = &text[start..];
    let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());

    let banner = String::from_utf8_lossy(&text[..end]);
    let banner = chomp(&banner);
    if banner.is_empty() {
        None
    } else {
        Some(banner.to_owned())
    }
}

async fn read_some(
    stream: &mut TcpStream,
    buf: &mut [u8],
    target: SocketAddr,
    timeout: Duration,
) -> Result<usize> {
    let n = within(target, timeout, stream.read(buf)).await?;
    if n == 0 {
        return Err(Error::Closed { target });
    }
    Ok(n)
}

pub async fn grab(target: SocketAddr, timeout: Duration) -> Result<Option<String>> {
    let mut stream = connect(target, timeout).await?;
    let mut buf = vec![0u8; 4096];
    let mut negotiator = Negotiator::new();

    let mut n = read_some(&mut stream, &mut buf, target, timeout).await?;
    within(target, timeout, stream.write_all(&PROBE)).await?;

    for round in 0..MAX_ROUNDS {
        match negotiator.feed(&buf[..n]) {
            Step::Text { text, .. } => {
                debug!("Telnet text from {target} after {} round(s)", round + 1);
                return Ok(banner_from(&text));
            }
            Step::NeedMore { reply } => {
                if !reply.is_empty() {
                    within(target, timeout, stream.write_all(&reply)).await?;
                }
            }
        }
        n = read_some(&mut stream, &mut buf, target, timeout).await?;
    }

    Err(Error::protocol(
        target,
        format!("no text after {MAX_ROUNDS} negotiation rounds"),
    ))
}
