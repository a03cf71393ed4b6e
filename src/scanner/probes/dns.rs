//! Asks a nameserver for `version.bind.` in the CHAOS class.
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use hickory_resolver::proto::rr::{DNSClass, Name, RData, RecordType};

use super::{connect, within};
use crate::dns;
use crate::error::{Error, Result};

pub async fn grab(target: SocketAddr, timeout: Duration) -> Result<Option<String>> {
    let query = dns::query(Name::from_str("version.bind.")?, RecordType::TXT, DNSClass::CH);

    let mut stream = connect(target, timeout).await?;
    let exchange = async {
        dns::write_message(&mut stream, &query).await?;
        dns::read_message(&mut stream).await
    };
    let reply = within(target, timeout, exchange)
        .await?
        .ok_or(Error::Closed { target })?;

    let Some(answer) = reply.answers().first() else {
        return Err(Error::protocol(target, "no answer to version.bind"));
    };

    match answer.data() {
        Some(RData::TXT(txt)) => {
            let text: String = txt
                .iter()
                .map(|part| String::from_utf8_lossy(part).into_owned())
                .collect();
            Ok(Some(text.trim_matches('"').to_owned()))
        }
        _ => Err(Error::protocol(
            target,
            format!("version.bind answered with {}", answer.record_type()),
        )),
    }
}
