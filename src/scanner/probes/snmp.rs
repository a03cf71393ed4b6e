//! SNMPv2c `GET sysDescr.0` over UDP.
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use log::debug;
use tokio::net::UdpSocket;
use tokio::time;

use crate::error::Result;

const INTEGER: u8 = 0x02;
const OCTET_STRING: u8 = 0x04;
const NULL: u8 = 0x05;
const OBJECT_IDENTIFIER: u8 = 0x06;
const SEQUENCE: u8 = 0x30;
const GET_REQUEST: u8 = 0xa0;
const GET_RESPONSE: u8 = 0xa2;

const VERSION_2C: u8 = 1;
/// 1.3.6.1.2.1.1.1.0
const SYS_DESCR: [u8; 8] = [0x2b, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00];

/// Waits `timeout` for an answer. Silence is not an error, most hosts
/// simply do not run an agent.
pub async fn grab(target: SocketAddr, community: &str, timeout: Duration) -> Result<Option<String>> {
    let local: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(target).await?;

    let request_id = rand::random::<u32>() & 0x7fff_ffff;
    socket.send(&get_request(community, request_id)).await?;

    let mut buf = vec![0u8; 4096];
    let Ok(received) = time::timeout(timeout, socket.recv(&mut buf)).await else {
        debug!("No SNMP reply from {target}");
        return Ok(None);
    };
    let n = received?;

    let banner = parse_response(&buf[..n], i64::from(request_id));
    if banner.is_none() {
        debug!("Unusable SNMP reply from {target} ({n} bytes)");
    }
    Ok(banner)
}

fn encode_ber_length(len: usize, buf: &mut Vec<u8>) {
    if len < 0x80 {
        #[allow(clippy::cast_possible_truncation)]
        buf.push(len as u8);
        return;
    }
    let bytes: Vec<u8> = len
        .to_be_bytes()
        .into_iter()
        .skip_while(|&b| b == 0)
        .collect();
    #[allow(clippy::cast_possible_truncation)]
    buf.push(0x80 | bytes.len() as u8);
    buf.extend(bytes);
}

fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    encode_ber_length(value.len(), &mut out);
    out.extend_from_slice(value);
    out
}

fn get_request(community: &str, request_id: u32) -> Vec<u8> {
    let varbind = [tlv(OBJECT_IDENTIFIER, &SYS_DESCR), tlv(NULL, &[])].concat();
    let pdu = [
        tlv(INTEGER, &request_id.to_be_bytes()),
        tlv(INTEGER, &[0]),
        tlv(INTEGER, &[0]),
        tlv(SEQUENCE, &tlv(SEQUENCE, &varbind)),
    ]
    .concat();
    let message = [
        tlv(INTEGER, &[VERSION_2C]),
        tlv(OCTET_STRING, community.as_bytes()),
        tlv(GET_REQUEST, &pdu),
    ]
    .concat();
    tlv(SEQUENCE, &message)
}

/// Splits the first element off `buf`, returning its tag, its value and
/// whatever follows it.
fn split_tlv(buf: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let (&tag, rest) = buf.split_first()?;
    let (&first, rest) = rest.split_first()?;

    let (len, rest) = if first & 0x80 == 0 {
        (usize::from(first), rest)
    } else {
        let width = usize::from(first & 0x7f);
        if width == 0 || width > std::mem::size_of::<usize>() || rest.len() < width {
            return None;
        }
        let (digits, rest) = rest.split_at(width);
        let len = digits.iter().fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
        (len, rest)
    };

    if rest.len() < len {
        return None;
    }
    let (value, rest) = rest.split_at(len);
    Some((tag, value, rest))
}

fn take(buf: &[u8], want: u8) -> Option<(&[u8], &[u8])> {
    match split_tlv(buf)? {
        (tag, value, rest) if tag == want => Some((value, rest)),
        _ => None,
    }
}

fn integer(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    let init: i64 = if bytes[0] & 0x80 == 0 { 0 } else { -1 };
    Some(bytes.iter().fold(init, |acc, &b| (acc << 8) | i64::from(b)))
}

/// Pulls the first string value among the varbinds of a GetResponse answering `request_id`.
fn parse_response(buf: &[u8], request_id: i64) -> Option<String> {
    let (message, _) = take(buf, SEQUENCE)?;
    let (_, rest) = take(message, INTEGER)?;
    let (_, rest) = take(rest, OCTET_STRING)?;
    let (pdu, _) = take(rest, GET_RESPONSE)?;

    let (id, rest) = take(pdu, INTEGER)?;
    if integer(id)? != request_id {
        return None;
    }
    let (_, rest) = take(rest, INTEGER)?;
    let (_, rest) = take(rest, INTEGER)?;
    let (mut varbinds, _) = take(rest, SEQUENCE)?;

    while !varbinds.is_empty() {
        let (varbind, next) = take(varbinds, SEQUENCE)?;
        varbinds = next;
        let (_, rest) = take(varbind, OBJECT_IDENTIFIER)?;
        if let Some((value, _)) = take(rest, OCTET_STRING) {
            return Some(String::from_utf8_lossy(value).into_owned());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(request_id: u32, value: &[u8]) -> Vec<u8> {
        let varbind = [tlv(OBJECT_IDENTIFIER, &SYS_DESCR), tlv(OCTET_STRING, value)].concat();
        let pdu = [
            tlv(INTEGER, &request_id.to_be_bytes()),
            tlv(INTEGER, &[0]),
            tlv(INTEGER, &[0]),
            tlv(SEQUENCE, &tlv(SEQUENCE, &varbind)),
        ]
        .concat();
        let message = [
            tlv(INTEGER, &[VERSION_2C]),
            tlv(OCTET_STRING, b"public"),
            tlv(GET_RESPONSE, &pdu),
        ]
        .concat();
        tlv(SEQUENCE, &message)
    }

    #[test]
    fn ber_lengths() {
        let mut buf = Vec::new();
        encode_ber_length(5, &mut buf);
        encode_ber_length(300, &mut buf);
        assert_eq!(buf, [0x05, 0x82, 0x01, 0x2c]);
    }

    #[test]
    fn request_layout() {
        let packet = get_request("public", 0x1234_5678);
        assert_eq!(
            packet,
            [
                0x30, 0x29, 0x02, 0x01, 0x01, 0x04, 0x06, b'p', b'u', b'b', b'l', b'i', b'c', 0xa0,
                0x1c, 0x02, 0x04, 0x12, 0x34, 0x56, 0x78, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30,
                0x0e, 0x30, 0x0c, 0x06, 0x08, 0x2b, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00, 0x05,
                0x00,
            ]
        );
    }

    #[test]
    fn parses_sys_descr() {
        let reply = response(42, b"Linux gw 5.10.0-28-amd64 #1 SMP x86_64");
        assert_eq!(
            parse_response(&reply, 42).as_deref(),
            Some("Linux gw 5.10.0-28-amd64 #1 SMP x86_64")
        );
    }

    #[test]
    fn string_in_a_later_varbind() {
        // sysUpTime.0 as TimeTicks first
        let uptime = [
            tlv(OBJECT_IDENTIFIER, &[0x2b, 6, 1, 2, 1, 1, 3, 0]),
            tlv(0x43, &[0x01, 0x00]),
        ]
        .concat();
        let descr = [
            tlv(OBJECT_IDENTIFIER, &SYS_DESCR),
            tlv(OCTET_STRING, b"RouterOS 7.14"),
        ]
        .concat();
        let pdu = [
            tlv(INTEGER, &[9]),
            tlv(INTEGER, &[0]),
            tlv(INTEGER, &[0]),
            tlv(SEQUENCE, &[tlv(SEQUENCE, &uptime), tlv(SEQUENCE, &descr)].concat()),
        ]
        .concat();
        let message = [
            tlv(INTEGER, &[VERSION_2C]),
            tlv(OCTET_STRING, b"public"),
            tlv(GET_RESPONSE, &pdu),
        ]
        .concat();
        let reply = tlv(SEQUENCE, &message);
        assert_eq!(parse_response(&reply, 9).as_deref(), Some("RouterOS 7.14"));
    }

    #[test]
    fn no_string_value_is_no_banner() {
        let varbind = [tlv(OBJECT_IDENTIFIER, &SYS_DESCR), tlv(NULL, &[])].concat();
        let pdu = [
            tlv(INTEGER, &[3]),
            tlv(INTEGER, &[0]),
            tlv(INTEGER, &[0]),
            tlv(SEQUENCE, &tlv(SEQUENCE, &varbind)),
        ]
        .concat();
        let message = [
            tlv(INTEGER, &[VERSION_2C]),
            tlv(OCTET_STRING, b"public"),
            tlv(GET_RESPONSE, &pdu),
        ]
        .concat();
        assert_eq!(parse_response(&tlv(SEQUENCE, &message), 3), None);
    }

    #[test]
    fn long_values_use_long_lengths() {
        let descr = "x".repeat(200);
        let reply = response(7, descr.as_bytes());
        assert_eq!(parse_response(&reply, 7), Some(descr));
    }

    #[test]
    fn rejects_foreign_or_broken_replies() {
        let reply = response(42, b"Cisco IOS");
        assert_eq!(parse_response(&reply, 43), None);
        assert_eq!(parse_response(&reply[..reply.len() - 3], 42), None);
        assert_eq!(parse_response(&get_request("public", 42), 42), None);
    }

    #[tokio::test]
    async fn asks_a_local_agent() {
        let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = agent.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (n, peer) = agent.recv_from(&mut buf).await.unwrap();
            // request id sits right after the PDU header
            let id = u32::from_be_bytes(buf[17..21].try_into().unwrap());
            assert_eq!(&buf[7..13], b"secret");
            assert!(n > 21);
            agent
                .send_to(&response(id, b"Cisco IOS Software, C2960"), peer)
                .await
                .unwrap();
        });

        let banner = grab(addr, "secret", Duration::from_secs(2)).await.unwrap();
        assert_eq!(banner.as_deref(), Some("Cisco IOS Software, C2960"));
    }

    #[tokio::test]
    async fn silent_agent_is_no_banner() {
        let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = agent.local_addr().unwrap();
        let banner = grab(addr, "public", Duration::from_millis(100)).await.unwrap();
        assert_eq!(banner, None);
        drop(agent);
    }
}
