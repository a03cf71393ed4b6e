//! Picks the next port to scan on a host, and the probe to scan it with.
use std::collections::HashSet;

use rand::seq::SliceRandom;

use crate::model::{Host, HostSource};
use crate::scanner::probes::ProbeKind;

/// Every port the scanner ever looks at, with the probe that handles it.
/// Selection and dispatch both read this table.
pub const CANDIDATE_PORTS: [(u16, ProbeKind); 18] = [
    (21, ProbeKind::Plain),
    (22, ProbeKind::Plain),
    (23, ProbeKind::Telnet),
    (25, ProbeKind::Plain),
    (53, ProbeKind::Dns),
    (79, ProbeKind::Finger),
    (80, ProbeKind::Http),
    (110, ProbeKind::Plain),
    (143, ProbeKind::Plain),
    (161, ProbeKind::Snmp),
    (631, ProbeKind::Http),
    (1024, ProbeKind::Http),
    (4444, ProbeKind::Http),
    (2525, ProbeKind::Plain),
    (5353, ProbeKind::Dns),
    (8000, ProbeKind::Http),
    (8080, ProbeKind::Http),
    (8081, ProbeKind::Http),
];

/// Probe used for ports missing from [`CANDIDATE_PORTS`].
pub const DEFAULT_PROBE: ProbeKind = ProbeKind::Plain;

/// Returned by [`select_port`] when a host has nothing left to scan.
pub const NO_PORT: u16 = 0;

const MAIL_PORTS: [u16; 3] = [25, 110, 143];
const MAIL_PREFIXES: [&str; 5] = ["mx", "mail", "smtp", "pop", "imap"];

pub fn probe_for(port: u16) -> ProbeKind {
    CANDIDATE_PORTS
        .iter()
        .find(|(p, _)| *p == port)
        .map_or(DEFAULT_PROBE, |&(_, kind)| kind)
}

fn has_prefix(name: &str, prefix: &str) -> bool {
    name.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn first_unscanned(ports: &[u16], scanned: &HashSet<u16>) -> Option<u16> {
    ports.iter().copied().find(|p| !scanned.contains(p))
}

/// The port a host's origin or name hints at, if it is still unscanned.
fn hinted_port(host: &Host, scanned: &HashSet<u16>) -> Option<u16> {
    let name = host.name.as_str();

    if host.source == HostSource::MxRecord {
        first_unscanned(&MAIL_PORTS, scanned)
    } else if host.source == HostSource::NsRecord && !scanned.contains(&53) {
        Some(53)
    } else if has_prefix(name, "www") && !scanned.contains(&80) {
        Some(80)
    } else if has_prefix(name, "ftp") && !scanned.contains(&21) {
        Some(21)
    } else if MAIL_PREFIXES.iter().any(|p| has_prefix(name, p)) {
        first_unscanned(&MAIL_PORTS, scanned)
    } else {
        None
    }
}

/// Chooses an unscanned candidate port for `host`. Ports hinted at by the
/// host's origin or name come first, then the candidates in random order.
/// Returns [`NO_PORT`] once every candidate has been scanned.
pub fn select_port(host: &Host, scanned: &HashSet<u16>) -> u16 {
    if let Some(port) = hinted_port(host, scanned) {
        return port;
    }

    let mut ports: Vec<u16> = CANDIDATE_PORTS.iter().map(|&(p, _)| p).collect();
    ports.shuffle(&mut rand::rng());
    first_unscanned(&ports, scanned).unwrap_or(NO_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parameterized::parameterized;

    fn host(name: &str, source: HostSource) -> Host {
        Host::new("198.51.100.1".parse().unwrap(), name, source)
    }

    fn all_ports() -> HashSet<u16> {
        CANDIDATE_PORTS.iter().map(|&(p, _)| p).collect()
    }

    #[test]
    fn candidate_ports_are_unique() {
        let mut ports: Vec<u16> = CANDIDATE_PORTS.iter().map(|&(p, _)| p).collect();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), CANDIDATE_PORTS.len());
        assert!(!ports.contains(&NO_PORT));
    }

    #[parameterized(port = { 23, 21, 22, 25, 110, 143, 2525, 53, 5353, 79, 80, 631, 8081, 161, 3306 }, kind = {
        ProbeKind::Telnet, ProbeKind::Plain, ProbeKind::Plain, ProbeKind::Plain, ProbeKind::Plain,
        ProbeKind::Plain, ProbeKind::Plain, ProbeKind::Dns, ProbeKind::Dns, ProbeKind::Finger,
        ProbeKind::Http, ProbeKind::Http, ProbeKind::Http, ProbeKind::Snmp, ProbeKind::Plain,
    })]
    fn dispatch(port: u16, kind: ProbeKind) {
        assert_eq!(probe_for(port), kind);
    }

    #[test]
    fn www_host_starts_with_http() {
        let h = host("www.example.org", HostSource::User);
        assert_eq!(select_port(&h, &HashSet::new()), 80);
    }

    #[test]
    fn ftp_host_starts_with_ftp() {
        let h = host("FTP.gnu.org.", HostSource::ARecord);
        assert_eq!(select_port(&h, &HashSet::new()), 21);
    }

    #[test]
    fn nameserver_starts_with_dns() {
        let h = host("ns1.debian.org.", HostSource::NsRecord);
        assert_eq!(select_port(&h, &HashSet::new()), 53);
    }

    #[parameterized(scanned = { vec![], vec![25], vec![25, 110] }, want = { 25, 110, 143 })]
    fn mail_exchanger_walks_mail_ports(scanned: Vec<u16>, want: u16) {
        let h = host("smtp.kernel.org.", HostSource::MxRecord);
        let scanned: HashSet<u16> = scanned.into_iter().collect();
        assert_eq!(select_port(&h, &scanned), want);
    }

    #[test]
    fn mail_name_walks_mail_ports() {
        let h = host("imap.krylon.net.", HostSource::Generated);
        assert_eq!(select_port(&h, &HashSet::from([25])), 110);
    }

    #[test]
    fn exhausted_hint_falls_back_to_random() {
        let h = host("www.krylon.net.", HostSource::Generated);
        let port = select_port(&h, &HashSet::from([80]));
        assert_ne!(port, 80);
        assert_ne!(port, NO_PORT);
    }

    #[test]
    fn never_returns_a_scanned_port() {
        let h = host("box.krylon.net.", HostSource::Generated);
        let mut scanned = HashSet::new();
        for _ in 0..CANDIDATE_PORTS.len() {
            let port = select_port(&h, &scanned);
            assert_ne!(port, NO_PORT);
            assert!(scanned.insert(port), "{port} offered twice");
        }
        assert_eq!(scanned, all_ports());
        assert_eq!(select_port(&h, &scanned), NO_PORT);
    }

    #[test]
    fn exhausted_host_yields_sentinel() {
        for source in [HostSource::MxRecord, HostSource::NsRecord, HostSource::User] {
            let h = host("www.mail.example.net.", source);
            assert_eq!(select_port(&h, &all_ports()), NO_PORT);
        }
    }

    #[test]
    fn foreign_scanned_ports_do_not_count() {
        let h = host("box.krylon.net.", HostSource::Generated);
        let mut scanned = all_ports();
        scanned.remove(&8080);
        scanned.insert(443);
        assert_eq!(select_port(&h, &scanned), 8080);
    }
}
