//! Self-organizing blacklists for host names and addresses.
//!
//! Both lists scan their items front to back and stop at the first match.
//! The matching item's hit counter goes up and the list is re-sorted by
//! descending hit count, so the handful of rules that reject most of the
//! Internet (dial-up pools, DSL carriers, reserved ranges) end up in front.
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use cidr_utils::cidr::IpCidr;
use log::debug;
use regex::Regex;

use crate::error::{Error, Result};

/// Networks that are never worth a reverse lookup.
pub const RESERVED_NETWORKS: [&str; 14] = [
    "0.0.0.0/8",
    "10.0.0.0/8",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.2.0/24",
    "192.88.99.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "255.0.0.0/8",
];

/// Name patterns of hosts that are dynamic, unconfigured or otherwise boring.
/// Compiled case-insensitively.
pub const NAME_PATTERNS: [&str; 58] = [
    r"\bdiu?p-?\d*\.",
    r"(?:versanet|telekom|uni-paderborn|upb)\.(?:de|net|com|biz|eu)\.?$",
    r"[.]?nothing[.]",
    r"[.]example[.](?:org|net|com)[.]?$",
    r"[avs]?dsl",
    r"\.in-addr\.",
    r"\.invalid\.?",
    r"\b(?:wireless|wlan|wimax|wan|vpn|vlan)",
    r"\b\d{1,3}.\d{1,3}.\d{1,3}.\d{1,3}\b",
    r"\bincorrect(?:ly)?\b",
    r"\bnot.configured\b",
    r"\bpools?\b",
    r"\bunn?ass?igned\b",
    r"^(?:client|host)(?:-?\d+)?",
    r"^(?:un|not-)(?:known|ass?igned|alloc(?:ated)?|registered|provisioned|used|defined|delegated)",
    r"^[^.]+.$",
    r"^\.$",
    r"^\*",
    r"^\w*eth(?:ernet)[^.]*\.",
    r"^\w\d+\[\-.]",
    r"^customer-",
    r"^customer\.",
    r"^dyn\d+",
    r"^generic-?host",
    r"^h\d+s\d+",
    r"^host\d+\.",
    r"^illegal",
    r"^internal-host",
    r"^ip(?:-?\d+|addr)",
    r"^mobile",
    r"^no(?:-reverse)?-dns",
    r"^(?:no-?)?reverse",
    r"^no.ptr",
    r"^softbank\d+\.bbtec",
    r"^this.ip",
    r"^user-?\d+\.",
    r"aol\.com\.?$",
    r"cable",
    r"dhcp",
    r"dial-?(?:in|up)?",
    r"dyn(?:amic)?[-.0-9]",
    r"dyn(?:amic)ip",
    r"early.registration",
    r"(?:edu)?roam",
    r"localhost",
    r"myvzw\.com",
    r"no-dns(?:-yet)?",
    r"non-routed",
    r"ppp",
    r"rr\.com\.?$",
    r"umts",
    r"wanadoo\.[a-z]{2,3}\.?$",
    r"^\w*[.]$",
    r"reverse-not-set",
    r"uu[.]net[.]?$",
    r"(?:ne|ad)[.]jp[.]?$",
    r"[.](?:cn|mil)[.]?$",
    r"^noname[.]",
];

/// Something a blacklist item can test its input against.
pub trait Rule: Send {
    type Input: ?Sized;

    fn test(&self, input: &Self::Input) -> bool;
}

impl Rule for Regex {
    type Input = str;

    fn test(&self, input: &str) -> bool {
        self.is_match(input)
    }
}

impl Rule for IpCidr {
    type Input = IpAddr;

    fn test(&self, input: &IpAddr) -> bool {
        self.contains(input)
    }
}

/// One rule plus the number of times it has fired.
#[derive(Debug, Clone)]
pub struct BlacklistItem<R> {
    pub rule: R,
    pub hits: u64,
}

/// A self-organizing list of rules guarded by a single mutex.
#[derive(Debug)]
pub struct Blacklist<R> {
    items: Mutex<Vec<BlacklistItem<R>>>,
}

impl<R: Rule> Blacklist<R> {
    fn from_rules(rules: Vec<R>) -> Self {
        Self {
            items: Mutex::new(
                rules
                    .into_iter()
                    .map(|rule| BlacklistItem { rule, hits: 0 })
                    .collect(),
            ),
        }
    }

    /// Returns true if any rule matches. The first matching rule is credited
    /// with a hit and the list is re-ordered before the lock is released.
    pub fn matches(&self, input: &R::Input) -> bool {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(idx) = items.iter().position(|item| item.rule.test(input)) else {
            return false;
        };

        items[idx].hits += 1;
        // stable, so equally hit rules keep their relative order
        items.sort_by(|a, b| b.hits.cmp(&a.hits));
        true
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit counters in current list order.
    pub fn hit_counts(&self) -> Vec<u64> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|item| item.hits)
            .collect()
    }
}

/// Matches resolved host names against regular expressions.
pub type NameBlacklist = Blacklist<Regex>;

/// Matches addresses against CIDR networks.
pub type AddressBlacklist = Blacklist<IpCidr>;

impl NameBlacklist {
    /// Compiles every pattern case-insensitively. Any pattern that fails to
    /// compile fails the whole list.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let rules = patterns
            .iter()
            .map(|p| {
                let pattern = p.as_ref();
                Regex::new(&format!("(?i){pattern}")).map_err(|source| Error::Pattern {
                    pattern: pattern.to_owned(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Compiled name blacklist with {} patterns", rules.len());
        Ok(Self::from_rules(rules))
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(&NAME_PATTERNS)
    }
}

impl AddressBlacklist {
    pub fn new<S: AsRef<str>>(networks: &[S]) -> Result<Self> {
        let rules = networks
            .iter()
            .map(|n| {
                let network = n.as_ref();
                IpCidr::from_str(network).map_err(|e| Error::Network {
                    network: network.to_owned(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Parsed address blacklist with {} networks", rules.len());
        Ok(Self::from_rules(rules))
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(&RESERVED_NETWORKS)
    }

    /// Convenience for callers holding a textual address. Strings that do
    /// not parse as an address never match.
    pub fn matches_str(&self, address: &str) -> bool {
        address
            .parse::<IpAddr>()
            .is_ok_and(|addr| self.matches(&addr))
    }
}
