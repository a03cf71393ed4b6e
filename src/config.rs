//! Command line options and the optional TOML configuration file.
//!
//! Flags carry the defaults. Values found in the configuration file replace
//! them unless `--no-config` is given.
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde_derive::Deserialize;

use crate::error::Result;
use crate::generator::GeneratorConfig;
use crate::scanner::probes::ProbeConfig;
use crate::scanner::ScannerConfig;
use crate::xfr::XfrConfig;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "reconscan",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
/// Finds hosts on the Internet by random reverse lookups and zone transfers,
/// then grabs service banners from them.
/// WARNING Only point this at networks you are allowed to probe.
pub struct Opts {
    /// Hostnames to seed zone transfers with, comma-delimited.
    #[arg(short, long, value_delimiter = ',')]
    pub seeds: Vec<String>,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,

    /// Directory for zone transfer traces. Defaults to ~/reconscan.d
    #[arg(long, value_parser)]
    pub base_dir: Option<PathBuf>,

    /// A comma-delimited list or file of DNS resolvers.
    #[arg(long)]
    pub resolver: Option<String>,

    /// Number of random-address generator workers.
    #[arg(long, default_value = "4")]
    pub generator_workers: usize,

    /// Number of zone transfer workers.
    #[arg(long, default_value = "2")]
    pub xfr_workers: usize,

    /// Number of scanner workers.
    #[arg(long, default_value = "8")]
    pub scanner_workers: usize,

    /// Generator heartbeat in milliseconds.
    #[arg(long, default_value = "2000")]
    pub generator_heartbeat: u64,

    /// Zone transfer heartbeat in milliseconds.
    #[arg(long, default_value = "2000")]
    pub xfr_heartbeat: u64,

    /// Scanner heartbeat in milliseconds.
    #[arg(long, default_value = "2000")]
    pub scanner_heartbeat: u64,

    /// Capacity of the generator's host queue. Defaults to twice the worker count.
    #[arg(long)]
    pub host_queue: Option<usize>,

    /// Capacity of the zone transfer request queue. Defaults to the worker count.
    #[arg(long)]
    pub xfr_queue: Option<usize>,

    /// Hosts the scanner pulls from storage per round. Defaults to ten per worker.
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Connect and read timeout of the probes, in milliseconds.
    #[arg(short, long, default_value = "10000")]
    pub timeout: u64,

    /// Read deadline of the finger probe, in milliseconds.
    #[arg(long, default_value = "5000")]
    pub finger_timeout: u64,

    /// Timeout of the HTTP probe, in milliseconds.
    #[arg(long, default_value = "15000")]
    pub http_timeout: u64,

    /// Community string of the SNMP probe.
    #[arg(long, default_value = "public")]
    pub snmp_community: String,

    /// Timeout of the SNMP probe, in milliseconds.
    #[arg(long, default_value = "5000")]
    pub snmp_timeout: u64,

    /// Port zone transfers are requested on.
    #[arg(long, default_value = "53")]
    pub xfr_port: u16,
}

impl Opts {
    pub fn read() -> Self {
        Self::parse()
    }

    /// Merges values found within the user configuration file.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            seeds,
            generator_workers,
            xfr_workers,
            scanner_workers,
            generator_heartbeat,
            xfr_heartbeat,
            scanner_heartbeat,
            timeout,
            finger_timeout,
            http_timeout,
            snmp_community,
            snmp_timeout,
            xfr_port
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(base_dir, resolver, host_queue, xfr_queue, batch_size);
    }

    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(default_base_dir)
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            heartbeat: Duration::from_millis(self.generator_heartbeat),
            queue_size: self
                .host_queue
                .unwrap_or(self.generator_workers * 2)
                .max(1),
        }
    }

    pub fn xfr_config(&self) -> XfrConfig {
        XfrConfig {
            heartbeat: Duration::from_millis(self.xfr_heartbeat),
            queue_size: self.xfr_queue.unwrap_or(self.xfr_workers).max(1),
            port: self.xfr_port,
            timeout: Duration::from_millis(self.timeout),
            trace_dir: Some(self.base_dir().join("xfr")),
        }
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            heartbeat: Duration::from_millis(self.scanner_heartbeat),
            batch_size: self
                .batch_size
                .unwrap_or(self.scanner_workers * 10)
                .max(1),
            queue_size: (self.scanner_workers * 2).max(1),
            probes: self.probe_config(),
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            timeout: Duration::from_millis(self.timeout),
            finger_timeout: Duration::from_millis(self.finger_timeout),
            http_timeout: Duration::from_millis(self.http_timeout),
            snmp_community: self.snmp_community.clone(),
            snmp_timeout: Duration::from_millis(self.snmp_timeout),
        }
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            seeds: vec![],
            no_config: true,
            config_path: None,
            base_dir: None,
            resolver: None,
            generator_workers: 4,
            xfr_workers: 2,
            scanner_workers: 8,
            generator_heartbeat: 2000,
            xfr_heartbeat: 2000,
            scanner_heartbeat: 2000,
            host_queue: None,
            xfr_queue: None,
            batch_size: None,
            timeout: 10_000,
            finger_timeout: 5_000,
            http_timeout: 15_000,
            snmp_community: "public".to_owned(),
            snmp_timeout: 5_000,
            xfr_port: 53,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    seeds: Option<Vec<String>>,
    base_dir: Option<PathBuf>,
    resolver: Option<String>,
    generator_workers: Option<usize>,
    xfr_workers: Option<usize>,
    scanner_workers: Option<usize>,
    generator_heartbeat: Option<u64>,
    xfr_heartbeat: Option<u64>,
    scanner_heartbeat: Option<u64>,
    host_queue: Option<usize>,
    xfr_queue: Option<usize>,
    batch_size: Option<usize>,
    timeout: Option<u64>,
    finger_timeout: Option<u64>,
    http_timeout: Option<u64>,
    snmp_community: Option<String>,
    snmp_timeout: Option<u64>,
    xfr_port: Option<u16>,
}

impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing or unreadable file yields an empty config.
    ///
    /// # Format
    ///
    /// generator_workers = 16
    /// scanner_workers = 64
    /// resolver = "1.1.1.1,9.9.9.9"
    /// snmp_community = "public"
    /// base_dir = "/var/lib/reconscan"
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = custom_config_path.unwrap_or_else(default_config_path);
        let content = if config_path.exists() {
            fs::read_to_string(config_path).unwrap_or_default()
        } else {
            String::new()
        };

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> PathBuf {
    let mut config_path = dirs::home_dir().unwrap_or_default();
    config_path.push(".reconscan.toml");
    config_path
}

/// Where traces are written when no base directory is configured.
pub fn default_base_dir() -> PathBuf {
    let mut base_dir = dirs::home_dir().unwrap_or_default();
    base_dir.push("reconscan.d");
    base_dir
}
