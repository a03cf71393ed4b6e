//! The `reconscan` binary: runs all three facilities against in-memory
//! storage until Ctrl-C.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time;

use reconscan::blacklist::{AddressBlacklist, NameBlacklist};
use reconscan::config::{Config, Opts};
use reconscan::control::{ControlMessage, Pool, Worker};
use reconscan::generator::HostGenerator;
use reconscan::model::{Host, HostSource};
use reconscan::resolver::{DnsResolver, Resolve};
use reconscan::scanner::Scanner;
use reconscan::storage::{MemoryCache, MemoryStorage, Storage};
use reconscan::xfr::XfrClient;

/// How long shutdown waits for workers to notice.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut opts = Opts::read();
    let config = Config::read(opts.config_path.clone()).context("cannot read configuration")?;
    opts.merge(&config);

    debug!("Main() `opts` arguments are {opts:?}");

    let names = Arc::new(NameBlacklist::with_defaults()?);
    let addresses = Arc::new(AddressBlacklist::with_defaults()?);
    let storage = Arc::new(MemoryStorage::new());
    let cache = Arc::new(MemoryCache::new());
    let resolver: Arc<dyn Resolve> = Arc::new(DnsResolver::new(opts.resolver.as_deref()).await);

    let (generator, generated) = HostGenerator::new(
        &opts.generator_config(),
        Arc::clone(&names),
        Arc::clone(&addresses),
        cache,
        Arc::clone(&resolver),
    );
    let (xfr, xfr_requests) = XfrClient::new(
        opts.xfr_config(),
        names,
        addresses,
        storage.clone(),
        Arc::clone(&resolver),
    );
    let scanner = Scanner::new(opts.scanner_config(), storage.clone())?;

    xfr.start(opts.xfr_workers);
    scanner.start(opts.scanner_workers);
    generator.start(opts.generator_workers);

    let forward = tokio::spawn(forward_hosts(
        generated,
        storage.clone(),
        xfr_requests.clone(),
    ));

    for seed in &opts.seeds {
        if let Err(e) = add_seed(seed, resolver.as_ref(), storage.as_ref()).await {
            warn!("Cannot add seed {seed}: {e}");
        }
        xfr_requests
            .send(seed.clone())
            .await
            .context("zone transfer queue closed")?;
    }

    println!(
        "{}",
        format!(
            "Running {} generator, {} zone transfer and {} scanner workers. Ctrl-C to stop.",
            generator.count(),
            xfr.count(),
            scanner.count()
        )
        .green()
    );

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for Ctrl-C")?;
    println!("{}", "Shutting down".yellow());

    forward.abort();
    shutdown(&*generator).await;
    shutdown(&*xfr).await;
    shutdown(&*scanner).await;
    scanner.stop();

    report(storage.as_ref()).await?;
    Ok(())
}

/// Stores every generated host and asks for a zone transfer of its zone.
async fn forward_hosts(
    mut generated: mpsc::Receiver<Host>,
    storage: Arc<MemoryStorage>,
    xfr_requests: mpsc::Sender<String>,
) {
    while let Some(mut host) = generated.recv().await {
        if let Err(e) = storage.host_add(&mut host).await {
            debug!("Not storing {}: {e}", host.address);
            continue;
        }
        info!("New host {} ({})", host.name, host.address);
        if xfr_requests.send(host.name).await.is_err() {
            return;
        }
    }
}

async fn add_seed(
    name: &str,
    resolver: &dyn Resolve,
    storage: &dyn Storage,
) -> reconscan::error::Result<()> {
    for address in resolver.addresses(name).await? {
        if storage.host_exists(address).await? {
            continue;
        }
        let mut host = Host::new(address, name, HostSource::User);
        storage.host_add(&mut host).await?;
    }
    Ok(())
}

async fn shutdown<W: Worker>(pool: &Pool<W>) {
    pool.send(ControlMessage::Shutdown).await;
    let drained = time::timeout(SHUTDOWN_GRACE, async {
        while pool.count() > 0 {
            time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            "{} pool still has {} workers after {SHUTDOWN_GRACE:?}",
            pool.facility(),
            pool.count()
        );
    }
}

async fn report(storage: &MemoryStorage) -> Result<()> {
    let hosts = storage.hosts();
    let zones = storage.zones();
    println!(
        "{} hosts, {} zone transfers",
        hosts.len().to_string().cyan(),
        zones.len().to_string().cyan()
    );

    for zone in &zones {
        println!("  {} {}", zone.zone, zone.status.to_string().dimmed());
    }

    for host in &hosts {
        let Some(id) = host.id else { continue };
        for port in storage.port_get_by_host(id).await? {
            if let Some(reply) = &port.reply {
                println!(
                    "Banner {}:{} ({}) {}",
                    host.address,
                    port.port,
                    host.name,
                    reply.purple()
                );
            }
        }
    }
    Ok(())
}
