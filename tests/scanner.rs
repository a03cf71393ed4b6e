use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use reconscan::model::{Host, HostSource, ScanResult};
use reconscan::scanner::port_strategy::{select_port, CANDIDATE_PORTS, NO_PORT};
use reconscan::scanner::probes::{ProbeConfig, Prober};
use reconscan::scanner::{Scanner, ScannerConfig};
use reconscan::storage::{MemoryStorage, Storage};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::time;

fn loopback(name: &str) -> Host {
    Host::new(IpAddr::from([127, 0, 0, 1]), name, HostSource::User)
}

fn fast_probes() -> ProbeConfig {
    ProbeConfig {
        timeout: Duration::from_millis(300),
        finger_timeout: Duration::from_millis(300),
        http_timeout: Duration::from_millis(300),
        snmp_community: "public".to_owned(),
        snmp_timeout: Duration::from_millis(300),
    }
}

#[test]
fn www_host_gets_port_80_first() {
    let host = Host::new(
        "93.184.216.34".parse().unwrap(),
        "www.example.org",
        HostSource::User,
    );
    assert_eq!(select_port(&host, &HashSet::new()), 80);
}

#[tokio::test]
async fn prober_reads_greeting_of_unlisted_port() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"SSH-2.0-OpenSSH_9.6p1 Debian-4\r\n")
            .await
            .unwrap();
    });

    let prober = Prober::new(fast_probes()).unwrap();
    let res = prober.probe(&loopback("shell.krylon.net."), port).await.unwrap();
    assert_eq!(res.reply_string(), "SSH-2.0-OpenSSH_9.6p1 Debian-4");
}

#[tokio::test]
async fn scanner_finishes_the_last_port_and_stops_offering() {
    let storage = Arc::new(MemoryStorage::new());
    let mut host = loopback("box.krylon.net.");
    storage.host_add(&mut host).await.unwrap();
    let host_id = host.id.unwrap();

    for &(port, _) in &CANDIDATE_PORTS {
        if port != 8081 {
            storage
                .port_add(&ScanResult::new(&host, port, None))
                .await
                .unwrap();
        }
    }
    let scanned: HashSet<u16> = storage
        .port_get_by_host(host_id)
        .await
        .unwrap()
        .iter()
        .map(|p| p.port)
        .collect();
    assert_eq!(select_port(&host, &scanned), 8081);

    let config = ScannerConfig {
        heartbeat: Duration::from_millis(20),
        batch_size: 8,
        queue_size: 4,
        probes: fast_probes(),
    };
    let scanner = Scanner::new(config, storage.clone()).unwrap();
    scanner.start(2);

    time::timeout(Duration::from_secs(10), async {
        while storage.port_get_by_host(host_id).await.unwrap().len() < CANDIDATE_PORTS.len() {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // every candidate is done now, nothing else may be queued
    time::sleep(Duration::from_millis(200)).await;
    scanner.stop();

    let ports = storage.port_get_by_host(host_id).await.unwrap();
    assert_eq!(ports.len(), CANDIDATE_PORTS.len());
    let last = ports.iter().find(|p| p.port == 8081).unwrap();
    assert!(last.reply.is_none());
    assert_eq!(scanner.in_flight(), 0);
    assert_eq!(
        select_port(&host, &ports.iter().map(|p| p.port).collect()),
        NO_PORT
    );
}
