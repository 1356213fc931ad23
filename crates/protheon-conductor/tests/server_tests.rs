//! Conductor lifecycle against the in-memory broker

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use protheon_broker::memory::MemoryBroker;
use protheon_conductor::{run, ConductorConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn test_config(port: u16, emit: bool) -> ConductorConfig {
    let mut config = ConductorConfig::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = port;
    config.server.shutdown_grace_secs = 1;
    config.broker.url = "mem://".to_string();
    config.broker.dial_attempts = 2;
    config.broker.dial_backoff_ms = 5;
    config.emitter.enabled = emit;
    config.emitter.interval_secs = 1;
    config
}

#[tokio::test]
async fn test_emitter_exhaustion_stops_the_conductor() {
    let broker = MemoryBroker::new();
    broker.fail_next_connects(u32::MAX);
    let cancel = CancellationToken::new();

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        run(test_config(0, true), broker.transport(), cancel.clone()),
    )
    .await
    .expect("conductor should stop on its own");

    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("Gave up connecting"));
    assert_eq!(broker.connect_attempts(), 2);
    assert!(cancel.is_cancelled());
}

#[tokio::test]
async fn test_bind_failure_returns_before_background_tasks_start() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();

    let broker = MemoryBroker::new();
    let cancel = CancellationToken::new();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        run(test_config(port, true), broker.transport(), cancel.clone()),
    )
    .await
    .expect("bind failure should return immediately");

    assert!(format!("{:#}", result.unwrap_err()).contains("Failed to bind"));

    // The emitter never ran, so nothing dialed the broker
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.connect_attempts(), 0);
    assert!(!cancel.is_cancelled());
}

#[tokio::test]
async fn test_healthy_conductor_stops_cleanly_on_cancel() {
    let broker = MemoryBroker::new();
    let cancel = CancellationToken::new();

    let server = tokio::spawn(run(test_config(0, true), broker.transport(), cancel.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!server.is_finished());
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("conductor should drain")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(broker.connect_attempts(), 1);
}
