//! Concurrent producers over the in-memory broker

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use protheon_broker::memory::{MemoryBroker, MemorySession, MemoryTransport};
use protheon_broker::{BrokerError, DeliveryStream, MessageProperties, Session, Transport};
use protheon_producer::{run, run_producers, ClaimSet, FileFinder, ProducerConfig, RunSummary};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const QUEUE: &str = "pgcr_jobs";

fn pgcr_line(instance_id: u64) -> String {
    format!(r#"{{"activityDetails":{{"instanceId":"{instance_id}"}},"entries":[]}}"#)
}

/// Write `files` zstd files of `per_file` records each, ids unique across files
fn write_fixture(dir: &Path, files: u64, per_file: u64) {
    for file in 0..files {
        let lines: Vec<String> = (0..per_file)
            .map(|i| pgcr_line(file * 1_000 + i))
            .collect();
        let compressed = zstd::encode_all(lines.join("\n").as_bytes(), 3).unwrap();
        std::fs::write(dir.join(format!("pgcr-{file:02}.zst")), compressed).unwrap();
    }
}

fn config_for(dir: &Path, concurrency: usize) -> ProducerConfig {
    ProducerConfig {
        broker_url: "mem://".to_string(),
        queue: QUEUE.to_string(),
        concurrency,
        dial_attempts: 2,
        dial_backoff_ms: 5,
        ..ProducerConfig::new(dir)
    }
}

fn published_ids(broker: &MemoryBroker) -> Vec<String> {
    broker
        .ready_messages(QUEUE)
        .iter()
        .map(|m| {
            let value: serde_json::Value = serde_json::from_slice(&m.body).unwrap();
            value["activityDetails"]["instanceId"].as_str().unwrap().to_string()
        })
        .collect()
}

/// Memory transport whose broker restarts right after the n-th publish
#[derive(Clone)]
struct RestartingTransport {
    broker: MemoryBroker,
    inner: MemoryTransport,
    publishes: Arc<AtomicUsize>,
    restart_after: usize,
    /// Keep the broker down after the restart
    stay_down: bool,
}

impl RestartingTransport {
    fn new(broker: &MemoryBroker, restart_after: usize) -> Self {
        Self {
            broker: broker.clone(),
            inner: broker.transport(),
            publishes: Arc::new(AtomicUsize::new(0)),
            restart_after,
            stay_down: false,
        }
    }
}

struct RestartingSession {
    transport: RestartingTransport,
    inner: MemorySession,
}

#[async_trait]
impl Transport for RestartingTransport {
    type Session = RestartingSession;

    async fn connect(&self, endpoint: &str) -> Result<RestartingSession, BrokerError> {
        Ok(RestartingSession {
            transport: self.clone(),
            inner: self.inner.connect(endpoint).await?,
        })
    }
}

#[async_trait]
impl Session for RestartingSession {
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.inner.declare_queue(queue).await
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), BrokerError> {
        self.inner.publish(queue, payload, properties).await?;
        let published = self.transport.publishes.fetch_add(1, Ordering::SeqCst) + 1;
        if published == self.transport.restart_after {
            if self.transport.stay_down {
                self.transport.broker.fail_next_connects(u32::MAX);
            }
            self.transport.broker.sever_connections();
        }
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        self.inner.set_prefetch(count).await
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError> {
        self.inner.consume(queue, consumer_tag).await
    }

    async fn close(self) -> Result<(), BrokerError> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_each_file_is_produced_exactly_once() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path(), 6, 25);

    let broker = MemoryBroker::new();
    let claims = Arc::new(FileFinder::new(dir.path()).find_by_extension(".zst").unwrap());

    let summary = run_producers(
        claims.clone(),
        broker.transport(),
        &config_for(dir.path(), 4),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(
        summary,
        RunSummary {
            files_completed: 6,
            files_failed: 0,
            records_published: 150,
            cancelled: false
        }
    );
    assert!(claims.is_finished());

    let ids = published_ids(&broker);
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), 150);
    assert_eq!(unique.len(), 150);
    assert_eq!(broker.open_sessions(), 0);
}

#[tokio::test]
async fn test_more_producers_than_files() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path(), 2, 3);

    let broker = MemoryBroker::new();
    let claims = Arc::new(FileFinder::new(dir.path()).find_by_extension(".zst").unwrap());

    let summary = run_producers(
        claims.clone(),
        broker.transport(),
        &config_for(dir.path(), 8),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.files_completed, 2);
    assert_eq!(summary.records_published, 6);
    assert_eq!(broker.connect_attempts(), 2);
}

#[tokio::test]
async fn test_bad_file_does_not_stop_its_siblings() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path(), 3, 4);
    std::fs::write(dir.path().join("pgcr-99.zst"), b"not compressed").unwrap();

    let broker = MemoryBroker::new();
    let claims = Arc::new(FileFinder::new(dir.path()).find_by_extension(".zst").unwrap());

    let summary = run_producers(
        claims.clone(),
        broker.transport(),
        &config_for(dir.path(), 2),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.files_completed, 3);
    assert_eq!(summary.files_failed, 1);
    assert_eq!(broker.ready_count(QUEUE), 12);

    let progress = claims.progress();
    assert_eq!(progress.started, 4);
    assert_eq!(progress.done, 3);
    assert!(!claims.get("pgcr-99.zst").unwrap().done);
}

#[tokio::test]
async fn test_connector_exhaustion_fails_the_run() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path(), 3, 2);

    let broker = MemoryBroker::new();
    broker.fail_next_connects(u32::MAX);
    let claims = Arc::new(FileFinder::new(dir.path()).find_by_extension(".zst").unwrap());

    let result = run_producers(
        claims.clone(),
        broker.transport(),
        &config_for(dir.path(), 1),
        &CancellationToken::new(),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(broker.connect_attempts(), 2);
    assert_eq!(claims.progress().started, 0);
}

#[tokio::test]
async fn test_lost_session_redials_and_redoes_the_interrupted_file() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path(), 4, 3);

    let broker = MemoryBroker::new();
    let claims = Arc::new(FileFinder::new(dir.path()).find_by_extension(".zst").unwrap());

    let summary = run_producers(
        claims.clone(),
        RestartingTransport::new(&broker, 3),
        &config_for(dir.path(), 1),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(
        summary,
        RunSummary {
            files_completed: 4,
            files_failed: 0,
            records_published: 12,
            cancelled: false
        }
    );
    assert_eq!(broker.connect_attempts(), 2);
    assert!(claims.is_finished());

    let ids = published_ids(&broker);
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), 12);
    assert_eq!(unique.len(), 12);
    assert_eq!(broker.open_sessions(), 0);
}

#[tokio::test]
async fn test_lost_session_with_exhausted_redial_fails_the_run() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path(), 4, 3);

    let broker = MemoryBroker::new();
    let claims = Arc::new(FileFinder::new(dir.path()).find_by_extension(".zst").unwrap());

    let transport = RestartingTransport {
        stay_down: true,
        ..RestartingTransport::new(&broker, 3)
    };

    let result = run_producers(
        claims.clone(),
        transport,
        &config_for(dir.path(), 1),
        &CancellationToken::new(),
    )
    .await;

    assert!(result.is_err());
    // One good dial, then two refused re-dials
    assert_eq!(broker.connect_attempts(), 3);
    let progress = claims.progress();
    assert_eq!(progress.done, 1);
    assert_eq!(progress.started, 1, "interrupted file must be released");
}

#[tokio::test]
async fn test_cancelled_run_claims_nothing() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path(), 3, 2);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let broker = MemoryBroker::new();
    let claims = Arc::new(FileFinder::new(dir.path()).find_by_extension(".zst").unwrap());

    let summary = run_producers(
        claims.clone(),
        broker.transport(),
        &config_for(dir.path(), 2),
        &cancel,
    )
    .await
    .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.records_published, 0);
    assert_eq!(claims.progress().started, 0);
}

#[tokio::test]
async fn test_empty_claim_set_is_a_no_op() {
    let broker = MemoryBroker::new();
    let dir = TempDir::new().unwrap();

    let summary = run_producers(
        Arc::new(ClaimSet::new()),
        broker.transport(),
        &config_for(dir.path(), 4),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary, RunSummary::default());
    assert_eq!(broker.connect_attempts(), 0);
}

#[tokio::test]
async fn test_run_scans_nested_dirs_and_skips_hidden_ones() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("2024/03");
    let hidden = dir.path().join(".partial");
    std::fs::create_dir_all(&nested).unwrap();
    std::fs::create_dir_all(&hidden).unwrap();
    write_fixture(&nested, 2, 5);
    write_fixture(&hidden, 1, 5);

    let broker = MemoryBroker::new();
    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        run(
            config_for(dir.path(), 2),
            broker.transport(),
            CancellationToken::new(),
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.files_completed, 2);
    assert_eq!(summary.records_published, 10);
    assert_eq!(broker.ready_count(QUEUE), 10);
}

#[tokio::test]
async fn test_run_rejects_missing_root() {
    let dir = TempDir::new().unwrap();
    let broker = MemoryBroker::new();

    let result = run(
        config_for(&dir.path().join("absent"), 2),
        broker.transport(),
        CancellationToken::new(),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(broker.connect_attempts(), 0);
}
