//! Producer pipeline against real zstd files

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use protheon_broker::memory::MemoryBroker;
use protheon_broker::{BrokerError, MessagePublisher, QueuePublisher, Transport};
use protheon_producer::{PgcrProducer, ProduceReport, ProducerError};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn pgcr_line(instance_id: u64) -> String {
    format!(
        r#"{{"period":"2024-03-01T18:22:05Z","activityDetails":{{"instanceId":"{instance_id}","mode":4}},"entries":[]}}"#
    )
}

fn write_zst(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, zstd::encode_all(contents, 3).unwrap()).unwrap();
    path
}

/// Records every payload; optionally cancels after a number of publishes
#[derive(Default)]
struct Recorder {
    payloads: Mutex<Vec<Vec<u8>>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

#[async_trait]
impl MessagePublisher for Recorder {
    async fn publish(&self, payload: &[u8]) -> Result<(), BrokerError> {
        let mut payloads = self.payloads.lock().unwrap();
        payloads.push(payload.to_vec());
        if let Some((limit, cancel)) = &self.cancel_after {
            if payloads.len() == *limit {
                cancel.cancel();
            }
        }
        Ok(())
    }
}

impl Recorder {
    fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn test_every_line_is_published_byte_for_byte() {
    let dir = TempDir::new().unwrap();
    let lines: Vec<String> = (1..=5).map(pgcr_line).collect();
    let path = write_zst(dir.path(), "day.zst", lines.join("\n").as_bytes());

    let recorder = Recorder::default();
    let report = PgcrProducer::new(&path, &recorder)
        .produce(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report,
        ProduceReport {
            published: 5,
            cancelled: false
        }
    );
    let expected: Vec<Vec<u8>> = lines.iter().map(|l| l.as_bytes().to_vec()).collect();
    assert_eq!(recorder.payloads(), expected);
}

#[tokio::test]
async fn test_messages_land_persistent_on_the_queue() {
    let dir = TempDir::new().unwrap();
    let path = write_zst(
        dir.path(),
        "day.zst",
        format!("{}\r\n{}\r\n", pgcr_line(10), pgcr_line(11)).as_bytes(),
    );

    let broker = MemoryBroker::new();
    let session = broker.transport().connect("mem://").await.unwrap();
    let mut publisher = QueuePublisher::new(session, "pgcr_jobs").await.unwrap();

    let report = PgcrProducer::new(&path, &publisher)
        .produce(&CancellationToken::new())
        .await
        .unwrap();
    publisher.close().await.unwrap();

    assert_eq!(report.published, 2);
    let messages = broker.ready_messages("pgcr_jobs");
    assert_eq!(messages[0].body, pgcr_line(10).into_bytes());
    assert_eq!(messages[1].body, pgcr_line(11).into_bytes());
    assert!(messages.iter().all(|m| m.properties.persistent));
    assert!(messages
        .iter()
        .all(|m| m.properties.content_type == "application/json"));
}

#[tokio::test]
async fn test_invalid_line_stops_the_stream() {
    let dir = TempDir::new().unwrap();
    let contents = [
        pgcr_line(1),
        pgcr_line(2),
        r#"{"entries":[]}"#.to_string(),
        pgcr_line(4),
    ]
    .join("\n");
    let path = write_zst(dir.path(), "bad.zst", contents.as_bytes());

    let recorder = Recorder::default();
    let result = PgcrProducer::new(&path, &recorder)
        .produce(&CancellationToken::new())
        .await;

    assert!(matches!(result, Err(ProducerError::Decode { line: 3, .. })));
    assert_eq!(recorder.payloads().len(), 2);
}

#[tokio::test]
async fn test_line_over_limit_is_rejected() {
    let dir = TempDir::new().unwrap();
    let long = format!(
        r#"{{"activityDetails":{{"instanceId":"2"}},"teams":["{}"]}}"#,
        "x".repeat(512)
    );
    let contents = format!("{}\n{long}\n{}\n", pgcr_line(1), pgcr_line(3));
    let path = write_zst(dir.path(), "long.zst", contents.as_bytes());

    let recorder = Recorder::default();
    let result = PgcrProducer::new(&path, &recorder)
        .with_max_line_bytes(256)
        .produce(&CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(ProducerError::LineTooLong { line: 2, limit: 256 })
    ));
    assert_eq!(recorder.payloads().len(), 1);
}

#[tokio::test]
async fn test_cancel_before_start_publishes_nothing() {
    let dir = TempDir::new().unwrap();
    let path = write_zst(dir.path(), "day.zst", pgcr_line(1).as_bytes());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let recorder = Recorder::default();
    let report = PgcrProducer::new(&path, &recorder)
        .produce(&cancel)
        .await
        .unwrap();

    assert_eq!(
        report,
        ProduceReport {
            published: 0,
            cancelled: true
        }
    );
    assert!(recorder.payloads().is_empty());
}

#[tokio::test]
async fn test_cancel_mid_stream_returns_partial_report() {
    let dir = TempDir::new().unwrap();
    let lines: Vec<String> = (1..=100).map(pgcr_line).collect();
    let path = write_zst(dir.path(), "day.zst", lines.join("\n").as_bytes());

    let cancel = CancellationToken::new();
    let recorder = Recorder {
        cancel_after: Some((3, cancel.clone())),
        ..Recorder::default()
    };

    let report = PgcrProducer::new(&path, &recorder)
        .produce(&cancel)
        .await
        .unwrap();

    assert_eq!(
        report,
        ProduceReport {
            published: 3,
            cancelled: true
        }
    );
    assert_eq!(recorder.payloads().len(), 3);
}

#[tokio::test]
async fn test_missing_file_is_an_open_error() {
    let dir = TempDir::new().unwrap();
    let recorder = Recorder::default();

    let result = PgcrProducer::new(dir.path().join("absent.zst"), &recorder)
        .produce(&CancellationToken::new())
        .await;

    assert!(matches!(result, Err(ProducerError::Open { .. })));
}

#[tokio::test]
async fn test_plain_text_is_a_decompress_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.zst");
    std::fs::write(&path, pgcr_line(1)).unwrap();

    let recorder = Recorder::default();
    let result = PgcrProducer::new(&path, &recorder)
        .produce(&CancellationToken::new())
        .await;

    assert!(matches!(result, Err(ProducerError::Decompress { .. })));
    assert!(recorder.payloads().is_empty());
}

#[tokio::test]
async fn test_publish_failure_names_the_record() {
    let dir = TempDir::new().unwrap();
    let path = write_zst(dir.path(), "day.zst", pgcr_line(77).as_bytes());

    let broker = MemoryBroker::new();
    let session = broker.transport().connect("mem://").await.unwrap();
    let publisher = QueuePublisher::new(session, "pgcr_jobs").await.unwrap();
    broker.sever_connections();

    let result = PgcrProducer::new(&path, &publisher)
        .produce(&CancellationToken::new())
        .await;

    match result {
        Err(ProducerError::Publish {
            line, instance_id, ..
        }) => {
            assert_eq!(line, 1);
            assert_eq!(instance_id, "77");
        }
        other => panic!("expected publish error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_file_publishes_nothing() {
    let dir = TempDir::new().unwrap();
    let path = write_zst(dir.path(), "empty.zst", b"");

    let recorder = Recorder::default();
    let report = PgcrProducer::new(&path, &recorder)
        .produce(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.published, 0);
    assert!(recorder.payloads().is_empty());
}
