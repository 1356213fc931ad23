//! Producer pipeline
//!
//! Streams one zstd-compressed, newline-delimited PGCR file onto the queue.
//! Decompression and line splitting run on a blocking thread; lines cross to
//! the async side through a bounded channel, so memory stays flat no matter
//! how large the file is. Each line must decode as a [`Pgcr`]; the original
//! bytes, not a re-encoding, are what gets published.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use protheon_broker::MessagePublisher;
use protheon_common::types::Pgcr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ProducerError, Result};

/// Longest accepted line, excluding the newline.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/// Lines buffered between the reader thread and the publisher.
const LINE_CHANNEL_CAPACITY: usize = 64;

/// Outcome of one [`PgcrProducer::produce`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProduceReport {
    pub published: u64,
    /// Stopped early because of the shutdown signal
    pub cancelled: bool,
}

pub struct PgcrProducer<'a, P: ?Sized> {
    source: PathBuf,
    publisher: &'a P,
    max_line_bytes: usize,
}

impl<'a, P> PgcrProducer<'a, P>
where
    P: MessagePublisher + ?Sized,
{
    pub fn new(source: impl Into<PathBuf>, publisher: &'a P) -> Self {
        Self {
            source: source.into(),
            publisher,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Publish every line of the source file.
    ///
    /// Stops at the first open, decompression, length, decode or publish
    /// error. Cancellation is checked before each line and is not an error:
    /// the partial report comes back with `cancelled` set.
    pub async fn produce(&self, cancel: &CancellationToken) -> Result<ProduceReport> {
        let (tx, mut rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let path = self.source.clone();
        let max_line_bytes = self.max_line_bytes;
        let reader = tokio::task::spawn_blocking(move || read_lines(&path, max_line_bytes, &tx));

        let mut report = ProduceReport::default();
        let mut line_no: u64 = 0;

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break Ok(());
                }
                next = rx.recv() => next,
            };

            let line = match next {
                None => break Ok(()),
                Some(Err(err)) => break Err(err),
                Some(Ok(line)) => line,
            };
            line_no += 1;

            let pgcr: Pgcr = match serde_json::from_slice(&line) {
                Ok(pgcr) => pgcr,
                Err(source) => break Err(ProducerError::Decode { line: line_no, source }),
            };

            if let Err(source) = self.publisher.publish(&line).await {
                break Err(ProducerError::Publish {
                    line: line_no,
                    instance_id: pgcr.instance_id().to_string(),
                    source,
                });
            }
            report.published += 1;
        };

        // Closing the channel stops the reader at its next send
        drop(rx);
        if let Err(err) = reader.await {
            warn!(source = %self.source.display(), error = %err, "Reader thread did not finish cleanly");
        }

        match &outcome {
            Ok(()) if report.cancelled => info!(
                source = %self.source.display(),
                published = report.published,
                "Shutdown requested, stopped producing"
            ),
            Ok(()) => debug!(source = %self.source.display(), published = report.published, "Source exhausted"),
            Err(_) => {}
        }

        outcome.map(|()| report)
    }
}

/// Blocking half: decompress `path` and send each line. Returns when the file
/// ends, an error has been sent, or the receiver is gone.
fn read_lines(path: &Path, max_line_bytes: usize, tx: &mpsc::Sender<Result<Vec<u8>>>) {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(source) => {
            let _ = tx.blocking_send(Err(ProducerError::Open {
                path: path.to_path_buf(),
                source,
            }));
            return;
        }
    };

    let decoder = match zstd::stream::read::Decoder::new(file) {
        Ok(decoder) => decoder,
        Err(source) => {
            let _ = tx.blocking_send(Err(ProducerError::Decompress {
                path: path.to_path_buf(),
                source,
            }));
            return;
        }
    };

    let mut reader = BufReader::new(decoder);
    let mut line_no: u64 = 0;

    loop {
        line_no += 1;
        let item = match read_bounded_line(&mut reader, max_line_bytes) {
            Ok(Some(line)) => Ok(line),
            Ok(None) => return,
            Err(LineError::TooLong) => Err(ProducerError::LineTooLong {
                line: line_no,
                limit: max_line_bytes,
            }),
            Err(LineError::Io(source)) => Err(ProducerError::Decompress {
                path: path.to_path_buf(),
                source,
            }),
        };

        let failed = item.is_err();
        if tx.blocking_send(item).is_err() || failed {
            return;
        }
    }
}

#[derive(Debug)]
enum LineError {
    TooLong,
    Io(std::io::Error),
}

/// Read one `\n`-terminated line without its terminator (and without a
/// trailing `\r`). A final line lacking `\n` is still returned. `None` at
/// end of input. Never buffers more than `limit` bytes of one line.
fn read_bounded_line<R: BufRead>(
    reader: &mut R,
    limit: usize,
) -> std::result::Result<Option<Vec<u8>>, LineError> {
    let mut line = Vec::new();
    let mut saw_any = false;

    loop {
        let available = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(LineError::Io(e)),
        };

        if available.is_empty() {
            if !saw_any {
                return Ok(None);
            }
            let line = strip_cr(line);
            if line.len() > limit {
                return Err(LineError::TooLong);
            }
            return Ok(Some(line));
        }
        saw_any = true;

        let (chunk, consumed, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (&available[..pos], pos + 1, true),
            None => (available, available.len(), false),
        };

        // A trailing \r is not content; allow one byte of slack for it
        if line.len() + chunk.len() > limit.saturating_add(1) {
            return Err(LineError::TooLong);
        }
        line.extend_from_slice(chunk);
        reader.consume(consumed);

        if complete {
            let line = strip_cr(line);
            if line.len() > limit {
                return Err(LineError::TooLong);
            }
            return Ok(Some(line));
        }
    }
}

fn strip_cr(mut line: Vec<u8>) -> Vec<u8> {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    line
}
