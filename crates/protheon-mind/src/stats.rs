//! Progress counters reported in heartbeats

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use protheon_common::types::{format_uptime, HeartbeatRequest};

#[derive(Debug, Default)]
struct Counters {
    jobs_done: u64,
    last_job_time: Option<DateTime<Utc>>,
}

/// Shared between the consumer loop (writer) and the heartbeat task (reader)
#[derive(Debug)]
pub struct WorkerStats {
    started: Instant,
    counters: Mutex<Counters>,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn record_job(&self) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.jobs_done += 1;
        counters.last_job_time = Some(Utc::now());
    }

    pub fn jobs_done(&self) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .jobs_done
    }

    /// Heartbeat body for `worker_id` as of now
    pub fn report(&self, worker_id: &str) -> HeartbeatRequest {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        HeartbeatRequest {
            id: worker_id.to_string(),
            jobs_done: counters.jobs_done,
            last_job_time: counters.last_job_time,
            uptime: format_uptime(self.started.elapsed()),
        }
    }
}
