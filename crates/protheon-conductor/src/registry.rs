//! Worker registry
//!
//! Owns every registered [`Worker`]. The map sits behind a mutex that never
//! leaves this module; handlers and the reaper go through the methods below.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use protheon_common::types::HeartbeatRequest;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A registered mind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Worker {
    pub id: Uuid,
    pub hostname: String,
    pub os: String,
    pub ip: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub jobs_done: u64,
    pub last_job_time: Option<DateTime<Utc>>,
    pub uptime: String,
}

/// What a mind is told when it registers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: Uuid,
    pub heartbeat_interval_secs: u64,
    pub queue_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Accepted,
    /// No worker with that id; nothing was recorded
    UnknownWorker,
}

#[derive(Clone)]
pub struct WorkerRegistry {
    workers: Arc<Mutex<HashMap<Uuid, Worker>>>,
    heartbeat_interval_secs: u64,
    queue_name: Arc<str>,
}

impl WorkerRegistry {
    pub fn new(heartbeat_interval_secs: u64, queue_name: impl Into<Arc<str>>) -> Self {
        Self {
            workers: Arc::new(Mutex::new(HashMap::new())),
            heartbeat_interval_secs,
            queue_name: queue_name.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Worker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a worker under a fresh id.
    pub fn register(&self, hostname: &str, os: &str, ip: &str) -> Registration {
        let now = Utc::now();
        let worker = Worker {
            id: Uuid::new_v4(),
            hostname: hostname.to_string(),
            os: os.to_string(),
            ip: ip.to_string(),
            registered_at: now,
            last_seen: now,
            jobs_done: 0,
            last_job_time: None,
            uptime: String::new(),
        };
        let id = worker.id;

        info!(
            worker_id = %id,
            hostname = %worker.hostname,
            os = %worker.os,
            ip = %worker.ip,
            "Worker registered"
        );
        self.lock().insert(id, worker);

        Registration {
            id,
            heartbeat_interval_secs: self.heartbeat_interval_secs,
            queue_name: self.queue_name.to_string(),
        }
    }

    /// Record a heartbeat. Unknown (or unparseable) ids change nothing.
    pub fn heartbeat(&self, report: &HeartbeatRequest) -> HeartbeatOutcome {
        let Ok(id) = Uuid::parse_str(&report.id) else {
            warn!(worker_id = %report.id, "Heartbeat from unknown worker");
            return HeartbeatOutcome::UnknownWorker;
        };

        let mut workers = self.lock();
        match workers.get_mut(&id) {
            Some(worker) => {
                worker.last_seen = Utc::now();
                worker.jobs_done = report.jobs_done;
                worker.last_job_time = report.last_job_time;
                worker.uptime.clone_from(&report.uptime);
                debug!(
                    worker_id = %id,
                    jobs_done = worker.jobs_done,
                    uptime = %worker.uptime,
                    "Heartbeat received"
                );
                HeartbeatOutcome::Accepted
            }
            None => {
                warn!(worker_id = %id, "Heartbeat from unknown worker");
                HeartbeatOutcome::UnknownWorker
            }
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Worker> {
        self.lock().get(id).cloned()
    }

    /// Snapshot of all workers, oldest registration first
    pub fn workers(&self) -> Vec<Worker> {
        let mut workers: Vec<Worker> = self.lock().values().cloned().collect();
        workers.sort_by_key(|w| w.registered_at);
        workers
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove workers whose last heartbeat is older than `timeout` at `now`.
    pub fn reap_expired(&self, timeout: Duration, now: DateTime<Utc>) -> Vec<Worker> {
        let mut workers = self.lock();
        let expired: Vec<Uuid> = workers
            .values()
            .filter(|w| {
                (now - w.last_seen)
                    .to_std()
                    .is_ok_and(|silent_for| silent_for > timeout)
            })
            .map(|w| w.id)
            .collect();

        expired
            .iter()
            .filter_map(|id| workers.remove(id))
            .inspect(|w| {
                info!(worker_id = %w.id, hostname = %w.hostname, last_seen = %w.last_seen, "Worker expired");
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, id: &Uuid, by: chrono::Duration) {
        if let Some(worker) = self.lock().get_mut(id) {
            worker.last_seen -= by;
        }
    }
}
