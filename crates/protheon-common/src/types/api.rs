//! Conductor HTTP bodies
//!
//! Field names are part of the wire contract with already-deployed minds;
//! do not rename them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `POST /mind/register` request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub hostname: String,
    pub os: String,
}

/// `POST /mind/register` response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub id: String,
    /// Heartbeat interval in seconds
    #[serde(rename = "heart_beat")]
    pub heartbeat_interval: u64,
    pub queue_name: String,
}

/// `POST /mind/heartbeat` request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub id: String,
    pub jobs_done: u64,
    pub last_job_time: Option<DateTime<Utc>>,
    /// Human readable uptime, e.g. "1h2m3s"
    pub uptime: String,
}

/// Render an uptime the way minds report it: `1h2m3s`, `4m0s`, `12s`.
pub fn format_uptime(uptime: std::time::Duration) -> String {
    let secs = uptime.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_register_response_uses_heart_beat_key() {
        let response = RegisterResponse {
            id: "abc".to_string(),
            heartbeat_interval: 30,
            queue_name: "pgcr_jobs".to_string(),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["heart_beat"], 30);
        assert_eq!(json["queue_name"], "pgcr_jobs");
    }

    #[test]
    fn test_heartbeat_accepts_null_last_job_time() {
        let body = r#"{"id":"abc","jobs_done":0,"last_job_time":null,"uptime":"5s"}"#;
        let hb: HeartbeatRequest = serde_json::from_str(body).unwrap();
        assert!(hb.last_job_time.is_none());
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(12)), "12s");
        assert_eq!(format_uptime(Duration::from_secs(240)), "4m0s");
        assert_eq!(format_uptime(Duration::from_secs(3723)), "1h2m3s");
    }
}
