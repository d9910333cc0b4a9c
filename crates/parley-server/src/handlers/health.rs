//! `/api/health`

use std::time::Instant;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    /// Live push connections.
    pub connections: usize,
    /// Users with a registered session.
    pub online_users: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, online_users: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        message: "Server is running".into(),
        timestamp: Utc::now(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        online_users,
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health_check(
        state.start_time,
        state.router.connection_count(),
        state.router.online_count(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_counts_from_start() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, 3, 2);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs >= 59);
        assert_eq!(resp.connections, 3);
        assert_eq!(resp.online_users, 2);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(health_check(Instant::now(), 0, 0)).unwrap();
        assert_eq!(json["message"], "Server is running");
        assert!(json["uptimeSecs"].is_number());
        assert!(json["onlineUsers"].is_number());
        assert!(json["timestamp"].is_string());
    }
}
