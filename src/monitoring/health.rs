//! Shared health state, updated by the refresh scheduler and read by the
//! operator HTTP surface.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::scheduler::RefreshReport;

#[derive(Clone)]
pub struct HealthState {
    inner: Arc<RwLock<HealthData>>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthData {
    status: String,
    started_at: DateTime<Utc>,
    live_source_configured: bool,
    estimator_configured: bool,
    refresh_runs: u64,
    last_refresh_at: Option<DateTime<Utc>>,
    last_refresh: Option<RefreshReport>,
}

impl HealthState {
    pub fn new(live_source_configured: bool, estimator_configured: bool) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HealthData {
                status: "ok".to_string(),
                started_at: Utc::now(),
                live_source_configured,
                estimator_configured,
                refresh_runs: 0,
                last_refresh_at: None,
                last_refresh: None,
            })),
        }
    }

    pub async fn record_refresh(&self, report: &RefreshReport) {
        let mut data = self.inner.write().await;
        data.refresh_runs += 1;
        data.last_refresh_at = Some(Utc::now());
        data.last_refresh = Some(*report);
        // Every attempted pair failing means the upstream is down, not empty.
        data.status = if report.attempted > 0 && report.failed == report.attempted {
            "degraded".to_string()
        } else {
            "ok".to_string()
        };
    }

    pub async fn to_json(&self) -> serde_json::Value {
        let data = self.inner.read().await;
        let mut value = serde_json::to_value(&*data).unwrap_or_else(|_| {
            serde_json::json!({"status": "error", "message": "serialization failed"})
        });
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "uptime_seconds".to_string(),
                serde_json::json!((Utc::now() - data.started_at).num_seconds()),
            );
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_state() {
        let state = HealthState::new(false, true);
        let json = state.to_json().await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["live_source_configured"], false);
        assert_eq!(json["estimator_configured"], true);
        assert_eq!(json["refresh_runs"], 0);
        assert!(json["last_refresh"].is_null());
        assert!(json["uptime_seconds"].is_i64());
    }

    #[tokio::test]
    async fn test_record_refresh() {
        let state = HealthState::new(true, false);
        let report = RefreshReport {
            attempted: 10,
            updated: 7,
            declined: 2,
            failed: 1,
            ..RefreshReport::default()
        };
        state.record_refresh(&report).await;

        let json = state.to_json().await;
        assert_eq!(json["refresh_runs"], 1);
        assert_eq!(json["last_refresh"]["updated"], 7);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_all_failures_is_degraded() {
        let state = HealthState::new(true, false);
        let report = RefreshReport {
            attempted: 3,
            failed: 3,
            ..RefreshReport::default()
        };
        state.record_refresh(&report).await;
        assert_eq!(state.to_json().await["status"], "degraded");
    }
}
