//! Operator HTTP surface: health, one-off price lookups and on-demand
//! refresh.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::db::store::Store;
use crate::monitoring::health::HealthState;
use crate::resolver::PriceResolver;
use crate::scheduler::RefreshScheduler;

#[derive(Clone)]
pub struct DashboardState {
    resolver: Arc<PriceResolver>,
    scheduler: Arc<RefreshScheduler>,
    store: Arc<Store>,
    health: HealthState,
}

impl DashboardState {
    pub fn new(
        resolver: Arc<PriceResolver>,
        scheduler: Arc<RefreshScheduler>,
        store: Arc<Store>,
        health: HealthState,
    ) -> Self {
        Self {
            resolver,
            scheduler,
            store,
            health,
        }
    }
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/price", get(price_handler))
        .route("/api/refresh", post(refresh_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Spawn the HTTP server. Returns a handle that can be aborted.
pub fn spawn_dashboard(state: DashboardState, bind: &str, port: u16) -> JoinHandle<()> {
    let addr = format!("{bind}:{port}");

    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => {
                info!(addr = %addr, "Operator API listening");
                l
            }
            Err(e) => {
                warn!(error = %e, addr = %addr, "Failed to bind operator API, continuing without it");
                return;
            }
        };

        if let Err(e) = axum::serve(listener, router(state)).await {
            warn!(error = %e, "Operator API server error");
        }
    })
}

// -- Route Handlers --

async fn health_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let mut data = state.health.to_json().await;
    let cache = match state.store.summary().await {
        Ok(summary) => serde_json::to_value(&summary).unwrap_or_default(),
        Err(e) => serde_json::json!({"error": e.to_string()}),
    };
    if let Some(obj) = data.as_object_mut() {
        obj.insert("cache".to_string(), cache);
    }
    Json(data)
}

#[derive(Debug, Deserialize)]
struct PriceParams {
    commodity: Option<String>,
    location: Option<String>,
    online: Option<bool>,
}

async fn price_handler(
    State(state): State<DashboardState>,
    Query(params): Query<PriceParams>,
) -> Response {
    let Some(commodity) = params.commodity.filter(|c| !c.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "commodity is required"})),
        )
            .into_response();
    };

    let record = state
        .resolver
        .resolve_price(
            &commodity,
            params.location.as_deref(),
            params.online.unwrap_or(true),
        )
        .await;
    Json(record).into_response()
}

async fn refresh_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let report = state.scheduler.run_once().await;
    Json(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, SchedulerConfig};
    use crate::pricing::models::{PriceRecord, PriceSource};
    use crate::sources::cached::CachedSource;
    use crate::sources::PriceTier;

    async fn serve() -> String {
        let store = Arc::new(Store::new(":memory:").await.unwrap());
        let cached: Arc<dyn PriceTier> = Arc::new(CachedSource::new(store.clone()));
        let resolver = Arc::new(PriceResolver::new(vec![cached.clone()], store.clone()));
        // The cache tier stands in for the live source; no pairs are refreshed.
        let scheduler = Arc::new(
            RefreshScheduler::new(cached, store.clone(), &SchedulerConfig::default(), &CacheConfig::default())
                .with_pairs(Vec::new()),
        );
        let state = DashboardState::new(resolver, scheduler, store, HealthState::new(false, false));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_price_endpoint_returns_record() {
        let base = serve().await;
        let record: PriceRecord = reqwest::get(format!(
            "{base}/api/price?commodity=unknownfruit&location=Kerala&online=false"
        ))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

        assert_eq!(record.source, PriceSource::SyntheticMock);
        assert_eq!(record.region.as_str(), "Kerala");
    }

    #[tokio::test]
    async fn test_price_endpoint_requires_commodity() {
        let base = serve().await;
        let resp = reqwest::get(format!("{base}/api/price")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_and_refresh_endpoints() {
        let base = serve().await;
        let health: serde_json::Value = reqwest::get(format!("{base}/api/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["cache"]["entries"], 0);

        let report: serde_json::Value = reqwest::Client::new()
            .post(format!("{base}/api/refresh"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report["attempted"], 0);
        assert_eq!(report["skipped"], false);
    }
}
