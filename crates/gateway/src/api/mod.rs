//! HTTP API surface: webhook intake, the operator alert ledger, and the
//! `/ops/*` observability endpoints.

pub mod alerts;
pub mod health;
pub mod ops;
pub mod webhook;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Builds the full router. Unlike a two-halves public/protected split, the
/// `/ops/*` mutation endpoints carry their own bearer-token check inline
/// (mirroring the upstream per-handler `_require_ops_auth` call) since only
/// two of the eight `/ops/*` routes require it.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/webhook", post(webhook::webhook))
        .route("/webhook/gcp", post(webhook::webhook_gcp))
        .route("/alerts/pending", get(alerts::pending))
        .route("/alerts/:incident_id", get(alerts::detail))
        .route("/alerts/:incident_id/claim", post(alerts::claim))
        .route("/alerts/:incident_id/complete", post(alerts::complete))
        .route("/ops/status", get(ops::status))
        .route("/ops/health", get(ops::health))
        .route("/ops/metrics", get(ops::metrics))
        .route("/ops/config", get(ops::config))
        .route("/ops/dependencies", get(ops::dependencies))
        .route("/ops/errors", get(ops::errors))
        .route("/ops/loglevel", post(ops::loglevel))
        .route("/ops/drain", post(ops::drain))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
