//! Operator-facing alert ledger: inspect the pending queue, claim an
//! alert for manual handling, and mark it complete.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::runtime::ledger::LedgerError;
use crate::state::AppState;

fn ledger_error_response(err: LedgerError) -> Response {
    match err {
        LedgerError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown incident: {id}")})),
        )
            .into_response(),
        LedgerError::NotPending(id) => (
            StatusCode::CONFLICT,
            Json(json!({"error": format!("incident {id} is not pending")})),
        )
            .into_response(),
    }
}

/// `GET /alerts/pending` — alerts awaiting manual claim, priority-sorted.
pub async fn pending(State(state): State<AppState>) -> Response {
    Json(state.ledger.pending()).into_response()
}

/// `GET /alerts/{incident_id}`
pub async fn detail(State(state): State<AppState>, Path(incident_id): Path<String>) -> Response {
    match state.ledger.get(&incident_id) {
        Some(entry) => Json(entry).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown incident: {incident_id}")})),
        )
            .into_response(),
    }
}

/// `POST /alerts/{incident_id}/claim`
pub async fn claim(State(state): State<AppState>, Path(incident_id): Path<String>) -> Response {
    match state.ledger.claim(&incident_id) {
        Ok(entry) => Json(entry).into_response(),
        Err(e) => ledger_error_response(e),
    }
}

/// `POST /alerts/{incident_id}/complete`
pub async fn complete(State(state): State<AppState>, Path(incident_id): Path<String>) -> Response {
    match state.ledger.complete(&incident_id) {
        Ok(entry) => {
            state.runtime_state.clear_active(&incident_id);
            Json(entry).into_response()
        }
        Err(e) => ledger_error_response(e),
    }
}
