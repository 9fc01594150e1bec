//! Liveness/readiness probe. Unlike `/ops/health`, this never touches the
//! network beyond a single LLM reachability ping, and is meant to be cheap
//! enough for a load balancer or orchestrator to poll frequently.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Response {
    let mut checks = serde_json::Map::new();
    let mut ok = true;

    match state.config.load_system_prompt().await {
        Ok(text) if !text.trim().is_empty() => {
            checks.insert("system_prompt".into(), json!("ok"));
        }
        Ok(_) => {
            ok = false;
            checks.insert("system_prompt".into(), json!("empty"));
        }
        Err(e) => {
            ok = false;
            checks.insert("system_prompt".into(), json!(format!("unreadable: {e}")));
        }
    }

    if state.config.is_vertex_ai() {
        checks.insert("llm_provider".into(), json!("vertex_ai"));
    } else if !state.config.llm_api_key.is_empty() {
        checks.insert("llm_provider".into(), json!("api_key"));
    } else {
        ok = false;
        checks.insert("llm_provider".into(), json!("missing"));
    }

    match state.llm.ping().await {
        Ok(true) => {
            checks.insert("llm_api".into(), json!("ok"));
        }
        Ok(false) => {
            ok = false;
            checks.insert("llm_api".into(), json!("unreachable"));
        }
        Err(e) => {
            ok = false;
            checks.insert("llm_api".into(), json!(format!("error: {e}")));
        }
    }

    if state.config.pagerduty_api_token.is_empty() {
        ok = false;
        checks.insert("pagerduty_api_token".into(), json!("missing"));
    } else {
        checks.insert("pagerduty_api_token".into(), json!("ok"));
    }

    if state.config.services.is_empty() {
        ok = false;
        checks.insert("service_registry".into(), json!("empty"));
    } else {
        checks.insert("service_registry".into(), json!("ok"));
    }

    let body = Json(json!({"status": if ok { "ok" } else { "unhealthy" }, "checks": checks}));
    if ok {
        (StatusCode::OK, body).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}
