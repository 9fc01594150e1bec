//! Operator-facing `/ops/*` surface: composite health verdicts, Golden
//! Signals metrics, sanitized config, dependency checks, and the two
//! mutation endpoints (`loglevel`, `drain`) gated behind a bearer token.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Mirrors `_require_ops_auth`: missing `Authorization` header is 401,
/// present-but-wrong token is 403. Comparison is constant-time against the
/// raw configured token, not a pre-hashed digest.
fn require_ops_auth(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = match provided.strip_prefix("Bearer ") {
        Some(t) => t,
        None => {
            return Err(ops_error(
                StatusCode::UNAUTHORIZED,
                "missing bearer token",
            ))
        }
    };

    let matches = token
        .as_bytes()
        .ct_eq(state.config.ops_auth_token.as_bytes())
        .unwrap_u8()
        == 1;
    if matches {
        Ok(())
    } else {
        Err(ops_error(StatusCode::FORBIDDEN, "invalid ops token"))
    }
}

fn ops_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// `GET /ops/status` — composite verdict over the Golden Signals snapshot.
pub async fn status(State(state): State<AppState>) -> Response {
    let snap = state.runtime_state.metrics_snapshot();
    let queue_depth = state.intake.queue_depth();
    let active = state.runtime_state.active_incident_count();
    let prompt_ok = state.config.load_system_prompt().await.is_ok();

    let verdict = if snap.error_rate_percent > 50.0 || !prompt_ok || snap.draining {
        "unhealthy"
    } else if snap.error_rate_percent > 10.0 || active > 5 || queue_depth > 10 {
        "degraded"
    } else {
        "healthy"
    };

    Json(json!({
        "status": verdict,
        "error_rate_percent": snap.error_rate_percent,
        "active_incidents": active,
        "queue_depth": queue_depth,
        "draining": snap.draining,
    }))
    .into_response()
}

/// `GET /ops/health` — dependency reachability rollup.
pub async fn health(State(state): State<AppState>) -> Response {
    let deps = check_dependencies(&state).await;
    let all_ok = deps.values().all(|v| v == "ok" || v == "configured");
    Json(json!({
        "status": if all_ok { "healthy" } else { "degraded" },
        "dependencies": deps,
    }))
    .into_response()
}

/// `GET /ops/metrics` — Golden Signals / RED metrics snapshot.
pub async fn metrics(State(state): State<AppState>) -> Response {
    let snap = state.runtime_state.metrics_snapshot();
    Json(json!({
        "latency": {
            "p50_seconds": snap.latency_p50,
            "p95_seconds": snap.latency_p95,
            "p99_seconds": snap.latency_p99,
        },
        "traffic": {
            "requests_per_minute": snap.traffic_rate_per_minute,
            "total_webhooks": snap.total_webhooks,
        },
        "errors": {
            "total": snap.total_errors,
            "rate_percent": snap.error_rate_percent,
        },
        "saturation": {
            "active_incidents": snap.active_incidents,
            "queue_depth": state.intake.queue_depth(),
        },
        "red": {
            "rate": snap.traffic_rate_per_minute,
            "errors": snap.error_rate_percent,
            "duration_p99_seconds": snap.latency_p99,
        },
        "counters": {
            "webhooks_processed": snap.webhooks_processed,
            "webhooks_ignored": snap.webhooks_ignored,
            "webhooks_failed": snap.webhooks_failed,
            "agent_runs_completed": snap.agent_runs_completed,
            "agent_runs_failed": snap.agent_runs_failed,
            "alerts_deduplicated": snap.alerts_deduplicated,
            "alerts_queued": snap.alerts_queued,
            "alerts_expired": snap.alerts_expired,
        },
        "token_usage": {
            "total_input_tokens": snap.total_input_tokens,
            "total_output_tokens": snap.total_output_tokens,
            "total_estimated_cost_usd": snap.total_estimated_cost_usd,
            "tokens_last_hour": snap.tokens_last_hour,
        },
        "intake": {
            "active_incidents": snap.active_incidents,
            "queue_depth": state.intake.queue_depth(),
            "draining": snap.draining,
        },
        "uptime_seconds": snap.uptime_seconds,
    }))
    .into_response()
}

/// `GET /ops/config` — sanitized config dump. No secrets.
pub async fn config(State(state): State<AppState>) -> Response {
    let cfg = &state.config;
    let ledger_counts = state.ledger.status_counts();
    Json(json!({
        "llm_model": cfg.llm_model,
        "llm_api_base_url": cfg.llm_api_base_url,
        "sre_prompt_path": cfg.sre_prompt_path,
        "incidents_dir": cfg.incidents_dir,
        "webhook_signature_verification": !cfg.pagerduty_webhook_secret.is_empty(),
        "pagerduty_escalation_policy_id": cfg.pagerduty_escalation_policy_id,
        "services": cfg.services.iter().map(|s| json!({"name": s.name, "critical": s.critical})).collect::<Vec<_>>(),
        "max_concurrent_alerts": cfg.max_concurrent_alerts,
        "alert_queue_ttl_seconds": cfg.alert_queue_ttl_seconds,
        "max_tokens_per_incident": cfg.max_tokens_per_incident,
        "max_tokens_per_hour": cfg.max_tokens_per_hour,
        "alert_ledger_status_counts": ledger_counts,
    }))
    .into_response()
}

async fn check_dependencies(state: &AppState) -> std::collections::HashMap<String, String> {
    let mut deps = std::collections::HashMap::new();

    deps.insert(
        "system_prompt".to_string(),
        if std::path::Path::new(&state.config.sre_prompt_path).exists() {
            "ok".to_string()
        } else {
            "missing".to_string()
        },
    );

    deps.insert(
        "llm_api".to_string(),
        match state.llm.ping().await {
            Ok(true) => "ok".to_string(),
            Ok(false) => "unreachable".to_string(),
            Err(e) => format!("error: {e}"),
        },
    );

    let pagerduty = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build();
    let pagerduty_status = match pagerduty {
        Ok(client) => {
            match client
                .get("https://api.pagerduty.com/abilities")
                .header(
                    "Authorization",
                    format!("Token token={}", state.config.pagerduty_api_token),
                )
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => "ok".to_string(),
                Ok(resp) => format!("HTTP {}", resp.status().as_u16()),
                Err(e) => format!("error: {e}"),
            }
        }
        Err(e) => format!("error: {e}"),
    };
    deps.insert("pagerduty".to_string(), pagerduty_status);

    for service in &state.config.services {
        deps.insert(service.name.clone(), "configured".to_string());
    }

    deps
}

/// `GET /ops/dependencies` — per-dependency reachability detail.
pub async fn dependencies(State(state): State<AppState>) -> Response {
    let deps = check_dependencies(&state).await;
    Json(json!({ "dependencies": deps })).into_response()
}

/// `GET /ops/errors` — recent error log and counts by type.
pub async fn errors(State(state): State<AppState>) -> Response {
    let (total, by_type, recent) = state.runtime_state.errors_snapshot();
    Json(json!({
        "total": total,
        "by_type": by_type,
        "recent": recent,
    }))
    .into_response()
}

#[derive(serde::Deserialize)]
pub struct LogLevelBody {
    level: String,
}

/// `POST /ops/loglevel` — change the tracing log level at runtime.
pub async fn loglevel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LogLevelBody>,
) -> Response {
    if let Err(resp) = require_ops_auth(&state, &headers) {
        return resp;
    }

    let level = body.level.to_uppercase();
    let directive = match level.as_str() {
        "DEBUG" => "debug",
        "INFO" => "info",
        "WARNING" => "warn",
        "ERROR" => "error",
        _ => {
            return ops_error(
                StatusCode::BAD_REQUEST,
                format!("invalid log level: {level}. Must be one of DEBUG, INFO, WARNING, ERROR."),
            )
        }
    };

    let new_filter = tracing_subscriber::EnvFilter::new(directive);
    if let Err(e) = state.log_reload.reload(new_filter) {
        tracing::error!(requested_level = %level, error = %e, "failed to reload log level");
        return ops_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to reload log level");
    }

    tracing::warn!(requested_level = %level, "log level changed at runtime");
    Json(json!({"status": "acknowledged", "level": level})).into_response()
}

/// `POST /ops/drain` — stop accepting new alerts; existing runs finish.
pub async fn drain(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_ops_auth(&state, &headers) {
        return resp;
    }

    state.runtime_state.set_draining(true);
    tracing::warn!("draining enabled via /ops/drain");
    Json(json!({"status": "draining"})).into_response()
}
