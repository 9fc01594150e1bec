//! Webhook intake: PagerDuty (`/webhook`) and GCP Cloud Monitoring
//! (`/webhook/gcp`). Both end at `AlertIntake::submit`; they differ in
//! authentication and in which event shapes are accepted.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use sa_domain::alert::Alert;

use crate::runtime::intake::Disposition;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

fn webhook_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn verify_pagerduty_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    let sig_hex = header_value.strip_prefix("v1=").unwrap_or(header_value);
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    let computed = hex::encode(mac.finalize().into_bytes());
    computed.as_bytes().ct_eq(sig_hex.as_bytes()).unwrap_u8() == 1
}

/// `POST /webhook` — PagerDuty V3 webhook intake.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let trace_id = uuid::Uuid::new_v4().to_string();
    state.runtime_state.record_webhook_received();

    if state.runtime_state.is_draining() {
        return webhook_error(StatusCode::SERVICE_UNAVAILABLE, "service is draining");
    }

    if !state.config.pagerduty_webhook_secret.is_empty() {
        let provided = headers
            .get("x-pagerduty-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided.is_empty()
            || !verify_pagerduty_signature(&state.config.pagerduty_webhook_secret, &body, provided)
        {
            state.runtime_state.record_error(
                "webhook_auth",
                "invalid or missing webhook signature",
                None,
                Some(&trace_id),
            );
            return webhook_error(StatusCode::UNAUTHORIZED, "invalid webhook signature");
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            state.runtime_state.record_error(
                "webhook_parse",
                &format!("invalid JSON body: {e}"),
                None,
                Some(&trace_id),
            );
            return webhook_error(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}"));
        }
    };

    let event_type = payload
        .pointer("/event/event_type")
        .and_then(Value::as_str)
        .unwrap_or("");
    if event_type != "incident.triggered" && event_type != "incident.escalated" {
        state.runtime_state.record_webhook_ignored();
        return Json(json!({
            "status": "ignored",
            "reason": format!("unhandled event_type: {event_type}"),
            "trace_id": trace_id,
        }))
        .into_response();
    }

    let alert = match Alert::from_webhook(&payload) {
        Ok(a) => a,
        Err(e) => {
            state.runtime_state.record_webhook_failed();
            state.runtime_state.record_error(
                "webhook_parse",
                &e,
                None,
                Some(&trace_id),
            );
            return webhook_error(StatusCode::BAD_REQUEST, e);
        }
    };

    state.runtime_state.record_webhook_processed();
    dispatch(&state, alert, trace_id).await
}

#[derive(serde::Deserialize)]
pub struct GcpWebhookQuery {
    auth_token: Option<String>,
}

/// `POST /webhook/gcp` — GCP Cloud Monitoring notification channel intake.
pub async fn webhook_gcp(
    State(state): State<AppState>,
    Query(query): Query<GcpWebhookQuery>,
    Json(payload): Json<Value>,
) -> Response {
    let trace_id = uuid::Uuid::new_v4().to_string();
    state.runtime_state.record_webhook_received();

    if state.runtime_state.is_draining() {
        return webhook_error(StatusCode::SERVICE_UNAVAILABLE, "service is draining");
    }

    if let Some(provided) = query.auth_token.as_deref().filter(|t| !t.is_empty()) {
        let matches = provided
            .as_bytes()
            .ct_eq(state.config.ops_auth_token.as_bytes())
            .unwrap_u8()
            == 1;
        if !matches {
            state.runtime_state.record_error(
                "webhook_auth",
                "invalid auth_token query parameter",
                None,
                Some(&trace_id),
            );
            return webhook_error(StatusCode::UNAUTHORIZED, "invalid auth_token");
        }
    }

    let incident_state = payload
        .pointer("/incident/state")
        .and_then(Value::as_str)
        .unwrap_or("");
    if incident_state != "open" {
        state.runtime_state.record_webhook_ignored();
        return Json(json!({
            "status": "ignored",
            "reason": format!("incident state is not open: {incident_state}"),
            "trace_id": trace_id,
        }))
        .into_response();
    }

    let alert = match Alert::from_gcp_webhook(&payload, &state.config.services) {
        Ok(a) => a,
        Err(e) => {
            state.runtime_state.record_webhook_failed();
            state.runtime_state.record_error(
                "webhook_parse",
                &e,
                None,
                Some(&trace_id),
            );
            return webhook_error(StatusCode::BAD_REQUEST, e);
        }
    };

    state.runtime_state.record_webhook_processed();
    dispatch(&state, alert, trace_id).await
}

async fn dispatch(state: &AppState, alert: Alert, trace_id: String) -> Response {
    let incident_id = alert.incident_id.clone();
    state.ledger.register(&alert, &trace_id);
    let disposition = state.intake.submit(alert, trace_id.clone());
    if disposition == Disposition::Rejected {
        state
            .ledger
            .set_status(&incident_id, crate::runtime::ledger::LedgerStatus::Failed);
    }

    Json(json!({
        "status": disposition.as_str(),
        "incident_id": incident_id,
        "trace_id": trace_id,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_pagerduty_signature_accepts_matching_v1_prefix() {
        let secret = "whsec";
        let body = b"{\"hello\":true}";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let hex_sig = hex::encode(mac.finalize().into_bytes());
        let header = format!("v1={hex_sig}");
        assert!(verify_pagerduty_signature(secret, body, &header));
    }

    #[test]
    fn verify_pagerduty_signature_rejects_wrong_secret() {
        let body = b"{\"hello\":true}";
        let mut mac = HmacSha256::new_from_slice(b"right").unwrap();
        mac.update(body);
        let hex_sig = hex::encode(mac.finalize().into_bytes());
        let header = format!("v1={hex_sig}");
        assert!(!verify_pagerduty_signature("wrong", body, &header));
    }
}
