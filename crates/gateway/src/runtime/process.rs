//! Wires the intake pipeline to the agent loop: hourly budget pre-check,
//! `run_agent`, ledger status updates, and the post-run cost footer.

use std::sync::Arc;
use std::time::Instant;

use sa_domain::alert::Alert;
use sa_domain::config::Config;
use sa_providers::LlmProvider;

use super::agent::{append_cost_footer, run_agent};
use super::ledger::{AlertLedger, LedgerStatus};
use super::state::RuntimeState;
use super::tools::ToolExecutor;

/// Escalate an alert directly via PagerDuty when a token budget is
/// exhausted and the agent was never run to diagnose it.
async fn escalate_budget_exhausted(
    config: &Config,
    alert: &Alert,
    trace_id: &str,
    tokens_used: u64,
) {
    let message = format!(
        "[SRE Agent — Hourly Token Budget Exhausted]\n\n\
         The SRE agent's hourly token budget has been exhausted ({tokens_used}/{} \
         tokens). This alert was NOT diagnosed by the agent. A human must investigate.\n\n\
         Service: {}\n\
         Severity: {}\n\
         Description: {}\n\
         Incident ID: {}",
        config.max_tokens_per_hour,
        alert.service_name,
        alert.severity.as_str(),
        alert.description,
        alert.incident_id,
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("reqwest client build");

    let mut headers = reqwest::header::HeaderMap::new();
    if let Ok(v) = reqwest::header::HeaderValue::from_str(&format!(
        "Token token={}",
        config.pagerduty_api_token
    )) {
        headers.insert(reqwest::header::AUTHORIZATION, v);
    }
    if !trace_id.is_empty() {
        if let Ok(v) = reqwest::header::HeaderValue::from_str(trace_id) {
            headers.insert("X-Trace-Id", v);
        }
    }

    let _ = client
        .post(format!(
            "https://api.pagerduty.com/incidents/{}/notes",
            alert.incident_id
        ))
        .headers(headers.clone())
        .json(&serde_json::json!({"note": {"content": message}}))
        .send()
        .await;

    let _ = client
        .put(format!(
            "https://api.pagerduty.com/incidents/{}",
            alert.incident_id
        ))
        .headers(headers)
        .json(&serde_json::json!({"incident": {"type": "incident_reference", "escalation_level": 2}}))
        .send()
        .await;

    tracing::warn!(
        incident_id = %alert.incident_id,
        budget_type = "hourly",
        tokens_used,
        budget = config.max_tokens_per_hour,
        trace_id,
        "budget-exhausted escalation"
    );
}

/// Processes one admitted alert end to end. Called from the intake
/// pipeline's process closure; never panics, errors are absorbed into
/// runtime-state counters so a single bad run can't take down the service.
pub async fn process_alert(
    alert: Alert,
    trace_id: String,
    config: Arc<Config>,
    provider: Arc<dyn LlmProvider>,
    runtime_state: Arc<RuntimeState>,
    ledger: Arc<AlertLedger>,
) {
    runtime_state.mark_active(&alert.incident_id);

    if runtime_state.is_hourly_budget_exhausted(config.max_tokens_per_hour) {
        let tokens_used = runtime_state.tokens_last_hour();
        tracing::warn!(
            incident_id = %alert.incident_id,
            trace_id,
            "hourly token budget exhausted, escalating without diagnosis"
        );
        runtime_state.record_run_skipped();
        runtime_state.clear_active(&alert.incident_id);
        ledger.set_status(&alert.incident_id, LedgerStatus::Escalated);
        escalate_budget_exhausted(&config, &alert, &trace_id, tokens_used).await;
        return;
    }

    let system_prompt = match config.load_system_prompt().await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(incident_id = %alert.incident_id, trace_id, error = %e, "failed to load system prompt");
            runtime_state.record_error(
                "agent_failure",
                &format!("failed to load system prompt: {e}"),
                Some(&alert.incident_id),
                Some(&trace_id),
            );
            runtime_state.record_run(0.0, 0, 0, 0.0, true);
            runtime_state.clear_active(&alert.incident_id);
            ledger.set_status(&alert.incident_id, LedgerStatus::Failed);
            return;
        }
    };

    let executor = ToolExecutor::new(
        config.services.iter().map(|s| (s.name.clone(), s.base_url.clone())).collect(),
        config.ops_auth_token.clone(),
        config.pagerduty_api_token.clone(),
        config.pagerduty_routing_key.clone(),
        config.incidents_dir.clone(),
        trace_id.clone(),
        config.scaling_limits.clone(),
        config.smtp.clone(),
    );

    let started = Instant::now();
    let result = run_agent(
        &alert,
        &system_prompt,
        provider.as_ref(),
        &executor,
        &config.llm_model,
        &config.llm_model_escalation,
        config.llm_escalation_turn,
        config.max_tokens_per_incident,
    )
    .await;
    let duration = started.elapsed().as_secs_f64();

    runtime_state.record_run(duration, result.input_tokens, result.output_tokens, result.estimated_cost_usd, false);
    runtime_state.clear_active(&alert.incident_id);
    ledger.set_status(&alert.incident_id, LedgerStatus::Done);

    let models_str = if result.models_used.is_empty() {
        "unknown".to_string()
    } else {
        result.models_used.join("+")
    };

    tracing::info!(
        incident_id = %alert.incident_id,
        trace_id,
        duration_seconds = duration,
        turns = result.turns,
        input_tokens = result.input_tokens,
        output_tokens = result.output_tokens,
        estimated_cost_usd = result.estimated_cost_usd,
        models = %models_str,
        summary = %result.summary.chars().take(200).collect::<String>(),
        "agent run completed"
    );

    append_cost_footer(&config.incidents_dir, &result, duration, &trace_id).await;
}
