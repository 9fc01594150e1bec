//! The agent loop: drives a single alert through the LLM, dispatching tool
//! calls until the model produces a final summary or a budget is exceeded.

use std::time::{Duration, Instant};

use sa_domain::alert::Alert;
use sa_domain::tool::{ContentPart, Message, MessageContent, Role, ToolDefinition};
use sa_providers::{ChatRequest, LlmProvider};

use super::tools::{tool_definitions, ToolExecutor};

const MAX_TURNS: u32 = 20;
const MAX_DURATION: Duration = Duration::from_secs(300);
const MAX_TOKENS_PER_CALL: u32 = 4096;

/// USD per 1M tokens, (input, output). Models absent from this table are
/// treated as zero-cost since no pricing data is available for them.
const MODEL_PRICING: &[(&str, f64, f64)] = &[
    ("google/gemini-2.0-flash", 0.10, 0.40),
    ("google/gemini-2.5-flash", 0.15, 0.60),
    ("google/gemini-2.5-pro", 1.25, 10.00),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4o-mini", 0.15, 0.60),
];

pub fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    match MODEL_PRICING.iter().find(|(name, _, _)| *name == model) {
        Some((_, input_rate, output_rate)) => {
            (input_tokens as f64 / 1_000_000.0) * input_rate
                + (output_tokens as f64 / 1_000_000.0) * output_rate
        }
        None => 0.0,
    }
}

#[derive(Debug, Clone)]
pub struct AgentResult {
    pub summary: String,
    pub turns: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
    pub models_used: Vec<String>,
    pub tool_calls_made: Vec<String>,
}

/// Render the alert as the markdown message handed to the model as the
/// first user turn.
fn format_alert_message(alert: &Alert) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "## PagerDuty Alert — {}\n\n",
        alert.severity.as_str().to_uppercase()
    ));
    out.push_str(&format!("**Incident ID:** {}\n", alert.incident_id));
    out.push_str(&format!("**Service:** {}\n", alert.service_name));
    out.push_str(&format!("**Severity:** {}\n", alert.severity.as_str()));
    out.push_str(&format!("**Description:** {}\n", alert.description));

    if let Some(priority) = alert.priority {
        out.push_str(&format!("**Priority:** {}\n", priority.as_str()));
    }
    if let Some(dedup_key) = &alert.dedup_key {
        out.push_str(&format!("**Dedup Key:** {dedup_key}\n"));
    }
    if let Some(runbook_url) = &alert.runbook_url {
        out.push_str(&format!("**Runbook:** {runbook_url}\n"));
    }
    out.push_str(&format!(
        "**Triggered At:** {}\n",
        alert.timestamp.to_rfc3339()
    ));

    if !alert.details.is_null() {
        if let Ok(pretty) = serde_json::to_string_pretty(&alert.details) {
            out.push_str(&format!("\n```json\n{pretty}\n```\n"));
        }
    }

    out.push_str(
        "\nDiagnose this alert following the workflow in your system prompt. Start by \
         checking /ops/status on the affected service.",
    );
    out
}

/// Drives one full alert-response conversation to completion.
///
/// `max_tokens_remaining_hint` lets the caller pre-empt a run that would
/// blow the hourly token budget; it only affects logging, the hard budget
/// gate lives in the intake/process layer.
pub async fn run_agent(
    alert: &Alert,
    system_prompt: &str,
    provider: &dyn LlmProvider,
    executor: &ToolExecutor,
    model: &str,
    escalation_model: &str,
    escalation_turn: u32,
    max_tokens_per_incident: u64,
) -> AgentResult {
    let started = Instant::now();
    let tools: Vec<ToolDefinition> = tool_definitions();

    let mut messages = vec![
        Message::system(system_prompt.to_string()),
        Message::user(format_alert_message(alert)),
    ];

    let mut input_tokens: u64 = 0;
    let mut output_tokens: u64 = 0;
    let mut estimated_cost_usd: f64 = 0.0;
    let mut models_used: Vec<String> = Vec::new();
    let mut tool_calls_made: Vec<String> = Vec::new();

    let mut current_model = model.to_string();
    let mut escalated = false;

    let mut summary: Option<String> = None;
    let mut turns_completed: u32 = 0;

    for turn in 1..=MAX_TURNS {
        turns_completed = turn;
        if !escalated && turn >= escalation_turn && !escalation_model.is_empty() {
            current_model = escalation_model.to_string();
            escalated = true;
            tracing::info!(
                incident_id = %alert.incident_id,
                turn,
                model = %current_model,
                "escalating to stronger model"
            );
        }

        if started.elapsed() >= MAX_DURATION {
            summary = Some(format!(
                "Duration limit exceeded ({} seconds). Escalating.",
                MAX_DURATION.as_secs()
            ));
            break;
        }

        if input_tokens + output_tokens >= max_tokens_per_incident {
            summary = Some(format!(
                "Token budget exceeded ({max_tokens_per_incident} tokens). Escalating."
            ));
            break;
        }

        let req = ChatRequest {
            messages: messages.clone(),
            tools: tools.clone(),
            max_tokens: Some(MAX_TOKENS_PER_CALL),
            model: Some(current_model.clone()),
        };

        let resp = match provider.chat(&req).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(incident_id = %alert.incident_id, turn, error = %e, "llm call failed");
                summary = Some(format!("LLM call failed on turn {turn}: {e}"));
                break;
            }
        };

        if let Some(usage) = resp.usage {
            input_tokens += usage.prompt_tokens as u64;
            output_tokens += usage.completion_tokens as u64;
            estimated_cost_usd += estimate_cost(
                &resp.model,
                usage.prompt_tokens as u64,
                usage.completion_tokens as u64,
            );
        }
        if !models_used.contains(&resp.model) {
            models_used.push(resp.model.clone());
        }

        if !resp.tool_calls.is_empty() {
            let mut assistant_parts: Vec<ContentPart> = Vec::new();
            if !resp.content.is_empty() {
                assistant_parts.push(ContentPart::Text {
                    text: resp.content.clone(),
                });
            }
            for tc in &resp.tool_calls {
                assistant_parts.push(ContentPart::ToolUse {
                    id: tc.call_id.clone(),
                    name: tc.tool_name.clone(),
                    input: tc.arguments.clone(),
                });
            }
            messages.push(Message {
                role: Role::Assistant,
                content: MessageContent::Parts(assistant_parts),
            });

            for tc in &resp.tool_calls {
                tracing::info!(
                    incident_id = %alert.incident_id,
                    turn,
                    tool = %tc.tool_name,
                    "dispatching tool call"
                );
                tool_calls_made.push(tc.tool_name.clone());

                let result = executor.execute(&tc.tool_name, &tc.arguments).await;
                messages.push(Message::tool_result(tc.call_id.clone(), result));
            }
            continue;
        }

        if !resp.content.is_empty() {
            summary = Some(resp.content.clone());
            tracing::info!(incident_id = %alert.incident_id, turn, "agent produced final summary");
            break;
        }

        tracing::warn!(incident_id = %alert.incident_id, turn, "agent produced empty response");
        summary = Some("Agent produced empty response.".to_string());
        break;
    }

    AgentResult {
        summary: summary.unwrap_or_else(|| format!("Max turns reached ({MAX_TURNS}). Escalating.")),
        turns: turns_completed,
        input_tokens,
        output_tokens,
        estimated_cost_usd,
        models_used,
        tool_calls_made,
    }
}

/// Appends an `## LLM Usage` footer table to the most-recently-modified
/// report in the incidents directory after a run, then logs the full
/// updated file contents at info level under a distinct message so the
/// cost-annotated report is visible in log aggregation even without
/// persistent disk. Best-effort: failures are logged, never propagated,
/// since the run itself has already completed.
pub async fn append_cost_footer(
    incidents_dir: &str,
    result: &AgentResult,
    duration_seconds: f64,
    trace_id: &str,
) {
    let mut read_dir = match tokio::fs::read_dir(incidents_dir).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(trace_id, error = %e, "could not open incidents dir for cost footer");
            return;
        }
    };

    let mut newest: Option<(std::path::PathBuf, std::time::SystemTime)> = None;
    loop {
        let entry = match read_dir.next_entry().await {
            Ok(Some(e)) => e,
            Ok(None) => break,
            Err(_) => break,
        };
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if newest.as_ref().map(|(_, t)| modified > *t).unwrap_or(true) {
            newest = Some((entry.path(), modified));
        }
    }

    let Some((path, _)) = newest else {
        return;
    };

    let models_str = if result.models_used.is_empty() {
        "unknown".to_string()
    } else {
        result.models_used.join(", ")
    };
    let total_tokens = result.input_tokens + result.output_tokens;

    let footer = format!(
        "\n\n---\n## LLM Usage\n\n\
         | Metric | Value |\n\
         |---|---|\n\
         | Models | {models_str} |\n\
         | Turns | {} |\n\
         | Input tokens | {} |\n\
         | Output tokens | {} |\n\
         | Total tokens | {} |\n\
         | Estimated cost | ${:.4} |\n\
         | Duration | {:.1}s |\n",
        result.turns,
        result.input_tokens,
        result.output_tokens,
        total_tokens,
        result.estimated_cost_usd,
        duration_seconds,
    );

    if let Err(e) = append_to_file(&path, &footer).await {
        tracing::warn!(trace_id, path = %path.display(), error = %e, "failed to append cost footer");
        return;
    }

    match tokio::fs::read_to_string(&path).await {
        Ok(full_report) => {
            tracing::info!(
                filename = %path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
                trace_id,
                total_tokens,
                estimated_cost_usd = result.estimated_cost_usd,
                models = %models_str,
                report = %full_report,
                "INCIDENT_REPORT_FINAL"
            );
        }
        Err(e) => {
            tracing::warn!(trace_id, path = %path.display(), error = %e, "failed to re-read incident report for final log");
        }
    }
}

async fn append_to_file(path: &std::path::Path, content: &str) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new().append(true).open(path).await?;
    file.write_all(content.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_cost_known_model() {
        let cost = estimate_cost("gpt-4o", 1_000_000, 1_000_000);
        assert!((cost - 12.50).abs() < 1e-9);
    }

    #[test]
    fn estimate_cost_unknown_model_is_zero() {
        assert_eq!(estimate_cost("mystery-model", 1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn format_alert_message_includes_core_fields() {
        use chrono::Utc;
        use sa_domain::alert::{AlertSeverity, Priority};
        use serde_json::Value;

        let alert = Alert {
            incident_id: "inc-1".into(),
            service_name: "api".into(),
            severity: AlertSeverity::Critical,
            priority: Some(Priority::P1),
            description: "API down".into(),
            dedup_key: Some("dk-1".into()),
            runbook_url: Some("https://runbooks/api".into()),
            timestamp: Utc::now(),
            details: Value::Null,
        };
        let msg = format_alert_message(&alert);
        assert!(msg.contains("inc-1"));
        assert!(msg.contains("API down"));
        assert!(msg.contains("P1"));
        assert!(msg.contains("dk-1"));
        assert!(msg.contains("/ops/status"));
    }
}
