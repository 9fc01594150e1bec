//! Tool definitions and executor for the agent loop.
//!
//! Each tool maps to an action the agent can request mid-run. Tools are
//! declared as OpenAI function-calling schemas and dispatched by
//! [`ToolExecutor::execute`], which always returns a JSON string — errors
//! are folded into `{"error": ...}` rather than propagated, since a failed
//! tool call is conversation content the LLM should see, not a crash.

use std::path::{Path, PathBuf};

use reqwest::Client;
use sa_domain::alert::{ScalingConfig, ScalingMode};
use sa_domain::config::SmtpConfig;
use sa_domain::tool::ToolDefinition;
use serde_json::{json, Value};

fn schema(name: &str, description: &str, properties: Value, required: &[&str]) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

/// The fixed registry of tools the agent may call.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        schema(
            "call_ops_endpoint",
            "Call an /ops/* endpoint on a monitored service. Use GET for diagnostic \
             endpoints (status, health, metrics, config, dependencies, errors). Use POST \
             for remediation endpoints (drain, cache/flush, circuits, loglevel). All \
             remediation actions are idempotent and non-destructive.",
            json!({
                "service_name": {"type": "string", "description": "Name of the service from the service registry."},
                "endpoint": {"type": "string", "description": "The /ops/* endpoint path."},
                "method": {"type": "string", "enum": ["GET", "POST"], "description": "HTTP method."},
                "body": {"type": "object", "description": "Optional JSON body for POST requests."},
            }),
            &["service_name", "endpoint", "method"],
        ),
        schema(
            "query_cloud_logs",
            "Query cloud provider logs for a specific service. Read-only. Use this to \
             search for error patterns, trace requests, or correlate events across services.",
            json!({
                "service_name": {"type": "string", "description": "Name of the service to query logs for."},
                "query": {"type": "string", "description": "Log query string."},
                "time_range_minutes": {"type": "integer", "description": "How far back to search, in minutes. Default 30."},
            }),
            &["service_name", "query"],
        ),
        schema(
            "query_cloud_metrics",
            "Query cloud provider metrics for a managed service or resource. Read-only. \
             Use this to check CPU, memory, connection counts, replication lag, queue \
             depth, or other infrastructure metrics.",
            json!({
                "resource": {"type": "string", "description": "The cloud resource to query."},
                "metric": {"type": "string", "description": "The metric name."},
                "time_range_minutes": {"type": "integer", "description": "How far back to query, in minutes. Default 15."},
            }),
            &["resource", "metric"],
        ),
        schema(
            "escalate_pagerduty",
            "Escalate an incident to a human responder via PagerDuty. Use this when the \
             agent cannot confidently resolve the issue. Include the full diagnostic \
             summary and recommended next action.",
            json!({
                "incident_id": {"type": "string", "description": "The PagerDuty incident ID to escalate."},
                "escalation_message": {"type": "string", "description": "Summary for the human responder."},
            }),
            &["incident_id", "escalation_message"],
        ),
        schema(
            "acknowledge_alert",
            "Acknowledge a PagerDuty alert. Use this when the issue has been resolved by \
             the agent or has self-resolved.",
            json!({
                "incident_id": {"type": "string", "description": "The PagerDuty incident ID to acknowledge."},
                "resolution_note": {"type": "string", "description": "Brief description of how the issue was resolved."},
            }),
            &["incident_id", "resolution_note"],
        ),
        schema(
            "write_incident_report",
            "Write an incident report to the incidents directory. Call this at the end of \
             every alert response, whether resolved or escalated.",
            json!({
                "filename": {"type": "string", "description": "Filename for the report. Format: YYYY-MM-DD-HH-MM-<service>-<dedup_key>.md"},
                "content": {"type": "string", "description": "Full markdown content of the incident report."},
            }),
            &["filename", "content"],
        ),
        schema(
            "email_incident_report",
            "Email an incident report after writing it to disk. Call this immediately \
             after write_incident_report to send the report to the configured recipients.",
            json!({
                "subject": {"type": "string", "description": "Email subject line."},
                "content": {"type": "string", "description": "Full markdown content of the incident report."},
            }),
            &["subject", "content"],
        ),
        schema(
            "create_pagerduty_incident",
            "Create a NEW PagerDuty incident to page a human responder. Use this when the \
             alert came from GCP Cloud Monitoring (no existing PagerDuty incident) and the \
             agent cannot resolve the issue. This is how humans get paged — only call this \
             when escalation is needed.",
            json!({
                "summary": {"type": "string", "description": "Brief summary for the PagerDuty incident."},
                "severity": {"type": "string", "enum": ["critical", "error", "warning", "info"], "description": "Incident severity level."},
                "details": {"type": "string", "description": "Full diagnostic details for the human."},
            }),
            &["summary", "severity", "details"],
        ),
        schema(
            "scale_service",
            "Scale a service to a target instance count. Two modes: 'application' calls \
             POST /ops/scale on the service, 'cloud_native' adjusts replica count via \
             cloud provider API. The target must be within the service's configured \
             min/max bounds. Always use an absolute target, never a relative increment.",
            json!({
                "service_name": {"type": "string", "description": "Name of the service from the service registry."},
                "target_instances": {"type": "integer", "minimum": 1, "description": "The desired instance count."},
                "reason": {"type": "string", "description": "Why scaling is needed. Logged in the incident report."},
            }),
            &["service_name", "target_instances", "reason"],
        ),
    ]
}

fn error_envelope(message: impl Into<String>) -> String {
    json!({"error": message.into()}).to_string()
}

/// Executes tool calls requested by the agent loop. One instance per run.
pub struct ToolExecutor {
    services: Vec<(String, String)>,
    ops_auth_token: String,
    pagerduty_api_token: String,
    pagerduty_routing_key: String,
    incidents_dir: PathBuf,
    trace_id: String,
    scaling_config: Vec<ScalingConfig>,
    smtp: SmtpConfig,
    client: Client,
}

impl ToolExecutor {
    pub fn new(
        services: Vec<(String, String)>,
        ops_auth_token: String,
        pagerduty_api_token: String,
        pagerduty_routing_key: String,
        incidents_dir: impl Into<PathBuf>,
        trace_id: String,
        scaling_config: Vec<ScalingConfig>,
        smtp: SmtpConfig,
    ) -> Self {
        Self {
            services,
            ops_auth_token,
            pagerduty_api_token,
            pagerduty_routing_key,
            incidents_dir: incidents_dir.into(),
            trace_id,
            scaling_config,
            smtp,
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("reqwest client build"),
        }
    }

    fn service_url(&self, name: &str) -> Option<&str> {
        self.services
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, url)| url.as_str())
    }

    fn scaling_for(&self, name: &str) -> Option<&ScalingConfig> {
        self.scaling_config.iter().find(|s| s.service_name == name)
    }

    pub async fn execute(&self, tool_name: &str, input: &Value) -> String {
        tracing::info!(tool = %tool_name, trace_id = %self.trace_id, "executing tool");

        match tool_name {
            "call_ops_endpoint" => self.call_ops_endpoint(input).await,
            "query_cloud_logs" => self.query_cloud_logs(input),
            "query_cloud_metrics" => self.query_cloud_metrics(input),
            "escalate_pagerduty" => self.escalate_pagerduty(input).await,
            "acknowledge_alert" => self.acknowledge_alert(input).await,
            "create_pagerduty_incident" => self.create_pagerduty_incident(input).await,
            "write_incident_report" => self.write_incident_report(input).await,
            "email_incident_report" => self.email_incident_report(input).await,
            "scale_service" => self.scale_service(input).await,
            other => error_envelope(format!("Unknown tool: {other}")),
        }
    }

    fn base_headers(&self) -> Vec<(&'static str, String)> {
        if self.trace_id.is_empty() {
            Vec::new()
        } else {
            vec![("X-Trace-Id", self.trace_id.clone())]
        }
    }

    async fn call_ops_endpoint(&self, input: &Value) -> String {
        let service_name = input.get("service_name").and_then(Value::as_str).unwrap_or("");
        let endpoint = input.get("endpoint").and_then(Value::as_str).unwrap_or("");
        let method = input.get("method").and_then(Value::as_str).unwrap_or("GET");

        if service_name.is_empty() || endpoint.is_empty() {
            return error_envelope("service_name and endpoint are required");
        }
        if !endpoint.starts_with("/ops/") {
            return error_envelope(format!("Endpoint must start with /ops/: {endpoint}"));
        }
        if method != "GET" && method != "POST" {
            return error_envelope(format!("Method must be GET or POST: {method}"));
        }
        let Some(base_url) = self.service_url(service_name) else {
            return error_envelope(format!("Unknown service: {service_name}"));
        };

        let url = format!("{}{}", base_url.trim_end_matches('/'), endpoint);
        let mut req = if method == "GET" {
            self.client.get(&url)
        } else {
            let body = input.get("body").cloned().unwrap_or_else(|| json!({}));
            self.client.post(&url).json(&body)
        };
        for (k, v) in self.base_headers() {
            req = req.header(k, v);
        }
        if !self.ops_auth_token.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.ops_auth_token));
        }

        match req.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = match resp.text().await {
                    Ok(text) => serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text)),
                    Err(e) => Value::String(format!("<failed to read body: {e}>")),
                };
                json!({"status_code": status, "body": body}).to_string()
            }
            Err(e) => error_envelope(e.to_string()),
        }
    }

    fn query_cloud_logs(&self, _input: &Value) -> String {
        error_envelope(
            "Cloud log querying not yet implemented. Implement query_cloud_logs for your cloud provider.",
        )
    }

    fn query_cloud_metrics(&self, _input: &Value) -> String {
        error_envelope(
            "Cloud metrics querying not yet implemented. Implement query_cloud_metrics for your cloud provider.",
        )
    }

    async fn escalate_pagerduty(&self, input: &Value) -> String {
        let incident_id = input.get("incident_id").and_then(Value::as_str).unwrap_or("");
        let message = input.get("escalation_message").and_then(Value::as_str).unwrap_or("");
        if incident_id.is_empty() || message.is_empty() {
            return error_envelope("incident_id and escalation_message are required");
        }

        if let Some(raw_id) = incident_id.strip_prefix("gcp-") {
            let _ = raw_id;
            let truncated: String = message.chars().take(200).collect();
            let summary = format!("[SRE Agent Escalation] {truncated}");
            return self
                .create_pagerduty_incident(&json!({
                    "summary": summary,
                    "severity": "critical",
                    "details": message,
                }))
                .await;
        }

        let headers = self.pagerduty_headers();
        let note_resp = self
            .client
            .post(format!("https://api.pagerduty.com/incidents/{incident_id}/notes"))
            .headers(headers.clone())
            .json(&json!({"note": {"content": format!("[SRE Agent Escalation]\n\n{message}")}}))
            .send()
            .await;

        let note_status = match note_resp {
            Ok(r) => r.status().as_u16(),
            Err(e) => return error_envelope(e.to_string()),
        };

        if let Err(e) = self
            .client
            .put(format!("https://api.pagerduty.com/incidents/{incident_id}"))
            .headers(headers)
            .json(&json!({"incident": {"type": "incident_reference", "escalation_level": 2}}))
            .send()
            .await
        {
            return error_envelope(e.to_string());
        }

        tracing::info!(incident_id, trace_id = %self.trace_id, "escalated");
        json!({"status": "escalated", "incident_id": incident_id, "note_status": note_status}).to_string()
    }

    async fn acknowledge_alert(&self, input: &Value) -> String {
        let incident_id = input.get("incident_id").and_then(Value::as_str).unwrap_or("");
        let note = input.get("resolution_note").and_then(Value::as_str).unwrap_or("");
        if incident_id.is_empty() || note.is_empty() {
            return error_envelope("incident_id and resolution_note are required");
        }

        if incident_id.starts_with("gcp-") {
            tracing::info!(incident_id, trace_id = %self.trace_id, "gcp alert resolved by agent, no pagerduty incident");
            return json!({
                "status": "resolved_by_agent",
                "incident_id": incident_id,
                "message": "GCP-sourced alert resolved without paging humans.",
            })
            .to_string();
        }

        let headers = self.pagerduty_headers();
        if let Err(e) = self
            .client
            .post(format!("https://api.pagerduty.com/incidents/{incident_id}/notes"))
            .headers(headers.clone())
            .json(&json!({"note": {"content": format!("[SRE Agent Resolution]\n\n{note}")}}))
            .send()
            .await
        {
            return error_envelope(e.to_string());
        }

        let resp = self
            .client
            .put(format!("https://api.pagerduty.com/incidents/{incident_id}"))
            .headers(headers)
            .json(&json!({"incident": {"type": "incident_reference", "status": "acknowledged"}}))
            .send()
            .await;

        let response_status = match resp {
            Ok(r) => r.status().as_u16(),
            Err(e) => return error_envelope(e.to_string()),
        };

        tracing::info!(incident_id, trace_id = %self.trace_id, "acknowledged");
        json!({"status": "acknowledged", "incident_id": incident_id, "response_status": response_status}).to_string()
    }

    async fn create_pagerduty_incident(&self, input: &Value) -> String {
        let summary = input.get("summary").and_then(Value::as_str).unwrap_or("");
        let severity = input.get("severity").and_then(Value::as_str).unwrap_or("critical");
        let details = input.get("details").and_then(Value::as_str).unwrap_or("");

        if summary.is_empty() {
            return error_envelope("summary is required");
        }
        if self.pagerduty_routing_key.is_empty() {
            return error_envelope(
                "PAGERDUTY_ROUTING_KEY not configured. Cannot create PagerDuty incidents.",
            );
        }

        let dedup_key = if self.trace_id.is_empty() {
            Value::Null
        } else {
            Value::String(format!("sre-agent-{}", self.trace_id))
        };

        let payload = json!({
            "routing_key": self.pagerduty_routing_key,
            "event_action": "trigger",
            "dedup_key": dedup_key,
            "payload": {
                "summary": summary,
                "severity": severity,
                "source": "sre-agent",
                "custom_details": {
                    "agent_trace_id": self.trace_id,
                    "diagnostic_details": details,
                },
            },
        });

        let resp = match self
            .client
            .post("https://events.pagerduty.com/v2/enqueue")
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return error_envelope(e.to_string()),
        };

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if status.as_u16() == 202 {
            let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
            let dedup = parsed.get("dedup_key").and_then(Value::as_str).unwrap_or("");
            let message = parsed.get("message").and_then(Value::as_str).unwrap_or("");
            tracing::info!(dedup_key = dedup, trace_id = %self.trace_id, "pagerduty incident created");
            json!({"status": "incident_created", "dedup_key": dedup, "message": message}).to_string()
        } else {
            tracing::error!(status = status.as_u16(), body = %text, trace_id = %self.trace_id, "failed to create pagerduty incident");
            json!({"error": format!("PagerDuty Events API returned {status}"), "body": text}).to_string()
        }
    }

    async fn write_incident_report(&self, input: &Value) -> String {
        let filename = input.get("filename").and_then(Value::as_str).unwrap_or("");
        let content = input.get("content").and_then(Value::as_str).unwrap_or("");
        if filename.is_empty() || content.is_empty() {
            return error_envelope("filename and content are required");
        }

        let safe_name = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if safe_name != filename {
            return error_envelope(format!("Invalid filename (path traversal rejected): {filename}"));
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.incidents_dir).await {
            return error_envelope(format!("failed to create incidents dir: {e}"));
        }
        let filepath = self.incidents_dir.join(&safe_name);
        if let Err(e) = tokio::fs::write(&filepath, content).await {
            return error_envelope(format!("failed to write report: {e}"));
        }

        tracing::info!(path = %filepath.display(), trace_id = %self.trace_id, "incident report written");
        tracing::info!(
            filename = %safe_name,
            trace_id = %self.trace_id,
            incident_report = %content,
            "INCIDENT_REPORT"
        );

        json!({"status": "written", "path": filepath.to_string_lossy()}).to_string()
    }

    async fn email_incident_report(&self, input: &Value) -> String {
        let subject = input.get("subject").and_then(Value::as_str).unwrap_or("");
        let content = input.get("content").and_then(Value::as_str).unwrap_or("");
        if subject.is_empty() || content.is_empty() {
            return error_envelope("subject and content are required");
        }

        if !self.smtp.is_enabled() {
            return error_envelope(
                "SMTP not configured. Set SMTP_HOST and SMTP_TO environment variables.",
            );
        }

        let from = if self.smtp.from.is_empty() {
            self.smtp.username.clone()
        } else {
            self.smtp.from.clone()
        };

        let email = match lettre::Message::builder()
            .from(match from.parse() {
                Ok(m) => m,
                Err(e) => return error_envelope(format!("invalid SMTP_FROM address: {e}")),
            })
            .to(match self.smtp.to.parse() {
                Ok(m) => m,
                Err(e) => return error_envelope(format!("invalid SMTP_TO address: {e}")),
            })
            .subject(subject)
            .body(content.to_string())
        {
            Ok(m) => m,
            Err(e) => return error_envelope(format!("failed to build email: {e}")),
        };

        let mailer_result = if !self.smtp.username.is_empty() && !self.smtp.password.is_empty() {
            let creds = lettre::transport::smtp::authentication::Credentials::new(
                self.smtp.username.clone(),
                self.smtp.password.clone(),
            );
            lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&self.smtp.host)
                .map(|b| b.port(self.smtp.port).credentials(creds).build())
        } else {
            lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&self.smtp.host)
                .map(|b| b.port(self.smtp.port).build())
        };

        let mailer = match mailer_result {
            Ok(m) => m,
            Err(e) => return error_envelope(format!("failed to configure SMTP transport: {e}")),
        };

        match tokio::time::timeout(std::time::Duration::from_secs(15), mailer.send(email)).await {
            Ok(Ok(_)) => {
                tracing::info!(
                    to = %self.smtp.to,
                    subject = %subject,
                    trace_id = %self.trace_id,
                    "incident report emailed"
                );
                json!({"status": "sent", "to": self.smtp.to, "subject": subject}).to_string()
            }
            Ok(Err(e)) => {
                tracing::warn!(trace_id = %self.trace_id, error = %e, "failed to send incident report email");
                error_envelope(format!("failed to send email: {e}"))
            }
            Err(_) => {
                tracing::warn!(trace_id = %self.trace_id, "timed out sending incident report email");
                error_envelope("SMTP send timed out")
            }
        }
    }

    async fn scale_service(&self, input: &Value) -> String {
        let service_name = input.get("service_name").and_then(Value::as_str).unwrap_or("");
        let target = input.get("target_instances").and_then(Value::as_u64);
        let reason = input.get("reason").and_then(Value::as_str).unwrap_or("");

        let Some(target) = target else {
            return error_envelope("service_name, target_instances, and reason are required");
        };
        if service_name.is_empty() || reason.is_empty() || target == 0 {
            return error_envelope("service_name, target_instances, and reason are required");
        }

        let Some(scaling) = self.scaling_for(service_name) else {
            return error_envelope(format!(
                "Service '{service_name}' does not have scaling limits configured. Cannot \
                 scale. Escalate to a human for capacity changes."
            ));
        };

        if (target as u32) < scaling.min_instances {
            return error_envelope(format!(
                "Target {target} is below minimum ({}) for service '{service_name}'.",
                scaling.min_instances
            ));
        }
        if (target as u32) > scaling.max_instances {
            return error_envelope(format!(
                "Target {target} exceeds maximum ({}) for service '{service_name}'. Escalate \
                 for capacity planning.",
                scaling.max_instances
            ));
        }

        tracing::info!(
            service = service_name,
            target,
            mode = ?scaling.mode,
            reason,
            trace_id = %self.trace_id,
            "scaling service"
        );

        match scaling.mode {
            ScalingMode::Application => {
                let Some(base_url) = self.service_url(service_name) else {
                    return error_envelope(format!("Service '{service_name}' not in service registry"));
                };
                let url = format!("{}/ops/scale", base_url.trim_end_matches('/'));
                let mut req = self
                    .client
                    .post(&url)
                    .json(&json!({"target_instances": target, "reason": reason}));
                for (k, v) in self.base_headers() {
                    req = req.header(k, v);
                }
                if !self.ops_auth_token.is_empty() {
                    req = req.header("Authorization", format!("Bearer {}", self.ops_auth_token));
                }

                match req.send().await {
                    Ok(resp) => {
                        let status = resp.status().as_u16();
                        let body = match resp.text().await {
                            Ok(text) => serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text)),
                            Err(e) => Value::String(format!("<failed to read body: {e}>")),
                        };
                        json!({
                            "status": "scaling_requested",
                            "mode": "application",
                            "service": service_name,
                            "target_instances": target,
                            "response_status": status,
                            "response_body": body,
                        })
                        .to_string()
                    }
                    Err(e) => error_envelope(e.to_string()),
                }
            }
            ScalingMode::CloudNative => error_envelope(
                "Cloud-native scaling not yet implemented. Implement scale_service \
                 cloud_native mode for your cloud provider.",
            ),
        }
    }

    fn pagerduty_headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(v) = reqwest::header::HeaderValue::from_str(&format!(
            "Token token={}",
            self.pagerduty_api_token
        )) {
            headers.insert(reqwest::header::AUTHORIZATION, v);
        }
        if !self.trace_id.is_empty() {
            if let Ok(v) = reqwest::header::HeaderValue::from_str(&self.trace_id) {
                headers.insert("X-Trace-Id", v);
            }
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> ToolExecutor {
        ToolExecutor::new(
            vec![("api".into(), "https://api.internal".into())],
            "ops-token".into(),
            "pd-token".into(),
            "routing-key".into(),
            "/tmp/incidents-test",
            "trace-1".into(),
            vec![ScalingConfig {
                service_name: "api".into(),
                min_instances: 2,
                max_instances: 10,
                mode: ScalingMode::Application,
            }],
            SmtpConfig {
                host: "".into(),
                port: 587,
                username: "".into(),
                password: "".into(),
                from: "".into(),
                to: "".into(),
            },
        )
    }

    #[tokio::test]
    async fn unknown_tool_returns_error_envelope() {
        let exec = executor();
        let result = exec.execute("bogus_tool", &json!({})).await;
        let parsed: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed["error"], "Unknown tool: bogus_tool");
    }

    #[tokio::test]
    async fn call_ops_endpoint_rejects_non_ops_path() {
        let exec = executor();
        let result = exec
            .execute(
                "call_ops_endpoint",
                &json!({"service_name": "api", "endpoint": "/admin/delete", "method": "GET"}),
            )
            .await;
        let parsed: Value = serde_json::from_str(&result).unwrap();
        assert!(parsed["error"].as_str().unwrap().contains("/ops/"));
    }

    #[tokio::test]
    async fn write_incident_report_rejects_path_traversal() {
        let exec = executor();
        let result = exec
            .execute(
                "write_incident_report",
                &json!({"filename": "../../etc/passwd", "content": "x"}),
            )
            .await;
        let parsed: Value = serde_json::from_str(&result).unwrap();
        assert!(parsed["error"]
            .as_str()
            .unwrap()
            .contains("path traversal rejected"));
    }

    #[tokio::test]
    async fn scale_service_rejects_target_below_minimum() {
        let exec = executor();
        let result = exec
            .execute(
                "scale_service",
                &json!({"service_name": "api", "target_instances": 1, "reason": "test"}),
            )
            .await;
        let parsed: Value = serde_json::from_str(&result).unwrap();
        assert!(parsed["error"].as_str().unwrap().contains("below minimum"));
    }

    #[tokio::test]
    async fn scale_service_rejects_target_above_maximum() {
        let exec = executor();
        let result = exec
            .execute(
                "scale_service",
                &json!({"service_name": "api", "target_instances": 50, "reason": "test"}),
            )
            .await;
        let parsed: Value = serde_json::from_str(&result).unwrap();
        assert!(parsed["error"].as_str().unwrap().contains("exceeds maximum"));
    }

    #[tokio::test]
    async fn scale_service_rejects_unconfigured_service() {
        let exec = executor();
        let result = exec
            .execute(
                "scale_service",
                &json!({"service_name": "ghost", "target_instances": 3, "reason": "test"}),
            )
            .await;
        let parsed: Value = serde_json::from_str(&result).unwrap();
        assert!(parsed["error"]
            .as_str()
            .unwrap()
            .contains("does not have scaling limits"));
    }

    #[tokio::test]
    async fn email_incident_report_requires_smtp_configuration() {
        let exec = executor();
        let result = exec
            .execute("email_incident_report", &json!({"subject": "s", "content": "c"}))
            .await;
        let parsed: Value = serde_json::from_str(&result).unwrap();
        assert!(parsed["error"].as_str().unwrap().contains("SMTP not configured"));
    }

    #[tokio::test]
    async fn acknowledge_gcp_alert_skips_pagerduty() {
        let exec = executor();
        let result = exec
            .execute(
                "acknowledge_alert",
                &json!({"incident_id": "gcp-123", "resolution_note": "self-healed"}),
            )
            .await;
        let parsed: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed["status"], "resolved_by_agent");
    }

    #[test]
    fn tool_definitions_cover_all_nine_tools() {
        let defs = tool_definitions();
        assert_eq!(defs.len(), 9);
        assert!(defs.iter().any(|d| d.name == "call_ops_endpoint"));
        assert!(defs.iter().any(|d| d.name == "scale_service"));
    }
}
