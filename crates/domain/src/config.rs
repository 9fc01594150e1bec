//! Runtime configuration loaded from environment variables.
//!
//! All secrets are loaded from the environment, which should be injected
//! from the deployment's secrets manager. Never hardcode a secret here.

use crate::alert::{ScalingConfig, ScalingMode, ServiceEndpoint};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub to: String,
}

impl SmtpConfig {
    pub fn is_enabled(&self) -> bool {
        !self.host.is_empty() && !self.to.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // LLM provider (OpenAI-compatible).
    pub llm_api_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_model_escalation: String,
    pub llm_escalation_turn: u32,

    // Incident provider.
    pub pagerduty_api_token: String,
    pub pagerduty_escalation_policy_id: String,
    pub pagerduty_routing_key: String,
    pub pagerduty_webhook_secret: String,

    pub sre_prompt_path: String,
    pub incidents_dir: String,

    pub services: Vec<ServiceEndpoint>,
    pub scaling_limits: Vec<ScalingConfig>,

    pub max_concurrent_alerts: u32,
    pub alert_queue_ttl_seconds: i64,
    pub alert_ledger_sweep_seconds: u64,

    pub max_tokens_per_incident: u64,
    pub max_tokens_per_hour: u64,

    pub smtp: SmtpConfig,

    pub ops_auth_token: String,

    pub bind_addr: String,
    pub cors_allowed_origins: Vec<String>,

    /// OTLP collector endpoint for trace export. Tracing export is a no-op
    /// when unset.
    pub otel_exporter_otlp_endpoint: Option<String>,
    pub otel_service_name: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let llm_api_base_url = env_or(
            "LLM_API_BASE_URL",
            "https://models.inference.ai.azure.com",
        );
        let llm_model = env_or("LLM_MODEL", "gpt-4o");
        let llm_model_escalation = env_or("LLM_MODEL_ESCALATION", "");
        let llm_escalation_turn = env_or("LLM_ESCALATION_TURN", "5")
            .parse::<u32>()
            .map_err(|_| Error::Config("LLM_ESCALATION_TURN must be an integer".into()))?;

        let vertex_ai = llm_api_base_url.contains("aiplatform.googleapis.com");
        let llm_api_key = if vertex_ai {
            // Ambient credentials (ADC) are resolved by the provider adapter
            // at call time; no static key is required here.
            String::new()
        } else {
            require_env("LLM_API_KEY")?
        };

        let pagerduty_api_token = require_env("PAGERDUTY_API_TOKEN")?;
        let pagerduty_escalation_policy_id = env_or("PAGERDUTY_ESCALATION_POLICY_ID", "");
        let pagerduty_routing_key = env_or("PAGERDUTY_ROUTING_KEY", "");
        let pagerduty_webhook_secret = env_or("PAGERDUTY_WEBHOOK_SECRET", "");

        let sre_prompt_path = env_or("SRE_PROMPT_PATH", "/app/WINDSURF_SRE.md");
        let incidents_dir = env_or("INCIDENTS_DIR", "/app/incidents");

        let services = parse_service_registry(&require_env("SERVICE_REGISTRY")?)?;
        let scaling_limits = parse_scaling_limits(&env_or("SCALING_LIMITS", ""))?;

        let max_concurrent_alerts = env_or("MAX_CONCURRENT_ALERTS", "3")
            .parse::<u32>()
            .map_err(|_| Error::Config("MAX_CONCURRENT_ALERTS must be an integer".into()))?;
        if max_concurrent_alerts < 1 {
            return Err(Error::Config(format!(
                "MAX_CONCURRENT_ALERTS must be >= 1, got {max_concurrent_alerts}"
            )));
        }

        let alert_queue_ttl_seconds = env_or("ALERT_QUEUE_TTL_SECONDS", "600")
            .parse::<i64>()
            .map_err(|_| Error::Config("ALERT_QUEUE_TTL_SECONDS must be an integer".into()))?;
        if alert_queue_ttl_seconds < 0 {
            return Err(Error::Config(format!(
                "ALERT_QUEUE_TTL_SECONDS must be >= 0, got {alert_queue_ttl_seconds}"
            )));
        }

        let alert_ledger_sweep_seconds = env_or("ALERT_LEDGER_SWEEP_SECONDS", "60")
            .parse::<u64>()
            .map_err(|_| Error::Config("ALERT_LEDGER_SWEEP_SECONDS must be an integer".into()))?;

        let max_tokens_per_incident = env_or("MAX_TOKENS_PER_INCIDENT", "100000")
            .parse::<u64>()
            .map_err(|_| Error::Config("MAX_TOKENS_PER_INCIDENT must be an integer".into()))?;
        let max_tokens_per_hour = env_or("MAX_TOKENS_PER_HOUR", "0")
            .parse::<u64>()
            .map_err(|_| Error::Config("MAX_TOKENS_PER_HOUR must be an integer".into()))?;

        let smtp_username = env_or("SMTP_USERNAME", "");
        let smtp = SmtpConfig {
            host: env_or("SMTP_HOST", ""),
            port: env_or("SMTP_PORT", "587")
                .parse::<u16>()
                .map_err(|_| Error::Config("SMTP_PORT must be an integer".into()))?,
            from: env_or("SMTP_FROM", &smtp_username),
            username: smtp_username,
            password: env_or("SMTP_PASSWORD", ""),
            to: env_or("SMTP_TO", ""),
        };

        let ops_auth_token = require_env("OPS_AUTH_TOKEN")?;

        let bind_addr = env_or("BIND_ADDR", "0.0.0.0:8080");
        let cors_allowed_origins = env_or("CORS_ALLOWED_ORIGINS", "*")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let otel_exporter_otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|v| !v.is_empty());
        let otel_service_name = env_or("OTEL_SERVICE_NAME", "sre-agent");

        Ok(Config {
            llm_api_base_url,
            llm_api_key,
            llm_model,
            llm_model_escalation,
            llm_escalation_turn,
            pagerduty_api_token,
            pagerduty_escalation_policy_id,
            pagerduty_routing_key,
            pagerduty_webhook_secret,
            sre_prompt_path,
            incidents_dir,
            services,
            scaling_limits,
            max_concurrent_alerts,
            alert_queue_ttl_seconds,
            alert_ledger_sweep_seconds,
            max_tokens_per_incident,
            max_tokens_per_hour,
            smtp,
            ops_auth_token,
            bind_addr,
            cors_allowed_origins,
            otel_exporter_otlp_endpoint,
            otel_service_name,
        })
    }

    pub fn is_vertex_ai(&self) -> bool {
        self.llm_api_base_url.contains("aiplatform.googleapis.com")
    }

    pub fn scaling_for(&self, service_name: &str) -> Option<&ScalingConfig> {
        self.scaling_limits
            .iter()
            .find(|s| s.service_name == service_name)
    }

    pub fn service_url(&self, service_name: &str) -> Option<&str> {
        self.services
            .iter()
            .find(|s| s.name == service_name)
            .map(|s| s.base_url.as_str())
    }

    /// Load the system prompt markdown from disk.
    pub async fn load_system_prompt(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.sre_prompt_path)
            .await
            .map_err(Error::Io)
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn require_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::Config(format!(
            "required environment variable {var} is not set. Set it in your deployment \
             configuration or secrets manager."
        ))),
    }
}

/// Parse `SERVICE_REGISTRY=name|url|critical,name2|url2|critical`.
fn parse_service_registry(raw: &str) -> Result<Vec<ServiceEndpoint>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut services = Vec::new();
    for entry in raw.split(',') {
        let parts: Vec<&str> = entry.trim().split('|').collect();
        if parts.len() < 2 {
            return Err(Error::Config(format!(
                "invalid SERVICE_REGISTRY entry: '{}'. Expected format: name|url|critical",
                entry.trim()
            )));
        }
        let name = parts[0].trim().to_string();
        let url = parts[1].trim().to_string();
        let scheme_ok = url.starts_with("http://") || url.starts_with("https://");
        if !scheme_ok {
            return Err(Error::Config(format!(
                "invalid URL scheme for service '{name}': {url}. Must be http or https."
            )));
        }
        let critical = parts
            .get(2)
            .map(|s| s.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(true);
        services.push(ServiceEndpoint {
            name,
            base_url: url,
            critical,
        });
    }
    Ok(services)
}

/// Parse `SCALING_LIMITS=name|min|max|mode,name2|min|max|mode`.
fn parse_scaling_limits(raw: &str) -> Result<Vec<ScalingConfig>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut limits = Vec::new();
    for entry in raw.split(',') {
        let parts: Vec<&str> = entry.trim().split('|').collect();
        if parts.len() != 4 {
            return Err(Error::Config(format!(
                "invalid SCALING_LIMITS entry: '{}'. Expected format: name|min|max|mode",
                entry.trim()
            )));
        }
        let name = parts[0].trim().to_string();
        let min_inst: u32 = parts[1]
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid min_instances for '{name}'")))?;
        let max_inst: u32 = parts[2]
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid max_instances for '{name}'")))?;
        let mode = match parts[3].trim() {
            "application" => ScalingMode::Application,
            "cloud_native" => ScalingMode::CloudNative,
            other => {
                return Err(Error::Config(format!(
                    "invalid scaling mode for '{name}': '{other}'. Must be 'application' or 'cloud_native'."
                )))
            }
        };
        if min_inst < 1 {
            return Err(Error::Config(format!(
                "invalid min_instances for '{name}': {min_inst}. Must be >= 1."
            )));
        }
        if max_inst < min_inst {
            return Err(Error::Config(format!(
                "invalid scaling limits for '{name}': max ({max_inst}) must be >= min ({min_inst})."
            )));
        }
        limits.push(ScalingConfig {
            service_name: name,
            min_instances: min_inst,
            max_instances: max_inst,
            mode,
        });
    }
    Ok(limits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_service_registry_basic() {
        let services =
            parse_service_registry("api|https://api.internal|true,web|http://web.internal")
                .unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].name, "api");
        assert!(services[0].critical);
        assert!(services[1].critical); // default
    }

    #[test]
    fn parse_service_registry_rejects_bad_scheme() {
        let err = parse_service_registry("api|ftp://bad").unwrap_err();
        assert!(err.to_string().contains("scheme"));
    }

    #[test]
    fn parse_scaling_limits_basic() {
        let limits = parse_scaling_limits("api|1|5|application").unwrap();
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].min_instances, 1);
        assert_eq!(limits[0].max_instances, 5);
        assert_eq!(limits[0].mode, ScalingMode::Application);
    }

    #[test]
    fn parse_scaling_limits_rejects_max_below_min() {
        let err = parse_scaling_limits("api|5|1|application").unwrap_err();
        assert!(err.to_string().contains("must be >= min"));
    }

    #[test]
    fn parse_scaling_limits_rejects_bad_mode() {
        let err = parse_scaling_limits("api|1|5|bogus").unwrap_err();
        assert!(err.to_string().contains("Must be"));
    }

    #[test]
    fn smtp_enabled_requires_host_and_recipient() {
        let smtp = SmtpConfig {
            host: "".into(),
            port: 587,
            username: "".into(),
            password: "".into(),
            from: "".into(),
            to: "".into(),
        };
        assert!(!smtp.is_enabled());
    }
}
