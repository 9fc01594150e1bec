//! Alert model: the canonical in-memory shape an admitted alert is
//! normalised into, regardless of which webhook source produced it.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    High,
    Warning,
    Info,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Critical => "critical",
            AlertSeverity::High => "high",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Info => "info",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    P1,
    P2,
    P3,
    P4,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
            Priority::P4 => "P4",
        }
    }

    /// Lower rank dispatches first. Absent priority ranks last.
    pub fn rank(this: Option<Priority>) -> u32 {
        match this {
            Some(Priority::P1) => 1,
            Some(Priority::P2) => 2,
            Some(Priority::P3) => 3,
            Some(Priority::P4) => 4,
            None => 99,
        }
    }
}

/// A normalised, immutable alert admitted into the intake pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub incident_id: String,
    pub service_name: String,
    pub severity: AlertSeverity,
    pub priority: Option<Priority>,
    pub description: String,
    pub dedup_key: Option<String>,
    pub runbook_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

impl Alert {
    /// Build an Alert from an incident-management provider's V3 webhook
    /// payload. Only the fields this system needs are extracted; unknown
    /// shapes fall back to conservative defaults rather than failing.
    pub fn from_webhook(payload: &Value) -> Result<Self, String> {
        let data = payload
            .pointer("/event/data")
            .ok_or_else(|| "missing event.data".to_string())?;

        let incident_id = data
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing event.data.id".to_string())?
            .to_string();

        let service_name = data
            .pointer("/service/summary")
            .or_else(|| data.pointer("/service/name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let severity = match data
            .get("urgency")
            .and_then(Value::as_str)
            .unwrap_or("high")
        {
            "critical" => AlertSeverity::Critical,
            "warning" => AlertSeverity::Warning,
            "info" => AlertSeverity::Info,
            _ => AlertSeverity::High,
        };

        let priority = data
            .pointer("/priority/summary")
            .and_then(Value::as_str)
            .and_then(|p| match p {
                "P1" => Some(Priority::P1),
                "P2" => Some(Priority::P2),
                "P3" => Some(Priority::P3),
                "P4" => Some(Priority::P4),
                _ => None,
            });

        let description = data
            .get("title")
            .and_then(Value::as_str)
            .or_else(|| data.get("summary").and_then(Value::as_str))
            .unwrap_or("No description")
            .to_string();

        let dedup_key = data
            .get("incident_key")
            .and_then(Value::as_str)
            .map(str::to_string);

        let runbook_url = data
            .pointer("/body/details/runbook_url")
            .and_then(Value::as_str)
            .map(str::to_string);

        let timestamp = data
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(Alert {
            incident_id,
            service_name,
            severity,
            priority,
            description,
            dedup_key,
            runbook_url,
            timestamp,
            details: data.pointer("/body/details").cloned().unwrap_or(Value::Null),
        })
    }

    /// Build an Alert from a cloud-monitoring provider's webhook payload.
    /// These have no incident-provider incident behind them yet, so the
    /// incident id is synthesised with a `gcp-` prefix.
    pub fn from_gcp_webhook(payload: &Value, services: &[ServiceEndpoint]) -> Result<Self, String> {
        let incident = payload
            .get("incident")
            .ok_or_else(|| "missing incident".to_string())?;

        let raw_id = incident
            .get("incident_id")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing incident.incident_id".to_string())?;
        let incident_id = format!("gcp-{raw_id}");

        let state = incident.get("state").and_then(Value::as_str).unwrap_or("");
        let severity = if state == "open" {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Info
        };
        let priority = if state == "open" {
            Some(Priority::P1)
        } else {
            Some(Priority::P3)
        };

        let host = incident
            .pointer("/resource/labels/host")
            .and_then(Value::as_str)
            .unwrap_or("");
        let service_name = services
            .iter()
            .find(|s| !host.is_empty() && s.base_url.contains(host))
            .map(|s| s.name.clone())
            .unwrap_or_else(|| host.split('.').next().unwrap_or("unknown").to_string());

        let description = incident
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("No description")
            .to_string();

        let timestamp = incident
            .get("started_at")
            .and_then(Value::as_f64)
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
            .unwrap_or_else(Utc::now);

        let mut details = serde_json::Map::new();
        details.insert("source".into(), Value::String("gcp_cloud_monitoring".into()));
        if let Some(v) = incident.get("policy_name") {
            details.insert("policy_name".into(), v.clone());
        }
        if let Some(v) = incident.get("condition_name") {
            details.insert("condition_name".into(), v.clone());
        }
        if let Some(v) = incident.pointer("/resource/type") {
            details.insert("resource_type".into(), v.clone());
        }
        if let Some(v) = incident.pointer("/resource/labels") {
            details.insert("resource_labels".into(), v.clone());
        }
        if let Some(v) = incident.get("url") {
            details.insert("gcp_incident_url".into(), v.clone());
        }
        if let Some(v) = incident.get("documentation") {
            details.insert("documentation".into(), v.clone());
        }

        Ok(Alert {
            incident_id,
            service_name,
            severity,
            priority,
            description,
            dedup_key: None,
            runbook_url: None,
            timestamp,
            details: Value::Object(details),
        })
    }
}

/// An Alert waiting in the intake priority queue.
#[derive(Debug, Clone)]
pub struct QueuedAlert {
    pub alert: Alert,
    pub trace_id: String,
    pub enqueued_at: DateTime<Utc>,
    pub priority_rank: u32,
}

impl QueuedAlert {
    pub fn new(alert: Alert, trace_id: String) -> Self {
        let priority_rank = Priority::rank(alert.priority);
        Self {
            alert,
            trace_id,
            enqueued_at: Utc::now(),
            priority_rank,
        }
    }
}

/// Ordering: lower priority_rank wins; ties broken by earlier enqueued_at.
/// `BinaryHeap` is a max-heap, so callers wrap this in `std::cmp::Reverse`
/// to get "lowest rank first" pop order.
impl Ord for QueuedAlert {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority_rank
            .cmp(&other.priority_rank)
            .then_with(|| self.enqueued_at.cmp(&other.enqueued_at))
    }
}

impl PartialOrd for QueuedAlert {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedAlert {
    fn eq(&self, other: &Self) -> bool {
        self.priority_rank == other.priority_rank && self.enqueued_at == other.enqueued_at
    }
}

impl Eq for QueuedAlert {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_true")]
    pub critical: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    Application,
    CloudNative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingConfig {
    pub service_name: String,
    pub min_instances: u32,
    pub max_instances: u32,
    pub mode: ScalingMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rank_orders_p1_first() {
        assert!(Priority::rank(Some(Priority::P1)) < Priority::rank(Some(Priority::P2)));
        assert!(Priority::rank(Some(Priority::P4)) < Priority::rank(None));
    }

    #[test]
    fn queued_alert_orders_by_rank_then_fifo() {
        let make = |rank: u32, secs: i64| QueuedAlert {
            alert: sample_alert(),
            trace_id: "t".into(),
            enqueued_at: DateTime::from_timestamp(secs, 0).unwrap(),
            priority_rank: rank,
        };
        let high = make(1, 10);
        let low = make(4, 1);
        assert!(high.cmp(&low) == Ordering::Less);

        let earlier = make(2, 1);
        let later = make(2, 2);
        assert!(earlier.cmp(&later) == Ordering::Less);
    }

    fn sample_alert() -> Alert {
        Alert {
            incident_id: "inc-1".into(),
            service_name: "api".into(),
            severity: AlertSeverity::Critical,
            priority: Some(Priority::P1),
            description: "d".into(),
            dedup_key: None,
            runbook_url: None,
            timestamp: Utc::now(),
            details: Value::Null,
        }
    }

    #[test]
    fn from_webhook_parses_minimal_payload() {
        let payload = serde_json::json!({
            "event": {
                "event_type": "incident.triggered",
                "data": {
                    "id": "inc-42",
                    "service": {"summary": "payments"},
                    "urgency": "high",
                    "title": "Payments down",
                }
            }
        });
        let alert = Alert::from_webhook(&payload).unwrap();
        assert_eq!(alert.incident_id, "inc-42");
        assert_eq!(alert.service_name, "payments");
        assert_eq!(alert.severity.as_str(), "high");
        assert_eq!(alert.description, "Payments down");
    }

    #[test]
    fn from_webhook_defaults_description_when_absent() {
        let payload = serde_json::json!({
            "event": {"data": {"id": "inc-1", "urgency": "critical"}}
        });
        let alert = Alert::from_webhook(&payload).unwrap();
        assert_eq!(alert.description, "No description");
        assert_eq!(alert.severity.as_str(), "critical");
    }

    #[test]
    fn from_gcp_webhook_prefixes_incident_id_and_resolves_service() {
        let services = vec![ServiceEndpoint {
            name: "payments".into(),
            base_url: "https://payments.internal.example.com".into(),
            critical: true,
        }];
        let payload = serde_json::json!({
            "incident": {
                "incident_id": "123",
                "state": "open",
                "summary": "High latency",
                "resource": {"labels": {"host": "payments.internal.example.com"}},
            }
        });
        let alert = Alert::from_gcp_webhook(&payload, &services).unwrap();
        assert_eq!(alert.incident_id, "gcp-123");
        assert_eq!(alert.service_name, "payments");
        assert_eq!(alert.severity.as_str(), "critical");
        assert_eq!(alert.priority, Some(Priority::P1));
    }

    #[test]
    fn from_gcp_webhook_falls_back_to_host_label_when_unmatched() {
        let payload = serde_json::json!({
            "incident": {
                "incident_id": "9",
                "state": "closed",
                "resource": {"labels": {"host": "orphan.example.com"}},
            }
        });
        let alert = Alert::from_gcp_webhook(&payload, &[]).unwrap();
        assert_eq!(alert.service_name, "orphan");
        assert_eq!(alert.severity.as_str(), "info");
    }
}
