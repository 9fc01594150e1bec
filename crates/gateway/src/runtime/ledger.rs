//! Alert ledger: the operator-facing `/alerts/*` record, independent of the
//! intake pipeline's internal priority heap.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sa_domain::alert::{Alert, AlertSeverity, Priority};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Pending,
    Processing,
    Done,
    Failed,
    Escalated,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub incident_id: String,
    pub service_name: String,
    pub severity: AlertSeverity,
    pub priority: Option<Priority>,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
    pub status: LedgerStatus,
    pub queued_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("unknown incident: {0}")]
    NotFound(String),
    #[error("incident {0} is not pending")]
    NotPending(String),
}

/// `incident_id -> LedgerEntry`, guarded by a single mutex. Entries are
/// created at webhook admission time and updated as the run progresses.
pub struct AlertLedger {
    entries: Mutex<HashMap<String, LedgerEntry>>,
}

impl AlertLedger {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a newly-admitted alert. Status starts at `processing` since
    /// the intake pipeline dispatches or queues immediately; there is no
    /// internally-produced "pending, unclaimed" state.
    pub fn register(&self, alert: &Alert, trace_id: &str) {
        let entry = LedgerEntry {
            incident_id: alert.incident_id.clone(),
            service_name: alert.service_name.clone(),
            severity: alert.severity,
            priority: alert.priority,
            description: alert.description.clone(),
            timestamp: alert.timestamp,
            trace_id: trace_id.to_string(),
            status: LedgerStatus::Processing,
            queued_at: Utc::now(),
            claimed_at: None,
            completed_at: None,
        };
        self.entries.lock().insert(alert.incident_id.clone(), entry);
    }

    pub fn set_status(&self, incident_id: &str, status: LedgerStatus) {
        if let Some(entry) = self.entries.lock().get_mut(incident_id) {
            entry.status = status;
        }
    }

    pub fn get(&self, incident_id: &str) -> Option<LedgerEntry> {
        self.entries.lock().get(incident_id).cloned()
    }

    pub fn pending(&self) -> Vec<LedgerEntry> {
        let entries = self.entries.lock();
        let mut pending: Vec<LedgerEntry> = entries
            .values()
            .filter(|e| e.status == LedgerStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|e| (Priority::rank(e.priority), e.queued_at));
        pending
    }

    pub fn status_counts(&self) -> HashMap<&'static str, usize> {
        let entries = self.entries.lock();
        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        for entry in entries.values() {
            let key = match entry.status {
                LedgerStatus::Pending => "pending",
                LedgerStatus::Processing => "processing",
                LedgerStatus::Done => "done",
                LedgerStatus::Failed => "failed",
                LedgerStatus::Escalated => "escalated",
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }

    pub fn claim(&self, incident_id: &str) -> Result<LedgerEntry, LedgerError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(incident_id)
            .ok_or_else(|| LedgerError::NotFound(incident_id.to_string()))?;
        if entry.status != LedgerStatus::Pending {
            return Err(LedgerError::NotPending(incident_id.to_string()));
        }
        entry.status = LedgerStatus::Processing;
        entry.claimed_at = Some(Utc::now());
        Ok(entry.clone())
    }

    pub fn complete(&self, incident_id: &str) -> Result<LedgerEntry, LedgerError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(incident_id)
            .ok_or_else(|| LedgerError::NotFound(incident_id.to_string()))?;
        entry.status = LedgerStatus::Done;
        entry.completed_at = Some(Utc::now());
        Ok(entry.clone())
    }
}

impl Default for AlertLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample_alert(id: &str, priority: Option<Priority>) -> Alert {
        Alert {
            incident_id: id.into(),
            service_name: "api".into(),
            severity: AlertSeverity::High,
            priority,
            description: "d".into(),
            dedup_key: None,
            runbook_url: None,
            timestamp: Utc::now(),
            details: Value::Null,
        }
    }

    #[test]
    fn register_creates_processing_entry() {
        let ledger = AlertLedger::new();
        ledger.register(&sample_alert("inc-1", Some(Priority::P2)), "trace-1");
        let entry = ledger.get("inc-1").unwrap();
        assert_eq!(entry.status, LedgerStatus::Processing);
    }

    #[test]
    fn claim_requires_pending_status() {
        let ledger = AlertLedger::new();
        ledger.register(&sample_alert("inc-1", None), "trace-1");
        let err = ledger.claim("inc-1").unwrap_err();
        assert!(matches!(err, LedgerError::NotPending(_)));
    }

    #[test]
    fn claim_unknown_incident_not_found() {
        let ledger = AlertLedger::new();
        let err = ledger.claim("missing").unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn pending_sorted_by_priority_then_queued_at() {
        let ledger = AlertLedger::new();
        ledger.register(&sample_alert("low", Some(Priority::P4)), "t1");
        ledger.set_status("low", LedgerStatus::Pending);
        ledger.register(&sample_alert("high", Some(Priority::P1)), "t2");
        ledger.set_status("high", LedgerStatus::Pending);
        let pending = ledger.pending();
        assert_eq!(pending[0].incident_id, "high");
        assert_eq!(pending[1].incident_id, "low");
    }

    #[test]
    fn complete_stamps_completed_at() {
        let ledger = AlertLedger::new();
        ledger.register(&sample_alert("inc-1", None), "t1");
        let entry = ledger.complete("inc-1").unwrap();
        assert_eq!(entry.status, LedgerStatus::Done);
        assert!(entry.completed_at.is_some());
    }
}
