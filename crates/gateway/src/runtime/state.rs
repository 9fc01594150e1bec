//! Runtime state tracked for the `/ops/*` observability surface.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

const RUN_RING_CAP: usize = 500;
const HOURLY_RING_CAP: usize = 10_000;
const ERROR_RING_CAP: usize = 50;

/// A single recorded error, surfaced via `/ops/errors`.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedError {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub incident_id: Option<String>,
    pub trace_id: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    webhooks_received: u64,
    webhooks_processed: u64,
    webhooks_ignored: u64,
    webhooks_failed: u64,
    agent_runs_completed: u64,
    agent_runs_failed: u64,
    total_input_tokens: u64,
    total_output_tokens: u64,
    total_estimated_cost_usd: f64,
    alerts_deduplicated: u64,
    alerts_queued: u64,
    alerts_expired: u64,
}

#[derive(Debug, Default)]
struct Inner {
    counters: Counters,
    run_durations: VecDeque<f64>,
    run_token_usage: VecDeque<u64>,
    hourly_token_log: VecDeque<(DateTime<Utc>, u64)>,
    active_incidents: HashMap<String, DateTime<Utc>>,
    recent_errors: VecDeque<RecordedError>,
    draining: bool,
}

fn push_capped<T>(ring: &mut VecDeque<T>, item: T, cap: usize) {
    if ring.len() >= cap {
        ring.pop_front();
    }
    ring.push_back(item);
}

/// Process-wide metrics and bounded history, guarded by a single mutex.
///
/// Mirrors the reference `RuntimeState` dataclass: counters plus capped
/// ring buffers so percentile/"last hour" queries never grow unbounded.
pub struct RuntimeState {
    inner: Mutex<Inner>,
    pub start_time: Instant,
    pub start_time_utc: DateTime<Utc>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            start_time: Instant::now(),
            start_time_utc: Utc::now(),
        }
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn record_webhook_received(&self) {
        self.inner.lock().counters.webhooks_received += 1;
    }

    pub fn record_webhook_processed(&self) {
        self.inner.lock().counters.webhooks_processed += 1;
    }

    pub fn record_webhook_ignored(&self) {
        self.inner.lock().counters.webhooks_ignored += 1;
    }

    pub fn record_webhook_failed(&self) {
        self.inner.lock().counters.webhooks_failed += 1;
    }

    pub fn record_dedup(&self) {
        self.inner.lock().counters.alerts_deduplicated += 1;
    }

    pub fn record_queued(&self) {
        self.inner.lock().counters.alerts_queued += 1;
    }

    pub fn record_expired(&self) {
        self.inner.lock().counters.alerts_expired += 1;
    }

    pub fn mark_active(&self, incident_id: &str) {
        self.inner
            .lock()
            .active_incidents
            .insert(incident_id.to_string(), Utc::now());
    }

    pub fn clear_active(&self, incident_id: &str) {
        self.inner.lock().active_incidents.remove(incident_id);
    }

    pub fn active_incident_count(&self) -> usize {
        self.inner.lock().active_incidents.len()
    }

    /// Record one completed run: duration, token totals, cost, and append
    /// this turn's tokens to the rolling hourly log.
    pub fn record_run(
        &self,
        duration_seconds: f64,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
        failed: bool,
    ) {
        let mut inner = self.inner.lock();
        push_capped(&mut inner.run_durations, duration_seconds, RUN_RING_CAP);
        let total_tokens = input_tokens + output_tokens;
        push_capped(&mut inner.run_token_usage, total_tokens, RUN_RING_CAP);
        push_capped(
            &mut inner.hourly_token_log,
            (Utc::now(), total_tokens),
            HOURLY_RING_CAP,
        );
        inner.counters.total_input_tokens += input_tokens;
        inner.counters.total_output_tokens += output_tokens;
        inner.counters.total_estimated_cost_usd += cost_usd;
        if failed {
            inner.counters.agent_runs_failed += 1;
        } else {
            inner.counters.agent_runs_completed += 1;
        }
    }

    /// Mark a run as "completed" without any tokens spent (hourly-budget
    /// pre-check short circuit).
    pub fn record_run_skipped(&self) {
        self.inner.lock().counters.agent_runs_completed += 1;
    }

    pub fn record_error(&self, kind: &str, message: &str, incident_id: Option<&str>, trace_id: Option<&str>) {
        let mut inner = self.inner.lock();
        push_capped(
            &mut inner.recent_errors,
            RecordedError {
                timestamp: Utc::now(),
                kind: kind.to_string(),
                message: message.to_string(),
                incident_id: incident_id.map(String::from),
                trace_id: trace_id.map(String::from),
            },
            ERROR_RING_CAP,
        );
    }

    pub fn tokens_last_hour(&self) -> u64 {
        let inner = self.inner.lock();
        let cutoff = Utc::now() - chrono::Duration::seconds(3600);
        inner
            .hourly_token_log
            .iter()
            .filter(|(ts, _)| *ts >= cutoff)
            .map(|(_, tokens)| tokens)
            .sum()
    }

    pub fn is_hourly_budget_exhausted(&self, max_tokens_per_hour: u64) -> bool {
        if max_tokens_per_hour == 0 {
            return false;
        }
        self.tokens_last_hour() >= max_tokens_per_hour
    }

    pub fn set_draining(&self, draining: bool) {
        self.inner.lock().draining = draining;
    }

    pub fn is_draining(&self) -> bool {
        self.inner.lock().draining
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        let mut durations: Vec<f64> = inner.run_durations.iter().copied().collect();
        durations.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let n = durations.len();
        let percentile = |frac: f64| -> f64 {
            if n == 0 {
                return 0.0;
            }
            let idx = ((n as f64) * frac).floor() as usize;
            durations[idx.min(n - 1)]
        };
        let p50 = percentile(0.50);
        let p95 = percentile(0.95);
        let p99_idx = ((n as f64) * 0.99).floor() as usize;
        let p99 = if n == 0 {
            0.0
        } else {
            durations[p99_idx.min(n.saturating_sub(1))]
        };

        let uptime = self.uptime_seconds().max(1.0);
        let total_webhooks = inner.counters.webhooks_received;
        let total_errors = inner.counters.webhooks_failed + inner.counters.agent_runs_failed;
        let error_rate = if total_webhooks == 0 {
            0.0
        } else {
            (total_errors as f64 / total_webhooks as f64) * 100.0
        };
        let rate_per_minute = (total_webhooks as f64 / uptime) * 60.0;

        let cutoff = Utc::now() - chrono::Duration::seconds(3600);
        let tokens_last_hour: u64 = inner
            .hourly_token_log
            .iter()
            .filter(|(ts, _)| *ts >= cutoff)
            .map(|(_, tokens)| tokens)
            .sum();

        MetricsSnapshot {
            uptime_seconds: uptime,
            latency_p50: p50,
            latency_p95: p95,
            latency_p99: p99,
            traffic_rate_per_minute: rate_per_minute,
            total_webhooks,
            total_errors,
            error_rate_percent: error_rate,
            webhooks_processed: inner.counters.webhooks_processed,
            webhooks_ignored: inner.counters.webhooks_ignored,
            webhooks_failed: inner.counters.webhooks_failed,
            agent_runs_completed: inner.counters.agent_runs_completed,
            agent_runs_failed: inner.counters.agent_runs_failed,
            alerts_deduplicated: inner.counters.alerts_deduplicated,
            alerts_queued: inner.counters.alerts_queued,
            alerts_expired: inner.counters.alerts_expired,
            total_input_tokens: inner.counters.total_input_tokens,
            total_output_tokens: inner.counters.total_output_tokens,
            total_estimated_cost_usd: inner.counters.total_estimated_cost_usd,
            tokens_last_hour,
            active_incidents: inner.active_incidents.len(),
            draining: inner.draining,
        }
    }

    pub fn errors_snapshot(&self) -> (u64, HashMap<String, u64>, Vec<RecordedError>) {
        let inner = self.inner.lock();
        let total = inner.recent_errors.len() as u64;
        let mut by_type: HashMap<String, u64> = HashMap::new();
        for err in &inner.recent_errors {
            *by_type.entry(err.kind.clone()).or_insert(0) += 1;
        }
        let recent: Vec<RecordedError> = inner
            .recent_errors
            .iter()
            .rev()
            .take(20)
            .cloned()
            .collect();
        (total, by_type, recent)
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MetricsSnapshot {
    pub uptime_seconds: f64,
    pub latency_p50: f64,
    pub latency_p95: f64,
    pub latency_p99: f64,
    pub traffic_rate_per_minute: f64,
    pub total_webhooks: u64,
    pub total_errors: u64,
    pub error_rate_percent: f64,
    pub webhooks_processed: u64,
    pub webhooks_ignored: u64,
    pub webhooks_failed: u64,
    pub agent_runs_completed: u64,
    pub agent_runs_failed: u64,
    pub alerts_deduplicated: u64,
    pub alerts_queued: u64,
    pub alerts_expired: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_estimated_cost_usd: f64,
    pub tokens_last_hour: u64,
    pub active_incidents: usize,
    pub draining: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_rate_is_zero_with_no_webhooks() {
        let state = RuntimeState::new();
        let snap = state.metrics_snapshot();
        assert_eq!(snap.error_rate_percent, 0.0);
    }

    #[test]
    fn run_durations_ring_is_capped() {
        let state = RuntimeState::new();
        for i in 0..(RUN_RING_CAP + 10) {
            state.record_run(i as f64, 10, 10, 0.0, false);
        }
        let inner = state.inner.lock();
        assert_eq!(inner.run_durations.len(), RUN_RING_CAP);
    }

    #[test]
    fn tokens_last_hour_excludes_old_entries() {
        let state = RuntimeState::new();
        {
            let mut inner = state.inner.lock();
            inner
                .hourly_token_log
                .push_back((Utc::now() - chrono::Duration::hours(2), 500));
            inner.hourly_token_log.push_back((Utc::now(), 300));
        }
        assert_eq!(state.tokens_last_hour(), 300);
    }

    #[test]
    fn hourly_budget_exhausted_respects_zero_meaning_unlimited() {
        let state = RuntimeState::new();
        assert!(!state.is_hourly_budget_exhausted(0));
    }
}
