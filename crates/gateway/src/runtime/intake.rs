//! Alert intake pipeline: dedup, service serialization, and concurrency control.
//!
//! Sits between the webhook handler and the agent run. Replaces a bare
//! "spawn and forget" with a controlled dispatch pipeline:
//!
//! 1. Incident-level dedup — the same incident_id is never processed twice
//!    concurrently.
//! 2. Service-level serialization — one agent run per service at a time.
//! 3. Global concurrency limit — caps total concurrent agent runs.
//! 4. Priority ordering — P1 alerts dispatch before P4 when slots open.
//! 5. Stale alert expiry — queued alerts expire after a configurable TTL.

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::cmp::Reverse;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use sa_domain::alert::{Alert, QueuedAlert};
use tokio::task::JoinHandle;

use super::state::RuntimeState;

pub type ProcessFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type ProcessFn = Arc<dyn Fn(Alert, String) -> ProcessFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Dispatched,
    Queued,
    Deduplicated,
    Rejected,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Dispatched => "dispatched",
            Disposition::Queued => "queued",
            Disposition::Deduplicated => "deduplicated",
            Disposition::Rejected => "rejected",
        }
    }
}

struct Inner {
    known_incidents: HashSet<String>,
    active_services: HashMap<String, String>,
    active_count: usize,
    queue: BinaryHeap<Reverse<QueuedAlert>>,
    shutting_down: bool,
}

/// Alert intake pipeline. All dispatch decisions happen atomically under
/// `inner`; no I/O runs while that lock is held.
pub struct AlertIntake {
    process_fn: ProcessFn,
    state: Arc<RuntimeState>,
    max_concurrent: usize,
    queue_ttl_seconds: i64,
    inner: Mutex<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AlertIntake {
    pub fn new(
        process_fn: ProcessFn,
        state: Arc<RuntimeState>,
        max_concurrent: usize,
        queue_ttl_seconds: i64,
    ) -> Self {
        Self {
            process_fn,
            state,
            max_concurrent,
            queue_ttl_seconds,
            inner: Mutex::new(Inner {
                known_incidents: HashSet::new(),
                active_services: HashMap::new(),
                active_count: 0,
                queue: BinaryHeap::new(),
                shutting_down: false,
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().active_count
    }

    /// Submit an alert for processing.
    ///
    /// `self` must be held as an `Arc` since a dispatched run schedules a
    /// callback that re-enters the pipeline on completion.
    pub fn submit(self: &Arc<Self>, alert: Alert, trace_id: String) -> Disposition {
        let mut inner = self.inner.lock();
        if inner.shutting_down {
            return Disposition::Rejected;
        }

        if inner.known_incidents.contains(&alert.incident_id) {
            tracing::info!(incident_id = %alert.incident_id, trace_id = %trace_id, "alert deduplicated");
            self.state.record_dedup();
            return Disposition::Deduplicated;
        }

        inner.known_incidents.insert(alert.incident_id.clone());

        let can_dispatch = !inner.active_services.contains_key(&alert.service_name)
            && inner.active_count < self.max_concurrent;

        if can_dispatch {
            inner.active_count += 1;
            inner
                .active_services
                .insert(alert.service_name.clone(), alert.incident_id.clone());
            self.state.mark_active(&alert.incident_id);
            self.start_run(alert, trace_id);
            return Disposition::Dispatched;
        }

        let queued = QueuedAlert::new(alert.clone(), trace_id.clone());
        let depth = {
            inner.queue.push(Reverse(queued));
            inner.queue.len()
        };
        self.state.record_queued();
        tracing::info!(
            incident_id = %alert.incident_id,
            service = %alert.service_name,
            priority = ?alert.priority,
            queue_depth = depth,
            trace_id = %trace_id,
            "alert queued"
        );
        Disposition::Queued
    }

    /// Graceful shutdown: discard queued alerts, wait up to 30s for active
    /// runs to finish.
    pub async fn shutdown(self: &Arc<Self>) {
        let handles = {
            let mut inner = self.inner.lock();
            inner.shutting_down = true;
            let discarded = inner.queue.len();
            for Reverse(item) in inner.queue.drain() {
                inner.known_incidents.remove(&item.alert.incident_id);
            }
            if discarded > 0 {
                tracing::info!(discarded, "shutdown: discarded queued alerts");
            }
            std::mem::take(&mut *self.tasks.lock())
        };

        if handles.is_empty() {
            return;
        }

        let total = handles.len();
        tracing::info!(active_runs = total, "shutdown: waiting for active runs");

        let completed = Arc::new(AtomicUsize::new(0));
        let completed_for_wait = completed.clone();
        let wait_all = async move {
            for handle in handles {
                let _ = handle.await;
                completed_for_wait.fetch_add(1, AtomicOrdering::SeqCst);
            }
        };

        if tokio::time::timeout(Duration::from_secs(30), wait_all)
            .await
            .is_err()
        {
            let done = completed.load(AtomicOrdering::SeqCst);
            tracing::warn!(
                pending = total - done,
                "shutdown: active runs did not complete within 30s"
            );
        }
    }

    fn start_run(self: &Arc<Self>, alert: Alert, trace_id: String) {
        let this = self.clone();
        let process_fn = self.process_fn.clone();
        let incident_id = alert.incident_id.clone();
        let service_name = alert.service_name.clone();
        let fut = process_fn(alert, trace_id);
        let handle = tokio::spawn(async move {
            fut.await;
            this.on_complete(&incident_id, &service_name).await;
        });
        self.tasks.lock().push(handle);
    }

    async fn on_complete(self: &Arc<Self>, incident_id: &str, service_name: &str) {
        self.state.clear_active(incident_id);
        let should_dispatch = {
            let mut inner = self.inner.lock();
            inner.active_count -= 1;
            inner.known_incidents.remove(incident_id);
            inner.active_services.remove(service_name);
            !inner.shutting_down
        };
        if should_dispatch {
            self.dispatch_next();
        }
    }

    /// Run the dispatch scan outside of a completion event, so TTL-expired
    /// queue entries are reclaimed even during a quiet period with no
    /// completions. Called on a timer from the server's sweep task.
    pub fn sweep(self: &Arc<Self>) {
        self.dispatch_next();
    }

    /// Pick the next eligible alert from the queue.
    ///
    /// Pops the whole heap, expiring stale entries and electing the first
    /// candidate whose service is free, then rebuilds the heap from what's
    /// left.
    fn dispatch_next(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if inner.queue.is_empty() || inner.active_count >= self.max_concurrent {
            return;
        }

        let now = Utc::now();
        let ttl = self.queue_ttl_seconds;
        let mut eligible: Option<QueuedAlert> = None;
        let mut remaining: Vec<QueuedAlert> = Vec::new();

        while let Some(Reverse(candidate)) = inner.queue.pop() {
            let age = (now - candidate.enqueued_at).num_seconds();
            if age > ttl {
                inner.known_incidents.remove(&candidate.alert.incident_id);
                self.state.record_expired();
                tracing::info!(
                    incident_id = %candidate.alert.incident_id,
                    age_seconds = age,
                    ttl_seconds = ttl,
                    trace_id = %candidate.trace_id,
                    "alert expired"
                );
                continue;
            }

            if eligible.is_none() && !inner.active_services.contains_key(&candidate.alert.service_name) {
                eligible = Some(candidate);
                continue;
            }

            remaining.push(candidate);
        }

        inner.queue = remaining.into_iter().map(Reverse).collect();

        if let Some(elected) = eligible {
            let alert = elected.alert;
            inner.active_count += 1;
            inner
                .active_services
                .insert(alert.service_name.clone(), alert.incident_id.clone());
            self.state.mark_active(&alert.incident_id);
            drop(inner);
            self.start_run(alert, elected.trace_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::alert::{AlertSeverity, Priority};
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use tokio::sync::Notify;

    fn alert(incident_id: &str, service: &str, priority: Option<Priority>) -> Alert {
        Alert {
            incident_id: incident_id.into(),
            service_name: service.into(),
            severity: AlertSeverity::High,
            priority,
            description: "d".into(),
            dedup_key: None,
            runbook_url: None,
            timestamp: Utc::now(),
            details: Value::Null,
        }
    }

    fn immediate_intake(max_concurrent: usize) -> (Arc<AlertIntake>, Arc<StdAtomicUsize>) {
        let calls = Arc::new(StdAtomicUsize::new(0));
        let calls_for_fn = calls.clone();
        let process_fn: ProcessFn = Arc::new(move |_alert, _trace_id| {
            let calls = calls_for_fn.clone();
            Box::pin(async move {
                calls.fetch_add(1, AtomicOrdering::SeqCst);
            })
        });
        let state = Arc::new(RuntimeState::new());
        (
            Arc::new(AlertIntake::new(process_fn, state, max_concurrent, 600)),
            calls,
        )
    }

    #[tokio::test]
    async fn first_alert_dispatches_immediately() {
        let (intake, _calls) = immediate_intake(3);
        let disp = intake.submit(alert("inc-1", "api", None), "t1".into());
        assert_eq!(disp, Disposition::Dispatched);
    }

    #[tokio::test]
    async fn duplicate_incident_id_is_deduplicated() {
        // A blocking process_fn keeps the first run "active" long enough to
        // observe the dedup path deterministically.
        let notify = Arc::new(Notify::new());
        let notify_fn = notify.clone();
        let process_fn: ProcessFn = Arc::new(move |_a, _t| {
            let notify = notify_fn.clone();
            Box::pin(async move {
                notify.notified().await;
            })
        });
        let state = Arc::new(RuntimeState::new());
        let intake = Arc::new(AlertIntake::new(process_fn, state, 1, 600));

        let first = intake.submit(alert("inc-1", "api", None), "t1".into());
        assert_eq!(first, Disposition::Dispatched);
        let second = intake.submit(alert("inc-1", "api", None), "t2".into());
        assert_eq!(second, Disposition::Deduplicated);

        notify.notify_one();
    }

    #[tokio::test]
    async fn same_service_busy_queues_second_alert() {
        let notify = Arc::new(Notify::new());
        let notify_fn = notify.clone();
        let process_fn: ProcessFn = Arc::new(move |_a, _t| {
            let notify = notify_fn.clone();
            Box::pin(async move {
                notify.notified().await;
            })
        });
        let state = Arc::new(RuntimeState::new());
        let intake = Arc::new(AlertIntake::new(process_fn, state, 3, 600));

        let first = intake.submit(alert("inc-1", "api", None), "t1".into());
        assert_eq!(first, Disposition::Dispatched);
        let second = intake.submit(alert("inc-2", "api", None), "t2".into());
        assert_eq!(second, Disposition::Queued);
        assert_eq!(intake.queue_depth(), 1);

        notify.notify_waiters();
    }

    #[tokio::test]
    async fn global_concurrency_cap_queues_beyond_limit() {
        let notify = Arc::new(Notify::new());
        let notify_fn = notify.clone();
        let process_fn: ProcessFn = Arc::new(move |_a, _t| {
            let notify = notify_fn.clone();
            Box::pin(async move {
                notify.notified().await;
            })
        });
        let state = Arc::new(RuntimeState::new());
        let intake = Arc::new(AlertIntake::new(process_fn, state, 1, 600));

        let first = intake.submit(alert("inc-1", "svc-a", None), "t1".into());
        assert_eq!(first, Disposition::Dispatched);
        let second = intake.submit(alert("inc-2", "svc-b", None), "t2".into());
        assert_eq!(second, Disposition::Queued);

        notify.notify_waiters();
    }

    #[tokio::test]
    async fn shutdown_rejects_new_submissions() {
        let (intake, _calls) = immediate_intake(3);
        intake.shutdown().await;
        let disp = intake.submit(alert("inc-1", "api", None), "t1".into());
        assert_eq!(disp, Disposition::Rejected);
    }

    #[test]
    fn priority_rank_orders_queue_p1_before_p4() {
        let mut heap: BinaryHeap<Reverse<QueuedAlert>> = BinaryHeap::new();
        heap.push(Reverse(QueuedAlert::new(
            alert("low", "svc", Some(Priority::P4)),
            "t1".into(),
        )));
        heap.push(Reverse(QueuedAlert::new(
            alert("high", "svc", Some(Priority::P1)),
            "t2".into(),
        )));
        let Reverse(first) = heap.pop().unwrap();
        assert_eq!(first.alert.incident_id, "high");
    }
}
