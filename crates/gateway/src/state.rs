use std::sync::Arc;

use sa_domain::config::Config;
use sa_providers::OpenAiCompatProvider;

use crate::runtime::intake::AlertIntake;
use crate::runtime::ledger::AlertLedger;
use crate::runtime::state::RuntimeState;
use crate::LogReloadHandle;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, LLM provider
/// - **Runtime** — intake pipeline, runtime metrics, alert ledger
/// - **Security** — bearer token guarding the `/ops/*` mutation endpoints
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    /// Concrete rather than `Arc<dyn LlmProvider>` so handlers can reach
    /// `ping()` directly for the readiness probe; the agent loop still
    /// takes it as `&dyn LlmProvider` via auto-deref.
    pub llm: Arc<OpenAiCompatProvider>,

    // ── Runtime ───────────────────────────────────────────────────────
    pub intake: Arc<AlertIntake>,
    pub runtime_state: Arc<RuntimeState>,
    pub ledger: Arc<AlertLedger>,

    /// Lets `/ops/loglevel` change the live tracing level at runtime.
    pub log_reload: LogReloadHandle,
}
