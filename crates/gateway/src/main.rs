mod api;
mod runtime;
mod state;

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use sa_domain::config::Config;
use sa_providers::OpenAiCompatProvider;

use runtime::intake::AlertIntake;
use runtime::ledger::AlertLedger;
use runtime::process::process_alert;
use runtime::state::RuntimeState;
use state::AppState;

/// Handle that lets `/ops/loglevel` mutate the live log level at runtime.
pub type LogReloadHandle = reload::Handle<EnvFilter, Registry>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env().context("loading configuration")?);
    let log_reload = init_telemetry(&config);

    run_server(config, log_reload).await
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sa_gateway=debug"))
}

/// Sets up structured JSON logging, plus an OTLP trace export layer when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is configured (a no-op when unset). The
/// filter layer is wrapped in a `reload::Handle` so `/ops/loglevel` can
/// change the live level without a restart.
fn init_telemetry(config: &Config) -> LogReloadHandle {
    let fmt_layer = tracing_subscriber::fmt::layer().json();
    let (filter_layer, reload_handle) = reload::Layer::new(env_filter());

    let Some(endpoint) = config.otel_exporter_otlp_endpoint.as_deref() else {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
        return reload_handle;
    };

    match init_otel_tracer(endpoint, &config.otel_service_name) {
        Ok(tracer) => {
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
            tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .with(otel_layer)
                .init();
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .init();
            tracing::warn!(error = %e, endpoint, "failed to initialize OTLP exporter, continuing without trace export");
        }
    }

    reload_handle
}

fn init_otel_tracer(
    endpoint: &str,
    service_name: &str,
) -> anyhow::Result<opentelemetry_sdk::trace::SdkTracer> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("building OTLP span exporter")?;

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(service_name.to_string())
                .build(),
        )
        .build();

    let tracer = provider.tracer("sa-gateway");
    opentelemetry::global::set_tracer_provider(provider);
    Ok(tracer)
}

async fn run_server(config: Arc<Config>, log_reload: LogReloadHandle) -> anyhow::Result<()> {
    tracing::info!(
        services = config.services.len(),
        model = %config.llm_model,
        "sre-agent starting"
    );

    let llm = Arc::new(OpenAiCompatProvider::new(
        "primary",
        &config.llm_api_base_url,
        &config.llm_api_key,
        &config.llm_model,
    ));

    let runtime_state = Arc::new(RuntimeState::new());
    let ledger = Arc::new(AlertLedger::new());

    let process_fn: runtime::intake::ProcessFn = {
        let config = config.clone();
        let llm = llm.clone();
        let runtime_state = runtime_state.clone();
        let ledger = ledger.clone();
        Arc::new(move |alert, trace_id| {
            let config = config.clone();
            let llm: Arc<dyn sa_providers::LlmProvider> = llm.clone();
            let runtime_state = runtime_state.clone();
            let ledger = ledger.clone();
            Box::pin(process_alert(alert, trace_id, config, llm, runtime_state, ledger))
        })
    };

    let intake = Arc::new(AlertIntake::new(
        process_fn,
        runtime_state.clone(),
        config.max_concurrent_alerts as usize,
        config.alert_queue_ttl_seconds,
    ));

    tracing::info!(
        count = config.services.len(),
        names = %config.services.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(","),
        "service registry loaded"
    );

    let app_state = AppState {
        config: config.clone(),
        llm,
        intake: intake.clone(),
        runtime_state: runtime_state.clone(),
        ledger,
        log_reload,
    };

    // ── Periodic queue TTL sweep ──────────────────────────────────────
    // Reclaims stale queued alerts even during a quiet period with no
    // completions to trigger the dispatch scan.
    {
        let intake = intake.clone();
        let period = std::time::Duration::from_secs(config.alert_ledger_sweep_seconds.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                intake.sweep();
            }
        });
    }

    let cors_layer = build_cors_layer(&config.cors_allowed_origins);

    let max_concurrent = std::env::var("SA_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);

    let app = api::router(app_state)
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding to {}", config.bind_addr))?;

    tracing::info!(addr = %config.bind_addr, "sre-agent listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    serve.await.context("axum server error")?;

    tracing::info!("shutdown signal received, draining in-flight runs");
    runtime_state.set_draining(true);
    intake.shutdown().await;

    // Fallback wait on any run that escaped the intake's own bookkeeping
    // (e.g. a run dispatched just before shutdown began).
    for _ in 0..30 {
        if runtime_state.active_incident_count() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }

    tracing::info!("sre-agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may contain a trailing `*` wildcard for the port segment
/// (e.g. `http://localhost:*`). These are expanded into a predicate that
/// matches any port on that host. A literal `"*"` allows all origins.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    use axum::http::header;

    if allowed_origins.len() == 1 && allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in allowed_origins {
        if origin.ends_with(":*") {
            let prefix = origin.trim_end_matches('*').to_owned();
            wildcard_prefixes.push(prefix);
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
