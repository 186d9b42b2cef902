//! HTTP surface for the pricing recalculation engine.
//!
//! Operators read the recalculation ledger and request manual runs; every
//! other trigger comes from in-process collaborators through the
//! [`TriggerGateway`].

mod auth;
pub mod config;
mod error;
mod routes;

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::middleware;
use axum::routing::get;
use axum::routing::post;
use reprice_core::JobSupervisor;
use reprice_core::StandardPriceCalculator;
use reprice_core::SupervisorOptions;
use reprice_core::TriggerGateway;
use reprice_state::StateRuntime;
use tokio::net::TcpListener;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

pub use auth::AuthenticatedOperator;
pub use auth::OperatorRegistry;
pub use config::ConfigOverrides;
pub use config::ServerConfig;
pub use error::ApiError;

const INTERRUPTED_JOB_MESSAGE: &str = "server restarted while the job was running";

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    state_db: Arc<StateRuntime>,
    gateway: TriggerGateway,
    operators: OperatorRegistry,
    jobs: config::JobsSettings,
}

impl AppState {
    pub fn new(state_db: Arc<StateRuntime>, supervisor: &JobSupervisor, config: &ServerConfig) -> Self {
        Self {
            state_db,
            gateway: supervisor.gateway(),
            operators: OperatorRegistry::new(config.operators.clone()),
            jobs: config.jobs,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/jobs", get(routes::list_jobs))
        .route("/jobs/current", get(routes::current_job))
        .route("/jobs/{job_id}", get(routes::get_job))
        .route("/trigger", post(routes::trigger))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_operator,
        ));
    Router::new()
        .route("/health", get(routes::health))
        .merge(authenticated)
        .with_state(state)
}

/// Install the stderr `tracing` subscriber. `RUST_LOG` overrides the
/// default `info` level.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
}

/// Serve until Ctrl-C, then cancel any in-flight run and wait for it to be
/// recorded.
pub async fn run_main(config: ServerConfig) -> anyhow::Result<()> {
    let state_db = StateRuntime::init(config.home.clone())
        .await
        .with_context(|| format!("failed to open state in {}", config.home.display()))?;
    let recovered = state_db
        .fail_interrupted_recalculation_jobs(INTERRUPTED_JOB_MESSAGE)
        .await?;
    if recovered > 0 {
        warn!("marked {recovered} interrupted recalculation job(s) as failed");
    }

    let supervisor = JobSupervisor::new(
        Arc::clone(&state_db),
        Arc::clone(&state_db) as _,
        Arc::clone(&state_db) as _,
        Arc::new(StandardPriceCalculator),
        SupervisorOptions {
            chunk_size: config.recalculation.chunk_size,
        },
    );
    let state = AppState::new(Arc::clone(&state_db), &supervisor, &config);
    if state.operators.is_empty() {
        warn!("no operators configured; every authenticated route will answer 401");
    }

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(addr = %listener.local_addr()?, "reprice server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down recalculation supervisor");
    supervisor.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
}
