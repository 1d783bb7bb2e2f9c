//! Orchestrator auth HTTP service entry point.
//!
//! # Purpose
//! Loads configuration, builds the store (memory or Postgres), runs the
//! startup tasks, and serves the API and `/metrics` until Ctrl-C.
//!
//! # Notes
//! The `build_app_state` helper keeps wiring testable and minimizes main setup logic.
use anyhow::Context;
use orchestrator_auth::app::{AppState, build_router, build_state};
use orchestrator_auth::config::{AuthConfig, StorageBackend};
use orchestrator_auth::observability;
use orchestrator_auth::store::memory::InMemoryStore;
use orchestrator_auth::store::postgres::PostgresStore;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AuthConfig::from_env_or_yaml().context("load auth config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: AuthConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("orchestrator-auth");
    let state = build_app_state(config.clone()).await?;
    state.run_startup_tasks().await?;
    tracing::info!(backend = state.store.backend_name(), "startup tasks finished");
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let app = build_router(state);
    let addr = config.bind_addr;
    tracing::info!(%addr, "orchestrator auth listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::pin!(shutdown);
    tokio::select! {
        result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        ) => {
            result?;
        }
        _ = &mut shutdown => {}
    }

    metrics_task.abort();
    let _ = metrics_task.await;
    Ok(())
}

async fn build_app_state(config: AuthConfig) -> anyhow::Result<AppState> {
    match config.storage {
        StorageBackend::Memory => build_state(config, Arc::new(InMemoryStore::new())).await,
        StorageBackend::Postgres => {
            let store = PostgresStore::connect(
                config
                    .postgres
                    .as_ref()
                    .context("postgres configuration missing")?,
            )
            .await?;
            build_state(config, Arc::new(store)).await
        }
    }
}
