//! Tollgate gateway library crate.
//!
//! # Purpose
//! Exposes the request pipeline, identity resolution, audit recorder,
//! directory synchronizer, storage contracts, and HTTP wiring for use by the
//! binary and tests.
//!
//! # Notes
//! [`run_with_shutdown`] owns every background task; callers only provide a
//! config and a shutdown future.
pub mod api;
pub mod app;
pub mod audit;
pub mod auth;
pub mod config;
pub mod directory;
pub mod observability;
pub mod pipeline;
pub mod store;

use std::future::Future;
use std::time::Duration;

/// How long shutdown waits for the audit writer to drain.
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
/// How often expired sessions are purged.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run_with_shutdown<F>(config: config::GatewayConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("tollgate-gateway");
    let gateway = app::build_gateway(&config).await?;
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));
    let audit_task = gateway.audit_writer.spawn();
    let sync_handle = gateway.state.synchronizer.clone().spawn();
    let session_sweeper =
        auth::session::SessionSweeper::spawn(gateway.state.sessions.clone(), SESSION_SWEEP_INTERVAL);

    let app = app::build_router(gateway.state);

    let addr = config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "gateway listening");
    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await;

    sync_handle.shutdown().await;
    session_sweeper.shutdown().await;
    metrics_task.abort();
    let _ = metrics_task.await;
    // The router, and with it the last audit recorder, is gone once serve
    // returns, so the writer finishes after draining what was queued.
    if tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, audit_task)
        .await
        .is_err()
    {
        tracing::warn!("audit writer did not drain before shutdown timeout");
    }
    served?;
    Ok(())
}
