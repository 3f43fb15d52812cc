mod audit;
mod bootstrap;
mod health;
mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use signoff_core::config::{AppConfig, LoadOptions};
use signoff_db::SqlApprovalService;
use tokio::sync::{watch, RwLock};
use tracing_subscriber::EnvFilter;

use crate::audit::TracingAuditSink;
use crate::sweeper::Sweeper;

fn init_logging(config: &AppConfig) {
    use signoff_core::config::LogFormat::*;

    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let service =
        SqlApprovalService::sql(app.db_pool.clone()).with_audit_sink(Arc::new(TracingAuditSink));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (last_sweep, sweeper_task) = if app.config.sweep.enabled {
        let sweeper = Sweeper::new(
            service,
            app.config.sweep.policy(),
            app.config.sweep.batch_size,
            Duration::from_secs(app.config.sweep.interval_secs),
        );
        (sweeper.last_sweep(), Some(sweeper.spawn(shutdown_rx)))
    } else {
        tracing::info!(
            event_name = "system.sweep.disabled",
            correlation_id = "bootstrap",
            "background sweep disabled by configuration"
        );
        (Arc::new(RwLock::new(None)), None)
    };

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
        last_sweep,
    )
    .await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        sweep_enabled = app.config.sweep.enabled,
        "signoff-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "signoff-server stopping"
    );

    let _ = shutdown_tx.send(true);
    if let Some(task) = sweeper_task {
        let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
        if tokio::time::timeout(grace, task).await.is_err() {
            tracing::warn!(
                event_name = "system.server.shutdown_timeout",
                correlation_id = "shutdown",
                grace_secs = app.config.server.graceful_shutdown_secs,
                "sweeper did not stop within the grace period"
            );
        }
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
