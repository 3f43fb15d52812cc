use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use signoff_db::DbPool;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::sweeper::LastSweep;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    last_sweep: Arc<RwLock<Option<LastSweep>>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    /// Absent until the first sweep pass finishes, or when sweeping is disabled.
    pub last_sweep: Option<LastSweep>,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, last_sweep: Arc<RwLock<Option<LastSweep>>>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, last_sweep })
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    db_pool: DbPool,
    last_sweep: Arc<RwLock<Option<LastSweep>>>,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool, last_sweep)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "signoff-server runtime initialized".to_string(),
        },
        database,
        last_sweep: state.last_sweep.read().await.clone(),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM approval_workflow").fetch_one(pool).await {
        Ok(workflows) => HealthCheck {
            status: "ready",
            detail: format!("database query succeeded ({workflows} workflows stored)"),
        },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}
