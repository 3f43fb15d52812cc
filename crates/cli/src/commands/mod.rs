pub mod config;
pub mod doctor;
pub mod migrate;
pub mod seed;
pub mod sweep;
pub mod workflow;

use std::future::Future;

use serde::Serialize;
use serde_json::Value;
use signoff_core::config::{AppConfig, LoadOptions};
use signoff_core::errors::{ApplicationError, InterfaceError};
use signoff_db::{connect_with_settings, migrations, ServiceError, SqlApprovalService};

/// `(error_class, message, exit_code)` carried out of a failed command.
///
/// Exit codes: 2 config or input, 3 runtime, 4 database, 5 migration,
/// 6 seed verification, 7 rule violation, 8 not found, 9 conflict.
pub(crate) type CommandFailure = (&'static str, String, u8);

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data: None,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: &impl Serialize,
    ) -> Self {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(error) => {
                return Self::failure(command, "serialization", error.to_string(), 3);
            }
        };
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data: Some(data),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub(crate) fn from_failure(command: &str, (error_class, message, exit_code): CommandFailure) -> Self {
        Self::failure(command, error_class, message, exit_code)
    }
}

/// Loads config, opens a migrated pool and runs `operation` against the
/// approval service on a current-thread runtime.
pub(crate) fn with_service<T, F, Fut>(operation: F) -> Result<T, CommandFailure>
where
    F: FnOnce(SqlApprovalService) -> Fut,
    Fut: Future<Output = Result<T, CommandFailure>>,
{
    let config = AppConfig::load(LoadOptions::default())
        .map_err(|error| ("config_validation", format!("configuration issue: {error}"), 2u8))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| ("runtime_init", format!("failed to initialize async runtime: {error}"), 3u8))?;

    runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let result = operation(SqlApprovalService::sql(pool.clone())).await;
        pool.close().await;
        result
    })
}

/// Classifies a service error through the interface error layer; the
/// correlation id ties the printed failure to the server-side log events.
pub(crate) fn service_failure(error: ServiceError, correlation_id: &str) -> CommandFailure {
    let error = ApplicationError::from(error).into_interface(correlation_id);
    let (error_class, exit_code) = match &error {
        InterfaceError::BadRequest { .. } => ("rule_violation", 7),
        InterfaceError::NotFound { .. } => ("not_found", 8),
        InterfaceError::Conflict { .. } => ("conflict", 9),
        InterfaceError::ServiceUnavailable { .. } => ("db_operation", 4),
        InterfaceError::Internal { .. } => ("internal", 3),
    };
    (error_class, format!("{error} (correlation_id: {})", error.correlation_id()), exit_code)
}

pub(crate) fn invalid_input(message: impl Into<String>) -> CommandFailure {
    ("invalid_input", message.into(), 2)
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
