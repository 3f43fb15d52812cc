use signoff_core::config::{AppConfig, LoadOptions};
use signoff_db::OperationContext;
use uuid::Uuid;

use crate::commands::{service_failure, with_service, CommandResult};

/// Runs one sweep pass using the configured policy, regardless of
/// `sweep.enabled`, which only governs the server's background loop.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "sweep",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    let policy = config.sweep.policy();
    let batch_size = config.sweep.batch_size;

    let result = with_service(|service| async move {
        let ctx = OperationContext::new(format!("sweep-{}", Uuid::new_v4()));
        service
            .sweep(&ctx, &policy, batch_size)
            .await
            .map_err(|error| service_failure(error, &ctx.correlation_id))
    });

    match result {
        Ok(report) => CommandResult::success_with_data(
            "sweep",
            format!(
                "examined {} open workflow(s): {} auto-approved, {} escalated, {} conflict(s), {} failed",
                report.examined, report.auto_approved, report.escalated, report.conflicts, report.failed
            ),
            &report,
        ),
        Err(failure) => CommandResult::from_failure("sweep", failure),
    }
}
