//! Background sweep loop: one pass per interval tick until shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use signoff_core::workflow::{SweepPolicy, SweepReport};
use signoff_db::{OperationContext, SqlApprovalService};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LastSweep {
    pub finished_at: DateTime<Utc>,
    pub report: SweepReport,
    pub error: Option<String>,
}

pub struct Sweeper {
    service: SqlApprovalService,
    policy: SweepPolicy,
    batch_size: u32,
    interval: Duration,
    last: Arc<RwLock<Option<LastSweep>>>,
}

impl Sweeper {
    pub fn new(
        service: SqlApprovalService,
        policy: SweepPolicy,
        batch_size: u32,
        interval: Duration,
    ) -> Self {
        Self { service, policy, batch_size, interval, last: Arc::new(RwLock::new(None)) }
    }

    pub fn last_sweep(&self) -> Arc<RwLock<Option<LastSweep>>> {
        Arc::clone(&self.last)
    }

    /// The first pass runs immediately; later passes follow `interval`.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = ticker.tick() => {
                        let outcome = self.run_once(Utc::now()).await;
                        *self.last.write().await = Some(outcome);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!(event_name = "system.sweep.stopped", correlation_id = "shutdown", "sweeper stopped");
        })
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> LastSweep {
        let ctx = OperationContext::new(format!("sweep-{}", now.timestamp_millis())).at(now);

        match self.service.sweep(&ctx, &self.policy, self.batch_size).await {
            Ok(report) => {
                info!(
                    event_name = "system.sweep.completed",
                    correlation_id = %ctx.correlation_id,
                    examined = report.examined,
                    auto_approved = report.auto_approved,
                    escalated = report.escalated,
                    conflicts = report.conflicts,
                    failed = report.failed,
                    "sweep pass completed"
                );
                LastSweep { finished_at: now, report, error: None }
            }
            Err(sweep_error) => {
                error!(
                    event_name = "system.sweep.failed",
                    correlation_id = %ctx.correlation_id,
                    error = %sweep_error,
                    "sweep pass failed"
                );
                LastSweep {
                    finished_at: now,
                    report: SweepReport::default(),
                    error: Some(sweep_error.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use signoff_core::domain::authority::{AppKind, RequestType};
    use signoff_core::domain::org::EmployeeId;
    use signoff_core::domain::workflow::{RequestKind, RequestRef, Urgency, WorkflowStatus};
    use signoff_core::workflow::SweepPolicy;
    use signoff_db::{
        connect_with_settings, migrations, ApprovalSeedDataset, OperationContext,
        SqlApprovalService, SubmitRequest,
    };
    use tokio::sync::watch;

    use super::Sweeper;

    async fn seeded_service() -> SqlApprovalService {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        ApprovalSeedDataset::load(&pool).await.expect("seed");
        SqlApprovalService::sql(pool)
    }

    fn policy() -> SweepPolicy {
        SweepPolicy { auto_approve: true, escalate_after_hours: None }
    }

    #[tokio::test]
    async fn run_once_auto_approves_overdue_leave() {
        let service = seeded_service().await;
        let submitted_at = Utc::now() - chrono::Duration::days(3);
        let submitted = service
            .submit(
                &OperationContext::new("test").at(submitted_at),
                SubmitRequest {
                    request: RequestRef::new(RequestKind::LeaveRequest, "LV-1"),
                    app: AppKind::HumanResource,
                    request_type: RequestType::Leave,
                    requestor_id: EmployeeId("emp-requestor".to_string()),
                    title: "Annual leave".to_string(),
                    amount: None,
                    urgency: Urgency::Low,
                    notes: String::new(),
                },
            )
            .await
            .expect("submit leave");

        let sweeper = Sweeper::new(service, policy(), 50, Duration::from_secs(60));
        let outcome = sweeper.run_once(Utc::now()).await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.report.examined, 1);
        assert_eq!(outcome.report.auto_approved, 1);

        let workflow = sweeper
            .service
            .workflow_for(&submitted.workflow.request)
            .await
            .expect("load")
            .expect("workflow exists");
        assert_eq!(workflow.workflow.status, WorkflowStatus::Approved);
    }

    #[tokio::test]
    async fn spawned_sweeper_runs_first_pass_and_stops_on_shutdown() {
        let sweeper =
            Sweeper::new(seeded_service().await, policy(), 50, Duration::from_secs(3600));
        let last = sweeper.last_sweep();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = sweeper.spawn(shutdown_rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).expect("sweeper is listening");
        handle.await.expect("sweeper task joins");

        let last = last.read().await.clone().expect("first pass recorded");
        assert_eq!(last.report.examined, 0);
    }
}
