//! Approval operations over persisted state.
//!
//! Each mutating call loads a fresh snapshot, lets the engine compute the
//! transition and commits it through the repository in one transaction. Every
//! attempt, successful or not, leaves a tracing event and an audit event.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use signoff_core::approvals::{AuthorityQuery, AuthorityRegistry, ConfigurationIssue, RegistryError};
use signoff_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use signoff_core::domain::authority::{AppKind, RequestType};
use signoff_core::domain::org::EmployeeId;
use signoff_core::domain::workflow::{
    ApprovalLog, PendingApproval, RequestRef, Urgency, WorkflowId, WorkflowSnapshot,
};
use signoff_core::errors::{ApplicationError, DomainError};
use signoff_core::ledger::{self, VerificationResult};
use signoff_core::workflow::{
    sweep, InMemoryOrgDirectory, Submission, SweepPolicy, SweepReport, WorkflowEngine,
    WorkflowError, WorkflowTransition,
};

use crate::repositories::{
    AuthorityRepository, DirectoryRepository, OpenCursor, RepositoryError,
    SqlAuthorityRepository, SqlDirectoryRepository, SqlWorkflowRepository, WorkflowRepository,
};
use crate::DbPool;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RegistryError> for ServiceError {
    fn from(error: RegistryError) -> Self {
        Self::Domain(DomainError::from(error))
    }
}

impl From<WorkflowError> for ServiceError {
    fn from(error: WorkflowError) -> Self {
        Self::Domain(DomainError::from(error))
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Conflict(message) => Self::Conflict(message),
            other => Self::Repository(other),
        }
    }
}

impl ServiceError {
    fn outcome(&self) -> AuditOutcome {
        match self {
            Self::Repository(_) => AuditOutcome::Failed,
            _ => AuditOutcome::Rejected,
        }
    }
}

impl From<ServiceError> for ApplicationError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Domain(error) => Self::Domain(error),
            ServiceError::NotFound { entity, id } => Self::NotFound { entity, id },
            ServiceError::Conflict(message) => Self::Conflict(message),
            ServiceError::Repository(RepositoryError::NotFound(what)) => {
                Self::NotFound { entity: "record", id: what }
            }
            ServiceError::Repository(error) => Self::Persistence(error.to_string()),
        }
    }
}

/// Correlation and clock for one operation.
#[derive(Clone, Debug)]
pub struct OperationContext {
    pub correlation_id: String,
    pub now: DateTime<Utc>,
}

impl OperationContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self { correlation_id: correlation_id.into(), now: Utc::now() }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitRequest {
    pub request: RequestRef,
    pub app: AppKind,
    pub request_type: RequestType,
    pub requestor_id: EmployeeId,
    pub title: String,
    pub amount: Option<Decimal>,
    pub urgency: Urgency,
    pub notes: String,
}

pub type SqlApprovalService =
    ApprovalService<SqlDirectoryRepository, SqlAuthorityRepository, SqlWorkflowRepository>;

pub struct ApprovalService<D, A, W> {
    directory: D,
    authorities: A,
    workflows: W,
    engine: WorkflowEngine,
    audit: Arc<dyn AuditSink>,
}

impl SqlApprovalService {
    pub fn sql(pool: DbPool) -> Self {
        Self::new(
            SqlDirectoryRepository::new(pool.clone()),
            SqlAuthorityRepository::new(pool.clone()),
            SqlWorkflowRepository::new(pool),
        )
    }
}

impl<D, A, W> ApprovalService<D, A, W>
where
    D: DirectoryRepository,
    A: AuthorityRepository,
    W: WorkflowRepository,
{
    pub fn new(directory: D, authorities: A, workflows: W) -> Self {
        Self {
            directory,
            authorities,
            workflows,
            engine: WorkflowEngine::new(),
            audit: Arc::new(NoopAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn authorities(&self) -> &A {
        &self.authorities
    }

    pub fn workflows(&self) -> &W {
        &self.workflows
    }

    pub async fn submit(
        &self,
        ctx: &OperationContext,
        request: SubmitRequest,
    ) -> Result<WorkflowSnapshot, ServiceError> {
        let actor = request.requestor_id.0.clone();
        let record = request.request.clone();
        let result = self.submit_inner(ctx, request).await;

        match &result {
            Ok(snapshot) => info!(
                event_name = "workflow.submitted",
                correlation_id = %ctx.correlation_id,
                workflow_id = %snapshot.workflow.id.0,
                request = %record,
                steps = snapshot.steps.len(),
                current_level = snapshot.workflow.current_approval_level,
                "approval workflow submitted"
            ),
            Err(error) => warn!(
                event_name = "workflow.submit_rejected",
                correlation_id = %ctx.correlation_id,
                request = %record,
                error = %error,
                "approval workflow submission failed"
            ),
        }
        self.record(
            ctx,
            &actor,
            "workflow.submitted",
            result.as_ref().ok().map(|snapshot| &snapshot.workflow.id),
            &result,
            |event| event.with_metadata("request", record.to_string()),
        );
        result
    }

    async fn submit_inner(
        &self,
        ctx: &OperationContext,
        request: SubmitRequest,
    ) -> Result<WorkflowSnapshot, ServiceError> {
        let requestor = self
            .directory
            .find_employee(&request.requestor_id)
            .await?
            .filter(|employee| employee.active)
            .ok_or_else(|| ServiceError::NotFound {
                entity: "employee",
                id: request.requestor_id.0.clone(),
            })?;

        if self.workflows.find_snapshot_by_request(&request.request).await?.is_some() {
            return Err(ServiceError::Conflict(format!("{} already has a workflow", request.request)));
        }

        let registry = AuthorityRegistry::new(
            self.authorities.list_for(request.app, request.request_type).await?,
        );
        let chain = registry.authorities_for(&AuthorityQuery {
            app: request.app,
            request_type: request.request_type,
            department: requestor.department(),
            amount: request.amount,
        })?;
        let authority_ids: Vec<_> = chain.iter().map(|authority| authority.id.clone()).collect();
        let assignments = self.authorities.assignments_for(&authority_ids).await?;

        let initiated = self.engine.initiate(
            Submission {
                request: request.request,
                app: request.app,
                request_type: request.request_type,
                requestor,
                title: request.title,
                amount: request.amount,
                urgency: request.urgency,
                notes: request.notes,
            },
            &chain,
            &assignments,
            ctx.now,
        )?;
        self.workflows.create(&initiated).await?;

        Ok(WorkflowSnapshot {
            log_head: Some(ledger::head_of(&initiated.log)),
            workflow: initiated.workflow,
            steps: initiated.steps,
        })
    }

    pub async fn approve(
        &self,
        ctx: &OperationContext,
        workflow_id: &WorkflowId,
        level: u8,
        approver: &EmployeeId,
        comments: &str,
    ) -> Result<WorkflowSnapshot, ServiceError> {
        self.transition(ctx, "workflow.approved", workflow_id, &approver.0, |engine, snapshot| {
            engine.approve(snapshot, level, approver, comments, ctx.now)
        })
        .await
    }

    pub async fn reject(
        &self,
        ctx: &OperationContext,
        workflow_id: &WorkflowId,
        level: u8,
        approver: &EmployeeId,
        reason: &str,
    ) -> Result<WorkflowSnapshot, ServiceError> {
        self.transition(ctx, "workflow.rejected", workflow_id, &approver.0, |engine, snapshot| {
            engine.reject(snapshot, level, approver, reason, ctx.now)
        })
        .await
    }

    pub async fn cancel(
        &self,
        ctx: &OperationContext,
        workflow_id: &WorkflowId,
        requestor: &EmployeeId,
        reason: &str,
    ) -> Result<WorkflowSnapshot, ServiceError> {
        self.transition(ctx, "workflow.cancelled", workflow_id, &requestor.0, |engine, snapshot| {
            engine.cancel(snapshot, requestor, reason, ctx.now)
        })
        .await
    }

    pub async fn comment(
        &self,
        ctx: &OperationContext,
        workflow_id: &WorkflowId,
        author: &EmployeeId,
        text: &str,
    ) -> Result<WorkflowSnapshot, ServiceError> {
        self.transition(ctx, "workflow.commented", workflow_id, &author.0, |engine, snapshot| {
            engine.comment(snapshot, author, text, ctx.now)
        })
        .await
    }

    pub async fn pending_for(&self, employee: &EmployeeId) -> Result<Vec<PendingApproval>, ServiceError> {
        Ok(self.workflows.pending_for(employee).await?)
    }

    /// Full log of the workflow bound to `request`; empty when none exists.
    pub async fn history_for(&self, request: &RequestRef) -> Result<Vec<ApprovalLog>, ServiceError> {
        match self.workflows.find_snapshot_by_request(request).await? {
            Some(snapshot) => Ok(self.workflows.history(&snapshot.workflow.id).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn workflow_for(&self, request: &RequestRef) -> Result<Option<WorkflowSnapshot>, ServiceError> {
        Ok(self.workflows.find_snapshot_by_request(request).await?)
    }

    pub async fn can_approve(
        &self,
        employee: &EmployeeId,
        workflow_id: &WorkflowId,
        level: u8,
    ) -> Result<bool, ServiceError> {
        Ok(self
            .workflows
            .find_snapshot(workflow_id)
            .await?
            .is_some_and(|snapshot| self.engine.can_approve(&snapshot, employee, level)))
    }

    pub async fn verify_history(&self, workflow_id: &WorkflowId) -> Result<VerificationResult, ServiceError> {
        let entries = self.workflows.history(workflow_id).await?;
        let result = ledger::verify_chain(workflow_id, &entries);
        if !result.valid {
            warn!(
                event_name = "ledger.verification_failed",
                workflow_id = %workflow_id.0,
                verified_entries = result.verified_entries,
                reason = result.failure_reason.as_deref().unwrap_or("-"),
                "approval log failed verification"
            );
        }
        Ok(result)
    }

    /// Structural problems in the stored authority configuration and
    /// assignees who do not hold the rank their authority requires.
    pub async fn check_configuration(&self) -> Result<Vec<ConfigurationIssue>, ServiceError> {
        let registry = AuthorityRegistry::new(self.authorities.list_all().await?);
        let assignments = self.authorities.list_assignments().await?;
        let employees = self.directory.list_employees().await?;
        let levels = self.directory.list_levels().await?;

        let mut issues = registry.check_configuration();
        issues.extend(registry.check_assignee_ranks(&assignments, &employees, &levels));
        Ok(issues)
    }

    /// One pass over every open workflow, loaded `batch_size` at a time.
    /// Conflicts mean another actor moved the workflow first and are counted,
    /// not retried.
    pub async fn sweep(
        &self,
        ctx: &OperationContext,
        policy: &SweepPolicy,
        batch_size: u32,
    ) -> Result<SweepReport, ServiceError> {
        let batch_size = batch_size.max(1);
        let directory = InMemoryOrgDirectory::from_employees(&self.directory.list_employees().await?);

        let mut report = SweepReport::default();
        let mut cursor: Option<OpenCursor> = None;
        loop {
            let page = self.workflows.list_open(cursor.as_ref(), batch_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(OpenCursor::after(last));
            report.merge(&self.sweep_page(ctx, policy, &directory, &page).await);
            if page.len() < batch_size as usize {
                break;
            }
        }

        info!(
            event_name = "sweep.completed",
            correlation_id = %ctx.correlation_id,
            examined = report.examined,
            auto_approved = report.auto_approved,
            escalated = report.escalated,
            conflicts = report.conflicts,
            failed = report.failed,
            "sweep pass completed"
        );
        Ok(report)
    }

    async fn sweep_page(
        &self,
        ctx: &OperationContext,
        policy: &SweepPolicy,
        directory: &InMemoryOrgDirectory,
        snapshots: &[WorkflowSnapshot],
    ) -> SweepReport {
        let mut report = SweepReport { examined: snapshots.len(), ..SweepReport::default() };
        for snapshot in snapshots {
            let Some(action) = sweep::plan(snapshot, policy, directory, ctx.now) else {
                continue;
            };

            let outcome: Result<(), ServiceError> =
                match sweep::apply(&self.engine, snapshot, &action, ctx.now) {
                    Ok(transition) => self.workflows.apply(&transition).await.map_err(Into::into),
                    Err(error) => Err(error.into()),
                };

            match outcome {
                Ok(()) => {
                    report.record(&action);
                    info!(
                        event_name = "sweep.action_applied",
                        correlation_id = %ctx.correlation_id,
                        workflow_id = %snapshot.workflow.id.0,
                        action = ?action,
                        "sweep action applied"
                    );
                    self.audit.emit(
                        AuditEvent::new(
                            &self.audit_context(ctx, Some(&snapshot.workflow.id), "system"),
                            "sweep.action_applied",
                            AuditCategory::Sweep,
                            AuditOutcome::Success,
                        )
                        .with_metadata("action", format!("{action:?}")),
                    );
                }
                Err(ServiceError::Conflict(message)) => {
                    report.conflicts += 1;
                    info!(
                        event_name = "sweep.action_conflict",
                        correlation_id = %ctx.correlation_id,
                        workflow_id = %snapshot.workflow.id.0,
                        detail = %message,
                        "workflow changed during sweep"
                    );
                }
                Err(error) => {
                    report.failed += 1;
                    warn!(
                        event_name = "sweep.action_failed",
                        correlation_id = %ctx.correlation_id,
                        workflow_id = %snapshot.workflow.id.0,
                        error = %error,
                        "sweep action failed"
                    );
                    self.audit.emit(
                        AuditEvent::new(
                            &self.audit_context(ctx, Some(&snapshot.workflow.id), "system"),
                            "sweep.action_applied",
                            AuditCategory::Sweep,
                            error.outcome(),
                        )
                        .with_metadata("error", error.to_string()),
                    );
                }
            }
        }
        report
    }

    async fn transition<F>(
        &self,
        ctx: &OperationContext,
        event_type: &'static str,
        workflow_id: &WorkflowId,
        actor: &str,
        decide: F,
    ) -> Result<WorkflowSnapshot, ServiceError>
    where
        F: FnOnce(&WorkflowEngine, &WorkflowSnapshot) -> Result<WorkflowTransition, WorkflowError>,
    {
        let result = self.transition_inner(workflow_id, decide).await;

        match &result {
            Ok(snapshot) => info!(
                event_name = event_type,
                correlation_id = %ctx.correlation_id,
                workflow_id = %workflow_id.0,
                actor = actor,
                status = snapshot.workflow.status.as_str(),
                current_level = snapshot.workflow.current_approval_level,
                "workflow transition committed"
            ),
            Err(error) => warn!(
                event_name = event_type,
                correlation_id = %ctx.correlation_id,
                workflow_id = %workflow_id.0,
                actor = actor,
                error = %error,
                "workflow transition refused"
            ),
        }
        self.record(ctx, actor, event_type, Some(workflow_id), &result, |event| event);
        result
    }

    async fn transition_inner<F>(
        &self,
        workflow_id: &WorkflowId,
        decide: F,
    ) -> Result<WorkflowSnapshot, ServiceError>
    where
        F: FnOnce(&WorkflowEngine, &WorkflowSnapshot) -> Result<WorkflowTransition, WorkflowError>,
    {
        let snapshot = self.workflows.find_snapshot(workflow_id).await?.ok_or_else(|| {
            ServiceError::NotFound { entity: "workflow", id: workflow_id.0.clone() }
        })?;
        let transition = decide(&self.engine, &snapshot)?;
        self.workflows.apply(&transition).await?;
        Ok(merge(snapshot, transition))
    }

    fn audit_context(&self, ctx: &OperationContext, workflow_id: Option<&WorkflowId>, actor: &str) -> AuditContext {
        AuditContext::new(workflow_id.cloned(), ctx.correlation_id.clone(), actor)
    }

    fn record<T>(
        &self,
        ctx: &OperationContext,
        actor: &str,
        event_type: &str,
        workflow_id: Option<&WorkflowId>,
        result: &Result<T, ServiceError>,
        decorate: impl FnOnce(AuditEvent) -> AuditEvent,
    ) {
        let context = self.audit_context(ctx, workflow_id, actor);
        let event = match result {
            Ok(_) => AuditEvent::new(&context, event_type, AuditCategory::Workflow, AuditOutcome::Success),
            Err(error) => AuditEvent::new(&context, event_type, AuditCategory::Workflow, error.outcome())
                .with_metadata("error", error.to_string()),
        };
        self.audit.emit(decorate(event));
    }
}

fn merge(mut snapshot: WorkflowSnapshot, transition: WorkflowTransition) -> WorkflowSnapshot {
    for step in transition.steps {
        if let Some(slot) = snapshot.steps.iter_mut().find(|existing| existing.id == step.id) {
            *slot = step;
        }
    }
    snapshot.workflow = transition.workflow;
    snapshot.log_head = Some(ledger::head_of(&transition.log));
    snapshot
}
