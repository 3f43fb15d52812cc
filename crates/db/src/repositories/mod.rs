use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use signoff_core::domain::authority::{AppKind, ApprovalAuthority, ApproverAssignment, AuthorityId, RequestType};
use signoff_core::domain::org::{Employee, EmployeeId, OrganizationalLevel};
use signoff_core::domain::workflow::{
    ApprovalLog, PendingApproval, RequestRef, WorkflowId, WorkflowSnapshot,
};
use signoff_core::workflow::{InitiatedWorkflow, WorkflowTransition};

mod codec;
pub mod authority;
pub mod directory;
pub mod memory;
pub mod workflow;

pub use authority::SqlAuthorityRepository;
pub use directory::SqlDirectoryRepository;
pub use memory::{InMemoryAuthorityRepository, InMemoryDirectoryRepository, InMemoryWorkflowRepository};
pub use workflow::SqlWorkflowRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    async fn find_employee(&self, id: &EmployeeId) -> Result<Option<Employee>, RepositoryError>;
    async fn list_employees(&self) -> Result<Vec<Employee>, RepositoryError>;
    async fn list_levels(&self) -> Result<Vec<OrganizationalLevel>, RepositoryError>;
    async fn save_level(&self, level: OrganizationalLevel) -> Result<(), RepositoryError>;
    async fn save_employee(&self, employee: Employee) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AuthorityRepository: Send + Sync {
    /// Every authority configured for the pair, across all departments.
    async fn list_for(
        &self,
        app: AppKind,
        request_type: RequestType,
    ) -> Result<Vec<ApprovalAuthority>, RepositoryError>;
    async fn list_all(&self) -> Result<Vec<ApprovalAuthority>, RepositoryError>;
    async fn save_authority(&self, authority: ApprovalAuthority) -> Result<(), RepositoryError>;

    async fn assignments_for(
        &self,
        authority_ids: &[AuthorityId],
    ) -> Result<Vec<ApproverAssignment>, RepositoryError>;
    async fn list_assignments(&self) -> Result<Vec<ApproverAssignment>, RepositoryError>;
    async fn save_assignment(&self, assignment: ApproverAssignment) -> Result<(), RepositoryError>;
}

/// Workflow persistence. Writes are all-or-nothing: a workflow, its step
/// changes and its log row land together or not at all.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Fails with `Conflict` when the record already has a workflow.
    async fn create(&self, initiated: &InitiatedWorkflow) -> Result<(), RepositoryError>;

    /// Fails with `Conflict` when the stored version no longer matches
    /// `transition.expected_version`.
    async fn apply(&self, transition: &WorkflowTransition) -> Result<(), RepositoryError>;

    async fn find_snapshot(&self, id: &WorkflowId) -> Result<Option<WorkflowSnapshot>, RepositoryError>;
    async fn find_snapshot_by_request(
        &self,
        request: &RequestRef,
    ) -> Result<Option<WorkflowSnapshot>, RepositoryError>;

    /// Active steps assigned to `employee`, most urgent first, then newest.
    async fn pending_for(&self, employee: &EmployeeId) -> Result<Vec<PendingApproval>, RepositoryError>;

    /// Log rows in sequence order.
    async fn history(&self, id: &WorkflowId) -> Result<Vec<ApprovalLog>, RepositoryError>;

    /// Open workflows, oldest first, starting after `after`.
    async fn list_open(
        &self,
        after: Option<&OpenCursor>,
        limit: u32,
    ) -> Result<Vec<WorkflowSnapshot>, RepositoryError>;
}

/// Keyset position in the `(created_at, id)` order used by `list_open`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenCursor {
    pub created_at: DateTime<Utc>,
    pub workflow_id: WorkflowId,
}

impl OpenCursor {
    pub fn after(snapshot: &WorkflowSnapshot) -> Self {
        Self {
            created_at: snapshot.workflow.created_at,
            workflow_id: snapshot.workflow.id.clone(),
        }
    }

    pub(crate) fn precedes(&self, snapshot: &WorkflowSnapshot) -> bool {
        (self.created_at, &self.workflow_id.0) < (snapshot.workflow.created_at, &snapshot.workflow.id.0)
    }
}

pub(crate) fn sort_pending(pending: &mut [PendingApproval]) {
    pending.sort_by(|left, right| {
        right
            .workflow
            .urgency
            .weight()
            .cmp(&left.workflow.urgency.weight())
            .then_with(|| right.workflow.submitted_at.cmp(&left.workflow.submitted_at))
            .then_with(|| left.workflow.id.0.cmp(&right.workflow.id.0))
    });
}
