pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod ledger;
pub mod workflow;

pub use approvals::{
    AuthorityQuery, AuthorityRegistry, ApproverSource, ConfigurationIssue, IssueKind,
    RegistryError, ResolvedApprover,
};
pub use domain::authority::{
    AppKind, ApprovalAuthority, ApproverAssignment, AssignmentId, AuthorityId, RequestType,
};
pub use domain::org::{Employee, EmployeeId, OrgLevelId, OrganizationalLevel};
pub use domain::workflow::{
    Actor, ApprovalLog, ApprovalStep, ApprovalWorkflow, LogAction, LogEntryId, LogHead,
    PendingApproval, RequestKind, RequestRef, StepId, StepStatus, Urgency, WorkflowId,
    WorkflowSnapshot, WorkflowStatus,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use ledger::VerificationResult;
pub use workflow::{
    InitiatedWorkflow, InMemoryOrgDirectory, OrgDirectory, Submission, SweepAction, SweepPolicy,
    SweepReport, WorkflowEngine, WorkflowError, WorkflowTransition,
};
