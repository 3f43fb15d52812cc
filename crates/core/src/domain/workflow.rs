use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::authority::{AppKind, AuthorityId, RequestType};
use crate::domain::org::EmployeeId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogEntryId(pub String);

/// Domain record kinds that can be routed through an approval workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    PettyCash,
    LeaveRequest,
    Clearance,
    WorkNotice,
    VehicleRequest,
    PurchaseRequest,
    MaintenanceRequest,
    HousingAllocation,
    MaterialRequisition,
    TrainingRequest,
    OvertimeRequest,
    TransferRequest,
    HiringRequest,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PettyCash => "petty_cash",
            Self::LeaveRequest => "leave_request",
            Self::Clearance => "clearance",
            Self::WorkNotice => "work_notice",
            Self::VehicleRequest => "vehicle_request",
            Self::PurchaseRequest => "purchase_request",
            Self::MaintenanceRequest => "maintenance_request",
            Self::HousingAllocation => "housing_allocation",
            Self::MaterialRequisition => "material_requisition",
            Self::TrainingRequest => "training_request",
            Self::OvertimeRequest => "overtime_request",
            Self::TransferRequest => "transfer_request",
            Self::HiringRequest => "hiring_request",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "petty_cash" => Some(Self::PettyCash),
            "leave_request" => Some(Self::LeaveRequest),
            "clearance" => Some(Self::Clearance),
            "work_notice" => Some(Self::WorkNotice),
            "vehicle_request" => Some(Self::VehicleRequest),
            "purchase_request" => Some(Self::PurchaseRequest),
            "maintenance_request" => Some(Self::MaintenanceRequest),
            "housing_allocation" => Some(Self::HousingAllocation),
            "material_requisition" => Some(Self::MaterialRequisition),
            "training_request" => Some(Self::TrainingRequest),
            "overtime_request" => Some(Self::OvertimeRequest),
            "transfer_request" => Some(Self::TransferRequest),
            "hiring_request" => Some(Self::HiringRequest),
            _ => None,
        }
    }
}

/// Typed pointer from a workflow to the domain record it governs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestRef {
    pub kind: RequestKind,
    pub id: String,
}

impl RequestRef {
    pub fn new(kind: RequestKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

impl std::fmt::Display for RequestRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Submitted,
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Returned,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Returned => "returned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "submitted" => Some(Self::Submitted),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "returned" => Some(Self::Returned),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }

    /// Statuses in which the active step accepts decisions.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Submitted | Self::Pending)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
    Delegated,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
            Self::Delegated => "delegated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "skipped" => Some(Self::Skipped),
            "delegated" => Some(Self::Delegated),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Urgent,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }

    /// Sort weight; higher is more urgent.
    pub fn weight(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }
}

impl Default for Urgency {
    fn default() -> Self {
        Self::Medium
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Submitted,
    Approved,
    Rejected,
    Returned,
    Cancelled,
    Delegated,
    Escalated,
    Commented,
    Viewed,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Returned => "returned",
            Self::Cancelled => "cancelled",
            Self::Delegated => "delegated",
            Self::Escalated => "escalated",
            Self::Commented => "commented",
            Self::Viewed => "viewed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "returned" => Some(Self::Returned),
            "cancelled" => Some(Self::Cancelled),
            "delegated" => Some(Self::Delegated),
            "escalated" => Some(Self::Escalated),
            "commented" => Some(Self::Commented),
            "viewed" => Some(Self::Viewed),
            _ => None,
        }
    }
}

/// Who performed a logged action. Sweeps act as `System`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Employee(EmployeeId),
    System,
}

impl Actor {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Employee(_) => "employee",
            Self::System => "system",
        }
    }

    pub fn employee_id(&self) -> Option<&EmployeeId> {
        match self {
            Self::Employee(id) => Some(id),
            Self::System => None,
        }
    }

    pub fn from_parts(kind: &str, id: Option<String>) -> Option<Self> {
        match (kind, id) {
            ("employee", Some(id)) => Some(Self::Employee(EmployeeId(id))),
            ("system", _) => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub id: WorkflowId,
    pub request: RequestRef,
    pub app: AppKind,
    pub request_type: RequestType,
    pub title: String,
    pub amount: Option<Decimal>,
    pub requestor_id: EmployeeId,
    pub requestor_department: String,
    pub status: WorkflowStatus,
    pub current_approval_level: u8,
    pub total_approval_levels: u8,
    pub urgency: Urgency,
    pub notes: String,
    pub version: u32,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: StepId,
    pub workflow_id: WorkflowId,
    pub approval_level: u8,
    pub authority_id: AuthorityId,
    pub assigned_to: EmployeeId,
    pub status: StepStatus,
    pub approved_by: Option<EmployeeId>,
    pub assigned_at: DateTime<Utc>,
    /// Set when the step becomes the workflow's current level.
    pub activated_at: Option<DateTime<Utc>>,
    /// Copied from the authority when the step is created.
    pub auto_approve_after_days: Option<u32>,
    /// Auto-approval deadline, derived from `auto_approve_after_days` on activation.
    pub due_at: Option<DateTime<Utc>>,
    pub action_at: Option<DateTime<Utc>>,
    pub comments: String,
    pub is_escalated: bool,
    pub escalated_to: Option<EmployeeId>,
    pub escalation_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLog {
    pub id: LogEntryId,
    pub workflow_id: WorkflowId,
    pub step_id: Option<StepId>,
    pub sequence: u32,
    pub action: LogAction,
    pub actor: Actor,
    pub previous_status: Option<WorkflowStatus>,
    pub new_status: WorkflowStatus,
    pub comments: String,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A workflow together with all of its steps, ordered by level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub workflow: ApprovalWorkflow,
    pub steps: Vec<ApprovalStep>,
    /// Hash and sequence of the newest log row, used to chain the next one.
    pub log_head: Option<LogHead>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogHead {
    pub sequence: u32,
    pub entry_hash: String,
}

impl WorkflowSnapshot {
    pub fn step_at(&self, level: u8) -> Option<&ApprovalStep> {
        self.steps.iter().find(|step| step.approval_level == level)
    }

    pub fn current_step(&self) -> Option<&ApprovalStep> {
        self.step_at(self.workflow.current_approval_level)
    }

    pub fn next_level_after(&self, level: u8) -> Option<u8> {
        self.steps
            .iter()
            .map(|step| step.approval_level)
            .filter(|candidate| *candidate > level)
            .min()
    }
}

/// A pending step joined with its workflow, as listed in an approver's inbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub workflow: ApprovalWorkflow,
    pub step: ApprovalStep,
}

#[cfg(test)]
mod tests {
    use super::{Actor, LogAction, RequestKind, StepStatus, Urgency, WorkflowStatus};
    use crate::domain::org::EmployeeId;

    #[test]
    fn workflow_status_round_trips_from_storage_encoding() {
        let cases = [
            WorkflowStatus::Draft,
            WorkflowStatus::Submitted,
            WorkflowStatus::Pending,
            WorkflowStatus::Approved,
            WorkflowStatus::Rejected,
            WorkflowStatus::Cancelled,
            WorkflowStatus::Returned,
        ];

        for status in cases {
            assert_eq!(WorkflowStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn only_approved_rejected_and_cancelled_are_terminal() {
        assert!(WorkflowStatus::Approved.is_terminal());
        assert!(WorkflowStatus::Rejected.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Pending.is_terminal());
        assert!(!WorkflowStatus::Returned.is_terminal());
        assert!(WorkflowStatus::Submitted.is_open());
        assert!(!WorkflowStatus::Returned.is_open());
    }

    #[test]
    fn urgency_weight_orders_urgent_first() {
        let mut levels = vec![Urgency::High, Urgency::Low, Urgency::Urgent, Urgency::Medium];
        levels.sort_by_key(|urgency| std::cmp::Reverse(urgency.weight()));
        assert_eq!(levels, vec![Urgency::Urgent, Urgency::High, Urgency::Medium, Urgency::Low]);
    }

    #[test]
    fn step_status_and_log_action_parse_storage_encoding() {
        assert_eq!(StepStatus::parse("skipped"), Some(StepStatus::Skipped));
        assert_eq!(LogAction::parse("ESCALATED"), Some(LogAction::Escalated));
        assert_eq!(RequestKind::parse("material_requisition"), Some(RequestKind::MaterialRequisition));
        assert_eq!(RequestKind::parse("invoice"), None);
    }

    #[test]
    fn actor_is_rebuilt_from_storage_columns() {
        assert_eq!(
            Actor::from_parts("employee", Some("EMP-7".to_string())),
            Some(Actor::Employee(EmployeeId("EMP-7".to_string())))
        );
        assert_eq!(Actor::from_parts("system", None), Some(Actor::System));
        assert_eq!(Actor::from_parts("employee", None), None);
    }
}
