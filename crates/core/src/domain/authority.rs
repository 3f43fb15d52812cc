use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::org::{EmployeeId, OrgLevelId};

pub const MIN_APPROVAL_LEVEL: u8 = 1;
pub const MAX_APPROVAL_LEVEL: u8 = 5;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorityId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentId(pub String);

/// Department modules that can submit requests for approval.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppKind {
    HumanResource,
    Housing,
    Logistics,
    Procurement,
    Ict,
    Qhse,
    HardService,
    SoftService,
    Training,
    Utility,
    Warehouse,
    Fls,
    Tickets,
}

impl AppKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HumanResource => "humanresource",
            Self::Housing => "housing",
            Self::Logistics => "logistics",
            Self::Procurement => "procurement",
            Self::Ict => "ict",
            Self::Qhse => "qhse",
            Self::HardService => "hardservice",
            Self::SoftService => "softservice",
            Self::Training => "training",
            Self::Utility => "utility",
            Self::Warehouse => "warehouse",
            Self::Fls => "fls",
            Self::Tickets => "tickets",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "humanresource" => Some(Self::HumanResource),
            "housing" => Some(Self::Housing),
            "logistics" => Some(Self::Logistics),
            "procurement" => Some(Self::Procurement),
            "ict" => Some(Self::Ict),
            "qhse" => Some(Self::Qhse),
            "hardservice" => Some(Self::HardService),
            "softservice" => Some(Self::SoftService),
            "training" => Some(Self::Training),
            "utility" => Some(Self::Utility),
            "warehouse" => Some(Self::Warehouse),
            "fls" => Some(Self::Fls),
            "tickets" => Some(Self::Tickets),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    PettyCash,
    Leave,
    Clearance,
    WorkNotice,
    VehicleRequest,
    PurchaseRequest,
    Maintenance,
    HousingAllocation,
    TrainingRequest,
    Overtime,
    Transfer,
    Hiring,
    General,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PettyCash => "petty_cash",
            Self::Leave => "leave",
            Self::Clearance => "clearance",
            Self::WorkNotice => "work_notice",
            Self::VehicleRequest => "vehicle_request",
            Self::PurchaseRequest => "purchase_request",
            Self::Maintenance => "maintenance",
            Self::HousingAllocation => "housing_allocation",
            Self::TrainingRequest => "training_request",
            Self::Overtime => "overtime",
            Self::Transfer => "transfer",
            Self::Hiring => "hiring",
            Self::General => "general",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "petty_cash" => Some(Self::PettyCash),
            "leave" => Some(Self::Leave),
            "clearance" => Some(Self::Clearance),
            "work_notice" => Some(Self::WorkNotice),
            "vehicle_request" => Some(Self::VehicleRequest),
            "purchase_request" => Some(Self::PurchaseRequest),
            "maintenance" => Some(Self::Maintenance),
            "housing_allocation" => Some(Self::HousingAllocation),
            "training_request" => Some(Self::TrainingRequest),
            "overtime" => Some(Self::Overtime),
            "transfer" => Some(Self::Transfer),
            "hiring" => Some(Self::Hiring),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// Who must approve a given request type at one level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalAuthority {
    pub id: AuthorityId,
    pub app: AppKind,
    pub request_type: RequestType,
    /// `None` applies to every department.
    pub department: Option<String>,
    pub approval_level: u8,
    pub required_level_id: OrgLevelId,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub is_required: bool,
    pub can_skip_if_unavailable: bool,
    pub auto_approve_after_days: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalAuthority {
    pub fn department_key(&self) -> Option<String> {
        self.department
            .as_deref()
            .map(str::trim)
            .filter(|department| !department.is_empty())
            .map(str::to_ascii_lowercase)
    }

    pub fn covers_amount(&self, amount: Decimal) -> bool {
        self.min_amount.map_or(true, |min| min <= amount)
            && self.max_amount.map_or(true, |max| amount <= max)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverAssignment {
    pub id: AssignmentId,
    pub employee_id: EmployeeId,
    pub authority_id: AuthorityId,
    pub is_primary: bool,
    pub is_backup: bool,
    /// Lower values resolve first.
    pub priority: i32,
    pub delegate_to: Option<EmployeeId>,
    pub delegation_start: Option<NaiveDate>,
    pub delegation_end: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApproverAssignment {
    /// The delegate acting for this assignment on `today`, if the window is open.
    pub fn active_delegate(&self, today: NaiveDate) -> Option<&EmployeeId> {
        let delegate = self.delegate_to.as_ref()?;
        let (start, end) = (self.delegation_start?, self.delegation_end?);
        (start <= today && today <= end).then_some(delegate)
    }
}
