use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmployeeId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrgLevelId(pub String);

/// A ranked tier of the reporting hierarchy. Lower rank means higher authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationalLevel {
    pub id: OrgLevelId,
    pub name: String,
    pub rank: u8,
    pub description: String,
}

impl OrganizationalLevel {
    pub fn satisfies(&self, required: &OrganizationalLevel) -> bool {
        self.rank <= required.rank
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub full_name: String,
    pub department: String,
    pub manager_id: Option<EmployeeId>,
    pub org_level_id: Option<OrgLevelId>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Employee {
    pub fn department(&self) -> Option<&str> {
        let department = self.department.trim();
        (!department.is_empty()).then_some(department)
    }
}
