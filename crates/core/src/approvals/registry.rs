use std::collections::{BTreeMap, BTreeSet, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::authority::{
    AppKind, ApprovalAuthority, ApproverAssignment, AuthorityId, RequestType, MAX_APPROVAL_LEVEL,
    MIN_APPROVAL_LEVEL,
};
use crate::domain::org::{Employee, EmployeeId, OrgLevelId, OrganizationalLevel};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorityQuery<'a> {
    pub app: AppKind,
    pub request_type: RequestType,
    pub department: Option<&'a str>,
    pub amount: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error(
        "no approval authorities configured for {app}/{request_type} (department: {department}, amount: {amount})"
    )]
    NoAuthorities { app: String, request_type: String, department: String, amount: String },
    #[error("authority `{authority_id}` has approval level {level} outside 1..=5")]
    LevelOutOfRange { authority_id: String, level: u8 },
    #[error("authorities `{first}` and `{second}` both define approval level {level}")]
    DuplicateLevel { level: u8, first: String, second: String },
    #[error("approval levels are not contiguous: expected level {expected}, found {found}")]
    LevelGap { expected: u8, found: u8 },
}

/// Read-only view over the configured authorities for lookups and audits.
#[derive(Clone, Debug, Default)]
pub struct AuthorityRegistry {
    authorities: Vec<ApprovalAuthority>,
}

impl AuthorityRegistry {
    pub fn new(authorities: Vec<ApprovalAuthority>) -> Self {
        Self { authorities }
    }

    /// Ordered authority chain for one request.
    ///
    /// Blank-department rows act as the default for every department; a
    /// department-specific row replaces the blank one at the same level.
    pub fn authorities_for(
        &self,
        query: &AuthorityQuery<'_>,
    ) -> Result<Vec<ApprovalAuthority>, RegistryError> {
        let department = query
            .department
            .map(str::trim)
            .filter(|department| !department.is_empty())
            .map(str::to_ascii_lowercase);

        let mut by_level: BTreeMap<u8, Vec<&ApprovalAuthority>> = BTreeMap::new();
        for authority in self.authorities.iter().filter(|authority| {
            authority.is_required
                && authority.app == query.app
                && authority.request_type == query.request_type
                && department_matches(authority, department.as_deref())
                && query.amount.map_or(true, |amount| authority.covers_amount(amount))
        }) {
            by_level.entry(authority.approval_level).or_default().push(authority);
        }

        if by_level.is_empty() {
            return Err(RegistryError::NoAuthorities {
                app: query.app.as_str().to_owned(),
                request_type: query.request_type.as_str().to_owned(),
                department: department.unwrap_or_else(|| "-".to_owned()),
                amount: query.amount.map_or_else(|| "-".to_owned(), |amount| amount.to_string()),
            });
        }

        let mut chain = Vec::with_capacity(by_level.len());
        for (level, candidates) in by_level {
            let specific: Vec<&ApprovalAuthority> = candidates
                .iter()
                .copied()
                .filter(|authority| authority.department_key().is_some())
                .collect();
            let mut winners = if specific.is_empty() { candidates } else { specific };
            winners.sort_by(|left, right| left.id.cmp(&right.id));

            if let [first, second, ..] = winners.as_slice() {
                return Err(RegistryError::DuplicateLevel {
                    level,
                    first: first.id.0.clone(),
                    second: second.id.0.clone(),
                });
            }
            if let Some(authority) = winners.first() {
                chain.push((*authority).clone());
            }
        }

        validate_levels(&chain)?;
        Ok(chain)
    }

    /// Audits every (app, request_type, department) group as it would be seen
    /// by a requestor of that department.
    pub fn check_configuration(&self) -> Vec<ConfigurationIssue> {
        let mut issues = Vec::new();

        for authority in &self.authorities {
            if !(MIN_APPROVAL_LEVEL..=MAX_APPROVAL_LEVEL).contains(&authority.approval_level) {
                issues.push(ConfigurationIssue::for_authority(
                    authority,
                    IssueKind::LevelOutOfRange,
                    format!("approval level {} is outside 1..=5", authority.approval_level),
                ));
            }
            if let (Some(min), Some(max)) = (authority.min_amount, authority.max_amount) {
                if min > max {
                    issues.push(ConfigurationIssue::for_authority(
                        authority,
                        IssueKind::InvertedAmountRange,
                        format!("min_amount {min} is greater than max_amount {max}"),
                    ));
                }
            }
        }

        let mut groups: BTreeMap<(AppKind, RequestType), BTreeMap<Option<String>, Vec<&ApprovalAuthority>>> =
            BTreeMap::new();
        for authority in self.authorities.iter().filter(|authority| authority.is_required) {
            groups
                .entry((authority.app, authority.request_type))
                .or_default()
                .entry(authority.department_key())
                .or_default()
                .push(authority);
        }

        for ((app, request_type), departments) in groups {
            let blank: Vec<&ApprovalAuthority> =
                departments.get(&None).cloned().unwrap_or_default();

            for (department, members) in &departments {
                let effective: BTreeSet<u8> = match department {
                    None => members.iter().map(|authority| authority.approval_level).collect(),
                    Some(_) => members
                        .iter()
                        .chain(blank.iter())
                        .map(|authority| authority.approval_level)
                        .collect(),
                };

                let mut expected = MIN_APPROVAL_LEVEL;
                for level in effective {
                    if level != expected {
                        issues.push(ConfigurationIssue {
                            app,
                            request_type,
                            department: department.clone(),
                            authority_id: None,
                            kind: IssueKind::LevelGap,
                            detail: format!("expected level {expected}, found {level}"),
                        });
                        break;
                    }
                    expected = expected.saturating_add(1);
                }

                let mut seen: HashMap<u8, &ApprovalAuthority> = HashMap::new();
                for authority in members {
                    if let Some(existing) = seen.get(&authority.approval_level) {
                        if amount_ranges_overlap(existing, authority) {
                            issues.push(ConfigurationIssue::for_authority(
                                authority,
                                IssueKind::DuplicateLevel,
                                format!(
                                    "level {} overlaps authority `{}` for the same amounts",
                                    authority.approval_level, existing.id.0
                                ),
                            ));
                        }
                    } else {
                        seen.insert(authority.approval_level, *authority);
                    }
                }
            }
        }

        issues
    }

    /// Flags assignees whose organisational level does not reach the level an
    /// authority requires.
    pub fn check_assignee_ranks(
        &self,
        assignments: &[ApproverAssignment],
        employees: &[Employee],
        levels: &[OrganizationalLevel],
    ) -> Vec<ConfigurationIssue> {
        let authorities: HashMap<&AuthorityId, &ApprovalAuthority> =
            self.authorities.iter().map(|authority| (&authority.id, authority)).collect();
        let employees: HashMap<&EmployeeId, &Employee> =
            employees.iter().map(|employee| (&employee.id, employee)).collect();
        let levels: HashMap<&OrgLevelId, &OrganizationalLevel> =
            levels.iter().map(|level| (&level.id, level)).collect();

        let mut issues = Vec::new();
        for assignment in assignments.iter().filter(|assignment| assignment.is_active) {
            let Some(authority) = authorities.get(&assignment.authority_id) else {
                continue;
            };
            let Some(required) = levels.get(&authority.required_level_id) else {
                issues.push(ConfigurationIssue::for_authority(
                    authority,
                    IssueKind::UnknownOrgLevel,
                    format!("required level `{}` does not exist", authority.required_level_id.0),
                ));
                continue;
            };

            let held = employees
                .get(&assignment.employee_id)
                .and_then(|employee| employee.org_level_id.as_ref())
                .and_then(|level_id| levels.get(level_id));
            let satisfied = held.is_some_and(|held| held.satisfies(required));
            if !satisfied {
                issues.push(ConfigurationIssue::for_authority(
                    authority,
                    IssueKind::UnderRankedAssignee,
                    format!(
                        "employee `{}` does not hold level `{}` or above",
                        assignment.employee_id.0, required.name
                    ),
                ));
            }
        }

        issues
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    LevelOutOfRange,
    LevelGap,
    DuplicateLevel,
    InvertedAmountRange,
    UnknownOrgLevel,
    UnderRankedAssignee,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationIssue {
    pub app: AppKind,
    pub request_type: RequestType,
    pub department: Option<String>,
    pub authority_id: Option<AuthorityId>,
    pub kind: IssueKind,
    pub detail: String,
}

impl ConfigurationIssue {
    fn for_authority(authority: &ApprovalAuthority, kind: IssueKind, detail: String) -> Self {
        Self {
            app: authority.app,
            request_type: authority.request_type,
            department: authority.department_key(),
            authority_id: Some(authority.id.clone()),
            kind,
            detail,
        }
    }
}

fn department_matches(authority: &ApprovalAuthority, department: Option<&str>) -> bool {
    match (authority.department_key(), department) {
        (None, _) => true,
        (Some(configured), Some(requested)) => configured == requested,
        (Some(_), None) => false,
    }
}

fn amount_ranges_overlap(left: &ApprovalAuthority, right: &ApprovalAuthority) -> bool {
    let left_below_right = match (left.max_amount, right.min_amount) {
        (Some(max), Some(min)) => max < min,
        _ => false,
    };
    let right_below_left = match (right.max_amount, left.min_amount) {
        (Some(max), Some(min)) => max < min,
        _ => false,
    };
    !(left_below_right || right_below_left)
}

fn validate_levels(chain: &[ApprovalAuthority]) -> Result<(), RegistryError> {
    let mut expected = MIN_APPROVAL_LEVEL;
    for authority in chain {
        if !(MIN_APPROVAL_LEVEL..=MAX_APPROVAL_LEVEL).contains(&authority.approval_level) {
            return Err(RegistryError::LevelOutOfRange {
                authority_id: authority.id.0.clone(),
                level: authority.approval_level,
            });
        }
        if authority.approval_level != expected {
            return Err(RegistryError::LevelGap { expected, found: authority.approval_level });
        }
        expected = expected.saturating_add(1);
    }
    Ok(())
}
