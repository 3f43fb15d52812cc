use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::authority::{ApprovalAuthority, ApproverAssignment};
use crate::domain::org::{Employee, EmployeeId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApproverSource {
    DirectManager,
    Primary,
    Backup,
    Delegate { on_behalf_of: EmployeeId },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedApprover {
    pub employee_id: EmployeeId,
    pub source: ApproverSource,
}

/// Picks the concrete approver for one authority.
///
/// Precedence: the requestor's manager at level 1, then active primary
/// assignments, then active backups. Within each tier the lowest `priority`
/// wins, ties broken by creation time and id. A delegate replaces the chosen
/// assignee while `today` falls inside the delegation window.
pub fn resolve(
    authority: &ApprovalAuthority,
    requestor: &Employee,
    assignments: &[ApproverAssignment],
    today: NaiveDate,
) -> Option<ResolvedApprover> {
    if authority.approval_level == 1 {
        if let Some(manager_id) = &requestor.manager_id {
            return Some(ResolvedApprover {
                employee_id: manager_id.clone(),
                source: ApproverSource::DirectManager,
            });
        }
    }

    let mut candidates: Vec<&ApproverAssignment> = assignments
        .iter()
        .filter(|assignment| assignment.is_active && assignment.authority_id == authority.id)
        .collect();
    candidates.sort_by(|left, right| {
        left.priority
            .cmp(&right.priority)
            .then_with(|| left.created_at.cmp(&right.created_at))
            .then_with(|| left.id.0.cmp(&right.id.0))
    });

    candidates
        .iter()
        .find(|assignment| assignment.is_primary)
        .map(|assignment| substitute_delegate(assignment, ApproverSource::Primary, today))
        .or_else(|| {
            candidates
                .iter()
                .find(|assignment| assignment.is_backup)
                .map(|assignment| substitute_delegate(assignment, ApproverSource::Backup, today))
        })
}

fn substitute_delegate(
    assignment: &ApproverAssignment,
    source: ApproverSource,
    today: NaiveDate,
) -> ResolvedApprover {
    match assignment.active_delegate(today) {
        Some(delegate) => ResolvedApprover {
            employee_id: delegate.clone(),
            source: ApproverSource::Delegate { on_behalf_of: assignment.employee_id.clone() },
        },
        None => ResolvedApprover { employee_id: assignment.employee_id.clone(), source },
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, Utc};

    use super::{resolve, ApproverSource};
    use crate::domain::authority::{
        AppKind, ApprovalAuthority, ApproverAssignment, AssignmentId, AuthorityId, RequestType,
    };
    use crate::domain::org::{Employee, EmployeeId, OrgLevelId};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 5).expect("valid date")
    }

    fn authority(level: u8) -> ApprovalAuthority {
        let now = Utc::now();
        ApprovalAuthority {
            id: AuthorityId(format!("auth-{level}")),
            app: AppKind::HumanResource,
            request_type: RequestType::PettyCash,
            department: None,
            approval_level: level,
            required_level_id: OrgLevelId("lvl-5".to_owned()),
            min_amount: None,
            max_amount: None,
            is_required: true,
            can_skip_if_unavailable: false,
            auto_approve_after_days: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn requestor(manager: Option<&str>) -> Employee {
        let now = Utc::now();
        Employee {
            id: EmployeeId("emp-requestor".to_owned()),
            full_name: "Rae Requestor".to_owned(),
            department: "Finance".to_owned(),
            manager_id: manager.map(|id| EmployeeId(id.to_owned())),
            org_level_id: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn assignment(id: &str, employee: &str, level: u8, primary: bool, priority: i32) -> ApproverAssignment {
        let now = Utc::now();
        ApproverAssignment {
            id: AssignmentId(id.to_owned()),
            employee_id: EmployeeId(employee.to_owned()),
            authority_id: AuthorityId(format!("auth-{level}")),
            is_primary: primary,
            is_backup: !primary,
            priority,
            delegate_to: None,
            delegation_start: None,
            delegation_end: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn manager_wins_level_one_even_with_conflicting_assignments() {
        let assignments = vec![assignment("asg-1", "emp-primary", 1, true, 0)];

        let resolved =
            resolve(&authority(1), &requestor(Some("emp-manager")), &assignments, today())
                .expect("resolved");
        assert_eq!(resolved.employee_id.0, "emp-manager");
        assert_eq!(resolved.source, ApproverSource::DirectManager);
    }

    #[test]
    fn manager_rule_does_not_apply_above_level_one() {
        let assignments = vec![assignment("asg-2", "emp-primary", 2, true, 0)];

        let resolved =
            resolve(&authority(2), &requestor(Some("emp-manager")), &assignments, today())
                .expect("resolved");
        assert_eq!(resolved.employee_id.0, "emp-primary");
        assert_eq!(resolved.source, ApproverSource::Primary);
    }

    #[test]
    fn level_one_without_manager_falls_back_to_assignments() {
        let assignments = vec![assignment("asg-1", "emp-primary", 1, true, 0)];

        let resolved =
            resolve(&authority(1), &requestor(None), &assignments, today()).expect("resolved");
        assert_eq!(resolved.employee_id.0, "emp-primary");
    }

    #[test]
    fn lowest_priority_primary_wins_and_creation_time_breaks_ties() {
        let mut earlier = assignment("asg-b", "emp-earlier", 2, true, 5);
        earlier.created_at -= Duration::days(1);
        let assignments = vec![
            assignment("asg-a", "emp-later", 2, true, 5),
            earlier,
            assignment("asg-c", "emp-low-priority", 2, true, 9),
        ];

        let resolved =
            resolve(&authority(2), &requestor(None), &assignments, today()).expect("resolved");
        assert_eq!(resolved.employee_id.0, "emp-earlier");
    }

    #[test]
    fn active_delegate_replaces_primary_inside_window() {
        let mut primary = assignment("asg-1", "emp-primary", 2, true, 0);
        primary.delegate_to = Some(EmployeeId("emp-delegate".to_owned()));
        primary.delegation_start = NaiveDate::from_ymd_opt(2026, 3, 1);
        primary.delegation_end = NaiveDate::from_ymd_opt(2026, 3, 5);

        let resolved =
            resolve(&authority(2), &requestor(None), &[primary.clone()], today()).expect("resolved");
        assert_eq!(resolved.employee_id.0, "emp-delegate");
        assert_eq!(
            resolved.source,
            ApproverSource::Delegate { on_behalf_of: EmployeeId("emp-primary".to_owned()) }
        );

        let after_window = NaiveDate::from_ymd_opt(2026, 3, 6).expect("valid date");
        let resolved =
            resolve(&authority(2), &requestor(None), &[primary], after_window).expect("resolved");
        assert_eq!(resolved.employee_id.0, "emp-primary");
    }

    #[test]
    fn backup_is_used_when_no_active_primary() {
        let mut inactive = assignment("asg-1", "emp-primary", 2, true, 0);
        inactive.is_active = false;
        let assignments = vec![inactive, assignment("asg-2", "emp-backup", 2, false, 0)];

        let resolved =
            resolve(&authority(2), &requestor(None), &assignments, today()).expect("resolved");
        assert_eq!(resolved.employee_id.0, "emp-backup");
        assert_eq!(resolved.source, ApproverSource::Backup);
    }

    #[test]
    fn unresolvable_authority_returns_none() {
        let assignments = vec![assignment("asg-9", "emp-other", 3, true, 0)];

        assert_eq!(resolve(&authority(2), &requestor(None), &assignments, today()), None);
    }
}
