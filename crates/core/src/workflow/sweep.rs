//! Deadline enforcement for open workflows.
//!
//! Planning is pure: each pass looks at a fresh snapshot and yields at most one
//! action for it. Applying the action goes through the regular engine, so a
//! repeated pass over an already-advanced workflow plans nothing or loses the
//! version race.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::org::{Employee, EmployeeId};
use crate::domain::workflow::{StepStatus, WorkflowId, WorkflowSnapshot};
use crate::workflow::engine::{WorkflowEngine, WorkflowError, WorkflowTransition};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepPolicy {
    pub auto_approve: bool,
    pub escalate_after_hours: Option<u32>,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self { auto_approve: true, escalate_after_hours: None }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SweepAction {
    AutoApprove { workflow_id: WorkflowId, level: u8, overdue_days: u32 },
    Escalate { workflow_id: WorkflowId, level: u8, from: EmployeeId, to: EmployeeId, waited_hours: u32 },
}

pub trait OrgDirectory {
    fn manager_of(&self, employee_id: &EmployeeId) -> Option<EmployeeId>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryOrgDirectory {
    managers: HashMap<EmployeeId, EmployeeId>,
}

impl InMemoryOrgDirectory {
    pub fn from_employees(employees: &[Employee]) -> Self {
        let managers = employees
            .iter()
            .filter(|employee| employee.active)
            .filter_map(|employee| {
                employee.manager_id.clone().map(|manager_id| (employee.id.clone(), manager_id))
            })
            .collect();
        Self { managers }
    }
}

impl OrgDirectory for InMemoryOrgDirectory {
    fn manager_of(&self, employee_id: &EmployeeId) -> Option<EmployeeId> {
        self.managers.get(employee_id).cloned()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub examined: usize,
    pub auto_approved: usize,
    pub escalated: usize,
    pub conflicts: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn record(&mut self, action: &SweepAction) {
        match action {
            SweepAction::AutoApprove { .. } => self.auto_approved += 1,
            SweepAction::Escalate { .. } => self.escalated += 1,
        }
    }

    pub fn merge(&mut self, other: &SweepReport) {
        self.examined += other.examined;
        self.auto_approved += other.auto_approved;
        self.escalated += other.escalated;
        self.conflicts += other.conflicts;
        self.failed += other.failed;
    }
}

pub fn plan<D>(
    snapshot: &WorkflowSnapshot,
    policy: &SweepPolicy,
    directory: &D,
    now: DateTime<Utc>,
) -> Option<SweepAction>
where
    D: OrgDirectory + ?Sized,
{
    if !snapshot.workflow.status.is_open() {
        return None;
    }
    let step = snapshot.current_step().filter(|step| step.status == StepStatus::Pending)?;
    let level = step.approval_level;

    if policy.auto_approve {
        if let (Some(due_at), Some(days)) = (step.due_at, step.auto_approve_after_days) {
            if due_at <= now {
                return Some(SweepAction::AutoApprove {
                    workflow_id: snapshot.workflow.id.clone(),
                    level,
                    overdue_days: days,
                });
            }
        }
    }

    let hours = policy.escalate_after_hours?;
    if step.is_escalated {
        return None;
    }
    let activated_at = step.activated_at?;
    if now - activated_at < Duration::hours(i64::from(hours)) {
        return None;
    }

    let manager = directory.manager_of(&step.assigned_to)?;
    if manager == step.assigned_to || manager == snapshot.workflow.requestor_id {
        return None;
    }

    Some(SweepAction::Escalate {
        workflow_id: snapshot.workflow.id.clone(),
        level,
        from: step.assigned_to.clone(),
        to: manager,
        waited_hours: hours,
    })
}

pub fn apply(
    engine: &WorkflowEngine,
    snapshot: &WorkflowSnapshot,
    action: &SweepAction,
    now: DateTime<Utc>,
) -> Result<WorkflowTransition, WorkflowError> {
    match action {
        SweepAction::AutoApprove { level, overdue_days, .. } => engine.auto_approve(
            snapshot,
            *level,
            &format!("auto-approved after {overdue_days} day(s) without a decision"),
            now,
        ),
        SweepAction::Escalate { level, from, to, waited_hours, .. } => engine.escalate(
            snapshot,
            *level,
            to,
            &format!("no decision from {} within {waited_hours}h", from.0),
            now,
        ),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{apply, plan, InMemoryOrgDirectory, SweepAction, SweepPolicy, SweepReport};
    use crate::domain::authority::{AppKind, AuthorityId, RequestType};
    use crate::domain::org::{Employee, EmployeeId};
    use crate::domain::workflow::{
        ApprovalStep, ApprovalWorkflow, RequestKind, RequestRef, StepId, StepStatus, Urgency,
        WorkflowId, WorkflowSnapshot, WorkflowStatus,
    };
    use crate::workflow::engine::WorkflowEngine;

    fn at(day: u32, hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).single().expect("valid timestamp")
    }

    fn snapshot(auto_days: Option<u32>) -> WorkflowSnapshot {
        let workflow_id = WorkflowId("wf-sweep".to_owned());
        let activated = at(2, 9);
        WorkflowSnapshot {
            workflow: ApprovalWorkflow {
                id: workflow_id.clone(),
                request: RequestRef::new(RequestKind::LeaveRequest, "LV-7"),
                app: AppKind::HumanResource,
                request_type: RequestType::Leave,
                title: "Annual leave".to_owned(),
                amount: None,
                requestor_id: EmployeeId("emp-requestor".to_owned()),
                requestor_department: "Housing".to_owned(),
                status: WorkflowStatus::Submitted,
                current_approval_level: 1,
                total_approval_levels: 1,
                urgency: Urgency::Medium,
                notes: String::new(),
                version: 1,
                submitted_at: Some(activated),
                completed_at: None,
                created_at: activated,
                updated_at: activated,
            },
            steps: vec![ApprovalStep {
                id: StepId("step-1".to_owned()),
                workflow_id,
                approval_level: 1,
                authority_id: AuthorityId("auth-leave-1".to_owned()),
                assigned_to: EmployeeId("emp-supervisor".to_owned()),
                status: StepStatus::Pending,
                approved_by: None,
                assigned_at: activated,
                activated_at: Some(activated),
                auto_approve_after_days: auto_days,
                due_at: auto_days.map(|days| activated + Duration::days(i64::from(days))),
                action_at: None,
                comments: String::new(),
                is_escalated: false,
                escalated_to: None,
                escalation_reason: None,
            }],
            log_head: None,
        }
    }

    fn directory() -> InMemoryOrgDirectory {
        let employee = |id: &str, manager: Option<&str>| Employee {
            id: EmployeeId(id.to_owned()),
            full_name: id.to_owned(),
            department: "Housing".to_owned(),
            manager_id: manager.map(|manager| EmployeeId(manager.to_owned())),
            org_level_id: None,
            active: true,
            created_at: at(1, 0),
            updated_at: at(1, 0),
        };
        InMemoryOrgDirectory::from_employees(&[
            employee("emp-supervisor", Some("emp-director")),
            employee("emp-requestor", Some("emp-supervisor")),
        ])
    }

    #[test]
    fn overdue_step_is_auto_approved() {
        let action = plan(&snapshot(Some(2)), &SweepPolicy::default(), &directory(), at(4, 9));
        assert!(matches!(action, Some(SweepAction::AutoApprove { level: 1, overdue_days: 2, .. })));
    }

    #[test]
    fn step_before_deadline_is_left_alone() {
        let action = plan(&snapshot(Some(2)), &SweepPolicy::default(), &directory(), at(4, 8));
        assert_eq!(action, None);
    }

    #[test]
    fn auto_approval_can_be_disabled() {
        let policy = SweepPolicy { auto_approve: false, escalate_after_hours: None };
        assert_eq!(plan(&snapshot(Some(1)), &policy, &directory(), at(9, 0)), None);
    }

    #[test]
    fn stale_step_escalates_to_assignee_manager_once() {
        let policy = SweepPolicy { auto_approve: true, escalate_after_hours: Some(24) };
        let start = snapshot(None);

        let action = plan(&start, &policy, &directory(), at(3, 9)).expect("escalation");
        assert_eq!(
            action,
            SweepAction::Escalate {
                workflow_id: WorkflowId("wf-sweep".to_owned()),
                level: 1,
                from: EmployeeId("emp-supervisor".to_owned()),
                to: EmployeeId("emp-director".to_owned()),
                waited_hours: 24,
            }
        );

        let transition =
            apply(&WorkflowEngine::new(), &start, &action, at(3, 9)).expect("escalate");
        let mut escalated = start.clone();
        escalated.steps = transition.steps;
        assert_eq!(plan(&escalated, &policy, &directory(), at(9, 9)), None);
    }

    #[test]
    fn closed_workflow_plans_nothing() {
        let mut closed = snapshot(Some(1));
        closed.workflow.status = WorkflowStatus::Approved;
        assert_eq!(plan(&closed, &SweepPolicy::default(), &directory(), at(9, 0)), None);
    }

    #[test]
    fn report_counts_each_action_kind() {
        let mut report = SweepReport::default();
        report.record(&SweepAction::AutoApprove {
            workflow_id: WorkflowId("wf-1".to_owned()),
            level: 1,
            overdue_days: 1,
        });
        let mut other = SweepReport { examined: 3, conflicts: 1, ..SweepReport::default() };
        other.escalated = 1;
        report.merge(&other);

        assert_eq!(report.auto_approved, 1);
        assert_eq!(report.escalated, 1);
        assert_eq!(report.examined, 3);
        assert_eq!(report.conflicts, 1);
    }
}
