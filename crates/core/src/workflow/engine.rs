use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::approvals::resolver::{resolve, ResolvedApprover};
use crate::domain::authority::{AppKind, ApprovalAuthority, ApproverAssignment, RequestType};
use crate::domain::org::{Employee, EmployeeId};
use crate::domain::workflow::{
    Actor, ApprovalLog, ApprovalStep, ApprovalWorkflow, LogAction, RequestRef, StepId,
    StepStatus, Urgency, WorkflowId, WorkflowSnapshot, WorkflowStatus,
};
use crate::ledger::{self, LogDraft};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("submission is invalid: {0}")]
    InvalidSubmission(String),
    #[error("no approver could be resolved for required authority `{authority_id}` at level {level}")]
    ApproverUnavailable { authority_id: String, level: u8 },
    #[error("none of the {authorities} configured authorities resolved to an approver")]
    NoApproversResolved { authorities: usize },
    #[error("workflow `{workflow_id}` is {status} and accepts no further decisions")]
    WorkflowClosed { workflow_id: String, status: String },
    #[error("workflow `{workflow_id}` is at level {current}, not level {requested}")]
    LevelMismatch { workflow_id: String, requested: u8, current: u8 },
    #[error("workflow `{workflow_id}` has no step at level {level}")]
    StepNotFound { workflow_id: String, level: u8 },
    #[error("step at level {level} of workflow `{workflow_id}` is already {status}")]
    StepAlreadyDecided { workflow_id: String, level: u8, status: String },
    #[error("`{employee_id}` is not the assigned approver for level {level} of workflow `{workflow_id}`")]
    NotAssignedApprover { workflow_id: String, level: u8, employee_id: String },
    #[error("only the requestor may cancel workflow `{workflow_id}`")]
    NotRequestor { workflow_id: String, employee_id: String },
    #[error("comment text must not be empty")]
    EmptyComment,
}

/// Everything needed to open a workflow for one domain record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub request: RequestRef,
    pub app: AppKind,
    pub request_type: RequestType,
    pub requestor: Employee,
    pub title: String,
    pub amount: Option<Decimal>,
    pub urgency: Urgency,
    pub notes: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatedWorkflow {
    pub workflow: ApprovalWorkflow,
    pub steps: Vec<ApprovalStep>,
    pub log: ApprovalLog,
}

/// The writes produced by one engine action, to be committed atomically
/// against `expected_version`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTransition {
    pub workflow: ApprovalWorkflow,
    pub expected_version: u32,
    pub steps: Vec<ApprovalStep>,
    pub log: ApprovalLog,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Decision {
    Approve,
    Reject,
}

#[derive(Clone, Debug, Default)]
pub struct WorkflowEngine;

impl WorkflowEngine {
    pub fn new() -> Self {
        Self
    }

    /// Builds a submitted workflow with one pending step per authority that
    /// resolved to an approver. Nothing is produced when any required,
    /// non-skippable authority is unresolvable.
    pub fn initiate(
        &self,
        submission: Submission,
        authorities: &[ApprovalAuthority],
        assignments: &[ApproverAssignment],
        now: DateTime<Utc>,
    ) -> Result<InitiatedWorkflow, WorkflowError> {
        let title = submission.title.trim().to_owned();
        if title.is_empty() {
            return Err(WorkflowError::InvalidSubmission("title must not be empty".to_owned()));
        }
        if submission.request.id.trim().is_empty() {
            return Err(WorkflowError::InvalidSubmission("request id must not be empty".to_owned()));
        }
        if submission.amount.is_some_and(|amount| amount.is_sign_negative()) {
            return Err(WorkflowError::InvalidSubmission("amount must not be negative".to_owned()));
        }

        let today = now.date_naive();
        let mut resolved: Vec<(&ApprovalAuthority, ResolvedApprover)> = Vec::new();
        for authority in authorities {
            match resolve(authority, &submission.requestor, assignments, today) {
                Some(approver) => resolved.push((authority, approver)),
                None if authority.can_skip_if_unavailable => {}
                None => {
                    return Err(WorkflowError::ApproverUnavailable {
                        authority_id: authority.id.0.clone(),
                        level: authority.approval_level,
                    })
                }
            }
        }

        let first_level = resolved
            .iter()
            .map(|(authority, _)| authority.approval_level)
            .min()
            .ok_or(WorkflowError::NoApproversResolved { authorities: authorities.len() })?;

        let workflow_id = WorkflowId(Uuid::new_v4().to_string());
        let total_levels = u8::try_from(authorities.len()).unwrap_or(u8::MAX);
        let workflow = ApprovalWorkflow {
            id: workflow_id.clone(),
            request: submission.request,
            app: submission.app,
            request_type: submission.request_type,
            title,
            amount: submission.amount,
            requestor_department: submission.requestor.department.trim().to_owned(),
            requestor_id: submission.requestor.id.clone(),
            status: WorkflowStatus::Submitted,
            current_approval_level: first_level,
            total_approval_levels: total_levels,
            urgency: submission.urgency,
            notes: submission.notes,
            version: 1,
            submitted_at: Some(now),
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        let steps: Vec<ApprovalStep> = resolved
            .into_iter()
            .map(|(authority, approver)| {
                let mut step = ApprovalStep {
                    id: StepId(Uuid::new_v4().to_string()),
                    workflow_id: workflow_id.clone(),
                    approval_level: authority.approval_level,
                    authority_id: authority.id.clone(),
                    assigned_to: approver.employee_id,
                    status: StepStatus::Pending,
                    approved_by: None,
                    assigned_at: now,
                    activated_at: None,
                    auto_approve_after_days: authority.auto_approve_after_days,
                    due_at: None,
                    action_at: None,
                    comments: String::new(),
                    is_escalated: false,
                    escalated_to: None,
                    escalation_reason: None,
                };
                if step.approval_level == first_level {
                    activate(&mut step, now);
                }
                step
            })
            .collect();

        let log = ledger::append(
            &workflow_id,
            None,
            LogDraft {
                step_id: None,
                action: LogAction::Submitted,
                actor: Actor::Employee(submission.requestor.id),
                previous_status: None,
                new_status: WorkflowStatus::Submitted,
                comments: String::new(),
            },
            now,
        );

        Ok(InitiatedWorkflow { workflow, steps, log })
    }

    pub fn approve(
        &self,
        snapshot: &WorkflowSnapshot,
        level: u8,
        approver: &EmployeeId,
        comments: &str,
        now: DateTime<Utc>,
    ) -> Result<WorkflowTransition, WorkflowError> {
        self.decide(snapshot, level, Actor::Employee(approver.clone()), Decision::Approve, comments, now)
    }

    pub fn reject(
        &self,
        snapshot: &WorkflowSnapshot,
        level: u8,
        approver: &EmployeeId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<WorkflowTransition, WorkflowError> {
        self.decide(snapshot, level, Actor::Employee(approver.clone()), Decision::Reject, reason, now)
    }

    /// Approval on behalf of the system once a step's deadline has passed.
    pub fn auto_approve(
        &self,
        snapshot: &WorkflowSnapshot,
        level: u8,
        comments: &str,
        now: DateTime<Utc>,
    ) -> Result<WorkflowTransition, WorkflowError> {
        self.decide(snapshot, level, Actor::System, Decision::Approve, comments, now)
    }

    pub fn cancel(
        &self,
        snapshot: &WorkflowSnapshot,
        requestor: &EmployeeId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<WorkflowTransition, WorkflowError> {
        let current = &snapshot.workflow;
        ensure_open(current)?;
        if current.requestor_id != *requestor {
            return Err(WorkflowError::NotRequestor {
                workflow_id: current.id.0.clone(),
                employee_id: requestor.0.clone(),
            });
        }

        let mut workflow = bump(current, now);
        workflow.status = WorkflowStatus::Cancelled;
        workflow.completed_at = Some(now);

        let log = ledger::append(
            &workflow.id,
            snapshot.log_head.as_ref(),
            LogDraft {
                step_id: None,
                action: LogAction::Cancelled,
                actor: Actor::Employee(requestor.clone()),
                previous_status: Some(current.status),
                new_status: WorkflowStatus::Cancelled,
                comments: reason.trim().to_owned(),
            },
            now,
        );

        Ok(WorkflowTransition { workflow, expected_version: current.version, steps: Vec::new(), log })
    }

    /// Appends a comment without changing status. Allowed on closed workflows.
    pub fn comment(
        &self,
        snapshot: &WorkflowSnapshot,
        author: &EmployeeId,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<WorkflowTransition, WorkflowError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(WorkflowError::EmptyComment);
        }

        let current = &snapshot.workflow;
        let workflow = bump(current, now);
        let log = ledger::append(
            &workflow.id,
            snapshot.log_head.as_ref(),
            LogDraft {
                step_id: None,
                action: LogAction::Commented,
                actor: Actor::Employee(author.clone()),
                previous_status: Some(current.status),
                new_status: current.status,
                comments: text.to_owned(),
            },
            now,
        );

        Ok(WorkflowTransition { workflow, expected_version: current.version, steps: Vec::new(), log })
    }

    /// Reassigns the active step to `escalate_to` without deciding it.
    pub fn escalate(
        &self,
        snapshot: &WorkflowSnapshot,
        level: u8,
        escalate_to: &EmployeeId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<WorkflowTransition, WorkflowError> {
        let step = pending_current_step(snapshot, level)?;
        let current = &snapshot.workflow;

        let mut step = step.clone();
        step.assigned_to = escalate_to.clone();
        step.is_escalated = true;
        step.escalated_to = Some(escalate_to.clone());
        step.escalation_reason = Some(reason.to_owned());

        let workflow = bump(current, now);
        let log = ledger::append(
            &workflow.id,
            snapshot.log_head.as_ref(),
            LogDraft {
                step_id: Some(step.id.clone()),
                action: LogAction::Escalated,
                actor: Actor::System,
                previous_status: Some(current.status),
                new_status: current.status,
                comments: reason.to_owned(),
            },
            now,
        );

        Ok(WorkflowTransition {
            workflow,
            expected_version: current.version,
            steps: vec![step],
            log,
        })
    }

    pub fn can_approve(&self, snapshot: &WorkflowSnapshot, employee: &EmployeeId, level: u8) -> bool {
        pending_current_step(snapshot, level).is_ok_and(|step| step.assigned_to == *employee)
    }

    fn decide(
        &self,
        snapshot: &WorkflowSnapshot,
        level: u8,
        actor: Actor,
        decision: Decision,
        comments: &str,
        now: DateTime<Utc>,
    ) -> Result<WorkflowTransition, WorkflowError> {
        let step = pending_current_step(snapshot, level)?;
        let current = &snapshot.workflow;
        if let Actor::Employee(employee_id) = &actor {
            if step.assigned_to != *employee_id {
                return Err(WorkflowError::NotAssignedApprover {
                    workflow_id: current.id.0.clone(),
                    level,
                    employee_id: employee_id.0.clone(),
                });
            }
        }

        let mut decided = step.clone();
        decided.status = match decision {
            Decision::Approve => StepStatus::Approved,
            Decision::Reject => StepStatus::Rejected,
        };
        decided.approved_by = actor.employee_id().cloned();
        decided.action_at = Some(now);
        decided.comments = comments.trim().to_owned();

        let mut workflow = bump(current, now);
        let mut steps = vec![decided];
        match (decision, snapshot.next_level_after(level)) {
            (Decision::Reject, _) => {
                workflow.status = WorkflowStatus::Rejected;
                workflow.completed_at = Some(now);
            }
            (Decision::Approve, None) => {
                workflow.status = WorkflowStatus::Approved;
                workflow.completed_at = Some(now);
            }
            (Decision::Approve, Some(next_level)) => {
                workflow.status = WorkflowStatus::Pending;
                workflow.current_approval_level = next_level;
                if let Some(next) = snapshot.step_at(next_level) {
                    let mut next = next.clone();
                    activate(&mut next, now);
                    steps.push(next);
                }
            }
        }

        let action = match decision {
            Decision::Approve => LogAction::Approved,
            Decision::Reject => LogAction::Rejected,
        };
        let log = ledger::append(
            &workflow.id,
            snapshot.log_head.as_ref(),
            LogDraft {
                step_id: Some(step.id.clone()),
                action,
                actor,
                previous_status: Some(current.status),
                new_status: workflow.status,
                comments: comments.trim().to_owned(),
            },
            now,
        );

        Ok(WorkflowTransition { workflow, expected_version: current.version, steps, log })
    }
}

fn ensure_open(workflow: &ApprovalWorkflow) -> Result<(), WorkflowError> {
    if workflow.status.is_open() {
        Ok(())
    } else {
        Err(WorkflowError::WorkflowClosed {
            workflow_id: workflow.id.0.clone(),
            status: workflow.status.as_str().to_owned(),
        })
    }
}

fn pending_current_step(
    snapshot: &WorkflowSnapshot,
    level: u8,
) -> Result<&ApprovalStep, WorkflowError> {
    let workflow = &snapshot.workflow;
    ensure_open(workflow)?;
    if level != workflow.current_approval_level {
        return Err(WorkflowError::LevelMismatch {
            workflow_id: workflow.id.0.clone(),
            requested: level,
            current: workflow.current_approval_level,
        });
    }

    let step = snapshot.step_at(level).ok_or_else(|| WorkflowError::StepNotFound {
        workflow_id: workflow.id.0.clone(),
        level,
    })?;
    if step.status != StepStatus::Pending {
        return Err(WorkflowError::StepAlreadyDecided {
            workflow_id: workflow.id.0.clone(),
            level,
            status: step.status.as_str().to_owned(),
        });
    }
    Ok(step)
}

fn activate(step: &mut ApprovalStep, now: DateTime<Utc>) {
    step.activated_at = Some(now);
    step.due_at = step.auto_approve_after_days.map(|days| now + Duration::days(i64::from(days)));
}

fn bump(workflow: &ApprovalWorkflow, now: DateTime<Utc>) -> ApprovalWorkflow {
    let mut next = workflow.clone();
    next.version = workflow.version.saturating_add(1);
    next.updated_at = now;
    next
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{InitiatedWorkflow, Submission, WorkflowEngine, WorkflowError, WorkflowTransition};
    use crate::domain::authority::{
        AppKind, ApprovalAuthority, ApproverAssignment, AssignmentId, AuthorityId, RequestType,
    };
    use crate::domain::org::{Employee, EmployeeId, OrgLevelId};
    use crate::domain::workflow::{
        Actor, LogAction, RequestKind, RequestRef, StepStatus, Urgency, WorkflowSnapshot,
        WorkflowStatus,
    };
    use crate::ledger;

    fn at(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).single().expect("valid timestamp")
    }

    fn employee(id: &str) -> EmployeeId {
        EmployeeId(id.to_owned())
    }

    fn authority(level: u8, required_level: &str) -> ApprovalAuthority {
        ApprovalAuthority {
            id: AuthorityId(format!("auth-petty-{level}")),
            app: AppKind::HumanResource,
            request_type: RequestType::PettyCash,
            department: None,
            approval_level: level,
            required_level_id: OrgLevelId(required_level.to_owned()),
            min_amount: None,
            max_amount: None,
            is_required: true,
            can_skip_if_unavailable: false,
            auto_approve_after_days: None,
            created_at: at(0),
            updated_at: at(0),
        }
    }

    fn primary(employee_id: &str, authority_id: &str) -> ApproverAssignment {
        ApproverAssignment {
            id: AssignmentId(format!("asg-{employee_id}")),
            employee_id: employee(employee_id),
            authority_id: AuthorityId(authority_id.to_owned()),
            is_primary: true,
            is_backup: false,
            priority: 0,
            delegate_to: None,
            delegation_start: None,
            delegation_end: None,
            is_active: true,
            created_at: at(0),
            updated_at: at(0),
        }
    }

    fn submission() -> Submission {
        Submission {
            request: RequestRef::new(RequestKind::PettyCash, "PC-0042"),
            app: AppKind::HumanResource,
            request_type: RequestType::PettyCash,
            requestor: Employee {
                id: employee("emp-requestor"),
                full_name: "Rae Requestor".to_owned(),
                department: "Finance".to_owned(),
                manager_id: Some(employee("emp-manager")),
                org_level_id: None,
                active: true,
                created_at: at(0),
                updated_at: at(0),
            },
            title: "Office supplies".to_owned(),
            amount: Some(Decimal::new(25_000, 2)),
            urgency: Urgency::High,
            notes: String::new(),
        }
    }

    fn two_level_setup() -> (Vec<ApprovalAuthority>, Vec<ApproverAssignment>) {
        (
            vec![authority(1, "lvl-supervisor"), authority(2, "lvl-manager")],
            vec![primary("emp-finance-head", "auth-petty-2")],
        )
    }

    fn snapshot(initiated: &InitiatedWorkflow) -> WorkflowSnapshot {
        WorkflowSnapshot {
            workflow: initiated.workflow.clone(),
            steps: initiated.steps.clone(),
            log_head: Some(ledger::head_of(&initiated.log)),
        }
    }

    fn apply(snapshot: &WorkflowSnapshot, transition: &WorkflowTransition) -> WorkflowSnapshot {
        let mut next = snapshot.clone();
        next.workflow = transition.workflow.clone();
        for step in &transition.steps {
            if let Some(slot) = next.steps.iter_mut().find(|existing| existing.id == step.id) {
                *slot = step.clone();
            }
        }
        next.log_head = Some(ledger::head_of(&transition.log));
        next
    }

    fn initiated() -> InitiatedWorkflow {
        let (authorities, assignments) = two_level_setup();
        WorkflowEngine::new()
            .initiate(submission(), &authorities, &assignments, at(9))
            .expect("initiate")
    }

    #[test]
    fn initiate_creates_one_step_per_resolved_level() {
        let initiated = initiated();

        assert_eq!(initiated.workflow.status, WorkflowStatus::Submitted);
        assert_eq!(initiated.workflow.total_approval_levels, 2);
        assert_eq!(initiated.workflow.current_approval_level, 1);
        assert_eq!(initiated.workflow.version, 1);
        assert_eq!(initiated.steps.len(), 2);
        assert_eq!(initiated.steps[0].assigned_to, employee("emp-manager"));
        assert_eq!(initiated.steps[0].status, StepStatus::Pending);
        assert_eq!(initiated.steps[0].activated_at, Some(at(9)));
        assert_eq!(initiated.steps[1].assigned_to, employee("emp-finance-head"));
        assert_eq!(initiated.steps[1].activated_at, None);
        assert_eq!(initiated.log.action, LogAction::Submitted);
        assert_eq!(initiated.log.sequence, 1);
    }

    #[test]
    fn initiate_fails_when_required_authority_is_unresolvable() {
        let authorities = vec![authority(1, "lvl-supervisor"), authority(2, "lvl-manager")];

        let error = WorkflowEngine::new()
            .initiate(submission(), &authorities, &[], at(9))
            .expect_err("level 2 has no approver");
        assert_eq!(
            error,
            WorkflowError::ApproverUnavailable { authority_id: "auth-petty-2".to_owned(), level: 2 }
        );
    }

    #[test]
    fn skippable_authority_without_approver_gets_no_step() {
        let mut skippable = authority(2, "lvl-manager");
        skippable.can_skip_if_unavailable = true;
        let authorities = vec![authority(1, "lvl-supervisor"), skippable];

        let initiated = WorkflowEngine::new()
            .initiate(submission(), &authorities, &[], at(9))
            .expect("initiate");
        assert_eq!(initiated.workflow.total_approval_levels, 2);
        assert_eq!(initiated.steps.len(), 1);
    }

    #[test]
    fn skipped_first_level_starts_at_lowest_resolved_level() {
        let mut skippable = authority(1, "lvl-supervisor");
        skippable.can_skip_if_unavailable = true;
        let mut request = submission();
        request.requestor.manager_id = None;
        let authorities = vec![skippable, authority(2, "lvl-manager")];
        let assignments = vec![primary("emp-finance-head", "auth-petty-2")];

        let initiated = WorkflowEngine::new()
            .initiate(request, &authorities, &assignments, at(9))
            .expect("initiate");
        assert_eq!(initiated.workflow.current_approval_level, 2);
        assert_eq!(initiated.steps[0].activated_at, Some(at(9)));
    }

    #[test]
    fn initiate_fails_when_nothing_resolves() {
        let mut skippable = authority(1, "lvl-supervisor");
        skippable.can_skip_if_unavailable = true;
        let mut request = submission();
        request.requestor.manager_id = None;

        let error = WorkflowEngine::new()
            .initiate(request, &[skippable], &[], at(9))
            .expect_err("nothing resolved");
        assert_eq!(error, WorkflowError::NoApproversResolved { authorities: 1 });
    }

    #[test]
    fn initiate_rejects_blank_title() {
        let (authorities, assignments) = two_level_setup();
        let mut request = submission();
        request.title = "   ".to_owned();

        let error = WorkflowEngine::new()
            .initiate(request, &authorities, &assignments, at(9))
            .expect_err("blank title");
        assert!(matches!(error, WorkflowError::InvalidSubmission(_)));
    }

    #[test]
    fn approve_through_both_levels_completes_workflow() {
        let engine = WorkflowEngine::new();
        let start = snapshot(&initiated());

        let first = engine
            .approve(&start, 1, &employee("emp-manager"), "ok", at(10))
            .expect("approve level 1");
        assert_eq!(first.workflow.status, WorkflowStatus::Pending);
        assert_eq!(first.workflow.current_approval_level, 2);
        assert_eq!(first.workflow.completed_at, None);
        assert_eq!(first.expected_version, 1);
        assert_eq!(first.workflow.version, 2);
        assert_eq!(first.steps.len(), 2);
        assert_eq!(first.steps[0].status, StepStatus::Approved);
        assert_eq!(first.steps[0].approved_by, Some(employee("emp-manager")));
        assert_eq!(first.steps[1].activated_at, Some(at(10)));
        assert_eq!(first.log.previous_status, Some(WorkflowStatus::Submitted));
        assert_eq!(first.log.new_status, WorkflowStatus::Pending);

        let middle = apply(&start, &first);
        let second = engine
            .approve(&middle, 2, &employee("emp-finance-head"), "", at(11))
            .expect("approve level 2");
        assert_eq!(second.workflow.status, WorkflowStatus::Approved);
        assert_eq!(second.workflow.completed_at, Some(at(11)));
        assert_eq!(second.log.sequence, 3);
        assert_eq!(second.log.prev_hash.as_ref(), Some(&first.log.entry_hash));
    }

    #[test]
    fn reject_at_level_one_is_terminal_and_leaves_later_steps_untouched() {
        let engine = WorkflowEngine::new();
        let start = snapshot(&initiated());

        let rejected = engine
            .reject(&start, 1, &employee("emp-manager"), "insufficient budget", at(10))
            .expect("reject");
        assert_eq!(rejected.workflow.status, WorkflowStatus::Rejected);
        assert_eq!(rejected.workflow.completed_at, Some(at(10)));
        assert_eq!(rejected.steps.len(), 1);
        assert_eq!(rejected.log.comments, "insufficient budget");

        let after = apply(&start, &rejected);
        assert_eq!(after.steps[1].status, StepStatus::Pending);

        let blocked = engine.approve(&after, 2, &employee("emp-finance-head"), "", at(11));
        assert!(matches!(blocked, Err(WorkflowError::WorkflowClosed { .. })));
        let blocked = engine.approve(&after, 1, &employee("emp-manager"), "", at(11));
        assert!(matches!(blocked, Err(WorkflowError::WorkflowClosed { .. })));
    }

    #[test]
    fn out_of_order_level_is_a_level_mismatch() {
        let engine = WorkflowEngine::new();
        let start = snapshot(&initiated());

        let error = engine
            .approve(&start, 2, &employee("emp-finance-head"), "", at(10))
            .expect_err("level 2 is not current");
        assert_eq!(
            error,
            WorkflowError::LevelMismatch {
                workflow_id: start.workflow.id.0.clone(),
                requested: 2,
                current: 1,
            }
        );
    }

    #[test]
    fn only_the_assigned_approver_may_decide() {
        let engine = WorkflowEngine::new();
        let start = snapshot(&initiated());

        let error = engine
            .approve(&start, 1, &employee("emp-finance-head"), "", at(10))
            .expect_err("wrong approver");
        assert!(matches!(error, WorkflowError::NotAssignedApprover { level: 1, .. }));
        assert!(engine.can_approve(&start, &employee("emp-manager"), 1));
        assert!(!engine.can_approve(&start, &employee("emp-finance-head"), 1));
        assert!(!engine.can_approve(&start, &employee("emp-finance-head"), 2));
    }

    #[test]
    fn stale_snapshot_cannot_decide_same_step_twice() {
        let engine = WorkflowEngine::new();
        let start = snapshot(&initiated());
        let first = engine.approve(&start, 1, &employee("emp-manager"), "", at(10)).expect("ok");
        let mut after = apply(&start, &first);
        after.workflow.current_approval_level = 1;

        let error = engine
            .approve(&after, 1, &employee("emp-manager"), "", at(11))
            .expect_err("already decided");
        assert!(matches!(error, WorkflowError::StepAlreadyDecided { .. }));
    }

    #[test]
    fn cancel_is_limited_to_the_requestor() {
        let engine = WorkflowEngine::new();
        let start = snapshot(&initiated());

        let error = engine
            .cancel(&start, &employee("emp-manager"), "", at(10))
            .expect_err("not requestor");
        assert!(matches!(error, WorkflowError::NotRequestor { .. }));

        let cancelled = engine
            .cancel(&start, &employee("emp-requestor"), "no longer needed", at(10))
            .expect("cancel");
        assert_eq!(cancelled.workflow.status, WorkflowStatus::Cancelled);
        assert_eq!(cancelled.workflow.completed_at, Some(at(10)));
        assert_eq!(cancelled.log.action, LogAction::Cancelled);
    }

    #[test]
    fn comment_keeps_status_and_rejects_blank_text() {
        let engine = WorkflowEngine::new();
        let start = snapshot(&initiated());

        assert_eq!(
            engine.comment(&start, &employee("emp-manager"), "  ", at(10)),
            Err(WorkflowError::EmptyComment)
        );

        let commented = engine
            .comment(&start, &employee("emp-manager"), "need receipts", at(10))
            .expect("comment");
        assert_eq!(commented.workflow.status, WorkflowStatus::Submitted);
        assert_eq!(commented.log.previous_status, Some(WorkflowStatus::Submitted));
        assert_eq!(commented.log.new_status, WorkflowStatus::Submitted);
        assert!(commented.steps.is_empty());
    }

    #[test]
    fn activation_sets_due_date_from_auto_approve_days() {
        let (mut authorities, assignments) = two_level_setup();
        authorities[0].auto_approve_after_days = Some(3);

        let initiated = WorkflowEngine::new()
            .initiate(submission(), &authorities, &assignments, at(9))
            .expect("initiate");
        assert_eq!(initiated.steps[0].due_at, Some(at(9) + Duration::days(3)));
        assert_eq!(initiated.steps[1].due_at, None);
    }

    #[test]
    fn auto_approve_and_escalate_act_as_system() {
        let engine = WorkflowEngine::new();
        let start = snapshot(&initiated());

        let escalated = engine
            .escalate(&start, 1, &employee("emp-director"), "no decision within 48h", at(10))
            .expect("escalate");
        assert_eq!(escalated.steps[0].assigned_to, employee("emp-director"));
        assert!(escalated.steps[0].is_escalated);
        assert_eq!(escalated.log.actor, Actor::System);
        assert_eq!(escalated.log.action, LogAction::Escalated);

        let auto = engine.auto_approve(&start, 1, "auto-approved", at(10)).expect("auto");
        assert_eq!(auto.steps[0].approved_by, None);
        assert_eq!(auto.log.actor, Actor::System);
        assert_eq!(auto.workflow.current_approval_level, 2);
    }
}
