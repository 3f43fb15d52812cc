use std::collections::HashMap;

use tokio::sync::RwLock;

use signoff_core::domain::authority::{
    AppKind, ApprovalAuthority, ApproverAssignment, AuthorityId, RequestType,
};
use signoff_core::domain::org::{Employee, EmployeeId, OrganizationalLevel};
use signoff_core::domain::workflow::{
    ApprovalLog, PendingApproval, RequestRef, StepStatus, WorkflowId, WorkflowSnapshot,
};
use signoff_core::ledger;
use signoff_core::workflow::{InitiatedWorkflow, WorkflowTransition};

use super::{
    sort_pending, AuthorityRepository, DirectoryRepository, OpenCursor, RepositoryError,
    WorkflowRepository,
};

#[derive(Default)]
pub struct InMemoryDirectoryRepository {
    employees: RwLock<HashMap<String, Employee>>,
    levels: RwLock<HashMap<String, OrganizationalLevel>>,
}

#[async_trait::async_trait]
impl DirectoryRepository for InMemoryDirectoryRepository {
    async fn find_employee(&self, id: &EmployeeId) -> Result<Option<Employee>, RepositoryError> {
        let employees = self.employees.read().await;
        Ok(employees.get(&id.0).cloned())
    }

    async fn list_employees(&self) -> Result<Vec<Employee>, RepositoryError> {
        let employees = self.employees.read().await;
        let mut listed: Vec<Employee> = employees.values().cloned().collect();
        listed.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(listed)
    }

    async fn list_levels(&self) -> Result<Vec<OrganizationalLevel>, RepositoryError> {
        let levels = self.levels.read().await;
        let mut listed: Vec<OrganizationalLevel> = levels.values().cloned().collect();
        listed.sort_by(|left, right| left.rank.cmp(&right.rank).then_with(|| left.name.cmp(&right.name)));
        Ok(listed)
    }

    async fn save_level(&self, level: OrganizationalLevel) -> Result<(), RepositoryError> {
        let mut levels = self.levels.write().await;
        levels.insert(level.id.0.clone(), level);
        Ok(())
    }

    async fn save_employee(&self, employee: Employee) -> Result<(), RepositoryError> {
        let mut employees = self.employees.write().await;
        employees.insert(employee.id.0.clone(), employee);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAuthorityRepository {
    authorities: RwLock<HashMap<AuthorityId, ApprovalAuthority>>,
    assignments: RwLock<Vec<ApproverAssignment>>,
}

#[async_trait::async_trait]
impl AuthorityRepository for InMemoryAuthorityRepository {
    async fn list_for(
        &self,
        app: AppKind,
        request_type: RequestType,
    ) -> Result<Vec<ApprovalAuthority>, RepositoryError> {
        let authorities = self.authorities.read().await;
        let mut listed: Vec<ApprovalAuthority> = authorities
            .values()
            .filter(|authority| authority.app == app && authority.request_type == request_type)
            .cloned()
            .collect();
        listed.sort_by(|left, right| {
            left.approval_level.cmp(&right.approval_level).then_with(|| left.id.cmp(&right.id))
        });
        Ok(listed)
    }

    async fn list_all(&self) -> Result<Vec<ApprovalAuthority>, RepositoryError> {
        let authorities = self.authorities.read().await;
        let mut listed: Vec<ApprovalAuthority> = authorities.values().cloned().collect();
        listed.sort_by(|left, right| {
            (left.app, left.request_type, left.approval_level, &left.id).cmp(&(
                right.app,
                right.request_type,
                right.approval_level,
                &right.id,
            ))
        });
        Ok(listed)
    }

    async fn save_authority(&self, authority: ApprovalAuthority) -> Result<(), RepositoryError> {
        let mut authorities = self.authorities.write().await;
        authorities.insert(authority.id.clone(), authority);
        Ok(())
    }

    async fn assignments_for(
        &self,
        authority_ids: &[AuthorityId],
    ) -> Result<Vec<ApproverAssignment>, RepositoryError> {
        let assignments = self.assignments.read().await;
        Ok(assignments
            .iter()
            .filter(|assignment| authority_ids.contains(&assignment.authority_id))
            .cloned()
            .collect())
    }

    async fn list_assignments(&self) -> Result<Vec<ApproverAssignment>, RepositoryError> {
        Ok(self.assignments.read().await.clone())
    }

    async fn save_assignment(&self, assignment: ApproverAssignment) -> Result<(), RepositoryError> {
        let mut assignments = self.assignments.write().await;
        if assignments.iter().any(|existing| {
            existing.id != assignment.id
                && existing.employee_id == assignment.employee_id
                && existing.authority_id == assignment.authority_id
        }) {
            return Err(RepositoryError::Conflict(format!(
                "employee `{}` is already assigned to authority `{}`",
                assignment.employee_id.0, assignment.authority_id.0
            )));
        }
        match assignments.iter_mut().find(|existing| existing.id == assignment.id) {
            Some(existing) => *existing = assignment,
            None => assignments.push(assignment),
        }
        Ok(())
    }
}

#[derive(Default)]
struct WorkflowStore {
    snapshots: HashMap<WorkflowId, WorkflowSnapshot>,
    logs: HashMap<WorkflowId, Vec<ApprovalLog>>,
}

/// Single-lock store so each create/apply is atomic like the SQL transaction.
#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    store: RwLock<WorkflowStore>,
}

#[async_trait::async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn create(&self, initiated: &InitiatedWorkflow) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        let workflow = &initiated.workflow;
        if store.snapshots.values().any(|snapshot| snapshot.workflow.request == workflow.request) {
            return Err(RepositoryError::Conflict(format!("{} already has a workflow", workflow.request)));
        }

        let mut steps = initiated.steps.clone();
        steps.sort_by_key(|step| step.approval_level);
        store.snapshots.insert(
            workflow.id.clone(),
            WorkflowSnapshot {
                workflow: workflow.clone(),
                steps,
                log_head: Some(ledger::head_of(&initiated.log)),
            },
        );
        store.logs.insert(workflow.id.clone(), vec![initiated.log.clone()]);
        Ok(())
    }

    async fn apply(&self, transition: &WorkflowTransition) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        let workflow_id = &transition.workflow.id;
        let snapshot = store
            .snapshots
            .get(workflow_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("workflow `{}`", workflow_id.0)))?;

        if snapshot.workflow.version != transition.expected_version {
            return Err(RepositoryError::Conflict(format!(
                "workflow `{}` is no longer at version {}",
                workflow_id.0, transition.expected_version
            )));
        }
        let expected_sequence = snapshot.log_head.as_ref().map_or(1, |head| head.sequence + 1);
        if transition.log.sequence != expected_sequence {
            return Err(RepositoryError::Conflict(format!(
                "log sequence {} of workflow `{}` was already written",
                transition.log.sequence, workflow_id.0
            )));
        }

        let mut updated = snapshot.clone();
        for step in &transition.steps {
            let slot = updated
                .steps
                .iter_mut()
                .find(|existing| existing.id == step.id)
                .ok_or_else(|| RepositoryError::NotFound(format!("approval step `{}`", step.id.0)))?;
            *slot = step.clone();
        }
        updated.workflow = transition.workflow.clone();
        updated.log_head = Some(ledger::head_of(&transition.log));

        store.snapshots.insert(workflow_id.clone(), updated);
        store.logs.entry(workflow_id.clone()).or_default().push(transition.log.clone());
        Ok(())
    }

    async fn find_snapshot(&self, id: &WorkflowId) -> Result<Option<WorkflowSnapshot>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.snapshots.get(id).cloned())
    }

    async fn find_snapshot_by_request(
        &self,
        request: &RequestRef,
    ) -> Result<Option<WorkflowSnapshot>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.snapshots.values().find(|snapshot| snapshot.workflow.request == *request).cloned())
    }

    async fn pending_for(&self, employee: &EmployeeId) -> Result<Vec<PendingApproval>, RepositoryError> {
        let store = self.store.read().await;
        let mut pending: Vec<PendingApproval> = store
            .snapshots
            .values()
            .filter(|snapshot| snapshot.workflow.status.is_open())
            .filter_map(|snapshot| {
                let step = snapshot.current_step()?;
                (step.status == StepStatus::Pending && step.assigned_to == *employee).then(|| {
                    PendingApproval { workflow: snapshot.workflow.clone(), step: step.clone() }
                })
            })
            .collect();
        sort_pending(&mut pending);
        Ok(pending)
    }

    async fn history(&self, id: &WorkflowId) -> Result<Vec<ApprovalLog>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.logs.get(id).cloned().unwrap_or_default())
    }

    async fn list_open(
        &self,
        after: Option<&OpenCursor>,
        limit: u32,
    ) -> Result<Vec<WorkflowSnapshot>, RepositoryError> {
        let store = self.store.read().await;
        let mut open: Vec<WorkflowSnapshot> = store
            .snapshots
            .values()
            .filter(|snapshot| snapshot.workflow.status.is_open())
            .filter(|snapshot| after.map_or(true, |cursor| cursor.precedes(snapshot)))
            .cloned()
            .collect();
        open.sort_by(|left, right| {
            left.workflow
                .created_at
                .cmp(&right.workflow.created_at)
                .then_with(|| left.workflow.id.0.cmp(&right.workflow.id.0))
        });
        open.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(open)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use signoff_core::domain::authority::{
        AppKind, ApprovalAuthority, ApproverAssignment, AssignmentId, AuthorityId, RequestType,
    };
    use signoff_core::domain::org::{Employee, EmployeeId, OrgLevelId};
    use signoff_core::domain::workflow::{RequestKind, RequestRef, Urgency, WorkflowStatus};
    use signoff_core::workflow::{Submission, WorkflowEngine};

    use crate::repositories::{
        AuthorityRepository, InMemoryAuthorityRepository, InMemoryWorkflowRepository,
        RepositoryError, WorkflowRepository,
    };

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).single().expect("valid timestamp")
    }

    fn requestor() -> Employee {
        Employee {
            id: EmployeeId("emp-requestor".to_owned()),
            full_name: "Requestor".to_owned(),
            department: "Finance".to_owned(),
            manager_id: Some(EmployeeId("emp-manager".to_owned())),
            org_level_id: None,
            active: true,
            created_at: at(0),
            updated_at: at(0),
        }
    }

    fn authority() -> ApprovalAuthority {
        ApprovalAuthority {
            id: AuthorityId("auth-1".to_owned()),
            app: AppKind::HumanResource,
            request_type: RequestType::Leave,
            department: None,
            approval_level: 1,
            required_level_id: OrgLevelId("lvl-manager".to_owned()),
            min_amount: None,
            max_amount: None,
            is_required: true,
            can_skip_if_unavailable: false,
            auto_approve_after_days: None,
            created_at: at(0),
            updated_at: at(0),
        }
    }

    fn submission(id: &str) -> Submission {
        Submission {
            request: RequestRef::new(RequestKind::LeaveRequest, id),
            app: AppKind::HumanResource,
            request_type: RequestType::Leave,
            requestor: requestor(),
            title: "Annual leave".to_owned(),
            amount: None,
            urgency: Urgency::Medium,
            notes: String::new(),
        }
    }

    #[tokio::test]
    async fn in_memory_workflow_repo_applies_transitions_under_version_guard() {
        let repo = InMemoryWorkflowRepository::default();
        let engine = WorkflowEngine::new();
        let initiated = engine.initiate(submission("LV-1"), &[authority()], &[], at(9)).expect("initiate");
        repo.create(&initiated).await.expect("create");

        let snapshot = repo.find_snapshot(&initiated.workflow.id).await.expect("load").expect("exists");
        let manager = EmployeeId("emp-manager".to_owned());
        let approved = engine.approve(&snapshot, 1, &manager, "enjoy", at(10)).expect("approve");
        let stale = engine.reject(&snapshot, 1, &manager, "too late", at(10)).expect("reject");

        repo.apply(&approved).await.expect("apply");
        assert!(matches!(repo.apply(&stale).await, Err(RepositoryError::Conflict(_))));

        let reloaded = repo.find_snapshot(&initiated.workflow.id).await.expect("load").expect("exists");
        assert_eq!(reloaded.workflow.status, WorkflowStatus::Approved);
        assert_eq!(repo.history(&initiated.workflow.id).await.expect("history").len(), 2);
        assert!(repo.pending_for(&manager).await.expect("pending").is_empty());
        assert!(repo.list_open(None, 10).await.expect("open").is_empty());
    }

    #[tokio::test]
    async fn in_memory_workflow_repo_rejects_second_workflow_for_record() {
        let repo = InMemoryWorkflowRepository::default();
        let engine = WorkflowEngine::new();
        let first = engine.initiate(submission("LV-1"), &[authority()], &[], at(9)).expect("initiate");
        let second = engine.initiate(submission("LV-1"), &[authority()], &[], at(10)).expect("initiate");

        repo.create(&first).await.expect("create");
        assert!(matches!(repo.create(&second).await, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn in_memory_authority_repo_rejects_duplicate_employee_assignment() {
        let repo = InMemoryAuthorityRepository::default();
        repo.save_authority(authority()).await.expect("save");
        let assignment = |id: &str| ApproverAssignment {
            id: AssignmentId(id.to_owned()),
            employee_id: EmployeeId("emp-manager".to_owned()),
            authority_id: AuthorityId("auth-1".to_owned()),
            is_primary: true,
            is_backup: false,
            priority: 0,
            delegate_to: None,
            delegation_start: None,
            delegation_end: None,
            is_active: true,
            created_at: at(0),
            updated_at: at(0),
        };

        repo.save_assignment(assignment("asg-1")).await.expect("save");
        repo.save_assignment(assignment("asg-1")).await.expect("update in place");
        assert!(matches!(repo.save_assignment(assignment("asg-2")).await, Err(RepositoryError::Conflict(_))));
        assert_eq!(
            repo.assignments_for(&[AuthorityId("auth-1".to_owned())]).await.expect("list").len(),
            1
        );
    }
}
