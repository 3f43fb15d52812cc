use sqlx::{Row, SqliteConnection};

use signoff_core::domain::authority::{AppKind, AuthorityId, RequestType};
use signoff_core::domain::org::EmployeeId;
use signoff_core::domain::workflow::{
    Actor, ApprovalLog, ApprovalStep, ApprovalWorkflow, LogAction, LogEntryId, LogHead,
    PendingApproval, RequestKind, RequestRef, StepId, StepStatus, Urgency, WorkflowId,
    WorkflowSnapshot, WorkflowStatus,
};
use signoff_core::workflow::{InitiatedWorkflow, WorkflowTransition};

use super::codec::{
    decimal, is_unique_violation, optional_timestamp, parse_decimal, parse_enum, parse_level,
    parse_optional_timestamp, parse_timestamp, parse_u32, timestamp,
};
use super::{sort_pending, OpenCursor, RepositoryError, WorkflowRepository};
use crate::DbPool;

const WORKFLOW_FIELDS: &[&str] = &[
    "id",
    "request_kind",
    "request_id",
    "app",
    "request_type",
    "title",
    "amount",
    "requestor_id",
    "requestor_department",
    "status",
    "current_approval_level",
    "total_approval_levels",
    "urgency",
    "notes",
    "version",
    "submitted_at",
    "completed_at",
    "created_at",
    "updated_at",
];

const STEP_FIELDS: &[&str] = &[
    "id",
    "workflow_id",
    "approval_level",
    "authority_id",
    "assigned_to",
    "status",
    "approved_by",
    "assigned_at",
    "activated_at",
    "auto_approve_after_days",
    "due_at",
    "action_at",
    "comments",
    "is_escalated",
    "escalated_to",
    "escalation_reason",
];

const LOG_COLUMNS: &str = "id, workflow_id, step_id, sequence, action, actor_type, actor_id,
     previous_status, new_status, comments, prev_hash, entry_hash, created_at";

const OPEN_STATUSES: &str = "('submitted', 'pending')";

fn select_list(fields: &[&str], alias: &str, prefix: &str) -> String {
    fields
        .iter()
        .map(|field| format!("{alias}.{field} AS {prefix}{field}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct SqlWorkflowRepository {
    pool: DbPool,
}

impl SqlWorkflowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_snapshot(
        &self,
        workflow: ApprovalWorkflow,
    ) -> Result<WorkflowSnapshot, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM approval_step s WHERE s.workflow_id = ? ORDER BY s.approval_level",
            select_list(STEP_FIELDS, "s", "")
        ))
        .bind(&workflow.id.0)
        .fetch_all(&self.pool)
        .await?;
        let steps = rows.iter().map(|row| row_to_step(row, "")).collect::<Result<Vec<_>, _>>()?;

        let head = sqlx::query(
            "SELECT sequence, entry_hash FROM approval_log
             WHERE workflow_id = ? ORDER BY sequence DESC LIMIT 1",
        )
        .bind(&workflow.id.0)
        .fetch_optional(&self.pool)
        .await?;
        let log_head = head
            .map(|row| -> Result<LogHead, RepositoryError> {
                Ok(LogHead {
                    sequence: parse_u32("approval_log.sequence", row.try_get("sequence")?)?,
                    entry_hash: row.try_get("entry_hash")?,
                })
            })
            .transpose()?;

        Ok(WorkflowSnapshot { workflow, steps, log_head })
    }
}

fn column(prefix: &str, field: &str) -> String {
    format!("{prefix}{field}")
}

fn row_to_workflow(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalWorkflow, RepositoryError> {
    let request_kind: String = row.try_get("request_kind")?;
    let app: String = row.try_get("app")?;
    let request_type: String = row.try_get("request_type")?;
    let status: String = row.try_get("status")?;
    let urgency: String = row.try_get("urgency")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(ApprovalWorkflow {
        id: WorkflowId(row.try_get("id")?),
        request: RequestRef::new(
            parse_enum("approval_workflow.request_kind", &request_kind, RequestKind::parse)?,
            row.try_get::<String, _>("request_id")?,
        ),
        app: parse_enum("approval_workflow.app", &app, AppKind::parse)?,
        request_type: parse_enum("approval_workflow.request_type", &request_type, RequestType::parse)?,
        title: row.try_get("title")?,
        amount: parse_decimal("approval_workflow.amount", row.try_get("amount")?)?,
        requestor_id: EmployeeId(row.try_get("requestor_id")?),
        requestor_department: row.try_get("requestor_department")?,
        status: parse_enum("approval_workflow.status", &status, WorkflowStatus::parse)?,
        current_approval_level: parse_level(
            "approval_workflow.current_approval_level",
            row.try_get("current_approval_level")?,
        )?,
        total_approval_levels: parse_level(
            "approval_workflow.total_approval_levels",
            row.try_get("total_approval_levels")?,
        )?,
        urgency: parse_enum("approval_workflow.urgency", &urgency, Urgency::parse)?,
        notes: row.try_get("notes")?,
        version: parse_u32("approval_workflow.version", row.try_get("version")?)?,
        submitted_at: parse_optional_timestamp(
            "approval_workflow.submitted_at",
            row.try_get("submitted_at")?,
        )?,
        completed_at: parse_optional_timestamp(
            "approval_workflow.completed_at",
            row.try_get("completed_at")?,
        )?,
        created_at: parse_timestamp("approval_workflow.created_at", &created_at)?,
        updated_at: parse_timestamp("approval_workflow.updated_at", &updated_at)?,
    })
}

fn row_to_step(row: &sqlx::sqlite::SqliteRow, prefix: &str) -> Result<ApprovalStep, RepositoryError> {
    let get_text = |field: &str| -> Result<String, RepositoryError> {
        Ok(row.try_get::<String, _>(column(prefix, field).as_str())?)
    };
    let get_optional = |field: &str| -> Result<Option<String>, RepositoryError> {
        Ok(row.try_get::<Option<String>, _>(column(prefix, field).as_str())?)
    };

    let status = get_text("status")?;
    let assigned_at = get_text("assigned_at")?;
    let auto_days: Option<i64> =
        row.try_get(column(prefix, "auto_approve_after_days").as_str())?;

    Ok(ApprovalStep {
        id: StepId(get_text("id")?),
        workflow_id: WorkflowId(get_text("workflow_id")?),
        approval_level: parse_level(
            "approval_step.approval_level",
            row.try_get(column(prefix, "approval_level").as_str())?,
        )?,
        authority_id: AuthorityId(get_text("authority_id")?),
        assigned_to: EmployeeId(get_text("assigned_to")?),
        status: parse_enum("approval_step.status", &status, StepStatus::parse)?,
        approved_by: get_optional("approved_by")?.map(EmployeeId),
        assigned_at: parse_timestamp("approval_step.assigned_at", &assigned_at)?,
        activated_at: parse_optional_timestamp(
            "approval_step.activated_at",
            get_optional("activated_at")?,
        )?,
        auto_approve_after_days: auto_days
            .map(|days| parse_u32("approval_step.auto_approve_after_days", days))
            .transpose()?,
        due_at: parse_optional_timestamp("approval_step.due_at", get_optional("due_at")?)?,
        action_at: parse_optional_timestamp("approval_step.action_at", get_optional("action_at")?)?,
        comments: get_text("comments")?,
        is_escalated: row.try_get(column(prefix, "is_escalated").as_str())?,
        escalated_to: get_optional("escalated_to")?.map(EmployeeId),
        escalation_reason: get_optional("escalation_reason")?,
    })
}

fn row_to_log(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalLog, RepositoryError> {
    let action: String = row.try_get("action")?;
    let actor_type: String = row.try_get("actor_type")?;
    let actor_id: Option<String> = row.try_get("actor_id")?;
    let previous_status: Option<String> = row.try_get("previous_status")?;
    let new_status: String = row.try_get("new_status")?;
    let created_at: String = row.try_get("created_at")?;

    let actor = Actor::from_parts(&actor_type, actor_id).ok_or_else(|| {
        RepositoryError::Decode(format!("approval_log.actor_type: unknown actor `{actor_type}`"))
    })?;

    Ok(ApprovalLog {
        id: LogEntryId(row.try_get("id")?),
        workflow_id: WorkflowId(row.try_get("workflow_id")?),
        step_id: row.try_get::<Option<String>, _>("step_id")?.map(StepId),
        sequence: parse_u32("approval_log.sequence", row.try_get("sequence")?)?,
        action: parse_enum("approval_log.action", &action, LogAction::parse)?,
        actor,
        previous_status: previous_status
            .as_deref()
            .map(|status| parse_enum("approval_log.previous_status", status, WorkflowStatus::parse))
            .transpose()?,
        new_status: parse_enum("approval_log.new_status", &new_status, WorkflowStatus::parse)?,
        comments: row.try_get("comments")?,
        prev_hash: row.try_get("prev_hash")?,
        entry_hash: row.try_get("entry_hash")?,
        created_at: parse_timestamp("approval_log.created_at", &created_at)?,
    })
}

async fn insert_step(conn: &mut SqliteConnection, step: &ApprovalStep) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approval_step (id, workflow_id, approval_level, authority_id, assigned_to,
                                    status, approved_by, assigned_at, activated_at,
                                    auto_approve_after_days, due_at, action_at, comments,
                                    is_escalated, escalated_to, escalation_reason)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&step.id.0)
    .bind(&step.workflow_id.0)
    .bind(i64::from(step.approval_level))
    .bind(&step.authority_id.0)
    .bind(&step.assigned_to.0)
    .bind(step.status.as_str())
    .bind(step.approved_by.as_ref().map(|id| id.0.as_str()))
    .bind(timestamp(&step.assigned_at))
    .bind(optional_timestamp(step.activated_at.as_ref()))
    .bind(step.auto_approve_after_days.map(i64::from))
    .bind(optional_timestamp(step.due_at.as_ref()))
    .bind(optional_timestamp(step.action_at.as_ref()))
    .bind(&step.comments)
    .bind(step.is_escalated)
    .bind(step.escalated_to.as_ref().map(|id| id.0.as_str()))
    .bind(step.escalation_reason.as_deref())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn update_step(conn: &mut SqliteConnection, step: &ApprovalStep) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_step SET
             assigned_to = ?,
             status = ?,
             approved_by = ?,
             activated_at = ?,
             due_at = ?,
             action_at = ?,
             comments = ?,
             is_escalated = ?,
             escalated_to = ?,
             escalation_reason = ?
         WHERE id = ? AND workflow_id = ?",
    )
    .bind(&step.assigned_to.0)
    .bind(step.status.as_str())
    .bind(step.approved_by.as_ref().map(|id| id.0.as_str()))
    .bind(optional_timestamp(step.activated_at.as_ref()))
    .bind(optional_timestamp(step.due_at.as_ref()))
    .bind(optional_timestamp(step.action_at.as_ref()))
    .bind(&step.comments)
    .bind(step.is_escalated)
    .bind(step.escalated_to.as_ref().map(|id| id.0.as_str()))
    .bind(step.escalation_reason.as_deref())
    .bind(&step.id.0)
    .bind(&step.workflow_id.0)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound(format!("approval step `{}`", step.id.0)));
    }
    Ok(())
}

async fn insert_log(conn: &mut SqliteConnection, log: &ApprovalLog) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approval_log (id, workflow_id, step_id, sequence, action, actor_type, actor_id,
                                   previous_status, new_status, comments, prev_hash, entry_hash,
                                   created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&log.id.0)
    .bind(&log.workflow_id.0)
    .bind(log.step_id.as_ref().map(|id| id.0.as_str()))
    .bind(i64::from(log.sequence))
    .bind(log.action.as_str())
    .bind(log.actor.kind())
    .bind(log.actor.employee_id().map(|id| id.0.as_str()))
    .bind(log.previous_status.map(|status| status.as_str()))
    .bind(log.new_status.as_str())
    .bind(&log.comments)
    .bind(log.prev_hash.as_deref())
    .bind(&log.entry_hash)
    .bind(timestamp(&log.created_at))
    .execute(&mut *conn)
    .await
    .map_err(|error| {
        if is_unique_violation(&error) {
            RepositoryError::Conflict(format!(
                "log sequence {} of workflow `{}` was already written",
                log.sequence, log.workflow_id.0
            ))
        } else {
            RepositoryError::Database(error)
        }
    })?;

    Ok(())
}

#[async_trait::async_trait]
impl WorkflowRepository for SqlWorkflowRepository {
    async fn create(&self, initiated: &InitiatedWorkflow) -> Result<(), RepositoryError> {
        let workflow = &initiated.workflow;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approval_workflow (id, request_kind, request_id, app, request_type, title,
                                            amount, requestor_id, requestor_department, status,
                                            current_approval_level, total_approval_levels, urgency,
                                            notes, version, submitted_at, completed_at, created_at,
                                            updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&workflow.id.0)
        .bind(workflow.request.kind.as_str())
        .bind(&workflow.request.id)
        .bind(workflow.app.as_str())
        .bind(workflow.request_type.as_str())
        .bind(&workflow.title)
        .bind(decimal(workflow.amount))
        .bind(&workflow.requestor_id.0)
        .bind(&workflow.requestor_department)
        .bind(workflow.status.as_str())
        .bind(i64::from(workflow.current_approval_level))
        .bind(i64::from(workflow.total_approval_levels))
        .bind(workflow.urgency.as_str())
        .bind(&workflow.notes)
        .bind(i64::from(workflow.version))
        .bind(optional_timestamp(workflow.submitted_at.as_ref()))
        .bind(optional_timestamp(workflow.completed_at.as_ref()))
        .bind(timestamp(&workflow.created_at))
        .bind(timestamp(&workflow.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|error| {
            if is_unique_violation(&error) {
                RepositoryError::Conflict(format!("{} already has a workflow", workflow.request))
            } else {
                RepositoryError::Database(error)
            }
        })?;

        for step in &initiated.steps {
            insert_step(&mut tx, step).await?;
        }
        insert_log(&mut tx, &initiated.log).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn apply(&self, transition: &WorkflowTransition) -> Result<(), RepositoryError> {
        let workflow = &transition.workflow;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE approval_workflow SET
                 status = ?,
                 current_approval_level = ?,
                 version = ?,
                 completed_at = ?,
                 updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(workflow.status.as_str())
        .bind(i64::from(workflow.current_approval_level))
        .bind(i64::from(workflow.version))
        .bind(optional_timestamp(workflow.completed_at.as_ref()))
        .bind(timestamp(&workflow.updated_at))
        .bind(&workflow.id.0)
        .bind(i64::from(transition.expected_version))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "workflow `{}` is no longer at version {}",
                workflow.id.0, transition.expected_version
            )));
        }

        for step in &transition.steps {
            update_step(&mut tx, step).await?;
        }
        insert_log(&mut tx, &transition.log).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_snapshot(&self, id: &WorkflowId) -> Result<Option<WorkflowSnapshot>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM approval_workflow w WHERE w.id = ?",
            select_list(WORKFLOW_FIELDS, "w", "")
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref row) => Ok(Some(self.load_snapshot(row_to_workflow(row)?).await?)),
            None => Ok(None),
        }
    }

    async fn find_snapshot_by_request(
        &self,
        request: &RequestRef,
    ) -> Result<Option<WorkflowSnapshot>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM approval_workflow w WHERE w.request_kind = ? AND w.request_id = ?",
            select_list(WORKFLOW_FIELDS, "w", "")
        ))
        .bind(request.kind.as_str())
        .bind(&request.id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref row) => Ok(Some(self.load_snapshot(row_to_workflow(row)?).await?)),
            None => Ok(None),
        }
    }

    async fn pending_for(&self, employee: &EmployeeId) -> Result<Vec<PendingApproval>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {}, {}
             FROM approval_step s
             JOIN approval_workflow w ON w.id = s.workflow_id
             WHERE s.assigned_to = ?
               AND s.status = 'pending'
               AND s.approval_level = w.current_approval_level
               AND w.status IN {OPEN_STATUSES}",
            select_list(WORKFLOW_FIELDS, "w", ""),
            select_list(STEP_FIELDS, "s", "step_"),
        ))
        .bind(&employee.0)
        .fetch_all(&self.pool)
        .await?;

        let mut pending = rows
            .iter()
            .map(|row| {
                Ok(PendingApproval { workflow: row_to_workflow(row)?, step: row_to_step(row, "step_")? })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        sort_pending(&mut pending);
        Ok(pending)
    }

    async fn history(&self, id: &WorkflowId) -> Result<Vec<ApprovalLog>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {LOG_COLUMNS} FROM approval_log WHERE workflow_id = ? ORDER BY sequence"
        ))
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_log).collect()
    }

    async fn list_open(
        &self,
        after: Option<&OpenCursor>,
        limit: u32,
    ) -> Result<Vec<WorkflowSnapshot>, RepositoryError> {
        let rows = match after {
            Some(cursor) => {
                sqlx::query(&format!(
                    "SELECT {} FROM approval_workflow w
                     WHERE w.status IN {OPEN_STATUSES}
                       AND (w.created_at > ? OR (w.created_at = ? AND w.id > ?))
                     ORDER BY w.created_at, w.id
                     LIMIT ?",
                    select_list(WORKFLOW_FIELDS, "w", "")
                ))
                .bind(timestamp(&cursor.created_at))
                .bind(timestamp(&cursor.created_at))
                .bind(&cursor.workflow_id.0)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM approval_workflow w
                     WHERE w.status IN {OPEN_STATUSES}
                     ORDER BY w.created_at, w.id
                     LIMIT ?",
                    select_list(WORKFLOW_FIELDS, "w", "")
                ))
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };

        let workflows = rows.iter().map(row_to_workflow).collect::<Result<Vec<_>, _>>()?;
        let mut snapshots = Vec::with_capacity(workflows.len());
        for workflow in workflows {
            snapshots.push(self.load_snapshot(workflow).await?);
        }
        Ok(snapshots)
    }
}
