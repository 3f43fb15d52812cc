use sqlx::{QueryBuilder, Row, Sqlite};

use signoff_core::domain::authority::{
    AppKind, ApprovalAuthority, ApproverAssignment, AssignmentId, AuthorityId, RequestType,
};
use signoff_core::domain::org::{EmployeeId, OrgLevelId};

use super::codec::{
    date, decimal, parse_date, parse_decimal, parse_enum, parse_level, parse_timestamp, parse_u32,
    timestamp,
};
use super::{AuthorityRepository, RepositoryError};
use crate::DbPool;

const AUTHORITY_COLUMNS: &str = "id, app, request_type, department, approval_level, required_level_id,
     min_amount, max_amount, is_required, can_skip_if_unavailable, auto_approve_after_days,
     created_at, updated_at";

const ASSIGNMENT_COLUMNS: &str = "id, employee_id, authority_id, is_primary, is_backup, priority,
     delegate_to, delegation_start, delegation_end, is_active, created_at, updated_at";

pub struct SqlAuthorityRepository {
    pool: DbPool,
}

impl SqlAuthorityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_authority(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalAuthority, RepositoryError> {
    let app: String = row.try_get("app")?;
    let request_type: String = row.try_get("request_type")?;
    let auto_approve_after_days: Option<i64> = row.try_get("auto_approve_after_days")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(ApprovalAuthority {
        id: AuthorityId(row.try_get("id")?),
        app: parse_enum("approval_authority.app", &app, AppKind::parse)?,
        request_type: parse_enum(
            "approval_authority.request_type",
            &request_type,
            RequestType::parse,
        )?,
        department: row.try_get("department")?,
        approval_level: parse_level(
            "approval_authority.approval_level",
            row.try_get("approval_level")?,
        )?,
        required_level_id: OrgLevelId(row.try_get("required_level_id")?),
        min_amount: parse_decimal("approval_authority.min_amount", row.try_get("min_amount")?)?,
        max_amount: parse_decimal("approval_authority.max_amount", row.try_get("max_amount")?)?,
        is_required: row.try_get("is_required")?,
        can_skip_if_unavailable: row.try_get("can_skip_if_unavailable")?,
        auto_approve_after_days: auto_approve_after_days
            .map(|days| parse_u32("approval_authority.auto_approve_after_days", days))
            .transpose()?,
        created_at: parse_timestamp("approval_authority.created_at", &created_at)?,
        updated_at: parse_timestamp("approval_authority.updated_at", &updated_at)?,
    })
}

fn row_to_assignment(row: &sqlx::sqlite::SqliteRow) -> Result<ApproverAssignment, RepositoryError> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(ApproverAssignment {
        id: AssignmentId(row.try_get("id")?),
        employee_id: EmployeeId(row.try_get("employee_id")?),
        authority_id: AuthorityId(row.try_get("authority_id")?),
        is_primary: row.try_get("is_primary")?,
        is_backup: row.try_get("is_backup")?,
        priority: row.try_get("priority")?,
        delegate_to: row.try_get::<Option<String>, _>("delegate_to")?.map(EmployeeId),
        delegation_start: parse_date(
            "approver_assignment.delegation_start",
            row.try_get("delegation_start")?,
        )?,
        delegation_end: parse_date("approver_assignment.delegation_end", row.try_get("delegation_end")?)?,
        is_active: row.try_get("is_active")?,
        created_at: parse_timestamp("approver_assignment.created_at", &created_at)?,
        updated_at: parse_timestamp("approver_assignment.updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl AuthorityRepository for SqlAuthorityRepository {
    async fn list_for(
        &self,
        app: AppKind,
        request_type: RequestType,
    ) -> Result<Vec<ApprovalAuthority>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {AUTHORITY_COLUMNS} FROM approval_authority
             WHERE app = ? AND request_type = ?
             ORDER BY approval_level, id"
        ))
        .bind(app.as_str())
        .bind(request_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_authority).collect()
    }

    async fn list_all(&self) -> Result<Vec<ApprovalAuthority>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {AUTHORITY_COLUMNS} FROM approval_authority
             ORDER BY app, request_type, approval_level, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_authority).collect()
    }

    async fn save_authority(&self, authority: ApprovalAuthority) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_authority (id, app, request_type, department, approval_level,
                                             required_level_id, min_amount, max_amount, is_required,
                                             can_skip_if_unavailable, auto_approve_after_days,
                                             created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 app = excluded.app,
                 request_type = excluded.request_type,
                 department = excluded.department,
                 approval_level = excluded.approval_level,
                 required_level_id = excluded.required_level_id,
                 min_amount = excluded.min_amount,
                 max_amount = excluded.max_amount,
                 is_required = excluded.is_required,
                 can_skip_if_unavailable = excluded.can_skip_if_unavailable,
                 auto_approve_after_days = excluded.auto_approve_after_days,
                 updated_at = excluded.updated_at",
        )
        .bind(&authority.id.0)
        .bind(authority.app.as_str())
        .bind(authority.request_type.as_str())
        .bind(authority.department.as_deref())
        .bind(i64::from(authority.approval_level))
        .bind(&authority.required_level_id.0)
        .bind(decimal(authority.min_amount))
        .bind(decimal(authority.max_amount))
        .bind(authority.is_required)
        .bind(authority.can_skip_if_unavailable)
        .bind(authority.auto_approve_after_days.map(i64::from))
        .bind(timestamp(&authority.created_at))
        .bind(timestamp(&authority.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn assignments_for(
        &self,
        authority_ids: &[AuthorityId],
    ) -> Result<Vec<ApproverAssignment>, RepositoryError> {
        if authority_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM approver_assignment WHERE authority_id IN ("
        ));
        let mut separated = builder.separated(", ");
        for id in authority_ids {
            separated.push_bind(id.0.as_str());
        }
        separated.push_unseparated(") ORDER BY authority_id, priority, created_at, id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_assignment).collect()
    }

    async fn list_assignments(&self) -> Result<Vec<ApproverAssignment>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM approver_assignment
             ORDER BY authority_id, priority, created_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_assignment).collect()
    }

    async fn save_assignment(&self, assignment: ApproverAssignment) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approver_assignment (id, employee_id, authority_id, is_primary, is_backup,
                                              priority, delegate_to, delegation_start,
                                              delegation_end, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 is_primary = excluded.is_primary,
                 is_backup = excluded.is_backup,
                 priority = excluded.priority,
                 delegate_to = excluded.delegate_to,
                 delegation_start = excluded.delegation_start,
                 delegation_end = excluded.delegation_end,
                 is_active = excluded.is_active,
                 updated_at = excluded.updated_at",
        )
        .bind(&assignment.id.0)
        .bind(&assignment.employee_id.0)
        .bind(&assignment.authority_id.0)
        .bind(assignment.is_primary)
        .bind(assignment.is_backup)
        .bind(assignment.priority)
        .bind(assignment.delegate_to.as_ref().map(|id| id.0.as_str()))
        .bind(date(assignment.delegation_start))
        .bind(date(assignment.delegation_end))
        .bind(assignment.is_active)
        .bind(timestamp(&assignment.created_at))
        .bind(timestamp(&assignment.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|error| {
            if super::codec::is_unique_violation(&error) {
                RepositoryError::Conflict(format!(
                    "employee `{}` is already assigned to authority `{}`",
                    assignment.employee_id.0, assignment.authority_id.0
                ))
            } else {
                RepositoryError::Database(error)
            }
        })?;

        Ok(())
    }
}
