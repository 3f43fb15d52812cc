use sqlx::Row;

use signoff_core::domain::org::{Employee, EmployeeId, OrgLevelId, OrganizationalLevel};

use super::codec::{parse_level, parse_timestamp, timestamp};
use super::{DirectoryRepository, RepositoryError};
use crate::DbPool;

const EMPLOYEE_COLUMNS: &str =
    "id, full_name, department, manager_id, org_level_id, active, created_at, updated_at";

pub struct SqlDirectoryRepository {
    pool: DbPool,
}

impl SqlDirectoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_employee(row: &sqlx::sqlite::SqliteRow) -> Result<Employee, RepositoryError> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Employee {
        id: EmployeeId(row.try_get("id")?),
        full_name: row.try_get("full_name")?,
        department: row.try_get("department")?,
        manager_id: row.try_get::<Option<String>, _>("manager_id")?.map(EmployeeId),
        org_level_id: row.try_get::<Option<String>, _>("org_level_id")?.map(OrgLevelId),
        active: row.try_get("active")?,
        created_at: parse_timestamp("employee.created_at", &created_at)?,
        updated_at: parse_timestamp("employee.updated_at", &updated_at)?,
    })
}

fn row_to_level(row: &sqlx::sqlite::SqliteRow) -> Result<OrganizationalLevel, RepositoryError> {
    Ok(OrganizationalLevel {
        id: OrgLevelId(row.try_get("id")?),
        name: row.try_get("name")?,
        rank: parse_level("organizational_level.rank", row.try_get("rank")?)?,
        description: row.try_get("description")?,
    })
}

#[async_trait::async_trait]
impl DirectoryRepository for SqlDirectoryRepository {
    async fn find_employee(&self, id: &EmployeeId) -> Result<Option<Employee>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {EMPLOYEE_COLUMNS} FROM employee WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_employee).transpose()
    }

    async fn list_employees(&self) -> Result<Vec<Employee>, RepositoryError> {
        let rows = sqlx::query(&format!("SELECT {EMPLOYEE_COLUMNS} FROM employee ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_employee).collect()
    }

    async fn list_levels(&self) -> Result<Vec<OrganizationalLevel>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, rank, description FROM organizational_level ORDER BY rank, name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_level).collect()
    }

    async fn save_level(&self, level: OrganizationalLevel) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO organizational_level (id, name, rank, description)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 rank = excluded.rank,
                 description = excluded.description",
        )
        .bind(&level.id.0)
        .bind(&level.name)
        .bind(i64::from(level.rank))
        .bind(&level.description)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_employee(&self, employee: Employee) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO employee (id, full_name, department, manager_id, org_level_id, active,
                                   created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 full_name = excluded.full_name,
                 department = excluded.department,
                 manager_id = excluded.manager_id,
                 org_level_id = excluded.org_level_id,
                 active = excluded.active,
                 updated_at = excluded.updated_at",
        )
        .bind(&employee.id.0)
        .bind(&employee.full_name)
        .bind(&employee.department)
        .bind(employee.manager_id.as_ref().map(|id| id.0.as_str()))
        .bind(employee.org_level_id.as_ref().map(|id| id.0.as_str()))
        .bind(employee.active)
        .bind(timestamp(&employee.created_at))
        .bind(timestamp(&employee.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
