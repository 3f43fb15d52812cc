use sqlx::Executor;

use signoff_core::approvals::{AuthorityQuery, AuthorityRegistry};
use signoff_core::domain::authority::{AppKind, RequestType};

use crate::connection::DbPool;
use crate::repositories::{AuthorityRepository, RepositoryError, SqlAuthorityRepository};

const SEED_LEVEL_IDS: &[&str] = &[
    "lvl-executive",
    "lvl-director",
    "lvl-manager",
    "lvl-assistant-manager",
    "lvl-supervisor",
];

const SEED_EMPLOYEE_IDS: &[&str] = &[
    "emp-director",
    "emp-finance-manager",
    "emp-finance-backup",
    "emp-supervisor",
    "emp-requestor",
];

const SEED_AUTHORITY_IDS: &[&str] = &["auth-hr-pc-1", "auth-hr-pc-2", "auth-hr-leave-1"];

const SEED_ASSIGNMENT_IDS: &[&str] = &[
    "asg-hr-pc-1-supervisor",
    "asg-hr-pc-2-manager",
    "asg-hr-pc-2-backup",
    "asg-hr-leave-1-supervisor",
];

/// Chains that must resolve from the seeded authorities, as (app, request_type, levels).
const SEED_CHAINS: &[(AppKind, RequestType, &[u8])] = &[
    (AppKind::HumanResource, RequestType::PettyCash, &[1, 2]),
    (AppKind::HumanResource, RequestType::Leave, &[1]),
];

/// Reference approval configuration used by `signoff seed` and integration tests.
pub struct ApprovalSeedDataset;

impl ApprovalSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/approval_seed.sql");

    /// Loads the dataset. Existing rows with the same ids are left as they are.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(Self::SQL).await?;
        tx.commit().await?;

        Ok(SeedResult {
            levels: SEED_LEVEL_IDS.len(),
            employees: SEED_EMPLOYEE_IDS.len(),
            authorities: SEED_AUTHORITY_IDS.len(),
            assignments: SEED_ASSIGNMENT_IDS.len(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for (label, table, ids) in [
            ("organizational-levels", "organizational_level", SEED_LEVEL_IDS),
            ("employees", "employee", SEED_EMPLOYEE_IDS),
            ("approval-authorities", "approval_authority", SEED_AUTHORITY_IDS),
            ("approver-assignments", "approver_assignment", SEED_ASSIGNMENT_IDS),
        ] {
            let quoted = sql_array_from_ids(ids);
            let count: i64 =
                sqlx::query_scalar(&format!("SELECT COUNT(1) FROM {table} WHERE id IN {quoted}"))
                    .fetch_one(pool)
                    .await?;
            checks.push((label, usize::try_from(count).is_ok_and(|count| count == ids.len())));
        }

        let requestor_has_manager: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM employee WHERE id = 'emp-requestor' AND manager_id = 'emp-supervisor')",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("requestor-manager", requestor_has_manager == 1));

        let authorities = SqlAuthorityRepository::new(pool.clone());
        for (app, request_type, expected_levels) in SEED_CHAINS {
            let registry = AuthorityRegistry::new(authorities.list_for(*app, *request_type).await?);
            let resolved = registry
                .authorities_for(&AuthorityQuery {
                    app: *app,
                    request_type: *request_type,
                    department: Some("Housing"),
                    amount: None,
                })
                .map(|chain| chain.iter().map(|authority| authority.approval_level).collect::<Vec<_>>())
                .unwrap_or_default();
            checks.push((chain_label(*request_type), resolved == *expected_levels));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

fn chain_label(request_type: RequestType) -> &'static str {
    match request_type {
        RequestType::PettyCash => "humanresource-petty-cash-chain",
        RequestType::Leave => "humanresource-leave-chain",
        _ => "authority-chain",
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedResult {
    pub levels: usize,
    pub employees: usize,
    pub authorities: usize,
    pub assignments: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn sql_fixture_is_valid() {
        assert!(!ApprovalSeedDataset::SQL.is_empty());
        for id in SEED_AUTHORITY_IDS.iter().chain(SEED_ASSIGNMENT_IDS) {
            assert!(ApprovalSeedDataset::SQL.contains(id), "fixture is missing {id}");
        }
    }

    #[tokio::test]
    async fn verify_seed_contract_and_idempotency() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");

        let before = ApprovalSeedDataset::verify(&pool).await.expect("verify empty database");
        assert!(!before.all_present);

        let first = ApprovalSeedDataset::load(&pool).await.expect("load seed fixtures");
        let first_verification = ApprovalSeedDataset::verify(&pool).await.expect("verify");
        assert!(first_verification.all_present, "{:?}", first_verification.checks);
        assert_eq!(first.authorities, 3);

        ApprovalSeedDataset::load(&pool).await.expect("reload seed fixtures");
        let second_verification = ApprovalSeedDataset::verify(&pool).await.expect("re-verify");
        assert!(second_verification.all_present);
        assert_eq!(first_verification.checks, second_verification.checks);
    }
}
