use serde::Serialize;
use signoff_core::config::{AppConfig, LoadOptions};
use signoff_db::{connect_with_settings, migrations, SqlApprovalService};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DATABASE_CHECKS: [&str; 3] =
    ["database_connectivity", "schema_migrations", "approval_configuration"];

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.extend(
                DATABASE_CHECKS
                    .iter()
                    .map(|name| DoctorCheck::skipped(*name, "configuration did not load")),
            );
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Connectivity, schema and authority configuration, in that order. A failed
/// step skips the ones after it.
fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let mut checks = vec![DoctorCheck::fail(
                DATABASE_CHECKS[0],
                format!("failed to initialize async runtime: {error}"),
            )];
            checks.extend(
                DATABASE_CHECKS[1..].iter().map(|name| DoctorCheck::skipped(*name, "no runtime")),
            );
            return checks;
        }
    };

    runtime.block_on(async {
        let mut checks = Vec::with_capacity(DATABASE_CHECKS.len());

        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                checks.push(DoctorCheck::fail(
                    "database_connectivity",
                    format!("failed to connect to database: {error}"),
                ));
                checks.extend(
                    DATABASE_CHECKS[1..]
                        .iter()
                        .map(|name| DoctorCheck::skipped(*name, "the database is unreachable")),
                );
                return checks;
            }
        };
        checks.push(DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        ));

        if let Err(error) = migrations::run_pending(&pool).await {
            checks.push(DoctorCheck::fail("schema_migrations", error.to_string()));
            checks.push(DoctorCheck::skipped("approval_configuration", "the schema is not current"));
            pool.close().await;
            return checks;
        }
        checks.push(DoctorCheck::pass("schema_migrations", "schema is current"));

        let service = SqlApprovalService::sql(pool.clone());
        checks.push(match service.check_configuration().await {
            Ok(issues) if issues.is_empty() => {
                DoctorCheck::pass("approval_configuration", "no authority configuration issues")
            }
            Ok(issues) => DoctorCheck::fail(
                "approval_configuration",
                issues
                    .iter()
                    .map(|issue| {
                        format!(
                            "{}/{}: {}",
                            issue.app.as_str(),
                            issue.request_type.as_str(),
                            issue.detail
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            Err(error) => DoctorCheck::fail("approval_configuration", error.to_string()),
        });

        pool.close().await;
        checks
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_human_marks_each_check() {
        let report = DoctorReport {
            overall_status: CheckStatus::Fail,
            summary: "doctor: one or more readiness checks failed".to_string(),
            checks: vec![
                DoctorCheck::pass("config_validation", "configuration loaded and validated"),
                DoctorCheck::fail("database_connectivity", "refused"),
                DoctorCheck::skipped("schema_migrations", "the database is unreachable"),
            ],
        };

        let rendered = render_human(&report);

        assert!(rendered.contains("- [ok] config_validation"));
        assert!(rendered.contains("- [fail] database_connectivity: refused"));
        assert!(rendered.contains("- [skip] schema_migrations: skipped because the database is unreachable"));
    }
}
