use fleetquote_core::config::{AppConfig, LoadOptions};
use fleetquote_db::{connect_with_config, migrations};
use serde::Serialize;

use crate::commands::{runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
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
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

/// Exit code 0 unless a check failed; warnings alone do not fail the run.
pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Fail { 7 } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.extend(check_database(&config));
            checks.push(check_notifications(&config));
            checks.push(check_admin_api(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            for name in ["database_connectivity", "schema_migrations", "notifications", "admin_api"] {
                checks.push(DoctorCheck::new(
                    name,
                    CheckStatus::Skipped,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    let overall_status = if checks.iter().any(|check| check.status == CheckStatus::Fail) {
        CheckStatus::Fail
    } else if checks.iter().any(|check| check.status == CheckStatus::Warn) {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    };
    let summary = match overall_status {
        CheckStatus::Pass => "doctor: all readiness checks passed",
        CheckStatus::Warn => "doctor: ready, with warnings",
        _ => "doctor: one or more readiness checks failed",
    }
    .to_string();

    DoctorReport { overall_status, summary, checks }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::new(
                    "database_connectivity",
                    CheckStatus::Fail,
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::new(
                    "schema_migrations",
                    CheckStatus::Skipped,
                    "skipped because the runtime did not start",
                ),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::new(
                        "database_connectivity",
                        CheckStatus::Fail,
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::new(
                        "schema_migrations",
                        CheckStatus::Skipped,
                        "skipped because the database is unreachable",
                    ),
                ];
            }
        };

        let connectivity = DoctorCheck::new(
            "database_connectivity",
            CheckStatus::Pass,
            format!("connected using `{}`", config.database.url),
        );
        let schema = match migrations::pending_versions(&pool).await {
            Ok(pending) if pending.is_empty() => {
                DoctorCheck::new("schema_migrations", CheckStatus::Pass, "schema is up to date")
            }
            Ok(pending) => DoctorCheck::new(
                "schema_migrations",
                CheckStatus::Fail,
                format!(
                    "{} migration(s) pending ({}); run `fleetquote migrate`",
                    pending.len(),
                    pending.iter().map(i64::to_string).collect::<Vec<_>>().join(", ")
                ),
            ),
            Err(error) => DoctorCheck::new(
                "schema_migrations",
                CheckStatus::Fail,
                format!("failed to inspect migrations: {error}"),
            ),
        };
        pool.close().await;
        vec![connectivity, schema]
    })
}

fn check_notifications(config: &AppConfig) -> DoctorCheck {
    let notifications = &config.notifications;
    if !notifications.enabled {
        return DoctorCheck::new(
            "notifications",
            CheckStatus::Warn,
            "disabled; quote emails are dropped by the no-op notifier",
        );
    }
    let relay = notifications.relay_url.as_deref().unwrap_or("<unset>");
    let auth = if notifications.api_key.is_some() { "with api key" } else { "without api key" };
    DoctorCheck::new(
        "notifications",
        CheckStatus::Pass,
        format!("mail relay `{relay}` {auth}, sending as {}", notifications.from_address),
    )
}

fn check_admin_api(config: &AppConfig) -> DoctorCheck {
    if config.server.admin_api_key.is_some() {
        DoctorCheck::new("admin_api", CheckStatus::Pass, "admin api key configured")
    } else {
        DoctorCheck::new(
            "admin_api",
            CheckStatus::Warn,
            "no admin api key; admin routes refuse every request",
        )
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
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
