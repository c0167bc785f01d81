pub mod config;
pub mod doctor;
pub mod estimate;
pub mod migrate;

use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Runtime;

/// Exit code plus the rendered stdout of one CLI command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

/// Why a command failed. Each class owns a stable exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    ConfigValidation,
    Validation,
    RuntimeInit,
    DbConnectivity,
    Migration,
}

impl FailureClass {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::ConfigValidation | Self::Validation => 2,
            Self::RuntimeInit => 3,
            Self::DbConnectivity => 4,
            Self::Migration => 5,
        }
    }
}

#[derive(Debug, Serialize)]
struct CommandOutcome<'a> {
    command: &'a str,
    status: &'static str,
    error_class: Option<FailureClass>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let outcome =
            CommandOutcome { command, status: "ok", error_class: None, message: message.into(), data };
        Self { exit_code: 0, output: render(&outcome) }
    }

    pub fn failure(command: &str, class: FailureClass, message: impl Into<String>) -> Self {
        let outcome = CommandOutcome {
            command,
            status: "error",
            error_class: Some(class),
            message: message.into(),
            data: None,
        };
        Self { exit_code: class.exit_code(), output: render(&outcome) }
    }
}

/// Single-threaded runtime for commands that touch the database.
pub(crate) fn runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

fn render(outcome: &CommandOutcome<'_>) -> String {
    serde_json::to_string(outcome).unwrap_or_else(|error| {
        serde_json::json!({
            "command": outcome.command,
            "status": "error",
            "error_class": "serialization",
            "message": error.to_string(),
        })
        .to_string()
    })
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::{CommandResult, FailureClass};

    #[test]
    fn failure_carries_class_and_exit_code() {
        let result = CommandResult::failure("migrate", FailureClass::DbConnectivity, "unable to open");
        assert_eq!(result.exit_code, 4);

        let payload: Value = serde_json::from_str(&result.output).expect("json");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "db_connectivity");
        assert!(payload.get("data").is_none());
    }

    #[test]
    fn success_omits_error_class_value() {
        let result = CommandResult::success("migrate", "schema already up to date");
        assert_eq!(result.exit_code, 0);

        let payload: Value = serde_json::from_str(&result.output).expect("json");
        assert_eq!(payload["error_class"], Value::Null);
        assert_eq!(payload["message"], "schema already up to date");
    }
}
