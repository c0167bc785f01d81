use fleetquote_core::config::{AppConfig, LoadOptions};
use fleetquote_db::{connect_with_config, migrations};

use crate::commands::{runtime, CommandResult, FailureClass};

const COMMAND: &str = "migrate";

/// Applies embedded schema migrations and reports how many were pending.
pub fn run(options: LoadOptions) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                FailureClass::ConfigValidation,
                format!("configuration issue: {error}"),
            );
        }
    };
    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                FailureClass::RuntimeInit,
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    match runtime.block_on(apply(&config)) {
        Ok(0) => CommandResult::success(COMMAND, "schema already up to date"),
        Ok(applied) => {
            CommandResult::success(COMMAND, format!("applied {applied} pending migration(s)"))
        }
        Err((class, message)) => CommandResult::failure(COMMAND, class, message),
    }
}

async fn apply(config: &AppConfig) -> Result<usize, (FailureClass, String)> {
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| (FailureClass::DbConnectivity, error.to_string()))?;
    let pending = migrations::pending_versions(&pool)
        .await
        .map_err(|error| (FailureClass::DbConnectivity, error.to_string()))?;
    let applied = migrations::run_pending(&pool)
        .await
        .map(|()| pending.len())
        .map_err(|error| (FailureClass::Migration, error.to_string()));
    pool.close().await;
    applied
}
