use std::sync::Arc;

use fleetquote_core::audit::TracingAuditSink;
use fleetquote_core::config::{AppConfig, ConfigError, LoadOptions};
use fleetquote_core::lifecycle::QuoteLifecycleController;
use fleetquote_core::ports::{NoopNotifier, NotificationError, Notifier};
use fleetquote_db::{
    connect_with_config, migrations, DbPool, SqlAccountRepository, SqlQuoteRepository,
};
use thiserror::Error;
use tracing::info;

use crate::notifier::MailRelayNotifier;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub controller: Arc<QuoteLifecycleController>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("notifier setup failed: {0}")]
    Notifier(#[source] NotificationError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let notifier: Arc<dyn Notifier> = if config.notifications.enabled {
        Arc::new(
            MailRelayNotifier::from_config(&config.notifications)
                .map_err(BootstrapError::Notifier)?,
        )
    } else {
        Arc::new(NoopNotifier)
    };
    info!(
        event_name = "system.bootstrap.notifier_ready",
        correlation_id = "bootstrap",
        transport = if config.notifications.enabled { "mail_relay" } else { "noop" },
        "notification transport selected"
    );

    let controller = QuoteLifecycleController::new(
        Arc::new(SqlQuoteRepository::new(db_pool.clone())),
        Arc::new(SqlAccountRepository::new(db_pool.clone())),
        notifier,
    )
    .with_audit_sink(Arc::new(TracingAuditSink))
    .with_max_write_attempts(config.engine.max_write_attempts);

    Ok(Application { config, db_pool, controller: Arc::new(controller) })
}
