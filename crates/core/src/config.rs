use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["fleetquote.toml", "config/fleetquote.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub notifications: NotificationConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    /// Admin routes are refused while this is unset.
    pub admin_api_key: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub relay_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub from_address: String,
    /// Base for the accept/decline links placed in emails.
    pub public_base_url: String,
    pub timeout_secs: u64,
}

/// Tuning for the lifecycle controller's optimistic writes.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub max_write_attempts: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

/// Programmatic values that beat env and file.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub admin_api_key: Option<String>,
    pub notifications_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("config file references unset environment variable `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated `${{...}}` expression in config file")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

type ApplyEnv = fn(&mut AppConfig, &str, &str) -> Result<(), ConfigError>;

/// Maps one config key to the environment variables that can set it.
/// When several variables are listed the first one present wins.
pub struct EnvBinding {
    pub key_path: &'static str,
    pub env_keys: &'static [&'static str],
    apply: ApplyEnv,
}

pub const ENV_BINDINGS: &[EnvBinding] = &[
    EnvBinding {
        key_path: "database.url",
        env_keys: &["FLEETQUOTE_DATABASE_URL"],
        apply: |config, _, value| {
            config.database.url = value.to_string();
            Ok(())
        },
    },
    EnvBinding {
        key_path: "database.max_connections",
        env_keys: &["FLEETQUOTE_DATABASE_MAX_CONNECTIONS"],
        apply: |config, key, value| {
            config.database.max_connections = parse_env(key, value)?;
            Ok(())
        },
    },
    EnvBinding {
        key_path: "database.timeout_secs",
        env_keys: &["FLEETQUOTE_DATABASE_TIMEOUT_SECS"],
        apply: |config, key, value| {
            config.database.timeout_secs = parse_env(key, value)?;
            Ok(())
        },
    },
    EnvBinding {
        key_path: "server.bind_address",
        env_keys: &["FLEETQUOTE_SERVER_BIND_ADDRESS"],
        apply: |config, _, value| {
            config.server.bind_address = value.to_string();
            Ok(())
        },
    },
    EnvBinding {
        key_path: "server.port",
        env_keys: &["FLEETQUOTE_SERVER_PORT"],
        apply: |config, key, value| {
            config.server.port = parse_env(key, value)?;
            Ok(())
        },
    },
    EnvBinding {
        key_path: "server.graceful_shutdown_secs",
        env_keys: &["FLEETQUOTE_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        apply: |config, key, value| {
            config.server.graceful_shutdown_secs = parse_env(key, value)?;
            Ok(())
        },
    },
    EnvBinding {
        key_path: "server.admin_api_key",
        env_keys: &["FLEETQUOTE_SERVER_ADMIN_API_KEY"],
        apply: |config, _, value| {
            config.server.admin_api_key = Some(SecretString::from(value.to_string()));
            Ok(())
        },
    },
    EnvBinding {
        key_path: "notifications.enabled",
        env_keys: &["FLEETQUOTE_NOTIFICATIONS_ENABLED"],
        apply: |config, key, value| {
            config.notifications.enabled = parse_env(key, value)?;
            Ok(())
        },
    },
    EnvBinding {
        key_path: "notifications.relay_url",
        env_keys: &["FLEETQUOTE_NOTIFICATIONS_RELAY_URL"],
        apply: |config, _, value| {
            config.notifications.relay_url = Some(value.to_string());
            Ok(())
        },
    },
    EnvBinding {
        key_path: "notifications.api_key",
        env_keys: &["FLEETQUOTE_NOTIFICATIONS_API_KEY"],
        apply: |config, _, value| {
            config.notifications.api_key = Some(SecretString::from(value.to_string()));
            Ok(())
        },
    },
    EnvBinding {
        key_path: "notifications.from_address",
        env_keys: &["FLEETQUOTE_NOTIFICATIONS_FROM_ADDRESS"],
        apply: |config, _, value| {
            config.notifications.from_address = value.to_string();
            Ok(())
        },
    },
    EnvBinding {
        key_path: "notifications.public_base_url",
        env_keys: &["FLEETQUOTE_NOTIFICATIONS_PUBLIC_BASE_URL"],
        apply: |config, _, value| {
            config.notifications.public_base_url = value.to_string();
            Ok(())
        },
    },
    EnvBinding {
        key_path: "notifications.timeout_secs",
        env_keys: &["FLEETQUOTE_NOTIFICATIONS_TIMEOUT_SECS"],
        apply: |config, key, value| {
            config.notifications.timeout_secs = parse_env(key, value)?;
            Ok(())
        },
    },
    EnvBinding {
        key_path: "engine.max_write_attempts",
        env_keys: &["FLEETQUOTE_ENGINE_MAX_WRITE_ATTEMPTS"],
        apply: |config, key, value| {
            config.engine.max_write_attempts = parse_env(key, value)?;
            Ok(())
        },
    },
    EnvBinding {
        key_path: "logging.level",
        env_keys: &["FLEETQUOTE_LOGGING_LEVEL", "FLEETQUOTE_LOG_LEVEL"],
        apply: |config, _, value| {
            config.logging.level = value.to_string();
            Ok(())
        },
    },
    EnvBinding {
        key_path: "logging.format",
        env_keys: &["FLEETQUOTE_LOGGING_FORMAT", "FLEETQUOTE_LOG_FORMAT"],
        apply: |config, _, value| {
            config.logging.format = value.parse()?;
            Ok(())
        },
    },
];

/// Environment variables bound to `key_path`, empty for unknown keys.
pub fn env_keys_for(key_path: &str) -> &'static [&'static str] {
    ENV_BINDINGS
        .iter()
        .find(|binding| binding.key_path == key_path)
        .map(|binding| binding.env_keys)
        .unwrap_or(&[])
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://fleetquote.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                admin_api_key: None,
            },
            notifications: NotificationConfig {
                enabled: false,
                relay_url: None,
                api_key: None,
                from_address: "bookings@fleetquote.local".to_string(),
                public_base_url: "http://localhost:8080".to_string(),
                timeout_secs: 10,
            },
            engine: EngineConfig { max_write_attempts: 3 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl AppConfig {
    /// Layers defaults, the TOML file, `FLEETQUOTE_*` env vars and overrides, then validates.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        match resolve_config_path(options.config_path.as_deref()) {
            Some(path) => config.apply_file(read_file_layer(&path)?),
            None if options.require_file => {
                let expected =
                    options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILES[0]));
                return Err(ConfigError::MissingConfigFile(expected));
            }
            None => {}
        }

        for binding in ENV_BINDINGS {
            let present =
                binding.env_keys.iter().find_map(|key| read_env(key).map(|value| (*key, value)));
            if let Some((key, value)) = present {
                (binding.apply)(&mut config, key, &value)?;
            }
        }

        config.apply_overrides(options.overrides);
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, layer: FileLayer) {
        if let Some(database) = layer.database {
            replace(&mut self.database.url, database.url);
            replace(&mut self.database.max_connections, database.max_connections);
            replace(&mut self.database.timeout_secs, database.timeout_secs);
        }
        if let Some(server) = layer.server {
            replace(&mut self.server.bind_address, server.bind_address);
            replace(&mut self.server.port, server.port);
            replace(&mut self.server.graceful_shutdown_secs, server.graceful_shutdown_secs);
            replace_secret(&mut self.server.admin_api_key, server.admin_api_key);
        }
        if let Some(notifications) = layer.notifications {
            replace(&mut self.notifications.enabled, notifications.enabled);
            if notifications.relay_url.is_some() {
                self.notifications.relay_url = notifications.relay_url;
            }
            replace_secret(&mut self.notifications.api_key, notifications.api_key);
            replace(&mut self.notifications.from_address, notifications.from_address);
            replace(&mut self.notifications.public_base_url, notifications.public_base_url);
            replace(&mut self.notifications.timeout_secs, notifications.timeout_secs);
        }
        if let Some(engine) = layer.engine {
            replace(&mut self.engine.max_write_attempts, engine.max_write_attempts);
        }
        if let Some(logging) = layer.logging {
            replace(&mut self.logging.level, logging.level);
            replace(&mut self.logging.format, logging.format);
        }
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        replace(&mut self.database.url, overrides.database_url);
        replace(&mut self.logging.level, overrides.log_level);
        replace(&mut self.server.port, overrides.server_port);
        replace_secret(&mut self.server.admin_api_key, overrides.admin_api_key);
        replace(&mut self.notifications.enabled, overrides.notifications_enabled);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let database = &self.database;
        let url = database.url.trim();
        require(
            url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:",
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)",
        )?;
        require(database.max_connections > 0, "database.max_connections must be greater than zero")?;
        require(
            (1..=300).contains(&database.timeout_secs),
            "database.timeout_secs must be in range 1..=300",
        )?;

        let server = &self.server;
        require(server.port > 0, "server.port must be greater than zero")?;
        require(
            server.graceful_shutdown_secs > 0,
            "server.graceful_shutdown_secs must be greater than zero",
        )?;
        if let Some(key) = &server.admin_api_key {
            require(
                key.expose_secret().trim().len() >= 16,
                "server.admin_api_key must be at least 16 characters",
            )?;
        }

        let notifications = &self.notifications;
        require(
            is_http_url(notifications.public_base_url.trim()),
            "notifications.public_base_url must start with http:// or https://",
        )?;
        require(
            (1..=120).contains(&notifications.timeout_secs),
            "notifications.timeout_secs must be in range 1..=120",
        )?;
        if notifications.enabled {
            require(
                notifications.relay_url.as_deref().map(str::trim).is_some_and(is_http_url),
                "notifications.enabled is true but notifications.relay_url is missing or not an http(s) URL",
            )?;
            require(
                notifications.from_address.contains('@'),
                "notifications.from_address must be an email address",
            )?;
        }

        require(
            (1..=10).contains(&self.engine.max_write_attempts),
            "engine.max_write_attempts must be in range 1..=10",
        )?;

        require(
            matches!(
                self.logging.level.trim().to_ascii_lowercase().as_str(),
                "trace" | "debug" | "info" | "warn" | "error"
            ),
            "logging.level must be one of trace|debug|info|warn|error",
        )
    }
}

fn replace<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn replace_secret(slot: &mut Option<SecretString>, value: Option<String>) {
    if let Some(value) = value {
        *slot = Some(SecretString::from(value));
    }
}

fn require(condition: bool, message: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Validation(message.to_string()))
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// An explicit path that does not exist resolves to `None`; `require_file` decides if that fails.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    match explicit_path {
        Some(path) => path.exists().then(|| path.to_path_buf()),
        None => DEFAULT_CONFIG_FILES.into_iter().map(PathBuf::from).find(|path| path.exists()),
    }
}

fn read_file_layer(path: &Path) -> Result<FileLayer, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let expanded = expand_env_references(&raw)?;
    toml::from_str(&expanded)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Replaces each `${VAR}` with the value of `VAR`.
fn expand_env_references(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let var = &after[..end];
        let value = env::var(var)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: var.to_string() })?;
        output.push_str(&value);
        rest = &after[end + 1..];
    }
    output.push_str(rest);

    Ok(output)
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileLayer {
    database: Option<DatabaseLayer>,
    server: Option<ServerLayer>,
    notifications: Option<NotificationLayer>,
    engine: Option<EngineLayer>,
    logging: Option<LoggingLayer>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseLayer {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerLayer {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    admin_api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationLayer {
    enabled: Option<bool>,
    relay_url: Option<String>,
    api_key: Option<String>,
    from_address: Option<String>,
    public_base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EngineLayer {
    max_write_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingLayer {
    level: Option<String>,
    format: Option<LogFormat>,
}
