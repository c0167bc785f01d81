use std::env;
use std::fs;
use std::path::Path;

use fleetquote_core::config::{env_keys_for, resolve_config_path, AppConfig, LoadOptions};
use secrecy::SecretString;
use toml::Value;

struct Entry {
    key: &'static str,
    value: String,
}

impl Entry {
    fn new(key: &'static str, value: impl Into<String>) -> Self {
        Self { key, value: value.into() }
    }
}

pub fn run(options: LoadOptions) -> String {
    let explicit_path = options.config_path.clone();
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(explicit_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: override > env > file > default):".to_string()];
    for entry in entries(&config) {
        let source = field_source(
            entry.key,
            env_keys_for(entry.key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(entry.key, &entry.value, source));
    }

    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let database = &config.database;
    let server = &config.server;
    let notifications = &config.notifications;

    vec![
        Entry::new("database.url", &database.url),
        Entry::new("database.max_connections", database.max_connections.to_string()),
        Entry::new("database.timeout_secs", database.timeout_secs.to_string()),
        Entry::new("server.bind_address", &server.bind_address),
        Entry::new("server.port", server.port.to_string()),
        Entry::new("server.graceful_shutdown_secs", server.graceful_shutdown_secs.to_string()),
        Entry::new("server.admin_api_key", redact_secret(server.admin_api_key.as_ref())),
        Entry::new("notifications.enabled", notifications.enabled.to_string()),
        Entry::new(
            "notifications.relay_url",
            notifications.relay_url.as_deref().unwrap_or("<unset>"),
        ),
        Entry::new("notifications.api_key", redact_secret(notifications.api_key.as_ref())),
        Entry::new("notifications.from_address", &notifications.from_address),
        Entry::new("notifications.public_base_url", &notifications.public_base_url),
        Entry::new("notifications.timeout_secs", notifications.timeout_secs.to_string()),
        Entry::new("engine.max_write_attempts", config.engine.max_write_attempts.to_string()),
        Entry::new("logging.level", &config.logging.level),
        Entry::new("logging.format", config.logging.format.as_str()),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys
        .iter()
        .find(|key| env::var(key).is_ok_and(|value| !value.trim().is_empty())) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> &'static str {
    match secret {
        Some(_) => "<redacted>",
        None => "<unset>",
    }
}
