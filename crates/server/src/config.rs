use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub log_filter: String,
    pub max_body_bytes: usize,
    pub busy_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3000".into(),
            database_url: "sqlite://./data/stages.db".into(),
            log_filter: "info".into(),
            max_body_bytes: 64 * 1024,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Optional overrides read from `server.toml`.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    database_url: Option<String>,
    log_filter: Option<String>,
    max_body_bytes: Option<usize>,
    busy_timeout_ms: Option<u64>,
}

/// Loads settings and, if `server.toml` exists but can't be parsed, the
/// parse error so the caller can log it once tracing is up.
pub fn load_settings() -> (Settings, Option<String>) {
    load_settings_from(Path::new("server.toml"), |key| std::env::var(key).ok())
}

/// Defaults, then the config file, then environment variables; later layers win.
/// A malformed config file is skipped and its error returned alongside.
pub fn load_settings_from(
    config_path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> (Settings, Option<String>) {
    let mut settings = Settings::default();
    let mut file_error = None;

    if let Ok(raw) = fs::read_to_string(config_path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => {
                if let Some(v) = file_cfg.bind_addr {
                    settings.server_bind = v;
                }
                if let Some(v) = file_cfg.database_url {
                    settings.database_url = v;
                }
                if let Some(v) = file_cfg.log_filter {
                    settings.log_filter = v;
                }
                if let Some(v) = file_cfg.max_body_bytes {
                    settings.max_body_bytes = v;
                }
                if let Some(v) = file_cfg.busy_timeout_ms {
                    settings.busy_timeout_ms = v;
                }
            }
            Err(error) => {
                file_error = Some(format!("{}: {error}", config_path.display()));
            }
        }
    }

    if let Some(v) = env("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = env("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = env("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = env("APP__LOG_FILTER") {
        settings.log_filter = v;
    }

    if let Some(parsed) = env("APP__MAX_BODY_BYTES").and_then(|v| v.parse::<usize>().ok()) {
        settings.max_body_bytes = parsed;
    }
    if let Some(parsed) = env("APP__BUSY_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
        settings.busy_timeout_ms = parsed;
    }

    (settings, file_error)
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite://") {
        let path = path.replace('\\', "/");
        if has_windows_drive(&path) {
            return format!("sqlite:{path}");
        }
        return format!("sqlite://{path}");
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        if has_windows_drive(&path) {
            return format!("sqlite:{path}");
        }
        return format!("sqlite://{path}");
    }

    if raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    let path = raw_database_url.replace('\\', "/");
    if has_windows_drive(&path) {
        return format!("sqlite:{path}");
    }
    format!("sqlite://{path}")
}

fn has_windows_drive(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
