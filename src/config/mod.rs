// Provisioning configuration
//
// A flat `.env` key/value file is the single configuration surface shared by
// every mode of this tool and by the SprintReader application itself. It is
// written once if absent, loaded once at process start, and never mutated by
// the provisioning code afterwards.

use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::path::Path;
use url::Url;

/// File name of the configuration file, relative to the application root.
pub const ENV_FILE_NAME: &str = ".env";

/// Outcome of the write-if-absent contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvFileStatus {
    Created,
    AlreadyExists,
}

/// Typed view of the `.env` configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,

    pub debug: bool,
    pub log_level: String,

    pub focus_mode_enabled: bool,
    pub notifications_enabled: bool,
    pub analytics_enabled: bool,
    pub auto_save_notes: bool,

    pub vault_path: String,
    pub log_path: String,
    pub backup_path: String,

    pub pomodoro_work_minutes: u32,
    pub pomodoro_break_minutes: u32,
    pub pomodoro_long_break_minutes: u32,
    pub sprint_duration_minutes: u32,
    pub auto_save_interval_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            db_host: "localhost".to_string(),
            db_port: 5432,
            db_name: "sprintreader".to_string(),
            db_user: "sprintreader".to_string(),
            db_password: "sprintreader_dev".to_string(),

            debug: false,
            log_level: "INFO".to_string(),

            focus_mode_enabled: true,
            notifications_enabled: true,
            analytics_enabled: true,
            auto_save_notes: true,

            vault_path: "vaults".to_string(),
            log_path: "logs".to_string(),
            backup_path: "backups".to_string(),

            pomodoro_work_minutes: 25,
            pomodoro_break_minutes: 5,
            pomodoro_long_break_minutes: 15,
            sprint_duration_minutes: 5,
            auto_save_interval_seconds: 30,
        }
    }
}

impl AppConfig {
    /// Connection URL for the application role, derived from the individual
    /// keys so credentials are percent-encoded consistently.
    pub fn database_url(&self) -> Result<String> {
        build_database_url(
            &self.db_host,
            self.db_port,
            &self.db_name,
            &self.db_user,
            &self.db_password,
        )
    }
}

/// Build a `postgresql://` URL from its parts.
pub fn build_database_url(
    host: &str,
    port: u16,
    name: &str,
    user: &str,
    password: &str,
) -> Result<String> {
    let mut url = Url::parse("postgresql://placeholder/").context("Invalid base URL")?;
    url.set_host(Some(host))
        .with_context(|| format!("Invalid database host: '{}'", host))?;
    url.set_port(Some(port))
        .map_err(|_| anyhow::anyhow!("Unable to set database port {}", port))?;
    url.set_username(user)
        .map_err(|_| anyhow::anyhow!("Unable to set database user"))?;
    url.set_password(Some(password))
        .map_err(|_| anyhow::anyhow!("Unable to set database password"))?;
    url.set_path(name);
    Ok(url.to_string())
}

/// Render the full `.env` text for a configuration.
///
/// Key order is fixed so generated files diff cleanly across machines.
pub fn render_env(config: &AppConfig) -> Result<String> {
    let database_url = config.database_url()?;

    let text = format!(
        r#"# SprintReader configuration
# Written by sprintreader-setup on first run; edit values as needed.

# Database
DB_HOST={db_host}
DB_PORT={db_port}
DB_NAME={db_name}
DB_USER={db_user}
DB_PASSWORD={db_password}
DATABASE_URL={database_url}

# Application
DEBUG={debug}
LOG_LEVEL={log_level}

# Features
FOCUS_MODE_ENABLED={focus_mode_enabled}
NOTIFICATIONS_ENABLED={notifications_enabled}
ANALYTICS_ENABLED={analytics_enabled}
AUTO_SAVE_NOTES={auto_save_notes}

# Storage
VAULT_PATH={vault_path}
LOG_PATH={log_path}
BACKUP_PATH={backup_path}

# Timers
POMODORO_WORK_MINUTES={pomodoro_work_minutes}
POMODORO_BREAK_MINUTES={pomodoro_break_minutes}
POMODORO_LONG_BREAK_MINUTES={pomodoro_long_break_minutes}
SPRINT_DURATION_MINUTES={sprint_duration_minutes}
AUTO_SAVE_INTERVAL_SECONDS={auto_save_interval_seconds}
"#,
        db_host = config.db_host,
        db_port = config.db_port,
        db_name = config.db_name,
        db_user = config.db_user,
        db_password = config.db_password,
        database_url = database_url,
        debug = config.debug,
        log_level = config.log_level,
        focus_mode_enabled = config.focus_mode_enabled,
        notifications_enabled = config.notifications_enabled,
        analytics_enabled = config.analytics_enabled,
        auto_save_notes = config.auto_save_notes,
        vault_path = config.vault_path,
        log_path = config.log_path,
        backup_path = config.backup_path,
        pomodoro_work_minutes = config.pomodoro_work_minutes,
        pomodoro_break_minutes = config.pomodoro_break_minutes,
        pomodoro_long_break_minutes = config.pomodoro_long_break_minutes,
        sprint_duration_minutes = config.sprint_duration_minutes,
        auto_save_interval_seconds = config.auto_save_interval_seconds,
    );

    Ok(text)
}

/// Write the default configuration file only when none exists.
///
/// An existing file is left untouched, whatever it contains.
pub async fn write_env_if_absent(path: &Path, config: &AppConfig) -> Result<EnvFileStatus> {
    if path.exists() {
        warn!(
            "[PHASE: env] [STEP: write] Configuration already exists, leaving untouched: {:?}",
            path
        );
        return Ok(EnvFileStatus::AlreadyExists);
    }

    let text = render_env(config)?;
    tokio::fs::write(path, text)
        .await
        .with_context(|| format!("Failed to write configuration file: {:?}", path))?;

    info!(
        "[PHASE: env] [STEP: write] Wrote default configuration: {:?}",
        path
    );
    Ok(EnvFileStatus::Created)
}

/// Load a configuration file into a typed `AppConfig`.
///
/// Missing keys fall back to defaults; malformed numeric values are errors.
pub fn load_env(path: &Path) -> Result<AppConfig> {
    let mut map: HashMap<String, String> = HashMap::new();
    for item in dotenvy::from_path_iter(path)
        .with_context(|| format!("Failed to read configuration file: {:?}", path))?
    {
        let (key, value) =
            item.with_context(|| format!("Malformed line in configuration file: {:?}", path))?;
        map.insert(key, value);
    }

    let defaults = AppConfig::default();

    let get = |key: &str, fallback: &str| -> String {
        map.get(key).cloned().unwrap_or_else(|| fallback.to_string())
    };

    let get_bool = |key: &str, fallback: bool| -> Result<bool> {
        match map.get(key) {
            None => Ok(fallback),
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                other => Err(anyhow::anyhow!(
                    "Invalid boolean for {}: '{}' (expected true/false)",
                    key,
                    other
                )),
            },
        }
    };

    let config = AppConfig {
        db_host: get("DB_HOST", &defaults.db_host),
        db_port: match map.get("DB_PORT") {
            None => defaults.db_port,
            Some(v) => v
                .trim()
                .parse()
                .with_context(|| format!("Invalid DB_PORT: '{}'", v))?,
        },
        db_name: get("DB_NAME", &defaults.db_name),
        db_user: get("DB_USER", &defaults.db_user),
        db_password: get("DB_PASSWORD", &defaults.db_password),

        debug: get_bool("DEBUG", defaults.debug)?,
        log_level: get("LOG_LEVEL", &defaults.log_level),

        focus_mode_enabled: get_bool("FOCUS_MODE_ENABLED", defaults.focus_mode_enabled)?,
        notifications_enabled: get_bool("NOTIFICATIONS_ENABLED", defaults.notifications_enabled)?,
        analytics_enabled: get_bool("ANALYTICS_ENABLED", defaults.analytics_enabled)?,
        auto_save_notes: get_bool("AUTO_SAVE_NOTES", defaults.auto_save_notes)?,

        vault_path: get("VAULT_PATH", &defaults.vault_path),
        log_path: get("LOG_PATH", &defaults.log_path),
        backup_path: get("BACKUP_PATH", &defaults.backup_path),

        pomodoro_work_minutes: parse_u32(&map, "POMODORO_WORK_MINUTES", defaults.pomodoro_work_minutes)?,
        pomodoro_break_minutes: parse_u32(
            &map,
            "POMODORO_BREAK_MINUTES",
            defaults.pomodoro_break_minutes,
        )?,
        pomodoro_long_break_minutes: parse_u32(
            &map,
            "POMODORO_LONG_BREAK_MINUTES",
            defaults.pomodoro_long_break_minutes,
        )?,
        sprint_duration_minutes: parse_u32(
            &map,
            "SPRINT_DURATION_MINUTES",
            defaults.sprint_duration_minutes,
        )?,
        auto_save_interval_seconds: match map.get("AUTO_SAVE_INTERVAL_SECONDS") {
            None => defaults.auto_save_interval_seconds,
            Some(v) => v
                .trim()
                .parse()
                .with_context(|| format!("Invalid AUTO_SAVE_INTERVAL_SECONDS: '{}'", v))?,
        },
    };

    Ok(config)
}

fn parse_u32(map: &HashMap<String, String>, key: &str, fallback: u32) -> Result<u32> {
    match map.get(key) {
        None => Ok(fallback),
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: '{}'", key, v)),
    }
}
