// SprintReader setup toolkit
// Main library entry point

pub mod backup;
pub mod config;
pub mod database;
pub mod launcher;
pub mod preflight;
pub mod scaffold;
pub mod utils;
pub mod vault;

use anyhow::{Context, Result};
use log::{error, info};
use std::path::Path;
use thiserror::Error;

use crate::config::{AppConfig, EnvFileStatus};
use crate::database::connection::{connect_with_retry, RealDbConnector};
use crate::preflight::{has_failures, CheckStatus};
use crate::utils::path_resolver::{resolve_app_root, resolve_log_folder, resolve_storage_path};

/// Failure classes with distinct reporting: precondition failures abort
/// before side effects, dependency failures carry a remediation hint.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("{0}")]
    Precondition(String),
    #[error("{message} (hint: {hint})")]
    Dependency { message: String, hint: String },
}

/// Flag-selected run modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Setup,
    EnvOnly,
    Scaffold,
    Launchers,
    Backup,
    SmokeTest,
    CheckDb,
    Preflight,
}

pub const USAGE: &str = "sprintreader-setup - SprintReader provisioning toolkit

Usage: sprintreader-setup <mode>

Modes:
  --setup        Full provisioning: env file, database, schema, scaffold, launchers
  --env-only     Write the default .env if absent
  --scaffold     Create runtime directories and first-time vault assets
  --launchers    Generate launcher script and OS integration artifacts
  --backup       Archive vault/config/source and dump the database
  --smoke-test   Verify database and vault wiring, failing fast
  --check-db     Quiet database reachability probe (exit status only)
  --preflight    Host environment checks, no side effects
";

/// Map command-line arguments to a run mode. Unrecognized input is None
/// (usage + exit 2 at the caller).
pub fn parse_mode(args: &[String]) -> Option<Mode> {
    let mode = match args.first().map(|s| s.as_str()) {
        Some("--setup") => Mode::Setup,
        Some("--env-only") => Mode::EnvOnly,
        Some("--scaffold") => Mode::Scaffold,
        Some("--launchers") => Mode::Launchers,
        Some("--backup") => Mode::Backup,
        Some("--smoke-test") => Mode::SmokeTest,
        Some("--check-db") => Mode::CheckDb,
        Some("--preflight") => Mode::Preflight,
        _ => return None,
    };
    if args.len() > 1 {
        return None;
    }
    Some(mode)
}

/// Run a mode to completion. Returns the process exit code.
pub fn run(mode: Mode) -> i32 {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return 1;
        }
    };

    match runtime.block_on(run_async(mode)) {
        Ok(()) => 0,
        Err(e) => {
            // `--check-db` is the launcher gate; keep it quiet beyond stderr.
            if mode != Mode::CheckDb {
                error!("[PHASE: main] [STEP: exit] Run failed: {:#}", e);
            }
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

async fn run_async(mode: Mode) -> Result<()> {
    let app_root = resolve_app_root()?;
    let env_path = app_root.join(config::ENV_FILE_NAME);
    let existing_config = if env_path.is_file() {
        Some(config::load_env(&env_path)?)
    } else {
        None
    };

    if mode != Mode::CheckDb {
        let defaults = AppConfig::default();
        let effective = existing_config.as_ref().unwrap_or(&defaults);
        let log_dir = resolve_log_folder(&app_root, &effective.log_path)?;
        let level = if effective.debug {
            log::LevelFilter::Debug
        } else {
            parse_log_level(&effective.log_level)
        };
        init_logging(&log_dir, level, true)?;
        info!(
            "[PHASE: main] [STEP: start] sprintreader-setup starting (mode={:?}, app_root={:?})",
            mode, app_root
        );
    }

    match mode {
        Mode::Setup => run_setup(&app_root, existing_config).await,
        Mode::EnvOnly => run_env_only(&app_root).await,
        Mode::Scaffold => {
            let config = require_config(&app_root, existing_config)?;
            run_scaffold(&app_root, &config).await
        }
        Mode::Launchers => run_launchers(&app_root).await,
        Mode::Backup => {
            let config = require_config(&app_root, existing_config)?;
            run_backup_mode(&app_root, &config).await
        }
        Mode::SmokeTest => {
            let config = require_config(&app_root, existing_config)?;
            run_smoke_test_mode(&app_root, &config).await
        }
        Mode::CheckDb => {
            let config = require_config(&app_root, existing_config)?;
            run_check_db(&config).await
        }
        Mode::Preflight => run_preflight_mode(&app_root, existing_config.as_ref()).await,
    }
}

// ============================================================================
// Mode flows
// ============================================================================

async fn run_setup(app_root: &Path, existing_config: Option<AppConfig>) -> Result<()> {
    println!("SprintReader setup");
    println!("==================");

    // 1. Configuration file, written only when absent.
    let env_path = app_root.join(config::ENV_FILE_NAME);
    let status = config::write_env_if_absent(&env_path, &AppConfig::default()).await?;
    match status {
        EnvFileStatus::Created => println!("-> Configuration: created {:?}", env_path),
        EnvFileStatus::AlreadyExists => {
            println!("-> Configuration: already present, left untouched")
        }
    }
    let config = match (status, existing_config) {
        (EnvFileStatus::AlreadyExists, Some(config)) => config,
        _ => config::load_env(&env_path)?,
    };

    // 2. Host preconditions (no database probe; it is not provisioned yet).
    let checks = preflight::run_preflight(app_root, None).await?;
    for check in &checks {
        if check.status != CheckStatus::Pass {
            println!("-> Preflight: [{}] {}: {}", check.status.as_str(), check.name, check.detail);
        }
    }
    if has_failures(&checks) {
        return Err(SetupError::Dependency {
            message: "Preflight checks failed".to_string(),
            hint: "fix the failing checks above and re-run --setup".to_string(),
        }
        .into());
    }

    // 3. Database role, database, grants, schema, settings.
    let report = database::provisioning::provision(&config).await?;
    println!(
        "-> Database: role {} ({}), database {} ({})",
        config.db_user,
        if report.role_created { "created" } else { "existing" },
        config.db_name,
        if report.database_created { "created" } else { "existing" },
    );
    println!("-> Server: {}", report.server_version);
    println!(
        "-> Settings: {} defaults seeded (superuser: {})",
        report.settings_seeded, report.superuser_role
    );

    // 4. Directories and first-time assets.
    let scaffold_report = scaffold::scaffold(app_root, &config).await?;
    println!(
        "-> Scaffold: {} directories created, sample note {}",
        scaffold_report.created_dirs.len(),
        if scaffold_report.sample_note_written { "written" } else { "already present" },
    );

    // 5. Launcher and OS integration artifacts.
    let launcher_report = launcher::write_launchers(app_root).await?;
    if let Some(wrapper) = &launcher_report.wrapper_path {
        println!("-> Launcher: {:?}", wrapper);
    }
    println!(
        "-> Shell alias: {}",
        if launcher_report.alias_appended { "appended" } else { "already present" }
    );

    println!("Setup complete.");
    Ok(())
}

async fn run_env_only(app_root: &Path) -> Result<()> {
    let env_path = app_root.join(config::ENV_FILE_NAME);
    match config::write_env_if_absent(&env_path, &AppConfig::default()).await? {
        EnvFileStatus::Created => println!("Created {:?}", env_path),
        EnvFileStatus::AlreadyExists => {
            println!("{:?} already exists, left untouched", env_path)
        }
    }
    Ok(())
}

async fn run_scaffold(app_root: &Path, config: &AppConfig) -> Result<()> {
    let report = scaffold::scaffold(app_root, config).await?;
    println!(
        "Scaffold complete: {} directories created, topic sidecar {}, sample note {}",
        report.created_dirs.len(),
        if report.topic_sidecar_written { "written" } else { "already present" },
        if report.sample_note_written { "written" } else { "already present" },
    );
    Ok(())
}

async fn run_launchers(app_root: &Path) -> Result<()> {
    let report = launcher::write_launchers(app_root).await?;
    if let Some(path) = &report.wrapper_path {
        println!("Launcher script: {:?}", path);
    }
    if let Some(path) = &report.desktop_entry_path {
        println!("Desktop entry:   {:?}", path);
    }
    if let Some(path) = &report.unit_path {
        println!("Service unit:    {:?}", path);
    }
    println!(
        "Shell alias:     {}",
        if report.alias_appended { "appended" } else { "already present" }
    );
    Ok(())
}

async fn run_backup_mode(app_root: &Path, config: &AppConfig) -> Result<()> {
    let report = backup::run_backup(app_root, config).await?;
    println!(
        "Backup written: {:?} ({} files, sha256={})",
        report.archive_path, report.files_archived, report.archive_sha256
    );
    match &report.db_dump_path {
        Some(path) => println!("Database dump:  {:?}", path),
        None => println!("Database dump:  skipped (pg_dump not found)"),
    }
    if !report.pruned.is_empty() {
        println!("Pruned {} old archive(s)", report.pruned.len());
    }
    Ok(())
}

async fn run_smoke_test_mode(app_root: &Path, config: &AppConfig) -> Result<()> {
    let vault_dir = resolve_storage_path(app_root, &config.vault_path);
    let report = database::smoke::run_smoke_test(config, &vault_dir).await?;
    for check in &report.passed {
        println!("PASS {} ({})", check.name, check.detail);
    }
    println!("Smoke test passed: {} checks", report.passed.len());
    Ok(())
}

async fn run_check_db(config: &AppConfig) -> Result<()> {
    let url = config.database_url()?;
    connect_with_retry(&RealDbConnector, &url)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e.user_message))
}

async fn run_preflight_mode(app_root: &Path, config: Option<&AppConfig>) -> Result<()> {
    let checks = preflight::run_preflight(app_root, config).await?;
    for check in &checks {
        println!("[{}] {}: {}", check.status.as_str(), check.name, check.detail);
    }
    if has_failures(&checks) {
        return Err(SetupError::Dependency {
            message: "Preflight checks failed".to_string(),
            hint: "fix the failing checks above and re-run".to_string(),
        }
        .into());
    }
    Ok(())
}

// ============================================================================
// Logging and shared helpers
// ============================================================================

fn require_config(app_root: &Path, existing: Option<AppConfig>) -> Result<AppConfig> {
    existing.ok_or_else(|| {
        SetupError::Precondition(format!(
            "Configuration file {:?} is missing; run 'sprintreader-setup --setup' first",
            app_root.join(config::ENV_FILE_NAME)
        ))
        .into()
    })
}

/// Map a LOG_LEVEL string to a level filter. Unknown values fall back to Info.
pub fn parse_log_level(level: &str) -> log::LevelFilter {
    match level.trim().to_ascii_uppercase().as_str() {
        "ERROR" => log::LevelFilter::Error,
        "WARN" | "WARNING" => log::LevelFilter::Warn,
        "DEBUG" => log::LevelFilter::Debug,
        "TRACE" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    }
}

/// Initialize logging with dual format (JSON + human-readable).
fn init_logging(log_dir: &Path, level: log::LevelFilter, with_stdout: bool) -> Result<()> {
    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");

    // JSON log file for structured parsing
    let json_log_file = log_dir.join(format!("setup-{}.log", timestamp));

    // Human-readable log file (.txt)
    let txt_log_file = log_dir.join(format!("setup-{}.txt", timestamp));

    let mut dispatch = fern::Dispatch::new().level(level);

    if with_stdout {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .level(log::LevelFilter::Warn)
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}", txt_line));
                })
                .chain(std::io::stdout()),
        );
    }

    dispatch = dispatch
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_utc = chrono::Utc::now().to_rfc3339();
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let json_line = utils::logging::format_json_log(
                        &timestamp_utc,
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                        None, // details - can be extended later
                    );
                    out.finish(format_args!("{}", json_line));
                })
                .chain(fern::log_file(&json_log_file).context("Failed to open JSON log file")?),
        )
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}", txt_line));
                })
                .chain(fern::log_file(&txt_log_file).context("Failed to open text log file")?),
        );

    dispatch.apply().context("Failed to initialize logging")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_mode_recognizes_every_flag() {
        assert_eq!(parse_mode(&args(&["--setup"])), Some(Mode::Setup));
        assert_eq!(parse_mode(&args(&["--env-only"])), Some(Mode::EnvOnly));
        assert_eq!(parse_mode(&args(&["--scaffold"])), Some(Mode::Scaffold));
        assert_eq!(parse_mode(&args(&["--launchers"])), Some(Mode::Launchers));
        assert_eq!(parse_mode(&args(&["--backup"])), Some(Mode::Backup));
        assert_eq!(parse_mode(&args(&["--smoke-test"])), Some(Mode::SmokeTest));
        assert_eq!(parse_mode(&args(&["--check-db"])), Some(Mode::CheckDb));
        assert_eq!(parse_mode(&args(&["--preflight"])), Some(Mode::Preflight));
    }

    #[test]
    fn parse_mode_rejects_unknown_or_extra_input() {
        assert_eq!(parse_mode(&args(&[])), None);
        assert_eq!(parse_mode(&args(&["--bogus"])), None);
        assert_eq!(parse_mode(&args(&["--setup", "--backup"])), None);
        assert_eq!(parse_mode(&args(&["setup"])), None);
    }

    #[test]
    fn parse_log_level_maps_known_names() {
        assert_eq!(parse_log_level("DEBUG"), log::LevelFilter::Debug);
        assert_eq!(parse_log_level("warn"), log::LevelFilter::Warn);
        assert_eq!(parse_log_level("Warning"), log::LevelFilter::Warn);
        assert_eq!(parse_log_level("ERROR"), log::LevelFilter::Error);
        assert_eq!(parse_log_level("INFO"), log::LevelFilter::Info);
        assert_eq!(parse_log_level("unknown"), log::LevelFilter::Info);
    }

    #[test]
    fn setup_error_dependency_carries_hint() {
        let err = SetupError::Dependency {
            message: "Preflight checks failed".to_string(),
            hint: "fix the failing checks above and re-run".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("Preflight checks failed"));
        assert!(text.contains("hint:"));
    }
}
