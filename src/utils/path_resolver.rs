use anyhow::Result;
use std::path::{Path, PathBuf};

/// Resolve the SprintReader application root (absolute path).
///
/// Precedence:
/// - `SPRINTREADER_HOME` environment variable, when set and non-empty
/// - Walk up from the current directory looking for an existing `.env` or
///   `vaults/` marker (running from nested dirs must not scatter state)
/// - Fallback: current working directory
pub fn resolve_app_root() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("SPRINTREADER_HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    if let Ok(mut dir) = std::env::current_dir() {
        for _ in 0..12 {
            if dir.join(".env").exists() || dir.join("vaults").is_dir() {
                return Ok(dir);
            }

            if let Some(parent) = dir.parent() {
                dir = parent.to_path_buf();
            } else {
                break;
            }
        }
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    Ok(cwd)
}

/// Resolve the log folder under an application root, creating it if needed.
pub fn resolve_log_folder(app_root: &Path, log_path: &str) -> Result<PathBuf> {
    let log_dir = resolve_storage_path(app_root, log_path);
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create log folder: {}", e))?;
    Ok(log_dir)
}

/// Resolve a configured storage path: absolute paths are taken as-is,
/// relative ones are anchored at the application root.
pub fn resolve_storage_path(app_root: &Path, configured: &str) -> PathBuf {
    let p = Path::new(configured);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        app_root.join(p)
    }
}

/// Resolve the per-user configuration root (`~/.config/sprintreader`).
pub fn resolve_user_config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Unable to determine the user configuration directory"))?;
    Ok(base.join("sprintreader"))
}
