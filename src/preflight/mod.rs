// Preflight checks
//
// Non-mutating host/environment checks reported as Pass/Warn/Fail rows.
// `--preflight` prints the full table; `--setup` treats Fail rows from the
// subset it runs as hard preconditions.

use anyhow::{Context, Result};
use log::warn;
use std::path::Path;
use tokio::time::Duration;

use crate::config::AppConfig;
use crate::database::connection::{connect_with_retry, RealDbConnector};
use crate::utils::process::run_cmd_with_timeout;

/// Minimum free space at the application root.
const MIN_FREE_BYTES: u64 = 1_000_000_000; // 1 GB

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "Pass",
            CheckStatus::Warn => "Warn",
            CheckStatus::Fail => "Fail",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreflightCheck {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

pub fn has_failures(checks: &[PreflightCheck]) -> bool {
    checks.iter().any(|c| c.status == CheckStatus::Fail)
}

/// Run the host checks. `config` is None when no configuration file exists
/// yet; database reachability is only probed when one is present.
pub async fn run_preflight(
    app_root: &Path,
    config: Option<&AppConfig>,
) -> Result<Vec<PreflightCheck>> {
    let mut checks: Vec<PreflightCheck> = Vec::new();

    // Operating system.
    let os_desc = format!("{} {}", std::env::consts::OS, std::env::consts::ARCH);
    checks.push(PreflightCheck {
        name: "Operating System".to_string(),
        status: if cfg!(target_os = "linux") {
            CheckStatus::Pass
        } else {
            CheckStatus::Warn
        },
        detail: format!("Running on {}", os_desc),
    });

    // Free disk space at the application root.
    match get_free_space_bytes(app_root).await {
        Ok(bytes) => {
            let ok = bytes >= MIN_FREE_BYTES;
            checks.push(PreflightCheck {
                name: "Disk Space".to_string(),
                status: if ok { CheckStatus::Pass } else { CheckStatus::Fail },
                detail: format!(
                    "Free space: {} MB (minimum: {} MB)",
                    bytes / 1_000_000,
                    MIN_FREE_BYTES / 1_000_000
                ),
            });
        }
        Err(e) => {
            warn!("[PHASE: preflight] [STEP: disk] Disk space check error: {}", e);
            checks.push(PreflightCheck {
                name: "Disk Space".to_string(),
                status: CheckStatus::Warn,
                detail: "Unable to determine free disk space. Please check logs.".to_string(),
            });
        }
    }

    // Postgres client tools (used for backups and manual inspection).
    for tool in ["psql", "pg_dump"] {
        let found = which::which(tool).is_ok();
        checks.push(PreflightCheck {
            name: format!("{} on PATH", tool),
            status: if found { CheckStatus::Pass } else { CheckStatus::Warn },
            detail: if found {
                format!("{} detected", tool)
            } else {
                format!("{} not found (install postgresql client tools if needed)", tool)
            },
        });
    }

    // Configuration file.
    let env_path = app_root.join(crate::config::ENV_FILE_NAME);
    checks.push(PreflightCheck {
        name: "Configuration".to_string(),
        status: if env_path.is_file() {
            CheckStatus::Pass
        } else {
            CheckStatus::Warn
        },
        detail: if env_path.is_file() {
            format!("{:?} present", env_path)
        } else {
            format!("{:?} missing (run --setup to create it)", env_path)
        },
    });

    // Database reachability, only probed with a configuration in hand.
    if let Some(config) = config {
        let url = config.database_url()?;
        match connect_with_retry(&RealDbConnector, &url).await {
            Ok(()) => checks.push(PreflightCheck {
                name: "Database".to_string(),
                status: CheckStatus::Pass,
                detail: format!("Reachable at {}:{}", config.db_host, config.db_port),
            }),
            Err(e) => {
                warn!(
                    "[PHASE: preflight] [STEP: database] Reachability probe failed: {}",
                    e.internal_details
                );
                checks.push(PreflightCheck {
                    name: "Database".to_string(),
                    status: CheckStatus::Fail,
                    detail: e.user_message,
                });
            }
        }
    }

    Ok(checks)
}

/// Best-effort free-space check (`df -Pk`, POSIX output, Available column).
pub async fn get_free_space_bytes(path: &Path) -> Result<u64> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid path"))?
        .to_string();

    let out = run_cmd_with_timeout(
        "df",
        &["-Pk".to_string(), path_str],
        Duration::from_secs(10),
        "free_space_df",
    )
    .await?;

    if out.exit_code != Some(0) {
        anyhow::bail!("Failed to query free space (exit_code={:?})", out.exit_code);
    }

    parse_df_available_kb(&out.stdout).map(|kb| kb.saturating_mul(1024))
}

/// Parse the Available column (KB) from POSIX `df -Pk` output.
fn parse_df_available_kb(stdout: &str) -> Result<u64> {
    // Expect:
    // Filesystem 1024-blocks Used Available Capacity Mounted on
    // ...
    let mut lines = stdout.lines();
    let _header = lines.next();
    let data = lines
        .next()
        .ok_or_else(|| anyhow::anyhow!("df output missing data row"))?;
    let cols: Vec<&str> = data.split_whitespace().collect();
    if cols.len() < 4 {
        anyhow::bail!("df output parse error");
    }
    cols[3]
        .parse()
        .with_context(|| format!("Unable to parse df available KB '{}'", cols[3]))
}
