// Launcher and OS-integration artifact generation
//
// All artifact texts come from pure functions so they are testable on any
// OS; writing happens separately. The contract of every artifact is the
// same: invoke the launcher with the correct working directory.
//
// Paths are quoted to handle spaces correctly (systemd supports quoted
// arguments).

use anyhow::{Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Service/desktop-entry base name.
pub const SERVICE_NAME: &str = "sprintreader";

/// Launcher wrapper file name inside the application root.
pub const WRAPPER_NAME: &str = "sprintreader.sh";

const ALIAS_MARKER: &str = "# sprintreader launcher alias";

/// Command that starts the SprintReader application itself.
///
/// Overridable with SPRINTREADER_APP_COMMAND; the application binary is a
/// collaborator of this tool, not part of it.
pub fn app_command() -> String {
    std::env::var("SPRINTREADER_APP_COMMAND")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "./sprintreader-app".to_string())
}

#[derive(Debug, Clone, Default)]
pub struct LauncherReport {
    pub wrapper_path: Option<PathBuf>,
    pub desktop_entry_path: Option<PathBuf>,
    pub unit_path: Option<PathBuf>,
    pub alias_appended: bool,
}

// ============================================================================
// Artifact text generation (pure functions, testable on all platforms)
// ============================================================================

/// Build the launcher wrapper script.
///
/// The wrapper resolves the application root, ensures the log directory,
/// gates on a database-reachability check, then runs the application inside
/// a guarded region: interactive interrupt exits cleanly, any other failure
/// prints a user-facing message and logs it before exiting non-zero.
pub fn build_launcher_script_text(app_root: &Path, setup_bin: &str, app_cmd: &str) -> String {
    let root = app_root.to_string_lossy();
    format!(
        r#"#!/usr/bin/env bash
# SprintReader launcher (generated by sprintreader-setup)
set -u

APP_ROOT="{root}"
LOG_DIR="$APP_ROOT/logs"

cd "$APP_ROOT" || exit 1
mkdir -p "$LOG_DIR"

log() {{
    echo "[$(date '+%Y-%m-%d %H:%M:%S')] $*" >> "$LOG_DIR/launcher.log"
}}

trap 'echo "SprintReader interrupted."; log "interrupted by user"; exit 130' INT

if ! {setup_bin} --check-db; then
    echo "SprintReader: database is not reachable. Run '{setup_bin} --setup' first."
    log "preflight failed: database unreachable"
    exit 1
fi

log "launching: {app_cmd}"
{app_cmd} "$@" 2>> "$LOG_DIR/launcher.log"
status=$?
if [ $status -ne 0 ]; then
    echo "SprintReader exited with an error (status $status). See $LOG_DIR/launcher.log"
    log "exited with status $status"
    exit $status
fi
log "exited normally"
"#,
        root = root,
        setup_bin = setup_bin,
        app_cmd = app_cmd,
    )
}

/// Build a desktop entry invoking the wrapper.
pub fn build_desktop_entry_text(wrapper_path: &Path, app_root: &Path) -> String {
    format!(
        r#"[Desktop Entry]
Type=Application
Name=SprintReader
Comment=PDF reading with sprint timers and notes
Exec={exec}
Path={path}
Terminal=false
Categories=Office;Viewer;
"#,
        exec = wrapper_path.to_string_lossy(),
        path = app_root.to_string_lossy(),
    )
}

/// Build a user-level systemd unit file text for the launcher.
pub fn build_systemd_unit_text(service_name: &str, exec_path: &Path, working_dir: &Path) -> String {
    let exec_str = exec_path.to_string_lossy();
    let work_str = working_dir.to_string_lossy();

    let exec_quoted = quote_systemd_path(&exec_str);
    let work_quoted = quote_systemd_path(&work_str);

    format!(
        r#"[Unit]
Description=SprintReader ({service_name})
After=network.target

[Service]
Type=simple
WorkingDirectory={work_quoted}
ExecStart={exec_quoted}
Restart=on-failure
RestartSec=5

[Install]
WantedBy=default.target
"#,
        service_name = service_name,
        work_quoted = work_quoted,
        exec_quoted = exec_quoted,
    )
}

/// Quote a path for systemd unit files if it contains spaces or special characters.
/// Returns the path unquoted if no spaces, or quoted with double-quotes if spaces present.
fn quote_systemd_path(path: &str) -> String {
    if path.contains(' ') || path.contains('\t') || path.contains('"') {
        // Escape internal double quotes and wrap in double quotes
        format!("\"{}\"", path.replace('"', "\\\""))
    } else {
        path.to_string()
    }
}

/// Shell alias line for the launcher.
pub fn build_alias_line(wrapper_path: &Path) -> String {
    format!(
        "{}\nalias sprintreader='{}'\n",
        ALIAS_MARKER,
        wrapper_path.to_string_lossy()
    )
}

// ============================================================================
// Artifact writing
// ============================================================================

/// Write all launcher artifacts using the real per-user locations.
pub async fn write_launchers(app_root: &Path) -> Result<LauncherReport> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?;
    let applications_dir = home.join(".local/share/applications");
    let systemd_dir = home.join(".config/systemd/user");
    let bashrc = home.join(".bashrc");

    write_launchers_into(app_root, &applications_dir, &systemd_dir, &bashrc).await
}

/// Write all launcher artifacts into explicit destinations (testable).
pub async fn write_launchers_into(
    app_root: &Path,
    applications_dir: &Path,
    systemd_dir: &Path,
    bashrc: &Path,
) -> Result<LauncherReport> {
    let mut report = LauncherReport::default();
    let wrapper_path = app_root.join(WRAPPER_NAME);

    // Wrapper script, executable.
    let script = build_launcher_script_text(app_root, "sprintreader-setup", &app_command());
    tokio::fs::write(&wrapper_path, script)
        .await
        .with_context(|| format!("Failed to write launcher script: {:?}", wrapper_path))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&wrapper_path, std::fs::Permissions::from_mode(0o755))
            .await
            .with_context(|| format!("Failed to mark launcher executable: {:?}", wrapper_path))?;
    }
    info!(
        "[PHASE: launchers] [STEP: wrapper] Wrote launcher script: {:?}",
        wrapper_path
    );

    // Desktop entry.
    tokio::fs::create_dir_all(applications_dir)
        .await
        .with_context(|| format!("Failed to create {:?}", applications_dir))?;
    let desktop_path = applications_dir.join(format!("{}.desktop", SERVICE_NAME));
    tokio::fs::write(&desktop_path, build_desktop_entry_text(&wrapper_path, app_root))
        .await
        .with_context(|| format!("Failed to write desktop entry: {:?}", desktop_path))?;
    info!(
        "[PHASE: launchers] [STEP: desktop] Wrote desktop entry: {:?}",
        desktop_path
    );

    // User-level systemd unit.
    tokio::fs::create_dir_all(systemd_dir)
        .await
        .with_context(|| format!("Failed to create {:?}", systemd_dir))?;
    let unit_path = systemd_dir.join(format!("{}.service", SERVICE_NAME));
    tokio::fs::write(
        &unit_path,
        build_systemd_unit_text(SERVICE_NAME, &wrapper_path, app_root),
    )
    .await
    .with_context(|| format!("Failed to write systemd unit: {:?}", unit_path))?;
    info!(
        "[PHASE: launchers] [STEP: unit] Wrote user service unit: {:?}",
        unit_path
    );

    // Shell alias, appended once.
    report.alias_appended = append_alias_if_absent(bashrc, &wrapper_path).await?;

    report.wrapper_path = Some(wrapper_path);
    report.desktop_entry_path = Some(desktop_path);
    report.unit_path = Some(unit_path);
    Ok(report)
}

/// Append the launcher alias to a shell profile unless its marker is already
/// present. Returns true when the alias was appended.
pub async fn append_alias_if_absent(bashrc: &Path, wrapper_path: &Path) -> Result<bool> {
    let existing = match tokio::fs::read_to_string(bashrc).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read shell profile: {:?}", bashrc))
        }
    };

    if existing.contains(ALIAS_MARKER) {
        warn!(
            "[PHASE: launchers] [STEP: alias] Alias already present, leaving untouched: {:?}",
            bashrc
        );
        return Ok(false);
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&build_alias_line(wrapper_path));

    tokio::fs::write(bashrc, updated)
        .await
        .with_context(|| format!("Failed to update shell profile: {:?}", bashrc))?;
    info!(
        "[PHASE: launchers] [STEP: alias] Appended launcher alias to {:?}",
        bashrc
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launcher_script_gates_on_check_db() {
        let script =
            build_launcher_script_text(Path::new("/opt/sprintreader"), "sprintreader-setup", "./sprintreader-app");

        assert!(script.starts_with("#!/usr/bin/env bash"));
        assert!(script.contains("sprintreader-setup --check-db"));
        assert!(script.contains("trap"), "interrupt must be intercepted");
        assert!(script.contains("exit 130"));
        assert!(script.contains("cd \"$APP_ROOT\""));
        assert!(script.contains("./sprintreader-app \"$@\""));
    }

    #[test]
    fn desktop_entry_invokes_wrapper_with_working_directory() {
        let text = build_desktop_entry_text(
            Path::new("/opt/sprintreader/sprintreader.sh"),
            Path::new("/opt/sprintreader"),
        );
        assert!(text.contains("Exec=/opt/sprintreader/sprintreader.sh"));
        assert!(text.contains("Path=/opt/sprintreader"));
        assert!(text.contains("[Desktop Entry]"));
    }

    #[test]
    fn systemd_unit_contains_exec_and_workdir() {
        let text = build_systemd_unit_text(
            SERVICE_NAME,
            Path::new("/opt/sprintreader/sprintreader.sh"),
            Path::new("/opt/sprintreader"),
        );
        assert!(text.contains("ExecStart=/opt/sprintreader/sprintreader.sh"));
        assert!(text.contains("WorkingDirectory=/opt/sprintreader"));
        assert!(text.contains("WantedBy=default.target"));
    }

    #[test]
    fn systemd_unit_quotes_paths_with_spaces() {
        let text = build_systemd_unit_text(
            SERVICE_NAME,
            Path::new("/home/reader/My Apps/sprintreader.sh"),
            Path::new("/home/reader/My Apps"),
        );
        assert!(text.contains("ExecStart=\"/home/reader/My Apps/sprintreader.sh\""));
        assert!(text.contains("WorkingDirectory=\"/home/reader/My Apps\""));
    }

    #[tokio::test]
    async fn alias_appended_exactly_once() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let bashrc = tmp.path().join(".bashrc");
        std::fs::write(&bashrc, "export PATH=$PATH:~/bin\n").expect("seed");
        let wrapper = Path::new("/opt/sprintreader/sprintreader.sh");

        let first = append_alias_if_absent(&bashrc, wrapper).await.expect("first");
        assert!(first);

        let second = append_alias_if_absent(&bashrc, wrapper).await.expect("second");
        assert!(!second);

        let contents = std::fs::read_to_string(&bashrc).expect("read");
        assert_eq!(contents.matches("alias sprintreader=").count(), 1);
        assert!(contents.starts_with("export PATH"), "existing content kept");
    }

    #[tokio::test]
    async fn write_launchers_into_produces_all_artifacts() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let app_root = tmp.path().join("app");
        let applications = tmp.path().join("applications");
        let systemd = tmp.path().join("systemd");
        let bashrc = tmp.path().join(".bashrc");
        std::fs::create_dir_all(&app_root).expect("app root");

        let report = write_launchers_into(&app_root, &applications, &systemd, &bashrc)
            .await
            .expect("write");

        let wrapper = report.wrapper_path.expect("wrapper");
        assert!(wrapper.is_file());
        assert!(report.desktop_entry_path.expect("desktop").is_file());
        assert!(report.unit_path.expect("unit").is_file());
        assert!(report.alias_appended);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&wrapper).expect("meta").permissions().mode();
            assert_ne!(mode & 0o111, 0, "wrapper must be executable");
        }
    }
}
