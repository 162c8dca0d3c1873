// Directory/asset scaffolder
//
// First-time filesystem setup: runtime directories, the default "General"
// topic, and a welcome note. Every piece is guarded by an existence check so
// re-runs never clobber user edits.

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::utils::path_resolver::{resolve_storage_path, resolve_user_config_dir};
use crate::vault::{note_file_name, write_topic_sidecar, Note, Topic, TOPIC_SIDECAR};

/// Name of the default topic created on first setup.
pub const DEFAULT_TOPIC_NAME: &str = "General";

const WELCOME_NOTE_TITLE: &str = "Welcome to SprintReader";

#[derive(Debug, Clone, Default)]
pub struct ScaffoldReport {
    pub created_dirs: Vec<PathBuf>,
    pub topic_sidecar_written: bool,
    pub sample_note_written: bool,
}

/// Scaffold everything: application directories, vault assets, and the
/// per-user configuration root.
pub async fn scaffold(app_root: &Path, config: &AppConfig) -> Result<ScaffoldReport> {
    let mut report = scaffold_app_dirs(app_root, config).await?;

    let user_config = resolve_user_config_dir()?;
    let user_report = scaffold_user_config(&user_config).await?;
    report.created_dirs.extend(user_report.created_dirs);

    Ok(report)
}

/// Create the application-root directories and first-time vault assets.
pub async fn scaffold_app_dirs(app_root: &Path, config: &AppConfig) -> Result<ScaffoldReport> {
    let mut report = ScaffoldReport::default();

    let log_dir = resolve_storage_path(app_root, &config.log_path);
    let vault_dir = resolve_storage_path(app_root, &config.vault_path);
    let backup_dir = resolve_storage_path(app_root, &config.backup_path);
    let general_dir = vault_dir.join(DEFAULT_TOPIC_NAME);

    for dir in [&log_dir, &vault_dir, &general_dir, &backup_dir] {
        if ensure_dir(dir).await? {
            report.created_dirs.push(dir.clone());
        }
    }

    // Default topic sidecar, only when absent.
    let sidecar_path = general_dir.join(TOPIC_SIDECAR);
    let topic = if sidecar_path.exists() {
        warn!(
            "[PHASE: scaffold] [STEP: topic] Topic sidecar already exists, leaving untouched: {:?}",
            sidecar_path
        );
        crate::vault::read_topic_sidecar(&general_dir).await?
    } else {
        let topic = Topic::new(
            DEFAULT_TOPIC_NAME,
            "Default topic for uncategorized notes",
            Utc::now(),
        );
        write_topic_sidecar(&general_dir, &topic).await?;
        info!(
            "[PHASE: scaffold] [STEP: topic] Created default topic sidecar: {:?}",
            sidecar_path
        );
        report.topic_sidecar_written = true;
        topic
    };

    // Welcome note, only when absent.
    let note_path = general_dir.join(note_file_name(WELCOME_NOTE_TITLE));
    if note_path.exists() {
        warn!(
            "[PHASE: scaffold] [STEP: note] Sample note already exists, leaving untouched: {:?}",
            note_path
        );
    } else {
        let note = welcome_note(topic.id);
        tokio::fs::write(&note_path, note.to_markdown())
            .await
            .with_context(|| format!("Failed to write sample note: {:?}", note_path))?;
        info!(
            "[PHASE: scaffold] [STEP: note] Wrote sample note: {:?}",
            note_path
        );
        report.sample_note_written = true;
    }

    Ok(report)
}

/// Create the per-user configuration root with restrictive permissions and
/// its themes/plugins/exports subfolders.
pub async fn scaffold_user_config(user_config_root: &Path) -> Result<ScaffoldReport> {
    let mut report = ScaffoldReport::default();

    if ensure_dir(user_config_root).await? {
        report.created_dirs.push(user_config_root.to_path_buf());
    }

    // Only the per-user root is permission-hardened.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        tokio::fs::set_permissions(user_config_root, perms)
            .await
            .with_context(|| {
                format!("Failed to set permissions on {:?}", user_config_root)
            })?;
    }

    for sub in ["themes", "plugins", "exports"] {
        let dir = user_config_root.join(sub);
        if ensure_dir(&dir).await? {
            report.created_dirs.push(dir);
        }
    }

    Ok(report)
}

/// The sample note written into the default topic on first setup.
fn welcome_note(topic_id: Uuid) -> Note {
    let now = Utc::now();
    Note {
        id: Uuid::new_v4(),
        title: WELCOME_NOTE_TITLE.to_string(),
        content: "SprintReader keeps your reading notes in plain markdown files, \
organized by topic.\n\n\
- Highlight text in a PDF to capture it as a note.\n\
- Use `[[Note Title]]` links to connect related notes.\n\
- Each topic folder has a `.topic.json` sidecar with its display metadata.\n\n\
This note was created during setup; feel free to edit or delete it."
            .to_string(),
        topic_id,
        document_id: 0,
        page_number: 1,
        excerpt: String::new(),
        tags: vec!["welcome".to_string()],
        created_at: now,
        updated_at: now,
    }
}

/// Create a directory if absent. Returns true when it was created.
async fn ensure_dir(dir: &Path) -> Result<bool> {
    if dir.is_dir() {
        return Ok(false);
    }
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create directory: {:?}", dir))?;
    info!("[PHASE: scaffold] [STEP: dirs] Created directory: {:?}", dir);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::read_topic_sidecar;

    #[tokio::test]
    async fn scaffold_creates_dirs_and_assets() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = AppConfig::default();

        let report = scaffold_app_dirs(tmp.path(), &config).await.expect("scaffold");

        assert!(tmp.path().join("logs").is_dir());
        assert!(tmp.path().join("vaults/General").is_dir());
        assert!(tmp.path().join("backups").is_dir());
        assert!(report.topic_sidecar_written);
        assert!(report.sample_note_written);

        let topic = read_topic_sidecar(&tmp.path().join("vaults/General"))
            .await
            .expect("sidecar");
        assert_eq!(topic.name, DEFAULT_TOPIC_NAME);

        let note_text =
            std::fs::read_to_string(tmp.path().join("vaults/General/Welcome to SprintReader.md"))
                .expect("note");
        let note = Note::parse_markdown(&note_text).expect("parse");
        assert_eq!(note.topic_id, topic.id);
        assert_eq!(note.tags, vec!["welcome".to_string()]);
    }

    #[tokio::test]
    async fn scaffold_rerun_never_overwrites_user_edits() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = AppConfig::default();

        scaffold_app_dirs(tmp.path(), &config).await.expect("first");

        let note_path = tmp.path().join("vaults/General/Welcome to SprintReader.md");
        std::fs::write(&note_path, "user edited this\n").expect("edit");
        let sidecar_path = tmp.path().join("vaults/General/.topic.json");
        let sidecar_before = std::fs::read_to_string(&sidecar_path).expect("sidecar");

        let report = scaffold_app_dirs(tmp.path(), &config).await.expect("second");

        assert!(!report.topic_sidecar_written);
        assert!(!report.sample_note_written);
        assert!(report.created_dirs.is_empty());
        assert_eq!(
            std::fs::read_to_string(&note_path).expect("note"),
            "user edited this\n"
        );
        assert_eq!(
            std::fs::read_to_string(&sidecar_path).expect("sidecar"),
            sidecar_before
        );
    }

    #[tokio::test]
    async fn user_config_root_is_permission_hardened() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("sprintreader");

        let report = scaffold_user_config(&root).await.expect("scaffold");

        assert!(root.join("themes").is_dir());
        assert!(root.join("plugins").is_dir());
        assert!(root.join("exports").is_dir());
        assert_eq!(report.created_dirs.len(), 4);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&root).expect("meta").permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }
}
