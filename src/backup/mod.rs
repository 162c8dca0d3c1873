// Backup utility
//
// Bundles the vault, configuration file, application source, and top-level
// scripts into one timestamped zip, optionally dumps the database via
// pg_dump, then prunes old archives down to the retention bound.

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::time::Duration;

use crate::config::AppConfig;
use crate::utils::path_resolver::resolve_storage_path;
use crate::utils::process::run_cmd_with_timeout;

pub const ARCHIVE_PREFIX: &str = "sprintreader_backup_";
pub const ARCHIVE_SUFFIX: &str = ".zip";

/// How many archives survive a pruning pass.
pub const RETAINED_ARCHIVES: usize = 10;

/// Directory names never included in an archive.
const EXCLUDED_DIRS: &[&str] = &[".venv", "venv", "__pycache__", "target", ".git", "node_modules"];

#[derive(Debug, Clone)]
pub struct BackupReport {
    pub archive_path: PathBuf,
    pub files_archived: usize,
    pub archive_sha256: String,
    pub db_dump_path: Option<PathBuf>,
    pub pruned: Vec<PathBuf>,
}

/// Create a backup archive, dump the database when pg_dump is available,
/// and prune archives beyond the retention bound.
pub async fn run_backup(app_root: &Path, config: &AppConfig) -> Result<BackupReport> {
    let backup_dir = resolve_storage_path(app_root, &config.backup_path);
    tokio::fs::create_dir_all(&backup_dir)
        .await
        .with_context(|| format!("Failed to create backup directory: {:?}", backup_dir))?;

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let archive_path = backup_dir.join(format!("{}{}{}", ARCHIVE_PREFIX, timestamp, ARCHIVE_SUFFIX));

    let vault_dir = resolve_storage_path(app_root, &config.vault_path);
    let app_root_owned = app_root.to_path_buf();
    let vault_dir_owned = vault_dir.clone();
    let archive_path_owned = archive_path.clone();
    let backup_dir_owned = backup_dir.clone();

    // Zip writing is blocking I/O; keep it off the async runtime.
    let files_archived = tokio::task::spawn_blocking(move || {
        create_archive(
            &app_root_owned,
            &vault_dir_owned,
            &backup_dir_owned,
            &archive_path_owned,
        )
    })
    .await
    .context("Archive task panicked")??;

    let archive_sha256 = sha256_of_file(&archive_path).await?;
    info!(
        "[PHASE: backup] [STEP: archive] Wrote {:?} ({} files, sha256={})",
        archive_path, files_archived, archive_sha256
    );

    let db_dump_path = dump_database(&backup_dir, config, &timestamp.to_string()).await?;

    let pruned = prune_old_archives(&backup_dir).await?;

    Ok(BackupReport {
        archive_path,
        files_archived,
        archive_sha256,
        db_dump_path,
        pruned,
    })
}

/// Build the zip archive. Returns the number of files written.
///
/// Contents: the vault directory, the `.env` file, the `src/` tree, and
/// top-level `*.sh` scripts. Virtual-environment and cache artifacts are
/// excluded, as is the backup directory itself.
fn create_archive(
    app_root: &Path,
    vault_dir: &Path,
    backup_dir: &Path,
    archive_path: &Path,
) -> Result<usize> {
    let file = std::fs::File::create(archive_path)
        .with_context(|| format!("Failed to create archive: {:?}", archive_path))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut count = 0usize;

    let add_file = |zip: &mut zip::ZipWriter<std::fs::File>, path: &Path| -> Result<()> {
        let rel = path.strip_prefix(app_root).unwrap_or(path);
        zip.start_file(rel.to_string_lossy(), options)
            .with_context(|| format!("Failed to start archive entry: {:?}", rel))?;
        let mut src = std::fs::File::open(path)
            .with_context(|| format!("Failed to open for archiving: {:?}", path))?;
        std::io::copy(&mut src, zip)
            .with_context(|| format!("Failed to archive: {:?}", path))?;
        Ok(())
    };

    // Vault directory, recursively.
    if vault_dir.is_dir() {
        for path in walk_files(vault_dir, backup_dir)? {
            add_file(&mut zip, &path)?;
            count += 1;
        }
    }

    // Configuration file.
    let env_file = app_root.join(crate::config::ENV_FILE_NAME);
    if env_file.is_file() {
        add_file(&mut zip, &env_file)?;
        count += 1;
    }

    // Application source tree.
    let src_dir = app_root.join("src");
    if src_dir.is_dir() {
        for path in walk_files(&src_dir, backup_dir)? {
            add_file(&mut zip, &path)?;
            count += 1;
        }
    }

    // Top-level scripts.
    for entry in std::fs::read_dir(app_root)
        .with_context(|| format!("Failed to list application root: {:?}", app_root))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("sh") {
            add_file(&mut zip, &path)?;
            count += 1;
        }
    }

    zip.finish().context("Failed to finalize archive")?;
    Ok(count)
}

/// Recursively list files under `root`, skipping excluded directories and
/// anything inside the backup directory.
fn walk_files(root: &Path, backup_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        if dir == backup_dir {
            continue;
        }
        if let Some(name) = dir.file_name().and_then(|n| n.to_str()) {
            if EXCLUDED_DIRS.contains(&name) {
                continue;
            }
        }
        for entry in
            std::fs::read_dir(&dir).with_context(|| format!("Failed to list {:?}", dir))?
        {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                out.push(path);
            }
        }
    }

    out.sort();
    Ok(out)
}

async fn sha256_of_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read archive for checksum: {:?}", path))?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Dump the database with pg_dump when the tool is on PATH.
///
/// A missing tool is a warning; a failed dump is fatal.
async fn dump_database(
    backup_dir: &Path,
    config: &AppConfig,
    timestamp: &str,
) -> Result<Option<PathBuf>> {
    if which::which("pg_dump").is_err() {
        warn!(
            "[PHASE: backup] [STEP: db_dump] pg_dump not found on PATH; skipping database dump"
        );
        return Ok(None);
    }

    let dump_path = backup_dir.join(format!("sprintreader_db_{}.sql", timestamp));
    let url = config.database_url()?;
    let args = vec![
        "--dbname".to_string(),
        url,
        "--file".to_string(),
        dump_path.to_string_lossy().to_string(),
        "--no-password".to_string(),
    ];

    let out = run_cmd_with_timeout("pg_dump", &args, Duration::from_secs(120), "pg_dump").await?;
    if out.exit_code != Some(0) {
        anyhow::bail!(
            "pg_dump failed (exit_code={:?}): {}",
            out.exit_code,
            out.stderr.trim()
        );
    }

    info!(
        "[PHASE: backup] [STEP: db_dump] Wrote database dump: {:?}",
        dump_path
    );
    Ok(Some(dump_path))
}

/// Given archive file names, pick the ones to delete: everything past the
/// `RETAINED_ARCHIVES` newest. Lexicographic order of the timestamped names
/// is creation order.
pub fn select_archives_to_prune(names: &[String]) -> Vec<String> {
    let mut matching: Vec<&String> = names
        .iter()
        .filter(|n| n.starts_with(ARCHIVE_PREFIX) && n.ends_with(ARCHIVE_SUFFIX))
        .collect();
    matching.sort();
    matching.reverse();
    matching
        .into_iter()
        .skip(RETAINED_ARCHIVES)
        .cloned()
        .collect()
}

/// Delete archives beyond the retention bound. Returns the deleted paths.
pub async fn prune_old_archives(backup_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(backup_dir)
        .await
        .with_context(|| format!("Failed to list backup directory: {:?}", backup_dir))?;
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }

    let mut pruned = Vec::new();
    for name in select_archives_to_prune(&names) {
        let path = backup_dir.join(&name);
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to prune old archive: {:?}", path))?;
        info!("[PHASE: backup] [STEP: prune] Deleted old archive: {:?}", path);
        pruned.push(path);
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive_name(ts: &str) -> String {
        format!("{}{}{}", ARCHIVE_PREFIX, ts, ARCHIVE_SUFFIX)
    }

    #[test]
    fn prune_selection_keeps_newest_ten() {
        let names: Vec<String> = (1..=13)
            .map(|d| archive_name(&format!("202501{:02}_120000", d)))
            .collect();

        let pruned = select_archives_to_prune(&names);
        assert_eq!(pruned.len(), 3);
        // Oldest three go.
        assert!(pruned.contains(&archive_name("20250101_120000")));
        assert!(pruned.contains(&archive_name("20250102_120000")));
        assert!(pruned.contains(&archive_name("20250103_120000")));
    }

    #[test]
    fn prune_selection_ignores_foreign_files() {
        let names = vec![
            "sprintreader_db_20250101_120000.sql".to_string(),
            "unrelated.zip".to_string(),
            archive_name("20250101_120000"),
        ];
        assert!(select_archives_to_prune(&names).is_empty());
    }

    #[test]
    fn prune_selection_under_bound_is_noop() {
        let names: Vec<String> = (1..=RETAINED_ARCHIVES)
            .map(|d| archive_name(&format!("202501{:02}_120000", d)))
            .collect();
        assert!(select_archives_to_prune(&names).is_empty());
    }

    #[tokio::test]
    async fn prune_deletes_only_oldest_archives() {
        let tmp = tempfile::tempdir().expect("tempdir");
        for d in 1..=12 {
            let name = archive_name(&format!("202501{:02}_120000", d));
            std::fs::write(tmp.path().join(name), b"zip").expect("seed");
        }

        let pruned = prune_old_archives(tmp.path()).await.expect("prune");
        assert_eq!(pruned.len(), 2);

        let remaining: Vec<String> = std::fs::read_dir(tmp.path())
            .expect("list")
            .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(remaining.len(), RETAINED_ARCHIVES);
        assert!(!remaining.contains(&archive_name("20250101_120000")));
        assert!(!remaining.contains(&archive_name("20250102_120000")));
        assert!(remaining.contains(&archive_name("20250112_120000")));
    }

    #[test]
    fn archive_includes_vault_env_src_and_scripts_only() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        std::fs::create_dir_all(root.join("vaults/General")).expect("mkdir");
        std::fs::write(root.join("vaults/General/note.md"), "note").expect("write");
        std::fs::write(root.join(".env"), "DB_HOST=localhost").expect("write");
        std::fs::create_dir_all(root.join("src")).expect("mkdir");
        std::fs::write(root.join("src/main.py"), "entry").expect("write");
        std::fs::write(root.join("setup.sh"), "#!/bin/sh").expect("write");
        std::fs::create_dir_all(root.join(".venv/lib")).expect("mkdir");
        std::fs::write(root.join(".venv/lib/pkg.py"), "venv").expect("write");
        std::fs::create_dir_all(root.join("src/__pycache__")).expect("mkdir");
        std::fs::write(root.join("src/__pycache__/main.pyc"), "cache").expect("write");
        std::fs::create_dir_all(root.join("backups")).expect("mkdir");

        let archive = root.join("backups/test.zip");
        let count = create_archive(root, &root.join("vaults"), &root.join("backups"), &archive)
            .expect("archive");
        assert_eq!(count, 4);

        let file = std::fs::File::open(&archive).expect("open");
        let mut zip = zip::ZipArchive::new(file).expect("zip");
        let names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).expect("entry").name().to_string())
            .collect();

        assert!(names.iter().any(|n| n.ends_with("note.md")));
        assert!(names.iter().any(|n| n.ends_with(".env")));
        assert!(names.iter().any(|n| n.ends_with("main.py")));
        assert!(names.iter().any(|n| n.ends_with("setup.sh")));
        assert!(
            !names.iter().any(|n| n.contains(".venv") || n.contains("__pycache__")),
            "excluded artifacts leaked into archive: {:?}",
            names
        );
    }
}
