// Smoke-test runner
//
// Walks a fixed list of checks and fails fast on the first error: database
// reachability, one trivial count query per entity table, then vault wiring.
// Later checks must not run once one has failed.

use anyhow::{Context, Result};
use log::info;
use std::path::Path;

use crate::config::AppConfig;
use crate::database::connection::open_pool;
use crate::database::schema::ENTITY_TABLES;
use crate::utils::logging::mask_connection_string;
use crate::vault::{read_topic_sidecar, Note};

/// One passing smoke check, for reporting.
#[derive(Debug, Clone)]
pub struct SmokeCheck {
    pub name: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct SmokeReport {
    pub passed: Vec<SmokeCheck>,
}

/// Run the full smoke test. The returned error names the first failing
/// check and carries the underlying error text.
pub async fn run_smoke_test(config: &AppConfig, vault_dir: &Path) -> Result<SmokeReport> {
    let mut report = SmokeReport::default();

    // 1. Database reachability as the application role.
    let url = config.database_url()?;
    info!(
        "[PHASE: smoke] [STEP: connect] Connecting ({})",
        mask_connection_string(&url)
    );
    let pool = open_pool(&url)
        .await
        .context("Smoke test failed at check 'database connection'")?;

    let server_version: String = sqlx::query_scalar("SELECT version()")
        .fetch_one(&pool)
        .await
        .context("Smoke test failed at check 'server version'")?;
    push_pass(&mut report, "database connection", &server_version);

    // 2. One trivial count query per entity table, in schema order.
    for table in ENTITY_TABLES {
        // Table names come from our own constant list, never user input.
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&pool)
            .await
            .with_context(|| format!("Smoke test failed at check 'count:{}'", table))?;
        push_pass(
            &mut report,
            &format!("count:{}", table),
            &format!("{} rows", count),
        );
    }
    pool.close().await;

    // 3. Vault wiring.
    let vault_checks = check_vault(vault_dir).await?;
    report.passed.extend(vault_checks);

    info!(
        "[PHASE: smoke] [STEP: done] All {} checks passed",
        report.passed.len()
    );
    Ok(report)
}

/// Verify the vault directory: present, default topic sidecar parses, and
/// every markdown note in it parses through the front-matter reader.
pub async fn check_vault(vault_dir: &Path) -> Result<Vec<SmokeCheck>> {
    let mut passed = Vec::new();

    if !vault_dir.is_dir() {
        anyhow::bail!(
            "Smoke test failed at check 'vault directory': {:?} does not exist (run --scaffold first)",
            vault_dir
        );
    }
    passed.push(SmokeCheck {
        name: "vault directory".to_string(),
        detail: format!("{:?}", vault_dir),
    });

    let general_dir = vault_dir.join("General");
    let topic = read_topic_sidecar(&general_dir)
        .await
        .context("Smoke test failed at check 'default topic sidecar'")?;
    passed.push(SmokeCheck {
        name: "default topic sidecar".to_string(),
        detail: format!("topic '{}' ({})", topic.name, topic.id),
    });

    let mut entries = tokio::fs::read_dir(&general_dir)
        .await
        .context("Smoke test failed at check 'vault listing'")?;
    let mut notes_parsed = 0usize;
    while let Some(entry) = entries
        .next_entry()
        .await
        .context("Smoke test failed at check 'vault listing'")?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Smoke test failed at check 'note:{:?}'", path))?;
        Note::parse_markdown(&text)
            .with_context(|| format!("Smoke test failed at check 'note:{:?}'", path))?;
        notes_parsed += 1;
    }
    passed.push(SmokeCheck {
        name: "vault notes".to_string(),
        detail: format!("{} notes parsed", notes_parsed),
    });

    Ok(passed)
}

fn push_pass(report: &mut SmokeReport, name: &str, detail: &str) {
    info!("[PHASE: smoke] [STEP: check] PASS {} ({})", name, detail);
    report.passed.push(SmokeCheck {
        name: name.to_string(),
        detail: detail.to_string(),
    });
}
