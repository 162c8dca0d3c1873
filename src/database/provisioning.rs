// Database provisioning
//
// Brings PostgreSQL from "absent" to "ready for SprintReader" idempotently:
// role -> database -> grants -> application-role verification -> schema ->
// default settings. Every step is safe to repeat; already-exists outcomes
// are warnings, not failures.
//
// Key design decisions:
// - Existence checks are parameterized catalog queries (pg_roles, pg_database)
// - Statement generation is pure and injection-safe: identifiers are
//   double-quoted, literals single-quote-doubled
// - No rollback on failure; re-running from the top is the recovery path

use anyhow::{Context, Result};
use log::{info, warn};
use regex::Regex;
use sqlx::{Pool, Postgres};

use crate::config::AppConfig;
use crate::database::connection::{open_pool, probe_superuser};
use crate::database::schema::{ensure_schema, seed_default_settings};
use crate::utils::logging::mask_connection_string;

/// What a provisioning run did (or found already done).
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub superuser_role: String,
    pub role_created: bool,
    pub database_created: bool,
    pub server_version: String,
    pub settings_seeded: u64,
}

// =============================================================================
// Validation
// =============================================================================

/// Validate a Postgres database or role name (letters, numbers, underscore;
/// 63-byte identifier limit; reserved names rejected).
pub fn validate_identifier(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Name is required.".to_string());
    }
    if name.len() > 63 {
        return Err("Name must be 63 characters or fewer.".to_string());
    }
    let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    if !re.is_match(name) {
        return Err(
            "Name must start with a letter or underscore and contain only letters, numbers, and underscores."
                .to_string(),
        );
    }
    let reserved = ["postgres", "template0", "template1"];
    if reserved.iter().any(|r| r.eq_ignore_ascii_case(name)) {
        return Err(format!("'{}' is a reserved name.", name));
    }
    Ok(())
}

// =============================================================================
// SQL Generation
// =============================================================================

/// Double-quote a PostgreSQL identifier
fn pg_quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a PostgreSQL string literal
fn pg_quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Generate CREATE ROLE with login and password
pub fn create_role_stmt(role: &str, password: &str) -> String {
    format!(
        "CREATE ROLE {} WITH LOGIN PASSWORD {};",
        pg_quote_ident(role),
        pg_quote_literal(password)
    )
}

/// Generate CREATE DATABASE with owner
pub fn create_database_stmt(db_name: &str, owner: &str) -> String {
    format!(
        "CREATE DATABASE {} OWNER {};",
        pg_quote_ident(db_name),
        pg_quote_ident(owner)
    )
}

/// Generate GRANT ALL PRIVILEGES on a database
pub fn grant_privileges_stmt(db_name: &str, role: &str) -> String {
    format!(
        "GRANT ALL PRIVILEGES ON DATABASE {} TO {};",
        pg_quote_ident(db_name),
        pg_quote_ident(role)
    )
}

// =============================================================================
// Catalog checks
// =============================================================================

pub async fn role_exists(pool: &Pool<Postgres>, role: &str) -> Result<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_roles WHERE rolname = $1)")
            .bind(role)
            .fetch_one(pool)
            .await
            .context("Failed to query pg_roles")?;
    Ok(exists)
}

pub async fn database_exists(pool: &Pool<Postgres>, db_name: &str) -> Result<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(pool)
            .await
            .context("Failed to query pg_database")?;
    Ok(exists)
}

// =============================================================================
// Provisioning flow
// =============================================================================

/// Run the full provisioning sequence against the configured server.
pub async fn provision(config: &AppConfig) -> Result<ProvisionReport> {
    validate_identifier(&config.db_user)
        .map_err(|e| anyhow::anyhow!("Invalid DB_USER '{}': {}", config.db_user, e))?;
    validate_identifier(&config.db_name)
        .map_err(|e| anyhow::anyhow!("Invalid DB_NAME '{}': {}", config.db_name, e))?;

    // 1. Superuser probe (postgres first, OS user fallback).
    let superuser = probe_superuser(config).await?;

    // 2. Application role, created only when absent.
    let role_created = if role_exists(&superuser.pool, &config.db_user).await? {
        warn!(
            "[PHASE: provision] [STEP: role] Role already exists, skipping: {}",
            config.db_user
        );
        false
    } else {
        sqlx::query(&create_role_stmt(&config.db_user, &config.db_password))
            .execute(&superuser.pool)
            .await
            .with_context(|| format!("Failed to create role '{}'", config.db_user))?;
        info!(
            "[PHASE: provision] [STEP: role] Created application role: {}",
            config.db_user
        );
        true
    };

    // 3. Target database, created only when absent.
    let database_created = if database_exists(&superuser.pool, &config.db_name).await? {
        warn!(
            "[PHASE: provision] [STEP: database] Database already exists, skipping: {}",
            config.db_name
        );
        false
    } else {
        sqlx::query(&create_database_stmt(&config.db_name, &config.db_user))
            .execute(&superuser.pool)
            .await
            .with_context(|| format!("Failed to create database '{}'", config.db_name))?;
        info!(
            "[PHASE: provision] [STEP: database] Created database: {}",
            config.db_name
        );
        true
    };

    // 4. Grants are unconditional; repeating them is harmless.
    sqlx::query(&grant_privileges_stmt(&config.db_name, &config.db_user))
        .execute(&superuser.pool)
        .await
        .context("Failed to grant privileges")?;
    info!(
        "[PHASE: provision] [STEP: grant] Granted all privileges on {} to {}",
        config.db_name, config.db_user
    );

    superuser.pool.close().await;

    // 5. Verify end-to-end reachability as the application role.
    let app_url = config.database_url()?;
    info!(
        "[PHASE: provision] [STEP: verify] Connecting as application role ({})",
        mask_connection_string(&app_url)
    );
    let app_pool = open_pool(&app_url)
        .await
        .context("Failed to connect as the application role after provisioning")?;

    let server_version: String = sqlx::query_scalar("SELECT version()")
        .fetch_one(&app_pool)
        .await
        .context("Failed to read server version")?;
    info!(
        "[PHASE: provision] [STEP: verify] Server reachable: {}",
        server_version
    );

    // 6. Schema + default settings, both idempotent.
    ensure_schema(&app_pool).await?;
    let settings_seeded = seed_default_settings(&app_pool).await?;

    app_pool.close().await;

    Ok(ProvisionReport {
        superuser_role: superuser.role,
        role_created,
        database_created,
        server_version,
        settings_seeded,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
