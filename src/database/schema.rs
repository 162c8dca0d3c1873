// Schema bootstrap
//
// "Ensure all tables exist" and "ensure default settings rows exist", both
// idempotent: tables are CREATE TABLE IF NOT EXISTS in dependency order,
// settings are inserted only when their key is absent.

use anyhow::{Context, Result};
use log::info;
use sqlx::{Pool, Postgres};

/// Entity tables in creation order. Also the order the smoke test walks.
pub const ENTITY_TABLES: &[&str] = &[
    "documents",
    "reading_sessions",
    "notes",
    "goals",
    "settings",
    "timer_sessions",
    "focus_sessions",
    "user_goals",
    "user_streaks",
    "user_reflections",
    "notification_logs",
];

const TABLE_DDL: &[(&str, &str)] = &[
    (
        "documents",
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id SERIAL PRIMARY KEY,
            filename VARCHAR(255) NOT NULL,
            filepath VARCHAR(500) NOT NULL,
            title VARCHAR(255),
            total_pages INTEGER,
            current_page INTEGER DEFAULT 1,
            total_reading_time DOUBLE PRECISION DEFAULT 0.0,
            estimated_reading_time DOUBLE PRECISION,
            reading_speed DOUBLE PRECISION,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "reading_sessions",
        r#"
        CREATE TABLE IF NOT EXISTS reading_sessions (
            id SERIAL PRIMARY KEY,
            document_id INTEGER NOT NULL REFERENCES documents(id),
            start_time TIMESTAMPTZ NOT NULL,
            end_time TIMESTAMPTZ,
            duration DOUBLE PRECISION,
            pages_read INTEGER DEFAULT 0,
            start_page INTEGER,
            end_page INTEGER,
            session_type VARCHAR(50),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "notes",
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            id SERIAL PRIMARY KEY,
            document_id INTEGER NOT NULL REFERENCES documents(id),
            page_number INTEGER NOT NULL,
            highlighted_text TEXT,
            note_content TEXT,
            topic VARCHAR(255),
            x_position DOUBLE PRECISION,
            y_position DOUBLE PRECISION,
            width DOUBLE PRECISION,
            height DOUBLE PRECISION,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "goals",
        r#"
        CREATE TABLE IF NOT EXISTS goals (
            id SERIAL PRIMARY KEY,
            document_id INTEGER NOT NULL REFERENCES documents(id),
            goal_type VARCHAR(50),
            target_value DOUBLE PRECISION,
            current_value DOUBLE PRECISION DEFAULT 0.0,
            target_date TIMESTAMPTZ,
            is_completed BOOLEAN DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "settings",
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            id SERIAL PRIMARY KEY,
            key VARCHAR(100) NOT NULL UNIQUE,
            value VARCHAR(500),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "timer_sessions",
        r#"
        CREATE TABLE IF NOT EXISTS timer_sessions (
            id SERIAL PRIMARY KEY,
            reading_session_id INTEGER REFERENCES reading_sessions(id),
            timer_mode VARCHAR(50) NOT NULL,
            planned_duration INTEGER,
            actual_duration DOUBLE PRECISION,
            interruptions INTEGER DEFAULT 0,
            completed BOOLEAN DEFAULT FALSE,
            break_taken BOOLEAN DEFAULT FALSE,
            break_duration INTEGER,
            focus_rating INTEGER,
            notes TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "focus_sessions",
        r#"
        CREATE TABLE IF NOT EXISTS focus_sessions (
            id SERIAL PRIMARY KEY,
            reading_session_id INTEGER REFERENCES reading_sessions(id),
            focus_mode_enabled BOOLEAN DEFAULT FALSE,
            start_time TIMESTAMPTZ NOT NULL,
            end_time TIMESTAMPTZ,
            distractions_blocked INTEGER DEFAULT 0,
            settings_used JSONB,
            effectiveness_rating INTEGER,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "user_goals",
        r#"
        CREATE TABLE IF NOT EXISTS user_goals (
            id SERIAL PRIMARY KEY,
            goal_type VARCHAR(50) NOT NULL,
            metric_type VARCHAR(50) NOT NULL,
            target_value DOUBLE PRECISION NOT NULL,
            current_value DOUBLE PRECISION DEFAULT 0.0,
            start_date TIMESTAMPTZ NOT NULL,
            end_date TIMESTAMPTZ NOT NULL,
            is_active BOOLEAN DEFAULT TRUE,
            is_achieved BOOLEAN DEFAULT FALSE,
            achievement_date TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "user_streaks",
        r#"
        CREATE TABLE IF NOT EXISTS user_streaks (
            id SERIAL PRIMARY KEY,
            streak_type VARCHAR(50) DEFAULT 'daily',
            current_streak INTEGER DEFAULT 0,
            longest_streak INTEGER DEFAULT 0,
            last_activity_date TIMESTAMPTZ,
            streak_start_date TIMESTAMPTZ,
            is_active BOOLEAN DEFAULT TRUE,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "user_reflections",
        r#"
        CREATE TABLE IF NOT EXISTS user_reflections (
            id SERIAL PRIMARY KEY,
            reading_session_id INTEGER REFERENCES reading_sessions(id),
            focus_rating INTEGER,
            energy_level INTEGER,
            comprehension_rating INTEGER,
            distraction_notes TEXT,
            key_insights TEXT,
            session_mood VARCHAR(50),
            would_repeat_setup BOOLEAN,
            improvement_notes TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "notification_logs",
        r#"
        CREATE TABLE IF NOT EXISTS notification_logs (
            id SERIAL PRIMARY KEY,
            notification_type VARCHAR(50) NOT NULL,
            title VARCHAR(255),
            message TEXT,
            recipient VARCHAR(100) DEFAULT 'user',
            sent_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            was_clicked BOOLEAN DEFAULT FALSE,
            action_taken VARCHAR(100)
        )
        "#,
    ),
];

/// Default settings rows, inserted only when the key is absent.
pub const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    ("default_session_duration", "25"),
    ("sprint_duration", "5"),
    ("break_duration", "5"),
    ("theme", "light"),
    ("auto_save_notes", "true"),
    ("pomodoro_work_duration", "25"),
    ("pomodoro_break_duration", "5"),
    ("pomodoro_long_break_duration", "15"),
    ("sprint_page_goal", "2"),
    ("focus_mode_auto_enable", "false"),
    ("notifications_enabled", "true"),
    ("daily_reading_goal", "30"),
    ("weekly_reading_goal", "210"),
    ("streak_notification_enabled", "true"),
    ("end_session_reflection_prompt", "true"),
];

/// Create every application table that does not already exist.
pub async fn ensure_schema(pool: &Pool<Postgres>) -> Result<()> {
    for (table, ddl) in TABLE_DDL {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to ensure table '{}'", table))?;
    }
    info!(
        "[PHASE: provision] [STEP: schema] Ensured {} tables",
        TABLE_DDL.len()
    );
    Ok(())
}

/// Insert each default setting whose key has no row yet.
///
/// Returns the number of rows actually inserted (0 on a re-run).
pub async fn seed_default_settings(pool: &Pool<Postgres>) -> Result<u64> {
    let mut inserted: u64 = 0;
    for (key, value) in DEFAULT_SETTINGS {
        let result =
            sqlx::query("INSERT INTO settings (key, value) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING")
                .bind(*key)
                .bind(*value)
                .execute(pool)
                .await
                .with_context(|| format!("Failed to seed setting '{}'", key))?;
        inserted += result.rows_affected();
    }
    info!(
        "[PHASE: provision] [STEP: settings] Seeded {} of {} default settings",
        inserted,
        DEFAULT_SETTINGS.len()
    );
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_table_ddl_is_guarded() {
        for (table, ddl) in TABLE_DDL {
            assert!(
                ddl.contains("CREATE TABLE IF NOT EXISTS"),
                "table '{}' is not guarded",
                table
            );
            assert!(
                ddl.contains(table),
                "ddl for '{}' does not name the table",
                table
            );
        }
    }

    #[test]
    fn entity_tables_match_ddl_order() {
        let ddl_names: Vec<&str> = TABLE_DDL.iter().map(|(name, _)| *name).collect();
        assert_eq!(ENTITY_TABLES, ddl_names.as_slice());
    }

    #[test]
    fn referenced_tables_are_created_first() {
        // documents before reading_sessions, reading_sessions before the
        // stage-3 tables that reference it.
        let pos = |name: &str| {
            ENTITY_TABLES
                .iter()
                .position(|t| *t == name)
                .unwrap_or_else(|| panic!("missing table {}", name))
        };
        assert!(pos("documents") < pos("reading_sessions"));
        assert!(pos("reading_sessions") < pos("timer_sessions"));
        assert!(pos("reading_sessions") < pos("focus_sessions"));
        assert!(pos("reading_sessions") < pos("user_reflections"));
    }

    #[test]
    fn default_settings_keys_are_unique() {
        let keys: HashSet<&str> = DEFAULT_SETTINGS.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys.len(), DEFAULT_SETTINGS.len());
    }

    #[test]
    fn default_settings_cover_timer_defaults() {
        let get = |key: &str| {
            DEFAULT_SETTINGS
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| *v)
        };
        assert_eq!(get("pomodoro_work_duration"), Some("25"));
        assert_eq!(get("sprint_duration"), Some("5"));
        assert_eq!(get("weekly_reading_goal"), Some("210"));
    }
}
