pub mod papers;

use chrono::Utc;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

use crate::models::DEFAULT_SETTING_KEYS;

pub async fn init_db(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

pub async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS papers (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            authors_json TEXT NOT NULL DEFAULT '[]',
            abstract TEXT NULL,
            published_date TEXT NOT NULL,
            doi TEXT NULL UNIQUE,
            source_url TEXT NULL,
            pdf_url TEXT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_papers_published_date ON papers (published_date DESC, created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS paper_analysis (
            paper_id TEXT PRIMARY KEY REFERENCES papers(id) ON DELETE CASCADE,
            title_cn TEXT NULL,
            abstract_cn TEXT NULL,
            main_institutions_json TEXT NULL,
            insights TEXT NULL,
            solutions TEXT NULL,
            limitations TEXT NULL,
            prospects TEXT NULL,
            analyzed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS paper_deep_analysis (
            paper_id TEXT PRIMARY KEY REFERENCES papers(id) ON DELETE CASCADE,
            motivation TEXT NOT NULL DEFAULT '',
            insights_json TEXT NOT NULL DEFAULT '[]',
            methods_json TEXT NOT NULL DEFAULT '{}',
            experiments_json TEXT NOT NULL DEFAULT '{}',
            results_json TEXT NOT NULL DEFAULT '{}',
            technical_novelty_score REAL NULL,
            practical_impact_score REAL NULL,
            theoretical_contribution_score REAL NULL,
            confidence_score REAL NULL,
            analysis_status TEXT NOT NULL DEFAULT 'completed',
            analyzed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS paper_tags (
            paper_id TEXT NOT NULL REFERENCES papers(id) ON DELETE CASCADE,
            tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            PRIMARY KEY (paper_id, tag_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            hashed_password TEXT NOT NULL,
            display_name TEXT NULL,
            banned INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    ensure_users_column(pool, "banned", "INTEGER NOT NULL DEFAULT 0").await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_favorites (
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            paper_id TEXT NOT NULL REFERENCES papers(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            PRIMARY KEY (user_id, paper_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS site_settings (
            setting_key TEXT PRIMARY KEY,
            setting_value TEXT NOT NULL DEFAULT '',
            updated_at TEXT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS page_visits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL,
            user_id INTEGER NULL,
            visitor_hash TEXT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS api_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            function_name TEXT NOT NULL,
            response_status INTEGER NOT NULL,
            tokens_used INTEGER NULL,
            duration_ms INTEGER NOT NULL,
            error_message TEXT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_api_logs_created_at ON api_logs (created_at DESC)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS system_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            log_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            message TEXT NOT NULL,
            details TEXT NULL,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_system_logs_created_at ON system_logs (created_at DESC)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS system_configs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            config_key TEXT NOT NULL UNIQUE,
            config_value TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let now = Utc::now();
    for key in DEFAULT_SETTING_KEYS {
        sqlx::query(
            "INSERT OR IGNORE INTO site_settings (setting_key, setting_value, updated_at) VALUES (?, '', ?)",
        )
        .bind(key)
        .bind(now)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Adds a column to `users` when a database predates it.
async fn ensure_users_column(
    pool: &SqlitePool,
    column_name: &str,
    column_definition: &str,
) -> Result<(), sqlx::Error> {
    let (existing_count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM pragma_table_info('users') WHERE name = ?")
            .bind(column_name)
            .fetch_one(pool)
            .await?;

    if existing_count == 0 {
        let alter_sql = format!("ALTER TABLE users ADD COLUMN {} {}", column_name, column_definition);
        sqlx::query(&alter_sql).execute(pool).await?;
    }

    Ok(())
}

/// Row offset of a 1-based page. Saturates instead of overflowing on absurd pages.
pub fn page_offset(page: i64, per_page: i64) -> i64 {
    page.max(1).saturating_sub(1).saturating_mul(per_page)
}

/// Single-connection in-memory database with the full schema.
#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    create_schema(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_is_idempotent_and_seeds_settings_once() {
        let pool = memory_pool().await;
        create_schema(&pool).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM site_settings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, DEFAULT_SETTING_KEYS.len() as i64);
    }

    #[tokio::test]
    async fn banned_column_is_added_to_older_users_table() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, username TEXT NOT NULL UNIQUE, \
             email TEXT NOT NULL UNIQUE, hashed_password TEXT NOT NULL, display_name TEXT NULL, created_at TEXT NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO users (username, email, hashed_password, created_at) VALUES ('a', 'a@x', 'h', '2024-01-01T00:00:00Z')")
            .execute(&pool)
            .await
            .unwrap();

        create_schema(&pool).await.unwrap();

        let (banned,): (bool,) = sqlx::query_as("SELECT banned FROM users WHERE username = 'a'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(!banned);
    }
}
