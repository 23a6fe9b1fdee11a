//! SQLite pool setup and versioned schema migration.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Ordered schema steps. A step runs once and is recorded in `schema_version`.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("schema.sql"))];

/// Open (creating if needed) the contract database at `db_path` and bring its
/// schema up to date.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    let version = run_migrations(&pool).await?;
    info!(path = %db_path, schema_version = version, "contract database ready");
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let start: i64 = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?
        .unwrap_or(0);
    let mut current = start;

    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > start) {
        let mut tx = pool.begin().await?;
        for statement in statements(sql) {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(*version)
            .bind(chrono::Utc::now().timestamp_millis())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(version, "applied schema migration");
        current = *version;
    }

    Ok(current)
}

/// Split a schema file into statements. `--` comment lines are dropped
/// first, so a `;` inside a comment never ends a statement.
fn statements(sql: &str) -> Vec<String> {
    let code: String = sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    code.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
