//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::sync::Once;
use tradeops::db::Database;

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// One-time schema initialization.
static SCHEMA_INIT: Once = Once::new();

/// Ensure the test database schema is set up (runs migrations once per test suite).
///
/// Callable from plain `#[test]`s and from inside `#[tokio::test]`: the
/// migration runs on its own thread with its own runtime, since a runtime
/// cannot be started from within another one.
pub fn ensure_schema() {
    SCHEMA_INIT.call_once(|| {
        std::thread::spawn(|| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let pool = sqlx::PgPool::connect(&test_db_url()).await.unwrap();
                run_migrations(&pool).await;
            });
        })
        .join()
        .unwrap_or_else(|_| panic!("schema migration thread panicked"));
    });
}

/// Connect to the test database with a clean set of tables.
pub async fn setup_test_db() -> Database {
    ensure_schema();
    let db = Database::connect_with(&test_db_url(), 10)
        .await
        .expect("Failed to connect to test database");
    truncate_all_tables(db.pool()).await;
    db
}

/// Truncate all tables to ensure test isolation.
pub async fn truncate_all_tables(pool: &sqlx::PgPool) {
    sqlx::raw_sql(
        "TRUNCATE TABLE ops_mission_steps, ops_missions, ops_trading_proposals,
                       ops_trigger_rules, ops_agent_events
         CASCADE",
    )
    .execute(pool)
    .await
    .unwrap();
}

async fn run_migrations(pool: &sqlx::PgPool) {
    let migration_files = ["migrations/001_ops_schema.sql"];
    for file in &migration_files {
        let path = std::path::Path::new(file);
        if !path.exists() {
            panic!("Migration file not found: {}", file);
        }
        let sql = std::fs::read_to_string(path).unwrap();
        sqlx::raw_sql(&sql).execute(pool).await.unwrap_or_else(|e| {
            panic!("Migration {} failed: {}", file, e);
        });
    }
}
