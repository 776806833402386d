// =============================================================================
// Additive schema migrations, each a single all-or-nothing transaction
// =============================================================================

use sqlx::SqlitePool;
use tracing::{error, info};

struct Migration {
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_positions",
        sql: "CREATE TABLE IF NOT EXISTS positions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            isin TEXT NOT NULL,
            quantity TEXT NOT NULL,
            avg_cost TEXT NOT NULL,
            current_price TEXT NOT NULL,
            name TEXT NOT NULL,
            portfolio_id INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_positions_portfolio ON positions(portfolio_id);",
    },
    Migration {
        name: "0002_resolution_cache",
        sql: "CREATE TABLE IF NOT EXISTS resolution_cache (
            key TEXT PRIMARY KEY,
            isin TEXT,
            confidence TEXT NOT NULL,
            source TEXT NOT NULL,
            expires_at TEXT,
            low_confidence INTEGER NOT NULL DEFAULT 0
        );",
    },
    Migration {
        name: "0003_schema_migrations",
        sql: "CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    },
    Migration {
        name: "0004_hive_contribution_queue",
        sql: "CREATE TABLE IF NOT EXISTS hive_contribution_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rpc_name TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        );",
    },
];

/// Apply every migration not yet recorded in `schema_migrations`, each inside
/// its own transaction. A failure aborts the whole process at startup rather
/// than being swallowed.
pub async fn run(pool: &SqlitePool) -> anyhow::Result<()> {
    // The tracking table itself must exist before we can check it; this one
    // statement is allowed to run outside the loop below.
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (name TEXT PRIMARY KEY, applied_at TEXT NOT NULL)",
    )
    .execute(pool)
    .await?;

    for migration in MIGRATIONS {
        let already_applied: Option<(String,)> =
        sqlx::query_as("SELECT name FROM schema_migrations WHERE name = ?1")
        .bind(migration.name)
        .fetch_optional(pool)
        .await?;
        if already_applied.is_some() {
            continue;
        }

        let mut tx = pool.begin().await?;
        let apply_result: Result<(), sqlx::Error> = async {
            for statement in migration.sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO schema_migrations (name, applied_at) VALUES (?1, ?2)")
            .bind(migration.name)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
            Ok(())
        }
        .await;

        match apply_result {
            Ok(()) => {
                tx.commit().await?;
                info!(migration = migration.name, "applied schema migration");
            }
            Err(e) => {
                tx.rollback().await.ok();
                error!(migration = migration.name, error = %e, "migration failed, aborting startup");
                anyhow::bail!("migration '{}' failed: {e}", migration.name);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        run(&pool).await.unwrap();
        run(&pool).await.unwrap();

        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM schema_migrations")
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(rows.len(), MIGRATIONS.len());
    }
}
