// =============================================================================
// Position store — SQLite-backed, transactional additive migrations
// =============================================================================
//
// Migrations run as a single transaction each; a failure rolls back and
// aborts startup rather than serving requests against a half-migrated
// schema (propagation policy, design notes).
// =============================================================================

pub mod migrations;

use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::error::EngineResult;
use crate::types::Position;

pub struct PositionStore {
    pool: SqlitePool,
}

impl PositionStore {
    pub async fn connect(path: &std::path::Path) -> anyhow::Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new().max_connections(4).connect(&url).await?;
        migrations::run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[cfg(test)]
    pub fn from_pool_for_test(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace all positions for `portfolio_id` within a single transaction —
    /// used by `sync_portfolio`, which must finish in O(seconds) and never
    /// trigger any enrichment or aggregation work (universal invariant).
    pub async fn replace_positions(&self, portfolio_id: i64, positions: &[Position]) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM positions WHERE portfolio_id = ?1")
        .bind(portfolio_id)
        .execute(&mut *tx)
        .await?;

        for p in positions {
            sqlx::query(
                "INSERT INTO positions (isin, quantity, avg_cost, current_price, name, portfolio_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&p.isin)
            .bind(p.quantity.to_string())
            .bind(p.avg_cost.to_string())
            .bind(p.current_price.to_string())
            .bind(&p.name)
            .bind(p.portfolio_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn load_positions(&self, portfolio_id: i64) -> EngineResult<Vec<Position>> {
        let rows = sqlx::query_as::<_, PositionRow>(
            "SELECT isin, quantity, avg_cost, current_price, name, portfolio_id
            FROM positions WHERE portfolio_id = ?1",
        )
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(PositionRow::into_position).collect())
    }
}

#[derive(sqlx::FromRow)]
struct PositionRow {
    isin: String,
    quantity: String,
    avg_cost: String,
    current_price: String,
    name: String,
    portfolio_id: i64,
}

impl PositionRow {
    fn into_position(self) -> Option<Position> {
        Some(Position {
                isin: self.isin,
                quantity: self.quantity.parse::<Decimal>().ok()?,
                avg_cost: self.avg_cost.parse::<Decimal>().ok()?,
                current_price: self.current_price.parse::<Decimal>().ok()?,
                name: self.name,
                portfolio_id: self.portfolio_id,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn fresh_store() -> PositionStore {
        let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
        migrations::run(&pool).await.unwrap();
        PositionStore { pool }
    }

    #[tokio::test]
    async fn replace_then_load_round_trips() {
        let store = fresh_store().await;
        let positions = vec![Position {
                isin: "XF000BTC0017".into(),
                quantity: dec!(0.000231),
                avg_cost: dec!(50000),
                current_price: dec!(74372.29),
                name: "Bitcoin XBT Tracker".into(),
                portfolio_id: 1,
            }];
        store.replace_positions(1, &positions).await.unwrap();
        let loaded = store.load_positions(1).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].isin, "XF000BTC0017");
    }

    #[tokio::test]
    async fn replace_clears_prior_rows_for_same_portfolio() {
        let store = fresh_store().await;
        let first = vec![Position {
                isin: "US0378331005".into(),
                quantity: dec!(1),
                avg_cost: dec!(100),
                current_price: dec!(100),
                name: "Apple".into(),
                portfolio_id: 1,
            }];
        store.replace_positions(1, &first).await.unwrap();
        store.replace_positions(1, &[]).await.unwrap();
        assert!(store.load_positions(1).await.unwrap().is_empty());
    }
}
