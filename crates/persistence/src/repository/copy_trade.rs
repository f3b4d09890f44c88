//! Copy trade repository — ledger of copy trader decisions

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CopyTradeRecord {
    pub id: Option<i64>,
    pub trade_hash: String,
    pub target_wallet: String,
    pub condition_id: String,
    pub side: String,
    pub outcome: Option<String>,
    pub title: Option<String>,
    pub target_size: f64,
    pub target_price: f64,
    pub copy_size: f64,
    /// COPIED, SKIPPED or FAILED
    pub status: String,
    pub reason: Option<String>,
    // Added via migration
    pub order_id: Option<String>,
    pub created_at: Option<i64>,
}

pub struct CopyTradeRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CopyTradeRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a decision (INSERT OR IGNORE by trade_hash).
    /// Returns true if the row is new.
    pub async fn record(&self, r: &CopyTradeRecord) -> DbResult<bool> {
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO copy_trades
                (trade_hash, target_wallet, condition_id, side, outcome, title,
                 target_size, target_price, copy_size, status, reason, order_id)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&r.trade_hash)
        .bind(&r.target_wallet)
        .bind(&r.condition_id)
        .bind(&r.side)
        .bind(&r.outcome)
        .bind(&r.title)
        .bind(r.target_size)
        .bind(r.target_price)
        .bind(r.copy_size)
        .bind(&r.status)
        .bind(&r.reason)
        .bind(&r.order_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_recent(&self, limit: i64) -> DbResult<Vec<CopyTradeRecord>> {
        let records = sqlx::query_as::<_, CopyTradeRecord>(
            "SELECT * FROM copy_trades ORDER BY created_at DESC, id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// (status, count) pairs, most frequent first
    pub async fn count_by_status(&self) -> DbResult<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM copy_trades GROUP BY status ORDER BY COUNT(*) DESC, status",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn decision(hash: &str, status: &str) -> CopyTradeRecord {
        CopyTradeRecord {
            id: None,
            trade_hash: hash.into(),
            target_wallet: "0xtarget".into(),
            condition_id: "0xcond".into(),
            side: "BUY".into(),
            outcome: Some("Yes".into()),
            title: Some("Will it rain?".into()),
            target_size: 100.0,
            target_price: 0.5,
            copy_size: 20.0,
            status: status.into(),
            reason: None,
            order_id: None,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_record_deduplicates_by_hash() {
        let db = Database::in_memory().await.unwrap();
        let repo = CopyTradeRepository::new(db.pool());

        assert!(repo.record(&decision("h1", "COPIED")).await.unwrap());
        assert!(!repo.record(&decision("h1", "SKIPPED")).await.unwrap());
        assert!(repo.record(&decision("h2", "SKIPPED")).await.unwrap());
        assert!(repo.record(&decision("h3", "SKIPPED")).await.unwrap());

        let recent = repo.list_recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].trade_hash, "h3");

        let counts = repo.count_by_status().await.unwrap();
        assert_eq!(counts, vec![("SKIPPED".to_string(), 2), ("COPIED".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_migrated_order_id_column() {
        let db = Database::in_memory().await.unwrap();
        let repo = CopyTradeRepository::new(db.pool());
        let mut d = decision("h1", "COPIED");
        d.order_id = Some("paper-1".into());
        repo.record(&d).await.unwrap();
        let stored = repo.list_recent(1).await.unwrap();
        assert_eq!(stored[0].order_id.as_deref(), Some("paper-1"));
    }
}
