//! Backtest repository — run summaries and per-market results

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A persisted run (validation, strategy backtest, historical...)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BacktestRunRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub kind: String,
    pub config_json: String,
    pub summary_json: String,
    pub markets_analyzed: i64,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MarketResultRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub market_id: i64,
    pub question: Option<String>,
    pub predicted: Option<String>,
    pub actual: Option<String>,
    pub outcome: Option<String>,
    pub direction_score: Option<f64>,
    pub signal: Option<String>,
    pub insider_count: Option<i64>,
    /// Decimal as text
    pub pnl: Option<String>,
    pub detail_json: Option<String>,
}

pub struct BacktestRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BacktestRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or update a run (upsert by run_id)
    pub async fn save_run(&self, record: &BacktestRunRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"INSERT INTO backtest_runs
                (run_id, kind, config_json, summary_json, markets_analyzed, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, strftime('%s', 'now'))
               ON CONFLICT(run_id) DO UPDATE SET
                 kind = excluded.kind,
                 config_json = excluded.config_json,
                 summary_json = excluded.summary_json,
                 markets_analyzed = excluded.markets_analyzed
            "#,
        )
        .bind(&record.run_id)
        .bind(&record.kind)
        .bind(&record.config_json)
        .bind(&record.summary_json)
        .bind(record.markets_analyzed)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Replace the results of a run's markets in one transaction.
    /// Returns the number of rows written.
    pub async fn save_market_results(&self, results: &[MarketResultRecord]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0usize;
        for r in results {
            let result = sqlx::query(
                r#"INSERT OR REPLACE INTO market_results
                    (run_id, market_id, question, predicted, actual, outcome,
                     direction_score, signal, insider_count, pnl, detail_json)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )
            .bind(&r.run_id)
            .bind(r.market_id)
            .bind(&r.question)
            .bind(&r.predicted)
            .bind(&r.actual)
            .bind(&r.outcome)
            .bind(r.direction_score)
            .bind(&r.signal)
            .bind(r.insider_count)
            .bind(&r.pnl)
            .bind(&r.detail_json)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(written)
    }

    pub async fn get_run(&self, run_id: &str) -> DbResult<Option<BacktestRunRecord>> {
        let record = sqlx::query_as::<_, BacktestRunRecord>("SELECT * FROM backtest_runs WHERE run_id = ?1")
            .bind(run_id)
            .fetch_optional(self.pool)
            .await?;

        Ok(record)
    }

    /// Most recent runs first
    pub async fn list_runs(&self, limit: i64) -> DbResult<Vec<BacktestRunRecord>> {
        let records = sqlx::query_as::<_, BacktestRunRecord>(
            "SELECT * FROM backtest_runs ORDER BY created_at DESC, id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    pub async fn get_market_results(&self, run_id: &str) -> DbResult<Vec<MarketResultRecord>> {
        let records = sqlx::query_as::<_, MarketResultRecord>(
            "SELECT * FROM market_results WHERE run_id = ?1 ORDER BY market_id",
        )
        .bind(run_id)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Delete a run and its market results. Returns false if it did not exist.
    pub async fn delete_run(&self, run_id: &str) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM market_results WHERE run_id = ?1")
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM backtest_runs WHERE run_id = ?1")
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn run(run_id: &str, kind: &str) -> BacktestRunRecord {
        BacktestRunRecord {
            id: None,
            run_id: run_id.into(),
            kind: kind.into(),
            config_json: "{}".into(),
            summary_json: r#"{"total":2}"#.into(),
            markets_analyzed: 2,
            created_at: None,
        }
    }

    fn result(run_id: &str, market_id: i64, outcome: &str) -> MarketResultRecord {
        MarketResultRecord {
            id: None,
            run_id: run_id.into(),
            market_id,
            question: Some(format!("Market {}", market_id)),
            predicted: Some("NO".into()),
            actual: Some("NO".into()),
            outcome: Some(outcome.into()),
            direction_score: Some(-0.42),
            signal: Some("STRONG_NO".into()),
            insider_count: Some(7),
            pnl: Some("123.45".into()),
            detail_json: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_fetch_run() {
        let db = Database::in_memory().await.unwrap();
        let repo = BacktestRepository::new(db.pool());

        repo.save_run(&run("r1", "strategy")).await.unwrap();
        let written = repo
            .save_market_results(&[result("r1", 20, "WIN"), result("r1", 10, "LOSS")])
            .await
            .unwrap();
        assert_eq!(written, 2);

        let stored = repo.get_run("r1").await.unwrap().unwrap();
        assert_eq!(stored.kind, "strategy");
        assert_eq!(stored.markets_analyzed, 2);
        assert!(stored.created_at.is_some());

        let results = repo.get_market_results("r1").await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].market_id, 10);
        assert_eq!(results[1].pnl.as_deref(), Some("123.45"));
        assert!(repo.get_run("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_run_upserts() {
        let db = Database::in_memory().await.unwrap();
        let repo = BacktestRepository::new(db.pool());

        repo.save_run(&run("r1", "validation")).await.unwrap();
        let mut updated = run("r1", "validation");
        updated.summary_json = r#"{"total":5}"#.into();
        updated.markets_analyzed = 5;
        repo.save_run(&updated).await.unwrap();
        repo.save_run(&run("r2", "strategy")).await.unwrap();

        let runs = repo.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        let r1 = runs.iter().find(|r| r.run_id == "r1").unwrap();
        assert_eq!(r1.markets_analyzed, 5);
        assert_eq!(repo.list_runs(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_market_results_replace_and_delete() {
        let db = Database::in_memory().await.unwrap();
        let repo = BacktestRepository::new(db.pool());
        repo.save_run(&run("r1", "strategy")).await.unwrap();

        repo.save_market_results(&[result("r1", 1, "LOSS")]).await.unwrap();
        repo.save_market_results(&[result("r1", 1, "WIN")]).await.unwrap();
        let results = repo.get_market_results("r1").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome.as_deref(), Some("WIN"));

        assert!(repo.delete_run("r1").await.unwrap());
        assert!(!repo.delete_run("r1").await.unwrap());
        assert!(repo.get_market_results("r1").await.unwrap().is_empty());
    }
}
