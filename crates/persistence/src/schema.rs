//! Database schema definitions

/// SQL to create all tables
/// NOTE: Decimal PnL values are stored as TEXT to keep rust_decimal precision
pub const CREATE_TABLES: &str = r#"
-- One row per backtest or validation run
CREATE TABLE IF NOT EXISTS backtest_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    config_json TEXT NOT NULL,
    summary_json TEXT NOT NULL,
    markets_analyzed INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Per-market outcome of a run
CREATE TABLE IF NOT EXISTS market_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES backtest_runs(run_id) ON DELETE CASCADE,
    market_id INTEGER NOT NULL,
    question TEXT,
    predicted TEXT,
    actual TEXT,
    outcome TEXT,
    direction_score REAL,
    signal TEXT,
    insider_count INTEGER,
    pnl TEXT,
    detail_json TEXT,
    UNIQUE(run_id, market_id)
);

-- Copy trader decisions (copied or skipped), deduplicated by hash
CREATE TABLE IF NOT EXISTS copy_trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trade_hash TEXT NOT NULL UNIQUE,
    target_wallet TEXT NOT NULL,
    condition_id TEXT NOT NULL,
    side TEXT NOT NULL,
    outcome TEXT,
    title TEXT,
    target_size REAL NOT NULL DEFAULT 0,
    target_price REAL NOT NULL DEFAULT 0,
    copy_size REAL NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    reason TEXT,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_runs_kind ON backtest_runs(kind, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_results_run ON market_results(run_id);
CREATE INDEX IF NOT EXISTS idx_copy_wallet ON copy_trades(target_wallet, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_copy_status ON copy_trades(status)
"#;

/// Column additions applied after CREATE_TABLES.
/// "duplicate column name" failures are expected on existing databases.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE copy_trades ADD COLUMN order_id TEXT",
];
