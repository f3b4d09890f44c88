//! Poly-Insider - insider-wallet detection and backtesting for Polymarket
//!
//! Usage:
//!   poly-insider validate --sample 50          - Batch validation on resolved markets
//!   poly-insider backtest --target 200         - Scan-and-enter strategy backtest
//!   poly-insider signal 12345 --price 0.42     - Current signal for one market
//!   poly-insider copy --target 0xabc...        - Paper copy trader
//!   poly-insider serve --port 3001             - JSON API

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use engine::backtest::{MarketValidation, StrategyTradeResult};
use engine::{
    analyze_signal, backtest_market, infer_market_winner, run_copy_trader, run_historical_backtest,
    run_strategy_backtest, run_validation, write_report, write_report_to, AnalysisConfig, BacktestProgress,
    BacktestStatus, CopyProgress, CopyTraderConfig, DataExtractor, ExtractorConfig, HistoricalConfig,
    MarketCatalog, OutcomeToken, PaperExecutor, PolymarketClient, ResolutionParams, StrategyBacktestConfig,
    StrategyBacktestReport, StrategyConfig, TradingStrategy, ValidationReport,
};
use persistence::repository::{BacktestRepository, BacktestRunRecord, CopyTradeRepository, MarketResultRecord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "poly-insider")]
#[command(about = "Insider-wallet detection and backtesting for Polymarket", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the JSON API server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
    /// Extract market trades from the archive into the per-market cache
    Extract {
        /// Market ids (comma-separated)
        #[arg(value_delimiter = ',', required = true)]
        market_ids: Vec<u64>,
        /// Ignore existing cache files
        #[arg(long)]
        no_cache: bool,
    },
    /// Validate direction predictions against resolved outcomes
    Validate {
        /// Market ids (comma-separated); sampled from the catalog when empty
        #[arg(long, value_delimiter = ',')]
        markets: Vec<u64>,
        /// Number of resolved markets to sample
        #[arg(long, default_value_t = 50)]
        sample: usize,
        /// Minimum market volume for sampling (USD)
        #[arg(long, default_value_t = 10_000.0)]
        min_volume: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Wallet-day score needed to count as an insider
        #[arg(long, default_value_t = 80)]
        min_score: u32,
        #[arg(long, default_value_t = 30)]
        lookback_days: i64,
        /// Report path (default: output dir)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Do not persist the run
        #[arg(long)]
        no_db: bool,
    },
    /// Run the scan-and-enter strategy backtest over cached markets
    Backtest {
        /// Markets with a detection to collect
        #[arg(long, default_value_t = 200)]
        target: usize,
        #[arg(long, default_value_t = 8)]
        threads: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Scan window before the end date (days)
        #[arg(long, default_value_t = 5)]
        window_days: i64,
        #[arg(long, default_value_t = 10)]
        scan_points: usize,
        /// |direction score| needed at a scan point
        #[arg(long, default_value_t = 0.25)]
        threshold: f64,
        #[arg(long, default_value_t = 3)]
        min_insiders: usize,
        #[arg(long, default_value_t = 100_000.0)]
        min_volume: f64,
        #[arg(long, default_value = "10000")]
        capital: Decimal,
        /// Report path (default: output dir)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Do not persist the run
        #[arg(long)]
        no_db: bool,
    },
    /// Generate a trading signal for one market
    Signal {
        market_id: u64,
        /// Current price of the YES token
        #[arg(long)]
        price: Option<f64>,
        /// Analysis time (RFC 3339); defaults to 1h before close or the last trade
        #[arg(long)]
        at: Option<String>,
        #[arg(long, default_value_t = 80)]
        min_score: u32,
        #[arg(long, default_value_t = 30)]
        lookback_days: i64,
        /// Write the full report as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Backtest the strategy on one resolved market
    MarketBacktest {
        market_id: u64,
        /// Simulate this many days before close
        #[arg(long, default_value_t = 7)]
        days_before: i64,
    },
    /// Score wallets at a past time and compare with their settled PnL
    Historical {
        market_id: u64,
        /// Simulation time (RFC 3339); defaults to `days_before` days before close
        #[arg(long)]
        at: Option<String>,
        #[arg(long, default_value_t = 7)]
        days_before: i64,
        /// Winning outcome (YES/NO); inferred from the final trades when omitted
        #[arg(long)]
        winner: Option<String>,
        #[arg(long, default_value_t = 20)]
        top_n: usize,
        #[arg(long, default_value_t = 1_000.0)]
        min_volume: f64,
        /// Report path (default: output dir)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Mirror a wallet's trades with a paper executor
    Copy {
        /// Wallet to copy
        #[arg(long)]
        target: String,
        #[arg(long, default_value_t = 0.1)]
        ratio: f64,
        #[arg(long, default_value_t = 50.0)]
        max_usd: f64,
        #[arg(long, default_value_t = 1.0)]
        min_usd: f64,
        #[arg(long, default_value_t = 200.0)]
        daily_loss_limit: f64,
        #[arg(long, default_value_t = 10)]
        max_open: usize,
        #[arg(long, default_value_t = 2.0)]
        max_slippage_pct: f64,
        #[arg(long, default_value_t = 5_000.0)]
        min_liquidity: f64,
        #[arg(long, default_value_t = 30)]
        max_age_secs: i64,
        /// Market slugs to never copy (comma-separated)
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
        /// Also copy trades where the target was the maker
        #[arg(long)]
        copy_maker: bool,
        #[arg(long, default_value_t = 3)]
        interval: u64,
        /// Do not record decisions in the database
        #[arg(long)]
        no_db: bool,
    },
    /// List persisted runs, or show one run's market results
    Runs {
        run_id: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Clone)]
struct AppState {
    db: Arc<persistence::Database>,
    backtest_progress: Arc<BacktestProgress>,
    archive_dir: PathBuf,
    output_dir: PathBuf,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,poly_insider=debug")
    } else {
        EnvFilter::new("info,engine=info,poly_insider=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn archive_dir() -> PathBuf {
    PathBuf::from(std::env::var("POLY_INSIDER_ARCHIVE_DIR").unwrap_or_else(|_| "archive".to_string()))
}

fn output_dir() -> PathBuf {
    PathBuf::from(std::env::var("POLY_INSIDER_OUTPUT_DIR").unwrap_or_else(|_| "output".to_string()))
}

fn db_path() -> String {
    std::env::var("POLY_INSIDER_DB_PATH").unwrap_or_else(|_| "data/insider.db".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(&host, port).await?;
        }
        Commands::Extract { market_ids, no_cache } => {
            cmd_extract(market_ids, no_cache).await?;
        }
        Commands::Validate {
            markets,
            sample,
            min_volume,
            seed,
            min_score,
            lookback_days,
            output,
            no_db,
        } => {
            let config = AnalysisConfig {
                min_insider_score: min_score,
                lookback_days,
                ..AnalysisConfig::default()
            };
            cmd_validate(markets, sample, min_volume, seed, config, output, no_db).await?;
        }
        Commands::Backtest {
            target,
            threads,
            seed,
            window_days,
            scan_points,
            threshold,
            min_insiders,
            min_volume,
            capital,
            output,
            no_db,
        } => {
            let config = StrategyBacktestConfig {
                target_results: target,
                threads,
                seed,
                scan_window_days: window_days,
                scan_points,
                signal_threshold: threshold,
                min_insiders,
                min_volume,
                initial_capital: capital,
                ..StrategyBacktestConfig::default()
            };
            cmd_backtest(config, output, no_db).await?;
        }
        Commands::Signal {
            market_id,
            price,
            at,
            min_score,
            lookback_days,
            output,
        } => {
            let strategy = StrategyConfig {
                insider_min_score: min_score,
                insider_lookback_days: lookback_days,
                ..StrategyConfig::default()
            };
            cmd_signal(market_id, price, at, strategy, output).await?;
        }
        Commands::MarketBacktest { market_id, days_before } => {
            cmd_market_backtest(market_id, days_before).await?;
        }
        Commands::Historical {
            market_id,
            at,
            days_before,
            winner,
            top_n,
            min_volume,
            output,
        } => {
            cmd_historical(market_id, at, days_before, winner, top_n, min_volume, output).await?;
        }
        Commands::Copy {
            target,
            ratio,
            max_usd,
            min_usd,
            daily_loss_limit,
            max_open,
            max_slippage_pct,
            min_liquidity,
            max_age_secs,
            exclude,
            copy_maker,
            interval,
            no_db,
        } => {
            let config = CopyTraderConfig {
                target_wallet: target,
                position_ratio: ratio,
                max_position_usd: max_usd,
                min_position_usd: min_usd,
                daily_loss_limit,
                max_open_positions: max_open,
                max_slippage_pct,
                min_liquidity,
                max_trade_age_secs: max_age_secs,
                excluded_markets: exclude,
                copy_maker_trades: copy_maker,
                poll_interval_secs: interval,
                dry_run: true,
            };
            cmd_copy(config, no_db).await?;
        }
        Commands::Runs { run_id, limit } => {
            cmd_runs(run_id, limit).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Shared helpers
// ============================================================================

async fn open_db() -> anyhow::Result<persistence::Database> {
    let path = db_path();
    let db = persistence::Database::new(&path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database opened: {}", path);
    Ok(db)
}

fn load_catalog(archive: &Path) -> anyhow::Result<MarketCatalog> {
    Ok(MarketCatalog::load(archive.join("markets.csv"))?)
}

fn parse_time(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw).map_err(|e| anyhow::anyhow!("Invalid time '{}': {}", raw, e))?;
    Ok(parsed.with_timezone(&Utc))
}

fn parse_outcome(raw: &str) -> anyhow::Result<OutcomeToken> {
    match raw.trim().to_uppercase().as_str() {
        "YES" => Ok(OutcomeToken::Yes),
        "NO" => Ok(OutcomeToken::No),
        other => anyhow::bail!("Unknown outcome '{}', expected YES or NO", other),
    }
}

fn new_run_id(kind: &str) -> String {
    format!("{}_{}", kind, Utc::now().format("%Y%m%d_%H%M%S"))
}

/// Serialized name of a serde unit enum (`"WIN"`, `"STRONG_NO"`...)
fn serde_label<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
}

fn save_report<T: Serialize>(report: &T, output: Option<PathBuf>, kind: &str) -> anyhow::Result<PathBuf> {
    match output {
        Some(path) => {
            write_report_to(report, &path)?;
            Ok(path)
        }
        None => write_report(report, output_dir(), kind),
    }
}

fn validation_records(run_id: &str, results: &[MarketValidation]) -> Vec<MarketResultRecord> {
    results
        .iter()
        .map(|r| MarketResultRecord {
            id: None,
            run_id: run_id.to_string(),
            market_id: r.market_id as i64,
            question: Some(r.question.clone()),
            predicted: Some(r.predicted.to_string()),
            actual: Some(r.actual.to_string()),
            outcome: Some(if r.correct { "CORRECT" } else { "WRONG" }.to_string()),
            direction_score: Some(r.direction_score),
            signal: Some(r.signal.to_string()),
            insider_count: Some(r.total_insiders as i64),
            pnl: None,
            detail_json: serde_json::to_string(r).ok(),
        })
        .collect()
}

fn strategy_records(run_id: &str, results: &[StrategyTradeResult]) -> Vec<MarketResultRecord> {
    results
        .iter()
        .map(|r| MarketResultRecord {
            id: None,
            run_id: run_id.to_string(),
            market_id: r.market_id as i64,
            question: Some(r.question.clone()),
            predicted: Some(r.predicted.to_string()),
            actual: Some(r.actual.to_string()),
            outcome: serde_label(&r.outcome),
            direction_score: Some(r.direction_score),
            signal: Some(r.strength.as_str().to_string()),
            insider_count: Some(r.total_insiders as i64),
            pnl: Some(r.pnl.to_string()),
            detail_json: serde_json::to_string(r).ok(),
        })
        .collect()
}

async fn persist_validation(db: &persistence::Database, run_id: &str, report: &ValidationReport) -> anyhow::Result<()> {
    let repo = BacktestRepository::new(db.pool());
    repo.save_run(&BacktestRunRecord {
        id: None,
        run_id: run_id.to_string(),
        kind: "validation".to_string(),
        config_json: serde_json::to_string(&report.config)?,
        summary_json: serde_json::to_string(&report.summary)?,
        markets_analyzed: report.summary.total as i64,
        created_at: None,
    })
    .await?;
    let written = repo
        .save_market_results(&validation_records(run_id, &report.results))
        .await?;
    info!(run_id, markets = written, "Validation run persisted");
    Ok(())
}

async fn persist_strategy(
    pool: &persistence::SqlitePool,
    run_id: &str,
    report: &StrategyBacktestReport,
) -> anyhow::Result<()> {
    let repo = BacktestRepository::new(pool);
    let config = serde_json::json!({
        "backtest": report.config,
        "strategy": report.strategy,
    });
    repo.save_run(&BacktestRunRecord {
        id: None,
        run_id: run_id.to_string(),
        kind: "strategy".to_string(),
        config_json: config.to_string(),
        summary_json: serde_json::to_string(&report.summary)?,
        markets_analyzed: report.summary.markets_evaluated as i64,
        created_at: None,
    })
    .await?;
    let written = repo
        .save_market_results(&strategy_records(run_id, &report.results))
        .await?;
    info!(run_id, markets = written, "Strategy backtest persisted");
    Ok(())
}

// ============================================================================
// Serve command - Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    info!("Poly-Insider v{} starting...", APP_VERSION);

    let db = open_db().await?;

    let state = AppState {
        db: Arc::new(db),
        backtest_progress: Arc::new(BacktestProgress::new()),
        archive_dir: archive_dir(),
        output_dir: output_dir(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/backtest", post(api_start_backtest))
        .route("/backtest/status", get(api_backtest_status))
        .route("/backtest/cancel", post(api_cancel_backtest))
        .route("/runs", get(api_list_runs))
        .route("/runs/:run_id", get(api_get_run))
        .with_state(state.clone());

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Poly-Insider v{} ===", APP_VERSION);
    println!("Insider Detection Server");
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health              - Health check");
    println!("  POST /api/backtest            - Start strategy backtest");
    println!("  GET  /api/backtest/status     - Poll backtest progress");
    println!("  POST /api/backtest/cancel     - Cancel running backtest");
    println!("  GET  /api/runs                - Persisted runs");
    println!("  GET  /api/runs/:run_id        - One run with market results");
    println!("\n  Archive:  {}", state.archive_dir.display());
    println!("  Database: {}", db_path());
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Extract command
// ============================================================================

async fn cmd_extract(market_ids: Vec<u64>, no_cache: bool) -> anyhow::Result<()> {
    let mut config = ExtractorConfig::from_archive_dir(archive_dir());
    config.use_cache = !no_cache;
    println!("\n=== Poly-Insider v{} ===", APP_VERSION);
    println!("Archive: {}", config.trades_file.display());
    println!("Cache:   {}\n", config.cache_dir.display());

    let extractor = DataExtractor::new(config);
    let counts: Vec<(u64, usize)> = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<(u64, usize)>> {
        if let [market_id] = market_ids.as_slice() {
            let market_id = *market_id;
            let trades = extractor.extract_single_market(market_id)?;
            return Ok(vec![(market_id, trades.len())]);
        }
        let found = extractor.extract_multiple_markets(&market_ids)?;
        Ok(market_ids
            .iter()
            .map(|id| (*id, found.get(id).map_or(0, |t| t.len())))
            .collect())
    })
    .await??;

    println!("  {:>10}  {:>10}", "Market", "Trades");
    println!("  {}", "-".repeat(22));
    for (market_id, trades) in &counts {
        println!("  {:>10}  {:>10}", market_id, trades);
    }
    let missing = counts.iter().filter(|(_, n)| *n == 0).count();
    if missing > 0 {
        println!("\n{} market(s) had too few trades and were not cached", missing);
    }
    Ok(())
}

// ============================================================================
// Validate command
// ============================================================================

async fn cmd_validate(
    markets: Vec<u64>,
    sample: usize,
    min_volume: f64,
    seed: u64,
    config: AnalysisConfig,
    output: Option<PathBuf>,
    no_db: bool,
) -> anyhow::Result<()> {
    println!("\n=== Poly-Insider v{} ===", APP_VERSION);

    let archive = archive_dir();
    let catalog = load_catalog(&archive)?;
    let market_ids = if markets.is_empty() {
        let ids = catalog.sample_resolved(sample, min_volume, &HashSet::new(), seed);
        println!(
            "Sampled {} resolved markets (volume >= ${:.0}, seed {})",
            ids.len(),
            min_volume,
            seed
        );
        ids
    } else {
        markets
    };
    if market_ids.is_empty() {
        anyhow::bail!("No markets to validate");
    }
    println!(
        "Validating {} markets | min score {} | lookback {}d\n",
        market_ids.len(),
        config.min_insider_score,
        config.lookback_days
    );

    let extractor = DataExtractor::new(ExtractorConfig::from_archive_dir(&archive));
    let report = tokio::task::spawn_blocking(move || run_validation(&market_ids, &extractor, &catalog, &config, None))
        .await??;

    let s = &report.summary;
    println!("Results:");
    println!("  Validated: {} of {} requested", s.total, s.markets_requested);
    println!("  Correct:   {} ({:.1}%)", s.correct, s.accuracy);
    match s.p_value {
        Some(p) => println!(
            "  p-value:   {:.4}{}",
            p,
            if s.significant { " (significant)" } else { "" }
        ),
        None => println!("  p-value:   n/a (fewer than 10 markets)"),
    }
    println!(
        "  Skipped:   {} no trades, {} no market info, {} uncertain outcome, {} no insiders",
        s.skipped.no_trades, s.skipped.no_market_info, s.skipped.uncertain_outcome, s.skipped.no_insiders
    );
    if !s.by_signal.is_empty() {
        println!("\n  {:<12} {:>6} {:>8} {:>9}", "Signal", "Total", "Correct", "Accuracy");
        for (label, acc) in &s.by_signal {
            println!(
                "  {:<12} {:>6} {:>8} {:>8.1}%",
                label.as_str(),
                acc.total,
                acc.correct,
                acc.accuracy
            );
        }
    }

    let path = save_report(&report, output, "validation")?;
    println!("\nReport written to {}", path.display());

    if !no_db {
        let db = open_db().await?;
        let run_id = new_run_id("validation");
        persist_validation(&db, &run_id, &report).await?;
        println!("Run saved as {}", run_id);
    }
    Ok(())
}

// ============================================================================
// Backtest command - strategy backtest with a progress bar
// ============================================================================

async fn cmd_backtest(config: StrategyBacktestConfig, output: Option<PathBuf>, no_db: bool) -> anyhow::Result<()> {
    println!("\n=== Poly-Insider v{} ===", APP_VERSION);

    let archive = archive_dir();
    let catalog = load_catalog(&archive)?;
    let extractor = DataExtractor::new(ExtractorConfig::from_archive_dir(&archive));
    println!(
        "Target: {} results | Threads: {} | Seed: {} | Threshold: {:.2} | Capital: ${}",
        config.target_results, config.threads, config.seed, config.signal_threshold, config.initial_capital
    );
    println!("Press Ctrl+C to stop early\n");

    let progress = Arc::new(BacktestProgress::new());
    progress.reset("strategy");

    let progress_for_ctrlc = progress.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, requesting cancel...");
        progress_for_ctrlc.cancelled.store(true, Ordering::Relaxed);
    });

    let progress_clone = progress.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let strategy = TradingStrategy::new(StrategyConfig::default());
        run_strategy_backtest(&extractor, &catalog, &config, &strategy, &progress_clone)
    });

    // Progress display loop
    while !handle.is_finished() {
        tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
        let status = *progress.status.read().unwrap();
        if !matches!(status, BacktestStatus::Running) {
            continue;
        }
        let completed = progress.completed.load(Ordering::Relaxed);
        let total = progress.total.load(Ordering::Relaxed);
        let skipped = progress.skipped.load(Ordering::Relaxed);
        let pct = progress.progress_pct();

        let bar_len = 30;
        let filled = (pct as usize * bar_len) / 100;
        let bar: String = "=".repeat(filled) + &" ".repeat(bar_len - filled);
        print!(
            "\r  Scanning [{}] {:.0}% ({}/{}, {} skipped)   ",
            bar, pct, completed, total, skipped
        );
    }

    let report = match handle.await? {
        Ok(report) => report,
        Err(e) => {
            println!("\r  Error: {}                                      ", e);
            return Err(e);
        }
    };
    let status = *progress.status.read().unwrap();
    println!(
        "\r  {} ({} markets evaluated)                                      ",
        if matches!(status, BacktestStatus::Cancelled) {
            "Cancelled"
        } else {
            "Complete!"
        },
        report.summary.markets_evaluated
    );

    print_strategy_summary(&report);

    let path = save_report(&report, output, "strategy_backtest")?;
    println!("\nReport written to {}", path.display());

    if !no_db {
        let db = open_db().await?;
        let run_id = new_run_id("strategy");
        persist_strategy(db.pool(), &run_id, &report).await?;
        println!("Run saved as {}", run_id);
    }
    Ok(())
}

fn print_strategy_summary(report: &StrategyBacktestReport) {
    let s = &report.summary;
    println!("\nResults:");
    println!(
        "  Trades: {} | Wins: {} | Losses: {} | No trade: {}",
        s.trades, s.wins, s.losses, s.no_trades
    );
    println!(
        "  Win rate: {:.1}% | Invested: ${:.2} | PnL: ${:.2} | ROI: {:+.2}%",
        s.win_rate, s.total_invested, s.total_pnl, s.roi
    );
    println!(
        "  Avg entry: {:.3} | Avg hours before close: {:.1}",
        s.avg_entry_price, s.avg_hours_before_close
    );
    if let Some(p) = s.p_value {
        println!(
            "  p-value: {:.4}{}",
            p,
            if s.significant { " (significant)" } else { "" }
        );
    }
    if !s.by_strength.is_empty() {
        println!("\n  {:<10} {:>7} {:>6} {:>12}", "Strength", "Trades", "Wins", "PnL");
        for (strength, stats) in &s.by_strength {
            println!(
                "  {:<10} {:>7} {:>6} {:>12.2}",
                strength.as_str(),
                stats.trades,
                stats.wins,
                stats.pnl
            );
        }
    }
    if !s.skipped.is_empty() {
        let parts: Vec<String> = s
            .skipped
            .iter()
            .map(|(reason, n)| format!("{}={}", serde_label(reason).unwrap_or_default(), n))
            .collect();
        println!("\n  Skipped: {}", parts.join(", "));
    }
}

// ============================================================================
// Signal / single-market backtest / historical
// ============================================================================

async fn cmd_signal(
    market_id: u64,
    yes_price: Option<f64>,
    at: Option<String>,
    strategy: StrategyConfig,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let at = at.as_deref().map(parse_time).transpose()?;
    let archive = archive_dir();
    let catalog = match load_catalog(&archive) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(error = %e, "Market catalog unavailable, continuing without metadata");
            None
        }
    };
    let extractor = DataExtractor::new(ExtractorConfig::from_archive_dir(&archive));
    let trades = tokio::task::spawn_blocking(move || extractor.extract_single_market(market_id)).await??;
    if trades.is_empty() {
        anyhow::bail!("No trades found for market {}", market_id);
    }

    let market = catalog.as_ref().and_then(|c| c.get(market_id));
    let strategy = TradingStrategy::new(strategy);
    // Price the predicted token: the signal is generated first without a
    // price to learn the direction
    let probe = analyze_signal(market_id, &trades, market, &strategy, None, at);
    let token_price = yes_price.map(|p| match probe.signal.direction {
        engine::Direction::No => 1.0 - p,
        _ => p,
    });
    let report = analyze_signal(market_id, &trades, market, &strategy, token_price, Some(probe.as_of));

    let sig = &report.signal;
    println!("\n=== Signal for market {} ===", market_id);
    if let Some(m) = &report.market {
        println!("  {}", m.question);
    }
    println!("  As of:      {}", report.as_of.to_rfc3339());
    println!("  Action:     {:?}", sig.action);
    println!(
        "  Direction:  {} ({}, score {:+.3})",
        sig.direction, sig.signal, sig.direction_score
    );
    println!(
        "  Strength:   {} | {} consistent days | {} insiders",
        sig.strength.as_str(),
        sig.consistent_days,
        sig.total_insiders
    );
    if let Some(p) = sig.current_price {
        println!("  Price:      {:.3}", p);
    }
    println!(
        "  Entry:      target {:.3} / max {:.3} | position {:.1}%",
        sig.target_entry,
        sig.max_entry,
        sig.position_pct * 100.0
    );
    println!("  Reason:     {}", sig.reason);

    if let Some(path) = output {
        write_report_to(&report, &path)?;
        println!("\nReport written to {}", path.display());
    }
    Ok(())
}

async fn cmd_market_backtest(market_id: u64, days_before: i64) -> anyhow::Result<()> {
    let archive = archive_dir();
    let catalog = load_catalog(&archive)?;
    let Some(market) = catalog.get(market_id).cloned() else {
        anyhow::bail!("Market {} not found in catalog", market_id);
    };
    let extractor = DataExtractor::new(ExtractorConfig::from_archive_dir(&archive));
    let trades = tokio::task::spawn_blocking(move || extractor.extract_single_market(market_id)).await??;

    let strategy = TradingStrategy::new(StrategyConfig::default());
    let result = backtest_market(&trades, &market, &strategy, days_before)?;

    println!("\n=== Backtest for market {} ===", market_id);
    println!("  {}", result.question);
    println!(
        "  Simulated at {} ({} days before close)",
        result.simulation_time.to_rfc3339(),
        days_before
    );
    println!("  YES price:  {:.3}", result.yes_price);
    println!(
        "  Signal:     {:?} {} (score {:+.3}, {})",
        result.signal.action,
        result.signal.direction,
        result.signal.direction_score,
        result.signal.strength.as_str()
    );
    println!(
        "  Actual:     {}",
        result.actual.map_or("UNKNOWN".to_string(), |a| a.to_string())
    );
    println!(
        "  Outcome:    {} | entry {} | pnl/$ {:+.3}",
        serde_label(&result.outcome).unwrap_or_default(),
        result.entry_price.map_or("-".to_string(), |p| format!("{:.3}", p)),
        result.pnl_per_dollar
    );
    Ok(())
}

async fn cmd_historical(
    market_id: u64,
    at: Option<String>,
    days_before: i64,
    winner: Option<String>,
    top_n: usize,
    min_volume: f64,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let archive = archive_dir();
    let extractor = DataExtractor::new(ExtractorConfig::from_archive_dir(&archive));
    let trades = tokio::task::spawn_blocking(move || extractor.extract_single_market(market_id)).await??;
    if trades.is_empty() {
        anyhow::bail!("No trades found for market {}", market_id);
    }

    let winning = match winner {
        Some(w) => parse_outcome(&w)?,
        None => match infer_market_winner(&trades, &ResolutionParams::strict()) {
            Some(w) => {
                info!(market_id, winner = %w, "Winner inferred from final trades");
                w
            }
            None => anyhow::bail!("Could not infer the winner of market {}; pass --winner", market_id),
        },
    };

    let simulation_time = match at {
        Some(raw) => parse_time(&raw)?,
        None => {
            let catalog = load_catalog(&archive)?;
            let Some(closed) = catalog.closed_time(market_id) else {
                anyhow::bail!("Market {} has no close time; pass --at", market_id);
            };
            closed - Duration::days(days_before)
        }
    };

    let mut config = HistoricalConfig::new(market_id, simulation_time, winning);
    config.top_n = top_n;
    config.min_volume_usd = min_volume;
    let report = run_historical_backtest(&trades, &config);

    println!("\n=== Historical wallet backtest: market {} ===", market_id);
    println!(
        "  Simulated at {} | winner {} | {} of {} trades before simulation",
        simulation_time.to_rfc3339(),
        winning,
        report.trades_before_simulation,
        report.trades_total
    );
    println!(
        "  Wallets scored: {} | score/pnl correlation: {:.3} | top-{} overlap: {} | top correct side: {:.1}%",
        report.wallets_scored, report.correlation, top_n, report.top_n_overlap, report.top_correct_side_rate
    );
    println!("\n  {:>3}  {:<44} {:>5} {:>12} {:>12}", "#", "Wallet", "Score", "Volume", "PnL");
    println!("  {}", "-".repeat(80));
    for (i, w) in report.top_candidates.iter().enumerate() {
        println!(
            "  {:>3}  {:<44} {:>5} {:>12.2} {:>+12.2}",
            i + 1,
            w.address,
            w.score,
            w.volume,
            w.settlement.pnl
        );
    }

    let path = save_report(&report, output, "historical")?;
    println!("\nReport written to {}", path.display());
    Ok(())
}

// ============================================================================
// Copy command - paper copy trader until Ctrl+C
// ============================================================================

async fn cmd_copy(config: CopyTraderConfig, no_db: bool) -> anyhow::Result<()> {
    println!("\n=== Poly-Insider v{} ===", APP_VERSION);
    println!("Paper copy trader, target {}", config.target_wallet);
    println!(
        "Ratio: {:.2} | Size: ${:.2}-${:.2} | Max open: {} | Poll: {}s",
        config.position_ratio,
        config.min_position_usd,
        config.max_position_usd,
        config.max_open_positions,
        config.poll_interval_secs
    );
    println!("Press Ctrl+C to stop\n");

    let db = if no_db { None } else { Some(open_db().await?) };
    let client = PolymarketClient::new()?;
    let executor = PaperExecutor::new();
    let progress = Arc::new(CopyProgress::new());

    let progress_for_ctrlc = progress.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, stopping copy trader...");
        progress_for_ctrlc.cancelled.store(true, Ordering::Relaxed);
    });

    run_copy_trader(&client, &executor, config, &progress, db.as_ref().map(|d| d.pool_clone())).await?;

    println!(
        "\nStopped after {} cycles: {} copied, {} skipped, {} failed",
        progress.cycles.load(Ordering::Relaxed),
        progress.copied.load(Ordering::Relaxed),
        progress.skipped.load(Ordering::Relaxed),
        progress.failed.load(Ordering::Relaxed)
    );
    for order in executor.orders() {
        println!(
            "  {} {:.2} {} @ {:.3} ({})",
            order.side.as_str(),
            order.size,
            order.outcome,
            order.price,
            order.condition_id
        );
    }
    if let Some(db) = &db {
        let counts = CopyTradeRepository::new(db.pool()).count_by_status().await?;
        let parts: Vec<String> = counts.iter().map(|(s, n)| format!("{}={}", s, n)).collect();
        println!("\nLedger: {}", parts.join(", "));
    }
    Ok(())
}

// ============================================================================
// Runs command
// ============================================================================

async fn cmd_runs(run_id: Option<String>, limit: i64) -> anyhow::Result<()> {
    let db = open_db().await?;
    let repo = BacktestRepository::new(db.pool());

    let Some(run_id) = run_id else {
        let runs = repo.list_runs(limit).await?;
        if runs.is_empty() {
            println!("\nNo runs recorded.");
            return Ok(());
        }
        println!("\n  {:<32} {:<12} {:>8}  {}", "Run", "Kind", "Markets", "Created");
        println!("  {}", "-".repeat(75));
        for r in runs {
            let created = r
                .created_at
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .map_or("-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
            println!("  {:<32} {:<12} {:>8}  {}", r.run_id, r.kind, r.markets_analyzed, created);
        }
        return Ok(());
    };

    let Some(run) = repo.get_run(&run_id).await? else {
        anyhow::bail!("Run {} not found", run_id);
    };
    println!("\n=== Run {} ({}) ===", run.run_id, run.kind);
    let summary: serde_json::Value = serde_json::from_str(&run.summary_json).unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&summary)?);

    let results = repo.get_market_results(&run_id).await?;
    println!(
        "\n  {:>10}  {:<9} {:<6} {:<8} {:>8} {:>8} {:>12}",
        "Market", "Predicted", "Actual", "Outcome", "Score", "Insiders", "PnL"
    );
    println!("  {}", "-".repeat(70));
    for r in results {
        println!(
            "  {:>10}  {:<9} {:<6} {:<8} {:>8.3} {:>8} {:>12}",
            r.market_id,
            r.predicted.unwrap_or_default(),
            r.actual.unwrap_or_default(),
            r.outcome.unwrap_or_default(),
            r.direction_score.unwrap_or_default(),
            r.insider_count.unwrap_or_default(),
            r.pnl.unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}

// ============================================================================
// API Handlers - Backtest
// ============================================================================

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "poly-insider",
        "version": APP_VERSION,
    }))
}

/// Overrides for a strategy backtest started over HTTP
#[derive(Debug, Default, Deserialize)]
struct BacktestRequest {
    target_results: Option<usize>,
    threads: Option<usize>,
    seed: Option<u64>,
    min_volume: Option<f64>,
    signal_threshold: Option<f64>,
    strategy: Option<StrategyConfig>,
}

/// POST /api/backtest - start a strategy backtest in the background
async fn api_start_backtest(
    State(state): State<AppState>,
    Json(request): Json<BacktestRequest>,
) -> Json<serde_json::Value> {
    if state.backtest_progress.is_running() {
        let pct = state.backtest_progress.progress_pct();
        return Json(serde_json::json!({
            "success": false,
            "message": format!("Backtest already running ({:.0}% complete)", pct),
        }));
    }

    let defaults = StrategyBacktestConfig::default();
    let config = StrategyBacktestConfig {
        target_results: request.target_results.unwrap_or(defaults.target_results),
        threads: request.threads.unwrap_or(defaults.threads),
        seed: request.seed.unwrap_or(defaults.seed),
        min_volume: request.min_volume.unwrap_or(defaults.min_volume),
        signal_threshold: request.signal_threshold.unwrap_or(defaults.signal_threshold),
        ..defaults
    };
    let strategy_config = request.strategy.unwrap_or_default();

    info!(
        target_results = config.target_results,
        threads = config.threads,
        seed = config.seed,
        "Starting strategy backtest"
    );

    state.backtest_progress.reset("strategy");
    let run_id = new_run_id("strategy");

    let progress = state.backtest_progress.clone();
    let archive = state.archive_dir.clone();
    let output = state.output_dir.clone();
    let pool = state.db.pool_clone();
    let task_run_id = run_id.clone();
    tokio::spawn(async move {
        let blocking_progress = progress.clone();
        let result = tokio::task::spawn_blocking(move || -> anyhow::Result<StrategyBacktestReport> {
            let catalog = load_catalog(&archive)?;
            let extractor = DataExtractor::new(ExtractorConfig::from_archive_dir(&archive));
            let strategy = TradingStrategy::new(strategy_config);
            run_strategy_backtest(&extractor, &catalog, &config, &strategy, &blocking_progress)
        })
        .await;

        let report = match result {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                error!("Strategy backtest failed: {}", e);
                progress.fail(e.to_string());
                return;
            }
            Err(e) => {
                error!("Strategy backtest task panicked: {}", e);
                progress.fail(e.to_string());
                return;
            }
        };

        if let Err(e) = write_report(&report, &output, "strategy_backtest") {
            warn!(error = %e, "Failed to write backtest report");
        }
        if let Err(e) = persist_strategy(&pool, &task_run_id, &report).await {
            warn!(error = %e, "Failed to persist backtest run");
        }
    });

    Json(serde_json::json!({
        "success": true,
        "message": "Strategy backtest started",
        "run_id": run_id,
    }))
}

/// POST /api/backtest/cancel - cancel running backtest
async fn api_cancel_backtest(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.backtest_progress.cancelled.store(true, Ordering::Relaxed);
    info!("Backtest cancel requested via API");
    Json(serde_json::json!({
        "success": true,
        "message": "Cancel requested"
    }))
}

/// GET /api/backtest/status - poll backtest progress
async fn api_backtest_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let progress = &state.backtest_progress;
    let status = *progress.status.read().unwrap();
    let kind = progress.kind.read().unwrap().clone();
    let current_market = *progress.current_market.read().unwrap();
    let error = progress.error_message.read().unwrap().clone();
    let started_at = progress.started_at.read().unwrap().clone();
    let summary = progress.report.read().unwrap().as_ref().map(|r| r.summary.clone());

    Json(serde_json::json!({
        "status": status,
        "kind": kind,
        "progress_pct": progress.progress_pct(),
        "completed": progress.completed.load(Ordering::Relaxed),
        "skipped": progress.skipped.load(Ordering::Relaxed),
        "total": progress.total.load(Ordering::Relaxed),
        "current_market": current_market,
        "summary": summary,
        "error": error,
        "started_at": started_at,
    }))
}

// ============================================================================
// API Handlers - Runs
// ============================================================================

/// GET /api/runs - most recent persisted runs
async fn api_list_runs(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let limit: i64 = params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(20);

    let repo = BacktestRepository::new(state.db.pool());
    match repo.list_runs(limit).await {
        Ok(runs) => Json(serde_json::json!({
            "success": true,
            "data": runs,
            "total": runs.len(),
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to list runs: {}", e),
            "data": [],
            "total": 0,
        })),
    }
}

/// GET /api/runs/:run_id - one run with its market results
async fn api_get_run(
    State(state): State<AppState>,
    AxumPath(run_id): AxumPath<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let repo = BacktestRepository::new(state.db.pool());
    let run = repo.get_run(&run_id).await.map_err(|e| {
        error!("Failed to load run {}: {}", run_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let Some(run) = run else {
        return Err(StatusCode::NOT_FOUND);
    };
    let results = repo.get_market_results(&run_id).await.map_err(|e| {
        error!("Failed to load results for {}: {}", run_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let summary: serde_json::Value = serde_json::from_str(&run.summary_json).unwrap_or_default();
    let config: serde_json::Value = serde_json::from_str(&run.config_json).unwrap_or_default();
    Ok(Json(serde_json::json!({
        "success": true,
        "run": {
            "run_id": run.run_id,
            "kind": run.kind,
            "markets_analyzed": run.markets_analyzed,
            "created_at": run.created_at,
            "config": config,
            "summary": summary,
        },
        "results": results,
    })))
}
