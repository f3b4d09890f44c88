//! Backtest Harness — replay history at a simulated "now" and score predictions
//!
//! Three harnesses share the same pipeline:
//! - batch validation: predicted vs inferred outcome over many markets
//! - single-market backtest: one signal N days before close
//! - strategy backtest: scan toward close, enter on the first strong
//!   signal, settle PnL at resolution (parallel over markets)

use crate::analyzer::{analyze_market, analyze_window, AnalysisConfig, MarketAnalysis, ProfileCache};
use crate::direction::AggregateSignal;
use crate::extractor::{DataExtractor, MarketCatalog};
use crate::resolution::{infer_market_winner, ResolutionParams};
use crate::stats;
use crate::strategy::{count_consistent_days, entry_discount, SignalStrength, StrategyConfig, TradeAction, TradingSignal, TradingStrategy};
use crate::types::{Direction, MarketInfo, OutcomeToken, SignalLabel, TradeRecord};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;
use tracing::{debug, info, warn};

const PRICE_LOOKBACK_TRADES: usize = 10;
const MIN_PRE_DETECTION_TRADES: usize = 10;
const SCAN_POINT_MIN_GAP_HOURS: i64 = 1;
const SIGNIFICANCE_MIN_TRADES: u64 = 10;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BacktestStatus {
    Idle,
    Loading,
    Running,
    Complete,
    Cancelled,
    Error,
}

/// Shared progress for long runs, polled by the CLI and the API
pub struct BacktestProgress {
    pub status: RwLock<BacktestStatus>,
    pub kind: RwLock<String>,
    pub total: AtomicU32,
    pub completed: AtomicU32,
    pub skipped: AtomicU32,
    pub cancelled: AtomicBool,
    pub current_market: RwLock<Option<u64>>,
    pub error_message: RwLock<Option<String>>,
    pub started_at: RwLock<Option<String>>,
    pub report: RwLock<Option<StrategyBacktestReport>>,
}

impl BacktestProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(BacktestStatus::Idle),
            kind: RwLock::new(String::new()),
            total: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            skipped: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            current_market: RwLock::new(None),
            error_message: RwLock::new(None),
            started_at: RwLock::new(None),
            report: RwLock::new(None),
        }
    }

    pub fn reset(&self, kind: &str) {
        *self.status.write().unwrap() = BacktestStatus::Loading;
        *self.kind.write().unwrap() = kind.to_string();
        self.total.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.cancelled.store(false, Ordering::Relaxed);
        *self.current_market.write().unwrap() = None;
        *self.error_message.write().unwrap() = None;
        *self.started_at.write().unwrap() = Some(Utc::now().to_rfc3339());
        *self.report.write().unwrap() = None;
    }

    pub fn is_running(&self) -> bool {
        matches!(
            *self.status.read().unwrap(),
            BacktestStatus::Loading | BacktestStatus::Running
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn progress_pct(&self) -> f32 {
        let total = self.total.load(Ordering::Relaxed);
        let done = self.completed.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            (done as f32 / total as f32 * 100.0).min(100.0)
        }
    }

    pub fn fail(&self, message: impl Into<String>) {
        *self.status.write().unwrap() = BacktestStatus::Error;
        *self.error_message.write().unwrap() = Some(message.into());
    }
}

impl Default for BacktestProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeOutcome {
    Win,
    Loss,
    Unknown,
    NoTrade,
}

/// Return per dollar staked on a binary token bought at `entry`
pub fn pnl_per_dollar(entry: f64, won: bool) -> f64 {
    if won {
        1.0 / entry - 1.0
    } else {
        -1.0
    }
}

fn sorted_by_time(trades: &[TradeRecord]) -> Vec<&TradeRecord> {
    let mut ordered: Vec<&TradeRecord> = trades.iter().collect();
    ordered.sort_by_key(|t| t.timestamp);
    ordered
}

/// Trades strictly before `at` (input sorted by time), plus the mean YES
/// price over the last ten of them. Defaults to 0.5 without YES fills.
fn price_before<'a>(ordered: &[&'a TradeRecord], at: DateTime<Utc>) -> (usize, f64) {
    let cut = ordered.partition_point(|t| t.timestamp < at);
    let recent = &ordered[cut.saturating_sub(PRICE_LOOKBACK_TRADES)..cut];
    let yes: Vec<f64> = recent
        .iter()
        .filter(|t| t.token == OutcomeToken::Yes)
        .map(|t| t.price)
        .collect();
    (cut, stats::mean(&yes).unwrap_or(0.5))
}

/// Price of the predicted token given the YES price
fn token_price(yes_price: f64, direction: Direction) -> f64 {
    match direction {
        Direction::No => 1.0 - yes_price,
        _ => yes_price,
    }
}

/// Scan times over `[end - window_days, end]`, denser toward `end`.
/// Points closer than an hour to the previously kept one are dropped.
pub fn exponential_scan_points(end: DateTime<Utc>, window_days: i64, count: usize) -> Vec<DateTime<Utc>> {
    if count == 0 || window_days <= 0 {
        return Vec::new();
    }
    let total_hours = (window_days * 24) as f64;
    let start = end - Duration::days(window_days);
    let mut points: Vec<DateTime<Utc>> = (0..count)
        .map(|i| {
            let ratio = if count > 1 {
                i as f64 / (count - 1) as f64
            } else {
                0.0
            };
            let offset_hours = total_hours * (-3.0 * ratio).exp();
            end - Duration::seconds((offset_hours * 3600.0).round() as i64)
        })
        .filter(|p| *p >= start)
        .collect();
    points.sort();

    let mut kept: Vec<DateTime<Utc>> = Vec::with_capacity(points.len());
    for p in points {
        if kept
            .last()
            .map_or(true, |last| p - *last > Duration::hours(SCAN_POINT_MIN_GAP_HOURS))
        {
            kept.push(p);
        }
    }
    kept
}

/// Write a report as pretty JSON to `<dir>/<kind>_<timestamp>.json`
pub fn write_report<T: Serialize>(report: &T, dir: impl AsRef<Path>, kind: &str) -> anyhow::Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}_{}.json", kind, Utc::now().format("%Y%m%d_%H%M%S")));
    write_report_to(report, &path)?;
    Ok(path)
}

pub fn write_report_to<T: Serialize>(report: &T, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    info!(path = %path.display(), "Report written");
    Ok(())
}

// ---------------------------------------------------------------------------
// Batch validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketValidation {
    pub market_id: u64,
    pub question: String,
    pub predicted: Direction,
    pub actual: OutcomeToken,
    pub correct: bool,
    pub direction_score: f64,
    pub signal: SignalLabel,
    pub yes_days: usize,
    pub no_days: usize,
    pub total_insiders: usize,
    pub trades_analyzed: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSkips {
    pub no_trades: usize,
    pub no_market_info: usize,
    pub uncertain_outcome: usize,
    pub no_insiders: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelAccuracy {
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub markets_requested: usize,
    pub total: usize,
    pub correct: usize,
    /// Percent
    pub accuracy: f64,
    pub p_value: Option<f64>,
    pub significant: bool,
    pub by_signal: BTreeMap<SignalLabel, LabelAccuracy>,
    pub skipped: ValidationSkips,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub generated_at: DateTime<Utc>,
    pub config: AnalysisConfig,
    pub methodology: String,
    pub summary: ValidationSummary,
    pub results: Vec<MarketValidation>,
}

fn validation_methodology(config: &AnalysisConfig) -> String {
    format!(
        "For each resolved market, wallet-days in the {} days before close (ending 1h before close) \
         are scored; wallets with >= ${:.0} buy volume and score >= {} are insiders. Daily \
         conviction-weighted scores are aggregated with recency weights and compared with the \
         outcome inferred from the final 20 trades. Significance: one-sided binomial test vs 50%.",
        config.lookback_days, config.min_wallet_volume, config.min_insider_score
    )
}

/// Evaluate one market's prediction against its inferred outcome.
fn validate_market(
    market_id: u64,
    trades: Option<&Vec<TradeRecord>>,
    catalog: &MarketCatalog,
    config: &AnalysisConfig,
    skips: &mut ValidationSkips,
) -> Option<MarketValidation> {
    let Some(trades) = trades.filter(|t| !t.is_empty()) else {
        skips.no_trades += 1;
        return None;
    };
    let Some(info) = catalog.get(market_id) else {
        skips.no_market_info += 1;
        return None;
    };
    let (Some(closed), Some(actual)) = (
        info.closed_time,
        infer_market_winner(trades, &ResolutionParams::strict()),
    ) else {
        skips.uncertain_outcome += 1;
        return None;
    };

    let analysis = analyze_market(trades, Some(closed), config);
    let MarketAnalysis::Signal(report) = analysis else {
        skips.no_insiders += 1;
        return None;
    };
    let agg = &report.aggregate;
    if agg.predicted == Direction::Neutral {
        skips.no_insiders += 1;
        return None;
    }

    Some(MarketValidation {
        market_id,
        question: info.question.clone(),
        predicted: agg.predicted,
        actual,
        correct: agg.predicted == actual.direction(),
        direction_score: agg.direction_score,
        signal: agg.signal,
        yes_days: agg.yes_days,
        no_days: agg.no_days,
        total_insiders: agg.total_insiders,
        trades_analyzed: report.trades_analyzed,
    })
}

pub fn summarize_validation(
    markets_requested: usize,
    results: &[MarketValidation],
    skipped: ValidationSkips,
) -> ValidationSummary {
    let total = results.len();
    let correct = results.iter().filter(|r| r.correct).count();
    let accuracy = if total > 0 {
        correct as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    let p_value = if total as u64 >= SIGNIFICANCE_MIN_TRADES {
        stats::binomial_p_value_greater(correct as u64, total as u64, 0.5)
    } else {
        None
    };

    let mut by_signal: BTreeMap<SignalLabel, LabelAccuracy> = BTreeMap::new();
    for r in results {
        let entry = by_signal.entry(r.signal).or_default();
        entry.total += 1;
        if r.correct {
            entry.correct += 1;
        }
    }
    for entry in by_signal.values_mut() {
        entry.accuracy = entry.correct as f64 / entry.total as f64 * 100.0;
    }

    ValidationSummary {
        markets_requested,
        total,
        correct,
        accuracy,
        p_value,
        significant: p_value.map_or(false, |p| p < 0.05),
        by_signal,
        skipped,
    }
}

/// Extract the markets in one archive pass, then validate each prediction.
pub fn run_validation(
    market_ids: &[u64],
    extractor: &DataExtractor,
    catalog: &MarketCatalog,
    config: &AnalysisConfig,
    progress: Option<&BacktestProgress>,
) -> anyhow::Result<ValidationReport> {
    info!(markets = market_ids.len(), "Starting batch validation");
    let market_trades = extractor.extract_multiple_markets(market_ids)?;

    if let Some(p) = progress {
        p.total.store(market_ids.len() as u32, Ordering::Relaxed);
        *p.status.write().unwrap() = BacktestStatus::Running;
    }

    let mut skips = ValidationSkips::default();
    let mut results = Vec::new();
    for &market_id in market_ids {
        if progress.map_or(false, |p| p.is_cancelled()) {
            info!("Validation cancelled");
            break;
        }
        match validate_market(market_id, market_trades.get(&market_id), catalog, config, &mut skips) {
            Some(r) => {
                debug!(
                    market_id,
                    predicted = %r.predicted,
                    actual = %r.actual,
                    correct = r.correct,
                    "Market validated"
                );
                results.push(r);
            }
            None => {
                if let Some(p) = progress {
                    p.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if let Some(p) = progress {
            p.completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    let summary = summarize_validation(market_ids.len(), &results, skips);
    info!(
        total = summary.total,
        correct = summary.correct,
        accuracy = format!("{:.1}%", summary.accuracy),
        p_value = ?summary.p_value,
        "Validation complete"
    );

    Ok(ValidationReport {
        generated_at: Utc::now(),
        config: config.clone(),
        methodology: validation_methodology(config),
        summary,
        results,
    })
}

// ---------------------------------------------------------------------------
// Single signal & single-market backtest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalReport {
    pub market: Option<MarketInfo>,
    pub as_of: DateTime<Utc>,
    pub analysis: MarketAnalysis,
    pub signal: TradingSignal,
}

/// Analyze one market as of `at`. Without `at`, a closed market is analyzed
/// one hour before close and an open market just after its last trade.
pub fn analyze_signal(
    market_id: u64,
    trades: &[TradeRecord],
    market: Option<&MarketInfo>,
    strategy: &TradingStrategy,
    current_price: Option<f64>,
    at: Option<DateTime<Utc>>,
) -> SignalReport {
    let config = analysis_config_for(strategy.config());
    let as_of = at
        .or_else(|| market.and_then(|m| m.closed_time).map(|c| c - Duration::hours(1)))
        .or_else(|| trades.iter().map(|t| t.timestamp).max().map(|t| t + Duration::seconds(1)))
        .unwrap_or_else(Utc::now);
    let analysis = analyze_window(trades, as_of, &config);
    let signal = strategy.generate_signal(market_id, &analysis, current_price, as_of);
    SignalReport {
        market: market.cloned(),
        as_of,
        analysis,
        signal,
    }
}

/// Insider settings carried by a strategy config
pub fn analysis_config_for(strategy: &StrategyConfig) -> AnalysisConfig {
    AnalysisConfig {
        min_insider_score: strategy.insider_min_score,
        lookback_days: strategy.insider_lookback_days,
        ..AnalysisConfig::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketBacktestResult {
    pub market_id: u64,
    pub question: String,
    pub simulation_time: DateTime<Utc>,
    pub closed_time: DateTime<Utc>,
    pub yes_price: f64,
    pub signal: TradingSignal,
    pub actual: Option<OutcomeToken>,
    pub outcome: TradeOutcome,
    pub entry_price: Option<f64>,
    pub pnl_per_dollar: f64,
}

/// Generate a signal `days_before_close` days before close and settle it.
pub fn backtest_market(
    trades: &[TradeRecord],
    market: &MarketInfo,
    strategy: &TradingStrategy,
    days_before_close: i64,
) -> anyhow::Result<MarketBacktestResult> {
    let Some(closed) = market.closed_time else {
        anyhow::bail!("Market {} has no close time", market.id);
    };
    let simulation_time = closed - Duration::days(days_before_close);
    let config = analysis_config_for(strategy.config());

    let ordered = sorted_by_time(trades);
    let (_, yes_price) = price_before(&ordered, simulation_time);
    let analysis = analyze_market(trades, Some(simulation_time), &config);
    let predicted = analysis.aggregate().predicted;
    let price = token_price(yes_price, predicted);
    let signal = strategy.generate_signal(market.id, &analysis, Some(price), simulation_time);
    let actual = infer_market_winner(trades, &ResolutionParams::strict());

    let (outcome, entry_price, pnl) = if !signal.action.is_buy() {
        (TradeOutcome::NoTrade, None, 0.0)
    } else {
        match (actual, signal.direction.token()) {
            (Some(winner), Some(side)) => {
                let won = winner == side;
                let o = if won { TradeOutcome::Win } else { TradeOutcome::Loss };
                (o, Some(price), pnl_per_dollar(price, won))
            }
            _ => (TradeOutcome::Unknown, Some(price), 0.0),
        }
    };

    info!(
        market_id = market.id,
        action = ?signal.action,
        outcome = ?outcome,
        pnl_per_dollar = pnl,
        "Market backtest complete"
    );

    Ok(MarketBacktestResult {
        market_id: market.id,
        question: market.question.clone(),
        simulation_time,
        closed_time: closed,
        yes_price,
        signal,
        actual,
        outcome,
        entry_price,
        pnl_per_dollar: pnl,
    })
}

// ---------------------------------------------------------------------------
// Strategy backtest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyBacktestConfig {
    pub target_results: usize,
    pub threads: usize,
    pub seed: u64,
    pub scan_window_days: i64,
    pub scan_points: usize,
    /// |direction score| needed at a scan point
    pub signal_threshold: f64,
    pub min_insiders: usize,
    pub min_volume: f64,
    pub min_cache_trades: usize,
    pub initial_capital: Decimal,
    /// End date is jittered uniformly by up to this many hours
    pub end_jitter_hours: f64,
}

impl Default for StrategyBacktestConfig {
    fn default() -> Self {
        Self {
            target_results: 200,
            threads: 8,
            seed: 42,
            scan_window_days: 5,
            scan_points: 10,
            signal_threshold: 0.25,
            min_insiders: 3,
            min_volume: 100_000.0,
            min_cache_trades: 100,
            initial_capital: dec!(10000),
            end_jitter_hours: 6.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoCache,
    InsufficientTrades,
    NoMarketInfo,
    NoCloseTime,
    NoWinner,
    NoScanPoints,
    NoStrongSignal,
    InsufficientPreDetection,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyTradeResult {
    pub market_id: u64,
    pub question: String,
    pub closed_time: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub detection_time: DateTime<Utc>,
    pub hours_before_close: f64,
    pub predicted: Direction,
    pub actual: OutcomeToken,
    pub direction_score: f64,
    pub total_insiders: usize,
    pub consistent_days: usize,
    pub strength: SignalStrength,
    pub yes_price: f64,
    pub token_price: f64,
    pub max_entry: f64,
    pub entry_price: Option<f64>,
    pub position_pct: f64,
    pub position_value: Decimal,
    pub pnl: Decimal,
    pub pnl_per_dollar: f64,
    pub outcome: TradeOutcome,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrengthStats {
    pub trades: usize,
    pub wins: usize,
    pub pnl: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySummary {
    pub candidates: usize,
    pub markets_evaluated: usize,
    pub results: usize,
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub no_trades: usize,
    /// Percent of trades won
    pub win_rate: f64,
    pub total_invested: Decimal,
    pub total_pnl: Decimal,
    /// Percent of invested capital
    pub roi: f64,
    pub avg_hours_before_close: f64,
    pub avg_entry_price: f64,
    pub p_value: Option<f64>,
    pub significant: bool,
    pub by_strength: BTreeMap<SignalStrength, StrengthStats>,
    pub skipped: BTreeMap<SkipReason, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyBacktestReport {
    pub generated_at: DateTime<Utc>,
    pub config: StrategyBacktestConfig,
    pub strategy: StrategyConfig,
    pub summary: StrategySummary,
    pub results: Vec<StrategyTradeResult>,
}

/// Deterministic per-market RNG so reruns reproduce the same jitter
fn market_rng(seed: u64, market_id: u64) -> StdRng {
    StdRng::seed_from_u64(seed ^ market_id.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// First scan point whose aggregate clears the detection thresholds
fn first_detection(
    cache: &ProfileCache,
    points: &[DateTime<Utc>],
    lookback_days: i64,
    config: &StrategyBacktestConfig,
) -> Option<(DateTime<Utc>, AggregateSignal, usize)> {
    points.iter().find_map(|&p| {
        let (agg, window) = cache.analyze_at_time(p, lookback_days)?;
        let strong = agg.direction_score.abs() >= config.signal_threshold
            && agg.total_insiders >= config.min_insiders
            && agg.predicted != Direction::Neutral;
        strong.then(|| {
            let consistent_days = count_consistent_days(window, agg.predicted);
            (p, agg, consistent_days)
        })
    })
}

/// Simulate trading one market. Pure with respect to its inputs.
pub fn simulate_market(
    market: &MarketInfo,
    trades: &[TradeRecord],
    config: &StrategyBacktestConfig,
    strategy: &TradingStrategy,
) -> Result<StrategyTradeResult, SkipReason> {
    if trades.len() < config.min_cache_trades {
        return Err(SkipReason::InsufficientTrades);
    }
    let closed = market.closed_time.ok_or(SkipReason::NoCloseTime)?;
    let actual = infer_market_winner(trades, &ResolutionParams::lenient()).ok_or(SkipReason::NoWinner)?;

    let mut rng = market_rng(config.seed, market.id);
    let jitter_hours = if config.end_jitter_hours > 0.0 {
        rng.gen_range(-config.end_jitter_hours..=config.end_jitter_hours)
    } else {
        0.0
    };
    let end_date = closed + Duration::seconds((jitter_hours * 3600.0).round() as i64);

    let points = exponential_scan_points(end_date, config.scan_window_days, config.scan_points);
    if points.is_empty() {
        return Err(SkipReason::NoScanPoints);
    }

    let analysis_config = analysis_config_for(strategy.config());
    let cache = ProfileCache::build(trades, &analysis_config);
    let (detection_time, agg, consistent_days) = first_detection(&cache, &points, analysis_config.lookback_days, config)
        .ok_or(SkipReason::NoStrongSignal)?;

    let ordered = sorted_by_time(trades);
    let (before, yes_price) = price_before(&ordered, detection_time);
    if before < MIN_PRE_DETECTION_TRADES {
        return Err(SkipReason::InsufficientPreDetection);
    }

    let predicted = agg.predicted;
    let price = token_price(yes_price, predicted);
    let signal = strategy.signal_from_aggregate(market.id, &agg, consistent_days, Some(price), detection_time);
    let entry = strategy
        .entry_calculator()
        .calculate(agg.direction_score, signal.strength);
    let position_pct = strategy.position_sizer().calculate(
        signal.strength,
        consistent_days,
        entry_discount(Some(price), entry.max),
    );
    let hours_before_close = (closed - detection_time).num_seconds() as f64 / 3600.0;

    let mut result = StrategyTradeResult {
        market_id: market.id,
        question: market.question.clone(),
        closed_time: closed,
        end_date,
        detection_time,
        hours_before_close,
        predicted,
        actual,
        direction_score: agg.direction_score,
        total_insiders: agg.total_insiders,
        consistent_days,
        strength: signal.strength,
        yes_price,
        token_price: price,
        max_entry: entry.max,
        entry_price: None,
        position_pct: 0.0,
        position_value: Decimal::ZERO,
        pnl: Decimal::ZERO,
        pnl_per_dollar: 0.0,
        outcome: TradeOutcome::NoTrade,
        reason: signal.reason.clone(),
    };

    let decision = strategy.entry_calculator().should_enter(price, entry.max);
    if !decision.enter || signal.action == TradeAction::Hold {
        return Ok(result);
    }

    let entry_price = price.min(entry.max);
    let won = predicted == actual.direction();
    let per_dollar = pnl_per_dollar(entry_price, won);
    let position_value =
        (config.initial_capital * Decimal::try_from(position_pct).unwrap_or_default()).round_dp(2);
    let pnl = (position_value * Decimal::try_from(per_dollar).unwrap_or_default()).round_dp(2);

    result.entry_price = Some(entry_price);
    result.position_pct = position_pct;
    result.position_value = position_value;
    result.pnl = pnl;
    result.pnl_per_dollar = per_dollar;
    result.outcome = if won { TradeOutcome::Win } else { TradeOutcome::Loss };
    Ok(result)
}

fn evaluate_market(
    market_id: u64,
    extractor: &DataExtractor,
    catalog: &MarketCatalog,
    config: &StrategyBacktestConfig,
    strategy: &TradingStrategy,
    progress: &BacktestProgress,
) -> Result<StrategyTradeResult, SkipReason> {
    if progress.is_cancelled() {
        return Err(SkipReason::Cancelled);
    }
    *progress.current_market.write().unwrap() = Some(market_id);

    if !extractor.is_cached(market_id) {
        return Err(SkipReason::NoCache);
    }
    let trades = extractor.load_cached(market_id).map_err(|e| {
        warn!(market_id, error = %e, "Failed to load cached trades");
        SkipReason::NoCache
    })?;
    let market = catalog.get(market_id).ok_or(SkipReason::NoMarketInfo)?;
    simulate_market(market, &trades, config, strategy)
}

pub fn summarize_strategy(
    candidates: usize,
    markets_evaluated: usize,
    results: &[StrategyTradeResult],
    skipped: BTreeMap<SkipReason, usize>,
) -> StrategySummary {
    let traded: Vec<&StrategyTradeResult> = results
        .iter()
        .filter(|r| matches!(r.outcome, TradeOutcome::Win | TradeOutcome::Loss))
        .collect();
    let wins = traded.iter().filter(|r| r.outcome == TradeOutcome::Win).count();
    let trades = traded.len();
    let total_invested: Decimal = traded.iter().map(|r| r.position_value).sum();
    let total_pnl: Decimal = traded.iter().map(|r| r.pnl).sum();

    let roi = if total_invested > Decimal::ZERO {
        let ratio = total_pnl / total_invested * dec!(100);
        ratio.round_dp(4).to_string().parse::<f64>().unwrap_or(0.0)
    } else {
        0.0
    };
    let hours: Vec<f64> = traded.iter().map(|r| r.hours_before_close).collect();
    let entries: Vec<f64> = traded.iter().filter_map(|r| r.entry_price).collect();

    let mut by_strength: BTreeMap<SignalStrength, StrengthStats> = BTreeMap::new();
    for r in &traded {
        let s = by_strength.entry(r.strength).or_default();
        s.trades += 1;
        if r.outcome == TradeOutcome::Win {
            s.wins += 1;
        }
        s.pnl += r.pnl;
    }

    let p_value = if trades as u64 >= SIGNIFICANCE_MIN_TRADES {
        stats::binomial_p_value_greater(wins as u64, trades as u64, 0.5)
    } else {
        None
    };

    StrategySummary {
        candidates,
        markets_evaluated,
        results: results.len(),
        trades,
        wins,
        losses: trades - wins,
        no_trades: results.len() - trades,
        win_rate: if trades > 0 {
            wins as f64 / trades as f64 * 100.0
        } else {
            0.0
        },
        total_invested,
        total_pnl,
        roi,
        avg_hours_before_close: stats::mean(&hours).unwrap_or(0.0),
        avg_entry_price: stats::mean(&entries).unwrap_or(0.0),
        p_value,
        significant: p_value.map_or(false, |p| p < 0.05),
        by_strength,
        skipped,
    }
}

/// Cached, resolved, liquid markets in seeded random order
pub fn strategy_candidates(
    extractor: &DataExtractor,
    catalog: &MarketCatalog,
    config: &StrategyBacktestConfig,
) -> anyhow::Result<Vec<u64>> {
    let mut ids: Vec<u64> = extractor
        .list_cached_market_ids()?
        .into_iter()
        .filter(|id| {
            catalog
                .get(*id)
                .map_or(false, |m| m.closed_time.is_some() && m.volume >= config.min_volume)
        })
        .collect();
    let mut rng = StdRng::seed_from_u64(config.seed);
    ids.shuffle(&mut rng);
    Ok(ids)
}

/// Run the scan-and-enter strategy over cached markets until
/// `target_results` markets produced a detection.
pub fn run_strategy_backtest(
    extractor: &DataExtractor,
    catalog: &MarketCatalog,
    config: &StrategyBacktestConfig,
    strategy: &TradingStrategy,
    progress: &BacktestProgress,
) -> anyhow::Result<StrategyBacktestReport> {
    let candidates = strategy_candidates(extractor, catalog, config)?;
    info!(
        candidates = candidates.len(),
        target_results = config.target_results,
        threads = config.threads,
        "Starting strategy backtest"
    );
    progress.total.store(candidates.len() as u32, Ordering::Relaxed);
    *progress.status.write().unwrap() = BacktestStatus::Running;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads.max(1))
        .build()?;

    let batch_size = config.threads.max(1) * 4;
    let mut results: Vec<StrategyTradeResult> = Vec::new();
    let mut skipped: BTreeMap<SkipReason, usize> = BTreeMap::new();
    let mut evaluated = 0usize;

    for batch in candidates.chunks(batch_size) {
        if progress.is_cancelled() || results.len() >= config.target_results {
            break;
        }
        let outcomes: Vec<Result<StrategyTradeResult, SkipReason>> = pool.install(|| {
            batch
                .par_iter()
                .map(|&id| {
                    let outcome = evaluate_market(id, extractor, catalog, config, strategy, progress);
                    progress.completed.fetch_add(1, Ordering::Relaxed);
                    if outcome.is_err() {
                        progress.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    outcome
                })
                .collect()
        });

        for outcome in outcomes {
            if results.len() >= config.target_results {
                break;
            }
            evaluated += 1;
            match outcome {
                Ok(r) => {
                    debug!(
                        market_id = r.market_id,
                        outcome = ?r.outcome,
                        pnl = %r.pnl,
                        "Market simulated"
                    );
                    results.push(r);
                }
                Err(reason) => *skipped.entry(reason).or_default() += 1,
            }
        }
        info!(
            evaluated,
            results = results.len(),
            pct = format!("{:.0}%", progress.progress_pct()),
            "Strategy backtest progress"
        );
    }

    let summary = summarize_strategy(candidates.len(), evaluated, &results, skipped);
    info!(
        trades = summary.trades,
        wins = summary.wins,
        win_rate = format!("{:.1}%", summary.win_rate),
        pnl = %summary.total_pnl,
        roi = format!("{:.2}%", summary.roi),
        "Strategy backtest complete"
    );

    let report = StrategyBacktestReport {
        generated_at: Utc::now(),
        config: config.clone(),
        strategy: strategy.config().clone(),
        summary,
        results,
    };

    *progress.status.write().unwrap() = if progress.is_cancelled() {
        BacktestStatus::Cancelled
    } else {
        BacktestStatus::Complete
    };
    *progress.current_market.write().unwrap() = None;
    *progress.report.write().unwrap() = Some(report.clone());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::tests::insider_market;
    use crate::profile::tests::make_trade;
    use crate::types::TradeSide;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    /// Insider buys NO for `days` days, then NO trades at 0.97 into close.
    fn resolved_no_market(days: i64) -> (MarketInfo, Vec<TradeRecord>) {
        let mut trades = insider_market(days, start());
        let closed = start() + Duration::days(days);
        for i in 0..30 {
            trades.push(make_trade(
                closed - Duration::hours(2) + Duration::minutes(i),
                "0xlate",
                "0xlp",
                OutcomeToken::No,
                TradeSide::Buy,
                0.97,
                20.0,
            ));
        }
        let info = MarketInfo {
            id: 1,
            question: "Will it happen?".into(),
            closed_time: Some(closed),
            volume: 500_000.0,
            slug: Some("will-it-happen".into()),
            condition_id: None,
        };
        (info, trades)
    }

    #[test]
    fn test_scan_points_dense_near_end() {
        let end = start() + Duration::days(10);
        let points = exponential_scan_points(end, 5, 10);
        assert_eq!(points[0], end - Duration::days(5));
        assert!(points.windows(2).all(|w| w[1] - w[0] > Duration::hours(1)));
        assert!(*points.last().unwrap() < end);
        // last gap smaller than the first
        let first_gap = points[1] - points[0];
        let last_gap = points[points.len() - 1] - points[points.len() - 2];
        assert!(last_gap < first_gap);
        assert!(exponential_scan_points(end, 5, 0).is_empty());
    }

    #[test]
    fn test_scan_points_drop_close_neighbours() {
        let end = start();
        // one-day window with 100 points collapses to hourly-or-wider spacing
        let points = exponential_scan_points(end, 1, 100);
        assert!(points.len() < 24);
        assert!(points.windows(2).all(|w| w[1] - w[0] > Duration::hours(1)));
    }

    #[test]
    fn test_pnl_per_dollar() {
        assert!((pnl_per_dollar(0.5, true) - 1.0).abs() < 1e-12);
        assert!((pnl_per_dollar(0.25, true) - 3.0).abs() < 1e-12);
        assert_eq!(pnl_per_dollar(0.5, false), -1.0);
    }

    #[test]
    fn test_price_before_defaults_and_window() {
        let (_, trades) = resolved_no_market(3);
        let ordered = sorted_by_time(&trades);
        let (count, price) = price_before(&ordered, start());
        assert_eq!(count, 0);
        assert_eq!(price, 0.5);
        // the retail trades alternate YES/NO at 0.55
        let (count, price) = price_before(&ordered, start() + Duration::hours(5));
        assert_eq!(count, 8);
        assert!((price - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_simulate_market_wins_on_no() {
        let (info, trades) = resolved_no_market(8);
        let config = StrategyBacktestConfig {
            min_insiders: 1,
            end_jitter_hours: 0.0,
            ..Default::default()
        };
        let strategy = TradingStrategy::new(StrategyConfig::default());
        let r = simulate_market(&info, &trades, &config, &strategy).unwrap();
        assert_eq!(r.predicted, Direction::No);
        assert_eq!(r.actual, OutcomeToken::No);
        assert_eq!(r.detection_time, info.closed_time.unwrap() - Duration::days(5));
        // NO token at 1 - 0.55
        assert!((r.token_price - 0.45).abs() < 1e-9);
        assert_eq!(r.outcome, TradeOutcome::Win);
        assert!(r.pnl > Decimal::ZERO);
    }

    #[test]
    fn test_simulate_market_skip_reasons() {
        let (info, trades) = resolved_no_market(8);
        let strategy = TradingStrategy::new(StrategyConfig::default());
        let config = StrategyBacktestConfig {
            min_insiders: 1_000,
            end_jitter_hours: 0.0,
            ..Default::default()
        };
        // one insider per day never adds up to a thousand
        assert_eq!(
            simulate_market(&info, &trades, &config, &strategy).unwrap_err(),
            SkipReason::NoStrongSignal
        );

        let open = MarketInfo { closed_time: None, ..info.clone() };
        assert_eq!(
            simulate_market(&open, &trades, &config, &strategy).unwrap_err(),
            SkipReason::NoCloseTime
        );
        assert_eq!(
            simulate_market(&info, &trades[..50], &config, &strategy).unwrap_err(),
            SkipReason::InsufficientTrades
        );
    }

    #[test]
    fn test_summary_counts_and_significance() {
        let (info, trades) = resolved_no_market(8);
        let config = StrategyBacktestConfig {
            min_insiders: 1,
            end_jitter_hours: 0.0,
            ..Default::default()
        };
        let strategy = TradingStrategy::new(StrategyConfig::default());
        let win = simulate_market(&info, &trades, &config, &strategy).unwrap();
        let mut loss = win.clone();
        loss.outcome = TradeOutcome::Loss;
        loss.pnl = -loss.position_value;

        let mut results = vec![win.clone(); 10];
        results.push(loss);
        let mut skipped = BTreeMap::new();
        skipped.insert(SkipReason::NoWinner, 3);
        let summary = summarize_strategy(20, 14, &results, skipped);
        assert_eq!(summary.trades, 11);
        assert_eq!(summary.wins, 10);
        assert_eq!(summary.losses, 1);
        assert!(summary.p_value.unwrap() < 0.01);
        assert!(summary.significant);
        assert_eq!(summary.skipped[&SkipReason::NoWinner], 3);
        assert_eq!(summary.total_invested, win.position_value * Decimal::from(11));
    }

    #[test]
    fn test_backtest_market_and_signal() {
        let (info, trades) = resolved_no_market(8);
        let strategy = TradingStrategy::new(StrategyConfig::default());
        let r = backtest_market(&trades, &info, &strategy, 2).unwrap();
        assert_eq!(r.signal.direction, Direction::No);
        // one insider per day caps the strength at MODERATE
        assert_eq!(r.signal.strength, SignalStrength::Moderate);
        assert!(r.signal.action.is_buy());
        assert_eq!(r.outcome, TradeOutcome::Win);
        assert!(r.pnl_per_dollar > 0.0);

        let report = analyze_signal(1, &trades, Some(&info), &strategy, None, None);
        assert_eq!(report.as_of, info.closed_time.unwrap() - Duration::hours(1));
        assert_eq!(report.signal.direction, Direction::No);
    }

    #[test]
    fn test_backtest_market_ignores_last_hour() {
        let (info, trades) = resolved_no_market(8);
        let strategy = TradingStrategy::new(StrategyConfig::default());
        let base = backtest_market(&trades, &info, &strategy, 2).unwrap();

        // A YES whale 30 minutes before the simulated now must not move the signal
        let mut with_late = trades.clone();
        with_late.push(make_trade(
            base.simulation_time - Duration::minutes(30),
            "0xlatewhale",
            "0xlp",
            OutcomeToken::Yes,
            TradeSide::Buy,
            0.5,
            150_000.0,
        ));
        let late = backtest_market(&with_late, &info, &strategy, 2).unwrap();
        assert_eq!(late.signal.direction_score, base.signal.direction_score);
        assert_eq!(late.signal.total_insiders, base.signal.total_insiders);
        assert_eq!(late.signal.consistent_days, base.signal.consistent_days);
    }

    #[test]
    fn test_validate_market_skips() {
        let (info, trades) = resolved_no_market(8);
        let catalog = MarketCatalog::from_markets(vec![info]);
        let config = AnalysisConfig::default();
        let mut skips = ValidationSkips::default();

        assert!(validate_market(1, None, &catalog, &config, &mut skips).is_none());
        assert!(validate_market(9, Some(&trades), &catalog, &config, &mut skips).is_none());
        let flat: Vec<TradeRecord> = trades[..60].to_vec();
        assert!(validate_market(1, Some(&flat), &catalog, &config, &mut skips).is_none());
        assert_eq!(skips.no_trades, 1);
        assert_eq!(skips.no_market_info, 1);
        assert_eq!(skips.uncertain_outcome, 1);
    }

    #[test]
    fn test_validation_against_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = crate::extractor::ExtractorConfig::from_archive_dir(dir.path());
        cfg.min_trades = 10;
        let extractor = DataExtractor::new(cfg);
        let (info, trades) = resolved_no_market(8);
        extractor.save_to_cache(1, &trades).unwrap();
        let catalog = MarketCatalog::from_markets(vec![info]);

        let report = run_validation(&[1], &extractor, &catalog, &AnalysisConfig::default(), None).unwrap();
        assert_eq!(report.summary.total, 1);
        assert_eq!(report.summary.correct, 1);
        assert_eq!(report.summary.skipped.no_insiders, 0);
        assert!(report.summary.p_value.is_none());
        assert_eq!(report.results[0].predicted, Direction::No);
    }
}
