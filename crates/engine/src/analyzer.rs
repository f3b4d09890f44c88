//! Insider direction analysis for a single market
//!
//! `analyze_market` runs the whole pipeline once over a lookback window.
//! `ProfileCache` precomputes every day so a backtest can query many scan
//! times without rebuilding profiles.

use crate::direction::{aggregate, aggregate_unblended, analyze_daily, AggregateSignal, DailyDirection};
use crate::profile::build_daily_profiles;
use crate::types::TradeRecord;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Wallet-day score needed to count as an insider
    pub min_insider_score: u32,
    /// Wallet-days below this buy volume (USD) are ignored
    pub min_wallet_volume: f64,
    pub lookback_days: i64,
    /// Trades required in the window before any signal is produced
    pub min_trades: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_insider_score: 80,
            min_wallet_volume: 10_000.0,
            lookback_days: 30,
            min_trades: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDataReason {
    InsufficientTrades,
    NoDailyData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsiderReport {
    pub aggregate: AggregateSignal,
    pub trades_analyzed: usize,
    pub days_analyzed: usize,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub daily: Vec<DailyDirection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MarketAnalysis {
    Signal(InsiderReport),
    NoData {
        reason: NoDataReason,
        trades_analyzed: usize,
    },
}

impl MarketAnalysis {
    pub fn report(&self) -> Option<&InsiderReport> {
        match self {
            Self::Signal(r) => Some(r),
            Self::NoData { .. } => None,
        }
    }

    pub fn aggregate(&self) -> AggregateSignal {
        self.report()
            .map(|r| r.aggregate.clone())
            .unwrap_or_else(AggregateSignal::no_data)
    }

    pub fn daily(&self) -> &[DailyDirection] {
        self.report().map(|r| r.daily.as_slice()).unwrap_or(&[])
    }
}

fn run_pipeline(
    trades: Vec<&TradeRecord>,
    window: (Option<DateTime<Utc>>, Option<DateTime<Utc>>),
    config: &AnalysisConfig,
) -> MarketAnalysis {
    let trades_analyzed = trades.len();
    if trades_analyzed < config.min_trades {
        debug!(trades = trades_analyzed, min = config.min_trades, "Not enough trades in window");
        return MarketAnalysis::NoData {
            reason: NoDataReason::InsufficientTrades,
            trades_analyzed,
        };
    }

    let profiles = build_daily_profiles(trades);
    let daily = analyze_daily(&profiles, config);
    if daily.is_empty() {
        return MarketAnalysis::NoData {
            reason: NoDataReason::NoDailyData,
            trades_analyzed,
        };
    }

    MarketAnalysis::Signal(InsiderReport {
        aggregate: aggregate(&daily),
        trades_analyzed,
        days_analyzed: daily.len(),
        window_start: window.0,
        window_end: window.1,
        daily,
    })
}

/// Analyze the trades in `[end - lookback_days, end)`.
pub fn analyze_window(trades: &[TradeRecord], end: DateTime<Utc>, config: &AnalysisConfig) -> MarketAnalysis {
    let start = end - Duration::days(config.lookback_days);
    let in_window: Vec<&TradeRecord> = trades
        .iter()
        .filter(|t| t.timestamp >= start && t.timestamp < end)
        .collect();
    run_pipeline(in_window, (Some(start), Some(end)), config)
}

/// Analyze a market. With a close time the window ends one hour before
/// close; without one every trade is used.
pub fn analyze_market(
    trades: &[TradeRecord],
    closed_time: Option<DateTime<Utc>>,
    config: &AnalysisConfig,
) -> MarketAnalysis {
    match closed_time {
        Some(closed) => analyze_window(trades, closed - Duration::hours(1), config),
        None => run_pipeline(trades.iter().collect(), (None, None), config),
    }
}

// ---------------------------------------------------------------------------
// Incremental cache
// ---------------------------------------------------------------------------

/// Per-day results for a whole market, queried by scan time
pub struct ProfileCache {
    daily: Vec<DailyDirection>,
    trade_count: usize,
}

impl ProfileCache {
    pub fn build(trades: &[TradeRecord], config: &AnalysisConfig) -> Self {
        let profiles = build_daily_profiles(trades);
        let daily = analyze_daily(&profiles, config);
        debug!(days = daily.len(), trades = trades.len(), "Profile cache built");
        Self {
            daily,
            trade_count: trades.len(),
        }
    }

    pub fn days(&self) -> &[DailyDirection] {
        &self.daily
    }

    pub fn trade_count(&self) -> usize {
        self.trade_count
    }

    /// Aggregate the days between `scan_time - lookback_days` and
    /// `scan_time - 1h`, compared by calendar date. Also returns the
    /// windowed days, oldest first.
    pub fn analyze_at_time(
        &self,
        scan_time: DateTime<Utc>,
        lookback_days: i64,
    ) -> Option<(AggregateSignal, &[DailyDirection])> {
        let first = (scan_time - Duration::days(lookback_days)).date_naive();
        let last = (scan_time - Duration::hours(1)).date_naive();
        let lo = self.daily.partition_point(|d| d.date < first);
        let hi = self.daily.partition_point(|d| d.date <= last);
        if lo >= hi {
            return None;
        }
        let window = &self.daily[lo..hi];
        let refs: Vec<&DailyDirection> = window.iter().collect();
        Some((aggregate_unblended(&refs), window))
    }
}
