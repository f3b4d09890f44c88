//! Historical wallet backtest — do high-scoring wallets actually profit?
//!
//! Wallets are scored on what was visible at a simulation time, then settled
//! against the full trade history at resolution.

use crate::profile::{build_market_profiles, WalletMarketProfile};
use crate::scoring::{score_market_profile, MarketScoreBreakdown};
use crate::stats;
use crate::types::{OutcomeToken, TradeRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

const MIN_WALLETS_FOR_CORRELATION: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalConfig {
    pub market_id: u64,
    pub simulation_time: DateTime<Utc>,
    pub winning: OutcomeToken,
    pub min_volume_usd: f64,
    pub min_trades: usize,
    pub top_n: usize,
}

impl HistoricalConfig {
    pub fn new(market_id: u64, simulation_time: DateTime<Utc>, winning: OutcomeToken) -> Self {
        Self {
            market_id,
            simulation_time,
            winning,
            min_volume_usd: 1_000.0,
            min_trades: 5,
            top_n: 20,
        }
    }
}

/// Settled result of one wallet at resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub pnl: f64,
    pub invested: f64,
    pub roi: f64,
    pub correct_side: bool,
}

/// Winning shares pay $1, losing shares pay nothing.
pub fn settle(profile: &WalletMarketProfile, winning: OutcomeToken) -> Settlement {
    let win = profile.flow(winning);
    let lose = profile.flow(winning.opposite());
    let pnl = win.net_shares() - win.net_invested() - lose.net_invested();
    let invested = profile.yes.net_invested().abs() + profile.no.net_invested().abs();
    Settlement {
        pnl,
        invested,
        roi: if invested > 0.0 { pnl / invested } else { 0.0 },
        correct_side: win.net_shares() > 0.0,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletOutcome {
    pub address: String,
    pub score: u32,
    pub breakdown: MarketScoreBreakdown,
    /// Volume and trades visible at the simulation time
    pub volume: f64,
    pub trade_count: usize,
    pub yes_bias: f64,
    pub settlement: Settlement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalReport {
    pub generated_at: DateTime<Utc>,
    pub config: HistoricalConfig,
    pub trades_total: usize,
    pub trades_before_simulation: usize,
    pub wallets_scored: usize,
    /// Pearson correlation of score vs pnl
    pub correlation: f64,
    pub top_n_overlap: usize,
    /// Share of the top-N scorers holding the winning side
    pub top_correct_side_rate: f64,
    pub top_candidates: Vec<WalletOutcome>,
    pub top_winners: Vec<WalletOutcome>,
}

pub fn run_historical_backtest(trades: &[TradeRecord], config: &HistoricalConfig) -> HistoricalReport {
    let visible = build_market_profiles(trades, Some(config.simulation_time));
    let settled = build_market_profiles(trades, None);

    let mut wallets: Vec<WalletOutcome> = visible
        .values()
        .filter(|p| p.total_volume() >= config.min_volume_usd && p.trade_count >= config.min_trades)
        .map(|p| {
            let scored = score_market_profile(p, config.simulation_time);
            let settlement = settled
                .get(&p.address)
                .map(|full| settle(full, config.winning))
                .unwrap_or_default();
            WalletOutcome {
                address: p.address.clone(),
                score: scored.score,
                breakdown: scored.breakdown,
                volume: p.total_volume(),
                trade_count: p.trade_count,
                yes_bias: p.yes_bias(),
                settlement,
            }
        })
        .collect();
    wallets.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.address.cmp(&b.address)));

    let correlation = if wallets.len() > MIN_WALLETS_FOR_CORRELATION {
        let scores: Vec<f64> = wallets.iter().map(|w| w.score as f64).collect();
        let pnls: Vec<f64> = wallets.iter().map(|w| w.settlement.pnl).collect();
        stats::pearson(&scores, &pnls).unwrap_or(0.0)
    } else {
        0.0
    };

    let n = config.top_n.min(wallets.len());
    let top_candidates: Vec<WalletOutcome> = wallets[..n].to_vec();

    let mut by_pnl: Vec<&WalletOutcome> = wallets.iter().collect();
    by_pnl.sort_by(|a, b| {
        b.settlement
            .pnl
            .total_cmp(&a.settlement.pnl)
            .then_with(|| a.address.cmp(&b.address))
    });
    let top_winners: Vec<WalletOutcome> = by_pnl[..n].iter().map(|w| (*w).clone()).collect();

    let winner_set: HashSet<&str> = top_winners.iter().map(|w| w.address.as_str()).collect();
    let top_n_overlap = top_candidates
        .iter()
        .filter(|w| winner_set.contains(w.address.as_str()))
        .count();
    let top_correct_side_rate = if n > 0 {
        top_candidates.iter().filter(|w| w.settlement.correct_side).count() as f64 / n as f64
    } else {
        0.0
    };

    let trades_before_simulation = trades
        .iter()
        .filter(|t| t.timestamp <= config.simulation_time)
        .count();

    info!(
        market_id = config.market_id,
        wallets = wallets.len(),
        correlation = format!("{:.3}", correlation),
        overlap = top_n_overlap,
        "Historical wallet backtest complete"
    );

    HistoricalReport {
        generated_at: Utc::now(),
        config: config.clone(),
        trades_total: trades.len(),
        trades_before_simulation,
        wallets_scored: wallets.len(),
        correlation,
        top_n_overlap,
        top_correct_side_rate,
        top_candidates,
        top_winners,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::tests::make_trade;
    use crate::types::TradeSide;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
    }

    fn buy(ts: DateTime<Utc>, wallet: &str, token: OutcomeToken, price: f64, usd: f64) -> TradeRecord {
        // the counterparty is not a real wallet, so only the buyer is profiled
        make_trade(ts, wallet, "", token, TradeSide::Buy, price, usd)
    }

    /// Four one-day YES whales and eight slow NO buyers; YES wins
    fn market() -> Vec<TradeRecord> {
        let mut trades = Vec::new();
        for k in 0..4 {
            let wallet = format!("0xins{}", k);
            let base = t0() + Duration::days(9) + Duration::hours(k);
            for i in 0..4 {
                trades.push(buy(base + Duration::minutes(i), &wallet, OutcomeToken::Yes, 0.5, 1_000.0));
            }
            trades.push(buy(base + Duration::minutes(10), &wallet, OutcomeToken::Yes, 0.5, 60_000.0));
        }
        for k in 0..8 {
            let wallet = format!("0xretail{}", k);
            for d in 0..6 {
                trades.push(buy(t0() + Duration::days(d) + Duration::hours(k), &wallet, OutcomeToken::No, 0.5, 200.0));
            }
        }
        trades.push(buy(t0(), "0xsmall", OutcomeToken::No, 0.5, 50.0));
        trades.push(buy(t0() + Duration::hours(1), "0xsmall", OutcomeToken::No, 0.5, 50.0));
        // after the simulation time: settles but is not scored
        trades.push(buy(t0() + Duration::days(11), "0xins0", OutcomeToken::Yes, 0.9, 9_000.0));
        trades
    }

    fn config() -> HistoricalConfig {
        let mut c = HistoricalConfig::new(1, t0() + Duration::days(9) + Duration::hours(23), OutcomeToken::Yes);
        c.top_n = 4;
        c
    }

    #[test]
    fn test_settle_binary_payout() {
        let trades = vec![
            buy(t0(), "0xa", OutcomeToken::Yes, 0.25, 100.0),
            buy(t0(), "0xa", OutcomeToken::No, 0.5, 50.0),
        ];
        let profiles = build_market_profiles(&trades, None);
        let s = settle(&profiles["0xa"], OutcomeToken::Yes);
        // 400 shares pay 400, cost 100 + 50
        assert!((s.pnl - 250.0).abs() < 1e-9);
        assert!((s.invested - 150.0).abs() < 1e-9);
        assert!(s.correct_side);

        let s = settle(&profiles["0xa"], OutcomeToken::No);
        assert!((s.pnl - (100.0 - 50.0 - 100.0)).abs() < 1e-9);
    }

    #[test]
    fn test_scorers_match_winners() {
        let report = run_historical_backtest(&market(), &config());
        assert_eq!(report.wallets_scored, 12);
        assert_eq!(report.top_n_overlap, 4);
        assert_eq!(report.top_correct_side_rate, 1.0);
        assert!(report.correlation > 0.9);
        assert!(report.top_candidates.iter().all(|w| w.address.starts_with("0xins")));

        let ins0 = report.top_candidates.iter().find(|w| w.address == "0xins0").unwrap();
        assert_eq!(ins0.trade_count, 5);
        // 64k bought at 0.5 plus 9k at 0.9
        assert!((ins0.settlement.pnl - (64_000.0 + 1_000.0)).abs() < 1e-6);
        assert_eq!(report.top_winners[0].address, "0xins0");
    }

    #[test]
    fn test_correlation_needs_enough_wallets() {
        let trades: Vec<TradeRecord> = market()
            .into_iter()
            .filter(|t| !t.maker.starts_with("0xretail"))
            .collect();
        let report = run_historical_backtest(&trades, &config());
        assert_eq!(report.wallets_scored, 4);
        assert_eq!(report.correlation, 0.0);
    }
}
