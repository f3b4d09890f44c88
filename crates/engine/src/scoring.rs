//! Insider Scorer — heuristic point scoring of wallet profiles
//!
//! Two variants:
//! - daily: scores one wallet's buy activity on one day (conviction, size
//!   anomaly, timing burst, directional bias)
//! - market: scores a wallet's whole history in one market, used by the
//!   historical wallet backtest
//!
//! Scores are plain additive point totals with no upper clamp.

use crate::profile::{DailyWalletProfile, WalletMarketProfile};
use crate::stats;
use crate::types::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConvictionTier {
    Whale,
    High,
    Moderate,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizeAnomaly {
    Extreme,
    High,
    Moderate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimingPattern {
    ExtremeBurst,
    Burst,
    Concentrated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirectionalBias {
    Extreme,
    High,
}

/// Which tiers fired, plus the raw metrics behind them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub conviction: Option<ConvictionTier>,
    pub size_anomaly: Option<SizeAnomaly>,
    pub timing: Option<TimingPattern>,
    pub directional: Option<DirectionalBias>,
    pub conviction_usd: f64,
    pub size_ratio: Option<f64>,
    pub span_hours: f64,
    pub directional_ratio: f64,
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsiderScore {
    pub score: u32,
    pub breakdown: ScoreBreakdown,
}

// ---------------------------------------------------------------------------
// Daily scorer
// ---------------------------------------------------------------------------

fn conviction_points(conviction: f64) -> (u32, Option<ConvictionTier>) {
    if conviction >= 100_000.0 {
        (40, Some(ConvictionTier::Whale))
    } else if conviction >= 50_000.0 {
        (30, Some(ConvictionTier::High))
    } else if conviction >= 20_000.0 {
        (20, Some(ConvictionTier::Moderate))
    } else if conviction >= 10_000.0 {
        (10, Some(ConvictionTier::Low))
    } else {
        (0, None)
    }
}

/// max/median trade size, when there are enough trades to compare.
fn size_ratio(sizes: &[f64], min_trades: usize) -> Option<f64> {
    if sizes.len() < min_trades {
        return None;
    }
    let median = stats::median(sizes)?;
    if median <= 0.0 {
        return None;
    }
    Some(stats::max(sizes)? / median)
}

fn size_anomaly_points(ratio: Option<f64>) -> (u32, Option<SizeAnomaly>) {
    match ratio {
        Some(r) if r > 50.0 => (30, Some(SizeAnomaly::Extreme)),
        Some(r) if r > 20.0 => (20, Some(SizeAnomaly::High)),
        Some(r) if r > 10.0 => (10, Some(SizeAnomaly::Moderate)),
        _ => (0, None),
    }
}

/// Score one wallet-day. Max 120 points.
pub fn score_daily_profile(profile: &DailyWalletProfile) -> InsiderScore {
    let mut score = 0;
    let mut breakdown = ScoreBreakdown {
        direction: Some(profile.direction()),
        ..Default::default()
    };

    let conviction = profile.conviction();
    let (points, tier) = conviction_points(conviction);
    score += points;
    breakdown.conviction = tier;
    breakdown.conviction_usd = conviction;

    let ratio = size_ratio(&profile.trade_sizes, 2);
    let (points, anomaly) = size_anomaly_points(ratio);
    score += points;
    breakdown.size_anomaly = anomaly;
    breakdown.size_ratio = ratio;

    let total = profile.total_volume();
    let span = profile.span_hours();
    breakdown.span_hours = span;
    let (points, timing) = if span <= 2.0 && total > 20_000.0 {
        (30, Some(TimingPattern::ExtremeBurst))
    } else if span <= 6.0 {
        (20, Some(TimingPattern::Burst))
    } else if span <= 12.0 {
        (10, Some(TimingPattern::Concentrated))
    } else {
        (0, None)
    };
    score += points;
    breakdown.timing = timing;

    if total > 0.0 {
        let ratio = (profile.buy_vol_yes - profile.buy_vol_no).abs() / total;
        breakdown.directional_ratio = ratio;
        if ratio > 0.9 {
            score += 20;
            breakdown.directional = Some(DirectionalBias::Extreme);
        } else if ratio > 0.7 {
            score += 10;
            breakdown.directional = Some(DirectionalBias::High);
        }
    }

    InsiderScore { score, breakdown }
}

// ---------------------------------------------------------------------------
// Market scorer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketScoreBreakdown {
    pub concentration: u32,
    pub size_anomaly: u32,
    pub timing: u32,
    pub directional: u32,
    pub volume_bonus: u32,
    pub one_day_trader: bool,
    pub peak_day_share: f64,
    pub size_ratio: Option<f64>,
    pub days_before_sim: i64,
    pub directional_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketInsiderScore {
    pub score: u32,
    pub breakdown: MarketScoreBreakdown,
}

/// Score a wallet's whole-market history as seen at `simulation_time`.
pub fn score_market_profile(
    profile: &WalletMarketProfile,
    simulation_time: DateTime<Utc>,
) -> MarketInsiderScore {
    let mut b = MarketScoreBreakdown::default();

    // Volume concentration
    let total_daily: f64 = profile.volume_by_day.values().sum();
    if profile.active_days() == 1 {
        b.one_day_trader = true;
        b.peak_day_share = 1.0;
        b.concentration = 50;
    } else if total_daily > 0.0 {
        let peak = profile
            .volume_by_day
            .values()
            .copied()
            .fold(0.0_f64, f64::max);
        b.peak_day_share = peak / total_daily;
        b.concentration = if b.peak_day_share > 0.8 {
            50
        } else if b.peak_day_share > 0.6 {
            35
        } else if b.peak_day_share > 0.4 {
            20
        } else {
            0
        };
    }

    b.size_ratio = size_ratio(&profile.trade_sizes, 5);
    b.size_anomaly = size_anomaly_points(b.size_ratio).0;

    // Recency relative to the simulated "now", then burst
    // Whole days only: 3.5 days out still counts as 3
    b.days_before_sim = (simulation_time - profile.last_ts).num_days();
    if b.days_before_sim <= 3 {
        b.timing += 10;
    } else if b.days_before_sim <= 7 {
        b.timing += 5;
    }
    let volume = profile.total_volume();
    let span = profile.span_days();
    if span <= 3 && volume > 10_000.0 {
        b.timing += 30;
    } else if span <= 7 && volume > 10_000.0 {
        b.timing += 15;
    }

    b.directional_ratio = profile.directional_ratio();
    b.directional = if b.directional_ratio > 0.9 {
        25
    } else if b.directional_ratio > 0.7 {
        15
    } else if b.directional_ratio > 0.5 {
        5
    } else {
        0
    };

    b.volume_bonus = if volume > 100_000.0 {
        20
    } else if volume > 50_000.0 {
        10
    } else {
        0
    };

    let score = b.concentration + b.size_anomaly + b.timing + b.directional + b.volume_bonus;
    MarketInsiderScore { score, breakdown: b }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{build_market_profiles, tests::make_trade};
    use crate::types::{OutcomeToken, TradeSide};
    use chrono::{Duration, NaiveDate, TimeZone};

    fn daily(yes: f64, no: f64, sizes: Vec<f64>, span_hours: i64) -> DailyWalletProfile {
        let first = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        DailyWalletProfile {
            address: "0xw".into(),
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            buy_vol_yes: yes,
            buy_vol_no: no,
            trade_sizes: sizes,
            first_ts: first,
            last_ts: first + Duration::hours(span_hours),
        }
    }

    #[test]
    fn test_max_score_whale_burst() {
        // 120k YES in one burst, one huge trade among tiny ones
        let mut sizes = vec![100.0; 20];
        sizes.push(118_000.0);
        let p = daily(120_000.0, 0.0, sizes, 1);
        let s = score_daily_profile(&p);
        assert_eq!(s.score, 40 + 30 + 30 + 20);
        assert_eq!(s.breakdown.conviction, Some(ConvictionTier::Whale));
        assert_eq!(s.breakdown.size_anomaly, Some(SizeAnomaly::Extreme));
        assert_eq!(s.breakdown.timing, Some(TimingPattern::ExtremeBurst));
        assert_eq!(s.breakdown.directional, Some(DirectionalBias::Extreme));
        assert_eq!(s.breakdown.direction, Some(Direction::Yes));
    }

    #[test]
    fn test_small_balanced_wallet_scores_low() {
        let p = daily(500.0, 500.0, vec![500.0, 500.0], 20);
        let s = score_daily_profile(&p);
        assert_eq!(s.score, 0);
        assert_eq!(s.breakdown.direction, Some(Direction::Neutral));
    }

    #[test]
    fn test_short_span_without_volume_is_burst_not_extreme() {
        let p = daily(15_000.0, 0.0, vec![15_000.0], 1);
        let s = score_daily_profile(&p);
        // LOW conviction + BURST + EXTREME directional, single trade gives no size ratio
        assert_eq!(s.score, 10 + 20 + 20);
        assert_eq!(s.breakdown.size_ratio, None);
        assert_eq!(s.breakdown.timing, Some(TimingPattern::Burst));
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(conviction_points(100_000.0).0, 40);
        assert_eq!(conviction_points(99_999.0).0, 30);
        assert_eq!(conviction_points(9_999.0).0, 0);
        assert_eq!(size_anomaly_points(Some(50.0)).0, 20);
        assert_eq!(size_anomaly_points(Some(10.0)).0, 0);
        assert_eq!(size_ratio(&[1.0, 0.0, 0.0], 2), None);
    }

    #[test]
    fn test_market_scorer_one_day_whale() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let trades: Vec<_> = (0..6)
            .map(|i| {
                let usd = if i == 5 { 60_000.0 } else { 1_000.0 };
                make_trade(t0 + Duration::minutes(i * 10), "0xw", "0xlp", OutcomeToken::Yes, TradeSide::Buy, 0.5, usd)
            })
            .collect();
        let profiles = build_market_profiles(&trades, None);
        let s = score_market_profile(&profiles["0xw"], t0 + Duration::days(2));
        let b = &s.breakdown;
        assert!(b.one_day_trader);
        assert_eq!(b.concentration, 50);
        assert_eq!(b.size_anomaly, 30);
        assert_eq!(b.timing, 10 + 30);
        assert_eq!(b.directional, 25);
        assert_eq!(b.volume_bonus, 10);
        assert_eq!(s.score, 50 + 30 + 40 + 25 + 10);
    }

    #[test]
    fn test_market_scorer_counts_whole_days() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let trades = vec![
            make_trade(t0, "0xw", "0xlp", OutcomeToken::Yes, TradeSide::Buy, 0.5, 8_000.0),
            make_trade(t0 + Duration::hours(84), "0xw", "0xlp", OutcomeToken::Yes, TradeSide::Buy, 0.5, 8_000.0),
        ];
        let profiles = build_market_profiles(&trades, None);
        let profile = &profiles["0xw"];
        assert_eq!(profile.span_days(), 3);

        // Last trade 3.5 days before the simulated now
        let s = score_market_profile(profile, t0 + Duration::hours(168));
        assert_eq!(s.breakdown.days_before_sim, 3);
        assert_eq!(s.breakdown.timing, 10 + 30);

        // Four full days out drops to the weaker tiers
        let s = score_market_profile(profile, t0 + Duration::hours(84 + 96));
        assert_eq!(s.breakdown.days_before_sim, 4);
        assert_eq!(s.breakdown.timing, 5 + 30);
    }
}
