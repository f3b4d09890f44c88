//! Direction Aggregator — turn scored wallets into a YES/NO signal
//!
//! Each day, wallets above the volume floor are scored; those at or above the
//! insider threshold vote with their conviction. Days are then combined with
//! a recency-weighted mean.

use crate::analyzer::AnalysisConfig;
use crate::profile::{DailyProfiles, DailyWalletProfile};
use crate::scoring::{score_daily_profile, ScoreBreakdown};
use crate::types::{Direction, SignalLabel};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const TOP_INSIDERS_PER_DAY: usize = 5;
const BLEND_MIN_ABS_SCORE: f64 = 0.5;
const BLEND_MIN_INSIDERS: usize = 5;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsiderWallet {
    pub address: String,
    pub score: u32,
    pub direction: Direction,
    pub conviction: f64,
    pub breakdown: ScoreBreakdown,
}

/// Insider consensus for a single day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyDirection {
    pub date: NaiveDate,
    pub insider_count: usize,
    pub yes_insiders: usize,
    pub no_insiders: usize,
    pub yes_conviction: f64,
    pub no_conviction: f64,
    /// (yes - no) / (yes + no), 0 without conviction
    pub direction_score: f64,
    pub signal: SignalLabel,
    pub top_insiders: Vec<InsiderWallet>,
}

/// Combined signal across a window of days
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSignal {
    pub signal: SignalLabel,
    pub predicted: Direction,
    pub direction_score: f64,
    pub days: usize,
    pub yes_days: usize,
    pub no_days: usize,
    pub neutral_days: usize,
    pub total_insiders: usize,
    pub last_day_score: f64,
    pub last_day_insiders: usize,
}

impl AggregateSignal {
    pub fn no_data() -> Self {
        Self {
            signal: SignalLabel::NoData,
            predicted: Direction::Neutral,
            direction_score: 0.0,
            days: 0,
            yes_days: 0,
            no_days: 0,
            neutral_days: 0,
            total_insiders: 0,
            last_day_score: 0.0,
            last_day_insiders: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Daily analysis
// ---------------------------------------------------------------------------

pub fn classify(score: f64) -> SignalLabel {
    SignalLabel::classify(score)
}

/// Score the wallets of one day and reduce the insiders to a direction.
pub fn analyze_day(
    date: NaiveDate,
    wallets: &HashMap<String, DailyWalletProfile>,
    config: &AnalysisConfig,
) -> DailyDirection {
    let mut insiders: Vec<InsiderWallet> = wallets
        .values()
        .filter(|p| p.total_volume() >= config.min_wallet_volume)
        .filter_map(|p| {
            let scored = score_daily_profile(p);
            (scored.score >= config.min_insider_score).then(|| InsiderWallet {
                address: p.address.clone(),
                score: scored.score,
                direction: p.direction(),
                conviction: p.conviction(),
                breakdown: scored.breakdown,
            })
        })
        .collect();

    let mut yes_insiders = 0;
    let mut no_insiders = 0;
    let mut yes_conviction = 0.0;
    let mut no_conviction = 0.0;
    for w in &insiders {
        match w.direction {
            Direction::Yes => {
                yes_insiders += 1;
                yes_conviction += w.conviction;
            }
            Direction::No => {
                no_insiders += 1;
                no_conviction += w.conviction;
            }
            Direction::Neutral => {}
        }
    }

    let total_conviction = yes_conviction + no_conviction;
    let direction_score = if total_conviction > 0.0 {
        (yes_conviction - no_conviction) / total_conviction
    } else {
        0.0
    };

    let insider_count = insiders.len();
    insiders.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.address.cmp(&b.address)));
    insiders.truncate(TOP_INSIDERS_PER_DAY);

    DailyDirection {
        date,
        insider_count,
        yes_insiders,
        no_insiders,
        yes_conviction,
        no_conviction,
        direction_score,
        signal: classify(direction_score),
        top_insiders: insiders,
    }
}

/// One `DailyDirection` per profiled day, oldest first
pub fn analyze_daily(profiles: &DailyProfiles, config: &AnalysisConfig) -> Vec<DailyDirection> {
    profiles
        .iter()
        .map(|(date, wallets)| analyze_day(*date, wallets, config))
        .collect()
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Recency weight by distance from the most recent day
fn day_weight(days_from_end: usize) -> f64 {
    match days_from_end {
        0 => 3.0,
        1..=2 => 2.0,
        3..=6 => 1.5,
        _ => 1.0,
    }
}

fn weighted_aggregate(daily: &[&DailyDirection], blend_last_day: bool) -> AggregateSignal {
    let Some(last) = daily.last() else {
        return AggregateSignal::no_data();
    };

    let n = daily.len();
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for (i, day) in daily.iter().enumerate() {
        let w = day_weight(n - 1 - i);
        weighted_sum += day.direction_score * w;
        weight_total += w;
    }
    let mut score = weighted_sum / weight_total;

    if blend_last_day
        && last.direction_score.abs() > BLEND_MIN_ABS_SCORE
        && last.insider_count >= BLEND_MIN_INSIDERS
    {
        score = (score + last.direction_score) / 2.0;
    }

    let count = |dir: Direction| daily.iter().filter(|d| d.signal.direction() == dir).count();
    let signal = classify(score);
    AggregateSignal {
        signal,
        predicted: signal.direction(),
        direction_score: score,
        days: n,
        yes_days: count(Direction::Yes),
        no_days: count(Direction::No),
        neutral_days: count(Direction::Neutral),
        total_insiders: daily.iter().map(|d| d.insider_count).sum(),
        last_day_score: last.direction_score,
        last_day_insiders: last.insider_count,
    }
}

/// Time-weighted aggregate. A strong, well-attended final day is blended
/// 50/50 into the weighted mean.
pub fn aggregate(daily: &[DailyDirection]) -> AggregateSignal {
    let refs: Vec<&DailyDirection> = daily.iter().collect();
    weighted_aggregate(&refs, true)
}

/// Time-weighted aggregate without the last-day blend
pub fn aggregate_unblended(daily: &[&DailyDirection]) -> AggregateSignal {
    weighted_aggregate(daily, false)
}
