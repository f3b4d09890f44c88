//! Trading strategy — map an insider signal to an entry decision and size
//!
//! All thresholds live in `StrategyConfig`; the defaults are starting points
//! for research, not fixed rules.

use crate::analyzer::MarketAnalysis;
use crate::direction::{AggregateSignal, DailyDirection};
use crate::types::{Direction, SignalLabel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const CONSISTENCY_WINDOW_DAYS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub min_direction_score: f64,
    pub strong_signal_threshold: f64,
    pub min_signal_days: usize,
    pub signal_consistency: f64,
    /// Fractions of capital
    pub base_position_pct: f64,
    pub max_position_pct: f64,
    pub max_entry_price: f64,
    pub min_entry_price: f64,
    pub exit_hours_before_close: i64,
    pub insider_min_score: u32,
    pub insider_lookback_days: i64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_direction_score: 0.15,
            strong_signal_threshold: 0.30,
            min_signal_days: 3,
            signal_consistency: 0.6,
            base_position_pct: 0.05,
            max_position_pct: 0.20,
            max_entry_price: 0.70,
            min_entry_price: 0.10,
            exit_hours_before_close: 2,
            insider_min_score: 80,
            insider_lookback_days: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Signal strength
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStrength {
    None,
    Weak,
    Moderate,
    Strong,
    Extreme,
}

impl SignalStrength {
    pub fn classify(score: f64, consistent_days: usize, insiders: usize) -> Self {
        let s = score.abs();
        if s >= 0.5 && consistent_days >= 5 && insiders >= 15 {
            Self::Extreme
        } else if s >= 0.3 && consistent_days >= 3 && insiders >= 8 {
            Self::Strong
        } else if s >= 0.15 && consistent_days >= 2 && insiders >= 3 {
            Self::Moderate
        } else if s >= 0.10 {
            Self::Weak
        } else {
            Self::None
        }
    }

    /// Discount demanded below the implied fair price
    pub fn edge_discount(&self) -> f64 {
        match self {
            Self::Extreme => 0.05,
            Self::Strong => 0.08,
            Self::Moderate => 0.12,
            Self::Weak | Self::None => 0.15,
        }
    }

    pub fn size_multiplier(&self) -> f64 {
        match self {
            Self::Extreme => 3.0,
            Self::Strong => 2.0,
            Self::Moderate => 1.5,
            Self::Weak | Self::None => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Weak => "WEAK",
            Self::Moderate => "MODERATE",
            Self::Strong => "STRONG",
            Self::Extreme => "EXTREME",
        }
    }
}

/// Days among the most recent ten whose daily signal agrees with `direction`
pub fn count_consistent_days(daily: &[DailyDirection], direction: Direction) -> usize {
    if direction == Direction::Neutral {
        return 0;
    }
    let skip = daily.len().saturating_sub(CONSISTENCY_WINDOW_DAYS);
    daily[skip..]
        .iter()
        .filter(|d| d.signal.direction() == direction)
        .count()
}

// ---------------------------------------------------------------------------
// Entry price
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryPrice {
    pub implied: f64,
    pub discount: f64,
    pub target: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDecision {
    pub enter: bool,
    pub reason: String,
}

impl EntryDecision {
    fn reject(reason: impl Into<String>) -> Self {
        Self {
            enter: false,
            reason: reason.into(),
        }
    }
}

pub struct EntryPriceCalculator<'a> {
    config: &'a StrategyConfig,
}

impl<'a> EntryPriceCalculator<'a> {
    pub fn new(config: &'a StrategyConfig) -> Self {
        Self { config }
    }

    /// Implied fair price of the predicted side is 0.5 + 0.4 * |score|.
    pub fn calculate(&self, score: f64, strength: SignalStrength) -> EntryPrice {
        let lo = self.config.min_entry_price;
        let hi = self.config.max_entry_price;
        let implied = 0.5 + score.abs() * 0.4;
        let discount = strength.edge_discount();
        EntryPrice {
            implied,
            discount,
            target: (implied * (1.0 - discount)).clamp(lo, hi),
            max: implied.min(hi).clamp(lo, hi),
        }
    }

    pub fn should_enter(&self, price: f64, max_price: f64) -> EntryDecision {
        if !(price > 0.0 && price < 1.0) {
            return EntryDecision::reject(format!("Invalid price {:.4}", price));
        }
        if price > self.config.max_entry_price {
            return EntryDecision::reject(format!(
                "Price {:.3} above max entry {:.2}",
                price, self.config.max_entry_price
            ));
        }
        if price < self.config.min_entry_price {
            return EntryDecision::reject(format!(
                "Price {:.3} below min entry {:.2}",
                price, self.config.min_entry_price
            ));
        }
        if price > max_price {
            return EntryDecision::reject(format!(
                "Price {:.3} above signal max {:.3}",
                price, max_price
            ));
        }
        EntryDecision {
            enter: true,
            reason: format!("Price {:.3} within max {:.3}", price, max_price),
        }
    }
}

// ---------------------------------------------------------------------------
// Position sizing
// ---------------------------------------------------------------------------

/// How far `price` sits below `max_price`, as a fraction of it. 0 without a
/// price or when the price is at or above the max.
pub fn entry_discount(price: Option<f64>, max_price: f64) -> f64 {
    match price {
        Some(p) if max_price > 0.0 => ((max_price - p) / max_price).max(0.0),
        _ => 0.0,
    }
}

pub struct PositionSizer<'a> {
    config: &'a StrategyConfig,
}

impl<'a> PositionSizer<'a> {
    pub fn new(config: &'a StrategyConfig) -> Self {
        Self { config }
    }

    /// Fraction of capital to commit
    pub fn calculate(&self, strength: SignalStrength, consistent_days: usize, discount: f64) -> f64 {
        let consistency = 1.0 + (consistent_days as f64 / 20.0).min(0.5);
        let edge = 1.0 + (discount * 2.0).min(0.3);
        let pct = self.config.base_position_pct * strength.size_multiplier() * consistency * edge;
        pct.min(self.config.max_position_pct)
    }
}

// ---------------------------------------------------------------------------
// Signal generation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    Hold,
    BuyYes,
    BuyNo,
    Wait,
}

impl TradeAction {
    pub fn buy(direction: Direction) -> Self {
        match direction {
            Direction::Yes => Self::BuyYes,
            Direction::No => Self::BuyNo,
            Direction::Neutral => Self::Hold,
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Self::BuyYes | Self::BuyNo)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub market_id: u64,
    pub generated_at: DateTime<Utc>,
    pub action: TradeAction,
    pub direction: Direction,
    pub signal: SignalLabel,
    pub strength: SignalStrength,
    pub direction_score: f64,
    pub consistent_days: usize,
    pub total_insiders: usize,
    /// Price of the predicted outcome token, when known
    pub current_price: Option<f64>,
    pub target_entry: f64,
    pub max_entry: f64,
    pub position_pct: f64,
    pub reason: String,
}

pub struct TradingStrategy {
    config: StrategyConfig,
}

impl TradingStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn entry_calculator(&self) -> EntryPriceCalculator<'_> {
        EntryPriceCalculator::new(&self.config)
    }

    pub fn position_sizer(&self) -> PositionSizer<'_> {
        PositionSizer::new(&self.config)
    }

    /// Build a recommendation from a market analysis. `current_price` is the
    /// price of the predicted token.
    pub fn generate_signal(
        &self,
        market_id: u64,
        analysis: &MarketAnalysis,
        current_price: Option<f64>,
        now: DateTime<Utc>,
    ) -> TradingSignal {
        let agg = analysis.aggregate();
        let consistent = count_consistent_days(analysis.daily(), agg.predicted);
        self.signal_from_aggregate(market_id, &agg, consistent, current_price, now)
    }

    pub fn signal_from_aggregate(
        &self,
        market_id: u64,
        agg: &AggregateSignal,
        consistent_days: usize,
        current_price: Option<f64>,
        now: DateTime<Utc>,
    ) -> TradingSignal {
        let score = agg.direction_score;
        let strength = SignalStrength::classify(score, consistent_days, agg.total_insiders);
        let entry = self.entry_calculator().calculate(score, strength);

        let mut signal = TradingSignal {
            market_id,
            generated_at: now,
            action: TradeAction::Hold,
            direction: agg.predicted,
            signal: agg.signal,
            strength,
            direction_score: score,
            consistent_days,
            total_insiders: agg.total_insiders,
            current_price,
            target_entry: entry.target,
            max_entry: entry.max,
            position_pct: 0.0,
            reason: String::new(),
        };

        if agg.predicted == Direction::Neutral {
            signal.reason = format!("No directional consensus ({})", agg.signal);
            return signal;
        }
        if strength == SignalStrength::None || score.abs() < self.config.min_direction_score {
            signal.reason = format!(
                "Signal too weak: score {:.3}, strength {}",
                score,
                strength.as_str()
            );
            return signal;
        }

        if let Some(price) = current_price {
            let decision = self.entry_calculator().should_enter(price, entry.max);
            if !decision.enter {
                signal.action = TradeAction::Wait;
                signal.reason = decision.reason;
                return signal;
            }
            signal.reason = decision.reason;
        } else {
            signal.reason = format!("Enter at or below {:.3}", entry.max);
        }

        signal.action = TradeAction::buy(agg.predicted);
        signal.position_pct = self
            .position_sizer()
            .calculate(strength, consistent_days, entry_discount(current_price, entry.max));
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direction::tests::day;

    fn agg(score: f64, insiders: usize, yes_days: usize, no_days: usize) -> AggregateSignal {
        let signal = SignalLabel::classify(score);
        AggregateSignal {
            signal,
            predicted: signal.direction(),
            direction_score: score,
            days: yes_days + no_days,
            yes_days,
            no_days,
            neutral_days: 0,
            total_insiders: insiders,
            last_day_score: score,
            last_day_insiders: 1,
        }
    }

    #[test]
    fn test_strength_tiers() {
        assert_eq!(SignalStrength::classify(0.6, 5, 15), SignalStrength::Extreme);
        assert_eq!(SignalStrength::classify(-0.6, 4, 15), SignalStrength::Strong);
        assert_eq!(SignalStrength::classify(0.35, 3, 7), SignalStrength::Moderate);
        assert_eq!(SignalStrength::classify(0.2, 1, 50), SignalStrength::Weak);
        assert_eq!(SignalStrength::classify(0.05, 10, 50), SignalStrength::None);
    }

    #[test]
    fn test_consistent_days_uses_last_ten() {
        let mut daily: Vec<_> = (0..5).map(|i| day(i, 0.5, 1)).collect();
        daily.extend((5..15).map(|i| day(i, if i % 2 == 0 { -0.5 } else { 0.0 }, 1)));
        assert_eq!(count_consistent_days(&daily, Direction::Yes), 0);
        assert_eq!(count_consistent_days(&daily, Direction::No), 5);
        assert_eq!(count_consistent_days(&daily, Direction::Neutral), 0);
    }

    #[test]
    fn test_entry_price_clamps() {
        let config = StrategyConfig::default();
        let calc = EntryPriceCalculator::new(&config);
        let e = calc.calculate(0.5, SignalStrength::Strong);
        assert!((e.implied - 0.7).abs() < 1e-9);
        assert!((e.target - 0.7 * 0.92).abs() < 1e-9);
        assert!((e.max - 0.7).abs() < 1e-9);

        let e = calc.calculate(1.0, SignalStrength::Extreme);
        assert_eq!(e.max, 0.70);
        assert_eq!(e.target, 0.70);
    }

    #[test]
    fn test_should_enter_rejections() {
        let config = StrategyConfig::default();
        let calc = EntryPriceCalculator::new(&config);
        assert!(!calc.should_enter(0.0, 0.6).enter);
        assert!(!calc.should_enter(1.2, 0.6).enter);
        assert!(!calc.should_enter(0.75, 0.9).enter);
        assert!(!calc.should_enter(0.05, 0.6).enter);
        assert!(!calc.should_enter(0.65, 0.6).enter);
        assert!(calc.should_enter(0.55, 0.6).enter);
    }

    #[test]
    fn test_position_sizer_caps() {
        let config = StrategyConfig::default();
        let sizer = PositionSizer::new(&config);
        let pct = sizer.calculate(SignalStrength::Moderate, 4, 0.12);
        assert!((pct - 0.05 * 1.5 * 1.2 * 1.24).abs() < 1e-9);
        assert_eq!(sizer.calculate(SignalStrength::Extreme, 20, 0.15), 0.20);
        assert!((sizer.calculate(SignalStrength::None, 0, 0.0) - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_entry_discount() {
        assert!((entry_discount(Some(0.5), 0.66) - 0.16 / 0.66).abs() < 1e-9);
        assert_eq!(entry_discount(Some(0.7), 0.66), 0.0);
        assert_eq!(entry_discount(None, 0.66), 0.0);
    }

    #[test]
    fn test_position_sized_from_price_below_max() {
        let strategy = TradingStrategy::new(StrategyConfig::default());
        let s = strategy.signal_from_aggregate(1, &agg(-0.4, 10, 0, 4), 4, Some(0.5), Utc::now());
        assert_eq!(s.strength, SignalStrength::Strong);
        assert!((s.max_entry - 0.66).abs() < 1e-9);
        // discount 0.16 / 0.66 caps the edge boost at 1.3
        assert!((s.position_pct - 0.05 * 2.0 * 1.2 * 1.3).abs() < 1e-9);

        // Without a price there is no edge boost
        let s = strategy.signal_from_aggregate(1, &agg(-0.4, 10, 0, 4), 4, None, Utc::now());
        assert!((s.position_pct - 0.05 * 2.0 * 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_signal_actions() {
        let strategy = TradingStrategy::new(StrategyConfig::default());
        let now = Utc::now();

        let s = strategy.signal_from_aggregate(1, &agg(-0.4, 10, 0, 4), 4, Some(0.5), now);
        assert_eq!(s.action, TradeAction::BuyNo);
        assert_eq!(s.strength, SignalStrength::Strong);
        assert!(s.position_pct > 0.0);

        let s = strategy.signal_from_aggregate(1, &agg(-0.4, 10, 0, 4), 4, Some(0.69), now);
        assert_eq!(s.action, TradeAction::Wait);
        assert_eq!(s.position_pct, 0.0);

        let s = strategy.signal_from_aggregate(1, &agg(0.12, 10, 3, 0), 3, None, now);
        assert_eq!(s.action, TradeAction::Hold);

        let s = strategy.signal_from_aggregate(1, &agg(0.2, 3, 2, 0), 2, None, now);
        assert_eq!(s.action, TradeAction::BuyYes);
        assert_eq!(s.strength, SignalStrength::Moderate);
    }
}
