//! Infer a market's winning outcome from its final trades
//!
//! Resolved markets trade toward 1.0 on the winning token and 0.0 on the
//! losing one, so the tail of the tape is enough to call the outcome.

use crate::stats;
use crate::types::{OutcomeToken, TradeRecord};
use serde::{Deserialize, Serialize};

const MIN_TRADES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolutionParams {
    /// Number of most recent trades inspected
    pub tail: usize,
    /// Trades needed on a token before its mean price is trusted
    pub min_side_trades: usize,
    pub high: f64,
    pub low: f64,
    /// Fall back to the last YES trade price (0.70 / 0.30)
    pub last_trade_fallback: bool,
}

impl ResolutionParams {
    /// Used by batch validation
    pub fn strict() -> Self {
        Self {
            tail: 20,
            min_side_trades: 3,
            high: 0.85,
            low: 0.15,
            last_trade_fallback: false,
        }
    }

    /// Used by the strategy backtest
    pub fn lenient() -> Self {
        Self {
            tail: 50,
            min_side_trades: 2,
            high: 0.75,
            low: 0.25,
            last_trade_fallback: true,
        }
    }
}

pub fn infer_market_winner(trades: &[TradeRecord], params: &ResolutionParams) -> Option<OutcomeToken> {
    if trades.len() < MIN_TRADES {
        return None;
    }

    let mut ordered: Vec<&TradeRecord> = trades.iter().collect();
    ordered.sort_by_key(|t| t.timestamp);
    let tail = &ordered[ordered.len().saturating_sub(params.tail)..];

    let prices = |token: OutcomeToken| -> Vec<f64> {
        tail.iter()
            .filter(|t| t.token == token)
            .map(|t| t.price)
            .collect()
    };

    let yes = prices(OutcomeToken::Yes);
    if yes.len() >= params.min_side_trades {
        if let Some(avg) = stats::mean(&yes) {
            if avg > params.high {
                return Some(OutcomeToken::Yes);
            }
            if avg < params.low {
                return Some(OutcomeToken::No);
            }
        }
    }

    let no = prices(OutcomeToken::No);
    if no.len() >= params.min_side_trades {
        if let Some(avg) = stats::mean(&no) {
            if avg > params.high {
                return Some(OutcomeToken::No);
            }
            if avg < params.low {
                return Some(OutcomeToken::Yes);
            }
        }
    }

    if params.last_trade_fallback {
        let last_yes = ordered.iter().rev().find(|t| t.token == OutcomeToken::Yes)?;
        if last_yes.price > 0.70 {
            return Some(OutcomeToken::Yes);
        }
        if last_yes.price < 0.30 {
            return Some(OutcomeToken::No);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::tests::make_trade;
    use crate::types::TradeSide;
    use chrono::{Duration, TimeZone, Utc};

    fn tape(prices: &[(OutcomeToken, f64)]) -> Vec<TradeRecord> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, (token, price))| {
                make_trade(t0 + Duration::minutes(i as i64), "0xa", "0xb", *token, TradeSide::Buy, *price, 10.0)
            })
            .collect()
    }

    #[test]
    fn test_yes_token_converges_high() {
        let mut p = vec![(OutcomeToken::Yes, 0.5); 20];
        p.extend(vec![(OutcomeToken::Yes, 0.97); 20]);
        let trades = tape(&p);
        assert_eq!(infer_market_winner(&trades, &ResolutionParams::strict()), Some(OutcomeToken::Yes));
    }

    #[test]
    fn test_no_token_fallback() {
        let mut p = vec![(OutcomeToken::Yes, 0.5); 10];
        p.extend(vec![(OutcomeToken::No, 0.95); 10]);
        let trades = tape(&p);
        assert_eq!(infer_market_winner(&trades, &ResolutionParams::strict()), Some(OutcomeToken::No));
    }

    #[test]
    fn test_uncertain_and_too_few() {
        let trades = tape(&vec![(OutcomeToken::Yes, 0.5); 30]);
        assert_eq!(infer_market_winner(&trades, &ResolutionParams::strict()), None);
        let trades = tape(&vec![(OutcomeToken::Yes, 0.99); 9]);
        assert_eq!(infer_market_winner(&trades, &ResolutionParams::lenient()), None);
    }

    #[test]
    fn test_lenient_last_trade_fallback() {
        // Only one YES trade in the tail, below min_side_trades
        let mut p = vec![(OutcomeToken::No, 0.5); 60];
        p.push((OutcomeToken::Yes, 0.72));
        let trades = tape(&p);
        assert_eq!(infer_market_winner(&trades, &ResolutionParams::lenient()), Some(OutcomeToken::Yes));
        assert_eq!(infer_market_winner(&trades, &ResolutionParams::strict()), None);
    }
}
