//! Core types shared across the insider-detection pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome token of a binary market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeToken {
    Yes,
    No,
}

impl OutcomeToken {
    /// `token1` is the YES token; every other value maps to NO.
    pub fn from_nonusdc_side(side: &str) -> Self {
        if side.trim().eq_ignore_ascii_case("token1") {
            Self::Yes
        } else {
            Self::No
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "YES",
            Self::No => "NO",
        }
    }

    /// Archive encoding used in `nonusdc_side`
    pub fn as_nonusdc_side(&self) -> &'static str {
        match self {
            Self::Yes => "token1",
            Self::No => "token0",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Yes => Self::No,
            Self::No => Self::Yes,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Self::Yes => Direction::Yes,
            Self::No => Direction::No,
        }
    }
}

impl fmt::Display for OutcomeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// Anything other than `BUY` (case-insensitive) is a sell.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("BUY") {
            Self::Buy
        } else {
            Self::Sell
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// A single fill from the processed trade archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub market_id: u64,
    pub maker: String,
    pub taker: String,
    /// Outcome token exchanged against USDC
    pub token: OutcomeToken,
    pub maker_direction: TradeSide,
    pub price: f64,
    pub usd_amount: f64,
    pub token_amount: f64,
    pub transaction_hash: Option<String>,
}

impl TradeRecord {
    /// Side taken by the taker (always opposite to the maker)
    pub fn taker_direction(&self) -> TradeSide {
        self.maker_direction.opposite()
    }

    /// Both participants with their side, maker first
    pub fn participants(&self) -> [(&str, TradeSide); 2] {
        [
            (self.maker.as_str(), self.maker_direction),
            (self.taker.as_str(), self.taker_direction()),
        ]
    }
}

/// Market metadata from `markets.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketInfo {
    pub id: u64,
    pub question: String,
    pub closed_time: Option<DateTime<Utc>>,
    pub volume: f64,
    pub slug: Option<String>,
    pub condition_id: Option<String>,
}

/// Net direction of a wallet or of an aggregate signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Yes,
    No,
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "YES",
            Self::No => "NO",
            Self::Neutral => "NEUTRAL",
        }
    }

    pub fn token(&self) -> Option<OutcomeToken> {
        match self {
            Self::Yes => Some(OutcomeToken::Yes),
            Self::No => Some(OutcomeToken::No),
            Self::Neutral => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discrete label attached to a direction score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalLabel {
    StrongYes,
    Yes,
    Neutral,
    No,
    StrongNo,
    NoData,
}

impl SignalLabel {
    /// Map a score in [-1, 1] to a label
    pub fn classify(score: f64) -> Self {
        if score > 0.3 {
            Self::StrongYes
        } else if score > 0.1 {
            Self::Yes
        } else if score < -0.3 {
            Self::StrongNo
        } else if score < -0.1 {
            Self::No
        } else {
            Self::Neutral
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Self::StrongYes | Self::Yes => Direction::Yes,
            Self::StrongNo | Self::No => Direction::No,
            Self::Neutral | Self::NoData => Direction::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrongYes => "STRONG_YES",
            Self::Yes => "YES",
            Self::Neutral => "NEUTRAL",
            Self::No => "NO",
            Self::StrongNo => "STRONG_NO",
            Self::NoData => "NO_DATA",
        }
    }
}

impl fmt::Display for SignalLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonusdc_side_mapping() {
        assert_eq!(OutcomeToken::from_nonusdc_side("token1"), OutcomeToken::Yes);
        assert_eq!(OutcomeToken::from_nonusdc_side(" TOKEN1 "), OutcomeToken::Yes);
        assert_eq!(OutcomeToken::from_nonusdc_side("token0"), OutcomeToken::No);
        assert_eq!(OutcomeToken::from_nonusdc_side("token2"), OutcomeToken::No);
    }

    #[test]
    fn test_classify_thresholds() {
        assert_eq!(SignalLabel::classify(0.31), SignalLabel::StrongYes);
        assert_eq!(SignalLabel::classify(0.3), SignalLabel::Yes);
        assert_eq!(SignalLabel::classify(0.1), SignalLabel::Neutral);
        assert_eq!(SignalLabel::classify(-0.1), SignalLabel::Neutral);
        assert_eq!(SignalLabel::classify(-0.2), SignalLabel::No);
        assert_eq!(SignalLabel::classify(-0.9), SignalLabel::StrongNo);
        assert_eq!(SignalLabel::StrongNo.direction(), Direction::No);
        assert_eq!(SignalLabel::NoData.direction(), Direction::Neutral);
    }

    #[test]
    fn test_label_serializes_screaming_snake() {
        let json = serde_json::to_string(&SignalLabel::StrongYes).unwrap();
        assert_eq!(json, "\"STRONG_YES\"");
        let json = serde_json::to_string(&Direction::Neutral).unwrap();
        assert_eq!(json, "\"NEUTRAL\"");
    }
}
