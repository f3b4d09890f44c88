//! Wallet profiles — per-day buy profiles and whole-market flow profiles

use crate::types::{Direction, OutcomeToken, TradeRecord, TradeSide};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Addresses that show up as placeholders in the archive
fn is_valid_address(addr: &str) -> bool {
    !(addr.is_empty() || addr == "nan" || addr == "none")
}

// ---------------------------------------------------------------------------
// Daily profile
// ---------------------------------------------------------------------------

/// Buy-side activity of one wallet on one UTC day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyWalletProfile {
    pub address: String,
    pub date: NaiveDate,
    pub buy_vol_yes: f64,
    pub buy_vol_no: f64,
    pub trade_sizes: Vec<f64>,
    pub first_ts: DateTime<Utc>,
    pub last_ts: DateTime<Utc>,
}

impl DailyWalletProfile {
    fn new(address: &str, ts: DateTime<Utc>) -> Self {
        Self {
            address: address.to_string(),
            date: ts.date_naive(),
            buy_vol_yes: 0.0,
            buy_vol_no: 0.0,
            trade_sizes: Vec::new(),
            first_ts: ts,
            last_ts: ts,
        }
    }

    fn record_buy(&mut self, token: OutcomeToken, usd: f64, ts: DateTime<Utc>) {
        self.trade_sizes.push(usd);
        if ts < self.first_ts {
            self.first_ts = ts;
        }
        if ts > self.last_ts {
            self.last_ts = ts;
        }
        match token {
            OutcomeToken::Yes => self.buy_vol_yes += usd,
            OutcomeToken::No => self.buy_vol_no += usd,
        }
    }

    pub fn total_volume(&self) -> f64 {
        self.buy_vol_yes + self.buy_vol_no
    }

    pub fn direction(&self) -> Direction {
        if self.buy_vol_yes > self.buy_vol_no {
            Direction::Yes
        } else if self.buy_vol_no > self.buy_vol_yes {
            Direction::No
        } else {
            Direction::Neutral
        }
    }

    /// Size of the dominant side
    pub fn conviction(&self) -> f64 {
        self.buy_vol_yes.max(self.buy_vol_no)
    }

    pub fn span_hours(&self) -> f64 {
        (self.last_ts - self.first_ts).num_seconds() as f64 / 3600.0
    }
}

/// Day -> wallet -> profile. Days iterate in calendar order.
pub type DailyProfiles = BTreeMap<NaiveDate, HashMap<String, DailyWalletProfile>>;

/// Build buy-side profiles per day. Only the buying participant of each
/// fill is recorded.
pub fn build_daily_profiles<'a>(trades: impl IntoIterator<Item = &'a TradeRecord>) -> DailyProfiles {
    let mut days: DailyProfiles = BTreeMap::new();
    for trade in trades {
        for (addr, side) in trade.participants() {
            if side != TradeSide::Buy || !is_valid_address(addr) {
                continue;
            }
            let wallets = days.entry(trade.timestamp.date_naive()).or_default();
            wallets
                .entry(addr.to_string())
                .or_insert_with(|| DailyWalletProfile::new(addr, trade.timestamp))
                .record_buy(trade.token, trade.usd_amount, trade.timestamp);
        }
    }
    days
}

// ---------------------------------------------------------------------------
// Whole-market profile
// ---------------------------------------------------------------------------

/// Buy/sell flow for one outcome token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenFlow {
    pub buy_usd: f64,
    pub sell_usd: f64,
    pub buy_shares: f64,
    pub sell_shares: f64,
}

impl TokenFlow {
    pub fn net_shares(&self) -> f64 {
        self.buy_shares - self.sell_shares
    }

    pub fn net_invested(&self) -> f64 {
        self.buy_usd - self.sell_usd
    }
}

/// All activity of one wallet in one market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletMarketProfile {
    pub address: String,
    pub yes: TokenFlow,
    pub no: TokenFlow,
    pub trade_count: usize,
    pub trade_sizes: Vec<f64>,
    pub first_ts: DateTime<Utc>,
    pub last_ts: DateTime<Utc>,
    pub trades_by_day: BTreeMap<NaiveDate, usize>,
    pub volume_by_day: BTreeMap<NaiveDate, f64>,
}

impl WalletMarketProfile {
    fn new(address: &str, ts: DateTime<Utc>) -> Self {
        Self {
            address: address.to_string(),
            yes: TokenFlow::default(),
            no: TokenFlow::default(),
            trade_count: 0,
            trade_sizes: Vec::new(),
            first_ts: ts,
            last_ts: ts,
            trades_by_day: BTreeMap::new(),
            volume_by_day: BTreeMap::new(),
        }
    }

    fn record(&mut self, trade: &TradeRecord, side: TradeSide) {
        let flow = match trade.token {
            OutcomeToken::Yes => &mut self.yes,
            OutcomeToken::No => &mut self.no,
        };
        match side {
            TradeSide::Buy => {
                flow.buy_usd += trade.usd_amount;
                flow.buy_shares += trade.token_amount;
            }
            TradeSide::Sell => {
                flow.sell_usd += trade.usd_amount;
                flow.sell_shares += trade.token_amount;
            }
        }
        self.trade_count += 1;
        self.trade_sizes.push(trade.usd_amount);
        self.first_ts = self.first_ts.min(trade.timestamp);
        self.last_ts = self.last_ts.max(trade.timestamp);
        let day = trade.timestamp.date_naive();
        *self.trades_by_day.entry(day).or_default() += 1;
        *self.volume_by_day.entry(day).or_default() += trade.usd_amount;
    }

    pub fn flow(&self, token: OutcomeToken) -> &TokenFlow {
        match token {
            OutcomeToken::Yes => &self.yes,
            OutcomeToken::No => &self.no,
        }
    }

    pub fn total_buy(&self) -> f64 {
        self.yes.buy_usd + self.no.buy_usd
    }

    pub fn total_sell(&self) -> f64 {
        self.yes.sell_usd + self.no.sell_usd
    }

    pub fn total_volume(&self) -> f64 {
        self.total_buy() + self.total_sell()
    }

    pub fn active_days(&self) -> usize {
        self.trades_by_day.len()
    }

    /// Whole days between first and last trade, rounded down
    pub fn span_days(&self) -> i64 {
        (self.last_ts - self.first_ts).num_days()
    }

    /// |buy - sell| / (buy + sell); 0 for an empty profile
    pub fn directional_ratio(&self) -> f64 {
        let total = self.total_volume();
        if total > 0.0 {
            (self.total_buy() - self.total_sell()).abs() / total
        } else {
            0.0
        }
    }

    /// Net YES flow against net NO flow, in [-1, 1]
    pub fn yes_bias(&self) -> f64 {
        let yes = self.yes.net_invested();
        let no = self.no.net_invested();
        let denom = yes.abs() + no.abs();
        if denom > 0.0 {
            (yes - no) / denom
        } else {
            0.0
        }
    }
}

/// Profiles of every wallet in a market, both sides of each fill.
/// With `until`, trades after that instant are ignored.
pub fn build_market_profiles(
    trades: &[TradeRecord],
    until: Option<DateTime<Utc>>,
) -> HashMap<String, WalletMarketProfile> {
    let mut wallets: HashMap<String, WalletMarketProfile> = HashMap::new();
    for trade in trades {
        if until.map_or(false, |cutoff| trade.timestamp > cutoff) {
            continue;
        }
        for (addr, side) in trade.participants() {
            if !is_valid_address(addr) {
                continue;
            }
            wallets
                .entry(addr.to_string())
                .or_insert_with(|| WalletMarketProfile::new(addr, trade.timestamp))
                .record(trade, side);
        }
    }
    wallets
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn make_trade(
        ts: DateTime<Utc>,
        maker: &str,
        taker: &str,
        token: OutcomeToken,
        maker_dir: TradeSide,
        price: f64,
        usd: f64,
    ) -> TradeRecord {
        TradeRecord {
            timestamp: ts,
            market_id: 1,
            maker: maker.into(),
            taker: taker.into(),
            token,
            maker_direction: maker_dir,
            price,
            usd_amount: usd,
            token_amount: if price > 0.0 { usd / price } else { 0.0 },
            transaction_hash: None,
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_profiles_record_only_buyers() {
        let trades = vec![
            // maker buys YES
            make_trade(at(1, 9), "0xa", "0xb", OutcomeToken::Yes, TradeSide::Buy, 0.6, 1000.0),
            // maker sells NO, so taker buys NO
            make_trade(at(1, 11), "0xc", "0xa", OutcomeToken::No, TradeSide::Sell, 0.4, 300.0),
            make_trade(at(2, 8), "nan", "0xd", OutcomeToken::Yes, TradeSide::Buy, 0.5, 50.0),
        ];
        let days = build_daily_profiles(&trades);
        assert_eq!(days.len(), 1);

        let day1 = &days[&at(1, 0).date_naive()];
        assert_eq!(day1.len(), 1);
        let a = &day1["0xa"];
        assert_eq!(a.buy_vol_yes, 1000.0);
        assert_eq!(a.buy_vol_no, 300.0);
        assert_eq!(a.trade_sizes, vec![1000.0, 300.0]);
        assert_eq!(a.direction(), Direction::Yes);
        assert_eq!(a.conviction(), 1000.0);
        assert!((a.span_hours() - 2.0).abs() < 1e-9);

        // placeholder maker skipped, seller taker not recorded
        assert!(!days.contains_key(&at(2, 0).date_naive()));
    }

    #[test]
    fn test_market_profiles_track_both_sides() {
        let trades = vec![
            make_trade(at(1, 9), "0xa", "0xb", OutcomeToken::Yes, TradeSide::Buy, 0.5, 100.0),
            make_trade(at(3, 9), "0xa", "0xb", OutcomeToken::Yes, TradeSide::Sell, 0.8, 40.0),
            make_trade(at(9, 9), "0xa", "0xb", OutcomeToken::No, TradeSide::Buy, 0.2, 10.0),
        ];
        let all = build_market_profiles(&trades, None);
        let a = &all["0xa"];
        assert_eq!(a.trade_count, 3);
        assert_eq!(a.yes.buy_usd, 100.0);
        assert_eq!(a.yes.sell_usd, 40.0);
        assert!((a.yes.net_shares() - (200.0 - 50.0)).abs() < 1e-9);
        assert_eq!(a.active_days(), 3);
        let b = &all["0xb"];
        assert_eq!(b.yes.sell_usd, 100.0);
        assert_eq!(b.no.sell_usd, 10.0);

        let early = build_market_profiles(&trades, Some(at(4, 0)));
        assert_eq!(early["0xa"].trade_count, 2);
        assert!((early["0xa"].directional_ratio() - 60.0 / 140.0).abs() < 1e-9);
    }
}
