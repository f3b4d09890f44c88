//! Copy Trader — mirror a target wallet's fills at a scaled size
//!
//! Polls the Data API for the target's latest trades, runs each new fill
//! through the risk checks and sends the scaled order to an `OrderExecutor`.
//! Only paper execution is provided.

use crate::api::polymarket::{ApiTrade, GammaMarket, PolymarketClient};
use crate::types::TradeSide;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use persistence::repository::copy_trade::{CopyTradeRecord, CopyTradeRepository};
use persistence::SqlitePool;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const FETCH_LIMIT: u32 = 10;
const MAX_SEEN_HASHES: usize = 100;
const MAX_DECISIONS: usize = 50;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyTraderConfig {
    pub target_wallet: String,
    /// Fraction of the target's notional to copy
    pub position_ratio: f64,
    pub max_position_usd: f64,
    pub min_position_usd: f64,
    pub daily_loss_limit: f64,
    pub max_open_positions: usize,
    pub max_slippage_pct: f64,
    pub min_liquidity: f64,
    pub max_trade_age_secs: i64,
    /// Market slugs never copied
    pub excluded_markets: Vec<String>,
    pub copy_maker_trades: bool,
    pub poll_interval_secs: u64,
    pub dry_run: bool,
}

impl Default for CopyTraderConfig {
    fn default() -> Self {
        Self {
            target_wallet: String::new(),
            position_ratio: 0.1,
            max_position_usd: 50.0,
            min_position_usd: 1.0,
            daily_loss_limit: 200.0,
            max_open_positions: 10,
            max_slippage_pct: 2.0,
            min_liquidity: 5_000.0,
            max_trade_age_secs: 30,
            excluded_markets: Vec::new(),
            copy_maker_trades: false,
            poll_interval_secs: 3,
            dry_run: true,
        }
    }
}

impl CopyTraderConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.target_wallet.trim().is_empty() {
            anyhow::bail!("target_wallet is required");
        }
        if !(self.position_ratio > 0.0 && self.position_ratio <= 1.0) {
            anyhow::bail!("position_ratio must be in (0, 1], got {}", self.position_ratio);
        }
        if self.max_position_usd <= 0.0 {
            anyhow::bail!("max_position_usd must be positive");
        }
        if self.min_position_usd > self.max_position_usd {
            anyhow::bail!(
                "min_position_usd {} exceeds max_position_usd {}",
                self.min_position_usd,
                self.max_position_usd
            );
        }
        if !self.dry_run {
            anyhow::bail!("live order signing is not supported; run in dry-run mode");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CopySkip {
    #[error("trade is {age_secs}s old")]
    Stale { age_secs: i64 },
    #[error("daily loss limit reached ({pnl:.2})")]
    DailyLossLimit { pnl: f64 },
    #[error("{open} open positions at limit")]
    MaxOpenPositions { open: usize },
    #[error("market info unavailable")]
    NoMarketInfo,
    #[error("liquidity {liquidity:.0} below minimum")]
    LowLiquidity { liquidity: f64 },
    #[error("slippage {pct:.1}% above maximum")]
    Slippage { pct: f64 },
    #[error("market {slug} is excluded")]
    ExcludedMarket { slug: String },
    #[error("trade is missing {0}")]
    InvalidTrade(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    Copied,
    Skipped,
    Failed,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copied => "COPIED",
            Self::Skipped => "SKIPPED",
            Self::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyOrder {
    pub condition_id: String,
    pub token_id: Option<String>,
    pub outcome: String,
    pub side: TradeSide,
    pub size: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyDecision {
    pub trade_hash: String,
    pub target_wallet: String,
    pub condition_id: String,
    pub side: String,
    pub outcome: Option<String>,
    pub title: Option<String>,
    pub target_size: f64,
    pub target_price: f64,
    pub copy_size: f64,
    pub status: DecisionStatus,
    pub reason: Option<String>,
    pub order_id: Option<String>,
    pub trade_timestamp: i64,
    pub decided_at: DateTime<Utc>,
}

impl CopyDecision {
    pub fn to_record(&self) -> CopyTradeRecord {
        CopyTradeRecord {
            id: None,
            trade_hash: self.trade_hash.clone(),
            target_wallet: self.target_wallet.clone(),
            condition_id: self.condition_id.clone(),
            side: self.side.clone(),
            outcome: self.outcome.clone(),
            title: self.title.clone(),
            target_size: self.target_size,
            target_price: self.target_price,
            copy_size: self.copy_size,
            status: self.status.as_str().to_string(),
            reason: self.reason.clone(),
            order_id: self.order_id.clone(),
            created_at: None,
        }
    }
}

/// Deterministic hash of a target fill, used to deduplicate the ledger
pub fn decision_hash(wallet: &str, trade: &ApiTrade) -> String {
    let key = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}",
        wallet.to_lowercase(),
        trade.transaction_hash.as_deref().unwrap_or(""),
        trade.condition_id.as_deref().unwrap_or(""),
        trade.asset.as_deref().unwrap_or(""),
        trade.side.as_deref().unwrap_or(""),
        trade.timestamp.unwrap_or(0),
        trade.size.unwrap_or(0.0),
        trade.price.unwrap_or(0.0),
    );
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Copy size in shares: the target's notional scaled by `position_ratio`,
/// clamped to the USD bounds, rounded to 2 dp.
pub fn position_size(target_size: f64, target_price: f64, config: &CopyTraderConfig) -> f64 {
    let amount = (target_size * target_price * config.position_ratio)
        .max(config.min_position_usd)
        .min(config.max_position_usd);
    let size = if target_price > 0.0 {
        amount / target_price
    } else {
        amount
    };
    (size * 100.0).round() / 100.0
}

pub fn slippage_pct(current: f64, target: f64) -> Option<f64> {
    (target > 0.0).then(|| (current - target).abs() / target * 100.0)
}

fn token_for(market: &GammaMarket, outcome: &str) -> Option<String> {
    market
        .outcomes
        .iter()
        .position(|o| o.eq_ignore_ascii_case(outcome))
        .and_then(|i| market.clob_token_ids.get(i))
        .or_else(|| market.clob_token_ids.first())
        .cloned()
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Source of target fills and market metadata
#[async_trait]
pub trait TradeFeed: Send + Sync {
    /// Most recent fills first
    async fn recent_trades(&self, wallet: &str, limit: u32, taker_only: bool) -> anyhow::Result<Vec<ApiTrade>>;

    async fn market(&self, condition_id: &str) -> anyhow::Result<Option<GammaMarket>>;
}

#[async_trait]
impl TradeFeed for PolymarketClient {
    async fn recent_trades(&self, wallet: &str, limit: u32, taker_only: bool) -> anyhow::Result<Vec<ApiTrade>> {
        self.get_trades(wallet, limit, taker_only).await
    }

    async fn market(&self, condition_id: &str) -> anyhow::Result<Option<GammaMarket>> {
        self.get_market_by_condition(condition_id).await
    }
}

/// Trait for order execution.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    fn is_dry_run(&self) -> bool;

    /// Place an order, returning its id
    async fn place_order(&self, order: &CopyOrder) -> anyhow::Result<String>;
}

/// Logs and records orders without sending them anywhere
#[derive(Default)]
pub struct PaperExecutor {
    orders: Mutex<Vec<CopyOrder>>,
}

impl PaperExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders(&self) -> Vec<CopyOrder> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderExecutor for PaperExecutor {
    fn is_dry_run(&self) -> bool {
        true
    }

    async fn place_order(&self, order: &CopyOrder) -> anyhow::Result<String> {
        let mut orders = self.orders.lock().unwrap();
        orders.push(order.clone());
        info!(
            side = order.side.as_str(),
            size = order.size,
            price = order.price,
            outcome = %order.outcome,
            condition_id = %order.condition_id,
            "[paper] order placed"
        );
        Ok(format!("paper-{}", orders.len()))
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CopyState {
    /// Latest target trade timestamp seen (unix seconds)
    pub watermark: i64,
    pub seen: HashSet<String>,
    pub daily_pnl: f64,
    pub day: NaiveDate,
    pub open_positions: usize,
    markets: HashMap<String, GammaMarket>,
}

impl CopyState {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            watermark: 0,
            seen: HashSet::new(),
            daily_pnl: 0.0,
            day: today,
            open_positions: 0,
            markets: HashMap::new(),
        }
    }

    /// Reset daily PnL on a new UTC date. Returns true if it rolled.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        if today == self.day {
            return false;
        }
        info!(%today, "New trading day, daily PnL reset");
        self.daily_pnl = 0.0;
        self.day = today;
        true
    }

    /// Fills at or after the watermark with an unseen key, oldest first.
    /// Advances the watermark and the seen set.
    pub fn select_new(&mut self, wallet: &str, trades: Vec<ApiTrade>) -> Vec<ApiTrade> {
        let mut fresh: Vec<ApiTrade> = trades
            .into_iter()
            .filter(|t| t.timestamp.unwrap_or(0) >= self.watermark)
            .filter(|t| !self.seen.contains(&trade_key(wallet, t)))
            .collect();
        fresh.sort_by_key(|t| t.timestamp.unwrap_or(0));

        for t in &fresh {
            self.watermark = self.watermark.max(t.timestamp.unwrap_or(0));
            self.seen.insert(trade_key(wallet, t));
        }
        if self.seen.len() > MAX_SEEN_HASHES {
            self.seen = fresh.iter().map(|t| trade_key(wallet, t)).collect();
        }
        fresh
    }
}

fn trade_key(wallet: &str, trade: &ApiTrade) -> String {
    trade
        .transaction_hash
        .clone()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| decision_hash(wallet, trade))
}

// ---------------------------------------------------------------------------
// Trader
// ---------------------------------------------------------------------------

pub struct CopyTrader<'a> {
    feed: &'a dyn TradeFeed,
    executor: &'a dyn OrderExecutor,
    config: CopyTraderConfig,
    state: CopyState,
}

impl<'a> CopyTrader<'a> {
    pub fn new(
        feed: &'a dyn TradeFeed,
        executor: &'a dyn OrderExecutor,
        config: CopyTraderConfig,
        today: NaiveDate,
    ) -> Self {
        Self {
            feed,
            executor,
            config,
            state: CopyState::new(today),
        }
    }

    pub fn state(&self) -> &CopyState {
        &self.state
    }

    pub fn config(&self) -> &CopyTraderConfig {
        &self.config
    }

    pub fn record_realized_pnl(&mut self, pnl: f64) {
        self.state.daily_pnl += pnl;
    }

    fn taker_only(&self) -> bool {
        !self.config.copy_maker_trades
    }

    /// Anchor the watermark on the target's most recent fill so history is
    /// never replayed.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        let wallet = self.config.target_wallet.clone();
        let latest = self.feed.recent_trades(&wallet, 1, self.taker_only()).await?;
        if let Some(t) = latest.first() {
            self.state.watermark = t.timestamp.unwrap_or(0);
            self.state.seen.insert(trade_key(&wallet, t));
            info!(watermark = self.state.watermark, "Copy start point set");
        }
        Ok(())
    }

    /// One polling cycle: fetch, select new fills, decide on each.
    pub async fn poll_once(&mut self, now: DateTime<Utc>) -> anyhow::Result<Vec<CopyDecision>> {
        self.state.roll_day(now.date_naive());
        let wallet = self.config.target_wallet.clone();
        let trades = self
            .feed
            .recent_trades(&wallet, FETCH_LIMIT, self.taker_only())
            .await?;
        let fresh = self.state.select_new(&wallet, trades);

        let mut decisions = Vec::with_capacity(fresh.len());
        for trade in fresh {
            decisions.push(self.process_trade(&trade, now).await);
        }
        Ok(decisions)
    }

    fn pre_market_checks(&self, trade: &ApiTrade, side: TradeSide, now: DateTime<Utc>) -> Result<(), CopySkip> {
        let age_secs = now.timestamp() - trade.timestamp.unwrap_or(0);
        if age_secs > self.config.max_trade_age_secs {
            return Err(CopySkip::Stale { age_secs });
        }
        if self.state.daily_pnl < -self.config.daily_loss_limit {
            return Err(CopySkip::DailyLossLimit {
                pnl: self.state.daily_pnl,
            });
        }
        if side == TradeSide::Buy && self.state.open_positions >= self.config.max_open_positions {
            return Err(CopySkip::MaxOpenPositions {
                open: self.state.open_positions,
            });
        }
        Ok(())
    }

    fn market_checks(&self, trade: &ApiTrade, market: &GammaMarket) -> Result<(), CopySkip> {
        if market.liquidity < self.config.min_liquidity {
            return Err(CopySkip::LowLiquidity {
                liquidity: market.liquidity,
            });
        }
        let outcome = trade.outcome.as_deref().unwrap_or("Yes");
        let current = market
            .price_of(outcome)
            .or_else(|| market.outcome_prices.first().copied());
        if let Some(pct) = current.and_then(|c| slippage_pct(c, trade.price.unwrap_or(0.0))) {
            if pct > self.config.max_slippage_pct {
                return Err(CopySkip::Slippage { pct });
            }
        }
        if self.config.excluded_markets.iter().any(|s| s == &market.slug) {
            return Err(CopySkip::ExcludedMarket {
                slug: market.slug.clone(),
            });
        }
        Ok(())
    }

    /// Cached Gamma lookup; failures are logged and treated as unavailable
    async fn market_info(&mut self, condition_id: &str) -> Option<GammaMarket> {
        if let Some(m) = self.state.markets.get(condition_id) {
            return Some(m.clone());
        }
        match self.feed.market(condition_id).await {
            Ok(Some(m)) => {
                self.state.markets.insert(condition_id.to_string(), m.clone());
                Some(m)
            }
            Ok(None) => None,
            Err(e) => {
                debug!(condition_id, error = %e, "Market lookup failed");
                None
            }
        }
    }

    async fn process_trade(&mut self, trade: &ApiTrade, now: DateTime<Utc>) -> CopyDecision {
        let wallet = self.config.target_wallet.clone();
        let side = TradeSide::parse(trade.side.as_deref().unwrap_or(""));
        let target_size = trade.size.unwrap_or(0.0);
        let target_price = trade.price.unwrap_or(0.0);
        let mut decision = CopyDecision {
            trade_hash: decision_hash(&wallet, trade),
            target_wallet: wallet,
            condition_id: trade.condition_id.clone().unwrap_or_default(),
            side: side.as_str().to_string(),
            outcome: trade.outcome.clone(),
            title: trade.title.clone(),
            target_size,
            target_price,
            copy_size: 0.0,
            status: DecisionStatus::Skipped,
            reason: None,
            order_id: None,
            trade_timestamp: trade.timestamp.unwrap_or(0),
            decided_at: now,
        };
        info!(
            side = %decision.side,
            size = target_size,
            price = target_price,
            title = %decision.title.as_deref().unwrap_or("Unknown"),
            "New target trade"
        );

        let checked = self.check_trade(trade, side, now).await;
        let market = match checked {
            Ok(m) => m,
            Err(skip) => {
                info!(reason = %skip, "Trade skipped");
                decision.reason = Some(skip.to_string());
                return decision;
            }
        };

        let order = CopyOrder {
            condition_id: decision.condition_id.clone(),
            token_id: token_for(&market, trade.outcome.as_deref().unwrap_or("Yes")),
            outcome: trade.outcome.clone().unwrap_or_else(|| "Yes".into()),
            side,
            size: position_size(target_size, target_price, &self.config),
            price: target_price,
        };
        decision.copy_size = order.size;

        match self.executor.place_order(&order).await {
            Ok(order_id) => {
                match side {
                    TradeSide::Buy => self.state.open_positions += 1,
                    TradeSide::Sell => {
                        self.state.open_positions = self.state.open_positions.saturating_sub(1)
                    }
                }
                decision.status = DecisionStatus::Copied;
                decision.order_id = Some(order_id);
            }
            Err(e) => {
                warn!(error = %e, "Order failed");
                decision.status = DecisionStatus::Failed;
                decision.reason = Some(e.to_string());
            }
        }
        decision
    }

    async fn check_trade(
        &mut self,
        trade: &ApiTrade,
        side: TradeSide,
        now: DateTime<Utc>,
    ) -> Result<GammaMarket, CopySkip> {
        if trade.price.map_or(true, |p| p <= 0.0) {
            return Err(CopySkip::InvalidTrade("price"));
        }
        if trade.size.map_or(true, |s| s <= 0.0) {
            return Err(CopySkip::InvalidTrade("size"));
        }
        let condition_id = trade
            .condition_id
            .clone()
            .ok_or(CopySkip::InvalidTrade("condition id"))?;

        self.pre_market_checks(trade, side, now)?;
        let market = self
            .market_info(&condition_id)
            .await
            .ok_or(CopySkip::NoMarketInfo)?;
        self.market_checks(trade, &market)?;
        Ok(market)
    }
}

// ---------------------------------------------------------------------------
// Progress & loop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CopyRunStatus {
    Idle,
    Running,
    Stopped,
    Error,
}

/// Shared state for a running copy trader (same pattern as BacktestProgress)
pub struct CopyProgress {
    pub status: RwLock<CopyRunStatus>,
    pub cancelled: AtomicBool,
    pub cycles: AtomicU32,
    pub copied: AtomicU32,
    pub skipped: AtomicU32,
    pub failed: AtomicU32,
    pub decisions: RwLock<Vec<CopyDecision>>,
    pub error_message: RwLock<Option<String>>,
    pub started_at: RwLock<Option<String>>,
}

impl CopyProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(CopyRunStatus::Idle),
            cancelled: AtomicBool::new(false),
            cycles: AtomicU32::new(0),
            copied: AtomicU32::new(0),
            skipped: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            decisions: RwLock::new(Vec::new()),
            error_message: RwLock::new(None),
            started_at: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.status.read().unwrap(), CopyRunStatus::Running)
    }

    fn push_decision(&self, decision: CopyDecision) {
        let counter = match decision.status {
            DecisionStatus::Copied => &self.copied,
            DecisionStatus::Skipped => &self.skipped,
            DecisionStatus::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        let mut decisions = self.decisions.write().unwrap();
        decisions.insert(0, decision);
        decisions.truncate(MAX_DECISIONS);
    }
}

impl Default for CopyProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the copy trader until cancelled. Decisions are written to the
/// ledger when a database pool is given.
pub async fn run_copy_trader(
    feed: &dyn TradeFeed,
    executor: &dyn OrderExecutor,
    config: CopyTraderConfig,
    progress: &CopyProgress,
    db_pool: Option<SqlitePool>,
) -> anyhow::Result<()> {
    if let Err(e) = config.validate() {
        *progress.status.write().unwrap() = CopyRunStatus::Error;
        *progress.error_message.write().unwrap() = Some(e.to_string());
        return Err(e);
    }

    info!(
        wallet = %config.target_wallet,
        ratio = config.position_ratio,
        max_usd = config.max_position_usd,
        dry_run = executor.is_dry_run(),
        interval_secs = config.poll_interval_secs,
        "Copy trader starting"
    );
    *progress.status.write().unwrap() = CopyRunStatus::Running;
    *progress.started_at.write().unwrap() = Some(Utc::now().to_rfc3339());

    let interval = config.poll_interval_secs;
    let mut trader = CopyTrader::new(feed, executor, config, Utc::now().date_naive());
    if let Err(e) = trader.initialize().await {
        warn!(error = %e, "Failed to set copy start point");
    }

    loop {
        if progress.cancelled.load(Ordering::Relaxed) {
            info!("Copy trader cancelled");
            break;
        }

        match trader.poll_once(Utc::now()).await {
            Ok(decisions) => {
                if decisions.is_empty() {
                    debug!("No new target trades");
                }
                for d in decisions {
                    if let Some(pool) = &db_pool {
                        let repo = CopyTradeRepository::new(pool);
                        if let Err(e) = repo.record(&d.to_record()).await {
                            warn!(error = %e, "Failed to persist copy decision");
                        }
                    }
                    progress.push_decision(d);
                }
            }
            Err(e) => warn!(error = %e, "Copy poll failed"),
        }
        progress.cycles.fetch_add(1, Ordering::Relaxed);

        // Cancellable wait before the next poll
        for _ in 0..(interval * 2) {
            if progress.cancelled.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }

    *progress.status.write().unwrap() = CopyRunStatus::Stopped;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    struct FakeFeed {
        trades: Mutex<Vec<ApiTrade>>,
        markets: HashMap<String, GammaMarket>,
    }

    impl FakeFeed {
        fn new(markets: Vec<GammaMarket>) -> Self {
            Self {
                trades: Mutex::new(Vec::new()),
                markets: markets
                    .into_iter()
                    .map(|m| (m.condition_id.clone(), m))
                    .collect(),
            }
        }

        /// Newest first, like the Data API
        fn set_trades(&self, mut trades: Vec<ApiTrade>) {
            trades.sort_by_key(|t| std::cmp::Reverse(t.timestamp));
            *self.trades.lock().unwrap() = trades;
        }
    }

    #[async_trait]
    impl TradeFeed for FakeFeed {
        async fn recent_trades(&self, _wallet: &str, limit: u32, _taker_only: bool) -> anyhow::Result<Vec<ApiTrade>> {
            let trades = self.trades.lock().unwrap();
            Ok(trades.iter().take(limit as usize).cloned().collect())
        }

        async fn market(&self, condition_id: &str) -> anyhow::Result<Option<GammaMarket>> {
            Ok(self.markets.get(condition_id).cloned())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    fn market(cond: &str, slug: &str, liquidity: f64, yes_price: f64) -> GammaMarket {
        GammaMarket {
            condition_id: cond.into(),
            slug: slug.into(),
            question: format!("{}?", slug),
            liquidity,
            outcomes: vec!["Yes".into(), "No".into()],
            outcome_prices: vec![yes_price, 1.0 - yes_price],
            clob_token_ids: vec!["tok-yes".into(), "tok-no".into()],
            closed: false,
        }
    }

    fn trade(hash: &str, cond: &str, side: &str, age_secs: i64, size: f64, price: f64) -> ApiTrade {
        ApiTrade {
            proxy_wallet: Some("0xtarget".into()),
            side: Some(side.into()),
            asset: None,
            condition_id: Some(cond.into()),
            size: Some(size),
            price: Some(price),
            timestamp: Some(now().timestamp() - age_secs),
            title: Some("Test market".into()),
            slug: None,
            event_slug: None,
            outcome: Some("Yes".into()),
            outcome_index: Some(0),
            transaction_hash: Some(hash.into()),
        }
    }

    fn config() -> CopyTraderConfig {
        CopyTraderConfig {
            target_wallet: "0xtarget".into(),
            excluded_markets: vec!["banned".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());
        assert!(CopyTraderConfig::default().validate().is_err());
        assert!(CopyTraderConfig { position_ratio: 1.5, ..config() }.validate().is_err());
        assert!(CopyTraderConfig { max_position_usd: 0.0, ..config() }.validate().is_err());
        assert!(CopyTraderConfig { dry_run: false, ..config() }.validate().is_err());
    }

    #[test]
    fn test_position_size_clamps() {
        let c = config();
        // 100 @ 0.5 = $50 notional, 10% = $5
        assert_eq!(position_size(100.0, 0.5, &c), 10.0);
        // floor at $1
        assert_eq!(position_size(1.0, 0.5, &c), 2.0);
        // cap at $50
        assert_eq!(position_size(10_000.0, 0.5, &c), 100.0);
        assert_eq!(position_size(1.0, 0.3, &c), 3.33);
    }

    #[test]
    fn test_slippage_and_hash() {
        assert!((slippage_pct(0.51, 0.5).unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(slippage_pct(0.5, 0.0), None);

        let a = trade("0x1", "0xc", "BUY", 5, 10.0, 0.5);
        assert_eq!(decision_hash("0xTarget", &a), decision_hash("0xtarget", &a));
        let b = trade("0x1", "0xc", "BUY", 5, 11.0, 0.5);
        assert_ne!(decision_hash("0xtarget", &a), decision_hash("0xtarget", &b));
    }

    #[test]
    fn test_select_new_watermark_and_seen() {
        let mut state = CopyState::new(now().date_naive());
        state.watermark = now().timestamp() - 10;
        state.seen.insert("0xold".into());

        let picked = state.select_new(
            "0xtarget",
            vec![
                trade("0xnew2", "0xc", "BUY", 2, 1.0, 0.5),
                trade("0xold", "0xc", "BUY", 10, 1.0, 0.5),
                trade("0xnew1", "0xc", "BUY", 5, 1.0, 0.5),
                trade("0xancient", "0xc", "BUY", 60, 1.0, 0.5),
            ],
        );
        let hashes: Vec<_> = picked.iter().filter_map(|t| t.transaction_hash.clone()).collect();
        assert_eq!(hashes, vec!["0xnew1", "0xnew2"]);
        assert_eq!(state.watermark, now().timestamp() - 2);
        assert!(state.select_new("0xtarget", picked).is_empty());
    }

    #[test]
    fn test_seen_set_resets_to_batch() {
        let mut state = CopyState::new(now().date_naive());
        for i in 0..100 {
            state.seen.insert(format!("0xprev{}", i));
        }
        let picked = state.select_new("0xtarget", vec![trade("0xa", "0xc", "BUY", 1, 1.0, 0.5)]);
        assert_eq!(picked.len(), 1);
        assert_eq!(state.seen.len(), 1);
        assert!(state.seen.contains("0xa"));
    }

    #[test]
    fn test_roll_day_resets_pnl() {
        let mut state = CopyState::new(now().date_naive());
        state.daily_pnl = -50.0;
        assert!(!state.roll_day(now().date_naive()));
        assert_eq!(state.daily_pnl, -50.0);
        assert!(state.roll_day((now() + Duration::days(1)).date_naive()));
        assert_eq!(state.daily_pnl, 0.0);
    }

    #[tokio::test]
    async fn test_poll_applies_risk_checks() {
        let feed = FakeFeed::new(vec![
            market("0xgood", "good", 10_000.0, 0.505),
            market("0xthin", "thin", 100.0, 0.5),
            market("0xmoved", "moved", 10_000.0, 0.62),
            market("0xbanned", "banned", 10_000.0, 0.5),
        ]);
        let executor = PaperExecutor::new();
        let mut trader = CopyTrader::new(&feed, &executor, config(), now().date_naive());

        feed.set_trades(vec![trade("0xstart", "0xgood", "BUY", 100, 10.0, 0.5)]);
        trader.initialize().await.unwrap();
        assert_eq!(trader.state().watermark, now().timestamp() - 100);

        feed.set_trades(vec![
            trade("0xstart", "0xgood", "BUY", 100, 10.0, 0.5),
            trade("0xstale", "0xgood", "BUY", 60, 10.0, 0.5),
            trade("0xthin1", "0xthin", "BUY", 9, 10.0, 0.5),
            trade("0xmoved1", "0xmoved", "BUY", 8, 10.0, 0.5),
            trade("0xban1", "0xbanned", "BUY", 7, 10.0, 0.5),
            trade("0xunknown", "0xnowhere", "BUY", 6, 10.0, 0.5),
            trade("0xgood1", "0xgood", "BUY", 5, 100.0, 0.5),
        ]);
        let decisions = trader.poll_once(now()).await.unwrap();
        assert_eq!(decisions.len(), 6);

        let status: Vec<_> = decisions.iter().map(|d| d.status).collect();
        assert_eq!(
            status,
            vec![
                DecisionStatus::Skipped,
                DecisionStatus::Skipped,
                DecisionStatus::Skipped,
                DecisionStatus::Skipped,
                DecisionStatus::Skipped,
                DecisionStatus::Copied,
            ]
        );
        assert!(decisions[0].reason.as_deref().unwrap().contains("60s old"));
        assert!(decisions[1].reason.as_deref().unwrap().contains("liquidity"));
        assert!(decisions[2].reason.as_deref().unwrap().contains("slippage"));
        assert!(decisions[3].reason.as_deref().unwrap().contains("excluded"));
        assert_eq!(decisions[4].reason.as_deref(), Some("market info unavailable"));

        let copied = &decisions[5];
        assert_eq!(copied.copy_size, 10.0);
        assert_eq!(copied.order_id.as_deref(), Some("paper-1"));
        let orders = executor.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].token_id.as_deref(), Some("tok-yes"));
        assert_eq!(trader.state().open_positions, 1);

        // nothing new on the next cycle
        assert!(trader.poll_once(now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_position_cap_and_daily_loss() {
        let feed = FakeFeed::new(vec![market("0xgood", "good", 10_000.0, 0.5)]);
        let executor = PaperExecutor::new();
        let cfg = CopyTraderConfig {
            max_open_positions: 1,
            ..config()
        };
        let mut trader = CopyTrader::new(&feed, &executor, cfg, now().date_naive());

        feed.set_trades(vec![
            trade("0xb1", "0xgood", "BUY", 3, 10.0, 0.5),
            trade("0xb2", "0xgood", "BUY", 2, 10.0, 0.5),
            trade("0xs1", "0xgood", "SELL", 1, 10.0, 0.5),
        ]);
        let d = trader.poll_once(now()).await.unwrap();
        assert_eq!(d[0].status, DecisionStatus::Copied);
        assert_eq!(d[1].status, DecisionStatus::Skipped);
        assert!(d[1].reason.as_deref().unwrap().contains("open positions"));
        // sells are not capped and free a slot
        assert_eq!(d[2].status, DecisionStatus::Copied);
        assert_eq!(trader.state().open_positions, 0);

        trader.record_realized_pnl(-250.0);
        feed.set_trades(vec![trade("0xs2", "0xgood", "SELL", 0, 10.0, 0.5)]);
        let d = trader.poll_once(now()).await.unwrap();
        assert!(d[0].reason.as_deref().unwrap().contains("daily loss limit"));

        // a new UTC day clears the loss
        feed.set_trades(vec![trade("0xs3", "0xgood", "SELL", -86_400, 10.0, 0.5)]);
        let d = trader.poll_once(now() + Duration::days(1)).await.unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].status, DecisionStatus::Copied);
        assert_eq!(trader.state().daily_pnl, 0.0);
    }
}
