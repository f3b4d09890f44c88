//! Poly Insider Engine — insider-wallet detection for Polymarket
//!
//! Provides:
//! - Trade extraction from the processed archive, with a per-market cache
//! - Wallet profiling and insider scoring (daily and whole-market)
//! - Direction aggregation into YES/NO signals and a trading strategy
//! - Backtest harnesses: batch validation, strategy backtest, historical wallets
//! - A paper copy trader driven by the Polymarket public APIs

pub mod analyzer;
pub mod api;
pub mod backtest;
pub mod copy_trader;
pub mod direction;
pub mod extractor;
pub mod historical;
pub mod profile;
pub mod resolution;
pub mod scoring;
pub mod stats;
pub mod strategy;
pub mod types;

// Re-exports for convenience
pub use analyzer::{analyze_market, analyze_window, AnalysisConfig, InsiderReport, MarketAnalysis, ProfileCache};
pub use api::{ApiTrade, GammaMarket, PolymarketClient};
pub use backtest::{
    analyze_signal, backtest_market, run_strategy_backtest, run_validation, write_report, write_report_to,
    BacktestProgress, BacktestStatus, MarketBacktestResult, SignalReport, StrategyBacktestConfig,
    StrategyBacktestReport, TradeOutcome, ValidationReport,
};
pub use copy_trader::{
    run_copy_trader, CopyDecision, CopyProgress, CopyTrader, CopyTraderConfig, OrderExecutor, PaperExecutor,
    TradeFeed,
};
pub use direction::{AggregateSignal, DailyDirection};
pub use extractor::{DataExtractor, ExtractError, ExtractorConfig, MarketCatalog};
pub use historical::{run_historical_backtest, HistoricalConfig, HistoricalReport};
pub use resolution::{infer_market_winner, ResolutionParams};
pub use strategy::{SignalStrength, StrategyConfig, TradeAction, TradingSignal, TradingStrategy};
pub use types::*;
