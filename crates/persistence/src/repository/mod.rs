//! Repository implementations for database operations

pub mod backtest;
pub mod copy_trade;

pub use backtest::*;
pub use copy_trade::*;
