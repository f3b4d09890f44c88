pub mod polymarket;

pub use polymarket::{ApiTrade, GammaMarket, PolymarketClient};
