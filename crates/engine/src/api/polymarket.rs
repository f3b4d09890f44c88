//! Polymarket public API client — no authentication required
//!
//! Uses `data-api.polymarket.com` for wallet trades and
//! `gamma-api.polymarket.com` for market metadata.

use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

const DATA_API_URL: &str = "https://data-api.polymarket.com";
const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

#[derive(Clone)]
pub struct PolymarketClient {
    client: Client,
    data_url: String,
    gamma_url: String,
}

// ---------------------------------------------------------------------------
// Deserialization structs
// ---------------------------------------------------------------------------

/// A fill from `GET /trades`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTrade {
    pub proxy_wallet: Option<String>,
    pub side: Option<String>,
    pub asset: Option<String>,
    pub condition_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub size: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub price: Option<f64>,
    /// Unix seconds
    #[serde(default, deserialize_with = "lenient_i64")]
    pub timestamp: Option<i64>,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub event_slug: Option<String>,
    pub outcome: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub outcome_index: Option<i64>,
    pub transaction_hash: Option<String>,
}

/// Raw Gamma market; list fields arrive as JSON-encoded strings
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGammaMarket {
    condition_id: Option<String>,
    slug: Option<String>,
    question: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    liquidity: Option<f64>,
    #[serde(default)]
    outcomes: Value,
    #[serde(default)]
    outcome_prices: Value,
    #[serde(default)]
    clob_token_ids: Value,
    closed: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GammaMarket {
    pub condition_id: String,
    pub slug: String,
    pub question: String,
    pub liquidity: f64,
    pub outcomes: Vec<String>,
    pub outcome_prices: Vec<f64>,
    pub clob_token_ids: Vec<String>,
    pub closed: bool,
}

impl GammaMarket {
    /// Current price of an outcome by name (case-insensitive)
    pub fn price_of(&self, outcome: &str) -> Option<f64> {
        let idx = self
            .outcomes
            .iter()
            .position(|o| o.eq_ignore_ascii_case(outcome))?;
        self.outcome_prices.get(idx).copied()
    }
}

impl From<RawGammaMarket> for GammaMarket {
    fn from(raw: RawGammaMarket) -> Self {
        Self {
            condition_id: raw.condition_id.unwrap_or_default(),
            slug: raw.slug.unwrap_or_default(),
            question: raw.question.unwrap_or_default(),
            liquidity: raw.liquidity.unwrap_or(0.0),
            outcomes: string_list(&raw.outcomes),
            outcome_prices: string_list(&raw.outcome_prices)
                .iter()
                .filter_map(|p| p.parse().ok())
                .collect(),
            clob_token_ids: string_list(&raw.clob_token_ids),
            closed: raw.closed.unwrap_or(false),
        }
    }
}

/// Decode a list that may be a JSON array or a string holding one.
/// Anything else decodes to an empty list.
fn string_list(value: &Value) -> Vec<String> {
    let items = match value {
        Value::Array(items) => items.clone(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Client implementation
// ---------------------------------------------------------------------------

impl PolymarketClient {
    pub fn new() -> Result<Self> {
        Self::with_base_urls(DATA_API_URL, GAMMA_API_URL)
    }

    pub fn with_base_urls(data_url: &str, gamma_url: &str) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()?,
            data_url: data_url.trim_end_matches('/').to_string(),
            gamma_url: gamma_url.trim_end_matches('/').to_string(),
        })
    }

    /// GET /trades?user={address} — most recent fills first
    pub async fn get_trades(&self, address: &str, limit: u32, taker_only: bool) -> Result<Vec<ApiTrade>> {
        let url = format!(
            "{}/trades?user={}&limit={}&takerOnly={}",
            self.data_url, address, limit, taker_only
        );
        debug!(address, limit, taker_only, "Fetching trades");

        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Polymarket trades error {}: {}", status, body);
        }

        let trades: Vec<ApiTrade> = resp.json().await?;
        debug!(count = trades.len(), "Trades fetched");
        Ok(trades)
    }

    /// GET /markets?condition_ids={id} on the Gamma API
    pub async fn get_market_by_condition(&self, condition_id: &str) -> Result<Option<GammaMarket>> {
        let url = format!("{}/markets?condition_ids={}", self.gamma_url, condition_id);
        debug!(condition_id, "Fetching Gamma market");

        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Gamma markets error {}: {}", status, body);
        }

        let markets: Vec<RawGammaMarket> = resp.json().await?;
        Ok(markets.into_iter().next().map(GammaMarket::from))
    }
}
