//! Data Extractor — stream the processed trade archive and cache per-market extracts
//!
//! The archive (`processed/trades.csv`) is several gigabytes, so it is never
//! loaded whole. Rows are read in fixed-size chunks, filtered by market id
//! before the rest of the row is parsed, and matching markets are written to
//! `market_trades/market_<id>.csv` for later runs.

use crate::types::{MarketInfo, OutcomeToken, TradeRecord, TradeSide};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use csv::StringRecord;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

const SINGLE_MARKET_MAX_EMPTY_CHUNKS: u32 = 3;
const PROGRESS_LOG_EVERY: u64 = 5;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("Missing column `{column}` in {file}")]
    MissingColumn { column: &'static str, file: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type ExtractResult<T> = Result<T, ExtractError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ExtractError + '_ {
    move |source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub trades_file: PathBuf,
    pub cache_dir: PathBuf,
    /// Rows per streaming chunk
    pub chunk_size: usize,
    /// Minimum rows for a market to be returned by multi-market extraction
    pub min_trades: usize,
    /// Consecutive chunks without a match before a multi-market pass stops
    pub max_empty_chunks: u32,
    pub use_cache: bool,
}

impl ExtractorConfig {
    /// Layout of an archive directory: `processed/trades.csv` + `market_trades/`
    pub fn from_archive_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            trades_file: dir.join("processed").join("trades.csv"),
            cache_dir: dir.join("market_trades"),
            ..Self::default()
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            trades_file: PathBuf::from("archive/processed/trades.csv"),
            cache_dir: PathBuf::from("archive/market_trades"),
            chunk_size: 2_000_000,
            min_trades: 100,
            max_empty_chunks: 5,
            use_cache: true,
        }
    }
}

/// Counters for one streaming pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractStats {
    pub chunks_processed: u64,
    pub rows_scanned: u64,
    pub rows_matched: u64,
    pub rows_skipped: u64,
    pub elapsed_ms: u64,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Parse the timestamp formats seen in the archive and in `markets.csv`.
/// Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    }
    if let Ok(secs) = s.parse::<i64>() {
        return Utc.timestamp_opt(secs, 0).single();
    }
    if let Ok(secs) = s.parse::<f64>() {
        if secs.is_finite() {
            let whole = secs.trunc() as i64;
            let nanos = ((secs - secs.trunc()) * 1e9).round() as u32;
            return Utc.timestamp_opt(whole, nanos).single();
        }
    }
    None
}

/// Market ids sometimes come through as `253591.0`.
pub fn parse_market_id(raw: &str) -> Option<u64> {
    let s = raw.trim();
    if let Ok(id) = s.parse::<u64>() {
        return Some(id);
    }
    let f = s.parse::<f64>().ok()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 {
        Some(f as u64)
    } else {
        None
    }
}

fn parse_amount(raw: &str) -> f64 {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn normalize_address(raw: &str) -> String {
    raw.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Chunked trade reader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct TradeColumns {
    timestamp: usize,
    market_id: usize,
    maker: usize,
    taker: usize,
    nonusdc_side: usize,
    maker_direction: usize,
    price: usize,
    usd_amount: usize,
    token_amount: usize,
    transaction_hash: Option<usize>,
}

impl TradeColumns {
    fn resolve(headers: &StringRecord, file: &str) -> ExtractResult<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let require = |name: &'static str| {
            find(name).ok_or_else(|| ExtractError::MissingColumn {
                column: name,
                file: file.to_string(),
            })
        };
        Ok(Self {
            timestamp: require("timestamp")?,
            market_id: require("market_id")?,
            maker: require("maker")?,
            taker: require("taker")?,
            nonusdc_side: require("nonusdc_side")?,
            maker_direction: require("maker_direction")?,
            price: require("price")?,
            usd_amount: require("usd_amount")?,
            token_amount: require("token_amount")?,
            transaction_hash: find("transactionHash"),
        })
    }

    fn parse_row(&self, row: &StringRecord, market_id: u64) -> Option<TradeRecord> {
        let field = |idx: usize| row.get(idx).unwrap_or("");
        let timestamp = parse_timestamp(field(self.timestamp))?;
        let transaction_hash = self
            .transaction_hash
            .map(field)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Some(TradeRecord {
            timestamp,
            market_id,
            maker: normalize_address(field(self.maker)),
            taker: normalize_address(field(self.taker)),
            token: OutcomeToken::from_nonusdc_side(field(self.nonusdc_side)),
            maker_direction: TradeSide::parse(field(self.maker_direction)),
            price: parse_amount(field(self.price)),
            usd_amount: parse_amount(field(self.usd_amount)),
            token_amount: parse_amount(field(self.token_amount)),
            transaction_hash,
        })
    }
}

/// Streams trades from any CSV source in row-count chunks.
pub struct TradeReader<R: Read> {
    reader: csv::Reader<R>,
    columns: TradeColumns,
    row: StringRecord,
    stats: ExtractStats,
    exhausted: bool,
}

impl TradeReader<File> {
    pub fn open(path: &Path) -> ExtractResult<Self> {
        let file = File::open(path).map_err(io_err(path))?;
        Self::new(file, &path.display().to_string())
    }
}

impl<R: Read> TradeReader<R> {
    pub fn new(source: R, label: &str) -> ExtractResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_reader(source);
        let headers = reader.headers()?.clone();
        let columns = TradeColumns::resolve(&headers, label)?;
        Ok(Self {
            reader,
            columns,
            row: StringRecord::new(),
            stats: ExtractStats::default(),
            exhausted: false,
        })
    }

    pub fn stats(&self) -> &ExtractStats {
        &self.stats
    }

    /// Read up to `chunk_size` rows and return those whose market id passes
    /// `keep`. Returns `None` once the source is exhausted.
    pub fn next_chunk<F>(&mut self, chunk_size: usize, keep: F) -> ExtractResult<Option<Vec<TradeRecord>>>
    where
        F: Fn(u64) -> bool,
    {
        if self.exhausted {
            return Ok(None);
        }
        let mut matched = Vec::new();
        let mut rows_in_chunk = 0usize;
        while rows_in_chunk < chunk_size.max(1) {
            if !self.reader.read_record(&mut self.row)? {
                self.exhausted = true;
                break;
            }
            rows_in_chunk += 1;
            self.stats.rows_scanned += 1;

            let Some(market_id) = self
                .row
                .get(self.columns.market_id)
                .and_then(parse_market_id)
            else {
                self.stats.rows_skipped += 1;
                continue;
            };
            if !keep(market_id) {
                continue;
            }
            match self.columns.parse_row(&self.row, market_id) {
                Some(trade) => {
                    self.stats.rows_matched += 1;
                    matched.push(trade);
                }
                None => self.stats.rows_skipped += 1,
            }
        }
        if rows_in_chunk == 0 {
            return Ok(None);
        }
        self.stats.chunks_processed += 1;
        Ok(Some(matched))
    }

    /// Drain the whole source, keeping every parseable row.
    pub fn read_all(mut self) -> ExtractResult<Vec<TradeRecord>> {
        let mut all = Vec::new();
        while let Some(chunk) = self.next_chunk(usize::MAX, |_| true)? {
            all.extend(chunk);
        }
        if self.stats.rows_skipped > 0 {
            debug!(skipped = self.stats.rows_skipped, "Skipped unparseable rows");
        }
        Ok(all)
    }
}

/// Row layout written to per-market cache files
#[derive(Debug, Serialize)]
struct CacheRow<'a> {
    timestamp: String,
    market_id: u64,
    maker: &'a str,
    taker: &'a str,
    nonusdc_side: &'static str,
    maker_direction: &'static str,
    taker_direction: &'static str,
    price: f64,
    usd_amount: f64,
    token_amount: f64,
    #[serde(rename = "transactionHash")]
    transaction_hash: &'a str,
}

impl<'a> From<&'a TradeRecord> for CacheRow<'a> {
    fn from(t: &'a TradeRecord) -> Self {
        Self {
            timestamp: t.timestamp.to_rfc3339(),
            market_id: t.market_id,
            maker: &t.maker,
            taker: &t.taker,
            nonusdc_side: t.token.as_nonusdc_side(),
            maker_direction: t.maker_direction.as_str(),
            taker_direction: t.taker_direction().as_str(),
            price: t.price,
            usd_amount: t.usd_amount,
            token_amount: t.token_amount,
            transaction_hash: t.transaction_hash.as_deref().unwrap_or(""),
        }
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

pub struct DataExtractor {
    config: ExtractorConfig,
}

impl DataExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn cache_path(&self, market_id: u64) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("market_{}.csv", market_id))
    }

    pub fn is_cached(&self, market_id: u64) -> bool {
        self.cache_path(market_id).exists()
    }

    pub fn load_cached(&self, market_id: u64) -> ExtractResult<Vec<TradeRecord>> {
        TradeReader::open(&self.cache_path(market_id))?.read_all()
    }

    pub fn save_to_cache(&self, market_id: u64, trades: &[TradeRecord]) -> ExtractResult<PathBuf> {
        std::fs::create_dir_all(&self.config.cache_dir).map_err(io_err(&self.config.cache_dir))?;
        let path = self.cache_path(market_id);
        let mut writer = csv::Writer::from_path(&path)?;
        for trade in trades {
            writer.serialize(CacheRow::from(trade))?;
        }
        writer.flush().map_err(io_err(&path))?;
        debug!(market_id, trades = trades.len(), path = %path.display(), "Cached market trades");
        Ok(path)
    }

    /// Market ids with a cache file, ascending
    pub fn list_cached_market_ids(&self) -> ExtractResult<Vec<u64>> {
        let dir = &self.config.cache_dir;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<u64> = std::fs::read_dir(dir)
            .map_err(io_err(dir))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                name.strip_prefix("market_")?
                    .strip_suffix(".csv")?
                    .parse::<u64>()
                    .ok()
            })
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Extract all trades for one market. The archive is sorted by time, so
    /// once the market has been seen a few empty chunks mean it has ended.
    pub fn extract_single_market(&self, market_id: u64) -> ExtractResult<Vec<TradeRecord>> {
        if self.config.use_cache && self.is_cached(market_id) {
            let trades = self.load_cached(market_id)?;
            debug!(market_id, trades = trades.len(), "Loaded market from cache");
            return Ok(trades);
        }

        info!(market_id, file = %self.config.trades_file.display(), "Extracting market from archive");
        let started = Instant::now();
        let mut reader = TradeReader::open(&self.config.trades_file)?;
        let mut trades = Vec::new();
        let mut empty_streak = 0u32;

        while let Some(chunk) = reader.next_chunk(self.config.chunk_size, |id| id == market_id)? {
            if chunk.is_empty() {
                empty_streak += 1;
                if !trades.is_empty() && empty_streak >= SINGLE_MARKET_MAX_EMPTY_CHUNKS {
                    debug!(market_id, "Market window passed, stopping early");
                    break;
                }
            } else {
                empty_streak = 0;
                trades.extend(chunk);
            }
        }

        let mut stats = reader.stats().clone();
        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            market_id,
            trades = trades.len(),
            chunks = stats.chunks_processed,
            skipped = stats.rows_skipped,
            elapsed_ms = stats.elapsed_ms,
            "Extraction complete"
        );

        if !trades.is_empty() {
            self.save_to_cache(market_id, &trades)?;
        }
        Ok(trades)
    }

    /// Extract several markets with a single pass over the archive. Only
    /// markets with at least `min_trades` rows are returned (and cached).
    pub fn extract_multiple_markets(
        &self,
        market_ids: &[u64],
    ) -> ExtractResult<HashMap<u64, Vec<TradeRecord>>> {
        let min_trades = self.config.min_trades;
        let mut results: HashMap<u64, Vec<TradeRecord>> = HashMap::new();
        let mut pending: HashSet<u64> = HashSet::new();

        for &id in market_ids {
            if self.config.use_cache && self.is_cached(id) {
                match self.load_cached(id) {
                    Ok(trades) if trades.len() >= min_trades => {
                        results.insert(id, trades);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(market_id = id, error = %e, "Unreadable cache file, re-extracting");
                        pending.insert(id);
                    }
                }
            } else {
                pending.insert(id);
            }
        }

        info!(
            cached = results.len(),
            to_extract = pending.len(),
            "Multi-market extraction"
        );
        if pending.is_empty() {
            return Ok(results);
        }

        let started = Instant::now();
        let mut reader = TradeReader::open(&self.config.trades_file)?;
        let mut collected: HashMap<u64, Vec<TradeRecord>> = HashMap::new();
        let mut empty_streak = 0u32;

        while let Some(chunk) = reader.next_chunk(self.config.chunk_size, |id| pending.contains(&id))? {
            if chunk.is_empty() {
                empty_streak += 1;
            } else {
                empty_streak = 0;
                for trade in chunk {
                    collected.entry(trade.market_id).or_default().push(trade);
                }
            }

            let chunks = reader.stats().chunks_processed;
            if chunks % PROGRESS_LOG_EVERY == 0 {
                info!(
                    chunks,
                    rows = reader.stats().rows_scanned,
                    markets_found = collected.len(),
                    "Scanning archive"
                );
            }

            let all_satisfied = pending
                .iter()
                .all(|id| collected.get(id).map_or(false, |t| t.len() >= min_trades));
            if all_satisfied {
                debug!("All markets have enough trades, stopping early");
                break;
            }
            if !collected.is_empty() && empty_streak >= self.config.max_empty_chunks {
                debug!(empty_streak, "No matches in recent chunks, stopping early");
                break;
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            chunks = reader.stats().chunks_processed,
            rows = reader.stats().rows_scanned,
            skipped = reader.stats().rows_skipped,
            elapsed_ms,
            "Archive pass complete"
        );

        for (id, trades) in collected {
            if trades.len() < min_trades {
                debug!(market_id = id, trades = trades.len(), "Too few trades, not cached");
                continue;
            }
            if let Err(e) = self.save_to_cache(id, &trades) {
                warn!(market_id = id, error = %e, "Failed to cache market");
            }
            results.insert(id, trades);
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Market catalog
// ---------------------------------------------------------------------------

/// Market metadata keyed by id
#[derive(Debug, Clone, Default)]
pub struct MarketCatalog {
    markets: BTreeMap<u64, MarketInfo>,
}

impl MarketCatalog {
    pub fn load(path: impl AsRef<Path>) -> ExtractResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(io_err(path))?;
        let catalog = Self::from_reader(file, &path.display().to_string())?;
        info!(markets = catalog.len(), path = %path.display(), "Loaded market catalog");
        Ok(catalog)
    }

    pub fn from_reader<R: Read>(source: R, label: &str) -> ExtractResult<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(source);
        let headers = reader.headers()?.clone();
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let id_col = find("id").ok_or_else(|| ExtractError::MissingColumn {
            column: "id",
            file: label.to_string(),
        })?;
        let question_col = find("question");
        let closed_col = find("closedTime");
        let volume_col = find("volume");
        let slug_col = find("market_slug");
        let condition_col = find("condition_id");

        let mut markets = BTreeMap::new();
        let mut skipped = 0usize;
        for row in reader.records() {
            let row = row?;
            let get = |col: Option<usize>| {
                col.and_then(|c| row.get(c))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
            };
            let Some(id) = row.get(id_col).and_then(parse_market_id) else {
                skipped += 1;
                continue;
            };
            markets.insert(
                id,
                MarketInfo {
                    id,
                    question: get(question_col).unwrap_or_default().to_string(),
                    closed_time: get(closed_col).and_then(parse_timestamp),
                    volume: get(volume_col).map(parse_amount).unwrap_or(0.0),
                    slug: get(slug_col).map(str::to_string),
                    condition_id: get(condition_col).map(str::to_string),
                },
            );
        }
        if skipped > 0 {
            debug!(skipped, "Skipped catalog rows without a valid id");
        }
        Ok(Self { markets })
    }

    pub fn from_markets(markets: impl IntoIterator<Item = MarketInfo>) -> Self {
        Self {
            markets: markets.into_iter().map(|m| (m.id, m)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    pub fn get(&self, market_id: u64) -> Option<&MarketInfo> {
        self.markets.get(&market_id)
    }

    pub fn closed_time(&self, market_id: u64) -> Option<DateTime<Utc>> {
        self.get(market_id).and_then(|m| m.closed_time)
    }

    /// Draw resolved markets with at least `min_volume`. Oversamples by 3x so
    /// callers can absorb markets that turn out to have too few trades.
    pub fn sample_resolved(
        &self,
        sample_size: usize,
        min_volume: f64,
        exclude: &HashSet<u64>,
        seed: u64,
    ) -> Vec<u64> {
        let mut candidates: Vec<u64> = self
            .markets
            .values()
            .filter(|m| m.closed_time.is_some() && m.volume >= min_volume)
            .filter(|m| !exclude.contains(&m.id))
            .map(|m| m.id)
            .collect();
        let mut rng = StdRng::seed_from_u64(seed);
        candidates.shuffle(&mut rng);
        candidates.truncate(sample_size.saturating_mul(3));
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use std::io::Write;

    const HEADER: &str = "timestamp,market_id,maker,taker,nonusdc_side,maker_direction,taker_direction,price,usd_amount,token_amount,transactionHash";

    fn write_archive(dir: &Path, rows: &[String]) -> PathBuf {
        let processed = dir.join("processed");
        std::fs::create_dir_all(&processed).unwrap();
        let path = processed.join("trades.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "{}", HEADER).unwrap();
        for r in rows {
            writeln!(f, "{}", r).unwrap();
        }
        path
    }

    fn row(market: u64, minute: u32, maker: &str) -> String {
        format!(
            "2024-03-01 10:{:02}:00,{},{},0xTAKER,token1,BUY,SELL,0.6,120.5,200.8,0xhash{}",
            minute, market, maker, minute
        )
    }

    fn extractor(dir: &Path, chunk_size: usize, min_trades: usize) -> DataExtractor {
        let mut config = ExtractorConfig::from_archive_dir(dir);
        config.chunk_size = chunk_size;
        config.min_trades = min_trades;
        DataExtractor::new(config)
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let a = parse_timestamp("2024-03-01 10:15:30").unwrap();
        let b = parse_timestamp("2024-03-01T10:15:30Z").unwrap();
        let c = parse_timestamp("2024-03-01 10:15:30+00").unwrap();
        let d = parse_timestamp("1709288130").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a, d);
        assert_eq!(parse_timestamp("2024-03-01 10:15:30.250").unwrap().nanosecond(), 250_000_000);
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_parse_market_id_float_form() {
        assert_eq!(parse_market_id("253591"), Some(253591));
        assert_eq!(parse_market_id("253591.0"), Some(253591));
        assert_eq!(parse_market_id("12.5"), None);
        assert_eq!(parse_market_id("abc"), None);
    }

    #[test]
    fn test_reader_filters_and_normalizes() {
        let csv = format!(
            "{}\n{}\n{}\nnot-a-time,7,0xA,0xB,token1,BUY,SELL,0.5,1,2,0x\n",
            HEADER,
            row(7, 1, "0xMakerOne"),
            row(8, 2, "0xOther")
        );
        let mut reader = TradeReader::new(csv.as_bytes(), "inline").unwrap();
        let chunk = reader.next_chunk(10, |id| id == 7).unwrap().unwrap();
        assert_eq!(chunk.len(), 1);
        let t = &chunk[0];
        assert_eq!(t.maker, "0xmakerone");
        assert_eq!(t.taker, "0xtaker");
        assert_eq!(t.token, OutcomeToken::Yes);
        assert_eq!(t.maker_direction, TradeSide::Buy);
        assert_eq!(t.transaction_hash.as_deref(), Some("0xhash1"));
        assert_eq!(reader.stats().rows_scanned, 4);
        assert_eq!(reader.stats().rows_skipped, 1);
        assert!(reader.next_chunk(10, |_| true).unwrap().is_none());
    }

    #[test]
    fn test_missing_column_is_reported() {
        let csv = "timestamp,market_id\n2024-01-01,1\n";
        match TradeReader::new(csv.as_bytes(), "bad.csv") {
            Err(ExtractError::MissingColumn { column, .. }) => assert_eq!(column, "maker"),
            other => panic!("expected MissingColumn, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_single_market_extract_and_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<String> = (0..6).map(|m| row(if m % 2 == 0 { 1 } else { 2 }, m, "0xM")).collect();
        write_archive(dir.path(), &rows);
        let ex = extractor(dir.path(), 2, 1);

        let trades = ex.extract_single_market(1).unwrap();
        assert_eq!(trades.len(), 3);
        assert!(ex.is_cached(1));

        let cached = ex.load_cached(1).unwrap();
        assert_eq!(cached, trades);
        assert_eq!(ex.list_cached_market_ids().unwrap(), vec![1]);
    }

    #[test]
    fn test_multi_market_respects_min_trades() {
        let dir = tempfile::tempdir().unwrap();
        let mut rows = Vec::new();
        for m in 0..5 {
            rows.push(row(10, m, "0xA"));
        }
        rows.push(row(20, 30, "0xB"));
        write_archive(dir.path(), &rows);
        let ex = extractor(dir.path(), 3, 3);

        let out = ex.extract_multiple_markets(&[10, 20, 30]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[&10].len(), 5);
        assert!(ex.is_cached(10));
        assert!(!ex.is_cached(20));
    }

    #[test]
    fn test_catalog_load_and_sample() {
        let csv = "createdAt,id,question,answer1,answer2,neg_risk,market_slug,token1,token2,condition_id,volume,ticker,closedTime\n\
            2024-01-01,1,Will A?,Yes,No,False,will-a,t1,t2,0xc1,150000,A,2024-02-01 12:00:00+00\n\
            2024-01-01,2,Will B?,Yes,No,False,will-b,t1,t2,0xc2,50,B,2024-02-01 12:00:00+00\n\
            2024-01-01,3,Will C?,Yes,No,False,will-c,t1,t2,0xc3,200000,C,\n\
            2024-01-01,4,Will D?,Yes,No,False,will-d,t1,t2,0xc4,300000,D,2024-03-01T00:00:00Z\n";
        let catalog = MarketCatalog::from_reader(csv.as_bytes(), "markets.csv").unwrap();
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.get(1).unwrap().slug.as_deref(), Some("will-a"));
        assert!(catalog.closed_time(3).is_none());

        let exclude: HashSet<u64> = [4].into_iter().collect();
        let sample = catalog.sample_resolved(10, 100_000.0, &exclude, 42);
        assert_eq!(sample, vec![1]);
        let sample = catalog.sample_resolved(10, 100_000.0, &HashSet::new(), 42);
        assert_eq!(sample.len(), 2);
    }
}
