//! Data loading and management
//!
//! CSV candle store plus the `MarketDataSource` abstraction the live trader
//! and download command fetch through. The analysis core never touches this
//! module; it only receives the candle slices loaded here.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::{Candle, Symbol, Trade};

const CSV_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// =============================================================================
// Sources
// =============================================================================

/// Anything that can produce an ordered candle series for a symbol
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Most recent `limit` candles, oldest first
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>>;
}

/// Lists tradable symbols for candidate screening
#[async_trait]
pub trait SymbolScreener: Send + Sync {
    /// Symbols quoted in `quote` whose last price lies within the band
    async fn screen_symbols(
        &self,
        quote: &str,
        min_price: Option<f64>,
        max_price: Option<f64>,
    ) -> Result<Vec<Symbol>>;
}

/// Whether `price` lies within the optional `[min, max]` band
pub fn price_in_band(price: f64, min_price: Option<f64>, max_price: Option<f64>) -> bool {
    min_price.map_or(true, |min| price >= min) && max_price.map_or(true, |max| price <= max)
}

/// Serves candles from the CSV store, `{data_dir}/{SYMBOL}_{timeframe}.csv`
#[derive(Debug, Clone)]
pub struct CsvDataSource {
    data_dir: PathBuf,
}

impl CsvDataSource {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl MarketDataSource for CsvDataSource {
    fn name(&self) -> &str {
        "csv"
    }

    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let path = data_file_path(&self.data_dir, symbol, timeframe);
        let mut candles = load_csv(&path)
            .with_context(|| format!("Failed to load data for {}", symbol))?;

        if candles.len() > limit {
            candles = candles.split_off(candles.len() - limit);
        }
        Ok(candles)
    }
}

#[async_trait]
impl SymbolScreener for CsvDataSource {
    /// Symbols with a stored file whose name ends in `quote` and whose last
    /// close lies within the band
    async fn screen_symbols(
        &self,
        quote: &str,
        min_price: Option<f64>,
        max_price: Option<f64>,
    ) -> Result<Vec<Symbol>> {
        let entries = fs::read_dir(&self.data_dir)
            .with_context(|| format!("Failed to read {}", self.data_dir.display()))?;

        let mut symbols = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some((name, _timeframe)) = stem.split_once('_') else {
                continue;
            };
            if !name.ends_with(quote) || symbols.iter().any(|s: &Symbol| s.as_str() == name) {
                continue;
            }

            let last_close = load_csv(&path).ok().and_then(|c| c.last().map(|c| c.close));
            if let Some(close) = last_close {
                if price_in_band(close, min_price, max_price) {
                    symbols.push(Symbol::new(name));
                }
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}

// =============================================================================
// CSV Store
// =============================================================================

/// Path of a symbol's candle file: `{SYMBOL}_{timeframe}.csv`
pub fn data_file_path(data_dir: impl AsRef<Path>, symbol: &Symbol, timeframe: &str) -> PathBuf {
    data_dir
        .as_ref()
        .join(format!("{}_{}.csv", symbol.file_stem(), timeframe))
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    value
        .parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, CSV_DATETIME_FORMAT).map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("Failed to parse datetime: {}", value))
}

/// Load OHLCV data from a CSV file (`datetime,open,high,low,close,volume`).
///
/// Every row is checked with [`Candle::validate`]; the first bad row aborts
/// the load with its line number.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let line = row_idx + 2;
        let record = result.with_context(|| format!("Failed to read line {}", line))?;

        let field = |i: usize, name: &str| -> Result<f64> {
            record
                .get(i)
                .with_context(|| format!("Missing {} column on line {}", name, line))?
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse {} on line {}", name, line))
        };

        let datetime =
            parse_datetime(record.get(0).context("Missing datetime column")?.trim())?;
        let candle = Candle::new(
            datetime,
            field(1, "open")?,
            field(2, "high")?,
            field(3, "low")?,
            field(4, "close")?,
            field(5, "volume")?,
        )
        .with_context(|| format!("Invalid candle on line {}", line))?;

        candles.push(candle);
    }

    debug!("Loaded {} candles from {}", candles.len(), path.display());
    Ok(candles)
}

/// Save candles to a CSV file, creating parent directories as needed
pub fn save_csv(path: impl AsRef<Path>, candles: &[Candle]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(["datetime", "open", "high", "low", "close", "volume"])?;

    for candle in candles {
        writer.write_record([
            candle.datetime.format(CSV_DATETIME_FORMAT).to_string(),
            candle.open.to_string(),
            candle.high.to_string(),
            candle.low.to_string(),
            candle.close.to_string(),
            candle.volume.to_string(),
        ])?;
    }
    writer.flush()?;

    info!("Saved {} rows to {}", candles.len(), path.display());
    Ok(())
}

/// Write a trade log as CSV
pub fn write_trades_csv(path: impl AsRef<Path>, trades: &[Trade]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for trade in trades {
        writer.serialize(trade)?;
    }
    writer.flush()?;
    Ok(())
}

/// Load data for multiple symbols, skipping symbols without a data file
pub fn load_multi_symbol(
    data_dir: impl AsRef<Path>,
    symbols: &[Symbol],
    timeframe: &str,
) -> Result<Vec<(Symbol, Vec<Candle>)>> {
    let mut data = Vec::with_capacity(symbols.len());

    for symbol in symbols {
        let path = data_file_path(&data_dir, symbol, timeframe);
        if !path.exists() {
            warn!("Data file not found: {}", path.display());
            continue;
        }

        let candles =
            load_csv(&path).with_context(|| format!("Failed to load data for {}", symbol))?;
        info!("Loaded {} candles for {}", candles.len(), symbol);
        data.push((symbol.clone(), candles));
    }

    if data.is_empty() {
        bail!("No data loaded for any symbol");
    }

    Ok(data)
}

/// Parse a `YYYY-MM-DD` date as midnight UTC
pub fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date {:?}, expected YYYY-MM-DD", value))?;
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .with_context(|| format!("Invalid date {:?}", value))
}

/// Keep candles within `[start, end]` (either bound optional)
pub fn filter_candles_by_date(
    candles: Vec<Candle>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<Candle> {
    candles
        .into_iter()
        .filter(|c| start.map_or(true, |s| c.datetime >= s) && end.map_or(true, |e| c.datetime <= e))
        .collect()
}
