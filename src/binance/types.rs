//! Binance REST response types

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Candle;

/// Kline intervals accepted by `/api/v3/klines`
pub const INTERVALS: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w",
];

/// Maximum klines returned by one request
pub const MAX_KLINES_PER_REQUEST: usize = 1000;

/// Length of one candle for a kline interval
pub fn interval_duration(interval: &str) -> Option<Duration> {
    if !INTERVALS.contains(&interval) {
        return None;
    }
    let (count, unit) = interval.split_at(interval.len() - 1);
    let count: i64 = count.parse().ok()?;
    match unit {
        "m" => Some(Duration::minutes(count)),
        "h" => Some(Duration::hours(count)),
        "d" => Some(Duration::days(count)),
        "w" => Some(Duration::weeks(count)),
        _ => None,
    }
}

/// One kline row. Binance encodes klines as heterogeneous JSON arrays:
/// `[open_time, "open", "high", "low", "close", "volume", close_time, ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct BinanceKline {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

fn number_at(raw: &[Value], index: usize, name: &str) -> Result<f64> {
    match raw.get(index) {
        Some(Value::String(s)) => s
            .parse()
            .with_context(|| format!("Invalid kline {}: {:?}", name, s)),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| anyhow!("Invalid kline {}: {}", name, n)),
        other => bail!("Missing kline {} (got {:?})", name, other),
    }
}

fn millis_at(raw: &[Value], index: usize, name: &str) -> Result<i64> {
    raw.get(index)
        .and_then(Value::as_i64)
        .ok_or_else(|| anyhow!("Missing kline {}", name))
}

impl BinanceKline {
    pub fn from_raw(raw: &[Value]) -> Result<Self> {
        Ok(Self {
            open_time: millis_at(raw, 0, "open_time")?,
            open: number_at(raw, 1, "open")?,
            high: number_at(raw, 2, "high")?,
            low: number_at(raw, 3, "low")?,
            close: number_at(raw, 4, "close")?,
            volume: number_at(raw, 5, "volume")?,
            close_time: millis_at(raw, 6, "close_time")?,
        })
    }
}

impl TryFrom<BinanceKline> for Candle {
    type Error = anyhow::Error;

    fn try_from(k: BinanceKline) -> Result<Self> {
        let datetime: DateTime<Utc> = DateTime::from_timestamp_millis(k.open_time)
            .ok_or_else(|| anyhow!("Kline open time out of range: {}", k.open_time))?;
        Candle::new(datetime, k.open, k.high, k.low, k.close, k.volume)
            .with_context(|| format!("Invalid kline at {}", datetime))
    }
}

/// `/api/v3/ticker/price` entry
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: String,
}

impl TickerPrice {
    pub fn price(&self) -> Option<f64> {
        self.price.parse().ok()
    }
}

/// `/api/v3/order` response (FULL/RESULT fields used by the trader)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    pub status: String,
    pub executed_qty: String,
    #[serde(rename = "cummulativeQuoteQty")]
    pub cumulative_quote_qty: String,
}

impl OrderResponse {
    /// Average fill price, when anything was executed
    pub fn average_price(&self) -> Option<f64> {
        let qty: f64 = self.executed_qty.parse().ok()?;
        let quote: f64 = self.cumulative_quote_qty.parse().ok()?;
        (qty > 0.0).then(|| quote / qty)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

/// `/api/v3/account` response
#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<Balance>,
}

/// Format an order quantity with at most `decimals` fractional digits,
/// truncating so the order never exceeds the intended amount
pub fn format_quantity(quantity: f64, decimals: u32) -> Result<Decimal> {
    let value = Decimal::from_f64(quantity)
        .with_context(|| format!("Quantity {} is not representable", quantity))?;
    let truncated = value
        .round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
        .normalize();
    if truncated <= Decimal::ZERO {
        bail!("Quantity {} rounds to zero at {} decimals", quantity, decimals);
    }
    Ok(truncated)
}
