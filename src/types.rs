//! Core data types used across the trading system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Error, SeriesError};

/// Validation errors for candle data
#[derive(Debug, Error)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },

    #[error("{field} is not a finite number ({value})")]
    NonFinite { field: &'static str, value: f64 },
}

/// OHLCV candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Create a new candle with validation
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self::new_unchecked(datetime, open, high, low, close, volume);
        candle.validate()?;
        Ok(candle)
    }

    /// Create a candle without validation (for trusted sources or tests)
    pub fn new_unchecked(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Returns the first OHLCV field that is NaN or infinite
    pub fn first_non_finite(&self) -> Option<(&'static str, f64)> {
        [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ]
        .into_iter()
        .find(|(_, v)| !v.is_finite())
    }

    /// Validate the candle data
    pub fn validate(&self) -> Result<(), CandleValidationError> {
        if let Some((field, value)) = self.first_non_finite() {
            return Err(CandleValidationError::NonFinite { field, value });
        }

        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(CandleValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(CandleValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    /// Check if the candle is valid without returning detailed error
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Midpoint of the candle range, used by ease-of-movement
    pub fn midpoint(&self) -> f64 {
        (self.high + self.low) / 2.0
    }
}

// Lets `ta` indicators consume candles directly.
impl ta::Open for Candle {
    fn open(&self) -> f64 {
        self.open
    }
}

impl ta::High for Candle {
    fn high(&self) -> f64 {
        self.high
    }
}

impl ta::Low for Candle {
    fn low(&self) -> f64 {
        self.low
    }
}

impl ta::Close for Candle {
    fn close(&self) -> f64 {
        self.close
    }
}

impl ta::Volume for Candle {
    fn volume(&self) -> f64 {
        self.volume
    }
}

/// Check the preconditions every candle sequence must satisfy before analysis:
/// non-empty, strictly increasing timestamps, finite prices and volumes.
pub fn validate_series(candles: &[Candle]) -> Result<(), Error> {
    if candles.is_empty() {
        return Err(SeriesError::Empty.into());
    }

    for (index, candle) in candles.iter().enumerate() {
        if let Some((field, value)) = candle.first_non_finite() {
            return Err(SeriesError::NonFinite {
                index,
                field,
                value,
            }
            .into());
        }
    }

    for (index, pair) in candles.windows(2).enumerate() {
        if pair[1].datetime <= pair[0].datetime {
            return Err(SeriesError::NonIncreasingTimestamp {
                index: index + 1,
                previous: pair[0].datetime,
                current: pair[1].datetime,
            }
            .into());
        }
    }

    Ok(())
}

/// Trading pair symbol using Arc<str> for cheap cloning
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-system friendly form ("XRP/KRW" -> "XRPKRW")
    pub fn file_stem(&self) -> String {
        self.0.replace('/', "").to_uppercase()
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Account state of the single-position model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountState {
    Flat,
    Long,
}

/// Open long position.
///
/// `cost` is the quote amount committed at entry (fee included), which is the
/// basis profit is measured against on exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub size: f64,
    pub cost: f64,
}

impl Position {
    /// Open a position by spending `trade_amount`; the entry fee is taken out of
    /// the converted size rather than paid separately.
    pub fn open(trade_amount: f64, fee_rate: f64, price: f64, time: DateTime<Utc>) -> Self {
        let invested = trade_amount * (1.0 - fee_rate);
        Position {
            entry_price: price,
            entry_time: time,
            size: invested / price,
            cost: trade_amount,
        }
    }

    /// Mark-to-market value at `price` (before exit fees)
    pub fn market_value(&self, price: f64) -> f64 {
        self.size * price
    }

    /// Quote amount credited when selling the whole position at `price`
    pub fn net_proceeds(&self, price: f64, fee_rate: f64) -> f64 {
        let gross = self.market_value(price);
        gross - gross * fee_rate
    }

    /// Close the position and produce the immutable trade record.
    /// Returns the net proceeds alongside the trade.
    pub fn close(&self, price: f64, time: DateTime<Utc>, fee_rate: f64) -> (f64, Trade) {
        let net = self.net_proceeds(price, fee_rate);
        let profit_amount = net - self.cost;
        let profit_pct = if self.cost > 0.0 {
            profit_amount / self.cost * 100.0
        } else {
            0.0
        };

        let trade = Trade {
            entry_time: self.entry_time,
            exit_time: time,
            entry_price: self.entry_price,
            exit_price: price,
            profit_pct,
            profit_amount,
        };

        (net, trade)
    }
}

/// Completed round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub profit_pct: f64,
    pub profit_amount: f64,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.profit_pct > 0.0
    }
}
