//! Error types for the analysis and backtest core
//!
//! The core never performs I/O, so its failures are limited to precondition
//! violations on the candle series and invalid account parameters. Everything
//! outside the core reports through `anyhow`.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Reasons a candle sequence is rejected before analysis
#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("candle sequence is empty")]
    Empty,

    #[error("timestamp at row {index} ({current}) is not after the previous row ({previous})")]
    NonIncreasingTimestamp {
        index: usize,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("row {index} has a non-finite {field} ({value})")]
    NonFinite {
        index: usize,
        field: &'static str,
        value: f64,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] SeriesError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
