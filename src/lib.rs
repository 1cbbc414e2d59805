//! Signal Bot
//!
//! Indicator-driven crypto trading bot: candles are turned into EMA/RSI/ADX/
//! ATR/EMV indicators, threshold rules emit buy/sell signals, and a
//! single-position simulator replays them with fees to produce a trade log,
//! equity curve and performance report. The same strategy drives a polling
//! live trader in dry-run or live mode.

pub mod backtest;
pub mod binance;
pub mod config;
pub mod data;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod live;
pub mod metrics;
pub mod state_manager;
pub mod strategy;
pub mod types;

pub use backtest::{BacktestParams, BacktestResult, Backtester};
pub use config::Config;
pub use error::{Error, SeriesError};
pub use strategy::{SignalFrame, SignalRules, TrendStrategy};
pub use types::*;
