//! Binance spot exchange glue
//!
//! Public klines and ticker prices for data/screening, and signed MARKET
//! orders for live execution.

pub mod auth;
pub mod client;
pub mod types;

pub use auth::Credentials;
pub use client::BinanceClient;
