//! Async Binance REST client
//!
//! Public market data (klines, ticker prices) is retried with exponential
//! backoff. Signed order placement is sent exactly once: a retried MARKET
//! order could fill twice.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::auth::Credentials;
use super::types::{
    interval_duration, AccountInfo, BinanceKline, OrderResponse, TickerPrice,
    MAX_KLINES_PER_REQUEST,
};
use crate::config::ExchangeConfig;
use crate::data::{price_in_band, MarketDataSource, SymbolScreener};
use crate::{Candle, Side, Symbol};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const RECV_WINDOW_MS: u64 = 5000;
const PAGE_DELAY_MS: u64 = 250;

/// Run `operation`, retrying failures up to `max_retries` times with
/// delays of `base_delay`, 2×, 4×, ...
pub async fn execute_with_retry<F, Fut, T>(
    max_retries: u32,
    base_delay: Duration,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = base_delay * 2u32.pow(attempt - 1);
            debug!("Retrying after {}ms", delay.as_millis());
            sleep(delay).await;
        }

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                warn!(
                    "Request failed (attempt {}/{}): {:#}",
                    attempt + 1,
                    max_retries + 1,
                    e
                );
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("Request failed after retries")))
}

/// Binance spot REST client
#[derive(Debug, Clone)]
pub struct BinanceClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
    max_retries: u32,
    retry_delay: Duration,
}

impl BinanceClient {
    pub fn new(base_url: impl Into<String>, max_retries: u32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: None,
            max_retries,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Public client from the exchange section; credentials attached when present
    pub fn from_config(config: &ExchangeConfig) -> Result<Self> {
        let client = Self::new(&config.base_url, config.max_retries)?;
        Ok(match Credentials::from_config(config) {
            Ok(credentials) => client.with_credentials(credentials),
            Err(_) => client,
        })
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    fn credentials(&self) -> Result<&Credentials> {
        self.credentials
            .as_ref()
            .context("Signed request requires EXCHANGE_API_KEY and EXCHANGE_API_SECRET")
    }

    /// GET a public endpoint with retries
    async fn get_public<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);

        execute_with_retry(self.max_retries, self.retry_delay, || {
            let request = self.http.get(&url).query(query);
            let url = url.clone();
            async move {
                let response = request
                    .send()
                    .await
                    .with_context(|| format!("Failed to send request to {}", url))?;

                let status = response.status();
                let text = response.text().await.context("Failed to read response")?;
                if !status.is_success() {
                    bail!("API returned status {}: {}", status, text);
                }
                serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", url))
            }
        })
        .await
    }

    /// Send a signed request once
    async fn send_signed<T>(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let credentials = self.credentials()?;

        let mut query: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        query.push(format!("recvWindow={}", RECV_WINDOW_MS));
        query.push(format!("timestamp={}", Utc::now().timestamp_millis()));
        let signed = credentials.signed_query(&query.join("&"))?;

        let url = format!("{}{}?{}", self.base_url, path, signed);
        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", credentials.api_key())
            .send()
            .await
            .with_context(|| format!("Failed to send signed request to {}", path))?;

        let status = response.status();
        let text = response.text().await.context("Failed to read response")?;
        if !status.is_success() {
            bail!("API returned status {}: {}", status, text);
        }
        serde_json::from_str(&text).with_context(|| format!("Failed to parse {} response", path))
    }

    /// Klines for `pair`, oldest first
    pub async fn get_klines(
        &self,
        pair: &str,
        interval: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        if interval_duration(interval).is_none() {
            bail!("Unsupported interval: {}", interval);
        }

        let mut query = vec![
            ("symbol", pair.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.clamp(1, MAX_KLINES_PER_REQUEST).to_string()),
        ];
        if let Some(start) = start_time {
            query.push(("startTime", start.to_string()));
        }
        if let Some(end) = end_time {
            query.push(("endTime", end.to_string()));
        }

        let rows: Vec<Vec<Value>> = self.get_public("/api/v3/klines", &query).await?;
        rows.iter()
            .map(|row| BinanceKline::from_raw(row).and_then(Candle::try_from))
            .collect()
    }

    /// Paginate forward through `days_back` days of history.
    /// `on_page` receives the running candle count after each page.
    pub async fn fetch_full_history<P>(
        &self,
        pair: &str,
        interval: &str,
        days_back: u32,
        mut on_page: P,
    ) -> Result<Vec<Candle>>
    where
        P: FnMut(usize),
    {
        let step = interval_duration(interval)
            .with_context(|| format!("Unsupported interval: {}", interval))?;
        let end = Utc::now();
        let mut cursor = (end - ChronoDuration::days(days_back as i64)).timestamp_millis();

        info!("Fetching {} {} data for the last {} days", pair, interval, days_back);

        let mut all_candles: Vec<Candle> = Vec::new();
        loop {
            let page = self
                .get_klines(pair, interval, Some(cursor), None, MAX_KLINES_PER_REQUEST)
                .await?;
            let Some(last) = page.last() else {
                break;
            };

            cursor = (last.datetime + step).timestamp_millis();
            let full_page = page.len() == MAX_KLINES_PER_REQUEST;
            all_candles.extend(page);
            on_page(all_candles.len());

            if !full_page || cursor > end.timestamp_millis() {
                break;
            }
            sleep(Duration::from_millis(PAGE_DELAY_MS)).await;
        }

        all_candles.sort_by_key(|c| c.datetime);
        all_candles.dedup_by_key(|c| c.datetime);
        info!("Total candles fetched for {}: {}", pair, all_candles.len());

        Ok(all_candles)
    }

    pub async fn get_ticker_prices(&self) -> Result<Vec<TickerPrice>> {
        self.get_public("/api/v3/ticker/price", &[]).await
    }

    /// Place a MARKET order for `quantity` base units
    pub async fn place_market_order(
        &self,
        pair: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderResponse> {
        let params = [
            ("symbol", pair.to_string()),
            ("side", side.to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        let order: OrderResponse = self
            .send_signed(reqwest::Method::POST, "/api/v3/order", &params)
            .await?;

        info!(
            "Order {} {} {} {}: status {}",
            order.order_id, side, quantity, pair, order.status
        );
        Ok(order)
    }

    /// Free (unlocked) balance of `asset`
    pub async fn get_free_balance(&self, asset: &str) -> Result<f64> {
        let account: AccountInfo = self
            .send_signed(reqwest::Method::GET, "/api/v3/account", &[])
            .await?;

        account
            .balances
            .iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .map_or(Ok(0.0), |b| {
                b.free
                    .parse()
                    .with_context(|| format!("Invalid balance for {}: {}", asset, b.free))
            })
    }
}

#[async_trait]
impl MarketDataSource for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.get_klines(&symbol.file_stem(), timeframe, None, None, limit)
            .await
    }
}

#[async_trait]
impl SymbolScreener for BinanceClient {
    async fn screen_symbols(
        &self,
        quote: &str,
        min_price: Option<f64>,
        max_price: Option<f64>,
    ) -> Result<Vec<Symbol>> {
        let quote = quote.to_uppercase();
        let tickers = self.get_ticker_prices().await?;

        let symbols: Vec<Symbol> = tickers
            .iter()
            .filter(|t| t.symbol.ends_with(&quote))
            .filter(|t| {
                t.price()
                    .is_some_and(|p| p > 0.0 && price_in_band(p, min_price, max_price))
            })
            .map(|t| Symbol::new(&t.symbol))
            .collect();

        debug!("Screened {} {} symbols", symbols.len(), quote);
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    bail!("transient failure {}", n)
                }
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = execute_with_retry(2, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow!("down")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_signed_request_needs_credentials() {
        let client = BinanceClient::new("https://api.binance.com", 1).unwrap();
        assert!(!client.has_credentials());
        assert!(client.get_free_balance("USDT").await.is_err());
    }

    #[tokio::test]
    async fn test_unsupported_interval_fails_before_request() {
        let client = BinanceClient::new("http://127.0.0.1:9", 0).unwrap();
        let err = client
            .get_klines("BTCUSDT", "7m", None, None, 10)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported interval"));
    }
}
