//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for API credentials. Every field has a default, so a
//! partial file (or `{}`) is a valid configuration.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::backtest::BacktestParams;
use crate::indicators::IndicatorParams;
use crate::strategy::{SignalRules, TrendStrategy};
use crate::Symbol;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub strategy: StrategyConfig,
    pub backtest: BacktestConfig,
}

impl Config {
    /// Load configuration from a JSON file, then apply `.env` / environment
    /// overrides and validate the result
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        // A missing .env file is fine
        dotenv::dotenv().ok();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in practice)
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_key) = lookup("EXCHANGE_API_KEY") {
            self.exchange.api_key = Some(api_key);
        }
        if let Some(api_secret) = lookup("EXCHANGE_API_SECRET") {
            self.exchange.api_secret = Some(api_secret);
        }
        if let Some(name) = lookup("EXCHANGE_ID") {
            self.exchange.name = name.to_lowercase();
        }
        if let Some(quote) = lookup("QUOTE_CURRENCY") {
            self.exchange.quote_currency = quote.to_uppercase();
        }
        if let Some(dry_run) = lookup("DRY_RUN") {
            self.trading.dry_run = parse_bool(&dry_run)
                .with_context(|| format!("DRY_RUN must be true or false, got {:?}", dry_run))?;
        }
        Ok(())
    }

    /// Reject values the simulator and indicator engine cannot work with
    pub fn validate(&self) -> Result<()> {
        self.backtest_params().validate()?;

        let s = &self.strategy;
        let periods = [
            ("ema_short", s.ema_short),
            ("ema_long", s.ema_long),
            ("rsi_period", s.rsi_period),
            ("adx_period", s.adx_period),
            ("atr_period", s.atr_period),
            ("emv_period", s.emv_period),
        ];
        for (name, value) in periods {
            if value == 0 {
                bail!("strategy.{} must be > 0", name);
            }
        }
        if s.ema_short >= s.ema_long {
            bail!(
                "strategy.ema_short ({}) must be below strategy.ema_long ({})",
                s.ema_short,
                s.ema_long
            );
        }

        let t = &self.trading;
        if t.eval_candles == 0 {
            bail!("trading.eval_candles must be > 0");
        }
        if let (Some(min), Some(max)) = (t.min_price, t.max_price) {
            if min > max {
                bail!("trading.min_price ({}) exceeds trading.max_price ({})", min, max);
            }
        }
        if self.exchange.max_retries == 0 {
            bail!("exchange.max_retries must be > 0");
        }

        Ok(())
    }

    pub fn backtest_params(&self) -> BacktestParams {
        BacktestParams {
            initial_balance: self.trading.initial_balance,
            trade_amount: self.trading.trade_amount,
            fee_rate: self.exchange.fee_rate,
        }
    }

    pub fn indicator_params(&self) -> IndicatorParams {
        let s = &self.strategy;
        IndicatorParams {
            ema_short: s.ema_short,
            ema_long: s.ema_long,
            rsi_period: s.rsi_period,
            adx_period: s.adx_period,
            atr_period: s.atr_period,
            emv_period: s.emv_period,
        }
    }

    pub fn signal_rules(&self) -> SignalRules {
        SignalRules {
            adx_threshold: self.strategy.adx_threshold,
            rsi_buy_below: self.strategy.rsi_buy_below,
            rsi_sell_above: self.strategy.rsi_sell_above,
        }
    }

    pub fn trend_strategy(&self) -> TrendStrategy {
        TrendStrategy::new(self.indicator_params(), self.signal_rules())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Exchange configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Exchange identifier ("binance" or "csv")
    pub name: String,
    pub quote_currency: String,
    pub fee_rate: f64,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub api_secret: Option<String>,
    pub max_retries: u32,
    pub base_url: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            name: "binance".to_string(),
            quote_currency: "USDT".to_string(),
            fee_rate: 0.001, // 0.1%
            api_key: None,
            api_secret: None,
            max_retries: 3,
            base_url: "https://api.binance.com".to_string(),
        }
    }
}

/// Trading configuration
///
/// Amounts are in the quote currency. No conversion is performed, so
/// `initial_balance` and `trade_amount` must match the price data's currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Single symbol traded/backtested when `symbols` is empty
    pub symbol: String,
    pub symbols: Vec<String>,
    pub timeframe: String,
    pub trade_amount: f64,
    pub initial_balance: f64,
    pub dry_run: bool,
    pub check_interval_secs: u64,
    /// Price band used when screening live candidates
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// Recent complete rows averaged by the candidate score
    pub eval_candles: usize,
    pub candle_limit: usize,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            symbol: "BTCUSDT".to_string(),
            symbols: Vec::new(),
            timeframe: "1m".to_string(),
            trade_amount: 100.0,
            initial_balance: 1000.0,
            dry_run: true,
            check_interval_secs: 60,
            min_price: None,
            max_price: None,
            eval_candles: 2,
            candle_limit: 200,
        }
    }
}

impl TradingConfig {
    /// Configured symbol list, falling back to the single `symbol`
    pub fn symbols(&self) -> Vec<Symbol> {
        if self.symbols.is_empty() {
            vec![Symbol::new(&self.symbol)]
        } else {
            self.symbols.iter().map(Symbol::new).collect()
        }
    }
}

/// Indicator periods and signal thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub ema_short: usize,
    pub ema_long: usize,
    pub rsi_period: usize,
    pub adx_period: usize,
    pub atr_period: usize,
    pub emv_period: usize,
    pub adx_threshold: f64,
    pub rsi_buy_below: f64,
    pub rsi_sell_above: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        let params = IndicatorParams::default();
        let rules = SignalRules::default();
        StrategyConfig {
            ema_short: params.ema_short,
            ema_long: params.ema_long,
            rsi_period: params.rsi_period,
            adx_period: params.adx_period,
            atr_period: params.atr_period,
            emv_period: params.emv_period,
            adx_threshold: rules.adx_threshold,
            rsi_buy_below: rules.rsi_buy_below,
            rsi_sell_above: rules.rsi_sell_above,
        }
    }
}

/// Backtest configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub data_dir: String,
    pub results_dir: String,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            data_dir: "data".to_string(),
            results_dir: "results".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.trading.dry_run);
        assert_eq!(config.trading.timeframe, "1m");
        assert_eq!(config.strategy.ema_long, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let json = r#"{
            "trading": { "symbols": ["BTCUSDT", "ETHUSDT"], "trade_amount": 50 },
            "strategy": { "adx_threshold": 30 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.trading.symbols().len(), 2);
        assert_eq!(config.trading.initial_balance, 1000.0);
        assert_eq!(config.backtest_params().trade_amount, 50.0);
        assert_eq!(config.signal_rules().adx_threshold, 30.0);
        assert_eq!(config.signal_rules().rsi_buy_below, 40.0);
    }

    #[test]
    fn test_single_symbol_fallback() {
        let config = Config::default();
        assert_eq!(config.trading.symbols(), vec![Symbol::new("BTCUSDT")]);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("EXCHANGE_API_KEY", "key"),
            ("EXCHANGE_API_SECRET", "secret"),
            ("QUOTE_CURRENCY", "krw"),
            ("DRY_RUN", "false"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.exchange.api_key.as_deref(), Some("key"));
        assert_eq!(config.exchange.api_secret.as_deref(), Some("secret"));
        assert_eq!(config.exchange.quote_currency, "KRW");
        assert!(!config.trading.dry_run);

        let mut bad = Config::default();
        assert!(bad
            .apply_env_overrides(|k| (k == "DRY_RUN").then(|| "maybe".to_string()))
            .is_err());
    }

    #[test]
    fn test_credentials_never_serialized() {
        let mut config = Config::default();
        config.exchange.api_secret = Some("secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("api_secret"));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.exchange.fee_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.strategy.ema_short = 60;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.strategy.rsi_period = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.trading.min_price = Some(10.0);
        config.trading.max_price = Some(1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join("signal_bot_config_test.json");
        fs::write(&path, r#"{ "trading": { "symbol": "ETHUSDT" } }"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.trading.symbol, "ETHUSDT");

        fs::remove_file(&path).ok();
        assert!(Config::from_file(&path).is_err());
    }
}
