//! Integration tests for the signal bot
//!
//! These tests verify that all components work together correctly.

use approx::assert_relative_eq;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::path::PathBuf;

use signal_bot::backtest::{backtest_candles, backtest_symbols, BacktestParams, Backtester};
use signal_bot::data::{self, CsvDataSource, MarketDataSource, SymbolScreener};
use signal_bot::indicators::{IndicatorFrame, IndicatorParams, IndicatorValues};
use signal_bot::strategy::{SignalFrame, SignalRow};
use signal_bot::{AccountState, Candle, Config, Error, SeriesError, Symbol, TrendStrategy};

// =============================================================================
// Test Utilities
// =============================================================================

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

/// Oscillating market with a slow upward drift
fn generate_wave_candles(count: usize) -> Vec<Candle> {
    let mut candles = Vec::with_capacity(count);
    let mut prev_close: f64 = 100.0;

    for i in 0..count {
        let t = i as f64;
        let close = 100.0 + 10.0 * (t / 8.0).sin() + 0.05 * t;
        let open = prev_close;
        let high = open.max(close) + 0.5;
        let low = open.min(close) - 0.5;
        let volume = 1e8 * (1.0 + 0.3 * (t / 5.0).cos());

        candles.push(
            Candle::new(
                start_time() + Duration::minutes(i as i64),
                open,
                high,
                low,
                close,
                volume,
            )
            .unwrap(),
        );
        prev_close = close;
    }

    candles
}

fn generate_flat_candles(count: usize, price: f64) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            Candle::new(
                start_time() + Duration::minutes(i as i64),
                price,
                price,
                price,
                price,
                1_000.0,
            )
            .unwrap()
        })
        .collect()
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("signal_bot_it_{}_{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn signal_row(minute: i64, close: f64, buy: bool, sell: bool) -> SignalRow {
    SignalRow {
        candle: Candle::new_unchecked(
            start_time() + Duration::minutes(minute),
            close,
            close,
            close,
            close,
            1.0,
        ),
        indicators: IndicatorValues {
            ema_short: close,
            ema_long: close,
            rsi: 50.0,
            adx: 30.0,
            atr: 1.0,
            emv: 0.0,
        },
        buy_signal: buy,
        sell_signal: sell,
    }
}

// =============================================================================
// Indicator Tests
// =============================================================================

#[test]
fn test_indicator_warmup_and_bounds() {
    let candles = generate_wave_candles(300);
    let params = IndicatorParams::default();
    let frame = IndicatorFrame::compute(&candles, &params);

    assert_eq!(frame.len(), candles.len());
    assert_eq!(frame.warmup_len(), 49);

    let complete: Vec<_> = frame.complete_rows().collect();
    assert_eq!(complete.len(), candles.len() - 49);

    for (_, v) in &complete {
        assert!((0.0..=100.0).contains(&v.rsi), "RSI out of range: {}", v.rsi);
        assert!((0.0..=100.0).contains(&v.adx), "ADX out of range: {}", v.adx);
        assert!(v.atr >= 0.0);
        assert!(v.emv.is_finite());
    }
}

#[test]
fn test_indicators_are_deterministic() {
    let candles = generate_wave_candles(200);
    let params = IndicatorParams::default();

    let a = IndicatorFrame::compute(&candles, &params);
    let b = IndicatorFrame::compute(&candles, &params);
    assert_eq!(a.rows(), b.rows());
}

// =============================================================================
// Strategy Tests
// =============================================================================

#[test]
fn test_analyze_drops_warmup_rows() {
    let strategy = TrendStrategy::default();
    let candles = generate_wave_candles(300);

    let frame = strategy.analyze(&candles).unwrap();
    assert_eq!(frame.len(), candles.len() - 49);
    assert_eq!(frame.rows()[0].candle, candles[49]);
}

#[test]
fn test_analyze_rejects_unordered_series() {
    let strategy = TrendStrategy::default();
    let mut candles = generate_wave_candles(80);
    candles.swap(10, 11);

    let err = strategy.analyze(&candles).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidInput(SeriesError::NonIncreasingTimestamp { index: 11, .. })
    ));
}

#[test]
fn test_short_series_yields_empty_frame() {
    let strategy = TrendStrategy::default();
    let candles = generate_wave_candles(30);

    let frame = strategy.analyze(&candles).unwrap();
    assert!(frame.is_empty());
    assert!(strategy.performance_score(&frame, 2).is_none());
}

// =============================================================================
// Backtest Tests
// =============================================================================

#[test]
fn test_full_pipeline_properties() {
    let strategy = TrendStrategy::default();
    let backtester = Backtester::new(BacktestParams::default()).unwrap();
    let candles = generate_wave_candles(400);

    let result = backtest_candles(&strategy, &backtester, &candles).unwrap();

    // One equity sample per analysed row
    assert_eq!(result.equity_curve.len(), candles.len() - 49);
    assert_eq!(result.final_state, AccountState::Flat);
    assert!(result.report.max_drawdown_pct <= 0.0);
    assert_eq!(result.report.total_trades, result.trades.len());
    assert_relative_eq!(result.report.final_balance, result.final_cash);
    if result.liquidation.is_some() {
        let last = result.equity_curve.last().unwrap().1;
        assert_relative_eq!(last, result.final_cash);
    }

    // Trades never overlap and come in time order
    for pair in result.trades.windows(2) {
        assert!(pair[0].exit_time < pair[1].entry_time);
    }
    for trade in &result.trades {
        assert!(trade.entry_time < trade.exit_time);
    }
}

#[test]
fn test_backtest_is_idempotent() {
    let strategy = TrendStrategy::default();
    let backtester = Backtester::new(BacktestParams::default()).unwrap();
    let candles = generate_wave_candles(300);

    let first = backtest_candles(&strategy, &backtester, &candles).unwrap();
    let second = backtest_candles(&strategy, &backtester, &candles).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_flat_market_has_no_trades() {
    let strategy = TrendStrategy::default();
    let backtester = Backtester::new(BacktestParams::default()).unwrap();
    let candles = generate_flat_candles(120, 50.0);

    let result = backtest_candles(&strategy, &backtester, &candles).unwrap();

    assert!(result.trades.is_empty());
    assert!(result.liquidation.is_none());
    assert_relative_eq!(result.final_cash, 1000.0);
    assert_eq!(result.report.max_drawdown_pct, 0.0);
    assert!(result.report.win_rate.is_none());
    assert!(result
        .equity_curve
        .iter()
        .all(|&(_, equity)| (equity - 1000.0).abs() < 1e-9));
}

#[test]
fn test_scripted_signals_cycle() {
    let backtester = Backtester::new(BacktestParams::default()).unwrap();
    let frame = SignalFrame::from_rows(vec![
        signal_row(0, 10.0, true, false),
        signal_row(1, 11.0, true, false),
        signal_row(2, 12.0, false, true),
        signal_row(3, 12.0, false, true),
        signal_row(4, 10.0, true, false),
        signal_row(5, 9.0, false, false),
    ]);

    let result = backtester.run(frame.rows());

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.entry_price, 10.0);
    assert_eq!(trade.exit_price, 12.0);
    assert!(trade.is_win());

    // Second entry at 10 is still open at the end and gets liquidated at 9
    let liq = result.liquidation.as_ref().unwrap();
    assert_eq!(liq.price, 9.0);
    assert!(liq.profit_amount < 0.0);

    let last = result.equity_curve.last().unwrap().1;
    assert_relative_eq!(last, result.final_cash);
    assert_eq!(result.report.winning_trades, 1);
    assert_eq!(result.report.win_rate, Some(100.0));
}

#[test]
fn test_backtest_symbols_from_csv_store() {
    let dir = temp_dir("multi_symbol");
    let symbols = vec![Symbol::new("BTCUSDT"), Symbol::new("ETHUSDT"), Symbol::new("MISSING")];

    data::save_csv(
        data::data_file_path(&dir, &symbols[0], "1m"),
        &generate_wave_candles(200),
    )
    .unwrap();
    data::save_csv(
        data::data_file_path(&dir, &symbols[1], "1m"),
        &generate_flat_candles(100, 20.0),
    )
    .unwrap();

    let loaded = data::load_multi_symbol(&dir, &symbols, "1m").unwrap();
    assert_eq!(loaded.len(), 2);

    let strategy = TrendStrategy::default();
    let backtester = Backtester::new(BacktestParams::default()).unwrap();
    let results = backtest_symbols(&strategy, &backtester, &loaded);

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, symbols[0]);
    let eth = results[1].1.as_ref().unwrap();
    assert!(eth.trades.is_empty());
    assert_eq!(eth.equity_curve.len(), 100 - 49);

    std::fs::remove_dir_all(&dir).ok();
}

// =============================================================================
// Config Tests
// =============================================================================

#[test]
fn test_config_file_drives_strategy() {
    let dir = temp_dir("config");
    let path = dir.join("config.json");
    std::fs::write(
        &path,
        r#"{
            "trading": { "symbols": ["BTCUSDT", "ETHUSDT"], "trade_amount": 50.0 },
            "strategy": { "ema_short": 10, "ema_long": 30, "adx_threshold": 20.0 },
            "backtest": { "data_dir": "data/test" }
        }"#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.trading.symbols().len(), 2);
    assert_eq!(config.backtest.data_dir, "data/test");

    let strategy = config.trend_strategy();
    assert_eq!(strategy.params.ema_short, 10);
    assert_eq!(strategy.params.ema_long, 30);
    assert_eq!(strategy.rules.adx_threshold, 20.0);
    assert_eq!(config.backtest_params().trade_amount, 50.0);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_config_rejects_inverted_emas() {
    let dir = temp_dir("config_invalid");
    let path = dir.join("config.json");
    std::fs::write(&path, r#"{ "strategy": { "ema_short": 60, "ema_long": 50 } }"#).unwrap();

    assert!(Config::from_file(&path).is_err());

    std::fs::remove_dir_all(&dir).ok();
}

// =============================================================================
// Data Source Tests
// =============================================================================

#[tokio::test]
async fn test_csv_source_feeds_strategy() {
    let dir = temp_dir("csv_source");
    let symbol = Symbol::new("SOLUSDT");
    data::save_csv(
        data::data_file_path(&dir, &symbol, "1m"),
        &generate_wave_candles(250),
    )
    .unwrap();

    let source = CsvDataSource::new(&dir);
    let candles = source.fetch_candles(&symbol, "1m", 200).await.unwrap();
    assert_eq!(candles.len(), 200);

    let strategy = TrendStrategy::default();
    let frame = strategy.analyze(&candles).unwrap();
    assert_eq!(frame.len(), 200 - 49);
    assert!(frame.last_closed().is_some());

    let screened = source.screen_symbols("USDT", None, None).await.unwrap();
    assert_eq!(screened, vec![symbol]);

    std::fs::remove_dir_all(&dir).ok();
}
