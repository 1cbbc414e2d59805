//! Backtest command implementation

use anyhow::{bail, Result};
use std::path::Path;
use tracing::{debug, error, info, warn};

use signal_bot::backtest::{backtest_symbols, Backtester};
use signal_bot::{data, Config};

use super::parse_symbols;

pub fn run(
    config_path: String,
    symbols_override: Option<String>,
    balance_override: Option<f64>,
    start: Option<String>,
    end: Option<String>,
) -> Result<()> {
    info!("Starting backtest");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(symbols) = symbols_override {
        info!("Overriding symbols to: {}", symbols);
        config.trading.symbols = parse_symbols(&symbols);
    }
    if let Some(balance) = balance_override {
        info!("Overriding initial balance to: {:.2}", balance);
        config.trading.initial_balance = balance;
    }
    config.validate()?;

    let start = start.as_deref().map(data::parse_date).transpose()?;
    let end = end.as_deref().map(data::parse_date).transpose()?;

    let symbols = config.trading.symbols();
    debug!("Symbols: {:?}", symbols);
    info!("Loading data from: {}", config.backtest.data_dir);

    let data = data::load_multi_symbol(
        &config.backtest.data_dir,
        &symbols,
        &config.trading.timeframe,
    )?
    .into_iter()
    .map(|(symbol, candles)| (symbol, data::filter_candles_by_date(candles, start, end)))
    .collect::<Vec<_>>();

    let strategy = config.trend_strategy();
    let backtester = Backtester::new(config.backtest_params())?;

    info!("Running backtest...");
    let results = backtest_symbols(&strategy, &backtester, &data);

    let results_dir = Path::new(&config.backtest.results_dir);
    let mut failures = 0;

    for (symbol, result) in results {
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                error!("{}: {}", symbol, e);
                failures += 1;
                continue;
            }
        };

        result.report.log_summary(symbol.as_str());
        if let Some(liq) = &result.liquidation {
            warn!(
                "{}: open position liquidated at end of data @ {:.8} ({:+.2}%)",
                symbol, liq.price, liq.profit_pct
            );
        }

        if result.trades.is_empty() {
            info!("{}: no trades executed", symbol);
            continue;
        }
        let path = results_dir.join(format!("trades_{}.csv", symbol.file_stem()));
        data::write_trades_csv(&path, &result.trades)?;
        info!("Trade log written to {}", path.display());
    }

    if failures == data.len() {
        bail!("Backtest failed for every symbol");
    }

    info!("Backtest completed successfully");
    Ok(())
}
