//! Live trading command implementation

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use signal_bot::binance::BinanceClient;
use signal_bot::data::{CsvDataSource, MarketDataSource, SymbolScreener};
use signal_bot::execution::create_order_sink;
use signal_bot::live::{CycleOutcome, LiveSettings, LiveTrader};
use signal_bot::state_manager::SqliteStateManager;
use signal_bot::Config;

pub fn run(
    config_path: String,
    live: bool,
    interval_override: Option<u64>,
    state_db: String,
    once: bool,
) -> Result<()> {
    let mut config = Config::from_file(&config_path)?;
    if live {
        config.trading.dry_run = false;
    }

    if config.trading.dry_run {
        info!("Running in DRY RUN mode - no real orders will be placed");
    } else {
        warn!("==============================================");
        warn!("LIVE TRADING MODE - REAL MONEY AT RISK!");
        warn!("==============================================");
        warn!("Starting in 5 seconds... Press Ctrl+C to abort");
        std::thread::sleep(Duration::from_secs(5));
    }

    let interval =
        Duration::from_secs(interval_override.unwrap_or(config.trading.check_interval_secs));
    if interval.is_zero() {
        bail!("Cycle interval must be > 0 seconds");
    }

    info!(
        "Exchange: {} | timeframe {} | trade amount {:.2} {}",
        config.exchange.name,
        config.trading.timeframe,
        config.trading.trade_amount,
        config.exchange.quote_currency
    );

    let client = BinanceClient::from_config(&config.exchange)?;
    let (source, screener): (Arc<dyn MarketDataSource>, Option<Arc<dyn SymbolScreener>>) =
        match config.exchange.name.as_str() {
            "binance" => {
                let shared = Arc::new(client.clone());
                let source: Arc<dyn MarketDataSource> = shared.clone();
                let screener: Arc<dyn SymbolScreener> = shared;
                (source, Some(screener))
            }
            "csv" => {
                if !config.trading.dry_run {
                    bail!("The csv exchange only supports dry-run trading");
                }
                let csv = Arc::new(CsvDataSource::new(&config.backtest.data_dir));
                let source: Arc<dyn MarketDataSource> = csv.clone();
                let screener: Arc<dyn SymbolScreener> = csv;
                (source, Some(screener))
            }
            other => bail!("Unsupported exchange: {}", other),
        };

    let sink = create_order_sink(
        config.trading.dry_run,
        &client,
        &config.exchange.quote_currency,
        config.trading.initial_balance,
        config.exchange.fee_rate,
    )?;
    info!("Data source: {} | order sink: {}", source.name(), sink.name());

    if let Some(parent) = std::path::Path::new(&state_db).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let state = SqliteStateManager::new(&state_db)?;
    info!("State database: {}", state_db);

    let mut trader = LiveTrader::new(
        source,
        screener,
        sink,
        state,
        config.trend_strategy(),
        LiveSettings::from_config(&config),
    )?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        if once {
            if trader.position().is_none() {
                for (symbol, score) in trader.rank_candidates().await? {
                    info!("  {:<12} score {:>10.4}", symbol.as_str(), score);
                }
            }
            match trader.run_cycle().await? {
                CycleOutcome::Bought {
                    symbol,
                    price,
                    quantity,
                    score,
                } => info!(
                    "Bought {:.6} {} @ {:.8} (score {:.4})",
                    quantity, symbol, price, score
                ),
                CycleOutcome::Sold {
                    symbol,
                    price,
                    profit_pct,
                } => info!("Sold {} @ {:.8} ({:+.2}%)", symbol, price, profit_pct),
                CycleOutcome::Holding { symbol } => info!("Holding {}", symbol),
                CycleOutcome::NoCandidate => info!("No candidate with a positive score"),
            }
            return Ok(());
        }

        info!("Starting live loop, cycle every {:?}. Press Ctrl+C to stop.", interval);
        trader
            .run(interval, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            })
            .await
    })
}
