//! Download command implementation

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::{error, info};

use signal_bot::binance::BinanceClient;
use signal_bot::{data, Config, Symbol};

use super::parse_symbols;

pub fn run(
    config_path: String,
    symbols: Option<String>,
    interval: Option<String>,
    days: u32,
    output: Option<String>,
) -> Result<()> {
    let config = Config::from_file(&config_path)?;

    let symbols: Vec<Symbol> = match symbols {
        Some(s) => parse_symbols(&s).iter().map(Symbol::new).collect(),
        None => config.trading.symbols(),
    };
    let interval = interval.unwrap_or_else(|| config.trading.timeframe.clone());
    let output = output.unwrap_or_else(|| config.backtest.data_dir.clone());

    info!(
        "Downloading {} days of {} data for {} symbols into {}",
        days,
        interval,
        symbols.len(),
        output
    );

    let client = BinanceClient::from_config(&config.exchange)?;
    let runtime = tokio::runtime::Runtime::new()?;

    let progress = MultiProgress::new();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {prefix:>10} [{elapsed_precise}] {msg}")
        .context("Invalid progress template")?;

    let mut failures = Vec::new();
    for symbol in &symbols {
        let bar = progress.add(ProgressBar::new_spinner());
        bar.set_style(style.clone());
        bar.set_prefix(symbol.to_string());

        let fetched = runtime.block_on(client.fetch_full_history(
            &symbol.file_stem(),
            &interval,
            days,
            |count| {
                bar.set_message(format!("{} candles", count));
                bar.tick();
            },
        ));

        match fetched {
            Ok(candles) if !candles.is_empty() => {
                let path = data::data_file_path(&output, symbol, &interval);
                data::save_csv(&path, &candles)?;
                bar.finish_with_message(format!("{} candles -> {}", candles.len(), path.display()));
            }
            Ok(_) => {
                bar.finish_with_message("no data");
                failures.push(symbol.clone());
            }
            Err(e) => {
                error!("Download failed for {}: {:#}", symbol, e);
                bar.finish_with_message("failed");
                failures.push(symbol.clone());
            }
        }
    }

    if !failures.is_empty() {
        anyhow::bail!("Download failed for: {:?}", failures);
    }

    info!("Download completed");
    Ok(())
}
