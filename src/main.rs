//! Signal bot - main entry point
//!
//! This binary provides three subcommands:
//! - backtest: Replay stored candles through the strategy
//! - download: Download historical candles from Binance into the CSV store
//! - live: Run the polling trader (dry run or live orders)

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "signal-bot")]
#[command(about = "Indicator-driven crypto trading bot with backtesting and live trading", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run strategy backtest
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Symbols to backtest (comma-separated), overrides config
        #[arg(short, long)]
        symbols: Option<String>,

        /// Initial balance
        #[arg(long)]
        balance: Option<f64>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
    },

    /// Download historical data from Binance
    Download {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Symbols to download (comma-separated). E.g., "BTCUSDT,ETHUSDT"
        #[arg(short, long)]
        symbols: Option<String>,

        /// Kline interval. E.g., "1m", "1h", "1d"
        #[arg(short, long)]
        interval: Option<String>,

        /// Number of days of history to fetch
        #[arg(short, long, default_value = "30")]
        days: u32,

        /// Output directory (defaults to backtest.data_dir)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Run live trading
    Live {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Place real orders (CAUTION - REAL MONEY!). Overrides dry_run.
        #[arg(long)]
        live: bool,

        /// Cycle interval in seconds (defaults to trading.check_interval_secs)
        #[arg(long)]
        interval: Option<u64>,

        /// State database path
        #[arg(long, default_value = "state/signal_bot.db")]
        state_db: String,

        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // Keep the console clean for progress bars
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Download { .. } => ("download", true),
        Commands::Live { .. } => ("live", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Backtest {
            config,
            symbols,
            balance,
            start,
            end,
        } => commands::backtest::run(config, symbols, balance, start, end),

        Commands::Download {
            config,
            symbols,
            interval,
            days,
            output,
        } => commands::download::run(config, symbols, interval, days, output),

        Commands::Live {
            config,
            live,
            interval,
            state_db,
            once,
        } => commands::live::run(config, live, interval, state_db, once),
    }
}
