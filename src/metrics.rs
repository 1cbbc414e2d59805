//! Performance summary of a backtest run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::info;

use crate::Trade;

/// Aggregate statistics of one simulation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub initial_balance: f64,
    pub final_balance: f64,
    pub total_return_pct: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// `None` when no trade was executed
    pub win_rate: Option<f64>,
    /// Non-positive; 0 when equity never fell below its running peak
    pub max_drawdown_pct: f64,
    pub avg_profit_pct: Option<f64>,
}

/// Share of trades with positive profit, in percent
pub fn win_rate(trades: &[Trade]) -> Option<f64> {
    if trades.is_empty() {
        return None;
    }
    let wins = trades.iter().filter(|t| t.is_win()).count();
    Some(wins as f64 / trades.len() as f64 * 100.0)
}

pub fn total_return_pct(initial_balance: f64, final_balance: f64) -> f64 {
    (final_balance - initial_balance) / initial_balance * 100.0
}

/// Largest decline from a running peak, as a non-positive percentage
pub fn max_drawdown_pct(equity_curve: &[(DateTime<Utc>, f64)]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;

    for &(_, equity) in equity_curve {
        peak = peak.max(equity);
        if peak > 0.0 {
            worst = worst.min(equity / peak - 1.0);
        }
    }

    worst * 100.0
}

/// Reduce a trade log and equity curve into a report
pub fn summarize(
    initial_balance: f64,
    final_balance: f64,
    trades: &[Trade],
    equity_curve: &[(DateTime<Utc>, f64)],
) -> PerformanceReport {
    let winning_trades = trades.iter().filter(|t| t.is_win()).count();
    let avg_profit_pct = if trades.is_empty() {
        None
    } else {
        Some(trades.iter().map(|t| t.profit_pct).mean())
    };

    PerformanceReport {
        initial_balance,
        final_balance,
        total_return_pct: total_return_pct(initial_balance, final_balance),
        total_trades: trades.len(),
        winning_trades,
        losing_trades: trades.len() - winning_trades,
        win_rate: win_rate(trades),
        max_drawdown_pct: max_drawdown_pct(equity_curve),
        avg_profit_pct,
    }
}

impl PerformanceReport {
    /// Emit the report through `tracing`, one line per figure
    pub fn log_summary(&self, label: &str) {
        info!("{}", "=".repeat(60));
        info!("BACKTEST RESULTS: {}", label);
        info!("{}", "=".repeat(60));
        info!("Initial Balance:    {:.2}", self.initial_balance);
        info!("Final Balance:      {:.2}", self.final_balance);
        info!("Total Return:       {:.2}%", self.total_return_pct);
        info!("Max Drawdown:       {:.2}%", self.max_drawdown_pct);
        info!("Total Trades:       {}", self.total_trades);

        match self.win_rate {
            Some(rate) => {
                info!("Winning Trades:     {}", self.winning_trades);
                info!("Losing Trades:      {}", self.losing_trades);
                info!("Win Rate:           {:.2}%", rate);
            }
            None => info!("Win Rate:           n/a (no trades executed)"),
        }

        if let Some(avg) = self.avg_profit_pct {
            info!("Avg Profit/Trade:   {:.2}%", avg);
        }
        info!("{}", "=".repeat(60));
    }
}
