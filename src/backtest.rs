//! Backtesting engine
//!
//! Sequential single-position simulator. Each candle is processed in order:
//! equity is sampled first, then the account either enters (FLAT) or exits
//! (LONG) on the row's signal. Fees are a flat rate on both legs.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::metrics::{self, PerformanceReport};
use crate::strategy::{SignalRow, TrendStrategy};
use crate::{AccountState, Candle, Position, Symbol, Trade};

/// Account parameters of a simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    pub initial_balance: f64,
    pub trade_amount: f64,
    pub fee_rate: f64,
}

impl Default for BacktestParams {
    fn default() -> Self {
        Self {
            initial_balance: 1000.0,
            trade_amount: 100.0,
            fee_rate: 0.001,
        }
    }
}

impl BacktestParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.initial_balance.is_finite() && self.initial_balance > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "initial_balance must be > 0, got {}",
                self.initial_balance
            )));
        }
        if !(self.trade_amount.is_finite() && self.trade_amount > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "trade_amount must be > 0, got {}",
                self.trade_amount
            )));
        }
        if !(0.0..1.0).contains(&self.fee_rate) {
            return Err(Error::InvalidConfig(format!(
                "fee_rate must be in [0, 1), got {}",
                self.fee_rate
            )));
        }
        Ok(())
    }
}

/// Position still open when the data ran out, closed at the final candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Liquidation {
    pub time: DateTime<Utc>,
    pub price: f64,
    pub proceeds: f64,
    pub profit_amount: f64,
    pub profit_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub trades: Vec<Trade>,
    /// One sample per processed candle
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
    pub final_cash: f64,
    pub liquidation: Option<Liquidation>,
    /// Account state reached after the end-of-data liquidation step
    pub final_state: AccountState,
    pub report: PerformanceReport,
}

/// Backtest engine
#[derive(Debug, Clone)]
pub struct Backtester {
    params: BacktestParams,
}

impl Backtester {
    pub fn new(params: BacktestParams) -> Result<Self> {
        params.validate()?;
        Ok(Backtester { params })
    }

    pub fn params(&self) -> &BacktestParams {
        &self.params
    }

    /// Replay signal rows through the account model
    pub fn run(&self, rows: &[SignalRow]) -> BacktestResult {
        let fee_rate = self.params.fee_rate;
        let trade_amount = self.params.trade_amount;

        let mut cash = self.params.initial_balance;
        let mut position: Option<Position> = None;
        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(rows.len());

        for row in rows {
            let Candle {
                datetime, close, ..
            } = row.candle;

            let held = position.as_ref().map_or(0.0, |p| p.market_value(close));
            equity_curve.push((datetime, cash + held));

            match position.take() {
                None => {
                    if row.buy_signal && cash >= trade_amount {
                        let pos = Position::open(trade_amount, fee_rate, close, datetime);
                        cash -= trade_amount;
                        debug!(
                            time = %datetime,
                            price = close,
                            size = pos.size,
                            cash,
                            "BUY"
                        );
                        position = Some(pos);
                    }
                }
                Some(pos) if row.sell_signal => {
                    let (net, trade) = pos.close(close, datetime, fee_rate);
                    cash += net;
                    debug!(
                        time = %datetime,
                        price = close,
                        profit_pct = trade.profit_pct,
                        profit = trade.profit_amount,
                        cash,
                        "SELL"
                    );
                    trades.push(trade);
                }
                Some(pos) => position = Some(pos),
            }
        }

        let liquidation = match (position.as_ref(), rows.last()) {
            (Some(pos), Some(last)) => {
                let (net, trade) = pos.close(last.candle.close, last.candle.datetime, fee_rate);
                cash += net;
                if let Some(sample) = equity_curve.last_mut() {
                    sample.1 = cash;
                }
                debug!(
                    price = last.candle.close,
                    profit_pct = trade.profit_pct,
                    "Liquidated open position at end of data"
                );
                Some(Liquidation {
                    time: last.candle.datetime,
                    price: last.candle.close,
                    proceeds: net,
                    profit_amount: trade.profit_amount,
                    profit_pct: trade.profit_pct,
                })
            }
            _ => None,
        };
        if liquidation.is_some() {
            position = None;
        }
        let final_state = if position.is_some() {
            AccountState::Long
        } else {
            AccountState::Flat
        };

        let report = metrics::summarize(self.params.initial_balance, cash, &trades, &equity_curve);

        BacktestResult {
            trades,
            equity_curve,
            final_cash: cash,
            liquidation,
            final_state,
            report,
        }
    }
}

/// Analyse and simulate one candle series
pub fn backtest_candles(
    strategy: &TrendStrategy,
    backtester: &Backtester,
    candles: &[Candle],
) -> Result<BacktestResult> {
    let signals = strategy.analyze(candles)?;
    Ok(backtester.run(signals.rows()))
}

/// Run independent simulations for several symbols in parallel
pub fn backtest_symbols(
    strategy: &TrendStrategy,
    backtester: &Backtester,
    data: &[(Symbol, Vec<Candle>)],
) -> Vec<(Symbol, Result<BacktestResult>)> {
    info!("Backtesting {} symbols", data.len());

    data.par_iter()
        .map(|(symbol, candles)| {
            let result = backtest_candles(strategy, backtester, candles);
            (symbol.clone(), result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SeriesError;
    use crate::indicators::IndicatorValues;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn neutral() -> IndicatorValues {
        IndicatorValues {
            ema_short: 100.0,
            ema_long: 100.0,
            rsi: 50.0,
            adx: 20.0,
            atr: 1.0,
            emv: 0.0,
        }
    }

    /// Rows closing at `closes`, buying at `buys` and selling at `sells`
    fn rows(closes: &[f64], buys: &[usize], sells: &[usize]) -> Vec<SignalRow> {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| SignalRow {
                candle: Candle::new_unchecked(
                    start + Duration::minutes(i as i64),
                    close,
                    close,
                    close,
                    close,
                    1.0,
                ),
                indicators: neutral(),
                buy_signal: buys.contains(&i),
                sell_signal: sells.contains(&i),
            })
            .collect()
    }

    fn backtester() -> Backtester {
        Backtester::new(BacktestParams::default()).unwrap()
    }

    #[test]
    fn test_round_trip_with_fees() {
        let mut closes = vec![100.0; 25];
        for c in closes.iter_mut().skip(20) {
            *c = 110.0;
        }
        let result = backtester().run(&rows(&closes, &[10], &[20]));

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        let net = 0.999 * 110.0 * 0.999;
        assert_relative_eq!(trade.profit_amount, net - 100.0, epsilon = 1e-9);
        assert_relative_eq!(trade.profit_pct, 9.780_11, epsilon = 1e-4);
        assert_relative_eq!(result.final_cash, 900.0 + net, epsilon = 1e-9);
        assert!(result.liquidation.is_none());

        // sample at the sell candle is taken before the exit
        assert_relative_eq!(result.equity_curve[20].1, 900.0 + 0.999 * 110.0, epsilon = 1e-9);
        assert_relative_eq!(result.equity_curve[21].1, 900.0 + net, epsilon = 1e-9);
        assert_eq!(result.equity_curve.len(), 25);
    }

    #[test]
    fn test_no_signals_no_trades() {
        let result = backtester().run(&rows(&[100.0; 30], &[], &[]));
        assert!(result.trades.is_empty());
        assert!(result.report.win_rate.is_none());
        assert_relative_eq!(result.final_cash, 1000.0);
        assert!(result.equity_curve.iter().all(|&(_, e)| e == 1000.0));
    }

    #[test]
    fn test_empty_rows() {
        let result = backtester().run(&[]);
        assert!(result.trades.is_empty());
        assert!(result.equity_curve.is_empty());
        assert_relative_eq!(result.report.max_drawdown_pct, 0.0);
    }

    #[test]
    fn test_insufficient_cash_stays_flat() {
        let params = BacktestParams {
            initial_balance: 50.0,
            ..BacktestParams::default()
        };
        let result = Backtester::new(params)
            .unwrap()
            .run(&rows(&[100.0; 5], &[1], &[3]));
        assert!(result.trades.is_empty());
        assert!(result.liquidation.is_none());
        assert_relative_eq!(result.final_cash, 50.0);
    }

    #[test]
    fn test_buy_precedence_and_single_position() {
        // row 1 carries both flags while flat, row 2 buys again while long
        let result = backtester().run(&rows(&[100.0; 6], &[1, 2], &[1, 4]));
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].entry_time, result.equity_curve[1].0);
        assert_eq!(result.trades[0].exit_time, result.equity_curve[4].0);
    }

    #[test]
    fn test_liquidation_at_end_of_data() {
        let closes = [100.0, 100.0, 120.0, 120.0];
        let result = backtester().run(&rows(&closes, &[1], &[]));

        assert!(result.trades.is_empty());
        let liq = result.liquidation.as_ref().unwrap();
        let net = 0.999 * 120.0 * 0.999;
        assert_relative_eq!(liq.proceeds, net, epsilon = 1e-9);
        assert_relative_eq!(result.final_cash, 900.0 + net, epsilon = 1e-9);
        assert_relative_eq!(result.equity_curve[3].1, result.final_cash);
        assert_eq!(result.equity_curve.len(), closes.len());
        assert_eq!(result.final_state, AccountState::Flat);
    }

    #[test]
    fn test_entry_on_last_row_ends_flat() {
        let result = backtester().run(&rows(&[100.0; 4], &[3], &[]));

        let liq = result.liquidation.as_ref().unwrap();
        assert_eq!(liq.time, result.equity_curve[3].0);
        assert_eq!(result.final_state, AccountState::Flat);
        assert_relative_eq!(result.equity_curve[3].1, result.final_cash);
        assert_relative_eq!(result.final_cash, 900.0 + 0.999 * 100.0 * 0.999, epsilon = 1e-9);
    }

    #[test]
    fn test_no_position_ends_flat_without_liquidation() {
        let result = backtester().run(&rows(&[100.0; 4], &[], &[]));
        assert!(result.liquidation.is_none());
        assert_eq!(result.final_state, AccountState::Flat);
    }

    #[test]
    fn test_trades_do_not_overlap() {
        let result = backtester().run(&rows(&[100.0; 12], &[0, 3, 6], &[2, 5, 9]));
        assert_eq!(result.trades.len(), 3);
        for t in &result.trades {
            assert!(t.entry_time < t.exit_time);
        }
        for pair in result.trades.windows(2) {
            assert!(pair[0].exit_time <= pair[1].entry_time);
        }
    }

    #[test]
    fn test_invalid_params() {
        let bad = [
            BacktestParams {
                initial_balance: 0.0,
                ..BacktestParams::default()
            },
            BacktestParams {
                trade_amount: -1.0,
                ..BacktestParams::default()
            },
            BacktestParams {
                fee_rate: 1.0,
                ..BacktestParams::default()
            },
        ];
        for params in bad {
            assert!(matches!(
                Backtester::new(params),
                Err(Error::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_backtest_symbols_isolates_failures() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let good: Vec<Candle> = (0..80)
            .map(|i| {
                let p = 100.0 + (i as f64 * 0.3).sin();
                Candle::new_unchecked(start + Duration::minutes(i), p, p + 0.5, p - 0.5, p, 5.0)
            })
            .collect();
        let data = vec![
            (Symbol::new("BTCUSDT"), good),
            (Symbol::new("ETHUSDT"), Vec::new()),
        ];

        let results = backtest_symbols(&TrendStrategy::default(), &backtester(), &data);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.as_str(), "BTCUSDT");
        assert_eq!(results[0].1.as_ref().unwrap().equity_curve.len(), 31);
        assert_eq!(
            results[1].1.as_ref().unwrap_err(),
            &Error::InvalidInput(SeriesError::Empty)
        );
    }
}
