//! Trend-pullback signal rules
//!
//! Entry: short EMA above long EMA (uptrend), ADX above threshold (trend has
//! strength), RSI below the oversold line (pullback inside the trend).
//! Exit: RSI overbought, or the short EMA crossing below the long EMA.
//!
//! Rules are stateless per row. A row may carry both flags; the simulator
//! decides which one applies from its own state.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::error::Result;
use crate::indicators::{IndicatorFrame, IndicatorParams, IndicatorValues};
use crate::{validate_series, Candle};

/// Score given to candidates whose recent RSI is overbought
pub const OVERBOUGHT_SCORE: f64 = -100.0;

/// Threshold rules turning indicator values into buy/sell flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRules {
    pub adx_threshold: f64,
    pub rsi_buy_below: f64,
    pub rsi_sell_above: f64,
}

impl Default for SignalRules {
    fn default() -> Self {
        Self {
            adx_threshold: 25.0,
            rsi_buy_below: 40.0,
            rsi_sell_above: 70.0,
        }
    }
}

impl SignalRules {
    pub fn is_buy(&self, v: &IndicatorValues) -> bool {
        v.ema_short > v.ema_long && v.adx > self.adx_threshold && v.rsi < self.rsi_buy_below
    }

    pub fn is_sell(&self, v: &IndicatorValues) -> bool {
        v.rsi > self.rsi_sell_above || v.ema_short < v.ema_long
    }
}

/// A fully warmed-up row annotated with its signal flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRow {
    pub candle: Candle,
    pub indicators: IndicatorValues,
    pub buy_signal: bool,
    pub sell_signal: bool,
}

/// Signal-annotated rows, warm-up rows already removed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalFrame {
    rows: Vec<SignalRow>,
}

impl SignalFrame {
    /// Evaluate `rules` on every complete row of `frame`
    pub fn from_indicators(frame: &IndicatorFrame, rules: &SignalRules) -> Self {
        let rows = frame
            .complete_rows()
            .map(|(candle, indicators)| SignalRow {
                candle: candle.clone(),
                indicators,
                buy_signal: rules.is_buy(&indicators),
                sell_signal: rules.is_sell(&indicators),
            })
            .collect();

        SignalFrame { rows }
    }

    pub fn from_rows(rows: Vec<SignalRow>) -> Self {
        SignalFrame { rows }
    }

    pub fn rows(&self) -> &[SignalRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn buy_count(&self) -> usize {
        self.rows.iter().filter(|r| r.buy_signal).count()
    }

    pub fn sell_count(&self) -> usize {
        self.rows.iter().filter(|r| r.sell_signal).count()
    }

    /// Last row whose candle has closed. Live data includes the still-forming
    /// candle as the final row, so this is the second-to-last row.
    pub fn last_closed(&self) -> Option<&SignalRow> {
        self.rows.len().checked_sub(2).and_then(|i| self.rows.get(i))
    }
}

/// Indicator periods plus signal thresholds: the whole trading strategy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendStrategy {
    pub params: IndicatorParams,
    pub rules: SignalRules,
}

impl TrendStrategy {
    pub fn new(params: IndicatorParams, rules: SignalRules) -> Self {
        Self { params, rules }
    }

    /// Validate `candles`, compute indicators and evaluate the signal rules
    pub fn analyze(&self, candles: &[Candle]) -> Result<SignalFrame> {
        validate_series(candles)?;
        let frame = IndicatorFrame::compute(candles, &self.params);
        let signals = SignalFrame::from_indicators(&frame, &self.rules);

        tracing::debug!(
            candles = candles.len(),
            warmup = frame.warmup_len(),
            buys = signals.buy_count(),
            sells = signals.sell_count(),
            "Signals generated"
        );

        Ok(signals)
    }

    /// Attractiveness score of a symbol over its last `eval_candles` rows.
    ///
    /// Overbought candidates (mean RSI above the sell line) score
    /// [`OVERBOUGHT_SCORE`]. Otherwise the mean EMV is used, at full weight
    /// when mean RSI sits in the 40..=60 band and half weight outside it.
    /// Returns `None` when there are no complete rows to score.
    pub fn performance_score(&self, frame: &SignalFrame, eval_candles: usize) -> Option<f64> {
        let rows = frame.rows();
        if rows.is_empty() || eval_candles == 0 {
            return None;
        }

        let recent = &rows[rows.len().saturating_sub(eval_candles)..];
        let avg_rsi = recent.iter().map(|r| r.indicators.rsi).mean();
        let avg_emv = recent.iter().map(|r| r.indicators.emv).mean();

        if avg_rsi > self.rules.rsi_sell_above {
            return Some(OVERBOUGHT_SCORE);
        }

        let weight = if (40.0..=60.0).contains(&avg_rsi) {
            1.0
        } else {
            0.5
        };
        Some(avg_emv * weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, SeriesError};
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn values(ema_short: f64, ema_long: f64, rsi: f64, adx: f64) -> IndicatorValues {
        IndicatorValues {
            ema_short,
            ema_long,
            rsi,
            adx,
            atr: 1.0,
            emv: 0.0,
        }
    }

    fn row(rsi: f64, emv: f64) -> SignalRow {
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        SignalRow {
            candle: Candle::new_unchecked(ts, 100.0, 101.0, 99.0, 100.0, 10.0),
            indicators: IndicatorValues {
                ema_short: 100.0,
                ema_long: 99.0,
                rsi,
                adx: 30.0,
                atr: 1.0,
                emv,
            },
            buy_signal: false,
            sell_signal: false,
        }
    }

    #[test]
    fn test_buy_requires_all_conditions() {
        let rules = SignalRules::default();

        assert!(rules.is_buy(&values(101.0, 100.0, 35.0, 30.0)));
        // downtrend
        assert!(!rules.is_buy(&values(99.0, 100.0, 35.0, 30.0)));
        // weak trend
        assert!(!rules.is_buy(&values(101.0, 100.0, 35.0, 25.0)));
        // not a pullback
        assert!(!rules.is_buy(&values(101.0, 100.0, 40.0, 30.0)));
    }

    #[test]
    fn test_sell_on_overbought_or_cross_down() {
        let rules = SignalRules::default();

        assert!(rules.is_sell(&values(101.0, 100.0, 71.0, 10.0)));
        assert!(rules.is_sell(&values(99.0, 100.0, 50.0, 10.0)));
        assert!(!rules.is_sell(&values(101.0, 100.0, 70.0, 10.0)));
        assert!(!rules.is_sell(&values(100.0, 100.0, 50.0, 10.0)));
    }

    #[test]
    fn test_rows_may_carry_both_flags() {
        let rules = SignalRules {
            adx_threshold: 10.0,
            rsi_buy_below: 80.0,
            rsi_sell_above: 70.0,
        };
        let v = values(101.0, 100.0, 75.0, 30.0);
        assert!(rules.is_buy(&v));
        assert!(rules.is_sell(&v));
    }

    #[test]
    fn test_analyze_rejects_empty_series() {
        let strategy = TrendStrategy::default();
        assert_eq!(
            strategy.analyze(&[]).unwrap_err(),
            Error::InvalidInput(SeriesError::Empty)
        );
    }

    #[test]
    fn test_flat_market_never_signals() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                Candle::new_unchecked(
                    start + Duration::minutes(i),
                    100.0,
                    100.0,
                    100.0,
                    100.0,
                    1.0,
                )
            })
            .collect();

        let frame = TrendStrategy::default().analyze(&candles).unwrap();
        assert_eq!(frame.len(), 11);
        assert_eq!(frame.buy_count(), 0);
        assert_eq!(frame.sell_count(), 0);
    }

    #[test]
    fn test_performance_score() {
        let strategy = TrendStrategy::default();

        let neutral = SignalFrame::from_rows(vec![row(30.0, 5.0), row(50.0, 2.0), row(50.0, 4.0)]);
        // last two rows: rsi 50 (in band), emv mean 3
        assert_relative_eq!(strategy.performance_score(&neutral, 2).unwrap(), 3.0);

        let weak = SignalFrame::from_rows(vec![row(30.0, 4.0), row(34.0, 2.0)]);
        assert_relative_eq!(strategy.performance_score(&weak, 2).unwrap(), 1.5);

        let overbought = SignalFrame::from_rows(vec![row(75.0, 9.0), row(80.0, 9.0)]);
        assert_relative_eq!(
            strategy.performance_score(&overbought, 2).unwrap(),
            OVERBOUGHT_SCORE
        );

        assert!(strategy
            .performance_score(&SignalFrame::default(), 2)
            .is_none());
    }

    #[test]
    fn test_last_closed_row() {
        let frame = SignalFrame::from_rows(vec![row(10.0, 0.0), row(20.0, 0.0), row(30.0, 0.0)]);
        assert_relative_eq!(frame.last_closed().unwrap().indicators.rsi, 20.0);
        assert!(SignalFrame::from_rows(vec![row(10.0, 0.0)])
            .last_closed()
            .is_none());
    }
}
