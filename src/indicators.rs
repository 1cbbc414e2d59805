//! Technical indicators
//!
//! Every function returns a series aligned with its input: same length, with
//! `None` for rows that are still inside the warm-up window.
//!
//! Two smoothing conventions are in play and must not be mixed:
//! - trend EMA: α = 2/(period+1), seeded with the first value (via the `ta` crate)
//! - Wilder's smoothing: α = 1/period, used by RSI, ATR and ADX
//!
//! Available indicators:
//! - Trend: EMA
//! - Momentum: RSI
//! - Volatility: True Range, ATR
//! - Directional: +DI/-DI, ADX
//! - Volume: EMV (ease of movement)

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use ta::indicators::{ExponentialMovingAverage, TrueRange};
use ta::Next;

use crate::Candle;

/// Volume scale used by ease-of-movement so box ratios stay near price units
pub const EMV_VOLUME_DIVISOR: f64 = 100_000_000.0;

/// Type alias for two-line indicators (line1, line2)
pub type DualLineOutput = (Vec<Option<f64>>, Vec<Option<f64>>);

// =============================================================================
// Smoothing
// =============================================================================

/// Exponential moving average for trend following (α = 2/(period+1)).
///
/// Seeded with the first value; defined from the `period`-th sample on.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut indicator = match ExponentialMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let ema_val = indicator.next(value);
            (i + 1 >= period).then_some(ema_val)
        })
        .collect()
}

/// Wilder's smoothing (α = 1/period) over a series that may start with gaps.
///
/// The first defined sample seeds the average. Output is defined once `period`
/// samples have been observed; gaps after that carry the previous average.
pub fn wilder_smooth(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }

    let alpha = 1.0 / period as f64;
    let mut average: Option<f64> = None;
    let mut observed = 0usize;

    values
        .iter()
        .map(|value| {
            if let Some(x) = *value {
                observed += 1;
                average = Some(match average {
                    None => x,
                    Some(prev) => prev + alpha * (x - prev),
                });
            }
            if observed >= period {
                average
            } else {
                None
            }
        })
        .collect()
}

/// Simple moving average over a gappy series; a window containing any gap is undefined
pub fn sma(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }

    (0..values.len())
        .map(|i| {
            if i + 1 < period {
                return None;
            }
            let window = &values[i + 1 - period..=i];
            let sum: Option<f64> = window.iter().copied().sum();
            sum.map(|s| s / period as f64)
        })
        .collect()
}

// =============================================================================
// Momentum
// =============================================================================

/// Relative Strength Index with Wilder's smoothing.
///
/// The first row has no previous close, so the first value needs `period + 1` closes.
/// When the average loss is zero RSI is 100, unless the average gain is zero
/// too (a flat market), which reads as the neutral 50.
pub fn rsi(close: &[f64], period: usize) -> Vec<Option<f64>> {
    if close.is_empty() {
        return vec![];
    }

    let mut gains = Vec::with_capacity(close.len());
    let mut losses = Vec::with_capacity(close.len());
    gains.push(None);
    losses.push(None);

    for (prev, curr) in close.iter().tuple_windows() {
        let delta = curr - prev;
        gains.push(Some(delta.max(0.0)));
        losses.push(Some((-delta).max(0.0)));
    }

    let avg_gain = wilder_smooth(&gains, period);
    let avg_loss = wilder_smooth(&losses, period);

    avg_gain
        .into_iter()
        .zip(avg_loss)
        .map(|(gain, loss)| match (gain, loss) {
            (Some(g), Some(l)) => Some(rsi_from_averages(g, l)),
            _ => None,
        })
        .collect()
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss <= 0.0 {
        if avg_gain <= 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        let rs = avg_gain / avg_loss;
        (100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0)
    }
}

// =============================================================================
// Volatility
// =============================================================================

/// True range per candle; the first candle degenerates to high - low
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    let mut indicator = TrueRange::new();
    candles.iter().map(|c| indicator.next(c)).collect()
}

/// Average True Range using Wilder's smoothing
pub fn atr(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let tr: Vec<Option<f64>> = true_range(candles).into_iter().map(Some).collect();
    wilder_smooth(&tr, period)
}

// =============================================================================
// Directional Movement
// =============================================================================

/// Raw directional movement (+DM, -DM); undefined on the first candle.
/// Negative moves are zeroed before smoothing.
fn directional_movement(candles: &[Candle]) -> DualLineOutput {
    let mut plus_dm = Vec::with_capacity(candles.len());
    let mut minus_dm = Vec::with_capacity(candles.len());

    if !candles.is_empty() {
        plus_dm.push(None);
        minus_dm.push(None);
    }

    for (prev, curr) in candles.iter().tuple_windows() {
        plus_dm.push(Some((curr.high - prev.high).max(0.0)));
        minus_dm.push(Some((prev.low - curr.low).max(0.0)));
    }

    (plus_dm, minus_dm)
}

/// Directional indicators (+DI, -DI) scaled to 0..100.
///
/// A zero ATR (no price range at all) yields 0 for both lines.
pub fn dmi(candles: &[Candle], period: usize) -> DualLineOutput {
    let (plus_dm, minus_dm) = directional_movement(candles);
    let smoothed_plus = wilder_smooth(&plus_dm, period);
    let smoothed_minus = wilder_smooth(&minus_dm, period);
    let atr_values = atr(candles, period);

    let to_di = |dm: Option<f64>, range: Option<f64>| match (dm, range) {
        (Some(dm), Some(range)) if range > 0.0 => Some(100.0 * dm / range),
        (Some(_), Some(_)) => Some(0.0),
        _ => None,
    };

    let plus_di = smoothed_plus
        .iter()
        .zip(&atr_values)
        .map(|(&dm, &range)| to_di(dm, range))
        .collect();
    let minus_di = smoothed_minus
        .iter()
        .zip(&atr_values)
        .map(|(&dm, &range)| to_di(dm, range))
        .collect();

    (plus_di, minus_di)
}

/// Average Directional Index: Wilder-smoothed DX.
///
/// DX is 0 when +DI and -DI are both 0.
pub fn adx(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let (plus_di, minus_di) = dmi(candles, period);

    let dx: Vec<Option<f64>> = plus_di
        .into_iter()
        .zip(minus_di)
        .map(|(p, m)| match (p, m) {
            (Some(p), Some(m)) => {
                let sum = p + m;
                Some(if sum > 0.0 {
                    100.0 * (p - m).abs() / sum
                } else {
                    0.0
                })
            }
            _ => None,
        })
        .collect();

    wilder_smooth(&dx, period)
}

// =============================================================================
// Volume
// =============================================================================

/// Ease of Movement: midpoint change per unit of volume, averaged over `period`.
///
/// A candle with no range or no volume contributes 0.
pub fn emv(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut raw = Vec::with_capacity(candles.len());
    if !candles.is_empty() {
        raw.push(None);
    }

    for (prev, curr) in candles.iter().tuple_windows() {
        let distance = curr.midpoint() - prev.midpoint();
        let range = curr.high - curr.low;
        let value = if range > 0.0 && curr.volume > 0.0 {
            let box_ratio = (curr.volume / EMV_VOLUME_DIVISOR) / range;
            distance / box_ratio
        } else {
            0.0
        };
        raw.push(Some(value));
    }

    sma(&raw, period)
}

// =============================================================================
// Indicator Frame
// =============================================================================

/// Periods for every indicator the signal rules consume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorParams {
    pub ema_short: usize,
    pub ema_long: usize,
    pub rsi_period: usize,
    pub adx_period: usize,
    pub atr_period: usize,
    pub emv_period: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            ema_short: 20,
            ema_long: 50,
            rsi_period: 14,
            adx_period: 14,
            atr_period: 14,
            emv_period: 14,
        }
    }
}

/// Fully defined indicator values for one candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValues {
    pub ema_short: f64,
    pub ema_long: f64,
    pub rsi: f64,
    pub adx: f64,
    pub atr: f64,
    pub emv: f64,
}

/// A candle extended with its derived indicators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRow {
    pub candle: Candle,
    pub ema_short: Option<f64>,
    pub ema_long: Option<f64>,
    pub rsi: Option<f64>,
    pub adx: Option<f64>,
    pub atr: Option<f64>,
    pub emv: Option<f64>,
}

impl IndicatorRow {
    /// All indicator values, or `None` while any of them is still warming up
    pub fn values(&self) -> Option<IndicatorValues> {
        Some(IndicatorValues {
            ema_short: self.ema_short?,
            ema_long: self.ema_long?,
            rsi: self.rsi?,
            adx: self.adx?,
            atr: self.atr?,
            emv: self.emv?,
        })
    }
}

/// Immutable indicator table built from a candle series
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorFrame {
    params: IndicatorParams,
    rows: Vec<IndicatorRow>,
}

impl IndicatorFrame {
    /// Compute every indicator over `candles`. Pure: the same input always
    /// produces the same frame.
    pub fn compute(candles: &[Candle], params: &IndicatorParams) -> Self {
        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let ema_short = ema(&close, params.ema_short);
        let ema_long = ema(&close, params.ema_long);
        let rsi_values = rsi(&close, params.rsi_period);
        let adx_values = adx(candles, params.adx_period);
        let atr_values = atr(candles, params.atr_period);
        let emv_values = emv(candles, params.emv_period);

        let rows = candles
            .iter()
            .enumerate()
            .map(|(i, candle)| IndicatorRow {
                candle: candle.clone(),
                ema_short: ema_short[i],
                ema_long: ema_long[i],
                rsi: rsi_values[i],
                adx: adx_values[i],
                atr: atr_values[i],
                emv: emv_values[i],
            })
            .collect();

        IndicatorFrame {
            params: params.clone(),
            rows,
        }
    }

    pub fn params(&self) -> &IndicatorParams {
        &self.params
    }

    pub fn rows(&self) -> &[IndicatorRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows whose indicators are all defined, paired with their values
    pub fn complete_rows(&self) -> impl Iterator<Item = (&Candle, IndicatorValues)> + '_ {
        self.rows
            .iter()
            .filter_map(|row| row.values().map(|values| (&row.candle, values)))
    }

    /// Number of leading rows dropped for warm-up
    pub fn warmup_len(&self) -> usize {
        self.rows
            .iter()
            .position(|row| row.values().is_some())
            .unwrap_or(self.rows.len())
    }
}
