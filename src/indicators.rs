//! Indicator columns for bars, computed with the [`ta`](https://crates.io/crates/ta) crate.
//!
//! Each column stays `None` until its indicator has seen a full warm-up
//! window, so strategies can tell "not enough history" apart from a value.

use ta::Next;
use ta::indicators::{
    AverageTrueRange, ExponentialMovingAverage, Maximum, Minimum, MovingAverageConvergenceDivergence,
    MovingAverageConvergenceDivergenceOutput, RelativeStrengthIndex,
};

use crate::engine::{Bar, Indicators};
use crate::errors::{Error, Result};

/// MACD periods: fast, slow and signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub struct MacdPeriods {
    /// Fast EMA period.
    pub fast: usize,
    /// Slow EMA period.
    pub slow: usize,
    /// EMA period of the signal line.
    pub signal: usize,
}

impl Default for MacdPeriods {
    fn default() -> Self {
        Self {
            fast: 12,
            slow: 26,
            signal: 9,
        }
    }
}

/// The indicator columns a strategy reads, with their periods.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IndicatorSet {
    /// Rolling high/low window, in bars.
    pub lookback: Option<usize>,
    /// EMA period of the close.
    pub ema: Option<usize>,
    /// ATR period.
    pub atr: Option<usize>,
    /// MACD line and signal line.
    pub macd: Option<MacdPeriods>,
    /// RSI period.
    pub rsi: Option<usize>,
}

fn ta_error(err: ta::errors::TaError) -> Error {
    Error::Indicator(err.to_string())
}

/// Returns new bars carrying the indicator columns of `set`.
///
/// Columns not named by `set` keep whatever value the input bars had, so
/// precomputed columns loaded from a file survive.
pub fn enrich(bars: &[Bar], set: &IndicatorSet) -> Result<Vec<Bar>> {
    let mut rolling = set
        .lookback
        .map(|period| Ok::<_, ta::errors::TaError>((Maximum::new(period)?, Minimum::new(period)?)))
        .transpose()
        .map_err(ta_error)?;
    let mut ema = set.ema.map(ExponentialMovingAverage::new).transpose().map_err(ta_error)?;
    let mut atr = set.atr.map(AverageTrueRange::new).transpose().map_err(ta_error)?;
    let mut rsi = set.rsi.map(RelativeStrengthIndex::new).transpose().map_err(ta_error)?;
    let mut macd = set
        .macd
        .map(|p| MovingAverageConvergenceDivergence::new(p.fast, p.slow, p.signal))
        .transpose()
        .map_err(ta_error)?;

    let mut enriched = Vec::with_capacity(bars.len());
    for (idx, bar) in bars.iter().enumerate() {
        let seen = idx + 1;
        let mut values: Indicators = *bar.indicators();

        if let (Some(period), Some((max, min))) = (set.lookback, rolling.as_mut()) {
            let (high, low) = (max.next(bar), min.next(bar));
            values.rolling_high = (seen >= period).then_some(high);
            values.rolling_low = (seen >= period).then_some(low);
        }
        if let (Some(period), Some(ema)) = (set.ema, ema.as_mut()) {
            let value = ema.next(bar.close());
            values.ema = (seen >= period).then_some(value);
        }
        if let (Some(period), Some(atr)) = (set.atr, atr.as_mut()) {
            let value = atr.next(bar);
            values.atr = (seen >= period).then_some(value);
        }
        if let (Some(period), Some(rsi)) = (set.rsi, rsi.as_mut()) {
            let value = rsi.next(bar.close());
            values.rsi = (seen > period).then_some(value);
        }
        if let (Some(periods), Some(macd)) = (set.macd, macd.as_mut()) {
            let MovingAverageConvergenceDivergenceOutput { macd, signal, .. } = macd.next(bar.close());
            values.macd = (seen >= periods.slow).then_some(macd);
            values.signal = (seen + 1 >= periods.slow + periods.signal).then_some(signal);
        }

        enriched.push(bar.with_indicators(values));
    }

    Ok(enriched)
}

#[cfg(test)]
fn hourly_bars(highs: &[f64]) -> Vec<Bar> {
    use crate::engine::BarBuilder;
    use chrono::{Duration, TimeZone, Utc};

    let start = Utc.with_ymd_and_hms(2020, 3, 2, 0, 0, 0).unwrap();
    highs
        .iter()
        .enumerate()
        .map(|(i, high)| {
            BarBuilder::builder()
                .time(start + Duration::hours(i as i64))
                .open(high - 0.0010)
                .high(*high)
                .low(high - 0.0020)
                .close(high - 0.0005)
                .build()
                .unwrap()
        })
        .collect()
}

#[cfg(test)]
#[test]
fn rolling_range_warms_up() {
    let bars = hourly_bars(&[1.10, 1.12, 1.11, 1.09]);
    let set = IndicatorSet {
        lookback: Some(3),
        ..Default::default()
    };
    let enriched = enrich(&bars, &set).unwrap();

    assert_eq!(enriched[0].indicators().rolling_high, None);
    assert_eq!(enriched[1].indicators().rolling_low, None);
    assert_eq!(enriched[2].indicators().rolling_high, Some(1.12));
    assert_eq!(enriched[3].indicators().rolling_high, Some(1.12));
    assert_eq!(enriched[3].indicators().rolling_low, Some(1.09 - 0.0020));
    // untouched columns
    assert_eq!(enriched[3].indicators().ema, None);
}

#[cfg(test)]
#[test]
fn ema_and_macd_warm_up() {
    let highs = (0..40).map(|i| 1.10 + i as f64 * 0.001).collect::<Vec<_>>();
    let bars = hourly_bars(&highs);
    let set = IndicatorSet {
        ema: Some(5),
        atr: Some(3),
        macd: Some(MacdPeriods {
            fast: 3,
            slow: 6,
            signal: 4,
        }),
        ..Default::default()
    };
    let enriched = enrich(&bars, &set).unwrap();

    assert!(enriched[3].indicators().ema.is_none());
    assert!(enriched[4].indicators().ema.is_some());
    assert!(enriched[1].indicators().atr.is_none());
    assert!(enriched[2].indicators().atr.is_some());
    assert!(enriched[4].indicators().macd.is_none());
    assert!(enriched[5].indicators().macd.is_some());
    assert!(enriched[7].indicators().signal.is_none());
    assert!(enriched[8].indicators().signal.is_some());
    // rising prices keep the fast average above the slow one
    assert!(enriched[39].indicators().macd.unwrap() > 0.0);
}

#[cfg(test)]
#[test]
fn invalid_period() {
    let bars = hourly_bars(&[1.10]);
    let set = IndicatorSet {
        ema: Some(0),
        ..Default::default()
    };
    assert!(matches!(enrich(&bars, &set), Err(Error::Indicator(_))));
}
