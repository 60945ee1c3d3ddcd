use super::{SignalGenerator, push_order};
use crate::engine::{Bar, Order, OrderSide};
use crate::errors::{Error, Result};
use crate::indicators::{IndicatorSet, MacdPeriods};

/// MACD line / signal line crossover with a trend filter.
///
/// - Long when MACD crosses above its signal below zero and the close is above the EMA.
/// - Short when MACD crosses below its signal above zero and the close is below the EMA.
///
/// The entry is the open of the bar after the crossing, the stop is one ATR
/// away and the target one and a half ATR away (both configurable).
#[derive(Debug, Clone, PartialEq)]
pub struct Crossover {
    ema: usize,
    atr: usize,
    macd: MacdPeriods,
    atr_stop: f64,
    atr_target: f64,
}

impl Default for Crossover {
    fn default() -> Self {
        Self {
            ema: 200,
            atr: 14,
            macd: MacdPeriods::default(),
            atr_stop: 1.0,
            atr_target: 1.5,
        }
    }
}

impl Crossover {
    /// Creates a crossover generator with the given indicator periods.
    pub fn new(ema: usize, atr: usize, macd: MacdPeriods) -> Result<Self> {
        if ema == 0 || atr == 0 || macd.fast == 0 || macd.slow <= macd.fast || macd.signal == 0 {
            return Err(Error::InvalidParameter(format!(
                "invalid crossover periods: ema {ema}, atr {atr}, macd {macd:?}"
            )));
        }
        Ok(Self {
            ema,
            atr,
            macd,
            ..Default::default()
        })
    }

    /// Stop and target distances, as multiples of the ATR.
    pub fn atr_multiples(mut self, stop: f64, target: f64) -> Self {
        self.atr_stop = stop;
        self.atr_target = target;
        self
    }
}

impl SignalGenerator for Crossover {
    fn name(&self) -> String {
        format!(
            "macd_{}_{}_{}_ema{}",
            self.macd.fast, self.macd.slow, self.macd.signal, self.ema
        )
    }

    fn indicators(&self) -> IndicatorSet {
        IndicatorSet {
            ema: Some(self.ema),
            atr: Some(self.atr),
            macd: Some(self.macd),
            ..Default::default()
        }
    }

    fn generate(&self, bars: &[Bar]) -> Vec<Order> {
        let mut orders = Vec::new();

        for window in bars.windows(3) {
            let (prev, bar, next) = (window[0].indicators(), &window[1], &window[2]);
            let current = bar.indicators();
            let (Some(prev_macd), Some(prev_signal), Some(macd), Some(signal), Some(ema), Some(atr)) =
                (prev.macd, prev.signal, current.macd, current.signal, current.ema, current.atr)
            else {
                continue;
            };

            let was_above = prev_macd > prev_signal;
            let is_above = macd > signal;
            let entry = next.open();

            if !was_above && is_above && bar.close() > ema && macd < 0.0 {
                let levels = (entry, entry - atr * self.atr_stop, entry + atr * self.atr_target);
                push_order(&mut orders, next.time(), OrderSide::Long, levels, |o| o);
            } else if was_above && !is_above && bar.close() < ema && macd > 0.0 {
                let levels = (entry, entry + atr * self.atr_stop, entry - atr * self.atr_target);
                push_order(&mut orders, next.time(), OrderSide::Short, levels, |o| o);
            }
        }

        tracing::debug!(generator = %self.name(), count = orders.len(), "orders created");
        orders
    }
}

#[cfg(test)]
fn bar(hour: u32, open: f64, close: f64, values: Option<(f64, f64, f64)>) -> Bar {
    use crate::engine::{BarBuilder, Indicators};
    use chrono::{TimeZone, Utc};

    let indicators = values
        .map(|(macd, signal, ema)| Indicators {
            macd: Some(macd),
            signal: Some(signal),
            ema: Some(ema),
            atr: Some(0.0020),
            ..Default::default()
        })
        .unwrap_or_default();
    BarBuilder::builder()
        .time(Utc.with_ymd_and_hms(2020, 3, 2, hour, 0, 0).unwrap())
        .open(open)
        .high(open.max(close) + 0.0005)
        .low(open.min(close) - 0.0005)
        .close(close)
        .indicators(indicators)
        .build()
        .unwrap()
}

#[cfg(test)]
#[test]
fn long_on_bullish_cross_below_zero() {
    let bars = vec![
        bar(10, 1.2500, 1.2510, Some((-0.0010, -0.0008, 1.2400))),
        bar(11, 1.2510, 1.2530, Some((-0.0006, -0.0007, 1.2401))),
        bar(12, 1.2532, 1.2540, Some((-0.0004, -0.0006, 1.2402))),
    ];
    let orders = Crossover::default().generate(&bars);

    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert!(order.is_long());
    assert_eq!(order.order_date(), bars[2].time());
    assert_eq!(order.entry(), 1.2532);
    assert!((order.stop_loss() - (1.2532 - 0.0020)).abs() < 1e-12);
    assert!((order.take_profit() - (1.2532 + 0.0030)).abs() < 1e-12);
}

#[cfg(test)]
#[test]
fn short_on_bearish_cross_above_zero() {
    let bars = vec![
        bar(10, 1.2500, 1.2490, Some((0.0010, 0.0008, 1.2600))),
        bar(11, 1.2490, 1.2470, Some((0.0006, 0.0007, 1.2599))),
        bar(12, 1.2468, 1.2460, Some((0.0004, 0.0006, 1.2598))),
    ];
    let orders = Crossover::default().generate(&bars);

    assert_eq!(orders.len(), 1);
    assert!(orders[0].is_short());
    assert_eq!(orders[0].entry(), 1.2468);
    assert!(orders[0].stop_loss() > orders[0].entry());
}

#[cfg(test)]
#[test]
fn filters_reject_cross() {
    // bullish cross above zero
    let bars = vec![
        bar(10, 1.2500, 1.2510, Some((0.0004, 0.0006, 1.2400))),
        bar(11, 1.2510, 1.2530, Some((0.0008, 0.0007, 1.2401))),
        bar(12, 1.2532, 1.2540, None),
    ];
    assert!(Crossover::default().generate(&bars).is_empty());

    // bullish cross below zero, price under the average
    let bars = vec![
        bar(10, 1.2500, 1.2510, Some((-0.0010, -0.0008, 1.2600))),
        bar(11, 1.2510, 1.2530, Some((-0.0006, -0.0007, 1.2601))),
        bar(12, 1.2532, 1.2540, None),
    ];
    assert!(Crossover::default().generate(&bars).is_empty());
}

#[cfg(test)]
#[test]
fn skip_incomplete_history() {
    // previous bar without indicators
    let bars = vec![
        bar(10, 1.2500, 1.2510, None),
        bar(11, 1.2510, 1.2530, Some((-0.0006, -0.0007, 1.2401))),
        bar(12, 1.2532, 1.2540, None),
    ];
    assert!(Crossover::default().generate(&bars).is_empty());

    // cross on the last bar has no next open
    let bars = vec![
        bar(10, 1.2500, 1.2510, Some((-0.0010, -0.0008, 1.2400))),
        bar(11, 1.2510, 1.2530, Some((-0.0006, -0.0007, 1.2401))),
    ];
    assert!(Crossover::default().generate(&bars).is_empty());
}

#[cfg(test)]
#[test]
fn reject_bad_periods() {
    assert!(Crossover::new(0, 14, MacdPeriods::default()).is_err());
    let macd = MacdPeriods {
        fast: 26,
        slow: 12,
        signal: 9,
    };
    assert!(Crossover::new(200, 14, macd).is_err());
    assert!(Crossover::new(200, 14, MacdPeriods::default()).is_ok());
}
