use chrono::Timelike;

use super::{SignalGenerator, push_order};
use crate::engine::{Bar, Expiry, Order, OrderSide};
use crate::errors::{Error, Result};
use crate::indicators::IndicatorSet;
use crate::utils::round_to;

/// Daily range breakout.
///
/// At the reset hour, a buy stop is placed above the high and a sell stop
/// below the low of the last `lookback` bars:
///
/// | Side  | Entry               | Stop loss | Take profit                        |
/// |-------|---------------------|-----------|------------------------------------|
/// | Long  | `high + offset`     | `low`     | `high + (high - low) + adjustment` |
/// | Short | `low - offset`      | `high`    | `low - (high - low) - adjustment`  |
///
/// Orders that have not filled by the next reset hour expire.
#[derive(Debug, Clone, PartialEq)]
pub struct Breakout {
    reset_hour: u32,
    lookback: usize,
    entry_offset: f64,
    tp_adjustment: f64,
    trend_filter: Option<usize>,
    price_decimals: u32,
}

impl Default for Breakout {
    fn default() -> Self {
        Self {
            reset_hour: 8,
            lookback: 8,
            entry_offset: 0.0,
            tp_adjustment: 0.0,
            trend_filter: None,
            price_decimals: 5,
        }
    }
}

impl Breakout {
    /// Creates a breakout generator resetting at `reset_hour` (UTC) over `lookback` bars.
    pub fn new(reset_hour: u32, lookback: usize) -> Result<Self> {
        if reset_hour > 23 {
            return Err(Error::InvalidParameter(format!("reset hour must be 0..=23 (got {reset_hour})")));
        }
        if lookback == 0 {
            return Err(Error::InvalidParameter("lookback must be positive".into()));
        }
        Ok(Self {
            reset_hour,
            lookback,
            ..Default::default()
        })
    }

    /// Distance between the range and the entry, in price units.
    pub fn entry_offset(mut self, offset: f64) -> Self {
        self.entry_offset = offset;
        self
    }

    /// Extra distance added to the take-profit, in price units.
    pub fn tp_adjustment(mut self, adjustment: f64) -> Self {
        self.tp_adjustment = adjustment;
        self
    }

    /// Only trade with the trend of an EMA of `period` bars: long when the
    /// reset bar sits above it, short when it sits below, nothing otherwise.
    pub fn trend_filter(mut self, period: usize) -> Self {
        self.trend_filter = Some(period);
        self
    }

    /// Decimals kept on computed prices.
    pub fn price_decimals(mut self, decimals: u32) -> Self {
        self.price_decimals = decimals;
        self
    }

    pub fn reset_hour(&self) -> u32 {
        self.reset_hour
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Which sides the trend filter lets through for the bar, if it can tell.
    fn allowed_sides(&self, bar: &Bar) -> Option<(bool, bool)> {
        if self.trend_filter.is_none() {
            return Some((true, true));
        }
        let ema = bar.indicators().ema?;
        Some(if bar.low() >= ema {
            (true, false)
        } else if bar.high() <= ema {
            (false, true)
        } else {
            (false, false)
        })
    }
}

impl SignalGenerator for Breakout {
    fn name(&self) -> String {
        let mut name = format!("breakout_h{}_tp{:.5}", self.reset_hour, self.tp_adjustment);
        if let Some(period) = self.trend_filter {
            name.push_str(&format!("_ema{period}"));
        }
        name
    }

    fn indicators(&self) -> IndicatorSet {
        IndicatorSet {
            lookback: Some(self.lookback),
            ema: self.trend_filter,
            ..Default::default()
        }
    }

    fn generate(&self, bars: &[Bar]) -> Vec<Order> {
        let expiry = Expiry::AtHour(self.reset_hour);
        let round = |price: f64| round_to(price, self.price_decimals);
        let mut orders = Vec::new();

        for bar in bars.iter().filter(|b| b.time().hour() == self.reset_hour) {
            let (Some(high), Some(low)) = (bar.indicators().rolling_high, bar.indicators().rolling_low) else {
                tracing::trace!(time = %bar.time(), "no rolling range yet");
                continue;
            };
            let Some((long, short)) = self.allowed_sides(bar) else {
                tracing::trace!(time = %bar.time(), "no trend value yet");
                continue;
            };

            let range = high - low;
            if long {
                let levels = (
                    round(high + self.entry_offset),
                    low,
                    round(high + range + self.tp_adjustment),
                );
                push_order(&mut orders, bar.time(), OrderSide::Long, levels, |o| o.with_expiry(expiry));
            }
            if short {
                let levels = (
                    round(low - self.entry_offset),
                    high,
                    round(low - range - self.tp_adjustment),
                );
                push_order(&mut orders, bar.time(), OrderSide::Short, levels, |o| o.with_expiry(expiry));
            }
        }

        tracing::debug!(generator = %self.name(), count = orders.len(), "orders created");
        orders
    }
}

#[cfg(test)]
fn reset_bar(day: u32, hour: u32, (open, high, low, close): (f64, f64, f64, f64), indicators: crate::engine::Indicators) -> Bar {
    use crate::engine::BarBuilder;
    use chrono::{TimeZone, Utc};

    BarBuilder::builder()
        .time(Utc.with_ymd_and_hms(2020, 3, day, hour, 0, 0).unwrap())
        .open(open)
        .high(high)
        .low(low)
        .close(close)
        .indicators(indicators)
        .build()
        .unwrap()
}

#[cfg(test)]
fn range(high: f64, low: f64, ema: Option<f64>) -> crate::engine::Indicators {
    crate::engine::Indicators {
        rolling_high: Some(high),
        rolling_low: Some(low),
        ema,
        ..Default::default()
    }
}

#[cfg(test)]
#[test]
fn paired_orders_at_reset_hour() {
    use crate::engine::OrderStatus;

    let bars = vec![
        reset_bar(2, 7, (1.1010, 1.1050, 1.1000, 1.1020), range(1.1050, 1.1000, None)),
        reset_bar(2, 8, (1.1020, 1.1040, 1.1010, 1.1030), range(1.1050, 1.1000, None)),
        reset_bar(2, 9, (1.1030, 1.1040, 1.1020, 1.1030), range(1.1050, 1.1000, None)),
    ];
    let orders = Breakout::default().generate(&bars);

    assert_eq!(orders.len(), 2);
    let (long, short) = (&orders[0], &orders[1]);
    assert!(long.is_long() && short.is_short());
    assert_eq!(long.order_date(), bars[1].time());
    assert_eq!((long.entry(), long.stop_loss(), long.take_profit()), (1.1050, 1.1000, 1.1100));
    assert_eq!((short.entry(), short.stop_loss(), short.take_profit()), (1.1000, 1.1050, 1.0950));
    assert_eq!(long.expiry(), Expiry::AtHour(8));
    assert_eq!(short.status(), OrderStatus::Pending);
}

#[cfg(test)]
#[test]
fn adjustments_move_entry_and_target() {
    let bars = vec![reset_bar(2, 8, (1.1020, 1.1040, 1.1010, 1.1030), range(1.1050, 1.1000, None))];
    let orders = Breakout::default()
        .entry_offset(0.0002)
        .tp_adjustment(0.0005)
        .generate(&bars);

    assert_eq!(orders[0].entry(), 1.1052);
    assert_eq!(orders[0].take_profit(), 1.1105);
    assert_eq!(orders[1].entry(), 1.0998);
    assert_eq!(orders[1].take_profit(), 1.0945);
}

#[cfg(test)]
#[test]
fn skip_bars_without_range() {
    let mut indicators = range(1.1050, 1.1000, None);
    indicators.rolling_low = None;
    let bars = vec![reset_bar(2, 8, (1.1020, 1.1040, 1.1010, 1.1030), indicators)];
    assert!(Breakout::default().generate(&bars).is_empty());
}

#[cfg(test)]
#[test]
fn flat_range_is_rejected() {
    let bars = vec![reset_bar(2, 8, (1.1000, 1.1000, 1.1000, 1.1000), range(1.1000, 1.1000, None))];
    assert!(Breakout::default().generate(&bars).is_empty());
}

#[cfg(test)]
#[test]
fn trend_filter_keeps_one_side() {
    let breakout = Breakout::default().trend_filter(50);
    let price = (1.1020, 1.1040, 1.1010, 1.1030);

    // above the average
    let orders = breakout.generate(&[reset_bar(2, 8, price, range(1.1050, 1.1000, Some(1.1005)))]);
    assert_eq!(orders.len(), 1);
    assert!(orders[0].is_long());

    // below the average
    let orders = breakout.generate(&[reset_bar(2, 8, price, range(1.1050, 1.1000, Some(1.1045)))]);
    assert_eq!(orders.len(), 1);
    assert!(orders[0].is_short());

    // straddling the average
    let orders = breakout.generate(&[reset_bar(2, 8, price, range(1.1050, 1.1000, Some(1.1025)))]);
    assert!(orders.is_empty());

    // no average yet
    let orders = breakout.generate(&[reset_bar(2, 8, price, range(1.1050, 1.1000, None))]);
    assert!(orders.is_empty());
}

#[cfg(test)]
#[test]
fn reject_bad_parameters() {
    assert!(Breakout::new(24, 8).is_err());
    assert!(Breakout::new(8, 0).is_err());
    let breakout = Breakout::new(7, 10).unwrap();
    assert_eq!((breakout.reset_hour(), breakout.lookback()), (7, 10));
    assert_eq!(breakout.indicators().lookback, Some(10));
}
