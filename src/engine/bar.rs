use chrono::{DateTime, Utc};

use crate::errors::{Error, Result};

/// Derived indicator values attached to a bar.
///
/// Every field is `None` until its indicator has seen enough history.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Indicators {
    /// Highest high over the lookback window ending at this bar.
    pub rolling_high: Option<f64>,
    /// Lowest low over the lookback window ending at this bar.
    pub rolling_low: Option<f64>,
    /// Trend moving average.
    pub ema: Option<f64>,
    /// Average true range.
    pub atr: Option<f64>,
    /// MACD line.
    pub macd: Option<f64>,
    /// MACD signal line.
    pub signal: Option<f64>,
    /// Relative strength index.
    pub rsi: Option<f64>,
}

/// One OHLC observation plus its derived indicator columns.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Bar {
    time: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    indicators: Indicators,
}

impl Bar {
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn open(&self) -> f64 {
        self.open
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn close(&self) -> f64 {
        self.close
    }

    pub fn indicators(&self) -> &Indicators {
        &self.indicators
    }

    /// Returns a copy of the bar carrying the given indicator values.
    pub fn with_indicators(&self, indicators: Indicators) -> Self {
        Self {
            indicators,
            ..self.clone()
        }
    }
}

impl ta::High for Bar {
    fn high(&self) -> f64 {
        self.high
    }
}

impl ta::Low for Bar {
    fn low(&self) -> f64 {
        self.low
    }
}

impl ta::Close for Bar {
    fn close(&self) -> f64 {
        self.close
    }
}

/// Builder for [`Bar`], validating prices on `build`.
#[derive(Debug, Default)]
pub struct BarBuilder {
    time: Option<DateTime<Utc>>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    indicators: Indicators,
}

impl BarBuilder {
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn open(mut self, open: f64) -> Self {
        self.open = Some(open);
        self
    }

    pub fn high(mut self, high: f64) -> Self {
        self.high = Some(high);
        self
    }

    pub fn low(mut self, low: f64) -> Self {
        self.low = Some(low);
        self
    }

    pub fn close(mut self, close: f64) -> Self {
        self.close = Some(close);
        self
    }

    pub fn indicators(mut self, indicators: Indicators) -> Self {
        self.indicators = indicators;
        self
    }

    /// Checks the OHLC invariants and returns the bar.
    pub fn build(self) -> Result<Bar> {
        let time = self.time.ok_or(Error::MissingField("time"))?;
        let open = self.open.ok_or(Error::MissingField("open"))?;
        let high = self.high.ok_or(Error::MissingField("high"))?;
        let low = self.low.ok_or(Error::MissingField("low"))?;
        let close = self.close.ok_or(Error::MissingField("close"))?;

        if [open, high, low, close].iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(Error::InvalidBar(time, "prices must be finite and positive".into()));
        }
        if low > open.min(close) || high < open.max(close) {
            return Err(Error::InvalidBar(
                time,
                format!("range {low}..{high} does not contain open {open} and close {close}"),
            ));
        }

        Ok(Bar {
            time,
            open,
            high,
            low,
            close,
            indicators: self.indicators,
        })
    }
}

/// Checks that bars are non-empty and strictly ascending in time.
pub fn validate_bars(bars: &[Bar]) -> Result<()> {
    if bars.is_empty() {
        return Err(Error::BarDataEmpty);
    }
    for (index, pair) in bars.windows(2).enumerate() {
        if pair[1].time <= pair[0].time {
            return Err(Error::UnsortedBars {
                index: index + 1,
                previous: pair[0].time,
                current: pair[1].time,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
fn at(hour: u32) -> DateTime<Utc> {
    use chrono::TimeZone;
    Utc.with_ymd_and_hms(2020, 3, 2, hour, 0, 0).unwrap()
}

#[cfg(test)]
#[test]
fn build_valid_bar() {
    let bar = BarBuilder::builder()
        .time(at(8))
        .open(1.1010)
        .high(1.1050)
        .low(1.1000)
        .close(1.1040)
        .build()
        .unwrap();

    assert_eq!(bar.high(), 1.1050);
    assert_eq!(bar.indicators().ema, None);
}

#[cfg(test)]
#[test]
fn build_rejects_inverted_range() {
    let result = BarBuilder::builder()
        .time(at(8))
        .open(1.1010)
        .high(1.1000)
        .low(1.1050)
        .close(1.1040)
        .build();

    assert!(matches!(result, Err(Error::InvalidBar(..))));
}

#[cfg(test)]
#[test]
fn build_rejects_missing_close() {
    let result = BarBuilder::builder().time(at(8)).open(1.0).high(1.0).low(1.0).build();
    assert!(matches!(result, Err(Error::MissingField("close"))));
}

#[cfg(test)]
#[test]
fn validate_rejects_unsorted() {
    let bar = |h| {
        BarBuilder::builder()
            .time(at(h))
            .open(1.1)
            .high(1.2)
            .low(1.0)
            .close(1.1)
            .build()
            .unwrap()
    };
    assert!(validate_bars(&[bar(1), bar(2)]).is_ok());
    assert!(matches!(
        validate_bars(&[bar(2), bar(1)]),
        Err(Error::UnsortedBars { index: 1, .. })
    ));
    assert!(matches!(validate_bars(&[bar(1), bar(1)]), Err(Error::UnsortedBars { .. })));
    assert!(matches!(validate_bars(&[]), Err(Error::BarDataEmpty)));
}
