//! Bar data loading.
//!
//! CSV files need a header with `time,open,high,low,close`; any of the
//! indicator columns (`rolling_high`, `rolling_low`, `ema`, `atr`, `macd`,
//! `signal`, `rsi`) may follow, left empty where not available.
//!
//! ```csv
//! time,open,high,low,close,rolling_high,rolling_low
//! 2020-03-02 08:00:00,1.10200,1.10400,1.10100,1.10300,1.10500,1.10000
//! ```
//!
//! JSON files hold an array of objects with the same fields.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::engine::{Bar, BarBuilder, Indicators, validate_bars};
use crate::errors::{Error, Result};

#[derive(Debug, Deserialize)]
struct Record {
    #[serde(alias = "timestamp", alias = "date")]
    time: String,
    #[serde(alias = "o")]
    open: f64,
    #[serde(alias = "h")]
    high: f64,
    #[serde(alias = "l")]
    low: f64,
    #[serde(alias = "c")]
    close: f64,
    #[serde(default)]
    rolling_high: Option<f64>,
    #[serde(default)]
    rolling_low: Option<f64>,
    #[serde(default)]
    ema: Option<f64>,
    #[serde(default)]
    atr: Option<f64>,
    #[serde(default)]
    macd: Option<f64>,
    #[serde(default)]
    signal: Option<f64>,
    #[serde(default)]
    rsi: Option<f64>,
}

impl Record {
    fn into_bar(self) -> Result<Bar> {
        let indicators = Indicators {
            rolling_high: self.rolling_high,
            rolling_low: self.rolling_low,
            ema: self.ema,
            atr: self.atr,
            macd: self.macd,
            signal: self.signal,
            rsi: self.rsi,
        };
        BarBuilder::builder()
            .time(parse_time(&self.time)?)
            .open(self.open)
            .high(self.high)
            .low(self.low)
            .close(self.close)
            .indicators(indicators)
            .build()
    }
}

/// Parses RFC 3339 timestamps, or `%Y-%m-%d %H:%M:%S` taken as UTC.
pub fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .map(|naive| naive.and_utc())
        .map_err(|err| Error::Msg(format!("invalid timestamp {value:?}: {err}")))
}

/// Reads validated bars from CSV.
pub fn bars_from_csv<R: Read>(reader: R) -> Result<Vec<Bar>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let bars = reader
        .deserialize::<Record>()
        .map(|record| record?.into_bar())
        .collect::<Result<Vec<_>>>()?;
    validate_bars(&bars)?;
    Ok(bars)
}

/// Reads validated bars from a JSON array.
pub fn bars_from_json<R: Read>(reader: R) -> Result<Vec<Bar>> {
    let records: Vec<Record> = serde_json::from_reader(reader)?;
    let bars = records.into_iter().map(Record::into_bar).collect::<Result<Vec<_>>>()?;
    validate_bars(&bars)?;
    Ok(bars)
}

/// Reads bars from `path`, as JSON when the extension is `.json` and as CSV otherwise.
pub fn load_bars<P: AsRef<Path>>(path: P) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let bars = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => bars_from_json(reader)?,
        _ => bars_from_csv(reader)?,
    };
    tracing::info!(path = %path.display(), bars = bars.len(), "bars loaded");
    Ok(bars)
}

#[cfg(test)]
#[test]
fn csv_with_indicator_columns() {
    let data = "\
time,open,high,low,close,rolling_high,rolling_low
2020-03-02 07:00:00,1.10100,1.10500,1.10000,1.10200,,
2020-03-02T08:00:00Z,1.10200,1.10400,1.10100,1.10300,1.10500,1.10000
";
    let bars = bars_from_csv(data.as_bytes()).unwrap();

    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].time(), parse_time("2020-03-02T07:00:00+00:00").unwrap());
    assert_eq!(bars[0].indicators().rolling_high, None);
    assert_eq!(bars[1].indicators().rolling_high, Some(1.105));
    assert_eq!(bars[1].indicators().rolling_low, Some(1.1));
    assert_eq!(bars[1].indicators().ema, None);
}

#[cfg(test)]
#[test]
fn json_bars() {
    let data = r#"[
        {"time": "2020-03-02T07:00:00Z", "open": 1.101, "high": 1.105, "low": 1.1, "close": 1.102},
        {"time": "2020-03-02T08:00:00Z", "open": 1.102, "high": 1.104, "low": 1.101, "close": 1.103, "ema": 1.1}
    ]"#;
    let bars = bars_from_json(data.as_bytes()).unwrap();
    assert_eq!(bars[1].close(), 1.103);
    assert_eq!(bars[1].indicators().ema, Some(1.1));
}

#[cfg(test)]
#[test]
fn reject_bad_rows() {
    let unsorted = "\
time,open,high,low,close
2020-03-02 08:00:00,1.1,1.2,1.0,1.1
2020-03-02 07:00:00,1.1,1.2,1.0,1.1
";
    assert!(matches!(bars_from_csv(unsorted.as_bytes()), Err(Error::UnsortedBars { .. })));

    let inverted = "time,open,high,low,close\n2020-03-02 08:00:00,1.1,1.0,1.2,1.1\n";
    assert!(matches!(bars_from_csv(inverted.as_bytes()), Err(Error::InvalidBar(..))));

    let bad_time = "time,open,high,low,close\nyesterday,1.1,1.2,1.0,1.1\n";
    assert!(matches!(bars_from_csv(bad_time.as_bytes()), Err(Error::Msg(_))));

    assert!(matches!(bars_from_csv("time,open,high,low,close\n".as_bytes()), Err(Error::BarDataEmpty)));
}
