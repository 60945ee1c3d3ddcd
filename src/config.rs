//! Run configuration.
//!
//! Every field has a default, so an empty TOML file is a valid configuration:
//!
//! ```toml
//! instrument = "GBP_USD"
//! pip_size = 0.0001
//!
//! [breakout]
//! reset_hour = 8
//! tp_adjustments_pips = [0, 5, 10]
//!
//! [simulation]
//! gap_policy = "first_touched"
//! group_by = "close_date"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::PipCalculus;
use crate::engine::GapPolicy;
use crate::errors::{Error, Result};
use crate::indicators::MacdPeriods;
use crate::performance::GroupBy;
use crate::strategy::{Breakout, Crossover};

/// Top level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Instrument name, as the broker spells it.
    pub instrument: String,
    /// Price of one pip.
    pub pip_size: f64,
    /// Bar granularity, as the broker spells it.
    pub granularity: String,
    /// Breakout variants.
    pub breakout: BreakoutConfig,
    /// Crossover strategy.
    pub crossover: CrossoverConfig,
    /// Simulator options.
    pub simulation: SimulationConfig,
    /// Live trading.
    pub live: LiveConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instrument: "GBP_USD".into(),
            pip_size: 0.0001,
            granularity: "H1".into(),
            breakout: BreakoutConfig::default(),
            crossover: CrossoverConfig::default(),
            simulation: SimulationConfig::default(),
            live: LiveConfig::default(),
        }
    }
}

/// `[breakout]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakoutConfig {
    /// UTC hour at which orders are placed and stale ones expire.
    pub reset_hour: u32,
    /// Number of bars of the rolling range.
    pub lookback: usize,
    /// Distance between the range and the entries.
    pub entry_offset_pips: f64,
    /// One variant is run per adjustment.
    pub tp_adjustments_pips: Vec<f64>,
    /// EMA period of the trend filtered variant.
    pub trend_filter_period: usize,
    /// Take-profit adjustment of the trend filtered variant.
    pub trend_filter_adjustment_pips: f64,
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            reset_hour: 8,
            lookback: 8,
            entry_offset_pips: 0.0,
            tp_adjustments_pips: vec![0.0, 5.0, 10.0],
            trend_filter_period: 50,
            trend_filter_adjustment_pips: 5.0,
        }
    }
}

/// `[crossover]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrossoverConfig {
    /// Runs the crossover next to the breakout variants.
    pub enabled: bool,
    /// Trend filter period.
    pub ema_period: usize,
    /// ATR period of the exits.
    pub atr_period: usize,
    /// MACD periods.
    pub macd: MacdPeriods,
    /// Stop distance in ATRs.
    pub atr_stop: f64,
    /// Target distance in ATRs.
    pub atr_target: f64,
}

impl Default for CrossoverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ema_period: 200,
            atr_period: 14,
            macd: MacdPeriods::default(),
            atr_stop: 1.0,
            atr_target: 1.5,
        }
    }
}

/// `[simulation]` table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Same-bar gap handling.
    pub gap_policy: GapPolicy,
    /// Day each pnl is booked on.
    pub group_by: GroupBy,
}

/// `[live]` table. The API token is never read from the file, see [`LiveConfig::TOKEN_VAR`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LiveConfig {
    /// REST API root.
    pub base_url: String,
    /// Broker account.
    pub account_id: String,
    /// Units in one standard lot.
    pub units_per_lot: f64,
    /// Balance used for position sizing.
    pub account_balance: f64,
    /// Number of bars fetched to build the instructions.
    pub candle_count: usize,
    /// Number of bars of the live range.
    pub lookback: usize,
    /// EMA period of the reported trend.
    pub trend_period: usize,
    /// Take-profit adjustment of the live orders.
    pub tp_adjustment_pips: f64,
}

impl LiveConfig {
    /// Environment variable holding the API token.
    pub const TOKEN_VAR: &'static str = "OANDA_TOKEN";
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api-fxpractice.oanda.com".into(),
            account_id: String::new(),
            units_per_lot: 100_000.0,
            account_balance: 10_000.0,
            candle_count: 120,
            lookback: 10,
            trend_period: 60,
            tp_adjustment_pips: 5.0,
        }
    }
}

impl Config {
    /// Reads and validates a TOML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    /// Rejects values no run can use.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidParameter(msg));

        if !(self.pip_size > 0.0) {
            return invalid(format!("pip_size must be positive (got {})", self.pip_size));
        }
        if self.breakout.reset_hour > 23 {
            return invalid(format!("breakout.reset_hour must be 0..=23 (got {})", self.breakout.reset_hour));
        }
        if self.breakout.lookback == 0 || self.breakout.trend_filter_period == 0 {
            return invalid("breakout periods must be positive".into());
        }
        let crossover = &self.crossover;
        if crossover.ema_period == 0
            || crossover.atr_period == 0
            || crossover.macd.fast == 0
            || crossover.macd.slow == 0
            || crossover.macd.signal == 0
        {
            return invalid("crossover periods must be positive".into());
        }
        if !(crossover.atr_stop > 0.0) || !(crossover.atr_target > 0.0) {
            return invalid("crossover ATR multiples must be positive".into());
        }
        if self.live.lookback == 0 || self.live.trend_period == 0 {
            return invalid("live periods must be positive".into());
        }
        if !(self.live.units_per_lot > 0.0) || !(self.live.account_balance > 0.0) || self.live.candle_count == 0 {
            return invalid("live sizing values must be positive".into());
        }
        Ok(())
    }

    /// Converts pips to price units.
    pub fn pips(&self, pips: f64) -> f64 {
        pips.from_pips(self.pip_size)
    }

    /// One breakout generator per configured take-profit adjustment, then the
    /// trend filtered one.
    ///
    /// ### Returns
    /// Pairs of a column label and its generator.
    pub fn breakout_variants(&self) -> Result<Vec<(String, Breakout)>> {
        let cfg = &self.breakout;
        let base = Breakout::new(cfg.reset_hour, cfg.lookback)?.entry_offset(self.pips(cfg.entry_offset_pips));

        let mut variants = cfg
            .tp_adjustments_pips
            .iter()
            .map(|adj| (format!("{adj}"), base.clone().tp_adjustment(self.pips(*adj))))
            .collect::<Vec<_>>();
        variants.push((
            format!("{}_ema", cfg.trend_filter_adjustment_pips),
            base.tp_adjustment(self.pips(cfg.trend_filter_adjustment_pips))
                .trend_filter(cfg.trend_filter_period),
        ));
        Ok(variants)
    }

    /// The crossover generator, when enabled.
    pub fn crossover(&self) -> Result<Option<Crossover>> {
        let cfg = &self.crossover;
        if !cfg.enabled {
            return Ok(None);
        }
        let crossover = Crossover::new(cfg.ema_period, cfg.atr_period, cfg.macd)?.atr_multiples(cfg.atr_stop, cfg.atr_target);
        Ok(Some(crossover))
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[test]
fn empty_file_is_default() {
    let config = "".parse::<Config>().unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.instrument, "GBP_USD");
    assert_eq!(config.breakout.tp_adjustments_pips, vec![0.0, 5.0, 10.0]);
    assert_eq!(config.simulation.gap_policy, GapPolicy::Independent);
    assert_eq!(config.simulation.group_by, GroupBy::OrderDate);
}

#[cfg(test)]
#[test]
fn parse_tables() {
    let config = r#"
        instrument = "EUR_USD"

        [breakout]
        reset_hour = 7
        tp_adjustments_pips = [0, 2.5]

        [crossover]
        enabled = true
        macd = { fast = 8, slow = 21, signal = 5 }

        [simulation]
        gap_policy = "first_touched"
        group_by = "close_date"

        [live]
        account_id = "001-004-123-001"
    "#
    .parse::<Config>()
    .unwrap();

    assert_eq!(config.instrument, "EUR_USD");
    assert_eq!(config.breakout.reset_hour, 7);
    assert_eq!(config.breakout.lookback, 8);
    assert_eq!(config.crossover.macd.slow, 21);
    assert_eq!(config.simulation.gap_policy, GapPolicy::FirstTouched);
    assert_eq!(config.simulation.group_by, GroupBy::CloseDate);
    assert_eq!(config.live.account_id, "001-004-123-001");
    assert_eq!(config.live.candle_count, 120);
    assert_eq!((config.live.lookback, config.live.trend_period), (10, 60));
    assert!(config.crossover().unwrap().is_some());
}

#[cfg(test)]
#[test]
fn reject_bad_values() {
    assert!(matches!("pip_size = 0.0".parse::<Config>(), Err(Error::InvalidParameter(_))));
    assert!(matches!("[breakout]\nreset_hour = 24".parse::<Config>(), Err(Error::InvalidParameter(_))));
    assert!(matches!("[breakout]\nlookback = 0".parse::<Config>(), Err(Error::InvalidParameter(_))));
    assert!(matches!("[live]\ntrend_period = 0".parse::<Config>(), Err(Error::InvalidParameter(_))));
    assert!(matches!("[simulation]\ngap_policy = \"both\"".parse::<Config>(), Err(Error::TomlError(_))));
    assert!(matches!("unknown = 1".parse::<Config>(), Err(Error::TomlError(_))));
}

#[cfg(test)]
#[test]
fn variants_from_config() {
    use crate::strategy::SignalGenerator;

    let config = Config::default();
    let variants = config.breakout_variants().unwrap();
    let labels = variants.iter().map(|(label, _)| label.as_str()).collect::<Vec<_>>();
    assert_eq!(labels, ["0", "5", "10", "5_ema"]);
    assert_eq!(variants[3].1.indicators().ema, Some(50));
    assert!(config.crossover().unwrap().is_none());
}
