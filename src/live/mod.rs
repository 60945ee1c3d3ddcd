//! Live trading of the breakout.
//!
//! Once a day, at the reset hour, the trader:
//! 1. fetches the latest bars and derives the day's [`BreakoutInstructions`],
//! 2. cancels yesterday's unfilled entry orders,
//! 3. sizes today's orders from the recent closed trades ([`risk::risk_pct`]),
//! 4. places the buy leg and the sell leg.
//!
//! Every broker call goes through the [`Broker`] trait. A failed leg is logged
//! and never rolls back the other one.

#[cfg(feature = "oanda")]
mod oanda;

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::PipCalculus;
use crate::config::Config;
use crate::engine::{Bar, OrderSide};
use crate::errors::{Error, Result};
use crate::indicators::{self, IndicatorSet};
use crate::report::Reporter;
use crate::risk;
use crate::utils::round_to;

#[cfg(feature = "oanda")]
pub use oanda::*;

/// Risk used for the instructions before the account history is known.
const DEFAULT_RISK_PCT: f64 = 0.025;

/// Number of closed trades fetched for the stake sequence.
const CLOSED_TRADES_COUNT: usize = 100;

/// Broker side order types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Entry order triggered when the price is touched, used for both legs.
    MarketIfTouched,
    /// Filled immediately.
    Market,
    /// Filled at the price or better.
    Limit,
    /// Filled once the price moves through the level.
    Stop,
    /// Exit attached to an open trade.
    TakeProfit,
    /// Exit attached to an open trade.
    StopLoss,
    /// Exit attached to an open trade.
    TrailingStopLoss,
    /// Any type this crate does not deal with.
    #[serde(other)]
    Other,
}

/// Order placement request.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    /// Broker order type.
    pub order_type: OrderType,
    /// Instrument name.
    pub instrument: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Always positive, the direction is given by `side`.
    pub units: f64,
    /// Entry price.
    pub price: f64,
    /// Take-profit attached on fill.
    pub take_profit: f64,
    /// Stop-loss attached on fill.
    pub stop_loss: f64,
}

/// Order waiting at the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    /// Broker id.
    pub id: String,
    /// Broker order type.
    pub order_type: OrderType,
}

/// Closed trade at the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    /// Broker id.
    pub id: String,
    /// Realized profit in account currency.
    pub pnl: f64,
}

/// Brokerage API used by the live trader.
pub trait Broker {
    /// Latest complete bars, oldest first.
    fn candles(&self, instrument: &str, granularity: &str, count: usize) -> Result<Vec<Bar>>;

    /// Orders not triggered yet, including the take-profit and stop-loss of open trades.
    fn pending_orders(&self) -> Result<Vec<PendingOrder>>;

    /// Cancels a pending order.
    fn cancel_order(&self, id: &str) -> Result<()>;

    /// Places an order and returns its broker id.
    fn place_order(&self, request: &OrderRequest) -> Result<String>;

    /// Most recent closed trades, oldest first.
    fn closed_trades(&self, count: usize) -> Result<Vec<Trade>>;
}

/// Direction of the market relative to its moving average.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    /// Close above the average.
    Up,
    /// Close below the average.
    Down,
    /// No average yet, or the close sits on it.
    Flat,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up \u{2191}"),
            Self::Down => write!(f, "down \u{2193}"),
            Self::Flat => write!(f, "no trend"),
        }
    }
}

/// The day's buy stop and sell stop.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakoutInstructions {
    /// Time of the last bar used.
    pub time: DateTime<Utc>,
    /// Instrument name.
    pub instrument: String,
    /// Highest high of the lookback window.
    pub high: f64,
    /// Lowest low of the lookback window.
    pub low: f64,
    /// Take-profit adjustment, in price units.
    pub tp_adjustment: f64,
    /// Buy stop level.
    pub long_entry: f64,
    /// Buy take-profit.
    pub long_take_profit: f64,
    /// Sell stop level.
    pub short_entry: f64,
    /// Sell take-profit.
    pub short_take_profit: f64,
    /// Trend at the last bar.
    pub trend: Trend,
    pip_size: f64,
}

impl BreakoutInstructions {
    /// Derives the instructions from the most recent bars.
    ///
    /// ### Arguments
    /// * `bars` - Latest bars, oldest first. Indicator columns are computed here.
    /// * `cfg` - Live window sizes, entry offset, pip size and take-profit adjustment.
    ///
    /// ### Returns
    /// The instructions built on the last bar, or an error when there are not
    /// enough bars for the lookback window.
    pub fn from_bars(bars: &[Bar], cfg: &Config) -> Result<Self> {
        let set = IndicatorSet {
            lookback: Some(cfg.live.lookback),
            ema: Some(cfg.live.trend_period),
            ..Default::default()
        };
        let enriched = indicators::enrich(bars, &set)?;
        let last = enriched.last().ok_or(Error::BarDataEmpty)?;

        let values = last.indicators();
        let (Some(high), Some(low)) = (values.rolling_high, values.rolling_low) else {
            return Err(Error::Indicator(format!(
                "{} bars do not cover a lookback of {}",
                bars.len(),
                cfg.live.lookback
            )));
        };
        let trend = match values.ema {
            Some(ema) if last.close() > ema => Trend::Up,
            Some(ema) if last.close() < ema => Trend::Down,
            _ => Trend::Flat,
        };

        let range = high - low;
        let offset = cfg.pips(cfg.breakout.entry_offset_pips);
        let tp_adjustment = cfg.pips(cfg.live.tp_adjustment_pips);
        let round = |price: f64| round_to(price, 5);

        Ok(Self {
            time: last.time(),
            instrument: cfg.instrument.clone(),
            high,
            low,
            tp_adjustment,
            long_entry: round(high + offset),
            long_take_profit: round(high + range + tp_adjustment),
            short_entry: round(low - offset),
            short_take_profit: round(low - range - tp_adjustment),
            trend,
            pip_size: cfg.pip_size,
        })
    }

    /// Stop distance of both legs, in pips.
    pub fn stop_pips(&self) -> f64 {
        (self.high - self.low).to_pips(self.pip_size)
    }

    /// The buy stop and the sell stop for `units`.
    pub fn requests(&self, units: f64) -> [OrderRequest; 2] {
        let request = |side, price, take_profit, stop_loss| OrderRequest {
            order_type: OrderType::MarketIfTouched,
            instrument: self.instrument.clone(),
            side,
            units,
            price,
            take_profit,
            stop_loss,
        };
        [
            request(OrderSide::Long, self.long_entry, self.long_take_profit, self.low),
            request(OrderSide::Short, self.short_entry, self.short_take_profit, self.high),
        ]
    }
}

impl fmt::Display for BreakoutInstructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current trend: {}", self.trend)?;
        writeln!(f, "Range high: {:.5}", self.high)?;
        writeln!(f, "Range low: {:.5}", self.low)?;
        writeln!(f, "Diff: {:.1} pips", self.stop_pips())?;
        writeln!(f, "Adjustment: {:.1} pips", self.tp_adjustment.to_pips(self.pip_size))?;
        writeln!(
            f,
            "Buy at {:.5}, SL: {:.5}, TP: {:.5}",
            self.long_entry, self.low, self.long_take_profit
        )?;
        write!(
            f,
            "Sell at {:.5}, SL: {:.5}, TP: {:.5}",
            self.short_entry, self.high, self.short_take_profit
        )
    }
}

/// What was sent to the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// Risk fraction from the stake sequence.
    pub risk_pct: f64,
    /// Size of each leg, in lots.
    pub lots: f64,
    /// Side and broker id of each accepted leg.
    pub placed: Vec<(OrderSide, String)>,
    /// Side and error message of each rejected leg.
    pub failed: Vec<(OrderSide, String)>,
}

/// Runs the breakout against a broker.
#[derive(Debug)]
pub struct LiveTrader<B, R> {
    broker: B,
    reporter: R,
    config: Config,
    today: NaiveDate,
}

impl<B: Broker, R: Reporter> LiveTrader<B, R> {
    /// Creates a trader for today (UTC).
    pub fn new(broker: B, reporter: R, config: Config) -> Self {
        Self {
            broker,
            reporter,
            config,
            today: Utc::now().date_naive(),
        }
    }

    /// Sets the trading day.
    pub fn on(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Returns the broker.
    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Whether today is a weekday.
    pub fn is_trading_day(&self) -> bool {
        !matches!(self.today.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// Builds today's instructions and reports them with a default size.
    ///
    /// ### Returns
    /// `None` on weekends, before any broker call.
    pub fn prepare(&self) -> Result<Option<BreakoutInstructions>> {
        if !self.is_trading_day() {
            tracing::info!(today = %self.today, "no trading over the weekend");
            return Ok(None);
        }
        let cfg = &self.config;
        let bars = self.broker.candles(&cfg.instrument, &cfg.granularity, cfg.live.candle_count)?;
        let instructions = BreakoutInstructions::from_bars(&bars, cfg)?;

        let lots = self.lots(&instructions, DEFAULT_RISK_PCT)?;
        self.reporter.instructions(&instructions, lots);
        Ok(Some(instructions))
    }

    /// Sends the instructions to the broker.
    ///
    /// Nothing is sent on Saturdays and Sundays. Each leg is placed on its
    /// own: a rejected leg is logged and recorded in the returned submission.
    ///
    /// ### Returns
    /// `None` on weekends, the submission otherwise.
    pub fn submit(&self, instructions: &BreakoutInstructions) -> Result<Option<Submission>> {
        if !self.is_trading_day() {
            tracing::info!(today = %self.today, "no trading over the weekend");
            return Ok(None);
        }

        self.cancel_pending_entries()?;

        let pnls = self
            .broker
            .closed_trades(CLOSED_TRADES_COUNT)?
            .into_iter()
            .map(|trade| trade.pnl)
            .filter(|pnl| *pnl != 0.0)
            .collect::<Vec<_>>();
        let risk_pct = risk::risk_pct(&pnls);
        let lots = self.lots(instructions, risk_pct)?;
        tracing::info!(risk_pct, lots, "position sized");

        let mut submission = Submission {
            risk_pct,
            lots,
            placed: Vec::new(),
            failed: Vec::new(),
        };
        let units = (lots * self.config.live.units_per_lot).round();
        for request in instructions.requests(units) {
            match self.broker.place_order(&request) {
                Ok(id) => {
                    tracing::info!(%id, side = %request.side, price = request.price, units, "order placed");
                    submission.placed.push((request.side, id));
                }
                Err(err) => {
                    tracing::error!(side = %request.side, price = request.price, "failed to place order: {err}");
                    submission.failed.push((request.side, err.to_string()));
                }
            }
        }

        self.reporter.submission(&submission);
        Ok(Some(submission))
    }

    /// Cancels the entry orders left over from previous days; take-profit
    /// and stop-loss orders of open trades are kept.
    fn cancel_pending_entries(&self) -> Result<()> {
        for order in self.broker.pending_orders()? {
            if order.order_type != OrderType::MarketIfTouched {
                continue;
            }
            match self.broker.cancel_order(&order.id) {
                Ok(()) => tracing::info!(id = %order.id, "pending order cancelled"),
                Err(err) => tracing::warn!(id = %order.id, "failed to cancel order: {err}"),
            }
        }
        Ok(())
    }

    fn lots(&self, instructions: &BreakoutInstructions, risk_pct: f64) -> Result<f64> {
        let live = &self.config.live;
        risk::position_size(
            live.account_balance,
            risk_pct,
            instructions.stop_pips(),
            risk::pip_value_per_lot(live.units_per_lot, self.config.pip_size),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::engine::BarBuilder;
    use crate::performance::Summary;

    #[derive(Default)]
    struct MockBroker {
        bars: Vec<Bar>,
        pending: Vec<PendingOrder>,
        trades: Vec<Trade>,
        reject: Option<OrderSide>,
        cancelled: RefCell<Vec<String>>,
        placed: RefCell<Vec<OrderRequest>>,
    }

    impl Broker for MockBroker {
        fn candles(&self, _: &str, _: &str, count: usize) -> Result<Vec<Bar>> {
            let skip = self.bars.len().saturating_sub(count);
            Ok(self.bars[skip..].to_vec())
        }

        fn pending_orders(&self) -> Result<Vec<PendingOrder>> {
            Ok(self.pending.clone())
        }

        fn cancel_order(&self, id: &str) -> Result<()> {
            self.cancelled.borrow_mut().push(id.to_string());
            Ok(())
        }

        fn place_order(&self, request: &OrderRequest) -> Result<String> {
            if self.reject == Some(request.side) {
                return Err(Error::Broker("insufficient margin".into()));
            }
            let mut placed = self.placed.borrow_mut();
            placed.push(request.clone());
            Ok(format!("{}", placed.len()))
        }

        fn closed_trades(&self, _: usize) -> Result<Vec<Trade>> {
            Ok(self.trades.clone())
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        lots: RefCell<Vec<f64>>,
        submissions: RefCell<Vec<Submission>>,
    }

    impl Reporter for RecordingReporter {
        fn instructions(&self, _: &BreakoutInstructions, lots: f64) {
            self.lots.borrow_mut().push(lots);
        }

        fn summary(&self, _: &str, _: &Summary) {}

        fn submission(&self, submission: &Submission) {
            self.submissions.borrow_mut().push(submission.clone());
        }
    }

    /// Hourly bars ranging between 1.2500 and 1.2550, trending up.
    fn bars() -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2020, 3, 2, 0, 0, 0).unwrap();
        (0..8)
            .map(|i| {
                let open = 1.2505 + 0.0005 * i as f64;
                BarBuilder::builder()
                    .time(start + Duration::hours(i))
                    .open(open)
                    .high(if i == 3 { 1.2550 } else { open + 0.0005 })
                    .low(if i == 1 { 1.2500 } else { open - 0.0002 })
                    .close(open + 0.0003)
                    .build()
                    .unwrap()
            })
            .collect()
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.live.lookback = 8;
        config.live.trend_period = 3;
        config
    }

    fn trade(pnl: f64) -> Trade {
        Trade {
            id: "1".into(),
            pnl,
        }
    }

    #[test]
    fn instructions_from_bars() {
        let instructions = BreakoutInstructions::from_bars(&bars(), &config()).unwrap();

        assert_eq!((instructions.high, instructions.low), (1.2550, 1.2500));
        assert_eq!(instructions.long_entry, 1.2550);
        assert_eq!(instructions.long_take_profit, 1.2605);
        assert_eq!(instructions.short_entry, 1.25);
        assert_eq!(instructions.short_take_profit, 1.2445);
        assert_eq!(instructions.trend, Trend::Up);
        assert!((instructions.stop_pips() - 50.0).abs() < 1e-6);

        let [long, short] = instructions.requests(1000.0);
        assert_eq!((long.side, long.stop_loss), (OrderSide::Long, 1.2500));
        assert_eq!((short.side, short.stop_loss), (OrderSide::Short, 1.2550));
        assert_eq!(long.order_type, OrderType::MarketIfTouched);
    }

    #[test]
    fn not_enough_bars() {
        let bars = bars();
        assert!(matches!(
            BreakoutInstructions::from_bars(&bars[..4], &config()),
            Err(Error::Indicator(_))
        ));
        assert!(matches!(BreakoutInstructions::from_bars(&[], &config()), Err(Error::BarDataEmpty)));
    }

    #[test]
    fn prepare_reports_default_size() {
        let broker = MockBroker {
            bars: bars(),
            ..Default::default()
        };
        // a monday
        let trader = LiveTrader::new(broker, RecordingReporter::default(), config())
            .on(NaiveDate::from_ymd_opt(2020, 3, 2).unwrap());
        assert!(trader.prepare().unwrap().is_some());

        // 2.5% of 10k over 50 pips at 10 per pip
        assert_eq!(*trader.reporter.lots.borrow(), vec![0.5]);
        assert!(trader.broker().placed.borrow().is_empty());
    }

    #[test]
    fn submit_both_legs() {
        let broker = MockBroker {
            bars: bars(),
            pending: vec![
                PendingOrder {
                    id: "7".into(),
                    order_type: OrderType::MarketIfTouched,
                },
                PendingOrder {
                    id: "8".into(),
                    order_type: OrderType::TakeProfit,
                },
            ],
            trades: vec![trade(120.0), trade(-80.0), trade(0.0), trade(95.0)],
            ..Default::default()
        };
        // a monday
        let trader = LiveTrader::new(broker, RecordingReporter::default(), config())
            .on(NaiveDate::from_ymd_opt(2020, 3, 2).unwrap());
        let instructions = trader.prepare().unwrap().unwrap();
        let submission = trader.submit(&instructions).unwrap().unwrap();

        assert_eq!(*trader.broker().cancelled.borrow(), vec!["7".to_string()]);
        // loss one trade back, break-even trades ignored
        assert_eq!(submission.risk_pct, 0.03);
        assert_eq!(submission.lots, 0.6);
        assert_eq!(submission.placed.len(), 2);
        assert!(submission.failed.is_empty());

        let placed = trader.broker().placed.borrow();
        assert_eq!(placed[0].units, 60_000.0);
        assert_eq!(placed[1].side, OrderSide::Short);
        assert_eq!(trader.reporter.submissions.borrow().len(), 1);
    }

    #[test]
    fn failed_leg_keeps_the_other() {
        let broker = MockBroker {
            bars: bars(),
            reject: Some(OrderSide::Long),
            ..Default::default()
        };
        let trader = LiveTrader::new(broker, RecordingReporter::default(), config())
            .on(NaiveDate::from_ymd_opt(2020, 3, 3).unwrap());
        let instructions = trader.prepare().unwrap().unwrap();
        let submission = trader.submit(&instructions).unwrap().unwrap();

        assert_eq!(submission.placed, vec![(OrderSide::Short, "1".to_string())]);
        assert_eq!(submission.failed.len(), 1);
        assert_eq!(submission.failed[0].0, OrderSide::Long);
    }

    #[test]
    fn skip_weekends() {
        // no bars: fetching candles would fail with an empty range
        let saturday = LiveTrader::new(MockBroker::default(), RecordingReporter::default(), config())
            .on(NaiveDate::from_ymd_opt(2020, 3, 7).unwrap());
        assert!(!saturday.is_trading_day());
        assert!(saturday.prepare().unwrap().is_none());
        assert!(saturday.reporter.lots.borrow().is_empty());

        let instructions = BreakoutInstructions::from_bars(&bars(), &config()).unwrap();
        let sunday = LiveTrader::new(MockBroker::default(), RecordingReporter::default(), config())
            .on(NaiveDate::from_ymd_opt(2020, 3, 8).unwrap());
        assert!(sunday.submit(&instructions).unwrap().is_none());
        assert!(sunday.broker().placed.borrow().is_empty());
        assert!(sunday.reporter.submissions.borrow().is_empty());
    }

    #[test]
    fn live_windows_from_live_config() {
        let mut cfg = config();
        cfg.live.lookback = 4;
        // the 1.2550 high and the 1.2500 low fall outside the last four bars
        let instructions = BreakoutInstructions::from_bars(&bars(), &cfg).unwrap();
        assert!(instructions.high < 1.2550);
        assert!(instructions.low > 1.2500);

        cfg.live.lookback = 10;
        assert!(matches!(BreakoutInstructions::from_bars(&bars(), &cfg), Err(Error::Indicator(_))));
    }
}
