//! Core simulation engine.
//!
//! This module provides the fundamental types for backtesting:
//! - `Bar`: OHLC data plus derived indicator columns.
//! - `Order`: Stop-entry orders with stop-loss, take-profit and expiry.
//! - `Backtester`: The bar-by-bar order simulator.

mod bar;
mod order;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::errors::Result;

pub use bar::*;
pub use order::*;

#[cfg(test)]
mod scenarios;

/// How to treat opposite orders of the same signal triggered within one bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Every triggered order fills, so a bar spanning both breakout levels fills both sides.
    #[default]
    Independent,
    /// Only the order whose entry is nearest to the bar's open fills; the others stay pending.
    FirstTouched,
}

/// Cumulative realized profit at a bar.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct EquityPoint {
    /// Bar timestamp.
    pub time: DateTime<Utc>,
    /// Sum of the pnl of every order closed up to and including this bar.
    pub pnl: f64,
}

/// Outcome of a simulation: annotated orders and the realized equity series.
#[derive(Debug, Clone)]
pub struct Run {
    orders: Vec<Order>,
    equity: Vec<EquityPoint>,
}

impl Run {
    /// Returns an iterator over every order, whatever its status.
    pub fn orders(&self) -> std::slice::Iter<'_, Order> {
        self.orders.iter()
    }

    /// Consumes the run and returns its orders.
    pub fn into_orders(self) -> Vec<Order> {
        self.orders
    }

    /// Returns the per-bar realized equity series.
    pub fn equity(&self) -> &[EquityPoint] {
        &self.equity
    }

    /// Returns an iterator over the closed orders.
    pub fn closed(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| o.status() == OrderStatus::Closed)
    }

    /// Sum of realized pnl; open orders are not included.
    pub fn realized_pnl(&self) -> f64 {
        self.closed().map(Order::pnl).sum()
    }
}

/// Bar-by-bar order simulator.
///
/// The bar sequence is shared and immutable, so one `Backtester` can run any
/// number of independent order lists, including concurrently.
#[derive(Debug, Clone)]
pub struct Backtester {
    data: Arc<[Bar]>,
    gap_policy: GapPolicy,
}

impl Backtester {
    /// Creates a new backtester over the given bars.
    ///
    /// ### Arguments
    /// * `data` - Bars sorted by strictly ascending timestamp.
    ///
    /// ### Returns
    /// The backtester, or an error when the bars are empty or out of order.
    pub fn new(data: Arc<[Bar]>) -> Result<Self> {
        validate_bars(&data)?;
        Ok(Self {
            data,
            gap_policy: GapPolicy::default(),
        })
    }

    /// Sets the same-bar gap policy.
    pub fn with_gap_policy(mut self, gap_policy: GapPolicy) -> Self {
        self.gap_policy = gap_policy;
        self
    }

    /// Returns the gap policy.
    pub fn gap_policy(&self) -> GapPolicy {
        self.gap_policy
    }

    /// Returns an iterator over the bars.
    pub fn bars(&self) -> std::slice::Iter<'_, Bar> {
        self.data.iter()
    }

    /// Returns the shared bar data.
    pub fn data(&self) -> Arc<[Bar]> {
        Arc::clone(&self.data)
    }

    /// Simulates the orders over every bar, once, in time order.
    ///
    /// An order takes part from the first bar at or after its `order_date`.
    /// Nothing is force-closed at the end of the data: orders that never
    /// triggered stay pending and open trades stay filled.
    ///
    /// ### Arguments
    /// * `orders` - The orders to simulate, usually freshly generated and pending.
    ///
    /// ### Returns
    /// The annotated orders and the realized equity series.
    pub fn run(&self, mut orders: Vec<Order>) -> Result<Run> {
        let mut realized = 0.0;
        let mut equity = Vec::with_capacity(self.data.len());

        for bar in self.data.iter() {
            realized += self.step(&mut orders, bar)?;
            equity.push(EquityPoint {
                time: bar.time(),
                pnl: realized,
            });
        }

        Ok(Run { orders, equity })
    }

    /// Advances the orders by one bar and returns the pnl realized on it.
    ///
    /// The phases always run in this order: expire, fill, close. A stale order
    /// never fills on the bar that cancels it, and an order may fill and close
    /// on the same bar.
    fn step(&self, orders: &mut [Order], bar: &Bar) -> Result<f64> {
        self.expire_orders(orders, bar)?;
        self.fill_orders(orders, bar)?;
        self.close_orders(orders, bar)
    }

    /// Cancels the pending orders whose validity window has elapsed.
    fn expire_orders(&self, orders: &mut [Order], bar: &Bar) -> Result<()> {
        let now = bar.time();
        for order in orders.iter_mut() {
            if order.status() == OrderStatus::Pending
                && order.order_date() <= now
                && order.expiry().is_elapsed(order.order_date(), now)
            {
                order.cancel()?;
                tracing::debug!(id = order.id(), side = %order.side(), %now, "order expired");
            }
        }
        Ok(())
    }

    /// Fills the pending orders whose entry was crossed by the bar.
    fn fill_orders(&self, orders: &mut [Order], bar: &Bar) -> Result<()> {
        let now = bar.time();
        let triggered = orders
            .iter()
            .enumerate()
            .filter(|(_, o)| o.status() == OrderStatus::Pending && o.order_date() <= now && is_triggered(o, bar))
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();

        let fills = match self.gap_policy {
            GapPolicy::Independent => triggered,
            GapPolicy::FirstTouched => {
                let distance = |idx: usize| (orders[idx].entry() - bar.open()).abs();
                triggered
                    .iter()
                    .copied()
                    .filter(|&idx| {
                        !triggered.iter().any(|&other| {
                            other != idx
                                && orders[other].order_date() == orders[idx].order_date()
                                && orders[other].side() != orders[idx].side()
                                && (distance(other) < distance(idx)
                                    || (distance(other) == distance(idx) && other < idx))
                        })
                    })
                    .collect()
            }
        };

        for idx in fills {
            let order = &mut orders[idx];
            order.fill(now)?;
            tracing::debug!(id = order.id(), side = %order.side(), price = order.entry(), %now, "order filled");
        }
        Ok(())
    }

    /// Closes the filled orders whose stop-loss or take-profit was reached.
    fn close_orders(&self, orders: &mut [Order], bar: &Bar) -> Result<f64> {
        let now = bar.time();
        let mut realized = 0.0;
        for order in orders.iter_mut().filter(|o| o.status() == OrderStatus::Filled) {
            if let Some(exit_price) = exit_price(order, bar) {
                let pnl = order.close(now, exit_price)?;
                realized += pnl;
                tracing::debug!(id = order.id(), side = %order.side(), exit_price, pnl, %now, "order closed");
            }
        }
        Ok(realized)
    }
}

/// Stop-entry semantics: longs trigger above the entry, shorts below it.
fn is_triggered(order: &Order, bar: &Bar) -> bool {
    match order.side() {
        OrderSide::Long => bar.high() > order.entry(),
        OrderSide::Short => bar.low() < order.entry(),
    }
}

/// Exit level reached by the bar, if any. The stop-loss wins when the bar
/// reaches both levels.
fn exit_price(order: &Order, bar: &Bar) -> Option<f64> {
    match order.side() {
        OrderSide::Long => {
            if bar.low() <= order.stop_loss() {
                Some(order.stop_loss())
            } else if bar.high() >= order.take_profit() {
                Some(order.take_profit())
            } else {
                None
            }
        }
        OrderSide::Short => {
            if bar.high() >= order.stop_loss() {
                Some(order.stop_loss())
            } else if bar.low() <= order.take_profit() {
                Some(order.take_profit())
            } else {
                None
            }
        }
    }
}
