//! Signal generators.
//!
//! A generator scans the full, already enriched bar sequence and emits
//! pending orders in ascending `order_date` order. It never mutates bars.

mod breakout;
mod crossover;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::engine::{Backtester, Bar, GapPolicy, Order, OrderSide, Run};
use crate::errors::Result;
use crate::indicators::{self, IndicatorSet};

pub use breakout::*;
pub use crossover::*;

/// Strategy-specific order generation.
pub trait SignalGenerator {
    /// Short label used in logs and reports.
    fn name(&self) -> String;

    /// Indicator columns the generator reads.
    fn indicators(&self) -> IndicatorSet;

    /// Emits pending orders for the bars, in ascending `order_date` order.
    fn generate(&self, bars: &[Bar]) -> Vec<Order>;
}

/// Builds an order and keeps it, or logs and drops it when its levels are invalid.
fn push_order(
    orders: &mut Vec<Order>,
    time: DateTime<Utc>,
    side: OrderSide,
    (entry, stop_loss, take_profit): (f64, f64, f64),
    finish: impl FnOnce(Order) -> Order,
) {
    match Order::new(time, side, entry, stop_loss, take_profit) {
        Ok(order) => orders.push(finish(order)),
        Err(err) => tracing::warn!(%time, %side, "order rejected: {err}"),
    }
}

/// Enriches the bars for `generator`, generates its orders and simulates them.
///
/// Each call works on its own copy of the indicator columns and its own
/// orders, so variants never share state.
pub fn backtest<G: SignalGenerator + ?Sized>(generator: &G, bars: &[Bar], gap_policy: GapPolicy) -> Result<Run> {
    let name = generator.name();
    let _span = tracing::info_span!("backtest", generator = %name).entered();

    let enriched = indicators::enrich(bars, &generator.indicators())?;
    let orders = generator.generate(&enriched);
    let backtester = Backtester::new(Arc::from(enriched))?.with_gap_policy(gap_policy);
    let run = backtester.run(orders)?;

    tracing::info!(
        orders = run.orders().len(),
        closed = run.closed().count(),
        pnl = run.realized_pnl(),
        "backtest finished"
    );
    Ok(run)
}
