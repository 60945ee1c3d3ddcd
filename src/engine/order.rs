use std::fmt;

use chrono::{DateTime, Duration, Timelike, Utc};

use crate::errors::{Error, Result};
use crate::utils::random_id;

/// Represents the side of an order (long or short).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum OrderSide {
    Long,
    Short,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Lifecycle of an order: `Pending -> Filled -> Closed` or `Pending -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum OrderStatus {
    Pending,
    Filled,
    Closed,
    Cancelled,
}

impl OrderStatus {
    /// Closed and cancelled orders never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Filled => write!(f, "filled"),
            Self::Closed => write!(f, "closed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Validity window of a pending order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expiry {
    /// Good till cancelled.
    Never,
    /// Expires on the first bar after the order date whose UTC hour is the given one.
    AtHour(u32),
    /// Expires on the first bar at or after `order_date + duration`.
    After(Duration),
}

impl Expiry {
    /// Returns true if an order created at `order_date` is stale at `now`.
    pub fn is_elapsed(&self, order_date: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Self::Never => false,
            Self::AtHour(hour) => now > order_date && now.hour() == *hour,
            Self::After(duration) => now >= order_date + *duration,
        }
    }
}

/// A stop-entry order with its exit levels and simulated outcome.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Order {
    id: u32,
    order_date: DateTime<Utc>,
    side: OrderSide,
    entry: f64,
    stop_loss: f64,
    take_profit: f64,
    #[serde(skip)]
    expiry: Expiry,
    status: OrderStatus,
    fill_date: Option<DateTime<Utc>>,
    close_date: Option<DateTime<Utc>>,
    exit_price: Option<f64>,
    pnl: f64,
}

impl PartialEq for Order {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Order {
    /// Creates a pending order, rejecting levels that break the side's ordering.
    ///
    /// Long orders need `stop_loss < entry < take_profit`, short orders need
    /// `take_profit < entry < stop_loss`.
    pub fn new(
        order_date: DateTime<Utc>,
        side: OrderSide,
        entry: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Result<Self> {
        let finite = [entry, stop_loss, take_profit]
            .iter()
            .all(|p| p.is_finite() && *p > 0.0);
        let ordered = match side {
            OrderSide::Long => stop_loss < entry && entry < take_profit,
            OrderSide::Short => take_profit < entry && entry < stop_loss,
        };
        if !finite || !ordered {
            return Err(Error::InvalidOrder {
                side,
                entry,
                stop_loss,
                take_profit,
            });
        }

        Ok(Self {
            id: random_id(),
            order_date,
            side,
            entry,
            stop_loss,
            take_profit,
            expiry: Expiry::Never,
            status: OrderStatus::Pending,
            fill_date: None,
            close_date: None,
            exit_price: None,
            pnl: 0.0,
        })
    }

    /// Sets the validity window of the pending order.
    pub fn with_expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn order_date(&self) -> DateTime<Utc> {
        self.order_date
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn is_long(&self) -> bool {
        self.side == OrderSide::Long
    }

    pub fn is_short(&self) -> bool {
        self.side == OrderSide::Short
    }

    pub fn entry(&self) -> f64 {
        self.entry
    }

    pub fn stop_loss(&self) -> f64 {
        self.stop_loss
    }

    pub fn take_profit(&self) -> f64 {
        self.take_profit
    }

    pub fn expiry(&self) -> Expiry {
        self.expiry
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn fill_date(&self) -> Option<DateTime<Utc>> {
        self.fill_date
    }

    pub fn close_date(&self) -> Option<DateTime<Utc>> {
        self.close_date
    }

    pub fn exit_price(&self) -> Option<f64> {
        self.exit_price
    }

    /// Realized profit in price units, zero unless the order is closed.
    pub fn pnl(&self) -> f64 {
        self.pnl
    }

    /// Profit of exiting the filled order at `exit_price`.
    pub fn estimate_pnl(&self, exit_price: f64) -> f64 {
        match self.side {
            OrderSide::Long => exit_price - self.entry,
            OrderSide::Short => self.entry - exit_price,
        }
    }

    fn transition(&mut self, to: OrderStatus) -> Result<()> {
        let allowed = matches!(
            (self.status, to),
            (OrderStatus::Pending, OrderStatus::Filled)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Filled, OrderStatus::Closed)
        );
        if !allowed {
            return Err(Error::InvalidTransition { from: self.status, to });
        }
        self.status = to;
        Ok(())
    }

    pub(crate) fn fill(&mut self, time: DateTime<Utc>) -> Result<()> {
        self.transition(OrderStatus::Filled)?;
        self.fill_date = Some(time);
        Ok(())
    }

    pub(crate) fn cancel(&mut self) -> Result<()> {
        self.transition(OrderStatus::Cancelled)
    }

    pub(crate) fn close(&mut self, time: DateTime<Utc>, exit_price: f64) -> Result<f64> {
        self.transition(OrderStatus::Closed)?;
        self.close_date = Some(time);
        self.exit_price = Some(exit_price);
        self.pnl = self.estimate_pnl(exit_price);
        Ok(self.pnl)
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {:.5} sl {:.5} tp {:.5} [{}] pnl {:.5}",
            self.order_date.format("%Y-%m-%d %H:%M"),
            self.side,
            self.entry,
            self.stop_loss,
            self.take_profit,
            self.status,
            self.pnl
        )
    }
}

#[cfg(test)]
fn at(day: u32, hour: u32) -> DateTime<Utc> {
    use chrono::TimeZone;
    Utc.with_ymd_and_hms(2020, 3, day, hour, 0, 0).unwrap()
}

#[cfg(test)]
#[test]
fn create_long_order() {
    let order = Order::new(at(2, 8), OrderSide::Long, 1.1050, 1.1000, 1.1100).unwrap();

    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(order.expiry(), Expiry::Never);
    assert!(order.is_long());
    assert!(order.fill_date().is_none());
    assert_eq!(order.pnl(), 0.0);
}

#[cfg(test)]
#[test]
fn reject_misordered_levels() {
    // long with the stop above the entry
    assert!(matches!(
        Order::new(at(2, 8), OrderSide::Long, 1.1050, 1.1060, 1.1100),
        Err(Error::InvalidOrder { side: OrderSide::Long, .. })
    ));
    // short with the target above the entry
    assert!(Order::new(at(2, 8), OrderSide::Short, 1.1000, 1.1050, 1.1010).is_err());
    // degenerate range
    assert!(Order::new(at(2, 8), OrderSide::Long, 1.1000, 1.1000, 1.1000).is_err());
    assert!(Order::new(at(2, 8), OrderSide::Short, f64::NAN, 1.1050, 1.0950).is_err());
}

#[cfg(test)]
#[test]
fn order_equality() {
    let order1 = Order::new(at(2, 8), OrderSide::Long, 1.1050, 1.1000, 1.1100).unwrap();
    let order2 = Order::new(at(2, 8), OrderSide::Long, 1.1050, 1.1000, 1.1100).unwrap();
    assert_ne!(order1, order2);
    assert_eq!(order1, order1.clone());
}

#[cfg(test)]
#[test]
fn fill_then_close_short() {
    let mut order = Order::new(at(2, 8), OrderSide::Short, 1.1000, 1.1050, 1.0950).unwrap();
    order.fill(at(2, 9)).unwrap();
    assert_eq!(order.status(), OrderStatus::Filled);
    assert_eq!(order.fill_date(), Some(at(2, 9)));

    let pnl = order.close(at(2, 11), 1.0950).unwrap();
    assert!((pnl - 0.0050).abs() < 1e-9);
    assert_eq!(order.status(), OrderStatus::Closed);
    assert_eq!(order.exit_price(), Some(1.0950));
}

#[cfg(test)]
#[test]
fn terminal_states_are_final() {
    let mut order = Order::new(at(2, 8), OrderSide::Long, 1.1050, 1.1000, 1.1100).unwrap();
    order.cancel().unwrap();
    assert!(order.status().is_terminal());
    assert!(matches!(
        order.fill(at(2, 9)),
        Err(Error::InvalidTransition {
            from: OrderStatus::Cancelled,
            to: OrderStatus::Filled
        })
    ));

    let mut order = Order::new(at(2, 8), OrderSide::Long, 1.1050, 1.1000, 1.1100).unwrap();
    assert!(order.close(at(2, 9), 1.1100).is_err());
    order.fill(at(2, 9)).unwrap();
    assert!(order.cancel().is_err());
    order.close(at(2, 10), 1.1000).unwrap();
    assert!(order.close(at(2, 11), 1.1100).is_err());
}

#[cfg(test)]
#[test]
fn expiry_at_hour() {
    let expiry = Expiry::AtHour(8);
    // same bar the order was created on
    assert!(!expiry.is_elapsed(at(2, 8), at(2, 8)));
    assert!(!expiry.is_elapsed(at(2, 8), at(2, 23)));
    assert!(!expiry.is_elapsed(at(2, 8), at(3, 7)));
    assert!(expiry.is_elapsed(at(2, 8), at(3, 8)));
    assert!(!Expiry::Never.is_elapsed(at(2, 8), at(30, 8)));
}

#[cfg(test)]
#[test]
fn expiry_after_duration() {
    let expiry = Expiry::After(Duration::hours(4));
    assert!(!expiry.is_elapsed(at(2, 8), at(2, 11)));
    assert!(expiry.is_elapsed(at(2, 8), at(2, 12)));
}
