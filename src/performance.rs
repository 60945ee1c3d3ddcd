//! Performance aggregation.
//!
//! This module reduces simulated orders into:
//! - a cumulative pnl table keyed by day, one column per variant ([`PerformanceTable`]),
//! - summary statistics for one variant ([`Summary`]): win rate, profit factor, drawdown.
//!
//! Only closed orders carry pnl, so open risk never shows up in these numbers.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

use chrono::NaiveDate;

use crate::engine::{Order, OrderStatus};
use crate::errors::Result;

/// Which order date a pnl is booked on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// Day the order was created. Every order gets a row, unrealized ones with 0.
    #[default]
    OrderDate,
    /// Day the order was closed. Only closed orders get a row.
    CloseDate,
}

impl GroupBy {
    fn key(&self, order: &Order) -> Option<NaiveDate> {
        match self {
            Self::OrderDate => Some(order.order_date().date_naive()),
            Self::CloseDate => order.close_date().map(|d| d.date_naive()),
        }
    }
}

/// Pnl of one variant in a [`PerformanceTable`].
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Column {
    /// Variant label.
    pub label: String,
    /// Pnl booked each day.
    pub daily: Vec<f64>,
    /// Running sum of `daily`.
    pub cumulative: Vec<f64>,
}

/// Daily and cumulative pnl of several variants over a shared date index.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PerformanceTable {
    group_by: GroupBy,
    dates: Vec<NaiveDate>,
    columns: Vec<Column>,
}

impl PerformanceTable {
    /// Builds the table from labelled order collections.
    ///
    /// The date index is the union of every variant's dates; a variant with
    /// nothing on a date contributes 0 there.
    pub fn from_runs<'a, I, O>(variants: I, group_by: GroupBy) -> Self
    where
        I: IntoIterator<Item = (&'a str, O)>,
        O: IntoIterator<Item = &'a Order>,
    {
        let grouped = variants
            .into_iter()
            .map(|(label, orders)| {
                let mut daily = BTreeMap::<NaiveDate, f64>::new();
                for order in orders {
                    if let Some(date) = group_by.key(order) {
                        *daily.entry(date).or_default() += order.pnl();
                    }
                }
                (label.to_string(), daily)
            })
            .collect::<Vec<_>>();

        let mut dates = grouped
            .iter()
            .flat_map(|(_, daily)| daily.keys().copied())
            .collect::<Vec<_>>();
        dates.sort_unstable();
        dates.dedup();

        let columns = grouped
            .into_iter()
            .map(|(label, by_date)| {
                let daily = dates
                    .iter()
                    .map(|d| by_date.get(d).copied().unwrap_or_default())
                    .collect::<Vec<_>>();
                let cumulative = daily
                    .iter()
                    .scan(0.0, |sum, pnl| {
                        *sum += pnl;
                        Some(*sum)
                    })
                    .collect();
                Column {
                    label,
                    daily,
                    cumulative,
                }
            })
            .collect();

        Self {
            group_by,
            dates,
            columns,
        }
    }

    pub fn group_by(&self) -> GroupBy {
        self.group_by
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the column of the given variant.
    pub fn column(&self, label: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.label == label)
    }

    /// Writes `date,pnl_<label>...,cumsum_<label>...` rows as CSV.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);

        let mut header = vec!["date".to_string()];
        header.extend(self.columns.iter().map(|c| format!("pnl_{}", c.label)));
        header.extend(self.columns.iter().map(|c| format!("cumsum_{}", c.label)));
        csv.write_record(&header)?;

        for (idx, date) in self.dates.iter().enumerate() {
            let mut record = vec![date.to_string()];
            record.extend(self.columns.iter().map(|c| format!("{:.5}", c.daily[idx])));
            record.extend(self.columns.iter().map(|c| format!("{:.5}", c.cumulative[idx])));
            csv.write_record(&record)?;
        }
        csv.flush()?;
        Ok(())
    }
}

impl fmt::Display for PerformanceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<12}", "date")?;
        for column in &self.columns {
            write!(f, " {:>24}", column.label)?;
        }
        writeln!(f)?;
        for (idx, date) in self.dates.iter().enumerate() {
            write!(f, "{:<12}", date.to_string())?;
            for column in &self.columns {
                write!(f, " {:>24.5}", column.cumulative[idx])?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Summary statistics of one variant's orders.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Summary {
    total: usize,
    pending: usize,
    open: usize,
    closed: usize,
    cancelled: usize,
    wins: usize,
    losses: usize,
    gross_profit: f64,
    gross_loss: f64,
    max_drawdown: f64,
    pip_size: f64,
}

impl Summary {
    /// Computes the statistics; `pip_size` converts pnl to pips for display.
    pub fn from_orders<'a>(orders: impl IntoIterator<Item = &'a Order>, pip_size: f64) -> Self {
        let mut summary = Self {
            total: 0,
            pending: 0,
            open: 0,
            closed: 0,
            cancelled: 0,
            wins: 0,
            losses: 0,
            gross_profit: 0.0,
            gross_loss: 0.0,
            max_drawdown: 0.0,
            pip_size,
        };

        let mut closed = Vec::new();
        for order in orders {
            summary.total += 1;
            match order.status() {
                OrderStatus::Pending => summary.pending += 1,
                OrderStatus::Filled => summary.open += 1,
                OrderStatus::Cancelled => summary.cancelled += 1,
                OrderStatus::Closed => {
                    summary.closed += 1;
                    closed.push(order);
                    let pnl = order.pnl();
                    if pnl > 0.0 {
                        summary.wins += 1;
                        summary.gross_profit += pnl;
                    } else {
                        summary.losses += 1;
                        summary.gross_loss += pnl.abs();
                    }
                }
            }
        }

        // realized curve in close order
        closed.sort_by_key(|o| o.close_date());
        let mut equity = 0.0_f64;
        let mut peak = 0.0_f64;
        for order in closed {
            equity += order.pnl();
            peak = peak.max(equity);
            summary.max_drawdown = summary.max_drawdown.max(peak - equity);
        }

        summary
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Filled orders that have not reached their stop-loss or take-profit.
    pub fn open(&self) -> usize {
        self.open
    }

    pub fn closed(&self) -> usize {
        self.closed
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled
    }

    pub fn wins(&self) -> usize {
        self.wins
    }

    pub fn losses(&self) -> usize {
        self.losses
    }

    /// Realized pnl in price units.
    pub fn pnl(&self) -> f64 {
        self.gross_profit - self.gross_loss
    }

    /// Realized pnl in pips.
    pub fn pnl_pips(&self) -> f64 {
        self.pnl() / self.pip_size
    }

    /// Percentage of closed orders with a positive pnl.
    pub fn win_rate(&self) -> f64 {
        if self.closed == 0 {
            return 0.0;
        }
        (self.wins as f64 / self.closed as f64) * 100.0
    }

    /// Ratio of gross profits to gross losses.
    pub fn profit_factor(&self) -> f64 {
        if self.gross_loss == 0.0 {
            return f64::INFINITY;
        }
        self.gross_profit / self.gross_loss
    }

    /// Mean pnl of the winning orders, in price units.
    pub fn average_win(&self) -> f64 {
        if self.wins == 0 {
            return 0.0;
        }
        self.gross_profit / self.wins as f64
    }

    /// Mean pnl of the losing orders, negative, in price units.
    pub fn average_loss(&self) -> f64 {
        if self.losses == 0 {
            return 0.0;
        }
        -self.gross_loss / self.losses as f64
    }

    /// Largest peak-to-trough decline of the realized pnl curve, in price units.
    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Backtest Summary ===")?;
        writeln!(
            f,
            "Orders: {} (closed {}, open {}, pending {}, cancelled {})",
            self.total, self.closed, self.open, self.pending, self.cancelled
        )?;
        writeln!(f, "Profit & Loss (P&L): {:.5} ({:.1} pips)", self.pnl(), self.pnl_pips())?;
        writeln!(f, "Max Drawdown: {:.1} pips", self.max_drawdown / self.pip_size)?;
        writeln!(f, "Profit Factor: {:.2}", self.profit_factor())?;
        writeln!(f, "Win Rate: {:.2}% ({} / {})", self.win_rate(), self.wins, self.closed)?;
        write!(
            f,
            "Average Win / Loss: {:.1} / {:.1} pips",
            self.average_win() / self.pip_size,
            self.average_loss() / self.pip_size
        )
    }
}

#[cfg(test)]
fn closed_order(day: u32, close_day: u32, pnl: f64) -> Order {
    use crate::engine::OrderSide;
    use chrono::{TimeZone, Utc};

    let time = |d| Utc.with_ymd_and_hms(2020, 3, d, 8, 0, 0).unwrap();
    let mut order = Order::new(time(day), OrderSide::Long, 1.1000, 1.0900, 1.1200).unwrap();
    order.fill(time(day)).unwrap();
    order.close(time(close_day), 1.1000 + pnl).unwrap();
    order
}

#[cfg(test)]
fn pending_order(day: u32) -> Order {
    use crate::engine::OrderSide;
    use chrono::{TimeZone, Utc};

    Order::new(
        Utc.with_ymd_and_hms(2020, 3, day, 8, 0, 0).unwrap(),
        OrderSide::Short,
        1.1000,
        1.1100,
        1.0900,
    )
    .unwrap()
}

#[cfg(test)]
#[test]
fn table_groups_and_accumulates() {
    let a = vec![closed_order(2, 3, 0.0050), pending_order(2), closed_order(3, 3, -0.0020)];
    let b = vec![closed_order(4, 4, 0.0010)];
    let table = PerformanceTable::from_runs([("a", &a), ("b", &b)], GroupBy::OrderDate);

    assert_eq!(table.dates().len(), 3);
    let a = table.column("a").unwrap();
    assert!((a.daily[0] - 0.0050).abs() < 1e-9);
    assert!((a.cumulative[1] - 0.0030).abs() < 1e-9);
    // missing date in "a"
    assert_eq!(a.daily[2], 0.0);
    assert!((a.cumulative[2] - 0.0030).abs() < 1e-9);

    let b = table.column("b").unwrap();
    assert_eq!(b.cumulative[..2], [0.0, 0.0]);
    assert!((b.cumulative[2] - 0.0010).abs() < 1e-9);
}

#[cfg(test)]
#[test]
fn table_by_close_date_skips_open_orders() {
    let orders = vec![closed_order(2, 5, 0.0050), pending_order(3)];
    let table = PerformanceTable::from_runs([("a", &orders)], GroupBy::CloseDate);

    assert_eq!(table.dates().len(), 1);
    assert_eq!(table.dates()[0].to_string(), "2020-03-05");
}

#[cfg(test)]
#[test]
fn table_to_csv() {
    let orders = vec![closed_order(2, 2, 0.0050)];
    let table = PerformanceTable::from_runs([("tp0", &orders)], GroupBy::OrderDate);
    let mut out = Vec::new();
    table.write_csv(&mut out).unwrap();

    let text = String::from_utf8(out).unwrap();
    assert_eq!(text, "date,pnl_tp0,cumsum_tp0\n2020-03-02,0.00500,0.00500\n");
}

#[cfg(test)]
#[test]
fn summary_statistics() {
    let orders = vec![
        closed_order(2, 2, 0.0050),
        closed_order(3, 3, -0.0020),
        closed_order(4, 4, -0.0030),
        closed_order(5, 5, 0.0040),
        pending_order(6),
    ];
    let summary = Summary::from_orders(&orders, 0.0001);

    assert_eq!(summary.total(), 5);
    assert_eq!(summary.closed(), 4);
    assert_eq!(summary.pending(), 1);
    assert_eq!(summary.win_rate(), 50.0);
    assert!((summary.pnl() - 0.0040).abs() < 1e-9);
    assert!((summary.pnl_pips() - 40.0).abs() < 1e-6);
    assert!((summary.profit_factor() - 1.8).abs() < 1e-9);
    assert!((summary.max_drawdown() - 0.0050).abs() < 1e-9);
    assert!((summary.average_loss() + 0.0025).abs() < 1e-9);
}

#[cfg(test)]
#[test]
fn summary_without_trades() {
    let summary = Summary::from_orders(&[], 0.0001);
    assert_eq!(summary.win_rate(), 0.0);
    assert_eq!(summary.profit_factor(), f64::INFINITY);
    assert_eq!(summary.max_drawdown(), 0.0);
}
