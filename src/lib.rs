//! # FXBT: Forex BackTester for Breakout Strategies
//!
//! **FXBT** is a Rust library for backtesting stop-entry forex strategies on OHLC bars.
//! It simulates pending orders bar by bar, aggregates the realized profit of several
//! strategy variants into a daily table, and can send the same instructions to a broker.
//!
//! ## Why FXBT?
//! - **Deterministic**: A run is a pure function of the bars and the initial orders.
//! - **Explicit semantics**: Every bar expires, then fills, then closes orders, in that order.
//! - **Parallel variants**: Parameter variants run concurrently over shared, read-only bars.
//! - **Technical Analysis Ready**: Indicator columns are computed with the [`ta`](https://crates.io/crates/ta) crate.
//!
//! ## Core Components
//! | Component   | Description                                                                                     |
//! |-------------|-------------------------------------------------------------------------------------------------|
//! | **`Bar`** | One OHLC observation with optional indicator columns (rolling high/low, EMA, ATR, MACD, RSI). |
//! | **`Order`**  | Stop-entry order with stop-loss, take-profit and expiry.                                       |
//! | **`Backtester`** | The simulator that moves orders through their lifecycle over historical bars.            |
//! | **`SignalGenerator`** | Strategy-specific order generation: `Breakout` and `Crossover`.                      |
//! | **`PerformanceTable`** | Daily and cumulative pnl per variant.                                               |
//! | **`Summary`** | Win rate, profit factor, drawdown of one variant.                                              |
//! | **`Optimizer`** | Runs many variants in parallel.                                                              |
//! | **`LiveTrader`** | Places the day's breakout orders through a `Broker`.                                        |
//!
//! ## Order Lifecycle
//! | Transition               | When                                                                                           |
//! |--------------------------|------------------------------------------------------------------------------------------------|
//! | **Pending → Filled**     | Long: bar high above the entry. Short: bar low below the entry.                               |
//! | **Pending → Cancelled**  | The order's expiry elapsed before it filled.                                                  |
//! | **Filled → Closed**      | The bar reached the stop-loss (checked first) or the take-profit.                             |
//!
//! Nothing is force-closed at the end of the data.
//!
//! ## Getting Started
//! ```rust
//! use fxbt::prelude::*;
//! use chrono::{TimeZone, Utc};
//! use std::sync::Arc;
//!
//! fn main() -> Result<()> {
//!     let time = |hour| Utc.with_ymd_and_hms(2020, 3, 2, hour, 0, 0).unwrap();
//!     let bar = |hour, open, high, low, close| {
//!         BarBuilder::builder()
//!             .time(time(hour))
//!             .open(open)
//!             .high(high)
//!             .low(low)
//!             .close(close)
//!             .build()
//!     };
//!     let bars = vec![
//!         bar(8, 1.1020, 1.1040, 1.1010, 1.1030)?,
//!         bar(9, 1.1030, 1.1060, 1.1020, 1.1055)?,
//!         bar(10, 1.1055, 1.1100, 1.1040, 1.1090)?,
//!     ];
//!
//!     // Buy stop above 1.1050, stop-loss at 1.1000, take-profit at 1.1100
//!     let order = Order::new(time(8), OrderSide::Long, 1.1050, 1.1000, 1.1100)?;
//!     let run = Backtester::new(Arc::from(bars))?.run(vec![order])?;
//!
//!     let summary = Summary::from_orders(run.orders(), 0.0001);
//!     assert_eq!(summary.wins(), 1);
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```
//!
//! ### Output:
//! ```bash
//! === Backtest Summary ===
//! Orders: 1 (closed 1, open 0, pending 0, cancelled 0)
//! Profit & Loss (P&L): 0.00500 (50.0 pips)
//! Max Drawdown: 0.0 pips
//! Profit Factor: inf
//! Win Rate: 100.00% (1 / 1)
//! Average Win / Loss: 50.0 / 0.0 pips
//! ```
//!
//! ## Integrations
//! | Crate          | Purpose                                                                                     |
//! |----------------|---------------------------------------------------------------------------------------------|
//! | [`rayon`](https://crates.io/crates/rayon) | Parallel processing of strategy variants.                                    |
//! | [`ta`](https://crates.io/crates/ta) | Indicator columns.                                                                 |
//! | [`plotters`](https://crates.io/crates/plotters) | Cumulative pnl charts.                                                 |
//! | [`reqwest`](https://crates.io/crates/reqwest) | OANDA v20 REST broker (`oanda` feature).                                 |
//!
//! ## License
//! MIT
#![warn(missing_docs)]

/// Core simulation components: bars, orders and the backtester.
pub mod engine;

/// Error types for the library.
pub mod errors;

/// Utility functions and helpers.
mod utils;

/// Bar data loading from CSV and JSON files.
pub mod data;

/// Indicator columns computed with the `ta` crate.
pub mod indicators;

/// Signal generators: range breakout and MACD crossover.
pub mod strategy;

/// Performance aggregation: daily pnl table and summary statistics.
pub mod performance;

/// Position sizing.
pub mod risk;

/// Reporting hooks.
pub mod report;

/// Run configuration read from TOML.
pub mod config;

/// Live trading through a broker.
pub mod live;

/// Strategy variants run in parallel.
#[cfg(feature = "optimizer")]
pub mod optimizer;

/// Draw graphics with svg and png backends.
#[cfg(feature = "draws")]
pub mod draws;

/// Re-exports of commonly used types and traits for convenience.
pub mod prelude {
    pub use super::*;
    pub use crate::config::*;
    pub use crate::engine::*;
    pub use crate::errors::*;
    pub use crate::performance::*;
    pub use crate::report::*;
    pub use crate::strategy::*;

    #[cfg(feature = "optimizer")]
    pub use crate::optimizer::*;

    #[cfg(feature = "draws")]
    pub use crate::draws::*;
}

/// Trait for converting between price distances and pips.
pub trait PipCalculus {
    /// Converts a price distance to pips.
    ///
    /// ### Arguments
    /// * `pip_size` - Price of one pip (e.g., 0.0001 for EUR/USD).
    ///
    /// ### Returns
    /// The distance expressed in pips.
    fn to_pips(self, pip_size: Self) -> Self;

    /// Converts a number of pips to a price distance.
    ///
    /// ### Arguments
    /// * `pip_size` - Price of one pip (e.g., 0.0001 for EUR/USD).
    ///
    /// ### Returns
    /// The distance expressed in price units.
    fn from_pips(self, pip_size: Self) -> Self;
}

impl PipCalculus for f64 {
    fn to_pips(self, pip_size: Self) -> Self {
        self / pip_size
    }

    fn from_pips(self, pip_size: Self) -> Self {
        self * pip_size
    }
}

#[cfg(test)]
mod pips {
    use super::*;

    #[test]
    fn to_pips() {
        assert!((0.0050.to_pips(0.0001) - 50.0).abs() < 1e-9)
    }

    #[test]
    fn from_pips() {
        assert!((5.0.from_pips(0.0001) - 0.0005).abs() < 1e-12)
    }

    #[test]
    fn yen_pairs() {
        assert!((0.25.to_pips(0.01) - 25.0).abs() < 1e-9)
    }
}
