use chrono::{DateTime, Utc};

use crate::engine::{OrderSide, OrderStatus};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The bar data provided is empty. Backtesting requires at least one bar.
    #[error("Bar data is empty: backtesting requires at least one bar")]
    BarDataEmpty,

    /// Bar timestamps must be strictly ascending.
    #[error("Bars are not sorted: bar #{index} at {current} does not come after {previous}")]
    UnsortedBars {
        /// Index of the offending bar.
        index: usize,
        /// Timestamp of the preceding bar.
        previous: DateTime<Utc>,
        /// Timestamp of the offending bar.
        current: DateTime<Utc>,
    },

    /// A bar has non-positive prices or an inconsistent high/low range.
    #[error("Invalid bar at {0}: {1}")]
    InvalidBar(DateTime<Utc>, String),

    /// A required builder field was not provided.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// The entry/stop/target ordering of an order is violated.
    #[error("Invalid {side} order: entry {entry}, stop loss {stop_loss}, take profit {take_profit}")]
    InvalidOrder {
        /// Order side.
        side: OrderSide,
        /// Entry price.
        entry: f64,
        /// Stop loss price.
        stop_loss: f64,
        /// Take profit price.
        take_profit: f64,
    },

    /// The order status transition is not allowed by the order state machine.
    #[error("Invalid order transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: OrderStatus,
        /// Requested status.
        to: OrderStatus,
    },

    /// A strategy or configuration parameter is out of range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// An indicator could not be built.
    #[error("Indicator error: {0}")]
    Indicator(String),

    /// The broker rejected a request or answered with an unexpected payload.
    #[error("Broker error: {0}")]
    Broker(String),

    /// A generic error with a custom message.
    #[error("{0}")]
    Msg(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error occurred.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// CSV reading/writing error occurred.
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// The configuration file could not be parsed.
    #[error("Config error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// HTTP transport error while talking to the broker.
    #[cfg(feature = "oanda")]
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Chart rendering failed.
    #[cfg(feature = "draws")]
    #[error("Plotters error: {0}")]
    Plotters(String),
}
