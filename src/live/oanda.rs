//! OANDA v20 REST API.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{Broker, OrderRequest, OrderType, PendingOrder, Trade};
use crate::config::LiveConfig;
use crate::engine::{Bar, BarBuilder, OrderSide};
use crate::errors::{Error, Result};

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    candles: Vec<Candle>,
}

#[derive(Debug, Deserialize)]
struct Candle {
    time: DateTime<Utc>,
    complete: bool,
    mid: Option<Ohlc>,
}

#[derive(Debug, Deserialize)]
struct Ohlc {
    o: String,
    h: String,
    l: String,
    c: String,
}

#[derive(Debug, Deserialize)]
struct OrdersResponse {
    orders: Vec<OrderRecord>,
}

#[derive(Debug, Deserialize)]
struct OrderRecord {
    id: String,
    #[serde(rename = "type")]
    order_type: OrderType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    order_create_transaction: Transaction,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TradesResponse {
    trades: Vec<TradeRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeRecord {
    id: String,
    #[serde(rename = "realizedPL")]
    realized_pl: String,
    close_time: Option<DateTime<Utc>>,
}

fn price(value: &str) -> Result<f64> {
    value
        .parse()
        .map_err(|_| Error::Broker(format!("invalid number in response: {value:?}")))
}

/// [`Broker`] backed by an OANDA account.
#[derive(Debug, Clone)]
pub struct OandaBroker {
    client: Client,
    base_url: String,
    account_id: String,
    token: String,
}

impl OandaBroker {
    /// Creates a broker for the configured account.
    ///
    /// ### Arguments
    /// * `cfg` - Endpoint and account.
    /// * `token` - Personal access token, usually read from [`LiveConfig::TOKEN_VAR`].
    pub fn new(cfg: &LiveConfig, token: impl Into<String>) -> Result<Self> {
        if cfg.account_id.is_empty() {
            return Err(Error::InvalidParameter("live.account_id is required for live runs".into()));
        }
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            account_id: cfg.account_id.clone(),
            token: token.into(),
        })
    }

    /// Reads the token from the environment.
    pub fn from_env(cfg: &LiveConfig) -> Result<Self> {
        let token = std::env::var(LiveConfig::TOKEN_VAR)
            .map_err(|_| Error::InvalidParameter(format!("{} is not set", LiveConfig::TOKEN_VAR)))?;
        Self::new(cfg, token)
    }

    fn account_url(&self, path: &str) -> String {
        format!("{}/v3/accounts/{}/{path}", self.base_url, self.account_id)
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.bearer_auth(&self.token).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::Broker(format!("HTTP {status}: {body}")));
        }
        Ok(response.json()?)
    }
}

impl Broker for OandaBroker {
    fn candles(&self, instrument: &str, granularity: &str, count: usize) -> Result<Vec<Bar>> {
        let url = format!("{}/v3/instruments/{instrument}/candles", self.base_url);
        let count = count.to_string();
        let query = [("count", count.as_str()), ("granularity", granularity), ("price", "M")];
        let response: CandlesResponse = self.send(self.client.get(url).query(&query))?;

        response
            .candles
            .into_iter()
            .filter(|candle| candle.complete)
            .map(|candle| {
                let mid = candle.mid.ok_or(Error::MissingField("mid"))?;
                BarBuilder::builder()
                    .time(candle.time)
                    .open(price(&mid.o)?)
                    .high(price(&mid.h)?)
                    .low(price(&mid.l)?)
                    .close(price(&mid.c)?)
                    .build()
            })
            .collect()
    }

    fn pending_orders(&self) -> Result<Vec<PendingOrder>> {
        let response: OrdersResponse = self.send(self.client.get(self.account_url("pendingOrders")))?;
        Ok(response
            .orders
            .into_iter()
            .map(|order| PendingOrder {
                id: order.id,
                order_type: order.order_type,
            })
            .collect())
    }

    fn cancel_order(&self, id: &str) -> Result<()> {
        let url = self.account_url(&format!("orders/{id}/cancel"));
        let _: serde_json::Value = self.send(self.client.put(url))?;
        Ok(())
    }

    fn place_order(&self, request: &OrderRequest) -> Result<String> {
        let units = match request.side {
            OrderSide::Long => request.units,
            OrderSide::Short => -request.units,
        };
        let body = serde_json::json!({
            "order": {
                "type": request.order_type,
                "instrument": request.instrument,
                "units": format!("{units:.0}"),
                "price": format!("{:.5}", request.price),
                "timeInForce": "GTC",
                "positionFill": "DEFAULT",
                "takeProfitOnFill": { "price": format!("{:.5}", request.take_profit) },
                "stopLossOnFill": { "price": format!("{:.5}", request.stop_loss) },
            }
        });
        let response: CreateResponse = self.send(self.client.post(self.account_url("orders")).json(&body))?;
        Ok(response.order_create_transaction.id)
    }

    fn closed_trades(&self, count: usize) -> Result<Vec<Trade>> {
        let count = count.to_string();
        let query = [("state", "CLOSED"), ("count", count.as_str())];
        let response: TradesResponse = self.send(self.client.get(self.account_url("trades")).query(&query))?;

        let mut trades = response.trades;
        // newest first on the wire
        trades.sort_by_key(|trade| trade.close_time);
        trades
            .into_iter()
            .map(|trade| {
                Ok(Trade {
                    pnl: price(&trade.realized_pl)?,
                    id: trade.id,
                })
            })
            .collect()
    }
}
