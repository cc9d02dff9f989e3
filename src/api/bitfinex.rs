use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::Sha384;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Credentials, ExchangeConnector};
use crate::error::ConnectorError;
use crate::models::{
    Candle, Direction, Fees, OrderRequest, OrderState, OrderStatus, OrderType, PairInfo, Period,
    Ticker, WalletBalance,
};

const API_URL: &str = "https://api.bitfinex.com";
const PUBLIC_URL: &str = "https://api-pub.bitfinex.com";
const RATE_LIMIT_RPM: u32 = 90;
const MAX_RETRIES: u32 = 3;

type HmacSha384 = Hmac<Sha384>;

type BitfinexRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Bitfinex REST connector (v1 trading endpoints, v2 candles)
///
/// Every request goes through one shared rate limiter and is retried with
/// exponential backoff on HTTP 429, 5xx and network errors.
#[derive(Clone)]
pub struct BitfinexConnector {
    client: Client,
    api_url: String,
    public_url: String,
    credentials: Option<Credentials>,
    nonce: Arc<AtomicU64>,
    rate_limiter: Arc<BitfinexRateLimiter>,
    retry_delay: Duration,
}

/// Response from /v1/pubticker/{pair}
#[derive(Debug, Deserialize)]
struct TickerResponse {
    ask: String,
    bid: String,
    last_price: String,
    low: String,
    high: String,
    volume: String,
    timestamp: String,
}

/// Entry of /v1/symbols_details
#[derive(Debug, Deserialize)]
struct SymbolDetails {
    pair: String,
    price_precision: u32,
    minimum_order_size: String,
    maximum_order_size: String,
}

/// Entry of /v1/account_infos, fees in percent
#[derive(Debug, Deserialize)]
struct AccountInfo {
    maker_fees: String,
    taker_fees: String,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    #[serde(rename = "type")]
    wallet: String,
    currency: String,
    amount: String,
    available: String,
}

/// Order object returned by /v1/order/new and /v1/order/status
#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: i64,
    symbol: String,
    price: Option<String>,
    avg_execution_price: Option<String>,
    side: String,
    #[serde(rename = "type")]
    kind: String,
    is_live: bool,
    is_cancelled: bool,
    original_amount: String,
    remaining_amount: String,
    executed_amount: String,
    oco_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

impl BitfinexConnector {
    pub fn new(credentials: Option<Credentials>) -> Result<Self, ConnectorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("venice/0.1")
            .build()?;

        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            api_url: API_URL.to_string(),
            public_url: PUBLIC_URL.to_string(),
            credentials,
            nonce: Arc::new(AtomicU64::new(0)),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Point both v1 and v2 endpoints at another host (used against mock servers)
    pub fn with_base_url(mut self, url: &str) -> Self {
        let url = url.trim_end_matches('/');
        self.api_url = url.to_string();
        self.public_url = url.to_string();
        self
    }

    /// Base delay of the retry backoff (doubled per attempt)
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Strictly increasing nonce, seeded from the wall clock in microseconds
    fn next_nonce(&self) -> u64 {
        let now = Utc::now().timestamp_micros().max(0) as u64;
        self.nonce.fetch_max(now, Ordering::SeqCst);
        self.nonce.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Build an authenticated v1 POST request
    fn signed_post(
        &self,
        path: &str,
        params: &Map<String, Value>,
    ) -> Result<RequestBuilder, ConnectorError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(ConnectorError::MissingCredentials)?;

        let mut body = params.clone();
        body.insert("request".to_string(), Value::String(path.to_string()));
        body.insert("nonce".to_string(), Value::String(self.next_nonce().to_string()));

        let body = Value::Object(body);
        let payload = base64::engine::general_purpose::STANDARD.encode(serde_json::to_vec(&body)?);
        let signature = sign_payload(&credentials.secret, &payload)?;

        Ok(self
            .client
            .post(format!("{}{}", self.api_url, path))
            .header("X-BFX-APIKEY", &credentials.key)
            .header("X-BFX-PAYLOAD", payload)
            .header("X-BFX-SIGNATURE", signature)
            .json(&body))
    }

    /// Send a rate-limited request with retry logic
    ///
    /// `build` is invoked once per attempt so signed requests get a fresh nonce.
    async fn send<F>(&self, build: F) -> Result<reqwest::Response, ConnectorError>
    where
        F: Fn() -> Result<RequestBuilder, ConnectorError>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.rate_limiter.until_ready().await;

            match build()?.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if retryable && attempt < MAX_RETRIES {
                        let backoff = self.retry_delay * 2u32.pow(attempt - 1);
                        tracing::warn!(
                            "Bitfinex returned {}, retrying in {:?} (attempt {}/{})",
                            status,
                            backoff,
                            attempt,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    if !retryable {
                        if let Ok(error) = serde_json::from_str::<ErrorMessage>(&body) {
                            return Err(ConnectorError::Exchange(error.message));
                        }
                    }
                    return Err(ConnectorError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) if attempt < MAX_RETRIES => {
                    let backoff = self.retry_delay * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        "Network error: {}, retrying in {:?} (attempt {}/{})",
                        e,
                        backoff,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(ConnectorError::Http(e)),
            }
        }
    }

    async fn get_public(&self, url: String) -> Result<Value, ConnectorError> {
        let response = self.send(|| Ok(self.client.get(&url))).await?;
        Ok(response.json().await?)
    }

    async fn post_private(
        &self,
        path: &str,
        params: Map<String, Value>,
    ) -> Result<Value, ConnectorError> {
        let response = self.send(|| self.signed_post(path, &params)).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ExchangeConnector for BitfinexConnector {
    fn name(&self) -> &str {
        "bitfinex"
    }

    async fn ohlc(
        &self,
        pair: &str,
        period: Period,
        limit: usize,
    ) -> Result<Vec<Candle>, ConnectorError> {
        let url = format!(
            "{}/v2/candles/trade:{}:t{}/hist?limit={}",
            self.public_url,
            period.as_str(),
            pair.to_uppercase(),
            limit
        );
        let rows: Vec<Vec<f64>> = serde_json::from_value(self.get_public(url).await?)
            .map_err(|e| ConnectorError::Parse(format!("candles: {}", e)))?;

        // [MTS, OPEN, CLOSE, HIGH, LOW, VOLUME], newest first
        let mut candles = rows
            .iter()
            .map(|row| parse_candle(row))
            .collect::<Result<Vec<_>, _>>()?;
        candles.reverse();
        Ok(candles)
    }

    async fn ticker(&self, pair: &str) -> Result<Ticker, ConnectorError> {
        let url = format!("{}/v1/pubticker/{}", self.api_url, pair.to_lowercase());
        let raw: TickerResponse = serde_json::from_value(self.get_public(url).await?)?;

        let seconds = parse_number("timestamp", &raw.timestamp)?;
        let time = DateTime::from_timestamp_millis((seconds * 1000.0) as i64)
            .ok_or_else(|| ConnectorError::Parse(format!("timestamp {}", raw.timestamp)))?;

        Ok(Ticker {
            time,
            ask: parse_number("ask", &raw.ask)?,
            bid: parse_number("bid", &raw.bid)?,
            last: parse_number("last_price", &raw.last_price)?,
            low: parse_number("low", &raw.low)?,
            high: parse_number("high", &raw.high)?,
            volume: parse_number("volume", &raw.volume)?,
        })
    }

    async fn pairs(&self) -> Result<HashMap<String, PairInfo>, ConnectorError> {
        let url = format!("{}/v1/symbols_details", self.api_url);
        let details: Vec<SymbolDetails> = serde_json::from_value(self.get_public(url).await?)?;

        details
            .into_iter()
            .map(|d| {
                let name = d.pair.to_lowercase();
                let info = PairInfo {
                    name: name.clone(),
                    precision: d.price_precision,
                    min_order_size: parse_number("minimum_order_size", &d.minimum_order_size)?,
                    max_order_size: parse_number("maximum_order_size", &d.maximum_order_size)?,
                };
                Ok((name, info))
            })
            .collect()
    }

    async fn balance(&self) -> Result<Vec<WalletBalance>, ConnectorError> {
        let entries: Vec<BalanceEntry> =
            serde_json::from_value(self.post_private("/v1/balances", Map::new()).await?)?;

        entries
            .into_iter()
            .filter(|e| e.wallet == "exchange")
            .map(|e| {
                Ok(WalletBalance {
                    currency: e.currency,
                    amount: parse_number("amount", &e.amount)?,
                    available: parse_number("available", &e.available)?,
                })
            })
            .collect()
    }

    async fn fees(&self) -> Result<Fees, ConnectorError> {
        let infos: Vec<AccountInfo> =
            serde_json::from_value(self.post_private("/v1/account_infos", Map::new()).await?)?;
        let info = infos
            .first()
            .ok_or_else(|| ConnectorError::Parse("empty account_infos".to_string()))?;

        Ok(Fees {
            maker: parse_number("maker_fees", &info.maker_fees)? / 100.0,
            taker: parse_number("taker_fees", &info.taker_fees)? / 100.0,
        })
    }

    async fn add_order(&self, request: &OrderRequest) -> Result<Vec<OrderStatus>, ConnectorError> {
        let params = order_params(request);
        let oco = params.get("ocoorder") == Some(&Value::Bool(true));

        let raw: OrderResponse =
            serde_json::from_value(self.post_private("/v1/order/new", params).await?)?;

        tracing::info!(
            order_id = raw.id,
            pair = %request.pair,
            "Submitted {} {} order for {:.8}",
            request.direction,
            request.order_type,
            request.volume
        );

        let mut primary = order_from_response(&raw)?;
        primary.price2 = request.price2;
        let mut orders = vec![primary];

        if oco {
            if let Some(oco_id) = raw.oco_order {
                let mut leg = OrderStatus::pending(request);
                leg.id = Some(oco_id.to_string());
                leg.order_type = OrderType::Stop;
                leg.price = request.price2;
                leg.price2 = 0.0;
                orders.push(leg);
            }
        }

        Ok(orders)
    }

    async fn cancel_order(&self, id: &str) -> Result<(), ConnectorError> {
        let mut params = Map::new();
        params.insert("order_id".to_string(), order_id_value(id)?);
        self.post_private("/v1/order/cancel", params).await?;
        tracing::info!(order_id = %id, "Cancelled order");
        Ok(())
    }

    async fn order_status(&self, id: &str) -> Result<OrderStatus, ConnectorError> {
        let mut params = Map::new();
        params.insert("order_id".to_string(), order_id_value(id)?);
        let raw: OrderResponse =
            serde_json::from_value(self.post_private("/v1/order/status", params).await?)?;
        order_from_response(&raw)
    }
}

/// Hex encoded HMAC-SHA384 of the base64 payload
fn sign_payload(secret: &str, payload: &str) -> Result<String, ConnectorError> {
    let mut mac = HmacSha384::new_from_slice(secret.as_bytes())
        .map_err(|e| ConnectorError::Exchange(format!("invalid API secret: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn parse_number(field: &str, raw: &str) -> Result<f64, ConnectorError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| ConnectorError::Parse(format!("{} is not a number: {:?}", field, raw)))
}

fn parse_candle(row: &[f64]) -> Result<Candle, ConnectorError> {
    if row.len() < 6 {
        return Err(ConnectorError::Parse(format!(
            "candle has {} fields, expected 6",
            row.len()
        )));
    }
    let time = DateTime::from_timestamp_millis(row[0] as i64)
        .ok_or_else(|| ConnectorError::Parse(format!("candle time {}", row[0])))?;

    Ok(Candle {
        time,
        open: row[1],
        close: row[2],
        high: row[3],
        low: row[4],
        volume: row[5],
    })
}

fn type_key(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "exchange market",
        OrderType::Limit => "exchange limit",
        OrderType::Stop => "exchange stop",
        OrderType::TrailingStop => "exchange trailing-stop",
    }
}

fn parse_type(raw: &str) -> Result<OrderType, ConnectorError> {
    match raw.trim_start_matches("exchange ") {
        "market" => Ok(OrderType::Market),
        "limit" => Ok(OrderType::Limit),
        "stop" => Ok(OrderType::Stop),
        "trailing-stop" | "trailing stop" => Ok(OrderType::TrailingStop),
        other => Err(ConnectorError::Parse(format!("unknown order type {:?}", other))),
    }
}

fn parse_side(raw: &str) -> Result<Direction, ConnectorError> {
    match raw {
        "buy" => Ok(Direction::Buy),
        "sell" => Ok(Direction::Sell),
        other => Err(ConnectorError::Parse(format!("unknown side {:?}", other))),
    }
}

fn order_id_value(id: &str) -> Result<Value, ConnectorError> {
    let id: i64 = id
        .parse()
        .map_err(|_| ConnectorError::Parse(format!("order id {:?} is not numeric", id)))?;
    Ok(json!(id))
}

/// Body of /v1/order/new
///
/// A limit order with a secondary price is sent as OCO: the limit plus a
/// linked stop at `price2`.
fn order_params(request: &OrderRequest) -> Map<String, Value> {
    let oco = request.order_type == OrderType::Limit && request.price2 > 0.0;
    let price = match request.order_type {
        OrderType::Market => 1.0,
        OrderType::TrailingStop => request.price2,
        _ => request.price,
    };
    let oco_price = |side: Direction| {
        if oco && request.direction == side {
            request.price2.to_string()
        } else {
            "0".to_string()
        }
    };

    let mut params = Map::new();
    params.insert("symbol".into(), json!(request.pair.to_lowercase()));
    params.insert("amount".into(), json!(format!("{:.8}", request.volume)));
    params.insert("price".into(), json!(price.to_string()));
    params.insert("side".into(), json!(request.direction.to_string()));
    params.insert("type".into(), json!(type_key(request.order_type)));
    params.insert("is_postonly".into(), json!(request.order_type == OrderType::Limit));
    params.insert("ocoorder".into(), json!(oco));
    params.insert("buy_price_oco".into(), json!(oco_price(Direction::Buy)));
    params.insert("sell_price_oco".into(), json!(oco_price(Direction::Sell)));
    params
}

fn order_from_response(raw: &OrderResponse) -> Result<OrderStatus, ConnectorError> {
    let state = if raw.is_live {
        OrderState::Pending
    } else if raw.is_cancelled {
        OrderState::Cancelled
    } else {
        OrderState::Confirmed
    };
    let optional = |field: &str, value: &Option<String>| match value {
        Some(v) => parse_number(field, v),
        None => Ok(0.0),
    };

    Ok(OrderStatus {
        id: Some(raw.id.to_string()),
        direction: parse_side(&raw.side)?,
        order_type: parse_type(&raw.kind)?,
        pair: raw.symbol.to_lowercase(),
        state,
        volume: parse_number("original_amount", &raw.original_amount)?,
        executed_volume: parse_number("executed_amount", &raw.executed_amount)?,
        price: optional("price", &raw.price)?,
        price2: 0.0,
        avg_price: optional("avg_execution_price", &raw.avg_execution_price)?,
        remaining: parse_number("remaining_amount", &raw.remaining_amount)?,
        pivot: None,
    })
}
