use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};
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

const API_URL: &str = "https://api.kraken.com";
const RATE_LIMIT_RPM: u32 = 45;
const MAX_RETRIES: u32 = 3;

/// TradeVolume only reports fees for the pairs it is asked about; the tier
/// is account wide
const FEE_PAIR: &str = "XBTUSD";

type HmacSha512 = Hmac<Sha512>;

type KrakenRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Kraken REST connector (`/0/public` and `/0/private` endpoints)
///
/// Private calls are form-encoded POSTs signed with `API-Sign`. Requests
/// share one rate limiter and are retried on HTTP 429, 5xx and network errors.
#[derive(Clone)]
pub struct KrakenConnector {
    client: Client,
    api_url: String,
    credentials: Option<Credentials>,
    nonce: Arc<AtomicU64>,
    rate_limiter: Arc<KrakenRateLimiter>,
    retry_delay: Duration,
}

/// Every Kraken answer: a list of error strings and the payload
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: Vec<String>,
    result: Option<Value>,
}

/// Ticker entry; each field is an array whose first element is used
#[derive(Debug, Deserialize)]
struct TickerInfo {
    a: Vec<String>,
    b: Vec<String>,
    c: Vec<String>,
    /// volume [today, last 24h]
    v: Vec<String>,
    l: Vec<String>,
    h: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AssetPair {
    altname: String,
    pair_decimals: u32,
    #[serde(default)]
    ordermin: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeeInfo {
    fee: String,
}

/// Result of TradeVolume with fee-info, fees in percent
#[derive(Debug, Deserialize)]
struct TradeVolume {
    #[serde(default)]
    fees: HashMap<String, FeeInfo>,
    #[serde(default)]
    fees_maker: HashMap<String, FeeInfo>,
}

#[derive(Debug, Deserialize)]
struct AddOrderResult {
    txid: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OrderDescr {
    pair: String,
    #[serde(rename = "type")]
    side: String,
    ordertype: String,
    price: String,
    price2: String,
}

/// Entry of QueryOrders
#[derive(Debug, Deserialize)]
struct OrderInfo {
    status: String,
    vol: String,
    vol_exec: String,
    /// average fill price
    price: String,
    descr: OrderDescr,
}

impl KrakenConnector {
    pub fn new(credentials: Option<Credentials>) -> Result<Self, ConnectorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("venice/0.1")
            .build()?;

        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            api_url: API_URL.to_string(),
            credentials,
            nonce: Arc::new(AtomicU64::new(0)),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            retry_delay: Duration::from_secs(1),
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.api_url = url.trim_end_matches('/').to_string();
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

    fn signed_post(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<RequestBuilder, ConnectorError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(ConnectorError::MissingCredentials)?;

        let path = format!("/0/private/{}", method);
        let nonce = self.next_nonce();
        let mut fields = vec![("nonce", nonce.to_string())];
        fields.extend(params.iter().cloned());
        let body = form_encode(&fields);
        let signature = sign_request(&credentials.secret, &path, nonce, &body)?;

        Ok(self
            .client
            .post(format!("{}{}", self.api_url, path))
            .header("API-Key", &credentials.key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body))
    }

    /// Send a rate-limited request with retry logic
    ///
    /// `build` runs once per attempt so signed requests get a fresh nonce.
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
                            "Kraken returned {}, retrying in {:?} (attempt {}/{})",
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

    async fn public<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<T, ConnectorError> {
        let url = format!("{}/0/public/{}", self.api_url, method);
        let response = self
            .send(|| Ok(self.client.get(&url).query(query)))
            .await?;
        unwrap_result(response.json().await?)
    }

    async fn private<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, ConnectorError> {
        let response = self.send(|| self.signed_post(method, params)).await?;
        unwrap_result(response.json().await?)
    }
}

#[async_trait]
impl ExchangeConnector for KrakenConnector {
    fn name(&self) -> &str {
        "kraken"
    }

    async fn ohlc(
        &self,
        pair: &str,
        period: Period,
        limit: usize,
    ) -> Result<Vec<Candle>, ConnectorError> {
        let query = [
            ("pair", pair.to_uppercase()),
            ("interval", interval(period)?.to_string()),
        ];
        let result: HashMap<String, Value> = self.public("OHLC", &query).await?;

        // one series keyed by the exchange's pair name, next to "last"
        let rows = result
            .iter()
            .find(|(key, _)| key.as_str() != "last")
            .and_then(|(_, rows)| rows.as_array())
            .ok_or_else(|| ConnectorError::Parse(format!("no OHLC series for {}", pair)))?;

        let skip = rows.len().saturating_sub(limit);
        rows[skip..]
            .iter()
            .map(|row| match row.as_array() {
                Some(fields) => parse_candle(fields),
                None => Err(ConnectorError::Parse("OHLC row is not an array".to_string())),
            })
            .collect()
    }

    async fn ticker(&self, pair: &str) -> Result<Ticker, ConnectorError> {
        let result: HashMap<String, TickerInfo> =
            self.public("Ticker", &[("pair", pair.to_uppercase())]).await?;
        let info = result
            .into_values()
            .next()
            .ok_or_else(|| ConnectorError::Parse(format!("no ticker for {}", pair)))?;

        Ok(Ticker {
            // Kraken's ticker carries no timestamp
            time: Utc::now(),
            ask: first("a", &info.a)?,
            bid: first("b", &info.b)?,
            last: first("c", &info.c)?,
            low: first("l", &info.l)?,
            high: first("h", &info.h)?,
            volume: first("v", &info.v)?,
        })
    }

    async fn pairs(&self) -> Result<HashMap<String, PairInfo>, ConnectorError> {
        let result: HashMap<String, AssetPair> = self.public("AssetPairs", &[]).await?;

        result
            .into_values()
            .map(|p| {
                let name = p.altname.to_lowercase();
                let min_order_size = match &p.ordermin {
                    Some(min) => parse_number("ordermin", min)?,
                    None => 0.0,
                };
                let info = PairInfo {
                    name: name.clone(),
                    precision: p.pair_decimals,
                    min_order_size,
                    max_order_size: 0.0,
                };
                Ok((name, info))
            })
            .collect()
    }

    async fn balance(&self) -> Result<Vec<WalletBalance>, ConnectorError> {
        let result: HashMap<String, String> = self.private("Balance", &[]).await?;

        let mut balances = result
            .into_iter()
            .map(|(asset, amount)| {
                let amount = parse_number(&asset, &amount)?;
                Ok(WalletBalance {
                    currency: asset.to_lowercase(),
                    amount,
                    available: amount,
                })
            })
            .collect::<Result<Vec<_>, ConnectorError>>()?;
        balances.sort_by(|a, b| a.currency.cmp(&b.currency));
        Ok(balances)
    }

    async fn fees(&self) -> Result<Fees, ConnectorError> {
        let params = [("pair", FEE_PAIR.to_string()), ("fee-info", "true".to_string())];
        let volume: TradeVolume = self.private("TradeVolume", &params).await?;

        let taker = volume
            .fees
            .values()
            .next()
            .ok_or_else(|| ConnectorError::Parse("TradeVolume has no fees".to_string()))?;
        let taker = parse_number("fee", &taker.fee)? / 100.0;
        let maker = match volume.fees_maker.values().next() {
            Some(info) => parse_number("fee", &info.fee)? / 100.0,
            None => taker,
        };

        Ok(Fees { maker, taker })
    }

    async fn add_order(&self, request: &OrderRequest) -> Result<Vec<OrderStatus>, ConnectorError> {
        let result: AddOrderResult = self.private("AddOrder", &order_params(request)).await?;

        tracing::info!(
            txid = ?result.txid,
            pair = %request.pair,
            "Submitted {} {} order for {:.8}",
            request.direction,
            request.order_type,
            request.volume
        );

        if result.txid.is_empty() {
            return Err(ConnectorError::Parse("AddOrder returned no txid".to_string()));
        }
        Ok(result
            .txid
            .into_iter()
            .map(|txid| {
                let mut order = OrderStatus::pending(request);
                order.id = Some(txid);
                order
            })
            .collect())
    }

    async fn cancel_order(&self, id: &str) -> Result<(), ConnectorError> {
        let _: Value = self.private("CancelOrder", &[("txid", id.to_string())]).await?;
        tracing::info!(order_id = %id, "Cancelled order");
        Ok(())
    }

    async fn order_status(&self, id: &str) -> Result<OrderStatus, ConnectorError> {
        let mut result: HashMap<String, OrderInfo> =
            self.private("QueryOrders", &[("txid", id.to_string())]).await?;
        let info = result
            .remove(id)
            .ok_or_else(|| ConnectorError::Exchange(format!("unknown order {}", id)))?;
        order_from_info(id, &info)
    }
}

/// Payload of a Kraken answer, or its error list as `ConnectorError::Exchange`
fn unwrap_result<T: DeserializeOwned>(envelope: Envelope) -> Result<T, ConnectorError> {
    if !envelope.error.is_empty() {
        return Err(ConnectorError::Exchange(envelope.error.join(", ")));
    }
    let result = envelope
        .result
        .ok_or_else(|| ConnectorError::Parse("response has no result".to_string()))?;
    Ok(serde_json::from_value(result)?)
}

/// Base64 HMAC-SHA512 of `path + SHA256(nonce + body)`, keyed with the decoded secret
fn sign_request(
    secret: &str,
    path: &str,
    nonce: u64,
    body: &str,
) -> Result<String, ConnectorError> {
    let engine = base64::engine::general_purpose::STANDARD;
    let key = engine
        .decode(secret)
        .map_err(|e| ConnectorError::Exchange(format!("invalid API secret: {}", e)))?;
    let digest = Sha256::digest(format!("{}{}", nonce, body).as_bytes());

    let mut mac = HmacSha512::new_from_slice(&key)
        .map_err(|e| ConnectorError::Exchange(format!("invalid API secret: {}", e)))?;
    mac.update(path.as_bytes());
    mac.update(&digest);
    Ok(engine.encode(mac.finalize().into_bytes()))
}

/// `application/x-www-form-urlencoded` body, fields in the given order
fn form_encode(fields: &[(&str, String)]) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{}={}", percent_encode(key), percent_encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Candle interval in minutes; Kraken has no 3h, 6h or 12h candles
fn interval(period: Period) -> Result<i64, ConnectorError> {
    match period {
        Period::H3 | Period::H6 | Period::H12 => {
            Err(ConnectorError::Unsupported("kraken interval"))
        }
        _ => Ok(period.minutes()),
    }
}

fn parse_number(field: &str, raw: &str) -> Result<f64, ConnectorError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| ConnectorError::Parse(format!("{} is not a number: {:?}", field, raw)))
}

fn first(field: &str, values: &[String]) -> Result<f64, ConnectorError> {
    let raw = values
        .first()
        .ok_or_else(|| ConnectorError::Parse(format!("{} is empty", field)))?;
    parse_number(field, raw)
}

/// `[time, open, high, low, close, vwap, volume, count]`, prices as strings
fn parse_candle(row: &[Value]) -> Result<Candle, ConnectorError> {
    if row.len() < 7 {
        return Err(ConnectorError::Parse(format!(
            "candle has {} fields, expected 8",
            row.len()
        )));
    }
    let seconds = row[0]
        .as_i64()
        .ok_or_else(|| ConnectorError::Parse(format!("candle time {}", row[0])))?;
    let time = DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| ConnectorError::Parse(format!("candle time {}", seconds)))?;
    let field = |index: usize, name: &str| match row[index].as_str() {
        Some(raw) => parse_number(name, raw),
        None => Err(ConnectorError::Parse(format!("{} is not a string", name))),
    };

    Ok(Candle {
        time,
        open: field(1, "open")?,
        high: field(2, "high")?,
        low: field(3, "low")?,
        close: field(4, "close")?,
        volume: field(6, "volume")?,
    })
}

fn type_key(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "market",
        OrderType::Limit => "limit",
        OrderType::Stop => "stop-loss",
        OrderType::TrailingStop => "trailing-stop",
    }
}

fn parse_type(raw: &str) -> Result<OrderType, ConnectorError> {
    match raw {
        "market" => Ok(OrderType::Market),
        "limit" => Ok(OrderType::Limit),
        "stop-loss" => Ok(OrderType::Stop),
        "trailing-stop" => Ok(OrderType::TrailingStop),
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

fn parse_state(raw: &str) -> Result<OrderState, ConnectorError> {
    match raw {
        "pending" | "open" => Ok(OrderState::Pending),
        "closed" => Ok(OrderState::Confirmed),
        "canceled" | "expired" => Ok(OrderState::Cancelled),
        other => Err(ConnectorError::Parse(format!("unknown order status {:?}", other))),
    }
}

/// Fields of AddOrder
///
/// Limit orders are post-only. A trailing stop sends its offset as a
/// relative price (`+offset`).
fn order_params(request: &OrderRequest) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("pair", request.pair.to_uppercase()),
        ("type", request.direction.to_string()),
        ("ordertype", type_key(request.order_type).to_string()),
        ("volume", format!("{:.8}", request.volume)),
    ];
    match request.order_type {
        OrderType::Market => {}
        OrderType::Limit => {
            params.push(("price", request.price.to_string()));
            params.push(("oflags", "post".to_string()));
        }
        OrderType::Stop => params.push(("price", request.price.to_string())),
        OrderType::TrailingStop => params.push(("price", format!("+{}", request.price2))),
    }
    params
}

fn order_from_info(id: &str, info: &OrderInfo) -> Result<OrderStatus, ConnectorError> {
    let volume = parse_number("vol", &info.vol)?;
    let executed_volume = parse_number("vol_exec", &info.vol_exec)?;

    Ok(OrderStatus {
        id: Some(id.to_string()),
        direction: parse_side(&info.descr.side)?,
        order_type: parse_type(&info.descr.ordertype)?,
        pair: info.descr.pair.to_lowercase(),
        state: parse_state(&info.status)?,
        volume,
        executed_volume,
        price: parse_number("descr.price", &info.descr.price)?,
        price2: parse_number("descr.price2", &info.descr.price2)?,
        avg_price: parse_number("price", &info.price)?,
        remaining: volume - executed_volume,
        pivot: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    // Key pair from Kraken's REST authentication guide
    const SECRET: &str =
        "kQH5HW/8p1uGOVjbgWA7FunAmGO8lsSUXNsu3eow76sz84Q18fWxnyRzBHCd3pd5nE9qa99HAZtuZuj6F1huXg==";

    fn connector(
        server: &mockito::ServerGuard,
        credentials: Option<Credentials>,
    ) -> KrakenConnector {
        KrakenConnector::new(credentials)
            .unwrap()
            .with_base_url(&server.url())
            .with_retry_delay(Duration::from_millis(1))
    }

    fn credentials() -> Option<Credentials> {
        Some(Credentials {
            key: "test-key".to_string(),
            secret: SECRET.to_string(),
        })
    }

    #[test]
    fn test_signature_matches_documented_example() {
        let body =
            "nonce=1616492376594&ordertype=limit&pair=XBTUSD&price=37500&type=buy&volume=1.25";
        let signature = sign_request(SECRET, "/0/private/AddOrder", 1616492376594, body).unwrap();
        assert_eq!(
            signature,
            "4/dpxb3iT4tp/ZCVEwSnEsLxx0bqyhLpdfOpc6fn7OR8+UClSV5n9E6aSS8MPtnRfp32bAb0nmbRn6H8ndwLUQ=="
        );
    }

    #[test]
    fn test_form_encoding_escapes_reserved_characters() {
        let body = form_encode(&[
            ("price", "+5".to_string()),
            ("txid", "OQCLML-BW3P3-BUCMWZ".to_string()),
        ]);
        assert_eq!(body, "price=%2B5&txid=OQCLML-BW3P3-BUCMWZ");
    }

    #[test]
    fn test_trailing_stop_sends_relative_offset() {
        let request = OrderRequest {
            pair: "xbtusd".into(),
            direction: Direction::Sell,
            order_type: OrderType::TrailingStop,
            volume: 0.25,
            price: 0.0,
            price2: 5.0,
        };
        let params = order_params(&request);
        assert!(params.contains(&("ordertype", "trailing-stop".to_string())));
        assert!(params.contains(&("price", "+5".to_string())));
        assert!(params.contains(&("pair", "XBTUSD".to_string())));
    }

    #[tokio::test]
    async fn test_ohlc_keeps_latest_rows() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/0/public/OHLC")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("pair".into(), "XBTUSD".into()),
                Matcher::UrlEncoded("interval".into(), "15".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "error": [],
                    "result": {
                        "XXBTZUSD": [
                            [1700000000, "100.0", "102.0", "99.0", "101.0", "100.5", "4.0", 10],
                            [1700000900, "101.0", "103.0", "100.0", "102.0", "101.5", "5.5", 12],
                            [1700001800, "102.0", "104.0", "101.0", "103.0", "102.5", "6.0", 9]
                        ],
                        "last": 1700001800
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let candles = connector(&server, None)
            .ohlc("xbtusd", Period::M15, 2)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(candles.len(), 2);
        assert!(candles[0].time < candles[1].time);
        assert_eq!(candles[0].open, 101.0);
        assert_eq!(candles[0].high, 103.0);
        assert_eq!(candles[0].low, 100.0);
        assert_eq!(candles[0].close, 102.0);
        assert_eq!(candles[1].volume, 6.0);
    }

    #[tokio::test]
    async fn test_ohlc_rejects_unsupported_period() {
        let server = mockito::Server::new_async().await;
        let err = connector(&server, None)
            .ohlc("xbtusd", Period::H3, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_ticker_reads_first_elements() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/0/public/Ticker")
            .match_query(Matcher::UrlEncoded("pair".into(), "XBTUSD".into()))
            .with_status(200)
            .with_body(
                json!({
                    "error": [],
                    "result": {
                        "XXBTZUSD": {
                            "a": ["30300.10000", "1", "1.000"],
                            "b": ["30300.00000", "1", "1.000"],
                            "c": ["30303.20000", "0.00067643"],
                            "v": ["4083.67001100", "4412.73601799"],
                            "p": ["30706.77771", "30689.13205"],
                            "t": [34619, 38907],
                            "l": ["29868.30000", "29868.30000"],
                            "h": ["31631.00000", "31631.00000"],
                            "o": "30502.80000"
                        }
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let ticker = connector(&server, None).ticker("xbtusd").await.unwrap();
        assert_eq!(ticker.last, 30303.2);
        assert_eq!(ticker.ask, 30300.1);
        assert_eq!(ticker.bid, 30300.0);
        assert_eq!(ticker.low, 29868.3);
        assert_eq!(ticker.volume, 4083.67001100);
    }

    #[tokio::test]
    async fn test_pairs_keyed_by_altname() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/0/public/AssetPairs")
            .with_status(200)
            .with_body(
                json!({
                    "error": [],
                    "result": {
                        "XXBTZUSD": {"altname": "XBTUSD", "pair_decimals": 1, "ordermin": "0.0001"},
                        "XETHZUSD": {"altname": "ETHUSD", "pair_decimals": 2}
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let pairs = connector(&server, None).pairs().await.unwrap();
        assert_eq!(pairs["xbtusd"].precision, 1);
        assert_eq!(pairs["xbtusd"].min_order_size, 0.0001);
        assert_eq!(pairs["ethusd"].min_order_size, 0.0);
        assert_eq!(pairs["ethusd"].max_order_size, 0.0);
    }

    #[tokio::test]
    async fn test_error_list_becomes_exchange_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/0/public/Ticker")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"error":["EQuery:Unknown asset pair"]}"#)
            .create_async()
            .await;

        let err = connector(&server, None).ticker("nope").await.unwrap_err();
        assert!(matches!(err, ConnectorError::Exchange(msg) if msg == "EQuery:Unknown asset pair"));
    }

    #[tokio::test]
    async fn test_private_endpoint_requires_credentials() {
        let server = mockito::Server::new_async().await;
        let err = connector(&server, None).balance().await.unwrap_err();
        assert!(matches!(err, ConnectorError::MissingCredentials));
    }

    #[tokio::test]
    async fn test_fees_are_signed_and_converted_from_percent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/0/private/TradeVolume")
            .match_header("API-Key", "test-key")
            .match_header("API-Sign", Matcher::Regex("^[A-Za-z0-9+/]{86}==$".into()))
            .match_body(Matcher::Regex("^nonce=[0-9]+&pair=XBTUSD&fee-info=true$".into()))
            .with_status(200)
            .with_body(
                json!({
                    "error": [],
                    "result": {
                        "currency": "ZUSD",
                        "volume": "0.0000",
                        "fees": {"XXBTZUSD": {"fee": "0.2600"}},
                        "fees_maker": {"XXBTZUSD": {"fee": "0.1600"}}
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let fees = connector(&server, credentials()).fees().await.unwrap();
        mock.assert_async().await;
        assert!((fees.taker - 0.0026).abs() < 1e-12);
        assert!((fees.maker - 0.0016).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_add_order_returns_pending_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/0/private/AddOrder")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("ordertype=limit".into()),
                Matcher::Regex("oflags=post".into()),
                Matcher::Regex("price=30000".into()),
                Matcher::Regex("volume=0.50000000".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "error": [],
                    "result": {
                        "descr": {"order": "buy 0.50000000 XBTUSD @ limit 30000.0"},
                        "txid": ["OUF4EM-FRGI2-MQMWZD"]
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let request = OrderRequest {
            pair: "xbtusd".into(),
            direction: Direction::Buy,
            order_type: OrderType::Limit,
            volume: 0.5,
            price: 30000.0,
            price2: 0.0,
        };
        let orders = connector(&server, credentials())
            .add_order(&request)
            .await
            .unwrap();

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id.as_deref(), Some("OUF4EM-FRGI2-MQMWZD"));
        assert_eq!(orders[0].state, OrderState::Pending);
        assert_eq!(orders[0].remaining, 0.5);
    }

    #[tokio::test]
    async fn test_order_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/0/private/QueryOrders")
            .match_body(Matcher::Regex("txid=OBCMZD-JIEE7-77TH3F".into()))
            .with_status(200)
            .with_body(
                json!({
                    "error": [],
                    "result": {
                        "OBCMZD-JIEE7-77TH3F": {
                            "status": "closed",
                            "vol": "1.25000000",
                            "vol_exec": "1.25000000",
                            "cost": "37526.2",
                            "fee": "37.5",
                            "price": "30021.0",
                            "descr": {
                                "pair": "XBTUSD",
                                "type": "sell",
                                "ordertype": "stop-loss",
                                "price": "30000.0",
                                "price2": "0"
                            }
                        }
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let order = connector(&server, credentials())
            .order_status("OBCMZD-JIEE7-77TH3F")
            .await
            .unwrap();

        assert_eq!(order.state, OrderState::Confirmed);
        assert_eq!(order.direction, Direction::Sell);
        assert_eq!(order.order_type, OrderType::Stop);
        assert_eq!(order.pair, "xbtusd");
        assert_eq!(order.executed_volume, 1.25);
        assert_eq!(order.avg_price, 30021.0);
        assert_eq!(order.remaining, 0.0);
    }

    #[test]
    fn test_order_states() {
        assert_eq!(parse_state("open").unwrap(), OrderState::Pending);
        assert_eq!(parse_state("expired").unwrap(), OrderState::Cancelled);
        assert!(parse_state("unknown").is_err());
    }
}
