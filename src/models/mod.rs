use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StartupError;

/// Side of an order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "buy"),
            Direction::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    TrailingStop,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
            OrderType::Stop => write!(f, "stop"),
            OrderType::TrailingStop => write!(f, "trailing-stop"),
        }
    }
}

/// Lifecycle of a single exchange order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Pending,
    Confirmed,
    Cancelled,
}

/// State of a named order slot as seen by a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    NotFound,
    Pending,
    Confirmed,
    Cancelled,
}

/// One exchange order, as reported by a backend
///
/// Prices left at `0.0` are unset. `id` is `None` for orders that never
/// reached an exchange (simulated orders).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderStatus {
    pub id: Option<String>,
    pub direction: Direction,
    pub order_type: OrderType,
    pub pair: String,
    pub state: OrderState,
    pub volume: f64,
    pub executed_volume: f64,
    pub price: f64,
    pub price2: f64,
    pub avg_price: f64,
    pub remaining: f64,
    pub pivot: Option<f64>,
}

impl OrderStatus {
    /// Fresh pending order for a request, nothing executed yet
    pub fn pending(request: &OrderRequest) -> Self {
        Self {
            id: None,
            direction: request.direction,
            order_type: request.order_type,
            pair: request.pair.clone(),
            state: OrderState::Pending,
            volume: request.volume,
            executed_volume: 0.0,
            price: request.price,
            price2: request.price2,
            avg_price: 0.0,
            remaining: request.volume,
            pivot: None,
        }
    }

    /// Executed volume valued at the average fill price (or the order price if unset)
    pub fn cost(&self) -> f64 {
        let price = if self.avg_price != 0.0 {
            self.avg_price
        } else {
            self.price
        };
        self.executed_volume * price
    }

    /// Mark the order as fully filled at `price`
    pub fn fill(&mut self, price: f64) {
        self.state = OrderState::Confirmed;
        self.executed_volume = self.volume;
        self.remaining = 0.0;
        self.avg_price = price;
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} {} {:.5}/{:.5} {} @ {:.5}, avg {:.5}",
            self.state,
            self.direction,
            self.order_type,
            self.executed_volume,
            self.volume,
            self.pair,
            self.price,
            self.avg_price
        )
    }
}

/// What gets sent to a backend when the ledger submits an order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub pair: String,
    pub direction: Direction,
    pub order_type: OrderType,
    pub volume: f64,
    pub price: f64,
    pub price2: f64,
}

/// Optional knobs of an order intent. Zero means "not set".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrderParams {
    pub volume: f64,
    pub price: f64,
    pub price2: f64,
}

impl OrderParams {
    pub fn at(price: f64) -> Self {
        Self {
            price,
            ..Default::default()
        }
    }

    pub fn offset(price2: f64) -> Self {
        Self {
            price2,
            ..Default::default()
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }
}

/// Best bid/ask/last snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticker {
    pub time: DateTime<Utc>,
    pub ask: f64,
    pub bid: f64,
    pub last: f64,
    pub low: f64,
    pub high: f64,
    pub volume: f64,
}

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Trading rules of an instrument
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairInfo {
    pub name: String,
    pub precision: u32,
    pub min_order_size: f64,
    /// `0.0` when the exchange reports no maximum
    pub max_order_size: f64,
}

/// Fee schedule as fractions (0.001 = 0.1%)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Fees {
    pub maker: f64,
    pub taker: f64,
}

impl Fees {
    /// Maker fee for limit orders, taker fee for everything else
    pub fn rate(&self, order_type: OrderType) -> f64 {
        match order_type {
            OrderType::Limit => self.maker,
            _ => self.taker,
        }
    }
}

impl Default for Fees {
    fn default() -> Self {
        Self {
            maker: 0.001,
            taker: 0.002,
        }
    }
}

/// Ledger balance: `available` excludes capital committed to open slots
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Balance {
    pub available: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletBalance {
    pub currency: String,
    pub amount: f64,
    pub available: f64,
}

/// Candle period
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Period {
    M1,
    M5,
    M15,
    M30,
    H1,
    H3,
    H6,
    H12,
    D1,
}

impl Period {
    pub fn minutes(&self) -> i64 {
        match self {
            Period::M1 => 1,
            Period::M5 => 5,
            Period::M15 => 15,
            Period::M30 => 30,
            Period::H1 => 60,
            Period::H3 => 180,
            Period::H6 => 360,
            Period::H12 => 720,
            Period::D1 => 1440,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::M1 => "1m",
            Period::M5 => "5m",
            Period::M15 => "15m",
            Period::M30 => "30m",
            Period::H1 => "1h",
            Period::H3 => "3h",
            Period::H6 => "6h",
            Period::H12 => "12h",
            Period::D1 => "1D",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = StartupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Period::M1),
            "5m" | "5" => Ok(Period::M5),
            "15m" | "15" => Ok(Period::M15),
            "30m" | "30" => Ok(Period::M30),
            "1h" => Ok(Period::H1),
            "3h" => Ok(Period::H3),
            "6h" => Ok(Period::H6),
            "12h" => Ok(Period::H12),
            "1D" | "1d" => Ok(Period::D1),
            other => Err(StartupError::InvalidPeriod(other.to_string())),
        }
    }
}
