// Exchange connectors
pub mod bitfinex;
pub mod kraken;
pub mod replay;

pub use bitfinex::BitfinexConnector;
pub use kraken::KrakenConnector;
pub use replay::ReplayConnector;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ConnectorError, StartupError};
use crate::models::{
    Candle, Fees, OrderRequest, OrderStatus, PairInfo, Period, Ticker, WalletBalance,
};

/// Normalized view of one exchange's REST API
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    fn name(&self) -> &str;

    /// Time-ascending candles, at most `limit` of them
    async fn ohlc(
        &self,
        pair: &str,
        period: Period,
        limit: usize,
    ) -> Result<Vec<Candle>, ConnectorError>;

    async fn ticker(&self, pair: &str) -> Result<Ticker, ConnectorError>;

    /// Tradable pairs keyed by lowercase pair name
    async fn pairs(&self) -> Result<HashMap<String, PairInfo>, ConnectorError>;

    async fn balance(&self) -> Result<Vec<WalletBalance>, ConnectorError>;

    async fn fees(&self) -> Result<Fees, ConnectorError>;

    /// Submit an order. More than one status is returned only for OCO orders.
    async fn add_order(&self, request: &OrderRequest) -> Result<Vec<OrderStatus>, ConnectorError>;

    async fn cancel_order(&self, id: &str) -> Result<(), ConnectorError>;

    async fn order_status(&self, id: &str) -> Result<OrderStatus, ConnectorError>;
}

/// API key and secret for private endpoints
#[derive(Clone)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

impl Credentials {
    /// Read `<EXCHANGE>_API_KEY` / `<EXCHANGE>_API_SECRET`, if both are set
    pub fn from_env(exchange: &str) -> Option<Self> {
        let prefix = exchange.to_uppercase();
        let key = std::env::var(format!("{}_API_KEY", prefix)).ok()?;
        let secret = std::env::var(format!("{}_API_SECRET", prefix)).ok()?;
        if key.is_empty() || secret.is_empty() {
            return None;
        }
        Some(Self { key, secret })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"***")
            .finish()
    }
}

/// Build a connector by exchange name
pub fn connect(
    name: &str,
    credentials: Option<Credentials>,
) -> Result<Arc<dyn ExchangeConnector>, StartupError> {
    match name.to_lowercase().as_str() {
        "bitfinex" => Ok(Arc::new(BitfinexConnector::new(credentials)?)),
        "kraken" => Ok(Arc::new(KrakenConnector::new(credentials)?)),
        _ => Err(StartupError::UnknownExchange(name.to_string())),
    }
}
