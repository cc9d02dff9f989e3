use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::ExchangeConnector;
use crate::error::ConnectorError;
use crate::models::{
    Candle, Fees, OrderRequest, OrderStatus, PairInfo, Period, Ticker, WalletBalance,
};

/// In-memory connector serving a fixed candle series
///
/// Every `ticker()` call reveals the next candle; `ohlc()` only ever returns
/// candles already revealed, so strategies cannot look ahead. Trading
/// endpoints are unsupported: orders on replayed data go through the
/// simulated backend.
pub struct ReplayConnector {
    pair: PairInfo,
    fees: Fees,
    candles: Vec<Candle>,
    revealed: AtomicUsize,
}

impl ReplayConnector {
    /// `warmup` candles are visible before the first ticker
    pub fn new(pair: PairInfo, candles: Vec<Candle>, warmup: usize) -> Self {
        let warmup = warmup.min(candles.len());
        Self {
            pair,
            fees: Fees::default(),
            candles,
            revealed: AtomicUsize::new(warmup),
        }
    }

    pub fn with_fees(mut self, fees: Fees) -> Self {
        self.fees = fees;
        self
    }

    /// Candles not yet revealed
    pub fn remaining(&self) -> usize {
        self.candles.len() - self.revealed.load(Ordering::SeqCst)
    }

    fn check_pair(&self, pair: &str) -> Result<(), ConnectorError> {
        if pair.eq_ignore_ascii_case(&self.pair.name) {
            Ok(())
        } else {
            Err(ConnectorError::Exchange(format!("unknown pair {}", pair)))
        }
    }
}

#[async_trait]
impl ExchangeConnector for ReplayConnector {
    fn name(&self) -> &str {
        "replay"
    }

    async fn ohlc(
        &self,
        pair: &str,
        _period: Period,
        limit: usize,
    ) -> Result<Vec<Candle>, ConnectorError> {
        self.check_pair(pair)?;
        let revealed = self.revealed.load(Ordering::SeqCst);
        let start = revealed.saturating_sub(limit);
        Ok(self.candles[start..revealed].to_vec())
    }

    async fn ticker(&self, pair: &str) -> Result<Ticker, ConnectorError> {
        self.check_pair(pair)?;
        let len = self.candles.len();
        let index = self
            .revealed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| (i < len).then_some(i + 1))
            .map_err(|_| ConnectorError::Exhausted)?;

        let candle = &self.candles[index];
        Ok(Ticker {
            time: candle.time,
            ask: candle.close,
            bid: candle.close,
            last: candle.close,
            low: candle.low,
            high: candle.high,
            volume: candle.volume,
        })
    }

    async fn pairs(&self) -> Result<HashMap<String, PairInfo>, ConnectorError> {
        Ok(HashMap::from([(self.pair.name.clone(), self.pair.clone())]))
    }

    async fn balance(&self) -> Result<Vec<WalletBalance>, ConnectorError> {
        Err(ConnectorError::Unsupported("balance"))
    }

    async fn fees(&self) -> Result<Fees, ConnectorError> {
        Ok(self.fees)
    }

    async fn add_order(&self, _request: &OrderRequest) -> Result<Vec<OrderStatus>, ConnectorError> {
        Err(ConnectorError::Unsupported("add_order"))
    }

    async fn cancel_order(&self, _id: &str) -> Result<(), ConnectorError> {
        Err(ConnectorError::Unsupported("cancel_order"))
    }

    async fn order_status(&self, _id: &str) -> Result<OrderStatus, ConnectorError> {
        Err(ConnectorError::Unsupported("order_status"))
    }
}
