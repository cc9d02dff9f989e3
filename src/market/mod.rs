use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::api::ExchangeConnector;
use crate::error::{ConnectorError, LedgerError};
use crate::models::{Candle, PairInfo, Period, Ticker};

/// Per-tick cache of the ticker and candle history of one pair
///
/// Data is fetched lazily on first access and then held fixed until
/// `invalidate()` is called, so everything read during a tick sees the same
/// snapshot. The ticker and the candles are cached separately: a failed
/// candle fetch does not throw away (and re-request) a ticker that was
/// already received.
pub struct MarketData {
    connector: Arc<dyn ExchangeConnector>,
    pair: PairInfo,
    period: Period,
    history_limit: usize,
    ticker: Option<Ticker>,
    candles: Option<Vec<Candle>>,
    last_seen: Option<DateTime<Utc>>,
}

impl MarketData {
    /// Create a cache for `pair`
    ///
    /// # Arguments
    /// * `history_limit` - Maximum number of candles strategies may request
    pub fn new(
        connector: Arc<dyn ExchangeConnector>,
        pair: PairInfo,
        period: Period,
        history_limit: usize,
    ) -> Self {
        Self {
            connector,
            pair,
            period,
            history_limit,
            ticker: None,
            candles: None,
            last_seen: None,
        }
    }

    pub fn connector(&self) -> &Arc<dyn ExchangeConnector> {
        &self.connector
    }

    pub fn pair(&self) -> &PairInfo {
        &self.pair
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Drop the snapshot; the next read fetches fresh data
    pub fn invalidate(&mut self) {
        self.ticker = None;
        self.candles = None;
    }

    /// Market time of the latest ticker, or the wall clock before the first fetch
    pub fn clock(&self) -> DateTime<Utc> {
        self.last_seen.unwrap_or_else(Utc::now)
    }

    pub async fn ticker(&mut self) -> Result<Ticker, ConnectorError> {
        if let Some(ticker) = &self.ticker {
            return Ok(ticker.clone());
        }

        let ticker = self.connector.ticker(&self.pair.name).await?;
        tracing::debug!(pair = %self.pair.name, last = ticker.last, "Ticker refreshed");
        self.last_seen = Some(ticker.time);
        self.ticker = Some(ticker.clone());
        Ok(ticker)
    }

    /// The most recent `limit` candles, oldest first
    pub async fn ohlc(&mut self, limit: usize) -> Result<Vec<Candle>, LedgerError> {
        if limit > self.history_limit {
            return Err(LedgerError::LimitExceeded {
                requested: limit,
                max: self.history_limit,
            });
        }

        // Ticker first: on replayed data it is what advances the clock
        self.ticker().await?;

        if self.candles.is_none() {
            let candles = self
                .connector
                .ohlc(&self.pair.name, self.period, self.history_limit)
                .await?;
            self.candles = Some(candles);
        }

        let candles = self.candles.as_deref().unwrap_or_default();
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }

    async fn series<F>(&mut self, limit: usize, f: F) -> Result<Vec<f64>, LedgerError>
    where
        F: Fn(&Candle) -> f64,
    {
        Ok(self.ohlc(limit).await?.iter().map(f).collect())
    }

    pub async fn open(&mut self, limit: usize) -> Result<Vec<f64>, LedgerError> {
        self.series(limit, |c| c.open).await
    }

    pub async fn high(&mut self, limit: usize) -> Result<Vec<f64>, LedgerError> {
        self.series(limit, |c| c.high).await
    }

    pub async fn low(&mut self, limit: usize) -> Result<Vec<f64>, LedgerError> {
        self.series(limit, |c| c.low).await
    }

    pub async fn close(&mut self, limit: usize) -> Result<Vec<f64>, LedgerError> {
        self.series(limit, |c| c.close).await
    }

    pub async fn volume(&mut self, limit: usize) -> Result<Vec<f64>, LedgerError> {
        self.series(limit, |c| c.volume).await
    }

    pub async fn hl2(&mut self, limit: usize) -> Result<Vec<f64>, LedgerError> {
        self.series(limit, |c| (c.high + c.low) / 2.0).await
    }

    pub async fn hlc3(&mut self, limit: usize) -> Result<Vec<f64>, LedgerError> {
        self.series(limit, |c| (c.high + c.low + c.close) / 3.0).await
    }

    pub async fn ohlc4(&mut self, limit: usize) -> Result<Vec<f64>, LedgerError> {
        self.series(limit, |c| (c.open + c.high + c.low + c.close) / 4.0)
            .await
    }
}
