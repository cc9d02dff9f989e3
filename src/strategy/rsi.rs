use async_trait::async_trait;

use super::{positive, Strategy, StrategyParams};
use crate::error::StartupError;
use crate::execution::OrderLedger;
use crate::indicators::{crossover_level, crossunder_level, rsi};
use crate::models::{OrderParams, OrderType};
use crate::Result;

const SLOT: &str = "rsi";

/// Mean reversion on RSI levels
///
/// Buys when RSI climbs back above the oversold level and sells when it
/// drops back below the overbought level.
#[derive(Debug, Clone)]
pub struct RsiStrategy {
    length: usize,
    oversold: f64,
    overbought: f64,
}

impl RsiStrategy {
    pub fn new(length: usize, oversold: f64, overbought: f64) -> Self {
        Self {
            length,
            oversold,
            overbought,
        }
    }
}

impl Default for RsiStrategy {
    fn default() -> Self {
        Self::new(14, 30.0, 70.0)
    }
}

#[async_trait]
impl Strategy for RsiStrategy {
    fn name(&self) -> &str {
        "rsi"
    }

    fn configure(&mut self, params: &StrategyParams) -> std::result::Result<(), StartupError> {
        params.check_known(&["length", "oversold", "overbought"])?;
        self.length = positive("length", params.get("length", self.length)?)?;
        self.oversold = params.get("oversold", self.oversold)?;
        self.overbought = params.get("overbought", self.overbought)?;

        if !(0.0..self.overbought).contains(&self.oversold) || self.overbought > 100.0 {
            return Err(StartupError::InvalidParam {
                name: "oversold".to_string(),
                reason: format!(
                    "need 0 <= oversold < overbought <= 100, got {} / {}",
                    self.oversold, self.overbought
                ),
            });
        }
        Ok(())
    }

    async fn run(&mut self, ledger: &mut OrderLedger) -> Result<Option<Box<dyn Strategy>>> {
        let lookback = ledger.market().history_limit();
        let close = ledger.market_mut().close(lookback).await?;
        // the first valid RSI value sits at index `length`
        if close.len() < self.length + 2 {
            tracing::debug!(candles = close.len(), "Not enough history for RSI");
            return Ok(None);
        }

        let values = rsi(&close, self.length);
        let current = values[values.len() - 1];
        tracing::debug!(rsi = current, "RSI");

        if ledger.pending(SLOT).is_some() {
            return Ok(None);
        }
        let holding = ledger.position(SLOT).is_some();

        if !holding && crossover_level(&values, self.oversold) {
            ledger
                .order_buy(SLOT, OrderType::Market, OrderParams::default())
                .await?;
        } else if holding && crossunder_level(&values, self.overbought) {
            ledger
                .order_sell(SLOT, OrderType::Market, OrderParams::default())
                .await?;
        }

        Ok(None)
    }
}
