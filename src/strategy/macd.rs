use async_trait::async_trait;

use super::{positive, Strategy, StrategyParams};
use crate::error::StartupError;
use crate::execution::OrderLedger;
use crate::indicators::macd;
use crate::models::{Direction, OrderParams, OrderType};
use crate::Result;

const SLOT: &str = "macd";

/// MACD crossing strategy
///
/// Enters with a stop buy at the last high when MACD is above its signal by
/// more than `epsilon`, exits with a stop sell at the last low when it is
/// below by more than `epsilon`. With `cross` set, the first entry waits
/// until MACD has been below its signal at least once.
#[derive(Debug, Clone)]
pub struct MacdStrategy {
    fast: usize,
    slow: usize,
    signal: usize,
    epsilon: f64,
    cross: bool,
    first_cross: bool,
}

impl MacdStrategy {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast,
            slow,
            signal,
            epsilon: 0.0,
            cross: false,
            first_cross: false,
        }
    }

    pub fn with_cross(mut self, cross: bool) -> Self {
        self.cross = cross;
        self
    }
}

impl Default for MacdStrategy {
    fn default() -> Self {
        Self::new(12, 26, 9)
    }
}

#[async_trait]
impl Strategy for MacdStrategy {
    fn name(&self) -> &str {
        "macd"
    }

    fn configure(&mut self, params: &StrategyParams) -> std::result::Result<(), StartupError> {
        params.check_known(&["fast", "slow", "signal", "epsilon", "cross"])?;
        self.fast = positive("fast", params.get("fast", self.fast)?)?;
        self.slow = positive("slow", params.get("slow", self.slow)?)?;
        self.signal = positive("signal", params.get("signal", self.signal)?)?;
        self.epsilon = params.get("epsilon", self.epsilon)?;
        self.cross = params.get("cross", self.cross)?;

        if self.epsilon < 0.0 {
            return Err(StartupError::InvalidParam {
                name: "epsilon".to_string(),
                reason: "must not be negative".to_string(),
            });
        }
        Ok(())
    }

    async fn run(&mut self, ledger: &mut OrderLedger) -> Result<Option<Box<dyn Strategy>>> {
        let lookback = ledger.market().history_limit();
        let candles = ledger.market_mut().ohlc(lookback).await?;
        let Some(last) = candles.last() else {
            return Ok(None);
        };

        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let m = macd(&close, self.fast, self.slow, self.signal);
        let line = m.line.last().copied().unwrap_or_default();
        let signal = m.signal.last().copied().unwrap_or_default();
        let diff = line - signal;

        if self.cross && !self.first_cross && line < signal {
            self.first_cross = true;
        }

        tracing::debug!(
            close = last.close,
            macd = line,
            signal,
            first_cross = self.first_cross,
            "MACD"
        );

        let pending = ledger.pending(SLOT).map(|o| o.direction);
        let holding = ledger.position(SLOT).is_some();

        if diff > self.epsilon && !holding && pending.is_none() {
            if self.cross && !self.first_cross {
                tracing::debug!("MACD above signal but no first cross yet");
            } else {
                ledger
                    .order_buy(SLOT, OrderType::Stop, OrderParams::at(last.high))
                    .await?;
            }
        } else if diff < -self.epsilon {
            if pending == Some(Direction::Buy) && !holding {
                ledger.cancel(SLOT).await?;
            } else if holding && pending.is_none() {
                ledger
                    .order_sell(SLOT, OrderType::Stop, OrderParams::at(last.low))
                    .await?;
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{paper_ledger, SyntheticDataGenerator};
    use crate::models::SlotStatus;

    #[test]
    fn test_configure() {
        let mut strategy = MacdStrategy::default();
        let params = StrategyParams::new()
            .with("fast", "6")
            .with("cross", "true")
            .with("epsilon", "0.5");
        strategy.configure(&params).unwrap();
        assert_eq!(strategy.fast, 6);
        assert!(strategy.cross);
        assert_eq!(strategy.epsilon, 0.5);

        let params = StrategyParams::new().with("cross", "maybe");
        assert!(strategy.configure(&params).is_err());
    }

    #[tokio::test]
    async fn test_stop_buy_at_last_high_in_uptrend() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let candles = SyntheticDataGenerator::from_closes(&closes, 15);
        let mut ledger = paper_ledger(candles, 39, 1000.0, 50);
        let mut strategy = MacdStrategy::new(3, 6, 3);

        strategy.run(&mut ledger).await.unwrap();
        let order = ledger.pending(SLOT).unwrap().clone();
        assert_eq!(order.order_type, OrderType::Stop);
        let high = ledger.market_mut().high(1).await.unwrap()[0];
        assert_eq!(order.price, high);
    }

    #[tokio::test]
    async fn test_cross_mode_waits_for_first_cross() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let candles = SyntheticDataGenerator::from_closes(&closes, 15);
        let mut ledger = paper_ledger(candles, 39, 1000.0, 50);
        let mut strategy = MacdStrategy::new(3, 6, 3).with_cross(true);

        strategy.run(&mut ledger).await.unwrap();
        assert_eq!(ledger.order_status(SLOT), SlotStatus::NotFound);
    }
}
