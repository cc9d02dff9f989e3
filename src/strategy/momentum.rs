use async_trait::async_trait;

use super::{positive, Strategy, StrategyParams};
use crate::error::StartupError;
use crate::execution::OrderLedger;
use crate::indicators::momentum;
use crate::models::{Direction, OrderParams, OrderType};
use crate::Result;

const SLOT: &str = "momentum";

/// Momentum strategy
///
/// Uses the momentum of the close and the momentum of that momentum:
/// - both rising: stop buy at the last high
/// - both falling: stop sell at the last low
/// - mixed: any pending order is withdrawn
#[derive(Debug, Clone)]
pub struct MomentumStrategy {
    length: usize,
    epsilon: f64,
}

impl MomentumStrategy {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            epsilon: 1e-8,
        }
    }
}

impl Default for MomentumStrategy {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    fn configure(&mut self, params: &StrategyParams) -> std::result::Result<(), StartupError> {
        params.check_known(&["length", "epsilon"])?;
        self.length = positive("length", params.get("length", self.length)?)?;
        self.epsilon = params.get("epsilon", self.epsilon)?;
        Ok(())
    }

    async fn run(&mut self, ledger: &mut OrderLedger) -> Result<Option<Box<dyn Strategy>>> {
        let lookback = (self.length + 2).min(ledger.market().history_limit());
        let candles = ledger.market_mut().ohlc(lookback).await?;
        let Some(last) = candles.last() else {
            return Ok(None);
        };

        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let mom0 = momentum(&close, self.length);
        let mom1 = momentum(&mom0, 1);
        let (m0, m1) = (
            mom0.last().copied().unwrap_or_default(),
            mom1.last().copied().unwrap_or_default(),
        );

        tracing::debug!(close = last.close, mom0 = m0, mom1 = m1, "Momentum");

        let pending = ledger.pending(SLOT).map(|o| o.direction);
        let holding = ledger.position(SLOT).is_some();

        if m0 > self.epsilon && m1 > self.epsilon {
            if pending == Some(Direction::Sell) {
                ledger.cancel(SLOT).await?;
            } else if !holding && pending.is_none() {
                ledger
                    .order_buy(SLOT, OrderType::Stop, OrderParams::at(last.high))
                    .await?;
            }
        } else if m0 < -self.epsilon && m1 < -self.epsilon {
            if pending == Some(Direction::Buy) {
                ledger.cancel(SLOT).await?;
            } else if holding && pending.is_none() {
                ledger
                    .order_sell(SLOT, OrderType::Stop, OrderParams::at(last.low))
                    .await?;
            }
        } else if pending.is_some() {
            ledger.cancel(SLOT).await?;
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{paper_ledger, SyntheticDataGenerator};
    use crate::models::SlotStatus;

    #[tokio::test]
    async fn test_pending_buy_withdrawn_when_momentum_fades() {
        // accelerating rise, then flat
        let closes = vec![100.0, 100.0, 101.0, 103.0, 106.0, 106.0, 106.0];
        let candles = SyntheticDataGenerator::from_closes(&closes, 15);
        let mut ledger = paper_ledger(candles, 4, 1000.0, 10);
        let mut strategy = MomentumStrategy::new(2);

        // 106: mom0 = 5, mom1 = 5 - 3 = 2
        strategy.run(&mut ledger).await.unwrap();
        let order = ledger.pending(SLOT).unwrap();
        assert_eq!(order.direction, Direction::Buy);
        assert_eq!(order.order_type, OrderType::Stop);

        // 106 again: mom0 = 3, mom1 = -2 -> mixed
        ledger.market_mut().invalidate();
        strategy.run(&mut ledger).await.unwrap();
        assert_eq!(ledger.order_status(SLOT), SlotStatus::Cancelled);
    }
}
