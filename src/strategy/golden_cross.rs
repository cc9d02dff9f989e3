use async_trait::async_trait;

use super::{positive, Strategy, StrategyParams};
use crate::error::StartupError;
use crate::execution::OrderLedger;
use crate::indicators::{crossover, crossunder, sma};
use crate::models::{OrderParams, OrderType};
use crate::Result;

const SLOT: &str = "golden-cross";

/// SMA crossing strategy: buy on the golden cross, sell on the death cross
#[derive(Debug, Clone)]
pub struct GoldenCrossStrategy {
    fast: usize,
    slow: usize,
}

impl GoldenCrossStrategy {
    pub fn new(fast: usize, slow: usize) -> Self {
        Self { fast, slow }
    }
}

impl Default for GoldenCrossStrategy {
    fn default() -> Self {
        Self::new(50, 200)
    }
}

#[async_trait]
impl Strategy for GoldenCrossStrategy {
    fn name(&self) -> &str {
        "golden-cross"
    }

    fn configure(&mut self, params: &StrategyParams) -> std::result::Result<(), StartupError> {
        params.check_known(&["fast", "slow"])?;
        self.fast = positive("fast", params.get("fast", self.fast)?)?;
        self.slow = positive("slow", params.get("slow", self.slow)?)?;
        if self.fast >= self.slow {
            return Err(StartupError::InvalidParam {
                name: "fast".to_string(),
                reason: format!("must be below slow ({})", self.slow),
            });
        }
        Ok(())
    }

    async fn run(&mut self, ledger: &mut OrderLedger) -> Result<Option<Box<dyn Strategy>>> {
        // Partial windows cover a slow SMA longer than the cache
        let lookback = (self.slow + 1).min(ledger.market().history_limit());
        let close = ledger.market_mut().close(lookback).await?;

        let fast = sma(&close, self.fast);
        let slow = sma(&close, self.slow);
        let golden = crossover(&fast, &slow);
        let death = crossunder(&fast, &slow);

        tracing::debug!(golden, death, "SMA {}/{}", self.fast, self.slow);

        let pending = ledger.pending(SLOT).is_some();
        let holding = ledger.position(SLOT).is_some();

        if golden && !holding && !pending {
            ledger
                .order_buy(SLOT, OrderType::Market, OrderParams::default())
                .await?;
        } else if death && holding && !pending {
            ledger
                .order_sell(SLOT, OrderType::Market, OrderParams::default())
                .await?;
        } else if pending && !golden && !death {
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
    async fn test_buys_only_on_the_cross() {
        // flat, then a jump that pulls the fast SMA through the slow one
        let mut closes = vec![100.0; 10];
        closes.extend([100.0, 110.0, 111.0, 112.0]);
        let candles = SyntheticDataGenerator::from_closes(&closes, 15);
        let mut ledger = paper_ledger(candles, 10, 1000.0, 20);
        let mut strategy = GoldenCrossStrategy::new(2, 5);

        // 100 after flat history: no cross
        strategy.run(&mut ledger).await.unwrap();
        assert_eq!(ledger.order_status(SLOT), SlotStatus::NotFound);
        ledger.update().await.unwrap();

        ledger.market_mut().invalidate();
        strategy.run(&mut ledger).await.unwrap();
        ledger.update().await.unwrap();
        assert!(ledger.position(SLOT).is_some());

        // fast stays above slow, nothing else happens
        ledger.market_mut().invalidate();
        strategy.run(&mut ledger).await.unwrap();
        assert!(ledger.pending(SLOT).is_none());
    }
}
