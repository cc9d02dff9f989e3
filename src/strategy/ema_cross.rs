use async_trait::async_trait;

use super::{positive, Strategy, StrategyParams};
use crate::error::StartupError;
use crate::execution::OrderLedger;
use crate::indicators::ema;
use crate::models::{OrderParams, OrderType};
use crate::Result;

const SLOT: &str = "ema";

/// Trend following on two EMAs
///
/// Holds a position while the fast EMA is above the slow one.
#[derive(Debug, Clone)]
pub struct EmaCrossStrategy {
    fast: usize,
    slow: usize,
}

impl EmaCrossStrategy {
    pub fn new(fast: usize, slow: usize) -> Self {
        Self { fast, slow }
    }
}

impl Default for EmaCrossStrategy {
    fn default() -> Self {
        Self::new(12, 26)
    }
}

#[async_trait]
impl Strategy for EmaCrossStrategy {
    fn name(&self) -> &str {
        "ema"
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
        let lookback = ledger.market().history_limit();
        let close = ledger.market_mut().close(lookback).await?;
        if close.len() < 2 {
            return Ok(None);
        }

        let fast = ema(&close, self.fast).last().copied().unwrap_or_default();
        let slow = ema(&close, self.slow).last().copied().unwrap_or_default();
        tracing::debug!(close = close[close.len() - 1], fast, slow, "EMA");

        if ledger.pending(SLOT).is_some() {
            return Ok(None);
        }

        let holding = ledger.position(SLOT).is_some();
        if fast > slow && !holding {
            ledger
                .order_buy(SLOT, OrderType::Market, OrderParams::default())
                .await?;
        } else if fast < slow && holding {
            ledger
                .order_sell(SLOT, OrderType::Market, OrderParams::default())
                .await?;
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
    fn test_fast_must_be_below_slow() {
        let mut strategy = EmaCrossStrategy::default();
        let params = StrategyParams::new().with("fast", "30");
        assert!(strategy.configure(&params).is_err());
    }

    #[tokio::test]
    async fn test_buys_in_uptrend_and_sells_on_reversal() {
        let mut closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        closes.extend((0..30).map(|i| 129.0 - 2.0 * i as f64));
        let candles = SyntheticDataGenerator::from_closes(&closes, 15);
        let mut ledger = paper_ledger(candles, 29, 1000.0, 50);
        let mut strategy = EmaCrossStrategy::new(3, 8);

        strategy.run(&mut ledger).await.unwrap();
        assert_eq!(ledger.order_status(SLOT), SlotStatus::Pending);
        ledger.update().await.unwrap();
        assert!(ledger.position(SLOT).is_some());

        for _ in 0..10 {
            ledger.market_mut().invalidate();
            strategy.run(&mut ledger).await.unwrap();
            ledger.update().await.unwrap();
        }
        assert!(ledger.position(SLOT).is_none());
        assert_eq!(ledger.closed_trades().len(), 1);
    }
}
