use async_trait::async_trait;

use super::{Strategy, StrategyParams};
use crate::error::StartupError;
use crate::execution::OrderLedger;
use crate::models::{OrderParams, OrderType};
use crate::Result;

const SLOT: &str = "trailing";

/// Alternating trailing-stop buys and sells with a fixed offset
#[derive(Debug, Clone, Default)]
pub struct TrailingStrategy {
    offset: f64,
}

impl TrailingStrategy {
    pub fn new(offset: f64) -> Self {
        Self { offset }
    }
}

#[async_trait]
impl Strategy for TrailingStrategy {
    fn name(&self) -> &str {
        "trailing"
    }

    fn configure(&mut self, params: &StrategyParams) -> std::result::Result<(), StartupError> {
        params.check_known(&["offset"])?;
        self.offset = params.require("offset")?;
        if self.offset <= 0.0 {
            return Err(StartupError::InvalidParam {
                name: "offset".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    async fn run(&mut self, ledger: &mut OrderLedger) -> Result<Option<Box<dyn Strategy>>> {
        let last = ledger.market_mut().ticker().await?.last;

        if ledger.pending(SLOT).is_none() {
            let params = OrderParams::offset(self.offset);
            if ledger.position(SLOT).is_some() {
                ledger
                    .order_sell(SLOT, OrderType::TrailingStop, params)
                    .await?;
            } else {
                ledger.order_buy(SLOT, OrderType::TrailingStop, params).await?;
            }
        }

        tracing::info!(last, order = ?ledger.pending(SLOT).map(|o| o.to_string()), "Trailing");
        Ok(None)
    }
}
