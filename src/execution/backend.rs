use async_trait::async_trait;

use crate::error::ConnectorError;
use crate::market::MarketData;
use crate::models::{Direction, OrderRequest, OrderState, OrderStatus, OrderType};

/// Where the ledger's orders are executed
///
/// The ledger never branches on the backend kind; the same strategy code
/// trades live or on paper depending on which implementation it is given.
#[async_trait]
pub trait Backend: Send {
    fn name(&self) -> &str;

    /// Submit an order. More than one status means an OCO order.
    async fn add_order(
        &mut self,
        request: &OrderRequest,
        market: &mut MarketData,
    ) -> Result<Vec<OrderStatus>, ConnectorError>;

    async fn cancel_order(
        &mut self,
        order: &OrderStatus,
        market: &mut MarketData,
    ) -> Result<(), ConnectorError>;

    /// Current state of `order`. The input is never modified.
    async fn order_status(
        &mut self,
        order: &OrderStatus,
        market: &mut MarketData,
    ) -> Result<OrderStatus, ConnectorError>;
}

/// Pass-through to the exchange connector behind the market data
#[derive(Debug, Default)]
pub struct LiveBackend;

impl LiveBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Backend for LiveBackend {
    fn name(&self) -> &str {
        "live"
    }

    async fn add_order(
        &mut self,
        request: &OrderRequest,
        market: &mut MarketData,
    ) -> Result<Vec<OrderStatus>, ConnectorError> {
        market.connector().add_order(request).await
    }

    async fn cancel_order(
        &mut self,
        order: &OrderStatus,
        market: &mut MarketData,
    ) -> Result<(), ConnectorError> {
        let id = order.id.as_deref().ok_or(ConnectorError::MissingOrderId)?;
        market.connector().cancel_order(id).await
    }

    async fn order_status(
        &mut self,
        order: &OrderStatus,
        market: &mut MarketData,
    ) -> Result<OrderStatus, ConnectorError> {
        let id = order.id.as_deref().ok_or(ConnectorError::MissingOrderId)?;
        let mut status = market.connector().order_status(id).await?;
        // not echoed back by the exchange
        status.price2 = order.price2;
        Ok(status)
    }
}

/// Paper trading: fills computed from the cached ticker, no network orders
///
/// Fill rules, evaluated against `ticker.last` whenever the status is queried:
/// * market fills at once at last
/// * limit fills at its price once last has moved through it favourably
/// * stop fills at last once last has moved through it adversely
/// * trailing-stop ratchets a pivot (running min for buys, max for sells)
///   and fills at last once price has moved `price2` away from the pivot
#[derive(Debug, Default)]
pub struct SimulatedBackend;

impl SimulatedBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Apply the fill rules to a pending order at price `last`
fn simulate_fill(order: &mut OrderStatus, last: f64) {
    let buy = order.direction == Direction::Buy;

    match order.order_type {
        OrderType::Market => order.fill(last),
        OrderType::Limit => {
            if (buy && last <= order.price) || (!buy && last >= order.price) {
                let price = order.price;
                order.fill(price);
            }
        }
        OrderType::Stop => {
            if (buy && last >= order.price) || (!buy && last <= order.price) {
                order.fill(last);
            }
        }
        OrderType::TrailingStop => {
            let pivot = order.pivot.unwrap_or(last);
            let pivot = if buy { pivot.min(last) } else { pivot.max(last) };
            order.pivot = Some(pivot);

            let triggered = if buy {
                last >= pivot + order.price2
            } else {
                last <= pivot - order.price2
            };
            if triggered {
                order.fill(last);
            }
        }
    }
}

#[async_trait]
impl Backend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn add_order(
        &mut self,
        request: &OrderRequest,
        market: &mut MarketData,
    ) -> Result<Vec<OrderStatus>, ConnectorError> {
        let ticker = market.ticker().await?;
        let mut order = OrderStatus::pending(request);
        if order.order_type == OrderType::TrailingStop {
            order.pivot = Some(ticker.last);
        }

        tracing::debug!(
            pair = %request.pair,
            last = ticker.last,
            "Simulated {} {} order for {:.8}",
            request.direction,
            request.order_type,
            request.volume
        );
        Ok(vec![order])
    }

    async fn cancel_order(
        &mut self,
        _order: &OrderStatus,
        _market: &mut MarketData,
    ) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn order_status(
        &mut self,
        order: &OrderStatus,
        market: &mut MarketData,
    ) -> Result<OrderStatus, ConnectorError> {
        let mut status = order.clone();
        if status.state != OrderState::Pending {
            return Ok(status);
        }

        let ticker = market.ticker().await?;
        simulate_fill(&mut status, ticker.last);
        Ok(status)
    }
}
