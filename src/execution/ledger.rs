use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use super::backend::Backend;
use crate::error::{ConnectorError, LedgerError};
use crate::market::MarketData;
use crate::models::{
    Balance, Direction, Fees, OrderParams, OrderRequest, OrderState, OrderStatus, OrderType,
    SlotStatus,
};

/// Volumes are sent with 8 decimals
const VOLUME_SCALE: f64 = 1e8;

/// An order waiting for confirmation and the capital held back for it
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub order: OrderStatus,
    pub reserved: f64,
}

/// A confirmed buy that has not been sold yet
#[derive(Debug, Clone)]
pub struct Position {
    pub name: String,
    pub buy: OrderStatus,
    pub fee: f64,
    pub opened_at: DateTime<Utc>,
}

/// A buy and the sell that closed it
#[derive(Debug, Clone)]
pub struct ClosedTrade {
    pub id: Uuid,
    pub name: String,
    pub buy: OrderStatus,
    pub sell: OrderStatus,
    /// Sell cost minus buy cost, before fees
    pub pnl: f64,
    /// Fees of both legs
    pub fees: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl ClosedTrade {
    pub fn net_pnl(&self) -> f64 {
        self.pnl - self.fees
    }

    pub fn pnl_percent(&self) -> f64 {
        let cost = self.buy.cost();
        if cost == 0.0 {
            return 0.0;
        }
        self.net_pnl() / cost * 100.0
    }

    pub fn holding_minutes(&self) -> i64 {
        (self.closed_at - self.opened_at).num_minutes()
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Default)]
pub struct UpdateSummary {
    pub confirmed: Vec<String>,
    pub cancelled: Vec<String>,
    /// Orders whose status could not be fetched; left untouched
    pub failed: Vec<(String, ConnectorError)>,
}

/// Named order slots and the balance behind them
///
/// Capital is reserved when an order is submitted and realized when the
/// backend confirms it. For every reachable state
/// `available + committed == total`, where `committed` is the sum of pending
/// buy reservations and the cost of open positions.
pub struct OrderLedger {
    capital: f64,
    balance: f64,
    fees: Fees,
    market: MarketData,
    backend: Box<dyn Backend>,
    pending: HashMap<String, PendingOrder>,
    positions: HashMap<String, Position>,
    closed: Vec<ClosedTrade>,
    cancelled: Vec<(String, OrderStatus)>,
    slots: HashMap<String, SlotStatus>,
}

impl OrderLedger {
    pub fn new(capital: f64, fees: Fees, market: MarketData, backend: Box<dyn Backend>) -> Self {
        tracing::info!(
            capital,
            backend = backend.name(),
            pair = %market.pair().name,
            "Order ledger initialized"
        );

        Self {
            capital,
            balance: capital,
            fees,
            market,
            backend,
            pending: HashMap::new(),
            positions: HashMap::new(),
            closed: Vec::new(),
            cancelled: Vec::new(),
            slots: HashMap::new(),
        }
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn fees(&self) -> Fees {
        self.fees
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn market(&self) -> &MarketData {
        &self.market
    }

    pub fn market_mut(&mut self) -> &mut MarketData {
        &mut self.market
    }

    /// Capital held by pending buys and open positions
    pub fn committed(&self) -> f64 {
        let reserved: f64 = self.pending.values().map(|p| p.reserved).sum();
        let positions: f64 = self.positions.values().map(|p| p.buy.cost()).sum();
        reserved + positions
    }

    pub fn balance(&self) -> Balance {
        Balance {
            available: self.balance - self.committed(),
            total: self.balance,
        }
    }

    pub fn order_status(&self, name: &str) -> SlotStatus {
        if self.pending.contains_key(name) {
            return SlotStatus::Pending;
        }
        self.slots.get(name).copied().unwrap_or(SlotStatus::NotFound)
    }

    pub fn pending(&self, name: &str) -> Option<&OrderStatus> {
        self.pending.get(name).map(|p| &p.order)
    }

    pub fn position(&self, name: &str) -> Option<&Position> {
        self.positions.get(name)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed
    }

    pub fn cancelled_orders(&self) -> &[(String, OrderStatus)] {
        &self.cancelled
    }

    /// Largest volume `order_buy` accepts for this order, fee included
    ///
    /// Sized at the same quote price the buy reserves at, so with default
    /// params this is `available / (last * (1 + fee))`.
    pub async fn volume_max(
        &mut self,
        order_type: OrderType,
        params: &OrderParams,
    ) -> Result<f64, LedgerError> {
        let last = self.market.ticker().await?.last;
        Ok(self.max_volume_at(quote_price(order_type, params, last), order_type))
    }

    fn max_volume_at(&self, quote: f64, order_type: OrderType) -> f64 {
        let available = self.balance().available;
        if available <= 0.0 || quote <= 0.0 {
            return 0.0;
        }
        available / (quote * (1.0 + self.fees.rate(order_type)))
    }

    fn check_pair_limits(&self, volume: f64) -> Result<(), LedgerError> {
        let pair = self.market.pair();
        let above_max = pair.max_order_size > 0.0 && volume > pair.max_order_size;
        if volume < pair.min_order_size || above_max {
            return Err(LedgerError::VolumeOutOfRange {
                volume,
                min: pair.min_order_size,
                max: pair.max_order_size,
            });
        }
        Ok(())
    }

    /// Submit a buy for slot `name`
    ///
    /// A zero `params.volume` buys as much as the available balance allows.
    pub async fn order_buy(
        &mut self,
        name: &str,
        order_type: OrderType,
        params: OrderParams,
    ) -> Result<OrderStatus, LedgerError> {
        if self.pending.contains_key(name) {
            return Err(LedgerError::PendingOrder(name.to_string()));
        }
        if self.positions.contains_key(name) {
            return Err(LedgerError::DuplicateOrder(name.to_string()));
        }

        reject_oco(order_type, &params)?;

        let last = self.market.ticker().await?.last;
        let quote = quote_price(order_type, &params, last);
        let max = self.max_volume_at(quote, order_type);

        let volume = if params.volume == 0.0 {
            (max * VOLUME_SCALE).floor() / VOLUME_SCALE
        } else {
            params.volume
        };
        if volume <= 0.0 || volume > max {
            return Err(LedgerError::InsufficientBalance {
                requested: volume,
                max,
            });
        }
        self.check_pair_limits(volume)?;

        let request = self.request(Direction::Buy, order_type, volume, params);
        let order = self.submit(&request).await?;
        let reserved = volume * quote * (1.0 + self.fees.rate(order_type));

        tracing::info!(
            name = %name,
            volume,
            price = params.price,
            reserved,
            "Buy {} order submitted",
            order_type
        );

        self.pending.insert(
            name.to_string(),
            PendingOrder {
                order: order.clone(),
                reserved,
            },
        );
        self.slots.insert(name.to_string(), SlotStatus::Pending);
        Ok(order)
    }

    /// Submit a sell closing the open position of slot `name`
    ///
    /// The volume is always the executed volume of the buy; `params.volume` is ignored.
    pub async fn order_sell(
        &mut self,
        name: &str,
        order_type: OrderType,
        params: OrderParams,
    ) -> Result<OrderStatus, LedgerError> {
        let volume = self
            .positions
            .get(name)
            .map(|p| p.buy.executed_volume)
            .ok_or_else(|| LedgerError::NotFound(name.to_string()))?;
        if self.pending.contains_key(name) {
            return Err(LedgerError::PendingOrder(name.to_string()));
        }
        reject_oco(order_type, &params)?;

        let request = self.request(Direction::Sell, order_type, volume, params);
        let order = self.submit(&request).await?;

        tracing::info!(
            name = %name,
            volume,
            price = params.price,
            "Sell {} order submitted",
            order_type
        );

        self.pending.insert(
            name.to_string(),
            PendingOrder {
                order: order.clone(),
                reserved: 0.0,
            },
        );
        self.slots.insert(name.to_string(), SlotStatus::Pending);
        Ok(order)
    }

    fn request(
        &self,
        direction: Direction,
        order_type: OrderType,
        volume: f64,
        params: OrderParams,
    ) -> OrderRequest {
        OrderRequest {
            pair: self.market.pair().name.clone(),
            direction,
            order_type,
            volume,
            price: params.price,
            price2: params.price2,
        }
    }

    /// Send a request to the backend, rejecting multi-leg responses
    async fn submit(&mut self, request: &OrderRequest) -> Result<OrderStatus, LedgerError> {
        let mut legs = self.backend.add_order(request, &mut self.market).await?;

        match legs.len() {
            0 => Err(ConnectorError::Parse("empty order response".to_string()).into()),
            1 => Ok(legs.remove(0)),
            n => {
                for leg in &legs {
                    if let Err(e) = self.backend.cancel_order(leg, &mut self.market).await {
                        tracing::warn!("Failed to cancel OCO leg {:?}: {}", leg.id, e);
                    }
                }
                Err(LedgerError::UnsupportedOco(n))
            }
        }
    }

    /// Cancel the pending order of slot `name`
    ///
    /// If the backend refuses, the order stays pending and the error is returned.
    pub async fn cancel(&mut self, name: &str) -> Result<(), LedgerError> {
        let order = self
            .pending
            .get(name)
            .map(|p| p.order.clone())
            .ok_or_else(|| LedgerError::NotFound(name.to_string()))?;

        self.backend.cancel_order(&order, &mut self.market).await?;

        if let Some(mut entry) = self.pending.remove(name) {
            entry.order.state = OrderState::Cancelled;
            tracing::info!(name = %name, "Cancelled {}", entry.order);
            self.cancelled.push((name.to_string(), entry.order));
        }
        self.slots.insert(name.to_string(), SlotStatus::Cancelled);
        Ok(())
    }

    /// Cancel every pending order, returning the ones that failed
    pub async fn cancel_all(&mut self) -> Vec<(String, LedgerError)> {
        let mut names: Vec<String> = self.pending.keys().cloned().collect();
        names.sort();

        let mut failures = Vec::new();
        for name in names {
            if let Err(e) = self.cancel(&name).await {
                tracing::warn!(name = %name, "Cancel failed: {}", e);
                failures.push((name, e));
            }
        }
        failures
    }

    /// Reconcile every pending order with the backend
    ///
    /// Orders whose status cannot be fetched are left as they are and listed
    /// in `failed`. Calling this again without a backend change is a no-op.
    /// A sell confirmed without an open position fails the call after the
    /// pass; the status failures of that pass are logged first.
    pub async fn update(&mut self) -> Result<UpdateSummary, LedgerError> {
        let (summary, orphan) = self.reconcile().await;
        match orphan {
            Some((_, e)) => {
                for (name, failure) in &summary.failed {
                    tracing::warn!(name = %name, "Unreconciled order: {}", failure);
                }
                Err(e)
            }
            None => Ok(summary),
        }
    }

    /// One reconciliation pass and the first orphan sell it met
    async fn reconcile(&mut self) -> (UpdateSummary, Option<(String, LedgerError)>) {
        let mut summary = UpdateSummary::default();
        let mut orphan = None;

        let mut names: Vec<String> = self.pending.keys().cloned().collect();
        names.sort();

        for name in names {
            let Some(current) = self.pending.get(&name).map(|p| p.order.clone()) else {
                continue;
            };

            let status = match self.backend.order_status(&current, &mut self.market).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(name = %name, "Order status unavailable: {}", e);
                    summary.failed.push((name, e));
                    continue;
                }
            };

            match status.state {
                OrderState::Pending => {
                    if let Some(entry) = self.pending.get_mut(&name) {
                        entry.order = status;
                    }
                }
                OrderState::Confirmed => {
                    self.pending.remove(&name);
                    self.slots.insert(name.clone(), SlotStatus::Confirmed);
                    let result = match status.direction {
                        Direction::Buy => {
                            self.open_position(&name, status);
                            Ok(())
                        }
                        Direction::Sell => self.close_position(&name, status),
                    };
                    match result {
                        Ok(()) => summary.confirmed.push(name),
                        Err(e) => orphan = orphan.or(Some((name, e))),
                    }
                }
                OrderState::Cancelled => {
                    tracing::error!(
                        name = %name,
                        "Order cancelled outside the ledger: {}",
                        status
                    );
                    self.pending.remove(&name);
                    self.slots.insert(name.clone(), SlotStatus::Cancelled);
                    self.cancelled.push((name.clone(), status));
                    summary.cancelled.push(name);
                }
            }
        }

        (summary, orphan)
    }

    fn open_position(&mut self, name: &str, buy: OrderStatus) {
        let fee = buy.cost() * self.fees.rate(buy.order_type);
        self.balance -= fee;

        tracing::info!(
            name = %name,
            volume = buy.executed_volume,
            price = buy.avg_price,
            fee,
            balance = self.balance,
            "Buy confirmed"
        );

        self.positions.insert(
            name.to_string(),
            Position {
                name: name.to_string(),
                buy,
                fee,
                opened_at: self.market.clock(),
            },
        );
    }

    fn close_position(&mut self, name: &str, sell: OrderStatus) -> Result<(), LedgerError> {
        let fee = sell.cost() * self.fees.rate(sell.order_type);
        let Some(position) = self.positions.remove(name) else {
            // Still post the fee: the exchange charged it
            self.balance -= fee;
            tracing::error!(name = %name, "Sell confirmed without an open position");
            return Err(LedgerError::NotFound(name.to_string()));
        };

        let pnl = sell.cost() - position.buy.cost();
        self.balance += pnl - fee;

        tracing::info!(
            name = %name,
            price = sell.avg_price,
            pnl,
            fee,
            balance = self.balance,
            "Sell confirmed"
        );

        self.closed.push(ClosedTrade {
            id: Uuid::new_v4(),
            name: name.to_string(),
            buy: position.buy,
            sell,
            pnl,
            fees: position.fee + fee,
            opened_at: position.opened_at,
            closed_at: self.market.clock(),
        });
        Ok(())
    }

    /// Liquidate the book before exit
    ///
    /// Cancels every pending order, market-sells every open position and runs
    /// one reconciliation pass. Failures are collected, never raised.
    pub async fn clean_up(&mut self) -> Vec<(String, LedgerError)> {
        let mut failures = self.cancel_all().await;

        let mut names: Vec<String> = self.positions.keys().cloned().collect();
        names.sort();

        for name in names {
            if self.pending.contains_key(&name) {
                continue;
            }
            match self
                .order_sell(&name, OrderType::Market, OrderParams::default())
                .await
            {
                Ok(_) => tracing::info!(name = %name, "Liquidating position"),
                Err(e) => {
                    tracing::warn!(name = %name, "Liquidation failed: {}", e);
                    failures.push((name, e));
                }
            }
        }

        let (summary, orphan) = self.reconcile().await;
        failures.extend(
            summary
                .failed
                .into_iter()
                .map(|(name, e)| (name, LedgerError::Connector(e))),
        );
        failures.extend(orphan);

        if !self.positions.is_empty() || !self.pending.is_empty() {
            tracing::warn!(
                open = self.positions.len(),
                pending = self.pending.len(),
                "Book not flat after clean-up"
            );
        }
        failures
    }
}

/// Price a buy reservation is sized at
///
/// Limit and stop buys can fill up to their price, trailing buys up to the
/// pivot plus the offset.
fn quote_price(order_type: OrderType, params: &OrderParams, last: f64) -> f64 {
    match order_type {
        OrderType::Limit | OrderType::Stop if params.price > 0.0 => last.max(params.price),
        OrderType::TrailingStop => last + params.price2,
        _ => last,
    }
}

/// A limit with a secondary price goes out as OCO on the exchange
fn reject_oco(order_type: OrderType, params: &OrderParams) -> Result<(), LedgerError> {
    if order_type == OrderType::Limit && params.price2 > 0.0 {
        return Err(LedgerError::UnsupportedOco(2));
    }
    Ok(())
}
