use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use super::ledger::OrderLedger;
use crate::models::Balance;
use crate::strategy::Strategy;

#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    /// Target duration of one tick
    pub refresh: Duration,
    /// Lower bound on the inter-tick sleep, even when a tick overruns
    pub min_sleep: Duration,
    /// Stop after this many ticks (None runs until shutdown)
    pub max_ticks: Option<u64>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            refresh: Duration::from_secs(60),
            min_sleep: Duration::from_secs(1),
            max_ticks: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopping,
    Stopped,
}

/// What happened over the lifetime of a loop
#[derive(Debug, Clone, Default)]
pub struct LoopReport {
    pub ticks: u64,
    pub strategy_errors: u64,
    pub ledger_errors: u64,
    pub cleanup_failures: Vec<String>,
    pub balance: Balance,
}

/// Drives the strategy and the ledger one tick at a time
///
/// A tick refreshes the market snapshot, runs the strategy, sleeps out the
/// rest of the refresh interval, reconciles the ledger and invalidates the
/// snapshot. Errors inside a tick are logged and counted; the loop carries on.
/// When the shutdown flag flips (or `max_ticks` is reached) the strategy and
/// then the ledger are cleaned up before `run` returns.
pub struct ControlLoop {
    config: LoopConfig,
    ledger: OrderLedger,
    strategy: Box<dyn Strategy>,
    shutdown: watch::Receiver<bool>,
    state: LoopState,
    report: LoopReport,
}

impl ControlLoop {
    pub fn new(
        config: LoopConfig,
        ledger: OrderLedger,
        strategy: Box<dyn Strategy>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            ledger,
            strategy,
            shutdown,
            state: LoopState::Running,
            report: LoopReport::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn ledger(&self) -> &OrderLedger {
        &self.ledger
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Run until shutdown, then liquidate
    pub async fn run(&mut self) -> LoopReport {
        tracing::info!(
            strategy = self.strategy.name(),
            backend = self.ledger.backend_name(),
            refresh_ms = self.config.refresh.as_millis() as u64,
            "Control loop starting"
        );

        while self.state == LoopState::Running {
            if self.shutdown_requested() || self.tick_limit_reached() {
                self.state = LoopState::Stopping;
                break;
            }
            self.tick().await;
        }

        self.stop().await;
        self.report.clone()
    }

    /// Run the loop, consuming it, and hand back the ledger for inspection
    pub async fn run_to_completion(mut self) -> (LoopReport, OrderLedger) {
        let report = self.run().await;
        (report, self.ledger)
    }

    /// One iteration. Never fails; problems are logged and counted.
    pub async fn tick(&mut self) {
        let started = Instant::now();
        self.report.ticks += 1;

        match self.ledger.market_mut().ticker().await {
            Ok(ticker) => {
                tracing::debug!(tick = self.report.ticks, last = ticker.last, "Market refreshed");
                self.run_strategy().await;
            }
            Err(e) => {
                self.report.strategy_errors += 1;
                tracing::error!(
                    tick = self.report.ticks,
                    "Market refresh failed, skipping strategy: {}",
                    e
                );
            }
        }

        let elapsed = started.elapsed();
        let pause = self
            .config
            .refresh
            .saturating_sub(elapsed)
            .max(self.config.min_sleep);
        self.sleep(pause).await;

        match self.ledger.update().await {
            Ok(summary) => {
                for (name, e) in &summary.failed {
                    tracing::warn!(name = %name, "Order status unavailable: {}", e);
                }
            }
            Err(e) => {
                self.report.ledger_errors += 1;
                tracing::error!(tick = self.report.ticks, "Ledger update failed: {}", e);
            }
        }

        self.ledger.market_mut().invalidate();
    }

    async fn run_strategy(&mut self) {
        match self.strategy.run(&mut self.ledger).await {
            Ok(Some(next)) => {
                tracing::info!(
                    from = self.strategy.name(),
                    to = next.name(),
                    "Strategy hand-off"
                );
                self.strategy = next;
            }
            Ok(None) => {}
            Err(e) => {
                self.report.strategy_errors += 1;
                tracing::error!(
                    tick = self.report.ticks,
                    strategy = self.strategy.name(),
                    "Strategy failed: {}",
                    e
                );
            }
        }
    }

    async fn stop(&mut self) {
        self.state = LoopState::Stopping;
        tracing::info!(ticks = self.report.ticks, "Control loop stopping");

        if let Err(e) = self.strategy.clean_up(&mut self.ledger).await {
            tracing::error!(strategy = self.strategy.name(), "Strategy clean-up failed: {}", e);
            self.report
                .cleanup_failures
                .push(format!("strategy: {}", e));
        }

        for (name, e) in self.ledger.clean_up().await {
            self.report.cleanup_failures.push(format!("{}: {}", name, e));
        }

        self.report.balance = self.ledger.balance();
        self.state = LoopState::Stopped;

        tracing::info!(
            total = self.report.balance.total,
            available = self.report.balance.available,
            trades = self.ledger.closed_trades().len(),
            "Control loop stopped"
        );
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn tick_limit_reached(&self) -> bool {
        self.config
            .max_ticks
            .is_some_and(|max| self.report.ticks >= max)
    }

    /// Sleep, returning early if shutdown is requested
    async fn sleep(&mut self, pause: Duration) {
        if pause.is_zero() || self.shutdown_requested() {
            return;
        }
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = wait_for_shutdown(&mut shutdown) => {
                tracing::info!("Shutdown requested, finishing tick");
            }
        }
    }
}

/// Resolves once the flag is set; pends forever if the sender is gone
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{paper_ledger, SyntheticDataGenerator};
    use crate::models::{OrderParams, OrderType};
    use async_trait::async_trait;

    /// Buys on the first tick, sells on the third
    struct RoundTrip {
        ticks: usize,
    }

    #[async_trait]
    impl Strategy for RoundTrip {
        fn name(&self) -> &str {
            "round-trip"
        }

        fn configure(
            &mut self,
            _params: &crate::strategy::StrategyParams,
        ) -> std::result::Result<(), crate::error::StartupError> {
            Ok(())
        }

        async fn run(
            &mut self,
            ledger: &mut OrderLedger,
        ) -> crate::Result<Option<Box<dyn Strategy>>> {
            self.ticks += 1;
            match self.ticks {
                1 => {
                    ledger
                        .order_buy("rt", OrderType::Market, OrderParams::default().with_volume(1.0))
                        .await?;
                }
                3 => {
                    ledger
                        .order_sell("rt", OrderType::Market, OrderParams::default())
                        .await?;
                }
                _ => {}
            }
            Ok(None)
        }
    }

    /// Fails every tick
    struct Broken;

    #[async_trait]
    impl Strategy for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn configure(
            &mut self,
            _params: &crate::strategy::StrategyParams,
        ) -> std::result::Result<(), crate::error::StartupError> {
            Ok(())
        }

        async fn run(
            &mut self,
            ledger: &mut OrderLedger,
        ) -> crate::Result<Option<Box<dyn Strategy>>> {
            ledger
                .order_sell("nothing", OrderType::Market, OrderParams::default())
                .await?;
            Ok(None)
        }
    }

    /// Buys once then hands off to `Broken`
    struct HandOff;

    #[async_trait]
    impl Strategy for HandOff {
        fn name(&self) -> &str {
            "hand-off"
        }

        fn configure(
            &mut self,
            _params: &crate::strategy::StrategyParams,
        ) -> std::result::Result<(), crate::error::StartupError> {
            Ok(())
        }

        async fn run(
            &mut self,
            ledger: &mut OrderLedger,
        ) -> crate::Result<Option<Box<dyn Strategy>>> {
            ledger
                .order_buy("h", OrderType::Market, OrderParams::default().with_volume(1.0))
                .await?;
            Ok(Some(Box::new(Broken)))
        }
    }

    fn config(max_ticks: u64) -> LoopConfig {
        LoopConfig {
            refresh: Duration::ZERO,
            min_sleep: Duration::ZERO,
            max_ticks: Some(max_ticks),
        }
    }

    fn ledger(closes: &[f64]) -> OrderLedger {
        let candles = SyntheticDataGenerator::from_closes(closes, 15);
        paper_ledger(candles, 0, 1000.0, 10)
    }

    #[tokio::test]
    async fn test_round_trip_through_loop() {
        let (_tx, rx) = watch::channel(false);
        let control = ControlLoop::new(
            config(4),
            ledger(&[100.0, 101.0, 102.0, 110.0, 111.0]),
            Box::new(RoundTrip { ticks: 0 }),
            rx,
        );

        let (report, ledger) = control.run_to_completion().await;

        assert_eq!(report.ticks, 4);
        assert_eq!(report.strategy_errors, 0);
        assert!(report.cleanup_failures.is_empty());
        assert_eq!(ledger.closed_trades().len(), 1);
        // bought at 100, sold at 102
        assert_eq!(ledger.closed_trades()[0].pnl, 2.0);
        assert_eq!(report.balance.available, report.balance.total);
    }

    #[tokio::test]
    async fn test_strategy_errors_do_not_stop_the_loop() {
        let (_tx, rx) = watch::channel(false);
        let ledger = ledger(&[1.0, 2.0, 3.0, 4.0]);
        let mut control = ControlLoop::new(config(3), ledger, Box::new(Broken), rx);

        let report = control.run().await;

        assert_eq!(report.ticks, 3);
        assert_eq!(report.strategy_errors, 3);
        assert_eq!(control.state(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick_still_cleans_up() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let mut control = ControlLoop::new(
            config(10),
            ledger(&[100.0, 100.0]),
            Box::new(RoundTrip { ticks: 0 }),
            rx,
        );

        let report = control.run().await;

        assert_eq!(report.ticks, 0);
        assert_eq!(report.balance.total, 1000.0);
        assert_eq!(control.state(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep_and_liquidates() {
        let (tx, rx) = watch::channel(false);
        let config = LoopConfig {
            refresh: Duration::from_secs(3600),
            min_sleep: Duration::from_secs(3600),
            max_ticks: None,
        };
        let control = ControlLoop::new(
            config,
            ledger(&[100.0, 100.0, 100.0]),
            Box::new(RoundTrip { ticks: 0 }),
            rx,
        );

        let handle = tokio::spawn(control.run_to_completion());
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let (report, ledger) = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.ticks, 1);
        // the buy confirmed on the interrupted tick, clean-up sold it
        assert_eq!(ledger.closed_trades().len(), 1);
        assert_eq!(ledger.positions().count(), 0);
    }

    #[tokio::test]
    async fn test_strategy_hand_off() {
        let (_tx, rx) = watch::channel(false);
        let mut control = ControlLoop::new(
            config(3),
            ledger(&[10.0, 10.0, 10.0, 10.0]),
            Box::new(HandOff),
            rx,
        );

        let report = control.run().await;

        assert_eq!(control.strategy_name(), "broken");
        assert_eq!(report.strategy_errors, 2);
        // the position opened before the hand-off was liquidated
        assert_eq!(control.ledger().closed_trades().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_market_is_counted() {
        let (_tx, rx) = watch::channel(false);
        let strategy = Box::new(RoundTrip { ticks: 0 });
        let mut control = ControlLoop::new(config(3), ledger(&[10.0]), strategy, rx);

        let report = control.run().await;

        assert_eq!(report.ticks, 3);
        assert_eq!(report.strategy_errors, 2);
    }
}
