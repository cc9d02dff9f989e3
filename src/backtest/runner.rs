use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::api::ReplayConnector;
use crate::backtest::metrics::BacktestMetrics;
use crate::execution::{ControlLoop, LoopConfig, OrderLedger, SimulatedBackend};
use crate::market::MarketData;
use crate::models::{Candle, Fees, PairInfo, Period};
use crate::strategy::Strategy;
use crate::Result;

const BACKTEST_PAIR: &str = "btcusd";

fn backtest_pair() -> PairInfo {
    PairInfo {
        name: BACKTEST_PAIR.to_string(),
        precision: 5,
        min_order_size: 0.0,
        max_order_size: 0.0,
    }
}

fn replay_ledger(
    candles: Vec<Candle>,
    warmup: usize,
    capital: f64,
    history_limit: usize,
    fees: Fees,
    period: Period,
) -> (OrderLedger, usize) {
    let connector = ReplayConnector::new(backtest_pair(), candles, warmup).with_fees(fees);
    let remaining = connector.remaining();
    let market = MarketData::new(Arc::new(connector), backtest_pair(), period, history_limit);
    let ledger = OrderLedger::new(capital, fees, market, Box::new(SimulatedBackend::new()));
    (ledger, remaining)
}

/// Paper-trading ledger over a fixed candle series with default fees
///
/// The first `warmup` candles are history; each ticker refresh reveals one more.
pub fn paper_ledger(
    candles: Vec<Candle>,
    warmup: usize,
    capital: f64,
    history_limit: usize,
) -> OrderLedger {
    replay_ledger(
        candles,
        warmup,
        capital,
        history_limit,
        Fees::default(),
        Period::M15,
    )
    .0
}

/// Runs a strategy over historical candles through the control loop
///
/// The first `history_limit` candles are warm-up history; every remaining
/// candle but the last drives one tick. The last one is kept so the final
/// liquidation has a price to sell at.
#[derive(Debug, Clone)]
pub struct BacktestRunner {
    capital: f64,
    history_limit: usize,
    fees: Fees,
    period: Period,
}

impl BacktestRunner {
    pub fn new(capital: f64, history_limit: usize) -> Self {
        Self {
            capital,
            history_limit,
            fees: Fees::default(),
            period: Period::M15,
        }
    }

    pub fn with_fees(mut self, fees: Fees) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_period(mut self, period: Period) -> Self {
        self.period = period;
        self
    }

    /// Run a backtest with the given strategy and candles
    ///
    /// # Arguments
    /// * `strategy` - The configured strategy to test
    /// * `candles` - Time-ascending candles, more than `history_limit + 1` of them
    ///
    /// # Returns
    /// BacktestMetrics over the trades the ledger closed
    pub async fn run(
        &self,
        strategy: Box<dyn Strategy>,
        candles: Vec<Candle>,
    ) -> Result<BacktestMetrics> {
        let needed = self.history_limit + 2;
        if candles.len() < needed {
            return Err(format!(
                "Not enough candles for backtest. Need {}, got {}",
                needed,
                candles.len()
            )
            .into());
        }

        let (ledger, remaining) = replay_ledger(
            candles,
            self.history_limit,
            self.capital,
            self.history_limit,
            self.fees,
            self.period,
        );

        tracing::info!(
            strategy = strategy.name(),
            ticks = remaining - 1,
            warmup = self.history_limit,
            "Starting backtest"
        );

        let config = LoopConfig {
            refresh: Duration::ZERO,
            min_sleep: Duration::ZERO,
            max_ticks: Some((remaining - 1) as u64),
        };
        // nothing ever requests shutdown; the tick limit ends the run
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let control = ControlLoop::new(config, ledger, strategy, shutdown_rx);
        let (report, ledger) = control.run_to_completion().await;

        if report.strategy_errors > 0 || report.ledger_errors > 0 {
            tracing::warn!(
                strategy_errors = report.strategy_errors,
                ledger_errors = report.ledger_errors,
                "Backtest ticks reported errors"
            );
        }
        for failure in &report.cleanup_failures {
            tracing::warn!("Clean-up failure: {}", failure);
        }

        let metrics = BacktestMetrics::from_trades(
            ledger.closed_trades(),
            self.capital,
            report.balance.total,
        );

        tracing::info!(
            trades = metrics.total_trades,
            net_pnl = metrics.net_pnl,
            return_pct = metrics.net_return_pct,
            "Backtest complete"
        );

        Ok(metrics)
    }

    /// Run backtest and print report
    pub async fn run_and_report(
        &self,
        strategy: Box<dyn Strategy>,
        candles: Vec<Candle>,
        scenario_name: &str,
    ) -> Result<BacktestMetrics> {
        println!("\nRunning backtest: {}", scenario_name);
        println!("   Strategy: {}", strategy.name());
        println!("   Candles: {}", candles.len());
        println!("   Initial Capital: ${:.2}", self.capital);

        let metrics = self.run(strategy, candles).await?;
        metrics.print_report();

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::synthetic::{MarketScenario, SyntheticDataGenerator};
    use crate::strategy::ema_cross::EmaCrossStrategy;
    use crate::strategy::trailing::TrailingStrategy;

    #[tokio::test]
    async fn test_backtest_uptrend() {
        tracing_subscriber::fmt()
            .with_env_filter("venice=debug")
            .try_init()
            .ok();

        let mut gen = SyntheticDataGenerator::new(42);
        let candles = gen.generate(MarketScenario::Uptrend, 300, 15);

        let runner = BacktestRunner::new(10_000.0, 50);
        let metrics = runner
            .run(Box::new(EmaCrossStrategy::default()), candles)
            .await
            .unwrap();

        assert!(metrics.final_balance > 0.0);
        assert!(metrics.total_trades >= 1, "trend follower should trade an uptrend");
    }

    #[tokio::test]
    async fn test_backtest_ends_flat() {
        let mut gen = SyntheticDataGenerator::new(9);
        let candles = gen.generate(MarketScenario::Volatile, 120, 15);

        let runner = BacktestRunner::new(1_000.0, 20);
        let metrics = runner
            .run(Box::new(TrailingStrategy::new(2.0)), candles)
            .await
            .unwrap();

        // every trade is closed, so the balance is the capital plus net pnl
        let expected = 1_000.0 + metrics.net_pnl;
        assert!((metrics.final_balance - expected).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_backtest_insufficient_data() {
        let mut gen = SyntheticDataGenerator::new(42);
        let candles = gen.generate(MarketScenario::Uptrend, 50, 15);

        let runner = BacktestRunner::new(10_000.0, 100);
        let result = runner
            .run(Box::new(EmaCrossStrategy::default()), candles)
            .await;

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Not enough candles"));
    }

    #[tokio::test]
    async fn test_paper_ledger_reveals_one_candle_per_refresh() {
        let candles = SyntheticDataGenerator::from_closes(&[1.0, 2.0, 3.0], 15);
        let mut ledger = paper_ledger(candles, 1, 100.0, 10);

        assert_eq!(ledger.market_mut().ticker().await.unwrap().last, 2.0);
        ledger.market_mut().invalidate();
        assert_eq!(ledger.market_mut().ticker().await.unwrap().last, 3.0);
    }
}
