use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;

use venice::config::{AppConfig, Overrides, TradingMode};
use venice::execution::{
    Backend, ControlLoop, LiveBackend, LoopConfig, OrderLedger, SimulatedBackend,
};
use venice::{connect, Credentials, MarketData, StartupError, StrategyKind, StrategyParams};

/// Single-pair trading bot
#[derive(Parser)]
#[command(name = "venice", about = "Runs a trading strategy on one pair, live or on paper")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Exchange name
    #[arg(long)]
    exchange: Option<String>,

    /// Pair to trade (e.g. btcusd)
    #[arg(long)]
    pair: Option<String>,

    /// Candle period (1m 5m 15m 30m 1h 3h 6h 12h 1D)
    #[arg(long)]
    period: Option<String>,

    /// Capital allocated to the strategy, in quote currency
    #[arg(long)]
    capital: Option<f64>,

    /// Seconds between ticks
    #[arg(long)]
    refresh: Option<u64>,

    /// paper or live
    #[arg(long)]
    mode: Option<String>,

    /// Strategy name
    #[arg(short, long)]
    strategy: Option<String>,

    /// Strategy parameter as key=value, repeatable
    #[arg(short, long = "param")]
    params: Vec<String>,

    /// Stop after this many ticks
    #[arg(long)]
    max_ticks: Option<u64>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            exchange: self.exchange.clone(),
            pair: self.pair.clone(),
            period: self.period.clone(),
            capital: self.capital,
            refresh_secs: self.refresh,
            mode: self.mode.clone(),
            strategy: self.strategy.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref(), &cli.overrides())
        .context("Failed to load configuration")?;
    venice::logging::init(&config.log_filter);

    tracing::info!(
        exchange = %config.exchange,
        pair = %config.pair,
        period = %config.period,
        mode = ?config.mode,
        strategy = %config.strategy.name,
        "Venice starting"
    );

    let credentials = Credentials::from_env(&config.exchange);
    if config.mode == TradingMode::Live && credentials.is_none() {
        return Err(StartupError::MissingCredentials(config.exchange.to_uppercase()).into());
    }

    let connector = connect(&config.exchange, credentials)?;
    let period = config.period()?;

    let pairs = connector
        .pairs()
        .await
        .context("Failed to fetch tradable pairs")?;
    let pair = pairs
        .get(&config.pair.to_lowercase())
        .cloned()
        .ok_or_else(|| StartupError::InvalidPair(config.pair.clone()))?;

    let fees = config
        .resolve_fees(connector.as_ref())
        .await
        .context("Failed to fetch fees")?;
    tracing::info!(maker = fees.maker, taker = fees.taker, "Fees");

    let mut params = config.strategy_params();
    params.merge(StrategyParams::parse_pairs(&cli.params)?);
    let strategy = config.strategy.name.parse::<StrategyKind>()?.build(&params)?;

    let backend: Box<dyn Backend> = match config.mode {
        TradingMode::Live => Box::new(LiveBackend::new()),
        TradingMode::Paper => Box::new(SimulatedBackend::new()),
    };

    let market = MarketData::new(connector, pair, period, config.history_limit);
    let ledger = OrderLedger::new(config.capital, fees, market, backend);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received, liquidating after this tick");
        shutdown_tx.send(true).ok();
    });

    let loop_config = LoopConfig {
        refresh: config.refresh(),
        min_sleep: config.min_sleep(),
        max_ticks: cli.max_ticks,
    };
    let mut control = ControlLoop::new(loop_config, ledger, strategy, shutdown_rx);
    let report = control.run().await;

    for failure in &report.cleanup_failures {
        tracing::warn!("Clean-up failure: {}", failure);
    }

    println!(
        "Final balance: total {:.2}, available {:.2} \
         ({} ticks, {} trades, {} strategy errors, {} ledger errors)",
        report.balance.total,
        report.balance.available,
        report.ticks,
        control.ledger().closed_trades().len(),
        report.strategy_errors,
        report.ledger_errors
    );

    Ok(())
}

/// Ctrl-C, or SIGTERM on unix
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
