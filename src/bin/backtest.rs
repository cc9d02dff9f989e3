use anyhow::{anyhow, Context, Result};
use clap::Parser;

use venice::backtest::{BacktestMetrics, BacktestRunner, MarketScenario, SyntheticDataGenerator};
use venice::models::Period;
use venice::{StrategyKind, StrategyParams};

/// Run a strategy over every synthetic market scenario
#[derive(Parser)]
#[command(name = "backtest", about = "Offline backtest over synthetic scenarios")]
struct Cli {
    /// Strategy name (ema, golden-cross, macd, momentum, rsi, trailing)
    #[arg(short, long, default_value = "ema")]
    strategy: String,

    /// Strategy parameter as key=value, repeatable
    #[arg(short, long = "param")]
    params: Vec<String>,

    /// Candles per scenario, warm-up included
    #[arg(long, default_value_t = 500)]
    candles: usize,

    /// Seed for the data generator
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Starting capital
    #[arg(long, default_value_t = 10_000.0)]
    capital: f64,

    /// Warm-up candles and the longest history a strategy may request
    #[arg(long, default_value_t = 100)]
    history: usize,

    /// Only run this scenario
    #[arg(long)]
    scenario: Option<MarketScenario>,

    /// Print the full report of every scenario
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    venice::logging::init("venice=warn");

    let kind: StrategyKind = cli.strategy.parse()?;
    let params = StrategyParams::parse_pairs(&cli.params)?;
    // fail on bad parameters before generating anything
    kind.build(&params)?;

    println!("\n═══════════════ VENICE BACKTESTING SUITE ═══════════════");
    println!("   Strategy: {}  Seed: {}  Candles: {}", kind, cli.seed, cli.candles);

    let period = Period::M15;
    let runner = BacktestRunner::new(cli.capital, cli.history).with_period(period);

    let scenarios: Vec<MarketScenario> = match cli.scenario {
        Some(scenario) => vec![scenario],
        None => MarketScenario::ALL.to_vec(),
    };

    let mut all_metrics = Vec::new();
    for scenario in scenarios {
        let mut generator = SyntheticDataGenerator::new(cli.seed);
        let candles = generator.generate(scenario, cli.candles, period.minutes());
        let strategy = kind.build(&params)?;

        let result = if cli.verbose {
            runner
                .run_and_report(strategy, candles, scenario.name())
                .await
        } else {
            runner.run(strategy, candles).await
        };

        match result {
            Ok(metrics) => all_metrics.push((scenario, metrics)),
            Err(e) => eprintln!("Backtest failed for {}: {}", scenario, e),
        }
    }

    if all_metrics.is_empty() {
        return Err(anyhow!("no scenario completed")).context("Backtest aborted");
    }
    print_summary_comparison(&all_metrics);

    Ok(())
}

fn print_summary_comparison(results: &[(MarketScenario, BacktestMetrics)]) {
    println!("\n═══════════════════ SCENARIO COMPARISON ═══════════════════\n");

    println!(
        "{:<12} {:>10} {:>9} {:>8} {:>7} {:>8} {:>7} {:>7}",
        "Scenario", "Net P&L", "Return%", "Fees", "Trades", "Win%", "PF", "MaxDD%"
    );
    println!("{}", "─".repeat(76));

    for (scenario, m) in results {
        println!(
            "{:<12} {:>10.2} {:>9.2} {:>8.2} {:>7} {:>8.1} {:>7.2} {:>7.2}",
            scenario.name(),
            m.net_pnl,
            m.net_return_pct,
            m.total_fees,
            m.total_trades,
            m.win_rate,
            m.profit_factor,
            m.max_drawdown_pct
        );
    }

    type Row = (MarketScenario, BacktestMetrics);
    let by_return = |a: &&Row, b: &&Row| a.1.net_return_pct.total_cmp(&b.1.net_return_pct);
    if let Some((best, m)) = results.iter().max_by(by_return) {
        println!("\nBest scenario:  {} ({:+.2}%)", best, m.net_return_pct);
    }
    if let Some((worst, m)) = results.iter().min_by(by_return) {
        println!("Worst scenario: {} ({:+.2}%)", worst, m.net_return_pct);
    }

    let total_trades: usize = results.iter().map(|(_, m)| m.total_trades).sum();
    let avg_win_rate = results.iter().map(|(_, m)| m.win_rate).sum::<f64>() / results.len() as f64;

    println!("\nTotal trades across all scenarios: {}", total_trades);
    println!("Average win rate: {:.1}%", avg_win_rate);
    println!("\n════════════════════════════════════════════════════════════\n");
}
