use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::ClosedTrade;

/// Record of a single round trip for analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub name: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub volume: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub holding_period_minutes: i64,
    pub fees: f64,    // Both legs
    pub net_pnl: f64, // P&L after fees
}

impl From<&ClosedTrade> for TradeRecord {
    fn from(trade: &ClosedTrade) -> Self {
        Self {
            name: trade.name.clone(),
            entry_time: trade.opened_at,
            exit_time: trade.closed_at,
            entry_price: trade.buy.avg_price,
            exit_price: trade.sell.avg_price,
            volume: trade.buy.executed_volume,
            pnl: trade.pnl,
            pnl_pct: trade.pnl_percent(),
            holding_period_minutes: trade.holding_minutes(),
            fees: trade.fees,
            net_pnl: trade.net_pnl(),
        }
    }
}

/// Complete backtest performance metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // P&L Metrics
    pub total_pnl: f64,
    pub total_return_pct: f64,
    pub initial_balance: f64,
    pub final_balance: f64,

    // Trade Statistics
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    // P&L Distribution (net of fees)
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64, // Total wins / Total losses

    // Risk Metrics
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,

    // Holding Period
    pub avg_holding_period_minutes: f64,
    pub max_holding_period_minutes: i64,
    pub min_holding_period_minutes: i64,

    // Fees
    pub total_fees: f64,
    pub net_pnl: f64,
    pub net_return_pct: f64,

    pub trades: Vec<TradeRecord>,
}

impl BacktestMetrics {
    /// Calculate metrics from the ledger's closed trades
    pub fn from_trades(trades: &[ClosedTrade], initial_balance: f64, final_balance: f64) -> Self {
        let trades: Vec<TradeRecord> = trades.iter().map(TradeRecord::from).collect();
        let total_trades = trades.len();

        if total_trades == 0 {
            return Self::empty(initial_balance, final_balance);
        }

        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let total_fees: f64 = trades.iter().map(|t| t.fees).sum();
        let net_pnl = total_pnl - total_fees;

        let wins: Vec<f64> = trades
            .iter()
            .map(|t| t.net_pnl)
            .filter(|p| *p > 0.0)
            .collect();
        let losses: Vec<f64> = trades
            .iter()
            .map(|t| t.net_pnl)
            .filter(|p| *p <= 0.0)
            .collect();

        let gross_wins: f64 = wins.iter().sum();
        let gross_losses: f64 = losses.iter().sum::<f64>().abs();
        let profit_factor = if gross_losses > 0.0 {
            gross_wins / gross_losses
        } else if gross_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let average = |values: &[f64]| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        };

        let holding: Vec<i64> = trades.iter().map(|t| t.holding_period_minutes).collect();
        let (max_drawdown, max_drawdown_pct) = Self::calculate_drawdown(&trades, initial_balance);

        let pct = |value: f64| {
            if initial_balance > 0.0 {
                value / initial_balance * 100.0
            } else {
                0.0
            }
        };

        Self {
            total_pnl,
            total_return_pct: pct(total_pnl),
            initial_balance,
            final_balance,
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: wins.len() as f64 / total_trades as f64 * 100.0,
            avg_win: average(&wins),
            avg_loss: average(&losses),
            largest_win: wins.iter().copied().fold(0.0, f64::max),
            largest_loss: losses.iter().copied().fold(0.0, f64::min),
            profit_factor,
            max_drawdown,
            max_drawdown_pct,
            sharpe_ratio: Self::calculate_sharpe_ratio(&trades),
            avg_holding_period_minutes: holding.iter().sum::<i64>() as f64 / total_trades as f64,
            max_holding_period_minutes: holding.iter().copied().max().unwrap_or(0),
            min_holding_period_minutes: holding.iter().copied().min().unwrap_or(0),
            total_fees,
            net_pnl,
            net_return_pct: pct(net_pnl),
            trades,
        }
    }

    /// Empty metrics for when no trades occurred
    fn empty(initial_balance: f64, final_balance: f64) -> Self {
        Self {
            total_pnl: 0.0,
            total_return_pct: 0.0,
            initial_balance,
            final_balance,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            largest_win: 0.0,
            largest_loss: 0.0,
            profit_factor: 0.0,
            max_drawdown: 0.0,
            max_drawdown_pct: 0.0,
            sharpe_ratio: 0.0,
            avg_holding_period_minutes: 0.0,
            max_holding_period_minutes: 0,
            min_holding_period_minutes: 0,
            total_fees: 0.0,
            net_pnl: 0.0,
            net_return_pct: 0.0,
            trades: vec![],
        }
    }

    /// Maximum peak-to-trough decline of the balance, trade by trade
    fn calculate_drawdown(trades: &[TradeRecord], initial_value: f64) -> (f64, f64) {
        let mut peak = initial_value;
        let mut max_dd = 0.0;
        let mut current_value = initial_value;

        for trade in trades {
            current_value += trade.net_pnl;
            peak = f64::max(peak, current_value);
            max_dd = f64::max(max_dd, peak - current_value);
        }

        let max_dd_pct = if peak > 0.0 {
            (max_dd / peak) * 100.0
        } else {
            0.0
        };

        (max_dd, max_dd_pct)
    }

    /// Mean over standard deviation of per-trade returns, risk-free rate 0
    fn calculate_sharpe_ratio(trades: &[TradeRecord]) -> f64 {
        if trades.is_empty() {
            return 0.0;
        }

        let returns: Vec<f64> = trades.iter().map(|t| t.pnl_pct).collect();
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        let std_dev = variance.sqrt();

        if std_dev > 0.0 {
            mean / std_dev
        } else {
            0.0
        }
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n═══════════════ BACKTEST PERFORMANCE REPORT ═══════════════\n");

        println!("P&L SUMMARY");
        println!("  Initial Balance:       ${:.2}", self.initial_balance);
        println!("  Final Balance:         ${:.2}", self.final_balance);
        println!(
            "  Gross P&L:             ${:.2} ({:+.2}%)",
            self.total_pnl, self.total_return_pct
        );
        println!("  Fees:                  ${:.2}", self.total_fees);
        println!(
            "  Net P&L:               ${:.2} ({:+.2}%)",
            self.net_pnl, self.net_return_pct
        );

        println!("\nTRADE STATISTICS");
        println!("  Total Trades:          {}", self.total_trades);
        println!(
            "  Winning Trades:        {} ({:.1}%)",
            self.winning_trades, self.win_rate
        );
        println!("  Losing Trades:         {}", self.losing_trades);

        if self.total_trades > 0 {
            println!("\nWIN/LOSS ANALYSIS");
            println!("  Average Win:           ${:.2}", self.avg_win);
            println!("  Average Loss:          ${:.2}", self.avg_loss);
            println!("  Largest Win:           ${:.2}", self.largest_win);
            println!("  Largest Loss:          ${:.2}", self.largest_loss);
            println!("  Profit Factor:         {:.2}", self.profit_factor);

            println!("\nRISK METRICS");
            println!(
                "  Max Drawdown:          ${:.2} ({:.2}%)",
                self.max_drawdown, self.max_drawdown_pct
            );
            println!("  Sharpe Ratio:          {:.2}", self.sharpe_ratio);

            println!("\nHOLDING PERIODS");
            println!(
                "  Average:               {:.1} minutes ({:.1} hours)",
                self.avg_holding_period_minutes,
                self.avg_holding_period_minutes / 60.0
            );
            println!(
                "  Max / Min:             {} / {} minutes",
                self.max_holding_period_minutes, self.min_holding_period_minutes
            );
        }

        println!("\n════════════════════════════════════════════════════════════\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, OrderRequest, OrderStatus, OrderType};
    use uuid::Uuid;

    fn leg(direction: Direction, price: f64) -> OrderStatus {
        let mut order = OrderStatus::pending(&OrderRequest {
            pair: "btcusd".into(),
            direction,
            order_type: OrderType::Market,
            volume: 1.0,
            price: 0.0,
            price2: 0.0,
        });
        order.fill(price);
        order
    }

    fn trade(entry: f64, exit: f64, fees: f64, holding_minutes: i64) -> ClosedTrade {
        let opened_at = Utc::now();
        ClosedTrade {
            id: Uuid::new_v4(),
            name: "test".into(),
            buy: leg(Direction::Buy, entry),
            sell: leg(Direction::Sell, exit),
            pnl: exit - entry,
            fees,
            opened_at,
            closed_at: opened_at + chrono::Duration::minutes(holding_minutes),
        }
    }

    #[test]
    fn test_metrics_with_winning_trades() {
        let trades = vec![trade(100.0, 110.0, 0.0, 60), trade(100.0, 105.0, 0.0, 120)];
        let metrics = BacktestMetrics::from_trades(&trades, 1000.0, 1015.0);

        assert_eq!(metrics.total_trades, 2);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.win_rate, 100.0);
        assert_eq!(metrics.total_pnl, 15.0);
        assert_eq!(metrics.largest_win, 10.0);
        assert_eq!(metrics.avg_holding_period_minutes, 90.0);
        assert_eq!(metrics.max_drawdown, 0.0);
    }

    #[test]
    fn test_metrics_with_no_trades() {
        let metrics = BacktestMetrics::from_trades(&[], 1000.0, 1000.0);
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, 0.0);
    }

    #[test]
    fn test_fees_turn_a_scratch_into_a_loss() {
        let trades = vec![trade(100.0, 100.5, 1.0, 15)];
        let metrics = BacktestMetrics::from_trades(&trades, 1000.0, 999.5);

        assert_eq!(metrics.losing_trades, 1);
        assert!((metrics.net_pnl + 0.5).abs() < 1e-9);
        assert!((metrics.total_fees - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_profit_factor_calculation() {
        let trades = vec![
            trade(100.0, 120.0, 0.0, 60),
            trade(100.0, 90.0, 0.0, 60),
        ];
        let metrics = BacktestMetrics::from_trades(&trades, 1000.0, 1010.0);
        assert_eq!(metrics.profit_factor, 2.0);
    }

    #[test]
    fn test_drawdown_calculation() {
        let trades = vec![
            trade(100.0, 150.0, 0.0, 60),
            trade(100.0, 70.0, 0.0, 60),
            trade(100.0, 90.0, 0.0, 60),
        ];
        let metrics = BacktestMetrics::from_trades(&trades, 1000.0, 1010.0);

        // peak 1050, trough 1010
        assert_eq!(metrics.max_drawdown, 40.0);
    }
}
