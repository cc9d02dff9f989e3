pub mod metrics;
pub mod runner;
pub mod synthetic;

pub use metrics::{BacktestMetrics, TradeRecord};
pub use runner::{paper_ledger, BacktestRunner};
pub use synthetic::{MarketScenario, SyntheticDataGenerator};
