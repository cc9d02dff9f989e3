// Core modules
pub mod api;
pub mod backtest;
pub mod config;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod logging;
pub mod market;
pub mod models;
pub mod strategy;

// Re-export commonly used types
pub use api::{connect, Credentials, ExchangeConnector};
pub use error::{ConnectorError, LedgerError, StartupError};
pub use execution::{ControlLoop, LoopConfig, OrderLedger};
pub use market::MarketData;
pub use models::*;
pub use strategy::{Strategy, StrategyKind, StrategyParams};

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
