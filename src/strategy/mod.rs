// Trading strategy module
pub mod ema_cross;
pub mod golden_cross;
pub mod macd;
pub mod momentum;
pub mod rsi;
pub mod trailing;

pub use ema_cross::EmaCrossStrategy;
pub use golden_cross::GoldenCrossStrategy;
pub use macd::MacdStrategy;
pub use momentum::MomentumStrategy;
pub use rsi::RsiStrategy;
pub use trailing::TrailingStrategy;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::StartupError;
use crate::execution::OrderLedger;
use crate::Result;

/// Base trait for all trading strategies
///
/// A strategy reads market data through the ledger and issues at most one
/// order action per slot per tick.
#[async_trait]
pub trait Strategy: Send {
    /// Get strategy name
    fn name(&self) -> &str;

    /// Apply parameters, rejecting unknown keys and malformed values
    fn configure(&mut self, params: &StrategyParams) -> std::result::Result<(), StartupError>;

    /// One tick of decision logic
    ///
    /// Returning `Some` hands control over to another strategy from the next tick on.
    async fn run(&mut self, ledger: &mut OrderLedger) -> Result<Option<Box<dyn Strategy>>>;

    /// Called once before the ledger liquidates the book
    async fn clean_up(&mut self, _ledger: &mut OrderLedger) -> Result<()> {
        Ok(())
    }
}

/// String key/value strategy parameters (`--param fast=10`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyParams(HashMap<String, String>);

impl StrategyParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    /// Parse `key=value` pairs
    pub fn parse_pairs<I, S>(pairs: I) -> std::result::Result<Self, StartupError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut params = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair.split_once('=').ok_or_else(|| StartupError::InvalidParam {
                name: pair.to_string(),
                reason: "expected key=value".to_string(),
            })?;
            params
                .0
                .insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(params)
    }

    /// Overlay `other` on top of these parameters
    pub fn merge(&mut self, other: StrategyParams) {
        self.0.extend(other.0);
    }

    /// Typed value of `key`, or `default` when absent
    pub fn get<T>(&self, key: &str, default: T) -> std::result::Result<T, StartupError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.0.get(key) {
            Some(raw) => parse_param(key, raw),
            None => Ok(default),
        }
    }

    /// Typed value of a mandatory `key`
    pub fn require<T>(&self, key: &str) -> std::result::Result<T, StartupError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.0.get(key).ok_or_else(|| StartupError::InvalidParam {
            name: key.to_string(),
            reason: "missing required parameter".to_string(),
        })?;
        parse_param(key, raw)
    }

    /// Fail on keys outside `known`
    pub fn check_known(&self, known: &[&str]) -> std::result::Result<(), StartupError> {
        let mut unknown: Vec<&String> = self
            .0
            .keys()
            .filter(|k| !known.contains(&k.as_str()))
            .collect();
        unknown.sort();

        match unknown.first() {
            Some(key) => Err(StartupError::InvalidParam {
                name: key.to_string(),
                reason: format!("unknown parameter, expected one of {:?}", known),
            }),
            None => Ok(()),
        }
    }
}

impl From<HashMap<String, String>> for StrategyParams {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

fn parse_param<T>(key: &str, raw: &str) -> std::result::Result<T, StartupError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse::<T>().map_err(|e| StartupError::InvalidParam {
        name: key.to_string(),
        reason: format!("{:?}: {}", raw, e),
    })
}

/// `value` must be at least 1
pub(crate) fn positive(name: &str, value: usize) -> std::result::Result<usize, StartupError> {
    if value == 0 {
        return Err(StartupError::InvalidParam {
            name: name.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

/// Strategies selectable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Ema,
    GoldenCross,
    Macd,
    Momentum,
    Rsi,
    Trailing,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 6] = [
        StrategyKind::Ema,
        StrategyKind::GoldenCross,
        StrategyKind::Macd,
        StrategyKind::Momentum,
        StrategyKind::Rsi,
        StrategyKind::Trailing,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Ema => "ema",
            StrategyKind::GoldenCross => "golden-cross",
            StrategyKind::Macd => "macd",
            StrategyKind::Momentum => "momentum",
            StrategyKind::Rsi => "rsi",
            StrategyKind::Trailing => "trailing",
        }
    }

    /// Instantiate and configure the strategy
    pub fn build(
        &self,
        params: &StrategyParams,
    ) -> std::result::Result<Box<dyn Strategy>, StartupError> {
        let mut strategy: Box<dyn Strategy> = match self {
            StrategyKind::Ema => Box::new(EmaCrossStrategy::default()),
            StrategyKind::GoldenCross => Box::new(GoldenCrossStrategy::default()),
            StrategyKind::Macd => Box::new(MacdStrategy::default()),
            StrategyKind::Momentum => Box::new(MomentumStrategy::default()),
            StrategyKind::Rsi => Box::new(RsiStrategy::default()),
            StrategyKind::Trailing => Box::new(TrailingStrategy::default()),
        };
        strategy.configure(params)?;
        Ok(strategy)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = StartupError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| StartupError::UnknownStrategy(s.to_string()))
    }
}
