use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::api::ExchangeConnector;
use crate::error::{ConnectorError, StartupError};
use crate::models::{Fees, Period};
use crate::strategy::StrategyParams;

pub const DEFAULT_CONFIG_FILE: &str = "venice.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// Simulated fills against live market data
    Paper,
    /// Real orders on the exchange
    Live,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// Runtime configuration
///
/// Sources, lowest precedence first: built-in defaults, the TOML file,
/// `VENICE_*` environment variables (`__` separates nested keys, e.g.
/// `VENICE_STRATEGY__NAME`), then command line overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub exchange: String,
    pub pair: String,
    pub period: String,
    pub capital: f64,
    pub refresh_secs: u64,
    pub min_sleep_ms: u64,
    pub history_limit: usize,
    pub mode: TradingMode,
    #[serde(default)]
    pub fees: Option<Fees>,
    pub strategy: StrategyConfig,
    pub log_filter: String,
}

/// Values given on the command line; `None` leaves the lower layers alone
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub exchange: Option<String>,
    pub pair: Option<String>,
    pub period: Option<String>,
    pub capital: Option<f64>,
    pub refresh_secs: Option<u64>,
    pub mode: Option<String>,
    pub strategy: Option<String>,
}

impl AppConfig {
    /// Load `.env`, then build the layered configuration
    ///
    /// A missing file is fine; a malformed one is not.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self, StartupError> {
        dotenvy::dotenv().ok();

        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let builder = Config::builder()
            .set_default("exchange", "bitfinex")?
            .set_default("pair", "btcusd")?
            .set_default("period", "15m")?
            .set_default("capital", 1000.0)?
            .set_default("refresh_secs", 60_i64)?
            .set_default("min_sleep_ms", 1000_i64)?
            .set_default("history_limit", 100_i64)?
            .set_default("mode", "paper")?
            .set_default("strategy.name", "ema")?
            .set_default("log_filter", "venice=info")?
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("VENICE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_override_option("exchange", overrides.exchange.clone())?
            .set_override_option("pair", overrides.pair.clone())?
            .set_override_option("period", overrides.period.clone())?
            .set_override_option("capital", overrides.capital)?
            .set_override_option("refresh_secs", overrides.refresh_secs.map(|s| s as i64))?
            .set_override_option("mode", overrides.mode.clone())?
            .set_override_option("strategy.name", overrides.strategy.clone())?;

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), StartupError> {
        if !(self.capital > 0.0) {
            return Err(StartupError::InvalidParam {
                name: "capital".to_string(),
                reason: format!("must be positive, got {}", self.capital),
            });
        }
        if self.history_limit < 2 {
            return Err(StartupError::InvalidParam {
                name: "history_limit".to_string(),
                reason: "must be at least 2".to_string(),
            });
        }
        if let Some(fees) = self.fees {
            if fees.maker < 0.0 || fees.taker < 0.0 {
                return Err(StartupError::InvalidParam {
                    name: "fees".to_string(),
                    reason: "fee rates cannot be negative".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn period(&self) -> Result<Period, StartupError> {
        self.period.parse()
    }

    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn min_sleep(&self) -> Duration {
        Duration::from_millis(self.min_sleep_ms)
    }

    pub fn strategy_params(&self) -> StrategyParams {
        StrategyParams::from(self.strategy.params.clone())
    }

    /// Configured fees, else the exchange's schedule
    ///
    /// Paper trading falls back to `Fees::default()` when the lookup fails,
    /// e.g. without API credentials.
    pub async fn resolve_fees(
        &self,
        connector: &dyn ExchangeConnector,
    ) -> Result<Fees, ConnectorError> {
        if let Some(fees) = self.fees {
            return Ok(fees);
        }
        match connector.fees().await {
            Ok(fees) => Ok(fees),
            Err(e) if self.mode == TradingMode::Paper => {
                let fees = Fees::default();
                tracing::warn!(
                    maker = fees.maker,
                    taker = fees.taker,
                    "Fee lookup failed ({}), using default fees",
                    e
                );
                Ok(fees)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BitfinexConnector;
    use std::io::Write;

    fn write_config(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("venice-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let missing = std::env::temp_dir().join("venice-does-not-exist.toml");
        let config = AppConfig::load(Some(&missing), &Overrides::default()).unwrap();

        assert_eq!(config.exchange, "bitfinex");
        assert_eq!(config.mode, TradingMode::Paper);
        assert_eq!(config.period().unwrap(), Period::M15);
        assert_eq!(config.refresh(), Duration::from_secs(60));
        assert!(config.fees.is_none());
    }

    #[test]
    fn test_file_values_and_strategy_params() {
        let path = write_config(
            r#"
pair = "ethusd"
period = "1h"
history_limit = 250

[fees]
maker = 0.0
taker = 0.001

[strategy]
name = "golden-cross"

[strategy.params]
fast = 20
slow = "100"
"#,
        );

        let config = AppConfig::load(Some(&path), &Overrides::default()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.pair, "ethusd");
        assert_eq!(config.history_limit, 250);
        assert_eq!(config.fees.unwrap().taker, 0.001);
        assert_eq!(config.strategy.name, "golden-cross");

        let params = config.strategy_params();
        assert_eq!(params.get::<usize>("fast", 0).unwrap(), 20);
        assert_eq!(params.get::<usize>("slow", 0).unwrap(), 100);
    }

    #[test]
    fn test_overrides_beat_file() {
        let path = write_config("pair = \"ethusd\"\nmode = \"paper\"\n");
        let overrides = Overrides {
            pair: Some("ltcusd".into()),
            mode: Some("live".into()),
            capital: Some(250.0),
            ..Default::default()
        };

        let config = AppConfig::load(Some(&path), &overrides).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.pair, "ltcusd");
        assert_eq!(config.mode, TradingMode::Live);
        assert_eq!(config.capital, 250.0);
    }

    #[tokio::test]
    async fn test_paper_mode_falls_back_to_default_fees() {
        let missing = std::env::temp_dir().join("venice-does-not-exist.toml");
        let config = AppConfig::load(Some(&missing), &Overrides::default()).unwrap();
        // no credentials: the private fee endpoint fails before any request
        let connector = BitfinexConnector::new(None).unwrap();

        let fees = config.resolve_fees(&connector).await.unwrap();
        assert_eq!(fees, Fees::default());

        let live = AppConfig {
            mode: TradingMode::Live,
            ..config.clone()
        };
        assert!(matches!(
            live.resolve_fees(&connector).await,
            Err(ConnectorError::MissingCredentials)
        ));

        let fixed = Fees {
            maker: 0.0,
            taker: 0.0005,
        };
        let overridden = AppConfig {
            fees: Some(fixed),
            ..live
        };
        assert_eq!(overridden.resolve_fees(&connector).await.unwrap(), fixed);
    }

    #[test]
    fn test_rejects_bad_values() {
        let path = write_config("capital = -5.0\n");
        let result = AppConfig::load(Some(&path), &Overrides::default());
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(StartupError::InvalidParam { .. })));

        let path = write_config("mode = \"yolo\"\n");
        let result = AppConfig::load(Some(&path), &Overrides::default());
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(StartupError::Config(_))));
    }
}
