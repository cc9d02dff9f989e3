use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::str::FromStr;

use crate::models::Candle;

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady uptrend with noise (+2% daily average)
    Uptrend,
    /// Steady downtrend with noise (-2% daily average)
    Downtrend,
    /// Mean-reverting chop (±1% noise around the base price)
    Sideways,
    /// Large swings (±5% per candle)
    Volatile,
    /// Slow growth, then a 25% slide over the second half
    Drawdown,
}

impl MarketScenario {
    pub const ALL: [MarketScenario; 5] = [
        MarketScenario::Uptrend,
        MarketScenario::Downtrend,
        MarketScenario::Sideways,
        MarketScenario::Volatile,
        MarketScenario::Drawdown,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MarketScenario::Uptrend => "uptrend",
            MarketScenario::Downtrend => "downtrend",
            MarketScenario::Sideways => "sideways",
            MarketScenario::Volatile => "volatile",
            MarketScenario::Drawdown => "drawdown",
        }
    }
}

impl fmt::Display for MarketScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MarketScenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MarketScenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s.to_lowercase())
            .ok_or_else(|| format!("unknown scenario: {}", s))
    }
}

/// Generates synthetic price data for backtesting
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
    base_volume: f64,
}

/// Fixed origin so the same seed always yields the same series
fn series_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 100.0,
            base_volume: 1_000.0,
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }

    /// Generate candles for a specific market scenario
    ///
    /// # Arguments
    /// * `scenario` - The market scenario to simulate
    /// * `num_candles` - Number of candles to generate
    /// * `interval_minutes` - Minutes between candles
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        num_candles: usize,
        interval_minutes: i64,
    ) -> Vec<Candle> {
        let start = series_start();
        let mut candles = Vec::with_capacity(num_candles);
        let mut price = self.base_price;

        for i in 0..num_candles {
            price = self.next_price(scenario, price, i, num_candles, interval_minutes);
            let time = start + Duration::minutes(i as i64 * interval_minutes);
            let candle = self.create_candle(price, time);
            candles.push(candle);
        }

        candles
    }

    fn next_price(
        &mut self,
        scenario: MarketScenario,
        price: f64,
        index: usize,
        num_candles: usize,
        interval_minutes: i64,
    ) -> f64 {
        let candles_per_day = 24.0 * 60.0 / interval_minutes.max(1) as f64;

        match scenario {
            MarketScenario::Uptrend => {
                // reduced noise so the trend dominates
                price * (1.0 + 0.02 / candles_per_day + self.rng.gen_range(-0.001..0.001))
            }
            MarketScenario::Downtrend => {
                price * (1.0 - 0.02 / candles_per_day + self.rng.gen_range(-0.001..0.001))
            }
            MarketScenario::Sideways => {
                let reversion = (self.base_price - price) * 0.1;
                price + reversion + price * self.rng.gen_range(-0.01..0.01)
            }
            MarketScenario::Volatile => {
                let next = price * (1.0 + self.rng.gen_range(-0.05..0.05));
                next.max(self.base_price * 0.5)
            }
            MarketScenario::Drawdown => {
                let half = (num_candles / 2).max(1);
                if index < half {
                    price * (1.0 + self.rng.gen_range(-0.005..0.01))
                } else {
                    let drop_rate = -0.25 / half as f64;
                    price * (1.0 + drop_rate + self.rng.gen_range(-0.005..0.005))
                }
            }
        }
    }

    /// Build a realistic candle around a close price
    fn create_candle(&mut self, close: f64, time: DateTime<Utc>) -> Candle {
        let noise_pct = 0.002; // ±0.2% intrabar movement

        let high = close * (1.0 + self.rng.gen_range(0.0..noise_pct));
        let low = close * (1.0 - self.rng.gen_range(0.0..noise_pct));
        let open = (close * (1.0 + self.rng.gen_range(-noise_pct..noise_pct))).clamp(low, high);
        let volume = self.base_volume * self.rng.gen_range(0.7..1.3);

        Candle {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Candles following an exact close series
    ///
    /// Each candle opens at the previous close; high and low span open and close.
    pub fn from_closes(closes: &[f64], interval_minutes: i64) -> Vec<Candle> {
        let start = series_start();
        let mut open = closes.first().copied().unwrap_or_default();

        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let candle = Candle {
                    time: start + Duration::minutes(i as i64 * interval_minutes),
                    open,
                    high: open.max(close),
                    low: open.min(close),
                    close,
                    volume: 1.0,
                };
                open = close;
                candle
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uptrend() {
        let mut gen = SyntheticDataGenerator::new(42);
        let candles = gen.generate(MarketScenario::Uptrend, 500, 5);

        assert_eq!(candles.len(), 500);

        let first_price = candles.first().unwrap().close;
        let last_price = candles.last().unwrap().close;
        assert!(
            last_price > first_price,
            "Uptrend should end higher: {} -> {}",
            first_price,
            last_price
        );
    }

    #[test]
    fn test_generate_downtrend() {
        let mut gen = SyntheticDataGenerator::new(42);
        let candles = gen.generate(MarketScenario::Downtrend, 500, 5);

        let first_price = candles.first().unwrap().close;
        let last_price = candles.last().unwrap().close;
        assert!(last_price < first_price);
    }

    #[test]
    fn test_generate_sideways() {
        let mut gen = SyntheticDataGenerator::new(42);
        let candles = gen.generate(MarketScenario::Sideways, 500, 5);

        let base = gen.base_price;
        for candle in &candles {
            assert!(
                candle.close > base * 0.9 && candle.close < base * 1.1,
                "Sideways should stay near base: {} vs {}",
                candle.close,
                base
            );
        }
    }

    #[test]
    fn test_drawdown_ends_well_below_peak() {
        let mut gen = SyntheticDataGenerator::new(7);
        let candles = gen.generate(MarketScenario::Drawdown, 400, 15);

        let peak = candles.iter().map(|c| c.close).fold(f64::MIN, f64::max);
        let last = candles.last().unwrap().close;
        assert!(last < peak * 0.85, "peak {} last {}", peak, last);
    }

    #[test]
    fn test_same_seed_same_series() {
        let a = SyntheticDataGenerator::new(3).generate(MarketScenario::Volatile, 50, 15);
        let b = SyntheticDataGenerator::new(3).generate(MarketScenario::Volatile, 50, 15);
        assert_eq!(a, b);
    }

    #[test]
    fn test_ohlc_consistency() {
        let mut gen = SyntheticDataGenerator::new(42);
        let candles = gen.generate(MarketScenario::Volatile, 100, 5);

        for pair in candles.windows(2) {
            assert!(pair[1].time > pair[0].time, "Timestamps should be sequential");
        }
        for candle in &candles {
            assert!(candle.high >= candle.close && candle.high >= candle.open);
            assert!(candle.low <= candle.close && candle.low <= candle.open);
        }
    }

    #[test]
    fn test_from_closes() {
        let candles = SyntheticDataGenerator::from_closes(&[10.0, 12.0, 11.0], 15);
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[1].open, 10.0);
        assert_eq!(candles[1].high, 12.0);
        assert_eq!(candles[2].low, 11.0);
        assert_eq!((candles[2].time - candles[0].time).num_minutes(), 30);
    }

    #[test]
    fn test_scenario_names() {
        assert_eq!("Drawdown".parse::<MarketScenario>(), Ok(MarketScenario::Drawdown));
        assert!("gaps".parse::<MarketScenario>().is_err());
    }
}
