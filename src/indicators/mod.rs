// Technical indicators module
// Pure functions over price series, one output value per input sample

pub mod moving_average;
pub mod oscillators;
pub mod rsi;

pub use moving_average::{ema, sma};
pub use oscillators::{
    crossover, crossover_level, crossunder, crossunder_level, macd, momentum, Macd,
};
pub use rsi::rsi;
