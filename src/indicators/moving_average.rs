/// Simple Moving Average, one value per input sample
///
/// The first `length - 1` values average the samples seen so far.
pub fn sma(source: &[f64], length: usize) -> Vec<f64> {
    let length = length.max(1);
    let mut result = Vec::with_capacity(source.len());
    let mut sum = 0.0;

    for (i, value) in source.iter().enumerate() {
        sum += value;
        if i >= length {
            sum -= source[i - length];
        }
        result.push(sum / (i + 1).min(length) as f64);
    }

    result
}

/// Exponential Moving Average seeded with the first sample
pub fn ema(source: &[f64], length: usize) -> Vec<f64> {
    let multiplier = 2.0 / (length as f64 + 1.0);
    let mut result: Vec<f64> = Vec::with_capacity(source.len());

    for &value in source {
        let next = match result.last() {
            Some(prev) => value * multiplier + prev * (1.0 - multiplier),
            None => value,
        };
        result.push(next);
    }

    result
}
