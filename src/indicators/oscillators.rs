use super::moving_average::ema;

/// MACD line, its signal line and the histogram between them
#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(source: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let fast = ema(source, fast);
    let slow = ema(source, slow);

    let line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let signal = ema(&line, signal);
    let histogram = line.iter().zip(&signal).map(|(m, s)| m - s).collect();

    Macd {
        line,
        signal,
        histogram,
    }
}

/// `x[i] - x[i - length]`, or the change since the first sample for the first `length` values
pub fn momentum(source: &[f64], length: usize) -> Vec<f64> {
    source
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let base = if i >= length { source[i - length] } else { source[0] };
            value - base
        })
        .collect()
}

/// `a` crossed above `b` between the last two samples
pub fn crossover(a: &[f64], b: &[f64]) -> bool {
    match (last_two(a), last_two(b)) {
        (Some((a0, a1)), Some((b0, b1))) => a0 <= b0 && a1 > b1,
        _ => false,
    }
}

/// `a` crossed below `b` between the last two samples
pub fn crossunder(a: &[f64], b: &[f64]) -> bool {
    match (last_two(a), last_two(b)) {
        (Some((a0, a1)), Some((b0, b1))) => a0 >= b0 && a1 < b1,
        _ => false,
    }
}

/// `a` crossed above a constant level
pub fn crossover_level(a: &[f64], level: f64) -> bool {
    crossover(a, &[level, level])
}

pub fn crossunder_level(a: &[f64], level: f64) -> bool {
    crossunder(a, &[level, level])
}

fn last_two(series: &[f64]) -> Option<(f64, f64)> {
    match series {
        [.., prev, last] => Some((*prev, *last)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macd_flat_series_is_zero() {
        let m = macd(&[10.0; 30], 12, 26, 9);
        assert!(m.line.iter().all(|v| v.abs() < 1e-12));
        assert!(m.histogram.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_macd_positive_in_uptrend() {
        let prices: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let m = macd(&prices, 12, 26, 9);
        assert_eq!(m.line.len(), 40);
        assert!(m.line[39] > 0.0);
        assert!(m.line[39] > m.signal[39]);
    }

    #[test]
    fn test_momentum() {
        let prices = vec![1.0, 2.0, 4.0, 7.0, 11.0];
        assert_eq!(momentum(&prices, 2), vec![0.0, 1.0, 3.0, 5.0, 7.0]);
    }

    #[test]
    fn test_crossover_and_crossunder() {
        assert!(crossover(&[1.0, 3.0], &[2.0, 2.0]));
        assert!(crossover(&[2.0, 3.0], &[2.0, 2.0]));
        assert!(!crossover(&[3.0, 4.0], &[2.0, 2.0]));
        assert!(crossunder(&[3.0, 1.0], &[2.0, 2.0]));
        assert!(!crossunder(&[1.0, 0.0], &[2.0, 2.0]));
        assert!(!crossover(&[1.0], &[0.0]));
    }

    #[test]
    fn test_level_crossings() {
        assert!(crossover_level(&[25.0, 28.0, 31.0], 30.0));
        assert!(crossunder_level(&[75.0, 69.0], 70.0));
        assert!(!crossunder_level(&[65.0, 69.0], 70.0));
    }
}
