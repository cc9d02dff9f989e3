/// Relative Strength Index with Wilder smoothing
///
/// One value per input sample. The first `length` values are 0 (not enough
/// history); a window without losses reads 100.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
pub fn rsi(source: &[f64], length: usize) -> Vec<f64> {
    let length = length.max(1);
    let mut result = vec![0.0; source.len()];
    if source.len() <= length {
        return result;
    }

    let change = |i: usize| source[i] - source[i - 1];
    let gain = |i: usize| change(i).max(0.0);
    let loss = |i: usize| (-change(i)).max(0.0);

    let mut avg_gain = (1..=length).map(gain).sum::<f64>() / length as f64;
    let mut avg_loss = (1..=length).map(loss).sum::<f64>() / length as f64;
    result[length] = index(avg_gain, avg_loss);

    for i in (length + 1)..source.len() {
        avg_gain = (avg_gain * (length - 1) as f64 + gain(i)) / length as f64;
        avg_loss = (avg_loss * (length - 1) as f64 + loss(i)) / length as f64;
        result[i] = index(avg_gain, avg_loss);
    }

    result
}

fn index(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss <= f64::EPSILON {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_calculation() {
        let prices = vec![
            44.0, 44.25, 44.5, 43.75, 44.0, 44.5, 45.0, 45.5, 45.25, 45.5, 46.0, 46.5, 46.25,
            46.0, 46.5, 46.25,
        ];

        let rsi = rsi(&prices, 14);
        assert_eq!(rsi.len(), prices.len());
        assert_eq!(rsi[13], 0.0);

        let value = rsi[15];
        assert!(value > 0.0 && value < 100.0);
        assert!(value > 50.0); // mostly gains
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let prices = vec![100.0, 102.0, 101.0];
        assert_eq!(rsi(&prices, 14), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rsi_all_gains() {
        let prices = vec![100.0, 101.0, 102.0, 103.0, 104.0, 105.0];
        let rsi = rsi(&prices, 5);
        assert_eq!(rsi[5], 100.0);
    }

    #[test]
    fn test_rsi_all_losses() {
        let prices = vec![105.0, 104.0, 103.0, 102.0];
        let rsi = rsi(&prices, 2);
        assert_eq!(rsi[3], 0.0);
    }
}
