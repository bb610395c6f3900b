// =============================================================================
// MACD — Moving Average Convergence/Divergence (12/26/9)
// =============================================================================

use serde::{Deserialize, Serialize};

/// Latest MACD reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    /// MACD line above its signal line.
    pub bullish: bool,
}

/// Exponential moving average series with the standard 2/(n+1) multiplier,
/// seeded by the SMA of the first `period` values.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for &v in &values[period..] {
        prev = (v - prev) * k + prev;
        out.push(prev);
    }
    out
}

/// Compute MACD(fast, slow, signal) over `closes`, returning the latest
/// reading.
pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<MacdResult> {
    if fast == 0 || slow <= fast || closes.len() < slow + signal_period {
        return None;
    }

    let fast_ema = ema_series(closes, fast);
    let slow_ema = ema_series(closes, slow);

    // Align the two series on their common (most recent) suffix.
    let common = slow_ema.len();
    let fast_tail = &fast_ema[fast_ema.len() - common..];
    let macd_line: Vec<f64> = fast_tail
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_line = ema_series(&macd_line, signal_period);
    let macd = *macd_line.last()?;
    let signal = *signal_line.last()?;
    let histogram = macd - signal;

    Some(MacdResult {
        macd,
        signal,
        histogram,
        bullish: histogram > 0.0,
    })
}

/// Standard 12/26/9 MACD.
pub fn macd_12_26_9(closes: &[f64]) -> Option<MacdResult> {
    calculate_macd(closes, 12, 26, 9)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_matches_hand_computation() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = ema_series(&values, 3);
        // Seed = SMA(1,2,3) = 2; k = 0.5.
        assert!((out[0] - 2.0).abs() < 1e-10);
        assert!((out[1] - 3.0).abs() < 1e-10);
        assert!((out[2] - 4.0).abs() < 1e-10);
    }

    #[test]
    fn insufficient_data_returns_none() {
        let closes: Vec<f64> = (0..30).map(f64::from).collect();
        assert!(macd_12_26_9(&closes).is_none());
        assert!(calculate_macd(&closes, 26, 12, 9).is_none());
    }

    #[test]
    fn uptrend_is_bullish() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let macd = macd_12_26_9(&closes).unwrap();
        assert!(macd.macd > 0.0);
        assert!(macd.bullish);
    }

    #[test]
    fn downtrend_is_bearish() {
        let closes: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        let macd = macd_12_26_9(&closes).unwrap();
        assert!(macd.macd < 0.0);
        assert!(!macd.bullish);
    }

    #[test]
    fn flat_series_is_zero() {
        let closes = vec![50.0; 60];
        let macd = macd_12_26_9(&closes).unwrap();
        assert!(macd.macd.abs() < 1e-10);
        assert!(macd.histogram.abs() < 1e-10);
    }
}
