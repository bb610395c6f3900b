// =============================================================================
// Relative Strength Index — Wilder's smoothing, plus the RSI-2 signal bands
// =============================================================================
//
// RSI(14) feeds the technical score; RSI(2) is a fast mean-reversion gauge
// whose extreme bands drive direction-aware score adjustments in the scanner:
//
//   RSI-2 <  5  => EXTREME_OVERSOLD      RSI-2 > 95 => EXTREME_OVERBOUGHT
//   RSI-2 < 10  => OVERSOLD              RSI-2 > 90 => OVERBOUGHT
// =============================================================================

use serde::Serialize;

/// Labeled RSI-2 reading.
#[derive(Debug, Clone, Serialize)]
pub struct Rsi2Signal {
    pub value: f64,
    /// One of: EXTREME_OVERSOLD, OVERSOLD, NEUTRAL, OVERBOUGHT,
    /// EXTREME_OVERBOUGHT.
    pub signal: &'static str,
}

/// Compute the full RSI series for `closes` with the given `period`.
///
/// The first `period` closes seed the Wilder averages; one value is emitted
/// per remaining close. Returns an empty vec on insufficient data and stops
/// early if the calculation turns non-finite.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (sum_gain, sum_loss) = deltas[..period]
        .iter()
        .fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 {
                (g + d, l)
            } else {
                (g, l + d.abs())
            }
        });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    let mut result = Vec::with_capacity(deltas.len() - period + 1);
    match rsi_from_averages(avg_gain, avg_loss) {
        Some(first) => result.push(first),
        None => return Vec::new(),
    }

    for &delta in &deltas[period..] {
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        match rsi_from_averages(avg_gain, avg_loss) {
            Some(rsi) => result.push(rsi),
            None => break,
        }
    }

    result
}

/// Latest RSI value for the series, if computable.
pub fn latest_rsi(closes: &[f64], period: usize) -> Option<f64> {
    calculate_rsi(closes, period).last().copied()
}

/// Latest RSI-2 reading with its signal band.
pub fn rsi2_signal(closes: &[f64]) -> Option<Rsi2Signal> {
    let value = latest_rsi(closes, 2)?;
    let signal = if value < 5.0 {
        "EXTREME_OVERSOLD"
    } else if value < 10.0 {
        "OVERSOLD"
    } else if value > 95.0 {
        "EXTREME_OVERBOUGHT"
    } else if value > 90.0 {
        "OVERBOUGHT"
    } else {
        "NEUTRAL"
    };
    Some(Rsi2Signal { value, signal })
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };
    rsi.is_finite().then_some(rsi)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_data_is_empty() {
        assert!(calculate_rsi(&[], 14).is_empty());
        assert!(calculate_rsi(&[1.0, 2.0], 0).is_empty());
        let closes: Vec<f64> = (1..=14).map(f64::from).collect();
        assert!(calculate_rsi(&closes, 14).is_empty());
    }

    #[test]
    fn monotonic_series_pin_the_extremes() {
        let up: Vec<f64> = (1..=30).map(f64::from).collect();
        for v in calculate_rsi(&up, 14) {
            assert!((v - 100.0).abs() < 1e-10);
        }
        let down: Vec<f64> = (1..=30).rev().map(f64::from).collect();
        for v in calculate_rsi(&down, 14) {
            assert!(v.abs() < 1e-10);
        }
    }

    #[test]
    fn flat_series_is_neutral() {
        let flat = vec![100.0; 30];
        for v in calculate_rsi(&flat, 14) {
            assert!((v - 50.0).abs() < 1e-10);
        }
    }

    #[test]
    fn values_stay_in_range() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        for v in calculate_rsi(&closes, 14) {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn rsi2_extreme_bands() {
        // Two strong down days after a flat stretch push RSI-2 to the floor.
        let mut closes = vec![100.0; 10];
        closes.extend([97.0, 93.0]);
        let sig = rsi2_signal(&closes).unwrap();
        assert!(sig.value < 5.0);
        assert_eq!(sig.signal, "EXTREME_OVERSOLD");

        let mut closes = vec![100.0; 10];
        closes.extend([103.0, 107.0]);
        let sig = rsi2_signal(&closes).unwrap();
        assert!(sig.value > 95.0);
        assert_eq!(sig.signal, "EXTREME_OVERBOUGHT");
    }

    #[test]
    fn rsi2_neutral_band() {
        let closes = vec![
            100.0, 100.5, 99.8, 100.2, 99.9, 100.4, 100.0, 99.7, 100.1, 100.0,
        ];
        let sig = rsi2_signal(&closes).unwrap();
        assert_eq!(sig.signal, "NEUTRAL");
    }
}
