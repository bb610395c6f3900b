// =============================================================================
// VWAP levels — short-horizon volume-weighted average price
// =============================================================================
//
// A rolling 20-bar VWAP acts as an institutional reference level. The
// deviation of the latest close from that level is classified into
// support/resistance zones; sitting on the level earns a score boost in the
// scanner.
// =============================================================================

use serde::Serialize;

use crate::types::Candle;

/// Bars in the rolling VWAP window.
const VWAP_WINDOW: usize = 20;
/// Deviation (percent) treated as "at the level".
const AT_LEVEL_PCT: f64 = 0.5;
/// Deviation (percent) beyond which price is considered extended.
const EXTENDED_PCT: f64 = 3.0;

/// Classified VWAP reading.
#[derive(Debug, Clone, Serialize)]
pub struct VwapLevels {
    pub vwap: f64,
    /// Latest close deviation from VWAP, in percent.
    pub deviation_pct: f64,
    /// One of: AT_INSTITUTIONAL_LEVEL, ABOVE_SUPPORT, EXTENDED_ABOVE,
    /// BELOW_RESISTANCE, EXTENDED_BELOW.
    pub signal: &'static str,
    /// Additive technical-score boost for this reading.
    pub score_boost: f64,
}

/// Compute the rolling VWAP over the trailing window and classify the latest
/// close against it. Zero-volume windows yield `None`.
pub fn vwap_levels(candles: &[Candle]) -> Option<VwapLevels> {
    if candles.len() < VWAP_WINDOW {
        return None;
    }
    let window = &candles[candles.len() - VWAP_WINDOW..];

    let mut pv = 0.0;
    let mut vol = 0.0;
    for c in window {
        let typical = (c.high + c.low + c.close) / 3.0;
        pv += typical * c.volume;
        vol += c.volume;
    }
    if vol <= 0.0 {
        return None;
    }
    let vwap = pv / vol;

    let close = window.last()?.close;
    let deviation_pct = (close - vwap) / vwap * 100.0;

    let (signal, score_boost) = if deviation_pct.abs() <= AT_LEVEL_PCT {
        ("AT_INSTITUTIONAL_LEVEL", 5.0)
    } else if deviation_pct > EXTENDED_PCT {
        ("EXTENDED_ABOVE", 0.0)
    } else if deviation_pct > 0.0 {
        ("ABOVE_SUPPORT", 2.0)
    } else if deviation_pct < -EXTENDED_PCT {
        ("EXTENDED_BELOW", 0.0)
    } else {
        ("BELOW_RESISTANCE", -2.0)
    };

    Some(VwapLevels {
        vwap,
        deviation_pct,
        signal,
        score_boost,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64, volume: f64) -> Candle {
        Candle {
            datetime: 0,
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }

    #[test]
    fn needs_full_window() {
        let candles: Vec<Candle> = (0..19).map(|_| candle(100.0, 1000.0)).collect();
        assert!(vwap_levels(&candles).is_none());
    }

    #[test]
    fn flat_series_sits_at_level() {
        let candles: Vec<Candle> = (0..20).map(|_| candle(100.0, 1000.0)).collect();
        let v = vwap_levels(&candles).unwrap();
        assert!((v.vwap - 100.0).abs() < 1e-9);
        assert_eq!(v.signal, "AT_INSTITUTIONAL_LEVEL");
        assert!((v.score_boost - 5.0).abs() < 1e-9);
    }

    #[test]
    fn extended_above_gets_no_boost() {
        let mut candles: Vec<Candle> = (0..19).map(|_| candle(100.0, 1000.0)).collect();
        candles.push(candle(110.0, 1000.0));
        let v = vwap_levels(&candles).unwrap();
        assert_eq!(v.signal, "EXTENDED_ABOVE");
        assert!((v.score_boost - 0.0).abs() < 1e-9);
        assert!(v.deviation_pct > 3.0);
    }

    #[test]
    fn mild_pullback_classifies_below_resistance() {
        let mut candles: Vec<Candle> = (0..19).map(|_| candle(100.0, 1000.0)).collect();
        candles.push(candle(98.5, 1000.0));
        let v = vwap_levels(&candles).unwrap();
        assert_eq!(v.signal, "BELOW_RESISTANCE");
        assert!(v.score_boost < 0.0);
    }

    #[test]
    fn zero_volume_window_is_none() {
        let candles: Vec<Candle> = (0..20).map(|_| candle(100.0, 0.0)).collect();
        assert!(vwap_levels(&candles).is_none());
    }
}
