// =============================================================================
// Technical Analyzer — indicator bundle and composite technical score
// =============================================================================
//
// Consumes an ascending daily candle series and produces the indicator
// bundle the scanner attaches to its results, plus a technical score in
// [0, 100]. Score contributions:
//
//   base 50
//   MACD histogram positive            +15   (else -5)
//   price above 50-bar SMA             +10   (else -5)
//   50-bar SMA above 200-bar SMA       +10   (else -5)
//   price above 200-bar SMA            +10   (else -10)
//   RSI-14 in the healthy 40-60 band   +10   (>70 overbought -5, <30 +5)
//   volume RISING                       +5
// =============================================================================

use serde::Serialize;
use tracing::debug;

use crate::indicators::macd::{macd_12_26_9, MacdResult};
use crate::indicators::minervini::{stage_analysis, MinerviniStage};
use crate::indicators::rsi::{latest_rsi, rsi2_signal, Rsi2Signal};
use crate::indicators::sma::{latest_sma, volume_trend, VolumeTrend};
use crate::indicators::vwap::{vwap_levels, VwapLevels};
use crate::types::PriceHistory;

/// Minimum bars required before any indicator work is attempted.
pub const MIN_BARS: usize = 50;

/// Every indicator the scanner reports, computed from one candle series.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorBundle {
    pub current_price: f64,
    pub rsi14: Option<f64>,
    pub rsi14_label: Option<&'static str>,
    pub rsi2: Option<Rsi2Signal>,
    pub macd: Option<MacdResult>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub volume_trend: Option<VolumeTrend>,
    pub vwap: Option<VwapLevels>,
    pub minervini: Option<MinerviniStage>,
}

/// Validate and trim a provider price history into an analyzable series.
///
/// Candles must already be ascending by datetime; out-of-order or
/// non-positive-close bars are dropped. Returns `None` when fewer than
/// [`MIN_BARS`] usable bars remain.
pub fn prepare_series(history: &PriceHistory) -> Option<PriceHistory> {
    let mut candles = Vec::with_capacity(history.candles.len());
    let mut last_dt = i64::MIN;
    for c in &history.candles {
        if c.close > 0.0 && c.datetime > last_dt {
            last_dt = c.datetime;
            candles.push(*c);
        }
    }
    if candles.len() < MIN_BARS {
        return None;
    }
    Some(PriceHistory {
        symbol: history.symbol.clone(),
        candles,
    })
}

/// Compute the full indicator bundle for a prepared series.
pub fn all_indicators(history: &PriceHistory) -> Option<IndicatorBundle> {
    let closes = history.closes();
    let volumes: Vec<f64> = history.candles.iter().map(|c| c.volume).collect();
    let current_price = *closes.last()?;

    let rsi14 = latest_rsi(&closes, 14);
    let rsi14_label = rsi14.map(|v| {
        if v >= 70.0 {
            "OVERBOUGHT"
        } else if v <= 30.0 {
            "OVERSOLD"
        } else {
            "NEUTRAL"
        }
    });

    let bundle = IndicatorBundle {
        current_price,
        rsi14,
        rsi14_label,
        rsi2: rsi2_signal(&closes),
        macd: macd_12_26_9(&closes),
        sma_50: latest_sma(&closes, 50),
        sma_200: latest_sma(&closes, 200),
        volume_trend: volume_trend(&volumes),
        vwap: vwap_levels(&history.candles),
        minervini: stage_analysis(&closes),
    };

    debug!(
        symbol = %history.symbol,
        price = current_price,
        rsi14 = ?bundle.rsi14,
        macd_bullish = bundle.macd.as_ref().map(|m| m.bullish),
        "indicator bundle computed"
    );
    Some(bundle)
}

/// Aggregate the bundle into a technical score in [0, 100].
pub fn technical_score(bundle: &IndicatorBundle) -> f64 {
    let mut score: f64 = 50.0;
    let price = bundle.current_price;

    if let Some(macd) = &bundle.macd {
        score += if macd.histogram > 0.0 { 15.0 } else { -5.0 };
    }
    if let Some(sma50) = bundle.sma_50 {
        score += if price > sma50 { 10.0 } else { -5.0 };
        if let Some(sma200) = bundle.sma_200 {
            score += if sma50 > sma200 { 10.0 } else { -5.0 };
        }
    }
    if let Some(sma200) = bundle.sma_200 {
        score += if price > sma200 { 10.0 } else { -10.0 };
    }
    if let Some(rsi) = bundle.rsi14 {
        if (40.0..=60.0).contains(&rsi) {
            score += 10.0;
        } else if rsi > 70.0 {
            score -= 5.0;
        } else if rsi < 30.0 {
            score += 5.0;
        }
    }
    if let Some(vol) = &bundle.volume_trend {
        if vol.label == "RISING" {
            score += 5.0;
        }
    }

    score.clamp(0.0, 100.0)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Candle;

    fn history(closes: &[f64]) -> PriceHistory {
        PriceHistory {
            symbol: "TEST".into(),
            candles: closes
                .iter()
                .enumerate()
                .map(|(i, &close)| Candle {
                    datetime: i as i64 * 86_400_000,
                    open: close,
                    high: close * 1.01,
                    low: close * 0.99,
                    close,
                    volume: 1_000_000.0,
                })
                .collect(),
        }
    }

    #[test]
    fn prepare_drops_bad_bars_and_enforces_minimum() {
        let mut h = history(&vec![100.0; 60]);
        h.candles[5].close = -1.0;
        h.candles[10].datetime = 0; // out of order
        let prepared = prepare_series(&h).unwrap();
        assert_eq!(prepared.candles.len(), 58);

        let short = history(&vec![100.0; 49]);
        assert!(prepare_series(&short).is_none());
    }

    #[test]
    fn uptrend_scores_above_neutral() {
        let closes: Vec<f64> = (0..300).map(|i| 100.0 + i as f64 * 0.5).collect();
        let h = history(&closes);
        let bundle = all_indicators(&h).unwrap();
        let score = technical_score(&bundle);
        assert!(score > 70.0, "uptrend score {score}");
    }

    #[test]
    fn downtrend_scores_below_neutral() {
        let closes: Vec<f64> = (0..300).map(|i| 300.0 - i as f64 * 0.5).collect();
        let h = history(&closes);
        let bundle = all_indicators(&h).unwrap();
        let score = technical_score(&bundle);
        assert!(score < 50.0, "downtrend score {score}");
    }

    #[test]
    fn score_is_clamped() {
        let closes: Vec<f64> = (0..300).map(|i| 100.0 + i as f64 * 0.5).collect();
        let h = history(&closes);
        let bundle = all_indicators(&h).unwrap();
        let score = technical_score(&bundle);
        assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn short_series_still_produces_bundle() {
        // 60 bars: no 200-SMA, no Minervini, but RSI/MACD/50-SMA present.
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.2).collect();
        let h = history(&closes);
        let bundle = all_indicators(&h).unwrap();
        assert!(bundle.sma_200.is_none());
        assert!(bundle.minervini.is_none());
        assert!(bundle.sma_50.is_some());
        assert!(bundle.macd.is_some());
    }
}
