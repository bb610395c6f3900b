// =============================================================================
// Minervini stage analysis — trend-template score over daily closes
// =============================================================================
//
// Eight price-vs-moving-average rules approximate the classic trend template.
// Stage 2 (confirmed uptrend) requires a score of at least 6 with the
// long-term structure intact; a close below a declining 200-bar average marks
// Stage 3/4 distribution or decline.
//
// Requires a full year of daily bars (252) so the 52-week range is real.
// =============================================================================

use serde::Serialize;

use super::sma::{latest_sma, sma_at};

/// Minimum bars for stage analysis (52 trading weeks).
const MIN_BARS: usize = 252;
/// Bars used to judge the slope of the 200-bar average (~1 month).
const SLOPE_LOOKBACK: usize = 22;

#[derive(Debug, Clone, Serialize)]
pub struct MinerviniStage {
    /// Rules satisfied, 0..=8.
    pub score: u8,
    /// One of: STAGE_2, STAGE_3_OR_4, STAGE_1_TRANSITION.
    pub stage: &'static str,
    pub is_stage2: bool,
}

/// Score the trend template over ascending daily closes.
pub fn stage_analysis(closes: &[f64]) -> Option<MinerviniStage> {
    if closes.len() < MIN_BARS {
        return None;
    }

    let price = *closes.last()?;
    let sma50 = latest_sma(closes, 50)?;
    let sma150 = latest_sma(closes, 150)?;
    let sma200 = latest_sma(closes, 200)?;
    let sma200_prior = sma_at(closes, 200, SLOPE_LOOKBACK)?;

    let year = &closes[closes.len() - MIN_BARS..];
    let low_52w = year.iter().cloned().fold(f64::INFINITY, f64::min);
    let high_52w = year.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let close_6m_ago = closes[closes.len() - 126];

    let rules = [
        price > sma150 && price > sma200,
        sma150 > sma200,
        sma200 > sma200_prior,
        sma50 > sma150 && sma50 > sma200,
        price > sma50,
        price >= low_52w * 1.30,
        price >= high_52w * 0.75,
        price > close_6m_ago,
    ];
    let score = rules.iter().filter(|&&r| r).count() as u8;

    let sma200_declining = sma200 < sma200_prior;
    let (stage, is_stage2) = if price < sma200 && sma200_declining {
        ("STAGE_3_OR_4", false)
    } else if score >= 6 && rules[0] && rules[2] {
        ("STAGE_2", true)
    } else {
        ("STAGE_1_TRANSITION", false)
    };

    Some(MinerviniStage {
        score,
        stage,
        is_stage2,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_a_full_year_of_bars() {
        let closes: Vec<f64> = (0..251).map(|i| 100.0 + i as f64 * 0.1).collect();
        assert!(stage_analysis(&closes).is_none());
    }

    #[test]
    fn steady_uptrend_is_stage_two() {
        let closes: Vec<f64> = (0..300).map(|i| 100.0 + i as f64 * 0.5).collect();
        let stage = stage_analysis(&closes).unwrap();
        assert_eq!(stage.stage, "STAGE_2");
        assert!(stage.is_stage2);
        assert!(stage.score >= 7);
    }

    #[test]
    fn steady_downtrend_is_stage_three_or_four() {
        let closes: Vec<f64> = (0..300).map(|i| 300.0 - i as f64 * 0.5).collect();
        let stage = stage_analysis(&closes).unwrap();
        assert_eq!(stage.stage, "STAGE_3_OR_4");
        assert!(!stage.is_stage2);
    }

    #[test]
    fn flat_series_is_transitional() {
        let closes = vec![100.0; 300];
        let stage = stage_analysis(&closes).unwrap();
        assert_eq!(stage.stage, "STAGE_1_TRANSITION");
        assert!(!stage.is_stage2);
    }
}
