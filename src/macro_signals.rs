// =============================================================================
// Macro Signals — put/call contrarian gauge and sector momentum tiers
// =============================================================================
//
// Pure computations over provider core records; the scanner supplies the
// inputs and applies the resulting modifiers to its sentiment/technical
// scores (always re-clamped to [0, 100] at the call site).
// =============================================================================

use serde::Serialize;

/// Sector SPDR ETF -> sector name, as reported by the options provider's
/// `bestEtf` field.
pub const SECTOR_ETF_MAP: &[(&str, &str)] = &[
    ("XLK", "Technology"),
    ("XLV", "Healthcare"),
    ("XLF", "Financials"),
    ("XLE", "Energy"),
    ("XLI", "Industrials"),
    ("XLY", "Consumer Discretionary"),
    ("XLP", "Consumer Staples"),
    ("XLU", "Utilities"),
    ("XLRE", "Real Estate"),
    ("XLB", "Materials"),
    ("XLC", "Communication Services"),
];

pub fn sector_name_for_etf(etf: &str) -> Option<&'static str> {
    SECTOR_ETF_MAP
        .iter()
        .find(|(e, _)| e.eq_ignore_ascii_case(etf))
        .map(|(_, name)| *name)
}

// ---------------------------------------------------------------------------
// Put/call ratio
// ---------------------------------------------------------------------------

/// Contrarian read of the market-wide put/call ratio.
#[derive(Debug, Clone, Serialize)]
pub struct PutCallSignal {
    pub ratio: Option<f64>,
    /// Z-score of the current ratio against the trailing window.
    pub z_score: Option<f64>,
    /// One of: EXTREME_FEAR, FEAR, NEUTRAL, COMPLACENCY, EXTREME_COMPLACENCY,
    /// DISABLED.
    pub signal: &'static str,
    /// BULLISH or BEARISH, when the reading is contrarian-actionable.
    pub contrarian_bias: Option<&'static str>,
    /// Additive sentiment-score modifier, bounded to [-10, 10].
    pub score_modifier: f64,
}

impl PutCallSignal {
    pub fn disabled() -> Self {
        Self {
            ratio: None,
            z_score: None,
            signal: "DISABLED",
            contrarian_bias: None,
            score_modifier: 0.0,
        }
    }
}

/// Compute the contrarian put/call signal.
///
/// `put_volume`/`call_volume` are the current session's aggregate option
/// volumes; `trailing_ratios` is the recent daily history of the same ratio
/// (at least 10 points for a meaningful z-score).
pub fn put_call_signal(
    put_volume: f64,
    call_volume: f64,
    trailing_ratios: &[f64],
) -> PutCallSignal {
    if call_volume <= 0.0 || put_volume < 0.0 {
        return PutCallSignal::disabled();
    }
    let ratio = put_volume / call_volume;

    if trailing_ratios.len() < 10 {
        return PutCallSignal {
            ratio: Some(ratio),
            z_score: None,
            signal: "NEUTRAL",
            contrarian_bias: None,
            score_modifier: 0.0,
        };
    }

    let n = trailing_ratios.len() as f64;
    let mean = trailing_ratios.iter().sum::<f64>() / n;
    let var = trailing_ratios
        .iter()
        .map(|r| (r - mean).powi(2))
        .sum::<f64>()
        / n;
    let std = var.sqrt();
    if std <= 1e-12 {
        return PutCallSignal {
            ratio: Some(ratio),
            z_score: Some(0.0),
            signal: "NEUTRAL",
            contrarian_bias: None,
            score_modifier: 0.0,
        };
    }

    let z = (ratio - mean) / std;
    // Heavy put buying = fear = contrarian bullish, and vice versa.
    let (signal, contrarian_bias, score_modifier) = if z >= 2.0 {
        ("EXTREME_FEAR", Some("BULLISH"), 10.0)
    } else if z >= 1.0 {
        ("FEAR", Some("BULLISH"), 5.0)
    } else if z <= -2.0 {
        ("EXTREME_COMPLACENCY", Some("BEARISH"), -10.0)
    } else if z <= -1.0 {
        ("COMPLACENCY", Some("BEARISH"), -5.0)
    } else {
        ("NEUTRAL", None, 0.0)
    };

    PutCallSignal {
        ratio: Some(ratio),
        z_score: Some((z * 100.0).round() / 100.0),
        signal,
        contrarian_bias,
        score_modifier,
    }
}

// ---------------------------------------------------------------------------
// Sector momentum
// ---------------------------------------------------------------------------

/// A ticker's sector-momentum bucket.
#[derive(Debug, Clone, Serialize)]
pub struct SectorMomentum {
    pub sector: String,
    pub etf: String,
    /// 1-based rank among the eleven sector ETFs (1 = strongest).
    pub rank: Option<usize>,
    /// One of: LEADER, NEUTRAL, LAGGARD, UNKNOWN.
    pub tier: &'static str,
    /// Additive technical-score modifier.
    pub score_modifier: f64,
}

impl SectorMomentum {
    pub fn unknown() -> Self {
        Self {
            sector: String::new(),
            etf: String::new(),
            rank: None,
            tier: "UNKNOWN",
            score_modifier: 0.0,
        }
    }
}

/// Rank sector ETFs by 1-month momentum (descending) and bucket the given
/// ticker's sector ETF: top three are leaders (+5), bottom three laggards
/// (-5).
pub fn sector_momentum(ticker_etf: &str, etf_momentum_1m: &[(String, f64)]) -> SectorMomentum {
    if ticker_etf.is_empty() || etf_momentum_1m.is_empty() {
        return SectorMomentum::unknown();
    }

    let mut ranked: Vec<(&str, f64)> = etf_momentum_1m
        .iter()
        .map(|(etf, m)| (etf.as_str(), *m))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let rank = ranked
        .iter()
        .position(|(etf, _)| etf.eq_ignore_ascii_case(ticker_etf))
        .map(|i| i + 1);

    let Some(rank) = rank else {
        return SectorMomentum::unknown();
    };

    let total = ranked.len();
    let (tier, score_modifier) = if rank <= 3 {
        ("LEADER", 5.0)
    } else if rank > total.saturating_sub(3) {
        ("LAGGARD", -5.0)
    } else {
        ("NEUTRAL", 0.0)
    };

    SectorMomentum {
        sector: sector_name_for_etf(ticker_etf)
            .unwrap_or_default()
            .to_string(),
        etf: ticker_etf.to_uppercase(),
        rank: Some(rank),
        tier,
        score_modifier,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etf_map_covers_all_eleven_sectors() {
        assert_eq!(SECTOR_ETF_MAP.len(), 11);
        assert_eq!(sector_name_for_etf("xlk"), Some("Technology"));
        assert_eq!(sector_name_for_etf("ZZZ"), None);
    }

    #[test]
    fn put_call_disabled_on_bad_volume() {
        assert_eq!(put_call_signal(100.0, 0.0, &[]).signal, "DISABLED");
    }

    #[test]
    fn put_call_neutral_without_history() {
        let sig = put_call_signal(90.0, 100.0, &[0.9; 5]);
        assert_eq!(sig.signal, "NEUTRAL");
        assert!(sig.z_score.is_none());
        assert!((sig.ratio.unwrap() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn heavy_put_buying_is_contrarian_bullish() {
        // Trailing mean ~0.9 with modest dispersion; today's 1.3 is extreme.
        let trailing: Vec<f64> = (0..20)
            .map(|i| 0.85 + 0.01 * (i % 10) as f64)
            .collect();
        let sig = put_call_signal(130.0, 100.0, &trailing);
        assert_eq!(sig.signal, "EXTREME_FEAR");
        assert_eq!(sig.contrarian_bias, Some("BULLISH"));
        assert!((sig.score_modifier - 10.0).abs() < 1e-9);
    }

    #[test]
    fn complacency_is_contrarian_bearish() {
        let trailing: Vec<f64> = (0..20)
            .map(|i| 0.95 + 0.01 * (i % 10) as f64)
            .collect();
        let sig = put_call_signal(40.0, 100.0, &trailing);
        assert_eq!(sig.contrarian_bias, Some("BEARISH"));
        assert!(sig.score_modifier < 0.0);
    }

    #[test]
    fn flat_history_is_neutral() {
        let sig = put_call_signal(90.0, 100.0, &[0.9; 20]);
        assert_eq!(sig.signal, "NEUTRAL");
        assert_eq!(sig.score_modifier, 0.0);
    }

    #[test]
    fn sector_tiers() {
        let momentum: Vec<(String, f64)> = SECTOR_ETF_MAP
            .iter()
            .enumerate()
            .map(|(i, (etf, _))| (etf.to_string(), 10.0 - i as f64))
            .collect();

        let leader = sector_momentum("XLK", &momentum);
        assert_eq!(leader.tier, "LEADER");
        assert_eq!(leader.rank, Some(1));
        assert!((leader.score_modifier - 5.0).abs() < 1e-9);

        let laggard = sector_momentum("XLC", &momentum);
        assert_eq!(laggard.tier, "LAGGARD");
        assert!((laggard.score_modifier - (-5.0)).abs() < 1e-9);

        let mid = sector_momentum("XLI", &momentum);
        assert_eq!(mid.tier, "NEUTRAL");

        assert_eq!(sector_momentum("ZZZ", &momentum).tier, "UNKNOWN");
    }
}
