// =============================================================================
// Volatility Regime Detector — VIX-level classification with cached state
// =============================================================================
//
// Classifies the tape into three regimes from the volatility index level:
//
//   VIX > 30  => CRISIS     (score penalty -15, size multiplier 0.5)
//   VIX > 20  => ELEVATED   (score penalty  -8, size multiplier 0.75)
//   otherwise => NORMAL     (no penalty,        multiplier 1.0)
//
// When the index quote is unavailable the detector reports NORMAL with
// `level: None` and `is_fallback: true`. Consumers must treat the missing
// level as absent — never as zero or a stale reading.
// =============================================================================

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::VixRegime;

/// Full regime snapshot handed to the scanner, exit planner, and sizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeContext {
    pub regime: VixRegime,
    /// The index level behind the classification; `None` when the quote
    /// failed and the regime is a fallback.
    pub level: Option<f64>,
    /// Additive technical-score penalty (non-positive).
    pub score_penalty: f64,
    /// Multiplier applied to position sizing.
    pub position_size_multiplier: f64,
    pub is_fallback: bool,
}

impl RegimeContext {
    pub fn fallback() -> Self {
        Self {
            regime: VixRegime::Normal,
            level: None,
            score_penalty: 0.0,
            position_size_multiplier: 1.0,
            is_fallback: true,
        }
    }
}

/// Classify a volatility index level.
pub fn classify(vix_level: f64) -> RegimeContext {
    let (regime, score_penalty, position_size_multiplier) = if vix_level > 30.0 {
        (VixRegime::Crisis, -15.0, 0.5)
    } else if vix_level > 20.0 {
        (VixRegime::Elevated, -8.0, 0.75)
    } else {
        (VixRegime::Normal, 0.0, 1.0)
    };

    RegimeContext {
        regime,
        level: Some(vix_level),
        score_penalty,
        position_size_multiplier,
        is_fallback: false,
    }
}

/// Thread-safe detector caching the latest regime context.
pub struct RegimeDetector {
    state: RwLock<RegimeContext>,
}

impl RegimeDetector {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegimeContext::fallback()),
        }
    }

    /// Update from a fresh index quote. A missing quote records the fallback
    /// context rather than keeping a stale level alive.
    pub fn update(&self, vix_level: Option<f64>) -> RegimeContext {
        let ctx = match vix_level {
            Some(level) if level > 0.0 => {
                let ctx = classify(level);
                debug!(level, regime = %ctx.regime, "volatility regime updated");
                ctx
            }
            _ => {
                warn!("volatility index quote unavailable — regime falls back to NORMAL");
                RegimeContext::fallback()
            }
        };
        *self.state.write() = ctx.clone();
        ctx
    }

    /// Latest cached context without refetching.
    pub fn current(&self) -> RegimeContext {
        self.state.read().clone()
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_tiers() {
        let c = classify(15.0);
        assert_eq!(c.regime, VixRegime::Normal);
        assert_eq!(c.score_penalty, 0.0);
        assert_eq!(c.position_size_multiplier, 1.0);

        let c = classify(25.0);
        assert_eq!(c.regime, VixRegime::Elevated);
        assert_eq!(c.score_penalty, -8.0);
        assert_eq!(c.position_size_multiplier, 0.75);

        let c = classify(35.0);
        assert_eq!(c.regime, VixRegime::Crisis);
        assert_eq!(c.score_penalty, -15.0);
        assert_eq!(c.position_size_multiplier, 0.5);
    }

    #[test]
    fn boundary_values() {
        assert_eq!(classify(20.0).regime, VixRegime::Normal);
        assert_eq!(classify(20.01).regime, VixRegime::Elevated);
        assert_eq!(classify(30.0).regime, VixRegime::Elevated);
        assert_eq!(classify(30.01).regime, VixRegime::Crisis);
    }

    #[test]
    fn missing_quote_falls_back_without_a_level() {
        let detector = RegimeDetector::new();
        let ctx = detector.update(None);
        assert!(ctx.is_fallback);
        assert_eq!(ctx.level, None);
        assert_eq!(ctx.regime, VixRegime::Normal);

        // A bogus non-positive level is also a fallback.
        let ctx = detector.update(Some(0.0));
        assert!(ctx.is_fallback);
    }

    #[test]
    fn fallback_replaces_stale_level() {
        let detector = RegimeDetector::new();
        detector.update(Some(35.0));
        assert_eq!(detector.current().regime, VixRegime::Crisis);

        detector.update(None);
        let ctx = detector.current();
        assert_eq!(ctx.level, None, "stale level must not survive a failed quote");
        assert_eq!(ctx.regime, VixRegime::Normal);
    }
}
