// =============================================================================
// Position Sizer — fractional-Kelly sizing for single-leg options
// =============================================================================
//
// Kelly fraction f* = (p*b - q) / b with b = avg win % / avg loss %, capped
// at 0.25 to prevent over-betting. Win probability comes from |delta| (the
// best single proxy for finishing ITM) nudged by the opportunity score. Each
// strategy then applies its own fractional multiplier and hard caps, and the
// volatility regime scales the result down in stressed tape.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{Strategy, VixRegime};

/// Hard ceiling on the raw Kelly fraction.
const KELLY_CAP: f64 = 0.25;

/// Per-strategy sizing limits.
#[derive(Debug, Clone, Copy)]
struct StrategyLimits {
    max_pct_per_trade: f64,
    max_contracts: u32,
    kelly_multiplier: f64,
    min_contracts: u32,
}

fn limits_for(strategy: Strategy) -> StrategyLimits {
    match strategy {
        Strategy::Leap => StrategyLimits {
            max_pct_per_trade: 5.0,
            max_contracts: 10,
            kelly_multiplier: 0.5,
            min_contracts: 1,
        },
        Strategy::Weekly => StrategyLimits {
            max_pct_per_trade: 3.0,
            max_contracts: 5,
            kelly_multiplier: 0.33,
            min_contracts: 1,
        },
        Strategy::ZeroDte => StrategyLimits {
            max_pct_per_trade: 1.5,
            max_contracts: 3,
            kelly_multiplier: 0.25,
            min_contracts: 1,
        },
    }
}

/// Expected average loss used in the Kelly ratio, mirroring the exit-plan
/// stop defaults.
fn assumed_stop_loss_pct(strategy: Strategy) -> f64 {
    match strategy {
        Strategy::Leap => 30.0,
        Strategy::Weekly | Strategy::ZeroDte => 40.0,
    }
}

/// The sizing recommendation attached to each opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingResult {
    pub contracts: u32,
    pub total_cost: f64,
    pub pct_of_account: f64,
    /// Kelly after the strategy multiplier and regime scaling.
    pub kelly_fraction: f64,
    /// Kelly before the multiplier (already capped at 0.25).
    pub kelly_raw: f64,
    pub win_probability: f64,
    pub method: String,
    pub max_pct_per_trade: f64,
    pub max_contracts: u32,
    pub adjustments: Vec<String>,
}

impl SizingResult {
    fn empty(method: &str, reason: String) -> Self {
        Self {
            contracts: 0,
            total_cost: 0.0,
            pct_of_account: 0.0,
            kelly_fraction: 0.0,
            kelly_raw: 0.0,
            win_probability: 0.0,
            method: method.to_string(),
            max_pct_per_trade: 0.0,
            max_contracts: 0,
            adjustments: vec![reason],
        }
    }
}

/// Account-aware position sizer.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    pub account_size: f64,
    /// Maximum total portfolio exposure across all positions, percent.
    pub max_total_exposure_pct: f64,
}

impl PositionSizer {
    pub fn new(account_size: f64) -> Self {
        Self {
            account_size,
            max_total_exposure_pct: 25.0,
        }
    }

    /// Kelly fraction f* = (p*b - q) / b, capped at [0, 0.25].
    ///
    /// Returns 0 when the loss leg or win probability is degenerate.
    pub fn kelly_fraction(win_probability: f64, avg_win_pct: f64, avg_loss_pct: f64) -> f64 {
        if avg_loss_pct <= 0.0 || win_probability <= 0.0 {
            return 0.0;
        }
        let p = win_probability.clamp(0.0, 1.0);
        let q = 1.0 - p;
        let b = avg_win_pct / avg_loss_pct;
        if b <= 0.0 {
            return 0.0;
        }
        ((p * b - q) / b).clamp(0.0, KELLY_CAP)
    }

    /// Win probability from |delta| plus a bounded score nudge; score alone
    /// when delta is absent.
    pub fn estimate_win_probability(delta: Option<f64>, opportunity_score: f64) -> f64 {
        let p = match delta {
            Some(d) if d.abs() > 0.0 => d.abs() + (opportunity_score - 50.0) / 200.0,
            _ => opportunity_score / 100.0,
        };
        p.clamp(0.05, 0.95)
    }

    /// Size a single-leg option position.
    #[allow(clippy::too_many_arguments)]
    pub fn calculate(
        &self,
        premium: f64,
        delta: Option<f64>,
        opportunity_score: f64,
        profit_potential: f64,
        strategy: Strategy,
        vix_regime: VixRegime,
        current_exposure_pct: f64,
    ) -> SizingResult {
        let limits = limits_for(strategy);
        let contract_cost = premium * 100.0;
        let mut adjustments = Vec::new();

        if contract_cost <= 0.0 {
            return SizingResult::empty("error_no_premium", "Premium is zero — cannot size".into());
        }

        // 1. Kelly.
        let win_prob = Self::estimate_win_probability(delta, opportunity_score);
        let kelly_raw = Self::kelly_fraction(
            win_prob,
            profit_potential.max(1.0),
            assumed_stop_loss_pct(strategy),
        );

        // 2. Strategy multiplier.
        let mut kelly_adjusted = kelly_raw * limits.kelly_multiplier;
        adjustments.push(format!(
            "Kelly: {kelly_raw:.3} x {} = {kelly_adjusted:.3}",
            limits.kelly_multiplier
        ));

        // 3. Regime scaling.
        match vix_regime {
            VixRegime::Crisis => {
                kelly_adjusted *= 0.5;
                adjustments.push("CRISIS: halved position size".into());
            }
            VixRegime::Elevated => {
                kelly_adjusted *= 0.75;
                adjustments.push("ELEVATED VIX: reduced position size 25%".into());
            }
            VixRegime::Normal => {}
        }

        // 4. Dollars -> contracts.
        let dollar_amount = self.account_size * kelly_adjusted;
        let mut contracts = ((dollar_amount / contract_cost).floor() as u32).max(1);

        // 5. Per-trade caps.
        let max_dollar = self.account_size * limits.max_pct_per_trade / 100.0;
        if contracts as f64 * contract_cost > max_dollar {
            contracts = ((max_dollar / contract_cost).floor() as u32).max(1);
            adjustments.push(format!(
                "Capped at {}% of account (${max_dollar:.0})",
                limits.max_pct_per_trade
            ));
        }
        if contracts > limits.max_contracts {
            contracts = limits.max_contracts;
            adjustments.push(format!("Capped at {} contracts", limits.max_contracts));
        }

        // 6. Portfolio exposure remaining.
        let remaining_pct = self.max_total_exposure_pct - current_exposure_pct;
        if remaining_pct <= 0.0 {
            return SizingResult {
                kelly_fraction: kelly_adjusted,
                kelly_raw,
                win_probability: win_prob,
                ..SizingResult::empty(
                    "exposure_limit_reached",
                    format!(
                        "Total exposure {current_exposure_pct:.1}% >= limit {}%",
                        self.max_total_exposure_pct
                    ),
                )
            };
        }
        let max_from_exposure = self.account_size * remaining_pct / 100.0;
        if contracts as f64 * contract_cost > max_from_exposure {
            contracts = ((max_from_exposure / contract_cost).floor() as u32).max(1);
            adjustments.push(format!(
                "Reduced for portfolio exposure (remaining: {remaining_pct:.1}%)"
            ));
        }

        contracts = contracts.max(limits.min_contracts);
        let total_cost = contracts as f64 * contract_cost;
        let pct_of_account = total_cost / self.account_size * 100.0;

        SizingResult {
            contracts,
            total_cost: (total_cost * 100.0).round() / 100.0,
            pct_of_account: (pct_of_account * 100.0).round() / 100.0,
            kelly_fraction: (kelly_adjusted * 10_000.0).round() / 10_000.0,
            kelly_raw: (kelly_raw * 10_000.0).round() / 10_000.0,
            win_probability: (win_prob * 1_000.0).round() / 1_000.0,
            method: format!("fractional_kelly ({}x)", limits.kelly_multiplier),
            max_pct_per_trade: limits.max_pct_per_trade,
            max_contracts: limits.max_contracts,
            adjustments,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kelly_degenerate_inputs_return_zero() {
        assert_eq!(PositionSizer::kelly_fraction(0.6, 50.0, 0.0), 0.0);
        assert_eq!(PositionSizer::kelly_fraction(0.6, 50.0, -5.0), 0.0);
        assert_eq!(PositionSizer::kelly_fraction(0.0, 50.0, 30.0), 0.0);
        assert_eq!(PositionSizer::kelly_fraction(-0.2, 50.0, 30.0), 0.0);
    }

    #[test]
    fn kelly_is_capped_at_quarter() {
        // Very favourable edge would exceed 0.25 uncapped.
        let k = PositionSizer::kelly_fraction(0.9, 100.0, 20.0);
        assert!((k - KELLY_CAP).abs() < 1e-12);
    }

    #[test]
    fn win_probability_paths() {
        // Delta path: 0.55 + (70-50)/200 = 0.65.
        let p = PositionSizer::estimate_win_probability(Some(0.55), 70.0);
        assert!((p - 0.65).abs() < 1e-12);
        // Score-only path.
        let p = PositionSizer::estimate_win_probability(None, 72.0);
        assert!((p - 0.72).abs() < 1e-12);
        // Clamped.
        let p = PositionSizer::estimate_win_probability(Some(0.99), 100.0);
        assert!((p - 0.95).abs() < 1e-12);
        let p = PositionSizer::estimate_win_probability(None, 0.0);
        assert!((p - 0.05).abs() < 1e-12);
    }

    #[test]
    fn leap_sizing_reference_scenario() {
        // account 50_000, LEAP, premium 12, delta 0.55, score 70,
        // profit potential 50, NORMAL regime.
        let sizer = PositionSizer::new(50_000.0);
        let result = sizer.calculate(
            12.0,
            Some(0.55),
            70.0,
            50.0,
            Strategy::Leap,
            VixRegime::Normal,
            0.0,
        );

        // p = 0.65, b = 50/30, raw Kelly ~0.44 -> capped 0.25,
        // adjusted 0.125 -> $6,250 -> 5 contracts -> 5% cap -> 2 contracts.
        assert!((result.win_probability - 0.65).abs() < 1e-9);
        assert!((result.kelly_raw - 0.25).abs() < 1e-9);
        assert!((result.kelly_fraction - 0.125).abs() < 1e-9);
        assert_eq!(result.contracts, 2);
        assert!((result.total_cost - 2_400.0).abs() < 1e-9);
        assert!((result.pct_of_account - 4.8).abs() < 1e-9);
        assert!(result.method.contains("0.5"));
    }

    #[test]
    fn crisis_halves_the_fraction() {
        let sizer = PositionSizer::new(50_000.0);
        let normal = sizer.calculate(
            12.0,
            Some(0.55),
            70.0,
            50.0,
            Strategy::Leap,
            VixRegime::Normal,
            0.0,
        );
        let crisis = sizer.calculate(
            12.0,
            Some(0.55),
            70.0,
            50.0,
            Strategy::Leap,
            VixRegime::Crisis,
            0.0,
        );
        assert!((crisis.kelly_fraction - normal.kelly_fraction / 2.0).abs() < 1e-9);
        assert!(crisis.contracts <= normal.contracts);
    }

    #[test]
    fn zero_premium_cannot_size() {
        let sizer = PositionSizer::new(50_000.0);
        let result = sizer.calculate(
            0.0,
            Some(0.5),
            60.0,
            30.0,
            Strategy::Weekly,
            VixRegime::Normal,
            0.0,
        );
        assert_eq!(result.contracts, 0);
        assert_eq!(result.method, "error_no_premium");
    }

    #[test]
    fn exposure_limit_blocks_new_positions() {
        let sizer = PositionSizer::new(50_000.0);
        let result = sizer.calculate(
            12.0,
            Some(0.55),
            70.0,
            50.0,
            Strategy::Leap,
            VixRegime::Normal,
            25.0,
        );
        assert_eq!(result.contracts, 0);
        assert_eq!(result.method, "exposure_limit_reached");
    }

    #[test]
    fn contract_cap_applies() {
        // Cheap contract: dollar sizing would buy dozens; capped at 3 for
        // same-day trades (1.5% of 100k = $1,500 / $50 = 30 -> cap 3).
        let sizer = PositionSizer::new(100_000.0);
        let result = sizer.calculate(
            0.5,
            Some(0.6),
            70.0,
            40.0,
            Strategy::ZeroDte,
            VixRegime::Normal,
            0.0,
        );
        assert_eq!(result.contracts, 3);
    }
}
