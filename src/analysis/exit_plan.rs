// =============================================================================
// Exit Planner — structured exit logic for single-leg calls and puts
// =============================================================================
//
// Per-strategy defaults are adjusted for the volatility regime, the IV
// percentile, and earnings proximity, then annotated with dollar levels for
// the actual contract cost. `should_exit` evaluates a live position against
// its plan in strict order: stop-loss, time-stop, profit targets, earnings.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{Strategy, VixRegime};

/// What to do when an exit rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitAction {
    Hold,
    Sell33Pct,
    Sell50Pct,
    SellRemaining,
    SellAll,
}

impl std::fmt::Display for ExitAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hold => write!(f, "hold"),
            Self::Sell33Pct => write!(f, "sell_33pct"),
            Self::Sell50Pct => write!(f, "sell_50pct"),
            Self::SellRemaining => write!(f, "sell_remaining"),
            Self::SellAll => write!(f, "sell_all"),
        }
    }
}

/// How the plan treats an upcoming earnings event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EarningsRule {
    HoldThrough,
    CloseBefore,
}

impl std::fmt::Display for EarningsRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HoldThrough => write!(f, "hold_through"),
            Self::CloseBefore => write!(f, "close_before"),
        }
    }
}

/// One tiered profit target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitTarget {
    /// Gain threshold, percent of premium.
    pub pct: f64,
    pub action: ExitAction,
    pub label: String,
    /// Dollar gain at this level for one contract, when premium is known.
    pub dollar: Option<f64>,
}

/// A complete exit plan for a single-leg position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitPlan {
    pub strategy: Strategy,
    /// Max loss, percent of premium (negative).
    pub stop_loss_pct: f64,
    pub profit_targets: Vec<ProfitTarget>,
    /// Exit when DTE falls to this or below; 0 disables the time stop.
    pub time_stop_dte: i64,
    pub trailing_stop_pct: f64,
    pub earnings_rule: EarningsRule,
    pub adjustments: Vec<String>,
    /// Dollar loss at the stop for one contract, when premium is known.
    pub stop_loss_dollar: Option<f64>,
    pub summary: String,
}

/// The exit decision for one evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitDecision {
    pub should_exit: bool,
    pub reason: String,
    pub action: ExitAction,
}

impl ExitDecision {
    fn hold(reason: &str) -> Self {
        Self {
            should_exit: false,
            reason: reason.to_string(),
            action: ExitAction::Hold,
        }
    }
}

fn target(pct: f64, action: ExitAction, label: &str) -> ProfitTarget {
    ProfitTarget {
        pct,
        action,
        label: label.to_string(),
        dollar: None,
    }
}

/// Strategy defaults before any adjustment.
fn strategy_defaults(strategy: Strategy) -> ExitPlan {
    let (stop_loss_pct, profit_targets, time_stop_dte, trailing_stop_pct, earnings_rule) =
        match strategy {
            Strategy::Leap => (
                -30.0,
                vec![
                    target(50.0, ExitAction::Sell33Pct, "Take 1/3 off at +50%"),
                    target(100.0, ExitAction::Sell33Pct, "Take 1/3 off at +100%"),
                    target(200.0, ExitAction::SellRemaining, "Close at +200% (3x)"),
                ],
                30,
                25.0,
                EarningsRule::HoldThrough,
            ),
            Strategy::Weekly => (
                -40.0,
                vec![
                    target(30.0, ExitAction::Sell50Pct, "Take half at +30%"),
                    target(75.0, ExitAction::SellRemaining, "Close at +75%"),
                ],
                1,
                20.0,
                EarningsRule::CloseBefore,
            ),
            Strategy::ZeroDte => (
                -50.0,
                vec![
                    target(20.0, ExitAction::Sell50Pct, "Scalp half at +20%"),
                    target(50.0, ExitAction::SellRemaining, "Close at +50%"),
                ],
                0,
                15.0,
                EarningsRule::CloseBefore,
            ),
        };

    ExitPlan {
        strategy,
        stop_loss_pct,
        profit_targets,
        time_stop_dte,
        trailing_stop_pct,
        earnings_rule,
        adjustments: Vec::new(),
        stop_loss_dollar: None,
        summary: String::new(),
    }
}

/// Generate an exit plan for a candidate position.
///
/// `premium` is the per-share option price (contract cost = premium x 100).
pub fn generate_exit_plan(
    premium: f64,
    strategy: Strategy,
    vix_regime: VixRegime,
    days_to_earnings: Option<i64>,
    iv_percentile: f64,
) -> ExitPlan {
    let mut plan = strategy_defaults(strategy);

    // Volatility regime: tighten in stressed tape.
    match vix_regime {
        VixRegime::Crisis => {
            plan.stop_loss_pct = (plan.stop_loss_pct + 10.0).max(-20.0);
            plan.trailing_stop_pct = (plan.trailing_stop_pct - 5.0).max(10.0);
            plan.adjustments
                .push("CRISIS: tightened stops (-20% max loss, narrower trail)".to_string());
        }
        VixRegime::Elevated => {
            plan.stop_loss_pct = (plan.stop_loss_pct + 5.0).max(-25.0);
            plan.adjustments
                .push("ELEVATED VIX: slightly tighter stops".to_string());
        }
        VixRegime::Normal => {}
    }

    // IV percentile: expensive vol -> take profits earlier; cheap vol -> let
    // winners run.
    if iv_percentile > 80.0 {
        for t in &mut plan.profit_targets {
            t.pct = (t.pct * 0.8).floor();
        }
        plan.adjustments.push(format!(
            "High IV ({iv_percentile:.0}%ile): lowered profit targets 20%"
        ));
    } else if iv_percentile < 20.0 {
        plan.trailing_stop_pct += 5.0;
        plan.adjustments.push(format!(
            "Low IV ({iv_percentile:.0}%ile): wider trailing stop (+5%)"
        ));
    }

    // Earnings proximity: binary risk forces close-before.
    if let Some(dte) = days_to_earnings {
        if dte > 0 {
            if dte <= 7 && strategy != Strategy::Leap {
                plan.earnings_rule = EarningsRule::CloseBefore;
                plan.adjustments
                    .push(format!("Earnings in {dte}d: CLOSE before event (binary risk)"));
            } else if dte <= 3 {
                plan.earnings_rule = EarningsRule::CloseBefore;
                plan.adjustments
                    .push(format!("Earnings in {dte}d: CLOSE before event (all strategies)"));
            }
        }
    }

    // Dollar levels for one contract.
    if premium > 0.0 {
        let contract_cost = premium * 100.0;
        plan.stop_loss_dollar =
            Some((contract_cost * plan.stop_loss_pct / 100.0 * 100.0).round() / 100.0);
        for t in &mut plan.profit_targets {
            t.dollar = Some((contract_cost * t.pct / 100.0 * 100.0).round() / 100.0);
        }
    }

    plan.summary = build_summary(&plan);
    plan
}

fn build_summary(plan: &ExitPlan) -> String {
    let mut lines = vec![format!("Exit Plan ({})", plan.strategy)];
    lines.push(format!("  Stop Loss: {}%", plan.stop_loss_pct));
    for t in &plan.profit_targets {
        let dollar = t
            .dollar
            .map(|d| format!(" (${d:.0})"))
            .unwrap_or_default();
        lines.push(format!("  Target: {}{dollar}", t.label));
    }
    if plan.time_stop_dte > 0 {
        lines.push(format!("  Time Stop: exit if < {} DTE", plan.time_stop_dte));
    }
    lines.push(format!("  Trailing Stop: {}%", plan.trailing_stop_pct));
    lines.push(format!("  Earnings Rule: {}", plan.earnings_rule));
    if !plan.adjustments.is_empty() {
        lines.push("  Adjustments:".to_string());
        for adj in &plan.adjustments {
            lines.push(format!("    - {adj}"));
        }
    }
    lines.join("\n")
}

/// Evaluate a live position against its plan.
///
/// Order: stop-loss, time-stop (disabled at 0), first profit target hit,
/// earnings proximity. Anything else holds.
pub fn should_exit(
    current_pnl_pct: f64,
    dte_remaining: i64,
    days_to_earnings: Option<i64>,
    plan: &ExitPlan,
) -> ExitDecision {
    // 1. Stop loss.
    if current_pnl_pct <= plan.stop_loss_pct {
        return ExitDecision {
            should_exit: true,
            reason: format!(
                "Stop loss hit ({current_pnl_pct:.1}% <= {}%)",
                plan.stop_loss_pct
            ),
            action: ExitAction::SellAll,
        };
    }

    // 2. Time stop (0 disables).
    if plan.time_stop_dte > 0 && dte_remaining <= plan.time_stop_dte {
        return ExitDecision {
            should_exit: true,
            reason: format!("Time stop ({dte_remaining} DTE <= {})", plan.time_stop_dte),
            action: ExitAction::SellAll,
        };
    }

    // 3. Profit targets, in order.
    for t in &plan.profit_targets {
        if current_pnl_pct >= t.pct {
            return ExitDecision {
                should_exit: true,
                reason: format!("Profit target hit ({current_pnl_pct:.1}% >= {}%)", t.pct),
                action: t.action,
            };
        }
    }

    // 4. Earnings proximity.
    if plan.earnings_rule == EarningsRule::CloseBefore {
        if let Some(dte) = days_to_earnings {
            if dte <= 1 {
                return ExitDecision {
                    should_exit: true,
                    reason: "Earnings imminent — close_before rule".to_string(),
                    action: ExitAction::SellAll,
                };
            }
        }
    }

    ExitDecision::hold("hold")
}
