// =============================================================================
// Options Analyzer — contract parsing, Black-Scholes greeks, skew, ranking
// =============================================================================
//
// Parsing filters a standardized chain down to tradable candidates with a
// minimum expected-profit floor. Greeks missing from the provider are filled
// in with Black-Scholes (risk-free rate 4.5%, daily theta = annual / 365,
// put delta N(d1)-1, put rho negated). Ranking blends the adjusted
// technical/sentiment scores with an options-intrinsic component (liquidity,
// greeks profile, skew) and the fundamental score.
// =============================================================================

use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use tracing::debug;

use crate::analysis::exit_plan::ExitPlan;
use crate::analysis::sizing::SizingResult;
use crate::types::{OptionChain, OptionContract, OptionType, Strategy, VixRegime};

/// Risk-free rate used when the provider omits greeks.
pub const RISK_FREE_RATE: f64 = 0.045;

/// Default minimum expected-profit floor (percent).
const DEFAULT_MIN_PROFIT_PCT: f64 = 20.0;

// ---------------------------------------------------------------------------
// Black-Scholes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    /// Daily theta (annual / 365).
    pub theta: f64,
    /// Per 1 percentage point of volatility.
    pub vega: f64,
    /// Per 1 percentage point of rate; negated for puts.
    pub rho: f64,
}

/// Black-Scholes greeks for a European option.
///
/// `t_years` and `sigma` must be positive; degenerate inputs yield zeroed
/// greeks rather than NaNs.
pub fn black_scholes_greeks(
    s: f64,
    k: f64,
    t_years: f64,
    sigma: f64,
    r: f64,
    opt_type: OptionType,
) -> Greeks {
    if s <= 0.0 || k <= 0.0 || t_years <= 0.0 || sigma <= 0.0 {
        return Greeks::default();
    }

    let normal = Normal::new(0.0, 1.0).expect("unit normal is valid");
    let sqrt_t = t_years.sqrt();
    let d1 = ((s / k).ln() + (r + 0.5 * sigma * sigma) * t_years) / (sigma * sqrt_t);
    let d2 = d1 - sigma * sqrt_t;

    let nd1 = normal.cdf(d1);
    let pdf_d1 = normal.pdf(d1);
    let discount = (-r * t_years).exp();

    let gamma = pdf_d1 / (s * sigma * sqrt_t);
    let vega = s * pdf_d1 * sqrt_t / 100.0;

    let (delta, theta_annual, rho) = match opt_type {
        OptionType::Call => {
            let theta =
                -(s * pdf_d1 * sigma) / (2.0 * sqrt_t) - r * k * discount * normal.cdf(d2);
            (nd1, theta, k * t_years * discount * normal.cdf(d2) / 100.0)
        }
        OptionType::Put => {
            let theta =
                -(s * pdf_d1 * sigma) / (2.0 * sqrt_t) + r * k * discount * normal.cdf(-d2);
            (
                nd1 - 1.0,
                theta,
                -(k * t_years * discount * normal.cdf(-d2) / 100.0),
            )
        }
    };

    Greeks {
        delta,
        gamma,
        theta: theta_annual / 365.0,
        vega,
        rho,
    }
}

// ---------------------------------------------------------------------------
// Opportunity
// ---------------------------------------------------------------------------

/// Weighted components behind an opportunity score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub technical: f64,
    pub sentiment: f64,
    pub options: f64,
    pub fundamental: f64,
    pub technical_weight: f64,
    pub sentiment_weight: f64,
    pub options_weight: f64,
    pub fundamental_weight: f64,
}

/// An immutable scan-time candidate contract. Created by the analyzer, never
/// mutated afterwards (exit plan and sizing are attached during ranking).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub ticker: String,
    pub put_call: OptionType,
    pub strike_price: f64,
    pub expiration_date: chrono::NaiveDate,
    pub days_to_expiry: i64,
    pub premium: f64,
    pub bid: f64,
    pub ask: f64,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub implied_volatility: f64,
    pub open_interest: i64,
    pub volume: i64,
    pub underlying_price: f64,
    /// Expected profit over the holding horizon, percent of premium.
    pub profit_potential: f64,
    pub opportunity_score: f64,
    pub score_breakdown: ScoreBreakdown,
    pub exit_plan: Option<ExitPlan>,
    pub sizing: Option<SizingResult>,
}

/// Premium for a contract: mark when present, else mid, else last.
fn contract_premium(c: &OptionContract) -> f64 {
    if c.mark > 0.0 {
        c.mark
    } else if c.bid + c.ask > 0.0 {
        (c.bid + c.ask) / 2.0
    } else {
        c.last
    }
}

/// Parse one side of a standardized chain into candidate opportunities.
///
/// Contracts below the expected-profit floor (`min_profit_override`, default
/// 20%; the long-dated pipeline passes 30) are dropped. Greeks missing from
/// the provider are filled via Black-Scholes.
pub fn parse_options_chain(
    chain: &OptionChain,
    side: OptionType,
    current_price: f64,
    min_profit_override: Option<f64>,
) -> Vec<Opportunity> {
    let floor = min_profit_override.unwrap_or(DEFAULT_MIN_PROFIT_PCT);
    let mut out = Vec::new();

    for contract in chain.side(side) {
        let premium = contract_premium(contract);
        if premium <= 0.0 || contract.days_to_expiration <= 0 {
            continue;
        }

        let sigma = (contract.volatility / 100.0).max(0.0);
        let t_years = contract.days_to_expiration as f64 / 365.0;

        // Fill absent greeks from the model.
        let mut delta = contract.delta;
        let mut gamma = contract.gamma;
        let mut theta = contract.theta;
        let mut vega = contract.vega;
        if delta == 0.0 && sigma > 0.0 && current_price > 0.0 {
            let g = black_scholes_greeks(
                current_price,
                contract.strike_price,
                t_years,
                sigma,
                RISK_FREE_RATE,
                side,
            );
            delta = g.delta;
            if gamma == 0.0 {
                gamma = g.gamma;
            }
            if theta == 0.0 {
                theta = g.theta;
            }
            if vega == 0.0 {
                vega = g.vega;
            }
        }

        let profit_potential =
            expected_profit_pct(current_price, premium, delta, contract.volatility, t_years);
        if profit_potential < floor {
            continue;
        }

        out.push(Opportunity {
            ticker: chain.symbol.clone(),
            put_call: side,
            strike_price: contract.strike_price,
            expiration_date: contract.expiration_date,
            days_to_expiry: contract.days_to_expiration,
            premium,
            bid: contract.bid,
            ask: contract.ask,
            delta,
            gamma,
            theta,
            vega,
            implied_volatility: contract.volatility,
            open_interest: contract.open_interest,
            volume: contract.total_volume,
            underlying_price: current_price,
            profit_potential,
            opportunity_score: 0.0,
            score_breakdown: ScoreBreakdown::default(),
            exit_plan: None,
            sizing: None,
        });
    }

    debug!(
        symbol = %chain.symbol,
        side = %side,
        candidates = out.len(),
        floor,
        "chain parsed"
    );
    out
}

/// Expected option gain (percent of premium) for a one-sigma underlying move
/// over the remaining life.
fn expected_profit_pct(s: f64, premium: f64, delta: f64, iv_pct: f64, t_years: f64) -> f64 {
    if s <= 0.0 || premium <= 0.0 || t_years <= 0.0 {
        return 0.0;
    }
    let expected_move = s * (iv_pct / 100.0) * t_years.sqrt();
    (delta.abs() * expected_move / premium) * 100.0
}

// ---------------------------------------------------------------------------
// Skew
// ---------------------------------------------------------------------------

/// Map a provider-reported skew slope to a [0, 100] score (50 neutral).
pub fn skew_score_from_slope(r_slp30: f64) -> f64 {
    (50.0 + r_slp30 * 500.0).clamp(0.0, 100.0)
}

/// Chain-based skew fallback: compare near-the-money call vs put implied
/// volatilities (strikes within 5% of the underlying). Positive raw skew
/// (calls richer than puts) reads bullish.
pub fn calculate_skew(chain: &OptionChain, current_price: f64) -> Option<(f64, f64)> {
    if current_price <= 0.0 {
        return None;
    }
    let near = |c: &&OptionContract| {
        (c.strike_price - current_price).abs() / current_price <= 0.05 && c.volatility > 0.0
    };

    let call_ivs: Vec<f64> = chain
        .side(OptionType::Call)
        .filter(near)
        .map(|c| c.volatility)
        .collect();
    let put_ivs: Vec<f64> = chain
        .side(OptionType::Put)
        .filter(near)
        .map(|c| c.volatility)
        .collect();
    if call_ivs.is_empty() || put_ivs.is_empty() {
        return None;
    }

    let call_iv = call_ivs.iter().sum::<f64>() / call_ivs.len() as f64;
    let put_iv = put_ivs.iter().sum::<f64>() / put_ivs.len() as f64;
    if put_iv <= 0.0 {
        return None;
    }

    let raw = (call_iv - put_iv) / put_iv;
    Some((raw, skew_score_from_slope(raw)))
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Inputs to a ranking pass, carried alongside the adjusted scores.
#[derive(Debug, Clone)]
pub struct RankContext {
    pub strategy: Strategy,
    pub technical_score: f64,
    pub sentiment_score: f64,
    pub skew_score: f64,
    pub fundamental_score: f64,
    pub vix_regime: VixRegime,
    pub iv_percentile: f64,
    pub days_to_earnings: Option<i64>,
}

/// Options-intrinsic component: liquidity, spread, greeks profile, skew.
fn options_component(opp: &Opportunity, skew_score: f64) -> f64 {
    let mut score: f64 = 50.0;

    // Liquidity.
    if opp.open_interest >= 500 {
        score += 10.0;
    } else if opp.open_interest >= 100 {
        score += 5.0;
    } else if opp.open_interest < 10 {
        score -= 15.0;
    }
    if opp.volume >= 100 {
        score += 5.0;
    }

    // Spread quality.
    let mid = (opp.bid + opp.ask) / 2.0;
    if mid > 0.0 && opp.ask > opp.bid {
        let spread_pct = (opp.ask - opp.bid) / mid * 100.0;
        if spread_pct < 5.0 {
            score += 10.0;
        } else if spread_pct > 15.0 {
            score -= 10.0;
        }
    }

    // Delta profile: directional but not lottery-ticket.
    let d = opp.delta.abs();
    if (0.50..=0.80).contains(&d) {
        score += 10.0;
    } else if (0.25..0.50).contains(&d) {
        score += 5.0;
    } else if d < 0.15 {
        score -= 10.0;
    }

    // Theta burden relative to premium.
    if opp.premium > 0.0 && (opp.theta.abs() / opp.premium) * 100.0 > 1.0 {
        score -= 10.0;
    }

    // Skew tilt, centered at neutral.
    score += (skew_score - 50.0) * 0.2;

    score.clamp(0.0, 100.0)
}

/// Rank candidates by composite opportunity score. Ties break by open
/// interest, then volume, then tighter spread.
pub fn rank_opportunities(mut opps: Vec<Opportunity>, ctx: &RankContext) -> Vec<Opportunity> {
    const W_TECH: f64 = 0.35;
    const W_SENT: f64 = 0.20;
    const W_OPT: f64 = 0.30;
    const W_FUND: f64 = 0.15;

    for opp in &mut opps {
        let options_score = options_component(opp, ctx.skew_score);
        // Fundamental input is a small additive score (0..~25); scale to 0-100.
        let fundamental = (ctx.fundamental_score * 4.0).clamp(0.0, 100.0);

        let mut score = W_TECH * ctx.technical_score
            + W_SENT * ctx.sentiment_score
            + W_OPT * options_score
            + W_FUND * fundamental;

        // Expensive vol cuts forward edge.
        if ctx.iv_percentile > 85.0 {
            score -= 5.0;
        }
        // Imminent earnings are binary risk for short-dated styles.
        if let Some(dte) = ctx.days_to_earnings {
            if dte <= 7 && ctx.strategy != Strategy::Leap {
                score -= 8.0;
            }
        }
        if ctx.vix_regime == VixRegime::Crisis {
            score -= 5.0;
        }

        opp.opportunity_score = score.clamp(0.0, 100.0);
        opp.score_breakdown = ScoreBreakdown {
            technical: ctx.technical_score,
            sentiment: ctx.sentiment_score,
            options: options_score,
            fundamental,
            technical_weight: W_TECH,
            sentiment_weight: W_SENT,
            options_weight: W_OPT,
            fundamental_weight: W_FUND,
        };
    }

    opps.sort_by(|a, b| {
        b.opportunity_score
            .partial_cmp(&a.opportunity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.open_interest.cmp(&a.open_interest))
            .then_with(|| b.volume.cmp(&a.volume))
            .then_with(|| {
                let spread_a = a.ask - a.bid;
                let spread_b = b.ask - b.bid;
                spread_a
                    .partial_cmp(&spread_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });
    opps
}
