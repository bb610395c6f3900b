// =============================================================================
// Scanner Orchestrator — per-ticker pipeline: gates, data fetch, score, rank
// =============================================================================
//
// For a (ticker, strategy, direction) request the pipeline runs:
//
//   1. universe gate        5. rating score         9. chain fetch / inject
//   2. quality gate         6. indicators+sentiment 10. rank + annotate
//   3. trend gate           7. context fetch        11. persist + report
//   4. price                8. score adjustments
//
// Gates produce structured verdicts, not errors. Context components that a
// provider denies or drops mark the scan degraded and the pipeline carries
// on with best-effort scores.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

use crate::analysis::exit_plan::generate_exit_plan;
use crate::analysis::options::{
    calculate_skew, parse_options_chain, rank_opportunities, skew_score_from_slope, Opportunity,
    RankContext,
};
use crate::analysis::sizing::PositionSizer;
use crate::analysis::technical::{all_indicators, prepare_series, technical_score, IndicatorBundle};
use crate::errors::{FetchOutcome, ProviderError};
use crate::macro_signals::{put_call_signal, sector_momentum, PutCallSignal, SectorMomentum};
use crate::providers::finnhub::FinnhubClient;
use crate::providers::fmp::FmpClient;
use crate::providers::orats::{CoreRecord, OratsClient, TickerCoverage};
use crate::regime::{RegimeContext, RegimeDetector};
use crate::sentiment;
use crate::store::trades::TradeStatus;
use crate::store::UserScope;
use crate::types::{OptionChain, OptionType, Strategy};

/// Tickers exempt from corporate-fundamentals requirements (indices/ETFs).
pub const NON_CORPORATE: &[&str] = &[
    "VIX", "SPX", "NDX", "RUT", "DJI", "SPY", "QQQ", "IWM", "DIA", "TLT", "GLD", "SLV",
];

/// Minimum DTE retained for long-dated scans.
const LEAP_MIN_DTE: i64 = 150;
/// Maximum DTE retained for weekly scans.
const WEEKLY_MAX_DTE: i64 = 14;
/// Calendar days of history requested (roughly 275 trading bars).
const HISTORY_DAYS: i64 = 400;
/// How long bulk core records stay fresh.
const CORES_CACHE_TTL: Duration = Duration::from_secs(600);

/// Quality-gate thresholds.
const MIN_ROE_PCT: f64 = 15.0;
const MIN_GROSS_MARGIN_PCT: f64 = 40.0;

/// Why a scan stopped before ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GateVerdict {
    NotCovered,
    QualityFailed(String),
    WrongTrend(String),
    NoHistory,
    NoPrice,
    InsufficientData,
}

impl std::fmt::Display for GateVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotCovered => write!(f, "NOT_COVERED"),
            Self::QualityFailed(why) => write!(f, "QUALITY_FAILED: {why}"),
            Self::WrongTrend(why) => write!(f, "WRONG_TREND: {why}"),
            Self::NoHistory => write!(f, "NO_HISTORY"),
            Self::NoPrice => write!(f, "NO_PRICE"),
            Self::InsufficientData => write!(f, "INSUFFICIENT_DATA"),
        }
    }
}

/// Scan request for one ticker.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub ticker: String,
    pub strategy: Strategy,
    pub direction: OptionType,
    /// Strict mode aborts on quality failures; otherwise the scan is flagged
    /// speculative.
    pub strict_mode: bool,
    /// Injected chain for batch mode (skips the chain fetch).
    pub pre_fetched_chain: Option<OptionChain>,
}

/// Everything a completed scan reports back.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub ticker: String,
    pub strategy: Strategy,
    pub direction: OptionType,
    pub current_price: f64,
    /// Price came from the latest historical close (T-1), not a live quote.
    pub price_is_stale: bool,
    pub technical_score: f64,
    pub sentiment_score: f64,
    pub raw_technical_score: f64,
    pub raw_sentiment_score: f64,
    pub fundamental_score: f64,
    pub fundamental_badges: Vec<String>,
    pub speculative: bool,
    pub indicators: IndicatorBundle,
    pub skew_raw: f64,
    pub skew_score: f64,
    pub regime: RegimeContext,
    pub put_call: PutCallSignal,
    pub sector: SectorMomentum,
    pub iv_percentile: f64,
    pub days_to_earnings: Option<i64>,
    pub implied_earnings_move: Option<f64>,
    pub dividend_date: Option<String>,
    pub opportunities: Vec<Opportunity>,
    /// Components that degraded (provider denied or unavailable).
    pub degraded: Vec<String>,
}

/// The scan result envelope: ranked opportunities or a gate verdict.
#[derive(Debug, Clone, Serialize)]
pub enum ScanOutcome {
    Report(Box<ScanReport>),
    Gate(GateVerdict),
}

/// The scanner: a struct of adapter handles built once at startup; per-scan
/// state is local to each call.
pub struct Scanner {
    orats: Arc<OratsClient>,
    finnhub: Arc<FinnhubClient>,
    fmp: Arc<FmpClient>,
    regime: Arc<RegimeDetector>,
    universe: RwLock<Option<HashMap<String, TickerCoverage>>>,
    cores_cache: RwLock<Option<(Instant, Vec<CoreRecord>)>>,
    /// Trailing daily put/call ratios for the contrarian z-score.
    pc_history: RwLock<Vec<f64>>,
}

impl Scanner {
    pub fn new(
        orats: Arc<OratsClient>,
        finnhub: Arc<FinnhubClient>,
        fmp: Arc<FmpClient>,
        regime: Arc<RegimeDetector>,
    ) -> Self {
        Self {
            orats,
            finnhub,
            fmp,
            regime,
            universe: RwLock::new(None),
            cores_cache: RwLock::new(None),
            pc_history: RwLock::new(Vec::new()),
        }
    }

    /// Run the full pipeline for one ticker.
    ///
    /// With a user scope, scan results are persisted and sizing uses the
    /// user's account balance and live exposure; without one, sizing falls
    /// back to defaults and nothing is written.
    pub async fn scan_ticker(
        &self,
        scope: Option<&UserScope>,
        req: &ScanRequest,
    ) -> ScanOutcome {
        let ticker = OratsClient::clean_ticker(&req.ticker);
        let mut degraded: Vec<String> = Vec::new();
        info!(ticker = %ticker, strategy = %req.strategy, direction = %req.direction, "scan starting");

        // ── 1. Universe gate ────────────────────────────────────────────
        match self.is_covered(&ticker).await {
            Some(false) => {
                warn!(ticker = %ticker, "not in provider universe");
                return ScanOutcome::Gate(GateVerdict::NotCovered);
            }
            Some(true) => {}
            None => degraded.push("universe".to_string()),
        }

        // ── 2. Quality gate ─────────────────────────────────────────────
        let is_non_corporate = NON_CORPORATE.contains(&ticker.as_str());
        let mut fundamental_score = 0.0;
        let mut fundamental_badges = Vec::new();
        let mut speculative = false;

        if !is_non_corporate && self.finnhub.is_configured() {
            match self.finnhub.get_basic_financials(&ticker).await {
                Ok(FetchOutcome::Ok(financials)) => {
                    let reasons = quality_fail_reasons(financials.roe, financials.gross_margin);
                    if !reasons.is_empty() {
                        let why = reasons.join(", ");
                        if req.strict_mode {
                            return ScanOutcome::Gate(GateVerdict::QualityFailed(why));
                        }
                        speculative = true;
                        fundamental_badges.push("Speculative".to_string());
                        fundamental_badges.push(format!("Bad fundamentals: {why}"));
                    }
                }
                Ok(FetchOutcome::Forbidden) => {
                    if req.strict_mode {
                        return ScanOutcome::Gate(GateVerdict::QualityFailed(
                            "fundamentals provider denied access".to_string(),
                        ));
                    }
                    degraded.push("fundamentals".to_string());
                }
                Ok(FetchOutcome::Unavailable) | Err(_) => {
                    degraded.push("fundamentals".to_string());
                }
            }
        }

        // ── 3. Trend gate ───────────────────────────────────────────────
        let history = match self.orats.get_history(&ticker, HISTORY_DAYS).await {
            Ok(h) if !h.is_empty() => h,
            Ok(_) => return ScanOutcome::Gate(GateVerdict::NoHistory),
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "history fetch failed");
                return ScanOutcome::Gate(GateVerdict::NoHistory);
            }
        };
        let Some(series) = prepare_series(&history) else {
            return ScanOutcome::Gate(GateVerdict::InsufficientData);
        };

        let closes = series.closes();
        let Some(&history_price) = closes.last() else {
            return ScanOutcome::Gate(GateVerdict::InsufficientData);
        };
        let sma200 = crate::indicators::sma::latest_sma(&closes, 200);
        let sma50 = crate::indicators::sma::latest_sma(&closes, 50);
        if let Err(verdict) = trend_gate(req.direction, history_price, sma200, sma50) {
            return ScanOutcome::Gate(verdict);
        }

        // ── 4. Price ────────────────────────────────────────────────────
        let (current_price, price_is_stale) = match self.orats.get_quote(&ticker).await {
            Ok(Some(q)) if q.price > 0.0 => (q.price, false),
            _ => {
                if history_price > 0.0 {
                    warn!(ticker = %ticker, price = history_price, "live quote failed — using T-1 close");
                    (history_price, true)
                } else {
                    return ScanOutcome::Gate(GateVerdict::NoPrice);
                }
            }
        };

        // ── 5. Rating score ─────────────────────────────────────────────
        if self.fmp.is_configured() {
            if let Some(rating) = self.fmp.get_rating(&ticker).await {
                let points = rating_points(rating.rating_score);
                if points > 0.0 {
                    fundamental_score += points;
                    fundamental_badges.push(format!("Rating: {}", rating.rating));
                }
            }
        }

        // ── 6. Indicators and sentiment ─────────────────────────────────
        let Some(indicators) = all_indicators(&series) else {
            return ScanOutcome::Gate(GateVerdict::InsufficientData);
        };
        let raw_technical = technical_score(&indicators);
        let raw_sentiment = self
            .acquire_sentiment(&ticker, is_non_corporate, &mut degraded)
            .await;

        // ── 7. Context fetch ────────────────────────────────────────────
        let regime_ctx = self.refresh_regime(&mut degraded).await;

        let cores = match self.orats.get_hist_cores(&ticker).await {
            Ok(cores) => cores,
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "core metrics fetch failed");
                degraded.push("cores".to_string());
                None
            }
        };
        let iv_percentile = cores
            .as_ref()
            .and_then(|c| c.iv_pctile_1y)
            .unwrap_or(50.0);
        let days_to_earnings = cores.as_ref().and_then(|c| c.days_to_next_ern);
        let implied_earnings_move = cores.as_ref().and_then(|c| c.implied_earnings_move);
        let dividend_date = cores.as_ref().and_then(|c| c.div_date.clone());
        let best_etf = cores
            .as_ref()
            .and_then(|c| c.best_etf.clone())
            .unwrap_or_default();

        let (put_call, sector) = self.macro_context(&best_etf, &mut degraded).await;

        // ── 8. Score adjustments (bounded to [0, 100]) ──────────────────
        let mut adjusted_technical = clamp_score(raw_technical + regime_ctx.score_penalty);
        let adjusted_sentiment = clamp_score(raw_sentiment + put_call.score_modifier);
        adjusted_technical = clamp_score(adjusted_technical + sector.score_modifier);

        if let Some(rsi2) = &indicators.rsi2 {
            adjusted_technical =
                clamp_score(adjusted_technical + rsi2_adjustment(rsi2.signal, req.direction));
        }
        if let Some(vwap) = &indicators.vwap {
            adjusted_technical = clamp_score(adjusted_technical + vwap.score_boost);
        }
        if let Some(stage) = &indicators.minervini {
            if stage.is_stage2 {
                adjusted_technical = clamp_score(adjusted_technical + 8.0);
            } else if stage.stage == "STAGE_3_OR_4" && !is_non_corporate {
                adjusted_technical = clamp_score(adjusted_technical - 10.0);
            }
        }

        // ── Skew ────────────────────────────────────────────────────────
        let mut skew_raw = 0.0;
        let mut skew_score = 50.0;
        match self.orats.get_live_summary(&ticker).await {
            Ok(Some(summary)) => {
                let slope = summary.r_slp30.unwrap_or(0.0);
                skew_raw = slope;
                skew_score = skew_score_from_slope(slope);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "skew summary fetch failed");
                degraded.push("skew".to_string());
            }
        }

        // ── 9. Chain ────────────────────────────────────────────────────
        let chain = if let Some(chain) = &req.pre_fetched_chain {
            Some(chain.clone())
        } else {
            match self.orats.get_option_chain(&ticker).await {
                Ok(chain) => Some(chain),
                Err(e) => {
                    warn!(ticker = %ticker, error = %e, "chain fetch failed");
                    degraded.push("chain".to_string());
                    None
                }
            }
        };

        // Chain-based skew fallback when the summary produced nothing.
        if skew_score == 50.0 {
            if let Some(chain) = &chain {
                if let Some((raw, score)) = calculate_skew(chain, current_price) {
                    skew_raw = raw;
                    skew_score = score;
                }
            }
        }

        // ── 10. Rank and annotate ───────────────────────────────────────
        let mut opportunities = Vec::new();
        if let Some(chain) = &chain {
            let floor = match req.strategy {
                Strategy::Leap => Some(30.0),
                _ => None,
            };
            let parsed = parse_options_chain(chain, req.direction, current_price, floor);
            let filtered = filter_by_strategy_dte(
                parsed,
                req.strategy,
                crate::market_hours::session_date(chrono::Utc::now()),
            );

            let ctx = RankContext {
                strategy: req.strategy,
                technical_score: adjusted_technical,
                sentiment_score: adjusted_sentiment,
                skew_score,
                fundamental_score,
                vix_regime: regime_ctx.regime,
                iv_percentile,
                days_to_earnings,
            };
            let mut ranked = rank_opportunities(filtered, &ctx);

            // Sizing context from the caller's settings when available.
            let (account_size, exposure_pct) = match scope {
                Some(scope) => self.sizing_context(scope).await,
                None => (50_000.0, 0.0),
            };
            let sizer = PositionSizer::new(account_size);

            for opp in &mut ranked {
                opp.exit_plan = Some(generate_exit_plan(
                    opp.premium,
                    req.strategy,
                    regime_ctx.regime,
                    days_to_earnings,
                    iv_percentile,
                ));
                opp.sizing = Some(sizer.calculate(
                    opp.premium,
                    Some(opp.delta),
                    opp.opportunity_score,
                    opp.profit_potential,
                    req.strategy,
                    regime_ctx.regime,
                    exposure_pct,
                ));
            }
            opportunities = ranked;
        }

        // ── 11. Persist and report ──────────────────────────────────────
        if let Some(scope) = scope {
            let best = opportunities.first().map(|o| o.opportunity_score);
            if let Err(e) = scope
                .insert_scan_result(
                    &ticker,
                    &req.strategy.to_string(),
                    adjusted_technical,
                    adjusted_sentiment,
                    opportunities.len(),
                    best,
                )
                .await
            {
                warn!(ticker = %ticker, error = %e, "scan history insert failed");
            }
        }

        info!(
            ticker = %ticker,
            technical = adjusted_technical,
            sentiment = adjusted_sentiment,
            opportunities = opportunities.len(),
            degraded = ?degraded,
            "scan complete"
        );

        ScanOutcome::Report(Box::new(ScanReport {
            ticker,
            strategy: req.strategy,
            direction: req.direction,
            current_price,
            price_is_stale,
            technical_score: adjusted_technical,
            sentiment_score: adjusted_sentiment,
            raw_technical_score: raw_technical,
            raw_sentiment_score: raw_sentiment,
            fundamental_score,
            fundamental_badges,
            speculative,
            indicators,
            skew_raw,
            skew_score,
            regime: regime_ctx,
            put_call,
            sector,
            iv_percentile,
            days_to_earnings,
            implied_earnings_move,
            dividend_date,
            opportunities,
            degraded,
        }))
    }

    // -- pipeline internals ----------------------------------------------

    /// Universe membership: `Some(bool)` when known, `None` when coverage
    /// could not be established at all.
    async fn is_covered(&self, ticker: &str) -> Option<bool> {
        if let Some(universe) = self.universe.read().as_ref() {
            return Some(universe.contains_key(ticker));
        }
        match self.orats.get_ticker_universe().await {
            Ok(universe) => {
                let covered = universe.contains_key(ticker);
                *self.universe.write() = Some(universe);
                Some(covered)
            }
            Err(e) => {
                // Fall back to a single-ticker coverage probe.
                warn!(error = %e, "universe fetch failed — probing single ticker");
                if self.orats.check_ticker(ticker).await {
                    Some(true)
                } else {
                    None
                }
            }
        }
    }

    /// Sentiment: provider aggregate first, then headline analysis, then the
    /// neutral default.
    async fn acquire_sentiment(
        &self,
        ticker: &str,
        is_non_corporate: bool,
        degraded: &mut Vec<String>,
    ) -> f64 {
        if !self.finnhub.is_configured() {
            return 50.0;
        }

        match self.finnhub.get_news_sentiment(ticker).await {
            Ok(FetchOutcome::Ok(agg)) => {
                if let Some(score) = agg.company_news_score {
                    return clamp_score(score * 100.0);
                }
                if let Some(bullish) = agg.sentiment.and_then(|s| s.bullish_percent) {
                    return clamp_score(bullish * 100.0);
                }
            }
            Ok(FetchOutcome::Forbidden) | Ok(FetchOutcome::Unavailable) => {}
            Err(e) => {
                warn!(ticker, error = %e, "aggregate sentiment failed");
            }
        }

        // Indices rarely have company news; skip the headline fallback.
        if is_non_corporate {
            return 50.0;
        }

        match self.finnhub.get_company_news(ticker).await {
            Ok(FetchOutcome::Ok(articles)) if !articles.is_empty() => {
                let texts: Vec<String> = articles
                    .iter()
                    .map(|a| format!("{} {}", a.headline, a.summary))
                    .collect();
                sentiment::analyze_articles(&texts).score
            }
            Ok(_) => 50.0,
            Err(e) => {
                warn!(ticker, error = %e, "company news failed");
                degraded.push("sentiment".to_string());
                50.0
            }
        }
    }

    /// Refresh the volatility regime from a live index quote.
    async fn refresh_regime(&self, degraded: &mut Vec<String>) -> RegimeContext {
        match self.orats.get_quote("VIX").await {
            Ok(Some(q)) if q.price > 0.0 => self.regime.update(Some(q.price)),
            Ok(_) => self.regime.update(None),
            Err(e) => {
                warn!(error = %e, "volatility index quote failed");
                degraded.push("regime".to_string());
                self.regime.update(None)
            }
        }
    }

    /// Put/call and sector momentum from the bulk core records (cached).
    async fn macro_context(
        &self,
        ticker_etf: &str,
        degraded: &mut Vec<String>,
    ) -> (PutCallSignal, SectorMomentum) {
        let cores = match self.cached_cores().await {
            Ok(cores) => cores,
            Err(e) => {
                warn!(error = %e, "bulk cores fetch failed");
                degraded.push("macro".to_string());
                return (PutCallSignal::disabled(), SectorMomentum::unknown());
            }
        };

        // Market-wide put/call via the S&P proxy record.
        let put_call = cores
            .iter()
            .find(|c| c.ticker == "SPY")
            .and_then(|spy| match (spy.p_volu, spy.c_volu) {
                (Some(p), Some(c)) if c > 0.0 => {
                    let history = self.pc_history.read().clone();
                    let signal = put_call_signal(p, c, &history);
                    if let Some(ratio) = signal.ratio {
                        let mut hist = self.pc_history.write();
                        hist.push(ratio);
                        let overflow = hist.len().saturating_sub(60);
                        if overflow > 0 {
                            hist.drain(..overflow);
                        }
                    }
                    Some(signal)
                }
                _ => None,
            })
            .unwrap_or_else(PutCallSignal::disabled);

        // Sector ETF momentum ranking.
        let etf_momentum: Vec<(String, f64)> = crate::macro_signals::SECTOR_ETF_MAP
            .iter()
            .filter_map(|(etf, _)| {
                cores
                    .iter()
                    .find(|c| c.ticker.eq_ignore_ascii_case(etf))
                    .and_then(|c| c.stk_px_chng_1m)
                    .map(|m| (etf.to_string(), m))
            })
            .collect();
        let sector = sector_momentum(ticker_etf, &etf_momentum);

        (put_call, sector)
    }

    async fn cached_cores(&self) -> Result<Vec<CoreRecord>, ProviderError> {
        if let Some((fetched_at, cores)) = self.cores_cache.read().as_ref() {
            if fetched_at.elapsed() < CORES_CACHE_TTL {
                return Ok(cores.clone());
            }
        }
        let cores = self.orats.get_cores_bulk().await?;
        *self.cores_cache.write() = Some((Instant::now(), cores.clone()));
        Ok(cores)
    }

    /// Account size and current exposure for sizing, from the user's
    /// settings and active trades.
    async fn sizing_context(&self, scope: &UserScope) -> (f64, f64) {
        let account_size = match scope.get_settings().await {
            Ok(Some(settings)) => settings.account_balance,
            _ => 50_000.0,
        };
        let exposure = match scope
            .list_by_status(&[
                TradeStatus::Open,
                TradeStatus::PartiallyFilled,
                TradeStatus::Closing,
            ])
            .await
        {
            Ok(trades) => trades
                .iter()
                .map(|t| t.entry_price * t.qty as f64 * 100.0)
                .sum::<f64>(),
            Err(_) => 0.0,
        };
        let exposure_pct = if account_size > 0.0 {
            exposure / account_size * 100.0
        } else {
            0.0
        };
        (account_size, exposure_pct)
    }
}

// ---------------------------------------------------------------------------
// Pure gate / adjustment helpers
// ---------------------------------------------------------------------------

fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

/// Quality-gate failures for the given fundamentals (percent units).
pub fn quality_fail_reasons(roe: Option<f64>, gross_margin: Option<f64>) -> Vec<String> {
    let mut reasons = Vec::new();
    if let Some(roe) = roe {
        if roe < MIN_ROE_PCT {
            reasons.push(format!("low ROE ({roe:.1}%)"));
        }
    }
    if let Some(margin) = gross_margin {
        if margin < MIN_GROSS_MARGIN_PCT {
            reasons.push(format!("low gross margin ({margin:.1}%)"));
        }
    }
    reasons
}

/// Direction-aware long-term trend gate: calls need price above the long SMA,
/// puts below. Falls back to the 50-bar average when 200 bars are missing;
/// with neither average the gate cannot be evaluated.
pub fn trend_gate(
    direction: OptionType,
    price: f64,
    sma200: Option<f64>,
    sma50: Option<f64>,
) -> Result<(), GateVerdict> {
    let Some(sma) = sma200.or(sma50) else {
        return Err(GateVerdict::InsufficientData);
    };
    match direction {
        OptionType::Call if price < sma => Err(GateVerdict::WrongTrend(format!(
            "downtrend for calls (price {price:.2} < SMA {sma:.2})"
        ))),
        OptionType::Put if price > sma => Err(GateVerdict::WrongTrend(format!(
            "uptrend for puts (price {price:.2} > SMA {sma:.2})"
        ))),
        _ => Ok(()),
    }
}

/// Direction-aware RSI-2 extreme-band modifier: oversold favors calls,
/// overbought favors puts, and contrarian extremes penalize the opposite
/// side.
pub fn rsi2_adjustment(signal: &str, direction: OptionType) -> f64 {
    match (signal, direction) {
        ("EXTREME_OVERSOLD", OptionType::Call) => 12.0,
        ("OVERSOLD", OptionType::Call) => 6.0,
        ("EXTREME_OVERBOUGHT", OptionType::Put) => 12.0,
        ("OVERBOUGHT", OptionType::Put) => 6.0,
        ("EXTREME_OVERBOUGHT", OptionType::Call) => -8.0,
        ("EXTREME_OVERSOLD", OptionType::Put) => -8.0,
        _ => 0.0,
    }
}

/// FMP rating score (1..5) to additive fundamental points.
pub fn rating_points(rating_score: Option<i64>) -> f64 {
    match rating_score {
        Some(s) if s >= 4 => 15.0,
        Some(3) => 10.0,
        _ => 0.0,
    }
}

/// Strategy-specific expiry window.
///
/// Long-dated keeps 150+ DTE; weekly keeps contracts expiring by next week's
/// Friday (this week's Friday counts as "this week" even on a Friday);
/// same-day keeps only today's expiry.
pub fn filter_by_strategy_dte(
    opps: Vec<Opportunity>,
    strategy: Strategy,
    today: chrono::NaiveDate,
) -> Vec<Opportunity> {
    let weekly_cutoff = crate::market_hours::next_friday(today, 1);
    opps.into_iter()
        .filter(|o| match strategy {
            Strategy::Leap => o.days_to_expiry >= LEAP_MIN_DTE,
            Strategy::Weekly => {
                o.days_to_expiry <= WEEKLY_MAX_DTE && o.expiration_date <= weekly_cutoff
            }
            Strategy::ZeroDte => o.days_to_expiry == 0,
        })
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn trend_gate_is_direction_aware() {
        // Price 100 below the 120 long SMA: calls blocked, puts pass.
        let err = trend_gate(OptionType::Call, 100.0, Some(120.0), None).unwrap_err();
        assert!(matches!(err, GateVerdict::WrongTrend(_)));
        assert!(trend_gate(OptionType::Put, 100.0, Some(120.0), None).is_ok());

        // Inverted: uptrend blocks puts.
        assert!(trend_gate(OptionType::Call, 130.0, Some(120.0), None).is_ok());
        let err = trend_gate(OptionType::Put, 130.0, Some(120.0), None).unwrap_err();
        assert!(matches!(err, GateVerdict::WrongTrend(_)));
    }

    #[test]
    fn trend_gate_falls_back_to_short_average() {
        assert!(trend_gate(OptionType::Call, 110.0, None, Some(100.0)).is_ok());
        assert!(matches!(
            trend_gate(OptionType::Call, 110.0, None, None),
            Err(GateVerdict::InsufficientData)
        ));
    }

    #[test]
    fn quality_gate_thresholds() {
        assert!(quality_fail_reasons(Some(20.0), Some(45.0)).is_empty());
        assert_eq!(quality_fail_reasons(Some(10.0), Some(45.0)).len(), 1);
        assert_eq!(quality_fail_reasons(Some(10.0), Some(30.0)).len(), 2);
        // Missing values pass rather than over-filtering.
        assert!(quality_fail_reasons(None, None).is_empty());
    }

    #[test]
    fn rsi2_adjustments_per_direction() {
        assert_eq!(rsi2_adjustment("EXTREME_OVERSOLD", OptionType::Call), 12.0);
        assert_eq!(rsi2_adjustment("OVERSOLD", OptionType::Call), 6.0);
        assert_eq!(rsi2_adjustment("EXTREME_OVERBOUGHT", OptionType::Put), 12.0);
        assert_eq!(rsi2_adjustment("OVERBOUGHT", OptionType::Put), 6.0);
        assert_eq!(rsi2_adjustment("EXTREME_OVERBOUGHT", OptionType::Call), -8.0);
        assert_eq!(rsi2_adjustment("EXTREME_OVERSOLD", OptionType::Put), -8.0);
        assert_eq!(rsi2_adjustment("NEUTRAL", OptionType::Call), 0.0);
        assert_eq!(rsi2_adjustment("OVERBOUGHT", OptionType::Call), 0.0);
    }

    #[test]
    fn rating_points_mapping() {
        assert_eq!(rating_points(Some(5)), 15.0);
        assert_eq!(rating_points(Some(4)), 15.0);
        assert_eq!(rating_points(Some(3)), 10.0);
        assert_eq!(rating_points(Some(2)), 0.0);
        assert_eq!(rating_points(None), 0.0);
    }

    #[test]
    fn non_corporate_list_members() {
        assert!(NON_CORPORATE.contains(&"SPX"));
        assert!(NON_CORPORATE.contains(&"SPY"));
        assert!(!NON_CORPORATE.contains(&"AAPL"));
    }

    fn opp_with_dte(today: NaiveDate, dte: i64) -> Opportunity {
        Opportunity {
            ticker: "TEST".into(),
            put_call: OptionType::Call,
            strike_price: 100.0,
            expiration_date: today + chrono::Duration::days(dte),
            days_to_expiry: dte,
            premium: 5.0,
            bid: 4.9,
            ask: 5.1,
            delta: 0.5,
            gamma: 0.01,
            theta: -0.02,
            vega: 0.1,
            implied_volatility: 30.0,
            open_interest: 100,
            volume: 10,
            underlying_price: 100.0,
            profit_potential: 50.0,
            opportunity_score: 0.0,
            score_breakdown: Default::default(),
            exit_plan: None,
            sizing: None,
        }
    }

    #[test]
    fn dte_windows_per_strategy() {
        // Monday 2026-03-16; next week's Friday is 2026-03-27.
        let today = NaiveDate::from_ymd_opt(2026, 3, 16).unwrap();
        let opps = vec![
            opp_with_dte(today, 0),
            opp_with_dte(today, 4),   // this week's Friday
            opp_with_dte(today, 11),  // next week's Friday
            opp_with_dte(today, 20),  // beyond the weekly window
            opp_with_dte(today, 200),
        ];

        let leap = filter_by_strategy_dte(opps.clone(), Strategy::Leap, today);
        assert_eq!(leap.len(), 1);
        assert_eq!(leap[0].days_to_expiry, 200);

        let weekly = filter_by_strategy_dte(opps.clone(), Strategy::Weekly, today);
        let dtes: Vec<i64> = weekly.iter().map(|o| o.days_to_expiry).collect();
        assert_eq!(dtes, vec![0, 4, 11]);

        let zero = filter_by_strategy_dte(opps, Strategy::ZeroDte, today);
        assert_eq!(zero.len(), 1);
        assert_eq!(zero[0].days_to_expiry, 0);
    }

    #[test]
    fn gate_verdict_strings() {
        assert_eq!(GateVerdict::NotCovered.to_string(), "NOT_COVERED");
        assert_eq!(GateVerdict::NoHistory.to_string(), "NO_HISTORY");
        assert!(GateVerdict::WrongTrend("x".into())
            .to_string()
            .starts_with("WRONG_TREND"));
    }
}
