// =============================================================================
// Shared types used across the Meridian options engine
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Side of an option contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// Single-letter OCC code ('C' or 'P').
    pub fn occ_code(self) -> char {
        match self {
            Self::Call => 'C',
            Self::Put => 'P',
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "CALL" | "C" => Some(Self::Call),
            "PUT" | "P" => Some(Self::Put),
            _ => None,
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "CALL"),
            Self::Put => write!(f, "PUT"),
        }
    }
}

/// Direction of the option position itself (we buy or sell the contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl Default for TradeDirection {
    fn default() -> Self {
        Self::Buy
    }
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Strategy variant of a scan or trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    /// Long-dated options (150+ DTE).
    Leap,
    /// Weekly expiries.
    Weekly,
    /// Same-day expiries.
    ZeroDte,
}

impl Strategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "LEAP" | "LEAPS" => Some(Self::Leap),
            "WEEKLY" => Some(Self::Weekly),
            "0DTE" | "ZERODTE" => Some(Self::ZeroDte),
            _ => None,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leap => write!(f, "LEAP"),
            Self::Weekly => write!(f, "WEEKLY"),
            Self::ZeroDte => write!(f, "0DTE"),
        }
    }
}

/// Volatility regime derived from the volatility index level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VixRegime {
    Normal,
    Elevated,
    Crisis,
}

impl Default for VixRegime {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::fmt::Display for VixRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Elevated => write!(f, "ELEVATED"),
            Self::Crisis => write!(f, "CRISIS"),
        }
    }
}

/// Which broker environment a trade routes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerMode {
    TradierSandbox,
    TradierLive,
}

impl BrokerMode {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "LIVE" | "TRADIER_LIVE" => Self::TradierLive,
            _ => Self::TradierSandbox,
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, Self::TradierLive)
    }
}

impl Default for BrokerMode {
    fn default() -> Self {
        Self::TradierSandbox
    }
}

impl std::fmt::Display for BrokerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TradierSandbox => write!(f, "TRADIER_SANDBOX"),
            Self::TradierLive => write!(f, "TRADIER_LIVE"),
        }
    }
}

// ---------------------------------------------------------------------------
// Market data records
// ---------------------------------------------------------------------------

/// A single daily OHLCV bar. `datetime` is epoch milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Underlying price history, ascending by date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistory {
    pub symbol: String,
    pub candles: Vec<Candle>,
}

impl PriceHistory {
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }
}

/// Normalized underlying quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnderlyingQuote {
    pub symbol: String,
    pub price: f64,
    pub volume: i64,
    pub bid: f64,
    pub ask: f64,
}

/// A normalized option contract as emitted by the options-data adapter.
///
/// Implied volatility is always expressed in percent (e.g. 32.5, not 0.325).
/// Put deltas and put rhos are sign-corrected (negative).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionContract {
    pub put_call: OptionType,
    pub symbol: String,
    pub description: String,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub mark: f64,
    pub total_volume: i64,
    pub open_interest: i64,
    pub volatility: f64,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
    pub strike_price: f64,
    pub expiration_date: NaiveDate,
    pub days_to_expiration: i64,
}

/// Standardized option chain: per side, `expiry-key -> strike -> contracts`.
///
/// The expiry key is `"YYYY-MM-DD:DTE"` so callers can read days-to-expiry
/// without re-parsing dates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionChain {
    pub symbol: String,
    pub call_exp_date_map:
        std::collections::BTreeMap<String, std::collections::BTreeMap<String, Vec<OptionContract>>>,
    pub put_exp_date_map:
        std::collections::BTreeMap<String, std::collections::BTreeMap<String, Vec<OptionContract>>>,
}

impl OptionChain {
    /// Iterate all contracts of one side across every expiry and strike.
    pub fn side(&self, side: OptionType) -> impl Iterator<Item = &OptionContract> {
        let map = match side {
            OptionType::Call => &self.call_exp_date_map,
            OptionType::Put => &self.put_exp_date_map,
        };
        map.values().flat_map(|strikes| strikes.values().flatten())
    }

    pub fn contract_count(&self) -> usize {
        self.side(OptionType::Call).count() + self.side(OptionType::Put).count()
    }
}

/// Option quote used for fill confirmation and price snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionQuote {
    pub bid: f64,
    pub ask: f64,
    /// Theoretical value when available, else mid-price, else 0.
    pub mark: f64,
    pub underlying: f64,
    pub volume: i64,
    pub oi: i64,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    /// Implied volatility in percent.
    pub iv: f64,
}

/// Normalize a provider-reported implied volatility to percent.
///
/// Providers are inconsistent about units per field: a value above 10 is
/// treated as already-percent, anything else as a fraction.
pub fn iv_to_percent(raw: f64) -> f64 {
    if raw > 10.0 {
        raw
    } else {
        (raw * 100.0 * 100.0).round() / 100.0
    }
}

// ---------------------------------------------------------------------------
// Trade context snapshot
// ---------------------------------------------------------------------------

/// Scanner-context snapshot persisted with each trade as JSON.
///
/// All fields are optional with serde defaults so older rows keep loading as
/// the schema grows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeContext {
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub opportunity_score: Option<f64>,
    #[serde(default)]
    pub technical_score: Option<f64>,
    #[serde(default)]
    pub sentiment_score: Option<f64>,
    #[serde(default)]
    pub fundamental_score: Option<f64>,
    #[serde(default)]
    pub skew_score: Option<f64>,
    #[serde(default)]
    pub delta_at_entry: Option<f64>,
    #[serde(default)]
    pub iv_at_entry: Option<f64>,
    #[serde(default)]
    pub vix_regime: Option<String>,
    #[serde(default)]
    pub iv_percentile: Option<f64>,
    #[serde(default)]
    pub days_to_earnings: Option<i64>,
    #[serde(default)]
    pub gate_verdict: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_type_roundtrip() {
        assert_eq!(OptionType::parse("call"), Some(OptionType::Call));
        assert_eq!(OptionType::parse("PUT"), Some(OptionType::Put));
        assert_eq!(OptionType::parse("x"), None);
        assert_eq!(OptionType::Call.to_string(), "CALL");
        assert_eq!(OptionType::Put.occ_code(), 'P');
    }

    #[test]
    fn strategy_parse_aliases() {
        assert_eq!(Strategy::parse("leaps"), Some(Strategy::Leap));
        assert_eq!(Strategy::parse("0dte"), Some(Strategy::ZeroDte));
        assert_eq!(Strategy::Weekly.to_string(), "WEEKLY");
    }

    #[test]
    fn broker_mode_defaults_to_sandbox() {
        assert_eq!(BrokerMode::parse("garbage"), BrokerMode::TradierSandbox);
        assert_eq!(BrokerMode::parse("TRADIER_LIVE"), BrokerMode::TradierLive);
        assert!(!BrokerMode::default().is_live());
    }

    #[test]
    fn iv_unit_heuristic() {
        // Fractional IV scales to percent.
        assert!((iv_to_percent(0.325) - 32.5).abs() < 1e-9);
        // Already-percent values pass through untouched.
        assert!((iv_to_percent(45.0) - 45.0).abs() < 1e-9);
        assert!((iv_to_percent(10.5) - 10.5).abs() < 1e-9);
    }

    #[test]
    fn trade_context_tolerates_missing_fields() {
        let ctx: TradeContext = serde_json::from_str("{}").unwrap();
        assert!(ctx.strategy.is_none());
        assert!(ctx.iv_percentile.is_none());

        let ctx: TradeContext =
            serde_json::from_str(r#"{"strategy":"LEAP","opportunity_score":71.5}"#).unwrap();
        assert_eq!(ctx.strategy.as_deref(), Some("LEAP"));
        assert!((ctx.opportunity_score.unwrap() - 71.5).abs() < 1e-9);
    }

    #[test]
    fn chain_side_iteration_counts() {
        let mut chain = OptionChain {
            symbol: "AAPL".into(),
            ..Default::default()
        };
        let contract = OptionContract {
            put_call: OptionType::Call,
            symbol: "AAPL_2026-06-20_C150".into(),
            description: "AAPL 2026-06-20 150 CALL".into(),
            bid: 5.0,
            ask: 5.2,
            last: 5.1,
            mark: 5.1,
            total_volume: 100,
            open_interest: 1000,
            volatility: 30.0,
            delta: 0.55,
            gamma: 0.01,
            theta: -0.02,
            vega: 0.10,
            rho: 0.05,
            strike_price: 150.0,
            expiration_date: NaiveDate::from_ymd_opt(2026, 6, 20).unwrap(),
            days_to_expiration: 320,
        };
        chain
            .call_exp_date_map
            .entry("2026-06-20:320".into())
            .or_default()
            .entry("150".into())
            .or_default()
            .push(contract);
        assert_eq!(chain.side(OptionType::Call).count(), 1);
        assert_eq!(chain.side(OptionType::Put).count(), 0);
        assert_eq!(chain.contract_count(), 1);
    }
}
