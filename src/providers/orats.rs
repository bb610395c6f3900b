// =============================================================================
// ORATS adapter — options chains, IV metrics, history, quotes
// =============================================================================
//
// Normalizes the provider's flattened "wide" strike rows (one row per strike
// carrying both call and put columns) into the standardized per-side chain
// shape, and exposes the IV/earnings/dividend context the scanner consumes.
//
// Provider quirks absorbed here:
//   - index tickers use plain symbols (SPX, NDX, VIX); DJI aliases to DJX
//   - greeks are shared per strike row; put delta/rho are sign-corrected
//   - per-field volatility units vary; values are scaled to percent
//   - /hist/dailies returns all history; the date range is cut client-side
// =============================================================================

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::errors::ProviderError;
use crate::retry::RetryPolicy;
use crate::types::{
    Candle, OptionChain, OptionContract, OptionQuote, OptionType, PriceHistory, UnderlyingQuote,
};

const BASE_URL: &str = "https://api.orats.io/datav2";

/// Index aliases: common names mapped to the provider's listing.
const INDEX_ALIASES: &[(&str, &str)] = &[("DJI", "DJX")];

/// Coverage window for one ticker in the provider universe.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TickerCoverage {
    #[serde(rename = "minDate")]
    pub min_date: Option<String>,
    #[serde(rename = "maxDate")]
    pub max_date: Option<String>,
}

/// One flattened strike row from /live/strikes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StrikeRow {
    pub ticker: String,
    #[serde(rename = "expirDate")]
    pub expir_date: String,
    pub strike: f64,

    // Underlying price candidates, in preference order.
    #[serde(rename = "stockPrice")]
    pub stock_price: Option<f64>,
    #[serde(rename = "tickerPrice")]
    pub ticker_price: Option<f64>,
    pub price: Option<f64>,
    pub last: Option<f64>,
    #[serde(rename = "pxCls")]
    pub px_cls: Option<f64>,
    #[serde(rename = "priorCls")]
    pub prior_cls: Option<f64>,

    pub volume: Option<i64>,
    #[serde(rename = "stockVolume")]
    pub stock_volume: Option<i64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    #[serde(rename = "stockBid")]
    pub stock_bid: Option<f64>,
    #[serde(rename = "stockAsk")]
    pub stock_ask: Option<f64>,

    // Call side.
    #[serde(rename = "callBidPrice")]
    pub call_bid_price: Option<f64>,
    #[serde(rename = "callAskPrice")]
    pub call_ask_price: Option<f64>,
    #[serde(rename = "callPrice")]
    pub call_price: Option<f64>,
    #[serde(rename = "callValue")]
    pub call_value: Option<f64>,
    #[serde(rename = "callVolume")]
    pub call_volume: Option<i64>,
    #[serde(rename = "callOpenInterest")]
    pub call_open_interest: Option<i64>,
    #[serde(rename = "callMidIv")]
    pub call_mid_iv: Option<f64>,

    // Put side.
    #[serde(rename = "putBidPrice")]
    pub put_bid_price: Option<f64>,
    #[serde(rename = "putAskPrice")]
    pub put_ask_price: Option<f64>,
    #[serde(rename = "putPrice")]
    pub put_price: Option<f64>,
    #[serde(rename = "putValue")]
    pub put_value: Option<f64>,
    #[serde(rename = "putVolume")]
    pub put_volume: Option<i64>,
    #[serde(rename = "putOpenInterest")]
    pub put_open_interest: Option<i64>,
    #[serde(rename = "putMidIv")]
    pub put_mid_iv: Option<f64>,

    // Greeks, shared per strike row.
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub rho: Option<f64>,
    #[serde(rename = "smvVol")]
    pub smv_vol: Option<f64>,
}

/// Live IV-surface summary (/live/summaries).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LiveSummary {
    #[serde(rename = "rSlp30")]
    pub r_slp30: Option<f64>,
    pub skewing: Option<f64>,
    pub contango: Option<f64>,
}

/// Core ticker metrics (/hist/cores and /cores).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoreRecord {
    pub ticker: String,
    #[serde(rename = "bestEtf")]
    pub best_etf: Option<String>,
    #[serde(rename = "ivPctile1y")]
    pub iv_pctile_1y: Option<f64>,
    #[serde(rename = "daysToNextErn")]
    pub days_to_next_ern: Option<i64>,
    #[serde(rename = "impliedEarningsMove")]
    pub implied_earnings_move: Option<f64>,
    #[serde(rename = "divDate")]
    pub div_date: Option<String>,
    #[serde(rename = "stkPxChng1m")]
    pub stk_px_chng_1m: Option<f64>,
    #[serde(rename = "cVolu")]
    pub c_volu: Option<f64>,
    #[serde(rename = "pVolu")]
    pub p_volu: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    #[serde(default)]
    data: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct HistDailyRow {
    #[serde(rename = "tradeDate")]
    trade_date: String,
    open: Option<f64>,
    #[serde(rename = "hiPx")]
    hi_px: Option<f64>,
    #[serde(rename = "loPx")]
    lo_px: Option<f64>,
    #[serde(rename = "clsPx")]
    cls_px: Option<f64>,
    #[serde(rename = "stockVolume")]
    stock_volume: Option<f64>,
}

/// ORATS API client.
pub struct OratsClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OratsClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(5))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
            client,
            retry: RetryPolicy::api(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Canonical symbol form: strip quote prefixes, apply index aliases.
    pub fn clean_ticker(ticker: &str) -> String {
        let clean = ticker
            .replace('$', "")
            .replace(".X", "")
            .trim()
            .to_uppercase();
        INDEX_ALIASES
            .iter()
            .find(|(from, _)| *from == clean)
            .map(|(_, to)| to.to_string())
            .unwrap_or(clean)
    }

    async fn get_envelope<T: serde::de::DeserializeOwned + std::default::Default>(
        &self,
        path: &str,
        extra: Vec<(&'static str, String)>,
        timeout: Option<std::time::Duration>,
    ) -> Result<Vec<T>, ProviderError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut params: Vec<(&str, String)> = vec![("token", self.api_key.clone())];
        params.extend(extra);

        let mut req = self.client.get(&url).query(&params);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }

        let resp = req.send().await.map_err(ProviderError::from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            let detail = format!("{path} -> {status}: {snippet}");
            return Err(ProviderError::from_status(status.as_u16(), detail));
        }

        let envelope: DataEnvelope<T> = resp
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("{path} body: {e}")))?;
        Ok(envelope.data)
    }

    /// Full ticker universe with coverage date ranges.
    pub async fn get_ticker_universe(
        &self,
    ) -> Result<HashMap<String, TickerCoverage>, ProviderError> {
        #[derive(Deserialize, Default)]
        struct UniverseRow {
            ticker: String,
            #[serde(flatten)]
            coverage: TickerCoverage,
        }

        let rows: Vec<UniverseRow> = self
            .retry
            .run("orats.universe", || {
                self.get_envelope("tickers", Vec::new(), None)
            })
            .await?;

        let universe: HashMap<String, TickerCoverage> = rows
            .into_iter()
            .map(|r| (r.ticker, r.coverage))
            .collect();
        info!(tickers = universe.len(), "provider universe loaded");
        Ok(universe)
    }

    /// Whether a single ticker is covered.
    pub async fn check_ticker(&self, ticker: &str) -> bool {
        let ticker = Self::clean_ticker(ticker);
        let result: Result<Vec<TickerCoverage>, _> = self
            .retry
            .run("orats.check_ticker", || {
                self.get_envelope("tickers", vec![("ticker", ticker.clone())], None)
            })
            .await;
        matches!(result, Ok(rows) if !rows.is_empty())
    }

    /// Standardized option chain from the live strikes feed.
    pub async fn get_option_chain(&self, ticker: &str) -> Result<OptionChain, ProviderError> {
        let ticker = Self::clean_ticker(ticker);
        let rows: Vec<StrikeRow> = self
            .retry
            .run("orats.chain", || {
                self.get_envelope("live/strikes", vec![("ticker", ticker.clone())], None)
            })
            .await?;

        let chain = standardize_strikes(&ticker, &rows, Utc::now().date_naive());
        debug!(
            ticker = %ticker,
            contracts = chain.contract_count(),
            "option chain standardized"
        );
        Ok(chain)
    }

    /// Daily history cut to the trailing `days` calendar days, ascending.
    ///
    /// 400 calendar days yields roughly 275 trading bars, comfortably above
    /// the 252-bar minimum for stage analysis.
    pub async fn get_history(
        &self,
        ticker: &str,
        days: i64,
    ) -> Result<PriceHistory, ProviderError> {
        let ticker = Self::clean_ticker(ticker);
        let rows: Vec<HistDailyRow> = self
            .retry
            .run("orats.history", || {
                self.get_envelope("hist/dailies", vec![("ticker", ticker.clone())], None)
            })
            .await?;

        let cutoff = Utc::now().date_naive() - Duration::days(days);
        let mut candles: Vec<Candle> = rows
            .iter()
            .filter_map(|r| {
                let date = NaiveDate::parse_from_str(&r.trade_date, "%Y-%m-%d").ok()?;
                if date < cutoff {
                    return None;
                }
                Some(Candle {
                    datetime: date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis(),
                    open: r.open?,
                    high: r.hi_px?,
                    low: r.lo_px?,
                    close: r.cls_px?,
                    volume: r.stock_volume.unwrap_or(0.0),
                })
            })
            .collect();
        candles.sort_by_key(|c| c.datetime);

        Ok(PriceHistory {
            symbol: ticker,
            candles,
        })
    }

    /// Live underlying quote. Returns `Ok(None)` when the provider has no
    /// row for the ticker.
    pub async fn get_quote(
        &self,
        ticker: &str,
    ) -> Result<Option<UnderlyingQuote>, ProviderError> {
        let ticker = Self::clean_ticker(ticker);
        let rows: Vec<StrikeRow> = self
            .retry
            .run("orats.quote", || {
                self.get_envelope("live/strikes", vec![("ticker", ticker.clone())], None)
            })
            .await?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let price = row
            .stock_price
            .or(row.ticker_price)
            .or(row.price)
            .or(row.last)
            .or(row.px_cls)
            .or(row.prior_cls)
            .unwrap_or(0.0);
        let volume = row.volume.or(row.stock_volume).unwrap_or(0);
        let bid = row.bid.or(row.stock_bid).unwrap_or(0.0);
        let ask = row.ask.or(row.stock_ask).unwrap_or(0.0);

        Ok(Some(UnderlyingQuote {
            symbol: if row.ticker.is_empty() {
                ticker
            } else {
                row.ticker.clone()
            },
            price,
            volume,
            bid,
            ask,
        }))
    }

    /// Live quote for one specific contract, for fills and snapshots.
    pub async fn get_option_quote(
        &self,
        ticker: &str,
        strike: f64,
        expiry: NaiveDate,
        option_type: OptionType,
    ) -> Result<Option<OptionQuote>, ProviderError> {
        let ticker = Self::clean_ticker(ticker);
        let rows: Vec<StrikeRow> = self
            .retry
            .run("orats.option_quote", || {
                self.get_envelope("live/strikes", vec![("ticker", ticker.clone())], None)
            })
            .await?;

        let expiry_str = expiry.format("%Y-%m-%d").to_string();
        let row = rows
            .iter()
            .find(|r| r.expir_date == expiry_str && (r.strike - strike).abs() < 0.01);
        let Some(row) = row else {
            debug!(ticker = %ticker, strike, expiry = %expiry_str, "no matching contract row");
            return Ok(None);
        };

        Ok(Some(option_quote_from_row(row, option_type)))
    }

    /// Live IV-surface summary for skew scoring.
    pub async fn get_live_summary(
        &self,
        ticker: &str,
    ) -> Result<Option<LiveSummary>, ProviderError> {
        let ticker = Self::clean_ticker(ticker);
        let rows: Vec<LiveSummary> = self
            .retry
            .run("orats.summary", || {
                self.get_envelope("live/summaries", vec![("ticker", ticker.clone())], None)
            })
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Historical core metrics: IV percentile, earnings, dividend context.
    /// T-1 data; the most recent entry is returned.
    pub async fn get_hist_cores(
        &self,
        ticker: &str,
    ) -> Result<Option<CoreRecord>, ProviderError> {
        let ticker = Self::clean_ticker(ticker);
        let rows: Vec<CoreRecord> = self
            .retry
            .run("orats.cores", || {
                self.get_envelope("hist/cores", vec![("ticker", ticker.clone())], None)
            })
            .await?;
        Ok(rows.into_iter().last())
    }

    /// Bulk core records for the whole universe in one call (T-1 data).
    ///
    /// Only the fields needed for macro signals are requested to keep the
    /// payload small; the full universe needs the longer timeout.
    pub async fn get_cores_bulk(&self) -> Result<Vec<CoreRecord>, ProviderError> {
        let fields = "ticker,bestEtf,ivPctile1y,daysToNextErn,impliedEarningsMove,divDate,\
                      stkPxChng1m,cVolu,pVolu";
        self.retry
            .run("orats.cores_bulk", || {
                self.get_envelope(
                    "cores",
                    vec![("fields", fields.to_string())],
                    Some(std::time::Duration::from_secs(60)),
                )
            })
            .await
    }
}

impl std::fmt::Debug for OratsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OratsClient")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Build the snapshot option quote from one wide strike row.
fn option_quote_from_row(row: &StrikeRow, option_type: OptionType) -> OptionQuote {
    let is_call = option_type == OptionType::Call;

    let (bid, ask, value, volume, oi, iv_raw) = if is_call {
        (
            row.call_bid_price.unwrap_or(0.0),
            row.call_ask_price.unwrap_or(0.0),
            row.call_value.unwrap_or(0.0),
            row.call_volume.unwrap_or(0),
            row.call_open_interest.unwrap_or(0),
            row.call_mid_iv.or(row.smv_vol).unwrap_or(0.0),
        )
    } else {
        (
            row.put_bid_price.unwrap_or(0.0),
            row.put_ask_price.unwrap_or(0.0),
            row.put_value.unwrap_or(0.0),
            row.put_volume.unwrap_or(0),
            row.put_open_interest.unwrap_or(0),
            row.put_mid_iv.or(row.smv_vol).unwrap_or(0.0),
        )
    };

    // Mark = theoretical value when positive, else mid, else 0.
    let mark = if value > 0.0 {
        value
    } else if bid + ask > 0.0 {
        (bid + ask) / 2.0
    } else {
        0.0
    };

    let mut delta = row.delta.unwrap_or(0.0);
    if !is_call {
        delta = -delta.abs();
    }

    let iv = crate::types::iv_to_percent(iv_raw);

    OptionQuote {
        bid,
        ask,
        mark,
        underlying: row
            .stock_price
            .or(row.ticker_price)
            .or(row.price)
            .unwrap_or(0.0),
        volume,
        oi,
        delta,
        gamma: row.gamma.unwrap_or(0.0),
        theta: row.theta.unwrap_or(0.0),
        vega: row.vega.unwrap_or(0.0),
        iv,
    }
}

/// Split wide strike rows into the standardized per-side chain.
///
/// Each row yields one CALL and one PUT contract; the put's delta and rho are
/// sign-corrected and IVs are expressed in percent. `today` anchors the
/// days-to-expiry computation.
pub fn standardize_strikes(symbol: &str, rows: &[StrikeRow], today: NaiveDate) -> OptionChain {
    let mut chain = OptionChain {
        symbol: symbol.to_string(),
        ..Default::default()
    };

    for row in rows {
        let Ok(expiry) = NaiveDate::parse_from_str(&row.expir_date, "%Y-%m-%d") else {
            continue;
        };
        if row.strike <= 0.0 {
            continue;
        }
        let dte = (expiry - today).num_days();
        let exp_key = format!("{}:{dte}", row.expir_date);
        let strike_key = format!("{}", row.strike);

        let delta = row.delta.unwrap_or(0.0);
        let rho = row.rho.unwrap_or(0.0);

        let call_iv_frac = row.call_mid_iv.filter(|v| *v > 0.0).or(row.smv_vol);
        let call_bid = row.call_bid_price.unwrap_or(0.0);
        let call_ask = row.call_ask_price.unwrap_or(0.0);
        let call = OptionContract {
            put_call: OptionType::Call,
            symbol: format!("{symbol}_{}_C{strike_key}", row.expir_date),
            description: format!("{symbol} {} {strike_key} CALL", row.expir_date),
            bid: call_bid,
            ask: call_ask,
            last: row.call_price.unwrap_or(0.0),
            mark: row
                .call_value
                .filter(|v| *v > 0.0)
                .unwrap_or((call_bid + call_ask) / 2.0),
            total_volume: row.call_volume.unwrap_or(0),
            open_interest: row.call_open_interest.unwrap_or(0),
            volatility: call_iv_frac.map(|v| v * 100.0).unwrap_or(0.0),
            delta,
            gamma: row.gamma.unwrap_or(0.0),
            theta: row.theta.unwrap_or(0.0),
            vega: row.vega.unwrap_or(0.0),
            rho,
            strike_price: row.strike,
            expiration_date: expiry,
            days_to_expiration: dte,
        };
        chain
            .call_exp_date_map
            .entry(exp_key.clone())
            .or_default()
            .entry(strike_key.clone())
            .or_default()
            .push(call);

        let put_iv_frac = row.put_mid_iv.filter(|v| *v > 0.0).or(row.smv_vol);
        let put_bid = row.put_bid_price.unwrap_or(0.0);
        let put_ask = row.put_ask_price.unwrap_or(0.0);
        let put = OptionContract {
            put_call: OptionType::Put,
            symbol: format!("{symbol}_{}_P{strike_key}", row.expir_date),
            description: format!("{symbol} {} {strike_key} PUT", row.expir_date),
            bid: put_bid,
            ask: put_ask,
            last: row.put_price.unwrap_or(0.0),
            mark: row
                .put_value
                .filter(|v| *v > 0.0)
                .unwrap_or((put_bid + put_ask) / 2.0),
            total_volume: row.put_volume.unwrap_or(0),
            open_interest: row.put_open_interest.unwrap_or(0),
            volatility: put_iv_frac.map(|v| v * 100.0).unwrap_or(0.0),
            delta: -delta.abs(),
            gamma: row.gamma.unwrap_or(0.0),
            theta: row.theta.unwrap_or(0.0),
            vega: row.vega.unwrap_or(0.0),
            rho: -rho,
            strike_price: row.strike,
            expiration_date: expiry,
            days_to_expiration: dte,
        };
        chain
            .put_exp_date_map
            .entry(exp_key)
            .or_default()
            .entry(strike_key)
            .or_default()
            .push(put);
    }

    if chain.contract_count() == 0 && !rows.is_empty() {
        warn!(symbol, rows = rows.len(), "no rows survived standardization");
    }
    chain
}
