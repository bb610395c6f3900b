// =============================================================================
// Tradier broker — sandbox/live gateway with confirm-poll and OCO brackets
// =============================================================================
//
// Environment (sandbox vs live) is fixed per instance and tokens are never
// interchangeable across environments. Requests ride a 50/min sliding-window
// limiter that re-syncs from the provider's rate headers; idempotent methods
// (GET/DELETE) get two transport retries on 429/500/502/503 with a flat
// one-second delay.
//
// The critical order-placement gotcha: a 200 OK does not mean the order
// survived downstream risk checks. After POSTing, the order resource is
// polled (3 attempts) and a `rejected` status is raised as OrderRejected
// with the broker-supplied reason.
//
// Response quirks absorbed here: single items arrive as objects instead of
// one-element arrays, and empty collections arrive as the literal string
// "null".
// =============================================================================

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Method;
use serde_json::Value;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use super::{
    AccountBalance, BrokerGreeks, BrokerOption, BrokerPosition, BrokerProvider, BrokerQuote,
    ConnectionStatus, LimitLeg, OcoResult, OrderRequest, OrderStatus, StopLeg,
};
use crate::errors::BrokerError;
use crate::rate_limit::RateLimiter;
use crate::types::OptionType;

const SANDBOX_URL: &str = "https://sandbox.tradier.com/v1";
const LIVE_URL: &str = "https://api.tradier.com/v1";

/// Delay before the first confirmation poll.
const ORDER_CONFIRM_DELAY: Duration = Duration::from_secs(1);
/// Confirmation poll attempts.
const ORDER_CONFIRM_MAX_RETRIES: u32 = 3;
/// Delay between confirmation polls.
const ORDER_CONFIRM_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Transport retries for idempotent methods.
const TRANSPORT_RETRIES: u32 = 2;
const TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default stop-limit floor: the limit leg of a stop is priced at this
/// fraction of the stop so the bracket is never a naked stop.
const DEFAULT_LIMIT_FLOOR_PCT: f64 = 0.80;

/// Tradier API broker implementation.
pub struct TradierBroker {
    token: String,
    account_id: String,
    is_live: bool,
    environment: &'static str,
    base_url: String,
    limit_floor_pct: f64,
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl TradierBroker {
    pub fn new(token: impl Into<String>, account_id: impl Into<String>, is_live: bool) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            // The sandbox chains endpoint can be slow.
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");

        let broker = Self {
            token: token.into(),
            account_id: account_id.into(),
            is_live,
            environment: if is_live { "LIVE" } else { "SANDBOX" },
            base_url: (if is_live { LIVE_URL } else { SANDBOX_URL }).to_string(),
            limit_floor_pct: DEFAULT_LIMIT_FLOOR_PCT,
            client,
            limiter: RateLimiter::new(50, Duration::from_secs(60)),
        };
        info!(
            environment = broker.environment,
            account = %broker.account_id,
            "broker initialised"
        );
        broker
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }

    pub fn environment(&self) -> &str {
        self.environment
    }

    /// Override the stop-limit floor fraction.
    pub fn with_limit_floor(mut self, floor_pct: f64) -> Self {
        self.limit_floor_pct = floor_pct;
        self
    }

    // -- transport --------------------------------------------------------

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        form: Option<&[(String, String)]>,
    ) -> Result<Value, BrokerError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let idempotent = matches!(method, Method::GET | Method::DELETE);
        let mut attempt: u32 = 0;

        loop {
            let waited = self.limiter.wait().await;
            if waited > Duration::ZERO {
                warn!(
                    path,
                    waited_ms = waited.as_millis() as u64,
                    "rate limiter delayed request"
                );
            }

            let mut req = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&self.token)
                .header("Accept", "application/json");
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(fields) = form {
                req = req.form(fields);
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_timeout() => {
                    if idempotent && attempt < TRANSPORT_RETRIES {
                        attempt += 1;
                        tokio::time::sleep(TRANSPORT_RETRY_DELAY).await;
                        continue;
                    }
                    return Err(BrokerError::Timeout(format!("{method} {path}: {e}")));
                }
                Err(e) => {
                    if idempotent && attempt < TRANSPORT_RETRIES {
                        attempt += 1;
                        tokio::time::sleep(TRANSPORT_RETRY_DELAY).await;
                        continue;
                    }
                    return Err(BrokerError::Unavailable(format!("{method} {path}: {e}")));
                }
            };

            self.limiter.update_from_headers(resp.headers());
            let status = resp.status().as_u16();
            debug!(
                path,
                status,
                remaining = self.limiter.remaining(),
                "broker request"
            );

            if matches!(status, 429 | 500 | 502 | 503) && idempotent && attempt < TRANSPORT_RETRIES
            {
                attempt += 1;
                tokio::time::sleep(TRANSPORT_RETRY_DELAY).await;
                continue;
            }

            if status >= 400 {
                let body = resp.text().await.unwrap_or_default();
                let snippet: String = body.chars().take(500).collect();
                return Err(self.map_error(status, path, snippet));
            }

            return resp
                .json()
                .await
                .map_err(|e| BrokerError::Http {
                    status: Some(status),
                    message: format!("{path} body: {e}"),
                });
        }
    }

    fn map_error(&self, status: u16, path: &str, body: String) -> BrokerError {
        match status {
            401 => BrokerError::Auth {
                environment: self.environment.to_string(),
                message: format!(
                    "token invalid or expired; sandbox and live tokens are not interchangeable \
                     ({path})"
                ),
            },
            429 => BrokerError::RateLimited(format!("still limited after local waits ({path})")),
            503 => BrokerError::Unavailable(format!("broker in maintenance or outage ({path})")),
            _ => BrokerError::Http {
                status: Some(status),
                message: format!("{path}: {body}"),
            },
        }
    }

    // -- order confirmation ----------------------------------------------

    /// Poll the order resource until a conclusive status or retries run out.
    async fn confirm_order(&self, order_id: &str) -> OrderStatus {
        for attempt in 0..ORDER_CONFIRM_MAX_RETRIES {
            match self.get_order(order_id).await {
                Ok(order) => {
                    let status = order.status.to_lowercase();
                    match status.as_str() {
                        // Terminal or accepted-and-working: conclusive.
                        "filled" | "partially_filled" | "rejected" | "canceled" | "expired"
                        | "pending" | "open" => return order,
                        other => {
                            warn!(order_id, status = other, attempt, "inconclusive order status");
                        }
                    }
                }
                Err(e) => warn!(order_id, attempt, error = %e, "confirmation poll failed"),
            }
            if attempt + 1 < ORDER_CONFIRM_MAX_RETRIES {
                tokio::time::sleep(ORDER_CONFIRM_RETRY_DELAY).await;
            }
        }

        warn!(order_id, "confirmation polling exhausted — assuming accepted");
        OrderStatus {
            id: order_id.to_string(),
            status: "unknown".to_string(),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Response-shape helpers (quirk absorption)
// ---------------------------------------------------------------------------

/// Tradier wraps single items as objects and empty collections as the string
/// "null". Normalize all of that to a plain list.
fn unwrap_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Object(_) => vec![value.clone()],
        Value::String(s) if s == "null" => Vec::new(),
        _ => Vec::new(),
    }
}

fn val_str(v: &Value, key: &str) -> Option<String> {
    match v.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn val_f64(v: &Value, key: &str) -> Option<f64> {
    v.get(key).and_then(Value::as_f64)
}

fn val_i64(v: &Value, key: &str) -> Option<i64> {
    v.get(key).and_then(Value::as_i64)
}

fn quote_from_value(v: &Value) -> BrokerQuote {
    BrokerQuote {
        symbol: val_str(v, "symbol").unwrap_or_default(),
        description: val_str(v, "description"),
        last: val_f64(v, "last"),
        bid: val_f64(v, "bid"),
        ask: val_f64(v, "ask"),
        high: val_f64(v, "high"),
        low: val_f64(v, "low"),
        open: val_f64(v, "open"),
        close: val_f64(v, "close"),
        volume: val_i64(v, "volume"),
        change: val_f64(v, "change"),
        change_percentage: val_f64(v, "change_percentage"),
        quote_type: val_str(v, "type"),
    }
}

fn option_from_value(v: &Value) -> BrokerOption {
    let greeks = v.get("greeks").cloned().unwrap_or(Value::Null);
    BrokerOption {
        symbol: val_str(v, "symbol").unwrap_or_default(),
        underlying: val_str(v, "underlying"),
        strike: val_f64(v, "strike").unwrap_or(0.0),
        option_type: val_str(v, "option_type").unwrap_or_default(),
        expiration_date: val_str(v, "expiration_date")
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        last: val_f64(v, "last"),
        bid: val_f64(v, "bid"),
        ask: val_f64(v, "ask"),
        volume: val_i64(v, "volume"),
        open_interest: val_i64(v, "open_interest"),
        greeks: BrokerGreeks {
            delta: val_f64(&greeks, "delta"),
            gamma: val_f64(&greeks, "gamma"),
            theta: val_f64(&greeks, "theta"),
            vega: val_f64(&greeks, "vega"),
            rho: val_f64(&greeks, "rho"),
            iv: val_f64(&greeks, "mid_iv").or_else(|| val_f64(&greeks, "smv_vol")),
        },
    }
}

fn order_from_value(v: &Value) -> OrderStatus {
    OrderStatus {
        id: val_str(v, "id").unwrap_or_default(),
        status: val_str(v, "status").unwrap_or_default(),
        symbol: val_str(v, "symbol"),
        side: val_str(v, "side"),
        quantity: val_f64(v, "quantity"),
        avg_fill_price: val_f64(v, "avg_fill_price"),
        filled_quantity: val_f64(v, "exec_quantity"),
        reason_description: val_str(v, "reason_description"),
    }
}

fn balance_from_value(v: &Value) -> AccountBalance {
    // Buying power nests differently for margin vs cash accounts.
    let margin = v.get("margin").cloned().unwrap_or(Value::Null);
    let cash = v.get("cash").cloned().unwrap_or(Value::Null);
    AccountBalance {
        total_equity: val_f64(v, "total_equity"),
        total_cash: val_f64(v, "total_cash"),
        market_value: val_f64(v, "market_value"),
        open_pnl: val_f64(v, "open_pl"),
        close_pnl: val_f64(v, "close_pl"),
        option_buying_power: val_f64(&margin, "option_buying_power")
            .or_else(|| val_f64(&cash, "option_buying_power")),
        stock_buying_power: val_f64(&margin, "stock_buying_power")
            .or_else(|| val_f64(&cash, "stock_buying_power")),
        account_type: val_str(v, "account_type"),
        pending_orders_count: val_i64(v, "pending_orders_count"),
    }
}

fn position_from_value(v: &Value) -> BrokerPosition {
    let cost_basis = val_f64(v, "cost_basis");
    let current_value = val_f64(v, "market_value");
    BrokerPosition {
        symbol: val_str(v, "symbol").unwrap_or_default(),
        quantity: val_f64(v, "quantity").unwrap_or(0.0),
        cost_basis,
        current_value,
        pnl: match (current_value, cost_basis) {
            (Some(cv), Some(cb)) => Some(cv - cb),
            _ => None,
        },
        date_acquired: val_str(v, "date_acquired"),
        id: val_i64(v, "id"),
    }
}

/// Build the indexed OCO form payload.
///
/// Leg 0 is a stop-limit (never a naked stop): `stop[0]` is the trigger and
/// `price[0]` is the stop multiplied by the limit floor, rounded to cents.
/// Leg 1 is a plain limit at the take-profit price.
pub fn build_oco_payload(
    sl: &StopLeg,
    tp: &LimitLeg,
    limit_floor_pct: f64,
) -> Vec<(String, String)> {
    let floor_price = (sl.stop_price * limit_floor_pct * 100.0).round() / 100.0;
    vec![
        ("class".to_string(), "oco".to_string()),
        ("duration".to_string(), "gtc".to_string()),
        // Leg 0: stop-loss.
        ("side[0]".to_string(), "sell_to_close".to_string()),
        ("symbol[0]".to_string(), sl.symbol.clone()),
        ("quantity[0]".to_string(), sl.quantity.to_string()),
        ("type[0]".to_string(), "stop_limit".to_string()),
        ("stop[0]".to_string(), format!("{:.2}", sl.stop_price)),
        ("price[0]".to_string(), format!("{floor_price:.2}")),
        // Leg 1: take-profit.
        ("side[1]".to_string(), "sell_to_close".to_string()),
        ("symbol[1]".to_string(), tp.symbol.clone()),
        ("quantity[1]".to_string(), tp.quantity.to_string()),
        ("type[1]".to_string(), "limit".to_string()),
        ("price[1]".to_string(), format!("{:.2}", tp.limit_price)),
    ]
}

/// Build the form payload for a single-leg order.
fn build_order_payload(order: &OrderRequest) -> Vec<(String, String)> {
    let mut payload = vec![
        ("class".to_string(), order.class.clone()),
        ("symbol".to_string(), order.symbol.clone()),
        ("side".to_string(), order.side.clone()),
        ("quantity".to_string(), order.quantity.to_string()),
        ("type".to_string(), order.order_type.clone()),
        ("duration".to_string(), order.duration.clone()),
    ];
    if let Some(price) = order.price {
        payload.push(("price".to_string(), format!("{price:.2}")));
    }
    if let Some(stop) = order.stop {
        payload.push(("stop".to_string(), format!("{stop:.2}")));
    }
    payload
}

#[async_trait]
impl BrokerProvider for TradierBroker {
    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<BrokerQuote>, BrokerError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let data = self
            .request(
                Method::GET,
                "markets/quotes",
                &[
                    ("symbols", symbols.join(",")),
                    ("greeks", "false".to_string()),
                ],
                None,
            )
            .await?;
        let quotes = data
            .get("quotes")
            .and_then(|q| q.get("quote"))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(unwrap_list(&quotes).iter().map(quote_from_value).collect())
    }

    async fn get_option_chain(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        option_type: Option<OptionType>,
    ) -> Result<Vec<BrokerOption>, BrokerError> {
        let mut query = vec![
            ("symbol", symbol.to_uppercase()),
            ("expiration", expiry.format("%Y-%m-%d").to_string()),
            ("greeks", "true".to_string()),
        ];
        if let Some(side) = option_type {
            query.push(("option_type", side.to_string().to_lowercase()));
        }

        let data = self
            .request(Method::GET, "markets/options/chains", &query, None)
            .await?;
        let options = data
            .get("options")
            .and_then(|o| o.get("option"))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(unwrap_list(&options).iter().map(option_from_value).collect())
    }

    async fn get_option_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, BrokerError> {
        let data = self
            .request(
                Method::GET,
                "markets/options/expirations",
                &[
                    ("symbol", symbol.to_uppercase()),
                    ("includeAllRoots", "true".to_string()),
                    ("strikes", "false".to_string()),
                ],
                None,
            )
            .await?;

        let dates = data
            .get("expirations")
            .and_then(|e| e.get("date"))
            .cloned()
            .unwrap_or(Value::Null);
        // A single expiry arrives as a bare string.
        let raw: Vec<String> = match dates {
            Value::String(s) => vec![s],
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        Ok(raw
            .iter()
            .filter_map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            .collect())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<String, BrokerError> {
        let payload = build_order_payload(order);
        let data = self
            .request(
                Method::POST,
                &format!("accounts/{}/orders", self.account_id),
                &[],
                Some(&payload),
            )
            .await?;

        let order_data = data.get("order").cloned().unwrap_or(Value::Null);
        let order_id = val_str(&order_data, "id").ok_or_else(|| BrokerError::Http {
            status: None,
            message: "order response missing id".to_string(),
        })?;
        info!(
            order_id = %order_id,
            symbol = %order.symbol,
            side = %order.side,
            status = ?val_str(&order_data, "status"),
            "order placed — confirming"
        );

        // 200 OK can still be rejected downstream; poll to confirm.
        tokio::time::sleep(ORDER_CONFIRM_DELAY).await;
        let confirmation = self.confirm_order(&order_id).await;
        if confirmation.status.eq_ignore_ascii_case("rejected") {
            let reason = confirmation
                .reason_description
                .unwrap_or_else(|| "unknown reason".to_string());
            error!(order_id = %order_id, reason = %reason, "order rejected downstream");
            return Err(BrokerError::OrderRejected {
                order_id,
                reason,
            });
        }

        Ok(order_id)
    }

    async fn place_oco_order(
        &self,
        sl: &StopLeg,
        tp: &LimitLeg,
    ) -> Result<OcoResult, BrokerError> {
        let payload = build_oco_payload(sl, tp, self.limit_floor_pct);
        let data = self
            .request(
                Method::POST,
                &format!("accounts/{}/orders", self.account_id),
                &[],
                Some(&payload),
            )
            .await?;

        let order = data.get("order").cloned().unwrap_or(Value::Null);
        let leg_ids = order
            .get("leg")
            .map(|legs| {
                unwrap_list(legs)
                    .iter()
                    .filter_map(|l| val_str(l, "id"))
                    .collect()
            })
            .unwrap_or_default();
        let result = OcoResult {
            id: val_str(&order, "id"),
            leg_ids,
            status: val_str(&order, "status"),
        };
        info!(oco_id = ?result.id, legs = result.leg_ids.len(), "OCO bracket placed");
        Ok(result)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, BrokerError> {
        match self
            .request(
                Method::DELETE,
                &format!("accounts/{}/orders/{order_id}", self.account_id),
                &[],
                None,
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(order_id, error = %e, "cancel failed");
                Ok(false)
            }
        }
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderStatus, BrokerError> {
        let data = self
            .request(
                Method::GET,
                &format!("accounts/{}/orders/{order_id}", self.account_id),
                &[],
                None,
            )
            .await?;
        let order = data.get("order").cloned().unwrap_or(data);
        Ok(order_from_value(&order))
    }

    async fn get_orders(&self) -> Result<Vec<OrderStatus>, BrokerError> {
        let data = self
            .request(
                Method::GET,
                &format!("accounts/{}/orders", self.account_id),
                &[],
                None,
            )
            .await?;
        let orders = data.get("orders").cloned().unwrap_or(Value::Null);
        let list = orders.get("order").cloned().unwrap_or(orders);
        Ok(unwrap_list(&list).iter().map(order_from_value).collect())
    }

    async fn get_account_balance(&self) -> Result<AccountBalance, BrokerError> {
        let data = self
            .request(
                Method::GET,
                &format!("accounts/{}/balances", self.account_id),
                &[],
                None,
            )
            .await?;
        let balances = data.get("balances").cloned().unwrap_or(Value::Null);
        Ok(balance_from_value(&balances))
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let data = self
            .request(
                Method::GET,
                &format!("accounts/{}/positions", self.account_id),
                &[],
                None,
            )
            .await?;
        let positions = data.get("positions").cloned().unwrap_or(Value::Null);
        let list = positions.get("position").cloned().unwrap_or(positions);
        Ok(unwrap_list(&list).iter().map(position_from_value).collect())
    }

    async fn test_connection(&self) -> ConnectionStatus {
        match self.request(Method::GET, "user/profile", &[], None).await {
            Ok(data) => {
                let profile = data.get("profile").cloned().unwrap_or(Value::Null);
                let accounts = profile.get("account").cloned().unwrap_or(Value::Null);
                let accounts = unwrap_list(&accounts);
                let matched = accounts
                    .iter()
                    .find(|a| {
                        val_str(a, "account_number").as_deref() == Some(self.account_id.as_str())
                    })
                    .or_else(|| accounts.first());

                ConnectionStatus {
                    connected: true,
                    account_id: matched
                        .and_then(|a| val_str(a, "account_number"))
                        .or_else(|| Some(self.account_id.clone())),
                    name: val_str(&profile, "name"),
                    environment: self.environment.to_string(),
                    error: None,
                }
            }
            Err(BrokerError::Auth { message, .. }) => ConnectionStatus {
                connected: false,
                account_id: None,
                name: None,
                environment: self.environment.to_string(),
                error: Some(format!("authentication failed — {message}")),
            },
            Err(e) => ConnectionStatus {
                connected: false,
                account_id: None,
                name: None,
                environment: self.environment.to_string(),
                error: Some(e.to_string()),
            },
        }
    }
}

impl std::fmt::Debug for TradierBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradierBroker")
            .field("environment", &self.environment)
            .field("account_id", &self.account_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn oco_payload_reference_bracket() {
        // stop 5.00, take-profit 10.00, qty 1, floor 0.80.
        let sl = StopLeg {
            symbol: "AAPL260320C00200000".to_string(),
            quantity: 1,
            stop_price: 5.0,
        };
        let tp = LimitLeg {
            symbol: "AAPL260320C00200000".to_string(),
            quantity: 1,
            limit_price: 10.0,
        };
        let payload = build_oco_payload(&sl, &tp, 0.80);
        let get = |k: &str| {
            payload
                .iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        assert_eq!(get("class"), "oco");
        assert_eq!(get("duration"), "gtc");
        assert_eq!(get("type[0]"), "stop_limit");
        assert_eq!(get("stop[0]"), "5.00");
        assert_eq!(get("price[0]"), "4.00");
        assert_eq!(get("side[0]"), "sell_to_close");
        assert_eq!(get("quantity[0]"), "1");
        assert_eq!(get("type[1]"), "limit");
        assert_eq!(get("price[1]"), "10.00");
        assert_eq!(get("side[1]"), "sell_to_close");
    }

    #[test]
    fn oco_floor_rounds_to_cents() {
        let sl = StopLeg {
            symbol: "X".into(),
            quantity: 2,
            stop_price: 3.33,
        };
        let tp = LimitLeg {
            symbol: "X".into(),
            quantity: 2,
            limit_price: 6.66,
        };
        let payload = build_oco_payload(&sl, &tp, 0.80);
        let price0 = payload
            .iter()
            .find(|(k, _)| k == "price[0]")
            .map(|(_, v)| v.clone())
            .unwrap();
        // 3.33 * 0.80 = 2.664 -> 2.66.
        assert_eq!(price0, "2.66");
    }

    #[test]
    fn order_payload_includes_optional_prices() {
        let mut order = OrderRequest::market_option("AAPL260320C00200000", "buy_to_open", 2);
        let payload = build_order_payload(&order);
        assert!(payload.iter().any(|(k, v)| k == "type" && v == "market"));
        assert!(!payload.iter().any(|(k, _)| k == "price"));

        order.order_type = "limit".to_string();
        order.price = Some(5.1);
        let payload = build_order_payload(&order);
        assert!(payload.iter().any(|(k, v)| k == "price" && v == "5.10"));
    }

    #[test]
    fn unwrap_list_absorbs_response_quirks() {
        // Single item as object.
        let single = json!({"symbol": "AAPL"});
        assert_eq!(unwrap_list(&single).len(), 1);
        // Proper list.
        let list = json!([{"a": 1}, {"a": 2}]);
        assert_eq!(unwrap_list(&list).len(), 2);
        // Empty collection as the literal string "null".
        let null_str = json!("null");
        assert!(unwrap_list(&null_str).is_empty());
        // Actual null.
        assert!(unwrap_list(&Value::Null).is_empty());
    }

    #[test]
    fn quote_normalization() {
        let v = json!({
            "symbol": "AAPL",
            "description": "Apple Inc",
            "last": 150.25, "bid": 150.2, "ask": 150.3,
            "high": 151.0, "low": 149.0, "open": 149.5, "close": 148.9,
            "volume": 123456, "change": 1.35, "change_percentage": 0.91,
            "type": "stock"
        });
        let q = quote_from_value(&v);
        assert_eq!(q.symbol, "AAPL");
        assert_eq!(q.quote_type.as_deref(), Some("stock"));
        assert!((q.last.unwrap() - 150.25).abs() < 1e-12);
        assert_eq!(q.volume, Some(123456));
    }

    #[test]
    fn option_normalization_prefers_mid_iv() {
        let v = json!({
            "symbol": "AAPL260620C00150000",
            "underlying": "AAPL",
            "strike": 150.0,
            "option_type": "call",
            "expiration_date": "2026-06-20",
            "bid": 5.0, "ask": 5.2,
            "volume": 10, "open_interest": 1000,
            "greeks": {"delta": 0.55, "gamma": 0.01, "mid_iv": 0.32, "smv_vol": 0.30}
        });
        let o = option_from_value(&v);
        assert_eq!(o.symbol, "AAPL260620C00150000");
        assert_eq!(
            o.expiration_date,
            NaiveDate::from_ymd_opt(2026, 6, 20)
        );
        assert!((o.greeks.iv.unwrap() - 0.32).abs() < 1e-12);

        // Without mid_iv, smoothed vol backs it up.
        let v = json!({
            "symbol": "X", "strike": 1.0, "option_type": "put",
            "greeks": {"smv_vol": 0.30}
        });
        let o = option_from_value(&v);
        assert!((o.greeks.iv.unwrap() - 0.30).abs() < 1e-12);
    }

    #[test]
    fn order_status_parses_numeric_id_and_reject_reason() {
        let v = json!({
            "id": 8675309,
            "status": "rejected",
            "reason_description": "insufficient buying power"
        });
        let o = order_from_value(&v);
        assert_eq!(o.id, "8675309");
        assert_eq!(o.status, "rejected");
        assert_eq!(
            o.reason_description.as_deref(),
            Some("insufficient buying power")
        );
    }

    #[test]
    fn balance_normalization_handles_margin_and_cash_nesting() {
        let margin_acct = json!({
            "total_equity": 10000.0, "total_cash": 4000.0,
            "margin": {"option_buying_power": 3500.0, "stock_buying_power": 7000.0}
        });
        let b = balance_from_value(&margin_acct);
        assert!((b.option_buying_power.unwrap() - 3500.0).abs() < 1e-12);

        let cash_acct = json!({
            "total_equity": 5000.0,
            "cash": {"option_buying_power": 1200.0}
        });
        let b = balance_from_value(&cash_acct);
        assert!((b.option_buying_power.unwrap() - 1200.0).abs() < 1e-12);
    }

    #[test]
    fn position_pnl_derived_from_values() {
        let v = json!({
            "symbol": "AAPL260620C00150000",
            "quantity": 2.0,
            "cost_basis": 1000.0,
            "market_value": 1250.0,
            "id": 77
        });
        let p = position_from_value(&v);
        assert!((p.pnl.unwrap() - 250.0).abs() < 1e-12);
        assert_eq!(p.id, Some(77));
    }

    #[test]
    fn environment_selection_is_immutable_per_instance() {
        let sandbox = TradierBroker::new("tok", "VA1", false);
        assert_eq!(sandbox.environment(), "SANDBOX");
        assert!(sandbox.base_url.starts_with("https://sandbox."));
        let live = TradierBroker::new("tok", "VA1", true);
        assert_eq!(live.environment(), "LIVE");
        assert!(live.base_url.starts_with("https://api."));
    }
}
