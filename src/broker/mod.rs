// =============================================================================
// Broker Gateway — provider contract and normalized records
// =============================================================================
//
// Any broker integration implements `BrokerProvider`; the trade service layer
// stays broker-agnostic. All methods return normalized shapes regardless of
// the wire format underneath.

pub mod tradier;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::{BrokerError, VaultError};
use crate::store::UserSettings;
use crate::types::OptionType;
use crate::vault::Vault;

/// Normalized underlying quote.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerQuote {
    pub symbol: String,
    pub description: Option<String>,
    pub last: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub open: Option<f64>,
    /// Previous close.
    pub close: Option<f64>,
    pub volume: Option<i64>,
    pub change: Option<f64>,
    pub change_percentage: Option<f64>,
    /// 'stock', 'option', 'etf', 'index', ...
    pub quote_type: Option<String>,
}

/// Normalized option greeks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BrokerGreeks {
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
    pub rho: Option<f64>,
    pub iv: Option<f64>,
}

/// Normalized option contract from a broker chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerOption {
    /// OCC symbol.
    pub symbol: String,
    pub underlying: Option<String>,
    pub strike: f64,
    pub option_type: String,
    pub expiration_date: Option<NaiveDate>,
    pub last: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: Option<i64>,
    pub open_interest: Option<i64>,
    pub greeks: BrokerGreeks,
}

/// Single-leg order request.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// Order class, e.g. "option".
    pub class: String,
    /// OCC symbol for options.
    pub symbol: String,
    /// e.g. "buy_to_open", "sell_to_close".
    pub side: String,
    pub quantity: i64,
    /// "market", "limit", "stop", "stop_limit".
    pub order_type: String,
    /// "day" or "gtc".
    pub duration: String,
    pub price: Option<f64>,
    pub stop: Option<f64>,
}

impl OrderRequest {
    pub fn market_option(symbol: &str, side: &str, quantity: i64) -> Self {
        Self {
            class: "option".to_string(),
            symbol: symbol.to_string(),
            side: side.to_string(),
            quantity,
            order_type: "market".to_string(),
            duration: "day".to_string(),
            price: None,
            stop: None,
        }
    }
}

/// Stop-loss leg of an OCO bracket.
#[derive(Debug, Clone)]
pub struct StopLeg {
    pub symbol: String,
    pub quantity: i64,
    pub stop_price: f64,
}

/// Take-profit leg of an OCO bracket.
#[derive(Debug, Clone)]
pub struct LimitLeg {
    pub symbol: String,
    pub quantity: i64,
    pub limit_price: f64,
}

/// Result of an OCO placement.
#[derive(Debug, Clone, Default)]
pub struct OcoResult {
    pub id: Option<String>,
    pub leg_ids: Vec<String>,
    pub status: Option<String>,
}

/// Current state of an order.
#[derive(Debug, Clone, Default)]
pub struct OrderStatus {
    pub id: String,
    pub status: String,
    pub symbol: Option<String>,
    pub side: Option<String>,
    pub quantity: Option<f64>,
    pub avg_fill_price: Option<f64>,
    pub filled_quantity: Option<f64>,
    pub reason_description: Option<String>,
}

/// Normalized account balance.
#[derive(Debug, Clone, Default)]
pub struct AccountBalance {
    pub total_equity: Option<f64>,
    pub total_cash: Option<f64>,
    pub market_value: Option<f64>,
    pub open_pnl: Option<f64>,
    pub close_pnl: Option<f64>,
    pub option_buying_power: Option<f64>,
    pub stock_buying_power: Option<f64>,
    pub account_type: Option<String>,
    pub pending_orders_count: Option<i64>,
}

/// One open broker-side position.
#[derive(Debug, Clone, Default)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: f64,
    pub cost_basis: Option<f64>,
    pub current_value: Option<f64>,
    pub pnl: Option<f64>,
    pub date_acquired: Option<String>,
    pub id: Option<i64>,
}

/// Connection check result.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub account_id: Option<String>,
    pub name: Option<String>,
    pub environment: String,
    pub error: Option<String>,
}

/// Contract every broker integration implements.
#[async_trait]
pub trait BrokerProvider: Send + Sync {
    // -- market data ------------------------------------------------------
    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<BrokerQuote>, BrokerError>;
    async fn get_option_chain(
        &self,
        symbol: &str,
        expiry: NaiveDate,
        option_type: Option<OptionType>,
    ) -> Result<Vec<BrokerOption>, BrokerError>;
    async fn get_option_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, BrokerError>;

    // -- orders -----------------------------------------------------------
    /// Place a single-leg order, confirming it was not silently rejected.
    async fn place_order(&self, order: &OrderRequest) -> Result<String, BrokerError>;
    /// Place a one-cancels-other stop/take-profit bracket.
    async fn place_oco_order(
        &self,
        sl: &StopLeg,
        tp: &LimitLeg,
    ) -> Result<OcoResult, BrokerError>;
    /// Returns true when the cancel succeeded, false when the broker refused.
    async fn cancel_order(&self, order_id: &str) -> Result<bool, BrokerError>;
    async fn get_order(&self, order_id: &str) -> Result<OrderStatus, BrokerError>;
    async fn get_orders(&self) -> Result<Vec<OrderStatus>, BrokerError>;

    // -- account ----------------------------------------------------------
    async fn get_account_balance(&self) -> Result<AccountBalance, BrokerError>;
    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;
    async fn test_connection(&self) -> ConnectionStatus;
}

/// Build the broker for a user's stored settings, decrypting the token for
/// the selected environment. Sandbox and live tokens are never
/// interchangeable; a decryption failure asks the user to re-enter
/// credentials.
pub fn broker_for_settings(
    settings: &UserSettings,
    vault: &Vault,
) -> Result<tradier::TradierBroker, BrokerError> {
    let is_live = settings.broker_mode.is_live();
    let environment = if is_live { "LIVE" } else { "SANDBOX" };

    let encrypted = if is_live {
        settings.live_token_enc.as_deref()
    } else {
        settings.sandbox_token_enc.as_deref()
    };
    let Some(encrypted) = encrypted else {
        return Err(BrokerError::Auth {
            environment: environment.to_string(),
            message: format!("{environment} token not configured in settings"),
        });
    };
    let Some(account_id) = settings.broker_account_id.as_deref() else {
        return Err(BrokerError::Auth {
            environment: environment.to_string(),
            message: "broker account id not configured in settings".to_string(),
        });
    };

    let token = vault.decrypt(encrypted).map_err(|e| match e {
        VaultError::Decryption => BrokerError::Auth {
            environment: environment.to_string(),
            message: "stored token cannot be decrypted — re-enter credentials".to_string(),
        },
        other => BrokerError::Auth {
            environment: environment.to_string(),
            message: other.to_string(),
        },
    })?;

    Ok(tradier::TradierBroker::new(token, account_id, is_live))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BrokerMode;

    fn vault() -> Vault {
        Vault::from_key_bytes(&[42; 32])
    }

    #[test]
    fn factory_builds_sandbox_broker_from_settings() {
        let v = vault();
        let mut settings = UserSettings::defaults("alice");
        settings.sandbox_token_enc = Some(v.encrypt("sandbox-token"));
        settings.broker_account_id = Some("VA000001".to_string());

        let broker = broker_for_settings(&settings, &v).unwrap();
        assert!(!broker.is_live());
    }

    #[test]
    fn factory_requires_matching_environment_token() {
        let v = vault();
        let mut settings = UserSettings::defaults("alice");
        settings.broker_mode = BrokerMode::TradierLive;
        // Only a sandbox token stored: live mode must refuse.
        settings.sandbox_token_enc = Some(v.encrypt("sandbox-token"));
        settings.broker_account_id = Some("VA000001".to_string());

        let err = broker_for_settings(&settings, &v).unwrap_err();
        match err {
            BrokerError::Auth { environment, .. } => assert_eq!(environment, "LIVE"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn factory_surfaces_rotated_key_as_reentry_request() {
        let old = Vault::from_key_bytes(&[1; 32]);
        let new = Vault::from_key_bytes(&[2; 32]);
        let mut settings = UserSettings::defaults("alice");
        settings.sandbox_token_enc = Some(old.encrypt("tok"));
        settings.broker_account_id = Some("VA000001".to_string());

        let err = broker_for_settings(&settings, &new).unwrap_err();
        match err {
            BrokerError::Auth { message, .. } => {
                assert!(message.contains("re-enter"), "{message}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
