// =============================================================================
// Error taxonomy — normalized error kinds for providers, broker, store, vault
// =============================================================================
//
// Policy:
//   - Transient provider faults are recovered inside the retry policy and
//     never surface when a retry succeeds.
//   - Forbidden / Unavailable are sentinels, not failures: scans degrade the
//     affected component and continue.
//   - Lifecycle errors are never swallowed; a failed transition leaves the
//     trade row untouched and writes nothing to the audit trail.
// =============================================================================

use thiserror::Error;

/// Errors from upstream data providers (options/IV, fundamentals, news).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Connection failure, reset, timeout, malformed body, or HTTP 5xx.
    /// Retryable.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Tier/permission denial (403). Callers degrade gracefully.
    #[error("provider denied access (tier/permissions): {0}")]
    Forbidden(String),

    /// Upstream down or in maintenance. Callers may fall back.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Credentials invalid (401). User-actionable.
    #[error("provider authentication failed: {0}")]
    Auth(String),

    /// Remote 429 after local waits.
    #[error("provider rate limited: {0}")]
    RateLimited(String),

    /// Request exceeded its budget.
    #[error("provider request timed out: {0}")]
    Timeout(String),

    /// Response shape did not match the contract. Not retryable.
    #[error("provider response validation failed: {0}")]
    Validation(String),
}

impl ProviderError {
    /// Whether the retry policy may re-attempt the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }

    /// Map a reqwest transport error into the taxonomy.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() || err.is_body() || err.is_decode() {
            Self::Transient(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }

    /// Map an HTTP status code into the taxonomy.
    pub fn from_status(status: u16, detail: String) -> Self {
        match status {
            401 => Self::Auth(detail),
            403 => Self::Forbidden(detail),
            429 => Self::RateLimited(detail),
            500..=599 => Self::Transient(detail),
            _ => Self::Validation(detail),
        }
    }
}

/// Tagged result for adapter calls that can be denied or degraded without
/// being an error: `Ok | Forbidden | Unavailable`.
#[derive(Debug, Clone)]
pub enum FetchOutcome<T> {
    Ok(T),
    /// The provider refused this feature for the configured tier.
    Forbidden,
    /// The provider (or this endpoint) is down; the caller may fall back.
    Unavailable,
}

impl<T> FetchOutcome<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden)
    }
}

/// Errors from the broker gateway.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// 401 — token invalid or expired for this environment. Sandbox and live
    /// tokens are not interchangeable.
    #[error("broker authentication failed ({environment}): {message}")]
    Auth { environment: String, message: String },

    /// 429 after local rate-limiter waits.
    #[error("broker rate limited: {0}")]
    RateLimited(String),

    /// Order was accepted (200 OK) but rejected downstream. Never retried
    /// automatically.
    #[error("order {order_id} rejected by broker: {reason}")]
    OrderRejected { order_id: String, reason: String },

    /// 503 — broker down or in maintenance.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// Request exceeded its timeout budget.
    #[error("broker request timed out: {0}")]
    Timeout(String),

    /// Rejected for buying power / margin.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Any other HTTP-level failure.
    #[error("broker error (status {status:?}): {message}")]
    Http { status: Option<u16>, message: String },
}

/// Errors from the trade store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic-locking conflict: another writer won. Callers refresh and
    /// retry at the application level.
    #[error("concurrent modification of trade {trade_id} (expected version {expected_version})")]
    ConcurrentModification { trade_id: i64, expected_version: i64 },

    #[error("row not found: {0}")]
    NotFound(String),

    /// Constraint violation (status CHECK, idempotency uniqueness, ...).
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Transition not permitted by the lifecycle state machine.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

/// Errors from the credential vault.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("ENCRYPTION_KEY environment variable is not set")]
    MissingKey,

    #[error("ENCRYPTION_KEY is not a valid 32-byte base64 key")]
    BadKey,

    /// Key rotated or ciphertext corrupt. The user must re-enter secrets.
    #[error("failed to decrypt stored credential; the encryption key may have been rotated")]
    Decryption,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            ProviderError::from_status(401, String::new()),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            ProviderError::from_status(403, String::new()),
            ProviderError::Forbidden(_)
        ));
        assert!(matches!(
            ProviderError::from_status(429, String::new()),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            ProviderError::from_status(502, String::new()),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            ProviderError::from_status(404, String::new()),
            ProviderError::Validation(_)
        ));
    }

    #[test]
    fn retryability() {
        assert!(ProviderError::Transient(String::new()).is_retryable());
        assert!(ProviderError::Timeout(String::new()).is_retryable());
        assert!(!ProviderError::Forbidden(String::new()).is_retryable());
        assert!(!ProviderError::RateLimited(String::new()).is_retryable());
        assert!(!ProviderError::Auth(String::new()).is_retryable());
    }

    #[test]
    fn fetch_outcome_accessors() {
        assert_eq!(FetchOutcome::Ok(5).ok(), Some(5));
        assert_eq!(FetchOutcome::<i32>::Forbidden.ok(), None);
        assert!(FetchOutcome::<i32>::Forbidden.is_forbidden());
        assert!(!FetchOutcome::Ok(1).is_forbidden());
    }
}
