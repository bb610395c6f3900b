// =============================================================================
// Configuration — environment-driven engine settings
// =============================================================================
//
// All upstream credentials come from the environment (loaded via dotenv in
// main). The broker token/account here are only a bootstrap path used when a
// user has no per-user settings row yet; per-user brokers are built from
// encrypted settings in the store.
// =============================================================================

use tracing::warn;

/// Process-wide configuration, loaded once at startup and passed by the
/// composition root.
#[derive(Debug, Clone)]
pub struct Config {
    /// Options/IV provider API key.
    pub orats_api_key: Option<String>,
    /// Fundamentals/news provider API key.
    pub finnhub_api_key: Option<String>,
    /// Rating provider API key.
    pub fmp_api_key: Option<String>,

    /// Bootstrap broker credentials (initial setup only).
    pub tradier_access_token: Option<String>,
    pub tradier_account_id: Option<String>,

    /// SQLite database path.
    pub database_path: String,

    /// Verbose diagnostics.
    pub debug: bool,

    /// Seconds between live price polls.
    pub poll_interval_secs: u64,
    /// Seconds between orphan-guard sweeps.
    pub orphan_interval_secs: u64,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        let debug = std::env::var("MERIDIAN_DEBUG")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let poll_interval_secs = env_opt("MERIDIAN_POLL_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);
        let orphan_interval_secs = env_opt("MERIDIAN_ORPHAN_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        let cfg = Self {
            orats_api_key: env_opt("ORATS_API_KEY"),
            finnhub_api_key: env_opt("FINNHUB_API_KEY"),
            fmp_api_key: env_opt("FMP_API_KEY"),
            tradier_access_token: env_opt("TRADIER_ACCESS_TOKEN"),
            tradier_account_id: env_opt("TRADIER_ACCOUNT_ID"),
            database_path: env_opt("DATABASE_PATH").unwrap_or_else(|| "meridian.db".to_string()),
            debug,
            poll_interval_secs,
            orphan_interval_secs,
        };

        if cfg.orats_api_key.is_none() {
            warn!("ORATS_API_KEY not set — scanner universe/chain/history calls will be skipped");
        }
        if cfg.finnhub_api_key.is_none() {
            warn!("FINNHUB_API_KEY not set — quality gate and sentiment will degrade");
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_env_values_are_treated_as_missing() {
        std::env::set_var("MERIDIAN_TEST_EMPTY", "   ");
        assert!(env_opt("MERIDIAN_TEST_EMPTY").is_none());
        std::env::set_var("MERIDIAN_TEST_SET", "value");
        assert_eq!(env_opt("MERIDIAN_TEST_SET").as_deref(), Some("value"));
        std::env::remove_var("MERIDIAN_TEST_EMPTY");
        std::env::remove_var("MERIDIAN_TEST_SET");
    }
}
