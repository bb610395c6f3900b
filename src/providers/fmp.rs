// =============================================================================
// FMP adapter — independent rating snapshots and quotes
// =============================================================================

use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::ProviderError;
use crate::retry::RetryPolicy;

const STABLE_URL: &str = "https://financialmodelingprep.com/stable";

/// Quote with fundamentals context (PE, EPS).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FmpQuote {
    pub symbol: String,
    pub price: Option<f64>,
    pub volume: Option<i64>,
    pub pe: Option<f64>,
    pub eps: Option<f64>,
}

/// Rating snapshot: letter grade plus a 1..5 score.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FmpRating {
    pub symbol: String,
    pub rating: String,
    #[serde(rename = "ratingScore", alias = "overallScore")]
    pub rating_score: Option<i64>,
}

/// FMP API client.
pub struct FmpClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl FmpClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(5))
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key: api_key.into(),
            base_url: STABLE_URL.to_string(),
            client,
            retry: RetryPolicy::api(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// GET a list endpoint; an empty list is `Ok(None)`, 5xx retries.
    async fn get_first<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        symbol: &str,
    ) -> Result<Option<T>, ProviderError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let params = [
            ("symbol", symbol.to_uppercase()),
            ("apikey", self.api_key.clone()),
        ];

        let endpoint_owned = endpoint.to_string();
        self.retry
            .run("fmp.get", || {
                let url = url.clone();
                let params = params.clone();
                let endpoint = endpoint_owned.clone();
                async move {
                    let resp = self
                        .client
                        .get(&url)
                        .query(&params)
                        .send()
                        .await
                        .map_err(ProviderError::from_reqwest)?;

                    let status = resp.status();
                    if !status.is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        let snippet: String = body.chars().take(120).collect();
                        return Err(ProviderError::from_status(
                            status.as_u16(),
                            format!("{endpoint}: {snippet}"),
                        ));
                    }

                    let rows: Vec<T> = resp.json().await.map_err(|e| {
                        ProviderError::Transient(format!("{endpoint} body: {e}"))
                    })?;
                    Ok(rows.into_iter().next())
                }
            })
            .await
    }

    /// Real-time quote with PE/EPS context.
    pub async fn get_quote(&self, ticker: &str) -> Option<FmpQuote> {
        match self.get_first("quote", ticker).await {
            Ok(quote) => quote,
            Err(e) => {
                warn!(ticker, error = %e, "quote fetch failed");
                None
            }
        }
    }

    /// Financial rating snapshot (S/A/B/C/D with a 1..5 score).
    pub async fn get_rating(&self, ticker: &str) -> Option<FmpRating> {
        match self.get_first("ratings-snapshot", ticker).await {
            Ok(rating) => {
                debug!(ticker, rating = ?rating.as_ref().map(|r: &FmpRating| r.rating.clone()), "rating fetched");
                rating
            }
            Err(e) => {
                warn!(ticker, error = %e, "rating fetch failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for FmpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FmpClient")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_parses_score_aliases() {
        let json = r#"{"symbol":"AAPL","rating":"A","ratingScore":4}"#;
        let r: FmpRating = serde_json::from_str(json).unwrap();
        assert_eq!(r.rating, "A");
        assert_eq!(r.rating_score, Some(4));

        let json = r#"{"symbol":"AAPL","rating":"B","overallScore":3}"#;
        let r: FmpRating = serde_json::from_str(json).unwrap();
        assert_eq!(r.rating_score, Some(3));
    }

    #[test]
    fn quote_tolerates_sparse_payloads() {
        let q: FmpQuote = serde_json::from_str(r#"{"symbol":"MSFT","price":412.5}"#).unwrap();
        assert_eq!(q.symbol, "MSFT");
        assert!((q.price.unwrap() - 412.5).abs() < 1e-12);
        assert!(q.pe.is_none());
    }
}
