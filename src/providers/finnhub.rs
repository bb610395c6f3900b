// =============================================================================
// Finnhub adapter — corporate fundamentals and news sentiment
// =============================================================================
//
// Premium endpoints return 403 on free-tier keys; that is surfaced as the
// Forbidden sentinel so the scanner can degrade (e.g. fall back from the
// aggregate sentiment score to headline analysis) instead of aborting.
// =============================================================================

use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::{FetchOutcome, ProviderError};
use crate::retry::RetryPolicy;

const BASE_URL: &str = "https://finnhub.io/api/v1";

/// ROE / margin metrics for the quality gate. Values are raw percentages
/// (15.5 means 15.5%).
#[derive(Debug, Clone, Default)]
pub struct BasicFinancials {
    pub roe: Option<f64>,
    pub roi: Option<f64>,
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
}

/// Aggregate news sentiment from the premium endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewsSentiment {
    #[serde(rename = "companyNewsScore")]
    pub company_news_score: Option<f64>,
    pub sentiment: Option<SentimentInner>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SentimentInner {
    #[serde(rename = "bullishPercent")]
    pub bullish_percent: Option<f64>,
}

/// One company news article.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewsArticle {
    pub headline: String,
    pub summary: String,
    pub url: String,
    pub source: String,
    pub datetime: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct MetricEnvelope {
    metric: MetricFields,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct MetricFields {
    #[serde(rename = "roeTTM")]
    roe_ttm: Option<f64>,
    #[serde(rename = "roiTTM")]
    roi_ttm: Option<f64>,
    #[serde(rename = "grossMarginTTM")]
    gross_margin_ttm: Option<f64>,
    #[serde(rename = "operatingMarginTTM")]
    operating_margin_ttm: Option<f64>,
}

/// Finnhub API client.
pub struct FinnhubClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl FinnhubClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(5))
            .timeout(std::time::Duration::from_secs(15))
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

    /// GET with the tier-denial sentinel: 403 maps to `Forbidden`, 5xx and
    /// transport faults retry, anything else is a validation error.
    async fn get_outcome<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        extra: &[(&str, String)],
    ) -> Result<FetchOutcome<T>, ProviderError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut params: Vec<(&str, String)> = vec![("token", self.api_key.clone())];
        params.extend(extra.iter().cloned());

        let endpoint_owned = endpoint.to_string();
        self.retry
            .run("finnhub.get", || {
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
                    match status.as_u16() {
                        200 => {
                            let value: T = resp.json().await.map_err(|e| {
                                ProviderError::Transient(format!("{endpoint} body: {e}"))
                            })?;
                            Ok(FetchOutcome::Ok(value))
                        }
                        403 => {
                            warn!(endpoint = %endpoint, "premium feature blocked (403)");
                            Ok(FetchOutcome::Forbidden)
                        }
                        503 => Ok(FetchOutcome::Unavailable),
                        code => {
                            let body = resp.text().await.unwrap_or_default();
                            let snippet: String = body.chars().take(120).collect();
                            Err(ProviderError::from_status(
                                code,
                                format!("{endpoint}: {snippet}"),
                            ))
                        }
                    }
                }
            })
            .await
    }

    /// Basic financials for the quality gate: ROE and margins.
    pub async fn get_basic_financials(
        &self,
        ticker: &str,
    ) -> Result<FetchOutcome<BasicFinancials>, ProviderError> {
        let outcome: FetchOutcome<MetricEnvelope> = self
            .get_outcome(
                "stock/metric",
                &[
                    ("symbol", ticker.to_uppercase()),
                    ("metric", "all".to_string()),
                ],
            )
            .await?;

        Ok(match outcome {
            FetchOutcome::Ok(envelope) => {
                let m = envelope.metric;
                debug!(ticker, roe = ?m.roe_ttm, margin = ?m.gross_margin_ttm, "financials fetched");
                FetchOutcome::Ok(BasicFinancials {
                    roe: m.roe_ttm,
                    roi: m.roi_ttm,
                    gross_margin: m.gross_margin_ttm,
                    operating_margin: m.operating_margin_ttm,
                })
            }
            FetchOutcome::Forbidden => FetchOutcome::Forbidden,
            FetchOutcome::Unavailable => FetchOutcome::Unavailable,
        })
    }

    /// Premium aggregate news sentiment.
    pub async fn get_news_sentiment(
        &self,
        ticker: &str,
    ) -> Result<FetchOutcome<NewsSentiment>, ProviderError> {
        self.get_outcome("news-sentiment", &[("symbol", ticker.to_uppercase())])
            .await
    }

    /// Recent company news, last five days (free-tier compatible).
    pub async fn get_company_news(
        &self,
        ticker: &str,
    ) -> Result<FetchOutcome<Vec<NewsArticle>>, ProviderError> {
        let today = Utc::now().date_naive();
        let start = today - Duration::days(5);
        self.get_outcome(
            "company-news",
            &[
                ("symbol", ticker.to_uppercase()),
                ("from", start.format("%Y-%m-%d").to_string()),
                ("to", today.format("%Y-%m-%d").to_string()),
            ],
        )
        .await
    }
}

impl std::fmt::Debug for FinnhubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinnhubClient")
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
    fn metric_envelope_parses_ttm_fields() {
        let json = r#"{"metric":{"roeTTM":22.4,"grossMarginTTM":46.1,"roiTTM":15.0}}"#;
        let env: MetricEnvelope = serde_json::from_str(json).unwrap();
        assert!((env.metric.roe_ttm.unwrap() - 22.4).abs() < 1e-12);
        assert!((env.metric.gross_margin_ttm.unwrap() - 46.1).abs() < 1e-12);
        assert!(env.metric.operating_margin_ttm.is_none());
    }

    #[test]
    fn news_sentiment_parses_both_score_paths() {
        let json = r#"{"companyNewsScore":0.82,"sentiment":{"bullishPercent":0.64}}"#;
        let s: NewsSentiment = serde_json::from_str(json).unwrap();
        assert!((s.company_news_score.unwrap() - 0.82).abs() < 1e-12);
        assert!((s.sentiment.unwrap().bullish_percent.unwrap() - 0.64).abs() < 1e-12);

        let s: NewsSentiment = serde_json::from_str("{}").unwrap();
        assert!(s.company_news_score.is_none());
        assert!(s.sentiment.is_none());
    }

    #[test]
    fn article_tolerates_missing_fields() {
        let json = r#"[{"headline":"Shares surge"},{"headline":"x","summary":"y","datetime":1}]"#;
        let articles: Vec<NewsArticle> = serde_json::from_str(json).unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].headline, "Shares surge");
        assert_eq!(articles[0].summary, "");
        assert_eq!(articles[1].datetime, Some(1));
    }
}
