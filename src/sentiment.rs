// =============================================================================
// Headline Sentiment — deterministic lexicon scorer for news fallback
// =============================================================================
//
// Used when the news provider's aggregate sentiment is unavailable: up to 15
// recent headlines are scored against a small finance lexicon and averaged
// into a [0, 100] sentiment score (50 = neutral).
// =============================================================================

use serde::{Deserialize, Serialize};

/// Most headlines analyzed per ticker.
pub const MAX_ARTICLES: usize = 15;

const POSITIVE: &[&str] = &[
    "beat", "beats", "upgrade", "upgraded", "surge", "surges", "rally", "record", "strong",
    "growth", "profit", "profits", "outperform", "buy", "bullish", "raise", "raised", "soar",
    "soars", "gain", "gains", "wins", "expand", "expands", "breakthrough", "exceed", "exceeds",
];

const NEGATIVE: &[&str] = &[
    "miss", "misses", "downgrade", "downgraded", "plunge", "plunges", "slump", "weak", "loss",
    "losses", "lawsuit", "probe", "investigation", "recall", "underperform", "sell", "bearish",
    "cut", "cuts", "fall", "falls", "drop", "drops", "warns", "warning", "layoff", "layoffs",
    "bankruptcy", "fraud",
];

/// Aggregate sentiment over a batch of headlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentAnalysis {
    /// [0, 100]; 50 is neutral.
    pub score: f64,
    pub positive_hits: usize,
    pub negative_hits: usize,
    pub articles_analyzed: usize,
    pub summary: String,
}

impl SentimentAnalysis {
    pub fn neutral() -> Self {
        Self {
            score: 50.0,
            positive_hits: 0,
            negative_hits: 0,
            articles_analyzed: 0,
            summary: "Neutral (no articles)".to_string(),
        }
    }
}

/// Score one piece of text: 50 plus 10 per net positive keyword, clamped.
fn score_text(text: &str) -> (f64, usize, usize) {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let pos = words.iter().filter(|w| POSITIVE.contains(w)).count();
    let neg = words.iter().filter(|w| NEGATIVE.contains(w)).count();
    let score = (50.0 + 10.0 * (pos as f64 - neg as f64)).clamp(0.0, 100.0);
    (score, pos, neg)
}

/// Analyze up to [`MAX_ARTICLES`] headline/summary texts.
pub fn analyze_articles(texts: &[String]) -> SentimentAnalysis {
    if texts.is_empty() {
        return SentimentAnalysis::neutral();
    }

    let mut total = 0.0;
    let mut positive_hits = 0;
    let mut negative_hits = 0;
    let batch: Vec<&String> = texts.iter().take(MAX_ARTICLES).collect();

    for text in &batch {
        let (score, pos, neg) = score_text(text);
        total += score;
        positive_hits += pos;
        negative_hits += neg;
    }

    let score = total / batch.len() as f64;
    let summary = if score >= 60.0 {
        "Bullish headline tone"
    } else if score <= 40.0 {
        "Bearish headline tone"
    } else {
        "Mixed/neutral headline tone"
    };

    SentimentAnalysis {
        score,
        positive_hits,
        negative_hits,
        articles_analyzed: batch.len(),
        summary: summary.to_string(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_neutral() {
        let s = analyze_articles(&[]);
        assert!((s.score - 50.0).abs() < 1e-9);
        assert_eq!(s.articles_analyzed, 0);
    }

    #[test]
    fn positive_headlines_score_above_neutral() {
        let texts = vec![
            "Company beats estimates, shares surge on strong growth".to_string(),
            "Analyst upgrade lifts outlook".to_string(),
        ];
        let s = analyze_articles(&texts);
        assert!(s.score > 60.0, "score {}", s.score);
        assert!(s.positive_hits >= 4);
        assert_eq!(s.negative_hits, 0);
    }

    #[test]
    fn negative_headlines_score_below_neutral() {
        let texts = vec![
            "Shares plunge after earnings miss and downgrade".to_string(),
            "Regulator opens probe into accounting fraud".to_string(),
        ];
        let s = analyze_articles(&texts);
        assert!(s.score < 40.0, "score {}", s.score);
    }

    #[test]
    fn caps_at_fifteen_articles() {
        let texts: Vec<String> = (0..40).map(|i| format!("headline {i}")).collect();
        let s = analyze_articles(&texts);
        assert_eq!(s.articles_analyzed, MAX_ARTICLES);
    }

    #[test]
    fn per_article_score_is_clamped() {
        let (score, _, _) = score_text("miss miss miss miss miss miss miss miss");
        assert!((score - 0.0).abs() < 1e-9);
        let (score, _, _) = score_text("beat beat beat beat beat beat beat beat");
        assert!((score - 100.0).abs() < 1e-9);
    }
}
