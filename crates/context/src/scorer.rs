//! Default relevance scoring: a blend of keyword overlap and recency.
//!
//! `score = bias * recency + (1 - bias) * keyword`, with `bias` taken from the
//! query (clamped to `[0, 1]`, [`DEFAULT_RECENCY_BIAS`] when unset). Both
//! components lie in `[0, 1]`, so the score does too.

use amaryllis_core::context::{ContextItem, ContextQuery, ContextScorer};
use chrono::Utc;

pub const DEFAULT_RECENCY_BIAS: f64 = 0.35;

const MS_PER_HOUR: f64 = 60.0 * 60.0 * 1000.0;

/// Clamp to `[0, 1]`. Non-finite input falls back to the default bias.
pub fn clamp_bias(value: f64) -> f64 {
    if value.is_nan() {
        return DEFAULT_RECENCY_BIAS;
    }
    value.clamp(0.0, 1.0)
}

/// Lower-cased whitespace tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Fraction of query tokens found as substrings of the item text.
pub fn keyword_score(item: &ContextItem, query: &ContextQuery) -> f64 {
    let tokens = tokenize(&query.text);
    if tokens.is_empty() {
        return 0.0;
    }
    let haystack = item.text.to_lowercase();
    let hits = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
    hits as f64 / tokens.len() as f64
}

/// `1 / (1 + age_hours)`; items from the future score 0.
pub fn recency_score(item: &ContextItem, now_ms: i64) -> f64 {
    let age_ms = now_ms.saturating_sub(item.created_at);
    if age_ms < 0 {
        return 0.0;
    }
    let age_hours = age_ms as f64 / MS_PER_HOUR;
    1.0 / (1.0 + age_hours)
}

/// The default [`ContextScorer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RecencyKeywordScorer;

impl RecencyKeywordScorer {
    /// Score against an explicit clock.
    pub fn score_at(&self, item: &ContextItem, query: &ContextQuery, now_ms: i64) -> f64 {
        let bias = clamp_bias(query.recency_bias.unwrap_or(DEFAULT_RECENCY_BIAS));
        bias * recency_score(item, now_ms) + (1.0 - bias) * keyword_score(item, query)
    }
}

impl ContextScorer for RecencyKeywordScorer {
    fn score(&self, item: &ContextItem, query: &ContextQuery) -> f64 {
        self.score_at(item, query, Utc::now().timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 3_600_000;

    fn item_at(text: &str, created_at: i64) -> ContextItem {
        let mut item = ContextItem::with_id("i", text);
        item.created_at = created_at;
        item
    }

    #[test]
    fn keyword_fraction() {
        let item = item_at("Rust ownership and borrowing", 1);
        assert_eq!(keyword_score(&item, &ContextQuery::new("rust borrowing")), 1.0);
        assert_eq!(keyword_score(&item, &ContextQuery::new("RUST python")), 0.5);
        assert_eq!(keyword_score(&item, &ContextQuery::new("go")), 0.0);
        assert_eq!(keyword_score(&item, &ContextQuery::new("   ")), 0.0);
    }

    #[test]
    fn recency_decays_per_hour() {
        let now = 100 * HOUR;
        assert_eq!(recency_score(&item_at("x", now), now), 1.0);
        assert_eq!(recency_score(&item_at("x", now - HOUR), now), 0.5);
        assert_eq!(recency_score(&item_at("x", now + HOUR), now), 0.0);
    }

    #[test]
    fn default_bias_blends() {
        let now = 10 * HOUR;
        let item = item_at("alpha beta", now);
        let score = RecencyKeywordScorer.score_at(&item, &ContextQuery::new("alpha gamma"), now);
        let expected = DEFAULT_RECENCY_BIAS * 1.0 + (1.0 - DEFAULT_RECENCY_BIAS) * 0.5;
        assert!((score - expected).abs() < 1e-12);
    }

    #[test]
    fn bias_extremes_select_one_component() {
        let now = 10 * HOUR;
        let item = item_at("alpha", now - HOUR);
        let recent_only = ContextQuery::new("zzz").with_recency_bias(1.0);
        assert_eq!(RecencyKeywordScorer.score_at(&item, &recent_only, now), 0.5);
        let keyword_only = ContextQuery::new("alpha").with_recency_bias(0.0);
        assert_eq!(RecencyKeywordScorer.score_at(&item, &keyword_only, now), 1.0);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let now = 1_000 * HOUR;
        let biases = [-5.0, -0.1, 0.0, 0.35, 0.7, 1.0, 1.5, 42.0, f64::NAN, f64::INFINITY];
        let ages = [0, 1, HOUR / 2, HOUR, 24 * HOUR, 900 * HOUR];
        let queries = ["alpha", "alpha beta", "nothing here", "ALPHA beta gamma delta"];
        for bias in biases {
            for age in ages {
                for text in queries {
                    let item = item_at("alpha beta gamma", now - age);
                    let query = ContextQuery::new(text).with_recency_bias(bias);
                    let score = RecencyKeywordScorer.score_at(&item, &query, now);
                    assert!((0.0..=1.0).contains(&score), "bias={bias} age={age} score={score}");
                }
            }
        }
    }

    #[test]
    fn clamp_handles_out_of_range() {
        assert_eq!(clamp_bias(-1.0), 0.0);
        assert_eq!(clamp_bias(2.0), 1.0);
        assert_eq!(clamp_bias(f64::INFINITY), 1.0);
        assert_eq!(clamp_bias(f64::NAN), DEFAULT_RECENCY_BIAS);
    }
}
