//! `amaryllis context`: Retrieval over a JSON file of context items.
//!
//! The file holds an array of items. Only `text` is required; a missing `id`
//! gets a random one and a missing `created_at` means "now".

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use amaryllis_config::AppConfig;
use amaryllis_context::{InMemoryStore, RecencyKeywordScorer, ScoredContextEngine};
use amaryllis_core::context::{
    ContextEngine, ContextItem, ContextQuery, ContextScorer, ContextStore, MediaReference,
};
use amaryllis_core::engine::RequestParams;
use amaryllis_hooks::augment_request;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ItemRecord {
    #[serde(default)]
    id: Option<String>,
    text: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    metadata: Option<BTreeMap<String, String>>,
    #[serde(default)]
    media: Option<Vec<MediaReference>>,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    ttl_seconds: Option<u64>,
}

impl ItemRecord {
    fn into_item(self) -> ContextItem {
        let mut item = match self.id {
            Some(id) => ContextItem::with_id(id, self.text),
            None => ContextItem::new(self.text),
        };
        if let Some(created_at) = self.created_at {
            item.created_at = created_at;
        }
        item.tags = self.tags;
        item.metadata = self.metadata;
        item.media = self.media;
        item.ttl_seconds = self.ttl_seconds;
        item
    }
}

fn parse_items(json: &str) -> Result<Vec<ContextItem>, serde_json::Error> {
    let records: Vec<ItemRecord> = serde_json::from_str(json)?;
    Ok(records.into_iter().map(ItemRecord::into_item).collect())
}

/// Load `items` into a fresh in-memory engine governed by the configured policy.
async fn load_engine(
    config: &AppConfig,
    items: &Path,
) -> Result<ScoredContextEngine, Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(items)
        .map_err(|e| format!("Failed to read {}: {e}", items.display()))?;
    let parsed = parse_items(&json).map_err(|e| format!("Invalid items file {}: {e}", items.display()))?;

    let defaults = config.clone();
    let engine = ScoredContextEngine::builder(Arc::new(InMemoryStore::new()))
        .scorer(Arc::new(RecencyKeywordScorer))
        .policy(config.context.policy.clone())
        .query_factory(move |prompt, _| defaults.context_query(prompt))
        .build()?;

    let count = parsed.len();
    engine.add(parsed).await?;
    tracing::debug!(count, path = %items.display(), "Loaded context items");
    Ok(engine)
}

fn build_query(
    config: &AppConfig,
    text: String,
    limit: Option<usize>,
    tags: Vec<String>,
    recency_bias: Option<f64>,
) -> ContextQuery {
    let mut query = ContextQuery::new(text).with_limit(limit.unwrap_or(config.context.default_limit));
    query.recency_bias = recency_bias.or(config.context.recency_bias);
    if !tags.is_empty() {
        query.tags = Some(tags);
    }
    query
}

fn created_label(item: &ContextItem) -> String {
    chrono::DateTime::from_timestamp_millis(item.created_at)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| item.created_at.to_string())
}

pub async fn search(
    items: &Path,
    text: String,
    limit: Option<usize>,
    tags: Vec<String>,
    recency_bias: Option<f64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let engine = load_engine(&config, items).await?;
    let query = build_query(&config, text, limit, tags, recency_bias);

    println!("🔍 Searching context for: \"{}\"", query.text);
    println!();

    let results = engine.search(&query).await?;
    if results.is_empty() {
        println!("   No matching items.");
        return Ok(());
    }

    let scorer = RecencyKeywordScorer;
    for (i, item) in results.iter().enumerate() {
        let preview: String = item.text.chars().take(80).collect();
        let score = scorer.score(item, &query);
        println!("  {:>2}. [score: {score:.3}] {preview}", i + 1);
        println!("      id: {}  created: {}", item.id, created_label(item));
        if !item.tags().is_empty() {
            println!("      tags: {}", item.tags().join(", "));
        }
    }

    Ok(())
}

pub async fn prompt(items: &Path, prompt: String) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let engine = load_engine(&config, items).await?;

    let request = augment_request(Some(&engine), None, RequestParams::new(prompt)).await?;
    println!("{}", request.prompt);
    Ok(())
}

pub async fn stats(items: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let engine = load_engine(&config, items).await?;
    let policy = engine.policy();

    let before = engine.store().stats().await?;
    engine.compact().await?;
    let after = engine.store().stats().await?;

    println!("📚 Context Statistics");
    println!("=====================");
    println!("  Store:      {}", engine.store().name());
    println!(
        "  Eviction:   {}",
        policy.eviction_strategy.map(|s| s.as_str()).unwrap_or("lru")
    );
    println!(
        "  Loaded:     {} items, {} bytes",
        before.item_count,
        before.total_bytes.unwrap_or(0)
    );
    println!(
        "  Compacted:  {} items, {} bytes",
        after.item_count,
        after.total_bytes.unwrap_or(0)
    );
    Ok(())
}
