//! Context augmentation domain: items, queries, policies, and the traits for
//! stores, scorers and engines.
//!
//! Context items are free-text snippets retrieved before inference and
//! injected into the prompt. Persistence is delegated to a [`ContextStore`];
//! ranking to a [`ContextScorer`]; the [`ContextEngine`] ties them together.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::engine::RequestParams;
use crate::error::{Error, Result};

/// A reference to media attached to a context item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaReference {
    /// Absolute path or URI, depending on the media policy.
    pub uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl MediaReference {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: None,
            size_bytes: None,
            width: None,
            height: None,
        }
    }
}

/// Limits applied to media references when items are added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaValidationPolicy {
    /// Require absolute paths or URIs with a scheme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_absolute_uri: Option<bool>,

    /// Whitelist of URI schemes (e.g. `file`, `content`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_uri_schemes: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_media_bytes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_media_width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_media_height: Option<u32>,
}

/// A stored context snippet. Never mutated in place once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub id: String,

    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Vec<MediaReference>>,

    /// Creation time, epoch milliseconds.
    pub created_at: i64,

    /// Last update time, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

impl ContextItem {
    /// A new item with a random id, created now.
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), text)
    }

    pub fn with_id(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: None,
            tags: None,
            media: None,
            created_at: Utc::now().timestamp_millis(),
            updated_at: None,
            ttl_seconds: None,
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.get_or_insert_with(Vec::new).push(tag.into());
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn tags(&self) -> &[String] {
        self.tags.as_deref().unwrap_or_default()
    }

    /// Approximate footprint of the item, used for byte-bounded eviction.
    pub fn byte_size(&self) -> u64 {
        let tags: usize = self.tags().iter().map(String::len).sum();
        let metadata: usize = self
            .metadata
            .iter()
            .flatten()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        (self.id.len() + self.text.len() + tags + metadata) as u64
    }

    /// Whether the item outlived its TTL (or `default_ttl_seconds` when it has none).
    pub fn is_expired(&self, now_ms: i64, default_ttl_seconds: Option<u64>) -> bool {
        match self.ttl_seconds.or(default_ttl_seconds) {
            Some(ttl) => {
                let ttl_ms = i64::try_from(ttl.saturating_mul(1000)).unwrap_or(i64::MAX);
                now_ms.saturating_sub(self.created_at) > ttl_ms
            }
            None => false,
        }
    }
}

/// A retrieval query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextQuery {
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Metadata equality filters; all must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<BTreeMap<String, String>>,

    /// Tag filter; any may match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    /// 0..1 weighting of recency against keyword overlap. Clamped when scoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recency_bias: Option<f64>,

    /// Opt-in semantic retrieval, honored by stores that support it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_semantic: Option<bool>,
}

impl ContextQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_recency_bias(mut self, bias: f64) -> Self {
        self.recency_bias = Some(bias);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.get_or_insert_with(Vec::new).push(tag.into());
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Which items a store drops first when compaction must shrink it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionStrategy {
    /// Least recently accessed first.
    Lru,
    /// Oldest first.
    Recency,
    /// Largest first.
    Size,
}

impl EvictionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Recency => "recency",
            Self::Size => "size",
        }
    }
}

impl FromStr for EvictionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lru" => Ok(Self::Lru),
            "recency" => Ok(Self::Recency),
            "size" => Ok(Self::Size),
            _ => Err(Error::validation("evictionStrategy", "is not supported")),
        }
    }
}

impl std::fmt::Display for EvictionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EvictionStrategy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EvictionStrategy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A present-but-null strategy is rejected; only an absent key means "unset".
fn explicit_strategy<'de, D>(deserializer: D) -> std::result::Result<Option<EvictionStrategy>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<EvictionStrategy>::deserialize(deserializer)? {
        Some(strategy) => Ok(Some(strategy)),
        None => Err(serde::de::Error::custom(Error::validation(
            "evictionStrategy",
            "is not supported",
        ))),
    }
}

/// Bounds and eviction hints for a context store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ttl_seconds: Option<u64>,

    #[serde(
        default,
        deserialize_with = "explicit_strategy",
        skip_serializing_if = "Option::is_none"
    )]
    pub eviction_strategy: Option<EvictionStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaValidationPolicy>,
}

/// Store size report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextStoreStats {
    pub item_count: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
}

/// Pluggable persistence for context items.
///
/// Implementations: in-memory, none (no-op). A store shared by several
/// engines must itself be safe for concurrent `put`/`query`.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// The backend name (e.g. "in_memory", "none").
    fn name(&self) -> &str;

    async fn put(&self, items: Vec<ContextItem>) -> Result<()>;

    /// Candidate items for `query`, in store order.
    async fn query(&self, query: &ContextQuery) -> Result<Vec<ContextItem>>;

    async fn delete(&self, ids: &[String]) -> Result<()>;

    /// Apply the policy's bounds. Which items to drop is store-specific.
    async fn compact(&self, policy: &ContextPolicy) -> Result<()>;

    async fn stats(&self) -> Result<ContextStoreStats>;
}

/// Relevance of one item for one query.
pub trait ContextScorer: Send + Sync {
    fn score(&self, item: &ContextItem, query: &ContextQuery) -> f64;
}

/// Inputs for merging retrieved items into an outgoing request.
#[derive(Debug, Clone, Copy)]
pub struct ContextFormatParams<'a> {
    pub prompt: &'a str,
    pub items: &'a [ContextItem],
    pub query: Option<&'a ContextQuery>,
    pub request: &'a RequestParams,
}

/// Rewrites a request with retrieved context.
pub type ContextFormatter = Arc<dyn Fn(&ContextFormatParams<'_>) -> RequestParams + Send + Sync>;

/// Turns a bare prompt into a query when the caller supplied none.
pub type QueryFactory = Arc<dyn Fn(&str, &RequestParams) -> Option<ContextQuery> + Send + Sync>;

/// The retrieval-augmentation contract used by the inference hooks.
#[async_trait]
pub trait ContextEngine: Send + Sync {
    /// Validate and persist `items`, all or nothing.
    async fn add(&self, items: Vec<ContextItem>) -> Result<()>;

    /// Validate `query`, retrieve and rank.
    async fn search(&self, query: &ContextQuery) -> Result<Vec<ContextItem>>;

    /// Replace the held policy. A rejected policy leaves the previous one in place.
    fn set_policy(&self, policy: ContextPolicy) -> Result<()>;

    fn policy(&self) -> ContextPolicy;

    /// Forward the current policy to the store's compaction.
    async fn compact(&self) -> Result<()>;

    fn format_request(&self, params: &ContextFormatParams<'_>) -> RequestParams;

    fn derive_query(&self, prompt: &str, request: &RequestParams) -> Option<ContextQuery>;
}
