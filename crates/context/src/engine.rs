//! The default context engine: validation, store delegation and re-ranking.

use std::sync::{Arc, RwLock};

use amaryllis_core::context::{
    ContextEngine, ContextFormatParams, ContextFormatter, ContextItem, ContextPolicy,
    ContextQuery, ContextScorer, ContextStore, QueryFactory,
};
use amaryllis_core::engine::RequestParams;
use amaryllis_core::error::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::format::default_formatter;
use crate::scorer::RecencyKeywordScorer;
use crate::validation::{validate_context_items, validate_context_policy, validate_context_query};

/// A [`ContextEngine`] over a pluggable store that re-ranks candidates with a
/// [`ContextScorer`].
///
/// Holds no lock across calls and imposes no ordering between concurrent
/// `add` and `search`; the store's consistency model governs that.
pub struct ScoredContextEngine {
    store: Arc<dyn ContextStore>,
    scorer: Arc<dyn ContextScorer>,
    policy: RwLock<ContextPolicy>,
    formatter: ContextFormatter,
    query_factory: Option<QueryFactory>,
}

/// Builder for [`ScoredContextEngine`].
pub struct ContextEngineBuilder {
    store: Arc<dyn ContextStore>,
    scorer: Option<Arc<dyn ContextScorer>>,
    policy: ContextPolicy,
    formatter: Option<ContextFormatter>,
    query_factory: Option<QueryFactory>,
}

impl ContextEngineBuilder {
    pub fn scorer(mut self, scorer: Arc<dyn ContextScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn policy(mut self, policy: ContextPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn formatter(
        mut self,
        formatter: impl Fn(&ContextFormatParams<'_>) -> RequestParams + Send + Sync + 'static,
    ) -> Self {
        self.formatter = Some(Arc::new(formatter));
        self
    }

    pub fn query_factory(
        mut self,
        factory: impl Fn(&str, &RequestParams) -> Option<ContextQuery> + Send + Sync + 'static,
    ) -> Self {
        self.query_factory = Some(Arc::new(factory));
        self
    }

    /// Build the engine. Fails when the initial policy is invalid.
    pub fn build(self) -> Result<ScoredContextEngine> {
        validate_context_policy(&self.policy)?;
        Ok(ScoredContextEngine {
            store: self.store,
            scorer: self.scorer.unwrap_or_else(|| Arc::new(RecencyKeywordScorer)),
            policy: RwLock::new(self.policy),
            formatter: self.formatter.unwrap_or_else(|| Arc::new(default_formatter)),
            query_factory: self.query_factory,
        })
    }
}

impl ScoredContextEngine {
    pub fn builder(store: Arc<dyn ContextStore>) -> ContextEngineBuilder {
        ContextEngineBuilder {
            store,
            scorer: None,
            policy: ContextPolicy::default(),
            formatter: None,
            query_factory: None,
        }
    }

    /// Engine with the default scorer, formatter and an empty policy.
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self {
            store,
            scorer: Arc::new(RecencyKeywordScorer),
            policy: RwLock::new(ContextPolicy::default()),
            formatter: Arc::new(default_formatter),
            query_factory: None,
        }
    }

    pub fn store(&self) -> &Arc<dyn ContextStore> {
        &self.store
    }

    fn current_policy(&self) -> ContextPolicy {
        self.policy.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Order by score descending; ties keep store order.
    fn rank(&self, items: Vec<ContextItem>, query: &ContextQuery) -> Vec<ContextItem> {
        let mut scored: Vec<(f64, usize, ContextItem)> = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let score = self.scorer.score(&item, query);
                let score = if score.is_nan() { f64::NEG_INFINITY } else { score };
                (score, index, item)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.into_iter().map(|(_, _, item)| item).collect()
    }
}

#[async_trait]
impl ContextEngine for ScoredContextEngine {
    async fn add(&self, items: Vec<ContextItem>) -> Result<()> {
        let policy = self.current_policy();
        validate_context_items(&items, Some(&policy))?;
        let count = items.len();
        self.store.put(items).await?;
        debug!(store = self.store.name(), count, "Context items stored");
        Ok(())
    }

    async fn search(&self, query: &ContextQuery) -> Result<Vec<ContextItem>> {
        validate_context_query(query)?;
        let results = self.store.query(query).await?;
        debug!(store = self.store.name(), candidates = results.len(), "Context search");
        if results.len() <= 1 {
            return Ok(results);
        }
        let mut ranked = self.rank(results, query);
        if let Some(limit) = query.limit {
            ranked.truncate(limit);
        }
        Ok(ranked)
    }

    fn set_policy(&self, policy: ContextPolicy) -> Result<()> {
        validate_context_policy(&policy)?;
        *self.policy.write().unwrap_or_else(|e| e.into_inner()) = policy;
        Ok(())
    }

    fn policy(&self) -> ContextPolicy {
        self.current_policy()
    }

    async fn compact(&self) -> Result<()> {
        let policy = self.current_policy();
        self.store.compact(&policy).await
    }

    fn format_request(&self, params: &ContextFormatParams<'_>) -> RequestParams {
        (self.formatter)(params)
    }

    fn derive_query(&self, prompt: &str, request: &RequestParams) -> Option<ContextQuery> {
        self.query_factory.as_ref().and_then(|factory| factory(prompt, request))
    }
}
