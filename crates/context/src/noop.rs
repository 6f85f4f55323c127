//! A store that keeps nothing; disables context augmentation.

use amaryllis_core::context::{
    ContextItem, ContextPolicy, ContextQuery, ContextStore, ContextStoreStats,
};
use amaryllis_core::error::Result;
use async_trait::async_trait;

pub struct NoopStore;

#[async_trait]
impl ContextStore for NoopStore {
    fn name(&self) -> &str {
        "none"
    }

    async fn put(&self, _items: Vec<ContextItem>) -> Result<()> {
        Ok(())
    }

    async fn query(&self, _query: &ContextQuery) -> Result<Vec<ContextItem>> {
        Ok(Vec::new())
    }

    async fn delete(&self, _ids: &[String]) -> Result<()> {
        Ok(())
    }

    async fn compact(&self, _policy: &ContextPolicy) -> Result<()> {
        Ok(())
    }

    async fn stats(&self) -> Result<ContextStoreStats> {
        Ok(ContextStoreStats {
            item_count: 0,
            total_bytes: Some(0),
        })
    }
}
