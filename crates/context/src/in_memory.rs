//! In-memory context store. Nothing survives the process.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use amaryllis_core::context::{
    ContextItem, ContextPolicy, ContextQuery, ContextStore, ContextStoreStats, EvictionStrategy,
};
use amaryllis_core::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::scorer::tokenize;

struct Entry {
    item: ContextItem,
    /// Logical clock value of the last put or query hit.
    last_access: u64,
}

/// A [`ContextStore`] keeping items in insertion order behind an async lock.
pub struct InMemoryStore {
    entries: RwLock<Vec<Entry>>,
    clock: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<ContextItem> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.item.id == id)
            .map(|e| e.item.clone())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_filters(item: &ContextItem, query: &ContextQuery) -> bool {
    let tags_ok = match query.tags.as_deref() {
        Some(wanted) if !wanted.is_empty() => wanted.iter().any(|t| item.tags().contains(t)),
        _ => true,
    };
    let filters_ok = query.filters.iter().flatten().all(|(key, value)| {
        item.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .is_some_and(|v| v == value)
    });
    tags_ok && filters_ok
}

fn token_hits(item: &ContextItem, tokens: &[String]) -> usize {
    let haystack = item.text.to_lowercase();
    tokens.iter().filter(|t| haystack.contains(t.as_str())).count()
}

#[async_trait]
impl ContextStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn put(&self, items: Vec<ContextItem>) -> Result<()> {
        let mut entries = self.entries.write().await;
        for item in items {
            let last_access = self.tick();
            match entries.iter_mut().find(|e| e.item.id == item.id) {
                Some(existing) => {
                    existing.item = item;
                    existing.last_access = last_access;
                }
                None => entries.push(Entry { item, last_access }),
            }
        }
        Ok(())
    }

    async fn query(&self, query: &ContextQuery) -> Result<Vec<ContextItem>> {
        let now = Utc::now().timestamp_millis();
        let tokens = tokenize(&query.text);
        let mut entries = self.entries.write().await;

        let mut hits: Vec<(usize, usize)> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.item.is_expired(now, None) && matches_filters(&e.item, query))
            .map(|(index, e)| (index, token_hits(&e.item, &tokens)))
            .filter(|(_, count)| *count > 0)
            .collect();

        hits.sort_by_key(|(_, count)| Reverse(*count));
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }

        let mut results = Vec::with_capacity(hits.len());
        for (index, _) in hits {
            entries[index].last_access = self.tick();
            results.push(entries[index].item.clone());
        }
        Ok(results)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.entries
            .write()
            .await
            .retain(|e| !doomed.contains(e.item.id.as_str()));
        Ok(())
    }

    async fn compact(&self, policy: &ContextPolicy) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let mut entries = self.entries.write().await;

        let before = entries.len();
        entries.retain(|e| !e.item.is_expired(now, policy.default_ttl_seconds));
        let expired = before - entries.len();

        let over_limits = |entries: &[Entry]| {
            let items_over = policy
                .max_items
                .is_some_and(|max| entries.len() as u64 > max);
            let bytes_over = policy.max_bytes.is_some_and(|max| {
                entries.iter().map(|e| e.item.byte_size()).sum::<u64>() > max
            });
            items_over || bytes_over
        };

        let mut evicted = 0usize;
        if over_limits(&entries[..]) {
            // Eviction order: victims first.
            let mut order: Vec<usize> = (0..entries.len()).collect();
            match policy.eviction_strategy.unwrap_or(EvictionStrategy::Lru) {
                EvictionStrategy::Lru => order.sort_by_key(|&i| entries[i].last_access),
                EvictionStrategy::Recency => order.sort_by_key(|&i| entries[i].item.created_at),
                EvictionStrategy::Size => {
                    order.sort_by_key(|&i| Reverse(entries[i].item.byte_size()))
                }
            }

            let mut victims = vec![false; entries.len()];
            let mut count = entries.len() as u64;
            let mut bytes: u64 = entries.iter().map(|e| e.item.byte_size()).sum();
            for index in order {
                let items_ok = policy.max_items.is_none_or(|max| count <= max);
                let bytes_ok = policy.max_bytes.is_none_or(|max| bytes <= max);
                if items_ok && bytes_ok {
                    break;
                }
                victims[index] = true;
                count -= 1;
                bytes -= entries[index].item.byte_size();
                evicted += 1;
            }

            let mut flags = victims.into_iter();
            entries.retain(|_| !flags.next().unwrap_or(false));
        }

        if expired > 0 || evicted > 0 {
            debug!(expired, evicted, remaining = entries.len(), "Context store compacted");
        }
        Ok(())
    }

    async fn stats(&self) -> Result<ContextStoreStats> {
        let entries = self.entries.read().await;
        Ok(ContextStoreStats {
            item_count: entries.len(),
            total_bytes: Some(entries.iter().map(|e| e.item.byte_size()).sum()),
        })
    }
}
