//! Context augmentation for Amaryllis: validation, scoring, formatting,
//! the default [`ScoredContextEngine`] and reference stores.

pub mod engine;
pub mod format;
pub mod in_memory;
pub mod noop;
pub mod scorer;
pub mod validation;

pub use engine::{ContextEngineBuilder, ScoredContextEngine};
pub use format::{default_formatter, format_context_item};
pub use in_memory::InMemoryStore;
pub use noop::NoopStore;
pub use scorer::{DEFAULT_RECENCY_BIAS, RecencyKeywordScorer};
pub use validation::{
    validate_context_item, validate_context_items, validate_context_policy,
    validate_context_query, validate_media_policy, validate_media_reference,
    validate_media_references,
};
