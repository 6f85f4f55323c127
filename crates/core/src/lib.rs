//! # Amaryllis Core
//!
//! Domain types, traits, and error definitions for the Amaryllis on-device
//! inference binding. This crate has **no runtime dependencies** beyond
//! serialization; it defines the domain model all other crates implement
//! against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here: the native inference engine
//! ([`NativeEngine`]), its event channels ([`EventEmitter`]), and context
//! persistence ([`ContextStore`]). Implementations live in their respective
//! crates or in the host application. This enables:
//! - Swapping the native backend without touching the generation pipeline
//! - Testing with scripted engines and recording stores
//! - Clean dependency graph (all crates depend inward on core)

pub mod context;
pub mod engine;
pub mod error;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use context::{
    ContextEngine, ContextFormatParams, ContextFormatter, ContextItem, ContextPolicy,
    ContextQuery, ContextScorer, ContextStore, ContextStoreStats, EvictionStrategy,
    MediaReference, MediaValidationPolicy, QueryFactory,
};
pub use engine::{
    EngineConfig, EngineState, EventChannel, EventEmitter, EventHandler, EventSubscription,
    ImageInput, NativeEngine, RequestParams, SessionParams,
};
pub use error::{Error, NativeError, NativeStage, Result, is_amaryllis_error};
pub use event::{GenerationEvent, LlmCallbacks, LlmResult};
