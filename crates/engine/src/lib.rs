//! # Amaryllis Engine
//!
//! The engine handle ([`LlmEngine`]) that owns a native inference engine,
//! the event bridge turning its three result channels into one
//! [`GenerationStream`], and an in-process [`LocalEventEmitter`].

pub mod bridge;
pub mod emitter;
pub mod handle;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use bridge::{EventBridge, GenerationStream, StreamCanceller};
pub use emitter::LocalEventEmitter;
pub use handle::LlmEngine;
