//! # Amaryllis Hooks
//!
//! Request/response calling conventions over the engine handle:
//! [`Inference`] for one-shot calls and [`InferenceAsync`] for streaming
//! calls, both optionally augmented by a context engine.

pub mod augment;
pub mod inference;
pub mod props;

pub use augment::augment_request;
pub use inference::{Inference, InferenceAsync, InferenceHandle};
pub use props::InferenceProps;
