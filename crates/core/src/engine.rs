//! Native engine boundary: configuration records and the collaborator traits
//! the engine handle drives.
//!
//! The native inference engine (weights, tokenizer, sampling, vision encoder)
//! lives outside this workspace. It is reached through [`NativeEngine`] for
//! request/response calls and through an [`EventEmitter`] for the three
//! streaming result channels.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::NativeError;

/// Initialization config for the engine. Immutable once handed to `init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model file on device (required).
    pub model_path: PathBuf,

    /// Vision encoder model for multimodal prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_encoder_path: Option<PathBuf>,

    /// Vision adapter model for multimodal prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_adapter_path: Option<PathBuf>,

    /// Upper bound for session `top_k`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_top_k: Option<u32>,

    /// Maximum tokens (prompt + response).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Maximum images per request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_num_images: Option<u32>,

    /// Session installed right after the engine loads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionParams>,
}

impl EngineConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            vision_encoder_path: None,
            vision_adapter_path: None,
            max_top_k: None,
            max_tokens: None,
            max_num_images: None,
            session: None,
        }
    }

    pub fn with_session(mut self, session: SessionParams) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_max_num_images(mut self, max: u32) -> Self {
        self.max_num_images = Some(max);
        self
    }
}

/// Sampling knobs for a generation session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u32>,

    /// LoRA adapter (GPU backends only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lora_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_vision_modality: Option<bool>,
}

impl SessionParams {
    pub fn vision_enabled(&self) -> bool {
        self.enable_vision_modality.unwrap_or(false)
    }
}

/// An image attached to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInput {
    /// Local file path or asset URI.
    pub uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl ImageInput {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            width: None,
            height: None,
        }
    }
}

/// A single generation request. Built per call, never mutated after submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageInput>,

    /// Replace the current session before generating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionParams>,
}

impl RequestParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            images: Vec::new(),
            session: None,
        }
    }

    pub fn with_image(mut self, image: ImageInput) -> Self {
        self.images.push(image);
        self
    }

    pub fn with_session(mut self, session: SessionParams) -> Self {
        self.session = Some(session);
        self
    }
}

/// Externally visible lifecycle of an engine handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    Generating,
    Closed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Generating => "generating",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// The native inference engine.
///
/// Implementations wrap a platform runtime. Streaming results are not
/// returned from `generate_async`; they are pushed through the event
/// channels of the [`EventEmitter`] paired with the engine.
#[async_trait]
pub trait NativeEngine: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Load the model described by `config`.
    async fn init(&self, config: &EngineConfig) -> std::result::Result<(), NativeError>;

    /// Create a session, releasing any previous one first.
    async fn new_session(&self, params: &SessionParams) -> std::result::Result<(), NativeError>;

    /// Generate a complete response.
    async fn generate(&self, request: &RequestParams) -> std::result::Result<String, NativeError>;

    /// Start a streaming generation. Results arrive on the event channels.
    async fn generate_async(&self, request: &RequestParams) -> std::result::Result<(), NativeError>;

    /// Abandon the in-flight streaming generation, if any.
    fn cancel_async(&self);

    /// Release the engine and its session.
    fn close(&self);
}

/// The three named result channels of a streaming generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventChannel {
    PartialResult,
    FinalResult,
    Error,
}

impl EventChannel {
    pub const ALL: [EventChannel; 3] = [Self::PartialResult, Self::FinalResult, Self::Error];

    /// Wire name of the channel.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PartialResult => "onPartialResult",
            Self::FinalResult => "onFinalResult",
            Self::Error => "onError",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::PartialResult)
    }
}

/// Listener for one event channel. The payload is the result text, or the
/// error message on [`EventChannel::Error`].
pub type EventHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// A registered listener. Removing it more than once is a no-op.
pub trait EventSubscription: Send + Sync {
    fn remove(&self);
}

/// The event-channel subscription primitive.
pub trait EventEmitter: Send + Sync {
    fn add_listener(&self, channel: EventChannel, handler: EventHandler) -> Box<dyn EventSubscription>;
}
