//! Generation events and the callback object a streaming generation reports to.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Error;

/// One event of a streaming generation.
///
/// Any number of `Partial` events precede exactly one terminal event
/// (`Final` or `Error`). Nothing is delivered after the terminal event.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Partial { text: String },
    Final { text: String },
    Error { error: Error },
}

impl GenerationEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Partial { .. })
    }
}

/// An item of the consumable result sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmResult {
    pub text: String,
    pub is_final: bool,
}

impl LlmResult {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

pub type TextCallback = Arc<dyn Fn(String) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(Error) + Send + Sync>;

/// Streaming callbacks accepted by `generate_async`.
#[derive(Clone, Default)]
pub struct LlmCallbacks {
    pub on_partial_result: Option<TextCallback>,
    pub on_final_result: Option<TextCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl LlmCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_partial(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_partial_result = Some(Arc::new(f));
        self
    }

    pub fn on_final(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_final_result = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Route all three channels into a single event handler.
    pub fn on_event(f: impl Fn(GenerationEvent) + Send + Sync + 'static) -> Self {
        let f = Arc::new(f);
        let partial = Arc::clone(&f);
        let fin = Arc::clone(&f);
        Self::new()
            .on_partial(move |text| partial(GenerationEvent::Partial { text }))
            .on_final(move |text| fin(GenerationEvent::Final { text }))
            .on_error(move |error| f(GenerationEvent::Error { error }))
    }
}

impl std::fmt::Debug for LlmCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmCallbacks")
            .field("on_partial_result", &self.on_partial_result.is_some())
            .field("on_final_result", &self.on_final_result.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
