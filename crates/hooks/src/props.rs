//! Caller callbacks for the inference hooks.

use std::sync::Arc;

use amaryllis_core::error::Error;

type Notify = Arc<dyn Fn() + Send + Sync>;
type ResultCallback = Arc<dyn Fn(String, bool) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(Error) + Send + Sync>;

/// Lifecycle callbacks of one hook call.
///
/// `on_generate` fires right before the request is submitted, `on_result`
/// for every partial and the final text, `on_error` at most once, and
/// `on_complete` exactly once when the call is torn down.
#[derive(Clone, Default)]
pub struct InferenceProps {
    pub on_generate: Option<Notify>,
    pub on_result: Option<ResultCallback>,
    pub on_error: Option<ErrorCallback>,
    pub on_complete: Option<Notify>,
}

impl InferenceProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_generate(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_generate = Some(Arc::new(f));
        self
    }

    pub fn on_result(mut self, f: impl Fn(String, bool) + Send + Sync + 'static) -> Self {
        self.on_result = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    pub(crate) fn generate(&self) {
        if let Some(f) = &self.on_generate {
            f();
        }
    }

    pub(crate) fn result(&self, text: String, is_final: bool) {
        if let Some(f) = &self.on_result {
            f(text, is_final);
        }
    }

    pub(crate) fn error(&self, error: Error) {
        if let Some(f) = &self.on_error {
            f(error);
        }
    }

    pub(crate) fn complete(&self) {
        if let Some(f) = &self.on_complete {
            f();
        }
    }
}

impl std::fmt::Debug for InferenceProps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceProps")
            .field("on_generate", &self.on_generate.is_some())
            .field("on_result", &self.on_result.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}
