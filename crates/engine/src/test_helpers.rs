//! Scripted native engine shared by the engine tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use amaryllis_core::engine::{EngineConfig, EventChannel, NativeEngine, RequestParams, SessionParams};
use amaryllis_core::error::NativeError;

use crate::emitter::LocalEventEmitter;

/// Records every call, fails on demand, and replays a scripted event
/// sequence synchronously from `generate_async`.
pub struct ScriptedNative {
    pub emitter: LocalEventEmitter,
    script: Mutex<Vec<(EventChannel, String)>>,
    failures: Mutex<HashMap<&'static str, NativeError>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedNative {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            emitter: LocalEventEmitter::new(),
            script: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Events the next `generate_async` emits before returning.
    pub fn script(&self, events: &[(EventChannel, &str)]) {
        *self.script.lock().unwrap() = events
            .iter()
            .map(|(channel, text)| (*channel, text.to_string()))
            .collect();
    }

    /// Make the next call to `op` fail with `error`.
    pub fn fail_next(&self, op: &'static str, error: NativeError) {
        self.failures.lock().unwrap().insert(op, error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == op).count()
    }

    fn record(&self, op: &'static str) -> Result<(), NativeError> {
        self.calls.lock().unwrap().push(op.to_string());
        match self.failures.lock().unwrap().remove(op) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl NativeEngine for ScriptedNative {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn init(&self, _config: &EngineConfig) -> Result<(), NativeError> {
        self.record("init")
    }

    async fn new_session(&self, _params: &SessionParams) -> Result<(), NativeError> {
        self.record("new_session")
    }

    async fn generate(&self, request: &RequestParams) -> Result<String, NativeError> {
        self.record("generate")?;
        Ok(format!("echo: {}", request.prompt))
    }

    async fn generate_async(&self, _request: &RequestParams) -> Result<(), NativeError> {
        self.record("generate_async")?;
        let script = std::mem::take(&mut *self.script.lock().unwrap());
        for (channel, text) in script {
            self.emitter.emit(channel, &text);
        }
        Ok(())
    }

    fn cancel_async(&self) {
        let _ = self.record("cancel");
    }

    fn close(&self) {
        let _ = self.record("close");
    }
}
