//! The engine handle: sole owner of one native engine and its session.
//!
//! Lifecycle: `Uninitialized -> Initializing -> Ready <-> Generating`, and
//! `close()` from anywhere into the terminal `Closed` state.
//!
//! At most one streaming generation is in flight per handle. Starting another
//! cancels the current one first. Every streaming generation registers
//! listeners on all three channels; the first terminal event removes them and
//! returns the handle to `Ready` before the caller's callback runs.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use amaryllis_core::engine::{
    EngineConfig, EngineState, EventChannel, EventEmitter, EventHandler, EventSubscription,
    NativeEngine, RequestParams, SessionParams,
};
use amaryllis_core::error::{Error, NativeStage, Result};
use amaryllis_core::event::LlmCallbacks;
use tracing::{debug, error, info, trace, warn};

use crate::bridge::{EventBridge, GenerationStream};

struct ActiveGeneration {
    id: u64,
    done: Arc<AtomicBool>,
    subscriptions: Vec<Box<dyn EventSubscription>>,
}

impl ActiveGeneration {
    /// Silence and unregister this generation's listeners.
    fn release(self) {
        self.done.store(true, Ordering::SeqCst);
        for subscription in self.subscriptions {
            subscription.remove();
        }
    }
}

struct Lifecycle {
    state: EngineState,
    config: Option<EngineConfig>,
    session: Option<SessionParams>,
    generation: Option<ActiveGeneration>,
}

struct EngineInner {
    native: Arc<dyn NativeEngine>,
    events: Arc<dyn EventEmitter>,
    lifecycle: Mutex<Lifecycle>,
    next_generation: AtomicU64,
}

impl EngineInner {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn set_state_unless_closed(&self, state: EngineState) {
        let mut lc = self.lifecycle();
        if lc.state != EngineState::Closed {
            lc.state = state;
        }
    }

    /// Cancel the in-flight generation (only generation `only`, when given).
    /// Returns whether anything was cancelled.
    fn cancel(&self, only: Option<u64>) -> bool {
        let active = {
            let mut lc = self.lifecycle();
            let matches = lc
                .generation
                .as_ref()
                .is_some_and(|g| only.is_none_or(|id| id == g.id));
            if !matches {
                return false;
            }
            if lc.state == EngineState::Generating {
                lc.state = EngineState::Ready;
            }
            lc.generation.take()
        };
        let Some(generation) = active else {
            return false;
        };
        let id = generation.id;
        generation.release();
        self.native.cancel_async();
        debug!(generation = id, "Generation cancelled");
        true
    }

    /// Terminal-event cleanup for generation `id`. A stale id is ignored.
    fn finish(&self, id: u64) {
        let finished = {
            let mut lc = self.lifecycle();
            if lc.generation.as_ref().is_some_and(|g| g.id == id) {
                if lc.state == EngineState::Generating {
                    lc.state = EngineState::Ready;
                }
                lc.generation.take()
            } else {
                None
            }
        };
        if let Some(generation) = finished {
            generation.release();
            debug!(generation = id, "Generation finished, listeners removed");
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let lc = self.lifecycle.get_mut().unwrap_or_else(|e| e.into_inner());
        let live = matches!(lc.state, EngineState::Ready | EngineState::Generating);
        lc.state = EngineState::Closed;
        if let Some(generation) = lc.generation.take() {
            generation.release();
            self.native.cancel_async();
        }
        if live {
            self.native.close();
            debug!(backend = self.native.name(), "Engine released on drop");
        }
    }
}

fn require_live(lc: &Lifecycle, kind: fn(String) -> Error) -> Result<()> {
    match lc.state {
        EngineState::Ready | EngineState::Generating => Ok(()),
        EngineState::Closed => Err(kind("engine is closed".into())),
        EngineState::Uninitialized | EngineState::Initializing => {
            Err(kind("engine is not initialized".into()))
        }
    }
}

/// Shape checks run before a request reaches the native engine.
fn check_request(request: &RequestParams, lc: &Lifecycle) -> Result<()> {
    if request.prompt.trim().is_empty() {
        return Err(Error::validation("RequestParams.prompt", "must be a non-empty string"));
    }
    for image in &request.images {
        if image.uri.trim().is_empty() {
            return Err(Error::validation("ImageInput.uri", "must be a non-empty string"));
        }
        if image.width == Some(0) {
            return Err(Error::validation("ImageInput.width", "must be a positive number"));
        }
        if image.height == Some(0) {
            return Err(Error::validation("ImageInput.height", "must be a positive number"));
        }
    }
    if request.images.is_empty() {
        return Ok(());
    }

    let max_images = lc.config.as_ref().and_then(|c| c.max_num_images);
    if let Some(max) = max_images
        && request.images.len() > max as usize
    {
        return Err(Error::validation(
            "RequestParams.images",
            format!("exceeds maxNumImages ({max})"),
        ));
    }

    let vision = request
        .session
        .as_ref()
        .or(lc.session.as_ref())
        .is_some_and(SessionParams::vision_enabled);
    if !vision {
        return Err(Error::Session(
            "image input requires a session with vision modality enabled".into(),
        ));
    }
    Ok(())
}

/// Run a caller callback; a panic is logged and swallowed so cleanup proceeds.
fn deliver(channel: EventChannel, generation: u64, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(generation, channel = channel.name(), "Generation callback panicked");
    }
}

fn listener(
    inner: Weak<EngineInner>,
    id: u64,
    done: Arc<AtomicBool>,
    channel: EventChannel,
    callbacks: LlmCallbacks,
) -> EventHandler {
    Arc::new(move |payload: &str| {
        if !channel.is_terminal() {
            if done.load(Ordering::SeqCst) {
                return;
            }
            if let Some(on_partial) = &callbacks.on_partial_result {
                deliver(channel, id, || on_partial(payload.to_string()));
            }
            return;
        }

        if done.swap(true, Ordering::SeqCst) {
            trace!(generation = id, channel = channel.name(), "Dropping event after terminal");
            return;
        }
        if let Some(inner) = inner.upgrade() {
            inner.finish(id);
        }
        match channel {
            EventChannel::FinalResult => {
                if let Some(on_final) = &callbacks.on_final_result {
                    deliver(channel, id, || on_final(payload.to_string()));
                }
            }
            _ => {
                let err = Error::Generation(payload.to_string());
                warn!(generation = id, error = %err, "Generation reported an error");
                if let Some(on_error) = &callbacks.on_error {
                    deliver(channel, id, || on_error(err));
                }
            }
        }
    })
}

/// Owning handle around one [`NativeEngine`]. Clones share the same engine.
#[derive(Clone)]
pub struct LlmEngine {
    inner: Arc<EngineInner>,
}

impl LlmEngine {
    pub fn new(native: Arc<dyn NativeEngine>, events: Arc<dyn EventEmitter>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                native,
                events,
                lifecycle: Mutex::new(Lifecycle {
                    state: EngineState::Uninitialized,
                    config: None,
                    session: None,
                    generation: None,
                }),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn backend(&self) -> &str {
        self.inner.native.name()
    }

    pub fn state(&self) -> EngineState {
        self.inner.lifecycle().state
    }

    /// The config the engine was initialized with.
    pub fn config(&self) -> Option<EngineConfig> {
        self.inner.lifecycle().config.clone()
    }

    /// The current session, if one is installed.
    pub fn session(&self) -> Option<SessionParams> {
        self.inner.lifecycle().session.clone()
    }

    /// Load the model. Re-initializing a live handle releases the previous
    /// native engine first. On failure the handle is left `Uninitialized`.
    pub async fn init(&self, config: EngineConfig) -> Result<()> {
        if config.model_path.as_os_str().is_empty() {
            return Err(Error::Initialization("model path is required".into()));
        }

        let (previous, was_live) = {
            let mut lc = self.inner.lifecycle();
            match lc.state {
                EngineState::Closed => {
                    return Err(Error::Initialization("engine is closed".into()));
                }
                EngineState::Initializing => {
                    return Err(Error::Initialization("initialization already in progress".into()));
                }
                _ => {}
            }
            let was_live = matches!(lc.state, EngineState::Ready | EngineState::Generating);
            lc.state = EngineState::Initializing;
            lc.config = None;
            lc.session = None;
            (lc.generation.take(), was_live)
        };

        if let Some(generation) = previous {
            generation.release();
            self.inner.native.cancel_async();
        }
        if was_live {
            self.inner.native.close();
            info!(backend = self.backend(), "Released previous engine before re-init");
        }

        if let Err(e) = self.inner.native.init(&config).await {
            self.inner.set_state_unless_closed(EngineState::Uninitialized);
            let err = Error::from_native(NativeStage::Init, e);
            warn!(backend = self.backend(), error = %err, "Engine initialization failed");
            return Err(err);
        }

        if let Some(session) = &config.session
            && let Err(e) = self.inner.native.new_session(session).await
        {
            self.inner.native.close();
            self.inner.set_state_unless_closed(EngineState::Uninitialized);
            let err = Error::from_native(NativeStage::Init, e);
            warn!(backend = self.backend(), error = %err, "Initial session setup failed");
            return Err(err);
        }

        let closed_meanwhile = {
            let mut lc = self.inner.lifecycle();
            if lc.state == EngineState::Closed {
                true
            } else {
                info!(
                    backend = self.backend(),
                    model = %config.model_path.display(),
                    "Engine initialized"
                );
                lc.state = EngineState::Ready;
                lc.session = config.session.clone();
                lc.config = Some(config);
                false
            }
        };
        if closed_meanwhile {
            self.inner.native.close();
            return Err(Error::Initialization("engine was closed during initialization".into()));
        }
        Ok(())
    }

    /// Replace the current session. Cancels an in-flight streaming
    /// generation first. A failure leaves the engine `Ready`.
    pub async fn new_session(&self, params: SessionParams) -> Result<()> {
        require_live(&self.inner.lifecycle(), Error::Session)?;
        self.inner.cancel(None);
        self.install_session(&params).await
    }

    async fn install_session(&self, params: &SessionParams) -> Result<()> {
        self.inner
            .native
            .new_session(params)
            .await
            .map_err(|e| Error::from_native(NativeStage::Session, e))?;
        debug!(
            vision = params.vision_enabled(),
            lora = params.lora_path.is_some(),
            "Session installed"
        );
        self.inner.lifecycle().session = Some(params.clone());
        Ok(())
    }

    /// Generate a complete response in one round trip. Does not change state.
    pub async fn generate(&self, request: &RequestParams) -> Result<String> {
        {
            let lc = self.inner.lifecycle();
            require_live(&lc, Error::Generation)?;
            if lc.state == EngineState::Generating {
                return Err(Error::Generation(
                    "a streaming generation is in progress".into(),
                ));
            }
            check_request(request, &lc)?;
        }
        if let Some(session) = &request.session {
            self.install_session(session).await?;
        }

        let text = self
            .inner
            .native
            .generate(request)
            .await
            .map_err(|e| Error::from_native(NativeStage::Generate, e))?;
        debug!(chars = text.len(), "One-shot generation complete");
        Ok(text)
    }

    /// Start a streaming generation. Results are delivered to `callbacks`;
    /// this call only reports whether the generation started.
    pub async fn generate_async(&self, request: &RequestParams, callbacks: LlmCallbacks) -> Result<()> {
        let id = self.inner.next_id();
        self.start_generation(id, request, callbacks).await
    }

    /// Start a streaming generation and return its results as a stream.
    /// Dropping or unsubscribing the stream cancels this generation only.
    pub async fn stream(&self, request: &RequestParams) -> Result<GenerationStream> {
        let id = self.inner.next_id();
        let weak = Arc::downgrade(&self.inner);
        let bridge = EventBridge::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.cancel(Some(id));
            }
        });
        let (callbacks, stream) = bridge.into_parts();
        self.start_generation(id, request, callbacks).await?;
        Ok(stream)
    }

    async fn start_generation(
        &self,
        id: u64,
        request: &RequestParams,
        callbacks: LlmCallbacks,
    ) -> Result<()> {
        {
            let lc = self.inner.lifecycle();
            require_live(&lc, Error::Generation)?;
            check_request(request, &lc)?;
        }
        if self.inner.cancel(None) {
            debug!(generation = id, "Replacing in-flight generation");
        }
        if let Some(session) = &request.session {
            self.install_session(session).await?;
        }

        let done = Arc::new(AtomicBool::new(false));
        let subscriptions = EventChannel::ALL
            .iter()
            .map(|&channel| {
                let handler = listener(
                    Arc::downgrade(&self.inner),
                    id,
                    Arc::clone(&done),
                    channel,
                    callbacks.clone(),
                );
                self.inner.events.add_listener(channel, handler)
            })
            .collect();
        let generation = ActiveGeneration {
            id,
            done,
            subscriptions,
        };

        let (stale, rejected) = {
            let mut lc = self.inner.lifecycle();
            if matches!(lc.state, EngineState::Ready | EngineState::Generating) {
                lc.state = EngineState::Generating;
                (lc.generation.replace(generation), None)
            } else {
                (None, Some(generation))
            }
        };
        if let Some(stale) = stale {
            stale.release();
            self.inner.native.cancel_async();
        }
        if let Some(rejected) = rejected {
            rejected.release();
            return Err(Error::Generation("engine was closed".into()));
        }

        debug!(generation = id, images = request.images.len(), "Starting streaming generation");
        if let Err(e) = self.inner.native.generate_async(request).await {
            self.inner.finish(id);
            let err = Error::from_native(NativeStage::Generate, e);
            warn!(generation = id, error = %err, "Streaming generation failed to start");
            return Err(err);
        }
        Ok(())
    }

    /// Abandon the in-flight streaming generation and drop its listeners.
    /// A no-op when nothing is in flight.
    pub fn cancel_async(&self) {
        self.inner.cancel(None);
    }

    /// Ask the native engine to stop an abandoned one-shot `generate`.
    /// Skipped while a streaming generation is in flight, since the native
    /// cancel is engine-wide. Returns whether the native cancel ran.
    pub fn cancel_generate(&self) -> bool {
        if self.inner.lifecycle().generation.is_some() {
            debug!("Streaming generation in flight, leaving it running");
            return false;
        }
        self.inner.native.cancel_async();
        true
    }

    /// Release the native engine and session. Safe to call repeatedly.
    pub fn close(&self) {
        self.inner.cancel(None);
        let was_live = {
            let mut lc = self.inner.lifecycle();
            let was_live = matches!(lc.state, EngineState::Ready | EngineState::Generating);
            lc.state = EngineState::Closed;
            lc.session = None;
            was_live
        };
        if was_live {
            self.inner.native.close();
            info!(backend = self.backend(), "Engine closed");
        }
    }
}

impl std::fmt::Debug for LlmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmEngine")
            .field("backend", &self.backend())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::LocalEventEmitter;
    use crate::test_helpers::ScriptedNative;
    use amaryllis_core::engine::ImageInput;
    use amaryllis_core::error::NativeError;
    use amaryllis_core::event::LlmResult;
    use futures::StreamExt;

    async fn ready_engine(native: &Arc<ScriptedNative>) -> LlmEngine {
        let engine = LlmEngine::new(native.clone(), Arc::new(native.emitter.clone()));
        engine.init(EngineConfig::new("/models/test.task")).await.unwrap();
        engine
    }

    fn recording_callbacks() -> (LlmCallbacks, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (p, f, e) = (seen.clone(), seen.clone(), seen.clone());
        let callbacks = LlmCallbacks::new()
            .on_partial(move |t| p.lock().unwrap().push(format!("partial:{t}")))
            .on_final(move |t| f.lock().unwrap().push(format!("final:{t}")))
            .on_error(move |err| e.lock().unwrap().push(format!("error:{err}")));
        (callbacks, seen)
    }

    #[tokio::test]
    async fn init_moves_to_ready() {
        let native = ScriptedNative::new();
        let engine = LlmEngine::new(native.clone(), Arc::new(native.emitter.clone()));
        assert_eq!(engine.state(), EngineState::Uninitialized);
        engine.init(EngineConfig::new("/models/test.task")).await.unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(native.count("init"), 1);
    }

    #[tokio::test]
    async fn init_failure_leaves_uninitialized() {
        let native = ScriptedNative::new();
        native.fail_next("init", NativeError::InvalidModelPath("/nope".into()));
        let engine = LlmEngine::new(native.clone(), Arc::new(native.emitter.clone()));

        let err = engine.init(EngineConfig::new("/nope")).await.unwrap_err();
        assert!(matches!(err, Error::Initialization(_)));
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert_eq!(native.count("close"), 0);
    }

    #[tokio::test]
    async fn init_session_failure_releases_engine() {
        let native = ScriptedNative::new();
        native.fail_next("new_session", NativeError::Failed("bad lora".into()));
        let engine = LlmEngine::new(native.clone(), Arc::new(native.emitter.clone()));

        let config = EngineConfig::new("/models/test.task").with_session(SessionParams::default());
        assert!(engine.init(config).await.is_err());
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert_eq!(native.count("close"), 1);
    }

    #[tokio::test]
    async fn out_of_memory_maps_to_resource() {
        let native = ScriptedNative::new();
        native.fail_next("init", NativeError::OutOfMemory("weights".into()));
        let engine = LlmEngine::new(native.clone(), Arc::new(native.emitter.clone()));
        let err = engine.init(EngineConfig::new("/models/big.task")).await.unwrap_err();
        assert_eq!(err.code(), "RESOURCE_ERROR");
    }

    #[tokio::test]
    async fn reinit_releases_previous_engine() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;
        engine.init(EngineConfig::new("/models/other.task")).await.unwrap();

        assert_eq!(native.calls(), ["init", "close", "init"]);
        assert_eq!(engine.config().unwrap().model_path.to_str(), Some("/models/other.task"));
    }

    #[tokio::test]
    async fn generate_returns_text_without_state_change() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;
        let text = engine.generate(&RequestParams::new("hi")).await.unwrap();
        assert_eq!(text, "echo: hi");
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn generate_failure_keeps_engine_ready() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;
        native.fail_next("generate", NativeError::Failed("decode".into()));

        let err = engine.generate(&RequestParams::new("hi")).await.unwrap_err();
        assert_eq!(err, Error::Generation("decode".into()));
        assert_eq!(engine.state(), EngineState::Ready);
        assert!(engine.generate(&RequestParams::new("again")).await.is_ok());
    }

    #[tokio::test]
    async fn calls_before_init_fail() {
        let native = ScriptedNative::new();
        let engine = LlmEngine::new(native.clone(), Arc::new(native.emitter.clone()));
        let err = engine.generate(&RequestParams::new("hi")).await.unwrap_err();
        assert!(err.to_string().contains("not initialized"));
        assert!(engine.stream(&RequestParams::new("hi")).await.is_err());
    }

    #[tokio::test]
    async fn request_checks_run_before_native_call() {
        let native = ScriptedNative::new();
        let engine = LlmEngine::new(native.clone(), Arc::new(native.emitter.clone()));
        engine
            .init(EngineConfig::new("/models/test.task").with_max_num_images(1))
            .await
            .unwrap();

        let blank = engine.generate(&RequestParams::new("   ")).await.unwrap_err();
        assert!(blank.is_validation());

        let image = RequestParams::new("describe").with_image(ImageInput::new("/tmp/a.png"));
        let no_vision = engine.generate(&image).await.unwrap_err();
        assert!(matches!(no_vision, Error::Session(_)));

        let vision = SessionParams {
            enable_vision_modality: Some(true),
            ..SessionParams::default()
        };
        let too_many = image
            .clone()
            .with_image(ImageInput::new("/tmp/b.png"))
            .with_session(vision.clone());
        assert!(engine.generate(&too_many).await.unwrap_err().is_validation());
        assert_eq!(native.count("generate"), 0);

        let ok = image.with_session(vision);
        assert!(engine.generate(&ok).await.is_ok());
        assert!(engine.session().unwrap().vision_enabled());
    }

    #[tokio::test]
    async fn streaming_delivers_in_order_then_cleans_up() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;
        let (callbacks, seen) = recording_callbacks();

        native.script(&[
            (EventChannel::PartialResult, "a"),
            (EventChannel::PartialResult, "b"),
            (EventChannel::FinalResult, "c"),
        ]);
        engine.generate_async(&RequestParams::new("go"), callbacks).await.unwrap();

        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(native.emitter.total_listeners(), 0);

        native.emitter.emit(EventChannel::PartialResult, "d");
        assert_eq!(*seen.lock().unwrap(), ["partial:a", "partial:b", "final:c"]);
    }

    #[tokio::test]
    async fn listeners_registered_without_callbacks() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;

        engine.generate_async(&RequestParams::new("go"), LlmCallbacks::new()).await.unwrap();
        assert_eq!(engine.state(), EngineState::Generating);
        assert_eq!(native.emitter.total_listeners(), 3);

        native.emitter.emit(EventChannel::FinalResult, "done");
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(native.emitter.total_listeners(), 0);
    }

    #[tokio::test]
    async fn stream_yields_ordered_results_and_ignores_late_events() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;
        let stream = engine.stream(&RequestParams::new("go")).await.unwrap();

        native.emitter.emit(EventChannel::PartialResult, "a");
        native.emitter.emit(EventChannel::PartialResult, "b");
        native.emitter.emit(EventChannel::FinalResult, "c");
        assert_eq!(native.emitter.total_listeners(), 0);
        native.emitter.emit(EventChannel::PartialResult, "d");

        let items: Vec<LlmResult> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(
            items,
            vec![LlmResult::partial("a"), LlmResult::partial("b"), LlmResult::final_text("c")]
        );
        assert_eq!(native.count("cancel"), 0);
    }

    #[tokio::test]
    async fn error_after_final_is_not_delivered() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;
        let (callbacks, seen) = recording_callbacks();
        engine.generate_async(&RequestParams::new("go"), callbacks).await.unwrap();

        native.emitter.emit(EventChannel::FinalResult, "done");
        native.emitter.emit(EventChannel::Error, "late");
        assert_eq!(*seen.lock().unwrap(), ["final:done"]);
    }

    #[tokio::test]
    async fn error_channel_becomes_generation_error() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;
        native.script(&[(EventChannel::Error, "native exploded")]);

        let err = engine
            .stream(&RequestParams::new("go"))
            .await
            .unwrap()
            .final_text()
            .await
            .unwrap_err();
        assert_eq!(err, Error::Generation("native exploded".into()));
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn panicking_callback_still_cleans_up() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;
        let callbacks = LlmCallbacks::new().on_final(|_| panic!("callback bug"));
        native.script(&[(EventChannel::FinalResult, "x")]);

        engine.generate_async(&RequestParams::new("go"), callbacks).await.unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(native.emitter.total_listeners(), 0);
    }

    #[tokio::test]
    async fn start_failure_keeps_ready_and_removes_listeners() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;
        native.fail_next("generate_async", NativeError::NotInitialized);

        let err = engine
            .generate_async(&RequestParams::new("go"), LlmCallbacks::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(native.emitter.total_listeners(), 0);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;
        engine.cancel_async();
        assert_eq!(native.count("cancel"), 0);

        engine.generate_async(&RequestParams::new("go"), LlmCallbacks::new()).await.unwrap();
        engine.cancel_async();
        engine.cancel_async();
        assert_eq!(native.count("cancel"), 1);
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(native.emitter.total_listeners(), 0);
    }

    #[tokio::test]
    async fn cancel_generate_spares_streaming_generation() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;
        assert!(engine.cancel_generate());
        assert_eq!(native.count("cancel"), 1);

        engine.generate_async(&RequestParams::new("go"), LlmCallbacks::new()).await.unwrap();
        assert!(!engine.cancel_generate());
        assert_eq!(native.count("cancel"), 1);
        assert_eq!(engine.state(), EngineState::Generating);
        assert_eq!(native.emitter.total_listeners(), 3);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_terminal() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;
        engine.generate_async(&RequestParams::new("go"), LlmCallbacks::new()).await.unwrap();

        engine.close();
        engine.close();
        assert_eq!(engine.state(), EngineState::Closed);
        assert_eq!(native.count("cancel"), 1);
        assert_eq!(native.count("close"), 1);
        assert_eq!(native.emitter.total_listeners(), 0);

        assert!(engine.generate(&RequestParams::new("hi")).await.unwrap_err().to_string().contains("closed"));
        let reinit = engine.init(EngineConfig::new("/models/test.task")).await.unwrap_err();
        assert!(matches!(reinit, Error::Initialization(_)));
        engine.cancel_async();
    }

    #[tokio::test]
    async fn new_generation_replaces_previous() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;

        let first = engine.stream(&RequestParams::new("one")).await.unwrap();
        let second = engine.stream(&RequestParams::new("two")).await.unwrap();
        assert_eq!(native.count("cancel"), 1);
        assert_eq!(native.emitter.total_listeners(), 3);

        assert!(first.final_text().await.is_err());
        // The replaced stream's cleanup must not touch the newer generation.
        assert_eq!(engine.state(), EngineState::Generating);

        native.emitter.emit(EventChannel::FinalResult, "second");
        assert_eq!(second.final_text().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn dropping_stream_cancels_generation() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;
        let stream = engine.stream(&RequestParams::new("go")).await.unwrap();
        assert_eq!(engine.state(), EngineState::Generating);

        drop(stream);
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(native.count("cancel"), 1);
        assert_eq!(native.emitter.total_listeners(), 0);
    }

    #[tokio::test]
    async fn new_session_failure_keeps_ready() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;
        native.fail_next("new_session", NativeError::Failed("bad params".into()));

        let err = engine.new_session(SessionParams::default()).await.unwrap_err();
        assert!(matches!(err, Error::Session(_)));
        assert_eq!(engine.state(), EngineState::Ready);

        engine
            .new_session(SessionParams {
                temperature: Some(0.2),
                ..SessionParams::default()
            })
            .await
            .unwrap();
        assert_eq!(engine.session().unwrap().temperature, Some(0.2));
    }

    #[tokio::test]
    async fn dropping_last_handle_releases_native() {
        let native = ScriptedNative::new();
        let engine = ready_engine(&native).await;
        let clone = engine.clone();
        drop(engine);
        assert_eq!(native.count("close"), 0);
        drop(clone);
        assert_eq!(native.count("close"), 1);
    }
}
