//! One-shot and streaming inference over an [`LlmEngine`], with optional
//! context augmentation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use amaryllis_core::context::{ContextEngine, ContextQuery};
use amaryllis_core::engine::RequestParams;
use amaryllis_core::error::{Error, Result};
use amaryllis_engine::{GenerationStream, LlmEngine, StreamCanceller};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::augment::augment_request;
use crate::props::InferenceProps;

fn timeout_error(limit: Duration) -> Error {
    Error::Generation(format!("generation timed out after {}ms", limit.as_millis()))
}

/// Wiring shared by both hook shapes.
#[derive(Clone)]
struct HookSetup {
    engine: LlmEngine,
    context: Option<Arc<dyn ContextEngine>>,
    query: Option<ContextQuery>,
    timeout: Option<Duration>,
    props: InferenceProps,
}

impl HookSetup {
    fn new(engine: LlmEngine) -> Self {
        Self {
            engine,
            context: None,
            query: None,
            timeout: None,
            props: InferenceProps::default(),
        }
    }

    async fn prepare(&self, request: RequestParams) -> Result<RequestParams> {
        augment_request(self.context.as_deref(), self.query.as_ref(), request).await
    }
}

macro_rules! hook_builders {
    ($ty:ident) => {
        impl $ty {
            pub fn new(engine: LlmEngine) -> Self {
                Self {
                    setup: HookSetup::new(engine),
                }
            }

            /// Search this context engine and rewrite every request with its results.
            pub fn with_context(mut self, context: Arc<dyn ContextEngine>) -> Self {
                self.setup.context = Some(context);
                self
            }

            /// Use this query instead of deriving one from the prompt.
            pub fn with_query(mut self, query: ContextQuery) -> Self {
                self.setup.query = Some(query);
                self
            }

            /// Cancel and fail when no terminal result arrives within `limit`.
            pub fn with_timeout(mut self, limit: Duration) -> Self {
                self.setup.timeout = Some(limit);
                self
            }

            pub fn with_props(mut self, props: InferenceProps) -> Self {
                self.setup.props = props;
                self
            }
        }
    };
}

/// One-shot inference: await the full text, report it once.
#[derive(Clone)]
pub struct Inference {
    setup: HookSetup,
}

hook_builders!(Inference);

impl Inference {
    /// Run `request` to completion. Reports exactly one `on_result(text, true)`
    /// or one `on_error`, then `on_complete`.
    pub async fn run(&self, request: RequestParams) -> Result<String> {
        let props = &self.setup.props;
        let result = self.execute(request).await;
        match &result {
            Ok(text) => props.result(text.clone(), true),
            Err(err) => props.error(err.clone()),
        }
        props.complete();
        result
    }

    async fn execute(&self, request: RequestParams) -> Result<String> {
        let request = self.setup.prepare(request).await?;
        self.setup.props.generate();

        let engine = &self.setup.engine;
        match self.setup.timeout {
            Some(limit) => match tokio::time::timeout(limit, engine.generate(&request)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_ms = limit.as_millis() as u64, "One-shot generation timed out");
                    engine.cancel_generate();
                    Err(timeout_error(limit))
                }
            },
            None => engine.generate(&request).await,
        }
    }
}

/// Streaming inference: partial results as they arrive, then one final
/// result or one error.
#[derive(Clone)]
pub struct InferenceAsync {
    setup: HookSetup,
}

hook_builders!(InferenceAsync);

impl InferenceAsync {
    /// Start streaming `request`. Fails without generating when context
    /// retrieval fails or the engine rejects the request; `on_error` and
    /// `on_complete` still fire in that case.
    pub async fn start(&self, request: RequestParams) -> Result<InferenceHandle> {
        let props = self.setup.props.clone();
        let stream = match self.open(request).await {
            Ok(stream) => stream,
            Err(err) => {
                props.error(err.clone());
                props.complete();
                return Err(err);
            }
        };

        let canceller = stream.canceller();
        let completed = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(drive(
            stream,
            props.clone(),
            self.setup.timeout,
            Arc::clone(&completed),
        ));
        Ok(InferenceHandle {
            canceller,
            task,
            completed,
            props,
        })
    }

    async fn open(&self, request: RequestParams) -> Result<GenerationStream> {
        let request = self.setup.prepare(request).await?;
        self.setup.props.generate();
        self.setup.engine.stream(&request).await
    }
}

fn complete_once(completed: &AtomicBool, props: &InferenceProps) {
    if !completed.swap(true, Ordering::SeqCst) {
        props.complete();
    }
}

async fn drive(
    mut stream: GenerationStream,
    props: InferenceProps,
    timeout: Option<Duration>,
    completed: Arc<AtomicBool>,
) {
    let deadline = timeout.map(|limit| (tokio::time::Instant::now() + limit, limit));
    loop {
        let next = match deadline {
            Some((at, limit)) => match tokio::time::timeout_at(at, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(timeout_ms = limit.as_millis() as u64, "Streaming generation timed out");
                    stream.unsubscribe();
                    props.error(timeout_error(limit));
                    break;
                }
            },
            None => stream.next().await,
        };
        match next {
            Some(Ok(result)) => {
                let is_final = result.is_final;
                props.result(result.text, is_final);
                if is_final {
                    break;
                }
            }
            Some(Err(err)) => {
                props.error(err);
                break;
            }
            None => {
                debug!("Generation stream ended without a terminal result");
                props.error(Error::Generation(
                    "generation was replaced or cancelled before a final result".into(),
                ));
                break;
            }
        }
    }
    complete_once(&completed, &props);
}

/// Teardown handle of a streaming call.
pub struct InferenceHandle {
    canceller: StreamCanceller,
    task: JoinHandle<()>,
    completed: Arc<AtomicBool>,
    props: InferenceProps,
}

impl InferenceHandle {
    /// Abandon this handle's generation and release its listeners. A newer
    /// generation on the same engine is left running. Fires `on_complete` if
    /// it has not fired yet. Safe to call repeatedly.
    pub fn cancel(&self) {
        self.task.abort();
        self.canceller.cancel();
        complete_once(&self.completed, &self.props);
    }

    pub fn is_finished(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Wait until the stream has been fully delivered.
    pub async fn join(self) {
        if let Err(err) = self.task.await
            && err.is_panic()
        {
            warn!("Inference stream task panicked");
        }
    }
}
