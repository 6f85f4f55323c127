//! Event bridge: turns the three callback channels of one generation into a
//! single cancellable [`Stream`] of [`LlmResult`]s.
//!
//! The sending half lives only inside the callback closures. A terminal event
//! takes it, so later events are dropped and the stream ends after the
//! terminal item. If the callbacks are discarded without a terminal event
//! (a generation replaced by a newer one), the sender drops with them and the
//! stream ends as well.
//!
//! The cancel action runs at most once: on the terminal event, on
//! [`GenerationStream::unsubscribe`], or when the stream is dropped, whichever
//! comes first.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use amaryllis_core::error::{Error, Result};
use amaryllis_core::event::{LlmCallbacks, LlmResult};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

type Canceller = Box<dyn FnOnce() + Send>;
type Sender = mpsc::UnboundedSender<Result<LlmResult>>;

/// Runs the cancel action exactly once across every holder.
#[derive(Clone)]
struct CancelOnce(Arc<Mutex<Option<Canceller>>>);

impl CancelOnce {
    fn new(cancel: Canceller) -> Self {
        Self(Arc::new(Mutex::new(Some(cancel))))
    }

    fn fire(&self) {
        let cancel = self.0.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    fn fired(&self) -> bool {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

/// One generation's callbacks paired with the stream they feed.
pub struct EventBridge {
    callbacks: LlmCallbacks,
    stream: GenerationStream,
}

impl EventBridge {
    /// `cancel` runs once when the stream is abandoned or the generation ends.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let once = CancelOnce::new(Box::new(cancel));
        let sender: Arc<Mutex<Option<Sender>>> = Arc::new(Mutex::new(Some(tx)));

        let partial_tx = Arc::clone(&sender);
        let final_tx = Arc::clone(&sender);
        let final_once = once.clone();
        let error_once = once.clone();

        let callbacks = LlmCallbacks::new()
            .on_partial(move |text| {
                let guard = partial_tx.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(tx) = guard.as_ref() {
                    let _ = tx.send(Ok(LlmResult::partial(text)));
                }
            })
            .on_final(move |text| {
                deliver_terminal(&final_tx, &final_once, Ok(LlmResult::final_text(text)));
            })
            .on_error(move |error: Error| {
                deliver_terminal(&sender, &error_once, Err(error));
            });

        Self {
            callbacks,
            stream: GenerationStream {
                inner: UnboundedReceiverStream::new(rx),
                cancel: once,
            },
        }
    }

    /// Callbacks to hand to `generate_async`.
    pub fn callbacks(&self) -> LlmCallbacks {
        self.callbacks.clone()
    }

    pub fn into_parts(self) -> (LlmCallbacks, GenerationStream) {
        (self.callbacks, self.stream)
    }
}

fn deliver_terminal(sender: &Mutex<Option<Sender>>, once: &CancelOnce, item: Result<LlmResult>) {
    let taken = sender.lock().unwrap_or_else(|e| e.into_inner()).take();
    let Some(tx) = taken else {
        return;
    };
    let _ = tx.send(item);
    drop(tx);
    once.fire();
}

/// The consumable side of an [`EventBridge`].
///
/// Yields partial results, then exactly one final result or error, then ends.
pub struct GenerationStream {
    inner: UnboundedReceiverStream<Result<LlmResult>>,
    cancel: CancelOnce,
}

impl GenerationStream {
    /// Stop receiving and cancel the generation. Buffered items are discarded.
    pub fn unsubscribe(&mut self) {
        self.inner.close();
        self.cancel.fire();
    }

    /// Whether the cancel action has already run.
    pub fn is_finished(&self) -> bool {
        self.cancel.fired()
    }

    /// A handle that runs this stream's cancel action from elsewhere.
    pub fn canceller(&self) -> StreamCanceller {
        StreamCanceller(self.cancel.clone())
    }

    /// Drain the stream and return the final text, or the first error.
    pub async fn final_text(mut self) -> Result<String> {
        use futures::StreamExt;

        let mut last = String::new();
        while let Some(item) = self.next().await {
            let result = item?;
            if result.is_final {
                return Ok(result.text);
            }
            last = result.text;
        }
        Err(Error::Generation(format!(
            "generation ended without a final result (last partial: {last:?})"
        )))
    }
}

/// Cancels the generation behind one [`GenerationStream`] and nothing else.
/// Shares the stream's once-guard, so the action still runs at most once.
#[derive(Clone)]
pub struct StreamCanceller(CancelOnce);

impl StreamCanceller {
    pub fn cancel(&self) {
        self.0.fire();
    }
}

impl Stream for GenerationStream {
    type Item = Result<LlmResult>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for GenerationStream {
    fn drop(&mut self) {
        self.cancel.fire();
    }
}
