//! Operation lifecycle: one opening `progress` event, any number of updates,
//! exactly one terminal event, then the stream closes.

use bytes::Bytes;
use editstream_proto::{
    encode, EditResult, ErrorInfo, IterationInfo, ProgressEvent, ProgressStep, WireEvent,
};
use futures::stream::Stream;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Response body of one operation: already-encoded frames, in order.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes, Infallible>> + Send>>;

/// Sending half shared by the lifecycle and every emitter clone. Taking the
/// sender out closes the stream for all of them at once.
struct Channel {
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    last_step: Mutex<ProgressStep>,
}

impl Channel {
    fn send(&self, event: &WireEvent) -> bool {
        let frame = match encode(event) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Dropping unencodable {} event: {}", event.kind().as_str(), e);
                return false;
            }
        };

        let mut guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };

        if tx.send(Bytes::from(frame)).is_err() {
            debug!("Downstream gone, closing operation channel");
            *guard = None;
            return false;
        }

        if let WireEvent::Progress(progress) = event {
            *self.last_step.lock() = progress.step;
        }
        true
    }

    fn close(&self) {
        self.tx.lock().take();
    }

    fn is_closed(&self) -> bool {
        self.tx.lock().as_ref().map_or(true, |tx| tx.is_closed())
    }
}

/// Handle given to the work so it can report partial progress.
///
/// Cloneable and cheap. Once the operation has reached its terminal event or
/// the client has disconnected, every call is a no-op.
#[derive(Clone)]
pub struct ProgressEmitter {
    channel: Arc<Channel>,
}

impl ProgressEmitter {
    /// Enqueue one `progress` frame. Returns false if nobody will read it.
    pub fn emit(&self, event: ProgressEvent) -> bool {
        self.channel.send(&WireEvent::Progress(event))
    }

    /// Callback-style update. A missing `step` repeats the previous one.
    pub fn update(
        &self,
        message: impl Into<String>,
        step: Option<ProgressStep>,
        thinking_text_delta: Option<String>,
        iteration: Option<IterationInfo>,
        iteration_image: Option<String>,
    ) -> bool {
        let step = step.unwrap_or_else(|| *self.channel.last_step.lock());
        let mut event = ProgressEvent::new(step, message);
        event.thinking_text_delta = thinking_text_delta;
        event.iteration = iteration;
        event.iteration_image = iteration_image;
        self.emit(event)
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}

/// Owner of one operation's stream. The terminal methods consume it, so a
/// second terminal event cannot be written.
pub struct OperationLifecycle {
    channel: Arc<Channel>,
    rx: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl OperationLifecycle {
    /// Open the stream and write the mandatory first event. `newLogEntry` is
    /// forced so the first log row always exists.
    pub fn open(first: ProgressEvent) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let lifecycle = Self {
            channel: Arc::new(Channel {
                tx: Mutex::new(Some(tx)),
                last_step: Mutex::new(first.step),
            }),
            rx: Some(rx),
        };
        lifecycle.channel.send(&WireEvent::Progress(first.new_log_entry()));
        lifecycle
    }

    /// A stream holding a single `error` frame, for failures detected before
    /// any work started (e.g. the upstream refused the request).
    pub fn rejected(error: ErrorInfo) -> FrameStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Channel {
            tx: Mutex::new(Some(tx)),
            last_step: Mutex::new(ProgressStep::Error),
        };
        channel.send(&WireEvent::Error(error));
        channel.close();
        frames_from(rx)
    }

    pub fn emitter(&self) -> ProgressEmitter {
        ProgressEmitter {
            channel: self.channel.clone(),
        }
    }

    /// Take the receiving half. Only the first call returns `Some`.
    pub fn take_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.rx.take()
    }

    /// Success: a display-oriented `progress` event with step `complete`,
    /// then the `complete` payload for programmatic resolution.
    pub fn complete(self, message: impl Into<String>, max_iterations: u32, result: EditResult) {
        let summary = ProgressEvent::new(ProgressStep::Complete, message)
            .iteration(IterationInfo::new(result.iterations, max_iterations))
            .iteration_image(result.image_data.clone());
        self.channel.send(&WireEvent::Progress(summary));
        self.channel.send(&WireEvent::Complete(result));
        self.channel.close();
    }

    pub fn fail(self, error: ErrorInfo) {
        self.channel.send(&WireEvent::Error(error));
        self.channel.close();
    }
}

/// Adapt the receiving half into a response body.
pub fn frames_from(mut rx: mpsc::UnboundedReceiver<Bytes>) -> FrameStream {
    Box::pin(async_stream::stream! {
        while let Some(frame) = rx.recv().await {
            yield Ok(frame);
        }
    })
}
