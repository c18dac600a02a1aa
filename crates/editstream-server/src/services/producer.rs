use editstream_proto::{EditResult, ErrorInfo, ProgressEvent};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::AbortHandle;
use tracing::{error, info};

use super::lifecycle::{FrameStream, OperationLifecycle, ProgressEmitter};

// A panicking operation is turned into an `error` event by `catch_unwind`,
// which only runs when panics unwind.
#[cfg(panic = "abort")]
compile_error!("editstream-server must be built with panic = \"unwind\"");

/// Aborts the operation task when the response body is dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// What the lifecycle needs to close out a successful run.
#[derive(Debug, Clone)]
pub struct Completion {
    pub message: String,
    pub max_iterations: u32,
}

/// Runs an operation in this process and streams its progress in the same
/// wire format a relayed upstream would produce.
pub struct LocalStreamProducer;

impl LocalStreamProducer {
    /// Spawn `operation` with an emitter and return the response body.
    ///
    /// Whatever the operation does (returns, fails or panics) the stream ends
    /// with exactly one terminal frame. Dropping the returned stream cancels
    /// the operation.
    pub fn spawn<F, Fut, E>(first: ProgressEvent, completion: Completion, operation: F) -> FrameStream
    where
        F: FnOnce(ProgressEmitter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<EditResult, E>> + Send + 'static,
        E: Into<ErrorInfo> + std::fmt::Display + Send + 'static,
    {
        let mut lifecycle = OperationLifecycle::open(first);
        let rx = lifecycle.take_receiver();
        let emitter = lifecycle.emitter();

        let task = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(operation(emitter)).catch_unwind().await;

            match outcome {
                Ok(Ok(result)) => {
                    info!("Operation completed after {} iteration(s)", result.iterations);
                    lifecycle.complete(completion.message, completion.max_iterations, result);
                }
                Ok(Err(e)) => {
                    error!("Operation failed: {}", e);
                    lifecycle.fail(e.into());
                }
                Err(panic) => {
                    let details = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic payload".to_string());
                    error!("Operation panicked: {}", details);
                    lifecycle.fail(ErrorInfo::with_details("Operation aborted unexpectedly", details));
                }
            }
        });

        let guard = AbortOnDrop(task.abort_handle());
        let Some(mut rx) = rx else {
            return OperationLifecycle::rejected(ErrorInfo::new("Operation stream unavailable"));
        };

        Box::pin(async_stream::stream! {
            let _guard = guard;
            while let Some(frame) = rx.recv().await {
                yield Ok(frame);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use editstream_proto::{decode, IterationInfo, ProgressStep, WireEvent};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct TestError(String);

    impl From<TestError> for ErrorInfo {
        fn from(e: TestError) -> Self {
            ErrorInfo::with_details(e.0, "test details")
        }
    }

    fn completion() -> Completion {
        Completion {
            message: "Edit completed successfully!".into(),
            max_iterations: 3,
        }
    }

    async fn collect_events(stream: FrameStream) -> Vec<WireEvent> {
        stream
            .map(|frame| decode(std::str::from_utf8(&frame.unwrap()).unwrap()).unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_success_sequence() {
        let stream = LocalStreamProducer::spawn(
            ProgressEvent::new(ProgressStep::Planning, "Sending planning request to AI..."),
            completion(),
            |emit| async move {
                emit.update("Generating", Some(ProgressStep::CallingApi), None, Some(IterationInfo::new(1, 3)), None);
                Ok::<_, TestError>(EditResult {
                    image_data: "data:image/png;base64,AA".into(),
                    iterations: 1,
                    final_prompt: "a hat".into(),
                })
            },
        );

        let events = collect_events(stream).await;
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], WireEvent::Progress(p) if p.starts_log_entry()));
        assert!(matches!(&events[2], WireEvent::Progress(p) if p.step == ProgressStep::Complete));
        assert!(matches!(&events[3], WireEvent::Complete(r) if r.final_prompt == "a hat"));
    }

    #[tokio::test]
    async fn test_failure_becomes_error_event() {
        let stream = LocalStreamProducer::spawn(
            ProgressEvent::new(ProgressStep::Planning, "start"),
            completion(),
            |_emit| async move { Err::<EditResult, _>(TestError("generation failed".into())) },
        );

        let events = collect_events(stream).await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            WireEvent::Error(ErrorInfo::with_details("generation failed", "test details"))
        );
    }

    #[tokio::test]
    async fn test_panic_becomes_error_event() {
        let stream = LocalStreamProducer::spawn(
            ProgressEvent::new(ProgressStep::Planning, "start"),
            completion(),
            |_emit| async move {
                if true {
                    panic!("editor exploded");
                }
                Ok::<EditResult, TestError>(EditResult {
                    image_data: String::new(),
                    iterations: 0,
                    final_prompt: String::new(),
                })
            },
        );

        let events = collect_events(stream).await;
        match events.last() {
            Some(WireEvent::Error(error)) => {
                assert_eq!(error.details.as_deref(), Some("editor exploded"));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panic_leaves_other_operations_running() {
        let crashing = LocalStreamProducer::spawn(
            ProgressEvent::new(ProgressStep::Planning, "start"),
            completion(),
            |_emit| async move {
                if true {
                    panic!("editor exploded");
                }
                Err::<EditResult, _>(TestError("unreachable".into()))
            },
        );
        let steady = LocalStreamProducer::spawn(
            ProgressEvent::new(ProgressStep::Planning, "start"),
            completion(),
            |_emit| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, TestError>(EditResult {
                    image_data: "data:image/png;base64,AA".into(),
                    iterations: 1,
                    final_prompt: "a hat".into(),
                })
            },
        );

        let (crashed, finished) = tokio::join!(collect_events(crashing), collect_events(steady));
        assert!(matches!(crashed.last(), Some(WireEvent::Error(e)) if e.message == "Operation aborted unexpectedly"));
        assert!(matches!(finished.last(), Some(WireEvent::Complete(r)) if r.final_prompt == "a hat"));
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_operation() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let mut stream = LocalStreamProducer::spawn(
            ProgressEvent::new(ProgressStep::Planning, "start"),
            completion(),
            move |_emit| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                flag.store(true, Ordering::SeqCst);
                Err::<EditResult, _>(TestError("unreachable".into()))
            },
        );

        // read the opening frame, then hang up
        assert!(stream.next().await.is_some());
        drop(stream);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
