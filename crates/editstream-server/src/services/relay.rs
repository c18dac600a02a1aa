//! Frame relay: forwards an upstream event stream downstream without ever
//! splitting a frame.

use bytes::Bytes;
use editstream_proto::FrameBuffer;
use futures::stream::{Stream, StreamExt};
use std::fmt::Display;
use tracing::{debug, warn};

use super::lifecycle::FrameStream;

/// Re-chunk `upstream` on frame boundaries.
///
/// Frames go out verbatim and in order. When the upstream ends (cleanly or
/// with an error) any unterminated remainder is flushed as a last frame and
/// the stream ends without raising. Upstream is polled only when downstream
/// asks for more, so dropping the returned stream drops the upstream
/// connection with it.
pub fn relay_frames<S, E>(upstream: S) -> FrameStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut upstream = Box::pin(upstream);
        let mut buffer = FrameBuffer::new();
        let mut relayed = 0usize;

        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(chunk) => {
                    for frame in buffer.push(&chunk) {
                        relayed += 1;
                        yield Ok(frame);
                    }
                }
                Err(e) => {
                    warn!(
                        "Upstream stream aborted after {} frame(s) with {} byte(s) pending: {}",
                        relayed,
                        buffer.pending(),
                        e
                    );
                    break;
                }
            }
        }

        if let Some(rest) = buffer.finish() {
            debug!("Flushing {} unterminated byte(s) at end of upstream", rest.len());
            relayed += 1;
            yield Ok(rest);
        }

        debug!("Relay finished after {} frame(s)", relayed);
    })
}
