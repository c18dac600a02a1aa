use bytes::{Bytes, BytesMut};

/// Accumulates bytes from a stream of arbitrary chunks and hands out whole
/// frames.
///
/// A frame ends at a blank line: `\n\n`, or `\r\n\r\n` from producers that
/// use CRLF. Splitting happens on raw bytes, so a multi-byte UTF-8 sequence
/// cut in half by the network is never decoded early. Frames are returned
/// verbatim, delimiter included.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
    /// Bytes already checked for a delimiter.
    scanned: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_capacity(8 * 1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            scanned: 0,
        }
    }

    /// Append a chunk and drain every frame it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    /// Pop the next complete frame, if the buffer holds one.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        match find_frame_end(&self.buf, self.scanned) {
            Some(end) => {
                self.scanned = 0;
                Some(self.buf.split_to(end).freeze())
            }
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }

    /// Take whatever is left once the stream has ended, delimiter or not.
    pub fn finish(&mut self) -> Option<Bytes> {
        self.scanned = 0;
        if self.buf.is_empty() {
            return None;
        }
        Some(self.buf.split().freeze())
    }

    /// Bytes held back waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Index one past the newline that closes the first blank line at or after `from`.
fn find_frame_end(buf: &[u8], from: usize) -> Option<usize> {
    // a delimiter needs at least one byte of look-back
    let start = from.max(1);
    (start..buf.len())
        .find(|&i| {
            buf[i] == b'\n'
                && (buf[i - 1] == b'\n' || (i >= 2 && buf[i - 1] == b'\r' && buf[i - 2] == b'\n'))
        })
        .map(|i| i + 1)
}
