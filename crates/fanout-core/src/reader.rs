//! Pull-style byte source over a subscriber queue
//!
//! The broadcaster pushes whole frames into a bounded queue; HTTP bodies pull
//! bytes. [`ChunkReader`] bridges the two. Frame boundaries are not exposed:
//! a frame larger than the caller's buffer is handed out over several reads.

use bytes::{Buf, Bytes};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

use crate::frame::Frame;

/// Reads the bytes of queued frames in FIFO order.
///
/// A read returns 0 bytes (end of stream) once the queue is closed and every
/// queued frame has been consumed. Single reader only.
#[derive(Debug)]
pub struct ChunkReader {
    queue: mpsc::Receiver<Frame>,
    current: Bytes,
}

impl ChunkReader {
    pub fn new(queue: mpsc::Receiver<Frame>) -> Self {
        Self {
            queue,
            current: Bytes::new(),
        }
    }

    /// Bytes of the current frame not yet handed out
    pub fn pending(&self) -> usize {
        self.current.len()
    }
}

impl AsyncRead for ChunkReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        while this.current.is_empty() {
            match ready!(this.queue.poll_recv(cx)) {
                Some(frame) => this.current = frame.into_bytes(),
                None => return Poll::Ready(Ok(())),
            }
        }

        let n = buf.remaining().min(this.current.len());
        buf.put_slice(&this.current[..n]);
        this.current.advance(n);

        Poll::Ready(Ok(()))
    }
}
