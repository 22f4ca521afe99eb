use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::Stream;

/// Body chunks as delivered by the transport.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Splits a chunked body into lines. Each yielded item is one line with its
/// `\n` (or `\r\n`) removed; a chunk may end mid-line.
pub struct LineSource {
    inner: ByteStream,
    buf: BytesMut,
    /// Bytes of `buf` already known to hold no `\n`.
    scanned: usize,
    flushed_tail: bool,
}

impl LineSource {
    pub fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            scanned: 0,
            flushed_tail: false,
        }
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::new(Box::pin(stream))
    }
}

impl std::fmt::Debug for LineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineSource")
            .field("buffered", &self.buf.len())
            .finish_non_exhaustive()
    }
}

impl Stream for LineSource {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let from = self.scanned;
            if let Some(pos) = self.buf[from..].iter().position(|b| *b == b'\n') {
                let idx = from + pos;
                self.scanned = 0;
                let mut line = self.buf.split_to(idx + 1);
                line.truncate(idx);
                if line.last() == Some(&b'\r') {
                    line.truncate(idx - 1);
                }
                return Poll::Ready(Some(Ok(line.freeze())));
            }

            self.scanned = self.buf.len();

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buf.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    if !self.flushed_tail && !self.buf.is_empty() {
                        self.flushed_tail = true;
                        self.scanned = 0;
                        let line = self.buf.split().freeze();
                        return Poll::Ready(Some(Ok(line)));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
