//! Byte-reader adapter over a chunk stream.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

use crate::chunk::{ChunkKind, StreamChunk};
use crate::error::AgentError;

enum ReaderState {
    Open,
    Eof,
    Failed(AgentError),
}

pin_project_lite::pin_project! {
    /// [`AsyncRead`] over the concatenated `Delta` and `Content` payloads of
    /// a stream. Non-textual chunks are skipped, `Thought` text is excluded,
    /// the `Done` terminal is EOF, and an `Error` terminal surfaces as an
    /// [`io::Error`].
    pub struct StreamReader {
        rx: mpsc::Receiver<StreamChunk>,
        buffer: Bytes,
        state: ReaderState,
    }
}

impl std::fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl StreamReader {
    pub(crate) fn new(rx: mpsc::Receiver<StreamChunk>) -> Self {
        Self {
            rx,
            buffer: Bytes::new(),
            state: ReaderState::Open,
        }
    }
}

impl AsyncRead for StreamReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        loop {
            if !this.buffer.is_empty() {
                let n = this.buffer.len().min(buf.remaining());
                buf.put_slice(&this.buffer.split_to(n));
                return Poll::Ready(Ok(()));
            }

            match this.state {
                ReaderState::Eof => return Poll::Ready(Ok(())),
                ReaderState::Failed(err) => {
                    return Poll::Ready(Err(io::Error::other(err.clone())));
                }
                ReaderState::Open => {}
            }

            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => match chunk.kind {
                    ChunkKind::Delta(text) | ChunkKind::Content(text) => {
                        *this.buffer = Bytes::from(text.into_bytes());
                    }
                    ChunkKind::Error(err) => {
                        *this.state = ReaderState::Failed(err.clone());
                        return Poll::Ready(Err(io::Error::other(err)));
                    }
                    ChunkKind::Done => {
                        *this.state = ReaderState::Eof;
                        return Poll::Ready(Ok(()));
                    }
                    _ => {}
                },
                Poll::Ready(None) => {
                    *this.state = ReaderState::Eof;
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
