//! Producer side of the stream engine.
//!
//! A [`ChunkSender`] is handed to the worker running the handler (and,
//! through [`Capabilities`](crate::capabilities::Capabilities), to the
//! handler itself). It enforces the chunk protocol at the source:
//!
//! - at most one terminal chunk, emitted only through [`ChunkSender::finish`];
//! - `text_only` filtering of non-textual kinds;
//! - coalescing of small delta fragments against the flush interval, so a
//!   token-per-chunk producer does not flood the channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;

use crate::agent::config::StreamingConfig;
use crate::chunk::StreamChunk;
use crate::error::AgentError;

/// Pending coalesced delta text. `last_flush == None` means a flush is due
/// immediately (stream start).
struct Pending {
    buf: String,
    last_flush: Option<Instant>,
}

struct SenderState {
    text_only: bool,
    flush_interval: Duration,
    terminal_sent: AtomicBool,
    emitted_output: AtomicUsize,
    pending: Mutex<Pending>,
}

/// Producer handle writing chunks into a bounded stream channel.
#[derive(Clone)]
pub struct ChunkSender {
    tx: mpsc::Sender<StreamChunk>,
    state: Arc<SenderState>,
}

impl std::fmt::Debug for ChunkSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSender")
            .field("terminal_sent", &self.state.terminal_sent.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Coalesced deltas are force-flushed beyond this size regardless of the
/// flush interval.
const FLUSH_BYTES: usize = 1024;

impl ChunkSender {
    /// Create a sender/receiver pair from streaming configuration.
    pub(crate) fn channel(config: &StreamingConfig) -> (Self, mpsc::Receiver<StreamChunk>) {
        let (tx, rx) = mpsc::channel(config.buffer_size.max(1));
        let sender = Self {
            tx,
            state: Arc::new(SenderState {
                text_only: config.text_only,
                flush_interval: config.flush_interval,
                terminal_sent: AtomicBool::new(false),
                emitted_output: AtomicUsize::new(0),
                pending: Mutex::new(Pending {
                    buf: String::new(),
                    last_flush: None,
                }),
            }),
        };
        (sender, rx)
    }

    /// Push a non-terminal chunk. Terminal kinds are ignored here; the
    /// runtime emits them through [`ChunkSender::finish`].
    pub async fn send(&self, chunk: StreamChunk) {
        if chunk.is_terminal() || self.state.terminal_sent.load(Ordering::SeqCst) {
            return;
        }
        if self.state.text_only && !chunk.is_textual() {
            return;
        }

        if let Some(text) = chunk.as_delta() {
            self.state
                .emitted_output
                .fetch_add(text.len(), Ordering::SeqCst);
            if self.state.flush_interval.is_zero() {
                let _ = self.tx.send(chunk).await;
                return;
            }
            let flush = {
                let mut pending = self.state.pending.lock().await;
                pending.buf.push_str(text);
                let due = pending
                    .last_flush
                    .is_none_or(|t| t.elapsed() >= self.state.flush_interval)
                    || pending.buf.len() >= FLUSH_BYTES;
                due.then(|| {
                    pending.last_flush = Some(Instant::now());
                    std::mem::take(&mut pending.buf)
                })
            };
            if let Some(buf) = flush {
                let _ = self.tx.send(StreamChunk::delta(buf)).await;
            }
            return;
        }

        if let Some(text) = chunk.output_text() {
            self.state
                .emitted_output
                .fetch_add(text.len(), Ordering::SeqCst);
        }
        self.flush().await;
        let _ = self.tx.send(chunk).await;
    }

    /// Flush any coalesced delta text.
    pub async fn flush(&self) {
        let buf = {
            let mut pending = self.state.pending.lock().await;
            if pending.buf.is_empty() {
                return;
            }
            pending.last_flush = Some(Instant::now());
            std::mem::take(&mut pending.buf)
        };
        let _ = self.tx.send(StreamChunk::delta(buf)).await;
    }

    /// Emit the single terminal chunk: `Done` on `None`, `Error` otherwise.
    ///
    /// Idempotent; only the first call wins.
    pub async fn finish(&self, outcome: Option<AgentError>) {
        if self.state.terminal_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        // Flush directly: send() would see terminal_sent already set.
        let buf = {
            let mut pending = self.state.pending.lock().await;
            std::mem::take(&mut pending.buf)
        };
        if !buf.is_empty() {
            let _ = self.tx.send(StreamChunk::delta(buf)).await;
        }
        let terminal = match outcome {
            Some(err) => StreamChunk::error(err),
            None => StreamChunk::done(),
        };
        let _ = self.tx.send(terminal).await;
    }

    /// Whether the terminal chunk has been emitted.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.terminal_sent.load(Ordering::SeqCst)
    }

    /// Total bytes of output text (`Delta` + `Content`) emitted so far.
    #[must_use]
    pub(crate) fn emitted_output(&self) -> usize {
        self.state.emitted_output.load(Ordering::SeqCst)
    }
}
