//! Consumer side of the stream engine.
//!
//! A [`StreamHandle`] owns the chunk channel and the cancellation token for
//! one streaming run. The caller must either drain [`StreamHandle::recv`] to
//! the terminal chunk or call [`StreamHandle::cancel`]; [`StreamHandle::wait`]
//! drains on the caller's behalf and returns the aggregated result.

mod producer;
mod reader;

pub use producer::ChunkSender;
pub use reader::StreamReader;

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::agent::result::RunResult;
use crate::chunk::StreamChunk;
use crate::error::AgentError;

/// Final value types a stream can resolve to.
pub trait StreamOutcome: Clone + Send + 'static {
    /// Build the failure value used when the worker vanished without
    /// reporting.
    fn from_stream_error(err: AgentError) -> Self;
}

impl StreamOutcome for RunResult {
    fn from_stream_error(err: AgentError) -> Self {
        Self::failure(err, std::time::Duration::ZERO)
    }
}

/// Handle to a live stream resolving to a result of type `R`.
#[derive(Debug)]
pub struct StreamHandle<R> {
    rx: mpsc::Receiver<StreamChunk>,
    cancel: CancellationToken,
    result_rx: Option<oneshot::Receiver<R>>,
    result: Option<R>,
    metadata: HashMap<String, Value>,
}

/// Stream of a single agent run.
pub type AgentStream = StreamHandle<RunResult>;

impl<R: StreamOutcome> StreamHandle<R> {
    pub(crate) fn new(
        rx: mpsc::Receiver<StreamChunk>,
        cancel: CancellationToken,
        result_rx: oneshot::Receiver<R>,
        metadata: HashMap<String, Value>,
    ) -> Self {
        Self {
            rx,
            cancel,
            result_rx: Some(result_rx),
            result: None,
            metadata,
        }
    }

    /// Receive the next chunk; `None` after the channel closes.
    pub async fn recv(&mut self) -> Option<StreamChunk> {
        self.rx.recv().await
    }

    /// Request cancellation. Idempotent: repeated calls are no-ops.
    ///
    /// The producer emits a single `Error { CANCELLED }` terminal (unless a
    /// terminal was already written) and closes the channel.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stream metadata (`agent_name`, `trace_id`, ...).
    #[must_use]
    pub const fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// Block until the terminal chunk and return the aggregated result.
    ///
    /// Drains (and discards) any unread chunks so the producer always makes
    /// progress; repeated calls return the same outcome.
    pub async fn wait(&mut self) -> R {
        if let Some(result) = &self.result {
            return result.clone();
        }
        while self.rx.recv().await.is_some() {}
        let result = match self.result_rx.take() {
            Some(rx) => rx.await.unwrap_or_else(|_| {
                R::from_stream_error(AgentError::internal("stream worker terminated abruptly"))
            }),
            None => R::from_stream_error(AgentError::internal("stream result already consumed")),
        };
        self.result = Some(result.clone());
        result
    }

    /// Convert into a byte reader over the concatenated `Delta`/`Content`
    /// payloads. Errors surface as read errors; the terminal chunk ends the
    /// byte stream.
    #[must_use]
    pub fn into_reader(self) -> StreamReader {
        StreamReader::new(self.rx)
    }
}

impl<R: Unpin> Stream for StreamHandle<R> {
    type Item = StreamChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
