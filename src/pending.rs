use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::registry::ConnectionEntry;
use crate::ws::frame::Frame;

/// Bounded capacity of one response sink. The proxy handler drains promptly;
/// a full sink means a stalled consumer and the frame is dropped rather than
/// blocking the channel's read loop.
pub const SINK_CAPACITY: usize = 10;

/// Table of in-flight proxy requests: request id → response sink. The read
/// loops are the producers, the proxy handlers the consumers.
#[derive(Clone, Default)]
pub struct PendingRequests {
    inner: Arc<DashMap<String, mpsc::Sender<Frame>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a sink for a request id. The returned guard
    /// deregisters on drop, so every exit path of the handler cleans up.
    pub fn register(&self, request_id: String) -> PendingRequest {
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        self.inner.insert(request_id.clone(), tx);
        PendingRequest {
            request_id,
            rx,
            table: self.inner.clone(),
            entry: None,
        }
    }

    /// Route a correlated response frame to its sink, without blocking. Frames
    /// for unknown ids (request already finished or timed out) and frames that
    /// would overflow the sink are dropped.
    pub fn dispatch(&self, frame: Frame) {
        let Some(tx) = self.inner.get(&frame.id) else {
            tracing::debug!(
                request_id = %frame.id,
                kind = %frame.kind,
                "frame for unknown or completed request, dropping"
            );
            return;
        };
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                tracing::warn!(
                    request_id = %frame.id,
                    kind = %frame.kind,
                    "response sink full, dropping frame"
                );
            }
            Err(TrySendError::Closed(frame)) => {
                tracing::debug!(
                    request_id = %frame.id,
                    kind = %frame.kind,
                    "response sink closed, dropping frame"
                );
            }
        }
    }

    /// Drop the sender for a request, closing the sink. The waiting handler
    /// observes this as channel closure. No-op for unknown ids.
    pub fn close(&self, request_id: &str) {
        self.inner.remove(request_id);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Receiving side of one registered response sink. Dropping it removes the
/// table entry and untracks the request from its channel entry.
pub struct PendingRequest {
    request_id: String,
    rx: mpsc::Receiver<Frame>,
    table: Arc<DashMap<String, mpsc::Sender<Frame>>>,
    entry: Option<Arc<ConnectionEntry>>,
}

impl PendingRequest {
    pub fn id(&self) -> &str {
        &self.request_id
    }

    /// Associate the request with the channel entry it was dispatched on, so
    /// the entry's read loop can close this sink if the channel dies.
    pub fn attach_entry(&mut self, entry: Arc<ConnectionEntry>) {
        entry.track_request(&self.request_id);
        self.entry = Some(entry);
    }

    /// Next correlated frame, or `None` once the sink is closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.table.remove(&self.request_id);
        if let Some(entry) = &self.entry {
            entry.untrack_request(&self.request_id);
        }
    }
}
