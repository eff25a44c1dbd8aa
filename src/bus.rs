//! Per-room broadcast bus.
//!
//! A published event reaches every sink currently subscribed to the room,
//! FIFO per publisher. Each sink is a bounded mpsc queue drained by its
//! session's event loop; publishing uses `try_send`, so a slow consumer
//! can never block a publisher. When a sink's queue is full its
//! subscription is dropped, which closes the receiver and lets the owning
//! session terminate through its normal cleanup path.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Queue depth per sink. Deep enough for a commit burst, small enough to
/// bound memory when a consumer wedges.
const SINK_QUEUE_DEPTH: usize = 64;

/// An event fanned out to a room.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A session was admitted. Receivers skip their own id.
    UserJoined {
        client_id: String,
        nickname: String,
        color: String,
    },
    /// A session ended. Receivers skip their own id.
    UserLeft { client_id: String },
    /// Block ownership changed; `owner` is `None` on release.
    LockUpdate {
        block_id: String,
        owner: Option<String>,
    },
    /// A commit was applied to a block.
    CommitApply {
        block_id: String,
        events: Vec<Value>,
        by: String,
        workspace_xml: Option<String>,
    },
}

/// Identifies one subscription on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// The fan-out bus. One per process; rooms materialize on first subscribe
/// and vanish when their last sink leaves.
#[derive(Default)]
pub struct Bus {
    rooms: DashMap<String, HashMap<SinkId, mpsc::Sender<Arc<Event>>>>,
    next_sink: AtomicU64,
}

impl Bus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a new sink to a room.
    pub fn subscribe(&self, room_id: &str) -> (SinkId, mpsc::Receiver<Arc<Event>>) {
        let (tx, rx) = mpsc::channel(SINK_QUEUE_DEPTH);
        let id = SinkId(self.next_sink.fetch_add(1, Ordering::Relaxed));
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(id, tx);
        (id, rx)
    }

    /// Drop a subscription. Safe to call for an already-removed sink.
    pub fn unsubscribe(&self, room_id: &str, id: SinkId) {
        if let Some(mut sinks) = self.rooms.get_mut(room_id) {
            sinks.remove(&id);
            if sinks.is_empty() {
                drop(sinks);
                self.rooms.remove_if(room_id, |_, sinks| sinks.is_empty());
            }
        }
    }

    /// Deliver an event to every sink in the room. Sinks whose queue is
    /// full or whose receiver is gone are unsubscribed on the spot.
    pub fn publish(&self, room_id: &str, event: Event) {
        let Some(mut sinks) = self.rooms.get_mut(room_id) else {
            return;
        };
        let event = Arc::new(event);

        let mut dead = Vec::new();
        for (id, tx) in sinks.iter() {
            match tx.try_send(Arc::clone(&event)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(room = %room_id, sink = ?id, "Sink queue overflow - dropping subscriber");
                    crate::metrics::SLOW_SINKS_DROPPED.inc();
                    dead.push(*id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            sinks.remove(&id);
        }
        crate::metrics::EVENTS_PUBLISHED.inc();
    }

    /// Number of sinks currently subscribed to a room.
    #[cfg(test)]
    pub fn sink_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |sinks| sinks.len())
    }
}
