use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::Mutex;

use crate::ws::frame::Frame;

/// One live agent channel: the write half of the socket behind a write lock,
/// plus metadata. The read half is owned exclusively by the channel's read
/// loop. Identity is the allocation itself (`Arc::ptr_eq`).
pub struct ConnectionEntry {
    user_id: String,
    /// The underlying socket is not safe for concurrent writes; every frame
    /// write goes through this lock, acquired per write.
    writer: Mutex<SplitSink<WebSocket, Message>>,
    /// Instant of the last observed inbound activity on this channel.
    last_active: StdMutex<DateTime<Utc>>,
    /// Request ids currently dispatched on this channel. When the read loop
    /// exits, their pending sinks are closed so waiting handlers don't hang
    /// until the request deadline.
    in_flight: StdMutex<HashSet<String>>,
}

impl ConnectionEntry {
    fn new(user_id: &str, writer: SplitSink<WebSocket, Message>) -> Self {
        ConnectionEntry {
            user_id: user_id.to_owned(),
            writer: Mutex::new(writer),
            last_active: StdMutex::new(Utc::now()),
            in_flight: StdMutex::new(HashSet::new()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Serialize a frame and write it to the channel under the write lock.
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), axum::Error> {
        let text = serde_json::to_string(frame).map_err(axum::Error::new)?;
        let mut writer = self.writer.lock().await;
        writer.send(Message::Text(text.into())).await
    }

    /// Record inbound activity on this channel.
    pub fn touch(&self) {
        if let Ok(mut last_active) = self.last_active.lock() {
            *last_active = Utc::now();
        }
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
            .lock()
            .map(|last_active| *last_active)
            .unwrap_or_else(|_| Utc::now())
    }

    pub fn track_request(&self, request_id: &str) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.insert(request_id.to_owned());
        }
    }

    pub fn untrack_request(&self, request_id: &str) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(request_id);
        }
    }

    /// Drain the in-flight set; called once by the read loop during cleanup.
    pub fn take_in_flight(&self) -> Vec<String> {
        self.in_flight
            .lock()
            .map(|mut in_flight| in_flight.drain().collect())
            .unwrap_or_default()
    }

    /// Close the write side of the channel.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.close().await;
    }
}

/// All entries for one user, in insertion order, plus the round-robin cursor.
#[derive(Default)]
pub struct UserPool {
    entries: Vec<Arc<ConnectionEntry>>,
    cursor: usize,
}

impl UserPool {
    /// Pick the entry under the cursor and advance it. Selection and cursor
    /// advance happen under the same pool lock.
    fn next_entry(&mut self) -> Option<Arc<ConnectionEntry>> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = self.cursor % self.entries.len();
        let entry = self.entries[idx].clone();
        self.cursor = (self.cursor + 1) % self.entries.len();
        Some(entry)
    }
}

/// Per-user pools of agent channels with round-robin selection. The sharded
/// map guards the pool structure; a pool's mutations (entry list and cursor)
/// happen under its shard lock, so unrelated users do not contend.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    users: Arc<DashMap<String, UserPool>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new agent channel for a user, creating the pool if absent.
    pub fn add(
        &self,
        user_id: &str,
        writer: SplitSink<WebSocket, Message>,
    ) -> Arc<ConnectionEntry> {
        let entry = Arc::new(ConnectionEntry::new(user_id, writer));
        let mut pool = self.users.entry(user_id.to_owned()).or_default();
        pool.entries.push(entry.clone());
        let connections = pool.entries.len();
        drop(pool);
        tracing::info!(
            user_id = %user_id,
            connections = connections,
            "agent channel registered"
        );
        entry
    }

    /// Remove an entry by identity. Order within a pool is not observable, so
    /// swap-remove is used. Idempotent: removing an absent entry is a no-op.
    /// Empty pools are deleted from the map.
    pub fn remove(&self, user_id: &str, entry: &Arc<ConnectionEntry>) {
        let (found, remaining) = {
            let Some(mut pool) = self.users.get_mut(user_id) else {
                return;
            };
            let found = match pool
                .entries
                .iter()
                .position(|candidate| Arc::ptr_eq(candidate, entry))
            {
                Some(idx) => {
                    pool.entries.swap_remove(idx);
                    true
                }
                None => false,
            };
            (found, pool.entries.len())
        };

        if remaining == 0 {
            self.users
                .remove_if(user_id, |_, pool| pool.entries.is_empty());
        }
        if found {
            tracing::info!(
                user_id = %user_id,
                connections = remaining,
                "agent channel removed"
            );
        }
    }

    /// Round-robin selection of an entry for a user. `None` when the user has
    /// no connected agent.
    pub fn select(&self, user_id: &str) -> Option<Arc<ConnectionEntry>> {
        self.users.get_mut(user_id)?.next_entry()
    }

    /// Number of live channels for a user.
    pub fn connection_count(&self, user_id: &str) -> usize {
        self.users
            .get(user_id)
            .map(|pool| pool.entries.len())
            .unwrap_or(0)
    }
}
