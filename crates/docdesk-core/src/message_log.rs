//! In-memory message log and its dedup sync to the durable store.
//!
//! The log is owned by exactly one view. Sync never borrows it: callers hand
//! [`sync_window`] a snapshot of the trailing messages, which is what lets a
//! sync run as a detached task while the view keeps appending.

use uuid::Uuid;

use crate::error::Result;
use crate::models::{Message, MessageRole, Thread};
use crate::store::ChatStore;

/// Ordered, append-only list of messages for one session or conversation.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Append immediately; the sender sees their message with no round trip.
    pub fn append(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    /// Append a message received from another writer unless an equivalent
    /// (thread, role, content) entry is already present. Matches the store's
    /// dedup for session threads; conversation rows are never deduplicated.
    pub fn merge_remote(&mut self, msg: Message) -> bool {
        if self.messages.iter().any(|existing| existing.same_content(&msg)) {
            return false;
        }
        self.messages.push(msg);
        true
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Owned copy of the last `k` messages, oldest first.
    pub fn tail(&self, k: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(k);
        self.messages[start..].to_vec()
    }

    /// Move every entry onto `thread`, used once a lazily created session
    /// gets its id.
    pub fn assign_thread(&mut self, thread: &Thread) {
        for msg in &mut self.messages {
            msg.thread = thread.clone();
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub inserted: usize,
    pub skipped: usize,
}

/// Reconcile a window of trailing messages with the durable store.
///
/// Each message is inserted only if no row with the same (session, role,
/// content) exists, because the local id never matches the stored id. Two
/// identical user messages in one session therefore persist once.
///
/// When anything was written the session's message count advances, and with
/// `soft_close` a window ending on an assistant reply stamps the session
/// ended and resolved.
pub async fn sync_window(
    store: &ChatStore,
    session_id: Uuid,
    window: &[Message],
    origin: &str,
    soft_close: bool,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    for msg in window {
        if store.insert_session_message(session_id, msg, origin).await? {
            report.inserted += 1;
        } else {
            report.skipped += 1;
        }
    }

    let completes_turn = window
        .last()
        .is_some_and(|msg| msg.role == MessageRole::Assistant);
    if report.inserted > 0 {
        let added = i64::try_from(report.inserted).unwrap_or(i64::MAX);
        store
            .record_turn(session_id, added, soft_close && completes_turn)
            .await?;
    }

    tracing::debug!(
        session = %session_id,
        inserted = report.inserted,
        skipped = report.skipped,
        "synced message window"
    );
    Ok(report)
}

/// Fire-and-forget wrapper: failures are logged and the local log stays
/// authoritative.
pub async fn sync_detached(
    store: ChatStore,
    session_id: Uuid,
    window: Vec<Message>,
    origin: String,
    soft_close: bool,
) {
    if let Err(err) = sync_window(&store, session_id, &window, &origin, soft_close).await {
        tracing::warn!(session = %session_id, error = %err, "message sync dropped");
    }
}
