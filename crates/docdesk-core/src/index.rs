//! Conversation index for the agent inbox.
//!
//! One row per conversation key with its latest message, sorted newest
//! first. [`ConversationIndex::refresh`] refetches every conversation message
//! and regroups them from scratch, so each refresh costs O(all messages).
//! That is fine at inbox scale and is the ceiling to revisit if it grows.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{ConversationKey, Message, Thread};
use crate::store::ChatStore;

/// A conversation message joined with its client's profile.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub message: Message,
    pub client_id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// One inbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    pub key: ConversationKey,
    /// Profile display name, or the client id when no profile is known.
    pub display_name: String,
    pub email: Option<String>,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub message_count: usize,
}

impl IndexRow {
    fn matches(&self, needle: &str) -> bool {
        self.display_name.to_lowercase().contains(needle)
            || self
                .email
                .as_deref()
                .is_some_and(|email| email.to_lowercase().contains(needle))
    }
}

/// Group records by conversation, keeping the latest message of each.
///
/// Records are expected in store order (created_at, then insertion), so a
/// later record for the same key always replaces an earlier one.
pub fn group_latest(records: Vec<IndexRecord>) -> Vec<IndexRow> {
    let mut rows: HashMap<ConversationKey, IndexRow> = HashMap::new();
    for record in records {
        let Thread::Conversation(key) = record.message.thread else {
            continue;
        };
        let display_name = record
            .display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| record.client_id.clone());

        let row = rows.entry(key.clone()).or_insert_with(|| IndexRow {
            key,
            display_name: display_name.clone(),
            email: record.email.clone(),
            last_message: String::new(),
            last_message_at: record.message.created_at,
            message_count: 0,
        });
        row.message_count += 1;
        if record.message.created_at >= row.last_message_at || row.last_message.is_empty() {
            row.last_message = record.message.content;
            row.last_message_at = record.message.created_at;
        }
        row.display_name = display_name;
        row.email = record.email;
    }

    let mut rows: Vec<IndexRow> = rows.into_values().collect();
    rows.sort_by(|a, b| {
        b.last_message_at
            .cmp(&a.last_message_at)
            .then_with(|| a.key.cmp(&b.key))
    });
    rows
}

/// Case-insensitive substring filter over display name and email.
pub fn filter_rows<'a>(rows: &'a [IndexRow], query: &str) -> Vec<&'a IndexRow> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return rows.iter().collect();
    }
    rows.iter().filter(|row| row.matches(&needle)).collect()
}

/// Cached inbox rows, rebuilt wholesale on every refresh.
#[derive(Debug, Clone, Default)]
pub struct ConversationIndex {
    rows: Vec<IndexRow>,
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refetch every conversation message and regroup. O(all messages).
    pub async fn refresh(&mut self, store: &ChatStore) -> Result<()> {
        let records = store.index_records().await?;
        let scanned = records.len();
        self.rows = group_latest(records);
        tracing::debug!(scanned, rows = self.rows.len(), "rebuilt conversation index");
        Ok(())
    }

    pub fn rows(&self) -> &[IndexRow] {
        &self.rows
    }

    pub fn filter(&self, query: &str) -> Vec<&IndexRow> {
        filter_rows(&self.rows, query)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
