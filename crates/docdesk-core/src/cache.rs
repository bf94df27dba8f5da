//! Local cache mirror of the chat widget.
//!
//! Shadows the last-known session, product context, feedback flag and message
//! list so a reopen can render immediately. Everything here is best effort:
//! a missing or corrupt cache yields an empty mirror, and write failures are
//! logged and dropped.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Message, Thread};

/// Persisted cache keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheMirror {
    pub session_token: Option<String>,
    pub session_id: Option<Uuid>,
    pub cached_messages: Vec<Message>,
    pub cached_product_context: Option<String>,
    pub feedback_given_flag: bool,
}

impl CacheMirror {
    /// Cached messages that belong to `session_id`.
    pub fn messages_for(&self, session_id: Uuid) -> Vec<Message> {
        if self.session_id != Some(session_id) {
            return Vec::new();
        }
        let thread = Thread::Session(session_id);
        self.cached_messages
            .iter()
            .filter(|msg| msg.thread == thread)
            .cloned()
            .collect()
    }
}

/// File-backed cache store, one per browser profile / local user.
#[derive(Debug, Clone)]
pub struct LocalCache {
    path: PathBuf,
}

impl LocalCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the mirror, falling back to an empty one on any failure.
    pub fn load(&self) -> CacheMirror {
        match self.try_load() {
            Ok(mirror) => mirror,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "discarding unreadable chat cache");
                CacheMirror::default()
            }
        }
    }

    fn try_load(&self) -> Result<CacheMirror> {
        if !self.path.exists() {
            return Ok(CacheMirror::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Persist the mirror. Failures are logged, never surfaced.
    pub fn save(&self, mirror: &CacheMirror) {
        if let Err(err) = self.try_save(mirror) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to write chat cache");
        }
    }

    fn try_save(&self, mirror: &CacheMirror) -> Result<()> {
        let parent = self.path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)?;

        // Write-then-rename so a crash never leaves a torn file behind.
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&serde_json::to_vec(mirror)?)?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    /// Forget everything (fresh welcome flow on next mount).
    pub fn clear(&self) {
        if self.path.exists() {
            if let Err(err) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to clear chat cache");
            }
        }
    }
}

/// Merge durable and cached history on reload.
///
/// A successful, non-empty durable read wins; otherwise the cached messages
/// are used. Past this point the in-memory log is authoritative for the rest
/// of the view's lifetime and the cache is rewritten from it.
pub fn reconcile(durable: Option<Vec<Message>>, cached: Vec<Message>) -> Vec<Message> {
    match durable {
        Some(messages) if !messages.is_empty() => messages,
        _ => cached,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageRole;

    fn msg(session: Uuid, content: &str) -> Message {
        Message::new(Thread::Session(session), MessageRole::User, content)
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = LocalCache::new(dir.path().join("absent.json"));
        assert_eq!(cache.load(), CacheMirror::default());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{not json").expect("write");

        let cache = LocalCache::new(&path);
        assert_eq!(cache.load(), CacheMirror::default());
    }

    #[test]
    fn save_then_load_preserves_mirror() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = LocalCache::new(dir.path().join("nested").join("cache.json"));
        let session = Uuid::new_v4();

        let mirror = CacheMirror {
            session_token: Some("tok".to_string()),
            session_id: Some(session),
            cached_messages: vec![msg(session, "hi")],
            cached_product_context: Some("prodA".to_string()),
            feedback_given_flag: true,
        };
        cache.save(&mirror);

        assert_eq!(cache.load(), mirror);

        cache.clear();
        assert_eq!(cache.load(), CacheMirror::default());
    }

    #[test]
    fn messages_for_other_session_are_ignored() {
        let session = Uuid::new_v4();
        let mirror = CacheMirror {
            session_id: Some(session),
            cached_messages: vec![msg(session, "hi")],
            ..CacheMirror::default()
        };
        assert_eq!(mirror.messages_for(session).len(), 1);
        assert!(mirror.messages_for(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn durable_wins_when_present() {
        let session = Uuid::new_v4();
        let durable = vec![msg(session, "from store")];
        let cached = vec![msg(session, "from cache"), msg(session, "extra")];

        let merged = reconcile(Some(durable), cached);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, "from store");
    }

    #[test]
    fn cache_used_when_store_unavailable_or_empty() {
        let session = Uuid::new_v4();
        let cached = vec![msg(session, "from cache")];

        assert_eq!(reconcile(None, cached.clone()), cached);
        assert_eq!(reconcile(Some(Vec::new()), cached.clone()), cached);
    }
}
