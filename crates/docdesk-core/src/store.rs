//! Session/conversation store boundary.
//!
//! `ChatStore` wraps the durable [`Database`] and the [`FanoutBus`]. Writes
//! that fail transiently are retried exactly once; message inserts are
//! published on the bus after they commit.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::bus::{FanoutBus, InsertEvent, Scope, Subscription};
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::index::IndexRecord;
use crate::models::{
    Conversation, ConversationKey, Feedback, Message, MessageRole, Profile, Session, Thread,
};

/// Attempts for resume-or-create before giving up on a churning participant.
const RESUME_ATTEMPTS: usize = 3;

/// Shared handle to the durable store and its change feed.
#[derive(Clone)]
pub struct ChatStore {
    db: Arc<Database>,
    bus: FanoutBus,
}

impl ChatStore {
    pub fn new(db: Arc<Database>, bus: FanoutBus) -> Self {
        Self { db, bus }
    }

    /// Open the configured database with a fresh bus.
    pub async fn open(config: &Config) -> Result<Self> {
        let db = Database::open(&config.database).await?;
        Ok(Self::new(Arc::new(db), FanoutBus::new(config.bus.capacity)))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn bus(&self) -> &FanoutBus {
        &self.bus
    }

    pub fn subscribe(&self, scope: Scope, origin: &str) -> Subscription {
        self.bus.subscribe(scope, origin)
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Return the participant's open session, or create one with
    /// `preferred_product` as its context.
    ///
    /// An existing session is returned unchanged. Concurrent callers race on
    /// the one-open-session guard; the loser adopts the winner's session.
    pub async fn resume_or_create(
        &self,
        participant_id: &str,
        preferred_product: Option<&str>,
    ) -> Result<Session> {
        if participant_id.trim().is_empty() {
            return Err(Error::Validation("participant id is required".to_string()));
        }

        for _ in 0..RESUME_ATTEMPTS {
            let existing = retry_once("find open session", || {
                self.db.find_open_session(participant_id)
            })
            .await?;
            if let Some(session) = existing {
                tracing::debug!(session = %session.id, participant = participant_id, "resuming open session");
                return Ok(session);
            }

            let session = Session::new(Some(participant_id), preferred_product);
            match retry_once("create session", || self.db.insert_session(&session)).await {
                Ok(()) => {
                    tracing::info!(session = %session.id, participant = participant_id, "created session");
                    return Ok(session);
                }
                Err(Error::DuplicateSessionRace(_)) => {
                    tracing::debug!(participant = participant_id, "lost session race, adopting winner");
                }
                Err(err) => return Err(err),
            }
        }

        // The winner closed its session between our insert and re-fetch on
        // every attempt; surface it as transient rather than looping forever.
        Err(Error::TransientStore(format!(
            "could not settle an open session for participant '{participant_id}'"
        )))
    }

    /// Create a session for a visitor who has not authenticated yet.
    pub async fn create_anonymous_session(&self, product_id: Option<&str>) -> Result<Session> {
        let session = Session::new(None, product_id);
        retry_once("create session", || self.db.insert_session(&session)).await?;
        tracing::info!(session = %session.id, "created anonymous session");
        Ok(session)
    }

    pub async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        retry_once("get session", || self.db.get_session(id)).await
    }

    pub async fn get_session_by_token(&self, token: &str) -> Result<Option<Session>> {
        retry_once("get session", || self.db.get_session_by_token(token)).await
    }

    /// Switch the product context mid-conversation. History is kept.
    pub async fn set_product_context(&self, id: Uuid, product_id: Option<&str>) -> Result<()> {
        let updated = retry_once("set product context", || {
            self.db.set_session_product(id, product_id)
        })
        .await?;
        if updated {
            Ok(())
        } else {
            Err(Error::NotFound(format!("session {id}")))
        }
    }

    /// Close a session. Idempotent on `ended_at`.
    pub async fn close(&self, id: Uuid, resolved: bool) -> Result<()> {
        let at = Utc::now();
        let updated =
            retry_once("close session", || self.db.close_session(id, resolved, at)).await?;
        if updated {
            tracing::info!(session = %id, resolved, "closed session");
            Ok(())
        } else {
            Err(Error::NotFound(format!("session {id}")))
        }
    }

    /// Count persisted messages and apply the per-turn soft close.
    pub async fn record_turn(&self, id: Uuid, added: i64, soft_close: bool) -> Result<()> {
        let at = Utc::now();
        retry_once("record turn", || self.db.record_turn(id, added, soft_close, at)).await?;
        Ok(())
    }

    // =========================================================================
    // Messages
    // =========================================================================

    pub async fn session_messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
        retry_once("load session messages", || {
            self.db.get_session_messages(session_id)
        })
        .await
    }

    /// Persist a session message unless an identical (role, content) row
    /// exists. Publishes on the bus only when a row was written.
    pub async fn insert_session_message(
        &self,
        session_id: Uuid,
        msg: &Message,
        origin: &str,
    ) -> Result<bool> {
        let inserted = retry_once("insert session message", || {
            self.db.insert_session_message_if_absent(session_id, msg)
        })
        .await?;

        if inserted {
            let mut stored = msg.clone();
            stored.thread = Thread::Session(session_id);
            self.bus.publish(InsertEvent {
                origin: origin.to_string(),
                message: stored,
            });
        }
        Ok(inserted)
    }

    /// Append to a live conversation and publish the insert.
    ///
    /// End-user messages must come from the conversation's own client.
    pub async fn post_conversation_message(&self, msg: &Message, origin: &str) -> Result<()> {
        let Thread::Conversation(key) = &msg.thread else {
            return Err(Error::Validation(
                "message does not belong to a conversation".to_string(),
            ));
        };
        if msg.role == MessageRole::User && msg.sender_id.as_deref() != Some(key.client_id()) {
            return Err(Error::Validation(format!(
                "only client '{}' may post user messages to this conversation",
                key.client_id()
            )));
        }

        retry_once("insert conversation message", || {
            self.db.insert_conversation_message(msg)
        })
        .await?;

        self.bus.publish(InsertEvent {
            origin: origin.to_string(),
            message: msg.clone(),
        });
        Ok(())
    }

    pub async fn conversation_messages(&self, key: &ConversationKey) -> Result<Vec<Message>> {
        retry_once("load conversation", || self.db.get_conversation_messages(key)).await
    }

    pub async fn get_conversation(&self, key: &ConversationKey) -> Result<Option<Conversation>> {
        retry_once("get conversation", || self.db.get_conversation(key)).await
    }

    /// Full scan feeding the conversation index.
    pub async fn index_records(&self) -> Result<Vec<IndexRecord>> {
        retry_once("load index", || self.db.list_index_records()).await
    }

    pub async fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        retry_once("upsert profile", || self.db.upsert_profile(profile)).await
    }

    // =========================================================================
    // Feedback
    // =========================================================================

    pub async fn insert_feedback(&self, feedback: &Feedback) -> Result<()> {
        retry_once("insert feedback", || self.db.insert_feedback(feedback)).await
    }

    pub async fn get_feedback(&self, session_id: Uuid) -> Result<Option<Feedback>> {
        retry_once("get feedback", || self.db.get_feedback(session_id)).await
    }
}

/// Run `op`, retrying once on a transient failure.
async fn retry_once<T, F, Fut>(what: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Err(err) if err.is_transient() => {
            tracing::warn!(operation = what, error = %err, "store call failed, retrying once");
            op().await.map_err(|err| {
                if err.is_transient() {
                    Error::TransientStore(format!("{what}: {err}"))
                } else {
                    err
                }
            })
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retry_once_recovers_from_single_hiccup() {
        let calls = AtomicUsize::new(0);
        let result = retry_once("probe", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::Database(sqlx::Error::PoolTimedOut))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.ok(), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_once_gives_up_as_transient() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_once("probe", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Database(sqlx::Error::PoolClosed))
        })
        .await;

        assert!(matches!(result, Err(Error::TransientStore(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_once_skips_permanent_errors() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_once("probe", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Validation("nope".to_string()))
        })
        .await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
