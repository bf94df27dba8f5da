//! Domain models for sessions, conversations, messages and feedback.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// One AI-assisted chat instance for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// Opaque token handed to the client cache.
    pub token: String,
    pub participant_id: Option<String>,
    pub product_id: Option<String>,
    pub message_count: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub resolved_by_ai: bool,
}

impl Session {
    /// A fresh open session with zero messages.
    pub fn new(participant_id: Option<&str>, product_id: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            token: Uuid::new_v4().simple().to_string(),
            participant_id: participant_id.map(ToOwned::to_owned),
            product_id: product_id.map(ToOwned::to_owned),
            message_count: 0,
            started_at: Utc::now(),
            ended_at: None,
            resolved_by_ai: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Identity of a live agent/client thread: always the client's participant id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn for_client(client_id: &str) -> Self {
        Self(client_id.to_string())
    }

    /// The client that owns every message under this key.
    pub fn client_id(&self) -> &str {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live agent/client thread with its denormalized last-message projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub key: ConversationKey,
    pub created_at: DateTime<Utc>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_sender_id: Option<String>,
}

/// Where a message lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Thread {
    Session(Uuid),
    Conversation(ConversationKey),
}

/// An immutable message. Ordering is `created_at`, then insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Client-generated locally; the store assigns its own id on insert.
    pub id: Uuid,
    pub thread: Thread,
    pub sender_id: Option<String>,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(thread: Thread, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread,
            sender_id: None,
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_sender(mut self, sender_id: &str) -> Self {
        self.sender_id = Some(sender_id.to_string());
        self
    }

    /// Content-based identity used by dedup: (thread, role, content).
    pub fn same_content(&self, other: &Message) -> bool {
        self.thread == other.thread && self.role == other.role && self.content == other.content
    }
}

/// Sender roles. Unrecognized values are rejected at the boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Agent,
    System,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Agent => "agent",
            MessageRole::System => "system",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" | "bot" => Ok(MessageRole::Assistant),
            "agent" => Ok(MessageRole::Agent),
            "system" => Ok(MessageRole::System),
            other => Err(Error::Validation(format!("unknown message role '{other}'"))),
        }
    }
}

/// Role supplied by the auth/profile collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Admin,
    Client,
}

impl ParticipantRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ParticipantRole::Admin => "admin",
            ParticipantRole::Client => "client",
        }
    }
}

impl std::fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipantRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(ParticipantRole::Admin),
            "client" => Ok(ParticipantRole::Client),
            other => Err(Error::Validation(format!("unknown participant role '{other}'"))),
        }
    }
}

/// An authenticated participant as seen by the messaging core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub role: ParticipantRole,
}

impl Identity {
    pub fn client(id: &str) -> Self {
        Self {
            id: id.to_string(),
            role: ParticipantRole::Client,
        }
    }

    pub fn admin(id: &str) -> Self {
        Self {
            id: id.to_string(),
            role: ParticipantRole::Admin,
        }
    }
}

/// Display profile of a participant, used by the conversation index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub role: ParticipantRole,
}

/// Satisfaction rating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Positive,
    Negative,
}

impl Rating {
    pub fn as_str(self) -> &'static str {
        match self {
            Rating::Positive => "positive",
            Rating::Negative => "negative",
        }
    }

    /// A negative rating means the AI did not resolve the session.
    pub fn resolved(self) -> bool {
        self != Rating::Negative
    }
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rating {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "positive" | "good" | "up" => Ok(Rating::Positive),
            "negative" | "bad" | "down" => Ok(Rating::Negative),
            other => Err(Error::Validation(format!("unknown rating '{other}'"))),
        }
    }
}

/// One-shot satisfaction feedback for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: Uuid,
    pub session_id: Uuid,
    pub participant_id: String,
    pub rating: Rating,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
