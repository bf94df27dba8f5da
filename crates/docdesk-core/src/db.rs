//! Database operations for docdesk.

use crate::error::{Error, Result};
use crate::index::IndexRecord;
use crate::models::*;
use crate::schema::SCHEMA;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// Database handle for docdesk.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        let parent = path.parent().unwrap_or(Path::new("."));
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Initialize schema.
    async fn init(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database.
    pub async fn close(self) {
        self.pool.close().await;
    }

    // =========================================================================
    // Profiles
    // =========================================================================

    /// Upsert a participant profile.
    pub async fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO profiles (id, display_name, email, role)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                email = excluded.email,
                role = excluded.role
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.display_name)
        .bind(&profile.email)
        .bind(profile.role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a profile by participant ID.
    pub async fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        let row = sqlx::query("SELECT * FROM profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Profile {
                id: row.get("id"),
                display_name: row.get("display_name"),
                email: row.get("email"),
                role: row.get::<&str, _>("role").parse()?,
            })),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Insert a new session.
    ///
    /// Fails with `DuplicateSessionRace` when the participant already has an
    /// open session (partial unique index `chat_sessions_one_open`).
    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO chat_sessions (id, token, participant_id, product_id, message_count, started_at, ended_at, resolved_by_ai)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.id.to_string())
        .bind(&session.token)
        .bind(&session.participant_id)
        .bind(&session.product_id)
        .bind(session.message_count)
        .bind(session.started_at.timestamp_millis())
        .bind(session.ended_at.map(|dt| dt.timestamp_millis()))
        .bind(session.resolved_by_ai)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::DuplicateSessionRace(
                    session.participant_id.clone().unwrap_or_default(),
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Most recent open session for a participant.
    pub async fn find_open_session(&self, participant_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM chat_sessions
            WHERE participant_id = ? AND ended_at IS NULL
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(participant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    /// Get a session by ID.
    pub async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    /// Get a session by its opaque client token.
    pub async fn get_session_by_token(&self, token: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM chat_sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    /// Replace the product context. Message history is untouched.
    pub async fn set_session_product(&self, id: Uuid, product_id: Option<&str>) -> Result<bool> {
        let result = sqlx::query("UPDATE chat_sessions SET product_id = ? WHERE id = ?")
            .bind(product_id)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Close a session. `ended_at` is only ever set once; the resolution flag
    /// always takes the latest value.
    pub async fn close_session(&self, id: Uuid, resolved: bool, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE chat_sessions
            SET ended_at = COALESCE(ended_at, ?),
                resolved_by_ai = ?
            WHERE id = ?
            "#,
        )
        .bind(at.timestamp_millis())
        .bind(resolved)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Account for newly persisted messages. With `soft_close` the session is
    /// additionally stamped ended and resolved, refreshing `ended_at`.
    pub async fn record_turn(
        &self,
        id: Uuid,
        added: i64,
        soft_close: bool,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE chat_sessions
            SET message_count = message_count + ?,
                ended_at = CASE WHEN ? THEN ? ELSE ended_at END,
                resolved_by_ai = CASE WHEN ? THEN 1 ELSE resolved_by_ai END
            WHERE id = ?
            "#,
        )
        .bind(added)
        .bind(soft_close)
        .bind(at.timestamp_millis())
        .bind(soft_close)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of open sessions held by a participant.
    pub async fn count_open_sessions(&self, participant_id: &str) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM chat_sessions WHERE participant_id = ? AND ended_at IS NULL",
        )
        .bind(participant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    /// Get session count.
    pub async fn count_sessions(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chat_sessions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    // =========================================================================
    // Session messages
    // =========================================================================

    /// Insert a session message unless a row with the same (session, role,
    /// content) already exists. Returns whether a row was written.
    ///
    /// The check and the insert are one statement, so overlapping syncs of
    /// the same turn cannot both insert.
    pub async fn insert_session_message_if_absent(
        &self,
        session_id: Uuid,
        msg: &Message,
    ) -> Result<bool> {
        let session = session_id.to_string();
        let role = msg.role.as_str();
        let result = sqlx::query(
            r#"
            INSERT INTO session_messages (id, session_id, role, content, created_at)
            SELECT ?, ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM session_messages
                WHERE session_id = ? AND role = ? AND content = ?
            )
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&session)
        .bind(role)
        .bind(&msg.content)
        .bind(msg.created_at.timestamp_millis())
        .bind(&session)
        .bind(role)
        .bind(&msg.content)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Get messages for a session in display order.
    pub async fn get_session_messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT * FROM session_messages WHERE session_id = ? ORDER BY created_at, seq",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(session_message_from_row(&row)?);
        }
        Ok(messages)
    }

    /// Get message count across sessions and conversations.
    pub async fn count_messages(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM session_messages) + (SELECT COUNT(*) FROM conversation_messages)",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    /// Append a message to a live conversation and refresh its projection.
    pub async fn insert_conversation_message(&self, msg: &Message) -> Result<()> {
        let Thread::Conversation(key) = &msg.thread else {
            return Err(Error::Validation(
                "conversation insert needs a conversation thread".to_string(),
            ));
        };
        let created_at = msg.created_at.timestamp_millis();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO conversations (key, client_id, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO NOTHING
            "#,
        )
        .bind(key.as_str())
        .bind(key.client_id())
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO conversation_messages (id, conversation_key, sender_id, role, content, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(key.as_str())
        .bind(&msg.sender_id)
        .bind(msg.role.as_str())
        .bind(&msg.content)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE conversations
            SET last_message = ?, last_message_at = ?, last_sender_id = ?
            WHERE key = ? AND (last_message_at IS NULL OR last_message_at <= ?)
            "#,
        )
        .bind(&msg.content)
        .bind(created_at)
        .bind(&msg.sender_id)
        .bind(key.as_str())
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Get a conversation by key.
    pub async fn get_conversation(&self, key: &ConversationKey) -> Result<Option<Conversation>> {
        let row = sqlx::query("SELECT * FROM conversations WHERE key = ?")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(conversation_from_row))
    }

    /// Get messages for a conversation in display order.
    pub async fn get_conversation_messages(&self, key: &ConversationKey) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT * FROM conversation_messages WHERE conversation_key = ? ORDER BY created_at, seq",
        )
        .bind(key.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(conversation_message_from_row(&row)?);
        }
        Ok(messages)
    }

    /// Every conversation message joined with its client's profile.
    ///
    /// Reads the whole message table: O(all messages) per call.
    pub async fn list_index_records(&self) -> Result<Vec<IndexRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT
                m.id AS id,
                m.conversation_key AS conversation_key,
                m.sender_id AS sender_id,
                m.role AS role,
                m.content AS content,
                m.created_at AS created_at,
                c.client_id AS client_id,
                p.display_name AS display_name,
                p.email AS email
            FROM conversation_messages m
            JOIN conversations c ON c.key = m.conversation_key
            LEFT JOIN profiles p ON p.id = c.client_id
            ORDER BY m.created_at, m.seq
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::new();
        for row in rows {
            records.push(IndexRecord {
                message: conversation_message_from_row(&row)?,
                client_id: row.get("client_id"),
                display_name: row.get("display_name"),
                email: row.get("email"),
            });
        }
        Ok(records)
    }

    /// Get conversation count.
    pub async fn count_conversations(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    // =========================================================================
    // Feedback
    // =========================================================================

    /// Insert feedback. A second row for the same session is rejected.
    pub async fn insert_feedback(&self, feedback: &Feedback) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO feedback (id, session_id, participant_id, rating, comment, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(feedback.id.to_string())
        .bind(feedback.session_id.to_string())
        .bind(&feedback.participant_id)
        .bind(feedback.rating.as_str())
        .bind(&feedback.comment)
        .bind(feedback.created_at.timestamp_millis())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::Validation(format!(
                    "feedback already submitted for session {}",
                    feedback.session_id
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Get the feedback recorded for a session.
    pub async fn get_feedback(&self, session_id: Uuid) -> Result<Option<Feedback>> {
        let row = sqlx::query("SELECT * FROM feedback WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Feedback {
                id: uuid_column(&row, "id")?,
                session_id: uuid_column(&row, "session_id")?,
                participant_id: row.get("participant_id"),
                rating: row.get::<&str, _>("rating").parse()?,
                comment: row.get("comment"),
                created_at: from_millis(row.get::<i64, _>("created_at")),
            })),
            None => Ok(None),
        }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn uuid_column(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw = row.get::<&str, _>(column);
    Uuid::parse_str(raw).map_err(|err| Error::Other(format!("corrupt {column} '{raw}': {err}")))
}

fn session_from_row(row: &SqliteRow) -> Result<Session> {
    Ok(Session {
        id: uuid_column(row, "id")?,
        token: row.get("token"),
        participant_id: row.get("participant_id"),
        product_id: row.get("product_id"),
        message_count: row.get("message_count"),
        started_at: from_millis(row.get::<i64, _>("started_at")),
        ended_at: row.get::<Option<i64>, _>("ended_at").map(from_millis),
        resolved_by_ai: row.get::<bool, _>("resolved_by_ai"),
    })
}

fn session_message_from_row(row: &SqliteRow) -> Result<Message> {
    Ok(Message {
        id: uuid_column(row, "id")?,
        thread: Thread::Session(uuid_column(row, "session_id")?),
        sender_id: None,
        role: row.get::<&str, _>("role").parse()?,
        content: row.get("content"),
        created_at: from_millis(row.get::<i64, _>("created_at")),
    })
}

fn conversation_message_from_row(row: &SqliteRow) -> Result<Message> {
    Ok(Message {
        id: uuid_column(row, "id")?,
        thread: Thread::Conversation(ConversationKey::for_client(
            row.get::<&str, _>("conversation_key"),
        )),
        sender_id: row.get("sender_id"),
        role: row.get::<&str, _>("role").parse()?,
        content: row.get("content"),
        created_at: from_millis(row.get::<i64, _>("created_at")),
    })
}

fn conversation_from_row(row: &SqliteRow) -> Conversation {
    Conversation {
        key: ConversationKey::for_client(row.get::<&str, _>("key")),
        created_at: from_millis(row.get::<i64, _>("created_at")),
        last_message: row.get("last_message"),
        last_message_at: row.get::<Option<i64>, _>("last_message_at").map(from_millis),
        last_sender_id: row.get("last_sender_id"),
    }
}
