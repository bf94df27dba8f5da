//! Satisfaction feedback for AI-assisted sessions.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Feedback, Rating};
use crate::store::ChatStore;

/// Record one rating for a session and close it.
///
/// The session must exist and, when it belongs to a participant, the rating
/// must come from that participant. A session accepts exactly one rating;
/// the store rejects a second one even if this check races.
pub async fn submit(
    store: &ChatStore,
    session_id: Uuid,
    participant_id: &str,
    rating: Rating,
    comment: Option<&str>,
) -> Result<Feedback> {
    if participant_id.trim().is_empty() {
        return Err(Error::Validation(
            "feedback requires a participant".to_string(),
        ));
    }

    let session = store
        .get_session(session_id)
        .await?
        .ok_or_else(|| Error::Validation(format!("unknown session {session_id}")))?;

    if let Some(owner) = session.participant_id.as_deref() {
        if owner != participant_id {
            return Err(Error::Validation(format!(
                "session {session_id} does not belong to participant '{participant_id}'"
            )));
        }
    }

    if store.get_feedback(session_id).await?.is_some() {
        return Err(Error::Validation(format!(
            "feedback already recorded for session {session_id}"
        )));
    }

    let feedback = Feedback {
        id: Uuid::new_v4(),
        session_id,
        participant_id: participant_id.to_string(),
        rating,
        comment: comment
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(ToOwned::to_owned),
        created_at: Utc::now(),
    };
    store.insert_feedback(&feedback).await?;
    store.close(session_id, rating.resolved()).await?;

    tracing::info!(session = %session_id, rating = %rating, "feedback recorded");
    Ok(feedback)
}
