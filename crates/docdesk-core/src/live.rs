//! Live agent/client chat.
//!
//! A client sees exactly one conversation, keyed by their own id. An admin
//! sees the inbox: every conversation in the [`ConversationIndex`], with one
//! selected at a time. The inbox holds a single all-insert subscription and
//! re-points its filter when the selection changes.

use crate::bus::{InsertEvent, Scope, Subscription, SubscriptionState};
use crate::error::{Error, Result};
use crate::index::{ConversationIndex, IndexRow};
use crate::message_log::MessageLog;
use crate::models::{ConversationKey, Identity, Message, MessageRole, ParticipantRole, Thread};
use crate::store::ChatStore;

/// The view a participant gets, decided by their role.
pub enum LiveView {
    Client(ClientChat),
    Admin(AgentInbox),
}

/// Open the live chat view for `identity`.
pub async fn open_live_view(store: &ChatStore, identity: &Identity) -> Result<LiveView> {
    if identity.id.trim().is_empty() {
        return Err(Error::Validation("participant id is required".to_string()));
    }
    Ok(match identity.role {
        ParticipantRole::Client => LiveView::Client(ClientChat::open(store, &identity.id).await),
        ParticipantRole::Admin => LiveView::Admin(AgentInbox::open(store, &identity.id).await),
    })
}

async fn load_thread(store: &ChatStore, key: &ConversationKey) -> MessageLog {
    match store.conversation_messages(key).await {
        Ok(messages) => MessageLog::from_messages(messages),
        Err(err) => {
            tracing::warn!(conversation = %key, error = %err, "conversation history unavailable");
            MessageLog::new()
        }
    }
}

/// Post and keep the local copy; only ownership violations reach the caller.
async fn post(store: &ChatStore, msg: &Message, origin: &str) -> Result<()> {
    match store.post_conversation_message(msg, origin).await {
        Ok(()) => Ok(()),
        Err(err @ Error::Validation(_)) => Err(err),
        Err(err) => {
            tracing::warn!(origin, error = %err, "live message not persisted");
            Ok(())
        }
    }
}

fn release(subscription: &mut Option<Subscription>) {
    if let Some(mut subscription) = subscription.take() {
        subscription.unsubscribe();
    }
}

fn state_of(subscription: Option<&Subscription>) -> SubscriptionState {
    subscription.map_or(SubscriptionState::Unsubscribed, Subscription::state)
}

// =============================================================================
// Client
// =============================================================================

/// A client's view of their own conversation with the support team.
pub struct ClientChat {
    store: ChatStore,
    client_id: String,
    key: ConversationKey,
    log: MessageLog,
    subscription: Option<Subscription>,
    torn_down: bool,
}

impl ClientChat {
    async fn open(store: &ChatStore, client_id: &str) -> Self {
        let key = ConversationKey::for_client(client_id);
        let log = load_thread(store, &key).await;
        let mut chat = Self {
            store: store.clone(),
            client_id: client_id.to_string(),
            key,
            log,
            subscription: None,
            torn_down: false,
        };
        chat.resubscribe();
        chat
    }

    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        state_of(self.subscription.as_ref())
    }

    /// Append locally, then persist and fan out.
    pub async fn send(&mut self, text: &str) -> Result<Message> {
        if self.torn_down {
            return Err(Error::Validation("chat view is closed".to_string()));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Validation("message is empty".to_string()));
        }
        let msg = Message::new(
            Thread::Conversation(self.key.clone()),
            MessageRole::User,
            text,
        )
        .with_sender(&self.client_id);
        self.log.append(msg.clone());
        post(&self.store, &msg, &self.client_id).await?;
        Ok(msg)
    }

    /// Wait for the next message from the support side.
    pub async fn next_message(&mut self) -> Option<Message> {
        if self.torn_down {
            return None;
        }
        let event = self.subscription.as_mut()?.recv().await?;
        Some(self.accept(event))
    }

    /// Merge every delivered message without waiting.
    pub fn pump(&mut self) -> usize {
        let mut merged = 0;
        while let Some(event) = self.subscription.as_mut().and_then(Subscription::try_recv) {
            self.accept(event);
            merged += 1;
        }
        merged
    }

    /// Every delivered insert is a distinct stored row; repeated text is kept.
    fn accept(&mut self, event: InsertEvent) -> Message {
        let msg = event.message;
        self.log.append(msg.clone());
        msg
    }

    pub fn resubscribe(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        if self.subscription_state() != SubscriptionState::Subscribed {
            release(&mut self.subscription);
            self.subscription = Some(self.store.subscribe(
                Scope::Thread(Thread::Conversation(self.key.clone())),
                &self.client_id,
            ));
        }
        self.subscription_state() == SubscriptionState::Subscribed
    }

    pub fn teardown(&mut self) {
        release(&mut self.subscription);
        self.torn_down = true;
    }
}

impl Drop for ClientChat {
    fn drop(&mut self) {
        self.teardown();
    }
}

// =============================================================================
// Agent inbox
// =============================================================================

/// Admin view over every client conversation.
pub struct AgentInbox {
    store: ChatStore,
    agent_id: String,
    index: ConversationIndex,
    selected: Option<ConversationKey>,
    log: MessageLog,
    subscription: Option<Subscription>,
    torn_down: bool,
}

impl AgentInbox {
    async fn open(store: &ChatStore, agent_id: &str) -> Self {
        let mut inbox = Self {
            store: store.clone(),
            agent_id: agent_id.to_string(),
            index: ConversationIndex::new(),
            selected: None,
            log: MessageLog::new(),
            subscription: None,
            torn_down: false,
        };
        inbox.resubscribe();
        inbox.refresh_index().await;
        inbox
    }

    pub fn index(&self) -> &ConversationIndex {
        &self.index
    }

    pub fn filter(&self, query: &str) -> Vec<&IndexRow> {
        self.index.filter(query)
    }

    pub fn selected(&self) -> Option<&ConversationKey> {
        self.selected.as_ref()
    }

    /// Messages of the selected conversation.
    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        state_of(self.subscription.as_ref())
    }

    /// Rebuild the index from the store. Failures keep the previous rows.
    pub async fn refresh_index(&mut self) {
        if let Err(err) = self.index.refresh(&self.store).await {
            tracing::warn!(error = %err, "conversation index refresh failed");
        }
    }

    /// Point the view at another conversation. The subscription is kept.
    pub async fn select(&mut self, key: ConversationKey) {
        // Inserts queued so far are part of the history loaded below.
        let drained = self.drain();
        self.log = load_thread(&self.store, &key).await;
        tracing::debug!(conversation = %key, messages = self.log.len(), "selected conversation");
        self.selected = Some(key);
        if drained > 0 {
            self.refresh_index().await;
        }
    }

    /// Reply to the selected conversation as the agent.
    pub async fn reply(&mut self, text: &str) -> Result<Message> {
        if self.torn_down {
            return Err(Error::Validation("inbox is closed".to_string()));
        }
        let Some(key) = self.selected.clone() else {
            return Err(Error::Validation("no conversation selected".to_string()));
        };
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Validation("message is empty".to_string()));
        }
        let msg = Message::new(Thread::Conversation(key), MessageRole::Agent, text)
            .with_sender(&self.agent_id);
        self.log.append(msg.clone());
        post(&self.store, &msg, &self.agent_id).await?;
        // Own writes never come back over the bus.
        self.refresh_index().await;
        Ok(msg)
    }

    /// Wait for the next insert anywhere, apply it and return it.
    pub async fn next_event(&mut self) -> Option<Message> {
        if self.torn_down {
            return None;
        }
        let event = self.subscription.as_mut()?.recv().await?;
        let msg = self.apply(event);
        self.refresh_index().await;
        Some(msg)
    }

    /// Apply every delivered insert without waiting. The index is rebuilt
    /// once if anything arrived.
    pub async fn pump(&mut self) -> usize {
        let seen = self.drain();
        if seen > 0 {
            self.refresh_index().await;
        }
        seen
    }

    fn drain(&mut self) -> usize {
        let mut seen = 0;
        while let Some(event) = self.subscription.as_mut().and_then(Subscription::try_recv) {
            self.apply(event);
            seen += 1;
        }
        seen
    }

    fn apply(&mut self, event: InsertEvent) -> Message {
        let msg = event.message;
        let in_selected = matches!(
            (&msg.thread, &self.selected),
            (Thread::Conversation(key), Some(selected)) if key == selected
        );
        if in_selected {
            self.log.append(msg.clone());
        }
        msg
    }

    pub fn resubscribe(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        if self.subscription_state() != SubscriptionState::Subscribed {
            release(&mut self.subscription);
            self.subscription = Some(self.store.subscribe(Scope::All, &self.agent_id));
        }
        self.subscription_state() == SubscriptionState::Subscribed
    }

    pub fn teardown(&mut self) {
        release(&mut self.subscription);
        self.torn_down = true;
    }
}

impl Drop for AgentInbox {
    fn drop(&mut self) {
        self.teardown();
    }
}
