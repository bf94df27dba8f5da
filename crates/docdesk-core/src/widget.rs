//! AI-assisted chat widget.
//!
//! A `ChatWidget` is one mounted view over one session. It owns its message
//! log, its inactivity timer, its bus subscription and its pending syncs,
//! and releases all of them on [`ChatWidget::teardown`] or drop. Store and
//! bus failures stop at this boundary: they are logged and the view keeps
//! working from its local log. Only feedback submission reports errors.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::bus::{InsertEvent, Scope, Subscription, SubscriptionState};
use crate::cache::{CacheMirror, LocalCache, reconcile};
use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::feedback;
use crate::links::{ContentLink, parse_reply};
use crate::message_log::{MessageLog, sync_detached};
use crate::models::{Feedback, Message, MessageRole, Rating, Session, Thread};
use crate::reply::{ReplyGenerator, ReplyRequest};
use crate::store::ChatStore;
use crate::timer::{InactivityTimer, TimerFired};

/// A message as the widget renders it. Assistant turns have their
/// link markup replaced by display text and listed as buttons.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub role: MessageRole,
    pub text: String,
    pub links: Vec<ContentLink>,
    pub created_at: DateTime<Utc>,
}

impl RenderedMessage {
    pub fn from_message(msg: &Message) -> Self {
        if msg.role == MessageRole::Assistant {
            let parsed = parse_reply(&msg.content);
            Self {
                role: msg.role,
                text: parsed.clean_text,
                links: parsed.links,
                created_at: msg.created_at,
            }
        } else {
            Self {
                role: msg.role,
                text: msg.content.clone(),
                links: Vec::new(),
                created_at: msg.created_at,
            }
        }
    }
}

/// Something the widget's event loop has to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetEvent {
    /// Another view of the same session wrote a message.
    Remote(Message),
    Inactivity(TimerFired),
    /// The bus dropped this view's subscription.
    SubscriptionLost,
}

pub struct ChatWidget<R: ReplyGenerator> {
    store: ChatStore,
    reply: R,
    cache: LocalCache,
    config: ChatConfig,
    participant_id: Option<String>,
    /// Sender identity of this view on the bus.
    origin: String,

    session_id: Option<Uuid>,
    session_token: Option<String>,
    product_id: Option<String>,
    log: MessageLog,

    feedback_given: bool,
    feedback_prompt: bool,
    switch_suggested: bool,
    /// Session ended by inactivity or feedback; the next send starts over.
    finalized: bool,
    degraded: bool,
    torn_down: bool,

    timer: InactivityTimer,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    subscription: Option<Subscription>,
    syncs: JoinSet<()>,
}

impl<R: ReplyGenerator> ChatWidget<R> {
    /// Mount the widget: restore the cached session if it is still usable,
    /// otherwise resume or create one for an authenticated participant.
    ///
    /// Store failures put the widget in degraded mode, rendering from the
    /// cache mirror alone.
    pub async fn mount(
        store: ChatStore,
        reply: R,
        cache: LocalCache,
        participant_id: Option<&str>,
        preferred_product: Option<&str>,
        config: ChatConfig,
    ) -> Self {
        let mirror = cache.load();
        let (timer, timer_rx) = InactivityTimer::new(config.inactivity_timeout());

        let mut widget = Self {
            store,
            reply,
            cache,
            config,
            participant_id: participant_id
                .filter(|p| !p.trim().is_empty())
                .map(ToOwned::to_owned),
            origin: format!("widget-{}", Uuid::new_v4()),
            session_id: None,
            session_token: None,
            product_id: preferred_product.map(ToOwned::to_owned),
            log: MessageLog::new(),
            feedback_given: false,
            feedback_prompt: false,
            switch_suggested: false,
            finalized: false,
            degraded: false,
            torn_down: false,
            timer,
            timer_rx,
            subscription: None,
            syncs: JoinSet::new(),
        };
        widget.restore(&mirror).await;
        widget
    }

    async fn restore(&mut self, mirror: &CacheMirror) {
        let mut session = None;
        let mut cached_id = None;

        // A rated session is done; only an unrated one is picked up again.
        if let Some(id) = mirror.session_id.filter(|_| !mirror.feedback_given_flag) {
            match self.store.get_session(id).await {
                Ok(Some(found)) if self.may_adopt(&found) => session = Some(found),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(session = %id, error = %err, "store unavailable, rendering from cache");
                    self.degraded = true;
                    cached_id = Some(id);
                }
            }
        }

        if session.is_none() && !self.degraded {
            if let Some(participant) = self.participant_id.clone() {
                match self
                    .store
                    .resume_or_create(&participant, self.product_id.as_deref())
                    .await
                {
                    Ok(found) => session = Some(found),
                    Err(err) => {
                        tracing::warn!(participant = %participant, error = %err, "could not open a session, continuing locally");
                        self.degraded = true;
                    }
                }
            }
        }

        let durable = match &session {
            Some(found) => match self.store.session_messages(found.id).await {
                Ok(messages) => Some(messages),
                Err(err) => {
                    tracing::warn!(session = %found.id, error = %err, "history unavailable, rendering from cache");
                    self.degraded = true;
                    None
                }
            },
            None => None,
        };

        let session_id = session.as_ref().map(|s| s.id).or(cached_id);
        let cached = session_id
            .map(|id| mirror.messages_for(id))
            .unwrap_or_default();
        self.log = MessageLog::from_messages(reconcile(durable, cached));

        if let Some(found) = session {
            self.attach(found);
        } else if let Some(id) = cached_id {
            self.session_id = Some(id);
            self.session_token.clone_from(&mirror.session_token);
            if mirror.cached_product_context.is_some() {
                self.product_id.clone_from(&mirror.cached_product_context);
            }
            self.subscribe();
        }

        if self.log.is_empty() {
            self.append_welcome();
        }
        self.persist_cache();
        self.arm_timer();

        tracing::debug!(
            session = ?self.session_id,
            messages = self.log.len(),
            degraded = self.degraded,
            "chat widget mounted"
        );
    }

    fn may_adopt(&self, session: &Session) -> bool {
        match (&session.participant_id, &self.participant_id) {
            (None, _) => true,
            (Some(owner), Some(me)) => owner == me,
            (Some(_), None) => false,
        }
    }

    fn attach(&mut self, session: Session) {
        self.session_id = Some(session.id);
        self.session_token = Some(session.token);
        if session.product_id.is_some() {
            self.product_id = session.product_id;
        }
        self.log.assign_thread(&Thread::Session(session.id));
        self.subscribe();
    }

    fn subscribe(&mut self) {
        let Some(id) = self.session_id else {
            return;
        };
        if let Some(mut old) = self.subscription.take() {
            old.unsubscribe();
        }
        self.subscription = Some(
            self.store
                .subscribe(Scope::Thread(Thread::Session(id)), &self.origin),
        );
    }

    fn thread(&self) -> Thread {
        Thread::Session(self.session_id.unwrap_or_else(Uuid::nil))
    }

    fn append_welcome(&mut self) {
        let welcome = Message::new(
            self.thread(),
            MessageRole::Assistant,
            self.config.welcome_message.clone(),
        );
        self.log.append(welcome);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    pub fn product_id(&self) -> Option<&str> {
        self.product_id.as_deref()
    }

    pub fn participant_id(&self) -> Option<&str> {
        self.participant_id.as_deref()
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }

    pub fn transcript(&self) -> Vec<RenderedMessage> {
        self.log
            .messages()
            .iter()
            .map(RenderedMessage::from_message)
            .collect()
    }

    pub fn feedback_prompt_visible(&self) -> bool {
        self.feedback_prompt
    }

    pub fn feedback_given(&self) -> bool {
        self.feedback_given
    }

    pub fn switch_product_suggested(&self) -> bool {
        self.switch_suggested
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn timer_armed(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.subscription
            .as_ref()
            .map_or(SubscriptionState::Unsubscribed, Subscription::state)
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Send a user message and append the bot's reply.
    ///
    /// The user's message is in the log before the reply is requested. A
    /// failed reply becomes the configured apology turn.
    pub async fn send(&mut self, text: &str) -> Result<RenderedMessage> {
        if self.torn_down {
            return Err(Error::Validation("chat view is closed".to_string()));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Validation("message is empty".to_string()));
        }
        if self.finalized {
            self.start_fresh();
        }

        self.ensure_session().await;

        let mut user = Message::new(self.thread(), MessageRole::User, text);
        if let Some(participant) = &self.participant_id {
            user = user.with_sender(participant);
        }
        self.append_local(user);

        let request = ReplyRequest::from_log(self.log.messages(), self.product_id.as_deref());
        let (content, suggest_switch) = match self.reply.generate(&request).await {
            Ok(response) => (response.reply, response.suggest_switch_product),
            Err(err) => {
                tracing::warn!(session = ?self.session_id, error = %err, "reply generation failed");
                (self.config.apology_message.clone(), false)
            }
        };
        self.switch_suggested = suggest_switch;

        let reply = Message::new(self.thread(), MessageRole::Assistant, content);
        let rendered = RenderedMessage::from_message(&reply);
        self.append_local(reply);
        Ok(rendered)
    }

    /// Switch product context. History is kept.
    pub async fn set_product(&mut self, product_id: &str) {
        let product_id = product_id.trim();
        if product_id.is_empty() || self.torn_down {
            return;
        }
        self.product_id = Some(product_id.to_string());
        self.switch_suggested = false;
        if let Some(id) = self.session_id {
            if let Err(err) = self.store.set_product_context(id, Some(product_id)).await {
                tracing::warn!(session = %id, error = %err, "product switch not persisted");
            }
        }
        self.persist_cache();
    }

    /// End the current session as resolved and start over with a welcome.
    pub async fn new_conversation(&mut self) {
        if self.torn_down {
            return;
        }
        self.timer.cancel();
        if let Some(id) = self.session_id {
            self.flush().await;
            if let Err(err) = self.store.close(id, true).await {
                tracing::warn!(session = %id, error = %err, "could not close session");
            }
        }
        self.start_fresh();
        self.persist_cache();
    }

    /// Rate the current session. Errors are returned to the caller.
    pub async fn submit_feedback(
        &mut self,
        rating: Rating,
        comment: Option<&str>,
    ) -> Result<Feedback> {
        if self.torn_down {
            return Err(Error::Validation("chat view is closed".to_string()));
        }
        let Some(session_id) = self.session_id else {
            return Err(Error::Validation("there is no session to rate".to_string()));
        };
        let Some(participant) = self.participant_id.clone() else {
            return Err(Error::Validation(
                "feedback requires a signed-in participant".to_string(),
            ));
        };
        if self.feedback_given {
            return Err(Error::Validation(format!(
                "feedback already recorded for session {session_id}"
            )));
        }

        // Pending turns land before the close stamps the session.
        self.flush().await;
        let recorded = feedback::submit(&self.store, session_id, &participant, rating, comment).await?;

        self.timer.cancel();
        self.feedback_given = true;
        self.feedback_prompt = false;
        self.finalized = true;
        self.persist_cache();
        Ok(recorded)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Wait for the next timer fire or remote message.
    ///
    /// Returns `None` once the widget is torn down. Pends forever when there
    /// is nothing left to wait for, so callers race it against their input.
    pub async fn next_event(&mut self) -> Option<WidgetEvent> {
        if self.torn_down {
            return None;
        }
        let subscription = self
            .subscription
            .as_mut()
            .filter(|sub| sub.state() == SubscriptionState::Subscribed);
        let timer_rx = &mut self.timer_rx;

        tokio::select! {
            fired = timer_rx.recv() => fired.map(WidgetEvent::Inactivity),
            event = next_remote(subscription) => Some(match event {
                Some(event) => WidgetEvent::Remote(event.message),
                None => WidgetEvent::SubscriptionLost,
            }),
        }
    }

    /// Apply one event to the view.
    pub async fn handle_event(&mut self, event: WidgetEvent) {
        if self.torn_down {
            return;
        }
        match event {
            WidgetEvent::Remote(msg) => {
                if msg.thread != self.thread() {
                    return;
                }
                if self.log.merge_remote(msg) {
                    self.persist_cache();
                    self.arm_timer();
                }
            }
            WidgetEvent::Inactivity(fired) => {
                if self.timer.is_current(&fired) && Some(fired.session_id) == self.session_id {
                    self.timer.acknowledge(&fired);
                    self.handle_inactivity(fired.session_id).await;
                }
            }
            WidgetEvent::SubscriptionLost => {
                tracing::warn!(session = ?self.session_id, "realtime updates lost");
                self.resubscribe();
            }
        }
    }

    /// Drain every event that is already available without waiting.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            if self.torn_down {
                return handled;
            }
            let event = if let Ok(fired) = self.timer_rx.try_recv() {
                WidgetEvent::Inactivity(fired)
            } else {
                let before = self.subscription_state();
                match self.subscription.as_mut().and_then(Subscription::try_recv) {
                    Some(event) => WidgetEvent::Remote(event.message),
                    None if before == SubscriptionState::Subscribed
                        && self.subscription_state() == SubscriptionState::Faulted =>
                    {
                        WidgetEvent::SubscriptionLost
                    }
                    None => return handled,
                }
            };
            self.handle_event(event).await;
            handled += 1;
        }
    }

    async fn handle_inactivity(&mut self, session_id: Uuid) {
        if self.finalized || self.feedback_given {
            return;
        }
        if let Err(err) = self.store.close(session_id, true).await {
            tracing::warn!(session = %session_id, error = %err, "inactivity close not persisted");
        }
        let notice = Message::new(
            self.thread(),
            MessageRole::System,
            self.config.auto_close_message.clone(),
        );
        self.log.append(notice);
        self.feedback_prompt = true;
        self.finalized = true;
        self.persist_cache();
        tracing::info!(session = %session_id, "session closed after inactivity");
    }

    /// Replace a faulted or missing subscription. Returns whether the view is
    /// subscribed afterwards.
    pub fn resubscribe(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        if self.subscription_state() != SubscriptionState::Subscribed {
            self.subscribe();
        }
        self.subscription_state() == SubscriptionState::Subscribed
    }

    /// Wait for every scheduled sync to finish.
    pub async fn flush(&mut self) {
        while let Some(joined) = self.syncs.join_next().await {
            if let Err(err) = joined {
                if !err.is_cancelled() {
                    tracing::warn!(error = %err, "sync task failed");
                }
            }
        }
    }

    /// Release the timer, pending syncs and subscription. Idempotent; the
    /// widget performs no writes afterwards.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.timer.cancel();
        self.syncs.abort_all();
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.torn_down = true;
        tracing::debug!(session = ?self.session_id, "chat widget torn down");
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn ensure_session(&mut self) {
        if self.session_id.is_some() {
            return;
        }
        let opened = match self.participant_id.as_deref() {
            Some(participant) => {
                self.store
                    .resume_or_create(participant, self.product_id.as_deref())
                    .await
            }
            None => {
                self.store
                    .create_anonymous_session(self.product_id.as_deref())
                    .await
            }
        };
        match opened {
            Ok(session) => {
                self.degraded = false;
                self.attach(session);
            }
            Err(err) => {
                tracing::warn!(error = %err, "no durable session, continuing locally");
                self.degraded = true;
            }
        }
    }

    fn start_fresh(&mut self) {
        self.timer.cancel();
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.session_id = None;
        self.session_token = None;
        self.log.clear();
        self.feedback_given = false;
        self.feedback_prompt = false;
        self.switch_suggested = false;
        self.finalized = false;
        self.append_welcome();
    }

    fn append_local(&mut self, msg: Message) {
        self.log.append(msg);
        self.persist_cache();
        self.schedule_sync();
        self.arm_timer();
    }

    fn arm_timer(&mut self) {
        let Some(id) = self.session_id else {
            return;
        };
        if !self.finalized && InactivityTimer::should_arm(self.log.len(), self.feedback_given) {
            self.timer.reset(id);
        }
    }

    fn schedule_sync(&mut self) {
        let Some(id) = self.session_id else {
            return;
        };
        if self.torn_down {
            return;
        }
        // Reap finished syncs so the set does not grow for long sessions.
        while self.syncs.try_join_next().is_some() {}

        let window = self.log.tail(self.config.sync_window);
        self.syncs.spawn(sync_detached(
            self.store.clone(),
            id,
            window,
            self.origin.clone(),
            self.config.soft_close_after_turn,
        ));
    }

    fn persist_cache(&self) {
        if self.torn_down {
            return;
        }
        self.cache.save(&CacheMirror {
            session_token: self.session_token.clone(),
            session_id: self.session_id,
            cached_messages: self.log.messages().to_vec(),
            cached_product_context: self.product_id.clone(),
            feedback_given_flag: self.feedback_given,
        });
    }
}

async fn next_remote(subscription: Option<&mut Subscription>) -> Option<InsertEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

impl<R: ReplyGenerator> Drop for ChatWidget<R> {
    fn drop(&mut self) {
        self.teardown();
    }
}
