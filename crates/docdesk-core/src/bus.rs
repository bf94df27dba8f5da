//! Realtime fan-out of newly inserted messages.
//!
//! The bus stands in for the durable store's change feed: every successful
//! message insert is published once, and each live view holds a
//! [`Subscription`] scoped either to one thread or to every insert. A
//! subscription drops events written by its own origin, since the writer
//! already has the message in its local log.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::models::{Message, Thread};

/// A row that was just inserted, plus the identity of whoever wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertEvent {
    /// Sender identity of the writing view (participant id or view instance id).
    pub origin: String,
    pub message: Message,
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Thread(Thread),
    /// Every insert, filtered client-side (admin inbox and index).
    All,
}

impl Scope {
    fn matches(&self, message: &Message) -> bool {
        match self {
            Scope::Thread(thread) => &message.thread == thread,
            Scope::All => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribed,
    Faulted,
}

/// In-process fan-out bus. Cloning shares the same channel.
#[derive(Clone)]
pub struct FanoutBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    capacity: usize,
    // None while the transport is disconnected
    sender: RwLock<Option<broadcast::Sender<InsertEvent>>>,
}

impl FanoutBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(BusInner {
                capacity,
                sender: RwLock::new(Some(sender)),
            }),
        }
    }

    /// Register interest in inserts. The subscription is released when it
    /// is dropped or [`Subscription::unsubscribe`] is called.
    pub fn subscribe(&self, scope: Scope, origin: &str) -> Subscription {
        let receiver = self
            .inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(broadcast::Sender::subscribe);

        let state = if receiver.is_some() {
            SubscriptionState::Subscribed
        } else {
            tracing::warn!(origin, "subscribe while bus is disconnected");
            SubscriptionState::Faulted
        };

        Subscription {
            receiver,
            scope,
            origin: origin.to_string(),
            state,
        }
    }

    /// Publish an insert. Returns the number of live receivers it reached.
    pub fn publish(&self, event: InsertEvent) -> usize {
        let guard = self
            .inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            // No receivers is not an error for a change feed.
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Live receivers, including ones scoped to other threads.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Drop the transport. Every subscription observes a fault.
    pub fn disconnect(&self) {
        let previous = self
            .inner
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            tracing::warn!("fan-out transport disconnected");
        }
    }

    /// Bring the transport back. Faulted subscriptions must be replaced by
    /// their owning views.
    pub fn reconnect(&self) {
        let mut guard = self
            .inner
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            let (sender, _) = broadcast::channel(self.inner.capacity);
            *guard = Some(sender);
            tracing::info!("fan-out transport reconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// A view's registration on the bus.
pub struct Subscription {
    receiver: Option<broadcast::Receiver<InsertEvent>>,
    scope: Scope,
    origin: String,
    state: SubscriptionState,
}

impl Subscription {
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Wait for the next event from another origin within scope.
    ///
    /// Returns `None` once the subscription is unsubscribed or faulted.
    pub async fn recv(&mut self) -> Option<InsertEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(origin = %self.origin, skipped, "subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => {
                    self.fault();
                    return None;
                }
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Option<InsertEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(event);
                    }
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(origin = %self.origin, skipped, "subscriber lagged, events dropped");
                }
                Err(TryRecvError::Closed) => {
                    self.fault();
                    return None;
                }
            }
        }
    }

    /// Release the registration. Idempotent.
    pub fn unsubscribe(&mut self) {
        self.receiver = None;
        self.state = SubscriptionState::Unsubscribed;
    }

    fn accepts(&self, event: &InsertEvent) -> bool {
        event.origin != self.origin && self.scope.matches(&event.message)
    }

    fn fault(&mut self) {
        tracing::warn!(origin = %self.origin, "subscription faulted, realtime updates lost");
        self.receiver = None;
        self.state = SubscriptionState::Faulted;
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("scope", &self.scope)
            .field("origin", &self.origin)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConversationKey, MessageRole};
    use uuid::Uuid;

    fn event(origin: &str, thread: Thread, content: &str) -> InsertEvent {
        InsertEvent {
            origin: origin.to_string(),
            message: Message::new(thread, MessageRole::User, content),
        }
    }

    #[tokio::test]
    async fn delivers_to_other_subscribers_of_thread() {
        let bus = FanoutBus::new(16);
        let thread = Thread::Session(Uuid::new_v4());
        let mut viewer = bus.subscribe(Scope::Thread(thread.clone()), "tab-b");

        bus.publish(event("tab-a", thread.clone(), "hello"));

        let received = viewer.recv().await.expect("event");
        assert_eq!(received.message.content, "hello");
        assert_eq!(received.message.thread, thread);
    }

    #[tokio::test]
    async fn own_writes_are_discarded() {
        let bus = FanoutBus::new(16);
        let thread = Thread::Session(Uuid::new_v4());
        let mut sender = bus.subscribe(Scope::Thread(thread.clone()), "tab-a");

        bus.publish(event("tab-a", thread.clone(), "mine"));
        bus.publish(event("tab-b", thread, "theirs"));

        let received = sender.recv().await.expect("event");
        assert_eq!(received.message.content, "theirs");
        assert!(sender.try_recv().is_none());
    }

    #[test]
    fn thread_scope_filters_other_threads() {
        let bus = FanoutBus::new(16);
        let mine = Thread::Conversation(ConversationKey::for_client("c1"));
        let other = Thread::Conversation(ConversationKey::for_client("c2"));
        let mut sub = bus.subscribe(Scope::Thread(mine.clone()), "agent");
        let mut all = bus.subscribe(Scope::All, "index");

        bus.publish(event("c2", other, "elsewhere"));
        bus.publish(event("c1", mine, "here"));

        assert_eq!(sub.try_recv().map(|e| e.message.content), Some("here".into()));
        assert!(sub.try_recv().is_none());
        assert_eq!(all.try_recv().map(|e| e.message.content), Some("elsewhere".into()));
        assert_eq!(all.try_recv().map(|e| e.message.content), Some("here".into()));
    }

    #[test]
    fn drop_and_unsubscribe_release_receivers() {
        let bus = FanoutBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);

        let mut a = bus.subscribe(Scope::All, "a");
        let b = bus.subscribe(Scope::All, "b");
        assert_eq!(bus.subscriber_count(), 2);

        a.unsubscribe();
        assert_eq!(a.state(), SubscriptionState::Unsubscribed);
        assert_eq!(bus.subscriber_count(), 1);

        drop(b);
        assert_eq!(bus.subscriber_count(), 0);

        a.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_faults_subscriptions() {
        let bus = FanoutBus::new(16);
        let mut sub = bus.subscribe(Scope::All, "viewer");
        assert_eq!(sub.state(), SubscriptionState::Subscribed);

        bus.disconnect();
        assert!(sub.recv().await.is_none());
        assert_eq!(sub.state(), SubscriptionState::Faulted);

        let thread = Thread::Session(Uuid::new_v4());
        assert_eq!(bus.publish(event("writer", thread.clone(), "lost")), 0);

        bus.reconnect();
        let mut fresh = bus.subscribe(Scope::All, "viewer");
        bus.publish(event("writer", thread, "back"));
        assert_eq!(fresh.try_recv().map(|e| e.message.content), Some("back".into()));
    }

    #[test]
    fn subscribe_while_disconnected_is_faulted() {
        let bus = FanoutBus::new(4);
        bus.disconnect();
        let sub = bus.subscribe(Scope::All, "late");
        assert_eq!(sub.state(), SubscriptionState::Faulted);
        assert!(!bus.is_connected());
    }

    #[test]
    fn lagging_subscriber_keeps_receiving() {
        let bus = FanoutBus::new(2);
        let thread = Thread::Session(Uuid::new_v4());
        let mut slow = bus.subscribe(Scope::All, "slow");

        for i in 0..5 {
            bus.publish(event("writer", thread.clone(), &format!("m{i}")));
        }

        let first = slow.try_recv().expect("event after lag");
        assert_eq!(first.message.content, "m3");
        assert_eq!(slow.state(), SubscriptionState::Subscribed);
    }
}
