//! Integration tests for live agent/client chat and the conversation index.

use std::sync::Arc;
use std::time::Duration;

use docdesk_core::bus::FanoutBus;
use docdesk_core::live::{AgentInbox, ClientChat, LiveView, open_live_view};
use docdesk_core::models::{
    ConversationKey, Identity, Message, MessageRole, ParticipantRole, Profile, Thread,
};
use docdesk_core::{ChatStore, Database, Error};
use uuid::Uuid;

fn temp_db_path() -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("docdesk-test-{}.db", Uuid::new_v4()));
    path
}

async fn open_store() -> ChatStore {
    let db = Database::open(&temp_db_path()).await.expect("open db");
    ChatStore::new(Arc::new(db), FanoutBus::new(64))
}

async fn open_client(store: &ChatStore, id: &str) -> ClientChat {
    match open_live_view(store, &Identity::client(id)).await.expect("open") {
        LiveView::Client(chat) => chat,
        LiveView::Admin(_) => panic!("client identity opened the inbox"),
    }
}

async fn open_inbox(store: &ChatStore, id: &str) -> AgentInbox {
    match open_live_view(store, &Identity::admin(id)).await.expect("open") {
        LiveView::Admin(inbox) => inbox,
        LiveView::Client(_) => panic!("admin identity opened a client chat"),
    }
}

async fn add_profile(store: &ChatStore, id: &str, name: &str, email: &str) {
    store
        .upsert_profile(&Profile {
            id: id.to_string(),
            display_name: Some(name.to_string()),
            email: Some(email.to_string()),
            role: ParticipantRole::Client,
        })
        .await
        .expect("profile");
}

#[tokio::test]
async fn role_decides_the_view() {
    let store = open_store().await;
    assert!(matches!(
        open_live_view(&store, &Identity::client("c1")).await,
        Ok(LiveView::Client(_))
    ));
    assert!(matches!(
        open_live_view(&store, &Identity::admin("a1")).await,
        Ok(LiveView::Admin(_))
    ));
    assert!(matches!(
        open_live_view(&store, &Identity::client(" ")).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn client_message_reaches_agent_and_reply_reaches_client() {
    let store = open_store().await;
    add_profile(&store, "alice", "Alice Smith", "alice@example.com").await;

    let mut client = open_client(&store, "alice").await;
    let mut inbox = open_inbox(&store, "agent-1").await;
    assert!(inbox.index().is_empty());

    client.send("My export is stuck").await.expect("client send");
    assert_eq!(client.messages().len(), 1);

    assert_eq!(inbox.pump().await, 1);
    let rows = inbox.index().rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].display_name, "Alice Smith");
    assert_eq!(rows[0].last_message, "My export is stuck");

    inbox.select(ConversationKey::for_client("alice")).await;
    assert_eq!(inbox.messages().len(), 1);

    inbox.reply("Looking into it now").await.expect("agent reply");
    assert_eq!(inbox.index().rows()[0].last_message, "Looking into it now");

    let received = tokio::time::timeout(Duration::from_secs(2), client.next_message())
        .await
        .expect("delivered")
        .expect("message");
    assert_eq!(received.role, MessageRole::Agent);
    assert_eq!(received.sender_id.as_deref(), Some("agent-1"));
    assert_eq!(client.messages().len(), 2);

    // The client's own send was not echoed back.
    assert_eq!(client.pump(), 0);

    let stored = store
        .conversation_messages(&ConversationKey::for_client("alice"))
        .await
        .expect("load");
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn user_messages_must_come_from_the_key_owner() {
    let store = open_store().await;
    let key = ConversationKey::for_client("alice");

    let forged = Message::new(Thread::Conversation(key.clone()), MessageRole::User, "hi")
        .with_sender("mallory");
    let result = store.post_conversation_message(&forged, "mallory").await;
    assert!(matches!(result, Err(Error::Validation(_))));

    let agent = Message::new(Thread::Conversation(key.clone()), MessageRole::Agent, "hello")
        .with_sender("agent-1");
    store
        .post_conversation_message(&agent, "agent-1")
        .await
        .expect("agents may post anywhere");

    assert_eq!(store.conversation_messages(&key).await.expect("load").len(), 1);
}

#[tokio::test]
async fn reply_requires_selection() {
    let store = open_store().await;
    let mut inbox = open_inbox(&store, "agent-1").await;

    let result = inbox.reply("hello?").await;
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[tokio::test]
async fn inbox_only_merges_selected_conversation() {
    let store = open_store().await;
    let mut alice = open_client(&store, "alice").await;
    let mut bob = open_client(&store, "bob").await;
    let mut inbox = open_inbox(&store, "agent-1").await;

    alice.send("alice first").await.expect("send");
    inbox.pump().await;
    inbox.select(ConversationKey::for_client("alice")).await;

    bob.send("bob here").await.expect("send");
    alice.send("alice again").await.expect("send");
    assert_eq!(inbox.pump().await, 2);

    let contents: Vec<_> = inbox.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["alice first", "alice again"]);
    assert_eq!(inbox.index().len(), 2);
    // Newest activity first.
    assert_eq!(inbox.index().rows()[0].key.as_str(), "alice");
}

#[tokio::test]
async fn repeated_text_reaches_the_other_side_every_time() {
    let store = open_store().await;
    let key = ConversationKey::for_client("alice");
    let mut client = open_client(&store, "alice").await;
    let mut inbox = open_inbox(&store, "agent-1").await;

    client.send("yes").await.expect("send");
    assert_eq!(inbox.pump().await, 1);
    inbox.select(key.clone()).await;
    assert_eq!(inbox.messages().len(), 1);

    client.send("yes").await.expect("send");
    assert_eq!(inbox.pump().await, 1);
    let stored = store.conversation_messages(&key).await.expect("load").len();
    assert_eq!(stored, 2);
    assert_eq!(inbox.messages().len(), stored);

    inbox.reply("ok").await.expect("reply");
    inbox.reply("ok").await.expect("reply");
    assert_eq!(client.pump(), 2);
    let agent_turns = client
        .messages()
        .iter()
        .filter(|m| m.role == MessageRole::Agent && m.content == "ok")
        .count();
    assert_eq!(agent_turns, 2);
    assert_eq!(client.messages().len(), 4);
}

#[tokio::test]
async fn select_does_not_double_count_queued_inserts() {
    let store = open_store().await;
    let key = ConversationKey::for_client("alice");
    let mut client = open_client(&store, "alice").await;
    let mut inbox = open_inbox(&store, "agent-1").await;

    client.send("first").await.expect("send");
    client.send("second").await.expect("send");
    // Not pumped yet: both inserts are still queued when the thread loads.
    inbox.select(key).await;
    assert_eq!(inbox.messages().len(), 2);
    assert_eq!(inbox.pump().await, 0);
    assert_eq!(inbox.messages().len(), 2);
    assert_eq!(inbox.index().len(), 1);
}

#[tokio::test]
async fn index_filter_matches_name_and_email() {
    let store = open_store().await;
    add_profile(&store, "alice", "Alice Smith", "alice@acme.io").await;
    add_profile(&store, "bob", "Bob Jones", "bob@globex.com").await;

    let mut alice = open_client(&store, "alice").await;
    let mut bob = open_client(&store, "bob").await;
    let mut carol = open_client(&store, "carol").await;
    alice.send("a").await.expect("send");
    bob.send("b").await.expect("send");
    carol.send("c").await.expect("send");

    let mut inbox = open_inbox(&store, "agent-1").await;
    assert_eq!(inbox.index().len(), 3);

    let by_name: Vec<_> = inbox.filter("JONES").iter().map(|r| r.key.to_string()).collect();
    assert_eq!(by_name, vec!["bob"]);

    let by_email: Vec<_> = inbox.filter("acme").iter().map(|r| r.key.to_string()).collect();
    assert_eq!(by_email, vec!["alice"]);

    // No profile: the client id stands in for the name.
    let fallback: Vec<_> = inbox.filter("carol").iter().map(|r| r.key.to_string()).collect();
    assert_eq!(fallback, vec!["carol"]);

    inbox.refresh_index().await;
    assert_eq!(inbox.filter("").len(), 3);
}

#[tokio::test]
async fn live_views_release_subscriptions() {
    let store = open_store().await;
    {
        let _client = open_client(&store, "alice").await;
        let mut inbox = open_inbox(&store, "agent-1").await;
        assert_eq!(store.bus().subscriber_count(), 2);
        inbox.teardown();
        assert_eq!(store.bus().subscriber_count(), 1);
    }
    assert_eq!(store.bus().subscriber_count(), 0);
}
