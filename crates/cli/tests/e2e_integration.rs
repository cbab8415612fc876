//! End-to-end tests for a Parley room: people, in-process agents, the
//! context store and the decision pipeline wired together.

use std::sync::Arc;
use std::time::Duration;

use parley_agent::test_helpers::{SequentialMockProvider, gate_json, tool_json};
use parley_agent::{AgentHandle, AgentProfile, AgentRunner, DecisionEngine};
use parley_context::{ContextClient, InMemoryContextProvider};
use parley_core::event::ServerEvent;
use parley_core::message::{Message, MessageKind};
use parley_core::participant::{ConnectionId, Participant};
use parley_room::{HistoryQuery, Room, RoomSettings};
use tokio::sync::mpsc;

// ── Harness ──────────────────────────────────────────────────────────────

struct World {
    room: Arc<Room>,
    store: Arc<InMemoryContextProvider>,
    context: Arc<ContextClient>,
}

impl World {
    fn new() -> Self {
        let store = Arc::new(InMemoryContextProvider::new());
        Self {
            room: Arc::new(Room::new(RoomSettings::default())),
            context: Arc::new(ContextClient::new(store.clone())),
            store,
        }
    }

    async fn agent(&self, name: &str, provider: Arc<SequentialMockProvider>) -> AgentHandle {
        let engine = DecisionEngine::new(
            AgentProfile::new(name, "mock-model"),
            provider,
            self.context.clone(),
            self.room.clone(),
        );
        AgentRunner::new(engine).start().await.unwrap()
    }

    fn human(&self, name: &str) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let id = ConnectionId::from(name);
        let rx = self.room.connect(&id);
        self.room.register(Participant::human(id.clone(), name)).unwrap();
        (id, rx)
    }
}

async fn wait_for_message(rx: &mut mpsc::Receiver<ServerEvent>, from: &str) -> Message {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("closed");
        if let ServerEvent::Message(m) = event {
            if m.sender_name == from {
                return m;
            }
        }
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn mention_of_absent_agent_gets_no_reply() {
    let world = World::new();
    let (alice, _rx) = world.human("Alice");
    let provider = Arc::new(SequentialMockProvider::texts(Vec::<String>::new()));
    let _bot1 = world.agent("Bot1", provider.clone()).await;

    world.room.publish(Some(&alice), Message::chat("Alice", "hi @Bot2"));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(provider.call_count(), 0);
    assert!(world.room.conversation(10).iter().all(|m| m.sender_name != "Bot1"));
}

#[tokio::test]
async fn agent_reply_carries_trace_and_is_persisted() {
    let world = World::new();
    let (alice, mut rx) = world.human("alice");
    let provider = Arc::new(SequentialMockProvider::texts([
        gate_json(true, 0.92),
        tool_json("search"),
        tool_json("respond"),
        "Tuesday works for everyone so far.".to_string(),
    ]));
    let _bot = world.agent("HelperBot", provider.clone()).await;

    world.room.publish(Some(&alice), Message::chat("alice", "HelperBot, which day works?"));
    let reply = wait_for_message(&mut rx, "HelperBot").await;

    assert_eq!(reply.kind, MessageKind::Chat);
    assert_eq!(reply.content, "Tuesday works for everyone so far.");
    let stages: Vec<&str> = reply
        .attributes
        .agent_decisions
        .iter()
        .map(|s| s.stage.as_str())
        .collect();
    assert_eq!(
        stages,
        vec!["gating", "tool_selecting", "tool_executing", "tool_selecting", "synthesizing", "emitted"]
    );
    assert_eq!(provider.call_count(), 4);

    // persistence follows the publish
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stored = world.store.messages(world.room.session_id()).await;
    let persisted = stored.iter().find(|m| m.peer == "HelperBot").unwrap();
    assert_eq!(persisted.content, reply.content);
    assert!(persisted.metadata.contains_key("agent_decisions"));
}

#[tokio::test]
async fn only_the_named_agent_answers() {
    let world = World::new();
    let (alice, mut rx) = world.human("alice");
    let helper = Arc::new(SequentialMockProvider::texts([
        gate_json(true, 0.9),
        tool_json("respond"),
        "On it!".to_string(),
    ]));
    let search = Arc::new(SequentialMockProvider::texts(Vec::<String>::new()));
    let _helper = world.agent("HelperBot", helper.clone()).await;
    let _search = world.agent("SearchBot", search.clone()).await;

    world.room.publish(Some(&alice), Message::chat("alice", "@HelperBot can you summarize?"));
    let reply = wait_for_message(&mut rx, "HelperBot").await;
    assert_eq!(reply.content, "On it!");

    // SearchBot may see HelperBot's reply too; it names no agent but the
    // empty script turns any model call into a suppression.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(world.room.conversation(20).iter().all(|m| m.sender_name != "SearchBot"));
}

#[tokio::test]
async fn low_confidence_means_silence() {
    let world = World::new();
    let (alice, _rx) = world.human("alice");
    let provider = Arc::new(SequentialMockProvider::texts([gate_json(true, 0.4)]));
    let _bot = world.agent("HelperBot", provider.clone()).await;

    world.room.publish(Some(&alice), Message::chat("alice", "nice weather"));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(provider.call_count(), 1);
    assert!(world.room.conversation(10).iter().all(|m| m.sender_name != "HelperBot"));
}

#[tokio::test]
async fn history_page_after_busy_room() {
    let world = World::new();
    let (alice, _rx) = world.human("alice");
    for i in 0..20 {
        world.room.publish(Some(&alice), Message::chat("alice", format!("chat {i}")));
    }
    let (bob, _bob_rx) = world.human("bob");
    world.room.disconnect(&bob);
    world.room.publish(None, Message::join("carol"));

    let page = world.room.query_history(&HistoryQuery::last(5));
    assert_eq!(page.len(), 5);
    assert!(page.iter().all(|m| m.kind == MessageKind::Chat));
    assert_eq!(page.first().unwrap().content, "chat 15");
    assert_eq!(page.last().unwrap().content, "chat 19");
}

#[tokio::test]
async fn full_ring_keeps_newest_thousand() {
    let world = World::new();
    let (alice, _rx) = world.human("alice");
    // the join already occupies one slot
    for i in 0..999 {
        world.room.publish(Some(&alice), Message::chat("alice", format!("m{i}")));
    }
    assert_eq!(world.room.history_len(), 1000);

    world.room.publish(Some(&alice), Message::chat("alice", "newest"));
    assert_eq!(world.room.history_len(), 1000);
    let all = world.room.recent(1000);
    assert!(all.iter().all(|m| m.kind != MessageKind::Join));
    assert_eq!(all.last().unwrap().content, "newest");
}
