//! Proactive speech: a per-agent timer that offers the agent a chance to
//! talk when the room has gone quiet.
//!
//! Silence is wall-clock time since the room last published anything, so
//! the agent's own proactive message restarts the clock.

use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};
use crate::engine::{DecisionEngine, Outcome};

/// Why a tick did not reach the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    NoHumans,
    NoConversation,
    RecentActivity,
}

pub struct ProactiveScheduler {
    engine: Arc<DecisionEngine>,
    interval: Duration,
}

impl ProactiveScheduler {
    pub fn new(engine: Arc<DecisionEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval: interval.max(Duration::from_millis(100)),
        }
    }

    /// Start ticking. Abort the handle to stop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                agent = %self.engine.profile().name,
                interval_secs = self.interval.as_secs(),
                "Proactive scheduler started"
            );

            loop {
                ticker.tick().await;
                if let Err(skip) = self.check(Utc::now()) {
                    debug!(agent = %self.engine.profile().name, skip = ?skip, "Proactive tick skipped");
                    continue;
                }
                if let Outcome::Emitted(message) = self.engine.speak_up().await {
                    debug!(agent = %self.engine.profile().name, message_id = %message.id, "Spoke up");
                }
            }
        })
    }

    fn check(&self, now: DateTime<Utc>) -> Result<(), Skip> {
        let room = self.engine.room();
        if room.counts().0 == 0 {
            return Err(Skip::NoHumans);
        }
        if !room.has_conversation() {
            return Err(Skip::NoConversation);
        }

        // A clock step backwards reads as no silence at all.
        let quiet_for = room
            .last_activity()
            .and_then(|last| (now - last).to_std().ok())
            .unwrap_or_default();
        if quiet_for < self.interval {
            return Err(Skip::RecentActivity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AgentProfile;
    use crate::test_helpers::{SequentialMockProvider, gate_json};
    use parley_context::{ContextClient, InMemoryContextProvider};
    use parley_core::message::Message;
    use parley_core::participant::{ConnectionId, Participant};
    use parley_room::{Room, RoomSettings};

    fn engine(room: Arc<Room>, provider: Arc<SequentialMockProvider>) -> Arc<DecisionEngine> {
        let context = Arc::new(ContextClient::new(Arc::new(InMemoryContextProvider::new())));
        Arc::new(DecisionEngine::new(
            AgentProfile::new("HelperBot", "mock-model"),
            provider,
            context,
            room,
        ))
    }

    fn room_with_alice() -> (Arc<Room>, ConnectionId) {
        let room = Arc::new(Room::new(RoomSettings::default()));
        let alice = ConnectionId::from("alice");
        let _ = room.connect(&alice);
        room.register(Participant::human(alice.clone(), "alice")).unwrap();
        (room, alice)
    }

    fn scheduler(room: Arc<Room>, interval_secs: u64) -> ProactiveScheduler {
        let provider = Arc::new(SequentialMockProvider::texts(Vec::<String>::new()));
        ProactiveScheduler::new(engine(room, provider), Duration::from_secs(interval_secs))
    }

    #[test]
    fn silence_is_measured_from_last_activity() {
        let (room, alice) = room_with_alice();
        room.publish(Some(&alice), Message::chat("alice", "anyone around?"));
        let last = room.last_activity().unwrap();
        let s = scheduler(room.clone(), 30);

        assert_eq!(s.check(last + chrono::Duration::seconds(10)), Err(Skip::RecentActivity));
        assert_eq!(s.check(last + chrono::Duration::seconds(30)), Ok(()));
        // clock skew never counts as silence
        assert_eq!(s.check(last - chrono::Duration::seconds(5)), Err(Skip::RecentActivity));

        room.publish(Some(&alice), Message::chat("alice", "hello?"));
        let newer = room.last_activity().unwrap();
        assert_eq!(s.check(newer + chrono::Duration::seconds(10)), Err(Skip::RecentActivity));
    }

    #[test]
    fn presence_alone_is_not_a_conversation() {
        let (room, _alice) = room_with_alice();
        let s = scheduler(room.clone(), 30);
        let later = room.last_activity().unwrap() + chrono::Duration::seconds(120);
        assert_eq!(s.check(later), Err(Skip::NoConversation));
    }

    #[test]
    fn no_humans_no_speech() {
        let room = Arc::new(Room::new(RoomSettings::default()));
        room.publish(None, Message::chat("ghost", "boo"));
        let s = scheduler(room.clone(), 30);
        let later = room.last_activity().unwrap() + chrono::Duration::seconds(120);
        assert_eq!(s.check(later), Err(Skip::NoHumans));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_room_never_calls_the_model() {
        let room = Arc::new(Room::new(RoomSettings::default()));
        let provider = Arc::new(SequentialMockProvider::texts(Vec::<String>::new()));
        let handle = ProactiveScheduler::new(engine(room, provider.clone()), Duration::from_secs(30)).spawn();

        tokio::time::sleep(Duration::from_secs(200)).await;

        assert_eq!(provider.call_count(), 0);
        handle.abort();
    }

    #[tokio::test]
    async fn quiet_room_gets_one_proactive_message() {
        let (room, alice) = room_with_alice();
        room.publish(Some(&alice), Message::chat("alice", "anyone know a good pasta recipe?"));

        // Later ticks find the script exhausted and fail the gate, so only
        // one reply can ever be published.
        let provider = Arc::new(SequentialMockProvider::texts([
            gate_json(true, 0.9),
            "Try cacio e pepe!".to_string(),
        ]));
        let handle =
            ProactiveScheduler::new(engine(room.clone(), provider.clone()), Duration::from_millis(100)).spawn();

        tokio::time::sleep(Duration::from_millis(450)).await;
        handle.abort();

        assert!(provider.call_count() >= 2);
        let replies: Vec<Message> = room
            .conversation(10)
            .into_iter()
            .filter(|m| m.sender_name == "HelperBot")
            .collect();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].content, "Try cacio e pepe!");
    }
}
