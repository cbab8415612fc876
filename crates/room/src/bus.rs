//! The room: registry + history + fan-out behind one lock.
//!
//! Critical sections never await. Delivery is `try_send` on each
//! connection's bounded queue; a full queue drops that one event for that
//! one consumer, a closed queue is skipped.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use chrono::{DateTime, Utc};
use parley_core::error::RoomError;
use parley_core::event::{AgentEvent, AgentEventType, RoomSnapshot, ServerEvent};
use parley_core::message::Message;
use parley_core::participant::{ConnectionId, Participant};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use crate::history::{HistoryQuery, HistoryRing};
use crate::network::InteractionGraph;
use crate::registry::{Registry, Roster};

/// Messages included in every agent snapshot.
const SNAPSHOT_MESSAGES: usize = 10;

#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub history_capacity: usize,
    pub join_history: usize,
    pub outbound_buffer: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self::from(&parley_config::RoomConfig::default())
    }
}

impl From<&parley_config::RoomConfig> for RoomSettings {
    fn from(config: &parley_config::RoomConfig) -> Self {
        Self {
            history_capacity: config.history_capacity,
            join_history: config.join_history,
            outbound_buffer: config.outbound_buffer,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomStats {
    pub session_id: String,
    pub humans: usize,
    pub agents: usize,
    pub connections: usize,
    pub history_len: usize,
    pub history_capacity: usize,
    pub published: u64,
    pub dropped: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
}

struct Inner {
    registry: Registry,
    history: HistoryRing,
    outbound: HashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
    last_activity: Option<DateTime<Utc>>,
    published: u64,
    dropped: u64,
}

impl Inner {
    fn snapshot(&self) -> RoomSnapshot {
        let (total_humans, total_agents) = self.registry.counts();
        RoomSnapshot {
            total_humans,
            total_agents,
            last_messages: self.history.recent(SNAPSHOT_MESSAGES),
        }
    }

    /// Append to history and fan out. Caller holds the lock.
    fn publish(&mut self, sender: Option<&ConnectionId>, message: Message) -> usize {
        self.history.push(message.clone());
        self.last_activity = Some(message.created_at);
        self.published += 1;

        let mut delivered = 0;
        let frame = ServerEvent::Message(message.clone());
        for (id, tx) in &self.outbound {
            if deliver(tx, id, frame.clone(), &mut self.dropped) {
                delivered += 1;
            }
        }

        if let Some(event_type) = AgentEventType::for_kind(message.kind) {
            let event = AgentEvent {
                event_type,
                message,
                snapshot: self.snapshot(),
            };
            let skip_sender = event_type == AgentEventType::AgentData;
            for agent in self.registry.agents() {
                if skip_sender && Some(&agent.id) == sender {
                    continue;
                }
                if let Some(tx) = self.outbound.get(&agent.id) {
                    deliver(tx, &agent.id, ServerEvent::AgentEvent(event.clone()), &mut self.dropped);
                }
            }
        }

        delivered
    }
}

fn deliver(
    tx: &mpsc::Sender<ServerEvent>,
    id: &ConnectionId,
    event: ServerEvent,
    dropped: &mut u64,
) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            *dropped += 1;
            warn!(connection = %id, "Outbound queue full, dropping event");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// The authoritative in-memory chat state for one process.
pub struct Room {
    inner: Mutex<Inner>,
    settings: RoomSettings,
    session_id: String,
    started_at: DateTime<Utc>,
}

impl Room {
    pub fn new(settings: RoomSettings) -> Self {
        Self {
            inner: Mutex::new(Inner {
                registry: Registry::new(),
                history: HistoryRing::new(settings.history_capacity),
                outbound: HashMap::new(),
                last_activity: None,
                published: 0,
                dropped: 0,
            }),
            settings,
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
        }
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// One conversation id per process lifetime.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    // ── Connections ───────────────────────────────────────────

    /// Open an outbound queue for a connection. Reconnecting the same id
    /// replaces the old queue.
    pub fn connect(&self, id: &ConnectionId) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(self.settings.outbound_buffer);
        self.state().outbound.insert(id.clone(), tx);
        debug!(connection = %id, "Connection opened");
        rx
    }

    /// Unregister (emitting Leave) and close the outbound queue.
    pub fn disconnect(&self, id: &ConnectionId) -> Option<Participant> {
        let mut state = self.state();
        let removed = state.registry.unregister(id);
        state.outbound.remove(id);
        if let Some(p) = &removed {
            state.publish(None, Message::leave(&p.display_name));
            info!(connection = %id, name = %p.display_name, "Participant disconnected");
        }
        removed
    }

    /// Push a frame to one connection only (acks, errors).
    pub fn send_to(&self, id: &ConnectionId, event: ServerEvent) -> bool {
        let mut state = self.state();
        let state = &mut *state;
        match state.outbound.get(id) {
            Some(tx) => deliver(tx, id, event, &mut state.dropped),
            None => false,
        }
    }

    // ── Registry ──────────────────────────────────────────────

    /// Register a participant, rejecting display names held by another
    /// live connection. On first registration a Join message is published.
    /// Returns the recent history to replay to the new participant.
    pub fn register(&self, participant: Participant) -> Result<Vec<Message>, RoomError> {
        let mut state = self.state();
        if state.registry.is_name_taken(&participant.display_name, Some(&participant.id)) {
            return Err(RoomError::NameTaken {
                suggestion: state.registry.suggest_name(&participant.display_name),
                name: participant.display_name,
            });
        }

        let history = state.history.recent(self.settings.join_history);
        let name = participant.display_name.clone();
        let id = participant.id.clone();
        let kind = participant.kind;
        let previous = state.registry.register(participant);

        match previous {
            None => {
                state.publish(Some(&id), Message::join(&name));
                info!(connection = %id, name = %name, kind = ?kind, "Participant registered");
            }
            Some(old) if old.display_name != name => {
                debug!(connection = %id, from = %old.display_name, to = %name, "Participant renamed");
            }
            Some(_) => {}
        }

        Ok(history)
    }

    /// Remove the participant but keep its connection open.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Participant> {
        let mut state = self.state();
        let removed = state.registry.unregister(id);
        if let Some(p) = &removed {
            state.publish(None, Message::leave(&p.display_name));
        }
        removed
    }

    pub fn participant(&self, id: &ConnectionId) -> Option<Participant> {
        self.state().registry.get(id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Participant> {
        self.state().registry.find_by_name(name).cloned()
    }

    pub fn list(&self) -> Roster {
        self.state().registry.list()
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.state()
            .registry
            .agents()
            .map(|p| p.display_name.clone())
            .collect()
    }

    pub fn counts(&self) -> (usize, usize) {
        self.state().registry.counts()
    }

    /// Flip the participant's observe flag, returning the new value.
    pub fn toggle_observe(&self, id: &ConnectionId) -> Option<bool> {
        let mut state = self.state();
        let p = state.registry.get_mut(id)?;
        p.observe_me = !p.observe_me;
        Some(p.observe_me)
    }

    // ── Messages ──────────────────────────────────────────────

    /// Record a message and deliver it to every live connection. Agents
    /// also receive an agent event, except the sender of agent data.
    /// Returns how many connections accepted the message frame.
    pub fn publish(&self, sender: Option<&ConnectionId>, message: Message) -> usize {
        debug!(kind = ?message.kind, sender = %message.sender_name, "Publishing message");
        self.state().publish(sender, message)
    }

    /// Directed agent data: delivered to the agents whose connection id
    /// matches a target (display names are accepted too), or to every
    /// other agent when `targets` is empty. Not recorded in history.
    pub fn deliver_to(&self, sender: &ConnectionId, targets: &[String], message: Message) -> usize {
        let mut state = self.state();
        let state = &mut *state;
        let recipients: Vec<ConnectionId> = state
            .registry
            .agents()
            .filter(|a| &a.id != sender)
            .filter(|a| {
                targets.is_empty()
                    || targets
                        .iter()
                        .any(|t| *t == a.id.0 || t.eq_ignore_ascii_case(&a.display_name))
            })
            .map(|a| a.id.clone())
            .collect();

        let mut delivered = 0;
        for id in &recipients {
            if let Some(tx) = state.outbound.get(id) {
                if deliver(tx, id, ServerEvent::AgentData(message.clone()), &mut state.dropped) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// The `n` most recent messages of any kind, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Message> {
        self.state().history.recent(n)
    }

    pub fn query_history(&self, query: &HistoryQuery) -> Vec<Message> {
        self.state().history.query(query)
    }

    pub fn history_len(&self) -> usize {
        self.state().history.len()
    }

    /// Conversational messages only, most recent last.
    pub fn conversation(&self, limit: usize) -> Vec<Message> {
        self.query_history(&HistoryQuery::last(limit))
    }

    pub fn has_conversation(&self) -> bool {
        self.state().history.iter().any(|m| m.kind.is_conversational())
    }

    /// Timestamp of the most recently published message.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.state().last_activity
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        self.state().snapshot()
    }

    pub fn interaction_graph(&self) -> InteractionGraph {
        let state = self.state();
        let roster = state.registry.list();
        let present: Vec<String> = roster
            .humans
            .into_iter()
            .chain(roster.agents)
            .map(|p| p.display_name)
            .collect();
        InteractionGraph::build(state.history.iter(), &present)
    }

    pub fn stats(&self) -> RoomStats {
        let state = self.state();
        let (humans, agents) = state.registry.counts();
        RoomStats {
            session_id: self.session_id.clone(),
            humans,
            agents,
            connections: state.outbound.len(),
            history_len: state.history.len(),
            history_capacity: state.history.capacity(),
            published: state.published,
            dropped: state.dropped,
            last_activity: state.last_activity,
            started_at: self.started_at,
        }
    }
}

impl Default for Room {
    fn default() -> Self {
        Self::new(RoomSettings::default())
    }
}
