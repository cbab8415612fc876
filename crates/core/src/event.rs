//! Outbound room events.
//!
//! [`ServerEvent`] is everything the room pushes to a connection. It is
//! serialized as `{"event": <name>, "data": {...}}`, the same envelope
//! clients use for inbound frames.

use serde::{Deserialize, Serialize};
use crate::message::{Message, MessageKind};
use crate::participant::Participant;

/// Why an agent is being notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventType {
    ChatMessage,
    AgentData,
    UserJoined,
    UserLeft,
    AgentResponse,
}

impl AgentEventType {
    /// Map a published message to the agent notification it triggers.
    pub fn for_kind(kind: MessageKind) -> Option<Self> {
        match kind {
            MessageKind::Chat => Some(Self::ChatMessage),
            MessageKind::AgentData => Some(Self::AgentData),
            MessageKind::Join => Some(Self::UserJoined),
            MessageKind::Leave => Some(Self::UserLeft),
            MessageKind::AgentReply => Some(Self::AgentResponse),
            MessageKind::System => None,
        }
    }
}

/// Room state at the moment a message was published.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub total_humans: usize,
    pub total_agents: usize,
    /// Up to the ten most recent messages, oldest first
    pub last_messages: Vec<Message>,
}

/// Notification delivered to agent participants only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub event_type: AgentEventType,
    pub message: Message,
    pub snapshot: RoomSnapshot,
}

/// A frame pushed from the room to one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A message was published to the room
    Message(Message),

    AgentEvent(AgentEvent),

    /// Directed agent data, not recorded in history
    AgentData(Message),

    Registered {
        session_id: String,
        participant: Participant,
        history: Vec<Message>,
    },

    RegistrationRejected {
        reason: String,
        suggestion: String,
    },

    /// Reply to a frame that carried an `ack` id
    Ack {
        id: u64,
        result: serde_json::Value,
    },

    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }

    pub fn ack(id: u64, result: serde_json::Value) -> Self {
        Self::Ack { id, result }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
