//! Client → server frames.
//!
//! Every frame is `{"event": <name>, "data": {...}, "ack": <id>?}`. The
//! envelope is parsed first; the payload is decoded per event so a bad
//! payload can be reported with the event it belongs to.

use chrono::{DateTime, Utc};
use parley_core::error::RoomError;
use parley_core::message::MessageKind;
use parley_core::participant::ParticipantKind;
use serde::Deserialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    ack: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterPayload {
    pub username: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: ParticipantKind,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

fn default_kind() -> ParticipantKind {
    ParticipantKind::Human
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatPayload {
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentDataPayload {
    #[serde(default)]
    pub content: String,
    pub data_type: String,
    #[serde(default)]
    pub processed_data: serde_json::Value,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentResponsePayload {
    pub response: String,
    #[serde(default)]
    pub response_type: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub referenced_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryPayload {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

fn default_history_limit() -> usize {
    50
}

impl HistoryPayload {
    pub fn kind(&self) -> Result<Option<MessageKind>, RoomError> {
        self.message_type
            .as_deref()
            .map(|t| t.parse().map_err(RoomError::InvalidFrame))
            .transpose()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DialecticPayload {
    pub user: String,
    pub query: String,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Register(RegisterPayload),
    Chat(ChatPayload),
    AgentData(AgentDataPayload),
    AgentResponse(AgentResponsePayload),
    GetHistory(HistoryPayload),
    GetUsers,
    Dialectic(DialecticPayload),
    ToggleObserve,
    Disconnect,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::Chat(_) => "chat",
            Self::AgentData(_) => "agent_data",
            Self::AgentResponse(_) => "agent_response",
            Self::GetHistory(_) => "get_history",
            Self::GetUsers => "get_users",
            Self::Dialectic(_) => "dialectic",
            Self::ToggleObserve => "toggle_observe",
            Self::Disconnect => "disconnect",
        }
    }
}

/// A decoded frame plus its optional correlation id.
#[derive(Debug, Clone)]
pub struct ClientFrame {
    pub event: ClientEvent,
    pub ack: Option<u64>,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, RoomError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| RoomError::InvalidFrame(e.to_string()))?;
        let data = envelope.data;

        let event = match envelope.event.as_str() {
            "register" => ClientEvent::Register(payload("register", data)?),
            "chat" => ClientEvent::Chat(payload("chat", data)?),
            "agent_data" => ClientEvent::AgentData(payload("agent_data", data)?),
            "agent_response" => ClientEvent::AgentResponse(payload("agent_response", data)?),
            "get_history" => ClientEvent::GetHistory(payload(
                "get_history",
                if data.is_null() { serde_json::json!({}) } else { data },
            )?),
            "get_users" => ClientEvent::GetUsers,
            "dialectic" => ClientEvent::Dialectic(payload("dialectic", data)?),
            "toggle_observe" => ClientEvent::ToggleObserve,
            "disconnect" => ClientEvent::Disconnect,
            other => return Err(RoomError::InvalidFrame(format!("unknown event: {other}"))),
        };

        Ok(Self { event, ack: envelope.ack })
    }
}

fn payload<T: DeserializeOwned>(event: &str, data: serde_json::Value) -> Result<T, RoomError> {
    serde_json::from_value(data).map_err(|e| RoomError::InvalidFrame(format!("invalid {event} payload: {e}")))
}
