//! Message domain types.
//!
//! Every event that flows through a room is a [`Message`]: chat lines,
//! join/leave notices, agent data and agent replies. Messages are immutable
//! once built; the bus, the history ring and every connection share clones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sender name used for room-generated messages.
pub const SYSTEM_SENDER: &str = "system";

/// What kind of event a message represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Chat,
    AgentData,
    System,
    Join,
    Leave,
    AgentReply,
}

impl MessageKind {
    /// Presence and system notices are not part of the conversation.
    pub fn is_conversational(self) -> bool {
        !matches!(self, Self::System | Self::Join | Self::Leave)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::AgentData => "agent_data",
            Self::System => "system",
            Self::Join => "join",
            Self::Leave => "leave",
            Self::AgentReply => "agent_reply",
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "agent_data" => Ok(Self::AgentData),
            "system" => Ok(Self::System),
            "join" => Ok(Self::Join),
            "leave" => Ok(Self::Leave),
            "agent_reply" | "agent_response" => Ok(Self::AgentReply),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// One step of an agent's decision pipeline, attached to its reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionStep {
    pub stage: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub timestamp: DateTime<Utc>,
}

impl DecisionStep {
    pub fn new(stage: impl Into<String>, outcome: impl Into<String>, confidence: Option<f32>) -> Self {
        Self {
            stage: stage.into(),
            outcome: outcome.into(),
            confidence,
            timestamp: Utc::now(),
        }
    }
}

/// Typed optional attributes carried by a message.
///
/// Known fields are first-class; client-supplied chat metadata lands in
/// `metadata` and is passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agent_decisions: Vec<DecisionStep>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_data: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_message: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Attributes {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A single room event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID (UUID v4)
    pub id: String,

    #[serde(rename = "type")]
    pub kind: MessageKind,

    /// Display name of the author, or `"system"`
    pub sender_name: String,

    pub content: String,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl Message {
    fn build(kind: MessageKind, sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            sender_name: sender.into(),
            content: content.into(),
            created_at: Utc::now(),
            attributes: Attributes::default(),
        }
    }

    /// Create a chat line.
    pub fn chat(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::build(MessageKind::Chat, sender, content)
    }

    /// Create a room notice.
    pub fn system(content: impl Into<String>) -> Self {
        Self::build(MessageKind::System, SYSTEM_SENDER, content)
    }

    pub fn join(display_name: &str) -> Self {
        Self::build(MessageKind::Join, SYSTEM_SENDER, format!("{display_name} joined the chat"))
    }

    pub fn leave(display_name: &str) -> Self {
        Self::build(MessageKind::Leave, SYSTEM_SENDER, format!("{display_name} left the chat"))
    }

    /// Create a structured data message from an agent.
    pub fn agent_data(
        sender: impl Into<String>,
        content: impl Into<String>,
        data_type: impl Into<String>,
        processed_data: serde_json::Value,
    ) -> Self {
        let mut msg = Self::build(MessageKind::AgentData, sender, content);
        msg.attributes.data_type = Some(data_type.into());
        msg.attributes.processed_data = Some(processed_data);
        msg
    }

    /// Create an agent reply.
    pub fn agent_reply(sender: impl Into<String>, response: impl Into<String>) -> Self {
        Self::build(MessageKind::AgentReply, sender, response)
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.attributes.metadata = metadata;
        self
    }

    pub fn with_decisions(mut self, trace: Vec<DecisionStep>) -> Self {
        self.attributes.agent_decisions = trace;
        self
    }

    /// Rough token estimate (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.content.len() / 4
    }
}
