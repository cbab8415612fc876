//! Room participants and their connection identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Identity of one live connection (socket or in-process agent).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    Human,
    Agent,
}

/// A registered member of the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ConnectionId,
    pub display_name: String,
    #[serde(rename = "type")]
    pub kind: ParticipantKind,
    /// Free-form capability tags (agents only)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub capabilities: BTreeSet<String>,
    /// Whether the context service should build a model of this participant
    pub observe_me: bool,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn human(id: ConnectionId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            kind: ParticipantKind::Human,
            capabilities: BTreeSet::new(),
            observe_me: true,
            joined_at: Utc::now(),
        }
    }

    pub fn agent<I, S>(id: ConnectionId, display_name: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id,
            display_name: display_name.into(),
            kind: ParticipantKind::Agent,
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            observe_me: true,
            joined_at: Utc::now(),
        }
    }

    pub fn is_agent(&self) -> bool {
        self.kind == ParticipantKind::Agent
    }
}
