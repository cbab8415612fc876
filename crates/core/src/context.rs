//! Context provider trait: the external long-term memory service.
//!
//! The service models a workspace of *peers* (room participants) and
//! *sessions* (conversations). It stores messages, builds summaries, answers
//! semantic searches and can be asked questions about a peer ("dialectic"
//! peer chat). Parley treats it as an opaque remote: only the operations
//! below cross the boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::ContextError;

/// Opaque handle to a session, as issued by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionRef(pub String);

/// Opaque handle to a peer, as issued by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerRef(pub String);

impl std::fmt::Display for SessionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for PeerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message as stored by the context service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    /// Author peer name
    pub peer: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ContextMessage {
    pub fn new(peer: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            content: content.into(),
            created_at: Some(Utc::now()),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Options for fetching session context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextParams {
    /// Include the rolling session summary
    #[serde(default = "default_true")]
    pub summary: bool,

    /// Token budget for the returned context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Default for ContextParams {
    fn default() -> Self {
        Self { summary: true, tokens: None }
    }
}

/// Conversation context returned by the provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub messages: Vec<ContextMessage>,
}

/// One semantic search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    #[serde(default)]
    pub score: f32,
}

/// Scope for a peer chat (dialectic) query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerChatOptions {
    /// Restrict the answer to what was learned in this session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Ask about this peer from the asking peer's perspective
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// The external memory/context service.
///
/// Implementations: HTTP (REST) and in-memory (for tests and offline runs).
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// The backend name (e.g., "http", "in_memory").
    fn name(&self) -> &str;

    /// Get or create a session by id.
    async fn session(&self, id: &str) -> Result<SessionRef, ContextError>;

    /// Get or create a peer by name.
    async fn peer(&self, name: &str) -> Result<PeerRef, ContextError>;

    async fn get_context(
        &self,
        session: &SessionRef,
        params: &ContextParams,
    ) -> Result<ContextBundle, ContextError>;

    async fn add_messages(
        &self,
        session: &SessionRef,
        messages: &[ContextMessage],
    ) -> Result<(), ContextError>;

    async fn search(
        &self,
        session: &SessionRef,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, ContextError>;

    /// Ask the service a natural-language question on behalf of `peer`.
    async fn peer_chat(
        &self,
        peer: &PeerRef,
        question: &str,
        options: &PeerChatOptions,
    ) -> Result<Option<String>, ContextError>;

    async fn add_peers(&self, session: &SessionRef, peers: &[PeerRef]) -> Result<(), ContextError>;

    async fn remove_peer(&self, session: &SessionRef, peer: &PeerRef) -> Result<(), ContextError>;

    /// Toggle whether the service builds a model of `peer` in this session.
    async fn set_observe(
        &self,
        session: &SessionRef,
        peer: &PeerRef,
        observe_me: bool,
    ) -> Result<(), ContextError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_params_default_to_summary() {
        let params = ContextParams::default();
        assert!(params.summary);
        assert!(params.tokens.is_none());
    }

    #[test]
    fn peer_chat_options_omit_unset_fields() {
        let json = serde_json::to_value(PeerChatOptions::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }
}
