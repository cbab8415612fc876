//! In-memory context provider: useful for testing and offline rooms.
//!
//! Stores messages per session and answers searches and peer questions
//! with plain keyword matching. Nothing survives a restart.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use async_trait::async_trait;
use parley_core::context::*;
use parley_core::error::ContextError;
use tokio::sync::RwLock;

#[derive(Default)]
struct SessionState {
    /// Peer name → observe_me
    peers: BTreeMap<String, bool>,
    messages: Vec<ContextMessage>,
}

#[derive(Default)]
struct Store {
    sessions: HashMap<String, SessionState>,
    peers: HashSet<String>,
}

pub struct InMemoryContextProvider {
    store: Arc<RwLock<Store>>,
}

impl InMemoryContextProvider {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::default())),
        }
    }

    /// All messages stored for a session, oldest first.
    pub async fn messages(&self, session_id: &str) -> Vec<ContextMessage> {
        self.store
            .read()
            .await
            .sessions
            .get(session_id)
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    /// Session members and their observe flag.
    pub async fn session_peers(&self, session_id: &str) -> BTreeMap<String, bool> {
        self.store
            .read()
            .await
            .sessions
            .get(session_id)
            .map(|s| s.peers.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryContextProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn keyword_score(content: &str, query_lower: &str) -> f32 {
    let content_lower = content.to_lowercase();
    let occurrences = query_lower
        .split_whitespace()
        .map(|term| content_lower.matches(term).count())
        .sum::<usize>();
    occurrences as f32 / (content.len() as f32 / 100.0).max(1.0)
}

fn missing(session: &SessionRef) -> ContextError {
    ContextError::NotFound(format!("session {session}"))
}

#[async_trait]
impl ContextProvider for InMemoryContextProvider {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn session(&self, id: &str) -> Result<SessionRef, ContextError> {
        self.store.write().await.sessions.entry(id.to_string()).or_default();
        Ok(SessionRef(id.to_string()))
    }

    async fn peer(&self, name: &str) -> Result<PeerRef, ContextError> {
        self.store.write().await.peers.insert(name.to_string());
        Ok(PeerRef(name.to_string()))
    }

    async fn get_context(
        &self,
        session: &SessionRef,
        params: &ContextParams,
    ) -> Result<ContextBundle, ContextError> {
        let store = self.store.read().await;
        let state = store.sessions.get(&session.0).ok_or_else(|| missing(session))?;

        // Newest messages that fit the token budget (4 chars ≈ 1 token).
        let budget = params.tokens.map(|t| t as usize * 4).unwrap_or(usize::MAX);
        let mut used = 0usize;
        let mut messages: Vec<ContextMessage> = state
            .messages
            .iter()
            .rev()
            .take_while(|m| {
                used = used.saturating_add(m.content.len());
                used <= budget
            })
            .cloned()
            .collect();
        messages.reverse();

        let summary = (params.summary && !state.messages.is_empty()).then(|| {
            let speakers: Vec<&str> = state
                .messages
                .iter()
                .map(|m| m.peer.as_str())
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect();
            format!(
                "{} messages so far between {}.",
                state.messages.len(),
                speakers.join(", ")
            )
        });

        Ok(ContextBundle { summary, messages })
    }

    async fn add_messages(
        &self,
        session: &SessionRef,
        messages: &[ContextMessage],
    ) -> Result<(), ContextError> {
        let mut store = self.store.write().await;
        let state = store.sessions.get_mut(&session.0).ok_or_else(|| missing(session))?;
        state.messages.extend_from_slice(messages);
        Ok(())
    }

    async fn search(
        &self,
        session: &SessionRef,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, ContextError> {
        let store = self.store.read().await;
        let state = store.sessions.get(&session.0).ok_or_else(|| missing(session))?;
        let query_lower = query.to_lowercase();

        let mut hits: Vec<SearchHit> = state
            .messages
            .iter()
            .map(|m| SearchHit {
                content: m.content.clone(),
                peer: Some(m.peer.clone()),
                score: keyword_score(&m.content, &query_lower),
            })
            .filter(|h| h.score > 0.0)
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn peer_chat(
        &self,
        peer: &PeerRef,
        question: &str,
        options: &PeerChatOptions,
    ) -> Result<Option<String>, ContextError> {
        let store = self.store.read().await;
        if !store.peers.contains(&peer.0) {
            return Err(ContextError::NotFound(format!("peer {peer}")));
        }

        let subject = options.target.as_deref().unwrap_or(&peer.0);
        let said: Vec<&ContextMessage> = store
            .sessions
            .iter()
            .filter(|(id, _)| options.session_id.as_deref().is_none_or(|s| s == id.as_str()))
            .flat_map(|(_, state)| state.messages.iter())
            .filter(|m| m.peer == subject)
            .collect();

        if said.is_empty() {
            return Ok(None);
        }

        let query_lower = question.to_lowercase();
        let mut relevant: Vec<&ContextMessage> = said
            .iter()
            .copied()
            .filter(|m| keyword_score(&m.content, &query_lower) > 0.0)
            .collect();
        if relevant.is_empty() {
            relevant = said;
        }

        let quotes: Vec<String> = relevant
            .iter()
            .rev()
            .take(3)
            .map(|m| format!("\"{}\"", m.content))
            .collect();
        Ok(Some(format!("{subject} has said: {}", quotes.join("; "))))
    }

    async fn add_peers(&self, session: &SessionRef, peers: &[PeerRef]) -> Result<(), ContextError> {
        let mut store = self.store.write().await;
        let state = store.sessions.get_mut(&session.0).ok_or_else(|| missing(session))?;
        for peer in peers {
            state.peers.entry(peer.0.clone()).or_insert(true);
        }
        Ok(())
    }

    async fn remove_peer(&self, session: &SessionRef, peer: &PeerRef) -> Result<(), ContextError> {
        let mut store = self.store.write().await;
        let state = store.sessions.get_mut(&session.0).ok_or_else(|| missing(session))?;
        state.peers.remove(&peer.0);
        Ok(())
    }

    async fn set_observe(
        &self,
        session: &SessionRef,
        peer: &PeerRef,
        observe_me: bool,
    ) -> Result<(), ContextError> {
        let mut store = self.store.write().await;
        let state = store.sessions.get_mut(&session.0).ok_or_else(|| missing(session))?;
        state.peers.insert(peer.0.clone(), observe_me);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (InMemoryContextProvider, SessionRef) {
        let ctx = InMemoryContextProvider::new();
        let session = ctx.session("room").await.unwrap();
        ctx.peer("alice").await.unwrap();
        ctx.peer("HelperBot").await.unwrap();
        ctx.add_messages(
            &session,
            &[
                ContextMessage::new("alice", "I'm nervous about the Rust migration"),
                ContextMessage::new("bob", "Python is fine for scripting"),
                ContextMessage::new("alice", "Rust borrow checker keeps biting me"),
            ],
        )
        .await
        .unwrap();
        (ctx, session)
    }

    #[tokio::test]
    async fn search_by_keyword() {
        let (ctx, session) = seeded().await;
        let hits = ctx.search(&session, "Rust", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.content.contains("Rust")));
        assert_eq!(hits[0].peer.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn context_respects_token_budget() {
        let (ctx, session) = seeded().await;
        let bundle = ctx
            .get_context(&session, &ContextParams { summary: true, tokens: Some(10) })
            .await
            .unwrap();
        assert_eq!(bundle.messages.len(), 1);
        assert!(bundle.messages[0].content.contains("borrow checker"));
        assert!(bundle.summary.unwrap().starts_with("3 messages"));
    }

    #[tokio::test]
    async fn peer_chat_quotes_the_target() {
        let (ctx, _) = seeded().await;
        let answer = ctx
            .peer_chat(
                &PeerRef("HelperBot".into()),
                "how does alice feel about rust?",
                &PeerChatOptions { session_id: Some("room".into()), target: Some("alice".into()) },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(answer.starts_with("alice has said"));
        assert!(answer.contains("nervous"));
    }

    #[tokio::test]
    async fn peer_chat_about_silent_peer_is_none() {
        let (ctx, _) = seeded().await;
        let answer = ctx
            .peer_chat(
                &PeerRef("HelperBot".into()),
                "anything?",
                &PeerChatOptions { session_id: None, target: Some("carol".into()) },
            )
            .await
            .unwrap();
        assert!(answer.is_none());
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let ctx = InMemoryContextProvider::new();
        let err = ctx
            .add_messages(&SessionRef("ghost".into()), &[ContextMessage::new("a", "b")])
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::NotFound(_)));
    }

    #[tokio::test]
    async fn observe_flag_and_membership() {
        let (ctx, session) = seeded().await;
        let alice = PeerRef("alice".into());
        ctx.add_peers(&session, &[alice.clone()]).await.unwrap();
        assert_eq!(ctx.session_peers("room").await.get("alice"), Some(&true));

        ctx.set_observe(&session, &alice, false).await.unwrap();
        assert_eq!(ctx.session_peers("room").await.get("alice"), Some(&false));

        ctx.remove_peer(&session, &alice).await.unwrap();
        assert!(ctx.session_peers("room").await.is_empty());
    }
}
