//! Cached, retrying front for a [`ContextProvider`].
//!
//! Session and peer handles are resolved once per key and kept for the
//! lifetime of the process. The client holds no chat state of its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use chrono::{DateTime, Utc};
use parley_core::context::*;
use parley_core::error::ContextError;
use tracing::debug;
use crate::retry::RetryPolicy;

struct CachedHandle<T> {
    handle: T,
    last_used: DateTime<Utc>,
}

pub struct ContextClient {
    provider: Arc<dyn ContextProvider>,
    retry: RetryPolicy,
    sessions: Mutex<HashMap<String, CachedHandle<SessionRef>>>,
    peers: Mutex<HashMap<String, CachedHandle<PeerRef>>>,
}

impl ContextClient {
    pub fn new(provider: Arc<dyn ContextProvider>) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
            sessions: Mutex::new(HashMap::new()),
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Resolve (and cache) the session with this id.
    pub async fn session(&self, id: &str) -> Result<SessionHandle, ContextError> {
        let session = match lookup(&self.sessions, id) {
            Some(session) => session,
            None => {
                let session = self
                    .retry
                    .run("session", || self.provider.session(id))
                    .await?;
                debug!(session = %id, "Cached context session handle");
                store(&self.sessions, id, session.clone());
                session
            }
        };

        Ok(SessionHandle {
            provider: self.provider.clone(),
            retry: self.retry.clone(),
            session,
        })
    }

    /// Resolve (and cache) the peer with this name.
    pub async fn peer(&self, name: &str) -> Result<PeerHandle, ContextError> {
        let peer = match lookup(&self.peers, name) {
            Some(peer) => peer,
            None => {
                let peer = self.retry.run("peer", || self.provider.peer(name)).await?;
                debug!(peer = %name, "Cached context peer handle");
                store(&self.peers, name, peer.clone());
                peer
            }
        };

        Ok(PeerHandle {
            provider: self.provider.clone(),
            retry: self.retry.clone(),
            peer,
        })
    }

    pub fn cached_sessions(&self) -> usize {
        self.sessions.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn cached_peers(&self) -> usize {
        self.peers.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// When a cached peer handle was last handed out.
    pub fn peer_last_used(&self, name: &str) -> Option<DateTime<Utc>> {
        self.peers.lock().ok()?.get(name).map(|c| c.last_used)
    }
}

fn lookup<T: Clone>(cache: &Mutex<HashMap<String, CachedHandle<T>>>, key: &str) -> Option<T> {
    let mut map = cache.lock().ok()?;
    let cached = map.get_mut(key)?;
    cached.last_used = Utc::now();
    Some(cached.handle.clone())
}

fn store<T>(cache: &Mutex<HashMap<String, CachedHandle<T>>>, key: &str, handle: T) {
    if let Ok(mut map) = cache.lock() {
        map.entry(key.to_string()).or_insert(CachedHandle {
            handle,
            last_used: Utc::now(),
        });
    }
}

/// A resolved session. Every call goes through the retry policy.
#[derive(Clone)]
pub struct SessionHandle {
    provider: Arc<dyn ContextProvider>,
    retry: RetryPolicy,
    session: SessionRef,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionRef {
        &self.session
    }

    pub async fn get_context(&self, params: &ContextParams) -> Result<ContextBundle, ContextError> {
        self.retry
            .run("get_context", || self.provider.get_context(&self.session, params))
            .await
    }

    pub async fn add_messages(&self, messages: &[ContextMessage]) -> Result<(), ContextError> {
        if messages.is_empty() {
            return Ok(());
        }
        self.retry
            .run("add_messages", || self.provider.add_messages(&self.session, messages))
            .await
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, ContextError> {
        self.retry
            .run("search", || self.provider.search(&self.session, query, limit))
            .await
    }

    pub async fn add_peers(&self, peers: &[PeerRef]) -> Result<(), ContextError> {
        self.retry
            .run("add_peers", || self.provider.add_peers(&self.session, peers))
            .await
    }

    pub async fn remove_peer(&self, peer: &PeerRef) -> Result<(), ContextError> {
        self.retry
            .run("remove_peer", || self.provider.remove_peer(&self.session, peer))
            .await
    }

    pub async fn set_observe(&self, peer: &PeerRef, observe_me: bool) -> Result<(), ContextError> {
        self.retry
            .run("set_observe", || self.provider.set_observe(&self.session, peer, observe_me))
            .await
    }
}

/// A resolved peer.
#[derive(Clone)]
pub struct PeerHandle {
    provider: Arc<dyn ContextProvider>,
    retry: RetryPolicy,
    peer: PeerRef,
}

impl PeerHandle {
    pub fn id(&self) -> &PeerRef {
        &self.peer
    }

    /// Ask the context service a question as this peer.
    pub async fn chat(
        &self,
        question: &str,
        options: &PeerChatOptions,
    ) -> Result<Option<String>, ContextError> {
        self.retry
            .run("peer_chat", || self.provider.peer_chat(&self.peer, question, options))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use crate::in_memory::InMemoryContextProvider;

    /// Counts handle resolutions and rate-limits the first `limited` searches.
    struct CountingProvider {
        inner: InMemoryContextProvider,
        session_calls: AtomicUsize,
        peer_calls: AtomicUsize,
        search_calls: AtomicUsize,
        limited: usize,
    }

    impl CountingProvider {
        fn new(limited: usize) -> Self {
            Self {
                inner: InMemoryContextProvider::new(),
                session_calls: AtomicUsize::new(0),
                peer_calls: AtomicUsize::new(0),
                search_calls: AtomicUsize::new(0),
                limited,
            }
        }
    }

    #[async_trait]
    impl ContextProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        async fn session(&self, id: &str) -> Result<SessionRef, ContextError> {
            self.session_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.session(id).await
        }

        async fn peer(&self, name: &str) -> Result<PeerRef, ContextError> {
            self.peer_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.peer(name).await
        }

        async fn get_context(&self, s: &SessionRef, p: &ContextParams) -> Result<ContextBundle, ContextError> {
            self.inner.get_context(s, p).await
        }

        async fn add_messages(&self, s: &SessionRef, m: &[ContextMessage]) -> Result<(), ContextError> {
            self.inner.add_messages(s, m).await
        }

        async fn search(&self, s: &SessionRef, q: &str, limit: usize) -> Result<Vec<SearchHit>, ContextError> {
            let n = self.search_calls.fetch_add(1, Ordering::SeqCst);
            if n < self.limited {
                return Err(ContextError::RateLimited { retry_after_secs: None });
            }
            self.inner.search(s, q, limit).await
        }

        async fn peer_chat(&self, p: &PeerRef, q: &str, o: &PeerChatOptions) -> Result<Option<String>, ContextError> {
            self.inner.peer_chat(p, q, o).await
        }

        async fn add_peers(&self, s: &SessionRef, p: &[PeerRef]) -> Result<(), ContextError> {
            self.inner.add_peers(s, p).await
        }

        async fn remove_peer(&self, s: &SessionRef, p: &PeerRef) -> Result<(), ContextError> {
            self.inner.remove_peer(s, p).await
        }

        async fn set_observe(&self, s: &SessionRef, p: &PeerRef, o: bool) -> Result<(), ContextError> {
            self.inner.set_observe(s, p, o).await
        }
    }

    #[tokio::test]
    async fn handles_are_resolved_once() {
        let provider = Arc::new(CountingProvider::new(0));
        let client = ContextClient::new(provider.clone());

        client.session("room-1").await.unwrap();
        client.session("room-1").await.unwrap();
        client.peer("alice").await.unwrap();
        client.peer("alice").await.unwrap();
        client.peer("bob").await.unwrap();

        assert_eq!(provider.session_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.peer_calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.cached_sessions(), 1);
        assert_eq!(client.cached_peers(), 2);
        assert!(client.peer_last_used("alice").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn session_calls_retry_on_rate_limit() {
        let provider = Arc::new(CountingProvider::new(2));
        let client = ContextClient::new(provider.clone())
            .with_retry(RetryPolicy::new(3, Duration::from_millis(100)));

        let session = client.session("room-1").await.unwrap();
        session
            .add_messages(&[ContextMessage::new("alice", "we should ship the parser today")])
            .await
            .unwrap();

        let hits = session.search("parser", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(provider.search_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_message_batch_is_a_no_op() {
        let client = ContextClient::new(Arc::new(InMemoryContextProvider::new()));
        let session = client.session("room-1").await.unwrap();
        session.add_messages(&[]).await.unwrap();
        let bundle = session.get_context(&ContextParams::default()).await.unwrap();
        assert!(bundle.messages.is_empty());
    }
}
