//! REST client for a hosted context service.
//!
//! Endpoints live under `{base_url}/v2/workspaces/{workspace}/`. Sessions and
//! peers are get-or-create by id, so resolving a handle is idempotent.
//! HTTP 429 maps to [`ContextError::RateLimited`]; the retry policy in
//! [`crate::client`] decides what to do with it.

use async_trait::async_trait;
use parley_core::context::*;
use parley_core::error::ContextError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub struct HttpContextProvider {
    base_url: String,
    workspace: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpContextProvider {
    pub fn new(base_url: &str, workspace: &str, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            workspace: workspace.to_string(),
            api_key,
            client,
        }
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, ContextError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ContextError::Network(format!("invalid base url: {e}")))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ContextError::Network("base url cannot carry a path".into()))?;
            path.pop_if_empty()
                .extend(["v2", "workspaces", self.workspace.as_str()])
                .extend(segments);
        }
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: reqwest::Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, ContextError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ContextError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            return Err(ContextError::RateLimited { retry_after_secs });
        }
        if status == 404 {
            let body = response.text().await.unwrap_or_default();
            return Err(ContextError::NotFound(body));
        }
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status, body = %message, "Context service returned error");
            return Err(ContextError::Api { status, message });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ContextError> {
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(|e| ContextError::Decode(e.to_string()))
    }
}

// --- Wire types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct IdBody {
    id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    peer_id: String,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl From<&ContextMessage> for WireMessage {
    fn from(m: &ContextMessage) -> Self {
        Self {
            peer_id: m.peer.clone(),
            content: m.content.clone(),
            created_at: m.created_at,
            metadata: m.metadata.clone(),
        }
    }
}

impl From<WireMessage> for ContextMessage {
    fn from(m: WireMessage) -> Self {
        Self {
            peer: m.peer_id,
            content: m.content,
            created_at: m.created_at,
            metadata: m.metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSummary {
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireContext {
    #[serde(default)]
    summary: Option<WireSummary>,
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireSearchHit {
    content: String,
    #[serde(default)]
    peer_id: Option<String>,
    #[serde(default)]
    score: f32,
}

#[derive(Debug, Deserialize)]
struct WireChatAnswer {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ContextProvider for HttpContextProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn session(&self, id: &str) -> Result<SessionRef, ContextError> {
        let url = self.url(&["sessions"])?;
        let body: IdBody = self
            .send_json(self.request(reqwest::Method::POST, url).json(&IdBody { id: id.into() }))
            .await?;
        debug!(session = %body.id, "Resolved context session");
        Ok(SessionRef(body.id))
    }

    async fn peer(&self, name: &str) -> Result<PeerRef, ContextError> {
        let url = self.url(&["peers"])?;
        let body: IdBody = self
            .send_json(self.request(reqwest::Method::POST, url).json(&IdBody { id: name.into() }))
            .await?;
        Ok(PeerRef(body.id))
    }

    async fn get_context(
        &self,
        session: &SessionRef,
        params: &ContextParams,
    ) -> Result<ContextBundle, ContextError> {
        let mut url = self.url(&["sessions", &session.0, "context"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("summary", if params.summary { "true" } else { "false" });
            if let Some(tokens) = params.tokens {
                query.append_pair("tokens", &tokens.to_string());
            }
        }
        let wire: WireContext = self.send_json(self.request(reqwest::Method::GET, url)).await?;
        Ok(ContextBundle {
            summary: wire.summary.map(|s| s.content),
            messages: wire.messages.into_iter().map(Into::into).collect(),
        })
    }

    async fn add_messages(
        &self,
        session: &SessionRef,
        messages: &[ContextMessage],
    ) -> Result<(), ContextError> {
        let url = self.url(&["sessions", &session.0, "messages"])?;
        let wire: Vec<WireMessage> = messages.iter().map(Into::into).collect();
        self.send(
            self.request(reqwest::Method::POST, url)
                .json(&serde_json::json!({ "messages": wire })),
        )
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        session: &SessionRef,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, ContextError> {
        let url = self.url(&["sessions", &session.0, "search"])?;
        let hits: Vec<WireSearchHit> = self
            .send_json(
                self.request(reqwest::Method::POST, url)
                    .json(&serde_json::json!({ "query": query, "limit": limit })),
            )
            .await?;
        Ok(hits
            .into_iter()
            .map(|h| SearchHit { content: h.content, peer: h.peer_id, score: h.score })
            .collect())
    }

    async fn peer_chat(
        &self,
        peer: &PeerRef,
        question: &str,
        options: &PeerChatOptions,
    ) -> Result<Option<String>, ContextError> {
        let url = self.url(&["peers", &peer.0, "chat"])?;
        let mut body = serde_json::json!({ "query": question });
        if let Some(session_id) = &options.session_id {
            body["session_id"] = serde_json::json!(session_id);
        }
        if let Some(target) = &options.target {
            body["target"] = serde_json::json!(target);
        }
        let answer: WireChatAnswer = self
            .send_json(self.request(reqwest::Method::POST, url).json(&body))
            .await?;
        Ok(answer.content.filter(|c| !c.trim().is_empty()))
    }

    async fn add_peers(&self, session: &SessionRef, peers: &[PeerRef]) -> Result<(), ContextError> {
        let url = self.url(&["sessions", &session.0, "peers"])?;
        let body: serde_json::Map<String, serde_json::Value> = peers
            .iter()
            .map(|p| (p.0.clone(), serde_json::json!({})))
            .collect();
        self.send(self.request(reqwest::Method::POST, url).json(&body)).await?;
        Ok(())
    }

    async fn remove_peer(&self, session: &SessionRef, peer: &PeerRef) -> Result<(), ContextError> {
        let url = self.url(&["sessions", &session.0, "peers", &peer.0])?;
        self.send(self.request(reqwest::Method::DELETE, url)).await?;
        Ok(())
    }

    async fn set_observe(
        &self,
        session: &SessionRef,
        peer: &PeerRef,
        observe_me: bool,
    ) -> Result<(), ContextError> {
        let url = self.url(&["sessions", &session.0, "peers", &peer.0, "config"])?;
        self.send(
            self.request(reqwest::Method::PUT, url)
                .json(&serde_json::json!({ "observe_me": observe_me })),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use crate::client::ContextClient;
    use crate::retry::RetryPolicy;

    const WS: &str = "/v2/workspaces/parley";

    #[tokio::test]
    async fn session_is_get_or_create() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{WS}/sessions")))
            .and(body_json(serde_json::json!({"id": "room-1"})))
            .and(header("Authorization", "Bearer ctx-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "room-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpContextProvider::new(&server.uri(), "parley", Some("ctx-key".into()));
        let session = provider.session("room-1").await.unwrap();
        assert_eq!(session, SessionRef("room-1".into()));
    }

    #[tokio::test]
    async fn context_maps_summary_and_messages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{WS}/sessions/room-1/context")))
            .and(query_param("tokens", "2000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "summary": {"content": "Alice is planning a trip."},
                "messages": [{"peer_id": "alice", "content": "Lisbon or Porto?"}]
            })))
            .mount(&server)
            .await;

        let provider = HttpContextProvider::new(&server.uri(), "parley", None);
        let bundle = provider
            .get_context(&SessionRef("room-1".into()), &ContextParams { summary: true, tokens: Some(2000) })
            .await
            .unwrap();
        assert_eq!(bundle.summary.as_deref(), Some("Alice is planning a trip."));
        assert_eq!(bundle.messages[0].peer, "alice");
    }

    #[tokio::test]
    async fn status_429_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
            .mount(&server)
            .await;

        let provider = HttpContextProvider::new(&server.uri(), "parley", None);
        let err = provider.search(&SessionRef("s".into()), "q", 5).await.unwrap_err();
        assert!(matches!(err, ContextError::RateLimited { retry_after_secs: Some(3) }));
    }

    #[tokio::test]
    async fn empty_dialectic_answer_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{WS}/peers/HelperBot/chat")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"content": null})))
            .mount(&server)
            .await;

        let provider = HttpContextProvider::new(&server.uri(), "parley", None);
        let answer = provider
            .peer_chat(&PeerRef("HelperBot".into()), "how is alice?", &PeerChatOptions::default())
            .await
            .unwrap();
        assert!(answer.is_none());
    }

    #[tokio::test]
    async fn client_retries_through_rate_limits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{WS}/sessions/room-1/search")))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{WS}/sessions/room-1/search")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"content": "ship it friday", "peer_id": "bob", "score": 0.8}
            ])))
            .with_priority(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{WS}/sessions")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "room-1"})))
            .mount(&server)
            .await;

        let client = ContextClient::new(Arc::new(HttpContextProvider::new(&server.uri(), "parley", None)))
            .with_retry(RetryPolicy::new(3, Duration::from_millis(10)));
        let hits = client.session("room-1").await.unwrap().search("ship", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].peer.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn server_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{WS}/sessions/room-1/messages")))
            .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{WS}/sessions")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "room-1"})))
            .mount(&server)
            .await;

        let client = ContextClient::new(Arc::new(HttpContextProvider::new(&server.uri(), "parley", None)))
            .with_retry(RetryPolicy::new(3, Duration::from_millis(10)));
        let err = client
            .session("room-1")
            .await
            .unwrap()
            .add_messages(&[ContextMessage::new("alice", "hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::Api { status: 500, .. }));
    }
}
