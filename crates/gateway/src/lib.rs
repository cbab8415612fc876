//! Room server for Parley.
//!
//! Serves the `/ws` chat protocol plus a few read-only HTTP endpoints,
//! and hosts the configured agents in-process.
//!
//! Built on Axum.

pub mod protocol;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;
use axum::extract::{Query, State};
use axum::http::Method;
use axum::response::Json;
use axum::{Router, routing::get};
use chrono::{DateTime, Utc};
use parley_agent::{AgentHandle, AgentProfile, AgentRunner, DecisionEngine};
use parley_context::{ContextClient, RetryPolicy, SessionHandle};
use parley_core::error::{ContextError, RoomError};
use parley_core::message::Message;
use parley_room::{InteractionGraph, Room, RoomSettings, RoomStats};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("No provider available for model '{model}' (agent {agent})")]
    NoProvider { agent: String, model: String },

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shared application state for the gateway.
pub struct GatewayState {
    pub room: Arc<Room>,
    pub context: Arc<ContextClient>,
    /// Cap on `get_history` / `/api/history` page size
    pub max_history_query: usize,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(room: Arc<Room>, context: Arc<ContextClient>) -> Self {
        Self {
            room,
            context,
            max_history_query: parley_config::RoomConfig::default().max_history_query,
            started_at: Utc::now(),
        }
    }

    /// Room and context client as configured.
    pub fn from_config(config: &parley_config::AppConfig) -> Self {
        let room = Arc::new(Room::new(RoomSettings::from(&config.room)));
        let context = Arc::new(
            ContextClient::new(parley_context::build_from_config(&config.context))
                .with_retry(RetryPolicy::from_config(&config.context.retry)),
        );
        Self {
            max_history_query: config.room.max_history_query,
            ..Self::new(room, context)
        }
    }

    async fn session(&self) -> Result<SessionHandle, ContextError> {
        self.context.session(self.room.session_id()).await
    }
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    // The HTTP surface is read-only, so any origin may read it.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/history", get(history_handler))
        .route("/api/network", get(network_handler))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Register every configured agent on the room and start its tasks.
pub async fn spawn_agents(
    config: &parley_config::AppConfig,
    state: &GatewayState,
) -> Result<Vec<AgentHandle>, GatewayError> {
    let router = parley_providers::build_from_config(config);
    let mut handles = Vec::with_capacity(config.agents.len());

    for agent in &config.agents {
        let mut profile = AgentProfile::from_config(agent, config);
        let (provider, model) = router.resolve(&profile.model).ok_or_else(|| GatewayError::NoProvider {
            agent: agent.name.clone(),
            model: profile.model.clone(),
        })?;
        profile.model = model;

        let engine = DecisionEngine::new(profile, provider, state.context.clone(), state.room.clone())
            .with_settings(config.decision.clone());
        let mut runner = AgentRunner::new(engine);
        if agent.proactive.enabled {
            runner = runner.with_proactive(Duration::from_secs(agent.proactive.interval_secs));
        }
        handles.push(runner.start().await?);
    }

    Ok(handles)
}

/// Start the gateway and run until Ctrl-C.
pub async fn start(config: parley_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let state = Arc::new(GatewayState::from_config(&config));
    let agents = spawn_agents(&config, &state).await?;
    info!(
        session_id = %state.room.session_id(),
        context = %state.context.provider_name(),
        agents = agents.len(),
        "Room ready"
    );

    let app = build_router(state);
    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for agent in agents {
        agent.shutdown();
    }
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    room: RoomStats,
    context_backend: String,
    uptime_secs: i64,
}

async fn stats_handler(State(state): State<SharedState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        room: state.room.stats(),
        context_backend: state.context.provider_name().to_string(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

#[derive(Deserialize)]
struct HistoryParams {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HistoryResponse {
    messages: Vec<Message>,
}

async fn history_handler(
    State(state): State<SharedState>,
    Query(params): Query<HistoryParams>,
) -> Json<HistoryResponse> {
    let limit = params.limit.unwrap_or(50).min(state.max_history_query);
    Json(HistoryResponse {
        messages: state.room.conversation(limit),
    })
}

async fn network_handler(State(state): State<SharedState>) -> Json<InteractionGraph> {
    Json(state.room.interaction_graph())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use parley_context::InMemoryContextProvider;
    use parley_core::participant::{ConnectionId, Participant};
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let room = Arc::new(Room::new(RoomSettings::default()));
        let context = Arc::new(ContextClient::new(Arc::new(InMemoryContextProvider::new())));
        Arc::new(GatewayState::new(room, context))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (status, body) = get_json(build_router(test_state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn stats_reflect_room() {
        let state = test_state();
        let alice = ConnectionId::from("alice");
        let _rx = state.room.connect(&alice);
        state.room.register(Participant::human(alice.clone(), "alice")).unwrap();
        state.room.publish(Some(&alice), Message::chat("alice", "hello"));

        let (status, body) = get_json(build_router(state), "/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["humans"], 1);
        assert_eq!(body["agents"], 0);
        assert_eq!(body["history_len"], 2);
        assert_eq!(body["context_backend"], "in_memory");
    }

    #[tokio::test]
    async fn history_is_capped_and_skips_presence() {
        let state = test_state();
        let alice = ConnectionId::from("alice");
        state.room.register(Participant::human(alice.clone(), "alice")).unwrap();
        for i in 0..20 {
            state.room.publish(Some(&alice), Message::chat("alice", format!("msg {i}")));
        }
        state.room.publish(None, Message::join("bob"));
        state.room.publish(None, Message::leave("bob"));

        let (status, body) = get_json(build_router(state), "/api/history?limit=5").await;
        assert_eq!(status, StatusCode::OK);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0]["content"], "msg 15");
        assert_eq!(messages[4]["content"], "msg 19");
        assert!(messages.iter().all(|m| m["type"] == "chat"));
    }

    #[tokio::test]
    async fn network_counts_mentions() {
        let state = test_state();
        state.room.publish(None, Message::chat("alice", "@bob did you see this?"));
        state.room.publish(None, Message::chat("bob", "yes"));

        let (status, body) = get_json(build_router(state), "/api/network").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodes"], serde_json::json!(["alice", "bob"]));
        assert_eq!(body["edges"][0]["from"], "alice");
        assert_eq!(body["edges"][0]["to"], "bob");
        assert_eq!(body["edges"][0]["mentions"], 1);
    }

    #[tokio::test]
    async fn ws_route_exists() {
        let app = build_router(test_state());
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let response = app.oneshot(req).await.unwrap();
        // Without upgrade headers the extractor rejects the request
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn configured_agents_join_the_room() {
        let mut config = parley_config::AppConfig::default();
        config.agents = vec![parley_config::AgentConfig::new("HelperBot")];
        config.agents[0].proactive.enabled = false;
        let state = GatewayState::from_config(&config);

        let agents = spawn_agents(&config, &state).await.unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(state.room.agent_names(), vec!["HelperBot"]);

        for agent in agents {
            agent.shutdown();
        }
        assert!(state.room.agent_names().is_empty());
    }
}
