//! The `/ws` endpoint: one task reads frames, one task drains the
//! connection's outbound queue into the socket.

use std::sync::Arc;
use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use parley_core::context::{ContextMessage, PeerChatOptions};
use parley_core::error::{ContextError, RoomError};
use parley_core::event::ServerEvent;
use parley_core::message::Message;
use parley_core::participant::{ConnectionId, Participant, ParticipantKind};
use parley_room::HistoryQuery;
use serde_json::json;
use tracing::{debug, info, warn};
use crate::GatewayState;
use crate::protocol::{
    AgentDataPayload, AgentResponsePayload, ChatPayload, ClientEvent, ClientFrame, DialecticPayload,
    HistoryPayload, RegisterPayload,
};

/// `GET /ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let connection = ConnectionId::new();
    let mut outbound = state.room.connect(&connection);
    let (mut sink, mut stream) = socket.split();
    info!(connection = %connection, "WebSocket connection established");

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            if sink.send(WsMessage::Text(event.to_json().into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut session = ClientSession {
        state,
        connection,
        name: None,
    };

    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue, // binary, ping, pong
            Err(_) => break,
        };

        match ClientFrame::parse(text.as_str()) {
            Ok(frame) => {
                if matches!(frame.event, ClientEvent::Disconnect) {
                    break;
                }
                if let Err(e) = session.handle(frame).await {
                    session.send(ServerEvent::error(e.to_string()));
                }
            }
            Err(e) => session.send(ServerEvent::error(e.to_string())),
        }
    }

    // Closing the room side drops the outbound sender, which ends the writer.
    session.close();
    let _ = writer.await;
}

/// Per-connection protocol state.
struct ClientSession {
    state: Arc<GatewayState>,
    connection: ConnectionId,
    /// Display name once registered
    name: Option<String>,
}

impl ClientSession {
    fn send(&self, event: ServerEvent) {
        self.state.room.send_to(&self.connection, event);
    }

    fn ack(&self, ack: Option<u64>, result: serde_json::Value) {
        if let Some(id) = ack {
            self.send(ServerEvent::ack(id, result));
        }
    }

    /// Queries are pointless without an id to answer to.
    fn require_ack(ack: Option<u64>, event: &str) -> Result<u64, RoomError> {
        ack.ok_or_else(|| RoomError::InvalidFrame(format!("{event} needs an ack id")))
    }

    fn registered_name(&self) -> Result<String, RoomError> {
        self.name
            .clone()
            .ok_or_else(|| RoomError::NotRegistered(self.connection.to_string()))
    }

    async fn handle(&mut self, frame: ClientFrame) -> Result<(), RoomError> {
        let ack = frame.ack;
        debug!(connection = %self.connection, event = frame.event.name(), "Frame received");

        match frame.event {
            ClientEvent::Register(payload) => self.register(payload, ack),
            ClientEvent::Chat(payload) => self.chat(payload, ack),
            ClientEvent::AgentData(payload) => self.agent_data(payload, ack),
            ClientEvent::AgentResponse(payload) => self.agent_response(payload, ack),
            ClientEvent::GetHistory(payload) => self.get_history(payload, ack),
            ClientEvent::GetUsers => {
                let id = Self::require_ack(ack, "get_users")?;
                let roster = self.state.room.list();
                self.send(ServerEvent::ack(id, json!({ "users": roster.humans, "agents": roster.agents })));
                Ok(())
            }
            ClientEvent::Dialectic(payload) => self.dialectic(payload, ack),
            ClientEvent::ToggleObserve => self.toggle_observe(ack),
            ClientEvent::Disconnect => Ok(()),
        }
    }

    fn register(&mut self, payload: RegisterPayload, ack: Option<u64>) -> Result<(), RoomError> {
        let username = payload.username.trim().to_string();
        if username.is_empty() {
            return Err(RoomError::InvalidFrame("username must not be empty".into()));
        }

        let participant = match payload.kind {
            ParticipantKind::Human => Participant::human(self.connection.clone(), &username),
            ParticipantKind::Agent => {
                Participant::agent(self.connection.clone(), &username, payload.capabilities)
            }
        };

        let history = match self.state.room.register(participant.clone()) {
            Ok(history) => history,
            Err(RoomError::NameTaken { name, suggestion }) => {
                info!(connection = %self.connection, name = %name, "Registration rejected");
                self.send(ServerEvent::RegistrationRejected {
                    reason: format!("name '{name}' is already taken"),
                    suggestion,
                });
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let previous = self.name.replace(username.clone());
        self.send(ServerEvent::Registered {
            session_id: self.state.room.session_id().to_string(),
            participant: participant.clone(),
            history,
        });
        self.ack(ack, json!({ "participant": participant }));

        let state = self.state.clone();
        tokio::spawn(async move {
            if let Some(old) = previous.filter(|old| *old != username) {
                if let Err(e) = state.remove_peer(&old).await {
                    warn!(peer = %old, error = %e, "Failed to drop renamed peer from context session");
                }
            }
            if let Err(e) = state.add_peer(&username).await {
                warn!(peer = %username, error = %e, "Failed to add peer to context session");
            }
        });
        Ok(())
    }

    fn chat(&self, payload: ChatPayload, ack: Option<u64>) -> Result<(), RoomError> {
        let name = self.registered_name()?;
        let message = Message::chat(&name, payload.content).with_metadata(payload.metadata);
        let id = message.id.clone();

        self.state.room.publish(Some(&self.connection), message.clone());
        self.state.persist(message);
        self.ack(ack, json!({ "id": id }));
        Ok(())
    }

    fn agent_data(&self, payload: AgentDataPayload, ack: Option<u64>) -> Result<(), RoomError> {
        let name = self.registered_name()?;
        let mut message =
            Message::agent_data(&name, payload.content, payload.data_type, payload.processed_data);

        let delivered = if payload.broadcast {
            let delivered = self.state.room.publish(Some(&self.connection), message.clone());
            self.state.persist(message);
            delivered
        } else {
            message.attributes.targets = payload.targets.clone();
            self.state.room.deliver_to(&self.connection, &payload.targets, message)
        };

        self.ack(ack, json!({ "delivered": delivered }));
        Ok(())
    }

    fn agent_response(&self, payload: AgentResponsePayload, ack: Option<u64>) -> Result<(), RoomError> {
        let name = self.registered_name()?;
        let mut message = Message::agent_reply(&name, payload.response);
        message.attributes.response_type = payload.response_type;
        message.attributes.confidence = payload.confidence;
        message.attributes.referenced_message = payload.referenced_message;
        let id = message.id.clone();

        self.state.room.publish(Some(&self.connection), message);
        self.ack(ack, json!({ "id": id }));
        Ok(())
    }

    fn get_history(&self, payload: HistoryPayload, ack: Option<u64>) -> Result<(), RoomError> {
        let id = Self::require_ack(ack, "get_history")?;
        let query = HistoryQuery {
            limit: payload.limit.min(self.state.max_history_query),
            kind: payload.kind()?,
            since: payload.since,
        };
        let messages = self.state.room.query_history(&query);
        self.send(ServerEvent::ack(id, json!({ "messages": messages })));
        Ok(())
    }

    fn dialectic(&self, payload: DialecticPayload, ack: Option<u64>) -> Result<(), RoomError> {
        let id = Self::require_ack(ack, "dialectic")?;
        let asker = self.registered_name()?;

        // Context calls can be slow; answer from a task so this socket keeps reading.
        let state = self.state.clone();
        let connection = self.connection.clone();
        tokio::spawn(async move {
            let result = match state.dialectic(&asker, &payload.user, &payload.query).await {
                Ok(answer) => json!({ "answer": answer }),
                Err(e) => {
                    warn!(asker = %asker, target = %payload.user, error = %e, "Dialectic query failed");
                    json!({ "answer": null, "error": e.to_string() })
                }
            };
            state.room.send_to(&connection, ServerEvent::ack(id, result));
        });
        Ok(())
    }

    fn toggle_observe(&self, ack: Option<u64>) -> Result<(), RoomError> {
        let name = self.registered_name()?;
        let observe_me = self
            .state
            .room
            .toggle_observe(&self.connection)
            .ok_or_else(|| RoomError::NotRegistered(self.connection.to_string()))?;

        let state = self.state.clone();
        tokio::spawn(async move {
            if let Err(e) = state.set_observe(&name, observe_me).await {
                warn!(peer = %name, error = %e, "Failed to store observe flag");
            }
        });
        self.ack(ack, json!({ "observe_me": observe_me }));
        Ok(())
    }

    fn close(&self) {
        match self.state.room.disconnect(&self.connection) {
            Some(participant) => {
                let state = self.state.clone();
                tokio::spawn(async move {
                    if let Err(e) = state.remove_peer(&participant.display_name).await {
                        warn!(peer = %participant.display_name, error = %e, "Failed to drop peer from context session");
                    }
                });
            }
            None => debug!(connection = %self.connection, "Unregistered connection closed"),
        }
        info!(connection = %self.connection, "WebSocket connection closed");
    }
}

// ── Context side effects ─────────────────────────────────────────────

impl GatewayState {
    async fn add_peer(&self, name: &str) -> Result<(), ContextError> {
        let peer = self.context.peer(name).await?;
        self.session().await?.add_peers(&[peer.id().clone()]).await
    }

    async fn remove_peer(&self, name: &str) -> Result<(), ContextError> {
        let peer = self.context.peer(name).await?;
        self.session().await?.remove_peer(peer.id()).await
    }

    async fn set_observe(&self, name: &str, observe_me: bool) -> Result<(), ContextError> {
        let peer = self.context.peer(name).await?;
        self.session().await?.set_observe(peer.id(), observe_me).await
    }

    async fn dialectic(&self, asker: &str, target: &str, query: &str) -> Result<Option<String>, ContextError> {
        let options = PeerChatOptions {
            session_id: Some(self.room.session_id().to_string()),
            target: Some(target.to_string()),
        };
        self.context.peer(asker).await?.chat(query, &options).await
    }

    /// Store a published message in the context session, off the socket task.
    fn persist(self: &Arc<Self>, message: Message) {
        let state = self.clone();
        tokio::spawn(async move {
            let record = ContextMessage::new(&message.sender_name, &message.content)
                .with_metadata(message.attributes.metadata.clone());
            let result = match state.session().await {
                Ok(session) => session.add_messages(&[record]).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(message_id = %message.id, error = %e, "Failed to persist message to context service");
            }
        });
    }
}
