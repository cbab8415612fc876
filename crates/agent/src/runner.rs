//! In-process agents: register on the room and react to its events.

use std::sync::Arc;
use std::time::Duration;
use parley_core::error::RoomError;
use parley_core::event::{AgentEventType, ServerEvent};
use parley_core::participant::{ConnectionId, Participant};
use parley_room::Room;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use crate::engine::DecisionEngine;
use crate::scheduler::ProactiveScheduler;

pub struct AgentRunner {
    engine: Arc<DecisionEngine>,
    proactive: Option<Duration>,
}

impl AgentRunner {
    pub fn new(engine: DecisionEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            proactive: None,
        }
    }

    /// Offer the agent a chance to speak after `interval` of silence.
    pub fn with_proactive(mut self, interval: Duration) -> Self {
        self.proactive = Some(interval);
        self
    }

    /// Join the room and start listening. Each qualifying chat message runs
    /// its own engine invocation, so a slow model call never blocks the
    /// agent's event stream.
    pub async fn start(self) -> Result<AgentHandle, RoomError> {
        let engine = self.engine;
        let room = engine.room().clone();
        let connection = engine.connection().clone();
        let profile = engine.profile().clone();

        let events = room.connect(&connection);
        let participant = Participant::agent(
            connection.clone(),
            profile.name.clone(),
            profile.capabilities.iter().cloned(),
        );
        if let Err(e) = room.register(participant) {
            room.disconnect(&connection);
            return Err(e);
        }

        if let Err(e) = engine.join_context().await {
            warn!(agent = %profile.name, error = %e, "Could not add agent to context session");
        }

        let mut tasks = vec![tokio::spawn(listen(engine.clone(), events))];
        if let Some(interval) = self.proactive {
            tasks.push(ProactiveScheduler::new(engine.clone(), interval).spawn());
        }

        info!(
            agent = %profile.name,
            model = %profile.model,
            proactive = self.proactive.is_some(),
            "Agent joined the room"
        );

        Ok(AgentHandle {
            name: profile.name,
            connection,
            room,
            tasks,
        })
    }
}

async fn listen(engine: Arc<DecisionEngine>, mut events: mpsc::Receiver<ServerEvent>) {
    let own_name = engine.profile().name.clone();
    while let Some(event) = events.recv().await {
        let ServerEvent::AgentEvent(event) = event else {
            continue;
        };
        if event.event_type != AgentEventType::ChatMessage
            || event.message.sender_name.eq_ignore_ascii_case(&own_name)
        {
            continue;
        }

        let engine = engine.clone();
        tokio::spawn(async move {
            engine.on_chat(&event.message).await;
        });
    }
    debug!(agent = %own_name, "Agent event stream closed");
}

/// A running in-process agent.
pub struct AgentHandle {
    name: String,
    connection: ConnectionId,
    room: Arc<Room>,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &ConnectionId {
        &self.connection
    }

    /// Stop all tasks and leave the room.
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.room.disconnect(&self.connection);
        info!(agent = %self.name, "Agent left the room");
    }
}
