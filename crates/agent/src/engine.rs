//! The per-agent decision pipeline.
//!
//! Every incoming chat message runs one invocation:
//!
//! ```text
//! Idle → Gating → (ToolSelecting → ToolExecuting)* → Synthesizing → Emitted
//!          └──────────────┴──────────────┴────────────────┴──────→ Suppressed
//! ```
//!
//! Gating first runs the local addressing heuristic, then asks the model.
//! The tool loop is bounded by the number of gathering tools and never runs
//! the same tool twice. Any failure along the way suppresses the reply; the
//! default is always to stay quiet.

use std::collections::BTreeMap;
use std::sync::Arc;
use parley_config::DecisionConfig;
use parley_context::{ContextClient, SessionHandle};
use parley_core::context::{ContextMessage, ContextParams, PeerChatOptions};
use parley_core::error::{ContextError, ProviderError};
use parley_core::message::{DecisionStep, Message, MessageKind};
use parley_core::participant::ConnectionId;
use parley_core::provider::{PromptMessage, Provider, ProviderRequest};
use parley_room::Room;
use tracing::{debug, info, warn};
use crate::addressing::AddressingHeuristic;
use crate::decision::{self, GateDecision, ToolChoice, ToolName};
use crate::prompts::{self, Situation};

/// Temperature for the structured (JSON) calls.
const DECISION_TEMPERATURE: f32 = 0.2;

/// Longest tool result echoed into the decision trace.
const TRACE_RESULT_CHARS: usize = 160;

/// Who the agent is and which model speaks for it.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub name: String,
    pub persona: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub capabilities: Vec<String>,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persona: "You are a friendly, concise participant in a group chat.".into(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: 1024,
            capabilities: vec![],
        }
    }

    /// Agent settings with application-wide defaults filled in.
    pub fn from_config(agent: &parley_config::AgentConfig, app: &parley_config::AppConfig) -> Self {
        Self {
            name: agent.name.clone(),
            persona: agent.persona.clone(),
            model: agent.model.clone().unwrap_or_else(|| app.default_model.clone()),
            temperature: agent.temperature.unwrap_or(app.default_temperature),
            max_tokens: app.default_max_tokens,
            capabilities: agent.capabilities.clone(),
        }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Gating,
    ToolSelecting,
    ToolExecuting,
    Synthesizing,
    Emitted,
    Suppressed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Gating => "gating",
            Self::ToolSelecting => "tool_selecting",
            Self::ToolExecuting => "tool_executing",
            Self::Synthesizing => "synthesizing",
            Self::Emitted => "emitted",
            Self::Suppressed => "suppressed",
        }
    }
}

/// How an invocation ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The reply as published; its attributes carry the decision trace
    Emitted(Message),
    Suppressed {
        reason: String,
        trace: Vec<DecisionStep>,
    },
}

impl Outcome {
    pub fn is_emitted(&self) -> bool {
        matches!(self, Self::Emitted(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Suppressed { reason, .. } => Some(reason),
            Self::Emitted(_) => None,
        }
    }

    pub fn trace(&self) -> &[DecisionStep] {
        match self {
            Self::Emitted(message) => &message.attributes.agent_decisions,
            Self::Suppressed { trace, .. } => trace,
        }
    }
}

/// State of one running invocation.
struct Invocation {
    agent: String,
    stage: Stage,
    trace: Vec<DecisionStep>,
}

impl Invocation {
    fn new(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            stage: Stage::Idle,
            trace: Vec::new(),
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(agent = %self.agent, from = self.stage.as_str(), to = stage.as_str(), "Decision stage");
        self.stage = stage;
    }

    fn record(&mut self, outcome: impl Into<String>, confidence: Option<f32>) {
        self.trace.push(DecisionStep::new(self.stage.as_str(), outcome, confidence));
    }

    fn suppress(mut self, reason: impl Into<String>) -> Outcome {
        let reason = reason.into();
        let at = self.stage;
        self.enter(Stage::Suppressed);
        self.trace.push(DecisionStep::new(at.as_str(), format!("suppressed: {reason}"), None));
        info!(agent = %self.agent, stage = at.as_str(), reason = %reason, "Reply suppressed");
        Outcome::Suppressed { reason, trace: self.trace }
    }
}

pub struct DecisionEngine {
    profile: AgentProfile,
    provider: Arc<dyn Provider>,
    context: Arc<ContextClient>,
    room: Arc<Room>,
    connection: ConnectionId,
    settings: DecisionConfig,
    addressing: AddressingHeuristic,
}

impl DecisionEngine {
    pub fn new(
        profile: AgentProfile,
        provider: Arc<dyn Provider>,
        context: Arc<ContextClient>,
        room: Arc<Room>,
    ) -> Self {
        let settings = DecisionConfig::default();
        Self {
            profile,
            provider,
            context,
            room,
            connection: ConnectionId::new(),
            addressing: AddressingHeuristic::new(&settings.agent_name_suffixes),
            settings,
        }
    }

    pub fn with_settings(mut self, settings: DecisionConfig) -> Self {
        self.addressing = AddressingHeuristic::new(&settings.agent_name_suffixes);
        self.settings = settings;
        self
    }

    /// Publish as this connection instead of a fresh one.
    pub fn with_connection(mut self, connection: ConnectionId) -> Self {
        self.connection = connection;
        self
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn connection(&self) -> &ConnectionId {
        &self.connection
    }

    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    /// Add this agent to the room's context session as a peer.
    pub async fn join_context(&self) -> Result<(), ContextError> {
        let peer = self.context.peer(&self.profile.name).await?;
        self.session().await?.add_peers(&[peer.id().clone()]).await
    }

    /// Run the full pipeline for one chat message.
    pub async fn on_chat(&self, incoming: &Message) -> Outcome {
        let mut inv = Invocation::new(&self.profile.name);

        if incoming.kind != MessageKind::Chat {
            return inv.suppress(format!("not a chat message: {}", incoming.kind.as_str()));
        }
        if incoming.sender_name.eq_ignore_ascii_case(&self.profile.name) {
            return inv.suppress("own message");
        }

        inv.enter(Stage::Gating);
        let live_agents = self.room.agent_names();
        if let Some(other) =
            self.addressing
                .addressed_elsewhere(&incoming.content, &self.profile.name, &live_agents)
        {
            return inv.suppress(format!("addressed to other agent: {other}"));
        }

        let situation = self.situation().await;
        let prompt = prompts::gate(&self.profile.name, &self.profile.persona, &situation, incoming);
        if let Err(reason) = self.gate(&mut inv, prompt).await {
            return inv.suppress(reason);
        }

        let mut used: Vec<ToolName> = Vec::new();
        let mut results: BTreeMap<ToolName, String> = BTreeMap::new();
        while used.len() < ToolName::GATHERING.len() {
            inv.enter(Stage::ToolSelecting);
            let prompt = prompts::tool_selection(&self.profile.name, &situation, incoming, &used, &results);
            let choice = match self.select_tool(prompt).await {
                Ok(choice) => choice,
                Err(reason) => return inv.suppress(reason),
            };

            if choice.tool == ToolName::Respond {
                inv.record("respond", None);
                break;
            }
            if used.contains(&choice.tool) {
                inv.record(format!("{} already used, moving on", choice.tool), None);
                break;
            }
            inv.record(format!("{}: {}", choice.tool, choice.reason), None);

            inv.enter(Stage::ToolExecuting);
            let result = match self.run_tool(&choice, incoming).await {
                Ok(result) => result,
                Err(e) => return inv.suppress(format!("{} failed: {e}", choice.tool)),
            };
            inv.record(format!("{}: {}", choice.tool, clip(&result)), None);
            used.push(choice.tool);
            results.insert(choice.tool, result);
        }

        inv.enter(Stage::Synthesizing);
        let prompt = prompts::synthesis(
            &self.profile.name,
            &self.profile.persona,
            &situation,
            incoming,
            &results,
        );
        let text = match self.synthesize(prompt).await {
            Ok(text) => text,
            Err(reason) => return inv.suppress(reason),
        };
        inv.record(format!("{} chars", text.chars().count()), None);

        self.emit(inv, text, Some(incoming)).await
    }

    /// Proactive variant: speak into a quiet room if the model thinks it helps.
    pub async fn speak_up(&self) -> Outcome {
        let mut inv = Invocation::new(&self.profile.name);

        let (humans, _) = self.room.counts();
        if humans == 0 {
            return inv.suppress("no humans present");
        }
        if !self.room.has_conversation() {
            return inv.suppress("nothing has been said yet");
        }

        inv.enter(Stage::Gating);
        let situation = self.situation().await;
        let prompt = prompts::proactive_gate(&self.profile.name, &self.profile.persona, &situation);
        let gate = match self.gate(&mut inv, prompt).await {
            Ok(gate) => gate,
            Err(reason) => return inv.suppress(reason),
        };

        inv.enter(Stage::Synthesizing);
        let prompt = prompts::proactive(&self.profile.name, &self.profile.persona, &situation, &gate.reason);
        let text = match self.synthesize(prompt).await {
            Ok(text) => text,
            Err(reason) => return inv.suppress(reason),
        };
        inv.record(format!("{} chars", text.chars().count()), None);

        self.emit(inv, text, None).await
    }

    // ── Stages ─────────────────────────────────────────────────────────

    /// Ask the model whether to respond. `Err` carries the suppression reason.
    async fn gate(&self, inv: &mut Invocation, prompt: Vec<PromptMessage>) -> Result<GateDecision, String> {
        let text = self
            .complete(prompt, true)
            .await
            .map_err(|e| format!("gate call failed: {e}"))?;
        let gate = decision::parse_gate(&text).map_err(|e| format!("unreadable gate decision: {e}"))?;

        inv.record(
            format!("should_respond={}: {}", gate.should_respond, gate.reason),
            Some(gate.confidence),
        );

        if !gate.should_respond {
            return Err(format!("declined: {}", gate.reason));
        }
        if gate.confidence < self.settings.min_gate_confidence {
            return Err(format!(
                "low confidence {:.2} (below {:.2})",
                gate.confidence, self.settings.min_gate_confidence
            ));
        }
        Ok(gate)
    }

    async fn select_tool(&self, prompt: Vec<PromptMessage>) -> Result<ToolChoice, String> {
        let text = self
            .complete(prompt, true)
            .await
            .map_err(|e| format!("tool selection failed: {e}"))?;
        decision::parse_tool_choice(&text).map_err(|e| format!("unreadable tool selection: {e}"))
    }

    async fn run_tool(&self, choice: &ToolChoice, incoming: &Message) -> Result<String, ContextError> {
        match choice.tool {
            ToolName::Psychology => {
                let target = choice
                    .target
                    .clone()
                    .unwrap_or_else(|| incoming.sender_name.clone());
                let question = choice.question.clone().unwrap_or_else(|| {
                    format!("What does {target} care about, and how should I talk to them?")
                });
                let options = PeerChatOptions {
                    session_id: Some(self.room.session_id().to_string()),
                    target: Some(target.clone()),
                };
                let answer = self
                    .context
                    .peer(&self.profile.name)
                    .await?
                    .chat(&question, &options)
                    .await?;
                Ok(answer.unwrap_or_else(|| format!("nothing known about {target} yet")))
            }
            ToolName::Search => {
                let query = choice.query.as_deref().unwrap_or(&incoming.content);
                let hits = self.session().await?.search(query, self.settings.search_limit).await?;
                if hits.is_empty() {
                    return Ok(format!("no earlier messages match \"{query}\""));
                }
                Ok(hits
                    .iter()
                    .map(|hit| match &hit.peer {
                        Some(peer) => format!("{peer}: {}", hit.content),
                        None => hit.content.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            ToolName::Respond => Ok(String::new()),
        }
    }

    async fn synthesize(&self, prompt: Vec<PromptMessage>) -> Result<String, String> {
        let text = self
            .complete(prompt, false)
            .await
            .map_err(|e| format!("synthesis failed: {e}"))?;
        let reply = clean_reply(&text, &self.profile.name);
        if reply.is_empty() {
            return Err("empty reply".into());
        }
        Ok(reply)
    }

    async fn emit(&self, mut inv: Invocation, text: String, replying_to: Option<&Message>) -> Outcome {
        inv.enter(Stage::Emitted);
        inv.record("published", None);

        let mut message = Message::chat(&self.profile.name, text).with_decisions(inv.trace);
        message.attributes.referenced_message = replying_to.map(|m| m.id.clone());

        let delivered = self.room.publish(Some(&self.connection), message.clone());
        info!(
            agent = %self.profile.name,
            message_id = %message.id,
            delivered,
            steps = message.attributes.agent_decisions.len(),
            "Agent reply published"
        );

        if let Err(e) = self.persist(&message).await {
            warn!(agent = %self.profile.name, error = %e, "Failed to persist reply to context service");
        }
        Outcome::Emitted(message)
    }

    // ── Plumbing ───────────────────────────────────────────────────────

    async fn complete(&self, messages: Vec<PromptMessage>, json: bool) -> Result<String, ProviderError> {
        let mut request = ProviderRequest::new(&self.profile.model, messages)
            .with_max_tokens(self.profile.max_tokens);
        request = if json {
            request.with_temperature(DECISION_TEMPERATURE).json()
        } else {
            request.with_temperature(self.profile.temperature)
        };
        let response = self.provider.complete(request).await?;
        Ok(response.content)
    }

    async fn session(&self) -> Result<SessionHandle, ContextError> {
        self.context.session(self.room.session_id()).await
    }

    async fn situation(&self) -> Situation {
        let (humans, agents) = self.room.counts();
        let summary = match self.summary().await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(agent = %self.profile.name, error = %e, "Context summary unavailable");
                None
            }
        };
        Situation {
            summary,
            recent: self.room.conversation(self.settings.context_messages),
            humans,
            agents,
        }
    }

    async fn summary(&self) -> Result<Option<String>, ContextError> {
        let params = ContextParams {
            summary: true,
            tokens: Some(self.settings.summary_tokens),
        };
        Ok(self.session().await?.get_context(&params).await?.summary)
    }

    async fn persist(&self, message: &Message) -> Result<(), ContextError> {
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "agent_decisions".into(),
            serde_json::to_value(&message.attributes.agent_decisions).unwrap_or_default(),
        );
        let record = ContextMessage::new(&message.sender_name, &message.content).with_metadata(metadata);
        self.session().await?.add_messages(&[record]).await
    }
}

impl std::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("agent", &self.profile.name)
            .field("model", &self.profile.model)
            .field("provider", &self.provider.name())
            .field("connection", &self.connection)
            .finish()
    }
}

/// Strip quoting and a leading "Name:" the model sometimes adds.
fn clean_reply(text: &str, name: &str) -> String {
    let mut reply = text.trim();
    for prefix in [format!("[{name}]:"), format!("{name}:")] {
        if reply.len() >= prefix.len()
            && reply.is_char_boundary(prefix.len())
            && reply[..prefix.len()].eq_ignore_ascii_case(&prefix)
        {
            reply = reply[prefix.len()..].trim_start();
            break;
        }
    }
    if reply.len() >= 2 && reply.starts_with('"') && reply.ends_with('"') {
        reply = reply[1..reply.len() - 1].trim();
    }
    reply.to_string()
}

fn clip(text: &str) -> String {
    match text.char_indices().nth(TRACE_RESULT_CHARS) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
