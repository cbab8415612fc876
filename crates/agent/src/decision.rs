//! Parsing the model's structured answers.
//!
//! Models wrap JSON in prose and code fences more often than not, so the
//! parsers look for the outermost object in the text. Anything that does
//! not parse is an error, and callers treat every error as "do not respond".

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DecisionError {
    #[error("no JSON object in model output")]
    NoJson,

    #[error("malformed decision: {0}")]
    Malformed(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

/// Result of the respond/don't-respond gate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GateDecision {
    pub should_respond: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub confidence: f32,
}

/// The tools the selection step may pick from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolName {
    /// Ask the context service what it knows about a participant
    Psychology,
    /// Semantic search over the session's messages
    Search,
    /// Stop gathering and write the reply
    Respond,
}

impl ToolName {
    /// Tools that gather information, in prompt order.
    pub const GATHERING: [ToolName; 2] = [ToolName::Psychology, ToolName::Search];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Psychology => "psychology",
            Self::Search => "search",
            Self::Respond => "respond",
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ToolName {
    type Err = DecisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "psychology" | "dialectic" => Ok(Self::Psychology),
            "search" => Ok(Self::Search),
            "respond" | "none" => Ok(Self::Respond),
            other => Err(DecisionError::UnknownTool(other.to_string())),
        }
    }
}

/// One tool selection, with the arguments the model chose for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolChoice {
    pub tool: ToolName,
    pub reason: String,
    /// Participant to ask about (psychology)
    pub target: Option<String>,
    /// Question to put to the context service (psychology)
    pub question: Option<String>,
    /// Search query (search)
    pub query: Option<String>,
}

#[derive(Deserialize)]
struct RawToolChoice {
    tool: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    query: Option<String>,
}

/// The outermost `{ ... }` span in `text`.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_gate(text: &str) -> Result<GateDecision, DecisionError> {
    let json = extract_json(text).ok_or(DecisionError::NoJson)?;
    let mut decision: GateDecision =
        serde_json::from_str(json).map_err(|e| DecisionError::Malformed(e.to_string()))?;
    decision.confidence = normalize_confidence(decision.confidence);
    Ok(decision)
}

pub fn parse_tool_choice(text: &str) -> Result<ToolChoice, DecisionError> {
    let json = extract_json(text).ok_or(DecisionError::NoJson)?;
    let raw: RawToolChoice =
        serde_json::from_str(json).map_err(|e| DecisionError::Malformed(e.to_string()))?;

    Ok(ToolChoice {
        tool: raw.tool.parse()?,
        reason: raw.reason,
        target: non_blank(raw.target),
        question: non_blank(raw.question),
        query: non_blank(raw.query),
    })
}

/// Percentages become fractions; the result is clamped to [0, 1].
fn normalize_confidence(value: f32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    let value = if value > 1.0 && value <= 100.0 { value / 100.0 } else { value };
    value.clamp(0.0, 1.0)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
