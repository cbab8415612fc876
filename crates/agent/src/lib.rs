//! Agent decision engine for Parley.
//!
//! An agent decides for every chat message whether to reply at all, which
//! context tools to consult, and what to say. Agents can also speak up on
//! their own when the room goes quiet.

pub mod addressing;
pub mod decision;
pub mod engine;
pub mod prompts;
pub mod runner;
pub mod scheduler;
#[cfg(any(test, feature = "test-util"))]
pub mod test_helpers;

pub use addressing::AddressingHeuristic;
pub use decision::{DecisionError, GateDecision, ToolChoice, ToolName};
pub use engine::{AgentProfile, DecisionEngine, Outcome, Stage};
pub use runner::{AgentHandle, AgentRunner};
pub use scheduler::ProactiveScheduler;
