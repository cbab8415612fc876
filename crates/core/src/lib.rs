//! # Parley Core
//!
//! Domain types, traits, and error definitions for the Parley chat relay.
//! This crate has **zero framework dependencies**: it defines the message
//! model and the two external seams (completion and context providers)
//! that every other crate implements or consumes.
//!
//! ## Design Philosophy
//!
//! Remote collaborators are traits here. Implementations live in their
//! respective crates, which keeps the dependency graph pointing inward and
//! lets tests swap in scripted fakes.

pub mod error;
pub mod message;
pub mod participant;
pub mod provider;
pub mod context;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{ContextError, Error, ProviderError, Result, RoomError};
pub use message::{Attributes, DecisionStep, Message, MessageKind};
pub use participant::{ConnectionId, Participant, ParticipantKind};
pub use provider::{PromptMessage, PromptRole, Provider, ProviderRequest, ProviderResponse, Usage};
pub use context::{
    ContextBundle, ContextMessage, ContextParams, ContextProvider, PeerChatOptions, PeerRef,
    SearchHit, SessionRef,
};
pub use event::{AgentEvent, AgentEventType, RoomSnapshot, ServerEvent};
