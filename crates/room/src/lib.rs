//! The chat room: who is here, what was said, and who gets told.
//!
//! [`Room`] is the single owner of the participant registry and the history
//! ring. Every mutation happens under one short lock, and fan-out is a
//! non-blocking `try_send` per connection, so publish order is delivery
//! order for every subscriber.

pub mod registry;
pub mod history;
pub mod bus;
pub mod network;

pub use bus::{Room, RoomSettings, RoomStats};
pub use history::{HistoryQuery, HistoryRing};
pub use network::{InteractionGraph, InteractionEdge};
pub use registry::{Registry, Roster};
