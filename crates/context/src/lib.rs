//! Context service client for Parley.
//!
//! [`ContextClient`] wraps any [`parley_core::ContextProvider`] with a
//! lazily-filled handle cache and rate-limit backoff. Two providers ship
//! with the crate: a REST client for a hosted service and an in-memory
//! store for tests and offline rooms.

pub mod retry;
pub mod client;
pub mod http;
pub mod in_memory;

pub use client::{ContextClient, PeerHandle, SessionHandle};
pub use http::HttpContextProvider;
pub use in_memory::InMemoryContextProvider;
pub use retry::RetryPolicy;

use std::sync::Arc;
use parley_core::ContextProvider;

/// Build the configured context provider.
pub fn build_from_config(config: &parley_config::ContextConfig) -> Arc<dyn ContextProvider> {
    match config.backend.as_str() {
        "http" => Arc::new(HttpContextProvider::new(
            &config.base_url,
            &config.workspace,
            config.api_key.clone(),
        )),
        _ => Arc::new(InMemoryContextProvider::new()),
    }
}
