//! Bounded, insertion-ordered message history.

use std::collections::VecDeque;
use chrono::{DateTime, Utc};
use parley_core::message::{Message, MessageKind};

/// Filter for [`HistoryRing::query`].
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub limit: usize,
    pub kind: Option<MessageKind>,
    /// Only messages created strictly after this instant
    pub since: Option<DateTime<Utc>>,
}

impl HistoryQuery {
    pub fn last(limit: usize) -> Self {
        Self { limit, kind: None, since: None }
    }
}

/// FIFO ring: once full, every push evicts the oldest message.
#[derive(Debug)]
pub struct HistoryRing {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, returning the evicted message if the ring was full.
    pub fn push(&mut self, message: Message) -> Option<Message> {
        let evicted = if self.messages.len() == self.capacity {
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(message);
        evicted
    }

    /// The `n` most recent messages of any kind, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).cloned().collect()
    }

    /// Conversational messages matching `query`, capped at `limit`,
    /// most recent last. Presence and system notices never match.
    pub fn query(&self, query: &HistoryQuery) -> Vec<Message> {
        let mut matched: Vec<Message> = self
            .messages
            .iter()
            .rev()
            .filter(|m| m.kind.is_conversational())
            .filter(|m| query.kind.is_none_or(|k| m.kind == k))
            .filter(|m| query.since.is_none_or(|since| m.created_at > since))
            .take(query.limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.back()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
