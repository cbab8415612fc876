//! Who talks to whom: an @-mention graph built from history.

use std::collections::{BTreeMap, BTreeSet};
use parley_core::message::{Message, SYSTEM_SENDER};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionEdge {
    pub from: String,
    pub to: String,
    pub mentions: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InteractionGraph {
    /// Everyone who spoke or is present, sorted
    pub nodes: Vec<String>,
    pub edges: Vec<InteractionEdge>,
}

impl InteractionGraph {
    /// Build the graph from conversational messages. `present` adds live
    /// participants who have not spoken yet.
    pub fn build<'a, I>(messages: I, present: &[String]) -> Self
    where
        I: IntoIterator<Item = &'a Message>,
    {
        let messages: Vec<&Message> = messages
            .into_iter()
            .filter(|m| m.kind.is_conversational() && m.sender_name != SYSTEM_SENDER)
            .collect();

        let mut nodes: BTreeSet<String> = present.iter().cloned().collect();
        nodes.extend(messages.iter().map(|m| m.sender_name.clone()));

        let mut counts: BTreeMap<(String, String), usize> = BTreeMap::new();
        for msg in &messages {
            let content = msg.content.to_lowercase();
            for node in &nodes {
                if node.eq_ignore_ascii_case(&msg.sender_name) {
                    continue;
                }
                let mention = format!("@{}", node.to_lowercase());
                let hits = content.matches(&mention).count();
                if hits > 0 {
                    *counts
                        .entry((msg.sender_name.clone(), node.clone()))
                        .or_default() += hits;
                }
            }
        }

        Self {
            nodes: nodes.into_iter().collect(),
            edges: counts
                .into_iter()
                .map(|((from, to), mentions)| InteractionEdge { from, to, mentions })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_mentions_between_speakers() {
        let history = vec![
            Message::chat("alice", "@HelperBot can you check this? @helperbot!"),
            Message::agent_reply("HelperBot", "sure @alice"),
            Message::join("carol"),
            Message::chat("bob", "hello everyone"),
        ];
        let graph = InteractionGraph::build(&history, &["carol".to_string()]);

        assert_eq!(graph.nodes, vec!["HelperBot", "alice", "bob", "carol"]);
        assert!(graph.edges.contains(&InteractionEdge {
            from: "alice".into(),
            to: "HelperBot".into(),
            mentions: 2,
        }));
        assert!(graph.edges.contains(&InteractionEdge {
            from: "HelperBot".into(),
            to: "alice".into(),
            mentions: 1,
        }));
        assert_eq!(graph.edges.len(), 2);
    }
}
