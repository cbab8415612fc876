//! Cheap pre-gate check: is this message aimed at some other agent?
//!
//! A token counts as an agent name when it matches a live agent's name, or
//! when it ends in one of the configured suffixes ("bot", "agent") with
//! either a non-empty stem or trailing digits: `HelperBot`, `@bot2`,
//! `search_agent`. The bare words "bot" and "agent" are ordinary speech.

use regex_lite::Regex;

#[derive(Debug, Clone)]
pub struct AddressingHeuristic {
    agent_token: Option<Regex>,
}

impl AddressingHeuristic {
    /// Build from suffixes. Empty or blank suffixes are ignored; with none
    /// left, only live agent names are recognized.
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternation: Vec<String> = suffixes
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .map(|s| regex_lite::escape(&s))
            .collect();

        let agent_token = if alternation.is_empty() {
            None
        } else {
            let suffix = alternation.join("|");
            let pattern = format!(r"(?i)^(?:[a-z0-9_\-]+(?:{suffix})[0-9]*|(?:{suffix})[0-9]+)$");
            Regex::new(&pattern).ok()
        };

        Self { agent_token }
    }

    /// The first agent name in `content` that is not `own_name`.
    ///
    /// Returns `None` when the message names no agent, or when it names
    /// this agent at all (a message to "Bot1 and Bot2" is still for Bot1).
    pub fn addressed_elsewhere(
        &self,
        content: &str,
        own_name: &str,
        live_agents: &[String],
    ) -> Option<String> {
        let mut other = None;
        for token in tokens(content) {
            if token.eq_ignore_ascii_case(own_name) {
                return None;
            }
            if other.is_none() && self.is_agent_name(token, live_agents) {
                other = Some(token.to_string());
            }
        }
        other
    }

    fn is_agent_name(&self, token: &str, live_agents: &[String]) -> bool {
        live_agents.iter().any(|a| a.eq_ignore_ascii_case(token))
            || self.agent_token.as_ref().is_some_and(|re| re.is_match(token))
    }
}

impl Default for AddressingHeuristic {
    fn default() -> Self {
        Self::new(["bot", "agent"])
    }
}

/// Words with any leading `@` and surrounding punctuation stripped.
fn tokens(content: &str) -> impl Iterator<Item = &str> {
    content
        .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-' || c == '@'))
        .map(|t| t.trim_start_matches('@').trim_matches('-'))
        .filter(|t| !t.is_empty())
}
