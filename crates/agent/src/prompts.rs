//! Prompt construction for each pipeline stage.

use std::collections::BTreeMap;
use parley_core::message::Message;
use parley_core::provider::PromptMessage;
use crate::decision::ToolName;

/// What the agent knows about the room when it decides.
#[derive(Debug, Clone, Default)]
pub struct Situation {
    /// Rolling summary from the context service, if any
    pub summary: Option<String>,
    /// Recent conversational messages, oldest first
    pub recent: Vec<Message>,
    pub humans: usize,
    pub agents: usize,
}

impl Situation {
    fn transcript(&self) -> String {
        if self.recent.is_empty() {
            return "(no messages yet)".to_string();
        }
        self.recent
            .iter()
            .map(|m| format!("[{}]: {}", m.sender_name, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render(&self) -> String {
        let mut out = format!(
            "The room has {} human(s) and {} agent(s).\n",
            self.humans, self.agents
        );
        if let Some(summary) = &self.summary {
            out.push_str(&format!("Conversation summary: {summary}\n"));
        }
        out.push_str("Recent messages:\n");
        out.push_str(&self.transcript());
        out
    }
}

fn identity(name: &str, persona: &str) -> String {
    format!("You are {name}, an AI participant in a group chat. {persona}")
}

pub fn gate(name: &str, persona: &str, situation: &Situation, incoming: &Message) -> Vec<PromptMessage> {
    vec![
        PromptMessage::system(format!(
            "{}\n\nDecide whether you should reply to the latest message. Reply when you are \
             addressed, asked a question you can help with, or can add something useful. Stay \
             quiet when the message is aimed at someone else or the conversation does not need \
             you.\n\nAnswer with JSON only: \
             {{\"should_respond\": bool, \"reason\": string, \"confidence\": number between 0 and 1}}",
            identity(name, persona)
        )),
        PromptMessage::user(format!(
            "{}\n\nLatest message from {}: {}",
            situation.render(),
            incoming.sender_name,
            incoming.content
        )),
    ]
}

pub fn tool_selection(
    name: &str,
    situation: &Situation,
    incoming: &Message,
    used: &[ToolName],
    results: &BTreeMap<ToolName, String>,
) -> Vec<PromptMessage> {
    let available: Vec<&str> = ToolName::GATHERING
        .iter()
        .filter(|t| !used.contains(t))
        .map(|t| t.as_str())
        .chain(std::iter::once(ToolName::Respond.as_str()))
        .collect();

    vec![
        PromptMessage::system(format!(
            "You are {name}. Before replying you may gather information with one tool at a time.\n\
             - psychology: ask what is known about a participant. Arguments: \"target\" (participant name), \"question\".\n\
             - search: search earlier messages in this chat. Arguments: \"query\".\n\
             - respond: stop gathering and write the reply.\n\
             Available now: {}.\n\n\
             Answer with JSON only: {{\"tool\": string, \"reason\": string, \"target\": string?, \"question\": string?, \"query\": string?}}",
            available.join(", ")
        )),
        PromptMessage::user(format!(
            "{}\n\nMessage to answer, from {}: {}\n\nGathered so far:\n{}",
            situation.render(),
            incoming.sender_name,
            incoming.content,
            render_results(results)
        )),
    ]
}

pub fn synthesis(
    name: &str,
    persona: &str,
    situation: &Situation,
    incoming: &Message,
    results: &BTreeMap<ToolName, String>,
) -> Vec<PromptMessage> {
    vec![
        PromptMessage::system(format!(
            "{}\n\nWrite your next chat message. Keep it short and conversational. Output only \
             the message text, without your name or quotes.",
            identity(name, persona)
        )),
        PromptMessage::user(format!(
            "{}\n\nYou are replying to {}: {}\n\nWhat you found out:\n{}",
            situation.render(),
            incoming.sender_name,
            incoming.content,
            render_results(results)
        )),
    ]
}

pub fn proactive_gate(name: &str, persona: &str, situation: &Situation) -> Vec<PromptMessage> {
    vec![
        PromptMessage::system(format!(
            "{}\n\nThe chat has gone quiet. Decide whether you should say something unprompted: \
             pick up a loose thread, follow up on an open question, or check in. Do not speak \
             just to fill silence.\n\nAnswer with JSON only: \
             {{\"should_respond\": bool, \"reason\": string, \"confidence\": number between 0 and 1}}",
            identity(name, persona)
        )),
        PromptMessage::user(situation.render()),
    ]
}

pub fn proactive(name: &str, persona: &str, situation: &Situation, reason: &str) -> Vec<PromptMessage> {
    vec![
        PromptMessage::system(format!(
            "{}\n\nThe chat has gone quiet and you decided to speak up ({reason}). Write one \
             short message. Output only the message text.",
            identity(name, persona)
        )),
        PromptMessage::user(situation.render()),
    ]
}

fn render_results(results: &BTreeMap<ToolName, String>) -> String {
    if results.is_empty() {
        return "(nothing)".to_string();
    }
    results
        .iter()
        .map(|(tool, result)| format!("- {tool}: {result}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_prompt_hides_used_tools() {
        let situation = Situation::default();
        let incoming = Message::chat("alice", "what did bob say about rust?");
        let mut results = BTreeMap::new();
        results.insert(ToolName::Search, "bob: rust is great".to_string());

        let prompt = tool_selection("HelperBot", &situation, &incoming, &[ToolName::Search], &results);
        assert!(prompt[0].content.contains("Available now: psychology, respond."));
        assert!(prompt[1].content.contains("- search: bob: rust is great"));
    }

    #[test]
    fn situation_renders_summary_and_transcript() {
        let situation = Situation {
            summary: Some("2 messages so far between alice, bob.".into()),
            recent: vec![Message::chat("alice", "hi"), Message::chat("bob", "hey")],
            humans: 2,
            agents: 1,
        };
        let rendered = situation.render();
        assert!(rendered.starts_with("The room has 2 human(s) and 1 agent(s)."));
        assert!(rendered.contains("Conversation summary: 2 messages"));
        assert!(rendered.ends_with("[alice]: hi\n[bob]: hey"));
    }
}
