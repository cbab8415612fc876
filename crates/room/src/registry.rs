//! Live participants keyed by connection.

use std::collections::HashMap;
use parley_core::participant::{ConnectionId, Participant, ParticipantKind};
use serde::Serialize;

/// Participants split by kind, oldest joiner first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Roster {
    pub humans: Vec<Participant>,
    pub agents: Vec<Participant>,
}

#[derive(Debug, Default)]
pub struct Registry {
    participants: HashMap<ConnectionId, Participant>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a participant. Re-registering a connection overwrites it and
    /// returns the previous record.
    pub fn register(&mut self, participant: Participant) -> Option<Participant> {
        self.participants.insert(participant.id.clone(), participant)
    }

    pub fn unregister(&mut self, id: &ConnectionId) -> Option<Participant> {
        self.participants.remove(id)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut Participant> {
        self.participants.get_mut(id)
    }

    /// Case-insensitive lookup by display name.
    pub fn find_by_name(&self, name: &str) -> Option<&Participant> {
        self.participants
            .values()
            .find(|p| p.display_name.eq_ignore_ascii_case(name))
    }

    /// Whether `name` belongs to a live participant other than `except`.
    pub fn is_name_taken(&self, name: &str, except: Option<&ConnectionId>) -> bool {
        self.find_by_name(name)
            .is_some_and(|p| Some(&p.id) != except)
    }

    /// First free `<name>_<n>` for n = 2, 3, …
    pub fn suggest_name(&self, name: &str) -> String {
        (2..)
            .map(|n| format!("{name}_{n}"))
            .find(|candidate| self.find_by_name(candidate).is_none())
            .unwrap_or_else(|| format!("{name}_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn list(&self) -> Roster {
        let mut all: Vec<&Participant> = self.participants.values().collect();
        all.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));

        let mut roster = Roster::default();
        for p in all {
            match p.kind {
                ParticipantKind::Human => roster.humans.push(p.clone()),
                ParticipantKind::Agent => roster.agents.push(p.clone()),
            }
        }
        roster
    }

    pub fn agents(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values().filter(|p| p.is_agent())
    }

    /// (humans, agents)
    pub fn counts(&self) -> (usize, usize) {
        let agents = self.agents().count();
        (self.participants.len() - agents, agents)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn human(id: &str, name: &str) -> Participant {
        Participant::human(ConnectionId::from(id), name)
    }

    #[test]
    fn register_is_idempotent_per_connection() {
        let mut reg = Registry::new();
        assert!(reg.register(human("c1", "alice")).is_none());
        let previous = reg.register(human("c1", "alicia")).unwrap();
        assert_eq!(previous.display_name, "alice");
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(&ConnectionId::from("c1")).unwrap().display_name, "alicia");
    }

    #[test]
    fn unregistered_participant_is_never_listed() {
        let mut reg = Registry::new();
        reg.register(human("c1", "alice"));
        reg.register(Participant::agent(ConnectionId::from("c2"), "HelperBot", ["search"]));
        reg.register(human("c3", "bob"));

        let removed = reg.unregister(&ConnectionId::from("c1")).unwrap();
        assert_eq!(removed.display_name, "alice");

        let roster = reg.list();
        assert!(roster.humans.iter().all(|p| p.display_name != "alice"));
        assert_eq!(roster.humans.len(), 1);
        assert_eq!(roster.agents.len(), 1);
        assert_eq!(reg.counts(), (1, 1));
    }

    #[test]
    fn name_checks_are_case_insensitive_and_skip_self() {
        let mut reg = Registry::new();
        reg.register(human("c1", "Alice"));
        assert!(reg.is_name_taken("alice", None));
        assert!(reg.is_name_taken("ALICE", Some(&ConnectionId::from("c9"))));
        assert!(!reg.is_name_taken("alice", Some(&ConnectionId::from("c1"))));
    }

    #[test]
    fn suggestion_skips_taken_variants() {
        let mut reg = Registry::new();
        reg.register(human("c1", "alice"));
        assert_eq!(reg.suggest_name("alice"), "alice_2");
        reg.register(human("c2", "alice_2"));
        assert_eq!(reg.suggest_name("alice"), "alice_3");
    }
}
