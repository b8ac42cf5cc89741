//! Startup-fixed agent definitions.

use super::identity::AgentId;
use crate::tools::catalog::names;
use std::collections::{BTreeMap, HashMap};

/// Model alias used when no override is configured.
pub const DEFAULT_MODEL_ALIAS: &str = "default";

/// Static description of one agent.
///
/// Built once by [`AgentRoster`] and never mutated afterwards; the engine only
/// hands out shared references.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDefinition {
    pub id: AgentId,
    pub description: String,
    /// Tool names this agent may invoke.
    pub capabilities: Vec<String>,
    /// Model alias, resolved against `[model].aliases`.
    pub model_alias: String,
    /// Workers this agent may hand off to besides the coordinator.
    pub peers: Vec<AgentId>,
    /// Target used when a handoff names neither a target nor a usable candidate.
    pub default_next: Option<AgentId>,
    /// Declared tie-break order over candidate targets.
    pub priority: Vec<AgentId>,
    /// A completion from this agent ends the session.
    pub terminal: bool,
    /// Tool whose confirmation must be on record before this agent is routed to.
    pub entry_confirmation: Option<String>,
}

impl AgentDefinition {
    fn new(id: AgentId, description: &str, capabilities: &[&str]) -> Self {
        Self {
            id,
            description: description.to_string(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            model_alias: DEFAULT_MODEL_ALIAS.to_string(),
            peers: Vec::new(),
            default_next: None,
            priority: Vec::new(),
            terminal: false,
            entry_confirmation: None,
        }
    }

    pub fn can_use(&self, tool: &str) -> bool {
        self.capabilities.iter().any(|c| c == tool)
    }

    /// Whether this agent is allowed to transfer control to `target`.
    ///
    /// The coordinator may address any worker. Workers address the
    /// coordinator, their whitelisted peers, and themselves (bounded by the
    /// loop guard).
    pub fn may_address(&self, target: AgentId) -> bool {
        if self.id.is_coordinator() {
            return !target.is_coordinator();
        }
        target.is_coordinator() || target == self.id || self.peers.contains(&target)
    }

    /// Pick among equally valid candidates by declared priority.
    ///
    /// Candidates this agent may not address are ignored; candidates missing
    /// from the priority list are never chosen.
    pub fn pick_candidate(&self, candidates: &[AgentId]) -> Option<AgentId> {
        self.priority
            .iter()
            .copied()
            .find(|p| candidates.contains(p) && self.may_address(*p))
    }
}

/// The closed set of agents enabled for this process.
#[derive(Debug, Clone)]
pub struct AgentRoster {
    agents: BTreeMap<AgentId, AgentDefinition>,
}

impl AgentRoster {
    /// The standard travel-planning roster. The verifier is only registered
    /// when `verifier_enabled` is set.
    pub fn standard(verifier_enabled: bool) -> Self {
        let mut coordinator = AgentDefinition::new(
            AgentId::Coordinator,
            "Routes the request between workers and decides when the session ends.",
            &[],
        );
        coordinator.priority = vec![
            AgentId::Planner,
            AgentId::LocationSearch,
            AgentId::Calendar,
            AgentId::Share,
        ];

        let mut planner = AgentDefinition::new(
            AgentId::Planner,
            "Drafts and revises the day-by-day itinerary.",
            &[names::CREATE_TRAVEL_PLAN, names::VALIDATE_TRAVEL_PLAN, names::WEB_SEARCH],
        );
        planner.peers = vec![AgentId::LocationSearch];
        planner.default_next = Some(AgentId::LocationSearch);
        planner.priority = vec![AgentId::LocationSearch, AgentId::Coordinator];

        let mut location = AgentDefinition::new(
            AgentId::LocationSearch,
            "Finds concrete places for the itinerary on the map service.",
            &[names::SEARCH_PLACES, names::NEARBY_SEARCH, names::WEB_SEARCH],
        );
        location.peers = vec![AgentId::Planner];
        location.default_next = Some(AgentId::Coordinator);
        location.priority = vec![AgentId::Planner, AgentId::Coordinator];

        let mut calendar = AgentDefinition::new(
            AgentId::Calendar,
            "Writes the confirmed itinerary to the user's calendar.",
            &[names::CREATE_CALENDAR_EVENT],
        );
        calendar.peers = vec![AgentId::Share];
        calendar.default_next = Some(AgentId::Coordinator);
        calendar.priority = vec![AgentId::Share, AgentId::Coordinator];
        calendar.entry_confirmation = Some(names::CREATE_CALENDAR_EVENT.to_string());

        let mut share = AgentDefinition::new(
            AgentId::Share,
            "Publishes the itinerary as a shareable page.",
            &[names::CREATE_SHARE_PAGE],
        );
        share.priority = vec![AgentId::Coordinator];
        share.terminal = true;

        let mut agents = BTreeMap::new();
        if verifier_enabled {
            let mut verifier = AgentDefinition::new(
                AgentId::Verifier,
                "Checks a drafted itinerary before it is finalised.",
                &[names::VALIDATE_TRAVEL_PLAN],
            );
            verifier.peers = vec![AgentId::Planner];
            verifier.default_next = Some(AgentId::Coordinator);
            verifier.priority = vec![AgentId::Planner, AgentId::Coordinator];

            planner.peers.push(AgentId::Verifier);
            planner.priority = vec![AgentId::LocationSearch, AgentId::Verifier, AgentId::Coordinator];
            coordinator.priority.push(AgentId::Verifier);
            agents.insert(AgentId::Verifier, verifier);
        }

        for def in [coordinator, planner, location, calendar, share] {
            agents.insert(def.id, def);
        }

        Self { agents }
    }

    /// Apply per-agent model alias overrides keyed by agent wire name.
    ///
    /// Unknown agent names are ignored so an old config keeps loading.
    pub fn with_model_aliases(mut self, overrides: &HashMap<String, String>) -> Self {
        for (name, alias) in overrides {
            if let Ok(id) = name.parse::<AgentId>() {
                if let Some(def) = self.agents.get_mut(&id) {
                    def.model_alias = alias.clone();
                }
            }
        }
        self
    }

    pub fn get(&self, id: AgentId) -> Option<&AgentDefinition> {
        self.agents.get(&id)
    }

    pub fn is_enabled(&self, id: AgentId) -> bool {
        self.agents.contains_key(&id)
    }

    /// Enabled agents in identity order.
    pub fn iter(&self) -> impl Iterator<Item = &AgentDefinition> {
        self.agents.values()
    }

    pub fn workers(&self) -> impl Iterator<Item = &AgentDefinition> {
        self.agents.values().filter(|a| !a.id.is_coordinator())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_roster_without_verifier() {
        let roster = AgentRoster::standard(false);
        assert!(!roster.is_enabled(AgentId::Verifier));
        assert_eq!(roster.workers().count(), 4);

        let planner = roster.get(AgentId::Planner).unwrap();
        assert!(!planner.peers.contains(&AgentId::Verifier));
        assert_eq!(planner.default_next, Some(AgentId::LocationSearch));
    }

    #[test]
    fn test_verifier_registered_when_enabled() {
        let roster = AgentRoster::standard(true);
        assert!(roster.is_enabled(AgentId::Verifier));
        let planner = roster.get(AgentId::Planner).unwrap();
        assert!(planner.may_address(AgentId::Verifier));
        assert!(roster.get(AgentId::Verifier).unwrap().can_use(names::VALIDATE_TRAVEL_PLAN));
    }

    #[test]
    fn test_verifier_returns_findings_to_planner() {
        let roster = AgentRoster::standard(true);
        let verifier = roster.get(AgentId::Verifier).unwrap();

        assert!(verifier.may_address(AgentId::Planner));
        assert!(!verifier.may_address(AgentId::Share));
        let candidates = [AgentId::Coordinator, AgentId::Planner];
        assert_eq!(verifier.pick_candidate(&candidates), Some(AgentId::Planner));
    }

    #[test]
    fn test_addressing_rules() {
        let roster = AgentRoster::standard(false);
        let coordinator = roster.get(AgentId::Coordinator).unwrap();
        let location = roster.get(AgentId::LocationSearch).unwrap();
        let share = roster.get(AgentId::Share).unwrap();

        assert!(coordinator.may_address(AgentId::Share));
        assert!(!coordinator.may_address(AgentId::Coordinator));
        assert!(location.may_address(AgentId::Planner));
        assert!(!location.may_address(AgentId::Calendar));
        assert!(share.may_address(AgentId::Coordinator));
        assert!(!share.may_address(AgentId::Planner));
    }

    #[test]
    fn test_candidate_tie_break_is_fixed() {
        let roster = AgentRoster::standard(false);
        let location = roster.get(AgentId::LocationSearch).unwrap();

        let both = [AgentId::Coordinator, AgentId::Planner];
        assert_eq!(location.pick_candidate(&both), Some(AgentId::Planner));
        let reversed = [AgentId::Planner, AgentId::Coordinator];
        assert_eq!(location.pick_candidate(&reversed), Some(AgentId::Planner));
        assert_eq!(location.pick_candidate(&[AgentId::Calendar]), None);
    }

    #[test]
    fn test_capabilities_are_disjoint_for_writes() {
        let roster = AgentRoster::standard(true);
        let writers: Vec<_> = roster
            .iter()
            .filter(|a| a.can_use(names::CREATE_CALENDAR_EVENT))
            .map(|a| a.id)
            .collect();
        assert_eq!(writers, vec![AgentId::Calendar]);
    }

    #[test]
    fn test_model_alias_override() {
        let mut overrides = HashMap::new();
        overrides.insert("planner".to_string(), "smart".to_string());
        overrides.insert("booking".to_string(), "smart".to_string());

        let roster = AgentRoster::standard(false).with_model_aliases(&overrides);
        assert_eq!(roster.get(AgentId::Planner).unwrap().model_alias, "smart");
        assert_eq!(roster.get(AgentId::Share).unwrap().model_alias, DEFAULT_MODEL_ALIAS);
    }
}
