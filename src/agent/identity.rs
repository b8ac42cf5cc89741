//! Closed set of agent identities.
//!
//! Every agent the engine can activate is a variant of [`AgentId`]. Routing
//! signals are parsed into [`RouteTarget`], which adds the `TERMINATE` marker;
//! any other name is rejected at parse time rather than looked up dynamically.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of an agent registered at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    /// Owns routing, retries and termination.
    Coordinator,
    /// Drafts the itinerary.
    Planner,
    /// Looks up places on the map adapter.
    LocationSearch,
    /// Writes the itinerary to the user's calendar.
    Calendar,
    /// Publishes a shareable page; the designed endpoint of a run.
    Share,
    /// Optional checker; disabled unless configured.
    Verifier,
}

impl AgentId {
    /// Every identity, in declaration order.
    pub const ALL: [AgentId; 6] = [
        AgentId::Coordinator,
        AgentId::Planner,
        AgentId::LocationSearch,
        AgentId::Calendar,
        AgentId::Share,
        AgentId::Verifier,
    ];

    /// Canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::Coordinator => "coordinator",
            AgentId::Planner => "planner",
            AgentId::LocationSearch => "location_search",
            AgentId::Calendar => "calendar",
            AgentId::Share => "share",
            AgentId::Verifier => "verifier",
        }
    }

    pub fn is_coordinator(&self) -> bool {
        matches!(self, AgentId::Coordinator)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AgentId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("Unknown agent identity: {}", s))
    }
}

/// Marker that ends the session when issued by the coordinator.
pub const TERMINATE: &str = "TERMINATE";

/// Destination named by a routing signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RouteTarget {
    Agent(AgentId),
    Terminate,
}

impl RouteTarget {
    pub fn agent(&self) -> Option<AgentId> {
        match self {
            RouteTarget::Agent(id) => Some(*id),
            RouteTarget::Terminate => None,
        }
    }
}

impl FromStr for RouteTarget {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == TERMINATE {
            return Ok(RouteTarget::Terminate);
        }
        s.parse().map(RouteTarget::Agent)
    }
}

impl TryFrom<String> for RouteTarget {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RouteTarget> for String {
    fn from(target: RouteTarget) -> Self {
        target.to_string()
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::Agent(id) => write!(f, "{}", id),
            RouteTarget::Terminate => f.write_str(TERMINATE),
        }
    }
}

impl From<AgentId> for RouteTarget {
    fn from(id: AgentId) -> Self {
        RouteTarget::Agent(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_round_trips_through_wire_name() {
        for id in AgentId::ALL {
            assert_eq!(id.as_str().parse::<AgentId>().unwrap(), id);
        }
    }

    #[test]
    fn test_unknown_agent_rejected() {
        assert!("planner_v2".parse::<AgentId>().is_err());
        assert!("Planner".parse::<AgentId>().is_err());
        assert!("".parse::<RouteTarget>().is_err());
    }

    #[test]
    fn test_route_target_terminate_marker() {
        assert_eq!("TERMINATE".parse::<RouteTarget>().unwrap(), RouteTarget::Terminate);
        assert_eq!(
            "share".parse::<RouteTarget>().unwrap(),
            RouteTarget::Agent(AgentId::Share)
        );
        // The marker is case-sensitive.
        assert!("terminate".parse::<RouteTarget>().is_err());
    }

    #[test]
    fn test_route_target_serde() {
        let target: RouteTarget = serde_json::from_str(r#""location_search""#).unwrap();
        assert_eq!(target, RouteTarget::Agent(AgentId::LocationSearch));
        assert_eq!(serde_json::to_string(&RouteTarget::Terminate).unwrap(), r#""TERMINATE""#);
        assert!(serde_json::from_str::<RouteTarget>(r#""hotel_booker""#).is_err());
    }
}
