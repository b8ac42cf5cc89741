//! Built-in tool declarations.

use super::{Artifact, ToolSpec};
use serde_json::json;

/// Tool names, shared with agent capability sets.
pub mod names {
    pub const SEARCH_PLACES: &str = "search_places";
    pub const NEARBY_SEARCH: &str = "nearby_search";
    pub const WEB_SEARCH: &str = "web_search";
    pub const CREATE_TRAVEL_PLAN: &str = "create_travel_plan";
    pub const VALIDATE_TRAVEL_PLAN: &str = "validate_travel_plan";
    pub const CREATE_CALENDAR_EVENT: &str = "create_calendar_event";
    pub const CREATE_SHARE_PAGE: &str = "create_share_page";
}

/// Every tool the engine ships with.
pub fn builtin_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: names::SEARCH_PLACES.to_string(),
            description: "Look up a specific, named place on the map service. \
                Use when the place name is known (a restaurant, a museum)."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "minLength": 1, "description": "Exact place name"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 15, "default": 5}
                },
                "required": ["query"],
                "additionalProperties": false
            }),
            idempotent: true,
            external_side_effect: false,
            requires_confirmation: false,
            artifact: Artifact::Places,
        },
        ToolSpec {
            name: names::NEARBY_SEARCH.to_string(),
            description: "Find places of a category around a location.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "location": {"type": "string", "minLength": 1},
                    "category": {"type": "string", "description": "Map category code, e.g. FD6 for restaurants", "default": "FD6"},
                    "radius": {"type": "integer", "minimum": 1, "maximum": 20000, "default": 1000}
                },
                "required": ["location"],
                "additionalProperties": false
            }),
            idempotent: true,
            external_side_effect: false,
            requires_confirmation: false,
            artifact: Artifact::Places,
        },
        ToolSpec {
            name: names::WEB_SEARCH.to_string(),
            description: "Search the web for background information while drafting.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "minLength": 1}
                },
                "required": ["query"],
                "additionalProperties": false
            }),
            idempotent: true,
            external_side_effect: false,
            requires_confirmation: false,
            artifact: Artifact::SearchResults,
        },
        ToolSpec {
            name: names::CREATE_TRAVEL_PLAN.to_string(),
            description: "Create a day-by-day itinerary skeleton for a destination.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "destination": {"type": "string", "minLength": 1},
                    "duration": {"type": "integer", "minimum": 1, "maximum": 60, "description": "Number of days"},
                    "theme": {"type": "string", "default": "general"},
                    "travelers": {"type": "integer", "minimum": 1, "default": 1},
                    "start_date": {"type": "string", "description": "YYYY-MM-DD"}
                },
                "required": ["destination", "duration"],
                "additionalProperties": false
            }),
            idempotent: true,
            external_side_effect: false,
            requires_confirmation: false,
            artifact: Artifact::Itinerary,
        },
        ToolSpec {
            name: names::VALIDATE_TRAVEL_PLAN.to_string(),
            description: "Check an itinerary for missing fields and day-count mismatches.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "plan": {"type": "object"}
                },
                "required": ["plan"],
                "additionalProperties": false
            }),
            idempotent: true,
            external_side_effect: false,
            requires_confirmation: false,
            artifact: Artifact::Validation,
        },
        ToolSpec {
            name: names::CREATE_CALENDAR_EVENT.to_string(),
            description: "Write the trip to the user's calendar.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "minLength": 1},
                    "start_date": {"type": "string", "minLength": 10},
                    "end_date": {"type": "string", "minLength": 10},
                    "location": {"type": "string"},
                    "description": {"type": "string"}
                },
                "required": ["title", "start_date"],
                "additionalProperties": false
            }),
            idempotent: false,
            external_side_effect: true,
            requires_confirmation: true,
            artifact: Artifact::CalendarEvent,
        },
        ToolSpec {
            name: names::CREATE_SHARE_PAGE.to_string(),
            description: "Publish the itinerary as a shareable page and return its link.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "minLength": 1},
                    "content": {"type": "string", "minLength": 1},
                    "destination": {"type": "string"},
                    "travel_date": {"type": "string"}
                },
                "required": ["title", "content"],
                "additionalProperties": false
            }),
            idempotent: false,
            external_side_effect: true,
            requires_confirmation: true,
            artifact: Artifact::ShareLink,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_names_unique() {
        let tools = builtin_tools();
        let names: HashSet<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names.len(), tools.len());
    }

    #[test]
    fn test_irreversible_tools_need_confirmation() {
        for tool in builtin_tools() {
            if tool.external_side_effect {
                assert!(tool.requires_confirmation, "{} should be gated", tool.name);
                assert!(!tool.idempotent);
            }
        }
    }
}
