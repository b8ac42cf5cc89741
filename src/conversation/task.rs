//! Structured task context built up over a session.

use crate::tools::Artifact;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything the agents have produced so far.
///
/// Only ever extended by applying history records, so it can be rebuilt from
/// the log at any time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Latest user request.
    pub request: Option<String>,
    /// Current itinerary draft.
    pub itinerary: Option<Value>,
    pub places: Vec<Value>,
    pub search_results: Vec<Value>,
    pub validations: Vec<Value>,
    pub calendar_events: Vec<Value>,
    pub share_links: Vec<String>,
    /// Completion texts from workers, in order.
    pub notes: Vec<String>,
}

impl TaskContext {
    /// Fold a successful tool result in.
    pub fn absorb_tool_output(&mut self, artifact: Artifact, output: &Value) {
        match artifact {
            Artifact::Places => self.add_places(list_under(output, "places")),
            Artifact::SearchResults => {
                for hit in list_under(output, "results") {
                    if !self.search_results.contains(&hit) {
                        self.search_results.push(hit);
                    }
                }
            }
            Artifact::Itinerary => self.itinerary = Some(output.clone()),
            Artifact::Validation => self.validations.push(output.clone()),
            Artifact::CalendarEvent => self.calendar_events.push(output.clone()),
            Artifact::ShareLink => {
                if let Some(url) = output["url"].as_str() {
                    self.add_link(url);
                }
            }
        }
    }

    /// Fold the well-known keys of a handoff or completion payload in.
    pub fn absorb_payload(&mut self, payload: &Value) {
        if let Some(itinerary) = payload.get("itinerary").filter(|v| !v.is_null()) {
            self.itinerary = Some(itinerary.clone());
        }
        if let Some(places) = payload.get("places").and_then(Value::as_array) {
            self.add_places(places.clone());
        }
        if let Some(url) = payload.get("share_url").and_then(Value::as_str) {
            self.add_link(url);
        }
    }

    pub fn has_itinerary(&self) -> bool {
        self.itinerary.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == TaskContext::default()
    }

    fn add_places(&mut self, places: Vec<Value>) {
        for place in places {
            if !self.places.contains(&place) {
                self.places.push(place);
            }
        }
    }

    fn add_link(&mut self, url: &str) {
        if !self.share_links.iter().any(|l| l == url) {
            self.share_links.push(url.to_string());
        }
    }
}

/// `value[key]` as a list, or `value` itself when it already is one.
fn list_under(value: &Value, key: &str) -> Vec<Value> {
    match value.get(key).and_then(Value::as_array).or_else(|| value.as_array()) {
        Some(items) => items.clone(),
        None if value.is_null() => Vec::new(),
        None => vec![value.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_places_are_deduplicated() {
        let mut ctx = TaskContext::default();
        let output = json!({"places": [{"name": "Gyeongbokgung"}, {"name": "Bukchon"}]});
        ctx.absorb_tool_output(Artifact::Places, &output);
        ctx.absorb_tool_output(Artifact::Places, &output);
        assert_eq!(ctx.places.len(), 2);
    }

    #[test]
    fn test_bare_array_output() {
        let mut ctx = TaskContext::default();
        ctx.absorb_tool_output(Artifact::SearchResults, &json!([{"title": "Seoul guide"}]));
        assert_eq!(ctx.search_results.len(), 1);
    }

    #[test]
    fn test_share_link_needs_url() {
        let mut ctx = TaskContext::default();
        ctx.absorb_tool_output(Artifact::ShareLink, &json!({"page_id": "p1"}));
        assert!(ctx.share_links.is_empty());
        ctx.absorb_tool_output(Artifact::ShareLink, &json!({"url": "https://pages.example/p1"}));
        assert_eq!(ctx.share_links, vec!["https://pages.example/p1"]);
    }

    #[test]
    fn test_payload_keys() {
        let mut ctx = TaskContext::default();
        ctx.absorb_payload(&json!({"itinerary": {"days": 4}, "places": [{"name": "N Seoul Tower"}]}));
        assert!(ctx.has_itinerary());
        assert_eq!(ctx.places.len(), 1);

        ctx.absorb_payload(&json!({"itinerary": null}));
        assert!(ctx.has_itinerary());
    }
}
