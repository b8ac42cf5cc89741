//! In-process planner tools and the HTTP gateway for external adapters.

use super::catalog::names;
use super::{ToolError, ToolErrorKind, ToolProvider};
use crate::error::{ItineraError, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Client for the adapter gateway fronting maps, search, calendar and pages.
///
/// Each tool is exposed as `POST {base}/tools/{name}` taking the validated
/// arguments as a JSON body and answering with the tool output.
#[derive(Clone)]
pub struct GatewayClient {
    base: Url,
    http: reqwest::Client,
}

impl GatewayClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| ItineraError::Config(format!("Invalid tool gateway URL '{}': {}", base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, tool: &str) -> std::result::Result<Url, ToolError> {
        self.base
            .join(&format!("tools/{}", tool))
            .map_err(|e| ToolError::new(ToolErrorKind::InvalidInput, e.to_string()))
    }

    #[instrument(skip(self, args))]
    pub async fn call(&self, tool: &str, args: &Value) -> std::result::Result<Value, ToolError> {
        let url = self.endpoint(tool)?;
        debug!("POST {}", url);

        let response = self.http.post(url).json(args).send().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::new(ToolErrorKind::Timeout, e.to_string())
            } else {
                ToolError::new(ToolErrorKind::Upstream, e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ToolError::new(ToolErrorKind::Upstream, format!("Malformed gateway response: {}", e)))
    }
}

fn classify_status(status: StatusCode, body: String) -> ToolError {
    let message = format!("gateway answered {}: {}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        ToolError::new(ToolErrorKind::RateLimited, message)
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        ToolError::new(ToolErrorKind::Timeout, message)
    } else if status.is_client_error() {
        ToolError::new(ToolErrorKind::InvalidInput, message)
    } else {
        ToolError::new(ToolErrorKind::Upstream, message)
    }
}

/// Default provider: planner tools run in-process, everything else goes to
/// the gateway when one is configured.
pub struct LocalToolProvider {
    gateway: Option<GatewayClient>,
}

impl LocalToolProvider {
    pub fn new(gateway: Option<GatewayClient>) -> Self {
        Self { gateway }
    }

    pub fn has_gateway(&self) -> bool {
        self.gateway.is_some()
    }
}

#[async_trait]
impl ToolProvider for LocalToolProvider {
    async fn invoke(&self, tool: &str, args: &Value) -> std::result::Result<Value, ToolError> {
        match tool {
            names::CREATE_TRAVEL_PLAN => create_travel_plan(args),
            names::VALIDATE_TRAVEL_PLAN => Ok(validate_travel_plan(&args["plan"])),
            _ => match &self.gateway {
                Some(gateway) => gateway.call(tool, args).await,
                None => Err(ToolError::new(
                    ToolErrorKind::Upstream,
                    format!("no adapter configured for '{}' (set tools.gateway_url)", tool),
                )
                .with_retryable(false)),
            },
        }
    }
}

const DAY_TEMPLATE: [(&str, &str, &str); 5] = [
    ("09:00", "start of day", "accommodation"),
    ("12:00", "lunch", "tbd"),
    ("15:00", "sightseeing", "tbd"),
    ("18:00", "dinner", "tbd"),
    ("21:00", "rest", "accommodation"),
];

/// Build the day-by-day skeleton. Dates are only filled from an explicit
/// `start_date`, so identical arguments always produce identical plans.
fn create_travel_plan(args: &Value) -> std::result::Result<Value, ToolError> {
    let destination = args["destination"].as_str().unwrap_or_default();
    let duration = args["duration"].as_u64().unwrap_or(1);
    let theme = args["theme"].as_str().unwrap_or("general");
    let travelers = args["travelers"].as_u64().unwrap_or(1);

    let start = match args["start_date"].as_str() {
        Some(raw) => Some(NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
            ToolError::new(ToolErrorKind::InvalidInput, format!("start_date '{}': {}", raw, e))
        })?),
        None => None,
    };

    let itinerary: Vec<Value> = (1..=duration)
        .map(|day| {
            let date = start.map(|s| (s + ChronoDuration::days(day as i64 - 1)).format("%Y-%m-%d").to_string());
            let activities: Vec<Value> = DAY_TEMPLATE
                .iter()
                .map(|(time, activity, location)| {
                    let activity = if day == 1 && *time == "09:00" {
                        format!("arrive in {}", destination)
                    } else {
                        activity.to_string()
                    };
                    json!({"time": time, "activity": activity, "location": location})
                })
                .collect();
            json!({"day": day, "date": date, "activities": activities})
        })
        .collect();

    Ok(json!({
        "destination": destination,
        "duration": duration,
        "theme": theme,
        "travelers": travelers,
        "start_date": start.map(|s| s.format("%Y-%m-%d").to_string()),
        "itinerary": itinerary,
    }))
}

fn validate_travel_plan(plan: &Value) -> Value {
    let mut issues = Vec::new();

    for field in ["destination", "duration", "itinerary"] {
        if plan.get(field).is_none() {
            issues.push(format!("missing field: {}", field));
        }
    }

    if let (Some(days), Some(duration)) = (plan["itinerary"].as_array(), plan["duration"].as_u64()) {
        if days.len() as u64 != duration {
            issues.push(format!(
                "itinerary has {} days but duration is {}",
                days.len(),
                duration
            ));
        }
    }

    json!({"valid": issues.is_empty(), "issues": issues})
}
