//! Deterministic tool provider for tests and offline runs.

use super::{ToolError, ToolErrorKind, ToolProvider};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Provider that answers from fixed results and counts every call it receives.
///
/// Queued failures are returned first, then the fixed result for the tool.
/// With a delay, each call sleeps before answering and the provider keeps a
/// start/end timeline plus the peak number of calls in flight.
#[derive(Default)]
pub struct RecordingToolProvider {
    results: Mutex<HashMap<String, Value>>,
    failures: Mutex<HashMap<String, VecDeque<ToolError>>>,
    calls: Mutex<Vec<(String, Value)>>,
    delay: Option<Duration>,
    timeline: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingToolProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every call for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `start <tool>` and `end <tool>` entries in the order they happened.
    pub fn timeline(&self) -> Vec<String> {
        self.timeline.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Most calls that were in flight at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn mark(&self, event: &str, tool: &str) {
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.push(format!("{} {}", event, tool));
        }
    }

    /// Answer every call to `tool` with `value`.
    pub fn set_result(&self, tool: &str, value: Value) {
        if let Ok(mut results) = self.results.lock() {
            results.insert(tool.to_string(), value);
        }
    }

    /// Fail the next call to `tool` with `error`.
    pub fn push_failure(&self, tool: &str, error: ToolError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.entry(tool.to_string()).or_default().push_back(error);
        }
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, tool: &str) -> usize {
        self.calls().iter().filter(|(name, _)| name == tool).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls().len()
    }
}

#[async_trait]
impl ToolProvider for RecordingToolProvider {
    async fn invoke(&self, tool: &str, args: &Value) -> std::result::Result<Value, ToolError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((tool.to_string(), args.clone()));
        }

        self.mark("start", tool);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.mark("end", tool);

        let failure = self
            .failures
            .lock()
            .ok()
            .and_then(|mut f| f.get_mut(tool).and_then(|queue| queue.pop_front()));
        if let Some(error) = failure {
            return Err(error);
        }

        self.results
            .lock()
            .ok()
            .and_then(|r| r.get(tool).cloned())
            .ok_or_else(|| {
                ToolError::new(ToolErrorKind::Upstream, format!("no result configured for '{}'", tool))
                    .with_retryable(false)
            })
    }
}
