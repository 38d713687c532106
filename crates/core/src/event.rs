//! Events carried by the in-process bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User-facing notification; the router handles this class
pub const UI_NOTIFY: &str = "ui.notify";

/// Published after a scenario lands in a workspace index
pub const SCENARIOS_INSTALLED: &str = "scenarios.installed";

/// A typed event travelling over the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub trace_id: Option<String>,
    pub ts: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            source: String::new(),
            trace_id: None,
            ts: Utc::now(),
        }
    }

    /// Build a `ui.notify` event with the given text
    pub fn notify(text: impl Into<String>) -> Self {
        Self::new(UI_NOTIFY, serde_json::json!({ "text": text.into() }))
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// `payload.text` when it is a non-empty string
    pub fn text(&self) -> Option<&str> {
        self.payload
            .get("text")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }
}
