//! Routing rules
//!
//! Rules file layout (YAML), either a bare list or wrapped in `rules:`:
//!
//! ```yaml
//! rules:
//!   - match: { text_contains: "alarm" }
//!     target: { node_id: kitchen }
//!   - target: { node_id: this }
//! ```

use nodemesh_core::Event;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::RouterError;

/// Target value meaning "handle on this node"
pub const THIS_NODE: &str = "this";

/// Predicate over an event; every present field must hold
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleMatch {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_contains: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_regex: Option<String>,

    /// Payload fields that must compare equal
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub payload: serde_json::Map<String, serde_json::Value>,

    #[serde(skip)]
    compiled: Option<Regex>,
}

impl RuleMatch {
    /// Predicate on a text substring only
    pub fn text_contains(needle: impl Into<String>) -> Self {
        Self {
            text_contains: Some(needle.into()),
            ..Self::default()
        }
    }

    /// Predicate on the event source only
    pub fn source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.event_type.is_none()
            && self.source.is_none()
            && self.text_contains.is_none()
            && self.text_regex.is_none()
            && self.payload.is_empty()
    }

    fn compile(&mut self) -> Result<(), regex::Error> {
        self.compiled = match &self.text_regex {
            Some(pattern) => Some(Regex::new(pattern)?),
            None => None,
        };
        Ok(())
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(event_type) = &self.event_type {
            if event.event_type != *event_type {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if event.source != *source {
                return false;
            }
        }

        let text = event.text().unwrap_or_default();
        if let Some(needle) = &self.text_contains {
            if !text.contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(re) = &self.compiled {
            if !re.is_match(text) {
                return false;
            }
        }

        self.payload
            .iter()
            .all(|(key, expected)| event.payload.get(key) == Some(expected))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTarget {
    #[serde(default)]
    pub node_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingRule {
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub matcher: Option<RuleMatch>,

    #[serde(default)]
    pub target: RuleTarget,
}

impl RoutingRule {
    pub fn to_node(node_id: impl Into<String>) -> Self {
        Self {
            matcher: None,
            target: RuleTarget {
                node_id: node_id.into(),
            },
        }
    }

    pub fn with_match(mut self, mut matcher: RuleMatch) -> Result<Self, RouterError> {
        matcher
            .compile()
            .map_err(|e| RouterError::InvalidRule(e.to_string()))?;
        self.matcher = Some(matcher);
        Ok(self)
    }

    /// Absent or empty predicates accept everything
    pub fn accepts(&self, event: &Event) -> bool {
        self.matcher
            .as_ref()
            .map(|m| m.is_empty() || m.matches(event))
            .unwrap_or(true)
    }

    /// Target node id with `this` and empty resolved to `this_node`
    pub fn resolve_target<'a>(&'a self, this_node: &'a str) -> &'a str {
        let target = self.target.node_id.trim();
        if target.is_empty() || target == THIS_NODE {
            this_node
        } else {
            target
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RulesDocument {
    List(Vec<RoutingRule>),
    Wrapped {
        #[serde(default)]
        rules: Vec<RoutingRule>,
    },
}

/// Parse a rules document. Empty input yields no rules.
pub fn parse_rules(content: &str) -> Result<Vec<RoutingRule>, RouterError> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let doc: Option<RulesDocument> =
        serde_yaml::from_str(content).map_err(|e| RouterError::InvalidRule(e.to_string()))?;
    let mut rules = match doc {
        Some(RulesDocument::List(rules)) => rules,
        Some(RulesDocument::Wrapped { rules }) => rules,
        None => Vec::new(),
    };

    for (index, rule) in rules.iter_mut().enumerate() {
        if let Some(matcher) = rule.matcher.as_mut() {
            matcher
                .compile()
                .map_err(|e| RouterError::InvalidRule(format!("rule {index}: {e}")))?;
        }
    }
    Ok(rules)
}

/// Load rules from `path`; a missing file means no rules
pub fn load_rules(path: &Path) -> Result<Vec<RoutingRule>, RouterError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_rules(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(RouterError::Io(e)),
    }
}
