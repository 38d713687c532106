//! Node identity, capability and liveness types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Role tag carried by hub nodes
pub const ROLE_HUB: &str = "hub";

/// Role tag carried by member nodes
pub const ROLE_MEMBER: &str = "member";

/// Role this process plays in the subnet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Owns the authoritative directory and answers lookups
    Hub,
    /// Asks the hub for everything it cannot see locally
    #[default]
    Member,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Hub => ROLE_HUB,
            NodeRole::Member => ROLE_MEMBER,
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            ROLE_HUB => Ok(NodeRole::Hub),
            ROLE_MEMBER => Ok(NodeRole::Member),
            other => Err(format!("unknown node role '{other}'")),
        }
    }
}

/// Persisted identity of a mesh participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    #[serde(default)]
    pub subnet_id: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    pub last_seen: DateTime<Utc>,
    /// Fields reported by newer agents that this version does not model
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl NodeRecord {
    pub fn new(node_id: impl Into<String>, last_seen: DateTime<Utc>) -> Self {
        Self {
            node_id: node_id.into(),
            subnet_id: None,
            roles: BTreeSet::new(),
            hostname: None,
            base_url: None,
            last_seen,
            extra: BTreeMap::new(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_hub(&self) -> bool {
        self.has_role(ROLE_HUB)
    }
}

/// I/O channels and skills a node exposes
///
/// A snapshot always replaces the previous one for the same node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    #[serde(default)]
    pub io: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

impl CapabilitySet {
    pub fn new(io: Vec<String>, skills: Vec<String>) -> Self {
        Self { io, skills }
    }

    pub fn has_skill(&self, name: &str) -> bool {
        self.skills.iter().any(|s| s == name)
    }

    pub fn has_io(&self, channel: &str) -> bool {
        self.io.iter().any(|c| c == channel)
    }

    pub fn is_empty(&self) -> bool {
        self.io.is_empty() && self.skills.is_empty()
    }
}

/// Registration payload sent by a node joining the subnet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    #[serde(default)]
    pub subnet_id: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub capacity: Option<CapabilitySet>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl NodeInfo {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_capacity(mut self, capacity: CapabilitySet) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Split into the persisted record and its capability snapshot
    pub fn into_parts(self, now: DateTime<Utc>) -> (NodeRecord, CapabilitySet) {
        let record = NodeRecord {
            node_id: self.node_id,
            subnet_id: self.subnet_id,
            roles: self.roles,
            hostname: self.hostname,
            base_url: self.base_url,
            last_seen: now,
            extra: self.extra,
        };
        (record, self.capacity.unwrap_or_default())
    }
}

/// Volatile liveness overlay for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveState {
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

impl LiveState {
    pub fn online(last_seen: DateTime<Utc>) -> Self {
        Self {
            online: true,
            last_seen,
        }
    }

    pub fn offline(last_seen: DateTime<Utc>) -> Self {
        Self {
            online: false,
            last_seen,
        }
    }

    /// Strictly more than `ttl` has elapsed since the last sign of life
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.last_seen) > ttl
    }
}

/// Persisted record with the live status laid over it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    #[serde(flatten)]
    pub record: NodeRecord,
    pub online: bool,
}
