// Core types for field nodes

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::FieldError;

/// Affinity tag that matches every node
pub const WILDCARD_AFFINITY: &str = "*";

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9_.:-]*$").unwrap_or_else(|e| panic!("invalid tag pattern: {e}"))
});

/// Lowercase capability tag such as `backend` or `lang:rust`
pub fn is_valid_tag(tag: &str) -> bool {
    TAG_PATTERN.is_match(tag)
}

/// Check an affinity set. Agents may carry the wildcard, nodes may not.
pub(crate) fn validate_tags(tags: &BTreeSet<String>, allow_wildcard: bool) -> Result<(), FieldError> {
    match tags
        .iter()
        .find(|t| !(is_valid_tag(t) || (allow_wildcard && t.as_str() == WILDCARD_AFFINITY)))
    {
        Some(bad) => Err(FieldError::Validation(format!("invalid affinity tag '{bad}'"))),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Goal,
    Spec,
    Task,
    Review,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Goal => "goal",
            NodeType::Spec => "spec",
            NodeType::Task => "task",
            NodeType::Review => "review",
        }
    }

    /// Depth in the goal → spec → task/review hierarchy
    pub fn rank(self) -> u8 {
        match self {
            NodeType::Goal => 0,
            NodeType::Spec => 1,
            NodeType::Task | NodeType::Review => 2,
        }
    }

    pub fn can_contain(self, child: NodeType) -> bool {
        child.rank() > self.rank()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "goal" => Ok(NodeType::Goal),
            "spec" => Ok(NodeType::Spec),
            "task" => Ok(NodeType::Task),
            "review" => Ok(NodeType::Review),
            other => Err(FieldError::Validation(format!("unknown node type '{other}'"))),
        }
    }
}

/// Node states. `blocked` is orthogonal to the main open → claimed →
/// resolved → approved line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Open,
    Claimed,
    Resolved,
    Approved,
    Blocked,
}

impl NodeState {
    pub const ALL: [NodeState; 5] = [
        NodeState::Open,
        NodeState::Claimed,
        NodeState::Resolved,
        NodeState::Approved,
        NodeState::Blocked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Open => "open",
            NodeState::Claimed => "claimed",
            NodeState::Resolved => "resolved",
            NodeState::Approved => "approved",
            NodeState::Blocked => "blocked",
        }
    }

    /// Resolved or approved: the node satisfied its dependents
    pub fn is_done(self) -> bool {
        matches!(self, NodeState::Resolved | NodeState::Approved)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeState {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(NodeState::Open),
            "claimed" => Ok(NodeState::Claimed),
            "resolved" => Ok(NodeState::Resolved),
            "approved" => Ok(NodeState::Approved),
            "blocked" => Ok(NodeState::Blocked),
            other => Err(FieldError::Validation(format!("unknown node state '{other}'"))),
        }
    }
}

/// A unit of work in the field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldNode {
    pub id: String,
    pub node_type: NodeType,
    pub title: String,
    /// Opaque payload, never interpreted by the engine
    pub content: serde_json::Value,
    pub potential: f64,
    /// Temperature as stored at `temperature_updated_at` (not decayed)
    pub temperature: f64,
    pub temperature_updated_at: DateTime<Utc>,
    pub blocked_by: BTreeSet<String>,
    pub affinity: BTreeSet<String>,
    pub parent_id: Option<String>,
    pub claimed_by: Option<String>,
    pub state: NodeState,
    pub sequence_order: Option<i64>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

/// Ranked sense candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: String,
    pub node_type: NodeType,
    pub title: String,
    pub potential: f64,
    /// Temperature decayed to the time of the sense
    pub temperature: f64,
    pub effective_potential: f64,
    pub affinity: BTreeSet<String>,
    pub parent_id: Option<String>,
    pub sequence_order: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for a sense call
#[derive(Debug, Clone, Default)]
pub struct SenseQuery {
    pub limit: Option<usize>,
    /// Restrict candidates to these node types
    pub node_types: Option<Vec<NodeType>>,
}

impl SenseQuery {
    pub fn limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            node_types: None,
        }
    }

    pub fn of_types(mut self, types: &[NodeType]) -> Self {
        self.node_types = Some(types.to_vec());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolveOutcome {
    Success,
    Failure { reason: String },
}

/// One node of a deposit tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Local name other descriptors in the same tree can list in `blocked_by`
    #[serde(default)]
    pub key: Option<String>,
    pub node_type: NodeType,
    pub title: String,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default = "default_potential")]
    pub potential: f64,
    #[serde(default)]
    pub affinity: BTreeSet<String>,
    /// Tree keys or ids of existing nodes
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub sequence_order: Option<i64>,
    /// Existing parent, only honoured on the root descriptor
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub children: Vec<NodeDescriptor>,
}

fn default_potential() -> f64 {
    0.5
}

impl NodeDescriptor {
    pub fn new(node_type: NodeType, title: impl Into<String>) -> Self {
        Self {
            key: None,
            node_type,
            title: title.into(),
            content: serde_json::Value::Null,
            potential: default_potential(),
            affinity: BTreeSet::new(),
            blocked_by: Vec::new(),
            sequence_order: None,
            parent_id: None,
            children: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_potential(mut self, potential: f64) -> Self {
        self.potential = potential;
        self
    }

    pub fn with_affinity<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affinity = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_content(mut self, content: serde_json::Value) -> Self {
        self.content = content;
        self
    }

    pub fn with_sequence(mut self, order: i64) -> Self {
        self.sequence_order = Some(order);
        self
    }

    pub fn blocked_on(mut self, refs: &[&str]) -> Self {
        self.blocked_by = refs.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn under(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn child(mut self, child: NodeDescriptor) -> Self {
        self.children.push(child);
        self
    }

    /// Number of nodes in this subtree, including self
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(NodeDescriptor::node_count).sum::<usize>()
    }
}

/// Ids created by a deposit, in the submitted hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositReceipt {
    pub id: String,
    pub node_type: NodeType,
    pub key: Option<String>,
    pub children: Vec<DepositReceipt>,
}

impl DepositReceipt {
    /// All ids, depth-first, parents before children
    pub fn ids(&self) -> Vec<String> {
        let mut ids = vec![self.id.clone()];
        for child in &self.children {
            ids.extend(child.ids());
        }
        ids
    }

    /// Find the id created for a descriptor key
    pub fn id_for_key(&self, key: &str) -> Option<&str> {
        if self.key.as_deref() == Some(key) {
            return Some(&self.id);
        }
        self.children.iter().find_map(|c| c.id_for_key(key))
    }
}

/// Node counts per state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub open: u64,
    pub claimed: u64,
    pub resolved: u64,
    pub approved: u64,
    pub blocked: u64,
}

impl FieldSummary {
    pub fn total(&self) -> u64 {
        self.open + self.claimed + self.resolved + self.approved + self.blocked
    }
}
