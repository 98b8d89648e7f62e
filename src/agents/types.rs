// Agent presence types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::FieldError;
use crate::field::types::WILDCARD_AFFINITY;

/// Lifecycle of a registered agent
///
/// `active → working → (checkpointing | winding_down) → (handed_off | resolved | terminated)`
///
/// Registry and sweeper guards are derived from `can_transition_to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    Working,
    WindingDown,
    Checkpointing,
    Resolved,
    Terminated,
    HandedOff,
}

impl LifecycleState {
    pub const TERMINAL: [LifecycleState; 3] = [
        LifecycleState::Resolved,
        LifecycleState::Terminated,
        LifecycleState::HandedOff,
    ];

    pub const ALL: [LifecycleState; 7] = [
        LifecycleState::Active,
        LifecycleState::Working,
        LifecycleState::WindingDown,
        LifecycleState::Checkpointing,
        LifecycleState::Resolved,
        LifecycleState::Terminated,
        LifecycleState::HandedOff,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Active => "active",
            LifecycleState::Working => "working",
            LifecycleState::WindingDown => "winding_down",
            LifecycleState::Checkpointing => "checkpointing",
            LifecycleState::Resolved => "resolved",
            LifecycleState::Terminated => "terminated",
            LifecycleState::HandedOff => "handed_off",
        }
    }

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    /// Allowed lifecycle edges. Any live agent may be terminated (sweeper).
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Terminated) => true,
            (Active, Working) | (Working, Active) => true,
            (Active | Working, WindingDown) => true,
            (Active | Working, Checkpointing) => true,
            (Checkpointing | WindingDown, HandedOff) => true,
            (Active | WindingDown | Checkpointing, Resolved) => true,
            _ => false,
        }
    }

    /// Every state allowed to move to `next`
    pub fn sources_of(next: LifecycleState) -> Vec<LifecycleState> {
        Self::ALL
            .into_iter()
            .filter(|state| state.can_transition_to(next))
            .collect()
    }
}

/// `lifecycle_state IN (...)` matching any of `states`
pub(crate) fn lifecycle_guard(states: &[LifecycleState]) -> String {
    let quoted: Vec<String> = states.iter().map(|s| format!("'{}'", s.as_str())).collect();
    format!("lifecycle_state IN ({})", quoted.join(", "))
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LifecycleState::Active),
            "working" => Ok(LifecycleState::Working),
            "winding_down" => Ok(LifecycleState::WindingDown),
            "checkpointing" => Ok(LifecycleState::Checkpointing),
            "resolved" => Ok(LifecycleState::Resolved),
            "terminated" => Ok(LifecycleState::Terminated),
            "handed_off" => Ok(LifecycleState::HandedOff),
            other => Err(FieldError::Validation(format!(
                "unknown lifecycle state '{other}'"
            ))),
        }
    }
}

/// A live worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub agent_type: String,
    pub affinities: BTreeSet<String>,
    pub energy_level: f64,
    pub current_node_id: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub session_started: DateTime<Utc>,
    pub zones_completed: u32,
    pub zones_failed: u32,
    pub lifecycle_state: LifecycleState,
    pub turn_count: u32,
    pub max_turns: u32,
    pub checkpoint_at: u32,
    pub context_tokens_est: u64,
    pub max_context_tokens: u64,
    pub parent_agent_id: Option<String>,
    pub current_activity: Option<String>,
}

impl Agent {
    pub fn is_wildcard(&self) -> bool {
        self.affinities.contains(WILDCARD_AFFINITY)
    }

    /// Whether this agent may sense a node with the given affinity set
    pub fn matches(&self, node_affinity: &BTreeSet<String>) -> bool {
        self.is_wildcard() || !self.affinities.is_disjoint(node_affinity)
    }
}

/// Parameters for registering an agent. Unset budgets use the configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub agent_id: Option<String>,
    pub agent_type: String,
    pub affinities: BTreeSet<String>,
    pub energy_level: Option<f64>,
    pub max_turns: Option<u32>,
    pub checkpoint_at: Option<u32>,
    pub max_context_tokens: Option<u64>,
}

impl AgentRegistration {
    pub fn new<I, S>(agent_type: impl Into<String>, affinities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agent_type: agent_type.into(),
            affinities: affinities.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_budget(mut self, max_turns: u32, checkpoint_at: u32) -> Self {
        self.max_turns = Some(max_turns);
        self.checkpoint_at = Some(checkpoint_at);
        self
    }

    pub fn with_context_budget(mut self, max_context_tokens: u64) -> Self {
        self.max_context_tokens = Some(max_context_tokens);
        self
    }
}

/// Current progress of an agent, one per agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent_id: String,
    pub task_id: Option<String>,
    pub progress: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of recording one turn of agent work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReport {
    pub turn_count: u32,
    pub context_tokens_est: u64,
    pub needs_checkpoint: bool,
}

/// What to do with a claim when an agent checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPlan {
    /// Spawn a successor that takes over the claim
    HandOff,
    /// Reopen the claimed node and terminate
    Release,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CheckpointResult {
    HandedOff { successor: Agent },
    Released { node_id: Option<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_edges() {
        use LifecycleState::*;
        assert!(Active.can_transition_to(Working));
        assert!(Working.can_transition_to(Checkpointing));
        assert!(Checkpointing.can_transition_to(HandedOff));
        assert!(Working.can_transition_to(Terminated));
        assert!(!Working.can_transition_to(Resolved));
        assert!(!Active.can_transition_to(HandedOff));
        assert!(!WindingDown.can_transition_to(Working));
        assert!(!Terminated.can_transition_to(Active));
        assert!(!HandedOff.can_transition_to(Terminated));
        assert!(WindingDown.can_transition_to(HandedOff));
        assert!(!WindingDown.can_transition_to(Checkpointing));
    }

    #[test]
    fn test_sources_and_guard() {
        use LifecycleState::*;
        assert_eq!(LifecycleState::sources_of(WindingDown), vec![Active, Working]);
        assert_eq!(
            LifecycleState::sources_of(Resolved),
            vec![Active, WindingDown, Checkpointing]
        );
        assert_eq!(
            LifecycleState::sources_of(Terminated),
            vec![Active, Working, WindingDown, Checkpointing]
        );
        assert_eq!(
            lifecycle_guard(&[Active, Working]),
            "lifecycle_state IN ('active', 'working')"
        );
    }

    #[test]
    fn test_lifecycle_parsing() {
        for state in [
            LifecycleState::Active,
            LifecycleState::Working,
            LifecycleState::WindingDown,
            LifecycleState::Checkpointing,
            LifecycleState::Resolved,
            LifecycleState::Terminated,
            LifecycleState::HandedOff,
        ] {
            assert_eq!(state.as_str().parse::<LifecycleState>().unwrap(), state);
        }
    }

    #[test]
    fn test_affinity_matching() {
        let agent = Agent {
            agent_id: "a1".to_string(),
            agent_type: "coder".to_string(),
            affinities: ["backend".to_string()].into_iter().collect(),
            energy_level: 1.0,
            current_node_id: None,
            last_heartbeat: Utc::now(),
            session_started: Utc::now(),
            zones_completed: 0,
            zones_failed: 0,
            lifecycle_state: LifecycleState::Active,
            turn_count: 0,
            max_turns: 10,
            checkpoint_at: 8,
            context_tokens_est: 0,
            max_context_tokens: 1000,
            parent_agent_id: None,
            current_activity: None,
        };

        let backend: BTreeSet<String> = ["backend", "db"].iter().map(|s| s.to_string()).collect();
        let frontend: BTreeSet<String> = ["frontend"].iter().map(|s| s.to_string()).collect();
        assert!(agent.matches(&backend));
        assert!(!agent.matches(&frontend));
        assert!(!agent.matches(&BTreeSet::new()));

        let mut wildcard = agent.clone();
        wildcard.affinities.insert(WILDCARD_AFFINITY.to_string());
        assert!(wildcard.matches(&frontend));
        assert!(wildcard.matches(&BTreeSet::new()));
    }
}
