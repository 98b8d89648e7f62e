// Core types for the worker harness

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::agents::types::CheckpointPlan;
use crate::field::types::FieldNode;

/// What the handler decided after one turn of work on a claimed node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Keep working on the same node next turn
    Continue,
    /// Work is done; resolve the node
    Completed,
    /// Give the node back with a reason
    Failed { reason: String },
    /// The node cannot proceed until these nodes are resolved
    BlockedOn { ids: Vec<String> },
}

/// Handler output for a single turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReply {
    pub outcome: TurnOutcome,
    /// Context tokens consumed by this turn
    pub tokens_used: u64,
    /// Progress on the node, in [0, 1]
    pub progress: f64,
    pub message: String,
}

impl TurnReply {
    pub fn new(outcome: TurnOutcome) -> Self {
        let progress = match outcome {
            TurnOutcome::Completed => 1.0,
            _ => 0.0,
        };
        Self {
            outcome,
            tokens_used: 0,
            progress,
            message: String::new(),
        }
    }

    pub fn with_tokens(mut self, tokens_used: u64) -> Self {
        self.tokens_used = tokens_used;
        self
    }

    pub fn with_progress(mut self, progress: f64, message: impl Into<String>) -> Self {
        self.progress = progress.clamp(0.0, 1.0);
        self.message = message.into();
        self
    }
}

/// Everything a handler sees when asked for a turn
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub agent_id: String,
    pub node: FieldNode,
    /// Turns already spent on this node by this worker
    pub turn_on_node: u32,
}

/// Why a worker loop stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// No work sensed within the idle allowance
    Idle,
    /// Shutdown requested
    Shutdown,
    /// Budget exhausted and the claim was released
    Released,
    /// The agent was wound down and stopped taking new work
    WoundDown,
    /// The agent was terminated from outside (liveness sweep)
    Reclaimed,
}

/// Summary of one `FieldWorker::run`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Agent ids used by the run; more than one after handoffs
    pub agents: Vec<String>,
    pub turns: u32,
    pub completed: u32,
    pub failed: u32,
    pub blocked: u32,
    /// Claims lost to the sweeper or a block while working
    pub lost: u32,
    pub stop: Option<StopReason>,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Candidates requested per sense
    pub sense_limit: usize,
    /// Sleep between empty senses
    pub idle_backoff: Duration,
    /// Random extra sleep up to this much, to spread out pollers
    pub backoff_jitter: Duration,
    /// Empty senses in a row before the worker gives up; None polls forever
    pub max_idle_polls: Option<u32>,
    pub checkpoint_plan: CheckpointPlan,
    /// Keep running as the successor after a handoff
    pub follow_handoffs: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sense_limit: 5,
            idle_backoff: Duration::from_secs(2),
            backoff_jitter: Duration::from_millis(500),
            max_idle_polls: None,
            checkpoint_plan: CheckpointPlan::HandOff,
            follow_handoffs: true,
        }
    }
}

impl WorkerConfig {
    pub fn from_defaults(defaults: &crate::config::AgentDefaults) -> Self {
        Self {
            checkpoint_plan: if defaults.handoff_on_checkpoint {
                CheckpointPlan::HandOff
            } else {
                CheckpointPlan::Release
            },
            ..Self::default()
        }
    }
}
