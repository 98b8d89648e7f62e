// Agent presence: registry, lifecycle, handoff and the liveness sweeper

pub mod registry;
pub mod sweeper;
pub mod types;

pub use registry::AgentRegistry;
pub use sweeper::{LivenessSweeper, ReclaimedAgent, SweepReport, DEAD_AGENT_REASON};
pub use types::{
    Agent, AgentRegistration, CheckpointPlan, CheckpointResult, Heartbeat, LifecycleState,
    TurnReport,
};
