// Swarm Field Library - field-based task coordination for worker agents
// This exposes the core components for embedding and integration tests

pub mod agent_lifecycle;
pub mod agents;
pub mod bundles;
pub mod cli;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod events;
pub mod field;
pub mod observability;
pub mod shutdown;
pub mod telemetry;

// Re-export key types for easy access
pub use agent_lifecycle::{
    FieldWorker, StopReason, TurnContext, TurnOutcome, TurnReply, WorkHandler, WorkerConfig,
    WorkerReport,
};
pub use agents::{
    Agent, AgentRegistration, AgentRegistry, CheckpointPlan, CheckpointResult, Heartbeat,
    LifecycleState, LivenessSweeper, SweepReport, TurnReport, DEAD_AGENT_REASON,
};
pub use bundles::{AttachedBundle, BundleDraft, BundleStore, ContextBundle};
pub use config::{config, init_config, SwarmFieldConfig};
pub use database::DatabaseManager;
pub use engine::FieldEngine;
pub use error::{FieldError, FieldResult};
pub use events::{AuditSubscriber, EventBus, FieldEvent};
pub use field::{
    effective_potential, DepositReceipt, FieldCoordinator, FieldNode, FieldSummary,
    NodeDescriptor, NodeState, NodeSummary, NodeType, PotentialModel, ResolveOutcome,
    SenseQuery,
};
pub use observability::{field_metrics, FieldMetrics, OperationTimer};
pub use shutdown::ShutdownCoordinator;
pub use telemetry::{create_coordination_span, generate_correlation_id, init_telemetry};
