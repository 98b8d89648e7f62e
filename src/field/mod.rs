// The field: nodes, the potential model, storage and the coordination API

pub mod coordination;
pub mod potential;
pub mod store;
pub mod types;

pub use coordination::FieldCoordinator;
pub use potential::{effective_potential, PotentialModel};
pub use store::NodeStore;
pub use types::{
    is_valid_tag, DepositReceipt, FieldNode, FieldSummary, NodeDescriptor, NodeState,
    NodeSummary, NodeType, ResolveOutcome, SenseQuery, WILDCARD_AFFINITY,
};
