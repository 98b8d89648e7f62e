//! Shared setup for integration tests: a field engine over a temporary
//! SQLite file plus a few canned node trees.

#![allow(dead_code)]

use swarm_field::{
    Agent, AgentRegistration, DepositReceipt, FieldEngine, NodeDescriptor, NodeType,
};
use tempfile::TempDir;

/// Keeps the temporary directory alive as long as the engine
pub struct TestField {
    pub engine: FieldEngine,
    _dir: TempDir,
}

impl std::ops::Deref for TestField {
    type Target = FieldEngine;

    fn deref(&self) -> &FieldEngine {
        &self.engine
    }
}

pub async fn test_field() -> TestField {
    let dir = tempfile::tempdir().expect("temp dir");
    let engine = FieldEngine::open_in_directory(dir.path())
        .await
        .expect("open engine");
    TestField { engine, _dir: dir }
}

pub async fn register(field: &TestField, agent_type: &str, affinities: &[&str]) -> Agent {
    field
        .registry()
        .register(AgentRegistration::new(agent_type, affinities.iter().copied()))
        .await
        .expect("register agent")
}

/// Goal → 2 specs → 3 tasks each. Task `sN-tM` has potential `0.1 * (N*3 + M)`
/// so every task ranks differently; `s2-t3` is the hottest.
pub fn product_plan() -> NodeDescriptor {
    let mut goal = NodeDescriptor::new(NodeType::Goal, "Launch billing").with_potential(0.9);
    for s in 1..=2 {
        let mut spec = NodeDescriptor::new(NodeType::Spec, format!("Spec {s}"))
            .with_key(format!("s{s}"))
            .with_potential(0.8);
        for t in 1..=3 {
            let potential = 0.1 * f64::from(s * 3 + t) - 0.3;
            spec = spec.child(
                NodeDescriptor::new(NodeType::Task, format!("Task {s}.{t}"))
                    .with_key(format!("s{s}-t{t}"))
                    .with_affinity(["backend"])
                    .with_potential(potential),
            );
        }
        goal = goal.child(spec);
    }
    goal
}

pub fn key_id(receipt: &DepositReceipt, key: &str) -> String {
    receipt
        .id_for_key(key)
        .unwrap_or_else(|| panic!("no node for key {key}"))
        .to_string()
}

/// A single open task with the given affinity
pub fn task(title: &str, affinity: &str, potential: f64) -> NodeDescriptor {
    NodeDescriptor::new(NodeType::Task, title)
        .with_affinity([affinity])
        .with_potential(potential)
}
