//! Agent lifecycle across a budget checkpoint: handoff to a successor, the
//! release alternative, heartbeat upserts and the audit trail they leave.

mod fixtures;

use std::time::Duration;

use fixtures::{task, test_field, TestField};
use swarm_field::{
    Agent, AgentRegistration, CheckpointPlan, CheckpointResult, FieldError, LifecycleState,
    NodeState, ResolveOutcome,
};

async fn budgeted_agent(field: &TestField, checkpoint_at: u32) -> Agent {
    field
        .registry()
        .register(AgentRegistration::new("coder", ["backend"]).with_budget(10, checkpoint_at))
        .await
        .unwrap()
}

async fn claim_new_task(field: &TestField, agent: &Agent) -> String {
    let receipt = field
        .coordinator()
        .deposit(&task("port the scheduler", "backend", 0.7), "planner")
        .await
        .unwrap();
    field
        .coordinator()
        .claim(&agent.agent_id, &receipt.id)
        .await
        .unwrap();
    receipt.id
}

#[tokio::test]
async fn test_handoff_moves_claim_and_progress_to_successor() {
    let field = test_field().await;
    let agent = budgeted_agent(&field, 2).await;
    let node_id = claim_new_task(&field, &agent).await;

    field
        .registry()
        .heartbeat(&agent.agent_id, Some(&node_id), 0.6, "half the modules ported")
        .await
        .unwrap();

    let first = field.registry().record_turn(&agent.agent_id, 100).await.unwrap();
    assert!(!first.needs_checkpoint);
    let second = field.registry().record_turn(&agent.agent_id, 100).await.unwrap();
    assert!(second.needs_checkpoint);
    assert_eq!(second.turn_count, 2);
    assert_eq!(second.context_tokens_est, 200);

    let checkpointing = field.registry().require(&agent.agent_id).await.unwrap();
    assert_eq!(checkpointing.lifecycle_state, LifecycleState::Checkpointing);

    let result = field
        .registry()
        .checkpoint(&agent.agent_id, CheckpointPlan::HandOff)
        .await
        .unwrap();
    let successor = match result {
        CheckpointResult::HandedOff { successor } => successor,
        other => panic!("expected a handoff, got {other:?}"),
    };

    assert_ne!(successor.agent_id, agent.agent_id);
    assert_eq!(successor.parent_agent_id.as_deref(), Some(agent.agent_id.as_str()));
    assert_eq!(successor.lifecycle_state, LifecycleState::Working);
    assert_eq!(successor.current_node_id.as_deref(), Some(node_id.as_str()));
    assert_eq!(successor.affinities, agent.affinities);
    assert_eq!(successor.turn_count, 0);
    assert_eq!(successor.context_tokens_est, 0);

    let retired = field.registry().require(&agent.agent_id).await.unwrap();
    assert_eq!(retired.lifecycle_state, LifecycleState::HandedOff);
    assert_eq!(retired.current_node_id, None);

    // The node never went back to the field
    let node = field.coordinator().get_node(&node_id).await.unwrap();
    assert_eq!(node.state, NodeState::Claimed);
    assert_eq!(node.claimed_by.as_deref(), Some(successor.agent_id.as_str()));
    assert_eq!(node.temperature, 0.0);

    let inherited = field
        .registry()
        .latest_heartbeat(&successor.agent_id)
        .await
        .unwrap()
        .expect("successor inherits the heartbeat");
    assert_eq!(inherited.task_id.as_deref(), Some(node_id.as_str()));
    assert_eq!(inherited.progress, 0.6);
    assert_eq!(inherited.message, "half the modules ported");

    // Only the successor may finish the work
    let stale = field
        .coordinator()
        .resolve(&agent.agent_id, &node_id, ResolveOutcome::Success)
        .await;
    assert!(matches!(stale, Err(FieldError::NotOwner { .. })));

    let resolved = field
        .coordinator()
        .resolve(&successor.agent_id, &node_id, ResolveOutcome::Success)
        .await
        .unwrap();
    assert_eq!(resolved.state, NodeState::Resolved);
    assert_eq!(resolved.resolved_by.as_deref(), Some(successor.agent_id.as_str()));
}

#[tokio::test]
async fn test_handoff_without_claim_spawns_active_successor() {
    let field = test_field().await;
    let agent = budgeted_agent(&field, 2).await;

    let result = field
        .registry()
        .checkpoint(&agent.agent_id, CheckpointPlan::HandOff)
        .await
        .unwrap();

    match result {
        CheckpointResult::HandedOff { successor } => {
            assert_eq!(successor.lifecycle_state, LifecycleState::Active);
            assert_eq!(successor.current_node_id, None);
            assert!(field
                .registry()
                .latest_heartbeat(&successor.agent_id)
                .await
                .unwrap()
                .is_none());
        }
        other => panic!("expected a handoff, got {other:?}"),
    }
}

#[tokio::test]
async fn test_winding_down_agent_hands_off_its_claim() {
    let field = test_field().await;
    let agent = budgeted_agent(&field, 8).await;
    let node_id = claim_new_task(&field, &agent).await;

    let wound = field.registry().wind_down(&agent.agent_id).await.unwrap();
    assert_eq!(wound.lifecycle_state, LifecycleState::WindingDown);

    let result = field
        .registry()
        .checkpoint(&agent.agent_id, CheckpointPlan::HandOff)
        .await
        .unwrap();
    let successor = match result {
        CheckpointResult::HandedOff { successor } => successor,
        other => panic!("expected a handoff, got {other:?}"),
    };

    // The successor keeps the node but inherits the wind-down
    assert_eq!(successor.lifecycle_state, LifecycleState::WindingDown);
    assert_eq!(successor.current_node_id.as_deref(), Some(node_id.as_str()));
    let node = field.coordinator().get_node(&node_id).await.unwrap();
    assert_eq!(node.claimed_by.as_deref(), Some(successor.agent_id.as_str()));

    let retired = field.registry().require(&agent.agent_id).await.unwrap();
    assert_eq!(retired.lifecycle_state, LifecycleState::HandedOff);
    assert_eq!(retired.current_node_id, None);

    // No new work while winding down
    let other = field
        .coordinator()
        .deposit(&task("another job", "backend", 0.9), "planner")
        .await
        .unwrap();
    assert!(field
        .coordinator()
        .claim(&successor.agent_id, &other.id)
        .await
        .is_err());

    field
        .coordinator()
        .resolve(&successor.agent_id, &node_id, ResolveOutcome::Success)
        .await
        .unwrap();
    let done = field.registry().finish(&successor.agent_id).await.unwrap();
    assert_eq!(done.lifecycle_state, LifecycleState::Resolved);
    assert_eq!(done.zones_completed, 1);
}

#[tokio::test]
async fn test_release_checkpoint_reopens_node_without_heating_it() {
    let field = test_field().await;
    let agent = budgeted_agent(&field, 1).await;
    let node_id = claim_new_task(&field, &agent).await;

    field.registry().record_turn(&agent.agent_id, 10).await.unwrap();
    let result = field
        .registry()
        .checkpoint(&agent.agent_id, CheckpointPlan::Release)
        .await
        .unwrap();
    assert_eq!(
        result,
        CheckpointResult::Released {
            node_id: Some(node_id.clone())
        }
    );

    let node = field.coordinator().get_node(&node_id).await.unwrap();
    assert_eq!(node.state, NodeState::Open);
    assert_eq!(node.temperature, 0.0);

    let agent = field.registry().require(&agent.agent_id).await.unwrap();
    assert_eq!(agent.lifecycle_state, LifecycleState::Terminated);

    // A terminated agent cannot checkpoint twice
    let again = field
        .registry()
        .checkpoint(&agent.agent_id, CheckpointPlan::HandOff)
        .await;
    assert!(matches!(again, Err(FieldError::InvalidState { .. })));
}

#[tokio::test]
async fn test_context_growth_forces_checkpoint() {
    let field = test_field().await;
    let agent = field
        .registry()
        .register(AgentRegistration::new("coder", ["backend"]).with_context_budget(1_000))
        .await
        .unwrap();
    claim_new_task(&field, &agent).await;

    let report = field.registry().record_turn(&agent.agent_id, 950).await.unwrap();
    assert!(report.needs_checkpoint);
    let agent = field.registry().require(&agent.agent_id).await.unwrap();
    assert_eq!(agent.lifecycle_state, LifecycleState::Checkpointing);
}

#[tokio::test]
async fn test_heartbeat_keeps_one_row_per_agent() {
    let field = test_field().await;
    let agent = budgeted_agent(&field, 5).await;

    for (progress, message) in [(0.1, "reading"), (0.5, "editing"), (0.9, "testing")] {
        field
            .registry()
            .heartbeat(&agent.agent_id, None, progress, message)
            .await
            .unwrap();
    }

    let latest = field
        .registry()
        .latest_heartbeat(&agent.agent_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.progress, 0.9);
    assert_eq!(latest.message, "testing");

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM heartbeats WHERE agent_id = ?1")
        .bind(&agent.agent_id)
        .fetch_one(field.database().pool())
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let out_of_range = field
        .registry()
        .heartbeat(&agent.agent_id, None, 1.5, "overshoot")
        .await;
    assert!(matches!(out_of_range, Err(FieldError::Validation(_))));
}

#[tokio::test]
async fn test_audit_log_records_handoff() {
    let field = test_field().await;
    let agent = budgeted_agent(&field, 1).await;
    let node_id = claim_new_task(&field, &agent).await;
    field
        .registry()
        .checkpoint(&agent.agent_id, CheckpointPlan::HandOff)
        .await
        .unwrap();

    // The audit writer runs in the background; give it a moment to catch up
    let mut recorded = 0;
    for _ in 0..50 {
        recorded = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM field_events WHERE kind = 'handed_off' AND node_id = ?1",
        )
        .bind(&node_id)
        .fetch_one(field.database().pool())
        .await
        .unwrap();
        if recorded > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(recorded, 1);

    let kinds: Vec<String> = sqlx::query_scalar("SELECT kind FROM field_events ORDER BY id")
        .fetch_all(field.database().pool())
        .await
        .unwrap();
    assert!(kinds.contains(&"claimed".to_string()));
    assert!(kinds.contains(&"deposited".to_string()));
}
