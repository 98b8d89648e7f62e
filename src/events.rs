// Field events - pub/sub for coordination changes
//
// Every mutation of the field publishes a FieldEvent. The audit subscriber
// mirrors them into the field_events table on a best-effort basis: a failed
// write is logged and counted, never surfaced to the coordination API.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agents::types::LifecycleState;
use crate::database::to_millis;
use crate::error::FieldResult;
use crate::observability::field_metrics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldEvent {
    Deposited {
        root_id: String,
        node_ids: Vec<String>,
        created_by: String,
    },
    Claimed {
        node_id: String,
        agent_id: String,
    },
    Resolved {
        node_id: String,
        agent_id: String,
        unblocked: Vec<String>,
    },
    Released {
        node_id: String,
        agent_id: String,
        reason: String,
        temperature: f64,
    },
    Blocked {
        node_id: String,
        blockers: Vec<String>,
        preempted_agent: Option<String>,
    },
    Boosted {
        node_id: String,
        temperature: f64,
    },
    Approved {
        node_id: String,
        reviewer_id: String,
    },
    AgentRegistered {
        agent_id: String,
        agent_type: String,
    },
    AgentReclaimed {
        agent_id: String,
        node_ids: Vec<String>,
    },
    HandedOff {
        agent_id: String,
        successor_id: String,
        node_id: Option<String>,
    },
    AgentFinished {
        agent_id: String,
        state: LifecycleState,
    },
    BundleAttached {
        node_id: String,
        bundle_id: String,
    },
}

impl FieldEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            FieldEvent::Deposited { .. } => "deposited",
            FieldEvent::Claimed { .. } => "claimed",
            FieldEvent::Resolved { .. } => "resolved",
            FieldEvent::Released { .. } => "released",
            FieldEvent::Blocked { .. } => "blocked",
            FieldEvent::Boosted { .. } => "boosted",
            FieldEvent::Approved { .. } => "approved",
            FieldEvent::AgentRegistered { .. } => "agent_registered",
            FieldEvent::AgentReclaimed { .. } => "agent_reclaimed",
            FieldEvent::HandedOff { .. } => "handed_off",
            FieldEvent::AgentFinished { .. } => "agent_finished",
            FieldEvent::BundleAttached { .. } => "bundle_attached",
        }
    }

    pub fn node_id(&self) -> Option<&str> {
        match self {
            FieldEvent::Deposited { root_id, .. } => Some(root_id),
            FieldEvent::Claimed { node_id, .. }
            | FieldEvent::Resolved { node_id, .. }
            | FieldEvent::Released { node_id, .. }
            | FieldEvent::Blocked { node_id, .. }
            | FieldEvent::Boosted { node_id, .. }
            | FieldEvent::Approved { node_id, .. }
            | FieldEvent::BundleAttached { node_id, .. } => Some(node_id),
            FieldEvent::HandedOff { node_id, .. } => node_id.as_deref(),
            FieldEvent::AgentRegistered { .. }
            | FieldEvent::AgentReclaimed { .. }
            | FieldEvent::AgentFinished { .. } => None,
        }
    }

    pub fn agent_id(&self) -> Option<&str> {
        match self {
            FieldEvent::Deposited { created_by, .. } => Some(created_by),
            FieldEvent::Claimed { agent_id, .. }
            | FieldEvent::Resolved { agent_id, .. }
            | FieldEvent::Released { agent_id, .. }
            | FieldEvent::AgentRegistered { agent_id, .. }
            | FieldEvent::AgentReclaimed { agent_id, .. }
            | FieldEvent::HandedOff { agent_id, .. }
            | FieldEvent::AgentFinished { agent_id, .. } => Some(agent_id),
            FieldEvent::Approved { reviewer_id, .. } => Some(reviewer_id),
            FieldEvent::Blocked {
                preempted_agent, ..
            } => preempted_agent.as_deref(),
            FieldEvent::Boosted { .. } | FieldEvent::BundleAttached { .. } => None,
        }
    }
}

/// Broadcast bus for field events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<FieldEvent>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    /// Capacity bounds how far a slow subscriber may lag before losing events
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: FieldEvent) {
        debug!(kind = event.kind(), "Publishing field event");
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to field events");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FieldEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Mirrors field events into the append-only `field_events` table
pub struct AuditSubscriber;

impl AuditSubscriber {
    /// Spawn the subscriber task. It ends when every bus handle is dropped.
    pub fn spawn(pool: SqlitePool, bus: &EventBus) -> JoinHandle<()> {
        let mut receiver = bus.subscribe();
        tokio::spawn(async move {
            info!("Audit subscriber started");
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Err(e) = Self::record(&pool, &event).await {
                            field_metrics().record_audit_failure();
                            warn!(kind = event.kind(), error = %e, "Failed to write audit event");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Audit subscriber lagged, events dropped from audit log");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            info!("Audit subscriber stopped");
        })
    }

    pub async fn record(pool: &SqlitePool, event: &FieldEvent) -> FieldResult<()> {
        sqlx::query(
            r#"
            INSERT INTO field_events (kind, node_id, agent_id, payload, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(event.kind())
        .bind(event.node_id())
        .bind(event.agent_id())
        .bind(serde_json::to_string(event)?)
        .bind(to_millis(Utc::now()))
        .execute(pool)
        .await?;
        Ok(())
    }
}
