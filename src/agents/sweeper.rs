// Liveness Sweeper - reclaims claims held by agents that stopped heartbeating
//
// Each stale agent is handled in its own transaction whose first statement
// is the conditional `-> terminated` update. Whoever wins that update owns
// the reclaim; every other sweeper sees zero rows and skips the agent.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use super::registry::{guard_for, AgentRegistry};
use super::types::LifecycleState;
use crate::database::{from_millis, to_millis};
use crate::error::FieldResult;
use crate::events::{EventBus, FieldEvent};
use crate::field::potential::PotentialModel;
use crate::field::store::clear_claim;
use crate::observability::field_metrics;
use crate::telemetry::{create_coordination_span, generate_correlation_id};

/// Release reason recorded for nodes taken back from dead agents
pub const DEAD_AGENT_REASON: &str = "dead-agent";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimedAgent {
    pub agent_id: String,
    /// Nodes reopened on behalf of this agent
    pub node_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Stale agents examined
    pub scanned: usize,
    pub reclaimed: Vec<ReclaimedAgent>,
    /// (agent_id, error) for agents whose reclaim failed
    pub failed: Vec<(String, String)>,
}

impl SweepReport {
    pub fn reopened_nodes(&self) -> usize {
        self.reclaimed.iter().map(|r| r.node_ids.len()).sum()
    }
}

#[derive(Clone)]
pub struct LivenessSweeper {
    pool: SqlitePool,
    registry: AgentRegistry,
    model: PotentialModel,
    events: EventBus,
    timeout: Duration,
    interval: Duration,
}

impl LivenessSweeper {
    pub fn new(
        pool: SqlitePool,
        registry: AgentRegistry,
        model: PotentialModel,
        events: EventBus,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            pool,
            registry,
            model,
            events,
            timeout,
            interval,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn sweep_once(&self) -> FieldResult<SweepReport> {
        self.sweep_once_at(Utc::now()).await
    }

    /// Reclaim every agent whose heartbeat is older than `now - timeout`
    pub async fn sweep_once_at(&self, now: DateTime<Utc>) -> FieldResult<SweepReport> {
        let timeout = ChronoDuration::from_std(self.timeout).unwrap_or_else(|_| ChronoDuration::days(36_500));
        let cutoff = now.checked_sub_signed(timeout).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let stale = self.registry.stale_agents(cutoff).await?;

        let mut report = SweepReport {
            scanned: stale.len(),
            ..SweepReport::default()
        };

        for agent in stale {
            match self.reclaim(&agent.agent_id, cutoff, now).await {
                Ok(Some(node_ids)) => report.reclaimed.push(ReclaimedAgent {
                    agent_id: agent.agent_id,
                    node_ids,
                }),
                Ok(None) => {
                    debug!(agent_id = %agent.agent_id, "Agent recovered or already reclaimed, skipping");
                }
                Err(e) => {
                    warn!(agent_id = %agent.agent_id, error = %e, "Failed to reclaim stale agent");
                    report.failed.push((agent.agent_id, e.to_string()));
                }
            }
        }

        if !report.reclaimed.is_empty() || !report.failed.is_empty() {
            info!(
                scanned = report.scanned,
                reclaimed = report.reclaimed.len(),
                reopened = report.reopened_nodes(),
                failed = report.failed.len(),
                "Liveness sweep finished"
            );
        }
        Ok(report)
    }

    /// Terminate one stale agent and reopen its nodes. `None` means another
    /// sweeper got there first or the agent heartbeated in the meantime.
    async fn reclaim(
        &self,
        agent_id: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> FieldResult<Option<Vec<String>>> {
        let span = create_coordination_span(
            "reclaim",
            Some(agent_id),
            None,
            Some(&generate_correlation_id()),
        );

        async move {
            let mut tx = self.pool.begin().await?;

            let result = sqlx::query(&format!(
                r#"
                UPDATE agents
                SET lifecycle_state = 'terminated', current_node_id = NULL,
                    current_activity = 'reclaimed by liveness sweep'
                WHERE agent_id = ?1 AND {} AND last_heartbeat < ?2
                "#,
                guard_for(LifecycleState::Terminated)
            ))
            .bind(agent_id)
            .bind(to_millis(cutoff))
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Ok(None);
            }

            let held = sqlx::query(
                "SELECT id, temperature, temperature_updated_at FROM field_nodes WHERE state = 'claimed' AND claimed_by = ?1",
            )
            .bind(agent_id)
            .fetch_all(&mut *tx)
            .await?;

            let mut reopened = Vec::with_capacity(held.len());
            for row in held {
                let node_id: String = row.try_get("id")?;
                let stored: f64 = row.try_get("temperature")?;
                let stored_at = from_millis(row.try_get("temperature_updated_at")?);
                let temperature = self.model.after_release(stored, stored_at, now);

                if clear_claim(&mut tx, &node_id, agent_id, Some(temperature), now).await? {
                    reopened.push((node_id, temperature));
                }
            }

            // Each reclaimed node is a failed zone, the same as a release
            if !reopened.is_empty() {
                sqlx::query("UPDATE agents SET zones_failed = zones_failed + ?2 WHERE agent_id = ?1")
                    .bind(agent_id)
                    .bind(reopened.len() as i64)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;

            for (node_id, temperature) in &reopened {
                field_metrics().record_reclaim();
                info!(node_id = %node_id, temperature, "Reopened node held by dead agent");
                self.events.publish(FieldEvent::Released {
                    node_id: node_id.clone(),
                    agent_id: agent_id.to_string(),
                    reason: DEAD_AGENT_REASON.to_string(),
                    temperature: *temperature,
                });
            }

            let node_ids: Vec<String> = reopened.into_iter().map(|(id, _)| id).collect();
            self.events.publish(FieldEvent::AgentReclaimed {
                agent_id: agent_id.to_string(),
                node_ids: node_ids.clone(),
            });
            Ok(Some(node_ids))
        }
        .instrument(span)
        .await
    }

    /// Sweep on a fixed interval until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            timeout_secs = self.timeout.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Liveness sweeper started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "Liveness sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Liveness sweeper stopped");
    }
}
