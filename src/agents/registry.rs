// Agent Registry - presence, heartbeats, turn budgets and handoff
//
// Lifecycle changes are conditional UPDATEs on `lifecycle_state`, so a
// concurrent sweeper or coordinator sees either the old or the new state,
// never a half-applied transition.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::types::{
    lifecycle_guard, Agent, AgentRegistration, CheckpointPlan, CheckpointResult, Heartbeat,
    LifecycleState, TurnReport,
};
use crate::config::AgentDefaults;
use crate::database::{decode_set, encode_set, from_millis, to_millis};
use crate::error::{FieldError, FieldResult};
use crate::events::{EventBus, FieldEvent};
use crate::field::store::clear_claim;
use crate::field::types::validate_tags;
use crate::telemetry::{create_coordination_span, generate_correlation_id};

const AGENT_COLUMNS: &str = "agent_id, agent_type, affinities, energy_level, current_node_id, \
     last_heartbeat, session_started, zones_completed, zones_failed, lifecycle_state, \
     turn_count, max_turns, checkpoint_at, context_tokens_est, max_context_tokens, \
     parent_agent_id, current_activity";

/// How a piece of work ended, for the agent's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkTally {
    Completed,
    Failed,
    /// Claim taken away by a block; counts as neither
    Preempted,
    /// Claim handed back without an outcome; counts as neither
    Yielded,
}

/// SQL condition matching agents allowed to move to `next`
pub(crate) fn guard_for(next: LifecycleState) -> String {
    lifecycle_guard(&LifecycleState::sources_of(next))
}

/// SQL condition matching every live (non-terminal) agent
pub(crate) fn live_guard() -> String {
    guard_for(LifecycleState::Terminated)
}

fn agent_from_row(row: &SqliteRow) -> FieldResult<Agent> {
    let affinities: String = row.try_get("affinities")?;
    let lifecycle_state: String = row.try_get("lifecycle_state")?;
    let zones_completed: i64 = row.try_get("zones_completed")?;
    let zones_failed: i64 = row.try_get("zones_failed")?;
    let turn_count: i64 = row.try_get("turn_count")?;
    let max_turns: i64 = row.try_get("max_turns")?;
    let checkpoint_at: i64 = row.try_get("checkpoint_at")?;
    let context_tokens_est: i64 = row.try_get("context_tokens_est")?;
    let max_context_tokens: i64 = row.try_get("max_context_tokens")?;

    Ok(Agent {
        agent_id: row.try_get("agent_id")?,
        agent_type: row.try_get("agent_type")?,
        affinities: decode_set(&affinities)?,
        energy_level: row.try_get("energy_level")?,
        current_node_id: row.try_get("current_node_id")?,
        last_heartbeat: from_millis(row.try_get("last_heartbeat")?),
        session_started: from_millis(row.try_get("session_started")?),
        zones_completed: zones_completed.max(0) as u32,
        zones_failed: zones_failed.max(0) as u32,
        lifecycle_state: lifecycle_state.parse()?,
        turn_count: turn_count.max(0) as u32,
        max_turns: max_turns.max(0) as u32,
        checkpoint_at: checkpoint_at.max(0) as u32,
        context_tokens_est: context_tokens_est.max(0) as u64,
        max_context_tokens: max_context_tokens.max(0) as u64,
        parent_agent_id: row.try_get("parent_agent_id")?,
        current_activity: row.try_get("current_activity")?,
    })
}

pub(crate) async fn fetch_agent(
    conn: &mut SqliteConnection,
    agent_id: &str,
) -> FieldResult<Option<Agent>> {
    let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = ?1"))
        .bind(agent_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(agent_from_row).transpose()
}

pub(crate) async fn require_agent(conn: &mut SqliteConnection, agent_id: &str) -> FieldResult<Agent> {
    fetch_agent(conn, agent_id)
        .await?
        .ok_or_else(|| FieldError::agent_not_found(agent_id))
}

/// Explain why a conditional agent UPDATE touched no row
pub(crate) async fn lifecycle_rejection(
    conn: &mut SqliteConnection,
    agent_id: &str,
    operation: &'static str,
) -> FieldError {
    match fetch_agent(conn, agent_id).await {
        Ok(Some(agent)) => FieldError::InvalidState {
            entity: "Agent",
            id: agent_id.to_string(),
            state: agent.lifecycle_state.to_string(),
            operation,
        },
        Ok(None) => FieldError::agent_not_found(agent_id),
        Err(e) => e,
    }
}

/// Move an active agent onto a node. False when the agent is not active.
pub(crate) async fn begin_work(
    conn: &mut SqliteConnection,
    agent_id: &str,
    node_id: &str,
    now: DateTime<Utc>,
) -> FieldResult<bool> {
    let result = sqlx::query(&format!(
        r#"
        UPDATE agents
        SET lifecycle_state = 'working', current_node_id = ?2, last_heartbeat = ?3,
            current_activity = 'claimed ' || ?2
        WHERE agent_id = ?1 AND {}
        "#,
        guard_for(LifecycleState::Working)
    ))
    .bind(agent_id)
    .bind(node_id)
    .bind(to_millis(now))
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Detach an agent from a node it was working on. Working agents go back to
/// active; winding-down and checkpointing agents keep their state.
pub(crate) async fn end_work(
    conn: &mut SqliteConnection,
    agent_id: &str,
    node_id: &str,
    tally: WorkTally,
    now: DateTime<Utc>,
) -> FieldResult<()> {
    let (completed, failed) = match tally {
        WorkTally::Completed => (1, 0),
        WorkTally::Failed => (0, 1),
        WorkTally::Preempted | WorkTally::Yielded => (0, 0),
    };
    sqlx::query(
        r#"
        UPDATE agents
        SET lifecycle_state = CASE WHEN lifecycle_state = 'working' THEN 'active' ELSE lifecycle_state END,
            current_node_id = NULL,
            current_activity = NULL,
            zones_completed = zones_completed + ?3,
            zones_failed = zones_failed + ?4,
            last_heartbeat = MAX(last_heartbeat, ?5)
        WHERE agent_id = ?1 AND current_node_id = ?2
        "#,
    )
    .bind(agent_id)
    .bind(node_id)
    .bind(completed)
    .bind(failed)
    .bind(to_millis(now))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn validate_fraction(name: &str, value: f64) -> FieldResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(FieldError::Validation(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

fn new_agent_id(agent_type: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{agent_type}-{}", &suffix[..12])
}

/// Registry of live agents backed by the `agents` and `heartbeats` tables
#[derive(Clone)]
pub struct AgentRegistry {
    pool: SqlitePool,
    defaults: AgentDefaults,
    events: EventBus,
}

impl AgentRegistry {
    pub fn new(pool: SqlitePool, defaults: AgentDefaults, events: EventBus) -> Self {
        Self {
            pool,
            defaults,
            events,
        }
    }

    pub fn defaults(&self) -> &AgentDefaults {
        &self.defaults
    }

    pub async fn register(&self, registration: AgentRegistration) -> FieldResult<Agent> {
        if registration.agent_type.trim().is_empty() {
            return Err(FieldError::Validation("agent type must not be empty".to_string()));
        }
        validate_tags(&registration.affinities, true)?;

        let energy_level = registration.energy_level.unwrap_or(1.0);
        validate_fraction("energy level", energy_level)?;

        let max_turns = registration.max_turns.unwrap_or(self.defaults.default_max_turns);
        let checkpoint_at = registration
            .checkpoint_at
            .unwrap_or(self.defaults.default_checkpoint_at)
            .min(max_turns);
        if max_turns == 0 {
            return Err(FieldError::Validation("max turns must be positive".to_string()));
        }
        let max_context_tokens = registration
            .max_context_tokens
            .unwrap_or(self.defaults.default_max_context_tokens);

        let agent_id = registration
            .agent_id
            .clone()
            .unwrap_or_else(|| new_agent_id(&registration.agent_type));
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO agents (
                agent_id, agent_type, affinities, energy_level, current_node_id, last_heartbeat,
                session_started, lifecycle_state, max_turns, checkpoint_at, max_context_tokens
            )
            VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?5, 'active', ?6, ?7, ?8)
            ON CONFLICT(agent_id) DO NOTHING
            "#,
        )
        .bind(&agent_id)
        .bind(&registration.agent_type)
        .bind(encode_set(&registration.affinities)?)
        .bind(energy_level)
        .bind(to_millis(now))
        .bind(i64::from(max_turns))
        .bind(i64::from(checkpoint_at))
        .bind(max_context_tokens as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FieldError::Validation(format!(
                "agent {agent_id} is already registered"
            )));
        }

        info!(agent_id = %agent_id, agent_type = %registration.agent_type, "Agent registered");
        self.events.publish(FieldEvent::AgentRegistered {
            agent_id: agent_id.clone(),
            agent_type: registration.agent_type.clone(),
        });

        self.require(&agent_id).await
    }

    pub async fn get(&self, agent_id: &str) -> FieldResult<Option<Agent>> {
        let mut conn = self.pool.acquire().await?;
        fetch_agent(&mut conn, agent_id).await
    }

    pub async fn require(&self, agent_id: &str) -> FieldResult<Agent> {
        let mut conn = self.pool.acquire().await?;
        require_agent(&mut conn, agent_id).await
    }

    /// All agents, or only those not yet in a terminal state
    pub async fn list(&self, active_only: bool) -> FieldResult<Vec<Agent>> {
        let filter = if active_only {
            format!("WHERE {}", live_guard())
        } else {
            String::new()
        };
        let rows = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents {filter} ORDER BY session_started, agent_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(agent_from_row).collect()
    }

    /// Live agents whose last heartbeat is older than `cutoff`
    pub async fn stale_agents(&self, cutoff: DateTime<Utc>) -> FieldResult<Vec<Agent>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {AGENT_COLUMNS} FROM agents
            WHERE {live} AND last_heartbeat < ?1
            ORDER BY last_heartbeat
            "#,
            live = live_guard()
        ))
        .bind(to_millis(cutoff))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(agent_from_row).collect()
    }

    /// Record progress. Also proves the agent is alive to the sweeper.
    pub async fn heartbeat(
        &self,
        agent_id: &str,
        task_id: Option<&str>,
        progress: f64,
        message: &str,
    ) -> FieldResult<Heartbeat> {
        validate_fraction("progress", progress)?;
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(&format!(
            r#"
            UPDATE agents
            SET last_heartbeat = ?2,
                current_activity = CASE WHEN ?3 = '' THEN current_activity ELSE ?3 END
            WHERE agent_id = ?1 AND {}
            "#,
            live_guard()
        ))
        .bind(agent_id)
        .bind(to_millis(now))
        .bind(message)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(lifecycle_rejection(&mut tx, agent_id, "heartbeat").await);
        }

        sqlx::query(
            r#"
            INSERT INTO heartbeats (agent_id, task_id, progress, message, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(agent_id) DO UPDATE SET
                task_id = excluded.task_id,
                progress = excluded.progress,
                message = excluded.message,
                recorded_at = excluded.recorded_at
            "#,
        )
        .bind(agent_id)
        .bind(task_id)
        .bind(progress)
        .bind(message)
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(agent_id = %agent_id, progress, "Heartbeat recorded");

        Ok(Heartbeat {
            agent_id: agent_id.to_string(),
            task_id: task_id.map(str::to_string),
            progress,
            message: message.to_string(),
            timestamp: now,
        })
    }

    pub async fn latest_heartbeat(&self, agent_id: &str) -> FieldResult<Option<Heartbeat>> {
        let row = sqlx::query(
            "SELECT agent_id, task_id, progress, message, recorded_at FROM heartbeats WHERE agent_id = ?1",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> FieldResult<Heartbeat> {
            Ok(Heartbeat {
                agent_id: row.try_get("agent_id")?,
                task_id: row.try_get("task_id")?,
                progress: row.try_get("progress")?,
                message: row.try_get("message")?,
                timestamp: from_millis(row.try_get("recorded_at")?),
            })
        })
        .transpose()
    }

    /// Count one turn of work and `tokens` of context growth. A working agent
    /// that crosses its turn or context budget moves to checkpointing.
    pub async fn record_turn(&self, agent_id: &str, tokens: u64) -> FieldResult<TurnReport> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(&format!(
            r#"
            UPDATE agents
            SET turn_count = turn_count + 1,
                context_tokens_est = context_tokens_est + ?2,
                last_heartbeat = ?3
            WHERE agent_id = ?1 AND {}
            "#,
            live_guard()
        ))
        .bind(agent_id)
        .bind(tokens.min(i64::MAX as u64) as i64)
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(lifecycle_rejection(&mut tx, agent_id, "record a turn for").await);
        }

        let agent = require_agent(&mut tx, agent_id).await?;
        let token_limit = agent.max_context_tokens as f64 * self.defaults.context_checkpoint_ratio;
        let needs_checkpoint = agent.turn_count >= agent.checkpoint_at
            || agent.context_tokens_est as f64 >= token_limit;

        if needs_checkpoint && agent.lifecycle_state == LifecycleState::Working {
            sqlx::query(
                "UPDATE agents SET lifecycle_state = 'checkpointing' WHERE agent_id = ?1 AND lifecycle_state = 'working'",
            )
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
            info!(
                agent_id = %agent_id,
                turn_count = agent.turn_count,
                context_tokens_est = agent.context_tokens_est,
                "Agent reached its budget, checkpointing"
            );
        }

        tx.commit().await?;

        Ok(TurnReport {
            turn_count: agent.turn_count,
            context_tokens_est: agent.context_tokens_est,
            needs_checkpoint,
        })
    }

    /// Checkpoint an agent: hand its claim to a fresh successor, or release
    /// the claim and terminate.
    pub async fn checkpoint(
        &self,
        agent_id: &str,
        plan: CheckpointPlan,
    ) -> FieldResult<CheckpointResult> {
        let span = create_coordination_span(
            "checkpoint",
            Some(agent_id),
            None,
            Some(&generate_correlation_id()),
        );

        async move {
            let now = Utc::now();
            let mut tx = self.pool.begin().await?;

            // A winding-down agent hands off straight from its current state
            let mut sources = LifecycleState::sources_of(LifecycleState::Checkpointing);
            sources.extend(LifecycleState::sources_of(LifecycleState::HandedOff));
            let result = sqlx::query(&format!(
                r#"
                UPDATE agents
                SET lifecycle_state = CASE WHEN lifecycle_state = 'winding_down'
                                           THEN 'winding_down' ELSE 'checkpointing' END
                WHERE agent_id = ?1 AND {}
                "#,
                lifecycle_guard(&sources)
            ))
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(lifecycle_rejection(&mut tx, agent_id, "checkpoint").await);
            }

            let agent = require_agent(&mut tx, agent_id).await?;

            let (outcome, event) = match plan {
                CheckpointPlan::HandOff => {
                    let successor_id = new_agent_id(&agent.agent_type);

                    let moved = match &agent.current_node_id {
                        Some(node_id) => {
                            let result = sqlx::query(
                                r#"
                                UPDATE field_nodes SET claimed_by = ?3, updated_at = ?4
                                WHERE id = ?1 AND state = 'claimed' AND claimed_by = ?2
                                "#,
                            )
                            .bind(node_id)
                            .bind(agent_id)
                            .bind(&successor_id)
                            .bind(to_millis(now))
                            .execute(&mut *tx)
                            .await?;
                            result.rows_affected() > 0
                        }
                        None => false,
                    };
                    let taken_node = if moved { agent.current_node_id.clone() } else { None };
                    // The successor inherits a wind-down: it may finish the held
                    // node but takes no new work
                    let successor_state = if agent.lifecycle_state == LifecycleState::WindingDown {
                        LifecycleState::WindingDown
                    } else if taken_node.is_some() {
                        LifecycleState::Working
                    } else {
                        LifecycleState::Active
                    };

                    sqlx::query(
                        r#"
                        INSERT INTO agents (
                            agent_id, agent_type, affinities, energy_level, current_node_id,
                            last_heartbeat, session_started, lifecycle_state, max_turns,
                            checkpoint_at, max_context_tokens, parent_agent_id, current_activity
                        )
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                        "#,
                    )
                    .bind(&successor_id)
                    .bind(&agent.agent_type)
                    .bind(encode_set(&agent.affinities)?)
                    .bind(agent.energy_level)
                    .bind(taken_node.as_deref())
                    .bind(to_millis(now))
                    .bind(successor_state.as_str())
                    .bind(i64::from(agent.max_turns))
                    .bind(i64::from(agent.checkpoint_at))
                    .bind(agent.max_context_tokens as i64)
                    .bind(agent_id)
                    .bind(agent.current_activity.as_deref())
                    .execute(&mut *tx)
                    .await?;

                    sqlx::query(
                        r#"
                        INSERT INTO heartbeats (agent_id, task_id, progress, message, recorded_at)
                        SELECT ?2, task_id, progress, message, ?3 FROM heartbeats WHERE agent_id = ?1
                        "#,
                    )
                    .bind(agent_id)
                    .bind(&successor_id)
                    .bind(to_millis(now))
                    .execute(&mut *tx)
                    .await?;

                    sqlx::query(
                        r#"
                        UPDATE agents
                        SET lifecycle_state = 'handed_off', current_node_id = NULL,
                            current_activity = 'handed off to ' || ?2
                        WHERE agent_id = ?1
                        "#,
                    )
                    .bind(agent_id)
                    .bind(&successor_id)
                    .execute(&mut *tx)
                    .await?;

                    let successor = require_agent(&mut tx, &successor_id).await?;
                    info!(
                        successor_id = %successor_id,
                        node_id = ?taken_node,
                        "Agent handed off to successor"
                    );
                    (
                        CheckpointResult::HandedOff { successor },
                        FieldEvent::HandedOff {
                            agent_id: agent_id.to_string(),
                            successor_id,
                            node_id: taken_node,
                        },
                    )
                }
                CheckpointPlan::Release => {
                    let released = match &agent.current_node_id {
                        Some(node_id) => {
                            if clear_claim(&mut tx, node_id, agent_id, None, now).await? {
                                Some(node_id.clone())
                            } else {
                                warn!(node_id = %node_id, "Checkpointing agent no longer held its node");
                                None
                            }
                        }
                        None => None,
                    };

                    sqlx::query(
                        r#"
                        UPDATE agents
                        SET lifecycle_state = 'terminated', current_node_id = NULL,
                            current_activity = 'released at checkpoint'
                        WHERE agent_id = ?1
                        "#,
                    )
                    .bind(agent_id)
                    .execute(&mut *tx)
                    .await?;

                    info!(node_id = ?released, "Agent released its claim at checkpoint");
                    (
                        CheckpointResult::Released {
                            node_id: released,
                        },
                        FieldEvent::AgentFinished {
                            agent_id: agent_id.to_string(),
                            state: LifecycleState::Terminated,
                        },
                    )
                }
            };

            tx.commit().await?;
            self.events.publish(event);
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Stop taking new work; the current claim, if any, is kept until resolved
    pub async fn wind_down(&self, agent_id: &str) -> FieldResult<Agent> {
        let result = sqlx::query(&format!(
            "UPDATE agents SET lifecycle_state = 'winding_down' WHERE agent_id = ?1 AND {}",
            guard_for(LifecycleState::WindingDown)
        ))
        .bind(agent_id)
        .execute(&self.pool)
        .await?;

        let mut conn = self.pool.acquire().await?;
        if result.rows_affected() == 0 {
            return Err(lifecycle_rejection(&mut conn, agent_id, "wind down").await);
        }
        info!(agent_id = %agent_id, "Agent winding down");
        require_agent(&mut conn, agent_id).await
    }

    /// End a session cleanly. Refused while the agent still holds a claim.
    pub async fn finish(&self, agent_id: &str) -> FieldResult<Agent> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE agents SET lifecycle_state = 'resolved', current_activity = NULL
            WHERE agent_id = ?1 AND {} AND current_node_id IS NULL
            "#,
            guard_for(LifecycleState::Resolved)
        ))
        .bind(agent_id)
        .execute(&self.pool)
        .await?;

        let mut conn = self.pool.acquire().await?;
        if result.rows_affected() == 0 {
            return Err(lifecycle_rejection(&mut conn, agent_id, "finish").await);
        }

        info!(agent_id = %agent_id, "Agent finished");
        self.events.publish(FieldEvent::AgentFinished {
            agent_id: agent_id.to_string(),
            state: LifecycleState::Resolved,
        });
        require_agent(&mut conn, agent_id).await
    }

    pub async fn set_energy(&self, agent_id: &str, energy_level: f64) -> FieldResult<Agent> {
        validate_fraction("energy level", energy_level)?;
        let result = sqlx::query(&format!(
            "UPDATE agents SET energy_level = ?2 WHERE agent_id = ?1 AND {}",
            live_guard()
        ))
        .bind(agent_id)
        .bind(energy_level)
        .execute(&self.pool)
        .await?;

        let mut conn = self.pool.acquire().await?;
        if result.rows_affected() == 0 {
            return Err(lifecycle_rejection(&mut conn, agent_id, "set energy of").await);
        }
        require_agent(&mut conn, agent_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;

    async fn setup() -> (tempfile::TempDir, AgentRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseManager::in_directory(dir.path()).await.unwrap();
        let registry = AgentRegistry::new(
            db.pool().clone(),
            AgentDefaults::default(),
            EventBus::default(),
        );
        (dir, registry)
    }

    #[tokio::test]
    async fn test_register_applies_defaults() {
        let (_dir, registry) = setup().await;
        let agent = registry
            .register(AgentRegistration::new("coder", ["backend"]))
            .await
            .unwrap();

        assert!(agent.agent_id.starts_with("coder-"));
        assert_eq!(agent.lifecycle_state, LifecycleState::Active);
        assert_eq!(agent.max_turns, 50);
        assert_eq!(agent.checkpoint_at, 40);
        assert_eq!(agent.energy_level, 1.0);
        assert!(agent.current_node_id.is_none());
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_bad_tags() {
        let (_dir, registry) = setup().await;
        registry
            .register(AgentRegistration::new("coder", ["backend"]).with_id("a1"))
            .await
            .unwrap();

        let dup = registry
            .register(AgentRegistration::new("coder", ["backend"]).with_id("a1"))
            .await;
        assert!(matches!(dup, Err(FieldError::Validation(_))));

        let bad = registry
            .register(AgentRegistration::new("coder", ["Not A Tag"]))
            .await;
        assert!(matches!(bad, Err(FieldError::Validation(_))));

        let wildcard = registry.register(AgentRegistration::new("coder", ["*"])).await;
        assert!(wildcard.is_ok());
    }

    #[tokio::test]
    async fn test_heartbeat_upserts_single_row() {
        let (_dir, registry) = setup().await;
        let agent = registry
            .register(AgentRegistration::new("coder", ["backend"]))
            .await
            .unwrap();

        registry
            .heartbeat(&agent.agent_id, Some("n1"), 0.25, "reading code")
            .await
            .unwrap();
        registry
            .heartbeat(&agent.agent_id, Some("n1"), 0.75, "writing tests")
            .await
            .unwrap();

        let latest = registry.latest_heartbeat(&agent.agent_id).await.unwrap().unwrap();
        assert_eq!(latest.progress, 0.75);
        assert_eq!(latest.message, "writing tests");

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM heartbeats")
            .fetch_one(&registry.pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);

        let refreshed = registry.require(&agent.agent_id).await.unwrap();
        assert_eq!(refreshed.current_activity.as_deref(), Some("writing tests"));
    }

    #[tokio::test]
    async fn test_heartbeat_validation() {
        let (_dir, registry) = setup().await;
        let agent = registry
            .register(AgentRegistration::new("coder", ["backend"]))
            .await
            .unwrap();

        let err = registry.heartbeat(&agent.agent_id, None, 1.5, "").await;
        assert!(matches!(err, Err(FieldError::Validation(_))));

        let err = registry.heartbeat("ghost", None, 0.5, "").await;
        assert!(matches!(err, Err(FieldError::NotFound { .. })));

        registry.finish(&agent.agent_id).await.unwrap();
        let err = registry.heartbeat(&agent.agent_id, None, 0.5, "").await;
        assert!(matches!(err, Err(FieldError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_record_turn_reports_budget() {
        let (_dir, registry) = setup().await;
        let agent = registry
            .register(AgentRegistration::new("coder", ["backend"]).with_budget(5, 2))
            .await
            .unwrap();

        let first = registry.record_turn(&agent.agent_id, 100).await.unwrap();
        assert_eq!(first.turn_count, 1);
        assert!(!first.needs_checkpoint);

        let second = registry.record_turn(&agent.agent_id, 100).await.unwrap();
        assert_eq!(second.turn_count, 2);
        assert_eq!(second.context_tokens_est, 200);
        assert!(second.needs_checkpoint);

        // Not working, so the state is left alone
        let after = registry.require(&agent.agent_id).await.unwrap();
        assert_eq!(after.lifecycle_state, LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_context_budget_triggers_checkpoint() {
        let (_dir, registry) = setup().await;
        let agent = registry
            .register(AgentRegistration::new("coder", ["backend"]).with_context_budget(1_000))
            .await
            .unwrap();

        let report = registry.record_turn(&agent.agent_id, 950).await.unwrap();
        assert!(report.needs_checkpoint);
    }

    #[tokio::test]
    async fn test_wind_down_and_finish() {
        let (_dir, registry) = setup().await;
        let agent = registry
            .register(AgentRegistration::new("coder", ["backend"]))
            .await
            .unwrap();

        let wound = registry.wind_down(&agent.agent_id).await.unwrap();
        assert_eq!(wound.lifecycle_state, LifecycleState::WindingDown);

        let done = registry.finish(&agent.agent_id).await.unwrap();
        assert_eq!(done.lifecycle_state, LifecycleState::Resolved);

        let again = registry.wind_down(&agent.agent_id).await;
        assert!(matches!(again, Err(FieldError::InvalidState { .. })));

        let live = registry.list(true).await.unwrap();
        assert!(live.is_empty());
        assert_eq!(registry.list(false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_handoff_without_claim() {
        let (_dir, registry) = setup().await;
        let agent = registry
            .register(AgentRegistration::new("coder", ["backend", "db"]).with_budget(10, 8))
            .await
            .unwrap();
        registry
            .heartbeat(&agent.agent_id, None, 0.4, "halfway")
            .await
            .unwrap();

        let result = registry
            .checkpoint(&agent.agent_id, CheckpointPlan::HandOff)
            .await
            .unwrap();
        let CheckpointResult::HandedOff { successor } = result else {
            panic!("expected a handoff");
        };

        assert_eq!(successor.parent_agent_id.as_deref(), Some(agent.agent_id.as_str()));
        assert_eq!(successor.affinities, agent.affinities);
        assert_eq!(successor.max_turns, 10);
        assert_eq!(successor.turn_count, 0);
        assert_eq!(successor.lifecycle_state, LifecycleState::Active);

        let copied = registry
            .latest_heartbeat(&successor.agent_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(copied.progress, 0.4);

        let old = registry.require(&agent.agent_id).await.unwrap();
        assert_eq!(old.lifecycle_state, LifecycleState::HandedOff);
    }

    #[tokio::test]
    async fn test_set_energy() {
        let (_dir, registry) = setup().await;
        let agent = registry
            .register(AgentRegistration::new("coder", ["backend"]))
            .await
            .unwrap();

        let tired = registry.set_energy(&agent.agent_id, 0.2).await.unwrap();
        assert_eq!(tired.energy_level, 0.2);
        assert!(registry.set_energy(&agent.agent_id, -1.0).await.is_err());
    }
}
