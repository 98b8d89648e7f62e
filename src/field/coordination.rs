// Field Coordinator - sense / claim / resolve / release / block / boost / deposit / approve
//
// No in-process locks. Every mutation is one SQLite transaction whose first
// statement is a write, and the compare-and-set on `state` decides races:
// a conditional UPDATE that touches zero rows means someone else won.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::potential::{effective_potential, rank_order, PotentialModel};
use super::store::{
    clear_claim, fetch_sense_candidates, fetch_state, insert_blocker, insert_node,
    release_dependents, require_node, write_temperature, NewNode, NodeStore,
};
use super::types::{
    validate_tags, DepositReceipt, FieldNode, FieldSummary, NodeDescriptor, NodeState,
    NodeSummary, ResolveOutcome, SenseQuery,
};
use crate::agents::registry::{
    begin_work, end_work, lifecycle_rejection, require_agent, WorkTally,
};
use crate::agents::types::LifecycleState;
use crate::config::FieldConfig;
use crate::database::to_millis;
use crate::error::{FieldError, FieldResult};
use crate::events::{EventBus, FieldEvent};
use crate::observability::field_metrics;
use crate::telemetry::{create_coordination_span, generate_correlation_id};
use crate::time_operation;

/// Why a conditional UPDATE on a held node touched no row
async fn ownership_rejection(
    conn: &mut SqliteConnection,
    node_id: &str,
    agent_id: &str,
    operation: &'static str,
) -> FieldError {
    match fetch_state(conn, node_id).await {
        Ok(Some(state)) if state.is_done() => FieldError::InvalidState {
            entity: "Node",
            id: node_id.to_string(),
            state: state.to_string(),
            operation,
        },
        Ok(Some(_)) => FieldError::NotOwner {
            node_id: node_id.to_string(),
            agent_id: agent_id.to_string(),
        },
        Ok(None) => FieldError::node_not_found(node_id),
        Err(e) => e,
    }
}

/// Whether `node_id` is reachable from `blocker_id` along blocker edges,
/// i.e. blocking `node_id` on `blocker_id` would close a cycle.
async fn creates_cycle(
    conn: &mut SqliteConnection,
    node_id: &str,
    blocker_id: &str,
) -> FieldResult<bool> {
    let hit: Option<i64> = sqlx::query_scalar(
        r#"
        WITH RECURSIVE upstream(id) AS (
            SELECT blocker_id FROM node_blockers WHERE node_id = ?1
            UNION
            SELECT b.blocker_id FROM node_blockers b JOIN upstream u ON b.node_id = u.id
        )
        SELECT 1 FROM upstream WHERE id = ?2 LIMIT 1
        "#,
    )
    .bind(blocker_id)
    .bind(node_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(hit.is_some())
}

/// A deposit descriptor flattened with its pre-assigned id
struct PlannedNode<'a> {
    id: String,
    parent_id: Option<String>,
    descriptor: &'a NodeDescriptor,
    /// In-tree blockers (already resolved to ids)
    local_blockers: Vec<String>,
    /// Blockers that must already exist in the store
    external_blockers: Vec<String>,
}

fn validate_descriptor(descriptor: &NodeDescriptor) -> FieldResult<()> {
    if descriptor.title.trim().is_empty() {
        return Err(FieldError::Validation("node title must not be empty".to_string()));
    }
    if !descriptor.potential.is_finite() || !(0.0..=1.0).contains(&descriptor.potential) {
        return Err(FieldError::Validation(format!(
            "potential of '{}' must be within [0, 1], got {}",
            descriptor.title, descriptor.potential
        )));
    }
    validate_tags(&descriptor.affinity, false)?;
    for child in &descriptor.children {
        if !descriptor.node_type.can_contain(child.node_type) {
            return Err(FieldError::Validation(format!(
                "a {} cannot contain a {} ('{}')",
                descriptor.node_type, child.node_type, child.title
            )));
        }
    }
    Ok(())
}

/// Validate a whole tree and assign ids. Nothing touches the store here.
fn plan_deposit(root: &NodeDescriptor) -> FieldResult<Vec<PlannedNode<'_>>> {
    let mut flat: Vec<(String, Option<String>, &NodeDescriptor)> = Vec::new();
    let mut stack: Vec<(&NodeDescriptor, Option<String>, bool)> = vec![(root, root.parent_id.clone(), true)];
    let mut keys: HashMap<&str, String> = HashMap::new();

    while let Some((descriptor, parent_id, is_root)) = stack.pop() {
        validate_descriptor(descriptor)?;
        if !is_root && descriptor.parent_id.is_some() {
            return Err(FieldError::Validation(format!(
                "only the root node may name an existing parent ('{}')",
                descriptor.title
            )));
        }

        let id = Uuid::new_v4().to_string();
        if let Some(key) = descriptor.key.as_deref() {
            if keys.insert(key, id.clone()).is_some() {
                return Err(FieldError::Validation(format!("duplicate node key '{key}'")));
            }
        }

        // Reverse so children keep their submitted order when popped
        for child in descriptor.children.iter().rev() {
            stack.push((child, Some(id.clone()), false));
        }
        flat.push((id, parent_id, descriptor));
    }

    let mut planned = Vec::with_capacity(flat.len());
    for (id, parent_id, descriptor) in flat {
        let mut local_blockers = Vec::new();
        let mut external_blockers = Vec::new();
        for reference in &descriptor.blocked_by {
            match keys.get(reference.as_str()) {
                Some(blocker) if *blocker == id => {
                    return Err(FieldError::Validation(format!(
                        "node '{}' cannot block itself",
                        descriptor.title
                    )));
                }
                Some(blocker) => local_blockers.push(blocker.clone()),
                None => external_blockers.push(reference.clone()),
            }
        }
        planned.push(PlannedNode {
            id,
            parent_id,
            descriptor,
            local_blockers,
            external_blockers,
        });
    }

    reject_local_cycles(&planned)?;
    Ok(planned)
}

fn reject_local_cycles(planned: &[PlannedNode<'_>]) -> FieldResult<()> {
    let edges: HashMap<&str, &[String]> = planned
        .iter()
        .map(|p| (p.id.as_str(), p.local_blockers.as_slice()))
        .collect();

    let mut done: HashSet<&str> = HashSet::new();
    for start in planned {
        if done.contains(start.id.as_str()) {
            continue;
        }
        let mut on_path: HashSet<&str> = HashSet::new();
        let mut stack: Vec<(&str, usize)> = vec![(start.id.as_str(), 0)];
        on_path.insert(start.id.as_str());

        while let Some((node, next)) = stack.pop() {
            let blockers = edges.get(node).copied().unwrap_or_default();
            if let Some(blocker) = blockers.get(next) {
                stack.push((node, next + 1));
                let blocker = blocker.as_str();
                if on_path.contains(blocker) {
                    return Err(FieldError::Validation(
                        "blocked_by references form a cycle".to_string(),
                    ));
                }
                if !done.contains(blocker) {
                    on_path.insert(blocker);
                    stack.push((blocker, 0));
                }
            } else {
                on_path.remove(node);
                done.insert(node);
            }
        }
    }
    Ok(())
}

fn build_receipt(planned: &[PlannedNode<'_>], index: usize) -> DepositReceipt {
    let node = &planned[index];
    let children = planned
        .iter()
        .enumerate()
        .filter(|(_, p)| p.parent_id.as_deref() == Some(node.id.as_str()))
        .map(|(i, _)| build_receipt(planned, i))
        .collect();
    DepositReceipt {
        id: node.id.clone(),
        node_type: node.descriptor.node_type,
        key: node.descriptor.key.clone(),
        children,
    }
}

/// The coordination API. Cheap to clone; clones share the pool and bus.
#[derive(Clone)]
pub struct FieldCoordinator {
    pool: SqlitePool,
    store: NodeStore,
    model: PotentialModel,
    config: FieldConfig,
    events: EventBus,
}

impl FieldCoordinator {
    pub fn new(pool: SqlitePool, config: FieldConfig, events: EventBus) -> Self {
        Self {
            store: NodeStore::new(pool.clone()),
            model: PotentialModel::from_config(&config),
            pool,
            config,
            events,
        }
    }

    pub fn model(&self) -> &PotentialModel {
        &self.model
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// Ranked open, unblocked nodes matching the agent's affinities.
    /// Read-only and racy: nothing is reserved.
    pub async fn sense(&self, agent_id: &str, query: SenseQuery) -> FieldResult<Vec<NodeSummary>> {
        self.sense_at(agent_id, query, Utc::now()).await
    }

    /// Sense with temperatures decayed to `now`
    pub async fn sense_at(
        &self,
        agent_id: &str,
        query: SenseQuery,
        now: DateTime<Utc>,
    ) -> FieldResult<Vec<NodeSummary>> {
        time_operation!("sense");
        let agent = {
            let mut conn = self.pool.acquire().await?;
            require_agent(&mut conn, agent_id).await?
        };
        if agent.lifecycle_state.is_terminal() {
            return Err(FieldError::InvalidState {
                entity: "Agent",
                id: agent_id.to_string(),
                state: agent.lifecycle_state.to_string(),
                operation: "sense for",
            });
        }

        let limit = query
            .limit
            .unwrap_or(self.config.default_sense_limit)
            .min(self.config.max_sense_limit);
        field_metrics().record_sense();
        if limit == 0 {
            return Ok(Vec::new());
        }

        let candidates = fetch_sense_candidates(&self.pool, query.node_types.as_deref()).await?;
        let mut ranked: Vec<NodeSummary> = candidates
            .into_iter()
            .filter(|node| agent.matches(&node.affinity))
            .map(|node| {
                let temperature =
                    self.model
                        .temperature_at(node.temperature, node.temperature_updated_at, now);
                NodeSummary {
                    effective_potential: effective_potential(node.potential, temperature),
                    id: node.id,
                    node_type: node.node_type,
                    title: node.title,
                    potential: node.potential,
                    temperature,
                    affinity: node.affinity,
                    parent_id: node.parent_id,
                    sequence_order: node.sequence_order,
                    created_at: node.created_at,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            rank_order(
                (a.effective_potential, a.sequence_order, a.created_at, a.id.as_str()),
                (b.effective_potential, b.sequence_order, b.created_at, b.id.as_str()),
            )
        });
        ranked.truncate(limit);

        debug!(agent_id = %agent_id, candidates = ranked.len(), "Sensed field");
        Ok(ranked)
    }

    /// Take exclusive ownership of an open node
    pub async fn claim(&self, agent_id: &str, node_id: &str) -> FieldResult<FieldNode> {
        let span = create_coordination_span(
            "claim",
            Some(agent_id),
            Some(node_id),
            Some(&generate_correlation_id()),
        );

        async move {
            time_operation!("claim");
            let now = Utc::now();

            {
                let mut conn = self.pool.acquire().await?;
                let agent = require_agent(&mut conn, agent_id).await?;
                if agent.lifecycle_state != LifecycleState::Active {
                    return Err(FieldError::InvalidState {
                        entity: "Agent",
                        id: agent_id.to_string(),
                        state: agent.lifecycle_state.to_string(),
                        operation: "claim for",
                    });
                }
            }

            let mut tx = self.pool.begin().await?;
            let result = sqlx::query(
                r#"
                UPDATE field_nodes
                SET state = 'claimed', claimed_by = ?2, updated_at = ?3
                WHERE id = ?1
                  AND state = 'open'
                  AND NOT EXISTS (SELECT 1 FROM node_blockers b WHERE b.node_id = field_nodes.id)
                "#,
            )
            .bind(node_id)
            .bind(agent_id)
            .bind(to_millis(now))
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                let error = match fetch_state(&mut tx, node_id).await? {
                    None => FieldError::node_not_found(node_id),
                    Some(NodeState::Claimed) => FieldError::AlreadyClaimed {
                        node_id: node_id.to_string(),
                    },
                    Some(state) => FieldError::InvalidState {
                        entity: "Node",
                        id: node_id.to_string(),
                        state: state.to_string(),
                        operation: "claim",
                    },
                };
                if matches!(error, FieldError::AlreadyClaimed { .. }) {
                    field_metrics().record_claim_conflict();
                    debug!("Lost claim race");
                }
                return Err(error);
            }

            if !begin_work(&mut tx, agent_id, node_id, now).await? {
                // Agent changed state since the check above; roll the claim back
                return Err(lifecycle_rejection(&mut tx, agent_id, "claim for").await);
            }

            let node = require_node(&mut tx, node_id).await?;
            tx.commit().await?;

            field_metrics().record_claim();
            info!("Node claimed");
            self.events.publish(FieldEvent::Claimed {
                node_id: node_id.to_string(),
                agent_id: agent_id.to_string(),
            });
            Ok(node)
        }
        .instrument(span)
        .await
    }

    /// Finish work on a held node. Failure is the same as `release`.
    pub async fn resolve(
        &self,
        agent_id: &str,
        node_id: &str,
        outcome: ResolveOutcome,
    ) -> FieldResult<FieldNode> {
        if let ResolveOutcome::Failure { reason } = outcome {
            return self.release(agent_id, node_id, &reason).await;
        }

        let span = create_coordination_span(
            "resolve",
            Some(agent_id),
            Some(node_id),
            Some(&generate_correlation_id()),
        );

        async move {
            time_operation!("resolve");
            let now = Utc::now();
            let mut tx = self.pool.begin().await?;

            let result = sqlx::query(
                r#"
                UPDATE field_nodes
                SET state = 'resolved', claimed_by = NULL, resolved_at = ?3, resolved_by = ?2,
                    updated_at = ?3
                WHERE id = ?1 AND state = 'claimed' AND claimed_by = ?2
                "#,
            )
            .bind(node_id)
            .bind(agent_id)
            .bind(to_millis(now))
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(ownership_rejection(&mut tx, node_id, agent_id, "resolve").await);
            }

            let unblocked = release_dependents(&mut tx, node_id, now).await?;
            end_work(&mut tx, agent_id, node_id, WorkTally::Completed, now).await?;
            let node = require_node(&mut tx, node_id).await?;
            tx.commit().await?;

            field_metrics().record_resolve();
            info!(unblocked = unblocked.len(), "Node resolved");
            self.events.publish(FieldEvent::Resolved {
                node_id: node_id.to_string(),
                agent_id: agent_id.to_string(),
                unblocked,
            });
            Ok(node)
        }
        .instrument(span)
        .await
    }

    /// Give a held node back after a failure. Raises its temperature.
    pub async fn release(&self, agent_id: &str, node_id: &str, reason: &str) -> FieldResult<FieldNode> {
        let span = create_coordination_span(
            "release",
            Some(agent_id),
            Some(node_id),
            Some(&generate_correlation_id()),
        );

        async move {
            time_operation!("release");
            let now = Utc::now();
            let mut tx = self.pool.begin().await?;

            // Ownership check doubles as the write that takes the lock
            let touched = sqlx::query(
                "UPDATE field_nodes SET updated_at = ?3 WHERE id = ?1 AND state = 'claimed' AND claimed_by = ?2",
            )
            .bind(node_id)
            .bind(agent_id)
            .bind(to_millis(now))
            .execute(&mut *tx)
            .await?;

            if touched.rows_affected() == 0 {
                return Err(ownership_rejection(&mut tx, node_id, agent_id, "release").await);
            }

            let current = require_node(&mut tx, node_id).await?;
            let temperature =
                self.model
                    .after_release(current.temperature, current.temperature_updated_at, now);
            clear_claim(&mut tx, node_id, agent_id, Some(temperature), now).await?;
            end_work(&mut tx, agent_id, node_id, WorkTally::Failed, now).await?;
            let node = require_node(&mut tx, node_id).await?;
            tx.commit().await?;

            field_metrics().record_release();
            warn!(reason = %reason, temperature, "Node released");
            self.events.publish(FieldEvent::Released {
                node_id: node_id.to_string(),
                agent_id: agent_id.to_string(),
                reason: reason.to_string(),
                temperature,
            });
            Ok(node)
        }
        .instrument(span)
        .await
    }

    /// Hand a held node back without an outcome. Unlike `release` the node
    /// is not heated and the agent is not charged a failure.
    pub async fn yield_claim(&self, agent_id: &str, node_id: &str, reason: &str) -> FieldResult<FieldNode> {
        let span = create_coordination_span(
            "yield",
            Some(agent_id),
            Some(node_id),
            Some(&generate_correlation_id()),
        );

        async move {
            let now = Utc::now();
            let mut tx = self.pool.begin().await?;

            if !clear_claim(&mut tx, node_id, agent_id, None, now).await? {
                return Err(ownership_rejection(&mut tx, node_id, agent_id, "yield").await);
            }
            end_work(&mut tx, agent_id, node_id, WorkTally::Yielded, now).await?;
            let node = require_node(&mut tx, node_id).await?;
            tx.commit().await?;

            info!(reason = %reason, "Node handed back");
            self.events.publish(FieldEvent::Released {
                node_id: node_id.to_string(),
                agent_id: agent_id.to_string(),
                reason: reason.to_string(),
                temperature: node.temperature,
            });
            Ok(node)
        }
        .instrument(span)
        .await
    }

    /// Make `node_id` wait on `blocker_ids`. A claimed node loses its claim.
    pub async fn block(&self, node_id: &str, blocker_ids: &[String]) -> FieldResult<FieldNode> {
        let span = create_coordination_span(
            "block",
            None,
            Some(node_id),
            Some(&generate_correlation_id()),
        );

        async move {
            time_operation!("block");
            if blocker_ids.is_empty() {
                return Err(FieldError::Validation("at least one blocker is required".to_string()));
            }
            if blocker_ids.iter().any(|b| b == node_id) {
                return Err(FieldError::Validation(format!("node {node_id} cannot block itself")));
            }

            let now = Utc::now();
            let mut tx = self.pool.begin().await?;

            let touched = sqlx::query("UPDATE field_nodes SET updated_at = ?2 WHERE id = ?1")
                .bind(node_id)
                .bind(to_millis(now))
                .execute(&mut *tx)
                .await?;
            if touched.rows_affected() == 0 {
                return Err(FieldError::node_not_found(node_id));
            }

            let node = require_node(&mut tx, node_id).await?;
            if node.state.is_done() {
                return Err(FieldError::InvalidState {
                    entity: "Node",
                    id: node_id.to_string(),
                    state: node.state.to_string(),
                    operation: "block",
                });
            }

            let unique: BTreeSet<&String> = blocker_ids.iter().collect();
            let mut added = Vec::new();
            for blocker in unique {
                match fetch_state(&mut tx, blocker).await? {
                    None => return Err(FieldError::node_not_found(blocker.as_str())),
                    Some(state) if state.is_done() => {
                        debug!(blocker_id = %blocker, "Blocker already done, skipping");
                        continue;
                    }
                    Some(_) => {}
                }
                if creates_cycle(&mut tx, node_id, blocker).await? {
                    return Err(FieldError::Validation(format!(
                        "blocking {node_id} on {blocker} would create a cycle"
                    )));
                }
                if insert_blocker(&mut tx, node_id, blocker).await? {
                    added.push(blocker.clone());
                }
            }

            let preempted = if added.is_empty() {
                None
            } else {
                sqlx::query(
                    "UPDATE field_nodes SET state = 'blocked', claimed_by = NULL, updated_at = ?2 WHERE id = ?1",
                )
                .bind(node_id)
                .bind(to_millis(now))
                .execute(&mut *tx)
                .await?;

                match node.claimed_by.as_deref() {
                    Some(holder) => {
                        end_work(&mut tx, holder, node_id, WorkTally::Preempted, now).await?;
                        Some(holder.to_string())
                    }
                    None => None,
                }
            };

            let node = require_node(&mut tx, node_id).await?;
            tx.commit().await?;

            if !added.is_empty() {
                info!(blockers = ?added, preempted = ?preempted, "Node blocked");
                self.events.publish(FieldEvent::Blocked {
                    node_id: node_id.to_string(),
                    blockers: added,
                    preempted_agent: preempted,
                });
            }
            Ok(node)
        }
        .instrument(span)
        .await
    }

    /// Manual escalation: add `delta` to the node's decayed temperature
    pub async fn boost(&self, node_id: &str, delta: f64) -> FieldResult<FieldNode> {
        let span = create_coordination_span(
            "boost",
            None,
            Some(node_id),
            Some(&generate_correlation_id()),
        );

        async move {
            if !delta.is_finite() || delta < 0.0 {
                return Err(FieldError::Validation(format!(
                    "boost must be a non-negative number, got {delta}"
                )));
            }

            let now = Utc::now();
            let mut tx = self.pool.begin().await?;

            let touched = sqlx::query("UPDATE field_nodes SET updated_at = ?2 WHERE id = ?1")
                .bind(node_id)
                .bind(to_millis(now))
                .execute(&mut *tx)
                .await?;
            if touched.rows_affected() == 0 {
                return Err(FieldError::node_not_found(node_id));
            }

            let current = require_node(&mut tx, node_id).await?;
            if current.state.is_done() {
                return Err(FieldError::InvalidState {
                    entity: "Node",
                    id: node_id.to_string(),
                    state: current.state.to_string(),
                    operation: "boost",
                });
            }

            let temperature = self.model.boosted(
                current.temperature,
                current.temperature_updated_at,
                now,
                delta,
            );
            write_temperature(&mut tx, node_id, temperature, now).await?;
            let node = require_node(&mut tx, node_id).await?;
            tx.commit().await?;

            info!(delta, temperature, "Node boosted");
            self.events.publish(FieldEvent::Boosted {
                node_id: node_id.to_string(),
                temperature,
            });
            Ok(node)
        }
        .instrument(span)
        .await
    }

    /// Create a node tree atomically. Any invalid node rejects the whole tree.
    pub async fn deposit(&self, tree: &NodeDescriptor, created_by: &str) -> FieldResult<DepositReceipt> {
        let span = create_coordination_span(
            "deposit",
            Some(created_by),
            None,
            Some(&generate_correlation_id()),
        );

        async move {
            time_operation!("deposit");
            let planned = plan_deposit(tree)?;
            let now = Utc::now();
            let mut tx = self.pool.begin().await?;

            if let Some(parent_id) = tree.parent_id.as_deref() {
                let touched = sqlx::query("UPDATE field_nodes SET updated_at = updated_at WHERE id = ?1")
                    .bind(parent_id)
                    .execute(&mut *tx)
                    .await?;
                if touched.rows_affected() == 0 {
                    return Err(FieldError::node_not_found(parent_id));
                }
                let parent = require_node(&mut tx, parent_id).await?;
                if !parent.node_type.can_contain(tree.node_type) {
                    return Err(FieldError::Validation(format!(
                        "a {} cannot contain a {}",
                        parent.node_type, tree.node_type
                    )));
                }
            }

            for node in &planned {
                insert_node(
                    &mut tx,
                    &NewNode {
                        id: &node.id,
                        node_type: node.descriptor.node_type,
                        title: node.descriptor.title.trim(),
                        content: &node.descriptor.content,
                        potential: node.descriptor.potential,
                        affinity: &node.descriptor.affinity,
                        parent_id: node.parent_id.as_deref(),
                        state: NodeState::Open,
                        sequence_order: node.descriptor.sequence_order,
                        created_by,
                        now,
                    },
                )
                .await?;
            }

            for node in &planned {
                let mut blocked = false;
                for blocker in &node.local_blockers {
                    blocked |= insert_blocker(&mut tx, &node.id, blocker).await?;
                }
                for blocker in &node.external_blockers {
                    match fetch_state(&mut tx, blocker).await? {
                        None => return Err(FieldError::node_not_found(blocker.as_str())),
                        Some(state) if state.is_done() => continue,
                        Some(_) => blocked |= insert_blocker(&mut tx, &node.id, blocker).await?,
                    }
                }
                if blocked {
                    sqlx::query("UPDATE field_nodes SET state = 'blocked' WHERE id = ?1")
                        .bind(&node.id)
                        .execute(&mut *tx)
                        .await?;
                }
            }

            tx.commit().await?;

            let receipt = build_receipt(&planned, 0);
            field_metrics().record_deposit(planned.len() as u64);
            info!(root_id = %receipt.id, nodes = planned.len(), "Deposited node tree");
            self.events.publish(FieldEvent::Deposited {
                root_id: receipt.id.clone(),
                node_ids: receipt.ids(),
                created_by: created_by.to_string(),
            });
            Ok(receipt)
        }
        .instrument(span)
        .await
    }

    /// Sign off a resolved node. Only review agents may approve.
    pub async fn approve(&self, reviewer_id: &str, node_id: &str) -> FieldResult<FieldNode> {
        let span = create_coordination_span(
            "approve",
            Some(reviewer_id),
            Some(node_id),
            Some(&generate_correlation_id()),
        );

        async move {
            let reviewer = {
                let mut conn = self.pool.acquire().await?;
                require_agent(&mut conn, reviewer_id).await?
            };
            if !self
                .config
                .review_agent_types
                .iter()
                .any(|t| *t == reviewer.agent_type)
            {
                return Err(FieldError::NotReviewer {
                    agent_id: reviewer_id.to_string(),
                });
            }

            let now = Utc::now();
            let mut tx = self.pool.begin().await?;
            let result = sqlx::query(
                "UPDATE field_nodes SET state = 'approved', updated_at = ?2 WHERE id = ?1 AND state = 'resolved'",
            )
            .bind(node_id)
            .bind(to_millis(now))
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(match fetch_state(&mut tx, node_id).await? {
                    None => FieldError::node_not_found(node_id),
                    Some(NodeState::Approved) => FieldError::InvalidState {
                        entity: "Node",
                        id: node_id.to_string(),
                        state: NodeState::Approved.to_string(),
                        operation: "approve",
                    },
                    Some(state) => FieldError::NotResolved {
                        node_id: node_id.to_string(),
                        state: state.to_string(),
                    },
                });
            }

            let node = require_node(&mut tx, node_id).await?;
            tx.commit().await?;

            info!("Node approved");
            self.events.publish(FieldEvent::Approved {
                node_id: node_id.to_string(),
                reviewer_id: reviewer_id.to_string(),
            });
            Ok(node)
        }
        .instrument(span)
        .await
    }

    pub async fn get_node(&self, node_id: &str) -> FieldResult<FieldNode> {
        self.store.require(node_id).await
    }

    pub async fn children(&self, parent_id: &str) -> FieldResult<Vec<FieldNode>> {
        self.store.children(parent_id).await
    }

    pub async fn list_nodes(&self, state: Option<NodeState>) -> FieldResult<Vec<FieldNode>> {
        self.store.list(state).await
    }

    pub async fn field_summary(&self) -> FieldResult<FieldSummary> {
        self.store.summary().await
    }

    /// Current effective potential of a node, decayed to now
    pub fn effective_potential_of(&self, node: &FieldNode) -> f64 {
        let temperature =
            self.model
                .temperature_at(node.temperature, node.temperature_updated_at, Utc::now());
        effective_potential(node.potential, temperature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::types::NodeType;

    #[test]
    fn test_plan_assigns_keys_and_order() {
        let tree = NodeDescriptor::new(NodeType::Goal, "Ship")
            .child(NodeDescriptor::new(NodeType::Task, "first").with_key("a"))
            .child(NodeDescriptor::new(NodeType::Task, "second").blocked_on(&["a", "existing-id"]));

        let planned = plan_deposit(&tree).unwrap();
        assert_eq!(planned.len(), 3);
        assert_eq!(planned[0].descriptor.title, "Ship");
        assert_eq!(planned[1].descriptor.title, "first");
        assert_eq!(planned[2].local_blockers, vec![planned[1].id.clone()]);
        assert_eq!(planned[2].external_blockers, vec!["existing-id".to_string()]);

        let receipt = build_receipt(&planned, 0);
        assert_eq!(receipt.children.len(), 2);
        assert_eq!(receipt.id_for_key("a"), Some(planned[1].id.as_str()));
    }

    #[test]
    fn test_plan_rejects_bad_hierarchy() {
        let tree = NodeDescriptor::new(NodeType::Task, "leaf")
            .child(NodeDescriptor::new(NodeType::Task, "nested"));
        assert!(matches!(plan_deposit(&tree), Err(FieldError::Validation(_))));

        let tree = NodeDescriptor::new(NodeType::Spec, "spec")
            .child(NodeDescriptor::new(NodeType::Goal, "goal"));
        assert!(matches!(plan_deposit(&tree), Err(FieldError::Validation(_))));
    }

    #[test]
    fn test_plan_rejects_invalid_nodes() {
        let bad_potential = NodeDescriptor::new(NodeType::Goal, "g")
            .child(NodeDescriptor::new(NodeType::Task, "t").with_potential(1.5));
        assert!(plan_deposit(&bad_potential).is_err());

        let bad_tag = NodeDescriptor::new(NodeType::Goal, "g")
            .child(NodeDescriptor::new(NodeType::Task, "t").with_affinity(["*"]));
        assert!(plan_deposit(&bad_tag).is_err());

        let blank = NodeDescriptor::new(NodeType::Task, "   ");
        assert!(plan_deposit(&blank).is_err());

        let dup_keys = NodeDescriptor::new(NodeType::Goal, "g")
            .child(NodeDescriptor::new(NodeType::Task, "a").with_key("k"))
            .child(NodeDescriptor::new(NodeType::Task, "b").with_key("k"));
        assert!(plan_deposit(&dup_keys).is_err());
    }

    #[test]
    fn test_plan_rejects_cycles() {
        let tree = NodeDescriptor::new(NodeType::Goal, "g")
            .child(NodeDescriptor::new(NodeType::Task, "a").with_key("a").blocked_on(&["b"]))
            .child(NodeDescriptor::new(NodeType::Task, "b").with_key("b").blocked_on(&["a"]));
        assert!(matches!(plan_deposit(&tree), Err(FieldError::Validation(_))));

        let self_block = NodeDescriptor::new(NodeType::Task, "a").with_key("a").blocked_on(&["a"]);
        assert!(plan_deposit(&self_block).is_err());
    }
}
