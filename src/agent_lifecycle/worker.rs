// Field worker - the sense → claim → work → resolve/release loop around a WorkHandler
//
// The worker never holds a lock across a handler turn. Every decision that
// matters for correctness is made by the coordinator; the session state
// machine only tracks what this process believes it is doing.

use rand::Rng;
use statig::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use super::state_machine::{NodeEnd, State, WorkerEvent, WorkerSession};
use super::traits::WorkHandler;
use super::types::{StopReason, TurnContext, TurnOutcome, TurnReply, WorkerConfig, WorkerReport};
use crate::agents::registry::AgentRegistry;
use crate::agents::types::{CheckpointResult, LifecycleState};
use crate::error::{FieldError, FieldResult};
use crate::field::coordination::FieldCoordinator;
use crate::field::types::{FieldNode, ResolveOutcome, SenseQuery};
use crate::telemetry::{create_coordination_span, generate_correlation_id};

/// Result of one pass through the loop for a single agent
enum SessionEnd {
    HandedOff { successor: String, node: Option<FieldNode> },
    Stopped(StopReason),
}

pub struct FieldWorker {
    coordinator: FieldCoordinator,
    registry: AgentRegistry,
    handler: Arc<dyn WorkHandler>,
    config: WorkerConfig,
}

impl FieldWorker {
    pub fn new(
        coordinator: FieldCoordinator,
        registry: AgentRegistry,
        handler: Arc<dyn WorkHandler>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            coordinator,
            registry,
            handler,
            config,
        }
    }

    /// Work as `agent_id` until idle, shutdown, or a checkpoint that does
    /// not hand off. Follows handoffs when configured to.
    pub async fn run(&self, agent_id: &str, shutdown: watch::Receiver<bool>) -> FieldResult<WorkerReport> {
        let mut report = WorkerReport::default();
        let mut current_agent = agent_id.to_string();
        let mut inherited: Option<FieldNode> = None;

        loop {
            report.agents.push(current_agent.clone());
            let span = create_coordination_span(
                "worker_session",
                Some(&current_agent),
                None,
                Some(&generate_correlation_id()),
            );
            let end = self
                .run_session(&current_agent, inherited.take(), shutdown.clone(), &mut report)
                .instrument(span)
                .await?;

            match end {
                SessionEnd::HandedOff { successor, node } if self.config.follow_handoffs => {
                    info!(from = %current_agent, to = %successor, "Continuing as successor agent");
                    current_agent = successor;
                    inherited = node;
                }
                SessionEnd::HandedOff { .. } => {
                    report.stop = None;
                    return Ok(report);
                }
                SessionEnd::Stopped(reason) => {
                    report.stop = Some(reason);
                    return Ok(report);
                }
            }
        }
    }

    async fn run_session(
        &self,
        agent_id: &str,
        inherited: Option<FieldNode>,
        mut shutdown: watch::Receiver<bool>,
        report: &mut WorkerReport,
    ) -> FieldResult<SessionEnd> {
        let mut sm = WorkerSession::new(agent_id.to_string()).state_machine();
        let mut held: Option<FieldNode> = None;
        let mut idle_polls = 0u32;
        let mut stop_reason = StopReason::Shutdown;

        if let Some(node) = inherited {
            sm.handle(&WorkerEvent::Claimed {
                node_id: node.id.clone(),
            });
            held = Some(node);
        }

        let end = loop {
            if *shutdown.borrow() && !matches!(sm.state(), State::Finished {}) {
                if let Some(node) = held.take() {
                    self.give_back(agent_id, &node.id, "worker shutdown").await;
                }
                stop_reason = StopReason::Shutdown;
                sm.handle(&WorkerEvent::Stop);
            }

            match sm.state() {
                State::Sensing {} => {
                    let candidates = match self
                        .coordinator
                        .sense(agent_id, SenseQuery::limit(self.config.sense_limit))
                        .await
                    {
                        Ok(candidates) => candidates,
                        Err(FieldError::InvalidState { .. }) => {
                            stop_reason = StopReason::Reclaimed;
                            sm.handle(&WorkerEvent::Stop);
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    let mut claimed = None;
                    let mut agent_unavailable = false;
                    for candidate in &candidates {
                        match self.coordinator.claim(agent_id, &candidate.id).await {
                            Ok(node) => {
                                claimed = Some(node);
                                break;
                            }
                            Err(e) if e.is_recoverable() => {
                                debug!(node_id = %candidate.id, "Candidate taken, trying next");
                            }
                            Err(FieldError::InvalidState { entity: "Node", .. }) => {
                                debug!(node_id = %candidate.id, "Candidate no longer open, trying next");
                            }
                            Err(FieldError::InvalidState { entity: "Agent", state, .. }) => {
                                info!(state = %state, "Agent no longer takes new work");
                                agent_unavailable = true;
                                break;
                            }
                            Err(e) => return Err(e),
                        }
                    }

                    if agent_unavailable {
                        stop_reason = StopReason::WoundDown;
                        sm.handle(&WorkerEvent::Stop);
                        continue;
                    }

                    match claimed {
                        Some(node) => {
                            idle_polls = 0;
                            sm.handle(&WorkerEvent::Claimed {
                                node_id: node.id.clone(),
                            });
                            held = Some(node);
                        }
                        None => {
                            idle_polls += 1;
                            if self
                                .config
                                .max_idle_polls
                                .is_some_and(|max| idle_polls >= max)
                            {
                                stop_reason = StopReason::Idle;
                                sm.handle(&WorkerEvent::Stop);
                                continue;
                            }
                            let pause = self.backoff();
                            tokio::select! {
                                _ = tokio::time::sleep(pause) => {}
                                changed = shutdown.changed() => {
                                    if changed.is_err() {
                                        // Nobody left to signal us; treat as shutdown
                                        stop_reason = StopReason::Shutdown;
                                        sm.handle(&WorkerEvent::Stop);
                                    }
                                }
                            }
                        }
                    }
                }
                State::Working {} => {
                    let Some(node) = held.clone() else {
                        sm.handle(&WorkerEvent::NodeFinished { end: NodeEnd::Lost });
                        continue;
                    };
                    let ctx = TurnContext {
                        agent_id: agent_id.to_string(),
                        node: node.clone(),
                        turn_on_node: sm.inner().turns_on_node,
                    };

                    let reply = match self.handler.work_turn(&ctx).await {
                        Ok(reply) => reply,
                        Err(e) => {
                            warn!(node_id = %node.id, error = %e, "Work handler failed");
                            TurnReply::new(TurnOutcome::Failed {
                                reason: e.to_string(),
                            })
                        }
                    };

                    match self.account_turn(agent_id, &node.id, &reply).await {
                        Ok(needs_checkpoint) => {
                            sm.handle(&WorkerEvent::TurnTaken);
                            report.turns += 1;

                            if let Some(end) = self.apply_outcome(agent_id, &node.id, &reply.outcome).await? {
                                held = None;
                                sm.handle(&WorkerEvent::NodeFinished { end });
                            }
                            if needs_checkpoint {
                                sm.handle(&WorkerEvent::BudgetReached);
                            }
                        }
                        Err(FieldError::InvalidState { .. }) | Err(FieldError::NotFound { .. }) => {
                            // Terminated by the sweeper while we were working
                            warn!(node_id = %node.id, "Agent was reclaimed mid-turn");
                            held = None;
                            sm.handle(&WorkerEvent::NodeFinished { end: NodeEnd::Lost });
                            stop_reason = StopReason::Reclaimed;
                            sm.handle(&WorkerEvent::Stop);
                        }
                        Err(e) => return Err(e),
                    }
                }
                State::Checkpointing {} => {
                    let result = self
                        .registry
                        .checkpoint(agent_id, self.config.checkpoint_plan)
                        .await?;
                    held = None;
                    match result {
                        CheckpointResult::HandedOff { successor } => {
                            let node = match &successor.current_node_id {
                                Some(node_id) => Some(self.coordinator.get_node(node_id).await?),
                                None => None,
                            };
                            sm.handle(&WorkerEvent::CheckpointDone {
                                successor: Some(successor.agent_id.clone()),
                            });
                            break SessionEnd::HandedOff {
                                successor: successor.agent_id,
                                node,
                            };
                        }
                        CheckpointResult::Released { .. } => {
                            sm.handle(&WorkerEvent::CheckpointDone { successor: None });
                            break SessionEnd::Stopped(StopReason::Released);
                        }
                    }
                }
                State::Finished {} => {
                    if stop_reason != StopReason::Reclaimed {
                        self.retire(agent_id).await;
                    }
                    break SessionEnd::Stopped(stop_reason.clone());
                }
            }
        };

        let session = sm.inner();
        report.completed += session.completed;
        report.failed += session.failed;
        report.blocked += session.blocked;
        report.lost += session.lost;
        Ok(end)
    }

    /// Heartbeat and count the turn. Returns whether the budget is spent.
    async fn account_turn(&self, agent_id: &str, node_id: &str, reply: &TurnReply) -> FieldResult<bool> {
        self.registry
            .heartbeat(agent_id, Some(node_id), reply.progress.clamp(0.0, 1.0), &reply.message)
            .await?;
        let turn = self.registry.record_turn(agent_id, reply.tokens_used).await?;
        Ok(turn.needs_checkpoint)
    }

    /// Apply a turn's outcome to the field. `None` means keep working.
    async fn apply_outcome(
        &self,
        agent_id: &str,
        node_id: &str,
        outcome: &TurnOutcome,
    ) -> FieldResult<Option<NodeEnd>> {
        let applied = match outcome {
            TurnOutcome::Continue => return Ok(None),
            TurnOutcome::Completed => self
                .coordinator
                .resolve(agent_id, node_id, ResolveOutcome::Success)
                .await
                .map(|_| NodeEnd::Resolved),
            TurnOutcome::Failed { reason } => self
                .coordinator
                .release(agent_id, node_id, reason)
                .await
                .map(|_| NodeEnd::Released),
            TurnOutcome::BlockedOn { ids } => self
                .coordinator
                .block(node_id, ids)
                .await
                .map(|_| NodeEnd::Blocked),
        };

        match applied {
            Ok(end) => Ok(Some(end)),
            Err(e) if e.is_recoverable() => {
                warn!(node_id = %node_id, error = %e, "Claim was lost before the outcome landed");
                Ok(Some(NodeEnd::Lost))
            }
            Err(FieldError::Validation(reason)) if matches!(outcome, TurnOutcome::BlockedOn { .. }) => {
                warn!(node_id = %node_id, reason = %reason, "Invalid block request, releasing instead");
                self.coordinator
                    .release(agent_id, node_id, &format!("invalid block: {reason}"))
                    .await?;
                Ok(Some(NodeEnd::Released))
            }
            Err(e) => Err(e),
        }
    }

    async fn give_back(&self, agent_id: &str, node_id: &str, reason: &str) {
        if let Err(e) = self.coordinator.yield_claim(agent_id, node_id, reason).await {
            warn!(node_id = %node_id, error = %e, "Failed to hand node back on stop");
        }
    }

    /// Mark the agent finished if it is still live; a no-op otherwise
    async fn retire(&self, agent_id: &str) {
        match self.registry.get(agent_id).await {
            Ok(Some(agent)) if !agent.lifecycle_state.is_terminal() => {
                if agent.lifecycle_state == LifecycleState::Working {
                    debug!(agent_id = %agent_id, "Agent still working, leaving it to the sweeper");
                    return;
                }
                if let Err(e) = self.registry.finish(agent_id).await {
                    warn!(agent_id = %agent_id, error = %e, "Failed to finish agent");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(agent_id = %agent_id, error = %e, "Failed to look up agent"),
        }
    }

    fn backoff(&self) -> Duration {
        let jitter_ms = self.config.backoff_jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        self.config.idle_backoff + Duration::from_millis(extra)
    }
}
