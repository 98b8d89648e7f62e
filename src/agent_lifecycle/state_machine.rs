use serde::{Deserialize, Serialize};
use statig::prelude::*;

/// How a worker's claim on a node ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeEnd {
    Resolved,
    Released,
    Blocked,
    /// Claim was taken away (sweeper reclaim or block) before we finished
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerEvent {
    Claimed { node_id: String },
    TurnTaken,
    NodeFinished { end: NodeEnd },
    BudgetReached,
    CheckpointDone { successor: Option<String> },
    Stop,
}

/// In-process view of one agent session: `sensing → working → checkpointing → finished`
#[derive(Default)]
pub struct WorkerSession {
    pub agent_id: String,
    pub current_node: Option<String>,
    pub turns_on_node: u32,
    pub turns: u32,
    pub completed: u32,
    pub failed: u32,
    pub blocked: u32,
    pub lost: u32,
    pub successor: Option<String>,
}

impl WorkerSession {
    pub fn new(agent_id: String) -> Self {
        Self {
            agent_id,
            ..Default::default()
        }
    }
}

#[state_machine(initial = "State::sensing()")]
impl WorkerSession {
    #[state]
    fn sensing(&mut self, event: &WorkerEvent) -> Outcome<State> {
        match event {
            WorkerEvent::Claimed { node_id } => {
                self.current_node = Some(node_id.clone());
                self.turns_on_node = 0;
                tracing::info!(agent_id = %self.agent_id, node_id = %node_id, "Worker claimed node");
                Transition(State::working())
            }
            WorkerEvent::BudgetReached => Transition(State::checkpointing()),
            WorkerEvent::Stop => Transition(State::finished()),
            _ => Handled,
        }
    }

    #[state]
    fn working(&mut self, event: &WorkerEvent) -> Outcome<State> {
        match event {
            WorkerEvent::TurnTaken => {
                self.turns += 1;
                self.turns_on_node += 1;
                Handled
            }
            WorkerEvent::NodeFinished { end } => {
                match end {
                    NodeEnd::Resolved => self.completed += 1,
                    NodeEnd::Released => self.failed += 1,
                    NodeEnd::Blocked => self.blocked += 1,
                    NodeEnd::Lost => self.lost += 1,
                }
                tracing::debug!(
                    agent_id = %self.agent_id,
                    node_id = ?self.current_node,
                    end = ?end,
                    "Worker finished with node"
                );
                self.current_node = None;
                self.turns_on_node = 0;
                Transition(State::sensing())
            }
            WorkerEvent::BudgetReached => {
                tracing::info!(
                    agent_id = %self.agent_id,
                    turns = self.turns,
                    "Worker budget reached mid-node"
                );
                Transition(State::checkpointing())
            }
            WorkerEvent::Stop => {
                self.current_node = None;
                Transition(State::finished())
            }
            _ => Handled,
        }
    }

    #[state]
    fn checkpointing(&mut self, event: &WorkerEvent) -> Outcome<State> {
        match event {
            WorkerEvent::CheckpointDone { successor } => {
                self.successor = successor.clone();
                self.current_node = None;
                tracing::info!(
                    agent_id = %self.agent_id,
                    successor = ?successor,
                    "Worker checkpointed"
                );
                Transition(State::finished())
            }
            WorkerEvent::Stop => Transition(State::finished()),
            _ => Handled,
        }
    }

    #[state]
    fn finished(&mut self, event: &WorkerEvent) -> Outcome<State> {
        let _ = event;
        Handled
    }
}

impl WorkerSession {
    pub fn is_holding(&self) -> bool {
        self.current_node.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_basic_flow() {
        let mut sm = WorkerSession::new("agent-1".to_string()).state_machine();
        assert!(matches!(sm.state(), State::Sensing {}));

        sm.handle(&WorkerEvent::Claimed {
            node_id: "n1".to_string(),
        });
        assert!(matches!(sm.state(), State::Working {}));
        assert!(sm.inner().is_holding());

        sm.handle(&WorkerEvent::TurnTaken);
        sm.handle(&WorkerEvent::TurnTaken);
        assert_eq!(sm.inner().turns_on_node, 2);

        sm.handle(&WorkerEvent::NodeFinished {
            end: NodeEnd::Resolved,
        });
        assert!(matches!(sm.state(), State::Sensing {}));
        assert_eq!(sm.inner().completed, 1);
        assert!(!sm.inner().is_holding());

        sm.handle(&WorkerEvent::Stop);
        assert!(matches!(sm.state(), State::Finished {}));
    }

    #[test]
    fn test_session_checkpoint_flow() {
        let mut sm = WorkerSession::new("agent-1".to_string()).state_machine();
        sm.handle(&WorkerEvent::Claimed {
            node_id: "n1".to_string(),
        });
        sm.handle(&WorkerEvent::BudgetReached);
        assert!(matches!(sm.state(), State::Checkpointing {}));

        // Node events are ignored while checkpointing
        sm.handle(&WorkerEvent::NodeFinished {
            end: NodeEnd::Resolved,
        });
        assert_eq!(sm.inner().completed, 0);

        sm.handle(&WorkerEvent::CheckpointDone {
            successor: Some("agent-2".to_string()),
        });
        assert!(matches!(sm.state(), State::Finished {}));
        assert_eq!(sm.inner().successor.as_deref(), Some("agent-2"));
    }

    #[test]
    fn test_claim_ignored_outside_sensing() {
        let mut sm = WorkerSession::new("agent-1".to_string()).state_machine();
        sm.handle(&WorkerEvent::Stop);
        sm.handle(&WorkerEvent::Claimed {
            node_id: "n1".to_string(),
        });
        assert!(matches!(sm.state(), State::Finished {}));
        assert!(!sm.inner().is_holding());
    }
}
