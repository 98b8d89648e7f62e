// Mock work handlers for testing - no side effects

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::watch;

use crate::agent_lifecycle::traits::WorkHandler;
use crate::agent_lifecycle::types::{TurnContext, TurnOutcome, TurnReply};

/// Plays back scripted replies in order, then completes every node.
/// Records `(agent_id, node_id, turn_on_node)` for each call.
#[derive(Debug, Default)]
pub struct ScriptedHandler {
    script: Mutex<VecDeque<Result<TurnReply, String>>>,
    pub calls: Mutex<Vec<(String, String, u32)>>,
    tokens_per_turn: u64,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens_per_turn(mut self, tokens: u64) -> Self {
        self.tokens_per_turn = tokens;
        self
    }

    pub fn then(self, outcome: TurnOutcome) -> Self {
        self.push(Ok(TurnReply::new(outcome)))
    }

    pub fn then_error(self, message: &str) -> Self {
        self.push(Err(message.to_string()))
    }

    fn push(self, entry: Result<TurnReply, String>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(entry);
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn nodes_seen(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|c| c.iter().map(|(_, node, _)| node.clone()).collect())
            .unwrap_or_default()
    }

    pub fn agents_seen(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|c| c.iter().map(|(agent, _, _)| agent.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl WorkHandler for ScriptedHandler {
    async fn work_turn(&self, ctx: &TurnContext) -> Result<TurnReply> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((ctx.agent_id.clone(), ctx.node.id.clone(), ctx.turn_on_node));
        }
        let next = self
            .script
            .lock()
            .map_err(|_| anyhow!("script lock poisoned"))?
            .pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply.with_tokens(self.tokens_per_turn)),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(TurnReply::new(TurnOutcome::Completed).with_tokens(self.tokens_per_turn)),
        }
    }
}

/// Fires the shutdown signal during its first turn and keeps working
pub struct ShutdownMidTurn {
    pub shutdown: watch::Sender<bool>,
}

#[async_trait]
impl WorkHandler for ShutdownMidTurn {
    async fn work_turn(&self, _ctx: &TurnContext) -> Result<TurnReply> {
        self.shutdown.send_replace(true);
        Ok(TurnReply::new(TurnOutcome::Continue))
    }
}
