// Seam between the field and whatever actually does the work

use anyhow::Result;
use async_trait::async_trait;

use super::types::{TurnContext, TurnReply};

/// One turn of work on a claimed node.
///
/// The harness owns claiming, heartbeats and budgets; implementations only
/// decide what happened this turn. An `Err` is treated as a failed turn and
/// the node is released with the error text as the reason.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn work_turn(&self, ctx: &TurnContext) -> Result<TurnReply>;
}
