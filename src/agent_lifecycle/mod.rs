// Agent Lifecycle Module - worker harness around the field
//
// A worker drives one agent through sense → claim → work turns → resolve,
// with heartbeats, turn budgets and checkpoint handoff handled for it. The
// actual work is injected through the WorkHandler trait.

pub mod state_machine;
pub mod traits;
pub mod types;
pub mod worker;

#[cfg(test)]
pub mod mocks;


pub use state_machine::{NodeEnd, WorkerEvent, WorkerSession};
pub use traits::WorkHandler;
pub use types::{StopReason, TurnContext, TurnOutcome, TurnReply, WorkerConfig, WorkerReport};
pub use worker::FieldWorker;
