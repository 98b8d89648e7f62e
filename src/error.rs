// Field coordination errors
//
// Every coordination-API operation returns FieldResult. Callers branch on the
// variant: AlreadyClaimed and NotOwner mean "re-sense and move on", the rest
// are surfaced as-is.

use thiserror::Error;

pub type FieldResult<T> = Result<T, FieldError>;

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("Node {node_id} is already claimed")]
    AlreadyClaimed { node_id: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Agent {agent_id} does not hold node {node_id}")]
    NotOwner { node_id: String, agent_id: String },

    #[error("Cannot {operation} {entity} {id} in state '{state}'")]
    InvalidState {
        entity: &'static str,
        id: String,
        state: String,
        operation: &'static str,
    },

    #[error("Node {node_id} is '{state}', only resolved nodes can be approved")]
    NotResolved { node_id: String, state: String },

    #[error("Agent {agent_id} is not a review agent")]
    NotReviewer { agent_id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FieldError {
    pub(crate) fn node_not_found(id: impl Into<String>) -> Self {
        FieldError::NotFound {
            entity: "Node",
            id: id.into(),
        }
    }

    pub(crate) fn agent_not_found(id: impl Into<String>) -> Self {
        FieldError::NotFound {
            entity: "Agent",
            id: id.into(),
        }
    }

    /// Whether the caller should simply re-sense and try other work.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FieldError::AlreadyClaimed { .. } | FieldError::NotOwner { .. }
        )
    }
}
