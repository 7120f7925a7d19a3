use thiserror::Error;

use crate::traits::{ErrorKind, OrderEngineError};

/// The ways an admin force-action can fail.
#[derive(Debug, Clone, Error)]
pub enum AdminActionError {
    /// The request was refused. An audit row with `success = false` was committed for it.
    #[error("Admin action rejected (audit #{audit_id}). {reason}")]
    Rejected { audit_id: i64, reason: String, kind: ErrorKind },
    /// Nothing was recorded, typically because the database itself failed.
    #[error(transparent)]
    Engine(#[from] OrderEngineError),
}

impl AdminActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdminActionError::Rejected { kind, .. } => *kind,
            AdminActionError::Engine(e) => e.kind(),
        }
    }

    pub fn audit_id(&self) -> Option<i64> {
        match self {
            AdminActionError::Rejected { audit_id, .. } => Some(*audit_id),
            AdminActionError::Engine(_) => None,
        }
    }
}
