//! Error taxonomy shared by every component and storage backend.
//!
//! Expected contention (a lost claim, a duplicate completion, a rule already
//! fired in its window) is reported as `false`/`None` by the operation itself
//! and never reaches this type.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    /// The entity exists but is not in the state the operation requires.
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// The storage collaborator could not be reached or a transaction could
    /// not commit. Always fatal for the current operation.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    #[error("invalid trigger condition: {0}")]
    InvalidCondition(String),

    #[error("invalid step template: {0}")]
    InvalidTemplate(String),

    #[error("unknown status '{0}'")]
    UnknownStatus(String),
}

impl OpsError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        OpsError::NotFound { entity, id }
    }

    /// True for errors that mean the backing store itself is unhealthy.
    pub fn is_storage(&self) -> bool {
        matches!(self, OpsError::StorageUnavailable(_))
    }
}

pub type OpsResult<T> = Result<T, OpsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_entity_and_id() {
        let id = Uuid::nil();
        let err = OpsError::not_found("mission", id);
        assert_eq!(
            err.to_string(),
            "mission 00000000-0000-0000-0000-000000000000 not found"
        );
        assert!(!err.is_storage());
    }

    #[test]
    fn sqlx_errors_convert_to_storage_unavailable() {
        let err: OpsError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_storage());
        assert!(err.to_string().starts_with("storage unavailable"));
    }
}
