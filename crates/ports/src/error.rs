//! Error type shared by every port.

/// Failure reported by a storage or queue driver.
///
/// Version mismatches are not errors: conditional writes report them through
/// their return value so the engine can reload and decide.
#[derive(Debug, thiserror::Error)]
pub enum PortsError {
    /// The record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Record kind, e.g. `NodeExecution`.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A record with the same id is already stored.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// Record kind.
        entity: &'static str,
        /// Identifier that collided.
        id: String,
    },

    /// The backend rejected the operation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PortsError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists { entity, id: id.into() }
    }
}
