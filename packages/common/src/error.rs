use crate::ids::SessionId;
use thiserror::Error;

/// Every failure the glue layer can report.
///
/// Input faults concern one element of one batch and never abort the rest of
/// it. Internal faults mean the registry or graph bookkeeping is broken and
/// must reach the caller of the engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GlueError {
    #[error("Value of type `{0}` has no glue representation")]
    UnmappableType(String),

    #[error("Unknown session id {0}")]
    UnknownSession(SessionId),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Node {0} is not an object")]
    NotAnObject(SessionId),

    #[error("Node {0} is not a collection")]
    NotACollection(SessionId),

    #[error("Node {0} is not a command")]
    NotACommand(SessionId),

    #[error("Malformed mirror description: {0}")]
    MalformedDescription(String),

    #[error("Command {0} failed: {1}")]
    CommandFailed(SessionId, String),

    #[error("Serialization exceeded depth {depth}; visited-set bookkeeping is broken")]
    SerializationCycle { depth: usize },

    #[error("Registry corruption: {0}")]
    RegistryCorruption(String),

    #[error("Graph has no node for session {0}")]
    MissingNode(SessionId),

    #[error("Edit index {index} out of range for length {len}")]
    EditOutOfRange { index: usize, len: usize },
}

impl GlueError {
    /// Faults that are not locally recoverable and must be surfaced
    pub fn is_internal_fault(&self) -> bool {
        matches!(
            self,
            GlueError::SerializationCycle { .. }
                | GlueError::RegistryCorruption(_)
                | GlueError::MissingNode(_)
                | GlueError::EditOutOfRange { .. }
        )
    }

    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        GlueError::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}
