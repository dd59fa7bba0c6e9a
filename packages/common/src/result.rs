use crate::error::GlueError;

/// Common Result type alias
pub type GlueResult<T> = Result<T, GlueError>;
