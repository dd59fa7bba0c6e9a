//! Error types for the synchronization coordinator

use tether_common::GlueError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Glue(#[from] GlueError),

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),

    #[error("Sync task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type SyncResult<T> = Result<T, SyncError>;
