//! # Tether Sync
//!
//! Synchronization Coordinator for a native graph and its mirror.
//!
//! - [`SyncEngine`]: synchronous state machine; native events in, patches
//!   out; mirror requests in, native writes out
//! - [`runtime`]: tokio task around the engine with per-direction queues
//! - [`MirrorGraph`]: reference mirror used to check convergence
//!
//! ## Example
//!
//! ```ignore
//! let queue = EventQueue::new();
//! let mut engine = SyncEngine::new(SyncConfig::default(), queue.clone());
//! let envelope = engine.bind(&root)?;
//!
//! list.push("c".into())?;
//! if let Some(patch) = engine.process_native(queue.drain())? {
//!     send(patch.envelope("apply").render());
//! }
//! ```

pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod mirror;
pub mod observer;
pub mod patch;
mod rebase;
pub mod runtime;
pub mod token;

pub use config::SyncConfig;
pub use engine::{MirrorOutcome, MirrorReply, MirrorRequest, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use mirror::{matches, same_sequence, MirrorGraph, MirrorNode};
pub use observer::{ChannelObserver, EventQueue};
pub use patch::Patch;
pub use runtime::{spawn, SyncHandle, SyncSession};
pub use token::{PropagationState, TokenTable};
