//! # Tether Glue
//!
//! The glue graph mirrors a native object graph for a script-hosted mirror.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ native: observable objects, lists, commands │
//! └─────────────────────────────────────────────┘
//!                     ↓ wrap (registry assigns ids)
//! ┌─────────────────────────────────────────────┐
//! │ node: arena of glue nodes keyed by session  │
//! └─────────────────────────────────────────────┘
//!                     ↓ serialize (visited-aware)
//! ┌─────────────────────────────────────────────┐
//! │ serializer: apply(<description>)            │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Session ids are the only cross-reference**: no node owns another
//! 2. **Expand once**: every id is expanded at most once per session
//! 3. **Degrade, don't fail**: an unmappable leaf becomes `null`
//! 4. **Identity, not structure**: collection diffs compare session ids
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tether_glue::{CircularSerializer, GlueBuilder, GlueGraph, SessionRegistry, VisitedSet};
//!
//! let mut graph = GlueGraph::new();
//! let mut registry = SessionRegistry::new();
//! let root = GlueBuilder::new(&mut graph, &mut registry).wrap(&value)?;
//!
//! let mut visited = VisitedSet::new();
//! let (command, expanded) = CircularSerializer::new(&graph).render("apply", &root, &visited)?;
//! visited.commit(expanded);
//! ```

pub mod builder;
pub mod diff;
pub mod native;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod serializer;
pub mod visitor;

pub use builder::GlueBuilder;
pub use diff::{apply_edits, diff_sequences, translate_changes, CollectionEdit};
pub use native::{
    ChangeObserver, ElementType, NativeCell, NativeCollectionChange, NativeCommand, NativeEvent,
    ListEdit, NativeHandle, NativeList, NativeObject, NativeValue, SharedObserver,
};
pub use node::{GlueGraph, GlueKind, GlueNode, GlueRef, GlueType, ScalarValue};
pub use protocol::{plan_array_op, ListOp, MirrorArrayOp, MirrorValue};
pub use registry::{Assignment, SessionRegistry, SharedRegistry};
pub use serializer::{
    CircularSerializer, Envelope, Serialized, VisitedSet, Walk, CURRENT_FORMAT_VERSION,
};
pub use visitor::{reachable, GraphStats, Traversal, Visitor};

// Re-export common types for convenience
pub use tether_common::{GlueError, GlueResult, NativeId, SessionId};
