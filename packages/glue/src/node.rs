//! # Glue Node Model
//!
//! Mirrored state of the native graph, stored as an arena keyed by
//! [`SessionId`]. Nodes never own each other: a child that has identity is
//! held as [`GlueRef::Node`], so cyclic and diamond-shaped native graphs
//! need no special ownership handling.

use crate::diff::CollectionEdit;
use crate::native::ElementType;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tether_common::{GlueError, GlueResult, SessionId};

/// Primitive payload of a value-typed scalar
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ScalarValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ScalarValue::Null => serde_json::Value::Null,
            ScalarValue::Bool(b) => serde_json::Value::Bool(*b),
            ScalarValue::Int(i) => serde_json::Value::from(*i),
            ScalarValue::Float(x) => serde_json::Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ScalarValue::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// Type tag of a glue value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlueType {
    Scalar,
    Object,
    Collection,
    Command,
    Date,
    FrameworkListItem,
}

/// A child slot: either an inline value or a reference into the arena
#[derive(Debug, Clone, PartialEq)]
pub enum GlueRef {
    Value(ScalarValue),
    Date(DateTime<Utc>),
    Node(SessionId),
}

impl GlueRef {
    pub const NULL: GlueRef = GlueRef::Value(ScalarValue::Null);

    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            GlueRef::Node(id) => Some(*id),
            _ => None,
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        GlueRef::Value(ScalarValue::String(s.into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlueKind {
    Object {
        type_name: String,
        properties: Vec<(String, GlueRef)>,
    },
    Collection {
        element_type: ElementType,
        items: Vec<GlueRef>,
        /// Native list revision `items` reflects
        revision: u64,
    },
    Command {
        can_execute: bool,
        returns_value: bool,
    },
    ListItem {
        item: GlueRef,
    },
}

/// One identity-bearing node in the arena
#[derive(Debug, Clone, PartialEq)]
pub struct GlueNode {
    pub id: SessionId,
    pub kind: GlueKind,
}

impl GlueNode {
    pub fn glue_type(&self) -> GlueType {
        match self.kind {
            GlueKind::Object { .. } => GlueType::Object,
            GlueKind::Collection { .. } => GlueType::Collection,
            GlueKind::Command { .. } => GlueType::Command,
            GlueKind::ListItem { .. } => GlueType::FrameworkListItem,
        }
    }

    /// Child references in order, for any node kind
    pub fn children(&self) -> Vec<&GlueRef> {
        match &self.kind {
            GlueKind::Object { properties, .. } => properties.iter().map(|(_, v)| v).collect(),
            GlueKind::Collection { items, .. } => items.iter().collect(),
            GlueKind::Command { .. } => Vec::new(),
            GlueKind::ListItem { item } => vec![item],
        }
    }
}

/// Arena of mirrored nodes
#[derive(Debug, Default, Clone)]
pub struct GlueGraph {
    nodes: HashMap<SessionId, GlueNode>,
    root: Option<GlueRef>,
}

impl GlueGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<&GlueRef> {
        self.root.as_ref()
    }

    pub fn set_root(&mut self, root: GlueRef) {
        self.root = Some(root);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<&GlueNode> {
        self.nodes.get(&id)
    }

    pub fn node(&self, id: SessionId) -> GlueResult<&GlueNode> {
        self.nodes.get(&id).ok_or(GlueError::MissingNode(id))
    }

    fn node_mut(&mut self, id: SessionId) -> GlueResult<&mut GlueNode> {
        self.nodes.get_mut(&id).ok_or(GlueError::MissingNode(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.nodes.keys().copied()
    }

    /// Type tag of any child slot
    pub fn type_of(&self, value: &GlueRef) -> GlueResult<GlueType> {
        match value {
            GlueRef::Value(_) => Ok(GlueType::Scalar),
            GlueRef::Date(_) => Ok(GlueType::Date),
            GlueRef::Node(id) => Ok(self.node(*id)?.glue_type()),
        }
    }

    /// Insert a node, or overwrite the content of an existing one.
    pub fn insert(&mut self, node: GlueNode) {
        self.nodes.insert(node.id, node);
    }

    pub fn remove(&mut self, id: SessionId) -> Option<GlueNode> {
        if self.root.as_ref().and_then(GlueRef::session_id) == Some(id) {
            self.root = None;
        }
        self.nodes.remove(&id)
    }

    /// Update or append one property in place; the node keeps its id.
    pub fn set_property(&mut self, id: SessionId, key: &str, value: GlueRef) -> GlueResult<()> {
        match &mut self.node_mut(id)?.kind {
            GlueKind::Object { properties, .. } => {
                match properties.iter_mut().find(|(k, _)| k == key) {
                    Some((_, slot)) => *slot = value,
                    None => properties.push((key.to_string(), value)),
                }
                Ok(())
            }
            GlueKind::ListItem { item } => {
                *item = value;
                Ok(())
            }
            _ => Err(GlueError::NotAnObject(id)),
        }
    }

    pub fn property(&self, id: SessionId, key: &str) -> GlueResult<Option<&GlueRef>> {
        match &self.node(id)?.kind {
            GlueKind::Object { properties, .. } => {
                Ok(properties.iter().find(|(k, _)| k == key).map(|(_, v)| v))
            }
            GlueKind::ListItem { item } => Ok(Some(item)),
            _ => Err(GlueError::NotAnObject(id)),
        }
    }

    pub fn items(&self, id: SessionId) -> GlueResult<&[GlueRef]> {
        match &self.node(id)?.kind {
            GlueKind::Collection { items, .. } => Ok(items),
            _ => Err(GlueError::NotACollection(id)),
        }
    }

    /// Replay edits against a collection node's items
    pub fn revision(&self, id: SessionId) -> GlueResult<u64> {
        match &self.node(id)?.kind {
            GlueKind::Collection { revision, .. } => Ok(*revision),
            _ => Err(GlueError::NotACollection(id)),
        }
    }

    pub fn set_revision(&mut self, id: SessionId, value: u64) -> GlueResult<()> {
        match &mut self.node_mut(id)?.kind {
            GlueKind::Collection { revision, .. } => {
                *revision = value;
                Ok(())
            }
            _ => Err(GlueError::NotACollection(id)),
        }
    }

    pub fn apply_edits(&mut self, id: SessionId, edits: &[CollectionEdit]) -> GlueResult<()> {
        match &mut self.node_mut(id)?.kind {
            GlueKind::Collection { items, .. } => crate::diff::apply_edits(items, edits),
            _ => Err(GlueError::NotACollection(id)),
        }
    }

    pub fn set_can_execute(&mut self, id: SessionId, value: bool) -> GlueResult<()> {
        match &mut self.node_mut(id)?.kind {
            GlueKind::Command { can_execute, .. } => {
                *can_execute = value;
                Ok(())
            }
            _ => Err(GlueError::NotACommand(id)),
        }
    }
}
