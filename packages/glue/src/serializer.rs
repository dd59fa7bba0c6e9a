//! # Circular-Safe Serializer
//!
//! Turns a glue graph into a description the mirror can rebuild.
//!
//! Each session id is expanded at most once over the whole history of
//! descriptions sent for a synchronization session. Later occurrences, whether
//! a cycle inside the current walk or a node delivered by an earlier patch,
//! become a `{"__ref__": id}` token.
//!
//! ```text
//! object      {"version":3,"__id__":1,"Name":"Ann","Friend":{"__ref__":1}}
//! collection  {"__id__":2,"__items__":[...]}
//! command     {"__id__":3,"__command__":{"canExecute":true,"returnsValue":false}}
//! list item   {"__id__":4,"__item__":"value"}
//! date        {"__date__":"2024-01-01T00:00:00+00:00"}
//! ```
//!
//! Property names that collide with a reserved key, or start with `$`, are
//! written with one extra leading `$` (see [`escape_key`]).
//!
//! Termination: every recursive step either consumes an unvisited id, marking
//! it, or emits a constant-size reference and stops.

use crate::diff::CollectionEdit;
use crate::node::{GlueGraph, GlueKind, GlueRef};
use serde::Serialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use tether_common::{GlueError, GlueResult, SessionId};

pub const CURRENT_FORMAT_VERSION: u32 = 3;
pub const DEFAULT_MAX_DEPTH: usize = 1024;

pub const VERSION_KEY: &str = "version";
pub const ID_KEY: &str = "__id__";
pub const REF_KEY: &str = "__ref__";
pub const ITEMS_KEY: &str = "__items__";
pub const COMMAND_KEY: &str = "__command__";
pub const ITEM_KEY: &str = "__item__";
pub const DATE_KEY: &str = "__date__";

pub const ESCAPE_PREFIX: char = '$';

const RESERVED_KEYS: [&str; 7] = [
    VERSION_KEY,
    ID_KEY,
    REF_KEY,
    ITEMS_KEY,
    COMMAND_KEY,
    ITEM_KEY,
    DATE_KEY,
];

/// Property name as written in a description
pub fn escape_key(key: &str) -> Cow<'_, str> {
    if key.starts_with(ESCAPE_PREFIX) || RESERVED_KEYS.contains(&key) {
        Cow::Owned(format!("{}{}", ESCAPE_PREFIX, key))
    } else {
        Cow::Borrowed(key)
    }
}

/// Property name read back from a description; inverse of [`escape_key`]
pub fn unescape_key(key: &str) -> &str {
    key.strip_prefix(ESCAPE_PREFIX).unwrap_or(key)
}

/// Session ids already expanded in delivered output
#[derive(Debug, Clone, Default)]
pub struct VisitedSet {
    ids: HashSet<SessionId>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.ids.contains(&id)
    }

    /// Record ids whose expansion has been delivered
    pub fn commit(&mut self, ids: impl IntoIterator<Item = SessionId>) {
        self.ids.extend(ids);
    }

    pub fn forget(&mut self, id: SessionId) -> bool {
        self.ids.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

/// Output of one serialization call
#[derive(Debug, Clone, PartialEq)]
pub struct Serialized {
    pub description: Value,
    /// Ids expanded by this call, in walk order
    pub expanded: Vec<SessionId>,
}

/// Named invocation wrapping one synchronization unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub operation: String,
    pub payload: Value,
}

impl Envelope {
    pub const DEFAULT_OPERATION: &'static str = "apply";

    pub fn new(operation: impl Into<String>, payload: Value) -> Self {
        Self {
            operation: operation.into(),
            payload,
        }
    }

    pub fn apply(payload: Value) -> Self {
        Self::new(Self::DEFAULT_OPERATION, payload)
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation, self.payload)
    }
}

pub struct CircularSerializer<'g> {
    graph: &'g GlueGraph,
    version: Option<u32>,
    max_depth: usize,
}

impl<'g> CircularSerializer<'g> {
    pub fn new(graph: &'g GlueGraph) -> Self {
        Self {
            graph,
            version: Some(CURRENT_FORMAT_VERSION),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Version tag for object nodes; `None` disables tagging
    pub fn with_version(mut self, version: Option<u32>) -> Self {
        self.version = version;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn serialize(&self, root: &GlueRef, visited: &VisitedSet) -> GlueResult<Serialized> {
        let mut walk = self.walk(visited);
        let description = walk.describe(root)?;
        Ok(Serialized {
            description,
            expanded: walk.finish(),
        })
    }

    /// Serialize and wrap in an envelope, as one string
    pub fn render(
        &self,
        operation: &str,
        root: &GlueRef,
        visited: &VisitedSet,
    ) -> GlueResult<(String, Vec<SessionId>)> {
        let serialized = self.serialize(root, visited)?;
        let envelope = Envelope::new(operation, serialized.description);
        Ok((envelope.render(), serialized.expanded))
    }

    /// Start a walk that can describe several values with one shared
    /// visited set, e.g. all updates of one patch
    pub fn walk<'v>(&self, visited: &'v VisitedSet) -> Walk<'g, 'v> {
        Walk {
            graph: self.graph,
            version: self.version,
            max_depth: self.max_depth,
            visited,
            seen: HashSet::new(),
            expanded: Vec::new(),
        }
    }
}

pub struct Walk<'g, 'v> {
    graph: &'g GlueGraph,
    version: Option<u32>,
    max_depth: usize,
    visited: &'v VisitedSet,
    seen: HashSet<SessionId>,
    expanded: Vec<SessionId>,
}

impl<'g, 'v> Walk<'g, 'v> {
    pub fn describe(&mut self, value: &GlueRef) -> GlueResult<Value> {
        self.describe_at(value, 0)
    }

    pub fn describe_edit(&mut self, edit: &CollectionEdit) -> GlueResult<Value> {
        let mut out = Map::new();
        match edit {
            CollectionEdit::Add { index, value } => {
                out.insert("op".into(), "add".into());
                out.insert("index".into(), (*index).into());
                out.insert("value".into(), self.describe(value)?);
            }
            CollectionEdit::Remove { index } => {
                out.insert("op".into(), "remove".into());
                out.insert("index".into(), (*index).into());
            }
            CollectionEdit::Replace { index, value } => {
                out.insert("op".into(), "replace".into());
                out.insert("index".into(), (*index).into());
                out.insert("value".into(), self.describe(value)?);
            }
            CollectionEdit::Move { from, to } => {
                out.insert("op".into(), "move".into());
                out.insert("from".into(), (*from).into());
                out.insert("to".into(), (*to).into());
            }
            CollectionEdit::Reset { items } => {
                out.insert("op".into(), "reset".into());
                let items = items
                    .iter()
                    .map(|item| self.describe(item))
                    .collect::<GlueResult<Vec<_>>>()?;
                out.insert("items".into(), Value::Array(items));
            }
        }
        Ok(Value::Object(out))
    }

    /// Ids expanded so far, in walk order
    pub fn finish(self) -> Vec<SessionId> {
        self.expanded
    }

    fn describe_at(&mut self, value: &GlueRef, depth: usize) -> GlueResult<Value> {
        if depth > self.max_depth {
            return Err(GlueError::SerializationCycle { depth });
        }

        let id = match value {
            GlueRef::Value(scalar) => return Ok(scalar.to_json()),
            GlueRef::Date(date) => {
                let mut out = Map::new();
                out.insert(DATE_KEY.into(), Value::String(date.to_rfc3339()));
                return Ok(Value::Object(out));
            }
            GlueRef::Node(id) => *id,
        };

        if self.visited.contains(id) || self.seen.contains(&id) {
            return Ok(reference(id));
        }
        let node = self.graph.node(id)?;
        self.seen.insert(id);
        self.expanded.push(id);

        let mut out = Map::new();
        match &node.kind {
            GlueKind::Object { properties, .. } => {
                if let Some(version) = self.version {
                    out.insert(VERSION_KEY.into(), version.into());
                }
                out.insert(ID_KEY.into(), id.get().into());
                for (key, child) in properties {
                    let described = self.describe_at(child, depth + 1)?;
                    out.insert(escape_key(key).into_owned(), described);
                }
            }
            GlueKind::Collection { items, .. } => {
                out.insert(ID_KEY.into(), id.get().into());
                let items = items
                    .iter()
                    .map(|item| self.describe_at(item, depth + 1))
                    .collect::<GlueResult<Vec<_>>>()?;
                out.insert(ITEMS_KEY.into(), Value::Array(items));
            }
            GlueKind::Command {
                can_execute,
                returns_value,
            } => {
                out.insert(ID_KEY.into(), id.get().into());
                let mut command = Map::new();
                command.insert("canExecute".into(), (*can_execute).into());
                command.insert("returnsValue".into(), (*returns_value).into());
                out.insert(COMMAND_KEY.into(), Value::Object(command));
            }
            GlueKind::ListItem { item } => {
                out.insert(ID_KEY.into(), id.get().into());
                let described = self.describe_at(item, depth + 1)?;
                out.insert(ITEM_KEY.into(), described);
            }
        }
        Ok(Value::Object(out))
    }
}

/// Reference token for an already expanded node
pub fn reference(id: SessionId) -> Value {
    let mut out = Map::new();
    out.insert(REF_KEY.into(), id.get().into());
    Value::Object(out)
}

/// Session id carried by a reference token, if `value` is one
pub fn as_reference(value: &Value) -> Option<SessionId> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    object.get(REF_KEY)?.as_u64().map(SessionId)
}
