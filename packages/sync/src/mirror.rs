//! Reference mirror.
//!
//! [`MirrorGraph`] rebuilds the mirrored graph from bind descriptions and
//! patches, and applies local array and property operations optimistically,
//! returning the [`MirrorRequest`] to send back. It is what a mirror-side
//! runtime does, minus the rendering.

use crate::engine::MirrorRequest;
use crate::patch::{
    CAN_EXECUTE_KEY, EDITS_KEY, INVOKED_KEY, PROPERTY_KEY, SEQ_KEY, TARGET_KEY, UPDATES_KEY,
    VALUE_KEY,
};
use chrono::DateTime;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tether_common::{GlueError, GlueResult, SessionId};
use tether_glue::serializer::{
    unescape_key, COMMAND_KEY, DATE_KEY, ID_KEY, ITEMS_KEY, ITEM_KEY, REF_KEY, VERSION_KEY,
};
use tether_glue::{plan_array_op, Envelope, GlueRef, ListOp, MirrorArrayOp, MirrorValue, ScalarValue};

#[derive(Debug, Clone, PartialEq)]
pub enum MirrorNode {
    Object {
        version: Option<u64>,
        properties: Vec<(String, MirrorValue)>,
    },
    Array {
        items: Vec<MirrorValue>,
    },
    Command {
        can_execute: bool,
        returns_value: bool,
    },
    Item {
        value: MirrorValue,
    },
}

fn malformed(reason: impl Into<String>) -> GlueError {
    GlueError::MalformedDescription(reason.into())
}

#[derive(Debug, Default)]
pub struct MirrorGraph {
    nodes: HashMap<SessionId, MirrorNode>,
    root: Option<MirrorValue>,
    last_seq: u64,
    invocations: Vec<(SessionId, Vec<MirrorValue>)>,
}

impl MirrorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<&MirrorValue> {
        self.root.as_ref()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: SessionId) -> Option<&MirrorNode> {
        self.nodes.get(&id)
    }

    /// Seq of the last patch applied
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Native-side command invocations received so far
    pub fn invocations(&self) -> &[(SessionId, Vec<MirrorValue>)] {
        &self.invocations
    }

    pub fn items(&self, id: SessionId) -> GlueResult<&[MirrorValue]> {
        match self.nodes.get(&id) {
            Some(MirrorNode::Array { items }) => Ok(items),
            Some(_) => Err(GlueError::NotACollection(id)),
            None => Err(GlueError::MissingNode(id)),
        }
    }

    pub fn property(&self, id: SessionId, key: &str) -> GlueResult<Option<&MirrorValue>> {
        match self.nodes.get(&id) {
            Some(MirrorNode::Object { properties, .. }) => {
                Ok(properties.iter().find(|(k, _)| k == key).map(|(_, v)| v))
            }
            Some(MirrorNode::Item { value }) => Ok(Some(value)),
            Some(_) => Err(GlueError::NotAnObject(id)),
            None => Err(GlueError::MissingNode(id)),
        }
    }

    /// Take an outbound envelope: a bind description or a patch
    pub fn receive(&mut self, envelope: &Envelope) -> GlueResult<()> {
        let is_patch = envelope
            .payload
            .as_object()
            .map_or(false, |fields| fields.contains_key(UPDATES_KEY) && !fields.contains_key(ID_KEY));
        if is_patch {
            self.apply_patch(&envelope.payload)
        } else {
            self.load(&envelope.payload)
        }
    }

    /// Replace the graph with a whole-graph description
    pub fn load(&mut self, description: &Value) -> GlueResult<()> {
        self.nodes.clear();
        self.invocations.clear();
        self.last_seq = 0;
        let root = self.read(description)?;
        self.root = Some(root);
        Ok(())
    }

    pub fn apply_patch(&mut self, payload: &Value) -> GlueResult<()> {
        let seq = payload
            .get(SEQ_KEY)
            .and_then(Value::as_u64)
            .ok_or_else(|| malformed("patch without seq"))?;
        let updates = payload
            .get(UPDATES_KEY)
            .and_then(Value::as_array)
            .ok_or_else(|| malformed("patch without updates"))?;
        for update in updates {
            self.apply_update(update)?;
        }
        self.last_seq = seq;
        Ok(())
    }

    /// Request acknowledging every patch applied so far
    pub fn acknowledge(&self) -> MirrorRequest {
        MirrorRequest::Acknowledge { seq: self.last_seq }
    }

    /// Write a property locally and return the request for native
    pub fn set_property(
        &mut self,
        target: SessionId,
        key: &str,
        value: MirrorValue,
    ) -> GlueResult<MirrorRequest> {
        self.write_property(target, key, value.clone())?;
        Ok(MirrorRequest::SetProperty {
            target,
            key: key.to_string(),
            value,
        })
    }

    /// Run an array operation locally and return the request for native
    pub fn array(&mut self, target: SessionId, op: MirrorArrayOp) -> GlueResult<MirrorRequest> {
        let items = self.items_mut(target)?;
        for step in plan_array_op(&op, items.len()) {
            match step {
                ListOp::Insert { index, value } => items.insert(index, value),
                ListOp::RemoveAt { index } => {
                    items.remove(index);
                }
                ListOp::Move { from, to } => {
                    let item = items.remove(from);
                    items.insert(to, item);
                }
            }
        }
        Ok(MirrorRequest::Array { target, op })
    }

    /// Decode one description value, registering every expanded node
    pub fn read(&mut self, value: &Value) -> GlueResult<MirrorValue> {
        let fields = match value {
            Value::Object(fields) => fields,
            Value::Array(items) => {
                return Ok(MirrorValue::Array(
                    items
                        .iter()
                        .map(|item| self.read(item))
                        .collect::<GlueResult<Vec<_>>>()?,
                ))
            }
            other => return Ok(MirrorValue::from_json(other)),
        };

        if let Some(reference) = fields.get(REF_KEY) {
            let id = reference
                .as_u64()
                .ok_or_else(|| malformed("reference without integer id"))?;
            return Ok(MirrorValue::Ref(SessionId(id)));
        }
        if let Some(date) = fields.get(DATE_KEY) {
            let date = date
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .ok_or_else(|| malformed("unreadable date"))?;
            return Ok(MirrorValue::Date(date.into()));
        }
        let Some(id) = fields.get(ID_KEY) else {
            let literal = fields
                .iter()
                .map(|(key, field)| Ok((key.clone(), self.read(field)?)))
                .collect::<GlueResult<Vec<_>>>()?;
            return Ok(MirrorValue::Object(literal));
        };
        let id = SessionId(
            id.as_u64()
                .ok_or_else(|| malformed("node without integer id"))?,
        );

        let node = self.read_node(fields)?;
        self.nodes.insert(id, node);
        Ok(MirrorValue::Ref(id))
    }

    fn read_node(&mut self, fields: &Map<String, Value>) -> GlueResult<MirrorNode> {
        if let Some(items) = fields.get(ITEMS_KEY) {
            let items = items
                .as_array()
                .ok_or_else(|| malformed("collection items are not a sequence"))?
                .iter()
                .map(|item| self.read(item))
                .collect::<GlueResult<Vec<_>>>()?;
            return Ok(MirrorNode::Array { items });
        }
        if let Some(command) = fields.get(COMMAND_KEY) {
            let flag = |key: &str| command.get(key).and_then(Value::as_bool).unwrap_or(false);
            return Ok(MirrorNode::Command {
                can_execute: flag("canExecute"),
                returns_value: flag("returnsValue"),
            });
        }
        if let Some(item) = fields.get(ITEM_KEY) {
            return Ok(MirrorNode::Item {
                value: self.read(item)?,
            });
        }

        let version = fields.get(VERSION_KEY).and_then(Value::as_u64);
        let mut properties = Vec::new();
        for (key, field) in fields {
            if key == VERSION_KEY || key == ID_KEY {
                continue;
            }
            properties.push((unescape_key(key).to_string(), self.read(field)?));
        }
        Ok(MirrorNode::Object {
            version,
            properties,
        })
    }

    fn apply_update(&mut self, update: &Value) -> GlueResult<()> {
        let target = SessionId(
            update
                .get(TARGET_KEY)
                .and_then(Value::as_u64)
                .ok_or_else(|| malformed("update without target"))?,
        );

        if let Some(key) = update.get(PROPERTY_KEY).and_then(Value::as_str) {
            let value = self.read(update.get(VALUE_KEY).unwrap_or(&Value::Null))?;
            return self.write_property(target, key, value);
        }
        if let Some(edits) = update.get(EDITS_KEY).and_then(Value::as_array) {
            for edit in edits {
                self.apply_edit(target, edit)?;
            }
            return Ok(());
        }
        if let Some(can_execute) = update.get(CAN_EXECUTE_KEY).and_then(Value::as_bool) {
            return match self.nodes.get_mut(&target) {
                Some(MirrorNode::Command {
                    can_execute: slot, ..
                }) => {
                    *slot = can_execute;
                    Ok(())
                }
                Some(_) => Err(GlueError::NotACommand(target)),
                None => Err(GlueError::MissingNode(target)),
            };
        }
        if let Some(args) = update.get(INVOKED_KEY).and_then(Value::as_array) {
            let args = args
                .iter()
                .map(|arg| self.read(arg))
                .collect::<GlueResult<Vec<_>>>()?;
            self.invocations.push((target, args));
            return Ok(());
        }
        Err(malformed(format!("unrecognized update for {}", target)))
    }

    fn apply_edit(&mut self, target: SessionId, edit: &Value) -> GlueResult<()> {
        let op = edit
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("edit without op"))?;
        let index_of = |key: &str| {
            edit.get(key)
                .and_then(Value::as_u64)
                .map(|index| index as usize)
                .ok_or_else(|| malformed(format!("{} edit without {}", op, key)))
        };

        match op {
            "add" => {
                let index = index_of("index")?;
                let value = self.read(edit.get("value").unwrap_or(&Value::Null))?;
                let items = self.items_mut(target)?;
                if index > items.len() {
                    return Err(GlueError::EditOutOfRange {
                        index,
                        len: items.len(),
                    });
                }
                items.insert(index, value);
            }
            "remove" => {
                let index = index_of("index")?;
                let items = self.items_mut(target)?;
                if index >= items.len() {
                    return Err(GlueError::EditOutOfRange {
                        index,
                        len: items.len(),
                    });
                }
                items.remove(index);
            }
            "replace" => {
                let index = index_of("index")?;
                let value = self.read(edit.get("value").unwrap_or(&Value::Null))?;
                let items = self.items_mut(target)?;
                let len = items.len();
                let slot = items
                    .get_mut(index)
                    .ok_or(GlueError::EditOutOfRange { index, len })?;
                *slot = value;
            }
            "move" => {
                let from = index_of("from")?;
                let to = index_of("to")?;
                let items = self.items_mut(target)?;
                if from >= items.len() || to >= items.len() {
                    return Err(GlueError::EditOutOfRange {
                        index: from.max(to),
                        len: items.len(),
                    });
                }
                let item = items.remove(from);
                items.insert(to, item);
            }
            "reset" => {
                let values = edit
                    .get("items")
                    .and_then(Value::as_array)
                    .ok_or_else(|| malformed("reset edit without items"))?
                    .iter()
                    .map(|item| self.read(item))
                    .collect::<GlueResult<Vec<_>>>()?;
                *self.items_mut(target)? = values;
            }
            other => return Err(malformed(format!("unknown edit op `{}`", other))),
        }
        Ok(())
    }

    fn items_mut(&mut self, id: SessionId) -> GlueResult<&mut Vec<MirrorValue>> {
        match self.nodes.get_mut(&id) {
            Some(MirrorNode::Array { items }) => Ok(items),
            Some(_) => Err(GlueError::NotACollection(id)),
            None => Err(GlueError::MissingNode(id)),
        }
    }

    fn write_property(&mut self, target: SessionId, key: &str, value: MirrorValue) -> GlueResult<()> {
        match self.nodes.get_mut(&target) {
            Some(MirrorNode::Object { properties, .. }) => {
                match properties.iter_mut().find(|(k, _)| k == key) {
                    Some((_, slot)) => *slot = value,
                    None => properties.push((key.to_string(), value)),
                }
                Ok(())
            }
            Some(MirrorNode::Item { value: slot }) => {
                *slot = value;
                Ok(())
            }
            Some(_) => Err(GlueError::NotAnObject(target)),
            None => Err(GlueError::MissingNode(target)),
        }
    }
}

/// Element-wise equality between a glue value and its mirrored counterpart:
/// nodes by session id, scalars by value
pub fn matches(glue: &GlueRef, mirror: &MirrorValue) -> bool {
    match (glue, mirror) {
        (GlueRef::Node(a), MirrorValue::Ref(b)) => a == b,
        (GlueRef::Date(a), MirrorValue::Date(b)) => a == b,
        (GlueRef::Value(scalar), mirror) => match (scalar, mirror) {
            (ScalarValue::Null, MirrorValue::Null) => true,
            (ScalarValue::Bool(a), MirrorValue::Bool(b)) => a == b,
            (ScalarValue::Int(a), MirrorValue::Number(b)) => *a as f64 == *b,
            (ScalarValue::Float(a), MirrorValue::Number(b)) => a == b,
            (ScalarValue::String(a), MirrorValue::String(b)) => a == b,
            _ => false,
        },
        _ => false,
    }
}

pub fn same_sequence(glue: &[GlueRef], mirror: &[MirrorValue]) -> bool {
    glue.len() == mirror.len() && glue.iter().zip(mirror).all(|(g, m)| matches(g, m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_cyclic_description() {
        let mut mirror = MirrorGraph::new();
        mirror
            .load(&json!({
                "version": 3,
                "__id__": 1,
                "Name": "Ann",
                "Skills": {"__id__": 2, "__items__": [
                    {"version": 3, "__id__": 3, "Name": "Rust", "Owner": {"__ref__": 1}}
                ]},
                "Save": {"__id__": 4, "__command__": {"canExecute": true, "returnsValue": false}}
            }))
            .unwrap();

        assert_eq!(mirror.root(), Some(&MirrorValue::Ref(SessionId(1))));
        assert_eq!(mirror.len(), 4);
        assert_eq!(mirror.items(SessionId(2)).unwrap(), &[MirrorValue::Ref(SessionId(3))]);
        assert_eq!(
            mirror.property(SessionId(3), "Owner").unwrap(),
            Some(&MirrorValue::Ref(SessionId(1)))
        );
        assert!(matches!(
            mirror.node(SessionId(1)),
            Some(MirrorNode::Object { version: Some(3), .. })
        ));
    }

    #[test]
    fn test_escaped_property_names_load_unescaped() {
        let mut mirror = MirrorGraph::new();
        mirror
            .load(&json!({
                "version": 3,
                "__id__": 1,
                "$version": "draft",
                "$__id__": 99,
                "$$price": 5
            }))
            .unwrap();

        assert_eq!(mirror.root(), Some(&MirrorValue::Ref(SessionId(1))));
        assert!(matches!(
            mirror.node(SessionId(1)),
            Some(MirrorNode::Object { version: Some(3), .. })
        ));
        assert_eq!(
            mirror.property(SessionId(1), "version").unwrap(),
            Some(&MirrorValue::string("draft"))
        );
        assert_eq!(
            mirror.property(SessionId(1), "__id__").unwrap(),
            Some(&MirrorValue::Number(99.0))
        );
        assert_eq!(
            mirror.property(SessionId(1), "$price").unwrap(),
            Some(&MirrorValue::Number(5.0))
        );
    }

    #[test]
    fn test_apply_patch_edits_and_properties() {
        let mut mirror = MirrorGraph::new();
        mirror
            .load(&json!({"__id__": 1, "Tags": {"__id__": 2, "__items__": ["a", "b", "c"]}}))
            .unwrap();

        mirror
            .apply_patch(&json!({"seq": 7, "updates": [
                {"target": 2, "edits": [
                    {"op": "remove", "index": 1},
                    {"op": "add", "index": 0, "value": "x"},
                    {"op": "move", "from": 2, "to": 1}
                ]},
                {"target": 1, "property": "Title", "value": "t"}
            ]}))
            .unwrap();

        assert_eq!(
            mirror.items(SessionId(2)).unwrap(),
            &[MirrorValue::string("x"), MirrorValue::string("c"), MirrorValue::string("a")]
        );
        assert_eq!(
            mirror.property(SessionId(1), "Title").unwrap(),
            Some(&MirrorValue::string("t"))
        );
        assert_eq!(mirror.acknowledge(), MirrorRequest::Acknowledge { seq: 7 });
    }

    #[test]
    fn test_local_array_op_returns_request() {
        let mut mirror = MirrorGraph::new();
        mirror
            .load(&json!({"__id__": 1, "__items__": ["a", "b", "c"]}))
            .unwrap();

        let request = mirror.array(SessionId(1), MirrorArrayOp::Reverse).unwrap();
        assert_eq!(
            request,
            MirrorRequest::Array {
                target: SessionId(1),
                op: MirrorArrayOp::Reverse
            }
        );
        assert_eq!(
            mirror.items(SessionId(1)).unwrap(),
            &[MirrorValue::string("c"), MirrorValue::string("b"), MirrorValue::string("a")]
        );
    }

    #[test]
    fn test_malformed_patch() {
        let mut mirror = MirrorGraph::new();
        let err = mirror.apply_patch(&json!({"updates": []})).unwrap_err();
        assert_eq!(err, GlueError::MalformedDescription("patch without seq".into()));
    }

    #[test]
    fn test_matches_compares_numbers_and_ids() {
        assert!(matches(&GlueRef::Value(ScalarValue::Int(2)), &MirrorValue::Number(2.0)));
        assert!(matches(&GlueRef::Node(SessionId(4)), &MirrorValue::Ref(SessionId(4))));
        assert!(!matches(&GlueRef::Node(SessionId(4)), &MirrorValue::Ref(SessionId(5))));
    }
}
