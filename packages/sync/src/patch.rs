//! Outbound patches: one per synchronization unit.
//!
//! ```text
//! {"seq":S,"updates":[
//!     {"target":N,"property":k,"value":d},
//!     {"target":N,"edits":[...]},
//!     {"target":N,"canExecute":b},
//!     {"target":N,"invoked":[...]}
//! ]}
//! ```

use serde_json::{Map, Value};
use tether_common::{GlueResult, SessionId};
use tether_glue::{CollectionEdit, Envelope, GlueRef, Walk};

pub const SEQ_KEY: &str = "seq";
pub const UPDATES_KEY: &str = "updates";
pub const TARGET_KEY: &str = "target";
pub const PROPERTY_KEY: &str = "property";
pub const VALUE_KEY: &str = "value";
pub const EDITS_KEY: &str = "edits";
pub const CAN_EXECUTE_KEY: &str = "canExecute";
pub const INVOKED_KEY: &str = "invoked";

/// A serialized, sequenced batch of updates
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub seq: u64,
    pub updates: Vec<Value>,
}

impl Patch {
    pub fn payload(&self) -> Value {
        let mut out = Map::new();
        out.insert(SEQ_KEY.into(), self.seq.into());
        out.insert(UPDATES_KEY.into(), Value::Array(self.updates.clone()));
        Value::Object(out)
    }

    pub fn envelope(&self, operation: &str) -> Envelope {
        Envelope::new(operation, self.payload())
    }
}

/// Update still in graph form, described when its patch is sealed
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Update {
    Property {
        target: SessionId,
        key: String,
        value: GlueRef,
    },
    Edits {
        target: SessionId,
        edits: Vec<CollectionEdit>,
    },
    CanExecute {
        target: SessionId,
        can_execute: bool,
    },
    Invoked {
        target: SessionId,
        args: Vec<GlueRef>,
    },
}

impl Update {
    pub(crate) fn describe(&self, walk: &mut Walk<'_, '_>) -> GlueResult<Value> {
        let mut out = Map::new();
        match self {
            Update::Property { target, key, value } => {
                out.insert(TARGET_KEY.into(), target.get().into());
                out.insert(PROPERTY_KEY.into(), key.clone().into());
                out.insert(VALUE_KEY.into(), walk.describe(value)?);
            }
            Update::Edits { target, edits } => {
                out.insert(TARGET_KEY.into(), target.get().into());
                let edits = edits
                    .iter()
                    .map(|edit| walk.describe_edit(edit))
                    .collect::<GlueResult<Vec<_>>>()?;
                out.insert(EDITS_KEY.into(), Value::Array(edits));
            }
            Update::CanExecute {
                target,
                can_execute,
            } => {
                out.insert(TARGET_KEY.into(), target.get().into());
                out.insert(CAN_EXECUTE_KEY.into(), (*can_execute).into());
            }
            Update::Invoked { target, args } => {
                out.insert(TARGET_KEY.into(), target.get().into());
                let args = args
                    .iter()
                    .map(|arg| walk.describe(arg))
                    .collect::<GlueResult<Vec<_>>>()?;
                out.insert(INVOKED_KEY.into(), Value::Array(args));
            }
        }
        Ok(Value::Object(out))
    }
}

/// Updates gathered during one tick, in causal order
#[derive(Debug, Default)]
pub(crate) struct Updates(Vec<Update>);

impl Updates {
    pub(crate) fn push(&mut self, update: Update) {
        self.0.push(update);
    }

    /// Append collection edits, extending the previous update when it
    /// targets the same collection
    pub(crate) fn edits(&mut self, target: SessionId, mut edits: Vec<CollectionEdit>) {
        if edits.is_empty() {
            return;
        }
        if let Some(Update::Edits {
            target: last,
            edits: pending,
        }) = self.0.last_mut()
        {
            if *last == target {
                pending.append(&mut edits);
                return;
            }
        }
        self.0.push(Update::Edits { target, edits });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn into_inner(self) -> Vec<Update> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_shape() {
        let patch = Patch {
            seq: 4,
            updates: vec![json!({"target": 1, "canExecute": false})],
        };
        assert_eq!(
            patch.envelope("apply").render(),
            r#"apply({"seq":4,"updates":[{"target":1,"canExecute":false}]})"#
        );
    }

    #[test]
    fn test_consecutive_edits_merge() {
        let mut updates = Updates::default();
        updates.edits(SessionId(2), vec![CollectionEdit::Remove { index: 0 }]);
        updates.edits(SessionId(2), vec![CollectionEdit::Move { from: 1, to: 0 }]);
        updates.edits(SessionId(3), vec![CollectionEdit::Remove { index: 0 }]);
        updates.edits(SessionId(3), Vec::new());

        let updates = updates.into_inner();
        assert_eq!(updates.len(), 2);
        assert_eq!(
            updates[0],
            Update::Edits {
                target: SessionId(2),
                edits: vec![
                    CollectionEdit::Remove { index: 0 },
                    CollectionEdit::Move { from: 1, to: 0 },
                ],
            }
        );
    }
}
