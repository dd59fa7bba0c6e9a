//! Mirror-side wire values and array operations.
//!
//! Array operations arrive with JavaScript semantics (`push`, `splice`, ...)
//! and are planned into index-based native list operations against the
//! native length at the time they are applied.

use crate::serializer::{as_reference, DATE_KEY};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tether_common::SessionId;

/// A raw value as produced by the mirror
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    /// Reference to an already mirrored node
    Ref(SessionId),
    /// Object literal constructed mirror-side
    Object(Vec<(String, MirrorValue)>),
    Array(Vec<MirrorValue>),
}

impl MirrorValue {
    pub fn string(s: impl Into<String>) -> Self {
        MirrorValue::String(s.into())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            MirrorValue::Null => "null",
            MirrorValue::Bool(_) => "boolean",
            MirrorValue::Number(_) => "number",
            MirrorValue::String(_) => "string",
            MirrorValue::Date(_) => "date",
            MirrorValue::Ref(_) => "reference",
            MirrorValue::Object(_) => "object",
            MirrorValue::Array(_) => "array",
        }
    }

    /// Read a value in description form (reference tokens and date markers
    /// are recognized)
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => MirrorValue::Null,
            Value::Bool(b) => MirrorValue::Bool(*b),
            Value::Number(n) => MirrorValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => MirrorValue::String(s.clone()),
            Value::Array(items) => MirrorValue::Array(items.iter().map(Self::from_json).collect()),
            Value::Object(fields) => {
                if let Some(id) = as_reference(value) {
                    return MirrorValue::Ref(id);
                }
                if let Some(date) = fields
                    .get(DATE_KEY)
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                {
                    return MirrorValue::Date(date.with_timezone(&Utc));
                }
                MirrorValue::Object(
                    fields
                        .iter()
                        .map(|(k, v)| (k.clone(), Self::from_json(v)))
                        .collect(),
                )
            }
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            MirrorValue::Null => Value::Null,
            MirrorValue::Bool(b) => Value::Bool(*b),
            MirrorValue::Number(x) => serde_json::Number::from_f64(*x)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            MirrorValue::String(s) => Value::String(s.clone()),
            MirrorValue::Date(d) => {
                let mut out = Map::new();
                out.insert(DATE_KEY.into(), Value::String(d.to_rfc3339()));
                Value::Object(out)
            }
            MirrorValue::Ref(id) => crate::serializer::reference(*id),
            MirrorValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            MirrorValue::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

/// Array mutation issued by the mirror
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorArrayOp {
    Push(Vec<MirrorValue>),
    Pop,
    Shift,
    Unshift(Vec<MirrorValue>),
    /// `start` may be negative, counting from the end
    Splice {
        start: i64,
        delete_count: usize,
        items: Vec<MirrorValue>,
    },
    Reverse,
}

impl MirrorArrayOp {
    pub fn name(&self) -> &'static str {
        match self {
            MirrorArrayOp::Push(_) => "push",
            MirrorArrayOp::Pop => "pop",
            MirrorArrayOp::Shift => "shift",
            MirrorArrayOp::Unshift(_) => "unshift",
            MirrorArrayOp::Splice { .. } => "splice",
            MirrorArrayOp::Reverse => "reverse",
        }
    }
}

/// Index-based native list operation
#[derive(Debug, Clone, PartialEq)]
pub enum ListOp {
    Insert { index: usize, value: MirrorValue },
    RemoveAt { index: usize },
    Move { from: usize, to: usize },
}

/// Plan `op` against a native list of length `len`.
///
/// Operations on an empty list that remove (`pop`, `shift`) plan to nothing.
pub fn plan_array_op(op: &MirrorArrayOp, len: usize) -> Vec<ListOp> {
    match op {
        MirrorArrayOp::Push(values) => values
            .iter()
            .enumerate()
            .map(|(offset, value)| ListOp::Insert {
                index: len + offset,
                value: value.clone(),
            })
            .collect(),
        MirrorArrayOp::Pop => match len {
            0 => Vec::new(),
            _ => vec![ListOp::RemoveAt { index: len - 1 }],
        },
        MirrorArrayOp::Shift => match len {
            0 => Vec::new(),
            _ => vec![ListOp::RemoveAt { index: 0 }],
        },
        MirrorArrayOp::Unshift(values) => values
            .iter()
            .enumerate()
            .map(|(index, value)| ListOp::Insert {
                index,
                value: value.clone(),
            })
            .collect(),
        MirrorArrayOp::Splice {
            start,
            delete_count,
            items,
        } => {
            let start = if *start < 0 {
                len.saturating_sub(start.unsigned_abs() as usize)
            } else {
                (*start as usize).min(len)
            };
            let delete_count = (*delete_count).min(len - start);
            let removals = (0..delete_count).map(|_| ListOp::RemoveAt { index: start });
            let inserts = items.iter().enumerate().map(|(offset, value)| ListOp::Insert {
                index: start + offset,
                value: value.clone(),
            });
            removals.chain(inserts).collect()
        }
        MirrorArrayOp::Reverse => (0..len.saturating_sub(1))
            .map(|i| ListOp::Move { from: len - 1, to: i })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn replay(mut items: Vec<&'static str>, ops: Vec<ListOp>) -> Vec<String> {
        let mut items: Vec<String> = items.drain(..).map(String::from).collect();
        for op in ops {
            match op {
                ListOp::Insert { index, value } => match value {
                    MirrorValue::String(s) => items.insert(index, s),
                    other => panic!("unexpected {:?}", other),
                },
                ListOp::RemoveAt { index } => {
                    items.remove(index);
                }
                ListOp::Move { from, to } => {
                    let item = items.remove(from);
                    items.insert(to, item);
                }
            }
        }
        items
    }

    #[test]
    fn test_push_pop_shift_unshift() {
        let pushed = plan_array_op(&MirrorArrayOp::Push(vec![MirrorValue::string("d")]), 3);
        assert_eq!(replay(vec!["a", "b", "c"], pushed), vec!["a", "b", "c", "d"]);

        assert_eq!(replay(vec!["a", "b"], plan_array_op(&MirrorArrayOp::Pop, 2)), vec!["a"]);
        assert_eq!(replay(vec!["a", "b"], plan_array_op(&MirrorArrayOp::Shift, 2)), vec!["b"]);
        assert!(plan_array_op(&MirrorArrayOp::Pop, 0).is_empty());

        let unshifted = plan_array_op(
            &MirrorArrayOp::Unshift(vec![MirrorValue::string("x"), MirrorValue::string("y")]),
            1,
        );
        assert_eq!(replay(vec!["a"], unshifted), vec!["x", "y", "a"]);
    }

    #[test]
    fn test_splice_and_reverse() {
        let spliced = plan_array_op(
            &MirrorArrayOp::Splice {
                start: -2,
                delete_count: 1,
                items: vec![MirrorValue::string("x")],
            },
            4,
        );
        assert_eq!(replay(vec!["a", "b", "c", "d"], spliced), vec!["a", "b", "x", "d"]);

        let reversed = plan_array_op(&MirrorArrayOp::Reverse, 3);
        assert_eq!(replay(vec!["a", "b", "c"], reversed), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_splice_clamps_to_length() {
        let ops = plan_array_op(
            &MirrorArrayOp::Splice {
                start: 10,
                delete_count: 5,
                items: vec![],
            },
            2,
        );
        assert!(ops.is_empty());
    }

    #[test]
    fn test_json_conversion_recognizes_tokens() {
        let value = MirrorValue::from_json(&json!({"Name": "x", "Owner": {"__ref__": 3}}));
        assert_eq!(
            value,
            MirrorValue::Object(vec![
                ("Name".to_string(), MirrorValue::string("x")),
                ("Owner".to_string(), MirrorValue::Ref(SessionId(3))),
            ])
        );
        assert_eq!(value.to_json(), json!({"Name": "x", "Owner": {"__ref__": 3}}));
    }
}
