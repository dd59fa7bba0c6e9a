//! Rebasing mirror array ops onto the native list.
//!
//! The mirror plans an op against the sequence it last received. Native may
//! have moved on since, with the change notifications still queued. Each step
//! is carried over to native positions through element identity:
//!
//! - a removal removes the element the mirror saw, wherever it is now, and is
//!   dropped when native already removed it
//! - an append lands at the native end
//! - any other insertion lands before the next element the mirror saw that
//!   native still holds, or after the previous one
//!
//! When native and the mirror agree, the native changes are the mirror steps
//! unchanged.

use tether_common::{GlueError, GlueResult};
use tether_glue::{GlueRef, NativeCollectionChange, NativeValue, ScalarValue, SessionRegistry};

/// One mirror array step in the mirror's coordinates, value already converted
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    Insert { index: usize, value: NativeValue },
    RemoveAt { index: usize },
    Move { from: usize, to: usize },
}

/// Glue identity of a native list element without registering it.
///
/// `None` for a reference value the registry has never seen.
pub(crate) fn identity(registry: &SessionRegistry, value: &NativeValue) -> Option<GlueRef> {
    let scalar = match value {
        NativeValue::Null | NativeValue::Opaque(_) => ScalarValue::Null,
        NativeValue::Bool(b) => ScalarValue::Bool(*b),
        NativeValue::Int(i) => ScalarValue::Int(*i),
        NativeValue::Float(x) => ScalarValue::Float(*x),
        NativeValue::String(s) => ScalarValue::String(s.clone()),
        NativeValue::Date(date) => return Some(GlueRef::Date(*date)),
        other => {
            let handle = other.handle()?;
            return registry.session_of(handle.native_id()).map(GlueRef::Node);
        }
    };
    Some(GlueRef::Value(scalar))
}

/// Element tags shared by both sequences; equal tags are the same element
#[derive(Default)]
struct Tags(usize);

impl Tags {
    fn fresh(&mut self) -> usize {
        self.0 += 1;
        self.0
    }
}

fn position(tags: &[usize], tag: usize) -> Option<usize> {
    tags.iter().position(|t| *t == tag)
}

/// Native index for an insertion at `index` in the mirror sequence
fn anchor(mirror: &[usize], native: &[usize], index: usize) -> usize {
    if index >= mirror.len() {
        return native.len();
    }
    if let Some(at) = mirror[index..].iter().find_map(|tag| position(native, *tag)) {
        return at;
    }
    mirror[..index]
        .iter()
        .rev()
        .find_map(|tag| position(native, *tag))
        .map_or(native.len(), |at| at + 1)
}

/// Map mirror `steps`, planned against `view`, onto a native list whose
/// elements currently have the identities in `native`.
pub(crate) fn rebase(
    view: &[GlueRef],
    native: &[Option<GlueRef>],
    steps: &[Step],
) -> GlueResult<Vec<NativeCollectionChange>> {
    let mut tags = Tags::default();
    let mut native_tags: Vec<usize> = native.iter().map(|_| tags.fresh()).collect();

    // The k-th occurrence of an element in the view is the k-th in native
    let mut claimed = vec![false; native.len()];
    let mut mirror_tags = Vec::with_capacity(view.len());
    for item in view {
        let found = native
            .iter()
            .enumerate()
            .position(|(i, candidate)| !claimed[i] && candidate.as_ref() == Some(item));
        match found {
            Some(i) => {
                claimed[i] = true;
                mirror_tags.push(native_tags[i]);
            }
            None => mirror_tags.push(tags.fresh()),
        }
    }

    let out_of_range = |index: usize, len: usize| GlueError::EditOutOfRange { index, len };
    let mut changes = Vec::new();
    for step in steps {
        match step {
            Step::RemoveAt { index } => {
                if *index >= mirror_tags.len() {
                    return Err(out_of_range(*index, mirror_tags.len()));
                }
                let tag = mirror_tags.remove(*index);
                if let Some(at) = position(&native_tags, tag) {
                    native_tags.remove(at);
                    changes.push(NativeCollectionChange::Remove { index: at });
                }
            }
            Step::Insert { index, value } => {
                if *index > mirror_tags.len() {
                    return Err(out_of_range(*index, mirror_tags.len()));
                }
                let at = anchor(&mirror_tags, &native_tags, *index);
                let tag = tags.fresh();
                mirror_tags.insert(*index, tag);
                native_tags.insert(at, tag);
                changes.push(NativeCollectionChange::Add {
                    index: at,
                    value: value.clone(),
                });
            }
            Step::Move { from, to } => {
                if *from >= mirror_tags.len() || *to >= mirror_tags.len() {
                    return Err(out_of_range((*from).max(*to), mirror_tags.len()));
                }
                let tag = mirror_tags.remove(*from);
                let Some(source) = position(&native_tags, tag) else {
                    mirror_tags.insert(*to, tag);
                    continue;
                };
                native_tags.remove(source);
                let at = anchor(&mirror_tags, &native_tags, *to);
                mirror_tags.insert(*to, tag);
                native_tags.insert(at, tag);
                if source != at {
                    changes.push(NativeCollectionChange::Move { from: source, to: at });
                }
            }
        }
    }
    Ok(changes)
}
