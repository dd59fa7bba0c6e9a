//! # Collection Diff Translator
//!
//! Two sources of collection edits:
//!
//! - granular native change events, translated 1:1 in emission order
//!   ([`translate_changes`]);
//! - before/after snapshots, diffed positionally ([`diff_sequences`]).
//!
//! Elements are compared by session id; value-typed scalars, which have no
//! identity, compare by value and are interchangeable with equal copies.

use crate::native::{NativeCollectionChange, NativeValue};
use crate::node::GlueRef;
use tether_common::{GlueError, GlueResult};

/// One atomic ordered-sequence mutation on the mirror side
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionEdit {
    Add { index: usize, value: GlueRef },
    Remove { index: usize },
    Replace { index: usize, value: GlueRef },
    Move { from: usize, to: usize },
    Reset { items: Vec<GlueRef> },
}

/// Translate native change events into edits, one for one.
///
/// `wrap` turns each inserted native value into its glue reference.
pub fn translate_changes<F>(
    changes: &[NativeCollectionChange],
    mut wrap: F,
) -> GlueResult<Vec<CollectionEdit>>
where
    F: FnMut(&NativeValue) -> GlueResult<GlueRef>,
{
    changes
        .iter()
        .map(|change| {
            Ok(match change {
                NativeCollectionChange::Add { index, value } => CollectionEdit::Add {
                    index: *index,
                    value: wrap(value)?,
                },
                NativeCollectionChange::Remove { index } => CollectionEdit::Remove { index: *index },
                NativeCollectionChange::Replace { index, value } => CollectionEdit::Replace {
                    index: *index,
                    value: wrap(value)?,
                },
                NativeCollectionChange::Move { from, to } => CollectionEdit::Move {
                    from: *from,
                    to: *to,
                },
                NativeCollectionChange::Clear => CollectionEdit::Reset { items: Vec::new() },
            })
        })
        .collect()
}

/// Replay edits in order. An out-of-range index is an internal fault and
/// leaves `items` untouched.
pub fn apply_edits(items: &mut Vec<GlueRef>, edits: &[CollectionEdit]) -> GlueResult<()> {
    let mut staged = items.clone();
    for edit in edits {
        let len = staged.len();
        let out_of_range = |index: usize| GlueError::EditOutOfRange { index, len };
        match edit {
            CollectionEdit::Add { index, value } => {
                if *index > len {
                    return Err(out_of_range(*index));
                }
                staged.insert(*index, value.clone());
            }
            CollectionEdit::Remove { index } => {
                if *index >= len {
                    return Err(out_of_range(*index));
                }
                staged.remove(*index);
            }
            CollectionEdit::Replace { index, value } => {
                let slot = staged.get_mut(*index).ok_or_else(|| out_of_range(*index))?;
                *slot = value.clone();
            }
            CollectionEdit::Move { from, to } => {
                if *from >= len || *to >= len {
                    return Err(out_of_range((*from).max(*to)));
                }
                let item = staged.remove(*from);
                staged.insert(*to, item);
            }
            CollectionEdit::Reset { items } => staged = items.clone(),
        }
    }
    *items = staged;
    Ok(())
}

/// Multiset match: `true` for each element of `left` with no counterpart
/// left in `right`
fn unmatched(left: &[GlueRef], right: &[GlueRef]) -> Vec<bool> {
    let mut pool: Vec<&GlueRef> = right.iter().collect();
    left.iter()
        .map(|item| match pool.iter().position(|candidate| *candidate == item) {
            Some(pos) => {
                pool.swap_remove(pos);
                false
            }
            None => true,
        })
        .collect()
}

/// Edits turning `before` into `after`.
///
/// Elements that persist are moved rather than removed and re-added, so their
/// subgraphs are never re-serialized. A vanished element whose slot receives
/// a new element becomes a single `Replace`. Clearing becomes `Reset([])`.
pub fn diff_sequences(before: &[GlueRef], after: &[GlueRef]) -> Vec<CollectionEdit> {
    if before == after {
        return Vec::new();
    }
    if after.is_empty() {
        return vec![CollectionEdit::Reset { items: Vec::new() }];
    }

    let mut doomed = unmatched(before, after);
    let mut fresh = unmatched(after, before);
    if !before.is_empty() && doomed.iter().all(|d| *d) {
        return vec![CollectionEdit::Reset {
            items: after.to_vec(),
        }];
    }

    let mut work = before.to_vec();
    let mut edits = Vec::new();

    for i in 0..work.len().min(after.len()) {
        if doomed[i] && fresh[i] {
            work[i] = after[i].clone();
            doomed[i] = false;
            fresh[i] = false;
            edits.push(CollectionEdit::Replace {
                index: i,
                value: after[i].clone(),
            });
        }
    }

    for k in (0..work.len()).rev() {
        if doomed[k] {
            work.remove(k);
            edits.push(CollectionEdit::Remove { index: k });
        }
    }

    for (i, target) in after.iter().enumerate() {
        if work.get(i) == Some(target) {
            continue;
        }
        match (i + 1..work.len()).find(|&j| work[j] == *target) {
            Some(j) => {
                let item = work.remove(j);
                work.insert(i, item);
                edits.push(CollectionEdit::Move { from: j, to: i });
            }
            None => {
                work.insert(i, target.clone());
                edits.push(CollectionEdit::Add {
                    index: i,
                    value: target.clone(),
                });
            }
        }
    }

    edits
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_common::SessionId;

    fn n(id: u64) -> GlueRef {
        GlueRef::Node(SessionId(id))
    }

    fn check(before: Vec<GlueRef>, after: Vec<GlueRef>) -> Vec<CollectionEdit> {
        let edits = diff_sequences(&before, &after);
        let mut replayed = before;
        apply_edits(&mut replayed, &edits).unwrap();
        assert_eq!(replayed, after);
        edits
    }

    #[test]
    fn test_removal_is_single_edit() {
        let edits = check(vec![n(1), n(2), n(3)], vec![n(2), n(3)]);
        assert_eq!(edits, vec![CollectionEdit::Remove { index: 0 }]);
    }

    #[test]
    fn test_persisting_element_moves() {
        let edits = check(vec![n(1), n(2), n(3)], vec![n(3), n(1), n(2)]);
        assert_eq!(edits, vec![CollectionEdit::Move { from: 2, to: 0 }]);
    }

    #[test]
    fn test_vanished_slot_becomes_replace() {
        let edits = check(vec![n(1), n(2)], vec![n(1), n(5)]);
        assert_eq!(
            edits,
            vec![CollectionEdit::Replace { index: 1, value: n(5) }]
        );
    }

    #[test]
    fn test_clear_is_reset() {
        let edits = check(vec![n(1), n(2)], vec![]);
        assert_eq!(edits, vec![CollectionEdit::Reset { items: vec![] }]);
    }

    #[test]
    fn test_mixed_changes_converge() {
        check(
            vec![n(1), n(2), n(3), n(4)],
            vec![n(4), n(9), n(2), n(8), n(7)],
        );
        check(
            vec![GlueRef::string("a"), GlueRef::string("a"), GlueRef::string("b")],
            vec![GlueRef::string("b"), GlueRef::string("a")],
        );
        check(vec![], vec![n(1), n(2)]);
    }

    #[test]
    fn test_translate_clear_and_moves() {
        let changes = vec![
            NativeCollectionChange::Move { from: 0, to: 2 },
            NativeCollectionChange::Add { index: 0, value: "x".into() },
            NativeCollectionChange::Clear,
        ];
        let edits = translate_changes(&changes, |v| {
            Ok(GlueRef::string(v.as_str().unwrap_or_default()))
        })
        .unwrap();

        assert_eq!(
            edits,
            vec![
                CollectionEdit::Move { from: 0, to: 2 },
                CollectionEdit::Add { index: 0, value: GlueRef::string("x") },
                CollectionEdit::Reset { items: vec![] },
            ]
        );
    }

    #[test]
    fn test_apply_out_of_range_leaves_items_untouched() {
        let mut items = vec![n(1)];
        let err = apply_edits(
            &mut items,
            &[CollectionEdit::Remove { index: 0 }, CollectionEdit::Remove { index: 0 }],
        )
        .unwrap_err();
        assert!(err.is_internal_fault());
        assert_eq!(items, vec![n(1)]);
    }
}
