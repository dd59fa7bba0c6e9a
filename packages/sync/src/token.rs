//! Pending write tokens.
//!
//! A property slot is owned by at most one propagation direction at a time.
//! The direction that acquired the token last wins; a write coming back from
//! the other side with the token's value is an echo and is dropped.
//!
//! Collections track the native change batches the coordinator itself applied
//! on behalf of the mirror, so their notifications are not sent back.

use std::collections::{HashMap, VecDeque};
use tether_common::SessionId;
use tether_glue::{NativeCollectionChange, NativeValue};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum PropagationState {
    #[default]
    Idle,
    /// Native changed; the value went out in patch `seq`
    PropagatingOut { value: NativeValue, seq: u64 },
    /// Mirror changed; the value is being written to native
    PropagatingIn { value: NativeValue },
}

#[derive(Debug, Default)]
pub struct TokenTable {
    properties: HashMap<(SessionId, String), PropagationState>,
    collections: HashMap<SessionId, VecDeque<Vec<NativeCollectionChange>>>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, id: SessionId, key: &str) -> PropagationState {
        self.properties
            .get(&(id, key.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Native notified a property change. Returns `true` for an echo of a
    /// mirror write, which releases the token.
    pub fn native_write(&mut self, id: SessionId, key: &str, value: &NativeValue, seq: u64) -> bool {
        let slot = (id, key.to_string());
        if let Some(PropagationState::PropagatingIn { value: pending }) = self.properties.get(&slot) {
            if pending == value {
                self.properties.remove(&slot);
                return true;
            }
        }
        self.properties.insert(
            slot,
            PropagationState::PropagatingOut {
                value: value.clone(),
                seq,
            },
        );
        false
    }

    /// Mirror requested a property write. Returns `true` for an echo of a
    /// value just sent out, which releases the token.
    pub fn mirror_write(&mut self, id: SessionId, key: &str, value: &NativeValue) -> bool {
        let slot = (id, key.to_string());
        if let Some(PropagationState::PropagatingOut { value: sent, .. }) = self.properties.get(&slot) {
            if sent == value {
                self.properties.remove(&slot);
                return true;
            }
        }
        self.properties.insert(
            slot,
            PropagationState::PropagatingIn {
                value: value.clone(),
            },
        );
        false
    }

    /// Drop the inbound token of a write that never reached native
    pub fn abandon(&mut self, id: SessionId, key: &str) {
        let slot = (id, key.to_string());
        if matches!(self.properties.get(&slot), Some(PropagationState::PropagatingIn { .. })) {
            self.properties.remove(&slot);
        }
    }

    /// Retire outbound tokens of every patch up to and including `seq`
    pub fn acknowledge(&mut self, seq: u64) -> usize {
        let before = self.properties.len();
        self.properties.retain(|_, state| {
            !matches!(state, PropagationState::PropagatingOut { seq: sent, .. } if *sent <= seq)
        });
        before - self.properties.len()
    }

    /// Remember a batch applied to a native list for the mirror
    pub fn expect_echo(&mut self, id: SessionId, changes: Vec<NativeCollectionChange>) {
        self.collections.entry(id).or_default().push_back(changes);
    }

    /// `true` when `changes` is the oldest batch still awaiting its echo
    pub fn take_echo(&mut self, id: SessionId, changes: &[NativeCollectionChange]) -> bool {
        let Some(pending) = self.collections.get_mut(&id) else {
            return false;
        };
        if pending.front().map(Vec::as_slice) != Some(changes) {
            return false;
        }
        pending.pop_front();
        if pending.is_empty() {
            self.collections.remove(&id);
        }
        true
    }

    pub fn forget(&mut self, id: SessionId) {
        self.properties.retain(|(owner, _), _| *owner != id);
        self.collections.remove(&id);
    }

    pub fn clear(&mut self) {
        self.properties.clear();
        self.collections.clear();
    }

    pub fn len(&self) -> usize {
        self.properties.len() + self.collections.values().map(VecDeque::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
