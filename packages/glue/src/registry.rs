//! # Session Registry
//!
//! Bidirectional map between native identity and session id.
//!
//! - Ids are allocated from a monotonic counter starting at 1 and are never
//!   reused while the registry lives.
//! - The mapping is 1:1; a violated bijection is reported as
//!   [`GlueError::RegistryCorruption`].
//! - Entries are released only by an explicit [`SessionRegistry::detach`].
//!
//! The registry is the only structure mutated from both propagation
//! directions, so it is shared as [`SharedRegistry`] behind one mutex.

use crate::native::NativeHandle;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tether_common::{GlueError, GlueResult, NativeId, SessionId};
use tracing::debug;

pub type SharedRegistry = Arc<Mutex<SessionRegistry>>;

/// Result of [`SessionRegistry::assign`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub id: SessionId,
    /// True when the id was allocated by this call
    pub fresh: bool,
}

#[derive(Debug)]
pub struct SessionRegistry {
    next_id: u64,
    by_native: HashMap<NativeId, SessionId>,
    by_session: HashMap<SessionId, NativeHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            by_native: HashMap::new(),
            by_session: HashMap::new(),
        }
    }

    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Return the existing id of `handle`, or allocate the next one
    pub fn assign(&mut self, handle: &NativeHandle) -> GlueResult<Assignment> {
        let native_id = handle.native_id();
        if let Some(id) = self.by_native.get(&native_id) {
            return Ok(Assignment { id: *id, fresh: false });
        }

        let id = SessionId(self.next_id);
        if self.by_session.contains_key(&id) {
            return Err(GlueError::RegistryCorruption(format!(
                "session id {} allocated twice",
                id
            )));
        }
        self.next_id += 1;
        self.by_native.insert(native_id, id);
        self.by_session.insert(id, handle.clone());
        debug!(session = %id, native = %native_id, kind = handle.kind_name(), "assigned session id");

        Ok(Assignment { id, fresh: true })
    }

    pub fn lookup(&self, id: SessionId) -> Option<NativeHandle> {
        self.by_session.get(&id).cloned()
    }

    pub fn session_of(&self, native_id: NativeId) -> Option<SessionId> {
        self.by_native.get(&native_id).copied()
    }

    /// Remove both directions of the mapping for `native_id`
    pub fn detach(&mut self, native_id: NativeId) -> Option<SessionId> {
        let id = self.by_native.remove(&native_id)?;
        self.by_session.remove(&id);
        debug!(session = %id, native = %native_id, "detached session id");
        Some(id)
    }

    pub fn detach_session(&mut self, id: SessionId) -> Option<NativeHandle> {
        let handle = self.by_session.remove(&id)?;
        self.by_native.remove(&handle.native_id());
        Some(handle)
    }

    /// Drop every entry; used when the bound root is detached
    pub fn teardown(&mut self) -> Vec<NativeHandle> {
        self.by_native.clear();
        self.by_session.drain().map(|(_, handle)| handle).collect()
    }

    pub fn len(&self) -> usize {
        self.by_session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_session.is_empty()
    }

    /// Check the bijection; any violation is an internal fault
    pub fn verify(&self) -> GlueResult<()> {
        if self.by_native.len() != self.by_session.len() {
            return Err(GlueError::RegistryCorruption(format!(
                "{} native entries vs {} session entries",
                self.by_native.len(),
                self.by_session.len()
            )));
        }
        for (id, handle) in &self.by_session {
            if self.by_native.get(&handle.native_id()) != Some(id) {
                return Err(GlueError::RegistryCorruption(format!(
                    "session {} does not map back from {}",
                    id,
                    handle.native_id()
                )));
            }
            if id.get() >= self.next_id {
                return Err(GlueError::RegistryCorruption(format!(
                    "session {} beyond allocation counter {}",
                    id, self.next_id
                )));
            }
        }
        Ok(())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{NativeObject, NativeValue};

    fn handle(obj: &std::sync::Arc<NativeObject>) -> NativeHandle {
        NativeHandle::Object(obj.clone())
    }

    #[test]
    fn test_assign_is_idempotent() {
        let mut registry = SessionRegistry::new();
        let skill = NativeObject::new("Skill");

        let first = registry.assign(&handle(&skill)).unwrap();
        let second = registry.assign(&handle(&skill)).unwrap();

        assert!(first.fresh);
        assert!(!second.fresh);
        assert_eq!(first.id, second.id);
        assert_eq!(first.id, SessionId(1));
    }

    #[test]
    fn test_distinct_objects_get_distinct_ids() {
        let mut registry = SessionRegistry::new();
        let a = registry.assign(&handle(&NativeObject::new("Skill"))).unwrap();
        let b = registry.assign(&handle(&NativeObject::new("Skill"))).unwrap();
        assert_ne!(a.id, b.id);
        registry.verify().unwrap();
    }

    #[test]
    fn test_detach_then_reassign_allocates_new_id() {
        let mut registry = SessionRegistry::new();
        let skill = NativeObject::new("Skill");
        let first = registry.assign(&handle(&skill)).unwrap().id;

        assert_eq!(registry.detach(skill.id()), Some(first));
        assert!(registry.lookup(first).is_none());

        let second = registry.assign(&handle(&skill)).unwrap().id;
        assert!(second > first);
    }

    #[test]
    fn test_lookup_returns_native_reference() {
        let mut registry = SessionRegistry::new();
        let skill = NativeObject::new("Skill");
        let id = registry.assign(&handle(&skill)).unwrap().id;

        let found = registry.lookup(id).unwrap();
        assert_eq!(found.to_value(), NativeValue::Object(skill));
        assert!(registry.lookup(SessionId(99)).is_none());
    }

    #[test]
    fn test_teardown_empties_registry() {
        let mut registry = SessionRegistry::new();
        registry.assign(&handle(&NativeObject::new("A"))).unwrap();
        registry.assign(&handle(&NativeObject::new("B"))).unwrap();

        assert_eq!(registry.teardown().len(), 2);
        assert!(registry.is_empty());
        registry.verify().unwrap();
    }
}
