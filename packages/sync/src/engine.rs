//! # Synchronization Coordinator
//!
//! [`SyncEngine`] is the synchronous core of a synchronization session. It
//! owns the glue graph, the cross-patch visited set and the pending write
//! tokens, and shares the session registry.
//!
//! ## Data flow
//!
//! ```text
//! native events ──► process_native ──► graph update ──► Patch (one per tick)
//! mirror request ─► process_mirror ──► registry lookup ──► native write
//! ```
//!
//! Native writes made on behalf of the mirror publish events like any other
//! native change; those come back through [`SyncEngine::process_native`] and
//! are recognized as echoes by the token table instead of being re-sent.
//! Collection batches also carry the list revision; a batch the mirrored
//! collection already reflects is skipped.
//!
//! Per-element input faults (unknown session, type mismatch, failed command)
//! are logged and reported as [`MirrorOutcome::Rejected`]. Internal faults are
//! returned as errors.

use crate::config::SyncConfig;
use crate::convert::to_native;
use crate::patch::{Patch, Update, Updates};
use crate::rebase::{identity, rebase, Step};
use crate::token::TokenTable;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{MutexGuard, PoisonError};
use tether_common::{GlueError, GlueResult, NativeId, SessionId};
use tether_glue::native::CELL_VALUE_KEY;
use tether_glue::{
    diff_sequences, plan_array_op, reachable, translate_changes, CircularSerializer,
    CollectionEdit, ElementType, Envelope, GlueBuilder, GlueGraph, GlueRef, ListOp,
    MirrorArrayOp, MirrorValue, NativeCollectionChange, NativeEvent, NativeHandle, NativeList,
    NativeValue, SessionRegistry, SharedObserver, SharedRegistry, VisitedSet,
};
use tracing::{debug, error, info, warn};

/// Mutation request issued by the mirror
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorRequest {
    SetProperty {
        target: SessionId,
        key: String,
        value: MirrorValue,
    },
    Array {
        target: SessionId,
        op: MirrorArrayOp,
    },
    InvokeCommand {
        target: SessionId,
        args: Vec<MirrorValue>,
    },
    /// The mirror applied every patch up to and including `seq`
    Acknowledge { seq: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MirrorOutcome {
    Applied,
    /// The request repeated a value just sent out; nothing was written
    Echo,
    /// Native state is unchanged
    Rejected(GlueError),
    /// Serialized return value of a command.
    ///
    /// Nodes first expanded in the value stay registered until the mirror's
    /// next [`MirrorRequest::Acknowledge`], even when nothing reachable from
    /// the root holds them.
    Returned(Value),
    /// Number of outbound tokens retired
    Acknowledged(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MirrorReply {
    pub outcome: MirrorOutcome,
    /// Patch for the mirror, e.g. ids of values it created or a rollback
    pub patch: Option<Patch>,
}

impl MirrorReply {
    fn new(outcome: MirrorOutcome) -> Self {
        Self {
            outcome,
            patch: None,
        }
    }
}

fn lock(registry: &SharedRegistry) -> MutexGuard<'_, SessionRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

fn surface(err: GlueError) -> GlueError {
    error!(error = %err, "internal consistency fault");
    err
}

pub struct SyncEngine {
    config: SyncConfig,
    graph: GlueGraph,
    registry: SharedRegistry,
    visited: VisitedSet,
    tokens: TokenTable,
    observer: SharedObserver,
    seq: u64,
    /// Command results handed to the mirror, kept until it acknowledges
    pinned: HashSet<SessionId>,
}

impl SyncEngine {
    /// `observer` is installed on every native value the engine mirrors
    pub fn new(config: SyncConfig, observer: SharedObserver) -> Self {
        Self {
            config,
            graph: GlueGraph::new(),
            registry: SessionRegistry::shared(),
            visited: VisitedSet::new(),
            tokens: TokenTable::new(),
            observer,
            seq: 0,
            pinned: HashSet::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn graph(&self) -> &GlueGraph {
        &self.graph
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn visited(&self) -> &VisitedSet {
        &self.visited
    }

    pub fn tokens(&self) -> &TokenTable {
        &self.tokens
    }

    /// Sequence number of the last patch produced
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn root(&self) -> Option<&GlueRef> {
        self.graph.root()
    }

    /// Session id currently assigned to a native reference value
    pub fn session_of(&self, value: &NativeValue) -> Option<SessionId> {
        let handle = value.handle()?;
        lock(&self.registry).session_of(handle.native_id())
    }

    /// Mirror `root` and describe the whole graph in one envelope.
    ///
    /// Binding again tears the previous session down first.
    pub fn bind(&mut self, root: &NativeValue) -> GlueResult<Envelope> {
        if self.graph.root().is_some() {
            self.teardown();
        }
        let root = self.wrap(root)?;
        self.graph.set_root(root.clone());

        let serialized = self.serializer().serialize(&root, &self.visited)?;
        self.visited.commit(serialized.expanded);
        info!(nodes = self.graph.len(), "bound root");
        Ok(Envelope::new(
            self.config.envelope_operation.as_str(),
            serialized.description,
        ))
    }

    /// Release every registry entry and unsubscribe from native values
    pub fn teardown(&mut self) {
        let handles = lock(&self.registry).teardown();
        for handle in &handles {
            handle.set_observer(None);
        }
        self.graph = GlueGraph::new();
        self.visited.clear();
        self.tokens.clear();
        self.pinned.clear();
        info!(released = handles.len(), "tore down session");
    }

    /// Check that graph and registry describe the same set of nodes
    pub fn verify(&self) -> GlueResult<()> {
        let registry = lock(&self.registry);
        registry.verify()?;
        if registry.len() != self.graph.len() {
            return Err(GlueError::RegistryCorruption(format!(
                "registry holds {} entries, graph holds {} nodes",
                registry.len(),
                self.graph.len()
            )));
        }
        match self.graph.ids().find(|id| registry.lookup(*id).is_none()) {
            Some(id) => Err(GlueError::RegistryCorruption(format!(
                "node {} has no registry entry",
                id
            ))),
            None => Ok(()),
        }
    }

    /// Process the native events of one tick and coalesce them into at most
    /// one patch.
    pub fn process_native(&mut self, events: Vec<NativeEvent>) -> GlueResult<Option<Patch>> {
        let mut updates = Updates::default();
        for event in events {
            self.native_event(event, &mut updates).map_err(surface)?;
        }
        let patch = self.seal(updates).map_err(surface)?;
        self.collect_garbage();
        Ok(patch)
    }

    pub fn process_mirror(&mut self, request: MirrorRequest) -> GlueResult<MirrorReply> {
        let result = match request {
            MirrorRequest::SetProperty { target, key, value } => {
                self.set_property(target, &key, &value)
            }
            MirrorRequest::Array { target, op } => self.array_op(target, &op),
            MirrorRequest::InvokeCommand { target, args } => self
                .invoke_command(target, &args)
                .map(|value| MirrorReply::new(MirrorOutcome::Returned(value))),
            MirrorRequest::Acknowledge { seq } => {
                let retired = self.tokens.acknowledge(seq);
                self.pinned.clear();
                debug!(seq, retired, "mirror acknowledged");
                Ok(MirrorReply::new(MirrorOutcome::Acknowledged(retired)))
            }
        };

        match result {
            Ok(reply) => {
                self.collect_garbage();
                Ok(reply)
            }
            Err(err) if err.is_internal_fault() => Err(surface(err)),
            Err(err) => {
                warn!(error = %err, "rejected mirror request");
                Ok(MirrorReply::new(MirrorOutcome::Rejected(err)))
            }
        }
    }

    /// Execute a native command for the mirror and serialize its result
    pub fn invoke(&mut self, target: SessionId, args: &[MirrorValue]) -> GlueResult<Value> {
        let result = self.invoke_command(target, args);
        match &result {
            Err(err) if err.is_internal_fault() => error!(error = %err, "internal consistency fault"),
            Err(err) => warn!(session = %target, error = %err, "command invocation rejected"),
            Ok(_) => self.collect_garbage(),
        }
        result
    }

    fn serializer(&self) -> CircularSerializer<'_> {
        CircularSerializer::new(&self.graph)
            .with_version(Some(self.config.format_version))
            .with_max_depth(self.config.max_depth)
    }

    fn wrap(&mut self, value: &NativeValue) -> GlueResult<GlueRef> {
        self.wrap_fresh(value).map(|(glue, _)| glue)
    }

    /// Wrap `value`; the flag is set when the value itself was expanded now
    fn wrap_fresh(&mut self, value: &NativeValue) -> GlueResult<(GlueRef, bool)> {
        let mut registry = lock(&self.registry);
        let mut builder =
            GlueBuilder::new(&mut self.graph, &mut registry).with_observer(self.observer.clone());
        let glue = builder.wrap(value)?;
        let fresh = glue
            .session_id()
            .map_or(false, |id| builder.expanded().contains(&id));
        Ok((glue, fresh))
    }

    fn wrap_all(&mut self, values: &[NativeValue]) -> GlueResult<Vec<GlueRef>> {
        let mut registry = lock(&self.registry);
        let mut builder =
            GlueBuilder::new(&mut self.graph, &mut registry).with_observer(self.observer.clone());
        values.iter().map(|value| builder.wrap(value)).collect()
    }

    /// Session id of a mirrored native value, `None` for stale events
    fn tracked(&self, native_id: NativeId) -> Option<SessionId> {
        match lock(&self.registry).session_of(native_id) {
            Some(id) if self.graph.contains(id) => Some(id),
            _ => {
                debug!(native = %native_id, "event for untracked value ignored");
                None
            }
        }
    }

    fn native_event(&mut self, event: NativeEvent, updates: &mut Updates) -> GlueResult<()> {
        match event {
            NativeEvent::PropertyChanged { owner, key, value } => {
                let Some(id) = self.tracked(owner.native_id()) else {
                    return Ok(());
                };
                if self.tokens.native_write(id, &key, &value, self.seq + 1) {
                    debug!(session = %id, key = %key, "native echo of mirror write absorbed");
                    return Ok(());
                }
                let value = self.wrap(&value)?;
                self.graph.set_property(id, &key, value.clone())?;
                updates.push(Update::Property {
                    target: id,
                    key,
                    value,
                });
            }
            NativeEvent::CollectionChanged {
                list,
                changes,
                revision,
                snapshot,
            } => {
                let Some(id) = self.tracked(list.id()) else {
                    return Ok(());
                };
                let synced = self.graph.revision(id)?;
                if revision <= synced {
                    if self.tokens.take_echo(id, &changes) {
                        debug!(session = %id, "native echo of mirror array op absorbed");
                    } else {
                        debug!(session = %id, revision, synced, "collection batch already reflected");
                    }
                    return Ok(());
                }
                if revision == synced + 1 {
                    self.replay(id, &changes, updates)?;
                }
                self.reconcile(id, &snapshot, updates)?;
                self.graph.set_revision(id, revision)?;
            }
            NativeEvent::CommandChanged { command } => {
                let Some(id) = self.tracked(command.id()) else {
                    return Ok(());
                };
                let can_execute = command.can_execute();
                self.graph.set_can_execute(id, can_execute)?;
                updates.push(Update::CanExecute {
                    target: id,
                    can_execute,
                });
            }
            NativeEvent::CommandInvoked { command, args } => {
                let Some(id) = self.tracked(command.id()) else {
                    return Ok(());
                };
                let args = self.wrap_all(&args)?;
                updates.push(Update::Invoked { target: id, args });
            }
            NativeEvent::Detached { handle } => {
                let Some(id) = self.tracked(handle.native_id()) else {
                    return Ok(());
                };
                if self.live().contains(&id) {
                    warn!(session = %id, "detach of a live value ignored");
                } else {
                    self.detach(id);
                }
            }
        }
        Ok(())
    }

    /// Translate the batch right after the synced revision 1:1
    fn replay(
        &mut self,
        id: SessionId,
        changes: &[NativeCollectionChange],
        updates: &mut Updates,
    ) -> GlueResult<()> {
        let edits = {
            let mut registry = lock(&self.registry);
            let mut builder = GlueBuilder::new(&mut self.graph, &mut registry)
                .with_observer(self.observer.clone());
            translate_changes(changes, |value| builder.wrap(value))?
        };
        match self.graph.apply_edits(id, &edits) {
            Ok(()) => {
                updates.edits(id, edits);
                Ok(())
            }
            Err(GlueError::EditOutOfRange { index, len }) => {
                warn!(session = %id, index, len, "collection batch does not replay, diffing against snapshot");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Bring the mirrored collection in line with a native snapshot
    fn reconcile(
        &mut self,
        id: SessionId,
        snapshot: &[NativeValue],
        updates: &mut Updates,
    ) -> GlueResult<()> {
        let native = self.wrap_all(snapshot)?;
        let edits = diff_sequences(self.graph.items(id)?, &native);
        if edits.is_empty() {
            return Ok(());
        }
        debug!(session = %id, edits = edits.len(), "collection reconciled with native snapshot");
        self.graph.apply_edits(id, &edits)?;
        updates.edits(id, edits);
        Ok(())
    }

    /// Describe `updates` against the visited set and assign the next seq
    fn seal(&mut self, updates: Updates) -> GlueResult<Option<Patch>> {
        if updates.is_empty() {
            return Ok(None);
        }
        let serializer = self.serializer();
        let mut walk = serializer.walk(&self.visited);
        let described = updates
            .into_inner()
            .iter()
            .map(|update| update.describe(&mut walk))
            .collect::<GlueResult<Vec<_>>>()?;
        let expanded = walk.finish();
        self.visited.commit(expanded);

        self.seq += 1;
        debug!(seq = self.seq, updates = described.len(), "sealed patch");
        Ok(Some(Patch {
            seq: self.seq,
            updates: described,
        }))
    }

    /// Nodes reachable from the bound root or a pinned command result
    fn live(&self) -> HashSet<SessionId> {
        let Some(root) = self.graph.root() else {
            return HashSet::new();
        };
        let mut live = reachable(&self.graph, root);
        for id in &self.pinned {
            if !live.contains(id) && self.graph.contains(*id) {
                live.extend(reachable(&self.graph, &GlueRef::Node(*id)));
            }
        }
        live
    }

    /// Detach every node no longer live
    fn collect_garbage(&mut self) {
        if !self.config.auto_detach || self.graph.root().is_none() {
            return;
        }
        let live = self.live();
        let dead: Vec<SessionId> = self.graph.ids().filter(|id| !live.contains(id)).collect();
        for id in dead {
            self.detach(id);
        }
    }

    fn detach(&mut self, id: SessionId) {
        let handle = lock(&self.registry).detach_session(id);
        if let Some(handle) = handle {
            handle.set_observer(None);
        }
        self.graph.remove(id);
        self.visited.forget(id);
        self.tokens.forget(id);
        self.pinned.remove(&id);
        debug!(session = %id, "detached");
    }

    fn lookup(&self, target: SessionId) -> GlueResult<NativeHandle> {
        lock(&self.registry)
            .lookup(target)
            .ok_or(GlueError::UnknownSession(target))
    }

    fn set_property(
        &mut self,
        target: SessionId,
        key: &str,
        value: &MirrorValue,
    ) -> GlueResult<MirrorReply> {
        let handle = self.lookup(target)?;
        let current = match &handle {
            NativeHandle::Object(object) => object.get(key).unwrap_or(NativeValue::Null),
            NativeHandle::Cell(cell) if key == CELL_VALUE_KEY => cell.get(),
            _ => return Err(GlueError::NotAnObject(target)),
        };
        let native = to_native(value, &ElementType::of(&current), &lock(&self.registry))?;

        if self.tokens.mirror_write(target, key, &native) {
            debug!(session = %target, key, "mirror echo of native write absorbed");
            return Ok(MirrorReply::new(MirrorOutcome::Echo));
        }
        if native == current {
            self.tokens.abandon(target, key);
            return Ok(MirrorReply::new(MirrorOutcome::Applied));
        }

        let (glue, fresh) = self.wrap_fresh(&native)?;
        match &handle {
            NativeHandle::Object(object) => object.set(key, native),
            NativeHandle::Cell(cell) => cell.set(native),
            _ => return Err(GlueError::NotAnObject(target)),
        }
        self.graph.set_property(target, key, glue.clone())?;
        debug!(session = %target, key, "applied mirror property write");

        let patch = if fresh {
            let mut updates = Updates::default();
            updates.push(Update::Property {
                target,
                key: key.to_string(),
                value: glue,
            });
            self.seal(updates)?
        } else {
            None
        };
        Ok(MirrorReply {
            outcome: MirrorOutcome::Applied,
            patch,
        })
    }

    /// Apply a mirror array op planned against the graph's copy.
    ///
    /// The mirror already applied the op to that copy. Native may be ahead
    /// of it, so the steps are rebased onto the live list under its lock and
    /// the reply carries whatever the mirror still misses.
    fn array_op(&mut self, target: SessionId, op: &MirrorArrayOp) -> GlueResult<MirrorReply> {
        let list = match self.lookup(target)? {
            NativeHandle::List(list) => list,
            _ => return Err(GlueError::NotACollection(target)),
        };

        let view = self.graph.items(target)?.to_vec();
        let steps = match self.plan_steps(&list, op, view.len()) {
            Ok(steps) => steps,
            Err(err) => return self.reject_array(target, op, err),
        };
        if steps.is_empty() {
            return Ok(MirrorReply::new(MirrorOutcome::Applied));
        }
        let applied = {
            let registry = lock(&self.registry);
            list.edit_with(|items| {
                let native: Vec<Option<GlueRef>> =
                    items.iter().map(|item| identity(&registry, item)).collect();
                rebase(&view, &native, &steps)
            })
        };
        let applied = match applied {
            Ok(applied) => applied,
            Err(err) => return self.reject_array(target, op, err),
        };
        if !applied.changes.is_empty() {
            self.tokens.expect_echo(target, applied.changes.clone());
        }

        let (edits, fresh) = {
            let mut registry = lock(&self.registry);
            let mut builder = GlueBuilder::new(&mut self.graph, &mut registry)
                .with_observer(self.observer.clone());
            let edits = steps
                .iter()
                .map(|step| {
                    Ok(match step {
                        Step::Insert { index, value } => CollectionEdit::Add {
                            index: *index,
                            value: builder.wrap(value)?,
                        },
                        Step::RemoveAt { index } => CollectionEdit::Remove { index: *index },
                        Step::Move { from, to } => CollectionEdit::Move {
                            from: *from,
                            to: *to,
                        },
                    })
                })
                .collect::<GlueResult<Vec<_>>>()?;
            (edits, builder.expanded().to_vec())
        };
        self.graph.apply_edits(target, &edits)?;
        debug!(
            session = %target,
            op = op.name(),
            revision = applied.revision,
            "applied mirror array op"
        );

        // Values built mirror-side learn their ids through a replace
        let replacements: Vec<CollectionEdit> = edits
            .iter()
            .filter_map(|edit| match edit {
                CollectionEdit::Add { index, value }
                    if value.session_id().map_or(false, |id| fresh.contains(&id)) =>
                {
                    Some(CollectionEdit::Replace {
                        index: *index,
                        value: value.clone(),
                    })
                }
                _ => None,
            })
            .collect();

        let mut updates = Updates::default();
        updates.edits(target, replacements);
        self.reconcile(target, &applied.snapshot, &mut updates)?;
        self.graph.set_revision(target, applied.revision)?;
        Ok(MirrorReply {
            outcome: MirrorOutcome::Applied,
            patch: self.seal(updates)?,
        })
    }

    fn plan_steps(
        &self,
        list: &NativeList,
        op: &MirrorArrayOp,
        len: usize,
    ) -> GlueResult<Vec<Step>> {
        let registry = lock(&self.registry);
        plan_array_op(op, len)
            .into_iter()
            .map(|step| {
                Ok(match step {
                    ListOp::Insert { index, value } => Step::Insert {
                        index,
                        value: to_native(&value, list.element_type(), &registry)?,
                    },
                    ListOp::RemoveAt { index } => Step::RemoveAt { index },
                    ListOp::Move { from, to } => Step::Move { from, to },
                })
            })
            .collect()
    }

    /// Leave native untouched and reset the mirror's optimistic copy
    fn reject_array(
        &mut self,
        target: SessionId,
        op: &MirrorArrayOp,
        err: GlueError,
    ) -> GlueResult<MirrorReply> {
        warn!(session = %target, op = op.name(), error = %err, "rejected mirror array op");
        let items = self.graph.items(target)?.to_vec();
        let mut updates = Updates::default();
        updates.edits(target, vec![CollectionEdit::Reset { items }]);
        Ok(MirrorReply {
            outcome: MirrorOutcome::Rejected(err),
            patch: self.seal(updates)?,
        })
    }

    fn invoke_command(&mut self, target: SessionId, args: &[MirrorValue]) -> GlueResult<Value> {
        let command = match self.lookup(target)? {
            NativeHandle::Command(command) => command,
            _ => return Err(GlueError::NotACommand(target)),
        };
        let args = {
            let registry = lock(&self.registry);
            args.iter()
                .map(|arg| to_native(arg, &ElementType::Any, &registry))
                .collect::<GlueResult<Vec<_>>>()?
        };

        let result = command
            .execute(&args)
            .map_err(|reason| GlueError::CommandFailed(target, reason))?;
        let result = self.wrap(&result)?;
        if let Some(id) = result.session_id() {
            self.pinned.insert(id);
        }
        let serialized = self.serializer().serialize(&result, &self.visited)?;
        self.visited.commit(serialized.expanded);
        debug!(session = %target, "command executed for mirror");
        Ok(serialized.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::EventQueue;
    use crate::token::PropagationState;
    use serde_json::json;
    use std::sync::Arc;
    use tether_glue::{NativeCell, NativeCommand, NativeObject};

    fn tagged(items: &[&str]) -> (Arc<NativeObject>, Arc<NativeList>) {
        let list = NativeList::with_items(
            ElementType::String,
            items.iter().map(|s| NativeValue::from(*s)).collect(),
        );
        let root = NativeObject::with_properties("Root", [("Tags", NativeValue::List(list.clone()))]);
        (root, list)
    }

    fn strings(list: &NativeList) -> Vec<String> {
        list.snapshot()
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect()
    }

    fn glue_strings(items: &[&str]) -> Vec<GlueRef> {
        items.iter().map(|s| GlueRef::string(*s)).collect()
    }

    fn array(engine: &mut SyncEngine, op: MirrorArrayOp) -> MirrorReply {
        engine
            .process_mirror(MirrorRequest::Array {
                target: SessionId(2),
                op,
            })
            .unwrap()
    }

    fn engine() -> (SyncEngine, Arc<EventQueue>) {
        let queue = EventQueue::new();
        (SyncEngine::new(SyncConfig::default(), queue.clone()), queue)
    }

    fn person(name: &str) -> Arc<NativeObject> {
        NativeObject::with_properties("Person", [("Name", NativeValue::from(name))])
    }

    #[test]
    fn test_bind_describes_whole_graph() {
        let (mut engine, _) = engine();
        let ann = person("Ann");
        ann.define("Self", NativeValue::Object(ann.clone()));

        let envelope = engine.bind(&ann.into()).unwrap();
        assert_eq!(
            envelope.render(),
            r#"apply({"version":3,"__id__":1,"Name":"Ann","Self":{"__ref__":1}})"#
        );
        assert!(engine.visited().contains(SessionId(1)));
        engine.verify().unwrap();
    }

    #[test]
    fn test_property_change_becomes_patch() {
        let (mut engine, queue) = engine();
        let ann = person("Ann");
        engine.bind(&ann.clone().into()).unwrap();

        ann.set("Name", "Anna".into());
        let patch = engine.process_native(queue.drain()).unwrap().unwrap();
        assert_eq!(patch.seq, 1);
        assert_eq!(
            patch.payload(),
            json!({"seq": 1, "updates": [{"target": 1, "property": "Name", "value": "Anna"}]})
        );
        assert!(matches!(
            engine.tokens().state(SessionId(1), "Name"),
            PropagationState::PropagatingOut { seq: 1, .. }
        ));
    }

    #[test]
    fn test_tick_coalesces_events() {
        let (mut engine, queue) = engine();
        let ann = person("Ann");
        engine.bind(&ann.clone().into()).unwrap();

        ann.set("Name", "B".into());
        ann.set("Name", "C".into());
        ann.set("Age", 30i64.into());
        let patch = engine.process_native(queue.drain()).unwrap().unwrap();
        assert_eq!(patch.updates.len(), 3);
        assert_eq!(engine.seq(), 1);
    }

    #[test]
    fn test_new_object_expanded_once_then_referenced() {
        let (mut engine, queue) = engine();
        let ann = person("Ann");
        engine.bind(&ann.clone().into()).unwrap();

        let bob = person("Bob");
        ann.set("Friend", NativeValue::Object(bob.clone()));
        ann.set("BestFriend", NativeValue::Object(bob));
        let patch = engine.process_native(queue.drain()).unwrap().unwrap();

        assert_eq!(
            patch.updates[0],
            json!({"target": 1, "property": "Friend", "value": {"version": 3, "__id__": 2, "Name": "Bob"}})
        );
        assert_eq!(
            patch.updates[1],
            json!({"target": 1, "property": "BestFriend", "value": {"__ref__": 2}})
        );
    }

    #[test]
    fn test_mirror_echo_does_not_write_native() {
        let (mut engine, queue) = engine();
        let ann = person("Ann");
        engine.bind(&ann.clone().into()).unwrap();

        ann.set("Name", "Bob".into());
        engine.process_native(queue.drain()).unwrap();

        let reply = engine
            .process_mirror(MirrorRequest::SetProperty {
                target: SessionId(1),
                key: "Name".into(),
                value: MirrorValue::string("Bob"),
            })
            .unwrap();
        assert_eq!(reply.outcome, MirrorOutcome::Echo);
        assert!(queue.is_empty());
        assert_eq!(engine.tokens().state(SessionId(1), "Name"), PropagationState::Idle);
    }

    #[test]
    fn test_mirror_write_and_native_echo() {
        let (mut engine, queue) = engine();
        let ann = person("Ann");
        engine.bind(&ann.clone().into()).unwrap();

        let reply = engine
            .process_mirror(MirrorRequest::SetProperty {
                target: SessionId(1),
                key: "Name".into(),
                value: MirrorValue::string("Eve"),
            })
            .unwrap();
        assert_eq!(reply.outcome, MirrorOutcome::Applied);
        assert_eq!(ann.get("Name"), Some(NativeValue::from("Eve")));

        // The native notification for that write is not sent back
        assert_eq!(queue.len(), 1);
        assert_eq!(engine.process_native(queue.drain()).unwrap(), None);
        assert!(engine.tokens().is_empty());
    }

    #[test]
    fn test_mirror_write_with_wrong_type_is_rejected() {
        let (mut engine, queue) = engine();
        let ann = NativeObject::with_properties("Person", [("Age", NativeValue::Int(30))]);
        engine.bind(&ann.clone().into()).unwrap();

        let reply = engine
            .process_mirror(MirrorRequest::SetProperty {
                target: SessionId(1),
                key: "Age".into(),
                value: MirrorValue::string("old"),
            })
            .unwrap();
        assert!(matches!(reply.outcome, MirrorOutcome::Rejected(GlueError::TypeMismatch { .. })));
        assert_eq!(ann.get("Age"), Some(NativeValue::Int(30)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_unknown_session_is_rejected() {
        let (mut engine, _) = engine();
        engine.bind(&person("Ann").into()).unwrap();

        let reply = engine
            .process_mirror(MirrorRequest::Array {
                target: SessionId(42),
                op: MirrorArrayOp::Pop,
            })
            .unwrap();
        assert_eq!(
            reply.outcome,
            MirrorOutcome::Rejected(GlueError::UnknownSession(SessionId(42)))
        );
    }

    #[test]
    fn test_command_round_trip() {
        let (mut engine, _) = engine();
        let greet = NativeCommand::with_result(|args| match args.first() {
            Some(NativeValue::String(name)) => Ok(format!("Hello {}", name).into()),
            _ => Err("missing name".to_string()),
        });
        let root = NativeObject::with_properties("Root", [("Greet", NativeValue::Command(greet))]);
        engine.bind(&root.into()).unwrap();

        let value = engine.invoke(SessionId(2), &[MirrorValue::string("Ann")]).unwrap();
        assert_eq!(value, json!("Hello Ann"));

        let err = engine.invoke(SessionId(2), &[]).unwrap_err();
        assert_eq!(err, GlueError::CommandFailed(SessionId(2), "missing name".into()));
    }

    #[test]
    fn test_command_state_propagates() {
        let (mut engine, queue) = engine();
        let save = NativeCommand::new(|_| Ok(()));
        let root = NativeObject::with_properties("Root", [("Save", NativeValue::Command(save.clone()))]);
        engine.bind(&root.into()).unwrap();

        save.set_can_execute(false);
        let patch = engine.process_native(queue.drain()).unwrap().unwrap();
        assert_eq!(patch.updates, vec![json!({"target": 2, "canExecute": false})]);

        let reply = engine
            .process_mirror(MirrorRequest::InvokeCommand {
                target: SessionId(2),
                args: Vec::new(),
            })
            .unwrap();
        assert!(matches!(reply.outcome, MirrorOutcome::Rejected(GlueError::CommandFailed(..))));
    }

    #[test]
    fn test_unreachable_nodes_are_detached() {
        let (mut engine, queue) = engine();
        let ann = person("Ann");
        let bob = person("Bob");
        ann.define("Friend", NativeValue::Object(bob.clone()));
        engine.bind(&ann.clone().into()).unwrap();
        assert_eq!(engine.graph().len(), 2);

        ann.set("Friend", NativeValue::Null);
        engine.process_native(queue.drain()).unwrap();

        assert_eq!(engine.graph().len(), 1);
        assert_eq!(engine.session_of(&NativeValue::Object(bob.clone())), None);
        assert!(!NativeHandle::Object(bob).is_observed());
        engine.verify().unwrap();
    }

    #[test]
    fn test_acknowledge_retires_tokens() {
        let (mut engine, queue) = engine();
        let ann = person("Ann");
        engine.bind(&ann.clone().into()).unwrap();
        ann.set("Name", "Bob".into());
        engine.process_native(queue.drain()).unwrap();

        let reply = engine
            .process_mirror(MirrorRequest::Acknowledge { seq: 1 })
            .unwrap();
        assert_eq!(reply.outcome, MirrorOutcome::Acknowledged(1));
        assert!(engine.tokens().is_empty());
    }

    #[test]
    fn test_teardown_releases_everything() {
        let (mut engine, _) = engine();
        let ann = person("Ann");
        engine.bind(&ann.clone().into()).unwrap();

        engine.teardown();
        assert!(engine.graph().is_empty());
        assert!(engine.visited().is_empty());
        assert!(!NativeHandle::Object(ann).is_observed());
    }

    #[test]
    fn test_native_invocation_is_announced() {
        let (mut engine, queue) = engine();
        let save = NativeCommand::new(|_| Ok(()));
        let root = NativeObject::with_properties("Root", [("Save", NativeValue::Command(save.clone()))]);
        engine.bind(&root.into()).unwrap();

        save.notify_invoked(vec!["draft".into()]);
        let patch = engine.process_native(queue.drain()).unwrap().unwrap();
        assert_eq!(patch.updates, vec![json!({"target": 2, "invoked": ["draft"]})]);
    }

    #[test]
    fn test_mirror_writes_list_item_value() {
        let (mut engine, queue) = engine();
        let cell = NativeCell::new(NativeValue::Int(4));
        let root = NativeObject::with_properties("Root", [("Selected", NativeValue::Cell(cell.clone()))]);
        engine.bind(&root.into()).unwrap();

        let reply = engine
            .process_mirror(MirrorRequest::SetProperty {
                target: SessionId(2),
                key: CELL_VALUE_KEY.into(),
                value: MirrorValue::Number(5.0),
            })
            .unwrap();
        assert_eq!(reply.outcome, MirrorOutcome::Applied);
        assert_eq!(cell.get(), NativeValue::Int(5));
        assert_eq!(engine.process_native(queue.drain()).unwrap(), None);
    }

    #[test]
    fn test_mirror_pop_while_native_push_is_queued() {
        let (mut engine, queue) = engine();
        let (root, tags) = tagged(&["a", "b"]);
        engine.bind(&root.into()).unwrap();

        tags.push("c".into()).unwrap();
        let reply = array(&mut engine, MirrorArrayOp::Pop);

        // "b" is what the mirror popped; "c" reaches the mirror in the reply
        assert_eq!(reply.outcome, MirrorOutcome::Applied);
        assert!(reply.patch.is_some());
        assert_eq!(strings(&tags), ["a", "c"]);
        assert_eq!(engine.graph().items(SessionId(2)).unwrap(), glue_strings(&["a", "c"]));

        assert_eq!(engine.process_native(queue.drain()).unwrap(), None);
        assert!(engine.tokens().is_empty());
        engine.verify().unwrap();
    }

    #[test]
    fn test_mirror_shift_while_native_insert_is_queued() {
        let (mut engine, queue) = engine();
        let (root, tags) = tagged(&["a", "b", "c"]);
        engine.bind(&root.into()).unwrap();

        tags.insert(0, "x".into()).unwrap();
        let reply = array(&mut engine, MirrorArrayOp::Shift);

        assert_eq!(reply.outcome, MirrorOutcome::Applied);
        assert_eq!(strings(&tags), ["x", "b", "c"]);
        assert_eq!(
            engine.graph().items(SessionId(2)).unwrap(),
            glue_strings(&["x", "b", "c"])
        );
        assert_eq!(engine.process_native(queue.drain()).unwrap(), None);
        engine.verify().unwrap();
    }

    #[test]
    fn test_mirror_push_of_wrong_type_leaves_native_untouched() {
        let (mut engine, queue) = engine();
        let (root, tags) = tagged(&["a"]);
        engine.bind(&root.into()).unwrap();

        let reply = array(&mut engine, MirrorArrayOp::Push(vec![MirrorValue::Number(1.0)]));
        assert!(matches!(reply.outcome, MirrorOutcome::Rejected(GlueError::TypeMismatch { .. })));
        assert_eq!(strings(&tags), ["a"]);
        assert!(queue.is_empty());
        assert_eq!(tags.revision(), 0);
    }

    #[test]
    fn test_batches_older_than_the_graph_are_skipped() {
        let (mut engine, queue) = engine();
        let (root, tags) = tagged(&["a"]);
        engine.bind(&root.into()).unwrap();

        tags.push("b".into()).unwrap();
        tags.remove_at(0).unwrap();
        array(&mut engine, MirrorArrayOp::Push(vec![MirrorValue::string("c")]));
        assert_eq!(strings(&tags), ["b", "c"]);

        assert_eq!(engine.process_native(queue.drain()).unwrap(), None);
        assert_eq!(engine.graph().revision(SessionId(2)).unwrap(), 3);
        assert_eq!(engine.graph().items(SessionId(2)).unwrap(), glue_strings(&["b", "c"]));
    }

    #[test]
    fn test_command_result_outlives_reply_until_acknowledge() {
        let (mut engine, _) = engine();
        let create = NativeCommand::with_result(|_| Ok(NativeValue::Object(person("Eve"))));
        let root = NativeObject::with_properties("Root", [("Create", NativeValue::Command(create))]);
        engine.bind(&root.into()).unwrap();

        let reply = engine
            .process_mirror(MirrorRequest::InvokeCommand {
                target: SessionId(2),
                args: Vec::new(),
            })
            .unwrap();
        let value = match reply.outcome {
            MirrorOutcome::Returned(value) => value,
            other => panic!("Expected Returned, got {:?}", other),
        };
        assert_eq!(value["__id__"], json!(3));

        let reply = engine
            .process_mirror(MirrorRequest::SetProperty {
                target: SessionId(3),
                key: "Name".into(),
                value: MirrorValue::string("Zoe"),
            })
            .unwrap();
        assert_eq!(reply.outcome, MirrorOutcome::Applied);
        assert!(engine.graph().contains(SessionId(3)));
        engine.verify().unwrap();

        let seq = engine.seq();
        engine.process_mirror(MirrorRequest::Acknowledge { seq }).unwrap();
        assert!(!engine.graph().contains(SessionId(3)));
        engine.verify().unwrap();
    }
}
