//! Loop prevention between the two directions
//!
//! This tests:
//! - A mirror echo of a native write never writes native again
//! - A native notification for a mirror write is never sent back
//! - Conflicting writes: the last direction to take the token wins

use tether_common::SessionId;
use tether_glue::{MirrorValue, NativeObject, NativeValue};
use tether_sync::{
    EventQueue, MirrorGraph, MirrorOutcome, MirrorRequest, PropagationState, SyncConfig,
    SyncEngine,
};

const PERSON: SessionId = SessionId(1);

#[test]
fn test_echoed_native_write_is_not_written_twice() {
    let queue = EventQueue::new();
    let mut engine = SyncEngine::new(SyncConfig::default(), queue.clone());
    let person = NativeObject::with_properties("Person", [("Name", NativeValue::from("Ann"))]);
    let mut mirror = MirrorGraph::new();
    mirror.receive(&engine.bind(&person.clone().into()).unwrap()).unwrap();

    person.set("Name", "Bob".into());
    let patch = engine.process_native(queue.drain()).unwrap().unwrap();
    mirror.apply_patch(&patch.payload()).unwrap();

    // A data-bound mirror writes the value it just received back
    let request = mirror
        .set_property(PERSON, "Name", MirrorValue::string("Bob"))
        .unwrap();
    let reply = engine.process_mirror(request).unwrap();

    assert_eq!(reply.outcome, MirrorOutcome::Echo);
    assert!(reply.patch.is_none());
    assert!(queue.is_empty());
    assert_eq!(person.get("Name"), Some(NativeValue::from("Bob")));
}

#[test]
fn test_mirror_write_is_not_reserialized() {
    let queue = EventQueue::new();
    let mut engine = SyncEngine::new(SyncConfig::default(), queue.clone());
    let person = NativeObject::with_properties("Person", [("Name", NativeValue::from("Ann"))]);
    engine.bind(&person.clone().into()).unwrap();

    let reply = engine
        .process_mirror(MirrorRequest::SetProperty {
            target: PERSON,
            key: "Name".into(),
            value: MirrorValue::string("Eve"),
        })
        .unwrap();
    assert_eq!(reply.outcome, MirrorOutcome::Applied);

    assert_eq!(engine.process_native(queue.drain()).unwrap(), None);
    assert_eq!(engine.seq(), 0);
}

#[test]
fn test_conflicting_writes_last_token_wins() {
    let queue = EventQueue::new();
    let mut engine = SyncEngine::new(SyncConfig::default(), queue.clone());
    let person = NativeObject::with_properties("Person", [("Name", NativeValue::from("Ann"))]);
    engine.bind(&person.clone().into()).unwrap();

    // Native sends Bob; before the mirror sees it, the mirror writes Eve
    person.set("Name", "Bob".into());
    engine.process_native(queue.drain()).unwrap();
    let reply = engine
        .process_mirror(MirrorRequest::SetProperty {
            target: PERSON,
            key: "Name".into(),
            value: MirrorValue::string("Eve"),
        })
        .unwrap();

    assert_eq!(reply.outcome, MirrorOutcome::Applied);
    assert_eq!(person.get("Name"), Some(NativeValue::from("Eve")));
    assert_eq!(
        engine.tokens().state(PERSON, "Name"),
        PropagationState::PropagatingIn {
            value: "Eve".into()
        }
    );

    // Its native notification is absorbed
    assert_eq!(engine.process_native(queue.drain()).unwrap(), None);
    assert_eq!(engine.tokens().state(PERSON, "Name"), PropagationState::Idle);
}

#[test]
fn test_fresh_object_written_from_mirror_gets_an_id() {
    let queue = EventQueue::new();
    let mut engine = SyncEngine::new(SyncConfig::default(), queue.clone());
    let person = NativeObject::with_properties("Person", [("Friend", NativeValue::Null)]);
    let mut mirror = MirrorGraph::new();
    mirror.receive(&engine.bind(&person.clone().into()).unwrap()).unwrap();

    let literal = MirrorValue::Object(vec![("Name".into(), MirrorValue::string("Kim"))]);
    let request = mirror.set_property(PERSON, "Friend", literal).unwrap();
    let reply = engine.process_mirror(request).unwrap();
    mirror.apply_patch(&reply.patch.unwrap().payload()).unwrap();

    let friend = person.get("Friend").unwrap();
    let id = engine.session_of(&friend).unwrap();
    assert_eq!(
        mirror.property(PERSON, "Friend").unwrap(),
        Some(&MirrorValue::Ref(id))
    );
    assert_eq!(
        mirror.property(id, "Name").unwrap(),
        Some(&MirrorValue::string("Kim"))
    );
    assert_eq!(engine.process_native(queue.drain()).unwrap(), None);
}
