//! # Native Data Model
//!
//! The native side of the synchronized pair: observable objects, lists,
//! commands and list-item cells. Every reference value carries a
//! [`NativeId`] for its whole lifetime.
//!
//! Mutators publish [`NativeEvent`]s to the installed [`ChangeObserver`]
//! after the data lock is released, so an observer may read the value it
//! is told about without deadlocking.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tether_common::{GlueError, GlueResult, NativeId};

/// Property key under which a [`NativeCell`] reports its value
pub const CELL_VALUE_KEY: &str = "value";

/// Receiver of native change notifications
pub trait ChangeObserver: Send + Sync {
    fn notify(&self, event: NativeEvent);
}

pub type SharedObserver = Arc<dyn ChangeObserver>;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct ObserverSlot(RwLock<Option<SharedObserver>>);

impl ObserverSlot {
    fn set(&self, observer: Option<SharedObserver>) {
        *write(&self.0) = observer;
    }

    fn is_set(&self) -> bool {
        read(&self.0).is_some()
    }

    fn publish(&self, event: NativeEvent) {
        let observer = read(&self.0).clone();
        if let Some(observer) = observer {
            observer.notify(event);
        }
    }
}

/// Declared element type of a native list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
    Any,
    Bool,
    Int,
    Float,
    String,
    Date,
    /// Object of the named type
    Object(String),
    List,
    Command,
}

impl ElementType {
    pub fn accepts(&self, value: &NativeValue) -> bool {
        match (self, value) {
            (ElementType::Any, _) => true,
            (ElementType::Bool, NativeValue::Bool(_)) => true,
            (ElementType::Int, NativeValue::Int(_)) => true,
            (ElementType::Float, NativeValue::Float(_)) => true,
            (ElementType::String, NativeValue::String(_) | NativeValue::Null) => true,
            (ElementType::Date, NativeValue::Date(_) | NativeValue::Null) => true,
            (ElementType::Object(_), NativeValue::Null) => true,
            (ElementType::Object(name), NativeValue::Object(obj)) => obj.type_name() == name,
            (ElementType::List, NativeValue::List(_)) => true,
            (ElementType::Command, NativeValue::Command(_)) => true,
            _ => false,
        }
    }

    pub fn name(&self) -> String {
        match self {
            ElementType::Any => "Any".to_string(),
            ElementType::Bool => "Bool".to_string(),
            ElementType::Int => "Int".to_string(),
            ElementType::Float => "Float".to_string(),
            ElementType::String => "String".to_string(),
            ElementType::Date => "Date".to_string(),
            ElementType::Object(name) => name.clone(),
            ElementType::List => "List".to_string(),
            ElementType::Command => "Command".to_string(),
        }
    }

    /// Best element type for an existing value (used for property writes)
    pub fn of(value: &NativeValue) -> Self {
        match value {
            NativeValue::Null | NativeValue::Opaque(_) => ElementType::Any,
            NativeValue::Bool(_) => ElementType::Bool,
            NativeValue::Int(_) => ElementType::Int,
            NativeValue::Float(_) => ElementType::Float,
            NativeValue::String(_) => ElementType::String,
            NativeValue::Date(_) => ElementType::Date,
            NativeValue::Object(obj) => ElementType::Object(obj.type_name().to_string()),
            NativeValue::List(_) => ElementType::List,
            NativeValue::Command(_) => ElementType::Command,
            NativeValue::Cell(_) => ElementType::Any,
        }
    }
}

/// A native value as seen by the glue layer
#[derive(Clone)]
pub enum NativeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    Object(Arc<NativeObject>),
    List(Arc<NativeList>),
    Command(Arc<NativeCommand>),
    Cell(Arc<NativeCell>),
    /// A runtime type with no glue representation
    Opaque(String),
}

impl NativeValue {
    pub fn string(s: impl Into<String>) -> Self {
        NativeValue::String(s.into())
    }

    pub fn type_name(&self) -> String {
        match self {
            NativeValue::Null => "Null".to_string(),
            NativeValue::Bool(_) => "Bool".to_string(),
            NativeValue::Int(_) => "Int".to_string(),
            NativeValue::Float(_) => "Float".to_string(),
            NativeValue::String(_) => "String".to_string(),
            NativeValue::Date(_) => "Date".to_string(),
            NativeValue::Object(obj) => obj.type_name().to_string(),
            NativeValue::List(_) => "List".to_string(),
            NativeValue::Command(_) => "Command".to_string(),
            NativeValue::Cell(_) => "Cell".to_string(),
            NativeValue::Opaque(name) => name.clone(),
        }
    }

    /// Reference identity, if this value has one
    pub fn handle(&self) -> Option<NativeHandle> {
        match self {
            NativeValue::Object(o) => Some(NativeHandle::Object(o.clone())),
            NativeValue::List(l) => Some(NativeHandle::List(l.clone())),
            NativeValue::Command(c) => Some(NativeHandle::Command(c.clone())),
            NativeValue::Cell(c) => Some(NativeHandle::Cell(c.clone())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Scalars compare by value, references by identity
impl PartialEq for NativeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NativeValue::Null, NativeValue::Null) => true,
            (NativeValue::Bool(a), NativeValue::Bool(b)) => a == b,
            (NativeValue::Int(a), NativeValue::Int(b)) => a == b,
            (NativeValue::Float(a), NativeValue::Float(b)) => a == b,
            (NativeValue::String(a), NativeValue::String(b)) => a == b,
            (NativeValue::Date(a), NativeValue::Date(b)) => a == b,
            (NativeValue::Opaque(a), NativeValue::Opaque(b)) => a == b,
            (a, b) => match (a.handle(), b.handle()) {
                (Some(a), Some(b)) => a.native_id() == b.native_id(),
                _ => false,
            },
        }
    }
}

impl fmt::Debug for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeValue::Null => write!(f, "Null"),
            NativeValue::Bool(b) => write!(f, "Bool({})", b),
            NativeValue::Int(i) => write!(f, "Int({})", i),
            NativeValue::Float(x) => write!(f, "Float({})", x),
            NativeValue::String(s) => write!(f, "String({:?})", s),
            NativeValue::Date(d) => write!(f, "Date({})", d.to_rfc3339()),
            NativeValue::Opaque(name) => write!(f, "Opaque({})", name),
            other => match other.handle() {
                Some(handle) => write!(f, "{:?}", handle),
                None => write!(f, "?"),
            },
        }
    }
}

impl From<bool> for NativeValue {
    fn from(b: bool) -> Self {
        NativeValue::Bool(b)
    }
}

impl From<i64> for NativeValue {
    fn from(i: i64) -> Self {
        NativeValue::Int(i)
    }
}

impl From<f64> for NativeValue {
    fn from(x: f64) -> Self {
        NativeValue::Float(x)
    }
}

impl From<&str> for NativeValue {
    fn from(s: &str) -> Self {
        NativeValue::String(s.to_string())
    }
}

impl From<String> for NativeValue {
    fn from(s: String) -> Self {
        NativeValue::String(s)
    }
}

impl From<Arc<NativeObject>> for NativeValue {
    fn from(o: Arc<NativeObject>) -> Self {
        NativeValue::Object(o)
    }
}

impl From<Arc<NativeList>> for NativeValue {
    fn from(l: Arc<NativeList>) -> Self {
        NativeValue::List(l)
    }
}

impl From<Arc<NativeCommand>> for NativeValue {
    fn from(c: Arc<NativeCommand>) -> Self {
        NativeValue::Command(c)
    }
}

impl From<Arc<NativeCell>> for NativeValue {
    fn from(c: Arc<NativeCell>) -> Self {
        NativeValue::Cell(c)
    }
}

/// A native value that has reference identity
#[derive(Clone)]
pub enum NativeHandle {
    Object(Arc<NativeObject>),
    List(Arc<NativeList>),
    Command(Arc<NativeCommand>),
    Cell(Arc<NativeCell>),
}

impl NativeHandle {
    pub fn native_id(&self) -> NativeId {
        match self {
            NativeHandle::Object(o) => o.id(),
            NativeHandle::List(l) => l.id(),
            NativeHandle::Command(c) => c.id(),
            NativeHandle::Cell(c) => c.id(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            NativeHandle::Object(_) => "Object",
            NativeHandle::List(_) => "List",
            NativeHandle::Command(_) => "Command",
            NativeHandle::Cell(_) => "Cell",
        }
    }

    pub fn to_value(&self) -> NativeValue {
        match self {
            NativeHandle::Object(o) => NativeValue::Object(o.clone()),
            NativeHandle::List(l) => NativeValue::List(l.clone()),
            NativeHandle::Command(c) => NativeValue::Command(c.clone()),
            NativeHandle::Cell(c) => NativeValue::Cell(c.clone()),
        }
    }

    /// Install (or clear) the change observer of this reference
    pub fn set_observer(&self, observer: Option<SharedObserver>) {
        match self {
            NativeHandle::Object(o) => o.observer.set(observer),
            NativeHandle::List(l) => l.observer.set(observer),
            NativeHandle::Command(c) => c.observer.set(observer),
            NativeHandle::Cell(c) => c.observer.set(observer),
        }
    }

    pub fn is_observed(&self) -> bool {
        match self {
            NativeHandle::Object(o) => o.observer.is_set(),
            NativeHandle::List(l) => l.observer.is_set(),
            NativeHandle::Command(c) => c.observer.is_set(),
            NativeHandle::Cell(c) => c.observer.is_set(),
        }
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeHandle::Object(o) => write!(f, "Object({} {})", o.type_name(), o.id()),
            other => write!(f, "{}({})", other.kind_name(), other.native_id()),
        }
    }
}

impl PartialEq for NativeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.native_id() == other.native_id()
    }
}

/// Observable property bag
pub struct NativeObject {
    id: NativeId,
    type_name: String,
    properties: RwLock<IndexMap<String, NativeValue>>,
    observer: ObserverSlot,
}

impl NativeObject {
    pub fn new(type_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: NativeId::fresh(),
            type_name: type_name.into(),
            properties: RwLock::new(IndexMap::new()),
            observer: ObserverSlot::default(),
        })
    }

    pub fn with_properties<K, I>(type_name: impl Into<String>, properties: I) -> Arc<Self>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, NativeValue)>,
    {
        let object = Self::new(type_name);
        {
            let mut props = write(&object.properties);
            for (key, value) in properties {
                props.insert(key.into(), value);
            }
        }
        object
    }

    pub fn id(&self) -> NativeId {
        self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get(&self, key: &str) -> Option<NativeValue> {
        read(&self.properties).get(key).cloned()
    }

    /// Properties in declaration order
    pub fn properties(&self) -> Vec<(String, NativeValue)> {
        read(&self.properties)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Declare a property without publishing a change
    pub fn define(&self, key: impl Into<String>, value: NativeValue) {
        write(&self.properties).insert(key.into(), value);
    }

    /// Write a property, publishing `PropertyChanged` when the value changes
    pub fn set(self: &Arc<Self>, key: impl Into<String>, value: NativeValue) {
        let key = key.into();
        let changed = {
            let mut props = write(&self.properties);
            let changed = props.get(&key) != Some(&value);
            props.insert(key.clone(), value.clone());
            changed
        };
        if changed {
            self.observer.publish(NativeEvent::PropertyChanged {
                owner: NativeHandle::Object(self.clone()),
                key,
                value,
            });
        }
    }
}

impl fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeObject")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// One granular mutation of a native list
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCollectionChange {
    Add { index: usize, value: NativeValue },
    Remove { index: usize },
    Replace { index: usize, value: NativeValue },
    Move { from: usize, to: usize },
    Clear,
}

impl NativeCollectionChange {
    fn apply(&self, items: &mut Vec<NativeValue>, element_type: &ElementType) -> GlueResult<()> {
        let check = |value: &NativeValue| -> GlueResult<()> {
            if element_type.accepts(value) {
                Ok(())
            } else {
                Err(GlueError::type_mismatch(element_type.name(), value.type_name()))
            }
        };
        let out_of_range = |index: usize, len: usize| GlueError::EditOutOfRange { index, len };

        match self {
            NativeCollectionChange::Add { index, value } => {
                check(value)?;
                if *index > items.len() {
                    return Err(out_of_range(*index, items.len()));
                }
                items.insert(*index, value.clone());
            }
            NativeCollectionChange::Remove { index } => {
                if *index >= items.len() {
                    return Err(out_of_range(*index, items.len()));
                }
                items.remove(*index);
            }
            NativeCollectionChange::Replace { index, value } => {
                check(value)?;
                let len = items.len();
                let slot = items.get_mut(*index).ok_or_else(|| out_of_range(*index, len))?;
                *slot = value.clone();
            }
            NativeCollectionChange::Move { from, to } => {
                let len = items.len();
                if *from >= len || *to >= len {
                    return Err(out_of_range((*from).max(*to), len));
                }
                let item = items.remove(*from);
                items.insert(*to, item);
            }
            NativeCollectionChange::Clear => items.clear(),
        }
        Ok(())
    }
}

/// Observable ordered sequence with a declared element type
pub struct NativeList {
    id: NativeId,
    element_type: ElementType,
    items: RwLock<Vec<NativeValue>>,
    /// Bumped under the write lock by every applied batch
    revision: AtomicU64,
    observer: ObserverSlot,
}

/// Outcome of [`NativeList::edit_with`]
#[derive(Debug, Clone, PartialEq)]
pub struct ListEdit {
    pub changes: Vec<NativeCollectionChange>,
    /// Revision of the list once `changes` applied
    pub revision: u64,
    pub snapshot: Vec<NativeValue>,
}

impl NativeList {
    pub fn new(element_type: ElementType) -> Arc<Self> {
        Self::with_items(element_type, Vec::new())
    }

    pub fn with_items(element_type: ElementType, items: Vec<NativeValue>) -> Arc<Self> {
        Arc::new(Self {
            id: NativeId::fresh(),
            element_type,
            items: RwLock::new(items),
            revision: AtomicU64::new(0),
            observer: ObserverSlot::default(),
        })
    }

    pub fn id(&self) -> NativeId {
        self.id
    }

    pub fn element_type(&self) -> &ElementType {
        &self.element_type
    }

    pub fn len(&self) -> usize {
        read(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<NativeValue> {
        read(&self.items).get(index).cloned()
    }

    pub fn snapshot(&self) -> Vec<NativeValue> {
        read(&self.items).clone()
    }

    /// Number of batches applied so far
    pub fn revision(&self) -> u64 {
        let _items = read(&self.items);
        self.revision.load(Ordering::SeqCst)
    }

    /// Content together with the revision it belongs to
    pub fn revision_snapshot(&self) -> (u64, Vec<NativeValue>) {
        let items = read(&self.items);
        (self.revision.load(Ordering::SeqCst), items.clone())
    }

    /// Apply several changes atomically and publish them as one event.
    ///
    /// Either every change applies or the list is left untouched.
    pub fn edit(self: &Arc<Self>, changes: Vec<NativeCollectionChange>) -> GlueResult<()> {
        self.edit_with(move |_| Ok(changes)).map(|_| ())
    }

    /// Plan changes against the current content and apply them atomically.
    ///
    /// `plan` runs under the list's write lock, so no other mutation lands
    /// between reading the content and applying the changes. It must not
    /// touch this list. An empty plan publishes nothing and keeps the
    /// revision.
    pub fn edit_with<F>(self: &Arc<Self>, plan: F) -> GlueResult<ListEdit>
    where
        F: FnOnce(&[NativeValue]) -> GlueResult<Vec<NativeCollectionChange>>,
    {
        let edit = {
            let mut items = write(&self.items);
            let changes = plan(items.as_slice())?;
            if changes.is_empty() {
                return Ok(ListEdit {
                    changes,
                    revision: self.revision.load(Ordering::SeqCst),
                    snapshot: items.clone(),
                });
            }
            let mut staged = items.clone();
            for change in &changes {
                change.apply(&mut staged, &self.element_type)?;
            }
            *items = staged.clone();
            ListEdit {
                changes,
                revision: self.revision.fetch_add(1, Ordering::SeqCst) + 1,
                snapshot: staged,
            }
        };
        self.observer.publish(NativeEvent::CollectionChanged {
            list: self.clone(),
            changes: edit.changes.clone(),
            revision: edit.revision,
            snapshot: edit.snapshot.clone(),
        });
        Ok(edit)
    }

    pub fn push(self: &Arc<Self>, value: NativeValue) -> GlueResult<()> {
        self.edit_with(move |items| {
            Ok(vec![NativeCollectionChange::Add {
                index: items.len(),
                value,
            }])
        })
        .map(|_| ())
    }

    pub fn insert(self: &Arc<Self>, index: usize, value: NativeValue) -> GlueResult<()> {
        self.edit(vec![NativeCollectionChange::Add { index, value }])
    }

    pub fn remove_at(self: &Arc<Self>, index: usize) -> GlueResult<()> {
        self.edit(vec![NativeCollectionChange::Remove { index }])
    }

    pub fn replace(self: &Arc<Self>, index: usize, value: NativeValue) -> GlueResult<()> {
        self.edit(vec![NativeCollectionChange::Replace { index, value }])
    }

    pub fn move_item(self: &Arc<Self>, from: usize, to: usize) -> GlueResult<()> {
        self.edit(vec![NativeCollectionChange::Move { from, to }])
    }

    pub fn clear(self: &Arc<Self>) -> GlueResult<()> {
        self.edit(vec![NativeCollectionChange::Clear])
    }
}

impl fmt::Debug for NativeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeList")
            .field("id", &self.id)
            .field("element_type", &self.element_type)
            .field("len", &self.len())
            .finish()
    }
}

pub type CommandHandler = Arc<dyn Fn(&[NativeValue]) -> Result<NativeValue, String> + Send + Sync>;

/// Invocable native command
pub struct NativeCommand {
    id: NativeId,
    handler: CommandHandler,
    can_execute: AtomicBool,
    returns_value: bool,
    observer: ObserverSlot,
}

impl NativeCommand {
    /// Fire-and-forget command
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&[NativeValue]) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::build(
            Arc::new(move |args: &[NativeValue]| handler(args).map(|_| NativeValue::Null)),
            false,
        )
    }

    /// Round-trip command whose result is sent back to the caller
    pub fn with_result<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&[NativeValue]) -> Result<NativeValue, String> + Send + Sync + 'static,
    {
        Self::build(Arc::new(handler), true)
    }

    fn build(handler: CommandHandler, returns_value: bool) -> Arc<Self> {
        Arc::new(Self {
            id: NativeId::fresh(),
            handler,
            can_execute: AtomicBool::new(true),
            returns_value,
            observer: ObserverSlot::default(),
        })
    }

    pub fn id(&self) -> NativeId {
        self.id
    }

    pub fn returns_value(&self) -> bool {
        self.returns_value
    }

    pub fn can_execute(&self) -> bool {
        self.can_execute.load(Ordering::SeqCst)
    }

    pub fn set_can_execute(self: &Arc<Self>, can_execute: bool) {
        let previous = self.can_execute.swap(can_execute, Ordering::SeqCst);
        if previous != can_execute {
            self.observer.publish(NativeEvent::CommandChanged {
                command: self.clone(),
            });
        }
    }

    /// Run the handler. Fails when the command is disabled.
    pub fn execute(&self, args: &[NativeValue]) -> Result<NativeValue, String> {
        if !self.can_execute() {
            return Err("command cannot execute".to_string());
        }
        (self.handler)(args)
    }

    /// Announce a native-side invocation to observers
    pub fn notify_invoked(self: &Arc<Self>, args: Vec<NativeValue>) {
        self.observer.publish(NativeEvent::CommandInvoked {
            command: self.clone(),
            args,
        });
    }
}

impl fmt::Debug for NativeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCommand")
            .field("id", &self.id)
            .field("can_execute", &self.can_execute())
            .field("returns_value", &self.returns_value)
            .finish()
    }
}

/// Framework list-item wrapper: one value with its own identity
pub struct NativeCell {
    id: NativeId,
    value: RwLock<NativeValue>,
    observer: ObserverSlot,
}

impl NativeCell {
    pub fn new(value: NativeValue) -> Arc<Self> {
        Arc::new(Self {
            id: NativeId::fresh(),
            value: RwLock::new(value),
            observer: ObserverSlot::default(),
        })
    }

    pub fn id(&self) -> NativeId {
        self.id
    }

    pub fn get(&self) -> NativeValue {
        read(&self.value).clone()
    }

    pub fn set(self: &Arc<Self>, value: NativeValue) {
        let changed = {
            let mut slot = write(&self.value);
            let changed = *slot != value;
            *slot = value.clone();
            changed
        };
        if changed {
            self.observer.publish(NativeEvent::PropertyChanged {
                owner: NativeHandle::Cell(self.clone()),
                key: CELL_VALUE_KEY.to_string(),
                value,
            });
        }
    }
}

impl fmt::Debug for NativeCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCell").field("id", &self.id).finish()
    }
}

/// Change notification published by the native side
#[derive(Debug, Clone)]
pub enum NativeEvent {
    PropertyChanged {
        owner: NativeHandle,
        key: String,
        value: NativeValue,
    },
    /// `snapshot` is the list content right after `changes` applied, which
    /// made it `revision`
    CollectionChanged {
        list: Arc<NativeList>,
        changes: Vec<NativeCollectionChange>,
        revision: u64,
        snapshot: Vec<NativeValue>,
    },
    CommandInvoked {
        command: Arc<NativeCommand>,
        args: Vec<NativeValue>,
    },
    CommandChanged {
        command: Arc<NativeCommand>,
    },
    /// The referenced value is no longer reachable from the bound root
    Detached { handle: NativeHandle },
}
