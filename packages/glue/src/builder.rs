//! Wrapping native values into glue nodes.
//!
//! Wrapping a reference value assigns it a session id through the registry.
//! A reference that is already present in the graph comes back as the same
//! [`GlueRef::Node`] without being walked again, which is also what bounds
//! the walk on cyclic graphs: the placeholder node is inserted before its
//! children are visited.

use crate::native::{NativeHandle, NativeValue, SharedObserver};
use crate::node::{GlueGraph, GlueKind, GlueNode, GlueRef, ScalarValue};
use crate::registry::SessionRegistry;
use tether_common::{GlueResult, SessionId};
use tracing::warn;

pub struct GlueBuilder<'a> {
    graph: &'a mut GlueGraph,
    registry: &'a mut SessionRegistry,
    observer: Option<SharedObserver>,
    expanded: Vec<SessionId>,
}

impl<'a> GlueBuilder<'a> {
    pub fn new(graph: &'a mut GlueGraph, registry: &'a mut SessionRegistry) -> Self {
        Self {
            graph,
            registry,
            observer: None,
            expanded: Vec::new(),
        }
    }

    /// Subscribe every newly wrapped reference to `observer`
    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Ids of the nodes this builder added to the graph
    pub fn expanded(&self) -> &[SessionId] {
        &self.expanded
    }

    pub fn wrap(&mut self, value: &NativeValue) -> GlueResult<GlueRef> {
        let handle = match value {
            NativeValue::Null => return Ok(GlueRef::NULL),
            NativeValue::Bool(b) => return Ok(GlueRef::Value(ScalarValue::Bool(*b))),
            NativeValue::Int(i) => return Ok(GlueRef::Value(ScalarValue::Int(*i))),
            NativeValue::Float(x) => return Ok(GlueRef::Value(ScalarValue::Float(*x))),
            NativeValue::String(s) => return Ok(GlueRef::Value(ScalarValue::String(s.clone()))),
            NativeValue::Date(d) => return Ok(GlueRef::Date(*d)),
            NativeValue::Opaque(type_name) => {
                warn!(type_name = %type_name, "unmappable native type, mirrored as null");
                return Ok(GlueRef::NULL);
            }
            other => match other.handle() {
                Some(handle) => handle,
                None => return Ok(GlueRef::NULL),
            },
        };

        let assignment = self.registry.assign(&handle)?;
        if !assignment.fresh && self.graph.contains(assignment.id) {
            return Ok(GlueRef::Node(assignment.id));
        }
        self.expand(assignment.id, &handle)?;
        Ok(GlueRef::Node(assignment.id))
    }

    fn expand(&mut self, id: SessionId, handle: &NativeHandle) -> GlueResult<()> {
        if !self.graph.contains(id) {
            self.expanded.push(id);
            if let Some(observer) = &self.observer {
                handle.set_observer(Some(observer.clone()));
            }
        }

        let kind = match handle {
            NativeHandle::Object(object) => {
                self.graph.insert(GlueNode {
                    id,
                    kind: GlueKind::Object {
                        type_name: object.type_name().to_string(),
                        properties: Vec::new(),
                    },
                });
                let mut properties = Vec::new();
                for (key, value) in object.properties() {
                    properties.push((key, self.wrap(&value)?));
                }
                GlueKind::Object {
                    type_name: object.type_name().to_string(),
                    properties,
                }
            }
            NativeHandle::List(list) => {
                let (revision, snapshot) = list.revision_snapshot();
                self.graph.insert(GlueNode {
                    id,
                    kind: GlueKind::Collection {
                        element_type: list.element_type().clone(),
                        items: Vec::new(),
                        revision,
                    },
                });
                let items = snapshot
                    .iter()
                    .map(|item| self.wrap(item))
                    .collect::<GlueResult<Vec<_>>>()?;
                GlueKind::Collection {
                    element_type: list.element_type().clone(),
                    items,
                    revision,
                }
            }
            NativeHandle::Command(command) => GlueKind::Command {
                can_execute: command.can_execute(),
                returns_value: command.returns_value(),
            },
            NativeHandle::Cell(cell) => {
                self.graph.insert(GlueNode {
                    id,
                    kind: GlueKind::ListItem { item: GlueRef::NULL },
                });
                GlueKind::ListItem {
                    item: self.wrap(&cell.get())?,
                }
            }
        };

        self.graph.insert(GlueNode { id, kind });
        Ok(())
    }
}
