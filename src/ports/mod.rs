// Capability seams for execgraph.
// The recorder consumes these; infrastructure provides implementations.

use crate::domain::ast::SyntaxNode;
use crate::domain::event::EventKind;
use crate::domain::graph::{Label, NodeDraft, NodeId, NodeRecord, Props, RelRecord, RelType};
use crate::error::{IntrospectError, LookupError, ParseError, StoreError};
use std::fmt;
use std::time::Duration;

/// One step reported by an instrumentation bridge.
pub trait ExecutionEvent {
    type Value: Clone;

    fn kind(&self) -> EventKind;
    fn path(&self) -> &str;
    fn line(&self) -> u32;
    /// Name of the executing method; empty when there is none.
    fn method_id(&self) -> &str;
    /// Name of the type the method is defined on; empty when there is none.
    fn defined_class(&self) -> &str;
    /// The acting entity, or `None` when it is the event's own representation.
    fn receiver(&self) -> Option<Self::Value>;
    /// Only return kinds carry a value.
    fn return_value(&self) -> Option<Self::Value>;
    /// Declared parameter names of the callee; only meaningful on call kinds.
    fn parameter_names(&self) -> Vec<String>;
    /// Looks a name up in the bindings of the frame the event was raised from.
    fn local_value(&self, name: &str) -> Result<Self::Value, LookupError>;
}

/// Switch for the event channel of a runtime.
pub trait InstrumentationBridge {
    fn enable(&self);
    fn disable(&self);
    fn is_enabled(&self) -> bool;
}

/// Scoped "tracing muted" state. Disables the bridge on creation and restores
/// the previous state on drop, including when unwinding.
pub struct Muted<'b, B: InstrumentationBridge + ?Sized> {
    bridge: &'b B,
    was_enabled: bool,
}

impl<'b, B: InstrumentationBridge + ?Sized> Muted<'b, B> {
    pub fn new(bridge: &'b B) -> Self {
        let was_enabled = bridge.is_enabled();
        if was_enabled {
            bridge.disable();
        }
        Self { bridge, was_enabled }
    }
}

impl<B: InstrumentationBridge + ?Sized> Drop for Muted<'_, B> {
    fn drop(&mut self) {
        if self.was_enabled {
            self.bridge.enable();
        }
    }
}

/// Session-scoped identity of a runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// What a value's own type is. Only exact matches count: an instance of a
/// subclass of the class archetype is `Instance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Archetype {
    Class,
    Module,
    Instance,
}

/// Reflection over runtime values.
pub trait Introspector {
    type Value: Clone;

    fn identity(&self, value: &Self::Value) -> ObjectId;
    fn represent(&self, value: &Self::Value, max_len: usize) -> Result<String, IntrospectError>;
    fn type_of(&self, value: &Self::Value) -> Self::Value;
    fn archetype(&self, value: &Self::Value) -> Archetype;

    /// `None` when the value has no superclass capability or no superclass.
    fn superclass_of(&self, _value: &Self::Value) -> Option<Self::Value> {
        None
    }

    /// Empty when the value has no included-module capability.
    fn included_capabilities_of(&self, _value: &Self::Value) -> Vec<Self::Value> {
        Vec::new()
    }

    fn instance_fields(&self, value: &Self::Value)
        -> Result<Vec<(String, Self::Value)>, IntrospectError>;
}

/// Source parser consumed by the AST importer and the line-variable capture.
pub trait SourceParser: Sync {
    fn parse(&self, text: &str) -> Result<SyntaxNode, ParseError>;

    /// Bare identifiers read by a single source line, in source order.
    fn referenced_identifiers(&self, line: &str) -> Result<Vec<String>, ParseError>;
}

/// Monotonic time source. Offsets are relative to an arbitrary origin.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Trait for graph storage backends.
/// Implementations must be thread-safe (Send + Sync).
pub trait GraphStore: Send + Sync {
    fn allocate_id(&self) -> Result<NodeId, StoreError>;
    /// Writes one batch. On error the caller still holds the records and may retry.
    fn write_batch(&self, nodes: &[NodeRecord], rels: &[RelRecord]) -> Result<(), StoreError>;
    fn node(&self, id: NodeId) -> Result<Option<NodeRecord>, StoreError>;
    fn find_by_key(&self, label: Label, key: &str) -> Result<Option<NodeId>, StoreError>;
    fn nodes_with_label(&self, label: Label) -> Result<Vec<NodeRecord>, StoreError>;
    fn relationships(&self, rel_type: Option<RelType>) -> Result<Vec<RelRecord>, StoreError>;
}

/// Buffered write surface the importers and the recorder talk to.
pub trait GraphSink {
    fn add_node(&mut self, draft: NodeDraft) -> Result<NodeId, StoreError>;
    fn add_relationship(
        &mut self,
        rel_type: RelType,
        from: NodeId,
        to: NodeId,
        props: Props,
    ) -> Result<(), StoreError>;
    fn flush(&mut self) -> Result<(), StoreError>;
    /// Query surface. Observes every write made before the call.
    fn nodes_with_label(&mut self, label: Label) -> Result<Vec<NodeRecord>, StoreError>;
}
