//! Object Graph Importer
//!
//! Turns runtime values into `Object` nodes linked by class, superclass,
//! included-module and instance-field edges. One node per runtime identity per
//! session: the memo is filled before any edge is followed, which is what lets
//! self-referential and cyclic values terminate.
//!
//! A neighbour that cannot be introspected costs only the edge to it. Store
//! errors are returned, since the memo would otherwise point at unwritten nodes.

use crate::config::ObjectLimits;
use crate::domain::graph::{prop, Label, NodeDraft, NodeId, Props, RelType};
use crate::error::{ImportError, StoreError};
use crate::ports::{Archetype, GraphSink, Introspector, ObjectId};
use std::collections::{HashMap, HashSet};
use tracing::trace;

pub struct ObjectImporter<'a, I: Introspector> {
    introspector: &'a I,
    limits: ObjectLimits,
    memo: HashMap<ObjectId, NodeId>,
    /// Identities written at the depth limit whose edges are not followed yet.
    unexpanded: HashSet<ObjectId>,
    skipped_edges: u64,
}

impl<'a, I: Introspector> ObjectImporter<'a, I> {
    pub fn new(introspector: &'a I, limits: ObjectLimits) -> Self {
        Self {
            introspector,
            limits,
            memo: HashMap::new(),
            unexpanded: HashSet::new(),
            skipped_edges: 0,
        }
    }

    /// Number of distinct identities imported this session.
    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }

    pub fn node_for(&self, id: ObjectId) -> Option<NodeId> {
        self.memo.get(&id).copied()
    }

    /// Edges left out because their target could not be introspected.
    pub fn skipped_edges(&self) -> u64 {
        self.skipped_edges
    }

    /// Imports `value`, returning its node. Fails only when `value` itself
    /// cannot be represented or when a write fails.
    pub fn import<S: GraphSink>(&mut self, value: &I::Value, sink: &mut S) -> Result<NodeId, ImportError> {
        self.import_at(value, sink, 0)
    }

    fn import_at<S: GraphSink>(
        &mut self,
        value: &I::Value,
        sink: &mut S,
        depth: usize,
    ) -> Result<NodeId, ImportError> {
        let intro = self.introspector;
        let identity = intro.identity(value);
        if let Some(node) = self.memo.get(&identity).copied() {
            // Reached closer to the root than last time: follow the edges now.
            if depth < self.limits.max_depth && self.unexpanded.remove(&identity) {
                self.expand(value, node, sink, depth)?;
            }
            return Ok(node);
        }

        let inspect = truncate_chars(
            intro.represent(value, self.limits.max_inspect_len)?,
            self.limits.max_inspect_len,
        );
        let mut draft = NodeDraft::new(Label::Object)
            .set("object_id", identity.0)
            .set("inspect", inspect);
        match intro.archetype(value) {
            Archetype::Class => draft = draft.extra_label("Class"),
            Archetype::Module => draft = draft.extra_label("Module"),
            Archetype::Instance => {}
        }

        let node = sink.add_node(draft)?;
        self.memo.insert(identity, node);

        if depth >= self.limits.max_depth {
            trace!(object = %identity, depth, "object depth limit reached, edges not expanded");
            self.unexpanded.insert(identity);
            return Ok(node);
        }
        self.expand(value, node, sink, depth)?;
        Ok(node)
    }

    fn expand<S: GraphSink>(
        &mut self,
        value: &I::Value,
        node: NodeId,
        sink: &mut S,
        depth: usize,
    ) -> Result<(), StoreError> {
        let intro = self.introspector;
        let class = intro.type_of(value);
        self.link(&class, node, RelType::IsA, Props::new(), sink, depth)?;

        if let Some(superclass) = intro.superclass_of(value) {
            self.link(&superclass, node, RelType::HasSuperclass, Props::new(), sink, depth)?;
        }

        for module in intro.included_capabilities_of(value) {
            self.link(&module, node, RelType::IncludesModule, Props::new(), sink, depth)?;
        }

        let fields = match intro.instance_fields(value) {
            Ok(fields) => fields,
            Err(err) => {
                self.skipped_edges += 1;
                trace!(%err, "instance fields unreadable, no INSTANCE_VARIABLE edges");
                return Ok(());
            }
        };
        let limit = self.limits.max_instance_fields.unwrap_or(usize::MAX);
        for (name, field_value) in fields.into_iter().take(limit) {
            self.link(&field_value, node, RelType::InstanceVariable, prop("variable", name), sink, depth)?;
        }
        Ok(())
    }

    fn link<S: GraphSink>(
        &mut self,
        target: &I::Value,
        node: NodeId,
        rel_type: RelType,
        props: Props,
        sink: &mut S,
        depth: usize,
    ) -> Result<(), StoreError> {
        match self.import_at(target, sink, depth + 1) {
            Ok(target_node) => sink.add_relationship(rel_type, node, target_node, props),
            Err(ImportError::Store(err)) => Err(err),
            Err(ImportError::Introspect(err)) => {
                self.skipped_edges += 1;
                trace!(rel = rel_type.as_str(), %err, "object edge skipped");
                Ok(())
            }
        }
    }
}

/// Cuts `text` to at most `max` characters without splitting a character.
pub fn truncate_chars(mut text: String, max: usize) -> String {
    if let Some((idx, _)) = text.char_indices().nth(max) {
        text.truncate(idx);
    }
    text
}
