//! Buffered graph writer.
//!
//! Ids are handed out as soon as a node is added so callers can link to it
//! immediately; the records themselves sit in a buffer until a flush.

use crate::domain::graph::{Label, NodeDraft, NodeId, NodeRecord, Props, RelRecord, RelType};
use crate::error::StoreError;
use crate::ports::{GraphSink, GraphStore};
use std::collections::HashMap;
use tracing::trace;

pub const DEFAULT_BATCH_SIZE: usize = 6000;

pub struct BatchWriter<S: GraphStore> {
    store: S,
    batch_size: usize,
    /// Nesting depth of open batches; writes flush immediately at 0.
    depth: usize,
    nodes: Vec<NodeRecord>,
    rels: Vec<RelRecord>,
    keys: HashMap<(Label, String), NodeId>,
    written_nodes: usize,
    written_rels: usize,
}

impl<S: GraphStore> BatchWriter<S> {
    pub fn new(store: S) -> Self {
        Self::with_batch_size(store, DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(store: S, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            depth: 0,
            nodes: Vec::new(),
            rels: Vec::new(),
            keys: HashMap::new(),
            written_nodes: 0,
            written_rels: 0,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(mut self) -> Result<S, StoreError> {
        self.flush()?;
        Ok(self.store)
    }

    pub fn pending(&self) -> usize {
        self.nodes.len() + self.rels.len()
    }

    /// Totals persisted so far as (nodes, relationships).
    pub fn written(&self) -> (usize, usize) {
        (self.written_nodes, self.written_rels)
    }

    pub fn begin_batch(&mut self) {
        self.depth += 1;
    }

    pub fn end_batch(&mut self) -> Result<(), StoreError> {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.flush()?;
        }
        Ok(())
    }

    /// Runs `f` with flushing deferred until it returns (or the buffer fills).
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R, StoreError> {
        self.begin_batch();
        let out = f(self);
        self.end_batch()?;
        Ok(out)
    }

    fn after_write(&mut self) -> Result<(), StoreError> {
        if self.depth == 0 || self.pending() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }
}

impl<S: GraphStore> GraphSink for BatchWriter<S> {
    fn add_node(&mut self, draft: NodeDraft) -> Result<NodeId, StoreError> {
        if let Some(key) = &draft.unique_key {
            let lookup = (draft.label, key.clone());
            if let Some(id) = self.keys.get(&lookup) {
                return Ok(*id);
            }
            if let Some(id) = self.store.find_by_key(draft.label, key)? {
                self.keys.insert(lookup, id);
                return Ok(id);
            }
            let id = self.store.allocate_id()?;
            self.keys.insert(lookup, id);
            self.nodes.push(draft.into_record(id));
            self.after_write()?;
            return Ok(id);
        }

        let id = self.store.allocate_id()?;
        self.nodes.push(draft.into_record(id));
        self.after_write()?;
        Ok(id)
    }

    fn add_relationship(
        &mut self,
        rel_type: RelType,
        from: NodeId,
        to: NodeId,
        props: Props,
    ) -> Result<(), StoreError> {
        self.rels.push(RelRecord {
            rel_type,
            from,
            to,
            props,
        });
        self.after_write()
    }

    /// Writes the buffer out. A failed write leaves the buffer intact, so the
    /// next flush retries it.
    fn flush(&mut self) -> Result<(), StoreError> {
        if self.nodes.is_empty() && self.rels.is_empty() {
            return Ok(());
        }
        trace!(nodes = self.nodes.len(), rels = self.rels.len(), "flushing graph buffer");
        self.store.write_batch(&self.nodes, &self.rels)?;
        self.written_nodes += self.nodes.len();
        self.written_rels += self.rels.len();
        self.nodes.clear();
        self.rels.clear();
        Ok(())
    }

    fn nodes_with_label(&mut self, label: Label) -> Result<Vec<NodeRecord>, StoreError> {
        self.flush()?;
        self.store.nodes_with_label(label)
    }
}
