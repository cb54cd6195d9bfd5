use crate::domain::graph::{Label, NodeId, NodeRecord, RelRecord, RelType};
use crate::error::StoreError;
use crate::ports::GraphStore;
use dashmap::DashMap;
use sled::Db;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

fn check_endpoints(
    rels: &[RelRecord],
    batch_nodes: &HashSet<NodeId>,
    exists: impl Fn(NodeId) -> Result<bool, StoreError>,
) -> Result<(), StoreError> {
    for rel in rels {
        for node in [rel.from, rel.to] {
            if !batch_nodes.contains(&node) && !exists(node)? {
                return Err(StoreError::DanglingRelationship {
                    rel: rel.rel_type.as_str().to_string(),
                    node: node.0,
                });
            }
        }
    }
    Ok(())
}

// ============================================================================
// MemoryGraphStore - Fast in-memory storage using DashMap
// ============================================================================

pub struct MemoryGraphStore {
    next_id: AtomicU64,
    next_rel: AtomicU64,
    pub nodes: DashMap<NodeId, NodeRecord>,
    pub keys: DashMap<(Label, String), NodeId>,
    pub relationships: DashMap<u64, RelRecord>, // write sequence -> relationship
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            next_rel: AtomicU64::new(0),
            nodes: DashMap::new(),
            keys: DashMap::new(),
            relationships: DashMap::new(),
        }
    }
}

impl GraphStore for MemoryGraphStore {
    fn allocate_id(&self) -> Result<NodeId, StoreError> {
        Ok(NodeId(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    fn write_batch(&self, nodes: &[NodeRecord], rels: &[RelRecord]) -> Result<(), StoreError> {
        let batch_nodes: HashSet<NodeId> = nodes.iter().map(|n| n.id).collect();
        check_endpoints(rels, &batch_nodes, |id| Ok(self.nodes.contains_key(&id)))?;

        for node in nodes {
            if let Some(key) = &node.unique_key {
                self.keys.insert((node.label, key.clone()), node.id);
            }
            self.nodes.insert(node.id, node.clone());
        }
        for rel in rels {
            let seq = self.next_rel.fetch_add(1, Ordering::Relaxed);
            self.relationships.insert(seq, rel.clone());
        }
        Ok(())
    }

    fn node(&self, id: NodeId) -> Result<Option<NodeRecord>, StoreError> {
        Ok(self.nodes.get(&id).map(|r| r.clone()))
    }

    fn find_by_key(&self, label: Label, key: &str) -> Result<Option<NodeId>, StoreError> {
        Ok(self.keys.get(&(label, key.to_string())).map(|r| *r))
    }

    fn nodes_with_label(&self, label: Label) -> Result<Vec<NodeRecord>, StoreError> {
        let mut out: Vec<NodeRecord> = self
            .nodes
            .iter()
            .filter(|r| r.label == label)
            .map(|r| r.clone())
            .collect();
        out.sort_by_key(|n| n.id);
        Ok(out)
    }

    fn relationships(&self, rel_type: Option<RelType>) -> Result<Vec<RelRecord>, StoreError> {
        let mut out: Vec<(u64, RelRecord)> = self
            .relationships
            .iter()
            .filter(|r| rel_type.map_or(true, |t| r.rel_type == t))
            .map(|r| (*r.key(), r.value().clone()))
            .collect();
        out.sort_by_key(|(seq, _)| *seq);
        Ok(out.into_iter().map(|(_, rel)| rel).collect())
    }
}

// ============================================================================
// SledGraphStore - Persistent disk-based storage using sled
// ============================================================================

pub struct SledGraphStore {
    db: Db,
    // Trees for different data types
    nodes_tree: sled::Tree,
    labels_tree: sled::Tree,
    keys_tree: sled::Tree,
    rels_tree: sled::Tree,
}

impl SledGraphStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let nodes_tree = db.open_tree("nodes")?;
        let labels_tree = db.open_tree("labels")?;
        let keys_tree = db.open_tree("keys")?;
        let rels_tree = db.open_tree("relationships")?;

        Ok(Self {
            db,
            nodes_tree,
            labels_tree,
            keys_tree,
            rels_tree,
        })
    }

    fn label_tag(label: Label) -> u8 {
        Label::ALL.iter().position(|l| *l == label).unwrap_or(0) as u8
    }

    fn label_key(label: Label, id: NodeId) -> Vec<u8> {
        let mut key = Vec::with_capacity(9);
        key.push(Self::label_tag(label));
        key.extend_from_slice(&id.0.to_be_bytes());
        key
    }

    fn unique_key(label: Label, key: &str) -> String {
        format!("{}\u{0}{}", label.as_str(), key)
    }

    fn decode_id(bytes: &[u8]) -> Option<NodeId> {
        let raw: [u8; 8] = bytes.try_into().ok()?;
        Some(NodeId(u64::from_be_bytes(raw)))
    }

    /// Flushes sled's dirty pages to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl GraphStore for SledGraphStore {
    fn allocate_id(&self) -> Result<NodeId, StoreError> {
        // generate_id starts at 0; keep 0 free so ids read the same as the memory store
        Ok(NodeId(self.db.generate_id()? + 1))
    }

    fn write_batch(&self, nodes: &[NodeRecord], rels: &[RelRecord]) -> Result<(), StoreError> {
        let batch_nodes: HashSet<NodeId> = nodes.iter().map(|n| n.id).collect();
        check_endpoints(rels, &batch_nodes, |id| {
            Ok(self.nodes_tree.contains_key(id.0.to_be_bytes())?)
        })?;

        let mut node_batch = sled::Batch::default();
        let mut label_batch = sled::Batch::default();
        let mut key_batch = sled::Batch::default();
        for node in nodes {
            node_batch.insert(node.id.0.to_be_bytes().to_vec(), bincode::serialize(node)?);
            label_batch.insert(Self::label_key(node.label, node.id), &[] as &[u8]);
            if let Some(key) = &node.unique_key {
                key_batch.insert(
                    Self::unique_key(node.label, key).as_bytes(),
                    node.id.0.to_be_bytes().to_vec(),
                );
            }
        }
        self.nodes_tree.apply_batch(node_batch)?;
        self.labels_tree.apply_batch(label_batch)?;
        self.keys_tree.apply_batch(key_batch)?;

        let mut rel_batch = sled::Batch::default();
        for rel in rels {
            let seq = self.db.generate_id()?;
            rel_batch.insert(seq.to_be_bytes().to_vec(), bincode::serialize(rel)?);
        }
        self.rels_tree.apply_batch(rel_batch)?;
        Ok(())
    }

    fn node(&self, id: NodeId) -> Result<Option<NodeRecord>, StoreError> {
        match self.nodes_tree.get(id.0.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn find_by_key(&self, label: Label, key: &str) -> Result<Option<NodeId>, StoreError> {
        Ok(self
            .keys_tree
            .get(Self::unique_key(label, key).as_bytes())?
            .and_then(|bytes| Self::decode_id(&bytes)))
    }

    fn nodes_with_label(&self, label: Label) -> Result<Vec<NodeRecord>, StoreError> {
        let mut out = Vec::new();
        for entry in self.labels_tree.scan_prefix([Self::label_tag(label)]) {
            let (key, _) = entry?;
            if let Some(id) = Self::decode_id(&key[1..]) {
                if let Some(node) = self.node(id)? {
                    out.push(node);
                }
            }
        }
        Ok(out)
    }

    fn relationships(&self, rel_type: Option<RelType>) -> Result<Vec<RelRecord>, StoreError> {
        let mut out = Vec::new();
        for entry in self.rels_tree.iter() {
            let (_, bytes) = entry?;
            let rel: RelRecord = bincode::deserialize(&bytes)?;
            if rel_type.map_or(true, |t| rel.rel_type == t) {
                out.push(rel);
            }
        }
        Ok(out)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
