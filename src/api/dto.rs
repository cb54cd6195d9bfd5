use crate::domain::graph::{Label, NodeRecord, PropValue, Props, RelRecord, RelType};
use crate::error::StoreError;
use crate::ports::GraphStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize)]
pub struct GraphDto {
    pub nodes: Vec<NodeDto>,
    pub edges: Vec<EdgeDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeDto {
    pub id: String,
    pub labels: Vec<String>,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EdgeDto {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub properties: Map<String, Value>,
}

/// Node counts per label and relationship counts per type.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StatsDto {
    pub nodes: BTreeMap<String, usize>,
    pub relationships: BTreeMap<String, usize>,
}

fn to_json(value: &PropValue) -> Value {
    match value {
        PropValue::Str(s) => Value::String(s.clone()),
        PropValue::Int(i) => Value::Number((*i).into()),
        PropValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        PropValue::Bool(b) => Value::Bool(*b),
    }
}

fn props_json(props: &Props) -> Map<String, Value> {
    props.iter().map(|(k, v)| (k.clone(), to_json(v))).collect()
}

impl From<&NodeRecord> for NodeDto {
    fn from(node: &NodeRecord) -> Self {
        let mut labels = vec![node.label.as_str().to_string()];
        labels.extend(node.extra_labels.iter().cloned());
        NodeDto {
            id: node.id.to_string(),
            labels,
            properties: props_json(&node.props),
        }
    }
}

impl From<&RelRecord> for EdgeDto {
    fn from(rel: &RelRecord) -> Self {
        EdgeDto {
            from: rel.from.to_string(),
            to: rel.to.to_string(),
            type_: rel.rel_type.as_str().to_string(),
            properties: props_json(&rel.props),
        }
    }
}

impl GraphDto {
    pub fn from_store<S: GraphStore + ?Sized>(store: &S) -> Result<Self, StoreError> {
        let mut nodes = Vec::new();
        for label in Label::ALL {
            nodes.extend(store.nodes_with_label(label)?.iter().map(NodeDto::from));
        }
        let edges = store.relationships(None)?.iter().map(EdgeDto::from).collect();
        Ok(GraphDto { nodes, edges })
    }
}

impl StatsDto {
    pub fn from_store<S: GraphStore + ?Sized>(store: &S) -> Result<Self, StoreError> {
        let mut stats = StatsDto::default();
        for label in Label::ALL {
            stats
                .nodes
                .insert(label.as_str().to_string(), store.nodes_with_label(label)?.len());
        }
        for rel in RelType::ALL {
            let count = store.relationships(Some(rel))?.len();
            if count > 0 {
                stats.relationships.insert(rel.as_str().to_string(), count);
            }
        }
        Ok(stats)
    }
}
