// Graph structures for execgraph.
// Nodes and relationships as they are handed to a graph store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Store-assigned node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Primary node labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    TracePoint,
    Object,
    AstNode,
    File,
}

impl Label {
    pub const ALL: [Label; 4] = [Label::TracePoint, Label::Object, Label::AstNode, Label::File];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::TracePoint => "TracePoint",
            Label::Object => "Object",
            Label::AstNode => "ASTNode",
            Label::File => "File",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship types. All are directed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelType {
    /// TracePoint -> TracePoint, temporal order
    Next,
    /// Call nesting for trace points, tree edge for AST nodes
    HasParent,
    /// Return-kind trace point -> the call it closes
    StartedAt,
    Returned,
    FromObject,
    HasVariableValue,
    ReceivedArgument,
    IsA,
    HasSuperclass,
    IncludesModule,
    InstanceVariable,
    FromFile,
    HasAstNode,
}

impl RelType {
    pub const ALL: [RelType; 13] = [
        RelType::Next,
        RelType::HasParent,
        RelType::StartedAt,
        RelType::Returned,
        RelType::FromObject,
        RelType::HasVariableValue,
        RelType::ReceivedArgument,
        RelType::IsA,
        RelType::HasSuperclass,
        RelType::IncludesModule,
        RelType::InstanceVariable,
        RelType::FromFile,
        RelType::HasAstNode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelType::Next => "NEXT",
            RelType::HasParent => "HAS_PARENT",
            RelType::StartedAt => "STARTED_AT",
            RelType::Returned => "RETURNED",
            RelType::FromObject => "FROM_OBJECT",
            RelType::HasVariableValue => "HAS_VARIABLE_VALUE",
            RelType::ReceivedArgument => "RECEIVED_ARGUMENT",
            RelType::IsA => "IS_A",
            RelType::HasSuperclass => "HAS_SUPERCLASS",
            RelType::IncludesModule => "INCLUDES_MODULE",
            RelType::InstanceVariable => "INSTANCE_VARIABLE",
            RelType::FromFile => "FROM_FILE",
            RelType::HasAstNode => "HAS_AST_NODE",
        }
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropValue::Float(f) => Some(*f),
            PropValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<u32> for PropValue {
    fn from(value: u32) -> Self {
        PropValue::Int(i64::from(value))
    }
}

impl From<u64> for PropValue {
    fn from(value: u64) -> Self {
        PropValue::Int(value as i64)
    }
}

impl From<usize> for PropValue {
    fn from(value: usize) -> Self {
        PropValue::Int(value as i64)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

pub type Props = BTreeMap<String, PropValue>;

/// Builds a one-entry property map, the common case for tagged relationships.
pub fn prop(key: &str, value: impl Into<PropValue>) -> Props {
    let mut props = Props::new();
    props.insert(key.to_string(), value.into());
    props
}

/// A node that has not been written yet.
#[derive(Debug, Clone)]
pub struct NodeDraft {
    pub label: Label,
    /// Nodes sharing a label and key are merged into one.
    pub unique_key: Option<String>,
    pub extra_labels: Vec<String>,
    pub props: Props,
}

impl NodeDraft {
    pub fn new(label: Label) -> Self {
        Self {
            label,
            unique_key: None,
            extra_labels: Vec::new(),
            props: Props::new(),
        }
    }

    pub fn unique_key(mut self, key: impl Into<String>) -> Self {
        self.unique_key = Some(key.into());
        self
    }

    pub fn extra_label(mut self, label: &str) -> Self {
        self.extra_labels.push(label.to_string());
        self
    }

    pub fn set(mut self, key: &str, value: impl Into<PropValue>) -> Self {
        self.props.insert(key.to_string(), value.into());
        self
    }

    /// Sets `key` only when a value is present; absent attributes are omitted.
    pub fn set_opt<V: Into<PropValue>>(mut self, key: &str, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.props.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn into_record(self, id: NodeId) -> NodeRecord {
        NodeRecord {
            id,
            label: self.label,
            unique_key: self.unique_key,
            extra_labels: self.extra_labels,
            props: self.props,
        }
    }
}

/// A persisted node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub label: Label,
    pub unique_key: Option<String>,
    pub extra_labels: Vec<String>,
    pub props: Props,
}

impl NodeRecord {
    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.props.get(key)
    }

    pub fn str_prop(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropValue::as_str)
    }

    pub fn int_prop(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(PropValue::as_int)
    }

    pub fn float_prop(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(PropValue::as_float)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label.as_str() == label || self.extra_labels.iter().any(|l| l == label)
    }
}

/// A persisted directed relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelRecord {
    pub rel_type: RelType,
    pub from: NodeId,
    pub to: NodeId,
    pub props: Props,
}

impl RelRecord {
    pub fn str_prop(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(PropValue::as_str)
    }
}
