//! Error types for execgraph.
//!
//! Library code returns these typed errors; the binary wraps them in `anyhow`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a graph store or the buffered writer in front of it.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("record encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("relationship {rel} references unknown node {node}")]
    DanglingRelationship { rel: String, node: u64 },
}

/// A runtime value could not be inspected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntrospectError {
    #[error("value {0} cannot be introspected")]
    Unsupported(String),

    #[error("unknown object reference {0}")]
    UnknownObject(u64),
}

/// A name was not bound in the frame an event was raised from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("no local named `{0}`")]
    NotFound(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("syntax error at {line}:{column}: {message}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },
}

/// Importing a runtime value into the object graph failed.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error(transparent)]
    Introspect(#[from] IntrospectError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures that end a recording. Any of these leaves the call stack, the
/// object memo or the written graph untrustworthy for every later event.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("failed to persist trace point #{index}: {source}")]
    Persist {
        index: u64,
        #[source]
        source: StoreError,
    },

    #[error("failed to persist {rel} capture of trace point #{index}: {source}")]
    Capture {
        index: u64,
        rel: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("call stack out of step: {ancestors} ancestor frames, {self_frames} self-time frames, {total_frames} cumulative frames")]
    StackInvariant {
        ancestors: usize,
        self_frames: usize,
        total_frames: usize,
    },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("trace abandoned: {0}")]
    Fatal(#[from] RecorderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A trace log could not be loaded into a replayable form.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("cannot read trace log {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed trace log: {0}")]
    Json(#[from] serde_json::Error),

    #[error("object #{0} is defined twice")]
    DuplicateObject(u64),

    #[error("object #{0} is referenced but never defined")]
    UnknownObject(u64),

    #[error("object #{id} cannot serve as a {role}")]
    WrongKind { id: u64, role: &'static str },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
