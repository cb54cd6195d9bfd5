// Core domain for execgraph: the graph model, the importers and the recorder.

pub mod ast;
pub mod ast_importer;
pub mod cross_link;
pub mod event;
pub mod graph;
pub mod object_importer;
pub mod recorder;
pub mod sink;
pub mod source_cache;
pub mod store;
