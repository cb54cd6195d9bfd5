//! Cross-Linker
//!
//! Post-pass that connects every trace point to the definition node of the
//! code it executed, matching on (path, first line, definition name).

use crate::domain::graph::{Label, NodeId, Props, RelType};
use crate::error::StoreError;
use crate::ports::GraphSink;
use std::collections::HashMap;
use tracing::debug;

pub struct CrossLinker<'k> {
    definition_kind: &'k str,
}

impl<'k> CrossLinker<'k> {
    pub fn new(definition_kind: &'k str) -> Self {
        Self { definition_kind }
    }

    /// Adds HAS_AST_NODE edges and returns how many were added. Unmatched
    /// trace points stay unlinked.
    pub fn link<S: GraphSink>(&self, sink: &mut S) -> Result<usize, StoreError> {
        sink.flush()?;

        let mut definitions: HashMap<(String, i64, String), NodeId> = HashMap::new();
        for node in sink.nodes_with_label(Label::AstNode)? {
            if node.str_prop("type") != Some(self.definition_kind) {
                continue;
            }
            let (Some(path), Some(line), Some(name)) = (
                node.str_prop("file_path"),
                node.int_prop("first_line"),
                node.str_prop("name"),
            ) else {
                continue;
            };
            definitions
                .entry((path.to_string(), line, name.to_string()))
                .or_insert(node.id);
        }

        let mut linked = 0;
        for point in sink.nodes_with_label(Label::TracePoint)? {
            let (Some(path), Some(line), Some(method)) = (
                point.str_prop("path"),
                point.int_prop("lineno"),
                point.str_prop("method_id"),
            ) else {
                continue;
            };
            if path.is_empty() {
                continue;
            }
            if let Some(def) = definitions.get(&(path.to_string(), line, method.to_string())) {
                sink.add_relationship(RelType::HasAstNode, point.id, *def, Props::new())?;
                linked += 1;
            }
        }

        sink.flush()?;
        debug!(definitions = definitions.len(), linked, "cross-link pass done");
        Ok(linked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::NodeDraft;
    use crate::domain::sink::BatchWriter;
    use crate::domain::store::MemoryGraphStore;
    use crate::ports::GraphStore;

    fn def(sink: &mut impl GraphSink, path: &str, line: i64, name: &str, kind: &str) -> NodeId {
        sink.add_node(
            NodeDraft::new(Label::AstNode)
                .set("file_path", path)
                .set("first_line", line)
                .set("name", name)
                .set("type", kind),
        )
        .unwrap()
    }

    fn point(sink: &mut impl GraphSink, path: &str, line: u32, method: &str) -> NodeId {
        sink.add_node(
            NodeDraft::new(Label::TracePoint)
                .set("path", path)
                .set("lineno", line)
                .set("method_id", method),
        )
        .unwrap()
    }

    #[test]
    fn test_links_only_exact_matches() {
        let mut sink = BatchWriter::new(MemoryGraphStore::default());
        sink.begin_batch();
        let target = def(&mut sink, "/src/a.rs", 3, "run", "def");
        def(&mut sink, "/src/a.rs", 9, "run", "call");
        let hit = point(&mut sink, "/src/a.rs", 3, "run");
        point(&mut sink, "/src/a.rs", 4, "run");
        point(&mut sink, "/src/b.rs", 3, "run");
        point(&mut sink, "/src/a.rs", 9, "run");
        point(&mut sink, "", 3, "run");

        let linked = CrossLinker::new("def").link(&mut sink).unwrap();
        sink.end_batch().unwrap();

        assert_eq!(linked, 1);
        let rels = sink.store().relationships(Some(RelType::HasAstNode)).unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!((rels[0].from, rels[0].to), (hit, target));
    }
}
