//! AST Importer
//!
//! Writes a parsed source tree as `ASTNode` nodes hanging off a `File` node.
//! Nodes without a position are dropped together with their subtree.

use crate::domain::ast::SyntaxNode;
use crate::domain::graph::{Label, NodeDraft, NodeId, Props, RelType};
use crate::error::StoreError;
use crate::ports::GraphSink;
use uuid::Uuid;

/// Creates (or reuses) the `File` node for `path`, keyed by path.
pub fn import_file<S: GraphSink>(sink: &mut S, path: &str, content: &str) -> Result<NodeId, StoreError> {
    let draft = NodeDraft::new(Label::File)
        .unique_key(path)
        .set("path", path)
        .set("content", content);
    sink.add_node(draft)
}

pub struct AstImporter<'t> {
    path: &'t str,
    text: &'t str,
    imported: usize,
}

impl<'t> AstImporter<'t> {
    /// `text` must be the exact content the tree was parsed from.
    pub fn new(path: &'t str, text: &'t str) -> Self {
        Self {
            path,
            text,
            imported: 0,
        }
    }

    /// Number of `ASTNode`s written so far.
    pub fn imported(&self) -> usize {
        self.imported
    }

    pub fn import<S: GraphSink>(
        &mut self,
        node: &SyntaxNode,
        file: NodeId,
        parent: Option<NodeId>,
        sink: &mut S,
    ) -> Result<Option<NodeId>, StoreError> {
        let loc = match &node.loc {
            Some(loc) => loc,
            None => return Ok(None),
        };

        let mut draft = NodeDraft::new(Label::AstNode)
            .set("uuid", Uuid::new_v4().to_string())
            .set("file_path", self.path)
            .set("type", node.kind.as_str())
            .set_opt("line", loc.line)
            .set_opt("column", loc.column);

        if let Some(expr) = loc.expression {
            draft = draft
                .set("first_line", expr.first_line)
                .set("last_line", expr.last_line)
                .set("begin_loc", expr.bytes.begin)
                .set("end_loc", expr.bytes.end)
                .set_opt("expression", expr.bytes.slice(self.text));
            for (part, range) in &loc.parts {
                draft = draft.set_opt(part.as_str(), range.slice(self.text));
            }
        }

        let id = sink.add_node(draft)?;
        self.imported += 1;
        sink.add_relationship(RelType::FromFile, id, file, Props::new())?;
        if let Some(parent) = parent {
            sink.add_relationship(RelType::HasParent, id, parent, Props::new())?;
        }

        for child in node.children.iter().flatten() {
            self.import(child, file, Some(id), sink)?;
        }
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ast::{ByteRange, ExprRange, LocPart, Location};
    use crate::domain::sink::BatchWriter;
    use crate::domain::store::MemoryGraphStore;
    use crate::ports::GraphStore;

    fn located(kind: &str, line: usize, begin: usize, end: usize) -> SyntaxNode {
        SyntaxNode::new(
            kind,
            Some(Location {
                line: Some(line),
                column: Some(0),
                expression: Some(ExprRange {
                    first_line: line,
                    last_line: line,
                    bytes: ByteRange::new(begin, end),
                }),
                parts: Vec::new(),
            }),
        )
    }

    #[test]
    fn test_unpositioned_subtree_is_dropped() {
        let text = "fn f() {}";
        let orphan = SyntaxNode::new("block", None).with_children(vec![Some(located("int", 1, 0, 2))]);
        let root = located("file", 1, 0, text.len()).with_children(vec![Some(orphan), None]);

        let mut sink = BatchWriter::new(MemoryGraphStore::default());
        let file = import_file(&mut sink, "f.rs", text).unwrap();
        let mut importer = AstImporter::new("f.rs", text);
        importer.import(&root, file, None, &mut sink).unwrap();

        assert_eq!(importer.imported(), 1);
        assert_eq!(sink.store().nodes_with_label(Label::AstNode).unwrap().len(), 1);
    }

    #[test]
    fn test_snippets_and_missing_parts() {
        let text = "fn name() {}";
        let mut loc = located("def", 1, 0, text.len()).loc.unwrap();
        loc.parts.push((LocPart::Name, ByteRange::new(3, 7)));
        loc.parts.push((LocPart::Keyword, ByteRange::new(0, 200)));
        let def = SyntaxNode::new("def", Some(loc));

        let mut sink = BatchWriter::new(MemoryGraphStore::default());
        let file = import_file(&mut sink, "f.rs", text).unwrap();
        let id = AstImporter::new("f.rs", text)
            .import(&def, file, None, &mut sink)
            .unwrap()
            .unwrap();

        let record = sink.store().node(id).unwrap().unwrap();
        assert_eq!(record.str_prop("name"), Some("name"));
        assert_eq!(record.str_prop("expression"), Some(text));
        assert!(record.get("keyword").is_none());
        assert_eq!(record.int_prop("first_line"), Some(1));
    }

    #[test]
    fn test_file_node_is_unique_per_path() {
        let mut sink = BatchWriter::new(MemoryGraphStore::default());
        let a = import_file(&mut sink, "a.rs", "").unwrap();
        let again = import_file(&mut sink, "a.rs", "").unwrap();
        assert_eq!(a, again);
    }

    #[test]
    fn test_children_link_to_parent_and_file() {
        let text = "x + 1";
        let root = located("op", 1, 0, 5)
            .with_children(vec![Some(located("path", 1, 0, 1)), Some(located("int", 1, 4, 5))]);
        let mut sink = BatchWriter::new(MemoryGraphStore::default());
        let file = import_file(&mut sink, "e.rs", text).unwrap();
        let top = AstImporter::new("e.rs", text)
            .import(&root, file, None, &mut sink)
            .unwrap()
            .unwrap();

        let store = sink.store();
        let parents = store.relationships(Some(RelType::HasParent)).unwrap();
        assert_eq!(parents.len(), 2);
        assert!(parents.iter().all(|r| r.to == top));
        assert_eq!(store.relationships(Some(RelType::FromFile)).unwrap().len(), 3);
    }
}
