// AST data structures for execgraph.
// A language-neutral syntax tree: every parser converts its own tree into
// these types before the AST importer walks it.

use std::fmt;

/// A node in the parsed syntax tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxNode {
    /// Grammar construct tag, e.g. `def`, `send`, `if`.
    pub kind: String,
    /// Position handle; `None` when the construct has no source location.
    pub loc: Option<Location>,
    /// Children in grammar order. Empty optional slots are `None`.
    pub children: Vec<Option<SyntaxNode>>,
}

impl SyntaxNode {
    pub fn new(kind: impl Into<String>, loc: Option<Location>) -> Self {
        Self {
            kind: kind.into(),
            loc,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<Option<SyntaxNode>>) -> Self {
        self.children = children;
        self
    }

    pub fn push(&mut self, child: SyntaxNode) {
        self.children.push(Some(child));
    }

    /// Depth-first iterator over this node and every non-empty descendant.
    pub fn walk(&self) -> Vec<&SyntaxNode> {
        let mut out = vec![self];
        for child in self.children.iter().flatten() {
            out.extend(child.walk());
        }
        out
    }
}

/// Byte range into the owning file's text, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub begin: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn new(begin: usize, end: usize) -> Self {
        Self { begin, end }
    }

    /// Slices `text`, or `None` when the range falls outside it or off a char boundary.
    pub fn slice<'t>(&self, text: &'t str) -> Option<&'t str> {
        text.get(self.begin..self.end)
    }
}

/// Whole-expression range of a construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExprRange {
    pub first_line: usize,
    pub last_line: usize,
    pub bytes: ByteRange,
}

/// Named sub-components a construct may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LocPart {
    Keyword,
    Operator,
    Name,
    Argument,
    DoubleColon,
    In,
    Else,
    Assoc,
    Dot,
    Selector,
    Begin,
    End,
}

impl LocPart {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocPart::Keyword => "keyword",
            LocPart::Operator => "operator",
            LocPart::Name => "name",
            LocPart::Argument => "argument",
            LocPart::DoubleColon => "double_colon",
            LocPart::In => "in",
            LocPart::Else => "else",
            LocPart::Assoc => "assoc",
            LocPart::Dot => "dot",
            LocPart::Selector => "selector",
            LocPart::Begin => "begin",
            LocPart::End => "end",
        }
    }
}

impl fmt::Display for LocPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position handle of a syntax node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Location {
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub expression: Option<ExprRange>,
    pub parts: Vec<(LocPart, ByteRange)>,
}

impl Location {
    pub fn part(&self, part: LocPart) -> Option<ByteRange> {
        self.parts.iter().find(|(p, _)| *p == part).map(|(_, r)| *r)
    }

    pub fn with_part(mut self, part: LocPart, range: Option<ByteRange>) -> Self {
        if let Some(range) = range {
            self.parts.push((part, range));
        }
        self
    }
}
