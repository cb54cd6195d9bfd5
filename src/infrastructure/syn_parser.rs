//! Rust source parser built on syn.
//!
//! Converts syn's typed tree into `SyntaxNode`s. Positions come from
//! proc-macro2 span locations (line, char column) and are turned into byte
//! offsets through a per-file line index, so snippets slice the exact text
//! that was parsed.

use crate::domain::ast::{ByteRange, ExprRange, Location, LocPart, SyntaxNode};
use crate::error::ParseError;
use crate::ports::SourceParser;
use proc_macro2::{LineColumn, Span};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::visit::{self, Visit};
use syn::{Block, Expr, ExprPath, FnArg, ImplItem, Item, Lit, Pat, Signature, Stmt, Token, TraitItem};

const BOM: &str = "\u{feff}";

pub struct SynSourceParser;

impl SourceParser for SynSourceParser {
    fn parse(&self, text: &str) -> Result<SyntaxNode, ParseError> {
        let (base, body) = match text.strip_prefix(BOM) {
            Some(rest) => (BOM.len(), rest),
            None => (0, text),
        };
        let file = syn::parse_file(body).map_err(to_parse_error)?;
        let converter = Converter {
            index: LineIndex::new(body, base),
        };
        Ok(converter.file(&file))
    }

    fn referenced_identifiers(&self, line: &str) -> Result<Vec<String>, ParseError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        // A line that opens a block parses once the block is closed.
        let completed = if trimmed.ends_with('{') {
            format!("{}}}", trimmed)
        } else {
            trimmed.trim_end_matches(',').to_string()
        };

        let mut last_err = None;
        for candidate in [trimmed, completed.as_str()] {
            let mut collector = IdentCollector::default();
            match syn::parse_str::<Stmt>(candidate) {
                Ok(stmt) => {
                    collector.visit_stmt(&stmt);
                    return Ok(collector.names);
                }
                Err(err) => last_err = Some(err),
            }
            if let Ok(expr) = syn::parse_str::<Expr>(candidate.trim_end_matches(';')) {
                collector.visit_expr(&expr);
                return Ok(collector.names);
            }
        }
        Err(last_err.map(to_parse_error).unwrap_or_else(|| ParseError::Syntax {
            message: "unparseable line".to_string(),
            line: 1,
            column: 0,
        }))
    }
}

fn to_parse_error(err: syn::Error) -> ParseError {
    let start = err.span().start();
    ParseError::Syntax {
        message: err.to_string(),
        line: start.line,
        column: start.column,
    }
}

/// Collects bare single-segment path expressions, first occurrence order.
#[derive(Default)]
struct IdentCollector {
    names: Vec<String>,
}

impl<'ast> Visit<'ast> for IdentCollector {
    fn visit_expr_path(&mut self, node: &'ast ExprPath) {
        if node.qself.is_none() && node.path.leading_colon.is_none() && node.path.segments.len() == 1 {
            let segment = &node.path.segments[0];
            if segment.arguments.is_none() {
                let name = segment.ident.to_string();
                if !self.names.contains(&name) {
                    self.names.push(name);
                }
            }
        }
        visit::visit_expr_path(self, node);
    }

    fn visit_macro(&mut self, node: &'ast syn::Macro) {
        // Format-style macros take a comma separated expression list.
        if let Ok(args) = node.parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated) {
            for arg in &args {
                self.visit_expr(arg);
            }
        }
    }
}

struct LineIndex<'t> {
    text: &'t str,
    base: usize,
    starts: Vec<usize>,
}

impl<'t> LineIndex<'t> {
    fn new(text: &'t str, base: usize) -> Self {
        let mut starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                starts.push(i + 1);
            }
        }
        Self { text, base, starts }
    }

    fn line_count(&self) -> usize {
        self.starts.len()
    }

    /// Byte offset of a 1-based line / 0-based char column.
    fn offset(&self, at: LineColumn) -> Option<usize> {
        if at.line == 0 {
            return None;
        }
        let start = *self.starts.get(at.line - 1)?;
        let end = self.starts.get(at.line).copied().unwrap_or(self.text.len());
        let line = self.text.get(start..end)?;
        let within = match line.char_indices().nth(at.column) {
            Some((i, _)) => i,
            None if line.chars().count() == at.column => line.len(),
            None => return None,
        };
        Some(self.base + start + within)
    }

    fn range(&self, first: Span, last: Span) -> Option<ByteRange> {
        let begin = self.offset(first.start())?;
        let end = self.offset(last.end())?;
        (begin <= end).then(|| ByteRange::new(begin, end))
    }
}

struct Converter<'t> {
    index: LineIndex<'t>,
}

impl Converter<'_> {
    /// Position covering `first` through `last`; `None` for spans with no location.
    fn location_between(&self, first: Span, last: Span) -> Option<Location> {
        let start = first.start();
        if start.line == 0 {
            return None;
        }
        let expression = self.index.range(first, last).map(|bytes| ExprRange {
            first_line: start.line,
            last_line: last.end().line,
            bytes,
        });
        Some(Location {
            line: Some(start.line),
            column: Some(start.column),
            expression,
            parts: Vec::new(),
        })
    }

    fn node<T: Spanned>(&self, kind: &str, syntax: &T) -> SyntaxNode {
        let span = syntax.span();
        SyntaxNode::new(kind, self.location_between(span, span))
    }

    fn mark(&self, node: &mut SyntaxNode, part: LocPart, span: Span) {
        if let Some(loc) = node.loc.as_mut() {
            if let Some(range) = self.index.range(span, span) {
                loc.parts.push((part, range));
            }
        }
    }

    fn file(&self, file: &syn::File) -> SyntaxNode {
        let len = self.index.text.len();
        let loc = Location {
            line: Some(1),
            column: Some(0),
            expression: Some(ExprRange {
                first_line: 1,
                last_line: self.index.line_count(),
                bytes: ByteRange::new(self.index.base, self.index.base + len),
            }),
            parts: Vec::new(),
        };
        let mut node = SyntaxNode::new("file", Some(loc));
        node.children = file.items.iter().map(|item| self.item(item)).collect();
        node
    }

    fn item(&self, item: &Item) -> Option<SyntaxNode> {
        let node = match item {
            Item::Fn(f) => self.def(&f.sig, Some(&f.block), f.block.span()),
            Item::Impl(imp) => {
                let mut node = SyntaxNode::new(
                    "impl",
                    self.location_between(imp.impl_token.span(), imp.brace_token.span.close()),
                );
                self.mark(&mut node, LocPart::Keyword, imp.impl_token.span());
                self.mark(&mut node, LocPart::Name, imp.self_ty.span());
                for member in &imp.items {
                    match member {
                        ImplItem::Fn(m) => node.push(self.def(&m.sig, Some(&m.block), m.block.span())),
                        ImplItem::Const(c) => {
                            let mut konst = self.node("const", c);
                            self.mark(&mut konst, LocPart::Keyword, c.const_token.span());
                            self.mark(&mut konst, LocPart::Name, c.ident.span());
                            self.mark(&mut konst, LocPart::Operator, c.eq_token.span());
                            konst.push(self.expr(&c.expr));
                            node.push(konst);
                        }
                        _ => {}
                    }
                }
                node
            }
            Item::Trait(t) => {
                let mut node = SyntaxNode::new(
                    "trait",
                    self.location_between(t.trait_token.span(), t.brace_token.span.close()),
                );
                self.mark(&mut node, LocPart::Keyword, t.trait_token.span());
                self.mark(&mut node, LocPart::Name, t.ident.span());
                for member in &t.items {
                    if let TraitItem::Fn(m) = member {
                        node.push(self.def(&m.sig, m.default.as_ref(), m.span()));
                    }
                }
                node
            }
            Item::Struct(s) => {
                let mut node = SyntaxNode::new(
                    "struct",
                    self.location_between(s.struct_token.span(), s.span()),
                );
                self.mark(&mut node, LocPart::Keyword, s.struct_token.span());
                self.mark(&mut node, LocPart::Name, s.ident.span());
                for field in &s.fields {
                    let mut child = self.node("field", field);
                    if let Some(ident) = &field.ident {
                        self.mark(&mut child, LocPart::Name, ident.span());
                    }
                    node.push(child);
                }
                node
            }
            Item::Enum(e) => {
                let mut node = SyntaxNode::new(
                    "enum",
                    self.location_between(e.enum_token.span(), e.brace_token.span.close()),
                );
                self.mark(&mut node, LocPart::Keyword, e.enum_token.span());
                self.mark(&mut node, LocPart::Name, e.ident.span());
                for variant in &e.variants {
                    let mut child = self.node("variant", variant);
                    self.mark(&mut child, LocPart::Name, variant.ident.span());
                    node.push(child);
                }
                node
            }
            Item::Mod(m) => {
                let mut node = SyntaxNode::new("module", self.location_between(m.mod_token.span(), m.span()));
                self.mark(&mut node, LocPart::Keyword, m.mod_token.span());
                self.mark(&mut node, LocPart::Name, m.ident.span());
                if let Some((brace, items)) = &m.content {
                    self.mark(&mut node, LocPart::Begin, brace.span.open());
                    self.mark(&mut node, LocPart::End, brace.span.close());
                    node.children = items.iter().map(|i| self.item(i)).collect();
                }
                node
            }
            Item::Use(u) => {
                let mut node = SyntaxNode::new("use", self.location_between(u.use_token.span(), u.span()));
                self.mark(&mut node, LocPart::Keyword, u.use_token.span());
                node
            }
            Item::Const(c) => {
                let mut node = SyntaxNode::new("const", self.location_between(c.const_token.span(), c.span()));
                self.mark(&mut node, LocPart::Keyword, c.const_token.span());
                self.mark(&mut node, LocPart::Name, c.ident.span());
                self.mark(&mut node, LocPart::Operator, c.eq_token.span());
                node.push(self.expr(&c.expr));
                node
            }
            Item::Static(s) => {
                let mut node = SyntaxNode::new("static", self.location_between(s.static_token.span(), s.span()));
                self.mark(&mut node, LocPart::Keyword, s.static_token.span());
                self.mark(&mut node, LocPart::Name, s.ident.span());
                self.mark(&mut node, LocPart::Operator, s.eq_token.span());
                node.push(self.expr(&s.expr));
                node
            }
            Item::Macro(m) => {
                let mut node = self.node("macro", m);
                self.mark(&mut node, LocPart::Name, m.mac.path.span());
                node
            }
            other => self.node("item", other),
        };
        Some(node)
    }

    /// Function definitions start at their signature so attributes and doc
    /// comments do not move `first_line` off the `fn` line.
    fn def(&self, sig: &Signature, body: Option<&Block>, end: Span) -> SyntaxNode {
        let kind = if body.is_some() { "def" } else { "sig" };
        let mut node = SyntaxNode::new(kind, self.location_between(sig.span(), end));
        self.mark(&mut node, LocPart::Keyword, sig.fn_token.span());
        self.mark(&mut node, LocPart::Name, sig.ident.span());

        let mut args = SyntaxNode::new(
            "args",
            self.location_between(sig.paren_token.span.open(), sig.paren_token.span.close()),
        );
        for input in &sig.inputs {
            let arg = match input {
                FnArg::Receiver(receiver) => {
                    let mut arg = self.node("self_arg", receiver);
                    self.mark(&mut arg, LocPart::Name, receiver.self_token.span());
                    arg
                }
                FnArg::Typed(typed) => {
                    let mut arg = self.node("arg", typed);
                    self.mark(&mut arg, LocPart::Name, typed.pat.span());
                    arg
                }
            };
            args.push(arg);
        }

        node.children = vec![Some(args), body.map(|b| self.block(b))];
        node
    }

    fn block(&self, block: &Block) -> SyntaxNode {
        let mut node = self.node("block", block);
        self.mark(&mut node, LocPart::Begin, block.brace_token.span.open());
        self.mark(&mut node, LocPart::End, block.brace_token.span.close());
        node.children = block.stmts.iter().map(|s| self.stmt(s)).collect();
        node
    }

    fn stmt(&self, stmt: &Stmt) -> Option<SyntaxNode> {
        match stmt {
            Stmt::Local(local) => {
                let mut node = self.node("let", local);
                self.mark(&mut node, LocPart::Keyword, local.let_token.span());
                let name_span = match &local.pat {
                    Pat::Ident(pi) => pi.ident.span(),
                    other => other.span(),
                };
                self.mark(&mut node, LocPart::Name, name_span);
                node.push(self.pat(&local.pat));
                if let Some(init) = &local.init {
                    self.mark(&mut node, LocPart::Operator, init.eq_token.span());
                    node.push(self.expr(&init.expr));
                    if let Some((else_token, diverge)) = &init.diverge {
                        self.mark(&mut node, LocPart::Else, else_token.span());
                        node.push(self.expr(diverge));
                    }
                }
                Some(node)
            }
            Stmt::Item(item) => self.item(item),
            Stmt::Expr(expr, _) => Some(self.expr(expr)),
            Stmt::Macro(m) => {
                let mut node = self.node("macro", m);
                self.mark(&mut node, LocPart::Name, m.mac.path.span());
                Some(node)
            }
        }
    }

    fn pat(&self, pat: &Pat) -> SyntaxNode {
        let mut node = self.node("pat", pat);
        if let Pat::Ident(pi) = pat {
            self.mark(&mut node, LocPart::Name, pi.ident.span());
        }
        node
    }

    fn exprs<'e>(&self, exprs: impl IntoIterator<Item = &'e Expr>) -> Vec<Option<SyntaxNode>> {
        exprs.into_iter().map(|e| Some(self.expr(e))).collect()
    }

    fn expr(&self, expr: &Expr) -> SyntaxNode {
        match expr {
            Expr::Call(call) => {
                let mut node = self.node("call", call);
                node.push(self.expr(&call.func));
                node.children.extend(self.exprs(&call.args));
                node
            }
            Expr::MethodCall(call) => {
                let mut node = self.node("send", call);
                self.mark(&mut node, LocPart::Dot, call.dot_token.span());
                self.mark(&mut node, LocPart::Selector, call.method.span());
                node.push(self.expr(&call.receiver));
                node.children.extend(self.exprs(&call.args));
                node
            }
            Expr::Binary(bin) => {
                let mut node = self.node("op", bin);
                self.mark(&mut node, LocPart::Operator, bin.op.span());
                node.push(self.expr(&bin.left));
                node.push(self.expr(&bin.right));
                node
            }
            Expr::Unary(un) => {
                let mut node = self.node("unary", un);
                self.mark(&mut node, LocPart::Operator, un.op.span());
                node.push(self.expr(&un.expr));
                node
            }
            Expr::Assign(assign) => {
                let mut node = self.node("assign", assign);
                self.mark(&mut node, LocPart::Operator, assign.eq_token.span());
                node.push(self.expr(&assign.left));
                node.push(self.expr(&assign.right));
                node
            }
            Expr::Path(path) => {
                let mut node = self.node("path", path);
                if let Some(last) = path.path.segments.last() {
                    self.mark(&mut node, LocPart::Name, last.ident.span());
                }
                if let Some(sep) = path.path.segments.pairs().filter_map(|p| p.punct().map(|sep| sep.span())).last() {
                    self.mark(&mut node, LocPart::DoubleColon, sep);
                }
                node
            }
            Expr::Lit(lit) => {
                let kind = match &lit.lit {
                    Lit::Int(_) => "int",
                    Lit::Float(_) => "float",
                    Lit::Str(_) => "str",
                    Lit::Char(_) => "char",
                    Lit::Bool(b) if b.value => "true",
                    Lit::Bool(_) => "false",
                    Lit::Byte(_) | Lit::ByteStr(_) => "bytes",
                    _ => "lit",
                };
                self.node(kind, lit)
            }
            Expr::If(branch) => {
                let mut node = self.node("if", branch);
                self.mark(&mut node, LocPart::Keyword, branch.if_token.span());
                node.push(self.expr(&branch.cond));
                node.push(self.block(&branch.then_branch));
                match &branch.else_branch {
                    Some((else_token, otherwise)) => {
                        self.mark(&mut node, LocPart::Else, else_token.span());
                        node.push(self.expr(otherwise));
                    }
                    None => node.children.push(None),
                }
                node
            }
            Expr::While(w) => {
                let mut node = self.node("while", w);
                self.mark(&mut node, LocPart::Keyword, w.while_token.span());
                node.push(self.expr(&w.cond));
                node.push(self.block(&w.body));
                node
            }
            Expr::ForLoop(f) => {
                let mut node = self.node("for", f);
                self.mark(&mut node, LocPart::Keyword, f.for_token.span());
                self.mark(&mut node, LocPart::In, f.in_token.span());
                node.push(self.pat(&f.pat));
                node.push(self.expr(&f.expr));
                node.push(self.block(&f.body));
                node
            }
            Expr::Loop(l) => {
                let mut node = self.node("loop", l);
                self.mark(&mut node, LocPart::Keyword, l.loop_token.span());
                node.push(self.block(&l.body));
                node
            }
            Expr::Match(m) => {
                let mut node = self.node("match", m);
                self.mark(&mut node, LocPart::Keyword, m.match_token.span());
                self.mark(&mut node, LocPart::Begin, m.brace_token.span.open());
                self.mark(&mut node, LocPart::End, m.brace_token.span.close());
                node.push(self.expr(&m.expr));
                for arm in &m.arms {
                    let mut child = self.node("arm", arm);
                    self.mark(&mut child, LocPart::Assoc, arm.fat_arrow_token.span());
                    child.push(self.pat(&arm.pat));
                    child.children.push(arm.guard.as_ref().map(|(_, guard)| self.expr(guard)));
                    child.push(self.expr(&arm.body));
                    node.push(child);
                }
                node
            }
            Expr::Return(r) => {
                let mut node = self.node("return", r);
                self.mark(&mut node, LocPart::Keyword, r.return_token.span());
                node.children.push(r.expr.as_ref().map(|e| self.expr(e)));
                node
            }
            Expr::Break(b) => {
                let mut node = self.node("break", b);
                self.mark(&mut node, LocPart::Keyword, b.break_token.span());
                node.children.push(b.expr.as_ref().map(|e| self.expr(e)));
                node
            }
            Expr::Continue(c) => {
                let mut node = self.node("next", c);
                self.mark(&mut node, LocPart::Keyword, c.continue_token.span());
                node
            }
            Expr::Block(b) => self.block(&b.block),
            Expr::Unsafe(u) => {
                let mut node = self.block(&u.block);
                node.kind = "unsafe".to_string();
                self.mark(&mut node, LocPart::Keyword, u.unsafe_token.span());
                node
            }
            Expr::Field(field) => {
                let mut node = self.node("field_access", field);
                self.mark(&mut node, LocPart::Dot, field.dot_token.span());
                self.mark(&mut node, LocPart::Selector, field.member.span());
                node.push(self.expr(&field.base));
                node
            }
            Expr::Index(index) => {
                let mut node = self.node("index", index);
                node.push(self.expr(&index.expr));
                node.push(self.expr(&index.index));
                node
            }
            Expr::Reference(r) => {
                let mut node = self.node("ref", r);
                self.mark(&mut node, LocPart::Operator, r.and_token.span());
                node.push(self.expr(&r.expr));
                node
            }
            Expr::Paren(p) => {
                let mut node = self.node("paren", p);
                node.push(self.expr(&p.expr));
                node
            }
            Expr::Try(t) => {
                let mut node = self.node("try", t);
                self.mark(&mut node, LocPart::Operator, t.question_token.span());
                node.push(self.expr(&t.expr));
                node
            }
            Expr::Closure(c) => {
                let mut node = self.node("closure", c);
                for input in &c.inputs {
                    let mut arg = self.pat(input);
                    arg.kind = "arg".to_string();
                    node.push(arg);
                }
                node.push(self.expr(&c.body));
                node
            }
            Expr::Struct(s) => {
                let mut node = self.node("struct_lit", s);
                self.mark(&mut node, LocPart::Name, s.path.span());
                for field in &s.fields {
                    node.push(self.expr(&field.expr));
                }
                node
            }
            Expr::Tuple(t) => {
                let mut node = self.node("tuple", t);
                node.children = self.exprs(&t.elems);
                node
            }
            Expr::Array(a) => {
                let mut node = self.node("array", a);
                node.children = self.exprs(&a.elems);
                node
            }
            Expr::Macro(m) => {
                let mut node = self.node("macro", m);
                self.mark(&mut node, LocPart::Name, m.mac.path.span());
                node
            }
            Expr::Range(r) => {
                let mut node = self.node("range", r);
                self.mark(&mut node, LocPart::Operator, r.limits.span());
                node.children.push(r.start.as_ref().map(|e| self.expr(e)));
                node.children.push(r.end.as_ref().map(|e| self.expr(e)));
                node
            }
            Expr::Cast(c) => {
                let mut node = self.node("cast", c);
                self.mark(&mut node, LocPart::Operator, c.as_token.span());
                node.push(self.expr(&c.expr));
                node
            }
            Expr::Let(l) => {
                let mut node = self.node("let_cond", l);
                self.mark(&mut node, LocPart::Keyword, l.let_token.span());
                node.push(self.pat(&l.pat));
                node.push(self.expr(&l.expr));
                node
            }
            Expr::Await(a) => {
                let mut node = self.node("await", a);
                self.mark(&mut node, LocPart::Dot, a.dot_token.span());
                self.mark(&mut node, LocPart::Keyword, a.await_token.span());
                node.push(self.expr(&a.base));
                node
            }
            other => self.node("expr", other),
        }
    }
}
