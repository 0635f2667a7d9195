//! Tree model and source spans for XL.
//!
//! Programs and type terms share one representation: a tree over eight node
//! kinds, stored in a [`TreeArena`] and addressed by [`TreeId`]. Node
//! identity (the id), not structural equality, is what type inference keys
//! on. Every node carries a [`Span`] for source location tracking.

use std::fmt::Write as _;

/// Identifies a source file in the compilation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

impl FileId {
    /// Position could not be determined.
    pub const UNKNOWN: FileId = FileId(u32::MAX);
    /// Tree came from the command line rather than a file.
    pub const COMMAND_LINE: FileId = FileId(u32::MAX - 1);
}

/// A byte offset range within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub file: FileId,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(file: FileId, start: u32, end: u32) -> Self {
        Self { file, start, end }
    }

    /// Create a span that covers both `self` and `other`.
    pub fn merge(self, other: Span) -> Span {
        debug_assert_eq!(
            self.file, other.file,
            "cannot merge spans from different files"
        );
        Span {
            file: self.file,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// A synthetic span for compiler-generated nodes.
    pub fn unknown() -> Self {
        Self {
            file: FileId::UNKNOWN,
            start: 0,
            end: 0,
        }
    }

    pub fn command_line() -> Self {
        Self {
            file: FileId::COMMAND_LINE,
            start: 0,
            end: 0,
        }
    }

    pub fn is_unknown(self) -> bool {
        self.file == FileId::UNKNOWN
    }
}

/// A value paired with its source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            node: f(self.node),
            span: self.span,
        }
    }
}

// ---------------------------------------------------------------------------
// Trees
// ---------------------------------------------------------------------------

/// Index of a node in a [`TreeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(pub u32);

impl TreeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Discriminant of a tree node, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Integer,
    Real,
    Text,
    Name,
    Block,
    Prefix,
    Postfix,
    Infix,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Integer => "integer",
            Kind::Real => "real",
            Kind::Text => "text",
            Kind::Name => "name",
            Kind::Block => "block",
            Kind::Prefix => "prefix",
            Kind::Postfix => "postfix",
            Kind::Infix => "infix",
        }
    }
}

/// Payload of a tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeKind {
    Integer(i64),
    Real(f64),
    /// Quoted text. `"abc"` is text, `'a'` is a character.
    Text {
        value: String,
        opening: String,
        closing: String,
    },
    /// Alphanumeric name or operator symbol.
    Name(String),
    /// Grouping: `(child)`, `[child]`, `{child}`, or an indentation block.
    Block {
        child: TreeId,
        opening: String,
        closing: String,
    },
    /// `left right`, e.g. `sin x`.
    Prefix { left: TreeId, right: TreeId },
    /// `left right` where the operator is on the right, e.g. `3 km`.
    Postfix { left: TreeId, right: TreeId },
    /// `left name right`, e.g. `X + Y`, `A; B`, `X -> Y`.
    Infix {
        name: String,
        left: TreeId,
        right: TreeId,
    },
}

impl TreeKind {
    pub fn kind(&self) -> Kind {
        match self {
            TreeKind::Integer(_) => Kind::Integer,
            TreeKind::Real(_) => Kind::Real,
            TreeKind::Text { .. } => Kind::Text,
            TreeKind::Name(_) => Kind::Name,
            TreeKind::Block { .. } => Kind::Block,
            TreeKind::Prefix { .. } => Kind::Prefix,
            TreeKind::Postfix { .. } => Kind::Postfix,
            TreeKind::Infix { .. } => Kind::Infix,
        }
    }
}

pub type Node = Spanned<TreeKind>;

/// Owns every tree node of a compilation session.
///
/// Composite nodes reference children built before them, so a node exclusively
/// owns its subtree and the arena never contains cycles. Nodes are never
/// mutated after allocation; rewriting a tree means building a new one.
#[derive(Debug, Clone, Default)]
pub struct TreeArena {
    nodes: Vec<Node>,
}

impl TreeArena {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn alloc(&mut self, kind: TreeKind, span: Span) -> TreeId {
        let id = TreeId(self.nodes.len() as u32);
        self.nodes.push(Spanned::new(kind, span));
        id
    }

    pub fn node(&self, id: TreeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: TreeId) -> &TreeKind {
        &self.nodes[id.index()].node
    }

    pub fn span(&self, id: TreeId) -> Span {
        self.nodes[id.index()].span
    }

    pub fn kind(&self, id: TreeId) -> Kind {
        self.get(id).kind()
    }

    // -- builders --

    pub fn integer(&mut self, value: i64, span: Span) -> TreeId {
        self.alloc(TreeKind::Integer(value), span)
    }

    pub fn real(&mut self, value: f64, span: Span) -> TreeId {
        self.alloc(TreeKind::Real(value), span)
    }

    /// Double-quoted text.
    pub fn text(&mut self, value: impl Into<String>, span: Span) -> TreeId {
        self.text_with(value, "\"", "\"", span)
    }

    /// Single-quoted character literal.
    pub fn character(&mut self, value: impl Into<String>, span: Span) -> TreeId {
        self.text_with(value, "'", "'", span)
    }

    pub fn text_with(
        &mut self,
        value: impl Into<String>,
        opening: impl Into<String>,
        closing: impl Into<String>,
        span: Span,
    ) -> TreeId {
        self.alloc(
            TreeKind::Text {
                value: value.into(),
                opening: opening.into(),
                closing: closing.into(),
            },
            span,
        )
    }

    pub fn name(&mut self, value: impl Into<String>, span: Span) -> TreeId {
        self.alloc(TreeKind::Name(value.into()), span)
    }

    pub fn block(
        &mut self,
        child: TreeId,
        opening: impl Into<String>,
        closing: impl Into<String>,
        span: Span,
    ) -> TreeId {
        self.alloc(
            TreeKind::Block {
                child,
                opening: opening.into(),
                closing: closing.into(),
            },
            span,
        )
    }

    /// `(child)`
    pub fn paren(&mut self, child: TreeId, span: Span) -> TreeId {
        self.block(child, "(", ")", span)
    }

    pub fn prefix(&mut self, left: TreeId, right: TreeId, span: Span) -> TreeId {
        self.alloc(TreeKind::Prefix { left, right }, span)
    }

    pub fn postfix(&mut self, left: TreeId, right: TreeId, span: Span) -> TreeId {
        self.alloc(TreeKind::Postfix { left, right }, span)
    }

    pub fn infix(
        &mut self,
        name: impl Into<String>,
        left: TreeId,
        right: TreeId,
        span: Span,
    ) -> TreeId {
        self.alloc(
            TreeKind::Infix {
                name: name.into(),
                left,
                right,
            },
            span,
        )
    }

    // -- views --

    pub fn as_integer(&self, id: TreeId) -> Option<i64> {
        match self.get(id) {
            TreeKind::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_real(&self, id: TreeId) -> Option<f64> {
        match self.get(id) {
            TreeKind::Real(value) => Some(*value),
            _ => None,
        }
    }

    /// Text value with its delimiters.
    pub fn as_text(&self, id: TreeId) -> Option<(&str, &str, &str)> {
        match self.get(id) {
            TreeKind::Text {
                value,
                opening,
                closing,
            } => Some((value, opening, closing)),
            _ => None,
        }
    }

    pub fn as_name(&self, id: TreeId) -> Option<&str> {
        match self.get(id) {
            TreeKind::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_block(&self, id: TreeId) -> Option<(TreeId, &str, &str)> {
        match self.get(id) {
            TreeKind::Block {
                child,
                opening,
                closing,
            } => Some((*child, opening, closing)),
            _ => None,
        }
    }

    pub fn as_prefix(&self, id: TreeId) -> Option<(TreeId, TreeId)> {
        match self.get(id) {
            TreeKind::Prefix { left, right } => Some((*left, *right)),
            _ => None,
        }
    }

    pub fn as_postfix(&self, id: TreeId) -> Option<(TreeId, TreeId)> {
        match self.get(id) {
            TreeKind::Postfix { left, right } => Some((*left, *right)),
            _ => None,
        }
    }

    pub fn as_infix(&self, id: TreeId) -> Option<(&str, TreeId, TreeId)> {
        match self.get(id) {
            TreeKind::Infix { name, left, right } => Some((name, *left, *right)),
            _ => None,
        }
    }

    /// Infix with the given operator name.
    pub fn as_infix_named(&self, id: TreeId, op: &str) -> Option<(TreeId, TreeId)> {
        match self.get(id) {
            TreeKind::Infix { name, left, right } if name == op => Some((*left, *right)),
            _ => None,
        }
    }

    /// Prefix whose head is the given name, e.g. `type (P)` or `opcode Add`.
    pub fn as_prefix_named(&self, id: TreeId, head: &str) -> Option<TreeId> {
        let (left, right) = self.as_prefix(id)?;
        (self.as_name(left) == Some(head)).then_some(right)
    }

    /// Integer, real and text literals.
    pub fn is_constant(&self, id: TreeId) -> bool {
        matches!(
            self.get(id),
            TreeKind::Integer(_) | TreeKind::Real(_) | TreeKind::Text { .. }
        )
    }

    pub fn children(&self, id: TreeId) -> Vec<TreeId> {
        match self.get(id) {
            TreeKind::Integer(_) | TreeKind::Real(_) | TreeKind::Text { .. } | TreeKind::Name(_) => {
                Vec::new()
            }
            TreeKind::Block { child, .. } => vec![*child],
            TreeKind::Prefix { left, right }
            | TreeKind::Postfix { left, right }
            | TreeKind::Infix { left, right, .. } => vec![*left, *right],
        }
    }

    /// Remove any number of surrounding blocks.
    pub fn strip_blocks(&self, mut id: TreeId) -> TreeId {
        while let Some((child, _, _)) = self.as_block(id) {
            id = child;
        }
        id
    }

    /// Deep copy of `root` with fresh identities, assembled bottom-up.
    ///
    /// Spans are preserved so diagnostics on the copy still point at the
    /// source the template came from.
    pub fn instantiate(&mut self, root: TreeId) -> TreeId {
        let span = self.span(root);
        let kind = match self.get(root).clone() {
            TreeKind::Block {
                child,
                opening,
                closing,
            } => TreeKind::Block {
                child: self.instantiate(child),
                opening,
                closing,
            },
            TreeKind::Prefix { left, right } => TreeKind::Prefix {
                left: self.instantiate(left),
                right: self.instantiate(right),
            },
            TreeKind::Postfix { left, right } => TreeKind::Postfix {
                left: self.instantiate(left),
                right: self.instantiate(right),
            },
            TreeKind::Infix { name, left, right } => TreeKind::Infix {
                name,
                left: self.instantiate(left),
                right: self.instantiate(right),
            },
            leaf => leaf,
        };
        self.alloc(kind, span)
    }

    /// Structural equality: same kinds, values, delimiters and operator names.
    pub fn same_shape(&self, a: TreeId, b: TreeId) -> bool {
        if a == b {
            return true;
        }
        match (self.get(a), self.get(b)) {
            (TreeKind::Integer(x), TreeKind::Integer(y)) => x == y,
            (TreeKind::Real(x), TreeKind::Real(y)) => x == y,
            (
                TreeKind::Text {
                    value: v1,
                    opening: o1,
                    closing: c1,
                },
                TreeKind::Text {
                    value: v2,
                    opening: o2,
                    closing: c2,
                },
            ) => v1 == v2 && o1 == o2 && c1 == c2,
            (TreeKind::Name(x), TreeKind::Name(y)) => x == y,
            (
                TreeKind::Block {
                    child: x,
                    opening: o1,
                    closing: c1,
                },
                TreeKind::Block {
                    child: y,
                    opening: o2,
                    closing: c2,
                },
            ) => o1 == o2 && c1 == c2 && self.same_shape(*x, *y),
            (TreeKind::Prefix { left: l1, right: r1 }, TreeKind::Prefix { left: l2, right: r2 })
            | (
                TreeKind::Postfix { left: l1, right: r1 },
                TreeKind::Postfix { left: l2, right: r2 },
            ) => self.same_shape(*l1, *l2) && self.same_shape(*r1, *r2),
            (
                TreeKind::Infix {
                    name: n1,
                    left: l1,
                    right: r1,
                },
                TreeKind::Infix {
                    name: n2,
                    left: l2,
                    right: r2,
                },
            ) => n1 == n2 && self.same_shape(*l1, *l2) && self.same_shape(*r1, *r2),
            _ => false,
        }
    }

    /// Canonical textual form of a tree.
    pub fn render(&self, id: TreeId) -> String {
        let mut out = String::new();
        self.render_into(id, &mut out);
        out
    }

    fn render_into(&self, id: TreeId, out: &mut String) {
        match self.get(id) {
            TreeKind::Integer(value) => {
                let _ = write!(out, "{value}");
            }
            TreeKind::Real(value) => out.push_str(&render_real(*value)),
            TreeKind::Text {
                value,
                opening,
                closing,
            } => {
                out.push_str(opening);
                out.push_str(value);
                out.push_str(closing);
            }
            TreeKind::Name(name) => out.push_str(name),
            TreeKind::Block {
                child,
                opening,
                closing,
            } => {
                out.push_str(opening);
                self.render_into(*child, out);
                out.push_str(closing);
            }
            TreeKind::Prefix { left, right } | TreeKind::Postfix { left, right } => {
                self.render_into(*left, out);
                out.push(' ');
                self.render_into(*right, out);
            }
            TreeKind::Infix { name, left, right } => {
                self.render_into(*left, out);
                match name.as_str() {
                    "\n" => out.push('\n'),
                    ";" | "," => {
                        out.push_str(name);
                        out.push(' ');
                    }
                    _ => {
                        out.push(' ');
                        out.push_str(name);
                        out.push(' ');
                    }
                }
                self.render_into(*right, out);
            }
        }
    }
}

fn render_real(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Operator names separating statements of a sequence.
pub fn is_sequence_operator(name: &str) -> bool {
    name == ";" || name == "\n"
}

/// Flatten a statement sequence (`A; B; C` or newline-separated) in order.
pub fn sequence_items(trees: &TreeArena, root: TreeId) -> Vec<TreeId> {
    let mut items = Vec::new();
    let mut pending = vec![root];
    while let Some(id) = pending.pop() {
        match trees.get(id) {
            TreeKind::Infix { name, left, right } if is_sequence_operator(name) => {
                pending.push(*right);
                pending.push(*left);
            }
            _ => items.push(id),
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s() -> Span {
        Span::new(FileId(0), 0, 1)
    }

    #[test]
    fn span_merge() {
        let file = FileId(0);
        let a = Span::new(file, 10, 20);
        let b = Span::new(file, 15, 30);
        let merged = a.merge(b);
        assert_eq!(merged.start, 10);
        assert_eq!(merged.end, 30);
    }

    #[test]
    fn spanned_map() {
        let s = Spanned::new(42, Span::new(FileId(0), 0, 1));
        let s2 = s.map(|n| n.to_string());
        assert_eq!(s2.node, "42");
    }

    #[test]
    fn sentinel_spans() {
        assert!(Span::unknown().is_unknown());
        assert!(!Span::command_line().is_unknown());
        assert_eq!(Span::command_line().file, FileId::COMMAND_LINE);
    }

    #[test]
    fn render_prefix_with_block() {
        // fact (N - 1)
        let mut t = TreeArena::new();
        let fact = t.name("fact", s());
        let n = t.name("N", s());
        let one = t.integer(1, s());
        let minus = t.infix("-", n, one, s());
        let paren = t.paren(minus, s());
        let call = t.prefix(fact, paren, s());
        assert_eq!(t.render(call), "fact (N - 1)");
    }

    #[test]
    fn render_literals_and_sequences() {
        let mut t = TreeArena::new();
        let r = t.real(2.0, s());
        let txt = t.text("hi", s());
        let ch = t.character("c", s());
        let a = t.infix(";", r, txt, s());
        let b = t.infix("\n", a, ch, s());
        assert_eq!(t.render(b), "2.0; \"hi\"\n'c'");
        let half = t.real(0.5, s());
        assert_eq!(t.render(half), "0.5");
    }

    #[test]
    fn instantiate_gives_fresh_identities() {
        let mut t = TreeArena::new();
        let x = t.name("X", s());
        let one = t.integer(1, s());
        let sum = t.infix("+", x, one, s());
        let copy = t.instantiate(sum);
        assert_ne!(copy, sum);
        assert!(t.same_shape(copy, sum));
        let (_, left, _) = t.as_infix(copy).unwrap();
        assert_ne!(left, x);
        assert_eq!(t.as_name(left), Some("X"));
    }

    #[test]
    fn same_shape_distinguishes_delimiters() {
        let mut t = TreeArena::new();
        let a = t.text("a", s());
        let b = t.character("a", s());
        assert!(!t.same_shape(a, b));
        let c = t.text("a", s());
        assert!(t.same_shape(a, c));
    }

    #[test]
    fn sequence_items_in_order() {
        let mut t = TreeArena::new();
        let a = t.name("a", s());
        let b = t.name("b", s());
        let c = t.name("c", s());
        let ab = t.infix(";", a, b, s());
        let abc = t.infix("\n", ab, c, s());
        assert_eq!(sequence_items(&t, abc), vec![a, b, c]);
    }

    #[test]
    fn strip_blocks_removes_nesting() {
        let mut t = TreeArena::new();
        let x = t.name("x", s());
        let p = t.paren(x, s());
        let q = t.block(p, "[", "]", s());
        assert_eq!(t.strip_blocks(q), x);
    }
}
