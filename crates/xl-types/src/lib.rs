//! Type terms, type tables and type algebra for XL.
//!
//! Types are trees. A type term is one of:
//! - a type name: `integer`, `real`, `tree`, ...
//! - a generic type variable: `#A`, `#B`, ... (never bound in a scope)
//! - a literal value standing for itself: `0`, `1.5`, `"Hello"`
//! - a union: `integer | real` (also written `A , B`)
//! - a function type: `integer => integer`
//! - a pattern type: `type (X + Y)`
//! - a block, for grouping: `(real)`
//!
//! [`TypeTables`] holds the per-pass state (node types, the union-find over
//! type terms, the fresh-name counter). [`TypeAlgebra`] answers coverage and
//! matching questions over type terms.

use std::collections::BTreeMap;

use xl_ast::{Span, TreeArena, TreeId, TreeKind};
use xl_diag::{Category, Diagnostic, ErrorArg, ErrorLog, SourceLocation};

// ---------------------------------------------------------------------------
// Builtin types
// ---------------------------------------------------------------------------

/// Trees for the builtin type names and the self-bound boolean constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinTypes {
    pub integer: TreeId,
    pub real: TreeId,
    pub text: TreeId,
    pub character: TreeId,
    pub boolean: TreeId,
    /// The universal type: covers every value.
    pub tree: TreeId,
    pub symbol: TreeId,
    pub name: TreeId,
    pub operator: TreeId,
    pub infix: TreeId,
    pub prefix: TreeId,
    pub postfix: TreeId,
    pub block: TreeId,
    pub true_value: TreeId,
    pub false_value: TreeId,
}

impl BuiltinTypes {
    /// Allocate the builtin names in `trees`.
    pub fn install(trees: &mut TreeArena) -> Self {
        let mut alloc = |text: &str| trees.name(text, Span::unknown());
        Self {
            integer: alloc("integer"),
            real: alloc("real"),
            text: alloc("text"),
            character: alloc("character"),
            boolean: alloc("boolean"),
            tree: alloc("tree"),
            symbol: alloc("symbol"),
            name: alloc("name"),
            operator: alloc("operator"),
            infix: alloc("infix"),
            prefix: alloc("prefix"),
            postfix: alloc("postfix"),
            block: alloc("block"),
            true_value: alloc("true"),
            false_value: alloc("false"),
        }
    }

    /// Every builtin, in declaration order. Each is bound to itself in the
    /// root scope.
    pub fn all(&self) -> [TreeId; 15] {
        [
            self.integer,
            self.real,
            self.text,
            self.character,
            self.boolean,
            self.tree,
            self.symbol,
            self.name,
            self.operator,
            self.infix,
            self.prefix,
            self.postfix,
            self.block,
            self.true_value,
            self.false_value,
        ]
    }

    pub fn lookup(&self, name: &str) -> Option<TreeId> {
        let id = match name {
            "integer" => self.integer,
            "real" => self.real,
            "text" => self.text,
            "character" => self.character,
            "boolean" => self.boolean,
            "tree" => self.tree,
            "symbol" => self.symbol,
            "name" => self.name,
            "operator" => self.operator,
            "infix" => self.infix,
            "prefix" => self.prefix,
            "postfix" => self.postfix,
            "block" => self.block,
            "true" => self.true_value,
            "false" => self.false_value,
            _ => return None,
        };
        Some(id)
    }

    /// Named type a literal promotes to.
    pub fn literal_type(&self, trees: &TreeArena, ty: TreeId) -> Option<TreeId> {
        match trees.get(ty) {
            TreeKind::Integer(_) => Some(self.integer),
            TreeKind::Real(_) => Some(self.real),
            TreeKind::Text { opening, .. } if opening == "'" => Some(self.character),
            TreeKind::Text { .. } => Some(self.text),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Type term shapes
// ---------------------------------------------------------------------------

/// `#A`, `#B`, ...
pub fn is_generic(trees: &TreeArena, ty: TreeId) -> bool {
    trees.as_name(ty).is_some_and(|name| name.starts_with('#'))
}

/// A name that is not a generic variable.
pub fn is_type_name(trees: &TreeArena, ty: TreeId) -> bool {
    trees.as_name(ty).is_some_and(|name| !name.starts_with('#'))
}

/// `A | B` or `A , B`.
pub fn as_union(trees: &TreeArena, ty: TreeId) -> Option<(TreeId, TreeId)> {
    match trees.as_infix(ty)? {
        ("|" | ",", left, right) => Some((left, right)),
        _ => None,
    }
}

/// `A => B`. The algebra also accepts `A -> B` when matching values.
pub fn as_function(trees: &TreeArena, ty: TreeId) -> Option<(TreeId, TreeId)> {
    trees.as_infix_named(ty, "=>")
}

fn as_function_like(trees: &TreeArena, ty: TreeId) -> Option<(TreeId, TreeId)> {
    match trees.as_infix(ty)? {
        ("=>" | "->", left, right) => Some((left, right)),
        _ => None,
    }
}

/// `type P` / `type (P)`: returns the pattern.
pub fn as_pattern_type(trees: &TreeArena, ty: TreeId) -> Option<TreeId> {
    trees.as_prefix_named(ty, "type")
}

pub fn span_to_location(span: Span) -> SourceLocation {
    SourceLocation {
        file_id: span.file.0,
        start: span.start,
        end: span.end,
    }
}

/// Diagnostic argument for a tree: its rendering and position.
pub fn tree_arg(trees: &TreeArena, id: TreeId) -> ErrorArg {
    ErrorArg::tree(trees.render(id), span_to_location(trees.span(id)))
}

// ---------------------------------------------------------------------------
// Type tables
// ---------------------------------------------------------------------------

/// Per-pass type state shared by every session of one analysis.
///
/// `links` is the union-find parent array over type terms, indexed by tree
/// id. A term without a link is its own representative. Links are only ever
/// added, so unification is monotonic within a pass.
#[derive(Debug, Clone, Default)]
pub struct TypeTables {
    types: BTreeMap<TreeId, TreeId>,
    links: Vec<Option<TreeId>>,
    next_name: u32,
}

impl TypeTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type recorded for a node, not canonicalized.
    pub fn assigned(&self, node: TreeId) -> Option<TreeId> {
        self.types.get(&node).copied()
    }

    pub fn set_assigned(&mut self, node: TreeId, ty: TreeId) {
        self.types.insert(node, ty);
    }

    pub fn assigned_types(&self) -> impl Iterator<Item = (TreeId, TreeId)> + '_ {
        self.types.iter().map(|(node, ty)| (*node, *ty))
    }

    fn link_of(&self, ty: TreeId) -> Option<TreeId> {
        self.links.get(ty.index()).copied().flatten()
    }

    /// Representative of `ty`, compressing the path behind it.
    pub fn base(&mut self, ty: TreeId) -> TreeId {
        let root = self.find(ty);
        let mut current = ty;
        while current != root {
            let Some(next) = self.link_of(current) else {
                break;
            };
            self.links[current.index()] = Some(root);
            current = next;
        }
        root
    }

    /// Representative of `ty` without touching the table.
    pub fn find(&self, ty: TreeId) -> TreeId {
        let mut root = ty;
        while let Some(next) = self.link_of(root) {
            debug_assert_ne!(next, ty, "circularity in unification chain");
            root = next;
        }
        root
    }

    /// Make `base` the representative of `other`'s class.
    pub fn link(&mut self, other: TreeId, base: TreeId) {
        let other = self.base(other);
        let base = self.base(base);
        if other == base {
            return;
        }
        if self.links.len() <= other.index() {
            self.links.resize(other.index() + 1, None);
        }
        self.links[other.index()] = Some(base);
    }

    /// Direct links recorded so far, in term order.
    pub fn unifications(&self) -> impl Iterator<Item = (TreeId, TreeId)> + '_ {
        self.links
            .iter()
            .enumerate()
            .filter_map(|(index, link)| link.map(|to| (TreeId(index as u32), to)))
    }

    /// Fresh generic type variable: `#A` ... `#Z`, `#BA`, `#BB`, ...
    pub fn new_type_name(&mut self, trees: &mut TreeArena, span: Span) -> TreeId {
        let name = generic_name(self.next_name);
        self.next_name += 1;
        trees.name(name, span)
    }
}

fn generic_name(mut index: u32) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(char::from(b'A' + (index % 26) as u8));
        index /= 26;
        if index == 0 {
            break;
        }
    }
    letters.push('#');
    letters.iter().rev().collect()
}

// ---------------------------------------------------------------------------
// Type algebra
// ---------------------------------------------------------------------------

/// Coverage, intersection and matching over type terms.
///
/// Type names resolve to the builtin of the same name and generic variables
/// to their union-find representative before they are compared.
pub struct TypeAlgebra<'a> {
    pub trees: &'a mut TreeArena,
    pub builtins: &'a BuiltinTypes,
    pub tables: &'a mut TypeTables,
    pub log: &'a mut ErrorLog,
}

impl TypeAlgebra<'_> {
    fn resolve(&mut self, ty: TreeId) -> TreeId {
        let ty = if is_generic(self.trees, ty) {
            self.tables.base(ty)
        } else {
            ty
        };
        match self.trees.as_name(ty) {
            Some(name) => self.builtins.lookup(name).unwrap_or(ty),
            None => ty,
        }
    }

    fn unimplemented(&mut self, template: &str, first: TreeId, second: TreeId) {
        let args = [tree_arg(self.trees, first), tree_arg(self.trees, second)];
        self.log.push(Diagnostic::from_template(
            Category::Unimplemented,
            template,
            &args,
        ));
    }

    /// Check `value` against `ty`. Returns the matching value, which is a new
    /// real when `convert` widens an integer literal.
    pub fn value_matches_type(
        &mut self,
        ty: TreeId,
        value: TreeId,
        convert: bool,
    ) -> Option<TreeId> {
        let ty = self.resolve(ty);
        let b = *self.builtins;

        if ty == b.tree {
            return Some(value);
        }
        let leaf = match self.trees.get(value) {
            TreeKind::Integer(_) => ty == b.integer,
            TreeKind::Real(_) => ty == b.real,
            TreeKind::Text {
                opening, closing, ..
            } => {
                (ty == b.text && opening == "\"" && closing == "\"")
                    || (ty == b.character && opening == "'" && closing == "'")
            }
            TreeKind::Name(name) => {
                let alphabetic = name.chars().next().is_some_and(char::is_alphabetic);
                (ty == b.boolean && (name == "true" || name == "false"))
                    || ty == b.symbol
                    || (ty == b.name && alphabetic)
                    || (ty == b.operator && !name.is_empty() && !alphabetic)
            }
            TreeKind::Infix { .. } => ty == b.infix,
            TreeKind::Prefix { .. } => ty == b.prefix,
            TreeKind::Postfix { .. } => ty == b.postfix,
            TreeKind::Block { .. } => ty == b.block,
        };
        if leaf {
            return Some(value);
        }
        if ty == b.real
            && convert
            && let Some(integer) = self.trees.as_integer(value)
        {
            let span = self.trees.span(value);
            return Some(self.trees.real(integer as f64, span));
        }

        // Constants as singleton types
        let constant = match (self.trees.get(ty), self.trees.get(value)) {
            (TreeKind::Integer(t), TreeKind::Integer(v)) => t == v,
            (TreeKind::Real(t), TreeKind::Real(v)) => t == v,
            (
                TreeKind::Text {
                    value: t,
                    opening: to,
                    closing: tc,
                },
                TreeKind::Text {
                    value: v,
                    opening: vo,
                    closing: vc,
                },
            ) => t == v && to == vo && tc == vc,
            (TreeKind::Name(t), TreeKind::Name(v)) => !t.starts_with('#') && t == v,
            _ => false,
        };
        if constant {
            return Some(value);
        }

        // Constructed types
        if let Some((child, _, _)) = self.trees.as_block(ty) {
            return self.value_matches_type(child, value, convert);
        }
        if let Some((left, right)) = as_union(self.trees, ty) {
            return self
                .value_matches_type(left, value, convert)
                .or_else(|| self.value_matches_type(right, value, convert));
        }
        if as_function_like(self.trees, ty).is_some() && as_function_like(self.trees, value).is_some() {
            self.unimplemented(
                "Unimplemented: signature comparison of $1 and $2",
                value,
                ty,
            );
            return Some(value);
        }
        if as_pattern_type(self.trees, ty).is_some() {
            self.unimplemented(
                "Unimplemented: testing $1 against pattern-based type $2",
                value,
                ty,
            );
            return Some(value);
        }
        None
    }

    /// Whether every value of `test` is a value of `ty`.
    pub fn type_covers_type(&mut self, ty: TreeId, test: TreeId, convert: bool) -> bool {
        let ty = self.resolve(ty);
        let test = self.resolve(test);
        let b = *self.builtins;
        if ty == test || ty == b.tree {
            return true;
        }
        if convert && ty == b.real && test == b.integer {
            return true;
        }

        // 'integer' covers '0 | 1' if it covers both
        if let Some((left, right)) = as_union(self.trees, test) {
            if self.type_covers_type(ty, left, convert)
                && self.type_covers_type(ty, right, convert)
            {
                return true;
            }
        } else if as_function(self.trees, test).is_some()
            && as_function(self.trees, ty).is_some()
        {
            self.unimplemented("Unimplemented: coverage of function $1 by $2", test, ty);
            return true;
        }
        if let Some((child, _, _)) = self.trees.as_block(test) {
            return self.type_covers_type(ty, child, convert);
        }
        if self.trees.is_constant(test) && self.value_matches_type(ty, test, convert).is_some() {
            return true;
        }
        if self.same_named(ty, test) {
            return true;
        }

        if let Some((child, _, _)) = self.trees.as_block(ty) {
            return self.type_covers_type(child, test, convert);
        }
        if let Some((left, right)) = as_union(self.trees, ty) {
            return self.type_covers_type(left, test, convert)
                || self.type_covers_type(right, test, convert);
        }
        if as_pattern_type(self.trees, ty).is_some() {
            self.unimplemented(
                "Unimplemented: pattern type comparison of $1 against $2",
                test,
                ty,
            );
            return true;
        }
        false
    }

    /// Whether some value belongs to both `ty` and `test`.
    pub fn type_intersects_type(&mut self, ty: TreeId, test: TreeId, convert: bool) -> bool {
        let ty = self.resolve(ty);
        let test = self.resolve(test);
        let b = *self.builtins;
        if ty == test || ty == b.tree || test == b.tree {
            return true;
        }
        if convert
            && ((ty == b.real && test == b.integer) || (ty == b.integer && test == b.real))
        {
            return true;
        }

        // 'integer' intersects '0 | 1' if it intersects either
        if let Some((left, right)) = as_union(self.trees, test) {
            if self.type_intersects_type(ty, left, convert)
                || self.type_intersects_type(ty, right, convert)
            {
                return true;
            }
        } else if as_function(self.trees, test).is_some()
            && as_function(self.trees, ty).is_some()
        {
            self.unimplemented("Unimplemented: coverage of function $1 by $2", test, ty);
            return true;
        }
        if let Some((child, _, _)) = self.trees.as_block(test) {
            return self.type_intersects_type(ty, child, convert);
        }
        if self.trees.is_constant(test) && self.value_matches_type(ty, test, convert).is_some() {
            return true;
        }
        if self.trees.is_constant(ty) && self.value_matches_type(test, ty, convert).is_some() {
            return true;
        }
        if self.same_named(ty, test) {
            return true;
        }

        if let Some((child, _, _)) = self.trees.as_block(ty) {
            return self.type_intersects_type(child, test, convert);
        }
        if let Some((left, right)) = as_union(self.trees, ty) {
            return self.type_intersects_type(left, test, convert)
                || self.type_intersects_type(right, test, convert);
        }
        if as_pattern_type(self.trees, ty).is_some() {
            self.unimplemented(
                "Unimplemented: pattern type comparison of $1 against $2",
                test,
                ty,
            );
            return true;
        }
        false
    }

    /// Two spellings of the same non-generic name.
    fn same_named(&self, a: TreeId, b: TreeId) -> bool {
        match (self.trees.as_name(a), self.trees.as_name(b)) {
            (Some(x), Some(y)) => !x.starts_with('#') && x == y,
            _ => false,
        }
    }

    /// `t1` if it covers `t2`, `t2` if it covers `t1`, else `t1 | t2`.
    pub fn union_type(&mut self, t1: TreeId, t2: TreeId) -> TreeId {
        if self.type_covers_type(t1, t2, false) {
            return t1;
        }
        if self.type_covers_type(t2, t1, false) {
            return t2;
        }
        let span = self.trees.span(t1);
        self.trees.infix("|", t1, t2, span)
    }

    /// Most specific type of a value seen as a tree.
    pub fn canonical_type(&self, value: TreeId) -> TreeId {
        let b = self.builtins;
        match self.trees.get(value) {
            TreeKind::Integer(_) | TreeKind::Real(_) | TreeKind::Text { .. } => value,
            TreeKind::Name(_) => b.symbol,
            TreeKind::Infix { .. } => b.infix,
            TreeKind::Prefix { .. } => b.prefix,
            TreeKind::Postfix { .. } => b.postfix,
            TreeKind::Block { .. } => b.block,
        }
    }
}
