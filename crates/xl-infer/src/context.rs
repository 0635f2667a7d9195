//! Lexical scopes and the rewrite rules declared in them.
//!
//! A [`Context`] is an arena of scopes. Each scope keeps its rules in
//! declaration order and indexes them in three tables keyed by the pattern's
//! leading symbol: names (plain names, prefix heads, postfix tails and
//! literal constants), infix operators and block openings. Parents are
//! referenced by [`ScopeId`], never by pointer.

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use xl_ast::{Kind, TreeArena, TreeId, TreeKind};

/// Index of a scope in a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

/// Locates a rule: the scope that declared it and its position there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleRef {
    pub scope: ScopeId,
    pub index: usize,
}

/// How far a lookup may walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupMode {
    /// Only the given scope, as when declaring.
    Scope,
    /// The given scope, then its ancestors.
    Normal,
}

/// A declared rule `pattern -> body`.
///
/// Name bindings are rules too: `pi -> 3.14` binds `pi`, and a candidate
/// binds each formal parameter to its actual argument the same way.
#[derive(Debug, Clone)]
pub struct Rewrite {
    /// The `->` infix, or the formal name for parameter bindings.
    pub declaration: TreeId,
    /// The pattern with any `as T` removed.
    pub pattern: TreeId,
    pub body: TreeId,
    /// From `P as T -> ...`, or the declared type of a typed formal.
    pub result_type: Option<TreeId>,
    pub key: u64,
    /// Names the pattern binds, in the order they appear.
    pub formals: Vec<String>,
}

impl Rewrite {
    /// A rule whose pattern is a single name binds that name to its body.
    pub fn binds_name<'t>(&self, trees: &'t TreeArena) -> Option<&'t str> {
        trees.as_name(self.pattern)
    }
}

/// Result of [`Context::bound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub definition: TreeId,
    pub scope: ScopeId,
    pub rule: RuleRef,
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    rules: Vec<Rewrite>,
    names: BTreeMap<String, Vec<usize>>,
    infixes: BTreeMap<String, Vec<usize>>,
    blocks: BTreeMap<String, Vec<usize>>,
    /// Set when a rule's pattern is a literal, so constants need evaluating.
    pub has_constants: bool,
}

impl Scope {
    pub fn rules(&self) -> &[Rewrite] {
        &self.rules
    }
}

/// Which of a scope's tables a tree is keyed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    Names,
    Infixes,
    Blocks,
}

/// Table and key for a pattern or call, if it has a usable leading symbol.
fn leading_symbol(trees: &TreeArena, tree: TreeId) -> Option<(Table, String)> {
    match trees.get(tree) {
        TreeKind::Integer(_) | TreeKind::Real(_) | TreeKind::Text { .. } => {
            Some((Table::Names, trees.render(tree)))
        }
        TreeKind::Name(name) => Some((Table::Names, name.clone())),
        TreeKind::Prefix { left, .. } => trees
            .as_name(*left)
            .map(|head| (Table::Names, head.to_string())),
        TreeKind::Postfix { right, .. } => trees
            .as_name(*right)
            .map(|tail| (Table::Names, tail.to_string())),
        TreeKind::Infix { name, left, .. } if name == ":" => leading_symbol(trees, *left),
        TreeKind::Infix { name, .. } => Some((Table::Infixes, name.clone())),
        TreeKind::Block { opening, .. } => Some((Table::Blocks, opening.clone())),
    }
}

/// Structural hash of a call shape: node kind, leading symbol and arity.
///
/// A pattern and a call it can match always hash equal; a typed formal
/// pattern `X:T` hashes as its name.
pub fn shape_key(trees: &TreeArena, tree: TreeId) -> u64 {
    let tree = match trees.as_infix_named(tree, ":") {
        Some((left, _)) => left,
        None => tree,
    };
    let kind = trees.kind(tree);
    let symbol = leading_symbol(trees, tree).map(|(_, symbol)| symbol);
    let arity = match kind {
        Kind::Integer | Kind::Real | Kind::Text | Kind::Name => 0,
        Kind::Block => 1,
        Kind::Prefix | Kind::Postfix | Kind::Infix => 2,
    };
    let mut hasher = DefaultHasher::new();
    kind.hash(&mut hasher);
    symbol.hash(&mut hasher);
    arity.hash(&mut hasher);
    hasher.finish()
}

/// Split `P as T` into `(P, Some(T))`.
pub fn split_result_type(trees: &TreeArena, pattern: TreeId) -> (TreeId, Option<TreeId>) {
    match trees.as_infix_named(pattern, "as") {
        Some((pattern, ty)) => (pattern, Some(ty)),
        None => (pattern, None),
    }
}

#[derive(Debug, Clone)]
pub struct Context {
    scopes: Vec<Scope>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn child(&mut self, parent: ScopeId) -> ScopeId {
        self.scopes.push(Scope {
            parent: Some(parent),
            ..Scope::default()
        });
        ScopeId(self.scopes.len() as u32 - 1)
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    pub fn rule(&self, rule: RuleRef) -> &Rewrite {
        &self.scope(rule.scope).rules[rule.index]
    }

    /// `scope` and its ancestors, innermost first.
    pub fn chain(&self, scope: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        std::iter::successors(Some(scope), |id| self.scope(*id).parent)
    }

    /// Whether constants must be evaluated in `scope`.
    pub fn has_constants(&self, scope: ScopeId) -> bool {
        self.chain(scope).any(|id| self.scope(id).has_constants)
    }

    /// Register `pattern -> body` in `scope`.
    ///
    /// Returns the offending pattern when it has no leading symbol to be
    /// keyed by.
    pub fn enter(
        &mut self,
        trees: &TreeArena,
        scope: ScopeId,
        declaration: TreeId,
    ) -> Result<RuleRef, TreeId> {
        let Some((pattern, body)) = trees.as_infix_named(declaration, "->") else {
            return Err(declaration);
        };
        let (pattern, mut result_type) = split_result_type(trees, pattern);
        let mut key_pattern = pattern;
        // `X:T -> ...` binds X with declared type T
        if let Some((name, ty)) = trees.as_infix_named(pattern, ":")
            && trees.as_name(name).is_some()
        {
            result_type = result_type.or(Some(ty));
            key_pattern = name;
        }
        let Some((table, symbol)) = leading_symbol(trees, key_pattern) else {
            return Err(pattern);
        };
        let formals = if trees.as_name(key_pattern).is_some() {
            Vec::new()
        } else {
            let mut formals = Vec::new();
            self.collect_formals(trees, scope, pattern, true, &mut formals);
            formals
        };
        let rewrite = Rewrite {
            declaration,
            pattern: key_pattern,
            body,
            result_type,
            key: shape_key(trees, key_pattern),
            formals,
        };
        Ok(match table {
            Table::Names => self.enter_name(trees, scope, &symbol, rewrite),
            Table::Infixes => self.enter_infix(trees, scope, &symbol, rewrite),
            Table::Blocks => self.enter_block(trees, scope, &symbol, rewrite),
        })
    }

    /// Bind `name` to `value` in `scope`.
    pub fn define(
        &mut self,
        trees: &TreeArena,
        scope: ScopeId,
        name: TreeId,
        value: TreeId,
        declared: Option<TreeId>,
    ) -> RuleRef {
        let symbol = trees.as_name(name).unwrap_or_default().to_string();
        let rewrite = Rewrite {
            declaration: name,
            pattern: name,
            body: value,
            result_type: declared,
            key: shape_key(trees, name),
            formals: Vec::new(),
        };
        self.enter_name(trees, scope, &symbol, rewrite)
    }

    /// Register a prebuilt rule under a name, prefix head, postfix tail or
    /// constant rendering.
    pub fn enter_name(
        &mut self,
        trees: &TreeArena,
        scope: ScopeId,
        symbol: &str,
        rewrite: Rewrite,
    ) -> RuleRef {
        self.insert(trees, scope, Table::Names, symbol.to_string(), rewrite)
    }

    pub fn enter_infix(
        &mut self,
        trees: &TreeArena,
        scope: ScopeId,
        operator: &str,
        rewrite: Rewrite,
    ) -> RuleRef {
        self.insert(trees, scope, Table::Infixes, operator.to_string(), rewrite)
    }

    pub fn enter_block(
        &mut self,
        trees: &TreeArena,
        scope: ScopeId,
        opening: &str,
        rewrite: Rewrite,
    ) -> RuleRef {
        self.insert(trees, scope, Table::Blocks, opening.to_string(), rewrite)
    }

    fn insert(
        &mut self,
        trees: &TreeArena,
        scope: ScopeId,
        table: Table,
        symbol: String,
        rewrite: Rewrite,
    ) -> RuleRef {
        let constant = trees.is_constant(rewrite.pattern);
        let target = self.scope_mut(scope);
        let index = target.rules.len();
        target.rules.push(rewrite);
        let entries = match table {
            Table::Names => &mut target.names,
            Table::Infixes => &mut target.infixes,
            Table::Blocks => &mut target.blocks,
        };
        entries.entry(symbol).or_default().push(index);
        target.has_constants |= constant;
        RuleRef { scope, index }
    }

    /// Names a pattern binds. Prefix heads, postfix tails, operator names,
    /// declared types and names bound to themselves (`true`) are not formals.
    fn collect_formals(
        &self,
        trees: &TreeArena,
        scope: ScopeId,
        tree: TreeId,
        top: bool,
        out: &mut Vec<String>,
    ) {
        match trees.get(tree) {
            TreeKind::Name(name) => {
                if !self.is_self_bound(trees, scope, name) && !out.contains(name) {
                    out.push(name.clone());
                }
            }
            TreeKind::Block { child, .. } => {
                self.collect_formals(trees, scope, *child, false, out);
            }
            TreeKind::Prefix { left, right } => {
                if !(top && trees.as_name(*left).is_some()) {
                    self.collect_formals(trees, scope, *left, false, out);
                }
                self.collect_formals(trees, scope, *right, false, out);
            }
            TreeKind::Postfix { left, right } => {
                self.collect_formals(trees, scope, *left, false, out);
                if !(top && trees.as_name(*right).is_some()) {
                    self.collect_formals(trees, scope, *right, false, out);
                }
            }
            TreeKind::Infix { name, left, .. } if name == ":" => {
                self.collect_formals(trees, scope, *left, false, out);
            }
            TreeKind::Infix { left, right, .. } => {
                self.collect_formals(trees, scope, *left, false, out);
                self.collect_formals(trees, scope, *right, false, out);
            }
            TreeKind::Integer(_) | TreeKind::Real(_) | TreeKind::Text { .. } => {}
        }
    }

    /// A name whose binding is its own pattern, such as `true` or `integer`.
    pub fn is_self_bound(&self, trees: &TreeArena, scope: ScopeId, name: &str) -> bool {
        self.bound(trees, scope, name, LookupMode::Normal)
            .is_some_and(|binding| binding.definition == self.rule(binding.rule).pattern)
    }

    /// Definition bound to `name`, innermost first.
    pub fn bound(
        &self,
        trees: &TreeArena,
        scope: ScopeId,
        name: &str,
        mode: LookupMode,
    ) -> Option<Binding> {
        let scopes: Vec<ScopeId> = match mode {
            LookupMode::Scope => vec![scope],
            LookupMode::Normal => self.chain(scope).collect(),
        };
        scopes.into_iter().find_map(|id| {
            let current = self.scope(id);
            current.names.get(name)?.iter().find_map(|&index| {
                let rule = &current.rules[index];
                (rule.binds_name(trees) == Some(name)).then_some(Binding {
                    definition: rule.body,
                    scope: id,
                    rule: RuleRef { scope: id, index },
                })
            })
        })
    }

    /// Rules whose pattern shape is compatible with `call`, in priority
    /// order: inner scopes first, then declaration order.
    pub fn lookup(
        &self,
        trees: &TreeArena,
        scope: ScopeId,
        call: TreeId,
        mode: LookupMode,
    ) -> Vec<RuleRef> {
        let Some((table, symbol)) = leading_symbol(trees, call) else {
            return Vec::new();
        };
        let key = shape_key(trees, call);
        let scopes: Vec<ScopeId> = match mode {
            LookupMode::Scope => vec![scope],
            LookupMode::Normal => self.chain(scope).collect(),
        };
        let mut found = Vec::new();
        for id in scopes {
            let current = self.scope(id);
            let entries = match table {
                Table::Names => &current.names,
                Table::Infixes => &current.infixes,
                Table::Blocks => &current.blocks,
            };
            let Some(indices) = entries.get(&symbol) else {
                continue;
            };
            found.extend(
                indices
                    .iter()
                    .filter(|&&index| current.rules[index].key == key)
                    .map(|&index| RuleRef { scope: id, index }),
            );
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xl_ast::Span;

    fn s() -> Span {
        Span::unknown()
    }

    /// `fact N -> body` with the given argument pattern.
    fn fact_rule(trees: &mut TreeArena, arg: TreeId, body: TreeId) -> TreeId {
        let fact = trees.name("fact", s());
        let pattern = trees.prefix(fact, arg, s());
        trees.infix("->", pattern, body, s())
    }

    #[test]
    fn rules_are_found_in_declaration_order() {
        let mut trees = TreeArena::new();
        let mut ctx = Context::new();
        let zero = trees.integer(0, s());
        let one = trees.integer(1, s());
        let first = fact_rule(&mut trees, zero, one);
        let n = trees.name("N", s());
        let n_body = trees.name("N", s());
        let second = fact_rule(&mut trees, n, n_body);
        let root = ctx.root();
        let r1 = ctx.enter(&trees, root, first).unwrap();
        let r2 = ctx.enter(&trees, root, second).unwrap();

        let fact = trees.name("fact", s());
        let three = trees.integer(3, s());
        let call = trees.prefix(fact, three, s());
        assert_eq!(ctx.lookup(&trees, root, call, LookupMode::Normal), vec![r1, r2]);
        assert!(ctx.rule(r1).formals.is_empty());
        assert_eq!(ctx.rule(r2).formals, vec!["N".to_string()]);
        assert!(!ctx.has_constants(root));
    }

    #[test]
    fn inner_scopes_come_first() {
        let mut trees = TreeArena::new();
        let mut ctx = Context::new();
        let root = ctx.root();
        let inner = ctx.child(root);
        let x = trees.name("X", s());
        let one = trees.integer(1, s());
        let outer_rule = fact_rule(&mut trees, x, one);
        let y = trees.name("Y", s());
        let two = trees.integer(2, s());
        let inner_rule = fact_rule(&mut trees, y, two);
        let r_outer = ctx.enter(&trees, root, outer_rule).unwrap();
        let r_inner = ctx.enter(&trees, inner, inner_rule).unwrap();

        let fact = trees.name("fact", s());
        let arg = trees.integer(3, s());
        let call = trees.prefix(fact, arg, s());
        assert_eq!(
            ctx.lookup(&trees, inner, call, LookupMode::Normal),
            vec![r_inner, r_outer]
        );
        assert_eq!(ctx.lookup(&trees, inner, call, LookupMode::Scope), vec![r_inner]);
    }

    #[test]
    fn shape_key_rejects_other_shapes() {
        let mut trees = TreeArena::new();
        let mut ctx = Context::new();
        let root = ctx.root();
        let x = trees.name("X", s());
        let y = trees.name("Y", s());
        let sum = trees.infix("+", x, y, s());
        let body = trees.name("X", s());
        let rule = trees.infix("->", sum, body, s());
        ctx.enter(&trees, root, rule).unwrap();

        let a = trees.integer(1, s());
        let b = trees.integer(2, s());
        let product = trees.infix("*", a, b, s());
        assert!(ctx.lookup(&trees, root, product, LookupMode::Normal).is_empty());
        let f = trees.name("fact", s());
        let bare = trees.prefix(f, a, s());
        assert!(ctx.lookup(&trees, root, bare, LookupMode::Normal).is_empty());
    }

    #[test]
    fn name_bindings_and_self_binding() {
        let mut trees = TreeArena::new();
        let mut ctx = Context::new();
        let root = ctx.root();
        let truth = trees.name("true", s());
        ctx.define(&trees, root, truth, truth, None);
        let pi = trees.name("pi", s());
        let value = trees.real(3.14, s());
        let decl = trees.infix("->", pi, value, s());
        let rule = ctx.enter(&trees, root, decl).unwrap();

        let binding = ctx.bound(&trees, root, "pi", LookupMode::Normal).unwrap();
        assert_eq!(binding.definition, value);
        assert_eq!(binding.rule, rule);
        assert!(ctx.is_self_bound(&trees, root, "true"));
        assert!(!ctx.is_self_bound(&trees, root, "pi"));

        let inner = ctx.child(root);
        assert!(ctx.bound(&trees, inner, "pi", LookupMode::Scope).is_none());
        assert!(ctx.bound(&trees, inner, "pi", LookupMode::Normal).is_some());
    }

    #[test]
    fn literal_patterns_mark_constants() {
        let mut trees = TreeArena::new();
        let mut ctx = Context::new();
        let root = ctx.root();
        let zero = trees.integer(0, s());
        let body = trees.text("zero", s());
        let decl = trees.infix("->", zero, body, s());
        ctx.enter(&trees, root, decl).unwrap();
        assert!(ctx.has_constants(root));
        let inner = ctx.child(root);
        assert!(ctx.has_constants(inner));

        let other = trees.integer(0, s());
        assert_eq!(ctx.lookup(&trees, inner, other, LookupMode::Normal).len(), 1);
    }

    #[test]
    fn patterns_without_leading_symbol_are_rejected() {
        let mut trees = TreeArena::new();
        let mut ctx = Context::new();
        let root = ctx.root();
        let one = trees.integer(1, s());
        let two = trees.integer(2, s());
        let head = trees.paren(one, s());
        let pattern = trees.prefix(head, two, s());
        let body = trees.integer(3, s());
        let decl = trees.infix("->", pattern, body, s());
        assert_eq!(ctx.enter(&trees, root, decl), Err(pattern));
    }

    #[test]
    fn typed_and_result_typed_patterns() {
        let mut trees = TreeArena::new();
        let mut ctx = Context::new();
        let root = ctx.root();
        let integer = trees.name("integer", s());
        ctx.define(&trees, root, integer, integer, None);

        // X:integer * Y:integer as integer -> opcode Mul
        let x = trees.name("X", s());
        let tx = trees.name("integer", s());
        let xt = trees.infix(":", x, tx, s());
        let y = trees.name("Y", s());
        let ty = trees.name("integer", s());
        let yt = trees.infix(":", y, ty, s());
        let product = trees.infix("*", xt, yt, s());
        let result = trees.name("integer", s());
        let pattern = trees.infix("as", product, result, s());
        let opcode = trees.name("opcode", s());
        let mul = trees.name("Mul", s());
        let body = trees.prefix(opcode, mul, s());
        let decl = trees.infix("->", pattern, body, s());
        let rule = ctx.enter(&trees, root, decl).unwrap();

        let rewrite = ctx.rule(rule);
        assert_eq!(rewrite.pattern, product);
        assert_eq!(rewrite.result_type, Some(result));
        assert_eq!(rewrite.formals, vec!["X".to_string(), "Y".to_string()]);
    }
}
