//! Shape-typed inference for XL rewrite rules.
//!
//! This crate implements:
//! - Unification of shape types over a union-find keyed by tree identity
//! - Tree traversal that types constants, names, blocks and operator forms
//! - Resolution of a call against the rewrite rules in scope, producing an
//!   ordered list of guarded candidates per call site
//!
//! A [`TypeInference`] owns the tree arena, the scope [`Context`] and the
//! [`TypeTables`] for one pass. Analyses return `bool` and record
//! diagnostics; nothing here panics on ill-typed input.

pub mod context;
pub mod resolve;
pub mod trace;
mod typeck;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde::Deserialize;
use xl_ast::{Span, TreeArena, TreeId, TreeKind};
use xl_diag::format_tree_for_error;
use xl_types::{
    TypeAlgebra, as_function, as_pattern_type, as_union, is_generic, is_type_name,
    span_to_location, tree_arg,
};

pub use context::{Binding, Context, LookupMode, Rewrite, RuleRef, Scope, ScopeId, shape_key};
pub use resolve::{GuardKind, RewriteBinding, RewriteCalls, RewriteCandidate, RewriteCondition};
pub use xl_diag::{Category, Diagnostic, DiagnosticError, ErrorLog, SourceLocation};
pub use xl_types::{BuiltinTypes, TypeTables};

use crate::trace::{InferRule, InferStep, UnifyAction, UnifyStep};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Knobs for one inference pass.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceOptions {
    /// Deepest chain of rule bodies analysed inside one another.
    pub max_nesting: usize,
    /// Record [`UnifyStep`]s and [`InferStep`]s.
    pub tracing: bool,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            max_nesting: 64,
            tracing: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Index of a [`Session`] in its [`TypeInference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

/// One analysis: the top-level program, a rule pattern, or one instance of
/// a rule body. Sessions nest in stack order and share the type tables, so
/// leaving one never undoes its unifications.
#[derive(Debug, Clone)]
pub struct Session {
    pub scope: ScopeId,
    pub parent: Option<SessionId>,
    /// Candidates of each call analysed in this session.
    pub calls: BTreeMap<TreeId, RewriteCalls>,
    /// Patterns are being declared: names are not evaluated.
    pub prototyping: bool,
}

/// Unbound pattern names paired one-to-one while comparing pattern types.
#[derive(Debug, Default)]
struct Renaming {
    forward: BTreeMap<String, String>,
    backward: BTreeMap<String, String>,
}

impl Renaming {
    fn pair(&mut self, left: &str, right: &str) -> bool {
        match (self.forward.get(left), self.backward.get(right)) {
            (None, None) => {
                self.forward.insert(left.to_string(), right.to_string());
                self.backward.insert(right.to_string(), left.to_string());
                true
            }
            (Some(to), Some(from)) => to == right && from == left,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Inference engine
// ---------------------------------------------------------------------------

/// Instance of a rule body whose analysis is in progress.
#[derive(Debug, Clone, Copy)]
struct Instantiation {
    rule: RuleRef,
    instance: TreeId,
    session: SessionId,
}

pub struct TypeInference {
    trees: TreeArena,
    builtins: BuiltinTypes,
    context: Context,
    tables: TypeTables,
    log: ErrorLog,
    options: InferenceOptions,
    sessions: Vec<Session>,
    active: Vec<SessionId>,
    instantiating: Vec<Instantiation>,
    /// Values of `name -> value` rules already analysed.
    defined: BTreeSet<TreeId>,
    unify_trace: Vec<UnifyStep>,
    infer_trace: Vec<InferStep>,
}

impl Default for TypeInference {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeInference {
    pub fn new() -> Self {
        Self::with_options(TreeArena::new(), InferenceOptions::default())
    }

    /// Take over `trees`, installing the builtin types into it and binding
    /// each builtin to itself in the root scope.
    pub fn with_options(mut trees: TreeArena, options: InferenceOptions) -> Self {
        let builtins = BuiltinTypes::install(&mut trees);
        let mut context = Context::new();
        let root = context.root();
        for builtin in builtins.all() {
            context.define(&trees, root, builtin, builtin, None);
        }
        let mut tables = TypeTables::new();
        tables.set_assigned(builtins.true_value, builtins.boolean);
        tables.set_assigned(builtins.false_value, builtins.boolean);
        Self {
            trees,
            builtins,
            context,
            tables,
            log: ErrorLog::new(),
            options,
            sessions: vec![Session {
                scope: root,
                parent: None,
                calls: BTreeMap::new(),
                prototyping: false,
            }],
            active: vec![SessionId(0)],
            instantiating: Vec::new(),
            defined: BTreeSet::new(),
            unify_trace: Vec::new(),
            infer_trace: Vec::new(),
        }
    }

    pub fn trees(&self) -> &TreeArena {
        &self.trees
    }

    pub fn trees_mut(&mut self) -> &mut TreeArena {
        &mut self.trees
    }

    pub fn builtins(&self) -> &BuiltinTypes {
        &self.builtins
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn tables(&self) -> &TypeTables {
        &self.tables
    }

    pub fn options(&self) -> &InferenceOptions {
        &self.options
    }

    // -- Diagnostics --

    pub fn errors(&self) -> &[Diagnostic] {
        self.log.errors()
    }

    pub fn has_errors(&self) -> bool {
        self.log.has_errors()
    }

    pub fn take_errors(&mut self) -> Vec<Diagnostic> {
        self.log.take()
    }

    pub fn log_mut(&mut self) -> &mut ErrorLog {
        &mut self.log
    }

    fn error(&mut self, category: Category, template: &str, tree: TreeId) {
        let diag = Diagnostic::from_template(category, template, &[tree_arg(&self.trees, tree)]);
        self.log.push(diag);
    }

    // -- Sessions --

    /// The top-level session.
    pub fn root_session(&self) -> SessionId {
        SessionId(0)
    }

    pub fn session(&self, id: SessionId) -> &Session {
        &self.sessions[id.0 as usize]
    }

    pub(crate) fn current(&self) -> SessionId {
        *self.active.last().expect("root session is always active")
    }

    /// Scope of the session being analysed.
    pub fn scope(&self) -> ScopeId {
        self.session(self.current()).scope
    }

    pub(crate) fn is_prototyping(&self) -> bool {
        self.session(self.current()).prototyping
    }

    /// Open a child session of the current one and make it current.
    pub(crate) fn push_session(&mut self, scope: ScopeId, prototyping: bool) -> SessionId {
        let id = SessionId(self.sessions.len() as u32);
        self.sessions.push(Session {
            scope,
            parent: Some(self.current()),
            calls: BTreeMap::new(),
            prototyping,
        });
        self.active.push(id);
        id
    }

    pub(crate) fn pop_session(&mut self, id: SessionId) {
        debug_assert_eq!(self.active.last(), Some(&id), "sessions closed out of order");
        if self.active.len() > 1 {
            self.active.pop();
        }
    }

    /// Run `f` with the current session in prototyping mode.
    pub(crate) fn prototyping<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let id = self.current().0 as usize;
        let saved = std::mem::replace(&mut self.sessions[id].prototyping, true);
        let result = f(self);
        self.sessions[id].prototyping = saved;
        result
    }

    pub(crate) fn record_calls(&mut self, call: TreeId, calls: RewriteCalls) {
        let id = self.current().0 as usize;
        self.sessions[id].calls.insert(call, calls);
    }

    /// Candidates recorded for `call` in `session`.
    pub fn calls_in(&self, session: SessionId, call: TreeId) -> Option<&RewriteCalls> {
        self.session(session).calls.get(&call)
    }

    /// Candidates recorded for a top-level `call`.
    pub fn calls(&self, call: TreeId) -> Option<&RewriteCalls> {
        self.calls_in(self.root_session(), call)
    }

    /// Candidates of `call` in whichever session analysed it.
    pub fn find_calls(&self, call: TreeId) -> Option<(SessionId, &RewriteCalls)> {
        self.sessions
            .iter()
            .enumerate()
            .find_map(|(index, session)| {
                session
                    .calls
                    .get(&call)
                    .map(|calls| (SessionId(index as u32), calls))
            })
    }

    /// Union of the types of every candidate of `call`.
    pub fn result_type(&mut self, session: SessionId, call: TreeId) -> Option<TreeId> {
        let types: Vec<TreeId> = self.calls_in(session, call)?.candidate_types().collect();
        self.union_all(&types)
    }

    /// Union of the candidate types a reduction can produce: every
    /// candidate up to and including the first unconditional one.
    pub fn narrowed_type(&mut self, session: SessionId, call: TreeId) -> Option<TreeId> {
        let types: Vec<TreeId> = self
            .calls_in(session, call)?
            .narrowed()
            .iter()
            .map(|candidate| candidate.ty)
            .collect();
        self.union_all(&types)
    }

    pub(crate) fn union_all(&mut self, types: &[TreeId]) -> Option<TreeId> {
        let (&first, rest) = types.split_first()?;
        let mut union = self.base(first);
        for &ty in rest {
            let ty = self.base(ty);
            union = self.algebra().union_type(union, ty);
        }
        Some(union)
    }

    pub(crate) fn algebra(&mut self) -> TypeAlgebra<'_> {
        TypeAlgebra {
            trees: &mut self.trees,
            builtins: &self.builtins,
            tables: &mut self.tables,
            log: &mut self.log,
        }
    }

    // -- Type assignment --

    /// Record `ty` (or a fresh generic name) as the type of `node`. A node
    /// that already has a type unifies the two instead.
    pub fn assign_type(&mut self, node: TreeId, ty: Option<TreeId>) -> bool {
        if let Some(existing) = self.tables.assigned(node) {
            return match ty {
                Some(ty) if ty != existing => self.unify_types(existing, ty),
                _ => true,
            };
        }
        let ty = match ty {
            Some(ty) => ty,
            None => self.new_type_name(self.trees.span(node)),
        };
        self.tables.set_assigned(node, ty);
        true
    }

    /// Canonical type of `node`, assigning a fresh generic name if it has
    /// none yet.
    pub fn type_of(&mut self, node: TreeId) -> TreeId {
        let ty = match self.tables.assigned(node) {
            Some(ty) => ty,
            None => {
                let ty = self.new_type_name(self.trees.span(node));
                self.tables.set_assigned(node, ty);
                ty
            }
        };
        self.base(ty)
    }

    pub fn new_type_name(&mut self, span: Span) -> TreeId {
        self.tables.new_type_name(&mut self.trees, span)
    }

    pub fn base(&mut self, ty: TreeId) -> TreeId {
        self.tables.base(ty)
    }

    // -- Unification --

    /// Unify the types of two expressions.
    pub fn unify(&mut self, left: TreeId, right: TreeId) -> bool {
        let t1 = self.type_of(left);
        let t2 = self.type_of(right);
        self.unify_types(t1, t2)
    }

    /// Unify two type terms. A failure records exactly two diagnostics, one
    /// for each operand.
    pub fn unify_types(&mut self, t1: TreeId, t2: TreeId) -> bool {
        let t1 = self.base(t1);
        let t2 = self.base(t2);
        if t1 == t2 {
            self.push_unify_step(UnifyAction::Identity, t1, t2, "same class");
            return true;
        }

        // (T) is T
        if let Some((child, _, _)) = self.trees.as_block(t1) {
            self.push_unify_step(UnifyAction::StripBlock, t1, t2, "left block");
            return self.unify_types(child, t2) && self.join_types(t2, t1, false);
        }
        if let Some((child, _, _)) = self.trees.as_block(t2) {
            self.push_unify_step(UnifyAction::StripBlock, t1, t2, "right block");
            return self.unify_types(t1, child) && self.join_types(t1, t2, false);
        }

        let t1 = self.lookup_type_name(t1);
        let t2 = self.lookup_type_name(t2);
        if t1 == t2 {
            self.push_unify_step(UnifyAction::Identity, t1, t2, "after name lookup");
            return true;
        }

        if is_generic(&self.trees, t1) || is_generic(&self.trees, t2) {
            return self.join_types(t1, t2, false);
        }

        if let Some((left, right)) = as_union(&self.trees, t1) {
            return self.unify_union(t1, left, right, t2);
        }
        if let Some((left, right)) = as_union(&self.trees, t2) {
            return self.unify_union(t2, left, right, t1);
        }

        let named1 = is_type_name(&self.trees, t1);
        let named2 = is_type_name(&self.trees, t2);
        if named1 && named2 {
            return self.type_error("Cannot unify named type $1", t1, "with named type $1", t2);
        }
        if named1 {
            return self.type_error("Cannot unify named type $1", t1, "with structured type $1", t2);
        }
        if named2 {
            return self.type_error("Cannot unify named type $1", t2, "with structured type $1", t1);
        }

        match (as_function(&self.trees, t1), as_function(&self.trees, t2)) {
            (Some((d1, r1)), Some((d2, r2))) => {
                self.push_unify_step(UnifyAction::Decompose, t1, t2, "domain and range");
                return self.unify_types(d1, d2)
                    && self.unify_types(r1, r2)
                    && self.join_types(t1, t2, false);
            }
            (Some(_), None) => {
                return self.type_error("Cannot unify function type $1", t1, "with non-function $1", t2);
            }
            (None, Some(_)) => {
                return self.type_error("Cannot unify function type $1", t2, "with non-function $1", t1);
            }
            (None, None) => {}
        }

        if let (Some(p1), Some(p2)) = (
            as_pattern_type(&self.trees, t1),
            as_pattern_type(&self.trees, t2),
        ) {
            self.push_unify_step(UnifyAction::ComparePatterns, t1, t2, "pattern types");
            if self.unify_patterns(p1, p2) {
                return self.join_types(t1, t2, false);
            }
        }

        self.type_error("Unable to unify $1", t1, "with $1", t2)
    }

    /// `union` (split as `left | right`) unifies with `other` when either
    /// branch does. Only the combined failure is reported.
    ///
    /// Success does not join the classes of `union` and `other`: the union
    /// keeps its own base, only the matching branch was unified.
    fn unify_union(&mut self, union: TreeId, left: TreeId, right: TreeId, other: TreeId) -> bool {
        for branch in [left, right] {
            let scope = self.log.begin_scope();
            let ok = self.unify_types(branch, other);
            let _ = self.log.end_scope(scope, ok);
            if ok {
                self.push_unify_step(UnifyAction::UnionBranch, branch, other, "union branch");
                return true;
            }
        }
        self.type_error("Unable to unify $1", union, "with $1", other)
    }

    fn type_error(&mut self, first: &str, t1: TreeId, second: &str, t2: TreeId) -> bool {
        self.push_unify_step(UnifyAction::Error, t1, t2, first);
        tracing::debug!(
            left = %self.trees.render(t1),
            right = %self.trees.render(t2),
            "unification failed"
        );
        // One message per operand, each labelled with the other side
        let left = tree_arg(&self.trees, t1);
        let right = tree_arg(&self.trees, t2);
        let left_at = span_to_location(self.trees.span(t1));
        let right_at = span_to_location(self.trees.span(t2));
        let with_left = format!("unified with {}", format_tree_for_error(&self.trees.render(t1)));
        let with_right = format!("unified with {}", format_tree_for_error(&self.trees.render(t2)));
        self.log.push(
            Diagnostic::from_template(Category::TypeMismatch, first, &[left])
                .with_label(right_at, with_right),
        );
        self.log.push(
            Diagnostic::from_template(Category::TypeMismatch, second, &[right])
                .with_label(left_at, with_left),
        );
        false
    }

    /// Link the classes of `base` and `other`. Unless `known_good`, a type
    /// name is preferred as representative and a generic variable never is.
    pub fn join_types(&mut self, base: TreeId, other: TreeId, known_good: bool) -> bool {
        let mut base = self.base(base);
        let mut other = self.base(other);
        if base == other {
            return true;
        }
        if !known_good
            && ((is_type_name(&self.trees, other) && !is_type_name(&self.trees, base))
                || is_generic(&self.trees, base))
        {
            std::mem::swap(&mut base, &mut other);
        }
        self.push_unify_step(UnifyAction::Join, other, base, "link");
        self.tables.link(other, base);
        true
    }

    /// Replace a named type by its definition in scope, and a literal by the
    /// builtin type it promotes to.
    fn lookup_type_name(&mut self, ty: TreeId) -> TreeId {
        if is_type_name(&self.trees, ty) {
            let name = self.trees.as_name(ty).unwrap_or_default();
            let scope = self.scope();
            if let Some(binding) = self.context.bound(&self.trees, scope, name, LookupMode::Normal)
                && binding.definition != ty
            {
                let definition = binding.definition;
                self.push_unify_step(UnifyAction::LookupName, ty, definition, "definition");
                self.join_types(definition, ty, false);
                return self.base(definition);
            }
            return ty;
        }
        if let Some(builtin) = self.builtins.literal_type(&self.trees, ty) {
            self.push_unify_step(UnifyAction::PromoteLiteral, ty, builtin, "literal");
            self.join_types(builtin, ty, true);
            return builtin;
        }
        ty
    }

    /// Structural equality of two patterns. Literals, operators and block
    /// delimiters must agree; prefix heads, postfix tails and names bound in
    /// scope compare by text; other names are pattern variables compared
    /// under a consistent renaming.
    pub fn unify_patterns(&mut self, p1: TreeId, p2: TreeId) -> bool {
        let mut renaming = Renaming::default();
        self.same_pattern(p1, p2, &mut renaming)
    }

    fn same_pattern(&self, a: TreeId, b: TreeId, renaming: &mut Renaming) -> bool {
        match (self.trees.get(a), self.trees.get(b)) {
            (TreeKind::Integer(_), _) | (TreeKind::Real(_), _) | (TreeKind::Text { .. }, _) => {
                self.trees.same_shape(a, b)
            }
            (TreeKind::Name(x), TreeKind::Name(y)) => {
                let scope = self.scope();
                let bound = |name: &str| {
                    self.context
                        .bound(&self.trees, scope, name, LookupMode::Normal)
                        .is_some()
                };
                if bound(x) || bound(y) {
                    x == y
                } else {
                    renaming.pair(x, y)
                }
            }
            (
                TreeKind::Block {
                    child: c1,
                    opening: o1,
                    closing: e1,
                },
                TreeKind::Block {
                    child: c2,
                    opening: o2,
                    closing: e2,
                },
            ) => o1 == o2 && e1 == e2 && self.same_pattern(*c1, *c2, renaming),
            (TreeKind::Prefix { left: l1, right: r1 }, TreeKind::Prefix { left: l2, right: r2 }) => {
                self.same_symbol(*l1, *l2, renaming) && self.same_pattern(*r1, *r2, renaming)
            }
            (
                TreeKind::Postfix { left: l1, right: r1 },
                TreeKind::Postfix { left: l2, right: r2 },
            ) => self.same_pattern(*l1, *l2, renaming) && self.same_symbol(*r1, *r2, renaming),
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
            ) => {
                n1 == n2
                    && self.same_pattern(*l1, *l2, renaming)
                    && self.same_pattern(*r1, *r2, renaming)
            }
            _ => false,
        }
    }

    /// Prefix heads and postfix tails: names compare by text.
    fn same_symbol(&self, a: TreeId, b: TreeId, renaming: &mut Renaming) -> bool {
        match (self.trees.as_name(a), self.trees.as_name(b)) {
            (Some(x), Some(y)) => x == y,
            (None, None) => self.same_pattern(a, b, renaming),
            _ => false,
        }
    }

    // -- Tracing --

    /// Start recording unification and inference steps.
    pub fn enable_tracing(&mut self) {
        self.options.tracing = true;
    }

    pub fn unify_trace(&self) -> &[UnifyStep] {
        &self.unify_trace
    }

    pub fn infer_trace(&self) -> &[InferStep] {
        &self.infer_trace
    }

    fn push_unify_step(&mut self, action: UnifyAction, left: TreeId, right: TreeId, detail: &str) {
        tracing::trace!(?action, left = left.0, right = right.0, detail, "unify");
        if self.options.tracing {
            let step = self.unify_trace.len() + 1;
            self.unify_trace.push(UnifyStep {
                step,
                action,
                left: self.trees.render(left),
                right: self.trees.render(right),
                detail: detail.to_string(),
            });
        }
    }

    pub(crate) fn push_infer_step(&mut self, node: TreeId, rule: InferRule, detail: &str) {
        if self.options.tracing {
            let ty = match self.tables.assigned(node) {
                Some(ty) => self.trees.render(self.tables.find(ty)),
                None => String::new(),
            };
            let span = self.trees.span(node);
            self.infer_trace.push(InferStep {
                expr: self.trees.render(node),
                ty,
                rule,
                detail: detail.to_string(),
                span: (!span.is_unknown()).then_some((span.start, span.end)),
            });
        }
    }

    // -- Dumps --

    /// Every node with an assigned type: `#i  node  : type  = base`.
    pub fn dump_types(&self) -> String {
        let mut out = String::new();
        for (index, (node, ty)) in self.tables.assigned_types().enumerate() {
            let _ = write!(
                out,
                "#{}\t{}\t: {}",
                index + 1,
                self.trees.render(node),
                self.trees.render(ty)
            );
            let base = self.tables.find(ty);
            if base != ty {
                let _ = write!(out, "\t= {}", self.trees.render(base));
            }
            out.push('\n');
        }
        out
    }

    /// Every union-find link: `#i  term  = linked  = base`.
    pub fn dump_unifications(&self) -> String {
        let mut out = String::new();
        for (index, (term, linked)) in self.tables.unifications().enumerate() {
            let _ = writeln!(
                out,
                "#{}\t{}\t= {}\t= {}",
                index + 1,
                self.trees.render(term),
                self.trees.render(linked),
                self.trees.render(self.tables.find(term))
            );
        }
        out
    }

    /// Candidates of every call, session by session.
    pub fn dump_calls(&self) -> String {
        let mut out = String::new();
        let mut index = 0;
        for session in &self.sessions {
            for (call, calls) in &session.calls {
                index += 1;
                let _ = writeln!(out, "#{index}\t{}", self.trees.render(*call));
                for (position, candidate) in calls.candidates.iter().enumerate() {
                    let pattern = self.context.rule(candidate.rule).pattern;
                    let _ = writeln!(
                        out,
                        "\t#{}\t{}\t: {}",
                        position + 1,
                        self.trees.render(pattern),
                        self.trees.render(self.tables.find(candidate.ty))
                    );
                    for binding in &candidate.bindings {
                        let _ = writeln!(
                            out,
                            "\t\t{}\t= {}",
                            binding.name,
                            self.trees.render(binding.value)
                        );
                    }
                }
            }
        }
        out
    }
}


#[cfg(test)]
mod typeck_tests;
