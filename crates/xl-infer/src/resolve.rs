//! Rewrite candidates for a call.
//!
//! Every rule whose shape fits the call is matched against it. What can be
//! decided statically is decided here; the rest becomes guards that the
//! generated code tests at run time. A rule that survives matching has its
//! body instantiated and analysed with the formals bound to the actual
//! arguments.

use xl_ast::{TreeId, TreeKind};
use xl_diag::Diagnostic;
use xl_types::is_generic;

use crate::context::{LookupMode, RuleRef};
use crate::trace::InferRule;
use crate::{Category, Instantiation, SessionId, TypeInference};

// ---------------------------------------------------------------------------
// Candidate types
// ---------------------------------------------------------------------------

/// What a guard tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    /// `value` equals the constant or earlier binding `test`.
    SameValue,
    /// `value` belongs to the type `test`.
    HasType,
}

/// A test deferred to run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteCondition {
    pub value: TreeId,
    pub test: TreeId,
    pub kind: GuardKind,
}

/// A formal parameter bound to an actual argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteBinding {
    pub name: String,
    /// The formal's name in the pattern.
    pub formal: TreeId,
    /// The actual, or its widened copy for a converted literal.
    pub value: TreeId,
    /// `T` for a formal written `X:T`.
    pub declared: Option<TreeId>,
}

/// One rule that may rewrite a call.
#[derive(Debug, Clone)]
pub struct RewriteCandidate {
    pub rule: RuleRef,
    pub ty: TreeId,
    /// The instantiated body.
    pub body: TreeId,
    pub bindings: Vec<RewriteBinding>,
    pub conditions: Vec<RewriteCondition>,
    /// Session in which `body` was analysed.
    pub session: SessionId,
    /// The body is an instance still being analysed further up.
    pub recursive: bool,
}

impl RewriteCandidate {
    pub fn is_unconditional(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn binding(&self, name: &str) -> Option<&RewriteBinding> {
        self.bindings.iter().find(|binding| binding.name == name)
    }
}

/// Candidates of a call, in priority order.
#[derive(Debug, Clone, Default)]
pub struct RewriteCalls {
    pub candidates: Vec<RewriteCandidate>,
}

impl RewriteCalls {
    pub fn candidate_types(&self) -> impl Iterator<Item = TreeId> + '_ {
        self.candidates.iter().map(|candidate| candidate.ty)
    }

    /// Candidates a reduction can reach: all of them up to and including
    /// the first unconditional one.
    pub fn narrowed(&self) -> &[RewriteCandidate] {
        match self
            .candidates
            .iter()
            .position(RewriteCandidate::is_unconditional)
        {
            Some(last) => &self.candidates[..=last],
            None => &self.candidates,
        }
    }

    /// Exactly one candidate and nothing to test.
    pub fn is_direct(&self) -> bool {
        matches!(self.candidates.as_slice(), [only] if only.is_unconditional())
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Match {
    bindings: Vec<RewriteBinding>,
    conditions: Vec<RewriteCondition>,
}

impl Match {
    fn same_value(&mut self, value: TreeId, test: TreeId) {
        self.conditions.push(RewriteCondition {
            value,
            test,
            kind: GuardKind::SameValue,
        });
    }

    fn bound(&self, name: &str) -> Option<TreeId> {
        self.bindings
            .iter()
            .find(|binding| binding.name == name)
            .map(|binding| binding.value)
    }
}

impl TypeInference {
    /// Candidates for `call` in the current scope, and the diagnostics of
    /// the rules that were tried and dropped.
    pub fn candidates(&mut self, call: TreeId) -> (RewriteCalls, Vec<Diagnostic>) {
        let scope = self.scope();
        let rules = self
            .context
            .lookup(&self.trees, scope, call, LookupMode::Normal);
        let mut calls = RewriteCalls::default();
        let mut failures = Vec::new();
        for rule in rules {
            let errors = self.log.begin_scope();
            match self.candidate(rule, call) {
                Some(candidate) => {
                    let _ = self.log.end_scope(errors, true);
                    calls.candidates.push(candidate);
                }
                None => failures.extend(self.log.end_scope(errors, false)),
            }
        }
        tracing::debug!(
            call = call.0,
            candidates = calls.candidates.len(),
            dropped = failures.len(),
            "resolved call"
        );
        (calls, failures)
    }

    /// Match `rule` against `call` and analyse an instance of its body.
    fn candidate(&mut self, rule: RuleRef, call: TreeId) -> Option<RewriteCandidate> {
        let _span =
            tracing::debug_span!("candidate", scope = rule.scope.0, rule = rule.index).entered();
        let pattern = self.context.rule(rule).pattern;
        let mut found = Match::default();
        if !self.match_pattern(rule, pattern, call, &mut found) {
            tracing::trace!("pattern does not match");
            return None;
        }
        let Match {
            bindings,
            conditions,
        } = found;

        if let Some(active) = self
            .instantiating
            .iter()
            .rev()
            .find(|active| active.rule == rule)
            .copied()
        {
            let ty = self.type_of(active.instance);
            self.push_infer_step(call, InferRule::RecursiveCandidate, "recursive");
            return Some(RewriteCandidate {
                rule,
                ty,
                body: active.instance,
                bindings,
                conditions,
                session: active.session,
                recursive: true,
            });
        }

        if self.instantiating.len() >= self.options.max_nesting {
            let depth = self.options.max_nesting as i64;
            let diag = Diagnostic::from_template(
                Category::RecursionLimit,
                "Nesting limit of $2 reached while rewriting $1",
                &[
                    xl_types::tree_arg(&self.trees, call),
                    xl_diag::ErrorArg::Int(depth),
                ],
            )
            .with_help(format!(
                "Raise the nesting limit above {depth} or make the recursion explicit."
            ));
            self.log.push(diag);
            return None;
        }

        let rewrite = self.context.rule(rule).clone();
        let instance = self.trees.instantiate(rewrite.body);
        let scope = self.context.child(rule.scope);
        for binding in &bindings {
            self.context.define(
                &self.trees,
                scope,
                binding.formal,
                binding.value,
                binding.declared,
            );
        }

        let session = self.push_session(scope, false);
        self.instantiating.push(Instantiation {
            rule,
            instance,
            session,
        });
        let mut ok = self.process_declarations(instance) && self.check(instance);
        if ok && let Some(declared) = rewrite.result_type {
            let ty = self.type_of(instance);
            ok = self.unify_types(ty, declared);
        }
        self.instantiating.pop();
        self.pop_session(session);
        if !ok {
            return None;
        }

        let ty = self.type_of(instance);
        self.push_infer_step(instance, InferRule::Candidate, "instance");
        Some(RewriteCandidate {
            rule,
            ty,
            body: instance,
            bindings,
            conditions,
            session,
            recursive: false,
        })
    }

    /// Match `pattern` against `actual`, collecting bindings and guards.
    /// Returns false when the rule can never apply to this call.
    fn match_pattern(
        &mut self,
        rule: RuleRef,
        pattern: TreeId,
        actual: TreeId,
        found: &mut Match,
    ) -> bool {
        // Blocks around a pattern only group it
        if let Some((child, _, _)) = self.trees.as_block(pattern) {
            let inner = match (self.trees.as_block(pattern), self.trees.as_block(actual)) {
                (Some((_, o1, c1)), Some((inner, o2, c2))) if o1 == o2 && c1 == c2 => inner,
                _ => actual,
            };
            return self.match_pattern(rule, child, inner, found);
        }
        let structured = matches!(
            self.trees.get(pattern),
            TreeKind::Prefix { .. } | TreeKind::Postfix { .. }
        ) || self
            .trees
            .as_infix(pattern)
            .is_some_and(|(name, _, _)| name != ":");
        let actual = if structured {
            self.strip_parens(actual)
        } else {
            actual
        };

        match self.trees.get(pattern).clone() {
            TreeKind::Integer(_) | TreeKind::Real(_) | TreeKind::Text { .. } => {
                found.same_value(actual, pattern);
                true
            }
            TreeKind::Name(name) => {
                self.bind_formal(rule, &name, pattern, actual, None, found);
                true
            }
            TreeKind::Infix { name, left, right } if name == ":" => {
                match self.trees.as_name(left).map(str::to_string) {
                    Some(formal) => self.match_typed(rule, &formal, left, right, actual, found),
                    None => self.match_pattern(rule, left, actual, found),
                }
            }
            TreeKind::Infix { name, left, right } => {
                match self.trees.as_infix_named(actual, &name) {
                    Some((a_left, a_right)) => {
                        self.match_pattern(rule, left, a_left, found)
                            && self.match_pattern(rule, right, a_right, found)
                    }
                    None => false,
                }
            }
            TreeKind::Prefix { left, right } => match self.trees.as_prefix(actual) {
                Some((a_left, a_right)) => {
                    self.match_symbol(rule, left, a_left, found)
                        && self.match_pattern(rule, right, a_right, found)
                }
                None => false,
            },
            TreeKind::Postfix { left, right } => match self.trees.as_postfix(actual) {
                Some((a_left, a_right)) => {
                    self.match_pattern(rule, left, a_left, found)
                        && self.match_symbol(rule, right, a_right, found)
                }
                None => false,
            },
            TreeKind::Block { .. } => false,
        }
    }

    /// Prefix heads and postfix tails that are names must be spelled alike.
    fn match_symbol(
        &mut self,
        rule: RuleRef,
        pattern: TreeId,
        actual: TreeId,
        found: &mut Match,
    ) -> bool {
        match self.trees.as_name(pattern) {
            Some(symbol) => self.trees.as_name(actual) == Some(symbol),
            None => self.match_pattern(rule, pattern, actual, found),
        }
    }

    fn strip_parens(&self, mut tree: TreeId) -> TreeId {
        while let Some((child, "(", ")")) = self.trees.as_block(tree) {
            tree = child;
        }
        tree
    }

    /// A pattern name: a constant like `true` when bound to itself, a
    /// repeated formal, or a new binding.
    fn bind_formal(
        &mut self,
        rule: RuleRef,
        name: &str,
        formal: TreeId,
        actual: TreeId,
        declared: Option<TreeId>,
        found: &mut Match,
    ) {
        if self.context.is_self_bound(&self.trees, rule.scope, name) {
            found.same_value(actual, formal);
        } else if let Some(previous) = found.bound(name) {
            found.same_value(actual, previous);
        } else {
            found.bindings.push(RewriteBinding {
                name: name.to_string(),
                formal,
                value: actual,
                declared,
            });
        }
    }

    /// `X:T`: decide statically what can be, guard the rest.
    fn match_typed(
        &mut self,
        rule: RuleRef,
        formal: &str,
        name: TreeId,
        declared: TreeId,
        actual: TreeId,
        found: &mut Match,
    ) -> bool {
        if self.trees.is_constant(actual) {
            let Some(value) = self.algebra().value_matches_type(declared, actual, true) else {
                return false;
            };
            if value != actual {
                self.assign_type(value, Some(value));
            }
            self.bind_formal(rule, formal, name, value, Some(declared), found);
            return true;
        }

        let actual_type = self.type_of(actual);
        let statically = if is_generic(&self.trees, actual_type) {
            None
        } else if self.algebra().type_covers_type(declared, actual_type, false) {
            Some(true)
        } else if self.algebra().type_intersects_type(declared, actual_type, false) {
            None
        } else {
            Some(false)
        };
        match statically {
            Some(false) => false,
            Some(true) => {
                self.bind_formal(rule, formal, name, actual, Some(declared), found);
                true
            }
            None => {
                found.conditions.push(RewriteCondition {
                    value: actual,
                    test: declared,
                    kind: GuardKind::HasType,
                });
                self.bind_formal(rule, formal, name, actual, Some(declared), found);
                true
            }
        }
    }
}
