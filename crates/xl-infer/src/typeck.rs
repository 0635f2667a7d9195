//! Tree traversal: assign and unify types node by node.
//!
//! Constants type as themselves. Names and operator forms are evaluated:
//! a bound name takes the type of its definition, anything else is resolved
//! against the rewrite rules in scope. Declarations `pattern -> body` are
//! entered into the scope before the program is traversed, so rules may
//! refer to each other in any order.

use tracing::instrument;
use xl_ast::{Kind, TreeId, is_sequence_operator, sequence_items};

use crate::context::{LookupMode, split_result_type};
use crate::trace::InferRule;
use crate::{Category, TypeInference};

impl TypeInference {
    /// Enter the declarations of `program` into the current scope, then
    /// traverse it.
    pub fn type_check(&mut self, program: TreeId) -> bool {
        let _span = tracing::debug_span!("type_check", program = program.0).entered();
        let declared = self.process_declarations(program);
        let checked = self.check(program);
        tracing::debug!(declared, checked, errors = self.log.count(), "type check done");
        declared && checked
    }

    /// Register every `->` of the top-level sequence of `program`, in order.
    pub fn process_declarations(&mut self, program: TreeId) -> bool {
        let scope = self.scope();
        let mut ok = true;
        for item in sequence_items(&self.trees, program) {
            if self.trees.as_infix_named(item, "->").is_none() {
                continue;
            }
            if let Err(pattern) = self.context.enter(&self.trees, scope, item) {
                self.error(Category::MalformedPattern, "Malformed rewrite pattern $1", pattern);
                ok = false;
            }
        }
        ok
    }

    /// Assign a type to `node` according to its kind.
    #[instrument(level = tracing::Level::TRACE, skip(self), fields(node = node.0))]
    pub fn check(&mut self, node: TreeId) -> bool {
        match self.trees.kind(node) {
            Kind::Integer | Kind::Real | Kind::Text => self.check_constant(node),
            Kind::Name => self.evaluate(node),
            Kind::Block => self.check_block(node),
            Kind::Prefix => self.check_prefix(node),
            Kind::Postfix => self.check_postfix(node),
            Kind::Infix => self.check_infix(node),
        }
    }

    fn check_constant(&mut self, node: TreeId) -> bool {
        self.push_infer_step(node, InferRule::Constant, "literal");
        if self.context.has_constants(self.scope()) && !self.is_prototyping() {
            return self.evaluate(node);
        }
        self.assign_type(node, Some(node))
    }

    /// A block has the type of its child, unless block rules rewrite it.
    fn check_block(&mut self, node: TreeId) -> bool {
        let Some((child, _, _)) = self.trees.as_block(node) else {
            return false;
        };
        let errors = self.log.begin_scope();
        if self.check(child) {
            let _ = self.log.end_scope(errors, true);
            return self.unify(node, child);
        }
        let failed = self.log.end_scope(errors, false);
        let scope = self.scope();
        if !self
            .context
            .lookup(&self.trees, scope, node, LookupMode::Normal)
            .is_empty()
        {
            return self.evaluate(node);
        }
        self.log.extend(failed);
        false
    }

    /// `head argument`. The head name is only a symbol here, so it is
    /// analysed as a pattern would be and the whole form is evaluated.
    fn check_prefix(&mut self, node: TreeId) -> bool {
        let Some((left, right)) = self.trees.as_prefix(node) else {
            return false;
        };
        // `opcode Add` stands for a machine primitive
        if self.trees.as_name(left) == Some("opcode") {
            return self.assign_type(node, None);
        }
        let left_ok = if self.trees.as_name(left).is_some() {
            self.prototyping(|this| this.check(left))
        } else {
            self.check(left)
        };
        // The arguments may fail on their own; the whole form is still evaluated
        let right_ok = self.check(right);
        let form_ok = self.evaluate(node);
        left_ok && right_ok && form_ok
    }

    fn check_postfix(&mut self, node: TreeId) -> bool {
        let Some((left, right)) = self.trees.as_postfix(node) else {
            return false;
        };
        let right_ok = if self.trees.as_name(right).is_some() {
            self.prototyping(|this| this.check(right))
        } else {
            self.check(right)
        };
        let left_ok = self.check(left);
        let form_ok = self.evaluate(node);
        left_ok && right_ok && form_ok
    }

    fn check_infix(&mut self, node: TreeId) -> bool {
        let Some((name, left, right)) = self.trees.as_infix(node) else {
            return false;
        };
        let name = name.to_string();
        match name.as_str() {
            ":" => {
                self.push_infer_step(node, InferRule::Annotation, "type annotation");
                self.assign_type(left, Some(right))
                    && self.check(left)
                    && self.assign_type(node, None)
                    && self.unify(node, left)
            }
            "->" => self.rewrite(node),
            name if is_sequence_operator(name) => {
                // Both statements are analysed even if the first one fails
                let left_ok = self.check(left);
                let right_ok = self.check(right);
                self.push_infer_step(node, InferRule::Sequence, "statement");
                left_ok && right_ok && self.unify(node, right)
            }
            _ => {
                let left_ok = self.check(left);
                let right_ok = self.check(right);
                let form_ok = self.evaluate(node);
                left_ok && right_ok && form_ok
            }
        }
    }

    /// Type a declaration `pattern -> body` as `type(pattern) => type(body)`.
    ///
    /// The pattern is analysed in prototyping mode in a scope of its own.
    /// The body is not analysed here: each call instantiates it afresh.
    pub fn rewrite(&mut self, declaration: TreeId) -> bool {
        let Some((pattern, body)) = self.trees.as_infix_named(declaration, "->") else {
            return false;
        };
        let (pattern, declared) = split_result_type(&self.trees, pattern);
        let parent = self.scope();
        let scope = self.context.child(parent);
        let session = self.push_session(scope, true);
        let ok = self.check(pattern);
        self.pop_session(session);
        if !ok {
            self.error(Category::MalformedPattern, "Malformed rewrite pattern $1", pattern);
            return false;
        }
        if let Some(declared) = declared
            && !self.assign_type(pattern, Some(declared))
        {
            return false;
        }

        let form = self.type_of(pattern);
        let value = self.type_of(body);
        let span = self.trees.span(declaration);
        let fn_type = self.trees.infix("=>", form, value, span);
        if !self.assign_type(declaration, Some(fn_type)) || !self.unify_types(form, value) {
            return false;
        }
        self.push_infer_step(declaration, InferRule::Declaration, "rewrite");

        // `X + Y -> ...` has the type of the pattern `type(X + Y)`
        if declared.is_none()
            && let Some((operator, _, _)) = self.trees.as_infix(pattern)
            && operator != ":"
        {
            let head = self.trees.name("type", span);
            let shape = self.trees.prefix(head, pattern, span);
            let form = self.type_of(pattern);
            return self.unify_types(form, shape);
        }
        true
    }

    /// Give `node` the type of what it evaluates to.
    ///
    /// Bound names take the type of their definition. Other forms take the
    /// union of the types of the rules that may rewrite them; the rules are
    /// recorded as the call's candidates.
    pub fn evaluate(&mut self, node: TreeId) -> bool {
        if self.is_prototyping() {
            return true;
        }
        let _span = tracing::debug_span!("evaluate", node = node.0).entered();
        let scope = self.scope();
        if self.trees.is_constant(node) && !self.context.has_constants(scope) {
            return self.assign_type(node, Some(node));
        }

        if let Some(name) = self.trees.as_name(node)
            && let Some(binding) = self.context.bound(&self.trees, scope, name, LookupMode::Normal)
        {
            let definition = binding.definition;
            if definition == node {
                self.push_infer_step(node, InferRule::Name, "self-bound");
                return true;
            }
            let rule = self.context.rule(binding.rule);
            if rule.declaration != rule.pattern {
                // `name -> value`: analyse the value once, where it was declared
                if self.defined.insert(definition) {
                    let session = self.push_session(binding.scope, false);
                    let ok = self.check(definition);
                    self.pop_session(session);
                    if !ok {
                        return false;
                    }
                }
            } else if self.tables.assigned(definition).is_none() && !self.check(definition) {
                return false;
            }
            let ok = match self.context.rule(binding.rule).result_type {
                Some(declared) => {
                    let ty = self.type_of(node);
                    self.unify_types(ty, declared)
                }
                None => self.unify(node, definition),
            };
            self.push_infer_step(node, InferRule::Name, "bound name");
            return ok;
        }

        let (calls, failures) = self.candidates(node);
        if calls.candidates.is_empty() {
            if self.trees.is_constant(node) {
                // Constants no rule rewrites stand for themselves
                return self.assign_type(node, Some(node));
            }
            tracing::debug!(call = %self.trees.render(node), "no form matches");
            self.error(Category::NoFormMatches, "No form matches $1", node);
            self.log.extend(failures);
            return false;
        }

        let types: Vec<TreeId> = calls.candidate_types().collect();
        self.record_calls(node, calls);
        let Some(union) = self.union_all(&types) else {
            return false;
        };
        let ty = self.type_of(node);
        let ok = self.unify_types(ty, union);
        self.push_infer_step(node, InferRule::Call, "candidates");
        ok
    }
}
