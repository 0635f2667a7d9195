//! Expression reduction: from analysed trees to backend code.
//!
//! Each call site becomes a priority chain over its candidates. A call with
//! a single unguarded candidate is emitted as a direct call; otherwise the
//! guards of each candidate are tested in order, the first candidate whose
//! guards all hold stores its value, and falling off the end raises a form
//! error. An unguarded candidate ends the chain.

use std::collections::BTreeMap;

use xl_ast::{TreeId, TreeKind, is_sequence_operator};
use xl_infer::{
    GuardKind, LookupMode, RewriteCalls, RewriteCandidate, RewriteCondition, ScopeId, SessionId,
    TypeInference,
};

use crate::{Backend, CodegenError, Literal};

/// Compile `program` into a backend function called `name`.
pub fn compile_program<B: Backend>(
    infer: &TypeInference,
    backend: &mut B,
    name: &str,
    program: TreeId,
) -> Result<B::Function, CodegenError> {
    Reducer::new(infer, backend).compile(name, program)
}

/// Where names are resolved while compiling one function.
struct Frame<V> {
    session: SessionId,
    scope: ScopeId,
    /// Formal parameters of the rule being compiled.
    arguments: BTreeMap<String, V>,
    params: Vec<V>,
    /// Values already computed in this function.
    computed: BTreeMap<TreeId, V>,
}

impl<V> Frame<V> {
    fn new(session: SessionId, scope: ScopeId) -> Self {
        Self {
            session,
            scope,
            arguments: BTreeMap::new(),
            params: Vec::new(),
            computed: BTreeMap::new(),
        }
    }
}

pub struct Reducer<'a, B: Backend> {
    infer: &'a TypeInference,
    backend: &'a mut B,
    frames: Vec<Frame<B::Value>>,
    /// Functions compiled for rule instances, by instance body.
    compiled: BTreeMap<TreeId, B::Function>,
}

impl<'a, B: Backend> Reducer<'a, B> {
    pub fn new(infer: &'a TypeInference, backend: &'a mut B) -> Self {
        Self {
            infer,
            backend,
            frames: Vec::new(),
            compiled: BTreeMap::new(),
        }
    }

    /// Compile a top-level program into a function without parameters.
    pub fn compile(&mut self, name: &str, program: TreeId) -> Result<B::Function, CodegenError> {
        let _span = tracing::debug_span!("compile", name, backend = self.backend.name()).entered();
        let (function, _) = self.backend.begin_function(name, 0);
        let root = self.infer.root_session();
        let scope = self.infer.session(root).scope;
        self.frames.push(Frame::new(root, scope));
        let result = self.expression(program);
        self.frames.pop();
        self.backend.finish_function(result?)?;
        Ok(function)
    }

    fn frame(&self) -> &Frame<B::Value> {
        self.frames.last().expect("a frame is active")
    }

    fn frame_mut(&mut self) -> &mut Frame<B::Value> {
        self.frames.last_mut().expect("a frame is active")
    }

    fn render(&self, tree: TreeId) -> String {
        self.infer.trees().render(tree)
    }

    /// Candidates recorded for `node`.
    fn calls(&self, node: TreeId) -> Option<&'a RewriteCalls> {
        let infer = self.infer;
        infer
            .calls_in(self.frame().session, node)
            .or_else(|| infer.find_calls(node).map(|(_, calls)| calls))
    }

    // -- Expressions --

    /// Compute `node` once per function.
    fn value(&mut self, node: TreeId) -> Result<B::Value, CodegenError> {
        if let Some(&value) = self.frame().computed.get(&node) {
            return Ok(value);
        }
        let value = self.expression(node)?;
        self.frame_mut().computed.insert(node, value);
        Ok(value)
    }

    pub fn expression(&mut self, node: TreeId) -> Result<B::Value, CodegenError> {
        let infer = self.infer;
        let trees = infer.trees();
        match trees.get(node) {
            TreeKind::Integer(_) | TreeKind::Real(_) | TreeKind::Text { .. } => {
                match self.calls(node) {
                    Some(calls) => self.reduce(node, calls),
                    None => Ok(self.backend.constant(&literal(infer, node))),
                }
            }
            TreeKind::Name(name) => self.name(name),
            TreeKind::Block { child, .. } => match self.calls(node) {
                Some(calls) => self.reduce(node, calls),
                None => self.expression(*child),
            },
            TreeKind::Infix { name, left, right } => match name.as_str() {
                name if is_sequence_operator(name) => {
                    self.expression(*left)?;
                    self.expression(*right)
                }
                ":" => self.expression(*left),
                "->" => Ok(self.backend.constant(&Literal::Unit)),
                _ => self.call(node),
            },
            TreeKind::Prefix { left, right } => {
                if trees.as_name(*left) == Some("opcode") {
                    let params = self.frame().params.clone();
                    let op = opcode_name(infer, *right)?;
                    return self.backend.primitive(op, &params);
                }
                self.call(node)
            }
            TreeKind::Postfix { .. } => self.call(node),
        }
    }

    fn name(&mut self, name: &str) -> Result<B::Value, CodegenError> {
        let infer = self.infer;
        let frame = self.frame();
        let Some(binding) =
            infer
                .context()
                .bound(infer.trees(), frame.scope, name, LookupMode::Normal)
        else {
            return Err(CodegenError::UnboundName {
                name: name.to_string(),
            });
        };
        if binding.scope == frame.scope
            && let Some(&argument) = frame.arguments.get(name)
        {
            return Ok(argument);
        }

        let builtins = infer.builtins();
        let rule = infer.context().rule(binding.rule);
        let literal = if binding.definition == builtins.true_value {
            Literal::Boolean(true)
        } else if binding.definition == builtins.false_value {
            Literal::Boolean(false)
        } else if binding.definition == rule.pattern {
            Literal::Symbol(name.to_string())
        } else if rule.declaration != rule.pattern {
            // `name -> value`: compute the value where it was declared
            let session = frame.session;
            self.frames.push(Frame::new(session, binding.scope));
            let value = self.expression(binding.definition);
            self.frames.pop();
            return value;
        } else {
            return Err(CodegenError::CapturedName {
                name: name.to_string(),
            });
        };
        Ok(self.backend.constant(&literal))
    }

    fn call(&mut self, node: TreeId) -> Result<B::Value, CodegenError> {
        let Some(calls) = self.calls(node) else {
            return Err(CodegenError::MissingCandidates {
                call: self.render(node),
            });
        };
        self.reduce(node, calls)
    }

    // -- Reduction --

    /// Emit the decision chain for `call`.
    pub fn reduce(&mut self, call: TreeId, calls: &RewriteCalls) -> Result<B::Value, CodegenError> {
        let _span = tracing::debug_span!(
            "reduce",
            call = call.0,
            candidates = calls.candidates.len()
        )
        .entered();

        if calls.is_direct() {
            tracing::trace!("direct call");
            return self.rewrite(&calls.candidates[0]);
        }

        let done = self.backend.new_block("done");
        let storage = self.backend.storage();
        for candidate in &calls.candidates {
            let mut condition = None;
            for guard in &candidate.conditions {
                let test = self.guard(guard)?;
                condition = Some(match condition {
                    Some(previous) => self.backend.and(previous, test),
                    None => test,
                });
            }

            let Some(condition) = condition else {
                // Unguarded: the chain ends here
                let result = self.rewrite_in_branch(candidate)?;
                self.backend.store(storage, result);
                self.backend.branch(done);
                self.backend.switch_to(done);
                return Ok(self.backend.load(storage));
            };
            let good = self.backend.new_block("good");
            let bad = self.backend.new_block("bad");
            self.backend.cond_branch(condition, good, bad);
            self.backend.switch_to(good);
            let result = self.rewrite_in_branch(candidate)?;
            self.backend.store(storage, result);
            self.backend.branch(done);
            self.backend.switch_to(bad);
        }

        let rendered = self.render(call);
        tracing::debug!(call = %rendered, "no candidate is certain to apply");
        let sentinel = self.backend.form_error(&rendered);
        self.backend.store(storage, sentinel);
        self.backend.branch(done);
        self.backend.switch_to(done);
        Ok(self.backend.load(storage))
    }

    fn guard(&mut self, condition: &RewriteCondition) -> Result<B::Value, CodegenError> {
        let value = self.value(condition.value)?;
        match condition.kind {
            GuardKind::SameValue => {
                let test = self.value(condition.test)?;
                Ok(self.backend.compare(value, test))
            }
            GuardKind::HasType => {
                let ty = self.render(condition.test);
                Ok(self.backend.has_type(value, &ty))
            }
        }
    }

    /// Values computed inside a branch are not available after it.
    fn rewrite_in_branch(
        &mut self,
        candidate: &RewriteCandidate,
    ) -> Result<B::Value, CodegenError> {
        let saved = self.frame().computed.clone();
        let result = self.rewrite(candidate);
        self.frame_mut().computed = saved;
        result
    }

    /// Evaluate the arguments of `candidate` and invoke its body.
    fn rewrite(&mut self, candidate: &RewriteCandidate) -> Result<B::Value, CodegenError> {
        let args = candidate
            .bindings
            .iter()
            .map(|binding| self.value(binding.value))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(code) = self.infer.trees().as_prefix_named(candidate.body, "opcode") {
            let op = opcode_name(self.infer, code)?;
            return self.backend.primitive(op, &args);
        }
        let function = self.body_function(candidate)?;
        Ok(self.backend.call(&function, &args))
    }

    /// The function computing a candidate's body, compiled on first use.
    fn body_function(&mut self, candidate: &RewriteCandidate) -> Result<B::Function, CodegenError> {
        if let Some(function) = self.compiled.get(&candidate.body) {
            return Ok(function.clone());
        }
        let infer = self.infer;
        let pattern = infer.context().rule(candidate.rule).pattern;
        let name = format!("{}@{}", self.render(pattern), candidate.body.0);
        let _span = tracing::debug_span!("body", function = %name).entered();

        let (function, params) = self.backend.begin_function(&name, candidate.bindings.len());
        self.compiled.insert(candidate.body, function.clone());
        let mut frame = Frame::new(candidate.session, infer.session(candidate.session).scope);
        frame.arguments = candidate
            .bindings
            .iter()
            .map(|binding| binding.name.clone())
            .zip(params.iter().copied())
            .collect();
        frame.params = params;
        self.frames.push(frame);
        let result = self.expression(candidate.body);
        self.frames.pop();
        self.backend.finish_function(result?)?;
        Ok(function)
    }
}

fn literal(infer: &TypeInference, node: TreeId) -> Literal {
    match infer.trees().get(node) {
        TreeKind::Integer(value) => Literal::Integer(*value),
        TreeKind::Real(value) => Literal::Real(*value),
        TreeKind::Text { value, opening, .. } if opening == "'" => {
            Literal::Character(value.clone())
        }
        TreeKind::Text { value, .. } => Literal::Text(value.clone()),
        _ => Literal::Symbol(infer.trees().render(node)),
    }
}

/// `Add` in `opcode Add`.
fn opcode_name(infer: &TypeInference, code: TreeId) -> Result<&str, CodegenError> {
    infer
        .trees()
        .as_name(code)
        .ok_or_else(|| CodegenError::MalformedPrimitive {
            tree: infer.trees().render(code),
        })
}
