//! Reduction of analysed calls into backend code.
//!
//! The [`Reducer`] walks a type-checked program and, for every call, hands
//! the backend an ordered decision chain over the call's candidates: test
//! the guards of each candidate in priority order, run the first candidate
//! whose guards hold, and raise a form error when none does. The
//! [`Backend`] trait is the only interface to code generation;
//! [`MirBackend`] is the reference implementor, lowering into [`mir`].

pub mod mir;

mod backend;
mod reduce;

use std::fmt;

use serde::Deserialize;

pub use backend::MirBackend;
pub use reduce::{Reducer, compile_program};

use crate::mir::{MirFunction, MirInst, MirModule, MirTerminator};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Fold guards whose operands are both constants into a constant.
    pub fold_constant_guards: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            fold_constant_guards: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Values and errors
// ---------------------------------------------------------------------------

/// A constant the backend materializes.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Real(f64),
    Text(String),
    Character(String),
    Boolean(bool),
    /// A name bound to itself, such as a builtin type.
    Symbol(String),
    /// The value of a declaration.
    Unit,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integer(value) => write!(f, "{value}"),
            Literal::Real(value) => write!(f, "{value:?}"),
            Literal::Text(value) => write!(f, "{value:?}"),
            Literal::Character(value) => write!(f, "'{value}'"),
            Literal::Boolean(value) => write!(f, "{value}"),
            Literal::Symbol(name) => write!(f, "{name}"),
            Literal::Unit => write!(f, "()"),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("no candidates were recorded for `{call}`")]
    MissingCandidates { call: String },
    #[error("name `{name}` is not bound")]
    UnboundName { name: String },
    #[error("`{name}` refers to a parameter of an enclosing rule")]
    CapturedName { name: String },
    #[error("unknown primitive `{op}`")]
    UnknownPrimitive { op: String },
    #[error("primitive `{op}` takes {expected} arguments, got {actual}")]
    PrimitiveArity {
        op: String,
        expected: usize,
        actual: usize,
    },
    #[error("malformed primitive `{tree}`")]
    MalformedPrimitive { tree: String },
    #[error("function `{function}` finished twice or never started")]
    UnbalancedFunction { function: String },
}

// ---------------------------------------------------------------------------
// Backend interface
// ---------------------------------------------------------------------------

/// Code generation as seen by the reducer.
///
/// Functions nest: a candidate body may be compiled while the caller's
/// function is still open, and every block or value operation applies to
/// the innermost open function.
pub trait Backend {
    type Value: Copy + fmt::Debug;
    type Block: Copy + fmt::Debug;
    type Function: Clone + fmt::Debug;

    fn name(&self) -> &'static str;

    /// Open a function taking `arity` arguments and return its handle and
    /// parameter values.
    fn begin_function(&mut self, name: &str, arity: usize) -> (Self::Function, Vec<Self::Value>);
    /// Return `result` from the innermost open function and close it.
    fn finish_function(&mut self, result: Self::Value) -> Result<(), CodegenError>;

    fn new_block(&mut self, label: &str) -> Self::Block;
    fn switch_to(&mut self, block: Self::Block);
    fn branch(&mut self, target: Self::Block);
    fn cond_branch(
        &mut self,
        condition: Self::Value,
        then_block: Self::Block,
        else_block: Self::Block,
    );

    /// Storage for the value of one reduction.
    fn storage(&mut self) -> Self::Value;
    fn store(&mut self, slot: Self::Value, value: Self::Value);
    fn load(&mut self, slot: Self::Value) -> Self::Value;

    fn constant(&mut self, literal: &Literal) -> Self::Value;
    /// Run-time structural comparison of `value` against `test`.
    fn compare(&mut self, value: Self::Value, test: Self::Value) -> Self::Value;
    /// Run-time test that `value` belongs to the type spelled `ty`.
    fn has_type(&mut self, value: Self::Value, ty: &str) -> Self::Value;
    fn and(&mut self, left: Self::Value, right: Self::Value) -> Self::Value;

    fn primitive(&mut self, op: &str, args: &[Self::Value]) -> Result<Self::Value, CodegenError>;
    fn call(&mut self, function: &Self::Function, args: &[Self::Value]) -> Self::Value;
    /// Raise the dynamic "no form matches" fault for `call` and return the
    /// error sentinel.
    fn form_error(&mut self, call: &str) -> Self::Value;
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PassStats {
    pub per_function: Vec<FunctionPassStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionPassStats {
    pub function: String,
    pub branch_count: usize,
    pub guard_count: usize,
    pub call_count: usize,
    pub primitive_count: usize,
    pub form_error_count: usize,
}

pub fn collect_pass_stats(module: &MirModule) -> PassStats {
    let per_function = module
        .functions
        .iter()
        .map(collect_function_stats)
        .collect::<Vec<_>>();
    PassStats { per_function }
}

fn collect_function_stats(function: &MirFunction) -> FunctionPassStats {
    let mut stats = FunctionPassStats {
        function: function.name.clone(),
        ..FunctionPassStats::default()
    };

    for block in &function.blocks {
        if matches!(block.terminator, MirTerminator::Branch { .. }) {
            stats.branch_count += 1;
        }
        for inst in &block.instructions {
            match inst {
                inst if inst.is_guard_op() => stats.guard_count += 1,
                MirInst::Call { .. } => stats.call_count += 1,
                MirInst::Primitive { .. } => stats.primitive_count += 1,
                MirInst::FormError { .. } => stats.form_error_count += 1,
                _ => {}
            }
        }
    }

    stats
}



#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_config_defaults_to_folding() {
        assert!(BackendConfig::default().fold_constant_guards);
    }

    #[test]
    fn literals_render_like_source() {
        assert_eq!(Literal::Integer(-3).to_string(), "-3");
        assert_eq!(Literal::Real(5.0).to_string(), "5.0");
        assert_eq!(Literal::Text("hi".into()).to_string(), "\"hi\"");
        assert_eq!(Literal::Character("a".into()).to_string(), "'a'");
        assert_eq!(Literal::Symbol("integer".into()).to_string(), "integer");
    }
}
