//! Step-by-step records of unification and rule resolution.
//!
//! Recording is opt-in through [`crate::TypeInference::enable_tracing`] or
//! [`crate::InferenceOptions::tracing`]. Nothing is allocated when it is off.
//! Records serialize with serde so a tool can export them as JSON.

use serde::Serialize;

// ---------------------------------------------------------------------------
// Unification trace
// ---------------------------------------------------------------------------

/// A single step in a unification trace.
#[derive(Debug, Clone, Serialize)]
pub struct UnifyStep {
    pub step: usize,
    pub action: UnifyAction,
    pub left: String,
    pub right: String,
    pub detail: String,
}

/// What happened during a unification step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifyAction {
    /// Both sides already have the same representative.
    Identity,
    /// A block was stripped and its child unified.
    StripBlock,
    /// A type name was replaced by its definition.
    LookupName,
    /// A literal was promoted to its builtin type.
    PromoteLiteral,
    /// Function types unified component-wise.
    Decompose,
    /// One branch of a union unified.
    UnionBranch,
    /// Two pattern types compared structurally.
    ComparePatterns,
    /// One class linked under another.
    Join,
    Error,
}

// ---------------------------------------------------------------------------
// Inference trace
// ---------------------------------------------------------------------------

/// A single step in an inference trace.
#[derive(Debug, Clone, Serialize)]
pub struct InferStep {
    pub expr: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub rule: InferRule,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<(u32, u32)>,
}

/// Which part of the analysis produced the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InferRule {
    Constant,
    Name,
    Declaration,
    Annotation,
    Sequence,
    Candidate,
    RecursiveCandidate,
    Call,
}
