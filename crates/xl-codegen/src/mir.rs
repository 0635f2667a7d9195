//! Backend-neutral mid-level IR (MIR) produced by the reference backend.
//!
//! Explicit basic blocks, per-call-site storage slots and guard operations.
//! Rendering is stable so that reductions can be snapshot-tested.

use std::fmt;

use crate::Literal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MirValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MirBlockId(pub u32);

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MirModule {
    pub functions: Vec<MirFunction>,
}

impl MirModule {
    pub fn function(&self, name: &str) -> Option<&MirFunction> {
        self.functions.iter().find(|function| function.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MirFunction {
    pub name: String,
    pub params: Vec<MirValueId>,
    pub entry: MirBlockId,
    pub blocks: Vec<MirBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MirBlock {
    pub id: MirBlockId,
    pub label: String,
    pub instructions: Vec<MirInst>,
    pub terminator: MirTerminator,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MirInst {
    Const {
        dest: MirValueId,
        literal: Literal,
    },
    /// Storage for the result of one reduction.
    Slot {
        dest: MirValueId,
    },
    Store {
        slot: MirValueId,
        value: MirValueId,
    },
    Load {
        dest: MirValueId,
        slot: MirValueId,
    },
    /// Structural equality of two values.
    Compare {
        dest: MirValueId,
        value: MirValueId,
        test: MirValueId,
    },
    HasType {
        dest: MirValueId,
        value: MirValueId,
        ty: String,
    },
    And {
        dest: MirValueId,
        left: MirValueId,
        right: MirValueId,
    },
    Primitive {
        dest: MirValueId,
        op: String,
        args: Vec<MirValueId>,
    },
    Call {
        callee: String,
        args: Vec<MirValueId>,
        result: MirValueId,
    },
    /// Raise the run-time "no form matches" fault; `dest` is the error
    /// sentinel.
    FormError {
        dest: MirValueId,
        call: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MirTerminator {
    Jump {
        target: MirBlockId,
    },
    Branch {
        condition: MirValueId,
        then_block: MirBlockId,
        else_block: MirBlockId,
    },
    Return {
        value: MirValueId,
    },
    Unreachable,
}

impl MirInst {
    pub fn is_guard_op(&self) -> bool {
        matches!(
            self,
            MirInst::Compare { .. } | MirInst::HasType { .. } | MirInst::And { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

impl fmt::Display for MirValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for MirBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

fn list(values: &[MirValueId]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for MirInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirInst::Const { dest, literal } => write!(f, "{dest} = const {literal}"),
            MirInst::Slot { dest } => write!(f, "{dest} = slot"),
            MirInst::Store { slot, value } => write!(f, "store {value} -> {slot}"),
            MirInst::Load { dest, slot } => write!(f, "{dest} = load {slot}"),
            MirInst::Compare { dest, value, test } => write!(f, "{dest} = compare {value}, {test}"),
            MirInst::HasType { dest, value, ty } => write!(f, "{dest} = has_type {value}, {ty}"),
            MirInst::And { dest, left, right } => write!(f, "{dest} = and {left}, {right}"),
            MirInst::Primitive { dest, op, args } => {
                write!(f, "{dest} = opcode {op}({})", list(args))
            }
            MirInst::Call {
                callee,
                args,
                result,
            } => write!(f, "{result} = call {callee}({})", list(args)),
            MirInst::FormError { dest, call } => write!(f, "{dest} = form_error {call:?}"),
        }
    }
}

impl fmt::Display for MirTerminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirTerminator::Jump { target } => write!(f, "jump {target}"),
            MirTerminator::Branch {
                condition,
                then_block,
                else_block,
            } => write!(f, "branch {condition}, {then_block}, {else_block}"),
            MirTerminator::Return { value } => write!(f, "return {value}"),
            MirTerminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

impl fmt::Display for MirFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fn {}({}) {{", self.name, list(&self.params))?;
        for block in &self.blocks {
            writeln!(f, "{}: ; {}", block.id, block.label)?;
            for inst in &block.instructions {
                writeln!(f, "    {inst}")?;
            }
            writeln!(f, "    {}", block.terminator)?;
        }
        write!(f, "}}")
    }
}

impl fmt::Display for MirModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, function) in self.functions.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{function}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_op_classifier() {
        let compare = MirInst::Compare {
            dest: MirValueId(2),
            value: MirValueId(0),
            test: MirValueId(1),
        };
        let slot = MirInst::Slot {
            dest: MirValueId(3),
        };
        assert!(compare.is_guard_op());
        assert!(!slot.is_guard_op());
    }

    #[test]
    fn function_renders_blocks_in_order() {
        let function = MirFunction {
            name: "main".to_string(),
            params: vec![],
            entry: MirBlockId(0),
            blocks: vec![MirBlock {
                id: MirBlockId(0),
                label: "entry".to_string(),
                instructions: vec![MirInst::Const {
                    dest: MirValueId(0),
                    literal: Literal::Integer(42),
                }],
                terminator: MirTerminator::Return {
                    value: MirValueId(0),
                },
            }],
        };
        insta::assert_snapshot!(function.to_string(), @r"
        fn main() {
        bb0: ; entry
            %0 = const 42
            return %0
        }
        ");
    }
}
