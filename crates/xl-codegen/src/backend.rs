//! Reference backend: lowers reductions into [`MirModule`]s.

use std::collections::BTreeMap;

use crate::mir::{MirBlock, MirBlockId, MirFunction, MirInst, MirModule, MirTerminator, MirValueId};
use crate::{Backend, BackendConfig, CodegenError, Literal};

/// Arity of each machine primitive an `opcode` body may name.
const PRIMITIVES: &[(&str, usize)] = &[
    ("Add", 2),
    ("Sub", 2),
    ("Mul", 2),
    ("SDiv", 2),
    ("SRem", 2),
    ("Neg", 1),
    ("FAdd", 2),
    ("FSub", 2),
    ("FMul", 2),
    ("FDiv", 2),
    ("FNeg", 1),
    ("ICmpEQ", 2),
    ("ICmpNE", 2),
    ("ICmpSLT", 2),
    ("ICmpSLE", 2),
    ("ICmpSGT", 2),
    ("ICmpSGE", 2),
    ("FCmpOEQ", 2),
    ("FCmpONE", 2),
    ("FCmpOLT", 2),
    ("FCmpOLE", 2),
    ("FCmpOGT", 2),
    ("FCmpOGE", 2),
    ("And", 2),
    ("Or", 2),
    ("Xor", 2),
    ("Not", 1),
];

/// A function being built.
#[derive(Debug)]
struct FunctionBuilder {
    function: MirFunction,
    current: MirBlockId,
    next_value: u32,
    /// Values known to be constants, for folding guards.
    constants: BTreeMap<MirValueId, Literal>,
}

impl FunctionBuilder {
    fn new(name: &str, arity: usize) -> Self {
        let entry = MirBlockId(0);
        let mut builder = Self {
            function: MirFunction {
                name: name.to_string(),
                params: Vec::new(),
                entry,
                blocks: vec![MirBlock {
                    id: entry,
                    label: "entry".to_string(),
                    instructions: Vec::new(),
                    terminator: MirTerminator::Unreachable,
                }],
            },
            current: entry,
            next_value: 0,
            constants: BTreeMap::new(),
        };
        builder.function.params = (0..arity).map(|_| builder.fresh()).collect();
        builder
    }

    fn fresh(&mut self) -> MirValueId {
        let id = MirValueId(self.next_value);
        self.next_value += 1;
        id
    }

    fn block_mut(&mut self) -> &mut MirBlock {
        let current = self.current;
        self.function
            .blocks
            .iter_mut()
            .find(|block| block.id == current)
            .expect("current block exists")
    }

    fn push(&mut self, inst: MirInst) {
        self.block_mut().instructions.push(inst);
    }

    fn terminate(&mut self, terminator: MirTerminator) {
        self.block_mut().terminator = terminator;
    }
}

/// Lowers reductions into a [`MirModule`].
#[derive(Debug, Default)]
pub struct MirBackend {
    config: BackendConfig,
    module: MirModule,
    open: Vec<FunctionBuilder>,
}

impl MirBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            module: MirModule::default(),
            open: Vec::new(),
        }
    }

    pub fn module(&self) -> &MirModule {
        &self.module
    }

    pub fn into_module(self) -> MirModule {
        self.module
    }

    fn builder(&mut self) -> &mut FunctionBuilder {
        self.open.last_mut().expect("a function is open")
    }

    fn emit(&mut self, make: impl FnOnce(MirValueId) -> MirInst) -> MirValueId {
        let builder = self.builder();
        let dest = builder.fresh();
        builder.push(make(dest));
        dest
    }

    fn known(&mut self, value: MirValueId) -> Option<Literal> {
        self.builder().constants.get(&value).cloned()
    }

    fn fold(&self) -> bool {
        self.config.fold_constant_guards
    }
}

impl Backend for MirBackend {
    type Value = MirValueId;
    type Block = MirBlockId;
    type Function = String;

    fn name(&self) -> &'static str {
        "mir"
    }

    fn begin_function(&mut self, name: &str, arity: usize) -> (String, Vec<MirValueId>) {
        tracing::trace!(function = name, arity, "begin function");
        let builder = FunctionBuilder::new(name, arity);
        let params = builder.function.params.clone();
        self.open.push(builder);
        (name.to_string(), params)
    }

    fn finish_function(&mut self, result: MirValueId) -> Result<(), CodegenError> {
        let Some(mut builder) = self.open.pop() else {
            return Err(CodegenError::UnbalancedFunction {
                function: "<none>".to_string(),
            });
        };
        if self.module.function(&builder.function.name).is_some() {
            return Err(CodegenError::UnbalancedFunction {
                function: builder.function.name,
            });
        }
        builder.terminate(MirTerminator::Return { value: result });
        self.module.functions.push(builder.function);
        Ok(())
    }

    fn new_block(&mut self, label: &str) -> MirBlockId {
        let builder = self.builder();
        let id = MirBlockId(builder.function.blocks.len() as u32);
        builder.function.blocks.push(MirBlock {
            id,
            label: label.to_string(),
            instructions: Vec::new(),
            terminator: MirTerminator::Unreachable,
        });
        id
    }

    fn switch_to(&mut self, block: MirBlockId) {
        self.builder().current = block;
    }

    fn branch(&mut self, target: MirBlockId) {
        self.builder().terminate(MirTerminator::Jump { target });
    }

    fn cond_branch(&mut self, condition: MirValueId, then_block: MirBlockId, else_block: MirBlockId) {
        self.builder().terminate(MirTerminator::Branch {
            condition,
            then_block,
            else_block,
        });
    }

    fn storage(&mut self) -> MirValueId {
        self.emit(|dest| MirInst::Slot { dest })
    }

    fn store(&mut self, slot: MirValueId, value: MirValueId) {
        self.builder().push(MirInst::Store { slot, value });
    }

    fn load(&mut self, slot: MirValueId) -> MirValueId {
        self.emit(|dest| MirInst::Load { dest, slot })
    }

    fn constant(&mut self, literal: &Literal) -> MirValueId {
        let dest = self.emit(|dest| MirInst::Const {
            dest,
            literal: literal.clone(),
        });
        self.builder().constants.insert(dest, literal.clone());
        dest
    }

    fn compare(&mut self, value: MirValueId, test: MirValueId) -> MirValueId {
        if self.fold()
            && let (Some(left), Some(right)) = (self.known(value), self.known(test))
        {
            return self.constant(&Literal::Boolean(left == right));
        }
        self.emit(|dest| MirInst::Compare { dest, value, test })
    }

    fn has_type(&mut self, value: MirValueId, ty: &str) -> MirValueId {
        self.emit(|dest| MirInst::HasType {
            dest,
            value,
            ty: ty.to_string(),
        })
    }

    fn and(&mut self, left: MirValueId, right: MirValueId) -> MirValueId {
        if self.fold() {
            match (self.known(left), self.known(right)) {
                (Some(Literal::Boolean(false)), _) | (_, Some(Literal::Boolean(false))) => {
                    return self.constant(&Literal::Boolean(false));
                }
                (Some(Literal::Boolean(true)), _) => return right,
                (_, Some(Literal::Boolean(true))) => return left,
                _ => {}
            }
        }
        self.emit(|dest| MirInst::And { dest, left, right })
    }

    fn primitive(&mut self, op: &str, args: &[MirValueId]) -> Result<MirValueId, CodegenError> {
        let Some(&(_, expected)) = PRIMITIVES.iter().find(|(name, _)| *name == op) else {
            return Err(CodegenError::UnknownPrimitive { op: op.to_string() });
        };
        if expected != args.len() {
            return Err(CodegenError::PrimitiveArity {
                op: op.to_string(),
                expected,
                actual: args.len(),
            });
        }
        Ok(self.emit(|dest| MirInst::Primitive {
            dest,
            op: op.to_string(),
            args: args.to_vec(),
        }))
    }

    fn call(&mut self, function: &String, args: &[MirValueId]) -> MirValueId {
        self.emit(|result| MirInst::Call {
            callee: function.clone(),
            args: args.to_vec(),
            result,
        })
    }

    fn form_error(&mut self, call: &str) -> MirValueId {
        tracing::debug!(call, "form error path");
        self.emit(|dest| MirInst::FormError {
            dest,
            call: call.to_string(),
        })
    }
}
