//! CIR to DIR lowering.
//!
//! Consumes an optimized CIR closure plus the method's declared result
//! kind and produces an imperative control-flow graph. Continuation
//! parameters are dropped from the DIR parameter list — they exist only to
//! guide control-flow construction. CIR blocks map 1:1 to DIR blocks;
//! inline closures flatten into the block that calls them.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use opal_core::{CompileError, CompileResult, Kind};

use crate::arena::Arena;
use crate::cir::opt::ContinuationKinds;
use crate::cir::{BlockId, CallId, CirGraph, CirValue, ClosureId, VarId};
use crate::dir::{
    DirBlock, DirBlockId, DirInstruction, DirMethod, DirSwitch, DirTerminator, DirValue,
    JumpTarget,
};

/// What calling a continuation variable means in DIR terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cont {
    /// The method's normal continuation: return.
    Return,
    /// Jump to a block, optionally landing the passed value in `param`.
    Block {
        target: DirBlockId,
        param: Option<VarId>,
    },
}

/// Lower `entry` to a [`DirMethod`].
pub fn lower(
    graph: &mut CirGraph,
    entry: ClosureId,
    result_kind: Kind,
    kinds: &mut ContinuationKinds,
) -> CompileResult<DirMethod> {
    let mut lowering = Lowering {
        graph,
        kinds,
        blocks: Arena::new(),
        block_map: FxHashMap::default(),
        conts: FxHashMap::default(),
        cont_args: FxHashMap::default(),
        pending: Vec::new(),
    };

    let params: Vec<VarId> = lowering.graph.closures[entry].value_params().to_vec();

    // Every continuation parameter of the entry closure returns from the
    // method (the exception continuation unwinds through the same exit in
    // this core).
    let closure = &lowering.graph.closures[entry];
    let first_cont = closure.params.len() - closure.cont_slots as usize;
    let cont_params: SmallVec<[VarId; 2]> = closure.params[first_cont..].iter().copied().collect();
    for cont in cont_params {
        lowering.conts.insert(cont, Cont::Return);
    }

    let entry_block = lowering.blocks.alloc(DirBlock::default());
    let body = lowering.graph.closures[entry].body;
    lowering.lower_call(body, entry_block)?;

    while let Some((call, block)) = lowering.pending.pop() {
        lowering.lower_call(call, block)?;
    }

    Ok(DirMethod {
        params,
        blocks: lowering.blocks,
        entry: entry_block,
        result_kind,
    })
}

struct Lowering<'g> {
    graph: &'g mut CirGraph,
    kinds: &'g mut ContinuationKinds,
    blocks: Arena<DirBlock>,
    block_map: FxHashMap<BlockId, DirBlockId>,
    conts: FxHashMap<VarId, Cont>,
    /// The argument each continuation parameter was bound from; every
    /// call site must agree on it.
    cont_args: FxHashMap<VarId, CirValue>,
    /// Closure bodies whose DIR block exists but is not yet filled.
    pending: Vec<(CallId, DirBlockId)>,
}

impl Lowering<'_> {
    /// Lower one CIR call into `block`, recursing through inline closures.
    fn lower_call(&mut self, call: CallId, block: DirBlockId) -> CompileResult<()> {
        self.graph.check_arity(call)?;
        let procedure = self.graph.calls[call].procedure;
        let args: SmallVec<[CirValue; 4]> = self.graph.calls[call].args.clone();

        match procedure {
            CirValue::Var(v) => self.lower_continuation_call(v, &args, block),

            CirValue::Block(b) => {
                let target = self.dir_block_for(b, Some(&args))?;
                self.assign_value_params(self.graph.blocks[b].closure, &args, block)?;
                self.terminate(block, DirTerminator::Jump(JumpTarget::Block(target)));
                Ok(())
            }

            CirValue::Closure(c) => {
                self.assign_value_params(c, &args, block)?;
                let closure = &self.graph.closures[c];
                let first_cont = closure.params.len() - closure.cont_slots as usize;
                let pairs: SmallVec<[(VarId, CirValue); 2]> = closure.params[first_cont..]
                    .iter()
                    .copied()
                    .zip(args[first_cont..].iter().copied())
                    .collect();
                let body = closure.body;
                for (formal, arg) in pairs {
                    self.bind_cont(formal, arg)?;
                }
                self.lower_call(body, block)
            }

            CirValue::Builtin(op) => {
                if args.is_empty() {
                    return Err(CompileError::Unrepresentable(
                        "builtin call without a continuation",
                    ));
                }
                let (operands, cont) = args.split_at(args.len() - 1);
                let operands: SmallVec<[DirValue; 2]> = operands
                    .iter()
                    .map(|&a| self.lower_value(a))
                    .collect::<CompileResult<_>>()?;
                self.lower_builtin(op, operands, cont[0], block)
            }

            CirValue::Switch(tag) => {
                let tag_value = self.lower_value(args[0])?;
                let matches: Vec<DirValue> = args[1..1 + tag.cases]
                    .iter()
                    .map(|&a| self.lower_value(a))
                    .collect::<CompileResult<_>>()?;
                let targets: Vec<DirBlockId> = args[tag.first_continuation()..args.len() - 1]
                    .iter()
                    .map(|&a| self.continuation_block(a))
                    .collect::<CompileResult<_>>()?;
                let default = self.continuation_block(args[args.len() - 1])?;

                let switch = DirSwitch::new(
                    tag_value,
                    tag.comparator,
                    tag.kind,
                    matches,
                    targets,
                    default,
                )?;
                self.terminate(block, DirTerminator::Switch(switch));
                Ok(())
            }

            CirValue::Const(_) => Err(CompileError::Unrepresentable(
                "constant used as a procedure",
            )),
        }
    }

    /// A call whose procedure is a variable: return, jump to a bound
    /// block, or jump to a computed target.
    fn lower_continuation_call(
        &mut self,
        v: VarId,
        args: &[CirValue],
        block: DirBlockId,
    ) -> CompileResult<()> {
        match self.conts.get(&v).copied() {
            Some(Cont::Return) => {
                let value = match args.first() {
                    Some(&arg) if self.kinds.kind_of(self.graph, v) != Kind::Void => {
                        Some(self.lower_value(arg)?)
                    }
                    _ => None,
                };
                self.terminate(block, DirTerminator::Return(value));
            }
            Some(Cont::Block { target, param }) => {
                if let (Some(dest), Some(&arg)) = (param, args.first()) {
                    let value = self.lower_value(arg)?;
                    self.push(block, DirInstruction::Assign { dest, value });
                }
                self.terminate(block, DirTerminator::Jump(JumpTarget::Block(target)));
            }
            None => {
                self.terminate(
                    block,
                    DirTerminator::Jump(JumpTarget::Computed(DirValue::Var(v))),
                );
            }
        }
        Ok(())
    }

    /// `dest := op(operands)` followed by whatever the continuation does
    /// with `dest`.
    fn lower_builtin(
        &mut self,
        op: crate::cir::Builtin,
        operands: SmallVec<[DirValue; 2]>,
        cont: CirValue,
        block: DirBlockId,
    ) -> CompileResult<()> {
        match cont {
            CirValue::Closure(c) => {
                let dest = match self.graph.closures[c].params.first() {
                    Some(&p) => p,
                    None => self.graph.new_var(None),
                };
                self.push(block, DirInstruction::Op { dest, op, args: operands });
                let body = self.graph.closures[c].body;
                self.lower_call(body, block)
            }
            CirValue::Var(v) => {
                let dest = self.graph.new_var(None);
                self.push(block, DirInstruction::Op { dest, op, args: operands });
                self.lower_continuation_call(v, &[CirValue::Var(dest)], block)
            }
            _ => Err(CompileError::Unrepresentable(
                "builtin continuation must be a closure or variable",
            )),
        }
    }

    /// The DIR block a switch continuation lands in.
    fn continuation_block(&mut self, target: CirValue) -> CompileResult<DirBlockId> {
        match target {
            CirValue::Block(b) => self.dir_block_for(b, None),
            CirValue::Closure(c) => {
                if !self.graph.closures[c].params.is_empty() {
                    return Err(CompileError::Unrepresentable(
                        "switch continuation takes parameters",
                    ));
                }
                let id = self.blocks.alloc(DirBlock::default());
                self.pending.push((self.graph.closures[c].body, id));
                Ok(id)
            }
            CirValue::Var(v) => match self.conts.get(&v).copied() {
                Some(Cont::Block { target, .. }) => Ok(target),
                Some(Cont::Return) => {
                    let id = self.blocks.alloc(DirBlock::default());
                    self.blocks[id].terminator = Some(DirTerminator::Return(None));
                    Ok(id)
                }
                None => Err(CompileError::Unrepresentable(
                    "switch continuation is an unbound variable",
                )),
            },
            _ => Err(CompileError::Unrepresentable(
                "switch continuation is not a control target",
            )),
        }
    }

    /// Map a CIR block to its DIR block, creating and queueing it on
    /// first sight. Every call site binds the block's continuation
    /// parameters; a site whose continuation argument differs from an
    /// earlier site's is rejected.
    fn dir_block_for(
        &mut self,
        b: BlockId,
        call_args: Option<&[CirValue]>,
    ) -> CompileResult<DirBlockId> {
        if let Some(&id) = self.block_map.get(&b) {
            if let Some(args) = call_args {
                self.bind_block_conts(b, args)?;
            }
            return Ok(id);
        }
        let id = self.blocks.alloc(DirBlock::default());
        self.block_map.insert(b, id);

        let body = self.graph.closures[self.graph.blocks[b].closure].body;
        if let Some(args) = call_args {
            self.bind_block_conts(b, args)?;
        }
        self.pending.push((body, id));
        Ok(id)
    }

    /// Bind a block's continuation parameters from one call site's
    /// trailing arguments.
    fn bind_block_conts(&mut self, b: BlockId, args: &[CirValue]) -> CompileResult<()> {
        let closure = &self.graph.closures[self.graph.blocks[b].closure];
        let first_cont = closure.params.len() - closure.cont_slots as usize;
        let pairs: SmallVec<[(VarId, CirValue); 2]> = closure.params[first_cont..]
            .iter()
            .copied()
            .zip(args[first_cont..].iter().copied())
            .collect();
        for (formal, arg) in pairs {
            self.bind_cont(formal, arg)?;
        }
        Ok(())
    }

    /// Record what calling the continuation parameter `formal` means.
    ///
    /// Rebinding with the same argument is a no-op; rebinding with a
    /// different argument would silently redirect the earlier sites'
    /// control flow and is an error instead.
    fn bind_cont(&mut self, formal: VarId, arg: CirValue) -> CompileResult<()> {
        // A recursive block threading its own continuation through.
        if arg == CirValue::Var(formal) {
            return Ok(());
        }
        if let Some(&previous) = self.cont_args.get(&formal) {
            if previous == arg || self.same_binding(previous, arg) {
                return Ok(());
            }
            return Err(CompileError::Unrepresentable(
                "continuation parameter receives different targets at different call sites",
            ));
        }
        self.cont_args.insert(formal, arg);
        match arg {
            CirValue::Var(v) => {
                if let Some(&binding) = self.conts.get(&v) {
                    self.conts.insert(formal, binding);
                }
                // An unbound variable stays a computed target.
                Ok(())
            }
            CirValue::Closure(c) => {
                let target = self.blocks.alloc(DirBlock::default());
                let closure = &self.graph.closures[c];
                let param = closure.value_params().first().copied();
                self.pending.push((closure.body, target));
                self.conts.insert(formal, Cont::Block { target, param });
                Ok(())
            }
            CirValue::Block(b) => {
                let target = self.dir_block_for(b, None)?;
                let closure = &self.graph.closures[self.graph.blocks[b].closure];
                let param = closure.value_params().first().copied();
                self.conts.insert(formal, Cont::Block { target, param });
                Ok(())
            }
            _ => Err(CompileError::Unrepresentable(
                "continuation argument is not a control value",
            )),
        }
    }

    /// Whether two continuation arguments resolve to the same control
    /// binding under different names.
    fn same_binding(&self, a: CirValue, b: CirValue) -> bool {
        let resolve = |value: CirValue| match value {
            CirValue::Var(v) => self.conts.get(&v).copied(),
            _ => None,
        };
        match (resolve(a), resolve(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Assign a callee's leading value parameters from the call's
    /// arguments.
    fn assign_value_params(
        &mut self,
        closure: ClosureId,
        args: &[CirValue],
        block: DirBlockId,
    ) -> CompileResult<()> {
        let params: SmallVec<[VarId; 4]> =
            self.graph.closures[closure].value_params().iter().copied().collect();
        for (i, dest) in params.into_iter().enumerate() {
            let value = self.lower_value(args[i])?;
            if value != DirValue::Var(dest) {
                self.push(block, DirInstruction::Assign { dest, value });
            }
        }
        Ok(())
    }

    fn lower_value(&self, value: CirValue) -> CompileResult<DirValue> {
        match value {
            CirValue::Const(id) => Ok(DirValue::Const(self.graph.consts[id])),
            CirValue::Var(v) => Ok(DirValue::Var(v)),
            _ => Err(CompileError::Unrepresentable(
                "procedure value used as data",
            )),
        }
    }

    #[inline]
    fn push(&mut self, block: DirBlockId, instruction: DirInstruction) {
        self.blocks[block].instructions.push(instruction);
    }

    #[inline]
    fn terminate(&mut self, block: DirBlockId, terminator: DirTerminator) {
        debug_assert!(self.blocks[block].terminator.is_none());
        self.blocks[block].terminator = Some(terminator);
    }
}
