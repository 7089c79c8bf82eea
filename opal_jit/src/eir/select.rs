//! DIR to EIR instruction selection.
//!
//! Blocks map 1:1; the interesting decision is switch shape. A switch
//! with at most one case, or with any non-equality comparator, becomes a
//! compare-and-branch chain ending in a jump to the default. An equality
//! switch with two or more cases becomes a single multi-way dispatch,
//! which the backend only supports over `Int` tags.

use smallvec::SmallVec;

use rustc_hash::FxHashMap;

use opal_core::{CompileError, CompileResult, Kind};

use crate::arena::Arena;
use crate::dir::{
    DirBlockId, DirInstruction, DirMethod, DirSwitch, DirTerminator, DirValue, JumpTarget,
};
use crate::eir::{ConditionCode, EirBlock, EirBlockId, EirInstruction, EirMethod, EirOperand};

/// Select EIR for a lowered method.
pub fn select(method: &DirMethod) -> CompileResult<EirMethod> {
    let mut blocks: Arena<EirBlock> = Arena::new();
    let mut block_map: FxHashMap<DirBlockId, EirBlockId> = FxHashMap::default();

    for id in method.block_ids() {
        let eir = blocks.alloc(EirBlock::default());
        block_map.insert(id, eir);
    }

    for id in method.block_ids() {
        let target = block_map[&id];
        let mut instructions = Vec::new();

        for instruction in &method.blocks[id].instructions {
            instructions.push(select_instruction(instruction));
        }
        select_terminator(method.blocks[id].terminator(), &block_map, &mut instructions)?;

        blocks[target].instructions = instructions;
    }

    Ok(EirMethod {
        params: method.params.clone(),
        blocks,
        entry: block_map[&method.entry],
        result_kind: method.result_kind,
    })
}

fn operand(value: DirValue) -> EirOperand {
    match value {
        DirValue::Var(v) => EirOperand::Var(v),
        DirValue::Const(c) => EirOperand::Imm {
            kind: c.kind,
            bits: c.bits,
        },
    }
}

fn select_instruction(instruction: &DirInstruction) -> EirInstruction {
    match instruction {
        DirInstruction::Assign { dest, value } => EirInstruction::Mov {
            dest: *dest,
            src: operand(*value),
        },
        DirInstruction::Op { dest, op, args } => {
            let args: SmallVec<[EirOperand; 2]> = args.iter().map(|&a| operand(a)).collect();
            EirInstruction::Op {
                dest: *dest,
                op: *op,
                args,
            }
        }
    }
}

fn select_terminator(
    terminator: &DirTerminator,
    block_map: &FxHashMap<DirBlockId, EirBlockId>,
    out: &mut Vec<EirInstruction>,
) -> CompileResult<()> {
    match terminator {
        DirTerminator::Jump(JumpTarget::Block(b)) => {
            out.push(EirInstruction::Jump(block_map[b]));
        }
        DirTerminator::Jump(JumpTarget::Computed(v)) => {
            out.push(EirInstruction::IndirectJump(operand(*v)));
        }
        DirTerminator::Return(value) => {
            out.push(EirInstruction::Ret(value.map(operand)));
        }
        DirTerminator::Switch(switch) => select_switch(switch, block_map, out)?,
    }
    Ok(())
}

fn select_switch(
    switch: &DirSwitch,
    block_map: &FxHashMap<DirBlockId, EirBlockId>,
    out: &mut Vec<EirInstruction>,
) -> CompileResult<()> {
    let default = block_map[&switch.default];

    if switch.case_count() <= 1 || !switch.comparator.is_equality() {
        let cc = ConditionCode::for_comparator(switch.comparator);
        let tag = operand(switch.tag);
        for (m, t) in switch.matches.iter().zip(&switch.targets) {
            out.push(compare(switch.kind, tag, operand(*m)));
            out.push(EirInstruction::Branch {
                cc,
                target: block_map[t],
            });
        }
        out.push(EirInstruction::Jump(default));
        return Ok(());
    }

    // Multi-way dispatch is only defined over Int tags.
    if switch.kind != Kind::Int {
        return Err(CompileError::SwitchKindNotInt);
    }
    out.push(EirInstruction::Switch {
        tag: operand(switch.tag),
        matches: switch.matches.iter().map(|&m| operand(m)).collect(),
        targets: switch.targets.iter().map(|t| block_map[t]).collect(),
        default,
    });
    Ok(())
}

/// Compare at the width of the switch kind.
fn compare(kind: Kind, left: EirOperand, right: EirOperand) -> EirInstruction {
    if kind.width() <= 4 {
        EirInstruction::Compare32 { left, right }
    } else {
        EirInstruction::Compare64 { left, right }
    }
}
