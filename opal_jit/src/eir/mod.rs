//! Effective IR: x64-flavoured instruction blocks.
//!
//! The last IR before byte emission. Operands are still virtual (variables
//! plus immediates); the encoder binds them to registers. Control flow is
//! split into the shapes the backend can emit directly: conditional
//! branches over a condition code, unconditional jumps, a multi-way
//! dispatch, indirect jumps, and returns.

pub mod encode;
pub mod select;

use smallvec::SmallVec;

use opal_core::{Comparator, Kind};

use crate::arena::{Arena, Id};
use crate::cir::{Builtin, VarId};

pub use encode::encode;
pub use select::select;

pub type EirBlockId = Id<EirBlock>;

/// x64 condition codes, named after the jcc mnemonics they encode to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionCode {
    /// ZF set.
    Jz,
    /// ZF clear.
    Jnz,
    /// Below (unsigned).
    Jb,
    /// Below or equal (unsigned).
    Jbe,
    /// Above or equal (unsigned).
    Jae,
    /// Above (unsigned).
    Ja,
    /// Less (signed).
    Jl,
    /// Less or equal (signed).
    Jle,
    /// Greater or equal (signed).
    Jge,
    /// Greater (signed).
    Jg,
}

impl ConditionCode {
    /// The condition that branches when `comparator` holds between the
    /// compared operands.
    pub fn for_comparator(comparator: Comparator) -> ConditionCode {
        match comparator {
            Comparator::Equal => ConditionCode::Jz,
            Comparator::NotEqual => ConditionCode::Jnz,
            Comparator::UnsignedLess => ConditionCode::Jb,
            Comparator::UnsignedLessEqual => ConditionCode::Jbe,
            Comparator::UnsignedGreaterEqual => ConditionCode::Jae,
            Comparator::UnsignedGreater => ConditionCode::Ja,
            Comparator::SignedLess => ConditionCode::Jl,
            Comparator::SignedLessEqual => ConditionCode::Jle,
            Comparator::SignedGreaterEqual => ConditionCode::Jge,
            Comparator::SignedGreater => ConditionCode::Jg,
        }
    }

    /// Low nibble of the 0F 8x opcode for a rel32 jcc.
    #[inline]
    pub(crate) fn encoding(self) -> u8 {
        match self {
            ConditionCode::Jz => 0x4,
            ConditionCode::Jnz => 0x5,
            ConditionCode::Jb => 0x2,
            ConditionCode::Jbe => 0x6,
            ConditionCode::Jae => 0x3,
            ConditionCode::Ja => 0x7,
            ConditionCode::Jl => 0xC,
            ConditionCode::Jle => 0xE,
            ConditionCode::Jge => 0xD,
            ConditionCode::Jg => 0xF,
        }
    }
}

/// An EIR operand: a virtual variable or an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EirOperand {
    Var(VarId),
    Imm { kind: Kind, bits: u64 },
}

/// One EIR instruction. Branches and jumps terminate nothing by
/// themselves; a block's instruction run may end with several of them
/// (compare, branch, jump) emitted in order.
#[derive(Debug, Clone)]
pub enum EirInstruction {
    /// `dest := src`
    Mov { dest: VarId, src: EirOperand },
    /// `dest := op(args...)`
    Op {
        dest: VarId,
        op: Builtin,
        args: SmallVec<[EirOperand; 2]>,
    },
    /// 32-bit flags-setting compare.
    Compare32 { left: EirOperand, right: EirOperand },
    /// 64-bit flags-setting compare.
    Compare64 { left: EirOperand, right: EirOperand },
    /// Conditional branch on the flags of the preceding compare.
    Branch {
        cc: ConditionCode,
        target: EirBlockId,
    },
    /// Unconditional jump.
    Jump(EirBlockId),
    /// Jump through a computed target.
    IndirectJump(EirOperand),
    /// Multi-way equality dispatch over an integer tag.
    Switch {
        tag: EirOperand,
        matches: Vec<EirOperand>,
        targets: Vec<EirBlockId>,
        default: EirBlockId,
    },
    /// Return, optionally carrying the result operand.
    Ret(Option<EirOperand>),
}

/// A run of EIR instructions.
#[derive(Debug, Clone, Default)]
pub struct EirBlock {
    pub instructions: Vec<EirInstruction>,
}

/// An EIR method, ready for encoding.
#[derive(Debug)]
pub struct EirMethod {
    pub params: Vec<VarId>,
    pub blocks: Arena<EirBlock>,
    pub entry: EirBlockId,
    pub result_kind: Kind,
}
