//! Direct (imperative) IR.
//!
//! A method owns an ordered block sequence; each block is a linear
//! instruction run ending in one terminator. Continuation parameters from
//! the CIR do not survive into this IR — control flow is explicit in the
//! terminators instead.

use smallvec::SmallVec;

use opal_core::{CompileError, CompileResult, Comparator, Kind};

use crate::arena::{Arena, Id};
use crate::cir::{Builtin, Const, VarId};

pub type DirBlockId = Id<DirBlock>;

/// A direct value: a constant or a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirValue {
    Const(Const),
    Var(VarId),
}

/// A linear (non-terminating) instruction.
#[derive(Debug, Clone)]
pub enum DirInstruction {
    /// `dest := value`
    Assign { dest: VarId, value: DirValue },
    /// `dest := op(args...)`
    Op {
        dest: VarId,
        op: Builtin,
        args: SmallVec<[DirValue; 2]>,
    },
}

/// Where an unconditional jump goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpTarget {
    /// A block of this method.
    Block(DirBlockId),
    /// A computed target value.
    Computed(DirValue),
}

/// A multi-way comparison terminator.
///
/// The match and target arrays are parallel and the default target is
/// always defined; construction enforces both.
#[derive(Debug, Clone)]
pub struct DirSwitch {
    pub tag: DirValue,
    pub comparator: Comparator,
    pub kind: Kind,
    pub matches: Vec<DirValue>,
    pub targets: Vec<DirBlockId>,
    pub default: DirBlockId,
}

impl DirSwitch {
    pub fn new(
        tag: DirValue,
        comparator: Comparator,
        kind: Kind,
        matches: Vec<DirValue>,
        targets: Vec<DirBlockId>,
        default: DirBlockId,
    ) -> CompileResult<Self> {
        if matches.len() != targets.len() {
            return Err(CompileError::MalformedSwitch {
                matches: matches.len(),
                targets: targets.len(),
            });
        }
        Ok(DirSwitch {
            tag,
            comparator,
            kind,
            matches,
            targets,
            default,
        })
    }

    /// Number of match cases.
    #[inline]
    pub fn case_count(&self) -> usize {
        self.matches.len()
    }
}

/// Block terminator.
#[derive(Debug, Clone)]
pub enum DirTerminator {
    Jump(JumpTarget),
    Switch(DirSwitch),
    Return(Option<DirValue>),
}

/// A basic block: instructions plus a terminator.
///
/// The terminator is `None` only while the block is under construction;
/// a finished method has one in every block.
#[derive(Debug, Clone, Default)]
pub struct DirBlock {
    pub instructions: Vec<DirInstruction>,
    pub terminator: Option<DirTerminator>,
}

impl DirBlock {
    /// The terminator; panics on an unfinished block, which is a bug in
    /// the lowering that produced it.
    #[inline]
    pub fn terminator(&self) -> &DirTerminator {
        self.terminator
            .as_ref()
            .expect("block has no terminator; lowering left it unfinished")
    }
}

/// A DIR method: parameters (non-continuation values only) and blocks.
#[derive(Debug)]
pub struct DirMethod {
    pub params: Vec<VarId>,
    pub blocks: Arena<DirBlock>,
    pub entry: DirBlockId,
    pub result_kind: Kind,
}

impl DirMethod {
    /// Blocks in allocation order, entry first.
    pub fn block_ids(&self) -> impl Iterator<Item = DirBlockId> + '_ {
        self.blocks.ids()
    }
}
