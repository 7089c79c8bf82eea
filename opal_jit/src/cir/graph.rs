//! CIR node types and the per-method graph.
//!
//! Nodes live in arenas and are referenced by typed ids; variable equality
//! is id equality. Constants are interned per graph so the same constant
//! is the same instance at every use, which is what the optimizer's
//! identity comparisons rely on.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use opal_core::{CompileError, CompileResult, Comparator, Kind};

use crate::arena::{Arena, Id};

pub type VarId = Id<Variable>;
pub type ConstId = Id<Const>;
pub type CallId = Id<Call>;
pub type ClosureId = Id<Closure>;
pub type BlockId = Id<CirBlock>;

/// An SSA-like variable. Identity-unique: never structurally compared.
#[derive(Debug, Clone)]
pub struct Variable {
    /// Declared kind, if any. Continuation parameters start out unkinded.
    pub kind: Option<Kind>,
}

/// A constant value: a kind plus its raw bit pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Const {
    pub kind: Kind,
    pub bits: u64,
}

/// Architecture-neutral primitive operations CIR calls can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    IntAdd,
    IntSub,
    IntMul,
    IntAnd,
    IntOr,
    IntXor,
    LongAdd,
    LongSub,
}

/// The switch procedure value: a comparison kind, a comparator, and the
/// number of match cases.
///
/// A call to a switch supplies `[tag, match_1..match_n, target_1..target_n,
/// default]`: `2n + 2` arguments, of which the trailing `n + 1` are
/// continuations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchTag {
    pub kind: Kind,
    pub comparator: Comparator,
    pub cases: usize,
}

impl SwitchTag {
    /// Total argument count a call to this switch must supply.
    #[inline]
    pub const fn arg_count(&self) -> usize {
        2 * self.cases + 2
    }

    /// Index of the first continuation argument.
    #[inline]
    pub const fn first_continuation(&self) -> usize {
        self.cases + 1
    }
}

/// A CIR value: constant, variable, or procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CirValue {
    Const(ConstId),
    Var(VarId),
    Closure(ClosureId),
    Block(BlockId),
    Builtin(Builtin),
    Switch(SwitchTag),
}

impl CirValue {
    /// The variable behind this value, if it is one.
    #[inline]
    pub fn as_var(self) -> Option<VarId> {
        match self {
            CirValue::Var(v) => Some(v),
            _ => None,
        }
    }
}

/// A procedure applied to an argument list.
#[derive(Debug, Clone)]
pub struct Call {
    pub procedure: CirValue,
    pub args: SmallVec<[CirValue; 4]>,
}

/// An ordered parameter list plus a body call.
///
/// The trailing `cont_slots` parameters are continuations; the first of
/// them is the normal continuation.
#[derive(Debug, Clone)]
pub struct Closure {
    pub params: SmallVec<[VarId; 4]>,
    pub cont_slots: u8,
    pub body: CallId,
}

impl Closure {
    /// The leading non-continuation parameters.
    #[inline]
    pub fn value_params(&self) -> &[VarId] {
        &self.params[..self.params.len() - self.cont_slots as usize]
    }

    /// The normal continuation parameter, if the closure has one.
    #[inline]
    pub fn normal_continuation(&self) -> Option<VarId> {
        if self.cont_slots == 0 {
            None
        } else {
            Some(self.params[self.params.len() - self.cont_slots as usize])
        }
    }
}

/// A named, possibly-recursive closure reachable from multiple call sites.
#[derive(Debug, Clone)]
pub struct CirBlock {
    pub closure: ClosureId,
    /// Every known call whose procedure is this block.
    pub call_sites: Vec<CallId>,
}

/// The per-method CIR graph. Compilation-transient and single-owner.
#[derive(Debug, Default)]
pub struct CirGraph {
    pub vars: Arena<Variable>,
    pub consts: Arena<Const>,
    pub calls: Arena<Call>,
    pub closures: Arena<Closure>,
    pub blocks: Arena<CirBlock>,
    const_index: FxHashMap<Const, ConstId>,
}

impl CirGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh variable.
    pub fn new_var(&mut self, kind: Option<Kind>) -> VarId {
        self.vars.alloc(Variable { kind })
    }

    /// Intern a constant; equal constants share one id.
    pub fn intern_const(&mut self, kind: Kind, bits: u64) -> ConstId {
        let c = Const { kind, bits };
        if let Some(&id) = self.const_index.get(&c) {
            return id;
        }
        let id = self.consts.alloc(c);
        self.const_index.insert(c, id);
        id
    }

    /// Interned 32-bit integer constant.
    pub fn const_int(&mut self, value: i32) -> CirValue {
        CirValue::Const(self.intern_const(Kind::Int, value as u32 as u64))
    }

    /// Interned 64-bit integer constant.
    pub fn const_long(&mut self, value: i64) -> CirValue {
        CirValue::Const(self.intern_const(Kind::Long, value as u64))
    }

    /// Allocate a call node.
    pub fn new_call(&mut self, procedure: CirValue, args: &[CirValue]) -> CallId {
        self.calls.alloc(Call {
            procedure,
            args: SmallVec::from_slice(args),
        })
    }

    /// Allocate a closure node.
    pub fn new_closure(&mut self, params: &[VarId], cont_slots: u8, body: CallId) -> ClosureId {
        debug_assert!(cont_slots as usize <= params.len());
        self.closures.alloc(Closure {
            params: SmallVec::from_slice(params),
            cont_slots,
            body,
        })
    }

    /// Promote a closure to a named block.
    pub fn new_block(&mut self, closure: ClosureId) -> BlockId {
        self.blocks.alloc(CirBlock {
            closure,
            call_sites: Vec::new(),
        })
    }

    /// Record that `call` targets `block`.
    pub fn add_call_site(&mut self, block: BlockId, call: CallId) {
        self.blocks[block].call_sites.push(call);
    }

    /// Check the arity invariant for a call to a block or closure.
    pub fn check_arity(&self, call: CallId) -> CompileResult<()> {
        let declared = match self.calls[call].procedure {
            CirValue::Closure(c) => self.closures[c].params.len(),
            CirValue::Block(b) => self.closures[self.blocks[b].closure].params.len(),
            CirValue::Switch(tag) => tag.arg_count(),
            _ => return Ok(()),
        };
        let supplied = self.calls[call].args.len();
        if supplied != declared {
            return Err(CompileError::ArityMismatch { supplied, declared });
        }
        Ok(())
    }

    /// Substitute every occurrence of `from` with `to` in the call tree
    /// rooted at `root` (single-substitution beta-reduction).
    ///
    /// Descends into inline closures but not into named blocks: a block's
    /// body is a separate scope reached through its own parameters.
    pub fn substitute(&mut self, root: CallId, from: VarId, to: VarId) {
        let mut stack = vec![root];
        let mut seen: rustc_hash::FxHashSet<CallId> = rustc_hash::FxHashSet::default();

        while let Some(call) = stack.pop() {
            if !seen.insert(call) {
                continue;
            }

            let mut nested: SmallVec<[ClosureId; 4]> = SmallVec::new();
            {
                let node = &mut self.calls[call];
                if node.procedure == CirValue::Var(from) {
                    node.procedure = CirValue::Var(to);
                } else if let CirValue::Closure(c) = node.procedure {
                    nested.push(c);
                }
                for arg in node.args.iter_mut() {
                    if *arg == CirValue::Var(from) {
                        *arg = CirValue::Var(to);
                    } else if let CirValue::Closure(c) = *arg {
                        nested.push(c);
                    }
                }
            }
            for c in nested {
                stack.push(self.closures[c].body);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_interning() {
        let mut g = CirGraph::new();
        let a = g.const_int(1);
        let b = g.const_int(1);
        let c = g.const_int(2);

        // Identity equality of equal constants.
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_arity_check() {
        let mut g = CirGraph::new();
        let p = g.new_var(Some(Kind::Int));
        let k = g.new_var(None);
        let ret = g.new_call(CirValue::Var(k), &[CirValue::Var(p)]);
        let cl = g.new_closure(&[p, k], 1, ret);

        let one = g.const_int(1);
        let ok = g.new_call(CirValue::Closure(cl), &[one, CirValue::Var(k)]);
        assert!(g.check_arity(ok).is_ok());

        let bad = g.new_call(CirValue::Closure(cl), &[one]);
        assert_eq!(
            g.check_arity(bad),
            Err(opal_core::CompileError::ArityMismatch {
                supplied: 1,
                declared: 2
            })
        );
    }

    #[test]
    fn test_substitute_rewrites_args_and_procedure() {
        let mut g = CirGraph::new();
        let a = g.new_var(Some(Kind::Int));
        let b = g.new_var(Some(Kind::Int));
        let k = g.new_var(None);

        let inner = g.new_call(CirValue::Var(a), &[CirValue::Var(a), CirValue::Var(k)]);
        g.substitute(inner, a, b);

        assert_eq!(g.calls[inner].procedure, CirValue::Var(b));
        assert_eq!(g.calls[inner].args[0], CirValue::Var(b));
        assert_eq!(g.calls[inner].args[1], CirValue::Var(k));
    }

    #[test]
    fn test_switch_tag_layout() {
        let tag = SwitchTag {
            kind: Kind::Int,
            comparator: Comparator::Equal,
            cases: 3,
        };
        assert_eq!(tag.arg_count(), 8);
        assert_eq!(tag.first_continuation(), 4);
    }
}
