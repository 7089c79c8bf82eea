//! Continuation-passing-style IR.
//!
//! Values, closures, calls, and named blocks. Continuations are ordinary
//! trailing parameters and arguments; by convention the last one or two
//! parameter slots of a closure are its continuations, and a normal
//! continuation parameter carries no static kind until inferred.

pub mod graph;
pub mod lower;
pub mod opt;

pub use graph::{
    Builtin, Call, CallId, CirBlock, CirGraph, CirValue, Closure, ClosureId, Const, ConstId,
    BlockId, SwitchTag, VarId, Variable,
};
