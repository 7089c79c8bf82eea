//! Per-method compile driver.
//!
//! Runs the optimizing pipeline end to end: CIR cleanup passes, lowering
//! to DIR, instruction selection, and encoding. One call, one method, one
//! thread.

use opal_core::{CompileResult, Kind};

use crate::cir::lower::lower;
use crate::cir::opt::{encapsulate_switches, merge_block_parameters, ContinuationKinds};
use crate::cir::{BlockId, CirGraph, ClosureId};
use crate::code::CompiledMethod;
use crate::eir::{encode, select};
use crate::platform::{CallingConvention, SystemV};

/// A method in CIR form, ready for the optimizing path.
#[derive(Debug)]
pub struct CirMethod {
    pub graph: CirGraph,
    pub entry: ClosureId,
    pub result_kind: Kind,
}

impl CirMethod {
    pub fn new(graph: CirGraph, entry: ClosureId, result_kind: Kind) -> Self {
        CirMethod {
            graph,
            entry,
            result_kind,
        }
    }
}

/// Counters from one compilation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileStats {
    pub switches_encapsulated: usize,
    pub parameters_merged: usize,
    pub dir_blocks: usize,
    pub code_bytes: usize,
}

/// Compile one method with the default calling convention.
pub fn compile_method(method: CirMethod) -> CompileResult<(CompiledMethod, CompileStats)> {
    compile_method_with(method, &SystemV)
}

/// Compile one method, choosing the calling convention.
pub fn compile_method_with(
    mut method: CirMethod,
    cc: &dyn CallingConvention,
) -> CompileResult<(CompiledMethod, CompileStats)> {
    let mut stats = CompileStats::default();
    let graph = &mut method.graph;

    let root = graph.closures[method.entry].body;
    let encapsulated = encapsulate_switches(graph, root);
    stats.switches_encapsulated = encapsulated.switches_seen;

    // Encapsulation may have created new blocks; merge parameters on the
    // final block population.
    let blocks: Vec<BlockId> = graph.blocks.ids().collect();
    for block in blocks {
        let merged = merge_block_parameters(graph, block)?;
        stats.parameters_merged += merged.parameters_merged;
    }

    let mut kinds = ContinuationKinds::new(method.entry, method.result_kind);
    let dir = lower(graph, method.entry, method.result_kind, &mut kinds)?;
    stats.dir_blocks = dir.blocks.len();

    let eir = select(&dir)?;
    let compiled = encode(&eir, cc)?;
    stats.code_bytes = compiled.code_len();

    Ok((compiled, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cir::{Builtin, CirValue};

    /// `fn inc(x) { return x + 1 }` in CPS form.
    fn increment_method() -> CirMethod {
        let mut g = CirGraph::new();
        let x = g.new_var(Some(Kind::Int));
        let k = g.new_var(None);
        let t = g.new_var(Some(Kind::Int));

        let ret = g.new_call(CirValue::Var(k), &[CirValue::Var(t)]);
        let receiver = g.new_closure(&[t], 0, ret);
        let one = g.const_int(1);
        let body = g.new_call(
            CirValue::Builtin(Builtin::IntAdd),
            &[CirValue::Var(x), one, CirValue::Closure(receiver)],
        );
        let entry = g.new_closure(&[x, k], 1, body);
        CirMethod::new(g, entry, Kind::Int)
    }

    #[test]
    fn test_compile_increment() {
        let (compiled, stats) = compile_method(increment_method()).unwrap();

        assert!(!compiled.code.is_empty());
        assert_eq!(*compiled.code.last().unwrap(), 0xC3);
        assert_eq!(stats.dir_blocks, 1);
        assert_eq!(stats.code_bytes, compiled.code_len());
    }
}
