//! Switch encapsulation.
//!
//! A forward traversal stops descending at the first switch call reached
//! along any path and forces each of that switch's continuation arguments
//! that is still an explicit closure to become a named block. Later passes
//! that see the switch only once then cannot re-duplicate its
//! continuations. The traversal does not recurse into a switch's tag or
//! match arguments.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::cir::{CallId, CirGraph, CirValue};

/// Counters for one run of the encapsulation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncapsulateStats {
    /// Switch calls reached.
    pub switches_seen: usize,
    /// Continuation closures promoted to named blocks.
    pub closures_promoted: usize,
}

/// Encapsulate every switch reachable from `root`.
pub fn encapsulate_switches(graph: &mut CirGraph, root: CallId) -> EncapsulateStats {
    let mut stats = EncapsulateStats::default();
    let mut visited: FxHashSet<CallId> = FxHashSet::default();
    let mut worklist = vec![root];

    while let Some(call) = worklist.pop() {
        if !visited.insert(call) {
            continue;
        }

        if let CirValue::Switch(tag) = graph.calls[call].procedure {
            stats.switches_seen += 1;
            let first = tag.first_continuation();
            let arg_count = graph.calls[call].args.len();
            for index in first..arg_count {
                if let CirValue::Closure(closure) = graph.calls[call].args[index] {
                    let block = graph.new_block(closure);
                    graph.calls[call].args[index] = CirValue::Block(block);
                    stats.closures_promoted += 1;
                }
            }
            // Stop descending: neither the promoted continuations nor the
            // tag/match arguments are traversed.
            continue;
        }

        let mut next: SmallVec<[CallId; 4]> = SmallVec::new();
        {
            let node = &graph.calls[call];
            match node.procedure {
                CirValue::Closure(c) => next.push(graph.closures[c].body),
                CirValue::Block(b) => {
                    let c = graph.blocks[b].closure;
                    next.push(graph.closures[c].body);
                }
                _ => {}
            }
            for &arg in &node.args {
                match arg {
                    CirValue::Closure(c) => next.push(graph.closures[c].body),
                    CirValue::Block(b) => {
                        let c = graph.blocks[b].closure;
                        next.push(graph.closures[c].body);
                    }
                    _ => {}
                }
            }
        }
        worklist.extend(next);
    }

    stats
}
