//! Block-parameter merging.
//!
//! For a block whose every call site is known, parameters that receive the
//! same argument value (by identity) at every call site are redundant: all
//! but the first of each such group merge into that first occurrence, the
//! group's representative. Merged parameters are beta-reduced out of the
//! block body and their argument slots removed from every call. The pass
//! repeats per block until a fixed point, since removing parameters can
//! expose new merge opportunities.

use opal_core::CompileResult;

use crate::cir::{BlockId, CirGraph, CirValue};

/// Counters for one run of the merge pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParamMergeStats {
    /// Parameters removed.
    pub parameters_merged: usize,
    /// Fixed-point rounds executed (at least one).
    pub rounds: usize,
}

/// Merge redundant parameters of `block` until no further merge is found.
pub fn merge_block_parameters(
    graph: &mut CirGraph,
    block: BlockId,
) -> CompileResult<ParamMergeStats> {
    let mut stats = ParamMergeStats::default();

    loop {
        stats.rounds += 1;
        let merges = find_merges(graph, block)?;
        if merges.is_empty() {
            break;
        }

        let closure = graph.blocks[block].closure;
        let body = graph.closures[closure].body;

        // Beta-reduce each merged parameter into its representative.
        for &(index, representative) in &merges {
            let from = graph.closures[closure].params[index];
            let to = graph.closures[closure].params[representative];
            graph.substitute(body, from, to);
        }

        // Drop merged parameter and argument slots, highest index first so
        // earlier removals do not shift later ones. A removed continuation
        // slot shrinks `cont_slots` with it, keeping the trailing-slot
        // layout intact.
        let mut indices: Vec<usize> = merges.iter().map(|&(i, _)| i).collect();
        indices.sort_unstable_by(|a, b| b.cmp(a));

        let first_cont = {
            let c = &graph.closures[closure];
            c.params.len() - c.cont_slots as usize
        };
        let call_sites = graph.blocks[block].call_sites.clone();
        for &index in &indices {
            graph.closures[closure].params.remove(index);
            if index >= first_cont {
                graph.closures[closure].cont_slots -= 1;
            }
            for &site in &call_sites {
                graph.calls[site].args.remove(index);
            }
        }

        stats.parameters_merged += indices.len();
    }

    Ok(stats)
}

/// Find `(merged_index, representative_index)` pairs for one round.
///
/// A parameter survives if any call site's argument at its index differs
/// from the reference call's; non-survivors merge into the first
/// non-survivor receiving the same reference argument. The representative
/// itself is always kept, so a block with call sites never loses its last
/// parameter of a group.
fn find_merges(graph: &CirGraph, block: BlockId) -> CompileResult<Vec<(usize, usize)>> {
    let call_sites = &graph.blocks[block].call_sites;
    let Some((&reference, rest)) = call_sites.split_first() else {
        return Ok(Vec::new());
    };

    for &site in call_sites {
        graph.check_arity(site)?;
    }

    let reference_args: Vec<CirValue> = graph.calls[reference].args.to_vec();
    let param_count = reference_args.len();

    // survivor[i]: some other call site disagrees with the reference at i.
    let mut survivor = vec![false; param_count];
    for &site in rest {
        let args = &graph.calls[site].args;
        for i in 0..param_count {
            if args[i] != reference_args[i] {
                survivor[i] = true;
            }
        }
    }

    // Group non-survivors by their reference argument; the first index of
    // each group is its representative.
    let mut merges = Vec::new();
    for i in 0..param_count {
        if survivor[i] {
            continue;
        }
        let representative = (0..i).find(|&j| !survivor[j] && reference_args[j] == reference_args[i]);
        if let Some(j) = representative {
            merges.push((i, j));
        }
    }

    Ok(merges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cir::CirValue;
    use opal_core::Kind;

    /// Block with params `[a, b, c]`, body `k(a, b, c)`, and two call
    /// sites supplying the given arguments.
    fn block_with_two_calls(
        graph: &mut CirGraph,
        args1: &[CirValue],
        args2: &[CirValue],
    ) -> BlockId {
        let a = graph.new_var(Some(Kind::Int));
        let b = graph.new_var(Some(Kind::Int));
        let c = graph.new_var(Some(Kind::Int));
        let k = graph.new_var(None);

        let body = graph.new_call(
            CirValue::Var(k),
            &[CirValue::Var(a), CirValue::Var(b), CirValue::Var(c)],
        );
        let closure = graph.new_closure(&[a, b, c], 0, body);
        let block = graph.new_block(closure);

        let call1 = graph.new_call(CirValue::Block(block), args1);
        let call2 = graph.new_call(CirValue::Block(block), args2);
        graph.add_call_site(block, call1);
        graph.add_call_site(block, call2);
        block
    }

    #[test]
    fn test_merge_identical_columns() {
        // Params [a, b, c]; calls (1, 1, 2) and (1, 1, 3): b merges into a.
        let mut g = CirGraph::new();
        let one = g.const_int(1);
        let two = g.const_int(2);
        let three = g.const_int(3);
        let block = block_with_two_calls(&mut g, &[one, one, two], &[one, one, three]);

        let stats = merge_block_parameters(&mut g, block).unwrap();
        assert_eq!(stats.parameters_merged, 1);

        let closure = g.blocks[block].closure;
        assert_eq!(g.closures[closure].params.len(), 2);

        // Both call sites lost the merged argument slot.
        for &site in &g.blocks[block].call_sites {
            assert_eq!(g.calls[site].args.len(), 2);
            assert_eq!(g.calls[site].args[0], one);
        }
        let sites = g.blocks[block].call_sites.clone();
        assert_eq!(g.calls[sites[0]].args[1], two);
        assert_eq!(g.calls[sites[1]].args[1], three);

        // The body now uses the representative where b stood.
        let body = g.closures[closure].body;
        let a = g.closures[closure].params[0];
        assert_eq!(g.calls[body].args[0], CirValue::Var(a));
        assert_eq!(g.calls[body].args[1], CirValue::Var(a));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut g = CirGraph::new();
        let one = g.const_int(1);
        let two = g.const_int(2);
        let three = g.const_int(3);
        let block = block_with_two_calls(&mut g, &[one, one, two], &[one, one, three]);

        let first = merge_block_parameters(&mut g, block).unwrap();
        assert_eq!(first.parameters_merged, 1);

        let second = merge_block_parameters(&mut g, block).unwrap();
        assert_eq!(second.parameters_merged, 0);
        assert_eq!(second.rounds, 1);
    }

    #[test]
    fn test_representative_survives() {
        // All three columns identical: a is kept, b and c merge into it.
        let mut g = CirGraph::new();
        let one = g.const_int(1);
        let block = block_with_two_calls(&mut g, &[one, one, one], &[one, one, one]);

        let stats = merge_block_parameters(&mut g, block).unwrap();
        assert_eq!(stats.parameters_merged, 2);

        let closure = g.blocks[block].closure;
        assert_eq!(g.closures[closure].params.len(), 1);
    }

    #[test]
    fn test_no_merge_when_columns_differ() {
        let mut g = CirGraph::new();
        let one = g.const_int(1);
        let two = g.const_int(2);
        let three = g.const_int(3);
        let four = g.const_int(4);
        let block = block_with_two_calls(&mut g, &[one, two, three], &[one, two, four]);

        // a and b are non-survivors but receive different values, so no
        // group forms between them.
        let stats = merge_block_parameters(&mut g, block).unwrap();
        assert_eq!(stats.parameters_merged, 0);
        let closure = g.blocks[block].closure;
        assert_eq!(g.closures[closure].params.len(), 3);
    }

    #[test]
    fn test_variable_identity_not_structure() {
        // Two distinct variables with equal structure must not merge.
        let mut g = CirGraph::new();
        let x = g.new_var(Some(Kind::Int));
        let y = g.new_var(Some(Kind::Int));
        let one = g.const_int(1);
        let block = block_with_two_calls(
            &mut g,
            &[CirValue::Var(x), CirValue::Var(y), one],
            &[CirValue::Var(x), CirValue::Var(y), one],
        );

        let stats = merge_block_parameters(&mut g, block).unwrap();
        // x and y columns are constant per-column but differ from each
        // other, so only nothing merges (no equal pair of columns).
        assert_eq!(stats.parameters_merged, 0);
        let _ = block;
    }

    #[test]
    fn test_merged_continuation_shrinks_cont_slots() {
        // Block [a, c1, c2] with two continuation slots, both receiving the
        // same handler at every call site: c2 merges into c1 and the
        // closure keeps a consistent trailing-slot layout.
        let mut g = CirGraph::new();
        let a = g.new_var(Some(Kind::Int));
        let c1 = g.new_var(None);
        let c2 = g.new_var(None);
        let body = g.new_call(CirValue::Var(c1), &[CirValue::Var(a)]);
        let closure = g.new_closure(&[a, c1, c2], 2, body);
        let block = g.new_block(closure);

        let x = g.new_var(Some(Kind::Int));
        let h = g.new_var(None);
        let site1 = g.new_call(
            CirValue::Block(block),
            &[CirValue::Var(x), CirValue::Var(h), CirValue::Var(h)],
        );
        let site2 = g.new_call(
            CirValue::Block(block),
            &[CirValue::Var(x), CirValue::Var(h), CirValue::Var(h)],
        );
        g.add_call_site(block, site1);
        g.add_call_site(block, site2);

        let stats = merge_block_parameters(&mut g, block).unwrap();
        assert_eq!(stats.parameters_merged, 1);

        let c = &g.closures[closure];
        assert_eq!(c.params.len(), 2);
        assert_eq!(c.cont_slots, 1);
        assert_eq!(c.value_params(), &[a]);
        assert_eq!(c.normal_continuation(), Some(c1));
    }

    #[test]
    fn test_arity_violation_is_fatal() {
        let mut g = CirGraph::new();
        let a = g.new_var(Some(Kind::Int));
        let body_k = g.new_var(None);
        let body = g.new_call(CirValue::Var(body_k), &[CirValue::Var(a)]);
        let closure = g.new_closure(&[a], 0, body);
        let block = g.new_block(closure);

        let one = g.const_int(1);
        let bad = g.new_call(CirValue::Block(block), &[one, one]);
        g.add_call_site(block, bad);

        assert!(matches!(
            merge_block_parameters(&mut g, block),
            Err(opal_core::CompileError::ArityMismatch { .. })
        ));
    }
}
