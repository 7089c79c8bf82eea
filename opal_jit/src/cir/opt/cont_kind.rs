//! Continuation-kind inference.
//!
//! Determines the value kind each normal-continuation parameter is
//! statically bound to. Closure arguments bind a parameter directly to the
//! closure's own parameter kind (or `Void` when it takes none); variable
//! arguments record deferred binding edges, one per call site. The pass
//! runs lazily: the binding graph is built on first query and every
//! resolution is memoized, so repeat queries return the cached fixed point
//! without re-traversal.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use opal_core::Kind;

use crate::cir::{CirGraph, CirValue, ClosureId, VarId};

/// Lazily-built, memoizing continuation-kind resolver for one method.
#[derive(Debug)]
pub struct ContinuationKinds {
    entry: ClosureId,
    result_kind: Kind,
    /// Fully resolved kinds (seed, direct bindings, and memoized queries).
    resolved: FxHashMap<VarId, Kind>,
    /// Deferred parameter-to-argument-variable binding edges. A parameter
    /// bound from several call sites carries one edge per site.
    edges: FxHashMap<VarId, SmallVec<[VarId; 2]>>,
    built: bool,
}

impl ContinuationKinds {
    /// Create a resolver seeded by the method's entry closure and declared
    /// result kind.
    pub fn new(entry: ClosureId, result_kind: Kind) -> Self {
        ContinuationKinds {
            entry,
            result_kind,
            resolved: FxHashMap::default(),
            edges: FxHashMap::default(),
            built: false,
        }
    }

    /// The kind a continuation parameter is bound to; `Void` when no
    /// binding is discoverable.
    pub fn kind_of(&mut self, graph: &CirGraph, var: VarId) -> Kind {
        if !self.built {
            self.build(graph);
        }
        if let Some(&kind) = self.resolved.get(&var) {
            return kind;
        }

        // Worklist search over deferred edges, with cycle protection. All
        // edges of a parameter are explored; the first resolved binding
        // reached wins.
        let mut visited: FxHashSet<VarId> = FxHashSet::default();
        visited.insert(var);
        let mut stack = vec![var];
        let mut found = None;

        while let Some(current) = stack.pop() {
            if let Some(&kind) = self.resolved.get(&current) {
                found = Some(kind);
                break;
            }
            if let Some(nexts) = self.edges.get(&current) {
                for &next in nexts {
                    if visited.insert(next) {
                        stack.push(next);
                    }
                }
            }
        }

        match found {
            Some(kind) => {
                self.resolved.insert(var, kind);
                kind
            }
            None => {
                // The search exhausted everything reachable, so every
                // visited variable is unbound too.
                for v in visited {
                    self.resolved.insert(v, Kind::Void);
                }
                Kind::Void
            }
        }
    }

    /// Whether a query for `var` is already cached.
    pub fn is_resolved(&self, var: VarId) -> bool {
        self.resolved.contains_key(&var)
    }

    /// Build the binding graph: seed the entry continuation, then record a
    /// binding per continuation-parameter position of every block or
    /// closure call in the graph.
    fn build(&mut self, graph: &CirGraph) {
        self.built = true;

        if let Some(outer) = graph.closures[self.entry].normal_continuation() {
            self.resolved.insert(outer, self.result_kind);
        }

        for (_, call) in graph.calls.iter() {
            let target = match call.procedure {
                CirValue::Closure(c) => c,
                CirValue::Block(b) => graph.blocks[b].closure,
                _ => continue,
            };
            let closure = &graph.closures[target];
            let first_cont = closure.params.len() - closure.cont_slots as usize;

            for index in first_cont..closure.params.len() {
                let formal = closure.params[index];
                let Some(&arg) = call.args.get(index) else {
                    continue;
                };
                match arg {
                    CirValue::Closure(c) => {
                        self.resolved.insert(formal, receiver_kind(graph, c));
                    }
                    CirValue::Block(b) => {
                        let c = graph.blocks[b].closure;
                        self.resolved.insert(formal, receiver_kind(graph, c));
                    }
                    CirValue::Var(v) if v != formal => {
                        self.edges.entry(formal).or_default().push(v);
                    }
                    _ => {}
                }
            }
        }
    }
}

/// The kind a continuation closure receives: its own parameter's kind, or
/// `Void` when it takes none.
fn receiver_kind(graph: &CirGraph, closure: ClosureId) -> Kind {
    match graph.closures[closure].params.first() {
        Some(&p) => graph.vars[p].kind.unwrap_or(Kind::Void),
        None => Kind::Void,
    }
}
