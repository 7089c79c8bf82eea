//! Graph-rewriting passes over the CIR.
//!
//! All passes mutate the graph in place and are idempotent: re-running a
//! pass on an already-optimized graph finds nothing to change.

pub mod cont_kind;
pub mod param_merge;
pub mod switch_encapsulate;

pub use cont_kind::ContinuationKinds;
pub use param_merge::{merge_block_parameters, ParamMergeStats};
pub use switch_encapsulate::{encapsulate_switches, EncapsulateStats};
