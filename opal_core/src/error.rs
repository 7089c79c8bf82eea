//! Unified compile error type.
//!
//! Every invariant violation in the backend is an error variant here; no
//! pass swallows one. A single method compilation either completes with a
//! valid code buffer or fails as a whole — there is no partial success.

use thiserror::Error;

use crate::opcode::Opcode;

/// The result type used throughout the compilation backend.
pub type CompileResult<T> = Result<T, CompileError>;

/// Errors that terminate the enclosing compilation or build step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A call supplied a different number of arguments than its target
    /// closure or block declares parameters.
    #[error("call supplies {supplied} arguments but target declares {declared} parameters")]
    ArityMismatch {
        /// Arguments at the call site.
        supplied: usize,
        /// Parameters on the target.
        declared: usize,
    },

    /// A multi-way dispatch was requested for a comparison kind other than
    /// the native 32-bit integer kind.
    #[error("multi-way switch dispatch requires a 32-bit int tag")]
    SwitchKindNotInt,

    /// A switch's match and target arrays disagree in length.
    #[error("switch has {matches} match constants but {targets} targets")]
    MalformedSwitch {
        /// Match constant count.
        matches: usize,
        /// Target block count.
        targets: usize,
    },

    /// Two templates were registered for the same opcode.
    #[error("duplicate template for opcode {0:?}")]
    DuplicateTemplate(Opcode),

    /// A template method has stack-passed parameters.
    #[error("template for {opcode:?} has {count} stack-passed parameters")]
    TemplateStackParameters {
        /// The offending opcode.
        opcode: Opcode,
        /// Stack-resident parameter count.
        count: usize,
    },

    /// A template method carries reference-literal pool entries.
    #[error("template for {0:?} has reference literals")]
    TemplateReferenceLiterals(Opcode),

    /// A template method carries scalar-literal pool entries.
    #[error("template for {0:?} has scalar literals")]
    TemplateScalarLiterals(Opcode),

    /// The template table has no entry for an opcode the stitcher needs.
    #[error("no template registered for opcode {0:?}")]
    MissingTemplate(Opcode),

    /// A code buffer patch addressed bytes past the allocated region.
    #[error("assembly error: patch at {offset}+{size} exceeds allocated {allocated} bytes")]
    Assembly {
        /// Patch start offset.
        offset: usize,
        /// Patch byte count.
        size: usize,
        /// Allocated buffer length.
        allocated: usize,
    },

    /// A branch displacement did not fit its encoding.
    #[error("branch displacement out of range at offset {0}")]
    DisplacementOverflow(usize),

    /// A CIR value appeared where a direct (data) value was required.
    #[error("value has no direct representation: {0}")]
    Unrepresentable(&'static str),
}
