//! Method-compilation backend for the Opal VM.
//!
//! A bytecode method is lowered progressively through three IRs:
//! - **CIR**: continuation-passing closures, calls, and named blocks
//! - **DIR**: imperative basic blocks with explicit switch/jump terminators
//! - **EIR**: x64-flavoured blocks with concrete operands
//!
//! and emitted into a growable, patchable [`code::CodeBuffer`]. An
//! independent fast path assembles precompiled per-opcode templates
//! ([`template`]) into the same buffer abstraction.
//!
//! Each method compilation is single-threaded: one thread owns the IR
//! graphs and the code buffer until the final bytes are copied out. The
//! template table is built once before compilation starts and is read-only
//! afterwards.

pub mod arena;
pub mod cir;
pub mod code;
pub mod compile;
pub mod dir;
pub mod eir;
pub mod platform;
pub mod template;
