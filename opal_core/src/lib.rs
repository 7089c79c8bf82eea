//! Shared leaf types for the Opal VM.
//!
//! This crate holds the vocabulary the compilation tiers agree on:
//! - `Kind`: the static value kinds carried by variables and continuations
//! - `Opcode`: bytecode opcode ordinals (the template table index space)
//! - `error`: the unified compile error type

pub mod cmp;
pub mod error;
pub mod kind;
pub mod opcode;

pub use cmp::Comparator;
pub use error::{CompileError, CompileResult};
pub use kind::Kind;
pub use opcode::Opcode;
