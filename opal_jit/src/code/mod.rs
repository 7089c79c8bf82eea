//! Code emission: the byte buffer all tiers terminate in, and the
//! compiled-method record handed to the runtime method registry.

pub mod buffer;
pub mod compiled;

pub use buffer::{AssemblyError, CodeBuffer};
pub use compiled::CompiledMethod;
