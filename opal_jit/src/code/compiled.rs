//! Compiled-method record.
//!
//! The record handed to the runtime method registry. Only the fields this
//! backend itself produces or inspects are defined here: code bytes, frame
//! size, and the literal/stack-parameter counts template validation reads.

/// A finished compiled method.
#[derive(Debug, Clone)]
pub struct CompiledMethod {
    /// The emitted machine code.
    pub code: Vec<u8>,
    /// Stack frame size in bytes.
    pub frame_size: u32,
    /// Number of stack-resident parameters per the calling convention.
    pub stack_parameters: usize,
    /// Number of reference-literal pool entries.
    pub reference_literals: usize,
    /// Number of scalar-literal pool entries.
    pub scalar_literals: usize,
}

impl CompiledMethod {
    /// A record with empty literal pools and register-only parameters.
    pub fn new(code: Vec<u8>, frame_size: u32) -> Self {
        CompiledMethod {
            code,
            frame_size,
            stack_parameters: 0,
            reference_literals: 0,
            scalar_literals: 0,
        }
    }

    /// Code length in bytes.
    #[inline]
    pub fn code_len(&self) -> usize {
        self.code.len()
    }
}
