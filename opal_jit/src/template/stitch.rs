//! Template stitching.
//!
//! Compiles a bytecode method by concatenating its opcodes' templates
//! into one code buffer, recording where each bytecode index landed. The
//! offset table is what the runtime uses to map bytecode positions to
//! native positions for deoptimization and patching.

use opal_core::{CompileError, CompileResult, Opcode};

use crate::code::{CodeBuffer, CompiledMethod};
use crate::template::TemplateTable;

/// A stitched method plus its bytecode-to-native offset table.
#[derive(Debug)]
pub struct StitchedMethod {
    pub method: CompiledMethod,
    /// `offsets[i]` is the native offset where bytecode index `i` starts.
    offsets: Vec<usize>,
}

impl StitchedMethod {
    /// Native code offset of bytecode index `index`.
    #[inline]
    pub fn native_offset(&self, index: usize) -> usize {
        self.offsets[index]
    }

    #[inline]
    pub fn bytecode_len(&self) -> usize {
        self.offsets.len()
    }
}

/// Stitch `bytecode` using `table`.
///
/// Fails with [`CompileError::MissingTemplate`] on the first opcode the
/// table has no entry for; partially stitched output is discarded.
pub fn stitch(table: &TemplateTable, bytecode: &[Opcode]) -> CompileResult<StitchedMethod> {
    let mut buffer = CodeBuffer::new();
    let mut offsets = Vec::with_capacity(bytecode.len());

    for &opcode in bytecode {
        let template = table
            .get(opcode)
            .ok_or(CompileError::MissingTemplate(opcode))?;
        offsets.push(buffer.current_position());
        buffer.emit(&template.code);
    }

    Ok(StitchedMethod {
        method: CompiledMethod::new(buffer.finish(), table.frame_size()),
        offsets,
    })
}
