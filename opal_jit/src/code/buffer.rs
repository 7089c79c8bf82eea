//! Growable, randomly-patchable code buffer.
//!
//! The buffer is an owned byte array plus a monotonically-advancing write
//! cursor. Emission appends at the cursor and grows the allocation as
//! needed; patching overwrites already-emitted bytes and never grows.
//! Exactly one thread owns a buffer for the duration of a compilation;
//! there is no internal synchronization.

/// Error raised when a patch addresses bytes past the allocated region.
///
/// Callers must treat a failed patch as aborting the current emission
/// step; the buffer's content at other offsets is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyError {
    /// Patch start offset.
    pub offset: usize,
    /// Patch byte count.
    pub size: usize,
    /// Allocated buffer length at the time of the patch.
    pub allocated: usize,
}

impl std::fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "patch at {}+{} exceeds allocated {} bytes",
            self.offset, self.size, self.allocated
        )
    }
}

impl std::error::Error for AssemblyError {}

impl From<AssemblyError> for opal_core::CompileError {
    fn from(e: AssemblyError) -> Self {
        opal_core::CompileError::Assembly {
            offset: e.offset,
            size: e.size,
            allocated: e.allocated,
        }
    }
}

/// Append-only byte buffer with absolute-offset patching.
///
/// Invariant: all bytes at offsets below [`CodeBuffer::current_position`]
/// are defined content, and the allocated length is always at least the
/// cursor. Created once per compilation and discarded, not recycled, when
/// the final bytes are copied out.
#[derive(Debug, Clone)]
pub struct CodeBuffer {
    /// Allocated storage; `bytes.len()` is the allocated length.
    bytes: Vec<u8>,
    /// Write cursor.
    position: usize,
}

/// Initial allocation for a fresh buffer.
const INITIAL_CAPACITY: usize = 128;

impl CodeBuffer {
    /// Create an empty buffer with the default allocation.
    pub fn new() -> Self {
        CodeBuffer {
            bytes: vec![0; INITIAL_CAPACITY],
            position: 0,
        }
    }

    /// Create a buffer with a given initial allocation.
    pub fn with_capacity(capacity: usize) -> Self {
        CodeBuffer {
            bytes: vec![0; capacity.max(1)],
            position: 0,
        }
    }

    /// The write cursor. Callers use this as a label for backpatching.
    #[inline]
    pub fn current_position(&self) -> usize {
        self.position
    }

    /// The allocated length.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.bytes.len()
    }

    /// Grow so that at least `needed` more bytes fit at the cursor.
    ///
    /// New allocation = max(2x current, current + shortfall); growth never
    /// fails for a non-negative request and preserves all emitted bytes.
    fn ensure(&mut self, needed: usize) {
        let required = self.position + needed;
        if required > self.bytes.len() {
            let len = self.bytes.len();
            let new_len = (len * 2).max(required);
            self.bytes.resize(new_len, 0);
        }
    }

    /// Append one byte at the cursor.
    #[inline]
    pub fn emit_byte(&mut self, byte: u8) {
        self.ensure(1);
        self.bytes[self.position] = byte;
        self.position += 1;
    }

    /// Append a byte slice at the cursor.
    pub fn emit(&mut self, bytes: &[u8]) {
        self.ensure(bytes.len());
        self.bytes[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
    }

    /// Append a little-endian 32-bit value at the cursor.
    #[inline]
    pub fn emit_u32(&mut self, value: u32) {
        self.emit(&value.to_le_bytes());
    }

    /// Append a little-endian 64-bit value at the cursor.
    #[inline]
    pub fn emit_u64(&mut self, value: u64) {
        self.emit(&value.to_le_bytes());
    }

    /// Advance the cursor by `n` bytes without writing.
    ///
    /// Used to leave room for an instruction whose exact encoding depends
    /// on a displacement known only later.
    pub fn reserve(&mut self, n: usize) {
        self.ensure(n);
        self.position += n;
    }

    fn check(&self, offset: usize, size: usize) -> Result<(), AssemblyError> {
        if offset + size > self.bytes.len() {
            return Err(AssemblyError {
                offset,
                size,
                allocated: self.bytes.len(),
            });
        }
        Ok(())
    }

    /// Apply a fixup functor to `size` bytes at `offset`.
    pub fn fix_with<F>(&mut self, offset: usize, size: usize, f: F) -> Result<(), AssemblyError>
    where
        F: FnOnce(&mut [u8]),
    {
        self.check(offset, size)?;
        f(&mut self.bytes[offset..offset + size]);
        Ok(())
    }

    /// Overwrite `size` bytes at `offset` with bytes copied from `src`
    /// starting at `src_pos`.
    pub fn fix_bytes(
        &mut self,
        offset: usize,
        src: &[u8],
        src_pos: usize,
        size: usize,
    ) -> Result<(), AssemblyError> {
        self.check(offset, size)?;
        self.bytes[offset..offset + size].copy_from_slice(&src[src_pos..src_pos + size]);
        Ok(())
    }

    /// Overwrite a single byte at `offset`.
    pub fn fix_byte(&mut self, offset: usize, byte: u8) -> Result<(), AssemblyError> {
        self.check(offset, 1)?;
        self.bytes[offset] = byte;
        Ok(())
    }

    /// Rewind the cursor to `offset`, re-emit another buffer's output in
    /// place, then restore the cursor.
    ///
    /// Supports call-site relinking. Not reentrant: the caller must not
    /// interleave this with any other write to the same buffer, which the
    /// single-owner rule satisfies trivially.
    pub fn fix_from(&mut self, offset: usize, other: &CodeBuffer) {
        let saved = self.position;
        self.position = offset;
        self.emit(&other.bytes[..other.position]);
        self.position = saved;
    }

    /// Copy the first `out.len()` bytes into `out`.
    ///
    /// The caller must ensure `out.len() <= current_position()`.
    pub fn copy_to(&self, out: &mut [u8]) {
        debug_assert!(out.len() <= self.position);
        out.copy_from_slice(&self.bytes[..out.len()]);
    }

    /// Extract the emitted bytes, consuming the buffer.
    pub fn finish(mut self) -> Vec<u8> {
        self.bytes.truncate(self.position);
        self.bytes
    }
}

impl Default for CodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_round_trip() {
        let mut buf = CodeBuffer::new();
        buf.emit(&[0x10, 0x20, 0x30]);
        assert_eq!(buf.current_position(), 3);

        let mut out = [0u8; 3];
        buf.copy_to(&mut out);
        assert_eq!(out, [0x10, 0x20, 0x30]);
    }

    #[test]
    fn test_growth_preserves_content() {
        let mut buf = CodeBuffer::with_capacity(4);
        buf.emit(&[1, 2, 3, 4]);
        let before = buf.current_position();

        // Overflow the allocation several times over.
        let big = vec![0xAB; 100];
        buf.emit(&big);

        let mut out = vec![0u8; buf.current_position()];
        buf.copy_to(&mut out);
        assert_eq!(&out[..before], &[1, 2, 3, 4]);
        assert!(out[before..].iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_growth_policy_doubles() {
        let mut buf = CodeBuffer::with_capacity(8);
        buf.emit(&[0; 9]);
        // max(2*8, 9) = 16
        assert_eq!(buf.allocated(), 16);

        let mut buf = CodeBuffer::with_capacity(8);
        buf.emit(&[0; 100]);
        // max(2*8, 100) = 100
        assert_eq!(buf.allocated(), 100);
    }

    #[test]
    fn test_reserve_advances_cursor() {
        let mut buf = CodeBuffer::new();
        buf.emit_byte(0xFF);
        buf.reserve(4);
        assert_eq!(buf.current_position(), 5);

        buf.emit_byte(0xEE);
        let bytes = buf.finish();
        assert_eq!(bytes, vec![0xFF, 0, 0, 0, 0, 0xEE]);
    }

    #[test]
    fn test_fix_byte_and_bytes() {
        let mut buf = CodeBuffer::new();
        buf.emit(&[0, 0, 0, 0]);
        buf.fix_byte(1, 0x42).unwrap();
        buf.fix_bytes(2, &[9, 8, 7], 1, 2).unwrap();

        let bytes = buf.finish();
        assert_eq!(bytes, vec![0, 0x42, 8, 7]);
    }

    #[test]
    fn test_fix_with_functor() {
        let mut buf = CodeBuffer::new();
        buf.emit(&[0xE9, 0, 0, 0, 0]);
        buf.fix_with(1, 4, |slice| {
            slice.copy_from_slice(&0x100i32.to_le_bytes());
        })
        .unwrap();

        let bytes = buf.finish();
        assert_eq!(bytes, vec![0xE9, 0x00, 0x01, 0, 0]);
    }

    #[test]
    fn test_patch_out_of_range_leaves_content() {
        let mut buf = CodeBuffer::with_capacity(4);
        buf.emit(&[1, 2, 3, 4]);
        let allocated = buf.allocated();

        let err = buf.fix_bytes(2, &[9, 9, 9, 9], 0, allocated).unwrap_err();
        assert_eq!(err.offset, 2);
        assert_eq!(err.allocated, allocated);

        let mut out = [0u8; 4];
        buf.copy_to(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_fix_byte_out_of_range() {
        let mut buf = CodeBuffer::with_capacity(2);
        buf.emit(&[1, 2]);
        assert!(buf.fix_byte(buf.allocated(), 0).is_err());
    }

    #[test]
    fn test_fix_from_restores_cursor() {
        let mut buf = CodeBuffer::new();
        buf.emit(&[0xAA; 8]);

        let mut stub = CodeBuffer::new();
        stub.emit(&[1, 2, 3]);

        buf.fix_from(2, &stub);
        assert_eq!(buf.current_position(), 8);

        let bytes = buf.finish();
        assert_eq!(bytes, vec![0xAA, 0xAA, 1, 2, 3, 0xAA, 0xAA, 0xAA]);
    }

    #[test]
    fn test_assembly_error_converts() {
        let err = AssemblyError {
            offset: 4,
            size: 2,
            allocated: 4,
        };
        let compile: opal_core::CompileError = err.into();
        assert!(matches!(
            compile,
            opal_core::CompileError::Assembly { offset: 4, .. }
        ));
    }
}
