//! Code buffer for building JIT code.
//!
//! Machine code is assembled into a plain byte vector and patched in place
//! by the code generator and the linker before it is copied into
//! executable memory.

/// A buffer for building machine code.
#[derive(Debug, Default, Clone)]
pub struct CodeBuffer {
    code: Vec<u8>,
}

impl CodeBuffer {
    /// Create a new empty code buffer.
    pub fn new() -> Self {
        Self { code: Vec::new() }
    }

    /// Create a new code buffer with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            code: Vec::with_capacity(capacity),
        }
    }

    /// Get the current size of the code.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Get the current offset.
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// Emit a single byte.
    pub fn emit_u8(&mut self, byte: u8) {
        self.code.push(byte);
    }

    /// Emit a 32-bit value (little-endian).
    pub fn emit_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit value (little-endian).
    pub fn emit_u64(&mut self, value: u64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit multiple bytes.
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    /// Overwrite 4 bytes at `offset`. Returns `false` if out of range.
    pub fn patch_i32(&mut self, offset: usize, value: i32) -> bool {
        match self.code.get_mut(offset..offset + 4) {
            Some(slot) => {
                slot.copy_from_slice(&value.to_le_bytes());
                true
            }
            None => false,
        }
    }

    /// Overwrite 8 bytes at `offset`. Returns `false` if out of range.
    pub fn patch_u64(&mut self, offset: usize, value: u64) -> bool {
        match self.code.get_mut(offset..offset + 8) {
            Some(slot) => {
                slot.copy_from_slice(&value.to_le_bytes());
                true
            }
            None => false,
        }
    }

    /// Patch the rel32 field of a jump or call that starts at `offset` and
    /// is `length` bytes long so that it lands on `target`. Both offsets
    /// are relative to the same origin. Returns `false` if the displacement
    /// does not fit or the instruction is out of range.
    pub fn patch_rel32(&mut self, offset: usize, length: usize, target: i64) -> bool {
        let end = (offset + length) as i64;
        let Ok(displacement) = i32::try_from(target - end) else {
            return false;
        };
        self.patch_i32(offset + length - 4, displacement)
    }

    /// Get the code bytes (for inspection).
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Consume the buffer and return the raw code bytes.
    pub fn into_code(self) -> Vec<u8> {
        self.code
    }

    /// Pad the code with INT3 up to the given boundary.
    pub fn align(&mut self, alignment: usize) {
        let current = self.code.len();
        let aligned = (current + alignment - 1) & !(alignment - 1);
        self.code.resize(aligned, 0xCC);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_bytes() {
        let mut buf = CodeBuffer::new();
        buf.emit_u8(0x90);
        buf.emit_u32(0xDEADBEEF);

        assert_eq!(buf.len(), 5);
        assert_eq!(buf.code(), &[0x90, 0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn test_patch_rel32_forward_and_backward() {
        let mut buf = CodeBuffer::new();
        // jmp rel32 at 0, target at 20
        buf.emit_bytes(&[0xE9, 0, 0, 0, 0]);
        assert!(buf.patch_rel32(0, 5, 20));
        assert_eq!(&buf.code()[1..5], &15i32.to_le_bytes());

        // Jump back to itself
        assert!(buf.patch_rel32(0, 5, 0));
        assert_eq!(&buf.code()[1..5], &(-5i32).to_le_bytes());
    }

    #[test]
    fn test_patch_out_of_range() {
        let mut buf = CodeBuffer::new();
        buf.emit_bytes(&[0xE8, 0, 0, 0]);
        assert!(!buf.patch_rel32(0, 5, 10));
        assert!(!buf.patch_u64(0, 1));
    }

    #[test]
    fn test_patch_u64() {
        let mut buf = CodeBuffer::new();
        buf.emit_bytes(&[0x48, 0xB8]);
        buf.emit_u64(0);
        assert!(buf.patch_u64(2, 0x1122334455667788));
        assert_eq!(buf.code()[2], 0x88);
        assert_eq!(buf.code()[9], 0x11);
    }

    #[test]
    fn test_alignment() {
        let mut buf = CodeBuffer::new();
        buf.emit_u8(0x90);
        buf.align(16);

        assert_eq!(buf.len(), 16);
        assert_eq!(buf.code()[15], 0xCC);
    }
}
