//! Shared guard handlers.
//!
//! Guard checks in generated code jump here instead of calling out
//! inline. Each stub reserves shadow space, calls a runtime callback and
//! traps if the callback ever returns.

use tracing::error;

use super::JitError;
use super::calling_convention::SHADOW_SPACE;
use super::codebuf::CodeBuffer;
use super::memory::MemoryManager;
use super::x86_64::{Reg, X86_64Assembler};

/// Absolute addresses of the four guard stubs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardHandlers {
    pub null_reference: usize,
    pub index_out_of_bounds: usize,
    pub invalid_array_size: usize,
    pub stack_overflow: usize,
}

/// The fault a guard reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardFault {
    NullReference,
    IndexOutOfBounds,
    InvalidArraySize,
    StackOverflow,
}

impl GuardFault {
    pub fn message(self) -> &'static str {
        match self {
            GuardFault::NullReference => "null reference",
            GuardFault::IndexOutOfBounds => "array index out of bounds",
            GuardFault::InvalidArraySize => "invalid array size",
            GuardFault::StackOverflow => "stack overflow",
        }
    }
}

impl std::fmt::Display for GuardFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Report a runtime fault and terminate the process.
pub(crate) fn report(fault: GuardFault) -> ! {
    error!(%fault, "runtime guard failed");
    eprintln!("Runtime error: {}", fault);
    std::process::exit(1)
}

extern "win64" fn null_reference() -> ! {
    report(GuardFault::NullReference)
}

extern "win64" fn index_out_of_bounds() -> ! {
    report(GuardFault::IndexOutOfBounds)
}

extern "win64" fn invalid_array_size() -> ! {
    report(GuardFault::InvalidArraySize)
}

extern "win64" fn stack_overflow() -> ! {
    report(GuardFault::StackOverflow)
}

/// `sub rsp, 32; mov rax, callback; call rax; int3`
fn emit_stub(buf: &mut CodeBuffer, callback: usize) -> usize {
    buf.align(16);
    let start = buf.offset();
    let mut asm = X86_64Assembler::new(buf);
    asm.sub_ri32(Reg::Rsp, SHADOW_SPACE);
    asm.mov_ri64(Reg::Rax, callback as i64);
    asm.call_r(Reg::Rax);
    asm.int3();
    start
}

/// Emit the four guard stubs into a fresh executable region.
pub fn generate_handlers(memory: &mut MemoryManager) -> Result<GuardHandlers, JitError> {
    let mut buf = CodeBuffer::new();
    let offsets = [
        emit_stub(&mut buf, null_reference as usize),
        emit_stub(&mut buf, index_out_of_bounds as usize),
        emit_stub(&mut buf, invalid_array_size as usize),
        emit_stub(&mut buf, stack_overflow as usize),
    ];

    let region = memory.allocate_code(buf.len())?;
    region.write(0, buf.code())?;
    region.make_executable()?;
    let base = region.as_ptr() as usize;

    Ok(GuardHandlers {
        null_reference: base + offsets[0],
        index_out_of_bounds: base + offsets[1],
        invalid_array_size: base + offsets[2],
        stack_overflow: base + offsets[3],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_shape() {
        let mut buf = CodeBuffer::new();
        let start = emit_stub(&mut buf, 0x1122_3344_5566_7788);
        assert_eq!(start, 0);
        let code = buf.code();
        // sub rsp, 32
        assert_eq!(&code[..4], &[0x48, 0x83, 0xEC, 0x20]);
        // mov rax, imm64
        assert_eq!(&code[4..6], &[0x48, 0xB8]);
        assert_eq!(&code[6..14], &0x1122_3344_5566_7788u64.to_le_bytes());
        // call rax; int3
        assert_eq!(&code[14..], &[0xFF, 0xD0, 0xCC]);
    }

    #[test]
    fn test_handlers_are_distinct_and_aligned() {
        let mut memory = MemoryManager::new();
        let handlers = generate_handlers(&mut memory).unwrap();
        let all = [
            handlers.null_reference,
            handlers.index_out_of_bounds,
            handlers.invalid_array_size,
            handlers.stack_overflow,
        ];
        for (i, a) in all.iter().enumerate() {
            assert_eq!(a % 16, 0);
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_fault_messages() {
        assert_eq!(GuardFault::NullReference.to_string(), "null reference");
        assert_eq!(GuardFault::StackOverflow.to_string(), "stack overflow");
    }
}
