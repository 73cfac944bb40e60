//! Windows x64 calling convention.
//!
//! The first four arguments go in RCX/RDX/R8/R9, or XMM0-XMM3 for floats,
//! chosen by position. The caller reserves 32 bytes of shadow space and
//! places further arguments above it. RSP is 16-byte aligned at the call.

use super::x86_64::{Reg, Xmm};

/// Shadow space the caller reserves for the first four arguments.
pub const SHADOW_SPACE: i32 = 32;

/// Number of arguments passed in registers.
pub const REGISTER_ARGUMENTS: usize = 4;

pub const INT_ARGUMENT_REGISTERS: [Reg; REGISTER_ARGUMENTS] = [Reg::Rcx, Reg::Rdx, Reg::R8, Reg::R9];

pub const FLOAT_ARGUMENT_REGISTERS: [Xmm; REGISTER_ARGUMENTS] =
    [Xmm::Xmm0, Xmm::Xmm1, Xmm::Xmm2, Xmm::Xmm3];

/// Where an argument is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentLocation {
    Register(Reg),
    FloatRegister(Xmm),
    /// RSP-relative offset at the call instruction
    Stack(i32),
}

/// Location of argument `index`.
pub fn argument_location(index: usize, is_float: bool) -> ArgumentLocation {
    if index < REGISTER_ARGUMENTS {
        if is_float {
            ArgumentLocation::FloatRegister(FLOAT_ARGUMENT_REGISTERS[index])
        } else {
            ArgumentLocation::Register(INT_ARGUMENT_REGISTERS[index])
        }
    } else {
        ArgumentLocation::Stack(SHADOW_SPACE + 8 * (index - REGISTER_ARGUMENTS) as i32)
    }
}

/// Bytes to reserve below RSP for a call with `argument_count` arguments.
pub fn call_area_size(argument_count: usize) -> i32 {
    let stack_arguments = argument_count.saturating_sub(REGISTER_ARGUMENTS) as i32;
    (SHADOW_SPACE + 8 * stack_arguments + 15) & !15
}

/// RBP-relative offset of stack argument `index` in the callee, after
/// `push rbp; mov rbp, rsp`.
pub fn incoming_stack_argument_offset(index: usize) -> i32 {
    // saved rbp + return address + shadow space
    16 + SHADOW_SPACE + 8 * (index - REGISTER_ARGUMENTS) as i32
}
