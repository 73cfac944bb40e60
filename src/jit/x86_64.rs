//! x86-64 instruction encoding for JIT compilation.
//!
//! Encodes the subset of x86-64 the code generator needs. Register roles
//! follow the Windows x64 calling convention.

use super::codebuf::CodeBuffer;

/// x86-64 general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0, // Return value
    Rcx = 1, // 1st argument
    Rdx = 2, // 2nd argument
    Rbx = 3, // Callee-saved
    Rsp = 4, // Stack pointer
    Rbp = 5, // Frame pointer
    Rsi = 6, // Callee-saved
    Rdi = 7, // Callee-saved
    R8 = 8,  // 3rd argument
    R9 = 9,  // 4th argument
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Get the register code (lower 3 bits).
    pub fn code(self) -> u8 {
        (self as u8) & 0x7
    }
}

/// SSE registers. Only the low eight are used, so no REX extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Xmm {
    Xmm0 = 0, // Float return value, 1st float argument
    Xmm1 = 1,
    Xmm2 = 2,
    Xmm3 = 3,
    Xmm4 = 4,
    Xmm5 = 5,
    Xmm6 = 6,
    Xmm7 = 7,
}

impl Xmm {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// x86-64 condition codes (for Jcc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    O = 0x0,  // Overflow
    No = 0x1, // Not overflow
    B = 0x2,  // Below (unsigned <)
    Ae = 0x3, // Above or equal (unsigned >=)
    E = 0x4,  // Equal
    Ne = 0x5, // Not equal
    Be = 0x6, // Below or equal (unsigned <=)
    A = 0x7,  // Above (unsigned >)
    S = 0x8,  // Sign (negative)
    Ns = 0x9, // Not sign (non-negative)
    P = 0xA,  // Parity even
    Np = 0xB, // Parity odd
    L = 0xC,  // Less (signed <)
    Ge = 0xD, // Greater or equal (signed >=)
    Le = 0xE, // Less or equal (signed <=)
    G = 0xF,  // Greater (signed >)
}

/// Length of `jmp rel32`.
pub const JMP_REL32_LEN: usize = 5;
/// Length of `jcc rel32`.
pub const JCC_REL32_LEN: usize = 6;
/// Length of `call rel32`.
pub const CALL_REL32_LEN: usize = 5;
/// Offset of the imm64 inside `mov r64, imm64`.
pub const MOV_IMM64_OFFSET: usize = 2;

/// x86-64 assembler.
pub struct X86_64Assembler<'a> {
    buf: &'a mut CodeBuffer,
}

impl<'a> X86_64Assembler<'a> {
    pub fn new(buf: &'a mut CodeBuffer) -> Self {
        Self { buf }
    }

    /// Current offset in the underlying buffer.
    pub fn offset(&self) -> usize {
        self.buf.offset()
    }

    // ==================== Prefix / operand helpers ====================

    /// Emit a REX prefix for `reg` (ModRM.reg) and `rm` (ModRM.rm or base),
    /// both given as full register numbers. Omitted when it carries no
    /// bits unless `force` is set.
    fn emit_rex(&mut self, w: bool, reg: u8, rm: u8, force: bool) {
        let w_bit = if w { 0x08 } else { 0x00 };
        let rex = 0x40 | w_bit | ((reg >> 3) & 1) << 2 | ((rm >> 3) & 1);
        if rex != 0x40 || force {
            self.buf.emit_u8(rex);
        }
    }

    /// Encode ModR/M byte.
    /// mod: 2 bits, reg: 3 bits, rm: 3 bits
    fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
        ((mode & 0x3) << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
    }

    /// Emit ModR/M (+ SIB) (+ displacement) for `[base + disp]`.
    fn emit_mem(&mut self, reg: u8, base: Reg, disp: i32) {
        let needs_sib = base == Reg::Rsp || base == Reg::R12;
        // RBP/R13 with mod=00 means RIP-relative, so they always carry a displacement
        let mode = if disp == 0 && base != Reg::Rbp && base != Reg::R13 {
            0b00
        } else if (-128..=127).contains(&disp) {
            0b01
        } else {
            0b10
        };

        if needs_sib {
            self.buf.emit_u8(Self::modrm(mode, reg, 0b100));
            self.buf.emit_u8(0x24); // SIB: no index, base=RSP/R12
        } else {
            self.buf.emit_u8(Self::modrm(mode, reg, base.code()));
        }

        match mode {
            0b01 => self.buf.emit_u8(disp as u8),
            0b10 => self.buf.emit_u32(disp as u32),
            _ => {}
        }
    }

    fn emit_rr(&mut self, w: bool, opcode: &[u8], reg: Reg, rm: Reg) {
        self.emit_rex(w, reg as u8, rm as u8, false);
        self.buf.emit_bytes(opcode);
        self.buf.emit_u8(Self::modrm(0b11, reg.code(), rm.code()));
    }

    /// Group-1 ALU op with an immediate (`/ext`).
    fn emit_alu_ri(&mut self, w: bool, ext: u8, dst: Reg, imm: i32) {
        self.emit_rex(w, 0, dst as u8, false);
        if (-128..=127).contains(&imm) {
            self.buf.emit_u8(0x83);
            self.buf.emit_u8(Self::modrm(0b11, ext, dst.code()));
            self.buf.emit_u8(imm as u8);
        } else {
            self.buf.emit_u8(0x81);
            self.buf.emit_u8(Self::modrm(0b11, ext, dst.code()));
            self.buf.emit_u32(imm as u32);
        }
    }

    // ==================== Data Movement ====================

    /// MOV r64, r64 (register to register)
    pub fn mov_rr(&mut self, dst: Reg, src: Reg) {
        self.emit_rr(true, &[0x89], src, dst);
    }

    /// MOV r32, r32 (zero-extends to 64-bit)
    pub fn mov_rr32(&mut self, dst: Reg, src: Reg) {
        self.emit_rr(false, &[0x89], src, dst);
    }

    /// MOV r64, imm64 (move 64-bit immediate to register)
    pub fn mov_ri64(&mut self, dst: Reg, imm: i64) {
        self.emit_rex(true, 0, dst as u8, false);
        self.buf.emit_u8(0xB8 + dst.code());
        self.buf.emit_u64(imm as u64);
    }

    /// MOV r64, [base + disp]
    pub fn mov_rm(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.emit_rex(true, dst as u8, base as u8, false);
        self.buf.emit_u8(0x8B);
        self.emit_mem(dst.code(), base, disp);
    }

    /// MOV r32, DWORD PTR [base + disp] (zero-extends to 64-bit)
    pub fn mov_rm32(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.emit_rex(false, dst as u8, base as u8, false);
        self.buf.emit_u8(0x8B);
        self.emit_mem(dst.code(), base, disp);
    }

    /// MOV [base + disp], r64
    pub fn mov_mr(&mut self, base: Reg, disp: i32, src: Reg) {
        self.emit_rex(true, src as u8, base as u8, false);
        self.buf.emit_u8(0x89);
        self.emit_mem(src.code(), base, disp);
    }

    /// MOV DWORD PTR [base + disp], r32
    pub fn mov_mr32(&mut self, base: Reg, disp: i32, src: Reg) {
        self.emit_rex(false, src as u8, base as u8, false);
        self.buf.emit_u8(0x89);
        self.emit_mem(src.code(), base, disp);
    }

    /// MOV BYTE PTR [base + disp], r8
    pub fn mov_mr8(&mut self, base: Reg, disp: i32, src: Reg) {
        // Always emit REX so codes 4-7 mean SPL/BPL/SIL/DIL, not AH/CH/DH/BH
        self.emit_rex(false, src as u8, base as u8, true);
        self.buf.emit_u8(0x88);
        self.emit_mem(src.code(), base, disp);
    }

    /// MOV QWORD PTR [base + disp], imm32 (sign-extended)
    pub fn mov_mi32(&mut self, base: Reg, disp: i32, imm: i32) {
        self.emit_rex(true, 0, base as u8, false);
        self.buf.emit_u8(0xC7);
        self.emit_mem(0, base, disp);
        self.buf.emit_u32(imm as u32);
    }

    /// MOVZX r64, BYTE PTR [base + disp]
    pub fn movzx_rm8(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.emit_rex(true, dst as u8, base as u8, false);
        self.buf.emit_bytes(&[0x0F, 0xB6]);
        self.emit_mem(dst.code(), base, disp);
    }

    /// MOVZX r32, r8
    pub fn movzx_rr8(&mut self, dst: Reg, src: Reg) {
        // REX keeps codes 4-7 as SPL/BPL/SIL/DIL
        let force = matches!(src, Reg::Rsp | Reg::Rbp | Reg::Rsi | Reg::Rdi);
        self.emit_rex(false, dst as u8, src as u8, force);
        self.buf.emit_bytes(&[0x0F, 0xB6]);
        self.buf.emit_u8(Self::modrm(0b11, dst.code(), src.code()));
    }

    // ==================== Integer Arithmetic ====================

    /// ADD r64, r64
    pub fn add_rr(&mut self, dst: Reg, src: Reg) {
        self.emit_rr(true, &[0x01], src, dst);
    }

    /// ADD r64, imm32 (sign-extended)
    pub fn add_ri32(&mut self, dst: Reg, imm: i32) {
        self.emit_alu_ri(true, 0, dst, imm);
    }

    /// SUB r64, imm32 (sign-extended)
    pub fn sub_ri32(&mut self, dst: Reg, imm: i32) {
        self.emit_alu_ri(true, 5, dst, imm);
    }

    /// IMUL r64, r64, imm32 (signed multiply with immediate)
    pub fn imul_rri32(&mut self, dst: Reg, src: Reg, imm: i32) {
        self.emit_rex(true, dst as u8, src as u8, false);
        if (-128..=127).contains(&imm) {
            self.buf.emit_u8(0x6B);
            self.buf.emit_u8(Self::modrm(0b11, dst.code(), src.code()));
            self.buf.emit_u8(imm as u8);
        } else {
            self.buf.emit_u8(0x69);
            self.buf.emit_u8(Self::modrm(0b11, dst.code(), src.code()));
            self.buf.emit_u32(imm as u32);
        }
    }

    /// ADD r32, r32
    pub fn add_rr32(&mut self, dst: Reg, src: Reg) {
        self.emit_rr(false, &[0x01], src, dst);
    }

    /// SUB r32, r32
    pub fn sub_rr32(&mut self, dst: Reg, src: Reg) {
        self.emit_rr(false, &[0x29], src, dst);
    }

    /// IMUL r32, r32
    pub fn imul_rr32(&mut self, dst: Reg, src: Reg) {
        self.emit_rr(false, &[0x0F, 0xAF], dst, src);
    }

    /// IDIV r32 (signed divide EDX:EAX, quotient in EAX)
    pub fn idiv_r32(&mut self, src: Reg) {
        self.emit_rex(false, 0, src as u8, false);
        self.buf.emit_u8(0xF7);
        self.buf.emit_u8(Self::modrm(0b11, 7, src.code()));
    }

    /// CDQ (sign-extend EAX into EDX:EAX, needed before IDIV)
    pub fn cdq(&mut self) {
        self.buf.emit_u8(0x99);
    }

    /// AND r32, r32
    pub fn and_rr32(&mut self, dst: Reg, src: Reg) {
        self.emit_rr(false, &[0x21], src, dst);
    }

    /// OR r32, r32
    pub fn or_rr32(&mut self, dst: Reg, src: Reg) {
        self.emit_rr(false, &[0x09], src, dst);
    }

    /// XOR r32, imm32
    pub fn xor_ri32(&mut self, dst: Reg, imm: i32) {
        self.emit_alu_ri(false, 6, dst, imm);
    }

    /// CMP r64, r64
    pub fn cmp_rr(&mut self, dst: Reg, src: Reg) {
        self.emit_rr(true, &[0x39], src, dst);
    }

    /// CMP r32, r32
    pub fn cmp_rr32(&mut self, dst: Reg, src: Reg) {
        self.emit_rr(false, &[0x39], src, dst);
    }

    /// CMP r64, imm32 (sign-extended)
    pub fn cmp_ri32(&mut self, dst: Reg, imm: i32) {
        self.emit_alu_ri(true, 7, dst, imm);
    }

    /// CMP r32, imm32
    pub fn cmp_r32_i32(&mut self, dst: Reg, imm: i32) {
        self.emit_alu_ri(false, 7, dst, imm);
    }

    /// TEST r64, r64 (bitwise AND, set flags, discard result)
    pub fn test_rr(&mut self, dst: Reg, src: Reg) {
        self.emit_rr(true, &[0x85], src, dst);
    }

    // ==================== SSE Single Precision ====================

    /// MOVSS xmm, DWORD PTR [base + disp]
    pub fn movss_xm(&mut self, dst: Xmm, base: Reg, disp: i32) {
        self.buf.emit_u8(0xF3);
        self.emit_rex(false, dst.code(), base as u8, false);
        self.buf.emit_bytes(&[0x0F, 0x10]);
        self.emit_mem(dst.code(), base, disp);
    }

    /// MOVSS DWORD PTR [base + disp], xmm
    pub fn movss_mx(&mut self, base: Reg, disp: i32, src: Xmm) {
        self.buf.emit_u8(0xF3);
        self.emit_rex(false, src.code(), base as u8, false);
        self.buf.emit_bytes(&[0x0F, 0x11]);
        self.emit_mem(src.code(), base, disp);
    }

    fn emit_sse_rr(&mut self, prefix: Option<u8>, opcode: u8, dst: Xmm, src: Xmm) {
        if let Some(prefix) = prefix {
            self.buf.emit_u8(prefix);
        }
        self.buf.emit_bytes(&[0x0F, opcode]);
        self.buf.emit_u8(Self::modrm(0b11, dst.code(), src.code()));
    }

    /// ADDSS xmm1, xmm2
    pub fn addss(&mut self, dst: Xmm, src: Xmm) {
        self.emit_sse_rr(Some(0xF3), 0x58, dst, src);
    }

    /// SUBSS xmm1, xmm2
    pub fn subss(&mut self, dst: Xmm, src: Xmm) {
        self.emit_sse_rr(Some(0xF3), 0x5C, dst, src);
    }

    /// MULSS xmm1, xmm2
    pub fn mulss(&mut self, dst: Xmm, src: Xmm) {
        self.emit_sse_rr(Some(0xF3), 0x59, dst, src);
    }

    /// DIVSS xmm1, xmm2
    pub fn divss(&mut self, dst: Xmm, src: Xmm) {
        self.emit_sse_rr(Some(0xF3), 0x5E, dst, src);
    }

    /// UCOMISS xmm1, xmm2 (unordered compare, sets ZF/PF/CF)
    pub fn ucomiss(&mut self, lhs: Xmm, rhs: Xmm) {
        self.emit_sse_rr(None, 0x2E, lhs, rhs);
    }

    /// CVTSI2SS xmm, r32
    pub fn cvtsi2ss(&mut self, dst: Xmm, src: Reg) {
        self.buf.emit_u8(0xF3);
        self.emit_rex(false, dst.code(), src as u8, false);
        self.buf.emit_bytes(&[0x0F, 0x2A]);
        self.buf.emit_u8(Self::modrm(0b11, dst.code(), src.code()));
    }

    /// CVTTSS2SI r32, xmm (truncating)
    pub fn cvttss2si(&mut self, dst: Reg, src: Xmm) {
        self.buf.emit_u8(0xF3);
        self.emit_rex(false, dst as u8, src.code(), false);
        self.buf.emit_bytes(&[0x0F, 0x2C]);
        self.buf.emit_u8(Self::modrm(0b11, dst.code(), src.code()));
    }

    // ==================== Stack Operations ====================

    /// PUSH r64
    pub fn push(&mut self, reg: Reg) {
        self.emit_rex(false, 0, reg as u8, false);
        self.buf.emit_u8(0x50 + reg.code());
    }

    /// POP r64
    pub fn pop(&mut self, reg: Reg) {
        self.emit_rex(false, 0, reg as u8, false);
        self.buf.emit_u8(0x58 + reg.code());
    }

    // ==================== Control Flow ====================

    /// JMP rel32 (relative jump, near)
    pub fn jmp_rel32(&mut self, offset: i32) {
        self.buf.emit_u8(0xE9);
        self.buf.emit_u32(offset as u32);
    }

    /// Jcc rel32 (conditional jump, near)
    pub fn jcc_rel32(&mut self, cond: Cond, offset: i32) {
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0x80 + cond as u8);
        self.buf.emit_u32(offset as u32);
    }

    /// CALL rel32 (relative call)
    pub fn call_rel32(&mut self, offset: i32) {
        self.buf.emit_u8(0xE8);
        self.buf.emit_u32(offset as u32);
    }

    /// CALL r64 (indirect call through register)
    pub fn call_r(&mut self, reg: Reg) {
        self.emit_rex(false, 0, reg as u8, false);
        self.buf.emit_u8(0xFF);
        self.buf.emit_u8(Self::modrm(0b11, 2, reg.code()));
    }

    /// RET (return)
    pub fn ret(&mut self) {
        self.buf.emit_u8(0xC3);
    }

    /// INT3 (breakpoint trap)
    pub fn int3(&mut self) {
        self.buf.emit_u8(0xCC);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(f: impl FnOnce(&mut X86_64Assembler<'_>)) -> Vec<u8> {
        let mut buf = CodeBuffer::new();
        let mut asm = X86_64Assembler::new(&mut buf);
        f(&mut asm);
        buf.into_code()
    }

    #[test]
    fn test_mov_rr() {
        // MOV RBP, RSP = 48 89 E5
        assert_eq!(assemble(|a| a.mov_rr(Reg::Rbp, Reg::Rsp)), [0x48, 0x89, 0xE5]);
        // MOV R9, R8 = 4D 89 C1
        assert_eq!(assemble(|a| a.mov_rr(Reg::R9, Reg::R8)), [0x4D, 0x89, 0xC1]);
    }

    #[test]
    fn test_mov_ri64() {
        // MOV RAX, imm64 = 48 B8 F0 DE BC 9A 78 56 34 12
        assert_eq!(
            assemble(|a| a.mov_ri64(Reg::Rax, 0x123456789ABCDEF0u64 as i64)),
            [0x48, 0xB8, 0xF0, 0xDE, 0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12]
        );
        // MOV R10, 42 = 49 BA 2A ...
        assert_eq!(
            assemble(|a| a.mov_ri64(Reg::R10, 42)),
            [0x49, 0xBA, 0x2A, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_mov_rm_frame_slots() {
        // MOV RAX, [RBP-8] = 48 8B 45 F8
        assert_eq!(assemble(|a| a.mov_rm(Reg::Rax, Reg::Rbp, -8)), [0x48, 0x8B, 0x45, 0xF8]);
        // MOV RAX, [RBP+48] = 48 8B 45 30
        assert_eq!(assemble(|a| a.mov_rm(Reg::Rax, Reg::Rbp, 48)), [0x48, 0x8B, 0x45, 0x30]);
        // MOV RAX, [RBP-256] = 48 8B 85 00 FF FF FF
        assert_eq!(
            assemble(|a| a.mov_rm(Reg::Rax, Reg::Rbp, -256)),
            [0x48, 0x8B, 0x85, 0x00, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_mov_rm_special_bases() {
        // MOV RAX, [RBX] = 48 8B 03
        assert_eq!(assemble(|a| a.mov_rm(Reg::Rax, Reg::Rbx, 0)), [0x48, 0x8B, 0x03]);
        // MOV RAX, [RSP+32] = 48 8B 44 24 20
        assert_eq!(
            assemble(|a| a.mov_rm(Reg::Rax, Reg::Rsp, 32)),
            [0x48, 0x8B, 0x44, 0x24, 0x20]
        );
        // MOV RAX, [R12] = 49 8B 04 24
        assert_eq!(assemble(|a| a.mov_rm(Reg::Rax, Reg::R12, 0)), [0x49, 0x8B, 0x04, 0x24]);
        // MOV RAX, [R13] = 49 8B 45 00
        assert_eq!(assemble(|a| a.mov_rm(Reg::Rax, Reg::R13, 0)), [0x49, 0x8B, 0x45, 0x00]);
        // MOV R11, [R10] = 4D 8B 1A
        assert_eq!(assemble(|a| a.mov_rm(Reg::R11, Reg::R10, 0)), [0x4D, 0x8B, 0x1A]);
    }

    #[test]
    fn test_mov_mr() {
        // MOV [RBP-16], RCX = 48 89 4D F0
        assert_eq!(assemble(|a| a.mov_mr(Reg::Rbp, -16, Reg::Rcx)), [0x48, 0x89, 0x4D, 0xF0]);
        // MOV [RSP+32], RAX = 48 89 44 24 20
        assert_eq!(
            assemble(|a| a.mov_mr(Reg::Rsp, 32, Reg::Rax)),
            [0x48, 0x89, 0x44, 0x24, 0x20]
        );
        // MOV [RBP-8], R9 = 4C 89 4D F8
        assert_eq!(assemble(|a| a.mov_mr(Reg::Rbp, -8, Reg::R9)), [0x4C, 0x89, 0x4D, 0xF8]);
    }

    #[test]
    fn test_32bit_moves() {
        // MOV EAX, [RBP-8] = 8B 45 F8
        assert_eq!(assemble(|a| a.mov_rm32(Reg::Rax, Reg::Rbp, -8)), [0x8B, 0x45, 0xF8]);
        // MOV [RBP-16], ECX = 89 4D F0
        assert_eq!(assemble(|a| a.mov_mr32(Reg::Rbp, -16, Reg::Rcx)), [0x89, 0x4D, 0xF0]);
        // MOV ECX, [RAX] = 8B 08
        assert_eq!(assemble(|a| a.mov_rm32(Reg::Rcx, Reg::Rax, 0)), [0x8B, 0x08]);
        // MOV EAX, ECX = 89 C8
        assert_eq!(assemble(|a| a.mov_rr32(Reg::Rax, Reg::Rcx)), [0x89, 0xC8]);
    }

    #[test]
    fn test_mov_mi32() {
        // MOV QWORD PTR [RBP-8], 42 = 48 C7 45 F8 2A 00 00 00
        assert_eq!(
            assemble(|a| a.mov_mi32(Reg::Rbp, -8, 42)),
            [0x48, 0xC7, 0x45, 0xF8, 0x2A, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_byte_moves() {
        // MOVZX RAX, BYTE PTR [RBP-8] = 48 0F B6 45 F8
        assert_eq!(
            assemble(|a| a.movzx_rm8(Reg::Rax, Reg::Rbp, -8)),
            [0x48, 0x0F, 0xB6, 0x45, 0xF8]
        );
        // MOV BYTE PTR [RAX+8], CL = 40 88 48 08
        assert_eq!(assemble(|a| a.mov_mr8(Reg::Rax, 8, Reg::Rcx)), [0x40, 0x88, 0x48, 0x08]);
    }

    #[test]
    fn test_movzx_rr8() {
        // MOVZX EAX, AL = 0F B6 C0
        assert_eq!(assemble(|a| a.movzx_rr8(Reg::Rax, Reg::Rax)), [0x0F, 0xB6, 0xC0]);
    }

    #[test]
    fn test_stack_pointer_adjust() {
        // SUB RSP, 32 = 48 83 EC 20
        assert_eq!(assemble(|a| a.sub_ri32(Reg::Rsp, 32)), [0x48, 0x83, 0xEC, 0x20]);
        // ADD RSP, 256 = 48 81 C4 00 01 00 00
        assert_eq!(
            assemble(|a| a.add_ri32(Reg::Rsp, 256)),
            [0x48, 0x81, 0xC4, 0x00, 0x01, 0x00, 0x00]
        );
        // ADD R11, 1 = 49 83 C3 01
        assert_eq!(assemble(|a| a.add_ri32(Reg::R11, 1)), [0x49, 0x83, 0xC3, 0x01]);
    }

    #[test]
    fn test_int_arithmetic() {
        // ADD EAX, ECX = 01 C8
        assert_eq!(assemble(|a| a.add_rr32(Reg::Rax, Reg::Rcx)), [0x01, 0xC8]);
        // SUB EAX, ECX = 29 C8
        assert_eq!(assemble(|a| a.sub_rr32(Reg::Rax, Reg::Rcx)), [0x29, 0xC8]);
        // IMUL EAX, ECX = 0F AF C1
        assert_eq!(assemble(|a| a.imul_rr32(Reg::Rax, Reg::Rcx)), [0x0F, 0xAF, 0xC1]);
        // CDQ; IDIV ECX = 99 F7 F9
        assert_eq!(
            assemble(|a| {
                a.cdq();
                a.idiv_r32(Reg::Rcx);
            }),
            [0x99, 0xF7, 0xF9]
        );
        // IMUL RCX, RCX, 4 = 48 6B C9 04
        assert_eq!(
            assemble(|a| a.imul_rri32(Reg::Rcx, Reg::Rcx, 4)),
            [0x48, 0x6B, 0xC9, 0x04]
        );
        // ADD RAX, RCX = 48 01 C8
        assert_eq!(assemble(|a| a.add_rr(Reg::Rax, Reg::Rcx)), [0x48, 0x01, 0xC8]);
    }

    #[test]
    fn test_logic() {
        // AND EAX, ECX = 21 C8
        assert_eq!(assemble(|a| a.and_rr32(Reg::Rax, Reg::Rcx)), [0x21, 0xC8]);
        // OR EAX, ECX = 09 C8
        assert_eq!(assemble(|a| a.or_rr32(Reg::Rax, Reg::Rcx)), [0x09, 0xC8]);
        // XOR EAX, 1 = 83 F0 01
        assert_eq!(assemble(|a| a.xor_ri32(Reg::Rax, 1)), [0x83, 0xF0, 0x01]);
    }

    #[test]
    fn test_compares() {
        // CMP EAX, ECX = 39 C8
        assert_eq!(assemble(|a| a.cmp_rr32(Reg::Rax, Reg::Rcx)), [0x39, 0xC8]);
        // CMP RAX, RCX = 48 39 C8
        assert_eq!(assemble(|a| a.cmp_rr(Reg::Rax, Reg::Rcx)), [0x48, 0x39, 0xC8]);
        // CMP ECX, 0 = 83 F9 00
        assert_eq!(assemble(|a| a.cmp_r32_i32(Reg::Rcx, 0)), [0x83, 0xF9, 0x00]);
        // CMP R11, 1000 = 49 81 FB E8 03 00 00
        assert_eq!(
            assemble(|a| a.cmp_ri32(Reg::R11, 1000)),
            [0x49, 0x81, 0xFB, 0xE8, 0x03, 0x00, 0x00]
        );
        // TEST RAX, RAX = 48 85 C0
        assert_eq!(assemble(|a| a.test_rr(Reg::Rax, Reg::Rax)), [0x48, 0x85, 0xC0]);
    }

    #[test]
    fn test_sse_single() {
        // MOVSS XMM0, [RBP-8] = F3 0F 10 45 F8
        assert_eq!(
            assemble(|a| a.movss_xm(Xmm::Xmm0, Reg::Rbp, -8)),
            [0xF3, 0x0F, 0x10, 0x45, 0xF8]
        );
        // MOVSS [RBP-8], XMM1 = F3 0F 11 4D F8
        assert_eq!(
            assemble(|a| a.movss_mx(Reg::Rbp, -8, Xmm::Xmm1)),
            [0xF3, 0x0F, 0x11, 0x4D, 0xF8]
        );
        // ADDSS XMM0, XMM1 = F3 0F 58 C1
        assert_eq!(assemble(|a| a.addss(Xmm::Xmm0, Xmm::Xmm1)), [0xF3, 0x0F, 0x58, 0xC1]);
        // SUBSS XMM0, XMM1 = F3 0F 5C C1
        assert_eq!(assemble(|a| a.subss(Xmm::Xmm0, Xmm::Xmm1)), [0xF3, 0x0F, 0x5C, 0xC1]);
        // MULSS XMM0, XMM1 = F3 0F 59 C1
        assert_eq!(assemble(|a| a.mulss(Xmm::Xmm0, Xmm::Xmm1)), [0xF3, 0x0F, 0x59, 0xC1]);
        // DIVSS XMM0, XMM1 = F3 0F 5E C1
        assert_eq!(assemble(|a| a.divss(Xmm::Xmm0, Xmm::Xmm1)), [0xF3, 0x0F, 0x5E, 0xC1]);
        // UCOMISS XMM0, XMM1 = 0F 2E C1
        assert_eq!(assemble(|a| a.ucomiss(Xmm::Xmm0, Xmm::Xmm1)), [0x0F, 0x2E, 0xC1]);
    }

    #[test]
    fn test_float_conversions() {
        // CVTSI2SS XMM0, EAX = F3 0F 2A C0
        assert_eq!(assemble(|a| a.cvtsi2ss(Xmm::Xmm0, Reg::Rax)), [0xF3, 0x0F, 0x2A, 0xC0]);
        // CVTTSS2SI EAX, XMM0 = F3 0F 2C C0
        assert_eq!(assemble(|a| a.cvttss2si(Reg::Rax, Xmm::Xmm0)), [0xF3, 0x0F, 0x2C, 0xC0]);
    }

    #[test]
    fn test_push_pop() {
        // PUSH RBP = 55, PUSH R12 = 41 54, POP R12 = 41 5C, POP RBP = 5D
        assert_eq!(
            assemble(|a| {
                a.push(Reg::Rbp);
                a.push(Reg::R12);
                a.pop(Reg::R12);
                a.pop(Reg::Rbp);
            }),
            [0x55, 0x41, 0x54, 0x41, 0x5C, 0x5D]
        );
    }

    #[test]
    fn test_control_flow() {
        // JMP +16 = E9 10 00 00 00
        assert_eq!(assemble(|a| a.jmp_rel32(0x10)), [0xE9, 0x10, 0x00, 0x00, 0x00]);
        // JE +16 = 0F 84 10 00 00 00
        assert_eq!(
            assemble(|a| a.jcc_rel32(Cond::E, 0x10)),
            [0x0F, 0x84, 0x10, 0x00, 0x00, 0x00]
        );
        // JAE +0 = 0F 83 00 00 00 00
        assert_eq!(assemble(|a| a.jcc_rel32(Cond::Ae, 0)), [0x0F, 0x83, 0, 0, 0, 0]);
        // CALL +16 = E8 10 00 00 00
        assert_eq!(assemble(|a| a.call_rel32(0x10)), [0xE8, 0x10, 0x00, 0x00, 0x00]);
        // CALL RAX = FF D0
        assert_eq!(assemble(|a| a.call_r(Reg::Rax)), [0xFF, 0xD0]);
        // CALL R12 = 41 FF D4
        assert_eq!(assemble(|a| a.call_r(Reg::R12)), [0x41, 0xFF, 0xD4]);
        assert_eq!(assemble(|a| a.ret()), [0xC3]);
        assert_eq!(assemble(|a| a.int3()), [0xCC]);
    }

    #[test]
    fn test_encoded_lengths() {
        assert_eq!(assemble(|a| a.jmp_rel32(0)).len(), JMP_REL32_LEN);
        assert_eq!(assemble(|a| a.jcc_rel32(Cond::L, 0)).len(), JCC_REL32_LEN);
        assert_eq!(assemble(|a| a.call_rel32(0)).len(), CALL_REL32_LEN);

        let code = assemble(|a| a.mov_ri64(Reg::Rax, 0x1122334455667788));
        assert_eq!(code[MOV_IMM64_OFFSET], 0x88);
    }
}
