//! Bytecode to x86-64 code generator.
//!
//! Walks a verified function through the shared dispatch skeleton and
//! emits one native sequence per instruction. Operands live in frame
//! slots (see [`FrameLayout`]); RAX/RCX/RDX and XMM0/XMM1 are scratch
//! registers within a single instruction. Nothing is cached in registers
//! across instructions.
//!
//! Calls, branches and guard jumps are emitted with zero placeholders and
//! recorded in the unresolved maps of [`CompilationData`], which the
//! linker drains.

use std::collections::BTreeMap;

use tracing::debug;

use super::calling_convention::{
    ArgumentLocation, SHADOW_SPACE, argument_location, call_area_size,
    incoming_stack_argument_offset,
};
use super::codebuf::CodeBuffer;
use super::handlers::GuardHandlers;
use super::operand_stack::{FrameLayout, OperandStack};
use super::x86_64::{
    Cond, JCC_REL32_LEN, JMP_REL32_LEN, Reg, X86_64Assembler, Xmm,
};
use super::{JitError, RuntimeHooks};
use crate::bytecode::{
    ArithmeticOp, Binder, CONSTRUCTOR_NAME, Condition, FunctionDefinition, FunctionId,
    FunctionKind, LogicOp, ManagedFunction, function_signature, member_function_signature,
};
use crate::dispatch::{InstructionPass, dispatch};
use crate::types::{TypeId, TypeRegistry};

/// Size of the header in front of array elements: an i32 length plus
/// padding so 8-byte elements stay aligned.
pub const ARRAY_HEADER_SIZE: i32 = 8;

/// A branch waiting for its target's native offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnresolvedBranch {
    /// Target instruction index
    pub target: usize,
    /// Encoded length of the jump (5 for jmp, 6 for jcc)
    pub length: usize,
}

/// A call waiting for its callee's entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnresolvedCall {
    pub callee: FunctionId,
    /// Managed callees use `call rel32`, external ones `mov rax, imm64`
    pub kind: FunctionKind,
}

/// Per-function code generation state.
pub struct CompilationData<'f> {
    function: &'f ManagedFunction,
    definition: &'f FunctionDefinition,
    stack: OperandStack,
    buf: CodeBuffer,
    instruction_offsets: Vec<usize>,
    unresolved_branches: BTreeMap<usize, UnresolvedBranch>,
    unresolved_calls: BTreeMap<usize, UnresolvedCall>,
    unresolved_native_labels: BTreeMap<usize, usize>,
}

impl<'f> CompilationData<'f> {
    fn new(function: &'f ManagedFunction, definition: &'f FunctionDefinition) -> Self {
        let layout = FrameLayout::new(
            definition.parameters().len(),
            function.locals().len(),
            function.max_stack_depth(),
        );
        Self {
            function,
            definition,
            stack: OperandStack::new(layout),
            buf: CodeBuffer::with_capacity(function.instructions().len() * 16),
            instruction_offsets: Vec::with_capacity(function.instructions().len()),
            unresolved_branches: BTreeMap::new(),
            unresolved_calls: BTreeMap::new(),
            unresolved_native_labels: BTreeMap::new(),
        }
    }

    fn asm(&mut self) -> X86_64Assembler<'_> {
        X86_64Assembler::new(&mut self.buf)
    }

    fn layout(&self) -> FrameLayout {
        *self.stack.layout()
    }

    /// Operand type `from_top` entries below the top before `index`.
    fn operand_type(&self, index: usize, from_top: usize) -> Result<TypeId, JitError> {
        let types = self.function.operand_types(index);
        types
            .len()
            .checked_sub(from_top + 1)
            .map(|i| types[i])
            .ok_or_else(|| JitError::Internal(format!("no operand type at instruction {}", index)))
    }

    fn into_compiled(self) -> CompiledFunction {
        CompiledFunction {
            id: self.function.id(),
            code: self.buf,
            instruction_offsets: self.instruction_offsets,
            unresolved_branches: self.unresolved_branches,
            unresolved_calls: self.unresolved_calls,
            unresolved_native_labels: self.unresolved_native_labels,
        }
    }
}

/// Native code of one function, not yet linked.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub(crate) id: FunctionId,
    pub(crate) code: CodeBuffer,
    pub(crate) instruction_offsets: Vec<usize>,
    pub(crate) unresolved_branches: BTreeMap<usize, UnresolvedBranch>,
    pub(crate) unresolved_calls: BTreeMap<usize, UnresolvedCall>,
    pub(crate) unresolved_native_labels: BTreeMap<usize, usize>,
}

impl CompiledFunction {
    pub fn id(&self) -> FunctionId {
        self.id
    }

    pub fn code(&self) -> &[u8] {
        self.code.code()
    }

    /// Native offset of each instruction.
    pub fn instruction_offsets(&self) -> &[usize] {
        &self.instruction_offsets
    }

    pub fn unresolved_branches(&self) -> &BTreeMap<usize, UnresolvedBranch> {
        &self.unresolved_branches
    }

    pub fn unresolved_calls(&self) -> &BTreeMap<usize, UnresolvedCall> {
        &self.unresolved_calls
    }

    pub fn unresolved_native_labels(&self) -> &BTreeMap<usize, usize> {
        &self.unresolved_native_labels
    }
}

/// How a value of some type is held in a frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    /// Int and Bool, low 32 bits
    Int32,
    Float,
    /// Arrays, objects and null, 64 bits
    Reference,
}

/// How a comparison's flags decide the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagTest {
    /// True when the condition holds
    Jump(Cond),
    /// `ucomiss` equality: ZF set and PF clear
    OrderedEqual,
    /// `ucomiss` inequality: ZF clear or PF set
    UnorderedNotEqual,
}

impl FlagTest {
    /// Conditional jumps in emission order, each paired with the outcome
    /// it selects when taken. Falling through all of them means false.
    fn jumps(self) -> Vec<(Cond, bool)> {
        match self {
            FlagTest::Jump(cond) => vec![(cond, true)],
            FlagTest::OrderedEqual => vec![(Cond::P, false), (Cond::E, true)],
            FlagTest::UnorderedNotEqual => vec![(Cond::P, true), (Cond::Ne, true)],
        }
    }
}

/// Generates native code for verified functions.
pub struct CodeGenerator<'a> {
    types: &'a TypeRegistry,
    binder: &'a Binder,
    handlers: &'a GuardHandlers,
    hooks: &'a RuntimeHooks,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(
        types: &'a TypeRegistry,
        binder: &'a Binder,
        handlers: &'a GuardHandlers,
        hooks: &'a RuntimeHooks,
    ) -> Self {
        Self {
            types,
            binder,
            handlers,
            hooks,
        }
    }

    /// Generate code for a verified function.
    pub fn generate(&mut self, function: &ManagedFunction) -> Result<CompiledFunction, JitError> {
        if !function.is_verified() {
            return Err(JitError::Internal(
                "function must be verified before code generation".to_string(),
            ));
        }

        let definition = self.binder.definition(function.id());
        let mut data = CompilationData::new(function, definition);

        self.emit_prolog(&mut data)?;

        for (index, instruction) in function.instructions().iter().enumerate() {
            let offset = data.buf.offset();
            data.instruction_offsets.push(offset);
            data.stack.reset(function.operand_types(index).len())?;
            dispatch(self, &mut data, index, instruction)?;
        }

        debug!(
            function = %definition.name(),
            code_size = data.buf.len(),
            calls = data.unresolved_calls.len(),
            branches = data.unresolved_branches.len(),
            guards = data.unresolved_native_labels.len(),
            "compiled function"
        );

        Ok(data.into_compiled())
    }

    fn slot_kind(&self, ty: TypeId) -> SlotKind {
        if ty == TypeId::FLOAT {
            SlotKind::Float
        } else if self.types.is_reference(ty) {
            SlotKind::Reference
        } else {
            SlotKind::Int32
        }
    }

    // ==================== Frame ====================

    fn emit_prolog(&self, data: &mut CompilationData<'_>) -> Result<(), JitError> {
        let layout = data.layout();
        let params: Vec<TypeId> = data.definition.parameters().to_vec();
        let local_count = data.function.locals().len();

        let mut asm = data.asm();
        asm.push(Reg::Rbp);
        asm.mov_rr(Reg::Rbp, Reg::Rsp);
        asm.sub_ri32(Reg::Rsp, layout.frame_size());

        // Spill incoming arguments into their parameter slots. Native
        // callers only define the low byte of a Bool.
        for (i, &ty) in params.iter().enumerate() {
            let slot = layout.parameter(i);
            let is_bool = ty == TypeId::BOOL;
            match argument_location(i, ty == TypeId::FLOAT) {
                ArgumentLocation::Register(reg) => {
                    if is_bool {
                        asm.movzx_rr8(reg, reg);
                    }
                    asm.mov_mr(Reg::Rbp, slot, reg);
                }
                ArgumentLocation::FloatRegister(xmm) => asm.movss_mx(Reg::Rbp, slot, xmm),
                ArgumentLocation::Stack(_) => {
                    asm.mov_rm(Reg::Rax, Reg::Rbp, incoming_stack_argument_offset(i));
                    if is_bool {
                        asm.movzx_rr8(Reg::Rax, Reg::Rax);
                    }
                    asm.mov_mr(Reg::Rbp, slot, Reg::Rax);
                }
            }
        }

        for i in 0..local_count {
            asm.mov_mi32(Reg::Rbp, layout.local(i), 0);
        }

        // Call depth guard
        asm.mov_ri64(Reg::R10, self.hooks.call_depth as i64);
        asm.mov_rm(Reg::R11, Reg::R10, 0);
        asm.add_ri32(Reg::R11, 1);
        asm.mov_mr(Reg::R10, 0, Reg::R11);
        asm.cmp_ri32(Reg::R11, self.hooks.call_depth_limit);
        drop(asm);
        self.emit_guard(data, Cond::G, self.handlers.stack_overflow);
        Ok(())
    }

    fn emit_epilog(&self, data: &mut CompilationData<'_>) {
        let mut asm = data.asm();
        asm.mov_ri64(Reg::R10, self.hooks.call_depth as i64);
        asm.mov_rm(Reg::R11, Reg::R10, 0);
        asm.sub_ri32(Reg::R11, 1);
        asm.mov_mr(Reg::R10, 0, Reg::R11);
        asm.mov_rr(Reg::Rsp, Reg::Rbp);
        asm.pop(Reg::Rbp);
        asm.ret();
    }

    // ==================== Helpers ====================

    /// `jcc rel32` to a guard handler, patched by the linker.
    fn emit_guard(&self, data: &mut CompilationData<'_>, cond: Cond, handler: usize) {
        let offset = data.buf.offset();
        data.asm().jcc_rel32(cond, 0);
        data.unresolved_native_labels.insert(offset, handler);
    }

    /// Null check of the reference in RAX.
    fn emit_null_check(&self, data: &mut CompilationData<'_>) {
        data.asm().test_rr(Reg::Rax, Reg::Rax);
        self.emit_guard(data, Cond::E, self.handlers.null_reference);
    }

    /// Load array reference from `array_slot` into RAX and the index from
    /// `index_slot` into RCX, check both, and leave the element address
    /// minus the header in RAX.
    fn emit_element_address(
        &self,
        data: &mut CompilationData<'_>,
        array_slot: i32,
        index_slot: i32,
        element_size: i32,
    ) {
        data.asm().mov_rm(Reg::Rax, Reg::Rbp, array_slot);
        self.emit_null_check(data);

        let mut asm = data.asm();
        asm.mov_rm32(Reg::Rcx, Reg::Rbp, index_slot);
        asm.mov_rm32(Reg::Rdx, Reg::Rax, 0);
        // Unsigned compare also rejects negative indices
        asm.cmp_rr32(Reg::Rcx, Reg::Rdx);
        drop(asm);
        self.emit_guard(data, Cond::Ae, self.handlers.index_out_of_bounds);

        let mut asm = data.asm();
        asm.imul_rri32(Reg::Rcx, Reg::Rcx, element_size);
        asm.add_rr(Reg::Rax, Reg::Rcx);
    }

    fn load_memory(asm: &mut X86_64Assembler<'_>, dst: Reg, base: Reg, disp: i32, size: usize) {
        match size {
            1 => asm.movzx_rm8(dst, base, disp),
            4 => asm.mov_rm32(dst, base, disp),
            _ => asm.mov_rm(dst, base, disp),
        }
    }

    fn store_memory(asm: &mut X86_64Assembler<'_>, base: Reg, disp: i32, src: Reg, size: usize) {
        match size {
            1 => asm.mov_mr8(base, disp, src),
            4 => asm.mov_mr32(base, disp, src),
            _ => asm.mov_mr(base, disp, src),
        }
    }

    fn copy_slot(data: &mut CompilationData<'_>, dst: i32, src: i32) {
        let mut asm = data.asm();
        asm.mov_rm(Reg::Rax, Reg::Rbp, src);
        asm.mov_mr(Reg::Rbp, dst, Reg::Rax);
    }

    /// Materialise a comparison result: 1 if `test` holds, else 0.
    fn emit_set_on_condition(
        &self,
        data: &mut CompilationData<'_>,
        test: FlagTest,
        result: i32,
    ) -> Result<(), JitError> {
        let mut to_true = Vec::new();
        let mut to_false = Vec::new();
        for (cond, outcome) in test.jumps() {
            let at = data.buf.offset();
            data.asm().jcc_rel32(cond, 0);
            if outcome {
                to_true.push(at);
            } else {
                to_false.push(at);
            }
        }

        let false_block = data.buf.offset();
        let mut asm = data.asm();
        asm.mov_mi32(Reg::Rbp, result, 0);
        let jump_end = asm.offset();
        asm.jmp_rel32(0);
        let true_block = asm.offset();
        asm.mov_mi32(Reg::Rbp, result, 1);
        let end = asm.offset();

        let mut patched = data.buf.patch_rel32(jump_end, JMP_REL32_LEN, end as i64);
        for at in to_true {
            patched &= data.buf.patch_rel32(at, JCC_REL32_LEN, true_block as i64);
        }
        for at in to_false {
            patched &= data.buf.patch_rel32(at, JCC_REL32_LEN, false_block as i64);
        }
        if !patched {
            return Err(JitError::Internal("comparison jump out of range".to_string()));
        }
        Ok(())
    }

    /// Compare the two operands at `lhs`/`rhs` and return the flag test
    /// that corresponds to `cond` for their type.
    ///
    /// Float ordering tests only use A/AE, swapping the operands for less
    /// than, so an unordered compare (NaN) is false. Equality checks PF.
    fn emit_compare(
        &self,
        data: &mut CompilationData<'_>,
        lhs_type: TypeId,
        rhs_type: TypeId,
        lhs: i32,
        rhs: i32,
        cond: Condition,
    ) -> FlagTest {
        let kind = if self.types.is_reference(lhs_type) || self.types.is_reference(rhs_type) {
            SlotKind::Reference
        } else {
            self.slot_kind(lhs_type)
        };

        let mut asm = data.asm();
        match kind {
            SlotKind::Int32 => {
                asm.mov_rm32(Reg::Rax, Reg::Rbp, lhs);
                asm.mov_rm32(Reg::Rcx, Reg::Rbp, rhs);
                asm.cmp_rr32(Reg::Rax, Reg::Rcx);
                FlagTest::Jump(signed_condition(cond))
            }
            SlotKind::Float => {
                asm.movss_xm(Xmm::Xmm0, Reg::Rbp, lhs);
                asm.movss_xm(Xmm::Xmm1, Reg::Rbp, rhs);
                match cond {
                    Condition::LessThan | Condition::LessThanOrEqual => {
                        asm.ucomiss(Xmm::Xmm1, Xmm::Xmm0)
                    }
                    _ => asm.ucomiss(Xmm::Xmm0, Xmm::Xmm1),
                }
                match cond {
                    Condition::Equal => FlagTest::OrderedEqual,
                    Condition::NotEqual => FlagTest::UnorderedNotEqual,
                    Condition::GreaterThan | Condition::LessThan => FlagTest::Jump(Cond::A),
                    Condition::GreaterThanOrEqual | Condition::LessThanOrEqual => {
                        FlagTest::Jump(Cond::Ae)
                    }
                }
            }
            SlotKind::Reference => {
                asm.mov_rm(Reg::Rax, Reg::Rbp, lhs);
                asm.mov_rm(Reg::Rcx, Reg::Rbp, rhs);
                asm.cmp_rr(Reg::Rax, Reg::Rcx);
                FlagTest::Jump(unsigned_condition(cond))
            }
        }
    }

    /// Call `callee` with the arguments held in `arguments` (slot offsets,
    /// in parameter order) and push its return value.
    fn emit_call(
        &self,
        data: &mut CompilationData<'_>,
        callee: FunctionId,
        arguments: &[i32],
    ) -> Result<(), JitError> {
        let definition = self.binder.definition(callee);
        let params = definition.parameters();
        if params.len() != arguments.len() {
            return Err(JitError::Internal(format!(
                "call to '{}' with {} arguments, expected {}",
                definition.name(),
                arguments.len(),
                params.len()
            )));
        }

        let area = call_area_size(arguments.len());
        let mut asm = data.asm();
        asm.sub_ri32(Reg::Rsp, area);

        // Stack arguments first, they go through RAX
        for (i, (&slot, &ty)) in arguments.iter().zip(params).enumerate() {
            if let ArgumentLocation::Stack(offset) = argument_location(i, ty == TypeId::FLOAT) {
                asm.mov_rm(Reg::Rax, Reg::Rbp, slot);
                asm.mov_mr(Reg::Rsp, offset, Reg::Rax);
            }
        }
        for (i, (&slot, &ty)) in arguments.iter().zip(params).enumerate() {
            match argument_location(i, ty == TypeId::FLOAT) {
                ArgumentLocation::Register(reg) => asm.mov_rm(reg, Reg::Rbp, slot),
                ArgumentLocation::FloatRegister(xmm) => asm.movss_xm(xmm, Reg::Rbp, slot),
                ArgumentLocation::Stack(_) => {}
            }
        }

        let call_offset = asm.offset();
        match definition.kind() {
            FunctionKind::Managed => asm.call_rel32(0),
            FunctionKind::External => {
                asm.mov_ri64(Reg::Rax, 0);
                asm.call_r(Reg::Rax);
            }
        }
        asm.add_ri32(Reg::Rsp, area);
        drop(asm);

        data.unresolved_calls.insert(
            call_offset,
            UnresolvedCall {
                callee,
                kind: definition.kind(),
            },
        );

        let return_type = definition.return_type();
        if return_type != TypeId::VOID && !definition.is_constructor() {
            let result = data.stack.push()?;
            let kind = self.slot_kind(return_type);
            let mut asm = data.asm();
            match kind {
                SlotKind::Float => asm.movss_mx(Reg::Rbp, result, Xmm::Xmm0),
                SlotKind::Reference => asm.mov_mr(Reg::Rbp, result, Reg::Rax),
                SlotKind::Int32 => {
                    if return_type == TypeId::BOOL {
                        // Native callees only define AL
                        asm.movzx_rr8(Reg::Rax, Reg::Rax);
                    }
                    asm.mov_mr32(Reg::Rbp, result, Reg::Rax);
                }
            }
        }
        Ok(())
    }

    /// Call a runtime helper at a fixed address. Arguments must already be
    /// in registers.
    fn emit_runtime_call(data: &mut CompilationData<'_>, address: usize) {
        let mut asm = data.asm();
        asm.sub_ri32(Reg::Rsp, SHADOW_SPACE);
        asm.mov_ri64(Reg::Rax, address as i64);
        asm.call_r(Reg::Rax);
        asm.add_ri32(Reg::Rsp, SHADOW_SPACE);
    }

    fn lookup(&self, signature: String) -> Result<FunctionId, JitError> {
        self.binder
            .get_function(&signature)
            .ok_or(JitError::UnresolvedSymbol(signature))
    }

    fn field_layout(&self, class: TypeId, field: &str) -> Result<(i32, usize), JitError> {
        self.types
            .field(class, field)
            .map(|f| (f.offset() as i32, f.size()))
            .ok_or_else(|| {
                JitError::Internal(format!(
                    "no field '{}' in '{}'",
                    field,
                    self.types.name(class)
                ))
            })
    }
}

fn signed_condition(cond: Condition) -> Cond {
    match cond {
        Condition::Equal => Cond::E,
        Condition::NotEqual => Cond::Ne,
        Condition::GreaterThan => Cond::G,
        Condition::GreaterThanOrEqual => Cond::Ge,
        Condition::LessThan => Cond::L,
        Condition::LessThanOrEqual => Cond::Le,
    }
}

/// Conditions for pointer compares.
fn unsigned_condition(cond: Condition) -> Cond {
    match cond {
        Condition::Equal => Cond::E,
        Condition::NotEqual => Cond::Ne,
        Condition::GreaterThan => Cond::A,
        Condition::GreaterThanOrEqual => Cond::Ae,
        Condition::LessThan => Cond::B,
        Condition::LessThanOrEqual => Cond::Be,
    }
}

impl<'f> InstructionPass<CompilationData<'f>> for CodeGenerator<'_> {
    type Error = JitError;

    fn nop(&mut self, _data: &mut CompilationData<'f>, _index: usize) -> Result<(), JitError> {
        Ok(())
    }

    fn pop(&mut self, data: &mut CompilationData<'f>, _index: usize) -> Result<(), JitError> {
        data.stack.pop()?;
        Ok(())
    }

    fn duplicate(&mut self, data: &mut CompilationData<'f>, _index: usize) -> Result<(), JitError> {
        let top = data.stack.top()?;
        let copy = data.stack.push()?;
        Self::copy_slot(data, copy, top);
        Ok(())
    }

    fn load_int(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
        value: i32,
    ) -> Result<(), JitError> {
        let slot = data.stack.push()?;
        data.asm().mov_mi32(Reg::Rbp, slot, value);
        Ok(())
    }

    fn load_float(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
        value: f32,
    ) -> Result<(), JitError> {
        let slot = data.stack.push()?;
        data.asm().mov_mi32(Reg::Rbp, slot, value.to_bits() as i32);
        Ok(())
    }

    fn load_bool(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
        value: bool,
    ) -> Result<(), JitError> {
        let slot = data.stack.push()?;
        data.asm().mov_mi32(Reg::Rbp, slot, value as i32);
        Ok(())
    }

    fn load_null(&mut self, data: &mut CompilationData<'f>, _index: usize) -> Result<(), JitError> {
        let slot = data.stack.push()?;
        data.asm().mov_mi32(Reg::Rbp, slot, 0);
        Ok(())
    }

    fn arithmetic(
        &mut self,
        data: &mut CompilationData<'f>,
        index: usize,
        op: ArithmeticOp,
    ) -> Result<(), JitError> {
        let ty = data.operand_type(index, 0)?;
        let rhs = data.stack.pop()?;
        let lhs = data.stack.pop()?;
        let result = data.stack.push()?;

        let mut asm = data.asm();
        if ty == TypeId::FLOAT {
            asm.movss_xm(Xmm::Xmm0, Reg::Rbp, lhs);
            asm.movss_xm(Xmm::Xmm1, Reg::Rbp, rhs);
            match op {
                ArithmeticOp::Add => asm.addss(Xmm::Xmm0, Xmm::Xmm1),
                ArithmeticOp::Sub => asm.subss(Xmm::Xmm0, Xmm::Xmm1),
                ArithmeticOp::Mul => asm.mulss(Xmm::Xmm0, Xmm::Xmm1),
                ArithmeticOp::Div => asm.divss(Xmm::Xmm0, Xmm::Xmm1),
            }
            asm.movss_mx(Reg::Rbp, result, Xmm::Xmm0);
        } else {
            asm.mov_rm32(Reg::Rax, Reg::Rbp, lhs);
            asm.mov_rm32(Reg::Rcx, Reg::Rbp, rhs);
            match op {
                ArithmeticOp::Add => asm.add_rr32(Reg::Rax, Reg::Rcx),
                ArithmeticOp::Sub => asm.sub_rr32(Reg::Rax, Reg::Rcx),
                ArithmeticOp::Mul => asm.imul_rr32(Reg::Rax, Reg::Rcx),
                ArithmeticOp::Div => {
                    asm.cdq();
                    asm.idiv_r32(Reg::Rcx);
                }
            }
            asm.mov_mr32(Reg::Rbp, result, Reg::Rax);
        }
        Ok(())
    }

    fn logic(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
        op: LogicOp,
    ) -> Result<(), JitError> {
        let rhs = data.stack.pop()?;
        let lhs = data.stack.pop()?;
        let result = data.stack.push()?;

        let mut asm = data.asm();
        asm.mov_rm32(Reg::Rax, Reg::Rbp, lhs);
        asm.mov_rm32(Reg::Rcx, Reg::Rbp, rhs);
        match op {
            LogicOp::And => asm.and_rr32(Reg::Rax, Reg::Rcx),
            LogicOp::Or => asm.or_rr32(Reg::Rax, Reg::Rcx),
        }
        asm.mov_mr32(Reg::Rbp, result, Reg::Rax);
        Ok(())
    }

    fn not(&mut self, data: &mut CompilationData<'f>, _index: usize) -> Result<(), JitError> {
        let top = data.stack.top()?;
        let mut asm = data.asm();
        asm.mov_rm32(Reg::Rax, Reg::Rbp, top);
        asm.xor_ri32(Reg::Rax, 1);
        asm.mov_mr32(Reg::Rbp, top, Reg::Rax);
        Ok(())
    }

    fn convert_int_to_float(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
    ) -> Result<(), JitError> {
        let top = data.stack.top()?;
        let mut asm = data.asm();
        asm.mov_rm32(Reg::Rax, Reg::Rbp, top);
        asm.cvtsi2ss(Xmm::Xmm0, Reg::Rax);
        asm.movss_mx(Reg::Rbp, top, Xmm::Xmm0);
        Ok(())
    }

    fn convert_float_to_int(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
    ) -> Result<(), JitError> {
        let top = data.stack.top()?;
        let mut asm = data.asm();
        asm.movss_xm(Xmm::Xmm0, Reg::Rbp, top);
        asm.cvttss2si(Reg::Rax, Xmm::Xmm0);
        asm.mov_mr32(Reg::Rbp, top, Reg::Rax);
        Ok(())
    }

    fn compare(
        &mut self,
        data: &mut CompilationData<'f>,
        index: usize,
        cond: Condition,
    ) -> Result<(), JitError> {
        let lhs_type = data.operand_type(index, 1)?;
        let rhs_type = data.operand_type(index, 0)?;
        let rhs = data.stack.pop()?;
        let lhs = data.stack.pop()?;
        let result = data.stack.push()?;

        let test = self.emit_compare(data, lhs_type, rhs_type, lhs, rhs, cond);
        self.emit_set_on_condition(data, test, result)
    }

    fn load_local(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
        local: u32,
    ) -> Result<(), JitError> {
        let src = data.layout().local(local as usize);
        let dst = data.stack.push()?;
        Self::copy_slot(data, dst, src);
        Ok(())
    }

    fn store_local(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
        local: u32,
    ) -> Result<(), JitError> {
        let dst = data.layout().local(local as usize);
        let src = data.stack.pop()?;
        Self::copy_slot(data, dst, src);
        Ok(())
    }

    fn load_argument(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
        arg: u32,
    ) -> Result<(), JitError> {
        let src = data.layout().parameter(arg as usize);
        let dst = data.stack.push()?;
        Self::copy_slot(data, dst, src);
        Ok(())
    }

    fn call(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
        name: &str,
        params: &[TypeId],
    ) -> Result<(), JitError> {
        let callee = self.lookup(function_signature(self.types, name, params))?;
        let arguments = data.stack.pop_n(params.len())?;
        self.emit_call(data, callee, &arguments)
    }

    fn call_instance(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
        class: TypeId,
        name: &str,
        params: &[TypeId],
    ) -> Result<(), JitError> {
        let callee = self.lookup(member_function_signature(self.types, class, name, params))?;
        let arguments = data.stack.pop_n(params.len() + 1)?;

        data.asm().mov_rm(Reg::Rax, Reg::Rbp, arguments[0]);
        self.emit_null_check(data);
        self.emit_call(data, callee, &arguments)
    }

    fn new_object(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
        class: TypeId,
        params: &[TypeId],
    ) -> Result<(), JitError> {
        let constructor = self.lookup(member_function_signature(
            self.types,
            class,
            CONSTRUCTOR_NAME,
            params,
        ))?;
        let size = self
            .types
            .class_of(class)
            .map(|c| c.size())
            .ok_or_else(|| JitError::Internal(format!("'{}' is not a class", self.types.name(class))))?;

        let scratch = data.layout().scratch();
        let mut asm = data.asm();
        asm.mov_ri64(Reg::Rcx, self.hooks.heap as i64);
        asm.mov_ri64(Reg::Rdx, size as i64);
        drop(asm);
        Self::emit_runtime_call(data, self.hooks.new_object);
        data.asm().mov_mr(Reg::Rbp, scratch, Reg::Rax);

        let mut arguments = vec![scratch];
        arguments.extend(data.stack.pop_n(params.len())?);
        self.emit_call(data, constructor, &arguments)?;

        let result = data.stack.push()?;
        Self::copy_slot(data, result, scratch);
        Ok(())
    }

    fn ret(&mut self, data: &mut CompilationData<'f>, _index: usize) -> Result<(), JitError> {
        let return_type = data.definition.return_type();
        if return_type != TypeId::VOID {
            let top = data.stack.pop()?;
            let kind = self.slot_kind(return_type);
            let mut asm = data.asm();
            match kind {
                SlotKind::Float => asm.movss_xm(Xmm::Xmm0, Reg::Rbp, top),
                SlotKind::Int32 => asm.mov_rm32(Reg::Rax, Reg::Rbp, top),
                SlotKind::Reference => asm.mov_rm(Reg::Rax, Reg::Rbp, top),
            }
        }
        self.emit_epilog(data);
        Ok(())
    }

    fn branch(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
        target: u32,
    ) -> Result<(), JitError> {
        let offset = data.buf.offset();
        data.asm().jmp_rel32(0);
        data.unresolved_branches.insert(
            offset,
            UnresolvedBranch {
                target: target as usize,
                length: JMP_REL32_LEN,
            },
        );
        Ok(())
    }

    fn conditional_branch(
        &mut self,
        data: &mut CompilationData<'f>,
        index: usize,
        cond: Condition,
        target: u32,
    ) -> Result<(), JitError> {
        let lhs_type = data.operand_type(index, 1)?;
        let rhs_type = data.operand_type(index, 0)?;
        let rhs = data.stack.pop()?;
        let lhs = data.stack.pop()?;

        let test = self.emit_compare(data, lhs_type, rhs_type, lhs, rhs, cond);
        let mut not_taken = Vec::new();
        for (cond, outcome) in test.jumps() {
            let offset = data.buf.offset();
            data.asm().jcc_rel32(cond, 0);
            if outcome {
                data.unresolved_branches.insert(
                    offset,
                    UnresolvedBranch {
                        target: target as usize,
                        length: JCC_REL32_LEN,
                    },
                );
            } else {
                not_taken.push(offset);
            }
        }

        let fallthrough = data.buf.offset() as i64;
        for offset in not_taken {
            if !data.buf.patch_rel32(offset, JCC_REL32_LEN, fallthrough) {
                return Err(JitError::Internal("branch skip out of range".to_string()));
            }
        }
        Ok(())
    }

    fn new_array(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
        element: TypeId,
    ) -> Result<(), JitError> {
        let length = data.stack.pop()?;
        let result = data.stack.push()?;

        let mut asm = data.asm();
        asm.mov_rm32(Reg::Rax, Reg::Rbp, length);
        asm.cmp_r32_i32(Reg::Rax, 0);
        drop(asm);
        self.emit_guard(data, Cond::L, self.handlers.invalid_array_size);

        let mut asm = data.asm();
        asm.mov_ri64(Reg::Rcx, self.hooks.heap as i64);
        asm.mov_ri64(Reg::Rdx, self.types.size_of(element) as i64);
        asm.mov_rm32(Reg::R8, Reg::Rbp, length);
        drop(asm);
        Self::emit_runtime_call(data, self.hooks.new_array);
        data.asm().mov_mr(Reg::Rbp, result, Reg::Rax);
        Ok(())
    }

    fn load_element(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
        element: TypeId,
    ) -> Result<(), JitError> {
        let index_slot = data.stack.pop()?;
        let array_slot = data.stack.pop()?;
        let result = data.stack.push()?;
        let size = self.types.size_of(element);

        self.emit_element_address(data, array_slot, index_slot, size as i32);
        let mut asm = data.asm();
        Self::load_memory(&mut asm, Reg::Rcx, Reg::Rax, ARRAY_HEADER_SIZE, size);
        Self::store_memory(&mut asm, Reg::Rbp, result, Reg::Rcx, size.max(4));
        Ok(())
    }

    fn store_element(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
        element: TypeId,
    ) -> Result<(), JitError> {
        let value_slot = data.stack.pop()?;
        let index_slot = data.stack.pop()?;
        let array_slot = data.stack.pop()?;
        let size = self.types.size_of(element);

        self.emit_element_address(data, array_slot, index_slot, size as i32);
        let mut asm = data.asm();
        asm.mov_rm(Reg::Rdx, Reg::Rbp, value_slot);
        Self::store_memory(&mut asm, Reg::Rax, ARRAY_HEADER_SIZE, Reg::Rdx, size);
        Ok(())
    }

    fn load_array_length(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
    ) -> Result<(), JitError> {
        let top = data.stack.top()?;
        data.asm().mov_rm(Reg::Rax, Reg::Rbp, top);
        self.emit_null_check(data);

        let mut asm = data.asm();
        asm.mov_rm32(Reg::Rcx, Reg::Rax, 0);
        asm.mov_mr32(Reg::Rbp, top, Reg::Rcx);
        Ok(())
    }

    fn load_field(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
        class: TypeId,
        field: &str,
    ) -> Result<(), JitError> {
        let (offset, size) = self.field_layout(class, field)?;
        let object = data.stack.pop()?;
        let result = data.stack.push()?;

        data.asm().mov_rm(Reg::Rax, Reg::Rbp, object);
        self.emit_null_check(data);

        let mut asm = data.asm();
        Self::load_memory(&mut asm, Reg::Rcx, Reg::Rax, offset, size);
        Self::store_memory(&mut asm, Reg::Rbp, result, Reg::Rcx, size.max(4));
        Ok(())
    }

    fn store_field(
        &mut self,
        data: &mut CompilationData<'f>,
        _index: usize,
        class: TypeId,
        field: &str,
    ) -> Result<(), JitError> {
        let (offset, size) = self.field_layout(class, field)?;
        let value = data.stack.pop()?;
        let object = data.stack.pop()?;

        data.asm().mov_rm(Reg::Rax, Reg::Rbp, object);
        self.emit_null_check(data);

        let mut asm = data.asm();
        asm.mov_rm(Reg::Rdx, Reg::Rbp, value);
        Self::store_memory(&mut asm, Reg::Rax, offset, Reg::Rdx, size);
        Ok(())
    }
}
