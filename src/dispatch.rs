//! Instruction dispatch shared by the verifier and the code generator.
//!
//! Each pass implements [`InstructionPass`] once per opcode family and
//! [`dispatch`] is the only place that maps instructions to handlers.

use crate::bytecode::{ArithmeticOp, Condition, Instruction, LogicOp};
use crate::types::TypeId;

/// A pass over the instructions of one function. `D` is the per-function
/// state of the pass.
pub trait InstructionPass<D> {
    type Error;

    fn nop(&mut self, data: &mut D, index: usize) -> Result<(), Self::Error>;
    fn pop(&mut self, data: &mut D, index: usize) -> Result<(), Self::Error>;
    fn duplicate(&mut self, data: &mut D, index: usize) -> Result<(), Self::Error>;

    fn load_int(&mut self, data: &mut D, index: usize, value: i32) -> Result<(), Self::Error>;
    fn load_float(&mut self, data: &mut D, index: usize, value: f32) -> Result<(), Self::Error>;
    fn load_bool(&mut self, data: &mut D, index: usize, value: bool) -> Result<(), Self::Error>;
    fn load_null(&mut self, data: &mut D, index: usize) -> Result<(), Self::Error>;

    fn arithmetic(&mut self, data: &mut D, index: usize, op: ArithmeticOp)
    -> Result<(), Self::Error>;
    fn logic(&mut self, data: &mut D, index: usize, op: LogicOp) -> Result<(), Self::Error>;
    fn not(&mut self, data: &mut D, index: usize) -> Result<(), Self::Error>;
    fn convert_int_to_float(&mut self, data: &mut D, index: usize) -> Result<(), Self::Error>;
    fn convert_float_to_int(&mut self, data: &mut D, index: usize) -> Result<(), Self::Error>;
    fn compare(&mut self, data: &mut D, index: usize, cond: Condition) -> Result<(), Self::Error>;

    fn load_local(&mut self, data: &mut D, index: usize, local: u32) -> Result<(), Self::Error>;
    fn store_local(&mut self, data: &mut D, index: usize, local: u32) -> Result<(), Self::Error>;
    fn load_argument(&mut self, data: &mut D, index: usize, arg: u32) -> Result<(), Self::Error>;

    fn call(
        &mut self,
        data: &mut D,
        index: usize,
        name: &str,
        params: &[TypeId],
    ) -> Result<(), Self::Error>;
    fn call_instance(
        &mut self,
        data: &mut D,
        index: usize,
        class: TypeId,
        name: &str,
        params: &[TypeId],
    ) -> Result<(), Self::Error>;
    fn new_object(
        &mut self,
        data: &mut D,
        index: usize,
        class: TypeId,
        params: &[TypeId],
    ) -> Result<(), Self::Error>;
    fn ret(&mut self, data: &mut D, index: usize) -> Result<(), Self::Error>;

    fn branch(&mut self, data: &mut D, index: usize, target: u32) -> Result<(), Self::Error>;
    fn conditional_branch(
        &mut self,
        data: &mut D,
        index: usize,
        cond: Condition,
        target: u32,
    ) -> Result<(), Self::Error>;

    fn new_array(&mut self, data: &mut D, index: usize, element: TypeId) -> Result<(), Self::Error>;
    fn load_element(
        &mut self,
        data: &mut D,
        index: usize,
        element: TypeId,
    ) -> Result<(), Self::Error>;
    fn store_element(
        &mut self,
        data: &mut D,
        index: usize,
        element: TypeId,
    ) -> Result<(), Self::Error>;
    fn load_array_length(&mut self, data: &mut D, index: usize) -> Result<(), Self::Error>;

    fn load_field(
        &mut self,
        data: &mut D,
        index: usize,
        class: TypeId,
        field: &str,
    ) -> Result<(), Self::Error>;
    fn store_field(
        &mut self,
        data: &mut D,
        index: usize,
        class: TypeId,
        field: &str,
    ) -> Result<(), Self::Error>;
}

/// Route one instruction to the matching handler of `pass`.
pub fn dispatch<D, P>(
    pass: &mut P,
    data: &mut D,
    index: usize,
    instruction: &Instruction,
) -> Result<(), P::Error>
where
    P: InstructionPass<D> + ?Sized,
{
    match instruction {
        Instruction::Nop => pass.nop(data, index),
        Instruction::Pop => pass.pop(data, index),
        Instruction::Duplicate => pass.duplicate(data, index),

        Instruction::LoadInt(value) => pass.load_int(data, index, *value),
        Instruction::LoadFloat(value) => pass.load_float(data, index, *value),
        Instruction::LoadTrue => pass.load_bool(data, index, true),
        Instruction::LoadFalse => pass.load_bool(data, index, false),
        Instruction::LoadNull => pass.load_null(data, index),

        Instruction::Add => pass.arithmetic(data, index, ArithmeticOp::Add),
        Instruction::Sub => pass.arithmetic(data, index, ArithmeticOp::Sub),
        Instruction::Mul => pass.arithmetic(data, index, ArithmeticOp::Mul),
        Instruction::Div => pass.arithmetic(data, index, ArithmeticOp::Div),

        Instruction::And => pass.logic(data, index, LogicOp::And),
        Instruction::Or => pass.logic(data, index, LogicOp::Or),
        Instruction::Not => pass.not(data, index),

        Instruction::ConvertIntToFloat => pass.convert_int_to_float(data, index),
        Instruction::ConvertFloatToInt => pass.convert_float_to_int(data, index),

        Instruction::CompareEqual => pass.compare(data, index, Condition::Equal),
        Instruction::CompareNotEqual => pass.compare(data, index, Condition::NotEqual),
        Instruction::CompareGreaterThan => pass.compare(data, index, Condition::GreaterThan),
        Instruction::CompareGreaterThanOrEqual => {
            pass.compare(data, index, Condition::GreaterThanOrEqual)
        }
        Instruction::CompareLessThan => pass.compare(data, index, Condition::LessThan),
        Instruction::CompareLessThanOrEqual => pass.compare(data, index, Condition::LessThanOrEqual),

        Instruction::LoadLocal(local) => pass.load_local(data, index, *local),
        Instruction::StoreLocal(local) => pass.store_local(data, index, *local),
        Instruction::LoadArgument(arg) => pass.load_argument(data, index, *arg),

        Instruction::Call { name, params } => pass.call(data, index, name, params),
        Instruction::CallInstance {
            class,
            name,
            params,
        } => pass.call_instance(data, index, *class, name, params),
        Instruction::NewObject { class, params } => pass.new_object(data, index, *class, params),
        Instruction::Return => pass.ret(data, index),

        Instruction::Branch(target) => pass.branch(data, index, *target),
        Instruction::BranchEqual(target) => {
            pass.conditional_branch(data, index, Condition::Equal, *target)
        }
        Instruction::BranchNotEqual(target) => {
            pass.conditional_branch(data, index, Condition::NotEqual, *target)
        }
        Instruction::BranchGreaterThan(target) => {
            pass.conditional_branch(data, index, Condition::GreaterThan, *target)
        }
        Instruction::BranchGreaterThanOrEqual(target) => {
            pass.conditional_branch(data, index, Condition::GreaterThanOrEqual, *target)
        }
        Instruction::BranchLessThan(target) => {
            pass.conditional_branch(data, index, Condition::LessThan, *target)
        }
        Instruction::BranchLessThanOrEqual(target) => {
            pass.conditional_branch(data, index, Condition::LessThanOrEqual, *target)
        }

        Instruction::NewArray(element) => pass.new_array(data, index, *element),
        Instruction::LoadElement(element) => pass.load_element(data, index, *element),
        Instruction::StoreElement(element) => pass.store_element(data, index, *element),
        Instruction::LoadArrayLength => pass.load_array_length(data, index),

        Instruction::LoadField { class, field } => pass.load_field(data, index, *class, field),
        Instruction::StoreField { class, field } => pass.store_field(data, index, *class, field),
    }
}
