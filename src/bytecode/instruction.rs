//! Bytecode instruction set.

use std::fmt;

use crate::types::{TypeId, TypeRegistry};

/// Name given to constructors in the binder.
pub const CONSTRUCTOR_NAME: &str = ".constructor";

/// A bytecode instruction.
///
/// Type operands are already resolved against the type registry, so the
/// verifier and the code generator only ever consult the registry and the
/// binder, never raw names.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Nop,
    Pop,
    Duplicate,

    // Constants
    LoadInt(i32),
    LoadFloat(f32),
    LoadTrue,
    LoadFalse,
    LoadNull,

    // Arithmetic (Int x Int or Float x Float)
    Add,
    Sub,
    Mul,
    Div,

    // Logic (Bool)
    And,
    Or,
    Not,

    // Conversions
    ConvertIntToFloat,
    ConvertFloatToInt,

    // Comparisons: pop two values of the same type, push Bool
    CompareEqual,
    CompareNotEqual,
    CompareGreaterThan,
    CompareGreaterThanOrEqual,
    CompareLessThan,
    CompareLessThanOrEqual,

    // Locals and arguments
    LoadLocal(u32),
    StoreLocal(u32),
    LoadArgument(u32),

    // Functions
    Call {
        name: String,
        params: Vec<TypeId>,
    },
    CallInstance {
        class: TypeId,
        name: String,
        params: Vec<TypeId>,
    },
    Return,

    // Control flow (targets are instruction indices)
    Branch(u32),
    BranchEqual(u32),
    BranchNotEqual(u32),
    BranchGreaterThan(u32),
    BranchGreaterThanOrEqual(u32),
    BranchLessThan(u32),
    BranchLessThanOrEqual(u32),

    // Arrays
    NewArray(TypeId),
    LoadElement(TypeId),
    StoreElement(TypeId),
    LoadArrayLength,

    // Objects
    NewObject {
        class: TypeId,
        params: Vec<TypeId>,
    },
    LoadField {
        class: TypeId,
        field: String,
    },
    StoreField {
        class: TypeId,
        field: String,
    },
}

/// Comparison performed by `CompareX` and `BranchX` instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl Condition {
    /// Whether the condition only tests (in)equality.
    pub fn is_equality(self) -> bool {
        matches!(self, Condition::Equal | Condition::NotEqual)
    }
}

/// Binary arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Binary boolean operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

impl Instruction {
    /// Mnemonic of the instruction.
    pub fn name(&self) -> &'static str {
        match self {
            Instruction::Nop => "Nop",
            Instruction::Pop => "Pop",
            Instruction::Duplicate => "Duplicate",
            Instruction::LoadInt(_) => "LoadInt",
            Instruction::LoadFloat(_) => "LoadFloat",
            Instruction::LoadTrue => "LoadTrue",
            Instruction::LoadFalse => "LoadFalse",
            Instruction::LoadNull => "LoadNull",
            Instruction::Add => "Add",
            Instruction::Sub => "Sub",
            Instruction::Mul => "Mul",
            Instruction::Div => "Div",
            Instruction::And => "And",
            Instruction::Or => "Or",
            Instruction::Not => "Not",
            Instruction::ConvertIntToFloat => "ConvertIntToFloat",
            Instruction::ConvertFloatToInt => "ConvertFloatToInt",
            Instruction::CompareEqual => "CompareEqual",
            Instruction::CompareNotEqual => "CompareNotEqual",
            Instruction::CompareGreaterThan => "CompareGreaterThan",
            Instruction::CompareGreaterThanOrEqual => "CompareGreaterThanOrEqual",
            Instruction::CompareLessThan => "CompareLessThan",
            Instruction::CompareLessThanOrEqual => "CompareLessThanOrEqual",
            Instruction::LoadLocal(_) => "LoadLocal",
            Instruction::StoreLocal(_) => "StoreLocal",
            Instruction::LoadArgument(_) => "LoadArgument",
            Instruction::Call { .. } => "Call",
            Instruction::CallInstance { .. } => "CallInstance",
            Instruction::Return => "Return",
            Instruction::Branch(_) => "Branch",
            Instruction::BranchEqual(_) => "BranchEqual",
            Instruction::BranchNotEqual(_) => "BranchNotEqual",
            Instruction::BranchGreaterThan(_) => "BranchGreaterThan",
            Instruction::BranchGreaterThanOrEqual(_) => "BranchGreaterThanOrEqual",
            Instruction::BranchLessThan(_) => "BranchLessThan",
            Instruction::BranchLessThanOrEqual(_) => "BranchLessThanOrEqual",
            Instruction::NewArray(_) => "NewArray",
            Instruction::LoadElement(_) => "LoadElement",
            Instruction::StoreElement(_) => "StoreElement",
            Instruction::LoadArrayLength => "LoadArrayLength",
            Instruction::NewObject { .. } => "NewObject",
            Instruction::LoadField { .. } => "LoadField",
            Instruction::StoreField { .. } => "StoreField",
        }
    }

    /// Branch target, if this is a branch.
    pub fn branch_target(&self) -> Option<u32> {
        match self {
            Instruction::Branch(target)
            | Instruction::BranchEqual(target)
            | Instruction::BranchNotEqual(target)
            | Instruction::BranchGreaterThan(target)
            | Instruction::BranchGreaterThanOrEqual(target)
            | Instruction::BranchLessThan(target)
            | Instruction::BranchLessThanOrEqual(target) => Some(*target),
            _ => None,
        }
    }

    /// Render the instruction with type names resolved.
    pub fn display<'a>(&'a self, types: &'a TypeRegistry) -> InstructionDisplay<'a> {
        InstructionDisplay {
            instruction: self,
            types,
        }
    }
}

/// Display adapter returned by [`Instruction::display`].
pub struct InstructionDisplay<'a> {
    instruction: &'a Instruction,
    types: &'a TypeRegistry,
}

impl InstructionDisplay<'_> {
    fn write_params(&self, f: &mut fmt::Formatter<'_>, params: &[TypeId]) -> fmt::Result {
        let names: Vec<&str> = params.iter().map(|&p| self.types.name(p)).collect();
        write!(f, "({})", names.join(" "))
    }
}

impl fmt::Display for InstructionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types = self.types;
        write!(f, "{}", self.instruction.name())?;
        match self.instruction {
            Instruction::LoadInt(value) => write!(f, " {}", value),
            Instruction::LoadFloat(value) => write!(f, " {}", value),
            Instruction::LoadLocal(index)
            | Instruction::StoreLocal(index)
            | Instruction::LoadArgument(index) => write!(f, " {}", index),
            Instruction::Call { name, params } => {
                write!(f, " {}", name)?;
                self.write_params(f, params)
            }
            Instruction::CallInstance {
                class,
                name,
                params,
            } => {
                write!(f, " {}::{}", types.name(*class), name)?;
                self.write_params(f, params)
            }
            Instruction::NewObject { class, params } => {
                write!(f, " {}::{}", types.name(*class), CONSTRUCTOR_NAME)?;
                self.write_params(f, params)
            }
            Instruction::LoadField { class, field } | Instruction::StoreField { class, field } => {
                write!(f, " {}::{}", types.name(*class), field)
            }
            Instruction::NewArray(element)
            | Instruction::LoadElement(element)
            | Instruction::StoreElement(element) => write!(f, " {}", types.name(*element)),
            other => match other.branch_target() {
                Some(target) => write!(f, " {}", target),
                None => Ok(()),
            },
        }
    }
}
