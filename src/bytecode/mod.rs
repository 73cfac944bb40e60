//! Bytecode model: instructions, function definitions and the binder.

pub mod binder;
pub mod function;
pub mod instruction;

pub use binder::{
    Binder, FunctionId, display_signature, function_signature, member_function_signature,
    signature_key,
};
pub use function::{FunctionDefinition, FunctionKind, ManagedFunction};
pub use instruction::{ArithmeticOp, CONSTRUCTOR_NAME, Condition, Instruction, LogicOp};
