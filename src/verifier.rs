//! Bytecode verifier.
//!
//! A single forward pass over a function that tracks the type of every
//! operand stack entry:
//! - Type safety: every instruction sees operands of the types it requires
//! - Stack safety: no underflow, returns leave nothing behind
//! - Branch consistency: every branch site agrees with the stack shape
//!   recorded at its target
//!
//! On success the function is annotated with the operand types before each
//! instruction and the maximum operand stack depth; the code generator
//! relies on both.

use std::fmt;

use tracing::debug;

use crate::bytecode::{
    ArithmeticOp, Binder, CONSTRUCTOR_NAME, Condition, FunctionDefinition, Instruction, LogicOp,
    ManagedFunction, function_signature, member_function_signature,
};
use crate::dispatch::{InstructionPass, dispatch};
use crate::types::{TypeId, TypeRegistry};

/// Reason a function failed verification.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyErrorKind {
    /// The function has no instructions
    EmptyFunction,
    /// The last instruction is not `Return`
    MissingReturn,
    /// Not enough operands on the stack
    StackUnderflow { required: usize, actual: usize },
    /// An operand has the wrong type
    TypeMismatch { expected: String, actual: String },
    InvalidArgumentIndex(u32),
    InvalidLocalIndex(u32),
    /// Branch target outside `[0, instruction count]`
    InvalidBranchTarget(u32),
    /// The stack at a branch differs from the stack at its target
    BranchStackMismatch {
        target: usize,
        expected: Vec<String>,
        actual: Vec<String>,
    },
    UndefinedFunction(String),
    /// A member function called as a free function, or vice versa
    WrongCallKind(String),
    NoSuchField { class: String, field: String },
    NoSuchType(String),
    NotAClass(String),
    /// Return with the wrong number or type of values
    ReturnMismatch { expected: String, actual: Vec<String> },
}

impl fmt::Display for VerifyErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyErrorKind::EmptyFunction => write!(f, "Empty functions are not allowed."),
            VerifyErrorKind::MissingReturn => {
                write!(f, "Functions must end with a return instruction.")
            }
            VerifyErrorKind::StackUnderflow { required, actual } => write!(
                f,
                "Expected {} operand(s) on the stack but found {}.",
                required, actual
            ),
            VerifyErrorKind::TypeMismatch { expected, actual } => {
                write!(f, "Expected type '{}' but got type '{}'.", expected, actual)
            }
            VerifyErrorKind::InvalidArgumentIndex(index) => {
                write!(f, "Invalid argument index {}.", index)
            }
            VerifyErrorKind::InvalidLocalIndex(index) => {
                write!(f, "Invalid local index {}.", index)
            }
            VerifyErrorKind::InvalidBranchTarget(target) => {
                write!(f, "Invalid jump target {}.", target)
            }
            VerifyErrorKind::BranchStackMismatch {
                target,
                expected,
                actual,
            } => write!(
                f,
                "Expected operand stack [{}] at branch target {} but got [{}].",
                expected.join(" "),
                target,
                actual.join(" ")
            ),
            VerifyErrorKind::UndefinedFunction(signature) => {
                write!(f, "The function '{}' is not defined.", signature)
            }
            VerifyErrorKind::WrongCallKind(signature) => write!(
                f,
                "The function '{}' cannot be called with this instruction.",
                signature
            ),
            VerifyErrorKind::NoSuchField { class, field } => {
                write!(f, "There exists no field '{}' in the class '{}'.", field, class)
            }
            VerifyErrorKind::NoSuchType(name) => write!(f, "There exists no type '{}'.", name),
            VerifyErrorKind::NotAClass(name) => write!(f, "'{}' is not a class type.", name),
            VerifyErrorKind::ReturnMismatch { expected, actual } => write!(
                f,
                "Expected return of {} but the operand stack is [{}].",
                expected,
                actual.join(" ")
            ),
        }
    }
}

/// A verification failure at a specific instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyError {
    pub index: usize,
    /// The offending instruction, if the function has one at `index`
    pub instruction: Option<String>,
    pub kind: VerifyErrorKind,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.index, self.kind)
    }
}

impl std::error::Error for VerifyError {}

/// A branch recorded during the scan, checked once all stacks are known.
#[derive(Debug, Clone)]
struct BranchCheck {
    source: usize,
    target: usize,
    stack: Vec<TypeId>,
}

/// Per-function verifier state.
pub struct VerifierData<'f> {
    definition: &'f FunctionDefinition,
    locals: &'f [TypeId],
    instruction_count: usize,
    stack: Vec<TypeId>,
    branches: Vec<BranchCheck>,
}

impl VerifierData<'_> {
    fn push(&mut self, ty: TypeId) {
        self.stack.push(ty);
    }

    /// Pop `count` operands, bottom-most first.
    fn pop_n(&mut self, count: usize) -> Result<Vec<TypeId>, VerifyErrorKind> {
        if self.stack.len() < count {
            return Err(VerifyErrorKind::StackUnderflow {
                required: count,
                actual: self.stack.len(),
            });
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn pop(&mut self) -> Result<TypeId, VerifyErrorKind> {
        Ok(self.pop_n(1)?[0])
    }
}

/// Type-level abstract interpreter over managed functions.
pub struct Verifier<'a> {
    types: &'a TypeRegistry,
    binder: &'a Binder,
}

impl<'a> Verifier<'a> {
    pub fn new(types: &'a TypeRegistry, binder: &'a Binder) -> Self {
        Self { types, binder }
    }

    /// Verify a function and attach per-instruction operand types and the
    /// maximum stack depth to it.
    pub fn verify_function(&mut self, function: &mut ManagedFunction) -> Result<(), VerifyError> {
        let instructions = function.instructions();
        let count = instructions.len();
        if count == 0 {
            return Err(VerifyError {
                index: 0,
                instruction: None,
                kind: VerifyErrorKind::EmptyFunction,
            });
        }

        let definition = self.binder.definition(function.id());
        let mut data = VerifierData {
            definition,
            locals: function.locals(),
            instruction_count: count,
            stack: Vec::new(),
            branches: Vec::new(),
        };

        let mut operand_types = Vec::with_capacity(count);
        let mut max_depth = 0;

        for (index, instruction) in instructions.iter().enumerate() {
            max_depth = max_depth.max(data.stack.len());
            operand_types.push(data.stack.clone());
            dispatch(self, &mut data, index, instruction)
                .map_err(|kind| self.error(index, instruction, kind))?;
        }

        let last = count - 1;
        if instructions[last] != Instruction::Return {
            return Err(self.error(last, &instructions[last], VerifyErrorKind::MissingReturn));
        }

        for branch in &data.branches {
            self.check_branch(branch, &operand_types)
                .map_err(|kind| self.error(branch.source, &instructions[branch.source], kind))?;
        }

        debug!(
            function = %definition.name(),
            instructions = count,
            max_stack_depth = max_depth,
            "verified function"
        );

        function.attach_verification(operand_types, max_depth);
        Ok(())
    }

    fn error(&self, index: usize, instruction: &Instruction, kind: VerifyErrorKind) -> VerifyError {
        VerifyError {
            index,
            instruction: Some(instruction.display(self.types).to_string()),
            kind,
        }
    }

    fn names(&self, stack: &[TypeId]) -> Vec<String> {
        stack.iter().map(|&t| self.types.name(t).to_string()).collect()
    }

    fn check_branch(
        &self,
        branch: &BranchCheck,
        operand_types: &[Vec<TypeId>],
    ) -> Result<(), VerifyErrorKind> {
        let Some(expected) = operand_types.get(branch.target) else {
            return Err(VerifyErrorKind::InvalidBranchTarget(branch.target as u32));
        };

        let same_shape = expected.len() == branch.stack.len()
            && expected
                .iter()
                .zip(&branch.stack)
                .all(|(&a, &b)| self.types.compatible(a, b));

        if same_shape {
            Ok(())
        } else {
            Err(VerifyErrorKind::BranchStackMismatch {
                target: branch.target,
                expected: self.names(expected),
                actual: self.names(&branch.stack),
            })
        }
    }

    fn expect(&self, expected: TypeId, actual: TypeId) -> Result<(), VerifyErrorKind> {
        if self.types.compatible(expected, actual) {
            Ok(())
        } else {
            Err(self.mismatch(self.types.name(expected), actual))
        }
    }

    fn mismatch(&self, expected: &str, actual: TypeId) -> VerifyErrorKind {
        VerifyErrorKind::TypeMismatch {
            expected: expected.to_string(),
            actual: self.types.name(actual).to_string(),
        }
    }

    fn expect_class(&self, class: TypeId) -> Result<(), VerifyErrorKind> {
        if self.types.is_class(class) {
            Ok(())
        } else {
            Err(VerifyErrorKind::NotAClass(self.types.name(class).to_string()))
        }
    }

    /// Pop and type check the arguments of a call.
    fn pop_arguments(
        &self,
        data: &mut VerifierData<'_>,
        params: &[TypeId],
    ) -> Result<(), VerifyErrorKind> {
        let args = data.pop_n(params.len())?;
        for (&param, &arg) in params.iter().zip(&args) {
            self.expect(param, arg)?;
        }
        Ok(())
    }

    fn array_type(&self, element: TypeId) -> Result<TypeId, VerifyErrorKind> {
        self.types
            .array_type(element)
            .ok_or_else(|| VerifyErrorKind::NoSuchType(format!("Array[{}]", self.types.name(element))))
    }

    fn check_target(&self, data: &VerifierData<'_>, target: u32) -> Result<(), VerifyErrorKind> {
        if target as usize > data.instruction_count {
            return Err(VerifyErrorKind::InvalidBranchTarget(target));
        }
        Ok(())
    }
}

impl<'f> InstructionPass<VerifierData<'f>> for Verifier<'_> {
    type Error = VerifyErrorKind;

    fn nop(&mut self, _data: &mut VerifierData<'f>, _index: usize) -> Result<(), Self::Error> {
        Ok(())
    }

    fn pop(&mut self, data: &mut VerifierData<'f>, _index: usize) -> Result<(), Self::Error> {
        data.pop()?;
        Ok(())
    }

    fn duplicate(&mut self, data: &mut VerifierData<'f>, _index: usize) -> Result<(), Self::Error> {
        let top = data.pop()?;
        data.push(top);
        data.push(top);
        Ok(())
    }

    fn load_int(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        _value: i32,
    ) -> Result<(), Self::Error> {
        data.push(TypeId::INT);
        Ok(())
    }

    fn load_float(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        _value: f32,
    ) -> Result<(), Self::Error> {
        data.push(TypeId::FLOAT);
        Ok(())
    }

    fn load_bool(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        _value: bool,
    ) -> Result<(), Self::Error> {
        data.push(TypeId::BOOL);
        Ok(())
    }

    fn load_null(&mut self, data: &mut VerifierData<'f>, _index: usize) -> Result<(), Self::Error> {
        data.push(TypeId::NULL);
        Ok(())
    }

    fn arithmetic(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        _op: ArithmeticOp,
    ) -> Result<(), Self::Error> {
        let operands = data.pop_n(2)?;
        let (lhs, rhs) = (operands[0], operands[1]);

        if lhs != TypeId::INT && lhs != TypeId::FLOAT {
            return Err(self.mismatch("Int or Float", lhs));
        }
        self.expect(lhs, rhs)?;
        data.push(lhs);
        Ok(())
    }

    fn logic(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        _op: LogicOp,
    ) -> Result<(), Self::Error> {
        for operand in data.pop_n(2)? {
            self.expect(TypeId::BOOL, operand)?;
        }
        data.push(TypeId::BOOL);
        Ok(())
    }

    fn not(&mut self, data: &mut VerifierData<'f>, _index: usize) -> Result<(), Self::Error> {
        let operand = data.pop()?;
        self.expect(TypeId::BOOL, operand)?;
        data.push(TypeId::BOOL);
        Ok(())
    }

    fn convert_int_to_float(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
    ) -> Result<(), Self::Error> {
        let operand = data.pop()?;
        self.expect(TypeId::INT, operand)?;
        data.push(TypeId::FLOAT);
        Ok(())
    }

    fn convert_float_to_int(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
    ) -> Result<(), Self::Error> {
        let operand = data.pop()?;
        self.expect(TypeId::FLOAT, operand)?;
        data.push(TypeId::INT);
        Ok(())
    }

    fn compare(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        cond: Condition,
    ) -> Result<(), Self::Error> {
        let operands = data.pop_n(2)?;
        let (lhs, rhs) = (operands[0], operands[1]);

        let comparable = lhs == rhs || (cond.is_equality() && self.types.compatible(lhs, rhs));
        if !comparable {
            return Err(self.mismatch(self.types.name(lhs), rhs));
        }
        data.push(TypeId::BOOL);
        Ok(())
    }

    fn load_local(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        local: u32,
    ) -> Result<(), Self::Error> {
        let ty = *data
            .locals
            .get(local as usize)
            .ok_or(VerifyErrorKind::InvalidLocalIndex(local))?;
        data.push(ty);
        Ok(())
    }

    fn store_local(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        local: u32,
    ) -> Result<(), Self::Error> {
        let ty = *data
            .locals
            .get(local as usize)
            .ok_or(VerifyErrorKind::InvalidLocalIndex(local))?;
        let value = data.pop()?;
        self.expect(ty, value)
    }

    fn load_argument(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        arg: u32,
    ) -> Result<(), Self::Error> {
        let ty = *data
            .definition
            .parameters()
            .get(arg as usize)
            .ok_or(VerifyErrorKind::InvalidArgumentIndex(arg))?;
        data.push(ty);
        Ok(())
    }

    fn call(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        name: &str,
        params: &[TypeId],
    ) -> Result<(), Self::Error> {
        let signature = function_signature(self.types, name, params);
        let id = self
            .binder
            .get_function(&signature)
            .ok_or_else(|| VerifyErrorKind::UndefinedFunction(signature.clone()))?;
        let callee = self.binder.definition(id);
        if callee.is_member() {
            return Err(VerifyErrorKind::WrongCallKind(signature));
        }

        self.pop_arguments(data, callee.parameters())?;
        if callee.return_type() != TypeId::VOID {
            data.push(callee.return_type());
        }
        Ok(())
    }

    fn call_instance(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        class: TypeId,
        name: &str,
        params: &[TypeId],
    ) -> Result<(), Self::Error> {
        self.expect_class(class)?;
        let signature = member_function_signature(self.types, class, name, params);
        let id = self
            .binder
            .get_function(&signature)
            .ok_or_else(|| VerifyErrorKind::UndefinedFunction(signature.clone()))?;
        let callee = self.binder.definition(id);
        if !callee.is_member() || callee.is_constructor() {
            return Err(VerifyErrorKind::WrongCallKind(signature));
        }

        // Includes `this`
        self.pop_arguments(data, callee.parameters())?;
        if callee.return_type() != TypeId::VOID {
            data.push(callee.return_type());
        }
        Ok(())
    }

    fn new_object(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        class: TypeId,
        params: &[TypeId],
    ) -> Result<(), Self::Error> {
        self.expect_class(class)?;
        let signature = member_function_signature(self.types, class, CONSTRUCTOR_NAME, params);
        let id = self
            .binder
            .get_function(&signature)
            .ok_or_else(|| VerifyErrorKind::UndefinedFunction(signature.clone()))?;
        let constructor = self.binder.definition(id);
        if !constructor.is_constructor() {
            return Err(VerifyErrorKind::WrongCallKind(signature));
        }

        self.pop_arguments(data, constructor.call_parameters())?;
        data.push(class);
        Ok(())
    }

    fn ret(&mut self, data: &mut VerifierData<'f>, _index: usize) -> Result<(), Self::Error> {
        let return_type = data.definition.return_type();
        let ok = if return_type == TypeId::VOID {
            data.stack.is_empty()
        } else {
            data.stack.len() == 1 && self.types.compatible(return_type, data.stack[0])
        };

        if !ok {
            let expected = if return_type == TypeId::VOID {
                "nothing".to_string()
            } else {
                format!("one '{}'", self.types.name(return_type))
            };
            return Err(VerifyErrorKind::ReturnMismatch {
                expected,
                actual: self.names(&data.stack),
            });
        }

        data.stack.clear();
        Ok(())
    }

    fn branch(
        &mut self,
        data: &mut VerifierData<'f>,
        index: usize,
        target: u32,
    ) -> Result<(), Self::Error> {
        self.check_target(data, target)?;
        data.branches.push(BranchCheck {
            source: index,
            target: target as usize,
            stack: data.stack.clone(),
        });
        Ok(())
    }

    fn conditional_branch(
        &mut self,
        data: &mut VerifierData<'f>,
        index: usize,
        _cond: Condition,
        target: u32,
    ) -> Result<(), Self::Error> {
        let operands = data.pop_n(2)?;
        let (lhs, rhs) = (operands[0], operands[1]);
        if lhs != TypeId::INT && lhs != TypeId::FLOAT {
            return Err(self.mismatch("Int or Float", lhs));
        }
        self.expect(lhs, rhs)?;

        self.branch(data, index, target)
    }

    fn new_array(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        element: TypeId,
    ) -> Result<(), Self::Error> {
        let array = self.array_type(element)?;
        let length = data.pop()?;
        self.expect(TypeId::INT, length)?;
        data.push(array);
        Ok(())
    }

    fn load_element(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        element: TypeId,
    ) -> Result<(), Self::Error> {
        let array = self.array_type(element)?;
        let operands = data.pop_n(2)?;
        self.expect(array, operands[0])?;
        self.expect(TypeId::INT, operands[1])?;
        data.push(element);
        Ok(())
    }

    fn store_element(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        element: TypeId,
    ) -> Result<(), Self::Error> {
        let array = self.array_type(element)?;
        let operands = data.pop_n(3)?;
        self.expect(array, operands[0])?;
        self.expect(TypeId::INT, operands[1])?;
        self.expect(element, operands[2])
    }

    fn load_array_length(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
    ) -> Result<(), Self::Error> {
        let array = data.pop()?;
        if array != TypeId::NULL && !self.types.is_array(array) {
            return Err(self.mismatch("Array", array));
        }
        data.push(TypeId::INT);
        Ok(())
    }

    fn load_field(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        class: TypeId,
        field: &str,
    ) -> Result<(), Self::Error> {
        self.expect_class(class)?;
        let field_type = self.field_type(class, field)?;
        let object = data.pop()?;
        self.expect(class, object)?;
        data.push(field_type);
        Ok(())
    }

    fn store_field(
        &mut self,
        data: &mut VerifierData<'f>,
        _index: usize,
        class: TypeId,
        field: &str,
    ) -> Result<(), Self::Error> {
        self.expect_class(class)?;
        let field_type = self.field_type(class, field)?;
        let operands = data.pop_n(2)?;
        self.expect(class, operands[0])?;
        self.expect(field_type, operands[1])
    }
}

impl Verifier<'_> {
    fn field_type(&self, class: TypeId, field: &str) -> Result<TypeId, VerifyErrorKind> {
        self.types
            .field(class, field)
            .map(|f| f.ty())
            .ok_or_else(|| VerifyErrorKind::NoSuchField {
                class: self.types.name(class).to_string(),
                field: field.to_string(),
            })
    }
}
