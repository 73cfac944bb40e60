//! Function definitions and managed function bodies.

use super::binder::FunctionId;
use super::instruction::Instruction;
use crate::types::TypeId;

/// Whether a function body is bytecode or native code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Managed,
    External,
}

/// The signature and binding state of a function.
///
/// For member functions `parameters[0]` is the implicit `this` reference.
#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    name: String,
    parameters: Vec<TypeId>,
    return_type: TypeId,
    kind: FunctionKind,
    class: Option<TypeId>,
    is_constructor: bool,
    entry_point: Option<usize>,
}

impl FunctionDefinition {
    /// A free managed function.
    pub fn managed(name: &str, parameters: Vec<TypeId>, return_type: TypeId) -> Self {
        Self {
            name: name.to_string(),
            parameters,
            return_type,
            kind: FunctionKind::Managed,
            class: None,
            is_constructor: false,
            entry_point: None,
        }
    }

    /// A native function that already lives at `entry_point`.
    pub fn external(
        name: &str,
        parameters: Vec<TypeId>,
        return_type: TypeId,
        entry_point: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            parameters,
            return_type,
            kind: FunctionKind::External,
            class: None,
            is_constructor: false,
            entry_point: Some(entry_point),
        }
    }

    /// A managed member function of `class`. `parameters` excludes `this`.
    pub fn member(
        class: TypeId,
        name: &str,
        parameters: Vec<TypeId>,
        return_type: TypeId,
        is_constructor: bool,
    ) -> Self {
        let mut all_parameters = Vec::with_capacity(parameters.len() + 1);
        all_parameters.push(class);
        all_parameters.extend(parameters);

        Self {
            name: name.to_string(),
            parameters: all_parameters,
            return_type,
            kind: FunctionKind::Managed,
            class: Some(class),
            is_constructor,
            entry_point: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All parameters, including `this` for members.
    pub fn parameters(&self) -> &[TypeId] {
        &self.parameters
    }

    /// Parameters as written at call sites (without `this`).
    pub fn call_parameters(&self) -> &[TypeId] {
        if self.class.is_some() {
            &self.parameters[1..]
        } else {
            &self.parameters
        }
    }

    pub fn return_type(&self) -> TypeId {
        self.return_type
    }

    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    pub fn is_managed(&self) -> bool {
        self.kind == FunctionKind::Managed
    }

    pub fn class(&self) -> Option<TypeId> {
        self.class
    }

    pub fn is_member(&self) -> bool {
        self.class.is_some()
    }

    pub fn is_constructor(&self) -> bool {
        self.is_constructor
    }

    pub fn entry_point(&self) -> Option<usize> {
        self.entry_point
    }

    pub(crate) fn set_entry_point(&mut self, address: usize) {
        self.entry_point = Some(address);
    }
}

/// A managed function body together with its verification results and,
/// once linked, its native code.
#[derive(Debug, Clone)]
pub struct ManagedFunction {
    id: FunctionId,
    instructions: Vec<Instruction>,
    locals: Vec<TypeId>,
    /// Operand types before each instruction (filled by the verifier)
    operand_types: Vec<Vec<TypeId>>,
    max_stack_depth: usize,
    native_code: Vec<u8>,
    instruction_offsets: Vec<usize>,
}

impl ManagedFunction {
    pub fn new(id: FunctionId, instructions: Vec<Instruction>, locals: Vec<TypeId>) -> Self {
        Self {
            id,
            instructions,
            locals,
            operand_types: Vec::new(),
            max_stack_depth: 0,
            native_code: Vec::new(),
            instruction_offsets: Vec::new(),
        }
    }

    pub fn id(&self) -> FunctionId {
        self.id
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn locals(&self) -> &[TypeId] {
        &self.locals
    }

    /// Whether verification results have been attached.
    pub fn is_verified(&self) -> bool {
        !self.instructions.is_empty() && self.operand_types.len() == self.instructions.len()
    }

    /// Operand types on the stack before the instruction at `index`
    /// (bottom first).
    pub fn operand_types(&self, index: usize) -> &[TypeId] {
        &self.operand_types[index]
    }

    pub fn max_stack_depth(&self) -> usize {
        self.max_stack_depth
    }

    pub(crate) fn attach_verification(&mut self, operand_types: Vec<Vec<TypeId>>, max_depth: usize) {
        debug_assert_eq!(operand_types.len(), self.instructions.len());
        self.operand_types = operand_types;
        self.max_stack_depth = max_depth;
    }

    /// Linked native code, empty until the function has been linked.
    pub fn native_code(&self) -> &[u8] {
        &self.native_code
    }

    /// Offset of each instruction within [`Self::native_code`].
    pub fn instruction_offsets(&self) -> &[usize] {
        &self.instruction_offsets
    }

    pub(crate) fn attach_native(&mut self, code: Vec<u8>, instruction_offsets: Vec<usize>) {
        self.native_code = code;
        self.instruction_offsets = instruction_offsets;
    }
}
