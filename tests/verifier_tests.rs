use kiln::verifier::VerifyErrorKind;
use kiln::{
    Binder, FunctionDefinition, FunctionId, Instruction, ManagedFunction, TypeId, TypeRegistry,
    Verifier, VerifyError,
};

struct Fixture {
    types: TypeRegistry,
    binder: Binder,
}

impl Fixture {
    fn new() -> Self {
        Self {
            types: TypeRegistry::new(),
            binder: Binder::new(),
        }
    }

    fn define(&mut self, name: &str, params: Vec<TypeId>, returns: TypeId) -> FunctionId {
        self.binder
            .define(&self.types, FunctionDefinition::managed(name, params, returns))
            .unwrap()
    }

    fn verify(
        &self,
        id: FunctionId,
        instructions: Vec<Instruction>,
        locals: Vec<TypeId>,
    ) -> Result<ManagedFunction, VerifyError> {
        let mut function = ManagedFunction::new(id, instructions, locals);
        Verifier::new(&self.types, &self.binder).verify_function(&mut function)?;
        Ok(function)
    }
}

#[test]
fn test_well_formed_function_annotations() {
    let mut fx = Fixture::new();
    let id = fx.define("f", vec![TypeId::INT], TypeId::FLOAT);
    let function = fx
        .verify(
            id,
            vec![
                Instruction::LoadArgument(0),
                Instruction::ConvertIntToFloat,
                Instruction::LoadFloat(0.5),
                Instruction::Mul,
                Instruction::Return,
            ],
            vec![],
        )
        .unwrap();

    assert!(function.is_verified());
    assert_eq!(function.max_stack_depth(), 2);
    assert_eq!(function.operand_types(0), &[] as &[TypeId]);
    assert_eq!(function.operand_types(2), &[TypeId::FLOAT]);
    assert_eq!(function.operand_types(3), &[TypeId::FLOAT, TypeId::FLOAT]);
    assert_eq!(function.operand_types(4), &[TypeId::FLOAT]);
}

#[test]
fn test_empty_function() {
    let mut fx = Fixture::new();
    let id = fx.define("f", vec![], TypeId::VOID);
    let err = fx.verify(id, vec![], vec![]).unwrap_err();
    assert_eq!(err.index, 0);
    assert_eq!(err.to_string(), "0: Empty functions are not allowed.");
}

#[test]
fn test_missing_return_reported_at_last_index() {
    let mut fx = Fixture::new();
    let id = fx.define("f", vec![], TypeId::VOID);
    let err = fx
        .verify(
            id,
            vec![Instruction::LoadInt(1), Instruction::Pop, Instruction::Nop],
            vec![],
        )
        .unwrap_err();
    assert_eq!(err.index, 2);
    assert_eq!(err.kind, VerifyErrorKind::MissingReturn);
    assert_eq!(err.instruction.as_deref(), Some("Nop"));
}

#[test]
fn test_branch_with_identical_stacks() {
    let mut fx = Fixture::new();
    let id = fx.define("max", vec![TypeId::INT, TypeId::INT], TypeId::INT);
    let result = fx.verify(
        id,
        vec![
            Instruction::LoadArgument(0),
            Instruction::LoadArgument(1),
            Instruction::BranchLessThan(5),
            Instruction::LoadArgument(0),
            Instruction::Return,
            Instruction::LoadArgument(1),
            Instruction::Return,
        ],
        vec![],
    );
    assert!(result.is_ok());
}

#[test]
fn test_branch_stack_mismatch() {
    let mut fx = Fixture::new();
    let id = fx.define("f", vec![], TypeId::INT);
    let err = fx
        .verify(
            id,
            vec![
                Instruction::LoadInt(1),
                Instruction::Branch(3),
                Instruction::LoadInt(2),
                Instruction::LoadInt(3),
                Instruction::Add,
                Instruction::Return,
            ],
            vec![],
        )
        .unwrap_err();
    assert_eq!(err.index, 1);
    assert!(matches!(
        err.kind,
        VerifyErrorKind::BranchStackMismatch { target: 3, .. }
    ));
}

#[test]
fn test_forward_branch_over_block() {
    let mut fx = Fixture::new();
    let id = fx.define("count", vec![TypeId::INT], TypeId::INT);
    let result = fx.verify(
        id,
        vec![
            Instruction::LoadInt(0),
            Instruction::StoreLocal(0),
            Instruction::LoadLocal(0),
            Instruction::LoadArgument(0),
            Instruction::BranchGreaterThanOrEqual(9),
            Instruction::LoadLocal(0),
            Instruction::LoadInt(1),
            Instruction::Add,
            Instruction::StoreLocal(0),
            Instruction::LoadLocal(0),
            Instruction::Return,
        ],
        vec![TypeId::INT],
    );
    // Falls through from 8 to 9 with an empty stack, matching the branch
    assert!(result.is_ok());
}

#[test]
fn test_branch_target_past_end() {
    let mut fx = Fixture::new();
    let id = fx.define("f", vec![], TypeId::VOID);
    let err = fx
        .verify(id, vec![Instruction::Branch(7), Instruction::Return], vec![])
        .unwrap_err();
    assert_eq!(err.index, 0);
    assert_eq!(err.kind, VerifyErrorKind::InvalidBranchTarget(7));
}

#[test]
fn test_arithmetic_type_mismatch() {
    let mut fx = Fixture::new();
    let id = fx.define("f", vec![], TypeId::INT);
    let err = fx
        .verify(
            id,
            vec![
                Instruction::LoadInt(1),
                Instruction::LoadFloat(1.0),
                Instruction::Add,
                Instruction::Return,
            ],
            vec![],
        )
        .unwrap_err();
    assert_eq!(err.index, 2);
    assert!(matches!(err.kind, VerifyErrorKind::TypeMismatch { .. }));
}

#[test]
fn test_null_equality_against_reference() {
    let mut fx = Fixture::new();
    let array = fx.types.find("Array[Int]").unwrap();
    let id = fx.define("is_null", vec![array], TypeId::BOOL);
    let result = fx.verify(
        id,
        vec![
            Instruction::LoadArgument(0),
            Instruction::LoadNull,
            Instruction::CompareEqual,
            Instruction::Return,
        ],
        vec![],
    );
    assert!(result.is_ok());
}

#[test]
fn test_undefined_call() {
    let mut fx = Fixture::new();
    let id = fx.define("f", vec![], TypeId::VOID);
    let err = fx
        .verify(
            id,
            vec![
                Instruction::Call {
                    name: "missing".to_string(),
                    params: vec![TypeId::INT],
                },
                Instruction::Return,
            ],
            vec![],
        )
        .unwrap_err();
    assert_eq!(
        err.kind,
        VerifyErrorKind::UndefinedFunction("missing(Int)".to_string())
    );
}

#[test]
fn test_stack_underflow() {
    let mut fx = Fixture::new();
    let id = fx.define("f", vec![], TypeId::VOID);
    let err = fx
        .verify(id, vec![Instruction::Pop, Instruction::Return], vec![])
        .unwrap_err();
    assert_eq!(
        err.kind,
        VerifyErrorKind::StackUnderflow {
            required: 1,
            actual: 0
        }
    );
}

#[test]
fn test_store_local_type_checked() {
    let mut fx = Fixture::new();
    let id = fx.define("f", vec![], TypeId::VOID);
    let err = fx
        .verify(
            id,
            vec![
                Instruction::LoadTrue,
                Instruction::StoreLocal(0),
                Instruction::Return,
            ],
            vec![TypeId::INT],
        )
        .unwrap_err();
    assert_eq!(err.index, 1);
}
