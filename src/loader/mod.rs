//! Assembly loader.
//!
//! Resolves type names against the registry, defines classes and
//! functions, and produces the managed function bodies of a load unit.
//! Verification, compilation and linking are driven by the VM.

pub mod assembly;

pub use assembly::{Assembly, ClassDecl, FieldDecl, FunctionDecl, InstructionDecl};

use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::bytecode::{
    Binder, FunctionDefinition, FunctionId, Instruction, ManagedFunction, display_signature,
};
use crate::jit::JitError;
use crate::types::{TypeError, TypeId, TypeRegistry};
use crate::verifier::VerifyError;

/// Required signature of `main`.
pub const MAIN_SIGNATURE: &str = "main() Int";

/// Errors raised while loading an assembly.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    Io { path: String, message: String },
    Parse(String),
    Type(TypeError),
    DuplicateFunction(String),
    InvalidMainSignature,
    /// A function or constructor that does not exist
    UndefinedFunction(String),
    Verify { function: String, error: VerifyError },
    Jit(JitError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io { path, message } => write!(f, "failed to read {}: {}", path, message),
            LoadError::Parse(msg) => write!(f, "failed to parse assembly: {}", msg),
            LoadError::Type(e) => write!(f, "{}", e),
            LoadError::DuplicateFunction(signature) => {
                write!(f, "The function '{}' is already defined.", signature)
            }
            LoadError::InvalidMainSignature => write!(
                f,
                "The main function must have the following signature: '{}'.",
                MAIN_SIGNATURE
            ),
            LoadError::UndefinedFunction(signature) => {
                write!(f, "There exists no function called '{}'.", signature)
            }
            LoadError::Verify { function, error } => write!(f, "{}: {}", function, error),
            LoadError::Jit(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Type(e) => Some(e),
            LoadError::Verify { error, .. } => Some(error),
            LoadError::Jit(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TypeError> for LoadError {
    fn from(e: TypeError) -> Self {
        LoadError::Type(e)
    }
}

impl From<JitError> for LoadError {
    fn from(e: JitError) -> Self {
        LoadError::Jit(e)
    }
}

/// Read an assembly file. `.json` files are parsed as JSON, anything else
/// as TOML.
pub fn read_assembly(path: &Path) -> Result<Assembly, LoadError> {
    let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let parsed = if is_json {
        Assembly::from_json(&content)
    } else {
        Assembly::from_toml(&content)
    };
    parsed.map_err(LoadError::Parse)
}

/// Defines the contents of an assembly in a registry and binder.
pub struct Loader<'a> {
    types: &'a mut TypeRegistry,
    binder: &'a mut Binder,
}

impl<'a> Loader<'a> {
    pub fn new(types: &'a mut TypeRegistry, binder: &'a mut Binder) -> Self {
        Self { types, binder }
    }

    /// Define everything in `assembly` and return the unverified bodies of
    /// its managed functions.
    pub fn load(&mut self, assembly: &Assembly) -> Result<Vec<ManagedFunction>, LoadError> {
        // Classes first so fields and signatures can refer to any of them
        let mut classes = Vec::with_capacity(assembly.classes.len());
        for class in &assembly.classes {
            classes.push(self.types.define_class(&class.name)?);
        }
        for (decl, &class) in assembly.classes.iter().zip(&classes) {
            for field in &decl.fields {
                let ty = self.resolve_type(&field.ty)?;
                self.types.add_field(class, &field.name, ty)?;
            }
        }

        let mut ids = Vec::with_capacity(assembly.functions.len());
        for decl in &assembly.functions {
            ids.push(self.define_function(decl)?);
        }

        let mut functions = Vec::with_capacity(ids.len());
        for (decl, id) in assembly.functions.iter().zip(ids) {
            let instructions = decl
                .instructions
                .iter()
                .map(|i| self.resolve_instruction(i))
                .collect::<Result<Vec<_>, _>>()?;
            let locals = self.resolve_types(&decl.locals)?;
            functions.push(ManagedFunction::new(id, instructions, locals));
        }

        debug!(
            classes = classes.len(),
            functions = functions.len(),
            "loaded assembly"
        );
        Ok(functions)
    }

    fn define_function(&mut self, decl: &FunctionDecl) -> Result<FunctionId, LoadError> {
        let params = self.resolve_types(&decl.params)?;
        let return_type = self.resolve_type(&decl.returns)?;

        let definition = match &decl.class {
            Some(class) => {
                let class = self.resolve_class(class)?;
                let name = if decl.constructor {
                    crate::bytecode::CONSTRUCTOR_NAME
                } else {
                    decl.name.as_str()
                };
                FunctionDefinition::member(class, name, params, return_type, decl.constructor)
            }
            None => FunctionDefinition::managed(&decl.name, params, return_type),
        };

        let signature = display_signature(self.types, &definition);
        if definition.class().is_none() && definition.name() == "main" && signature != MAIN_SIGNATURE
        {
            return Err(LoadError::InvalidMainSignature);
        }

        self.binder
            .define(self.types, definition)
            .ok_or(LoadError::DuplicateFunction(signature))
    }

    fn resolve_type(&mut self, name: &str) -> Result<TypeId, LoadError> {
        self.types
            .find(name)
            .ok_or_else(|| LoadError::Type(TypeError::NoSuchType(name.to_string())))
    }

    fn resolve_types(&mut self, names: &[String]) -> Result<Vec<TypeId>, LoadError> {
        names.iter().map(|n| self.resolve_type(n)).collect()
    }

    /// Class operand: a bare class name or the canonical `Ref.` name.
    fn resolve_class(&mut self, name: &str) -> Result<TypeId, LoadError> {
        if let Some(class) = self.types.find_class_type(name) {
            return Ok(class);
        }
        match self.types.find(name) {
            Some(ty) if self.types.is_class(ty) => Ok(ty),
            _ => Err(LoadError::Type(TypeError::NoSuchType(name.to_string()))),
        }
    }

    /// Element operand. The array type is interned as well so the verifier
    /// can name it.
    fn resolve_element(&mut self, name: &str) -> Result<TypeId, LoadError> {
        let element = self.resolve_type(name)?;
        self.types
            .find_array_type(element)
            .ok_or_else(|| LoadError::Type(TypeError::InvalidMemberType(name.to_string())))?;
        Ok(element)
    }

    fn resolve_instruction(&mut self, decl: &InstructionDecl) -> Result<Instruction, LoadError> {
        use InstructionDecl as D;

        let instruction = match decl {
            D::Nop => Instruction::Nop,
            D::Pop => Instruction::Pop,
            D::Duplicate => Instruction::Duplicate,
            D::LoadInt { value } => Instruction::LoadInt(*value),
            D::LoadFloat { value } => Instruction::LoadFloat(*value),
            D::LoadTrue => Instruction::LoadTrue,
            D::LoadFalse => Instruction::LoadFalse,
            D::LoadNull => Instruction::LoadNull,
            D::Add => Instruction::Add,
            D::Sub => Instruction::Sub,
            D::Mul => Instruction::Mul,
            D::Div => Instruction::Div,
            D::And => Instruction::And,
            D::Or => Instruction::Or,
            D::Not => Instruction::Not,
            D::ConvertIntToFloat => Instruction::ConvertIntToFloat,
            D::ConvertFloatToInt => Instruction::ConvertFloatToInt,
            D::CompareEqual => Instruction::CompareEqual,
            D::CompareNotEqual => Instruction::CompareNotEqual,
            D::CompareGreaterThan => Instruction::CompareGreaterThan,
            D::CompareGreaterThanOrEqual => Instruction::CompareGreaterThanOrEqual,
            D::CompareLessThan => Instruction::CompareLessThan,
            D::CompareLessThanOrEqual => Instruction::CompareLessThanOrEqual,
            D::LoadLocal { index } => Instruction::LoadLocal(*index),
            D::StoreLocal { index } => Instruction::StoreLocal(*index),
            D::LoadArgument { index } => Instruction::LoadArgument(*index),
            D::Call { name, params } => Instruction::Call {
                name: name.clone(),
                params: self.resolve_types(params)?,
            },
            D::CallInstance {
                class,
                name,
                params,
            } => Instruction::CallInstance {
                class: self.resolve_class(class)?,
                name: name.clone(),
                params: self.resolve_types(params)?,
            },
            D::Return => Instruction::Return,
            D::Branch { target } => Instruction::Branch(*target),
            D::BranchEqual { target } => Instruction::BranchEqual(*target),
            D::BranchNotEqual { target } => Instruction::BranchNotEqual(*target),
            D::BranchGreaterThan { target } => Instruction::BranchGreaterThan(*target),
            D::BranchGreaterThanOrEqual { target } => {
                Instruction::BranchGreaterThanOrEqual(*target)
            }
            D::BranchLessThan { target } => Instruction::BranchLessThan(*target),
            D::BranchLessThanOrEqual { target } => Instruction::BranchLessThanOrEqual(*target),
            D::NewArray { element } => Instruction::NewArray(self.resolve_element(element)?),
            D::LoadElement { element } => Instruction::LoadElement(self.resolve_element(element)?),
            D::StoreElement { element } => {
                Instruction::StoreElement(self.resolve_element(element)?)
            }
            D::LoadArrayLength => Instruction::LoadArrayLength,
            D::NewObject { class, params } => Instruction::NewObject {
                class: self.resolve_class(class)?,
                params: self.resolve_types(params)?,
            },
            D::LoadField { class, field } => Instruction::LoadField {
                class: self.resolve_class(class)?,
                field: field.clone(),
            },
            D::StoreField { class, field } => Instruction::StoreField {
                class: self.resolve_class(class)?,
                field: field.clone(),
            },
        };
        Ok(instruction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(source: &str) -> Result<(TypeRegistry, Binder, Vec<ManagedFunction>), LoadError> {
        let assembly = Assembly::from_toml(source).map_err(LoadError::Parse)?;
        let mut types = TypeRegistry::new();
        let mut binder = Binder::new();
        let functions = Loader::new(&mut types, &mut binder).load(&assembly)?;
        Ok((types, binder, functions))
    }

    #[test]
    fn test_duplicate_function() {
        let err = load(
            r#"
[[functions]]
name = "test"
returns = "Int"
instructions = [{ op = "LoadInt", value = 0 }, { op = "Return" }]

[[functions]]
name = "test"
returns = "Int"
instructions = [{ op = "LoadInt", value = 1 }, { op = "Return" }]
"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "The function 'test() Int' is already defined.");
    }

    #[test]
    fn test_main_signature() {
        let err = load(
            r#"
[[functions]]
name = "main"
params = ["Int"]
returns = "Int"
instructions = [{ op = "LoadInt", value = 0 }, { op = "Return" }]
"#,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "The main function must have the following signature: 'main() Int'."
        );
    }

    #[test]
    fn test_unknown_type() {
        let err = load(
            r#"
[[functions]]
name = "f"
params = ["Ref.Missing"]
instructions = [{ op = "Return" }]
"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            LoadError::Type(TypeError::NoSuchType("Ref.Missing".to_string()))
        );
    }

    #[test]
    fn test_classes_and_members() {
        let (types, binder, functions) = load(
            r#"
[[classes]]
name = "Node"
fields = [{ name = "value", type = "Int" }, { name = "next", type = "Ref.Node" }]

[[functions]]
name = "ignored"
class = "Node"
constructor = true
instructions = [{ op = "Return" }]

[[functions]]
name = "get"
class = "Node"
returns = "Int"
instructions = [
    { op = "LoadArgument", index = 0 },
    { op = "LoadField", class = "Node", field = "value" },
    { op = "Return" },
]
"#,
        )
        .unwrap();

        let node = types.find_class_type("Node").unwrap();
        assert_eq!(types.field(node, "next").unwrap().ty(), node);
        assert!(binder.get_function("Node::.constructor()").is_some());
        assert!(binder.get_function("Node::get()").is_some());
        assert_eq!(
            functions[1].instructions()[1],
            Instruction::LoadField {
                class: node,
                field: "value".to_string()
            }
        );
    }

    #[test]
    fn test_array_types_are_interned() {
        let (types, _, functions) = load(
            r#"
[[functions]]
name = "f"
instructions = [
    { op = "LoadInt", value = 3 },
    { op = "NewArray", element = "Float" },
    { op = "Pop" },
    { op = "Return" },
]
"#,
        )
        .unwrap();
        assert!(types.array_type(TypeId::FLOAT).is_some());
        assert_eq!(functions[0].instructions()[1], Instruction::NewArray(TypeId::FLOAT));
    }

    #[test]
    fn test_read_assembly_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit.json");
        std::fs::write(&path, r#"{"functions": []}"#).unwrap();
        assert!(read_assembly(&path).unwrap().functions.is_empty());

        let err = read_assembly(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }
}
