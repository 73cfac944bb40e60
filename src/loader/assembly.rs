//! Serialized assembly format.
//!
//! An assembly is a list of classes and functions. Types are written by
//! canonical name (`Int`, `Array[Float]`, `Ref.Point`); class operands of
//! instructions take the bare class name. Instructions are tagged by `op`:
//!
//! ```toml
//! [[functions]]
//! name = "main"
//! returns = "Int"
//! instructions = [
//!     { op = "LoadInt", value = 2 },
//!     { op = "LoadInt", value = 1 },
//!     { op = "Add" },
//!     { op = "Return" },
//! ]
//! ```

use serde::{Deserialize, Serialize};

/// A load unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assembly {
    #[serde(default)]
    pub classes: Vec<ClassDecl>,
    #[serde(default)]
    pub functions: Vec<FunctionDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    /// Owning class for member functions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default)]
    pub constructor: bool,
    /// Parameter types, excluding `this`
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default = "default_return_type")]
    pub returns: String,
    #[serde(default)]
    pub locals: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<InstructionDecl>,
}

fn default_return_type() -> String {
    "Void".to_string()
}

/// A serialized instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum InstructionDecl {
    Nop,
    Pop,
    Duplicate,
    LoadInt { value: i32 },
    LoadFloat { value: f32 },
    LoadTrue,
    LoadFalse,
    LoadNull,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Not,
    ConvertIntToFloat,
    ConvertFloatToInt,
    CompareEqual,
    CompareNotEqual,
    CompareGreaterThan,
    CompareGreaterThanOrEqual,
    CompareLessThan,
    CompareLessThanOrEqual,
    LoadLocal { index: u32 },
    StoreLocal { index: u32 },
    LoadArgument { index: u32 },
    Call {
        name: String,
        #[serde(default)]
        params: Vec<String>,
    },
    CallInstance {
        class: String,
        name: String,
        #[serde(default)]
        params: Vec<String>,
    },
    Return,
    Branch { target: u32 },
    BranchEqual { target: u32 },
    BranchNotEqual { target: u32 },
    BranchGreaterThan { target: u32 },
    BranchGreaterThanOrEqual { target: u32 },
    BranchLessThan { target: u32 },
    BranchLessThanOrEqual { target: u32 },
    NewArray { element: String },
    LoadElement { element: String },
    StoreElement { element: String },
    LoadArrayLength,
    NewObject {
        class: String,
        #[serde(default)]
        params: Vec<String>,
    },
    LoadField { class: String, field: String },
    StoreField { class: String, field: String },
}

impl Assembly {
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn from_json(content: &str) -> Result<Self, String> {
        serde_json::from_str(content).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_assembly() {
        let assembly = Assembly::from_toml(
            r#"
[[classes]]
name = "Point"
fields = [{ name = "x", type = "Int" }]

[[functions]]
name = "main"
returns = "Int"
locals = ["Ref.Point"]
instructions = [
    { op = "NewObject", class = "Point" },
    { op = "StoreLocal", index = 0 },
    { op = "LoadFloat", value = 2.5 },
    { op = "ConvertFloatToInt" },
    { op = "Return" },
]
"#,
        )
        .unwrap();

        assert_eq!(assembly.classes[0].fields[0].ty, "Int");
        let main = &assembly.functions[0];
        assert_eq!(main.returns, "Int");
        assert!(main.params.is_empty());
        assert_eq!(
            main.instructions[0],
            InstructionDecl::NewObject {
                class: "Point".to_string(),
                params: vec![]
            }
        );
        assert_eq!(main.instructions[2], InstructionDecl::LoadFloat { value: 2.5 });
        assert_eq!(main.instructions[4], InstructionDecl::Return);
    }

    #[test]
    fn test_json_assembly() {
        let assembly = Assembly::from_json(
            r#"{
                "functions": [{
                    "name": "f",
                    "params": ["Int"],
                    "instructions": [{"op": "LoadArgument", "index": 0}, {"op": "Pop"}, {"op": "Return"}]
                }]
            }"#,
        )
        .unwrap();

        let f = &assembly.functions[0];
        assert_eq!(f.returns, "Void");
        assert_eq!(f.instructions[0], InstructionDecl::LoadArgument { index: 0 });
    }

    #[test]
    fn test_unknown_op_rejected() {
        let result = Assembly::from_json(r#"{"functions": [{"name": "f", "instructions": [{"op": "Jump"}]}]}"#);
        assert!(result.is_err());
    }
}
