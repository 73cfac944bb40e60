//! Function binder: maps signatures to function definitions.

use std::collections::HashMap;

use super::function::FunctionDefinition;
use crate::types::{TypeId, TypeRegistry};

/// Handle to a function defined in a [`Binder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(usize);

impl FunctionId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Lookup key of a free function: `name(Int Float)`.
pub fn function_signature(types: &TypeRegistry, name: &str, params: &[TypeId]) -> String {
    let names: Vec<&str> = params.iter().map(|&p| types.name(p)).collect();
    format!("{}({})", name, names.join(" "))
}

/// Lookup key of a member function: `Point::name(Int)`. `params` excludes
/// `this`; the class is given by its class name without the `Ref.` prefix.
pub fn member_function_signature(
    types: &TypeRegistry,
    class: TypeId,
    name: &str,
    params: &[TypeId],
) -> String {
    let class_name = types
        .class_of(class)
        .map(|c| c.name().to_string())
        .unwrap_or_else(|| types.name(class).to_string());
    format!("{}::{}", class_name, function_signature(types, name, params))
}

/// Lookup key of a definition.
pub fn signature_key(types: &TypeRegistry, def: &FunctionDefinition) -> String {
    match def.class() {
        Some(class) => member_function_signature(types, class, def.name(), def.call_parameters()),
        None => function_signature(types, def.name(), def.call_parameters()),
    }
}

/// Full signature including the return type: `name(Int) Float`.
pub fn display_signature(types: &TypeRegistry, def: &FunctionDefinition) -> String {
    format!(
        "{} {}",
        signature_key(types, def),
        types.name(def.return_type())
    )
}

/// Owns every function definition of a VM.
#[derive(Debug, Default)]
pub struct Binder {
    functions: Vec<FunctionDefinition>,
    by_signature: HashMap<String, FunctionId>,
}

impl Binder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a function. Returns `None` if a function with the same
    /// signature already exists.
    pub fn define(&mut self, types: &TypeRegistry, def: FunctionDefinition) -> Option<FunctionId> {
        let key = signature_key(types, &def);
        if self.by_signature.contains_key(&key) {
            return None;
        }

        let id = FunctionId(self.functions.len());
        self.functions.push(def);
        self.by_signature.insert(key, id);
        Some(id)
    }

    /// Look up a function by signature key.
    pub fn get_function(&self, signature: &str) -> Option<FunctionId> {
        self.by_signature.get(signature).copied()
    }

    pub fn is_defined(&self, signature: &str) -> bool {
        self.by_signature.contains_key(signature)
    }

    pub fn definition(&self, id: FunctionId) -> &FunctionDefinition {
        &self.functions[id.0]
    }

    pub(crate) fn set_entry_point(&mut self, id: FunctionId, address: usize) {
        self.functions[id.0].set_entry_point(address);
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Drop every function defined after the first `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.functions.truncate(len);
        self.by_signature.retain(|_, id| id.0 < len);
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signatures() {
        let mut types = TypeRegistry::new();
        let point = types.define_class("Point").unwrap();

        assert_eq!(
            function_signature(&types, "add", &[TypeId::INT, TypeId::INT]),
            "add(Int Int)"
        );
        assert_eq!(function_signature(&types, "main", &[]), "main()");
        assert_eq!(
            member_function_signature(&types, point, "scale", &[TypeId::FLOAT]),
            "Point::scale(Float)"
        );

        let def = FunctionDefinition::managed("test", vec![], TypeId::INT);
        assert_eq!(display_signature(&types, &def), "test() Int");
    }

    #[test]
    fn test_define_and_lookup() {
        let types = TypeRegistry::new();
        let mut binder = Binder::new();

        let id = binder
            .define(&types, FunctionDefinition::managed("f", vec![TypeId::INT], TypeId::VOID))
            .unwrap();
        assert_eq!(binder.get_function("f(Int)"), Some(id));
        assert_eq!(binder.get_function("f(Float)"), None);
        assert_eq!(binder.definition(id).name(), "f");
        assert!(binder.definition(id).entry_point().is_none());
    }

    #[test]
    fn test_duplicate_signature_rejected() {
        let types = TypeRegistry::new();
        let mut binder = Binder::new();

        assert!(binder
            .define(&types, FunctionDefinition::managed("test", vec![], TypeId::INT))
            .is_some());
        // Return type is not part of the lookup key
        assert!(binder
            .define(&types, FunctionDefinition::managed("test", vec![], TypeId::FLOAT))
            .is_none());
        assert_eq!(binder.len(), 1);
    }

    #[test]
    fn test_member_definitions() {
        let mut types = TypeRegistry::new();
        let point = types.define_class("Point").unwrap();
        let mut binder = Binder::new();

        let id = binder
            .define(
                &types,
                FunctionDefinition::member(point, "length", vec![], TypeId::INT, false),
            )
            .unwrap();
        let def = binder.definition(id);
        assert_eq!(def.parameters(), &[point]);
        assert!(def.call_parameters().is_empty());
        assert_eq!(binder.get_function("Point::length()"), Some(id));
    }

    #[test]
    fn test_truncate_forgets_later_definitions() {
        let types = TypeRegistry::new();
        let mut binder = Binder::new();
        let kept = binder
            .define(&types, FunctionDefinition::managed("kept", vec![], TypeId::VOID))
            .unwrap();
        let len = binder.len();
        binder
            .define(&types, FunctionDefinition::managed("dropped", vec![], TypeId::VOID))
            .unwrap();

        binder.truncate(len);
        assert_eq!(binder.len(), 1);
        assert_eq!(binder.get_function("kept()"), Some(kept));
        assert_eq!(binder.get_function("dropped()"), None);
        assert!(binder
            .define(&types, FunctionDefinition::managed("dropped", vec![], TypeId::VOID))
            .is_some());
    }
}
