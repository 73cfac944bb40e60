//! Type registry for kiln.
//!
//! Types are interned by canonical name and referred to through `TypeId`
//! handles. Two handles are equal iff the canonical names are equal; the
//! null-vs-reference special case lives in [`TypeRegistry::compatible`].
//!
//! Canonical names:
//! - primitives: `Void`, `Int`, `Float`, `Bool`
//! - the null type: `Null`
//! - arrays: `Array[<element>]`
//! - classes: `Ref.<ClassName>`

mod class;

pub use class::{ClassMetadata, Field};

use std::collections::HashMap;
use std::fmt;

/// Size of every reference (array, object, null) in bytes.
pub const POINTER_SIZE: usize = 8;

/// Prefix of class type names.
pub const CLASS_PREFIX: &str = "Ref.";

/// Handle to an interned type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    pub const VOID: TypeId = TypeId(0);
    pub const INT: TypeId = TypeId(1);
    pub const FLOAT: TypeId = TypeId(2);
    pub const BOOL: TypeId = TypeId(3);
    pub const NULL: TypeId = TypeId(4);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Primitive value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Void,
    Int,
    Float,
    Bool,
}

impl PrimitiveKind {
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Void => "Void",
            PrimitiveKind::Int => "Int",
            PrimitiveKind::Float => "Float",
            PrimitiveKind::Bool => "Bool",
        }
    }

    pub fn size(self) -> usize {
        match self {
            PrimitiveKind::Void => 0,
            PrimitiveKind::Int => 4,
            PrimitiveKind::Float => 4,
            PrimitiveKind::Bool => 1,
        }
    }
}

/// The shape of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Primitive(PrimitiveKind),
    Null,
    Array { element: TypeId },
    Class { class: usize },
}

/// An interned type.
#[derive(Debug, Clone)]
pub struct Type {
    name: String,
    kind: TypeKind,
}

impl Type {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Null | TypeKind::Array { .. } | TypeKind::Class { .. }
        )
    }
}

/// Errors raised while registering types or class members.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeError {
    /// No type with this name exists.
    NoSuchType(String),
    /// A class with this name is already defined.
    ClassAlreadyDefined(String),
    /// The class already has a field with this name.
    FieldAlreadyDefined { class: String, field: String },
    /// The type cannot be used for a field or array element.
    InvalidMemberType(String),
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeError::NoSuchType(name) => write!(f, "There exists no type called '{}'.", name),
            TypeError::ClassAlreadyDefined(name) => {
                write!(f, "The class '{}' is already defined.", name)
            }
            TypeError::FieldAlreadyDefined { class, field } => {
                write!(f, "The field '{}' is already defined in class '{}'.", field, class)
            }
            TypeError::InvalidMemberType(name) => {
                write!(f, "The type '{}' cannot be stored in a field or array.", name)
            }
        }
    }
}

impl std::error::Error for TypeError {}

/// Size of a [`TypeRegistry`] at some point, for rolling it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeSnapshot {
    types: usize,
    classes: usize,
}

/// Interns types by canonical name and owns class metadata.
#[derive(Debug)]
pub struct TypeRegistry {
    types: Vec<Type>,
    by_name: HashMap<String, TypeId>,
    classes: Vec<ClassMetadata>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Create a registry holding the primitive types and the null type.
    /// Their handles are the `TypeId` associated constants.
    pub fn new() -> Self {
        let mut registry = Self {
            types: Vec::new(),
            by_name: HashMap::new(),
            classes: Vec::new(),
        };

        for kind in [
            PrimitiveKind::Void,
            PrimitiveKind::Int,
            PrimitiveKind::Float,
            PrimitiveKind::Bool,
        ] {
            registry.intern(kind.name().to_string(), TypeKind::Primitive(kind));
        }
        registry.intern("Null".to_string(), TypeKind::Null);

        registry
    }

    fn intern(&mut self, name: String, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.by_name.get(&name) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.types.push(Type { name, kind });
        id
    }

    pub fn snapshot(&self) -> TypeSnapshot {
        TypeSnapshot {
            types: self.types.len(),
            classes: self.classes.len(),
        }
    }

    /// Forget every type and class registered after `snapshot`.
    pub(crate) fn truncate(&mut self, snapshot: TypeSnapshot) {
        self.types.truncate(snapshot.types);
        self.classes.truncate(snapshot.classes);
        self.by_name.retain(|_, id| id.index() < snapshot.types);
    }

    /// Get a type by handle.
    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.index()]
    }

    /// Canonical name of a type.
    pub fn name(&self, id: TypeId) -> &str {
        &self.types[id.index()].name
    }

    /// Find (and lazily create) a type from its canonical name.
    ///
    /// Array types are built recursively from their element type. Class
    /// types only resolve once the class has been defined.
    pub fn find(&mut self, name: &str) -> Option<TypeId> {
        if let Some(&id) = self.by_name.get(name) {
            return Some(id);
        }

        let element_name = name.strip_prefix("Array[")?.strip_suffix(']')?;
        let element = self.find(element_name)?;
        self.find_array_type(element)
    }

    /// Find the array type with the given element type.
    /// Returns `None` for `Void` and `Null` elements.
    pub fn find_array_type(&mut self, element: TypeId) -> Option<TypeId> {
        match self.get(element).kind {
            TypeKind::Primitive(PrimitiveKind::Void) | TypeKind::Null => None,
            _ => {
                let name = format!("Array[{}]", self.name(element));
                Some(self.intern(name, TypeKind::Array { element }))
            }
        }
    }

    /// The already interned array type with the given element type.
    pub fn array_type(&self, element: TypeId) -> Option<TypeId> {
        self.by_name
            .get(&format!("Array[{}]", self.name(element)))
            .copied()
    }

    pub fn find_primitive(&self, kind: PrimitiveKind) -> TypeId {
        match kind {
            PrimitiveKind::Void => TypeId::VOID,
            PrimitiveKind::Int => TypeId::INT,
            PrimitiveKind::Float => TypeId::FLOAT,
            PrimitiveKind::Bool => TypeId::BOOL,
        }
    }

    /// Find a class type by class name (without the `Ref.` prefix).
    pub fn find_class_type(&self, class_name: &str) -> Option<TypeId> {
        self.by_name
            .get(&format!("{}{}", CLASS_PREFIX, class_name))
            .copied()
    }

    /// Size in bytes of a value of the given type.
    pub fn size_of(&self, id: TypeId) -> usize {
        match self.get(id).kind {
            TypeKind::Primitive(kind) => kind.size(),
            _ => POINTER_SIZE,
        }
    }

    pub fn is_reference(&self, id: TypeId) -> bool {
        self.get(id).is_reference()
    }

    pub fn is_array(&self, id: TypeId) -> bool {
        matches!(self.get(id).kind, TypeKind::Array { .. })
    }

    pub fn is_class(&self, id: TypeId) -> bool {
        matches!(self.get(id).kind, TypeKind::Class { .. })
    }

    /// Element type of an array type.
    pub fn element_type(&self, id: TypeId) -> Option<TypeId> {
        match self.get(id).kind {
            TypeKind::Array { element } => Some(element),
            _ => None,
        }
    }

    /// Symmetric compatibility: identical types, or null against any
    /// reference type.
    pub fn compatible(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        (a == TypeId::NULL && self.is_reference(b)) || (b == TypeId::NULL && self.is_reference(a))
    }

    // ==================== Classes ====================

    /// Define a new, empty class and return its type.
    pub fn define_class(&mut self, class_name: &str) -> Result<TypeId, TypeError> {
        let type_name = format!("{}{}", CLASS_PREFIX, class_name);
        if self.by_name.contains_key(&type_name) {
            return Err(TypeError::ClassAlreadyDefined(class_name.to_string()));
        }

        let class = self.classes.len();
        self.classes.push(ClassMetadata::new(class_name));
        Ok(self.intern(type_name, TypeKind::Class { class }))
    }

    /// Append a field to a class. Fields are laid out sequentially, each
    /// aligned to its own size.
    pub fn add_field(
        &mut self,
        class_type: TypeId,
        field_name: &str,
        field_type: TypeId,
    ) -> Result<(), TypeError> {
        let class = match self.get(class_type).kind {
            TypeKind::Class { class } => class,
            _ => return Err(TypeError::NoSuchType(self.name(class_type).to_string())),
        };

        let size = self.size_of(field_type);
        if size == 0 || field_type == TypeId::NULL {
            return Err(TypeError::InvalidMemberType(self.name(field_type).to_string()));
        }

        let metadata = &mut self.classes[class];
        if metadata.field(field_name).is_some() {
            return Err(TypeError::FieldAlreadyDefined {
                class: metadata.name().to_string(),
                field: field_name.to_string(),
            });
        }
        metadata.push_field(field_name, field_type, size);
        Ok(())
    }

    /// Class metadata for a class type.
    pub fn class_of(&self, id: TypeId) -> Option<&ClassMetadata> {
        match self.get(id).kind {
            TypeKind::Class { class } => self.classes.get(class),
            _ => None,
        }
    }

    /// Look up a field of a class type.
    pub fn field(&self, class_type: TypeId, field_name: &str) -> Option<&Field> {
        self.class_of(class_type)?.field(field_name)
    }
}
