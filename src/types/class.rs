//! Class metadata: fields and object layout.

use super::TypeId;

/// A field of a class.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    ty: TypeId,
    offset: usize,
    size: usize,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> TypeId {
        self.ty
    }

    /// Byte offset from the start of the object.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Layout and fields of a class.
#[derive(Debug, Clone)]
pub struct ClassMetadata {
    name: String,
    fields: Vec<Field>,
    size: usize,
}

impl ClassMetadata {
    pub(super) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            size: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Object size in bytes, padded to 8 so objects stay pointer-aligned.
    pub fn size(&self) -> usize {
        (self.size + 7) & !7
    }

    pub(super) fn push_field(&mut self, name: &str, ty: TypeId, size: usize) {
        let offset = (self.size + size - 1) & !(size - 1);
        self.fields.push(Field {
            name: name.to_string(),
            ty,
            offset,
            size,
        });
        self.size = offset + size;
    }
}
