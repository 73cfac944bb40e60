//! Native function library bound into every VM.

use crate::types::TypeId;

/// A native function callable from managed code with `Call`.
#[derive(Debug, Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    pub params: Vec<TypeId>,
    pub return_type: TypeId,
    pub address: usize,
}

impl NativeFunction {
    fn new(name: &'static str, params: Vec<TypeId>, return_type: TypeId, address: usize) -> Self {
        Self {
            name,
            params,
            return_type,
            address,
        }
    }
}

extern "win64" fn println_int(value: i32) {
    println!("{}", value);
}

extern "win64" fn println_float(value: f32) {
    println!("{}", value);
}

extern "win64" fn println_bool(value: bool) {
    println!("{}", value);
}

extern "win64" fn abs_int(value: i32) -> i32 {
    value.wrapping_abs()
}

extern "win64" fn sqrt_float(value: f32) -> f32 {
    value.sqrt()
}

/// The built-in natives.
pub fn standard_library() -> Vec<NativeFunction> {
    vec![
        NativeFunction::new("println", vec![TypeId::INT], TypeId::VOID, println_int as usize),
        NativeFunction::new("println", vec![TypeId::FLOAT], TypeId::VOID, println_float as usize),
        NativeFunction::new("println", vec![TypeId::BOOL], TypeId::VOID, println_bool as usize),
        NativeFunction::new("abs", vec![TypeId::INT], TypeId::INT, abs_int as usize),
        NativeFunction::new("sqrt", vec![TypeId::FLOAT], TypeId::FLOAT, sqrt_float as usize),
    ]
}
