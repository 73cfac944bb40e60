//! Diagnostic listing of linked native code.

use std::fmt::Write;

use crate::bytecode::{Binder, ManagedFunction, display_signature};
use crate::types::TypeRegistry;

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// List each instruction of a linked function with its native offset and
/// the bytes generated for it. Bytes before the first instruction are
/// shown as the prolog.
pub fn disassemble(types: &TypeRegistry, binder: &Binder, function: &ManagedFunction) -> String {
    let definition = binder.definition(function.id());
    let code = function.native_code();
    let offsets = function.instruction_offsets();

    let mut out = String::new();
    let _ = write!(out, "; {}", display_signature(types, definition));
    if let Some(entry) = definition.entry_point() {
        let _ = write!(out, " @ {:#x}", entry);
    }
    out.push('\n');

    if code.is_empty() || offsets.len() != function.instructions().len() {
        out.push_str(";   (not compiled)\n");
        return out;
    }

    let _ = writeln!(out, "      0000  {:<28} | {}", "<prolog>", hex(&code[..offsets[0]]));
    for (index, instruction) in function.instructions().iter().enumerate() {
        let start = offsets[index];
        let end = offsets.get(index + 1).copied().unwrap_or(code.len());
        let text = instruction.display(types).to_string();
        let _ = writeln!(
            out,
            "{:>4}  {:04x}  {:<28} | {}",
            index,
            start,
            text,
            hex(&code[start..end])
        );
    }
    out
}
