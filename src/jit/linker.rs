//! Symbol resolution and code placement.
//!
//! The linker lays every pending function of a load unit out in one code
//! region, drains the unresolved maps and patches the placeholders, copies
//! the code into the region and only then publishes the entry points.

use std::collections::HashMap;

use tracing::debug;

use super::JitError;
use super::codegen::{CompiledFunction, UnresolvedCall};
use super::memory::{ExecutableMemory, MemoryManager};
use super::x86_64::{CALL_REL32_LEN, JCC_REL32_LEN, MOV_IMM64_OFFSET};
use crate::bytecode::{Binder, FunctionId, FunctionKind};

/// Alignment of each function inside the code region.
const FUNCTION_ALIGNMENT: usize = 16;

/// A function after linking: its entry point and the final code bytes.
#[derive(Debug, Clone)]
pub struct LinkedFunction {
    pub id: FunctionId,
    pub entry_point: usize,
    pub code: Vec<u8>,
    pub instruction_offsets: Vec<usize>,
}

fn align_up(value: usize) -> usize {
    (value + FUNCTION_ALIGNMENT - 1) & !(FUNCTION_ALIGNMENT - 1)
}

fn patch_failed(what: &str, offset: usize) -> JitError {
    JitError::Internal(format!("{} at offset {:#x} cannot be patched", what, offset))
}

/// Link `pending` into executable memory.
///
/// Entry points are written to `binder` only once every placeholder has
/// been patched and the region is executable. On error the region is
/// released and `binder` is left untouched.
pub fn link(
    memory: &mut MemoryManager,
    binder: &mut Binder,
    pending: Vec<CompiledFunction>,
) -> Result<Vec<LinkedFunction>, JitError> {
    if pending.is_empty() {
        return Ok(Vec::new());
    }

    let mut starts = Vec::with_capacity(pending.len());
    let mut total = 0;
    for function in &pending {
        total = align_up(total);
        starts.push(total);
        total += function.code.len();
    }

    let mut region = ExecutableMemory::new(total)?;
    let base = region.as_ptr() as usize;
    let entries: HashMap<FunctionId, usize> = pending
        .iter()
        .zip(&starts)
        .map(|(function, start)| (function.id, base + start))
        .collect();

    let mut linked = Vec::with_capacity(pending.len());
    let mut image = vec![0xCC; total];

    for (mut function, start) in pending.into_iter().zip(starts) {
        let function_address = (base + start) as i64;

        for (offset, UnresolvedCall { callee, kind }) in
            std::mem::take(&mut function.unresolved_calls)
        {
            let definition = binder.definition(callee);
            let entry = entries
                .get(&callee)
                .copied()
                .or_else(|| definition.entry_point())
                .ok_or_else(|| JitError::UnresolvedSymbol(definition.name().to_string()))?;

            let patched = match kind {
                FunctionKind::External => function
                    .code
                    .patch_u64(offset + MOV_IMM64_OFFSET, entry as u64),
                FunctionKind::Managed => function.code.patch_rel32(
                    offset,
                    CALL_REL32_LEN,
                    entry as i64 - function_address,
                ),
            };
            if !patched {
                return Err(patch_failed("call", offset));
            }
        }

        for (offset, branch) in std::mem::take(&mut function.unresolved_branches) {
            let target = function
                .instruction_offsets
                .get(branch.target)
                .copied()
                .ok_or_else(|| {
                    JitError::UnresolvedSymbol(format!("instruction {}", branch.target))
                })?;
            if !function
                .code
                .patch_rel32(offset, branch.length, target as i64)
            {
                return Err(patch_failed("branch", offset));
            }
        }

        for (offset, handler) in std::mem::take(&mut function.unresolved_native_labels) {
            if !function.code.patch_rel32(
                offset,
                JCC_REL32_LEN,
                handler as i64 - function_address,
            ) {
                return Err(patch_failed("guard jump", offset));
            }
        }

        let code = function.code.into_code();
        image[start..start + code.len()].copy_from_slice(&code);
        linked.push(LinkedFunction {
            id: function.id,
            entry_point: base + start,
            code,
            instruction_offsets: function.instruction_offsets,
        });
    }

    region.write(0, &image)?;
    memory.commit(region)?;

    for function in &linked {
        binder.set_entry_point(function.id, function.entry_point);
    }

    debug!(
        functions = linked.len(),
        region_size = total,
        "linked load unit"
    );
    Ok(linked)
}
