//! JIT compilation for x86-64.
//!
//! - Executable memory allocation
//! - Code buffer and x86-64 instruction encoding
//! - Windows x64 calling convention
//! - Code generator over verified bytecode
//! - Guard handlers and the linker

pub mod calling_convention;
pub mod codebuf;
pub mod codegen;
pub mod disasm;
pub mod handlers;
pub mod linker;
pub mod memory;
pub mod operand_stack;
pub mod x86_64;

pub use codegen::{CodeGenerator, CompiledFunction, UnresolvedBranch, UnresolvedCall};
pub use disasm::disassemble;
pub use handlers::GuardHandlers;
pub use linker::LinkedFunction;
pub use memory::{MemoryError, MemoryManager};

use crate::bytecode::{Binder, ManagedFunction};
use crate::types::TypeRegistry;

/// Error type for code generation and linking.
#[derive(Debug, Clone, PartialEq)]
pub enum JitError {
    /// The generator hit a state verified input cannot produce
    Internal(String),
    UnresolvedSymbol(String),
    Memory(MemoryError),
}

impl std::fmt::Display for JitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JitError::Internal(msg) => write!(f, "internal JIT error: {}", msg),
            JitError::UnresolvedSymbol(symbol) => write!(f, "unresolved symbol '{}'", symbol),
            JitError::Memory(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for JitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JitError::Memory(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MemoryError> for JitError {
    fn from(e: MemoryError) -> Self {
        JitError::Memory(e)
    }
}

/// Runtime addresses baked into generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeHooks {
    /// Address of the VM's i64 call-depth counter
    pub call_depth: usize,
    pub call_depth_limit: i32,
    /// Heap pointer passed as the first argument to the allocators
    pub heap: usize,
    /// `extern "win64" fn(heap, element_size: i64, length: i32) -> *mut u8`
    pub new_array: usize,
    /// `extern "win64" fn(heap, size: i64) -> *mut u8`
    pub new_object: usize,
}

/// Compiles verified functions and links them in batches.
pub struct JitCompiler {
    memory: MemoryManager,
    handlers: GuardHandlers,
    hooks: RuntimeHooks,
    pending: Vec<CompiledFunction>,
}

impl JitCompiler {
    /// Create a compiler and emit the guard handlers.
    pub fn new(hooks: RuntimeHooks) -> Result<Self, JitError> {
        let mut memory = MemoryManager::new();
        let handlers = handlers::generate_handlers(&mut memory)?;
        Ok(Self {
            memory,
            handlers,
            hooks,
            pending: Vec::new(),
        })
    }

    pub fn handlers(&self) -> &GuardHandlers {
        &self.handlers
    }

    /// Generate code for a verified function and queue it for linking.
    pub fn compile(
        &mut self,
        types: &TypeRegistry,
        binder: &Binder,
        function: &ManagedFunction,
    ) -> Result<&CompiledFunction, JitError> {
        let compiled =
            CodeGenerator::new(types, binder, &self.handlers, &self.hooks).generate(function)?;
        self.pending.push(compiled);
        let last = self.pending.len() - 1;
        Ok(&self.pending[last])
    }

    /// Number of functions waiting to be linked.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop functions compiled since the last link.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }

    /// Link every pending function into executable memory and assign
    /// entry points in `binder`. Pending functions are consumed even when
    /// linking fails.
    pub fn make_executable(&mut self, binder: &mut Binder) -> Result<Vec<LinkedFunction>, JitError> {
        let pending = std::mem::take(&mut self.pending);
        linker::link(&mut self.memory, binder, pending)
    }

    /// Total bytes of code memory mapped so far.
    pub fn allocated_bytes(&self) -> usize {
        self.memory.allocated_bytes()
    }
}

impl std::fmt::Debug for JitCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitCompiler")
            .field("handlers", &self.handlers)
            .field("hooks", &self.hooks)
            .field("pending", &self.pending.len())
            .finish()
    }
}
