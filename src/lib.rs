//! Kiln - a small managed-code VM
//!
//! Bytecode is verified by a type-level abstract interpreter and compiled
//! ahead of the first call to x86-64 machine code using the Windows x64
//! calling convention.

#[cfg(not(target_arch = "x86_64"))]
compile_error!("kiln generates x86-64 machine code and only builds for x86_64 targets");

pub mod bytecode;
pub mod config;
pub mod dispatch;
pub mod jit;
pub mod loader;
pub mod runtime;
pub mod types;
pub mod verifier;

// Re-export commonly used types
pub use bytecode::{Binder, FunctionDefinition, FunctionId, Instruction, ManagedFunction};
pub use config::RuntimeConfig;
pub use jit::{JitCompiler, JitError};
pub use loader::{Assembly, LoadError};
pub use runtime::VirtualMachine;
pub use types::{TypeId, TypeRegistry};
pub use verifier::{VerifyError, Verifier};
