use std::cell::Cell;
use std::path::Path;

use tracing::{debug, info, warn};

use super::heap::{self, Heap};
use super::native;
use crate::bytecode::{Binder, FunctionDefinition, FunctionId, ManagedFunction, display_signature};
use crate::config::RuntimeConfig;
use crate::jit::{JitCompiler, JitError, RuntimeHooks, disassemble};
use crate::loader::{self, Assembly, LoadError, Loader};
use crate::types::{TypeId, TypeRegistry, TypeSnapshot};
use crate::verifier::Verifier;

/// State generated code reads and writes through raw addresses. Boxed so
/// the addresses stay fixed for the life of the VM.
#[derive(Debug, Default)]
struct RuntimeState {
    call_depth: Cell<i64>,
    heap: Heap,
}

/// Registry sizes before a load unit.
#[derive(Debug, Clone, Copy)]
struct UnitSnapshot {
    types: TypeSnapshot,
    functions: usize,
}

/// A managed-code VM: type registry, binder, JIT and runtime state.
pub struct VirtualMachine {
    config: RuntimeConfig,
    types: TypeRegistry,
    binder: Binder,
    functions: Vec<ManagedFunction>,
    jit: JitCompiler,
    state: Box<RuntimeState>,
}

impl VirtualMachine {
    /// Create a VM with the native library bound.
    pub fn new(config: RuntimeConfig) -> Result<Self, JitError> {
        let state = Box::new(RuntimeState::default());
        let hooks = RuntimeHooks {
            call_depth: state.call_depth.as_ptr() as usize,
            call_depth_limit: config.call_depth_limit(),
            heap: &state.heap as *const Heap as usize,
            new_array: heap::new_array as usize,
            new_object: heap::new_object as usize,
        };
        let jit = JitCompiler::new(hooks)?;

        let mut vm = Self {
            config,
            types: TypeRegistry::new(),
            binder: Binder::new(),
            functions: Vec::new(),
            jit,
            state,
        };

        for function in native::standard_library() {
            let definition = FunctionDefinition::external(
                function.name,
                function.params,
                function.return_type,
                function.address,
            );
            if vm.binder.define(&vm.types, definition).is_none() {
                return Err(JitError::Internal(format!(
                    "native '{}' bound twice",
                    function.name
                )));
            }
        }
        Ok(vm)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn binder(&self) -> &Binder {
        &self.binder
    }

    /// Linked managed functions, in load order.
    pub fn functions(&self) -> &[ManagedFunction] {
        &self.functions
    }

    /// Bind a native function for managed code to call.
    ///
    /// `address` must be an `extern "win64"` function matching the
    /// signature.
    pub fn define_native(
        &mut self,
        name: &str,
        params: Vec<TypeId>,
        return_type: TypeId,
        address: usize,
    ) -> Result<FunctionId, LoadError> {
        let definition = FunctionDefinition::external(name, params, return_type, address);
        let signature = display_signature(&self.types, &definition);
        self.binder
            .define(&self.types, definition)
            .ok_or(LoadError::DuplicateFunction(signature))
    }

    /// Read, load and link an assembly file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), LoadError> {
        let assembly = loader::read_assembly(path)?;
        self.load_assembly(&assembly)
    }

    /// Load, verify, compile and link an assembly.
    ///
    /// A unit that fails at any stage leaves no classes or functions
    /// behind.
    pub fn load_assembly(&mut self, assembly: &Assembly) -> Result<(), LoadError> {
        let snapshot = self.snapshot();
        self.link_unit(assembly).inspect_err(|e| {
            warn!(error = %e, "load unit rejected");
            self.rollback(snapshot);
        })
    }

    /// Load and verify an assembly without generating code. Nothing it
    /// defines is kept.
    pub fn check_assembly(&mut self, assembly: &Assembly) -> Result<usize, LoadError> {
        let snapshot = self.snapshot();
        let result = self.load_and_verify(assembly).map(|functions| functions.len());
        self.rollback(snapshot);
        result
    }

    fn snapshot(&self) -> UnitSnapshot {
        UnitSnapshot {
            types: self.types.snapshot(),
            functions: self.binder.len(),
        }
    }

    fn rollback(&mut self, snapshot: UnitSnapshot) {
        self.jit.discard_pending();
        self.binder.truncate(snapshot.functions);
        self.types.truncate(snapshot.types);
    }

    fn link_unit(&mut self, assembly: &Assembly) -> Result<(), LoadError> {
        let mut functions = self.load_and_verify(assembly)?;

        for function in &functions {
            self.jit.compile(&self.types, &self.binder, function)?;
        }
        let linked = self.jit.make_executable(&mut self.binder)?;

        for (function, native) in functions.iter_mut().zip(linked) {
            debug_assert_eq!(function.id(), native.id);
            function.attach_native(native.code, native.instruction_offsets);
        }

        info!(
            functions = functions.len(),
            code_bytes = self.jit.allocated_bytes(),
            "assembly linked"
        );
        self.functions.extend(functions);
        Ok(())
    }

    fn load_and_verify(&mut self, assembly: &Assembly) -> Result<Vec<ManagedFunction>, LoadError> {
        let mut functions = Loader::new(&mut self.types, &mut self.binder).load(assembly)?;

        let mut verifier = Verifier::new(&self.types, &self.binder);
        for function in &mut functions {
            verifier.verify_function(function).map_err(|error| LoadError::Verify {
                function: display_signature(&self.types, self.binder.definition(function.id())),
                error,
            })?;
        }
        debug!(functions = functions.len(), "assembly verified");
        Ok(functions)
    }

    /// Native entry point of a compiled or external function, by lookup
    /// key (`name(Int Float)` or `Class::name(...)`).
    pub fn entry_point(&self, signature: &str) -> Option<usize> {
        let id = self.binder.get_function(signature)?;
        self.binder.definition(id).entry_point()
    }

    /// Run `main() Int` and return its result.
    pub fn run_main(&self) -> Result<i32, LoadError> {
        let entry = self
            .entry_point("main()")
            .ok_or_else(|| LoadError::UndefinedFunction("main()".to_string()))?;

        self.state.call_depth.set(0);
        // SAFETY: `main() Int` was verified and linked with this signature,
        // and the code region lives as long as `self.jit`
        let main: extern "win64" fn() -> i32 = unsafe { std::mem::transmute(entry) };
        let result = main();
        debug!(result, "main returned");
        Ok(result)
    }

    /// Current managed call depth.
    pub fn call_depth(&self) -> i64 {
        self.state.call_depth.get()
    }

    pub fn heap(&self) -> &Heap {
        &self.state.heap
    }

    /// Listing of every linked managed function.
    pub fn disassembly(&self) -> String {
        self.functions
            .iter()
            .map(|f| disassemble(&self.types, &self.binder, f))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl std::fmt::Debug for VirtualMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualMachine")
            .field("config", &self.config)
            .field("functions", &self.functions.len())
            .field("jit", &self.jit)
            .finish()
    }
}
