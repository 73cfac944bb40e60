//! Runtime: the VM container, its heap and the native library.

pub mod heap;
pub mod native;
mod vm;

pub use heap::Heap;
pub use native::NativeFunction;
pub use vm::VirtualMachine;
