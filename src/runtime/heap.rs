//! Heap for arrays and objects.
//!
//! Every allocation is a zeroed block of 8-byte words kept alive until the
//! heap is dropped. There is no collection.
//!
//! Array layout: `[length: i32][padding: 4][elements...]`. Objects are a
//! plain sequence of fields as laid out by the class metadata.

use std::cell::RefCell;

use crate::jit::codegen::ARRAY_HEADER_SIZE;
use crate::jit::handlers::{GuardFault, report};

const WORD: usize = std::mem::size_of::<u64>();

/// Largest array, header included, the heap hands out.
pub const MAX_ARRAY_BYTES: usize = 1 << 30;

/// Heap owned by a VM.
#[derive(Debug, Default)]
pub struct Heap {
    blocks: RefCell<Vec<Box<[u64]>>>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `size` zeroed bytes, 8-byte aligned. Zero-sized requests
    /// still return a unique pointer.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        let words = size.div_ceil(WORD).max(1);
        let mut block = vec![0u64; words].into_boxed_slice();
        let ptr = block.as_mut_ptr() as *mut u8;
        self.blocks.borrow_mut().push(block);
        ptr
    }

    /// Allocate an array of `length` elements of `element_size` bytes.
    /// Returns `None` for a negative length or an array larger than
    /// [`MAX_ARRAY_BYTES`].
    pub fn allocate_array(&self, element_size: usize, length: i32) -> Option<*mut u8> {
        let count = usize::try_from(length).ok()?;
        let bytes = element_size
            .checked_mul(count)?
            .checked_add(ARRAY_HEADER_SIZE as usize)
            .filter(|&bytes| bytes <= MAX_ARRAY_BYTES)?;
        let ptr = self.allocate(bytes);
        // SAFETY: the block holds at least the header
        unsafe { (ptr as *mut i32).write(length) };
        Some(ptr)
    }

    /// Number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.blocks.borrow().len()
    }

    /// Total bytes held by the heap.
    pub fn allocated_bytes(&self) -> usize {
        self.blocks.borrow().iter().map(|b| b.len() * WORD).sum()
    }
}

/// Array allocation callback for generated code.
///
/// # Safety
/// `heap` must point to a live [`Heap`].
pub unsafe extern "win64" fn new_array(heap: *const Heap, element_size: i64, length: i32) -> *mut u8 {
    // SAFETY: generated code passes the VM's heap address
    let heap = unsafe { &*heap };
    heap.allocate_array(element_size as usize, length)
        .unwrap_or_else(|| report(GuardFault::InvalidArraySize))
}

/// Object allocation callback for generated code.
///
/// # Safety
/// `heap` must point to a live [`Heap`].
pub unsafe extern "win64" fn new_object(heap: *const Heap, size: i64) -> *mut u8 {
    // SAFETY: generated code passes the VM's heap address
    let heap = unsafe { &*heap };
    heap.allocate(size as usize)
}
