//! Executable memory management.
//!
//! Code regions are mapped read+write, filled by the linker and then
//! flipped to read+execute. Uses mmap/mprotect on Unix and
//! VirtualAlloc/VirtualProtect on Windows.

use std::ptr::NonNull;

/// Error type for memory operations.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryError {
    AllocationFailed(String),
    ProtectionFailed(String),
    InvalidSize,
    /// Write to a region that is already executable
    ReadOnly,
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryError::AllocationFailed(reason) => {
                write!(f, "memory allocation failed: {}", reason)
            }
            MemoryError::ProtectionFailed(reason) => {
                write!(f, "memory protection change failed: {}", reason)
            }
            MemoryError::InvalidSize => write!(f, "invalid memory size"),
            MemoryError::ReadOnly => write!(f, "memory is no longer writable"),
        }
    }
}

impl std::error::Error for MemoryError {}

/// A block of memory that can be made executable.
///
/// The memory is initially writable. Call `make_executable()` before
/// calling into it.
pub struct ExecutableMemory {
    ptr: NonNull<u8>,
    size: usize,
    executable: bool,
}

impl ExecutableMemory {
    /// Allocate a writable block of at least `size` bytes.
    pub fn new(size: usize) -> Result<Self, MemoryError> {
        if size == 0 {
            return Err(MemoryError::InvalidSize);
        }

        let page_size = page_size();
        let aligned_size = (size + page_size - 1) & !(page_size - 1);
        let ptr = os::alloc(aligned_size)?;

        Ok(Self {
            ptr,
            size: aligned_size,
            executable: false,
        })
    }

    /// Get a pointer to the memory.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Get the size of the allocated memory.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Write bytes to the memory at the given offset.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
        if self.executable {
            return Err(MemoryError::ReadOnly);
        }
        if offset + data.len() > self.size {
            return Err(MemoryError::InvalidSize);
        }

        // SAFETY: bounds checked above and the mapping is writable
        unsafe {
            let dest = self.ptr.as_ptr().add(offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dest, data.len());
        }
        Ok(())
    }

    /// Make the memory executable (and read-only).
    pub fn make_executable(&mut self) -> Result<(), MemoryError> {
        if self.executable {
            return Ok(());
        }
        os::protect_exec(self.ptr, self.size)?;
        self.executable = true;
        Ok(())
    }

    /// Check if the memory is executable.
    pub fn is_executable(&self) -> bool {
        self.executable
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        os::free(self.ptr, self.size);
    }
}

impl std::fmt::Debug for ExecutableMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableMemory")
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .field("executable", &self.executable)
            .finish()
    }
}

/// Owns every code region of a VM.
#[derive(Debug, Default)]
pub struct MemoryManager {
    regions: Vec<ExecutableMemory>,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new writable code region of at least `size` bytes.
    pub fn allocate_code(&mut self, size: usize) -> Result<&mut ExecutableMemory, MemoryError> {
        let region = ExecutableMemory::new(size)?;
        self.regions.push(region);
        let last = self.regions.len() - 1;
        Ok(&mut self.regions[last])
    }

    /// Take ownership of a filled region and make it executable.
    pub fn commit(&mut self, region: ExecutableMemory) -> Result<(), MemoryError> {
        self.regions.push(region);
        self.make_executable()
    }

    /// Flip every region that is still writable to read+execute.
    pub fn make_executable(&mut self) -> Result<(), MemoryError> {
        for region in self.regions.iter_mut().filter(|r| !r.is_executable()) {
            region.make_executable()?;
        }
        Ok(())
    }

    /// Total bytes mapped.
    pub fn allocated_bytes(&self) -> usize {
        self.regions.iter().map(|r| r.size()).sum()
    }
}

#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

#[cfg(windows)]
fn page_size() -> usize {
    4096
}

#[cfg(unix)]
mod os {
    use super::MemoryError;
    use std::ptr::{self, NonNull};

    pub(super) fn alloc(size: usize) -> Result<NonNull<u8>, MemoryError> {
        // SAFETY: anonymous private mapping, no file descriptor involved
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        NonNull::new(ptr as *mut u8)
            .ok_or_else(|| MemoryError::AllocationFailed("mmap returned null".to_string()))
    }

    pub(super) fn protect_exec(ptr: NonNull<u8>, size: usize) -> Result<(), MemoryError> {
        // SAFETY: ptr/size describe a mapping created by `alloc`
        let rc = unsafe {
            libc::mprotect(
                ptr.as_ptr() as *mut libc::c_void,
                size,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        if rc != 0 {
            return Err(MemoryError::ProtectionFailed(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        Ok(())
    }

    pub(super) fn free(ptr: NonNull<u8>, size: usize) {
        // SAFETY: ptr/size describe a mapping created by `alloc`
        unsafe {
            libc::munmap(ptr.as_ptr() as *mut libc::c_void, size);
        }
    }
}

#[cfg(windows)]
mod os {
    use super::MemoryError;
    use std::ptr::NonNull;
    use windows_sys::Win32::System::Memory::{
        MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READ, PAGE_READWRITE, VirtualAlloc,
        VirtualFree, VirtualProtect,
    };

    pub(super) fn alloc(size: usize) -> Result<NonNull<u8>, MemoryError> {
        // SAFETY: fresh reservation, no address requested
        let ptr = unsafe {
            VirtualAlloc(std::ptr::null_mut(), size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE)
                as *mut u8
        };
        NonNull::new(ptr).ok_or_else(|| {
            MemoryError::AllocationFailed(std::io::Error::last_os_error().to_string())
        })
    }

    pub(super) fn protect_exec(ptr: NonNull<u8>, size: usize) -> Result<(), MemoryError> {
        let mut old_protect = 0u32;
        // SAFETY: ptr/size describe a region created by `alloc`
        let ok = unsafe {
            VirtualProtect(ptr.as_ptr() as *mut _, size, PAGE_EXECUTE_READ, &mut old_protect)
        };
        if ok == 0 {
            return Err(MemoryError::ProtectionFailed(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        Ok(())
    }

    pub(super) fn free(ptr: NonNull<u8>, _size: usize) {
        // SAFETY: ptr is the base of a region created by `alloc`
        unsafe {
            VirtualFree(ptr.as_ptr() as *mut _, 0, MEM_RELEASE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_memory() {
        let mem = ExecutableMemory::new(100).unwrap();
        assert!(mem.size() >= 100);
        assert_eq!(mem.size() % page_size(), 0);
        assert!(!mem.is_executable());
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(ExecutableMemory::new(0), Err(MemoryError::InvalidSize)));
    }

    #[test]
    fn test_write_bounds() {
        let mut mem = ExecutableMemory::new(4096).unwrap();
        mem.write(0, &[0x90, 0x90, 0xC3]).unwrap();
        let size = mem.size();
        assert_eq!(mem.write(size - 1, &[0x90, 0x90]), Err(MemoryError::InvalidSize));
    }

    #[test]
    fn test_cannot_write_after_executable() {
        let mut mem = ExecutableMemory::new(4096).unwrap();
        mem.make_executable().unwrap();
        assert!(mem.is_executable());
        assert_eq!(mem.write(0, &[0x90]), Err(MemoryError::ReadOnly));
    }

    #[test]
    fn test_manager_flips_all_regions() {
        let mut manager = MemoryManager::new();
        manager.allocate_code(16).unwrap().write(0, &[0xC3]).unwrap();
        manager.allocate_code(5000).unwrap();
        assert!(manager.allocated_bytes() >= 5016);

        manager.make_executable().unwrap();
        assert!(manager.regions.iter().all(|r| r.is_executable()));
    }

    #[test]
    fn test_commit_takes_region() {
        let mut manager = MemoryManager::new();
        let mut region = ExecutableMemory::new(64).unwrap();
        region.write(0, &[0xC3]).unwrap();
        let size = region.size();

        manager.commit(region).unwrap();
        assert_eq!(manager.allocated_bytes(), size);
        assert!(manager.regions[0].is_executable());
    }
}
