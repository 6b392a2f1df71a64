//! An mmap-backed, bump-allocating [`MemoryManager`].
//!
//! Grounded in Cranelift's `cranelift-simplejit` use of the `region`
//! crate for W^X page management: code pages are mapped read-write while
//! the codegen driver is writing into them and flipped to read-execute
//! once a function finishes, rather than ever being simultaneously
//! writable and executable.

use region::Protection;
use retrojit_codegen::error::{CodegenError, CodegenResult};
use retrojit_codegen::memory::{FunctionExtent, MemoryManager, MemoryStatus};

const INITIAL_CODE_PAGES: usize = 1;
const INITIAL_DATA_PAGES: usize = 1;

struct Region {
    alloc: region::Allocation,
    len: usize,
}

impl Region {
    fn new(pages: usize) -> CodegenResult<Self> {
        let len = pages * page_size();
        let alloc = region::alloc(len, Protection::READ_WRITE)
            .map_err(|e| CodegenError::CompileError(format!("mmap failed: {e}")))?;
        Ok(Self { alloc, len })
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.alloc.as_mut_ptr::<u8>()
    }
}

fn page_size() -> usize {
    region::page::size()
}

/// Bump-allocates compiled functions into one or more read-write mmap
/// regions, flipping each region to read-execute once its current
/// function is finished. Not thread-safe on its own; `retrojit_codegen`'s
/// `Context` wraps it in a `memory_lock` mutex before every call.
pub struct MmapMemoryManager {
    code: Region,
    code_pos: usize,
    code_executable: bool,
    data: Region,
    data_pos: usize,
    function_start: usize,
    extent: FunctionExtent,
}

impl MmapMemoryManager {
    pub fn new() -> CodegenResult<Self> {
        Ok(Self {
            code: Region::new(INITIAL_CODE_PAGES)?,
            code_pos: 0,
            code_executable: false,
            data: Region::new(INITIAL_DATA_PAGES)?,
            data_pos: 0,
            function_start: 0,
            extent: FunctionExtent::default(),
        })
    }

    fn ensure_writable(&mut self) -> CodegenResult<()> {
        if self.code_executable {
            unsafe {
                region::protect(self.code.as_mut_ptr(), self.code.len, Protection::READ_WRITE)
                    .map_err(|e| CodegenError::CompileError(format!("mprotect rw failed: {e}")))?;
            }
            self.code_executable = false;
        }
        Ok(())
    }
}

impl MemoryManager for MmapMemoryManager {
    fn start_function(&mut self) -> CodegenResult<MemoryStatus> {
        self.ensure_writable()?;
        self.function_start = self.code_pos;
        if self.code_pos >= self.code.len {
            return Ok(MemoryStatus::Restart);
        }
        Ok(MemoryStatus::Ok)
    }

    fn end_function(&mut self, status: MemoryStatus) -> CodegenResult<()> {
        match status {
            MemoryStatus::Restart => {
                self.code_pos = self.function_start;
                Ok(())
            }
            MemoryStatus::Ok => {
                self.extent = FunctionExtent {
                    start: self.function_start,
                    end: self.code_pos,
                };
                unsafe {
                    region::protect(
                        self.code.as_mut_ptr(),
                        self.code.len,
                        Protection::READ_EXECUTE,
                    )
                        .map_err(|e| CodegenError::CompileError(format!("mprotect rx failed: {e}")))?;
                }
                self.code_executable = true;
                Ok(())
            }
        }
    }

    fn extend_limit(&mut self, page_factor: u32) -> CodegenResult<()> {
        let extra_pages = INITIAL_CODE_PAGES << page_factor.min(16);
        let mut grown = Region::new((self.code.len / page_size()) + extra_pages)?;
        let used = self.function_start;
        unsafe {
            std::ptr::copy_nonoverlapping(self.code.as_mut_ptr(), grown.as_mut_ptr(), used);
        }
        self.code = grown;
        self.code_pos = self.function_start;
        self.code_executable = false;
        Ok(())
    }

    fn get_break(&self) -> usize {
        self.code_pos
    }

    fn set_break(&mut self, pos: usize) -> CodegenResult<()> {
        if pos > self.code.len {
            return Err(CodegenError::MemoryFull);
        }
        self.code_pos = pos;
        Ok(())
    }

    fn get_function_extent(&self) -> FunctionExtent {
        self.extent
    }

    fn alloc_trampoline(&mut self, size: usize) -> CodegenResult<usize> {
        self.alloc_data(size, 16)
    }

    fn free_trampoline(&mut self, _addr: usize) {}

    fn alloc_closure(&mut self, size: usize) -> CodegenResult<usize> {
        self.alloc_data(size, 16)
    }

    fn free_closure(&mut self, _addr: usize) {}

    fn alloc_data(&mut self, size: usize, align: usize) -> CodegenResult<usize> {
        let aligned = (self.data_pos + align - 1) & !(align - 1);
        if aligned + size > self.data.len {
            return Err(CodegenError::OutOfMemory);
        }
        self.data_pos = aligned + size;
        Ok(aligned)
    }

    fn data_ptr(&mut self, offset: usize) -> *mut u8 {
        unsafe { self.code.as_mut_ptr().add(offset) }
    }

    fn capacity(&self) -> usize {
        self.code.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_end_records_a_nonempty_extent() {
        let mut mgr = MmapMemoryManager::new().unwrap();
        assert_eq!(mgr.start_function().unwrap(), MemoryStatus::Ok);
        mgr.set_break(mgr.get_break() + 8).unwrap();
        mgr.end_function(MemoryStatus::Ok).unwrap();
        let extent = mgr.get_function_extent();
        assert_eq!(extent.end - extent.start, 8);
    }

    #[test]
    fn restart_rewinds_to_the_function_start() {
        let mut mgr = MmapMemoryManager::new().unwrap();
        mgr.start_function().unwrap();
        let start = mgr.get_break();
        mgr.set_break(start + 4096 * 64).unwrap_or(());
        mgr.end_function(MemoryStatus::Restart).unwrap();
        assert_eq!(mgr.get_break(), start);
    }
}
