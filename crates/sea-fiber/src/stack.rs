//! Private fiber stacks: mmap a region with a leading guard page, then
//! `mprotect` the remainder read/write. Adapted from
//! `libs/fiber/src/stack/unix.rs` (DESIGN.md); unix-only, since this crate
//! targets a hosted Linux/macOS runtime rather than a multi-platform
//! kernel build.

use std::io;
use std::ptr;

/// Default stack size for a new fiber.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Minimum stack size accepted by [`FiberStack::new`], excluding the guard
/// page.
pub const MIN_STACK_SIZE: usize = 4096;

/// A private, guard-paged stack region owned by one [`crate::Fiber`].
pub struct FiberStack {
    /// Highest address (the stack grows down from here).
    top: usize,
    mmap_base: *mut libc::c_void,
    mmap_len: usize,
}

// Safety: the mapping is exclusively owned by the `FiberStack` (and, while
// a fiber is running, by the one worker thread executing it); fibers
// themselves are `!Send` at the `sea-fiber` level, but the stack mapping
// itself has no thread-affine OS state.
unsafe impl Send for FiberStack {}

impl FiberStack {
    pub fn new(requested_size: usize) -> io::Result<Self> {
        let size = requested_size.max(MIN_STACK_SIZE);
        let page_size = page_size();
        let mmap_len = size
            .checked_add(page_size)
            .expect("stack size overflow")
            .div_ceil(page_size)
            * page_size
            + page_size;

        // Safety: requesting an anonymous, non-executable mapping.
        let mmap = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mmap_len,
                libc::PROT_NONE,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if mmap == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // Safety: `mmap` succeeded and spans `mmap_len` bytes; we make
        // everything except the first (guard) page read/write.
        let rc = unsafe {
            libc::mprotect(
                mmap.cast::<u8>().add(page_size).cast(),
                mmap_len - page_size,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if rc != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::munmap(mmap, mmap_len);
            }
            return Err(err);
        }

        Ok(Self {
            top: mmap as usize + mmap_len,
            mmap_base: mmap,
            mmap_len,
        })
    }

    #[must_use]
    pub fn top(&self) -> usize {
        self.top
    }

    #[must_use]
    pub fn bottom(&self) -> usize {
        self.top - self.mmap_len
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        // Safety: `mmap_base`/`mmap_len` came from the matching `mmap` call
        // in `new`.
        unsafe {
            libc::munmap(self.mmap_base, self.mmap_len);
        }
    }
}

fn page_size() -> usize {
    // Safety: `sysconf` with `_SC_PAGESIZE` has no preconditions.
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(sz).expect("sysconf(_SC_PAGESIZE) returned a negative value")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_and_releases_a_stack() {
        let stack = FiberStack::new(DEFAULT_STACK_SIZE).unwrap();
        assert!(stack.top() > stack.bottom());
        assert!(stack.top() - stack.bottom() >= DEFAULT_STACK_SIZE);
    }

    #[test]
    fn rejects_below_minimum_by_clamping() {
        let stack = FiberStack::new(1).unwrap();
        assert!(stack.top() - stack.bottom() >= MIN_STACK_SIZE);
    }
}
