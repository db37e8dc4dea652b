//! Per-mutator nursery with bump-pointer allocation.
//!
//! Allocation is O(1):
//!
//! ```text
//! alloc_ptr += size;
//! return alloc_ptr - size;
//! ```
//!
//! The nursery only allocates; what survives a collection is the
//! collector's business. The orchestrator captures the allocation frontier
//! at the start of a cycle so a copying collector can bound its sweep.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Allocation alignment for nursery objects.
const NURSERY_ALIGN: usize = 8;

/// A mutator's young-generation allocation space.
pub struct Nursery {
    /// Start of the space.
    start: *mut u8,
    /// End of the space (start + size).
    end: *mut u8,
    /// Current allocation pointer (grows upward).
    alloc_ptr: AtomicPtr<u8>,
    /// Size of the space in bytes.
    size: usize,
}

// The nursery owns its memory; the bump pointer is atomic.
unsafe impl Send for Nursery {}
unsafe impl Sync for Nursery {}

impl Nursery {
    /// Allocate a nursery of `size` bytes.
    pub fn new(size: usize) -> Self {
        let layout = std::alloc::Layout::from_size_align(size, NURSERY_ALIGN)
            .expect("Invalid nursery layout");

        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            panic!("Failed to allocate nursery space of {} bytes", size);
        }

        let end = unsafe { ptr.add(size) };

        Self {
            start: ptr,
            end,
            alloc_ptr: AtomicPtr::new(ptr),
            size,
        }
    }

    /// Try to allocate `size` bytes; `None` means the nursery is exhausted
    /// and the caller must enter the collection slow path.
    #[inline]
    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let size = round_up(size);
        loop {
            let current = self.alloc_ptr.load(Ordering::Relaxed);
            if size > self.end as usize - current as usize {
                return None; // Space exhausted
            }
            let new_ptr = unsafe { current.add(size) };

            // CAS to claim the space
            if self
                .alloc_ptr
                .compare_exchange_weak(current, new_ptr, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return NonNull::new(current);
            }
        }
    }

    /// Current allocation frontier. Captured at cycle entry as the sweep
    /// limit for collectors.
    #[inline]
    pub fn alloc_ptr(&self) -> *mut u8 {
        self.alloc_ptr.load(Ordering::Acquire)
    }

    /// Check if a pointer lies within this nursery.
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        addr >= self.start as usize && addr < self.end as usize
    }

    /// Bytes allocated so far.
    #[inline]
    pub fn allocated(&self) -> usize {
        let current = self.alloc_ptr.load(Ordering::Relaxed);
        (current as usize).saturating_sub(self.start as usize)
    }

    /// Bytes still free.
    #[inline]
    pub fn free(&self) -> usize {
        self.size.saturating_sub(self.allocated())
    }

    /// Total size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Reset the allocation pointer to the start of the space.
    pub fn reset(&self) {
        self.alloc_ptr.store(self.start, Ordering::Release);
    }
}

impl std::fmt::Debug for Nursery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nursery")
            .field("size", &self.size)
            .field("allocated", &self.allocated())
            .finish()
    }
}

impl Drop for Nursery {
    fn drop(&mut self) {
        let layout = std::alloc::Layout::from_size_align(self.size, NURSERY_ALIGN)
            .expect("Invalid nursery layout");
        unsafe {
            std::alloc::dealloc(self.start, layout);
        }
    }
}

#[inline]
fn round_up(size: usize) -> usize {
    (size + NURSERY_ALIGN - 1) & !(NURSERY_ALIGN - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nursery_alloc_bumps() {
        let nursery = Nursery::new(4096);
        assert_eq!(nursery.allocated(), 0);

        let a = nursery.alloc(16).unwrap();
        let b = nursery.alloc(16).unwrap();
        assert_ne!(a, b);
        assert_eq!(nursery.allocated(), 32);
        assert!(nursery.contains(a.as_ptr()));
    }

    #[test]
    fn test_nursery_alloc_rounds_to_alignment() {
        let nursery = Nursery::new(4096);
        nursery.alloc(3).unwrap();
        assert_eq!(nursery.allocated(), 8);
    }

    #[test]
    fn test_nursery_exhaustion() {
        let nursery = Nursery::new(64);
        assert!(nursery.alloc(64).is_some());
        assert!(nursery.alloc(8).is_none());
    }

    #[test]
    fn test_nursery_reset() {
        let nursery = Nursery::new(128);
        nursery.alloc(64).unwrap();
        assert_eq!(nursery.free(), 64);

        nursery.reset();
        assert_eq!(nursery.allocated(), 0);
        assert!(nursery.alloc(128).is_some());
    }

    #[test]
    fn test_nursery_oversized_request_fails() {
        let nursery = Nursery::new(64);
        assert!(nursery.alloc(128).is_none());
        // The failed request must not consume space.
        assert_eq!(nursery.allocated(), 0);
    }
}
