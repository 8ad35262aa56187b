//! Per-context memory quota.
//!
//! Every sandboxed context owns one `BoundedAllocator`.  Sample memory that a
//! script asks for (`ladspa.newBuffer` / `ladspa.resizeBuffer`) goes through
//! it, so a single plugin instance can never grow past its configured
//! ceiling.  The contract is the classic `lua_Alloc` one:
//!
//! - `new_size == 0`: free `ptr` (if any), return null.  Never fails.
//! - `ptr == null`: fresh allocation, admitted only if it fits the limit.
//! - growth: admitted on the delta; a rejected growth hands back the
//!   original block untouched.
//! - shrink: always succeeds.  If the underlying `realloc` fails the old
//!   block is kept, the accounting still drops to the smaller size.
//!
//! The quota is shared with the Luau heap of the same context.  The heap's
//! current size is recorded with [`BoundedAllocator::set_engine_usage`] and
//! counts against admission; the heap in turn is capped at whatever the
//! buffers leave over.

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default quota per context: 32 MiB.
pub const DEFAULT_LIMIT: usize = 32 << 20;

/// Why a sized request was not honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Admitting the request would push `allocated` past `limit`.
    QuotaExceeded { requested: usize, allocated: usize, limit: usize },
    /// The system allocator itself returned null.
    System,
}

#[derive(Debug)]
pub struct BoundedAllocator {
    allocated: AtomicUsize,
    limit: AtomicUsize,
    engine: AtomicUsize,
}

impl BoundedAllocator {
    pub fn new(limit: usize) -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            limit: AtomicUsize::new(limit),
            engine: AtomicUsize::new(0),
        }
    }

    pub fn with_limit_kb(kbytes: usize) -> Self {
        Self::new(kbytes << 10)
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// Bytes of the quota held by the engine heap.
    pub fn engine_usage(&self) -> usize {
        self.engine.load(Ordering::Relaxed)
    }

    pub fn set_engine_usage(&self, bytes: usize) {
        self.engine.store(bytes, Ordering::Relaxed);
    }

    /// What the engine heap may grow to given the blocks handed out here.
    pub fn engine_headroom(&self) -> usize {
        self.limit().saturating_sub(self.allocated())
    }

    /// Lower or raise the ceiling.  Memory already handed out is not
    /// reclaimed; only future growth is affected.
    pub fn set_limit_kb(&self, kbytes: usize) {
        self.limit.store(kbytes << 10, Ordering::Relaxed);
    }

    /// `allocated / limit`, for diagnostics.
    pub fn usage_factor(&self) -> f64 {
        let limit = self.limit();
        if limit == 0 {
            return if self.allocated() == 0 { 0.0 } else { f64::INFINITY };
        }
        self.allocated() as f64 / limit as f64
    }

    /// Reserve `delta` more bytes against the quota.
    fn admit(&self, delta: usize) -> Result<(), AllocError> {
        let limit = self.limit();
        let engine = self.engine_usage();
        self.allocated
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current
                    .checked_add(delta)
                    .filter(|&total| total.saturating_add(engine) <= limit)
            })
            .map(|_| ())
            .map_err(|current| AllocError::QuotaExceeded {
                requested: delta,
                allocated: current,
                limit,
            })
    }

    fn release(&self, delta: usize) {
        let _ = self
            .allocated
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(delta))
            });
    }

    /// Allocate, grow, shrink or free a block, reporting rejections.
    ///
    /// On `Err` nothing changed: the accounting is untouched and `ptr` (if
    /// any) is still the live block with its old size.
    ///
    /// # Safety
    /// `ptr` must be null or a block previously returned by this allocator
    /// whose current accounted size is `old_size`.
    pub unsafe fn try_realloc(
        &self,
        ptr: *mut c_void,
        old_size: usize,
        new_size: usize,
    ) -> Result<*mut c_void, AllocError> {
        if new_size == 0 {
            if !ptr.is_null() {
                unsafe { libc::free(ptr) };
                self.release(old_size);
            }
            return Ok(std::ptr::null_mut());
        }

        if ptr.is_null() {
            self.admit(new_size)?;
            let block = unsafe { libc::malloc(new_size) };
            if block.is_null() {
                self.release(new_size);
                return Err(AllocError::System);
            }
            return Ok(block);
        }

        if new_size > old_size {
            let delta = new_size - old_size;
            self.admit(delta)?;
            let block = unsafe { libc::realloc(ptr, new_size) };
            if block.is_null() {
                self.release(delta);
                return Err(AllocError::System);
            }
            return Ok(block);
        }

        // Shrink (or same size): never fails.
        let delta = old_size - new_size;
        let block = unsafe { libc::realloc(ptr, new_size) };
        self.release(delta);
        Ok(if block.is_null() { ptr } else { block })
    }

    /// The `lua_Alloc`-shaped entry point.
    ///
    /// Returns null for frees and for rejected fresh allocations; returns
    /// the original block for rejected growth.
    ///
    /// # Safety
    /// Same contract as [`BoundedAllocator::try_realloc`].
    pub unsafe fn allocate(&self, ptr: *mut c_void, old_size: usize, new_size: usize) -> *mut c_void {
        match unsafe { self.try_realloc(ptr, old_size, new_size) } {
            Ok(block) => block,
            Err(err) => {
                log::debug!(
                    "allocator: rejected {} -> {} bytes: {:?}",
                    old_size,
                    new_size,
                    err
                );
                ptr
            }
        }
    }
}

impl Default for BoundedAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_allocations_are_accounted() {
        let alloc = BoundedAllocator::new(1024);
        unsafe {
            let a = alloc.allocate(std::ptr::null_mut(), 0, 100);
            assert!(!a.is_null());
            let b = alloc.allocate(std::ptr::null_mut(), 0, 200);
            assert!(!b.is_null());
            assert_eq!(alloc.allocated(), 300);
            alloc.allocate(a, 100, 0);
            alloc.allocate(b, 200, 0);
        }
        assert_eq!(alloc.allocated(), 0);
    }

    #[test]
    fn fresh_allocation_past_limit_returns_null() {
        let alloc = BoundedAllocator::new(128);
        unsafe {
            let p = alloc.allocate(std::ptr::null_mut(), 0, 129);
            assert!(p.is_null());
        }
        assert_eq!(alloc.allocated(), 0);
    }

    #[test]
    fn rejected_growth_keeps_original_block() {
        let alloc = BoundedAllocator::new(256);
        unsafe {
            let p = alloc.allocate(std::ptr::null_mut(), 0, 200);
            assert!(!p.is_null());
            *(p as *mut u8) = 42;

            let q = alloc.allocate(p, 200, 512);
            assert_eq!(q, p);
            assert_eq!(*(q as *mut u8), 42);
            assert_eq!(alloc.allocated(), 200);

            assert!(matches!(
                alloc.try_realloc(p, 200, 512),
                Err(AllocError::QuotaExceeded { requested: 312, .. })
            ));
            alloc.allocate(p, 200, 0);
        }
    }

    #[test]
    fn shrink_always_releases_the_delta() {
        let alloc = BoundedAllocator::new(1000);
        unsafe {
            let p = alloc.allocate(std::ptr::null_mut(), 0, 1000);
            assert!(!p.is_null());
            let q = alloc.allocate(p, 1000, 10);
            assert!(!q.is_null());
            assert_eq!(alloc.allocated(), 10);
            alloc.allocate(q, 10, 0);
        }
        assert_eq!(alloc.allocated(), 0);
    }

    #[test]
    fn freeing_null_is_a_no_op() {
        let alloc = BoundedAllocator::new(10);
        unsafe {
            assert!(alloc.allocate(std::ptr::null_mut(), 0, 0).is_null());
        }
        assert_eq!(alloc.allocated(), 0);
    }

    #[test]
    fn usage_factor_tracks_allocations() {
        let alloc = BoundedAllocator::with_limit_kb(1);
        unsafe {
            let p = alloc.allocate(std::ptr::null_mut(), 0, 256);
            assert!((alloc.usage_factor() - 0.25).abs() < 1e-9);
            alloc.allocate(p, 256, 0);
        }
        assert_eq!(alloc.usage_factor(), 0.0);
    }

    #[test]
    fn engine_usage_counts_against_admission() {
        let alloc = BoundedAllocator::new(1000);
        alloc.set_engine_usage(700);
        unsafe {
            assert!(alloc.allocate(std::ptr::null_mut(), 0, 400).is_null());
            let p = alloc.allocate(std::ptr::null_mut(), 0, 300);
            assert!(!p.is_null());
            assert_eq!(alloc.engine_headroom(), 700);

            alloc.set_engine_usage(900);
            assert_eq!(alloc.allocate(p, 300, 301), p);
            assert_eq!(alloc.allocated(), 300);
            alloc.allocate(p, 300, 0);
        }
        assert_eq!(alloc.engine_headroom(), 1000);
    }

    #[test]
    fn lowering_the_limit_only_blocks_future_growth() {
        let alloc = BoundedAllocator::new(1024);
        unsafe {
            let p = alloc.allocate(std::ptr::null_mut(), 0, 512);
            alloc.set_limit_kb(0);
            assert_eq!(alloc.allocate(p, 512, 600), p);
            let q = alloc.allocate(p, 512, 100);
            assert_eq!(alloc.allocated(), 100);
            alloc.allocate(q, 100, 0);
        }
    }
}
