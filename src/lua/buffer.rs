//! Sample buffers exposed to scripts as indexable userdata.
//!
//! A buffer is either *external* (the host owns the memory and binds it via
//! `connect_port`) or *internal* (allocated through the context's
//! [`BoundedAllocator`] and freed on drop).  Scripts index buffers 1-based.
//!
//! Two accessor families exist on purpose: `get`/`set` check bounds and
//! null pointers, `get_unchecked`/`set_unchecked` do not.  The script-facing
//! metamethods use the checked pair unless the crate is built with the
//! `unchecked-index` feature in a release profile, in which case an
//! out-of-range index from a script is undefined behaviour.

use std::ffi::c_void;
use std::sync::Arc;

use mlua::{MetaMethod, UserData, UserDataMethods};

use super::alloc::{AllocError, BoundedAllocator};
use crate::error::{PluginError, Result};
use crate::plugin::types::Sample;

const SAMPLE_SIZE: usize = std::mem::size_of::<Sample>();

pub struct PortBuffer {
    ptr: *mut Sample,
    len: usize,
    /// `Some` for internal buffers: the allocator that owns `ptr`.
    owner: Option<Arc<BoundedAllocator>>,
}

// SAFETY: a buffer belongs to exactly one context and is only touched from
// the thread currently driving that context.  The host guarantees an
// external pointer stays valid between `connect_port` and the next `run`.
unsafe impl Send for PortBuffer {}

impl PortBuffer {
    /// A host-bound buffer.  Null until the host connects it.
    pub fn external() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            len: 0,
            owner: None,
        }
    }

    /// A buffer owning `count` zeroed samples drawn from `allocator`.
    /// Running out of quota here is a hard error.
    pub fn internal(allocator: Arc<BoundedAllocator>, count: usize) -> Result<Self> {
        let mut buffer = Self {
            ptr: std::ptr::null_mut(),
            len: 0,
            owner: Some(allocator),
        };
        if count > 0 && buffer.resize(count) != count {
            return Err(PluginError::OutOfMemory(format!(
                "cannot allocate a buffer of {count} samples"
            )));
        }
        Ok(buffer)
    }

    pub fn is_external(&self) -> bool {
        self.owner.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const Sample {
        self.ptr
    }

    /// Bind host memory.  Only meaningful for external buffers.
    pub fn connect(&mut self, data: *mut Sample) {
        debug_assert!(self.is_external(), "connect on an internal buffer");
        self.ptr = data;
    }

    /// Set the visible length of an external buffer for the current block.
    pub fn set_len(&mut self, len: usize) {
        debug_assert!(self.is_external(), "set_len on an internal buffer");
        self.len = len;
    }

    /// Resize an internal buffer to `count` samples.
    ///
    /// Shrinking always succeeds.  Growth past the quota is silently
    /// refused and the old contents stay in place, so callers must look at
    /// the returned length.  New samples are zeroed.  External buffers are
    /// never resized.
    pub fn resize(&mut self, count: usize) -> usize {
        let Some(owner) = self.owner.as_ref() else {
            return self.len;
        };
        let Some(new_size) = count.checked_mul(SAMPLE_SIZE) else {
            return self.len;
        };
        let old_size = self.len * SAMPLE_SIZE;

        // SAFETY: `ptr` is null or came from `owner` with `old_size` bytes.
        match unsafe { owner.try_realloc(self.ptr as *mut c_void, old_size, new_size) } {
            Ok(block) => {
                let old_len = self.len;
                self.ptr = block as *mut Sample;
                self.len = count;
                if count > old_len {
                    // SAFETY: the block now holds `count` samples.
                    unsafe {
                        std::ptr::write_bytes(self.ptr.add(old_len), 0, count - old_len);
                    }
                }
            }
            Err(AllocError::QuotaExceeded { allocated, limit, .. }) => {
                log::debug!(
                    "buffer: growth to {} samples refused ({} of {} bytes in use)",
                    count,
                    allocated,
                    limit
                );
            }
            Err(AllocError::System) => {
                log::warn!("buffer: system allocator refused {} bytes", new_size);
            }
        }
        self.len
    }

    /// Checked read (0-based).
    pub fn get(&self, index: usize) -> Option<Sample> {
        if self.ptr.is_null() || index >= self.len {
            return None;
        }
        // SAFETY: non-null and in bounds.
        Some(unsafe { *self.ptr.add(index) })
    }

    /// Checked write (0-based).  Returns false if nothing was written.
    pub fn set(&mut self, index: usize, value: Sample) -> bool {
        if self.ptr.is_null() || index >= self.len {
            return false;
        }
        // SAFETY: non-null and in bounds.
        unsafe { *self.ptr.add(index) = value };
        true
    }

    /// # Safety
    /// `ptr` must be non-null and `index < len`.
    #[inline(always)]
    pub unsafe fn get_unchecked(&self, index: usize) -> Sample {
        unsafe { *self.ptr.add(index) }
    }

    /// # Safety
    /// `ptr` must be non-null and `index < len`.
    #[inline(always)]
    pub unsafe fn set_unchecked(&mut self, index: usize, value: Sample) {
        unsafe { *self.ptr.add(index) = value };
    }

    /// View the current block.  Empty while unconnected.
    pub fn as_slice(&self) -> &[Sample] {
        if self.ptr.is_null() {
            return &[];
        }
        // SAFETY: `len` samples are valid behind a non-null `ptr`.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for PortBuffer {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.take() {
            // SAFETY: internal blocks always come from `owner`.
            unsafe {
                owner.allocate(self.ptr as *mut c_void, self.len * SAMPLE_SIZE, 0);
            }
        }
    }
}

#[cfg(any(debug_assertions, not(feature = "unchecked-index")))]
mod access {
    use super::*;

    /// 0-based offset of a 1-based script index, if it has one.
    fn offset(index: i64) -> Option<usize> {
        index.checked_sub(1).and_then(|i| usize::try_from(i).ok())
    }

    #[inline]
    pub fn read(buffer: &PortBuffer, index: i64) -> mlua::Result<Sample> {
        offset(index)
            .and_then(|i| buffer.get(i))
            .ok_or_else(|| out_of_bounds(buffer, index))
    }

    #[inline]
    pub fn write(buffer: &mut PortBuffer, index: i64, value: Sample) -> mlua::Result<()> {
        match offset(index) {
            Some(i) if buffer.set(i, value) => Ok(()),
            _ => Err(out_of_bounds(buffer, index)),
        }
    }

    fn out_of_bounds(buffer: &PortBuffer, index: i64) -> mlua::Error {
        if buffer.ptr.is_null() {
            mlua::Error::runtime("buffer is empty")
        } else {
            mlua::Error::runtime(format!(
                "buffer index {} out of bounds (length {})",
                index, buffer.len
            ))
        }
    }
}

#[cfg(all(not(debug_assertions), feature = "unchecked-index"))]
mod access {
    use super::*;

    #[inline(always)]
    pub fn read(buffer: &PortBuffer, index: i64) -> mlua::Result<Sample> {
        // SAFETY: none; out-of-range script access is undefined behaviour
        // in this build.
        Ok(unsafe { buffer.get_unchecked(index.wrapping_sub(1) as usize) })
    }

    #[inline(always)]
    pub fn write(buffer: &mut PortBuffer, index: i64, value: Sample) -> mlua::Result<()> {
        // SAFETY: see `read`.
        unsafe { buffer.set_unchecked(index.wrapping_sub(1) as usize, value) };
        Ok(())
    }
}

impl UserData for PortBuffer {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |_, this, index: i64| {
            access::read(this, index).map(f64::from)
        });
        methods.add_meta_method_mut(
            MetaMethod::NewIndex,
            |_, this, (index, value): (i64, f64)| access::write(this, index, value as Sample),
        );
        methods.add_meta_method(MetaMethod::Len, |_, this, ()| Ok(this.len));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_buffer_is_zeroed_and_accounted() {
        let alloc = Arc::new(BoundedAllocator::new(1024));
        let buffer = PortBuffer::internal(alloc.clone(), 16).unwrap();
        assert_eq!(buffer.len(), 16);
        assert!(buffer.as_slice().iter().all(|&s| s == 0.0));
        assert_eq!(alloc.allocated(), 16 * SAMPLE_SIZE);
        drop(buffer);
        assert_eq!(alloc.allocated(), 0);
    }

    #[test]
    fn internal_buffer_past_quota_fails_construction() {
        let alloc = Arc::new(BoundedAllocator::new(64));
        let err = PortBuffer::internal(alloc.clone(), 1000).err().unwrap();
        assert!(matches!(err, PluginError::OutOfMemory(_)));
        assert_eq!(alloc.allocated(), 0);
    }

    #[test]
    fn refused_growth_keeps_contents() {
        let alloc = Arc::new(BoundedAllocator::new(16 * SAMPLE_SIZE));
        let mut buffer = PortBuffer::internal(alloc.clone(), 8).unwrap();
        assert!(buffer.set(7, 0.5));
        assert_eq!(buffer.resize(1024), 8);
        assert_eq!(buffer.get(7), Some(0.5));
        assert_eq!(buffer.resize(4), 4);
        assert_eq!(alloc.allocated(), 4 * SAMPLE_SIZE);
        assert_eq!(buffer.resize(0), 0);
        assert_eq!(alloc.allocated(), 0);
    }

    #[cfg(any(debug_assertions, not(feature = "unchecked-index")))]
    #[test]
    fn extreme_script_indices_are_out_of_bounds() {
        let alloc = Arc::new(BoundedAllocator::new(1024));
        let mut buffer = PortBuffer::internal(alloc, 4).unwrap();
        for index in [i64::MIN, -1, 0, 5, i64::MAX] {
            assert!(access::read(&buffer, index).is_err(), "{index}");
            assert!(access::write(&mut buffer, index, 1.0).is_err(), "{index}");
        }
        assert!(access::write(&mut buffer, 4, 0.5).is_ok());
        assert_eq!(access::read(&buffer, 4).unwrap(), 0.5);
    }

    #[test]
    fn external_buffer_reads_host_memory() {
        let mut host = vec![0.25f32, 0.5, 0.75];
        let mut buffer = PortBuffer::external();
        assert_eq!(buffer.get(0), None);

        buffer.connect(host.as_mut_ptr());
        buffer.set_len(host.len());
        assert_eq!(buffer.get(2), Some(0.75));
        assert_eq!(buffer.get(3), None);
        assert!(buffer.set(0, -1.0));
        assert_eq!(buffer.resize(100), 3);
        drop(buffer);
        assert_eq!(host[0], -1.0);
    }
}
