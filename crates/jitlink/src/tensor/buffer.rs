use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::slice;

use crate::error::{Error, Result};

const BUFFER_ALIGN: usize = 16;

/// Zero-initialized host allocation backing a tensor the engine views without copying.
///
/// The buffer never moves once allocated, so pointers handed to the engine stay valid for
/// as long as the owning [`Tensor`](super::Tensor) holds it.
pub(crate) struct RawBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// SAFETY: RawBuffer uniquely owns its allocation; no aliasing handles exist.
unsafe impl Send for RawBuffer {}

impl RawBuffer {
    pub(crate) fn zeroed(len: usize) -> Result<Self> {
        let layout = Layout::from_size_align(len.max(1), BUFFER_ALIGN)
            .map_err(|err| Error::marshal(format!("invalid tensor buffer layout: {err}")))?;
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            Error::marshal(format!("failed to allocate {len} bytes for tensor buffer"))
        })?;
        Ok(Self { ptr, len, layout })
    }

    pub(crate) fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: unique borrow of an allocation of at least len bytes.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}
