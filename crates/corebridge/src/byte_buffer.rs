//! Engine-allocated byte buffers.
//!
//! `ByteBuffer` adopts a `*const ByteArray` returned by the engine (inline
//! failure payloads, callback payloads) and frees it through the engine on
//! drop. Reads borrow from `self`, so no read can outlive the free.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use corebridge_core::engine::NativeEngine;
use corebridge_core::sys::ByteArray;

pub struct ByteBuffer {
    engine: Arc<dyn NativeEngine>,
    ptr: NonNull<ByteArray>,
}

// Safety: the buffer is exclusively owned by this value until drop and the
// engine's free entry point may be called from any thread.
unsafe impl Send for ByteBuffer {}
unsafe impl Sync for ByteBuffer {}

impl ByteBuffer {
    /// Adopt an engine buffer. Returns `None` for null.
    ///
    /// # Safety
    /// `ptr` must be null or a buffer allocated by `engine` that nobody else
    /// will free.
    pub unsafe fn from_raw(engine: Arc<dyn NativeEngine>, ptr: *const ByteArray) -> Option<Self> {
        NonNull::new(ptr as *mut ByteArray).map(|ptr| Self { engine, ptr })
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // Safety: the buffer is live until drop.
        unsafe { self.ptr.as_ref().as_slice() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lossy UTF-8 view. Engine failure messages are decoded this way.
    pub fn to_utf8(&self) -> String {
        String::from_utf8_lossy(self.as_slice()).into_owned()
    }

    /// Copy out the contents, freeing the native buffer.
    pub fn into_vec(self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl Drop for ByteBuffer {
    fn drop(&mut self) {
        tracing::trace!(ptr = ?self.ptr, "freeing native byte array");
        // Safety: adopted in from_raw, freed exactly once here.
        unsafe { self.engine.byte_array_free(self.ptr.as_ptr()) };
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len())
            .finish()
    }
}
