//! Pinned scratch values.
//!
//! A `Pinned<T>` keeps a value at a fixed heap address until it is dropped.
//! The address may be handed to native code; it stays valid and unmoved for
//! exactly the lifetime of the `Pinned`. `Scope` owns these type-erased so a
//! whole call's worth of scratch is released together.

use std::fmt;
use std::pin::Pin;

pub struct Pinned<T> {
    value: Pin<Box<T>>,
}

impl<T> Pinned<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Box::pin(value),
        }
    }

    /// Stable address of the value. Valid until `self` is dropped.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        &*self.value as *const T
    }

    /// Stable mutable address, for out-parameters written by native code.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        // Safety: the pointer is only handed across the FFI boundary; the
        // value is never moved out of its box.
        unsafe { self.value.as_mut().get_unchecked_mut() as *mut T }
    }

    #[inline]
    pub fn get(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Pinned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pinned")
            .field("addr", &self.as_ptr())
            .field("value", self.get())
            .finish()
    }
}

/// Pinned byte payload. `Box<[u8]>` never reallocates, so the data pointer
/// is as stable as `Pinned`'s.
pub struct PinnedBytes {
    bytes: Box<[u8]>,
}

impl PinnedBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_stable_across_moves() {
        let pinned = Pinned::new([7u64; 16]);
        let before = pinned.as_ptr();
        let moved = pinned;
        assert_eq!(moved.as_ptr(), before);
        assert_eq!(unsafe { (*moved.as_ptr())[3] }, 7);
    }

    #[test]
    fn test_mut_ptr_writes_are_visible() {
        let mut pinned = Pinned::new(0u32);
        unsafe { *pinned.as_mut_ptr() = 42 };
        assert_eq!(*pinned.get(), 42);
    }

    #[test]
    fn test_bytes_pointer_survives_move() {
        let bytes = PinnedBytes::new(b"payload".to_vec());
        let ptr = bytes.as_ptr();
        let holder = vec![bytes];
        assert_eq!(holder[0].as_ptr(), ptr);
        assert_eq!(holder[0].len(), 7);
    }
}
