//! Owned and borrowed guards over a `NativeHandle`.
//!
//! The owning guard closes the handle when disposed. A borrowed guard holds
//! one liveness reference and only drops that reference when disposed, so a
//! deferred free can proceed. Both dispose on drop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use corebridge_core::error::{BridgeError, BridgeResult};

use crate::handle::{HandleKind, NativeHandle};

pub struct HandleRef<K: HandleKind> {
    handle: Arc<NativeHandle<K>>,
    owned: bool,
    disposed: AtomicBool,
}

impl<K: HandleKind> HandleRef<K> {
    /// Guard that owns `handle`. Disposing it closes the handle.
    pub fn owned(handle: NativeHandle<K>) -> Self {
        Self {
            handle: Arc::new(handle),
            owned: true,
            disposed: AtomicBool::new(false),
        }
    }

    /// Borrowed guard over a shared handle.
    ///
    /// Fails with `InvalidHandle` if the handle is already closed. A borrow
    /// that loses a race with `dispose` fails the same way.
    pub fn add_ref(handle: &Arc<NativeHandle<K>>) -> BridgeResult<Self> {
        handle.add_ref()?;
        Ok(Self {
            handle: handle.clone(),
            owned: false,
            disposed: AtomicBool::new(false),
        })
    }

    /// Borrowed guard over the same handle as `self`.
    pub fn borrow(&self) -> BridgeResult<Self> {
        if self.is_disposed() {
            return Err(BridgeError::InvalidHandle { kind: K::NAME });
        }
        Self::add_ref(&self.handle)
    }

    pub fn handle(&self) -> &Arc<NativeHandle<K>> {
        &self.handle
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Idempotent. Owned: close the handle. Borrowed: release the reference.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.owned {
            self.handle.dispose();
        } else {
            self.handle.release();
        }
    }

    /// `dispose`, then for an owned guard block until the native free has
    /// run. Must not be called while this thread holds a borrow.
    pub fn dispose_and_wait(&self) {
        self.dispose();
        if self.owned {
            self.handle.wait_freed();
        }
    }
}

impl<K: HandleKind> Drop for HandleRef<K> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<K: HandleKind> fmt::Debug for HandleRef<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRef")
            .field("handle", &self.handle)
            .field("owned", &self.owned)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
