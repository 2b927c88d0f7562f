//! Owned native handles.
//!
//! A `NativeHandle<K>` wraps the raw pointer of one engine object (a client
//! or a worker) and calls the matching native destructor exactly once.
//!
//! ## Liveness word
//!
//! ```text
//!   state = refs << 1 | CLOSED
//!
//!   new             refs=1 (the owner)    open
//!   add_ref         refs+1                fails once CLOSED is set
//!   release         refs-1                frees if that leaves refs=0 and CLOSED
//!   dispose         refs-1, set CLOSED    frees if that leaves refs=0
//! ```
//!
//! Once `CLOSED` is set no reference can be added, so the transition to
//! `state == CLOSED` happens exactly once and whoever performs it frees.
//! A dispose that races with borrowers therefore never blocks and never
//! frees early: the last borrower to release does the free.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use corebridge_core::engine::NativeEngine;
use corebridge_core::error::{BridgeError, BridgeResult};
use corebridge_core::sys::{ByteArray, RawClient, RawWorker};

use crate::byte_buffer::ByteBuffer;

const CLOSED: usize = 1;
const REF_ONE: usize = 2;

/// An engine object type and its destructor.
pub trait HandleKind: Send + Sync + 'static {
    type Raw: 'static;

    /// Used in error messages and logs.
    const NAME: &'static str;

    /// # Safety
    /// `raw` must be a live object of this kind created by `engine`.
    unsafe fn free(engine: &dyn NativeEngine, raw: *mut Self::Raw);
}

pub struct ClientKind;

impl HandleKind for ClientKind {
    type Raw = RawClient;
    const NAME: &'static str = "client";

    unsafe fn free(engine: &dyn NativeEngine, raw: *mut RawClient) {
        engine.client_free(raw)
    }
}

pub struct WorkerKind;

impl HandleKind for WorkerKind {
    type Raw = RawWorker;
    const NAME: &'static str = "worker";

    unsafe fn free(engine: &dyn NativeEngine, raw: *mut RawWorker) {
        engine.worker_free(raw)
    }
}

pub struct NativeHandle<K: HandleKind> {
    raw: NonNull<K::Raw>,
    engine: Arc<dyn NativeEngine>,
    state: AtomicUsize,
    freed: Mutex<bool>,
    freed_cv: Condvar,
    _kind: PhantomData<fn() -> K>,
}

// Safety: the raw pointer is only dereferenced by the engine, whose entry
// points are thread-safe; the liveness word guarantees it is never used
// after the free.
unsafe impl<K: HandleKind> Send for NativeHandle<K> {}
unsafe impl<K: HandleKind> Sync for NativeHandle<K> {}

impl<K: HandleKind> NativeHandle<K> {
    /// Adopt a raw pointer. Fails with `InvalidHandle` on null.
    ///
    /// # Safety
    /// `raw` must be null or a live object created by `engine` and not owned
    /// by anyone else.
    pub unsafe fn from_raw(engine: Arc<dyn NativeEngine>, raw: *mut K::Raw) -> BridgeResult<Self> {
        match NonNull::new(raw) {
            Some(raw) => Ok(Self::adopt(engine, raw)),
            None => Err(BridgeError::InvalidHandle { kind: K::NAME }),
        }
    }

    /// Adopt the result of a native constructor.
    ///
    /// A present failure buffer wins: it is decoded into
    /// `NativeConstruction` and freed, and a stray object (should the engine
    /// return both) is freed too.
    ///
    /// # Safety
    /// `raw` and `fail` must come from one constructor call on `engine`.
    pub unsafe fn from_construction(
        engine: Arc<dyn NativeEngine>,
        raw: *mut K::Raw,
        fail: *const ByteArray,
    ) -> BridgeResult<Self> {
        if let Some(fail) = ByteBuffer::from_raw(engine.clone(), fail) {
            let message = fail.to_utf8();
            drop(fail);
            if !raw.is_null() {
                tracing::warn!(kind = K::NAME, "constructor returned both object and failure");
                K::free(&*engine, raw);
            }
            return Err(BridgeError::NativeConstruction(message));
        }
        match NonNull::new(raw) {
            Some(raw) => Ok(Self::adopt(engine, raw)),
            None => Err(BridgeError::NativeConstruction(format!(
                "{} constructor returned neither an object nor a failure",
                K::NAME
            ))),
        }
    }

    fn adopt(engine: Arc<dyn NativeEngine>, raw: NonNull<K::Raw>) -> Self {
        tracing::trace!(kind = K::NAME, ptr = ?raw, "adopted native handle");
        Self {
            raw,
            engine,
            state: AtomicUsize::new(REF_ONE),
            freed: Mutex::new(false),
            freed_cv: Condvar::new(),
            _kind: PhantomData,
        }
    }

    /// Add a liveness reference. Fails once the handle is closed.
    pub fn add_ref(&self) -> BridgeResult<()> {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            if cur & CLOSED != 0 {
                return Err(BridgeError::InvalidHandle { kind: K::NAME });
            }
            match self.state.compare_exchange_weak(
                cur,
                cur + REF_ONE,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Drop a liveness reference taken with `add_ref`.
    pub fn release(&self) {
        let prev = self.state.fetch_sub(REF_ONE, Ordering::AcqRel);
        debug_assert!(prev >= REF_ONE, "release without matching add_ref");
        if prev == REF_ONE | CLOSED {
            tracing::debug!(kind = K::NAME, "last borrow released, running deferred free");
            self.free_now();
        }
    }

    /// Close the handle and drop the owner's reference.
    ///
    /// Idempotent. Frees immediately if nothing is borrowed, otherwise the
    /// last `release` frees. Returns `true` for the call that closed it.
    pub fn dispose(&self) -> bool {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            if cur & CLOSED != 0 {
                return false;
            }
            let next = (cur - REF_ONE) | CLOSED;
            match self
                .state
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    if next == CLOSED {
                        self.free_now();
                    } else {
                        tracing::debug!(
                            kind = K::NAME,
                            borrows = next >> 1,
                            "dispose deferred until borrows release"
                        );
                    }
                    return true;
                }
                Err(actual) => cur = actual,
            }
        }
    }

    /// Block until the native free has run.
    ///
    /// Deadlocks if the calling thread itself holds a borrow.
    pub fn wait_freed(&self) {
        let mut freed = self.freed.lock().unwrap_or_else(PoisonError::into_inner);
        while !*freed {
            freed = self
                .freed_cv
                .wait(freed)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// `dispose` followed by `wait_freed`.
    pub fn dispose_and_wait(&self) {
        self.dispose();
        self.wait_freed();
    }

    /// Outstanding references, including the owner's while open.
    pub fn ref_count(&self) -> usize {
        self.state.load(Ordering::Acquire) >> 1
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) & CLOSED != 0
    }

    pub fn is_freed(&self) -> bool {
        *self.freed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    /// Take a reference that lives as long as the returned lease, plus the
    /// raw pointer it keeps valid.
    pub(crate) fn lease(self: &Arc<Self>) -> BridgeResult<(HandleLease, *mut K::Raw)> {
        self.add_ref()?;
        let lease = HandleLease {
            target: self.clone(),
        };
        Ok((lease, self.raw.as_ptr()))
    }

    fn free_now(&self) {
        tracing::trace!(kind = K::NAME, ptr = ?self.raw, "freeing native handle");
        // Safety: reached exactly once, on the transition to refs=0|CLOSED.
        unsafe { K::free(&*self.engine, self.raw.as_ptr()) };
        let mut freed = self.freed.lock().unwrap_or_else(PoisonError::into_inner);
        *freed = true;
        self.freed_cv.notify_all();
    }
}

impl<K: HandleKind> Drop for NativeHandle<K> {
    fn drop(&mut self) {
        // Last Rust reference gone without an explicit dispose.
        self.dispose();
        if !self.is_freed() {
            tracing::warn!(
                kind = K::NAME,
                refs = self.ref_count(),
                "native handle dropped with unreleased references, leaking"
            );
        }
    }
}

impl<K: HandleKind> fmt::Debug for NativeHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("kind", &K::NAME)
            .field("ptr", &self.raw)
            .field("refs", &self.ref_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Type-erased release side of a handle.
pub(crate) trait LeaseTarget: Send + Sync {
    fn release_lease(&self);
}

impl<K: HandleKind> LeaseTarget for NativeHandle<K> {
    fn release_lease(&self) {
        self.release();
    }
}

/// One liveness reference, released on drop.
pub(crate) struct HandleLease {
    target: Arc<dyn LeaseTarget>,
}

impl Drop for HandleLease {
    fn drop(&mut self) {
        self.target.release_lease();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corebridge_sim::SimEngine;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    fn new_client(sim: &Arc<SimEngine>) -> NativeHandle<ClientKind> {
        let raw = sim.new_raw_client();
        unsafe { NativeHandle::from_raw(sim.clone(), raw) }.unwrap()
    }

    #[test]
    fn test_null_pointer_rejected() {
        let sim = SimEngine::new();
        let err = unsafe { NativeHandle::<WorkerKind>::from_raw(sim.clone(), std::ptr::null_mut()) }
            .unwrap_err();
        assert!(err.is_invalid_handle());
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let sim = SimEngine::new();
        let handle = new_client(&sim);
        assert!(handle.dispose());
        assert!(!handle.dispose());
        assert!(handle.is_freed());
        drop(handle);
        assert_eq!(sim.stats().clients_freed(), 1);
        assert_eq!(sim.stats().double_frees(), 0);
    }

    #[test]
    fn test_drop_without_dispose_frees() {
        let sim = SimEngine::new();
        drop(new_client(&sim));
        assert_eq!(sim.stats().clients_freed(), 1);
    }

    #[test]
    fn test_add_ref_after_dispose_fails() {
        let sim = SimEngine::new();
        let handle = new_client(&sim);
        handle.dispose();
        let err = handle.add_ref().unwrap_err();
        assert!(matches!(err, BridgeError::InvalidHandle { kind: "client" }));
    }

    #[test]
    fn test_dispose_defers_until_release() {
        let sim = SimEngine::new();
        let handle = new_client(&sim);
        handle.add_ref().unwrap();
        assert_eq!(handle.ref_count(), 2);

        handle.dispose();
        assert!(handle.is_closed());
        assert!(!handle.is_freed());
        assert_eq!(sim.stats().clients_freed(), 0);

        handle.release();
        assert!(handle.is_freed());
        assert_eq!(sim.stats().clients_freed(), 1);
    }

    #[test]
    fn test_dispose_and_wait_blocks_for_borrow() {
        let sim = SimEngine::new();
        let handle = Arc::new(new_client(&sim));
        handle.add_ref().unwrap();
        let released = Arc::new(AtomicBool::new(false));

        let borrower = {
            let handle = handle.clone();
            let released = released.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                released.store(true, Ordering::SeqCst);
                handle.release();
            })
        };

        handle.dispose_and_wait();
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(sim.stats().clients_freed(), 1);
        borrower.join().unwrap();
    }

    #[test]
    fn test_concurrent_borrow_and_dispose_frees_once() {
        let sim = SimEngine::new();
        let raw = sim.new_raw_client();
        let handle = Arc::new(unsafe { NativeHandle::<ClientKind>::from_raw(sim.clone(), raw) }.unwrap());
        let raw_addr = raw as usize;

        let mut borrowers = Vec::new();
        for _ in 0..8 {
            let handle = handle.clone();
            let sim = sim.clone();
            borrowers.push(thread::spawn(move || {
                let mut refused = 0usize;
                for _ in 0..2_000 {
                    match handle.add_ref() {
                        Ok(()) => {
                            assert!(sim.is_client_live(raw_addr as *mut RawClient));
                            handle.release();
                        }
                        Err(e) => {
                            assert!(e.is_invalid_handle());
                            refused += 1;
                        }
                    }
                }
                refused
            }));
        }

        thread::sleep(Duration::from_millis(2));
        handle.dispose();

        for b in borrowers {
            b.join().unwrap();
        }
        handle.wait_freed();
        assert_eq!(sim.stats().clients_freed(), 1);
        assert_eq!(sim.stats().double_frees(), 0);
        assert_eq!(sim.stats().use_after_free(), 0);
    }

    #[test]
    fn test_construction_failure_decoded() {
        let sim = SimEngine::new();
        let fail = sim.alloc_byte_array(b"Invalid options: no task queue".to_vec());
        let err = unsafe {
            NativeHandle::<WorkerKind>::from_construction(sim.clone(), std::ptr::null_mut(), fail)
        }
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid options: no task queue");
        assert!(matches!(err, BridgeError::NativeConstruction(_)));
        assert_eq!(sim.stats().byte_arrays_freed(), 1);
    }

    #[test]
    fn test_construction_with_neither_fails() {
        let sim = SimEngine::new();
        let err = unsafe {
            NativeHandle::<ClientKind>::from_construction(
                sim.clone(),
                std::ptr::null_mut(),
                std::ptr::null(),
            )
        }
        .unwrap_err();
        assert!(matches!(err, BridgeError::NativeConstruction(_)));
    }

    #[test]
    fn test_lease_holds_reference() {
        let sim = SimEngine::new();
        let handle = Arc::new(new_client(&sim));
        let (lease, raw) = handle.lease().unwrap();
        assert!(sim.is_client_live(raw));
        handle.dispose();
        assert!(!handle.is_freed());
        drop(lease);
        assert!(handle.is_freed());
    }
}
