//! Per-call arena.
//!
//! Everything a native call reads (pinned option structs, payload bytes,
//! leased handle pointers) is registered in one `Scope` and released
//! together, in reverse registration order, when the scope ends. For
//! callback-based calls the scope moves into the pending call, so nothing it
//! registered is released before the callback has fired, even if the
//! awaiting future is dropped.
//!
//! ```text
//!   let mut scope = Scope::new();
//!   let worker  = scope.handle(&guard)?;          // lease
//!   let payload = scope.byte_array(bytes);        // pinned bytes
//!   begin_call(engine, scope, |user_data| {       // scope now owned by
//!       issue(worker, payload, user_data)         // the pending call
//!   }).await;                                     // payload, then lease
//! ```

use std::any::Any;
use std::fmt;

use corebridge_core::error::{BridgeError, BridgeResult};
use corebridge_core::sys::ByteArrayRef;

use crate::handle::{HandleKind, HandleLease};
use crate::handle_ref::HandleRef;
use crate::pinned::{Pinned, PinnedBytes};

enum Resource {
    Value(Box<dyn Any + Send>),
    Bytes(PinnedBytes),
    Lease(HandleLease),
}

#[derive(Default)]
pub struct Scope {
    resources: Vec<Resource>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `value` until the scope ends and return its address.
    pub fn pin<T: Send + 'static>(&mut self, value: T) -> *const T {
        let pinned = Pinned::new(value);
        let ptr = pinned.as_ptr();
        self.resources.push(Resource::Value(Box::new(pinned)));
        ptr
    }

    /// Like `pin`, for values native code writes into.
    pub fn pin_mut<T: Send + 'static>(&mut self, value: T) -> *mut T {
        let mut pinned = Pinned::new(value);
        let ptr = pinned.as_mut_ptr();
        self.resources.push(Resource::Value(Box::new(pinned)));
        ptr
    }

    /// Pin a byte payload. Empty input yields a null, zero-length reference.
    pub fn byte_array(&mut self, bytes: Vec<u8>) -> ByteArrayRef {
        if bytes.is_empty() {
            return ByteArrayRef::empty();
        }
        let bytes = PinnedBytes::new(bytes);
        let r = ByteArrayRef {
            data: bytes.as_ptr(),
            size: bytes.len(),
        };
        self.resources.push(Resource::Bytes(bytes));
        r
    }

    pub fn str(&mut self, s: &str) -> ByteArrayRef {
        self.byte_array(s.as_bytes().to_vec())
    }

    /// Lease the guard's handle for the rest of the scope.
    ///
    /// The returned pointer stays valid (not freed) until the scope ends,
    /// even if the owner disposes meanwhile.
    pub fn handle<K: HandleKind>(&mut self, guard: &HandleRef<K>) -> BridgeResult<*mut K::Raw> {
        if guard.is_disposed() {
            return Err(BridgeError::InvalidHandle { kind: K::NAME });
        }
        let (lease, raw) = guard.handle().lease()?;
        self.resources.push(Resource::Lease(lease));
        Ok(raw)
    }

    /// Release everything, last registered first. Also runs on drop.
    pub fn end(&mut self) {
        while let Some(resource) = self.resources.pop() {
            drop(resource);
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.end();
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (mut values, mut bytes, mut leases) = (0, 0, 0);
        for r in &self.resources {
            match r {
                Resource::Value(_) => values += 1,
                Resource::Bytes(_) => bytes += 1,
                Resource::Lease(_) => leases += 1,
            }
        }
        f.debug_struct("Scope")
            .field("values", &values)
            .field("bytes", &bytes)
            .field("leases", &leases)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{ClientKind, NativeHandle};
    use corebridge_sim::SimEngine;
    use std::sync::{Arc, Mutex};

    struct Tracked {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.log.lock().unwrap().push(self.name);
        }
    }

    fn tracked(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Tracked {
        Tracked {
            name,
            log: log.clone(),
        }
    }

    #[test]
    fn test_releases_in_reverse_order_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scope = Scope::new();
        scope.pin(tracked("a", &log));
        scope.pin(tracked("b", &log));
        scope.pin_mut(tracked("c", &log));
        assert_eq!(scope.len(), 3);

        scope.end();
        assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);
        assert!(scope.is_empty());

        drop(scope);
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_releases_on_early_return() {
        fn failing_call(log: &Arc<Mutex<Vec<&'static str>>>) -> BridgeResult<()> {
            let mut scope = Scope::new();
            scope.pin(tracked("options", log));
            scope.str("payload");
            Err(BridgeError::NativeCall("boom".into()))?;
            scope.pin(tracked("unreached", log));
            Ok(())
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        assert!(failing_call(&log).is_err());
        assert_eq!(*log.lock().unwrap(), vec!["options"]);
    }

    #[test]
    fn test_pinned_address_readable_until_end() {
        let mut scope = Scope::new();
        let ptr = scope.pin([1u32, 2, 3]);
        let bytes = scope.byte_array(b"abc".to_vec());
        for _ in 0..32 {
            scope.pin(0u64);
        }
        assert_eq!(unsafe { *ptr }, [1, 2, 3]);
        assert_eq!(unsafe { bytes.to_slice() }, b"abc");
        assert_eq!(bytes.size, 3);
    }

    #[test]
    fn test_empty_bytes_allowed() {
        let mut scope = Scope::new();
        let r = scope.str("");
        assert_eq!(r.size, 0);
        assert!(r.data.is_null());
        assert_eq!(unsafe { r.to_slice() }, b"");
    }

    #[test]
    fn test_lease_blocks_free_until_end() {
        let sim = SimEngine::new();
        let raw = sim.new_raw_client();
        let owner = HandleRef::owned(unsafe { NativeHandle::<ClientKind>::from_raw(sim.clone(), raw) }.unwrap());

        let mut scope = Scope::new();
        let leased = scope.handle(&owner).unwrap();
        assert_eq!(leased, raw);

        owner.dispose();
        assert!(sim.is_client_live(leased));
        assert_eq!(sim.stats().clients_freed(), 0);

        scope.end();
        assert_eq!(sim.stats().clients_freed(), 1);
    }

    #[test]
    fn test_lease_of_disposed_guard_fails() {
        let sim = SimEngine::new();
        let owner = HandleRef::owned(
            unsafe { NativeHandle::<ClientKind>::from_raw(sim.clone(), sim.new_raw_client()) }.unwrap(),
        );
        let borrowed = owner.borrow().unwrap();
        borrowed.dispose();

        let mut scope = Scope::new();
        assert!(scope.handle(&borrowed).unwrap_err().is_invalid_handle());
        assert!(scope.is_empty());
    }
}
