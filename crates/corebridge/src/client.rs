//! Client connection handle.

use std::fmt;
use std::sync::Arc;

use corebridge_core::engine::NativeEngine;
use corebridge_core::error::BridgeResult;
use corebridge_core::sys::{ClientOrFail, RawClient};

use crate::config::ClientConfig;
use crate::handle::{ClientKind, NativeHandle};
use crate::handle_ref::HandleRef;
use crate::scope::Scope;

/// An owned or borrowed engine client.
///
/// Workers borrow their client for as long as they live, so disposing the
/// owning `Client` while workers still use it defers the native free until
/// the last of them lets go.
pub struct Client {
    engine: Arc<dyn NativeEngine>,
    handle: HandleRef<ClientKind>,
}

impl Client {
    /// Construct a native client from `config`.
    pub fn new(engine: Arc<dyn NativeEngine>, config: &ClientConfig) -> BridgeResult<Self> {
        config.validate()?;
        let mut scope = Scope::new();
        let options = config.to_native(&mut scope);
        let options = scope.pin(options);

        tracing::trace!(target_url = %config.target_url, "creating native client");
        // Safety: `options` and every string it references live in `scope`
        // until after the synchronous constructor returns.
        let ClientOrFail { client, fail } = unsafe { engine.client_new(options) };
        let handle = unsafe { NativeHandle::from_construction(engine.clone(), client, fail) }?;
        scope.end();

        Ok(Self {
            engine,
            handle: HandleRef::owned(handle),
        })
    }

    /// Adopt an existing native client.
    ///
    /// # Safety
    /// `raw` must be null or a live client created by `engine` and owned by
    /// nobody else.
    pub unsafe fn from_raw(engine: Arc<dyn NativeEngine>, raw: *mut RawClient) -> BridgeResult<Self> {
        let handle = NativeHandle::from_raw(engine.clone(), raw)?;
        Ok(Self {
            engine,
            handle: HandleRef::owned(handle),
        })
    }

    /// Borrowed client over the same native handle.
    pub fn borrow(&self) -> BridgeResult<Self> {
        Ok(Self {
            engine: self.engine.clone(),
            handle: self.handle.borrow()?,
        })
    }

    pub fn handle_ref(&self) -> &HandleRef<ClientKind> {
        &self.handle
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    pub fn is_owned(&self) -> bool {
        self.handle.is_owned()
    }

    /// Owned: close the client. Borrowed: drop the borrow. Also on drop.
    pub fn dispose(&self) {
        self.handle.dispose();
    }

    /// `dispose`, blocking an owned client until workers still borrowing it
    /// have let go and the native free has run.
    pub fn dispose_and_wait(&self) {
        self.handle.dispose_and_wait();
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("handle", &self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corebridge_core::error::BridgeError;
    use corebridge_sim::SimEngine;

    #[test]
    fn test_new_passes_options() {
        let sim = SimEngine::new();
        let config = ClientConfig::new()
            .target_url("http://frontend:7233")
            .identity("tester");
        let client = Client::new(sim.clone(), &config).unwrap();
        assert!(client.is_owned());

        let seen = sim.last_client_options().unwrap();
        assert_eq!(seen.target_url, "http://frontend:7233");
        assert_eq!(seen.identity, "tester");
        assert_eq!(seen.client_name, "corebridge");
        assert_eq!(sim.stats().clients_created(), 1);

        client.dispose();
        assert_eq!(sim.stats().clients_freed(), 1);
    }

    #[test]
    fn test_construction_failure_message() {
        let sim = SimEngine::new();
        sim.fail_next_client_new("connection refused");
        let err = Client::new(sim.clone(), &ClientConfig::new()).unwrap_err();
        assert!(matches!(err, BridgeError::NativeConstruction(ref m) if m == "connection refused"));
        assert_eq!(sim.stats().byte_arrays_freed(), sim.stats().byte_arrays_allocated());
    }

    #[test]
    fn test_invalid_config_never_reaches_engine() {
        let sim = SimEngine::new();
        let err = Client::new(sim.clone(), &ClientConfig::new().target_url("")).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidConfig(_)));
        assert_eq!(sim.stats().clients_created(), 0);
    }

    #[test]
    fn test_borrow_outlives_owner_dispose() {
        let sim = SimEngine::new();
        let owner = Client::new(sim.clone(), &ClientConfig::new()).unwrap();
        let borrowed = owner.borrow().unwrap();
        owner.dispose();
        assert_eq!(sim.stats().clients_freed(), 0);
        assert!(owner.borrow().unwrap_err().is_invalid_handle());
        drop(borrowed);
        assert_eq!(sim.stats().clients_freed(), 1);
    }

    #[test]
    fn test_from_raw_null() {
        let sim = SimEngine::new();
        let err = unsafe { Client::from_raw(sim.clone(), std::ptr::null_mut()) }.unwrap_err();
        assert!(err.is_invalid_handle());
    }
}
