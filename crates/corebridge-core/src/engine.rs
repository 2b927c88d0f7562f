//! Native engine entry points.
//!
//! A `NativeEngine` is the full set of calls the safety layer may issue into
//! the engine. Methods are `unsafe`: they take raw pointers whose validity
//! the caller guarantees.
//!
//! # Implementors
//!
//! - `LinkedEngine` (feature = "link-native"): forwards to the
//!   `temporal_core_*` symbols of a linked engine library.
//!
//! - `SimEngine` (`corebridge-sim`): in-process simulation used by tests
//!   and the smoke binary. Fires callbacks from its own threads.
//!
//! # Call families
//!
//! | Family                   | Shape                                      |
//! |--------------------------|--------------------------------------------|
//! | construct client/worker  | sync, pinned options, inline fail buffer   |
//! | poll (3 task kinds)      | async, `WorkerPollCallback`                |
//! | complete (3 task kinds)  | async, bytes in, `WorkerCallback`          |
//! | heartbeat                | sync, bytes in, inline fail buffer         |
//! | evict / shutdown / swap  | sync, no result                            |
//! | validate / finalize      | async, `WorkerCallback`                    |

use libc::c_void;

use crate::sys::{
    ByteArray, ByteArrayRef, ClientOptions, ClientOrFail, RawClient, RawWorker, WorkerCallback,
    WorkerOptions, WorkerOrFail, WorkerPollCallback,
};

/// Every native call the bridge can make.
///
/// **Contract:**
/// - Pointer arguments are never null and refer to live objects.
/// - `ByteArrayRef` and options arguments stay valid until the callback for
///   the same call fires (or, for sync calls, until the call returns).
/// - Each callback is invoked once per call, from any thread. The bridge
///   tolerates duplicate invocations.
/// - Every non-null `*const ByteArray` handed to the host is later passed to
///   `byte_array_free` exactly once.
pub trait NativeEngine: Send + Sync + 'static {
    /// Return an engine-allocated buffer to the engine.
    unsafe fn byte_array_free(&self, bytes: *const ByteArray);

    /// Construct a client synchronously.
    unsafe fn client_new(&self, options: *const ClientOptions) -> ClientOrFail;

    /// Free a client. Called exactly once per client.
    unsafe fn client_free(&self, client: *mut RawClient);

    /// Construct a worker on `client` synchronously.
    unsafe fn worker_new(&self, client: *mut RawClient, options: *const WorkerOptions)
        -> WorkerOrFail;

    /// Free a worker. Called exactly once per worker.
    unsafe fn worker_free(&self, worker: *mut RawWorker);

    unsafe fn worker_validate(
        &self,
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerCallback,
    );

    unsafe fn worker_replace_client(&self, worker: *mut RawWorker, client: *mut RawClient);

    unsafe fn worker_poll_workflow_activation(
        &self,
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerPollCallback,
    );

    unsafe fn worker_poll_activity_task(
        &self,
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerPollCallback,
    );

    unsafe fn worker_poll_nexus_task(
        &self,
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerPollCallback,
    );

    unsafe fn worker_complete_workflow_activation(
        &self,
        worker: *mut RawWorker,
        completion: ByteArrayRef,
        user_data: *mut c_void,
        callback: WorkerCallback,
    );

    unsafe fn worker_complete_activity_task(
        &self,
        worker: *mut RawWorker,
        completion: ByteArrayRef,
        user_data: *mut c_void,
        callback: WorkerCallback,
    );

    unsafe fn worker_complete_nexus_task(
        &self,
        worker: *mut RawWorker,
        completion: ByteArrayRef,
        user_data: *mut c_void,
        callback: WorkerCallback,
    );

    /// Returns a failure buffer, or null on success.
    unsafe fn worker_record_activity_heartbeat(
        &self,
        worker: *mut RawWorker,
        heartbeat: ByteArrayRef,
    ) -> *const ByteArray;

    unsafe fn worker_request_workflow_eviction(&self, worker: *mut RawWorker, run_id: ByteArrayRef);

    unsafe fn worker_initiate_shutdown(&self, worker: *mut RawWorker);

    /// Only valid after `worker_initiate_shutdown` and after every poller
    /// has observed shutdown.
    unsafe fn worker_finalize_shutdown(
        &self,
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerCallback,
    );
}
