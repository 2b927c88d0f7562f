//! Raw bindings to a linked native engine library.
//!
//! Mirrors the engine's C header. `LinkedEngine` is a zero-logic forwarder:
//! every lifetime rule is enforced by the callers in `corebridge`.

use libc::c_void;

use crate::engine::NativeEngine;
use crate::sys::{
    ByteArray, ByteArrayRef, ClientOptions, ClientOrFail, RawClient, RawRuntime, RawWorker,
    WorkerCallback, WorkerOptions, WorkerOrFail, WorkerPollCallback,
};

#[link(name = "temporal_sdk_core_c_bridge")]
extern "C" {
    fn temporal_core_byte_array_free(runtime: *mut RawRuntime, bytes: *const ByteArray);

    fn temporal_core_client_new(
        runtime: *mut RawRuntime,
        options: *const ClientOptions,
    ) -> ClientOrFail;
    fn temporal_core_client_free(client: *mut RawClient);

    fn temporal_core_worker_new(
        client: *mut RawClient,
        options: *const WorkerOptions,
    ) -> WorkerOrFail;
    fn temporal_core_worker_free(worker: *mut RawWorker);
    fn temporal_core_worker_validate(
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerCallback,
    );
    fn temporal_core_worker_replace_client(worker: *mut RawWorker, new_client: *mut RawClient);
    fn temporal_core_worker_poll_workflow_activation(
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerPollCallback,
    );
    fn temporal_core_worker_poll_activity_task(
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerPollCallback,
    );
    fn temporal_core_worker_poll_nexus_task(
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerPollCallback,
    );
    fn temporal_core_worker_complete_workflow_activation(
        worker: *mut RawWorker,
        completion: ByteArrayRef,
        user_data: *mut c_void,
        callback: WorkerCallback,
    );
    fn temporal_core_worker_complete_activity_task(
        worker: *mut RawWorker,
        completion: ByteArrayRef,
        user_data: *mut c_void,
        callback: WorkerCallback,
    );
    fn temporal_core_worker_complete_nexus_task(
        worker: *mut RawWorker,
        completion: ByteArrayRef,
        user_data: *mut c_void,
        callback: WorkerCallback,
    );
    fn temporal_core_worker_record_activity_heartbeat(
        worker: *mut RawWorker,
        heartbeat: ByteArrayRef,
    ) -> *const ByteArray;
    fn temporal_core_worker_request_workflow_eviction(worker: *mut RawWorker, run_id: ByteArrayRef);
    fn temporal_core_worker_initiate_shutdown(worker: *mut RawWorker);
    fn temporal_core_worker_finalize_shutdown(
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerCallback,
    );
}

/// `NativeEngine` over the linked library.
///
/// Holds the runtime pointer needed to free engine buffers. The runtime
/// itself is owned elsewhere and must outlive every client, worker and
/// buffer created through this engine.
pub struct LinkedEngine {
    runtime: *mut RawRuntime,
}

// Safety: the engine's entry points are documented thread-safe; the runtime
// pointer is only passed through, never dereferenced here.
unsafe impl Send for LinkedEngine {}
unsafe impl Sync for LinkedEngine {}

impl LinkedEngine {
    /// # Safety
    /// `runtime` must be a live engine runtime that outlives this value and
    /// everything created through it.
    pub unsafe fn new(runtime: *mut RawRuntime) -> Self {
        Self { runtime }
    }
}

impl NativeEngine for LinkedEngine {
    unsafe fn byte_array_free(&self, bytes: *const ByteArray) {
        temporal_core_byte_array_free(self.runtime, bytes)
    }

    unsafe fn client_new(&self, options: *const ClientOptions) -> ClientOrFail {
        temporal_core_client_new(self.runtime, options)
    }

    unsafe fn client_free(&self, client: *mut RawClient) {
        temporal_core_client_free(client)
    }

    unsafe fn worker_new(
        &self,
        client: *mut RawClient,
        options: *const WorkerOptions,
    ) -> WorkerOrFail {
        temporal_core_worker_new(client, options)
    }

    unsafe fn worker_free(&self, worker: *mut RawWorker) {
        temporal_core_worker_free(worker)
    }

    unsafe fn worker_validate(
        &self,
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerCallback,
    ) {
        temporal_core_worker_validate(worker, user_data, callback)
    }

    unsafe fn worker_replace_client(&self, worker: *mut RawWorker, client: *mut RawClient) {
        temporal_core_worker_replace_client(worker, client)
    }

    unsafe fn worker_poll_workflow_activation(
        &self,
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerPollCallback,
    ) {
        temporal_core_worker_poll_workflow_activation(worker, user_data, callback)
    }

    unsafe fn worker_poll_activity_task(
        &self,
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerPollCallback,
    ) {
        temporal_core_worker_poll_activity_task(worker, user_data, callback)
    }

    unsafe fn worker_poll_nexus_task(
        &self,
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerPollCallback,
    ) {
        temporal_core_worker_poll_nexus_task(worker, user_data, callback)
    }

    unsafe fn worker_complete_workflow_activation(
        &self,
        worker: *mut RawWorker,
        completion: ByteArrayRef,
        user_data: *mut c_void,
        callback: WorkerCallback,
    ) {
        temporal_core_worker_complete_workflow_activation(worker, completion, user_data, callback)
    }

    unsafe fn worker_complete_activity_task(
        &self,
        worker: *mut RawWorker,
        completion: ByteArrayRef,
        user_data: *mut c_void,
        callback: WorkerCallback,
    ) {
        temporal_core_worker_complete_activity_task(worker, completion, user_data, callback)
    }

    unsafe fn worker_complete_nexus_task(
        &self,
        worker: *mut RawWorker,
        completion: ByteArrayRef,
        user_data: *mut c_void,
        callback: WorkerCallback,
    ) {
        temporal_core_worker_complete_nexus_task(worker, completion, user_data, callback)
    }

    unsafe fn worker_record_activity_heartbeat(
        &self,
        worker: *mut RawWorker,
        heartbeat: ByteArrayRef,
    ) -> *const ByteArray {
        temporal_core_worker_record_activity_heartbeat(worker, heartbeat)
    }

    unsafe fn worker_request_workflow_eviction(&self, worker: *mut RawWorker, run_id: ByteArrayRef) {
        temporal_core_worker_request_workflow_eviction(worker, run_id)
    }

    unsafe fn worker_initiate_shutdown(&self, worker: *mut RawWorker) {
        temporal_core_worker_initiate_shutdown(worker)
    }

    unsafe fn worker_finalize_shutdown(
        &self,
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerCallback,
    ) {
        temporal_core_worker_finalize_shutdown(worker, user_data, callback)
    }
}
