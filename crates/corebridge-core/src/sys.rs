//! Raw ABI shared with the native engine.
//!
//! Every type here is `#[repr(C)]` and mirrors the engine's C header. None of
//! them own anything on the Rust side; lifetimes are managed by the wrappers
//! in `corebridge` (`ByteBuffer`, `Scope`, `NativeHandle`).

use libc::c_void;

// ── Opaque engine objects ──

/// Native runtime (owns the engine's allocator and thread pool).
#[repr(C)]
pub struct RawRuntime {
    _private: [u8; 0],
}

/// Native client connection.
#[repr(C)]
pub struct RawClient {
    _private: [u8; 0],
}

/// Native worker.
#[repr(C)]
pub struct RawWorker {
    _private: [u8; 0],
}

// ── Byte buffers ──

/// A byte buffer allocated by the engine.
///
/// Must be handed back to `NativeEngine::byte_array_free` exactly once.
#[repr(C)]
#[derive(Debug)]
pub struct ByteArray {
    pub data: *const u8,
    pub size: usize,
    /// Capacity of the engine-side allocation. Opaque to the host.
    pub cap: usize,
    /// Set by the engine for static buffers that the free call ignores.
    pub disable_free: bool,
}

impl ByteArray {
    /// View the buffer contents.
    ///
    /// # Safety
    /// `data` must point to `size` readable bytes for the returned lifetime.
    pub unsafe fn as_slice(&self) -> &[u8] {
        if self.data.is_null() || self.size == 0 {
            return &[];
        }
        std::slice::from_raw_parts(self.data, self.size)
    }
}

/// A borrowed byte range owned by the host, read by the engine.
///
/// The host must keep the range alive and unmoved for as long as the engine
/// may read it (see `corebridge::scope::Scope`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ByteArrayRef {
    pub data: *const u8,
    pub size: usize,
}

// Safety: a plain address/length pair; the bytes it points at are owned by a
// scope that outlives every use of the reference.
unsafe impl Send for ByteArrayRef {}
unsafe impl Sync for ByteArrayRef {}

impl ByteArrayRef {
    pub const fn empty() -> Self {
        Self {
            data: std::ptr::null(),
            size: 0,
        }
    }

    /// View the referenced bytes.
    ///
    /// # Safety
    /// The range must still be alive (registered in a live scope).
    pub unsafe fn to_slice(&self) -> &[u8] {
        if self.data.is_null() || self.size == 0 {
            return &[];
        }
        std::slice::from_raw_parts(self.data, self.size)
    }
}

// ── Construction ──

/// Flat client options, pinned for the synchronous constructor call.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub target_url: ByteArrayRef,
    pub client_name: ByteArrayRef,
    pub client_version: ByteArrayRef,
    pub identity: ByteArrayRef,
}

/// Flat worker options, pinned for the synchronous constructor call.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub namespace: ByteArrayRef,
    pub task_queue: ByteArrayRef,
    pub build_id: ByteArrayRef,
    pub identity_override: ByteArrayRef,
    pub max_cached_workflows: u32,
    pub max_outstanding_workflow_tasks: u32,
    pub max_outstanding_activities: u32,
    pub max_outstanding_nexus_tasks: u32,
    pub max_concurrent_workflow_task_polls: u32,
    pub max_concurrent_activity_task_polls: u32,
    pub nonsticky_to_sticky_poll_ratio: f32,
    pub graceful_shutdown_period_millis: u64,
    pub no_remote_activities: bool,
}

/// Only one of `client`/`fail` is non-null. Whichever is must be freed.
#[repr(C)]
#[derive(Debug)]
pub struct ClientOrFail {
    pub client: *mut RawClient,
    pub fail: *const ByteArray,
}

/// Only one of `worker`/`fail` is non-null. Whichever is must be freed.
#[repr(C)]
#[derive(Debug)]
pub struct WorkerOrFail {
    pub worker: *mut RawWorker,
    pub fail: *const ByteArray,
}

// ── Callbacks ──

/// Completion callback. If `fail` is non-null it must be freed by the callee.
pub type WorkerCallback = unsafe extern "C" fn(user_data: *mut c_void, fail: *const ByteArray);

/// Poll callback. Present buffers must be freed by the callee. Both are null
/// when the poller has shut down.
pub type WorkerPollCallback = unsafe extern "C" fn(
    user_data: *mut c_void,
    success: *const ByteArray,
    fail: *const ByteArray,
);
