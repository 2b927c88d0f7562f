//! Native callback to future bridge.
//!
//! Every callback-based native call gets a `CallId`, registered in a
//! process-wide table before the call is issued and passed to the engine as
//! `user_data`. The entry also owns the call's `Scope`, so the leases and
//! pinned bytes the engine reads outlive the awaiting future if that future
//! is dropped early. They are released after the first signal, never before.
//!
//! ```text
//!   begin_call(scope) ──► table[id] = Pending(tx, scope)
//!        │
//!        ▼ issue(user_data = id)
//!   engine thread ── on_poll(id, success, fail)
//!        │              ├─ first signal:  tx.send(resolution, scope)
//!        │              │                 (receiver gone: entry removed,
//!        │              │                  buffers and scope released here)
//!        │              ├─ later signal:  buffers freed, ignored
//!        │              └─ unknown id:    logged, buffers leaked
//!        ▼
//!   Completion.await ──► Resolution, scope ends on the awaiting side
//!   drop(Completion) ──► resolved: table.remove(id)
//!                        pending:  entry kept until the signal arrives
//! ```
//!
//! An id is unknown only once its call resolved and its `Completion` is
//! gone. Buffers of a signal for it are leaked: without the entry there is
//! no engine to free them through.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::task::{Context, Poll};

use libc::c_void;
use tokio::sync::oneshot;

use corebridge_core::engine::NativeEngine;
use corebridge_core::error::{BridgeError, BridgeResult};
use corebridge_core::sys::ByteArray;

use crate::byte_buffer::ByteBuffer;
use crate::scope::Scope;

/// Opaque non-zero token handed to native code as `user_data`.
pub type CallId = usize;

/// Terminal state of a bridged call.
pub enum Resolution {
    /// Success with a payload.
    Value(ByteBuffer),
    /// Success without a payload (or a poller that has shut down).
    NoValue,
    /// The engine's failure message, verbatim.
    Failed(String),
}

impl Resolution {
    /// `Failed` becomes `NativeCall`, the rest an optional payload.
    pub fn into_result(self) -> BridgeResult<Option<ByteBuffer>> {
        match self {
            Resolution::Value(buf) => Ok(Some(buf)),
            Resolution::NoValue => Ok(None),
            Resolution::Failed(message) => Err(BridgeError::NativeCall(message)),
        }
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(buf) => f.debug_tuple("Value").field(&buf.len()).finish(),
            Resolution::NoValue => f.write_str("NoValue"),
            Resolution::Failed(m) => f.debug_tuple("Failed").field(m).finish(),
        }
    }
}


// ── Pending-call table ──

struct Entry {
    engine: Arc<dyn NativeEngine>,
    /// `None` once resolved; a resolved entry stays while its `Completion`
    /// lives so duplicate signals are recognised and their buffers freed.
    tx: Option<oneshot::Sender<Signal>>,
    /// What the native call reads. Taken by the first signal once `issued`.
    scope: Option<Scope>,
    /// `issue` has returned.
    issued: bool,
}

/// First signal of a call, with the scope to end on the receiving side.
struct Signal {
    resolution: Resolution,
    scope: Option<Scope>,
}

struct Registry {
    calls: Mutex<HashMap<CallId, Entry>>,
    next_id: AtomicUsize,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Registry {
        calls: Mutex::new(HashMap::new()),
        next_id: AtomicUsize::new(1),
    })
}

fn calls() -> MutexGuard<'static, HashMap<CallId, Entry>> {
    registry()
        .calls
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn is_registered(id: CallId) -> bool {
    calls().contains_key(&id)
}

// ── Completion future ──

/// Resolves once with the first signal for its call.
///
/// Fails with `CallbackDropped` only if the pending entry vanished without a
/// signal. Dropping it before the signal detaches the awaiting side; the
/// call's scope is still released only when the engine calls back.
pub struct Completion {
    id: CallId,
    rx: oneshot::Receiver<Signal>,
}

impl Completion {
    pub fn id(&self) -> CallId {
        self.id
    }
}

impl Future for Completion {
    type Output = BridgeResult<Resolution>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|r| match r {
            Ok(Signal { resolution, scope }) => {
                drop(scope);
                Ok(resolution)
            }
            Err(_) => Err(BridgeError::CallbackDropped),
        })
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        // A send after close fails and hands the signal back to the callback.
        self.rx.close();
        let tombstone = {
            let mut calls = calls();
            let resolved = calls.get(&self.id).map_or(false, |e| e.tx.is_none());
            if resolved {
                calls.remove(&self.id)
            } else {
                None
            }
        };
        drop(tombstone);
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("id", &self.id).finish()
    }
}

/// Register a call and issue it.
///
/// `scope` holds everything the native call reads and is released after the
/// call's first signal, whether or not the `Completion` is still awaited.
/// `issue` receives the `user_data` to pass to the engine and must start the
/// native call synchronously. The callback may fire before `issue` returns.
pub fn begin_call<F>(engine: &Arc<dyn NativeEngine>, scope: Scope, issue: F) -> Completion
where
    F: FnOnce(*mut c_void),
{
    let id = registry().next_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = oneshot::channel();
    calls().insert(
        id,
        Entry {
            engine: engine.clone(),
            tx: Some(tx),
            scope: Some(scope),
            issued: false,
        },
    );
    let completion = Completion { id, rx };
    tracing::trace!(call_id = id, "issuing native call");
    issue(id as *mut c_void);

    // A signal delivered inside `issue` left the scope behind.
    let early = calls().get_mut(&id).and_then(|entry| {
        entry.issued = true;
        if entry.tx.is_none() {
            entry.scope.take()
        } else {
            None
        }
    });
    drop(early);
    completion
}

// ── Exported callbacks ──

/// `WorkerCallback` for calls that only report failure.
pub(crate) unsafe extern "C" fn on_complete(user_data: *mut c_void, fail: *const ByteArray) {
    signal(user_data, std::ptr::null(), fail);
}

/// `WorkerPollCallback`. Neither buffer present means the poller shut down.
pub(crate) unsafe extern "C" fn on_poll(
    user_data: *mut c_void,
    success: *const ByteArray,
    fail: *const ByteArray,
) {
    signal(user_data, success, fail);
}

fn signal(user_data: *mut c_void, success: *const ByteArray, fail: *const ByteArray) {
    let id = user_data as CallId;
    let result = panic::catch_unwind(AssertUnwindSafe(|| deliver(id, success, fail)));
    if result.is_err() {
        tracing::warn!(call_id = id, "panic in native callback, swallowed");
    }
}

fn deliver(id: CallId, success: *const ByteArray, fail: *const ByteArray) {
    let (engine, tx, scope) = {
        let mut calls = calls();
        match calls.get_mut(&id) {
            Some(entry) => {
                let tx = entry.tx.take();
                let scope = if entry.issued { entry.scope.take() } else { None };
                (entry.engine.clone(), tx, scope)
            }
            None => {
                tracing::warn!(
                    call_id = id,
                    has_success = !success.is_null(),
                    has_fail = !fail.is_null(),
                    "callback for unknown call, leaking its buffers"
                );
                return;
            }
        }
    };

    // Safety: the engine hands ownership of both buffers to the callback.
    let success = unsafe { ByteBuffer::from_raw(engine.clone(), success) };
    let fail = unsafe { ByteBuffer::from_raw(engine, fail) };

    let Some(tx) = tx else {
        tracing::debug!(call_id = id, "duplicate callback ignored");
        return;
    };

    let resolution = match (success, fail) {
        (_, Some(fail)) => Resolution::Failed(fail.to_utf8()),
        (Some(value), None) => Resolution::Value(value),
        (None, None) => Resolution::NoValue,
    };
    tracing::trace!(call_id = id, ?resolution, "native call resolved");
    if let Err(detached) = tx.send(Signal { resolution, scope }) {
        tracing::debug!(call_id = id, "awaiting side gone, releasing call resources");
        let entry = calls().remove(&id);
        drop(entry);
        drop(detached);
    }
}
