//! `SimEngine` — in-process `NativeEngine`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use libc::c_void;

use corebridge_core::engine::NativeEngine;
use corebridge_core::sys::{
    ByteArray, ByteArrayRef, ClientOptions, ClientOrFail, RawClient, RawWorker, WorkerCallback,
    WorkerOptions, WorkerOrFail, WorkerPollCallback,
};

use crate::pool::{CallbackPool, Job};
use crate::stats::{Counter, SimStats};

const DEFAULT_THREADS: usize = 2;
const QUEUE_DEPTH: usize = 1024;

/// The three task streams a worker polls and completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimTaskKind {
    WorkflowActivation,
    ActivityTask,
    NexusTask,
}

impl SimTaskKind {
    fn index(self) -> usize {
        match self {
            SimTaskKind::WorkflowActivation => 0,
            SimTaskKind::ActivityTask => 1,
            SimTaskKind::NexusTask => 2,
        }
    }
}

/// Client options as the constructor saw them.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptionsSnapshot {
    pub target_url: String,
    pub client_name: String,
    pub client_version: String,
    pub identity: String,
}

/// Worker options as the constructor saw them.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOptionsSnapshot {
    pub namespace: String,
    pub task_queue: String,
    pub build_id: String,
    pub identity_override: String,
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

// ── Internal state ──

struct WorkerState {
    client: usize,
    shutdown: bool,
}

/// Dispatched callbacks not yet invoked, per worker address.
#[derive(Default)]
struct InFlight(Mutex<HashMap<usize, usize>>);

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashMap<usize, usize>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, worker: usize) {
        *self.lock().entry(worker).or_insert(0) += 1;
    }

    fn finish(&self, worker: usize) {
        let mut calls = self.lock();
        if let Some(n) = calls.get_mut(&worker) {
            *n -= 1;
            if *n == 0 {
                calls.remove(&worker);
            }
        }
    }

    fn count(&self, worker: usize) -> usize {
        self.lock().get(&worker).copied().unwrap_or(0)
    }
}

struct PendingPoll {
    kind: SimTaskKind,
    worker: usize,
    user_data: usize,
    callback: WorkerPollCallback,
}

#[derive(Default)]
struct Faults {
    client_new: Option<String>,
    worker_new: Option<String>,
    validation: Option<String>,
    poll: Option<String>,
    completion: Option<String>,
    heartbeat: Option<String>,
    double_fire: bool,
}

#[derive(Default)]
struct State {
    live_arrays: HashSet<usize>,
    clients: HashSet<usize>,
    workers: HashMap<usize, WorkerState>,
    queues: [VecDeque<Vec<u8>>; 3],
    pending: Vec<PendingPoll>,
    /// `Some` while callbacks are held back.
    held: Option<Vec<Job>>,
    faults: Faults,
    heartbeats: Vec<Vec<u8>>,
    completions: [Vec<Vec<u8>>; 3],
    evictions: Vec<String>,
    last_client_options: Option<ClientOptionsSnapshot>,
    last_worker_options: Option<WorkerOptionsSnapshot>,
}

/// What a poll resolves to, decided under the state lock and fired after.
enum PollOutcome {
    Task(Vec<u8>),
    Fail(String),
    ShutDown,
    Parked,
}

/// A simulated engine.
///
/// Callbacks fire from its own `sim-engine-{i}` threads, never from the
/// caller's. Byte buffers and objects are tracked so tests can assert that
/// each is freed exactly once and never used afterwards.
pub struct SimEngine {
    state: Mutex<State>,
    stats: Arc<SimStats>,
    in_flight: Arc<InFlight>,
    pool: CallbackPool,
    next_object: AtomicU64,
}

fn text(r: ByteArrayRef) -> String {
    // Safety: the caller pinned the range for the duration of the call.
    String::from_utf8_lossy(unsafe { r.to_slice() }).into_owned()
}

impl SimEngine {
    /// Engine with the default number of callback threads.
    ///
    /// # Panics
    /// If the threads cannot be spawned; use `with_threads` to handle that.
    pub fn new() -> Arc<Self> {
        Self::with_threads(DEFAULT_THREADS).expect("failed to spawn sim-engine threads")
    }

    pub fn with_threads(n: usize) -> io::Result<Arc<Self>> {
        Ok(Arc::new(Self {
            state: Mutex::new(State::default()),
            stats: Arc::new(SimStats::default()),
            in_flight: Arc::new(InFlight::default()),
            pool: CallbackPool::new(n, QUEUE_DEPTH)?,
            next_object: AtomicU64::new(1),
        }))
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    pub fn callbacks_fired(&self) -> usize {
        self.stats.callbacks_fired()
    }

    // ── Allocation ──

    /// Allocate a native buffer the way the engine would. The receiver must
    /// hand it back to `byte_array_free`.
    pub fn alloc_byte_array(&self, bytes: Vec<u8>) -> *const ByteArray {
        let bytes = ManuallyDrop::new(bytes);
        let array = Box::new(ByteArray {
            data: bytes.as_ptr(),
            size: bytes.len(),
            cap: bytes.capacity(),
            disable_free: false,
        });
        let ptr = Box::into_raw(array);
        self.lock().live_arrays.insert(ptr as usize);
        self.stats.bump(Counter::ByteArraysAllocated);
        ptr
    }

    fn alloc_object(&self) -> usize {
        let id = self.next_object.fetch_add(1, Ordering::Relaxed);
        Box::into_raw(Box::new(id)) as usize
    }

    /// # Safety
    /// `addr` must come from `alloc_object` and be removed from its live set.
    unsafe fn free_object(addr: usize) {
        drop(Box::from_raw(addr as *mut u64));
    }

    /// A live client not created through `client_new`, for handle tests.
    pub fn new_raw_client(&self) -> *mut RawClient {
        let addr = self.alloc_object();
        self.lock().clients.insert(addr);
        self.stats.bump(Counter::ClientsCreated);
        addr as *mut RawClient
    }

    pub fn is_client_live(&self, client: *mut RawClient) -> bool {
        self.lock().clients.contains(&(client as usize))
    }

    pub fn is_worker_live(&self, worker: *mut RawWorker) -> bool {
        self.lock().workers.contains_key(&(worker as usize))
    }

    // ── Scripting ──

    pub fn push_workflow_activation(&self, payload: Vec<u8>) {
        self.push_task(SimTaskKind::WorkflowActivation, payload);
    }

    pub fn push_activity_task(&self, payload: Vec<u8>) {
        self.push_task(SimTaskKind::ActivityTask, payload);
    }

    pub fn push_nexus_task(&self, payload: Vec<u8>) {
        self.push_task(SimTaskKind::NexusTask, payload);
    }

    /// Hand the task to the oldest parked poll of its kind, or queue it.
    fn push_task(&self, kind: SimTaskKind, payload: Vec<u8>) {
        let parked = {
            let mut st = self.lock();
            match st.pending.iter().position(|p| p.kind == kind) {
                Some(i) => Some(st.pending.remove(i)),
                None => {
                    st.queues[kind.index()].push_back(payload.clone());
                    None
                }
            }
        };
        if let Some(p) = parked {
            self.fire_poll(p.worker, p.user_data, p.callback, PollOutcome::Task(payload));
        }
    }

    pub fn fail_next_client_new(&self, message: &str) {
        self.lock().faults.client_new = Some(message.to_string());
    }

    pub fn fail_next_worker_new(&self, message: &str) {
        self.lock().faults.worker_new = Some(message.to_string());
    }

    pub fn fail_validation(&self, message: &str) {
        self.lock().faults.validation = Some(message.to_string());
    }

    pub fn fail_next_poll(&self, message: &str) {
        self.lock().faults.poll = Some(message.to_string());
    }

    pub fn fail_next_completion(&self, message: &str) {
        self.lock().faults.completion = Some(message.to_string());
    }

    pub fn fail_next_heartbeat(&self, message: &str) {
        self.lock().faults.heartbeat = Some(message.to_string());
    }

    /// Queue callbacks instead of firing them, until `release_callbacks`.
    pub fn hold_callbacks(&self) {
        let mut st = self.lock();
        if st.held.is_none() {
            st.held = Some(Vec::new());
        }
    }

    /// Fire every held callback, in order, and stop holding.
    pub fn release_callbacks(&self) {
        let held = self.lock().held.take().unwrap_or_default();
        for job in held {
            self.dispatch(job);
        }
    }

    /// Every callback fires a second time right after the first.
    pub fn set_double_fire(&self, enable: bool) {
        self.lock().faults.double_fire = enable;
    }

    // ── Observations ──

    pub fn heartbeats(&self) -> Vec<Vec<u8>> {
        self.lock().heartbeats.clone()
    }

    pub fn completions(&self, kind: SimTaskKind) -> Vec<Vec<u8>> {
        self.lock().completions[kind.index()].clone()
    }

    pub fn evictions(&self) -> Vec<String> {
        self.lock().evictions.clone()
    }

    pub fn last_client_options(&self) -> Option<ClientOptionsSnapshot> {
        self.lock().last_client_options.clone()
    }

    pub fn last_worker_options(&self) -> Option<WorkerOptionsSnapshot> {
        self.lock().last_worker_options.clone()
    }

    pub fn pending_polls(&self) -> usize {
        self.lock().pending.len()
    }

    // ── Callback delivery ──

    fn dispatch(&self, job: Job) {
        let job = {
            let mut st = self.lock();
            match st.held.as_mut() {
                Some(held) => {
                    held.push(job);
                    return;
                }
                None => job,
            }
        };
        if let Err(job) = self.pool.submit(job) {
            tracing::warn!("sim callback queue full, firing inline");
            job();
        }
    }

    fn double_fire(&self) -> bool {
        self.lock().faults.double_fire
    }

    fn fire_complete(&self, worker: usize, user_data: usize, callback: WorkerCallback, fail: Option<String>) {
        let fail = fail.map_or(0, |m| self.alloc_byte_array(m.into_bytes()) as usize);
        let duplicate = self
            .double_fire()
            .then(|| self.alloc_byte_array(b"duplicate signal".to_vec()) as usize);
        let stats = self.stats.clone();
        let in_flight = self.in_flight.clone();
        in_flight.begin(worker);
        self.dispatch(Box::new(move || {
            in_flight.finish(worker);
            stats.bump(Counter::CallbacksFired);
            unsafe { callback(user_data as *mut c_void, fail as *const ByteArray) };
            if let Some(dup) = duplicate {
                stats.bump(Counter::CallbacksFired);
                unsafe { callback(user_data as *mut c_void, dup as *const ByteArray) };
            }
        }));
    }

    fn fire_poll(&self, worker: usize, user_data: usize, callback: WorkerPollCallback, outcome: PollOutcome) {
        let (success, fail) = match outcome {
            PollOutcome::Task(payload) => (self.alloc_byte_array(payload) as usize, 0),
            PollOutcome::Fail(m) => (0, self.alloc_byte_array(m.into_bytes()) as usize),
            PollOutcome::ShutDown => (0, 0),
            PollOutcome::Parked => return,
        };
        let duplicate = self
            .double_fire()
            .then(|| self.alloc_byte_array(b"duplicate signal".to_vec()) as usize);
        let stats = self.stats.clone();
        let in_flight = self.in_flight.clone();
        in_flight.begin(worker);
        self.dispatch(Box::new(move || {
            in_flight.finish(worker);
            stats.bump(Counter::CallbacksFired);
            unsafe {
                callback(
                    user_data as *mut c_void,
                    success as *const ByteArray,
                    fail as *const ByteArray,
                )
            };
            if let Some(dup) = duplicate {
                stats.bump(Counter::CallbacksFired);
                unsafe { callback(user_data as *mut c_void, dup as *const ByteArray, std::ptr::null()) };
            }
        }));
    }

    /// Counts and logs a call on a freed or unknown worker.
    fn worker_live(&self, st: &State, worker: *mut RawWorker) -> bool {
        if st.workers.contains_key(&(worker as usize)) {
            return true;
        }
        tracing::warn!(ptr = ?worker, "call on a worker that is not live");
        self.stats.bump(Counter::UseAfterFree);
        false
    }

    fn poll(&self, kind: SimTaskKind, worker: *mut RawWorker, user_data: *mut c_void, callback: WorkerPollCallback) {
        let outcome = {
            let mut st = self.lock();
            if !self.worker_live(&st, worker) {
                PollOutcome::Fail("worker is not live".to_string())
            } else if let Some(m) = st.faults.poll.take() {
                PollOutcome::Fail(m)
            } else if let Some(task) = st.queues[kind.index()].pop_front() {
                PollOutcome::Task(task)
            } else if st.workers.get(&(worker as usize)).map_or(false, |w| w.shutdown) {
                PollOutcome::ShutDown
            } else {
                st.pending.push(PendingPoll {
                    kind,
                    worker: worker as usize,
                    user_data: user_data as usize,
                    callback,
                });
                PollOutcome::Parked
            }
        };
        self.fire_poll(worker as usize, user_data as usize, callback, outcome);
    }

    fn complete(
        &self,
        kind: SimTaskKind,
        worker: *mut RawWorker,
        completion: ByteArrayRef,
        user_data: *mut c_void,
        callback: WorkerCallback,
    ) {
        let fail = {
            let mut st = self.lock();
            if !self.worker_live(&st, worker) {
                Some("worker is not live".to_string())
            } else {
                // Safety: pinned by the caller until the callback fires.
                let bytes = unsafe { completion.to_slice() }.to_vec();
                st.completions[kind.index()].push(bytes);
                st.faults.completion.take()
            }
        };
        self.fire_complete(worker as usize, user_data as usize, callback, fail);
    }
}

impl NativeEngine for SimEngine {
    unsafe fn byte_array_free(&self, bytes: *const ByteArray) {
        if bytes.is_null() {
            return;
        }
        let known = self.lock().live_arrays.remove(&(bytes as usize));
        if !known {
            tracing::warn!(ptr = ?bytes, "free of unknown or already freed byte array");
            self.stats.bump(Counter::DoubleFrees);
            return;
        }
        let array = Box::from_raw(bytes as *mut ByteArray);
        if !array.disable_free {
            drop(Vec::from_raw_parts(array.data as *mut u8, array.size, array.cap));
        }
        self.stats.bump(Counter::ByteArraysFreed);
    }

    unsafe fn client_new(&self, options: *const ClientOptions) -> ClientOrFail {
        let fault = {
            let mut st = self.lock();
            if let Some(opts) = options.as_ref() {
                st.last_client_options = Some(ClientOptionsSnapshot {
                    target_url: text(opts.target_url),
                    client_name: text(opts.client_name),
                    client_version: text(opts.client_version),
                    identity: text(opts.identity),
                });
            }
            st.faults.client_new.take()
        };
        match fault {
            Some(m) => ClientOrFail {
                client: std::ptr::null_mut(),
                fail: self.alloc_byte_array(m.into_bytes()),
            },
            None => ClientOrFail {
                client: self.new_raw_client(),
                fail: std::ptr::null(),
            },
        }
    }

    unsafe fn client_free(&self, client: *mut RawClient) {
        let addr = client as usize;
        if self.lock().clients.remove(&addr) {
            Self::free_object(addr);
            self.stats.bump(Counter::ClientsFreed);
        } else {
            tracing::warn!(ptr = ?client, "free of unknown or already freed client");
            self.stats.bump(Counter::DoubleFrees);
        }
    }

    unsafe fn worker_new(&self, client: *mut RawClient, options: *const WorkerOptions) -> WorkerOrFail {
        let fault = {
            let mut st = self.lock();
            if !st.clients.contains(&(client as usize)) {
                self.stats.bump(Counter::UseAfterFree);
                Some("client is not live".to_string())
            } else {
                if let Some(o) = options.as_ref() {
                    st.last_worker_options = Some(WorkerOptionsSnapshot {
                        namespace: text(o.namespace),
                        task_queue: text(o.task_queue),
                        build_id: text(o.build_id),
                        identity_override: text(o.identity_override),
                        max_cached_workflows: o.max_cached_workflows,
                        max_outstanding_workflow_tasks: o.max_outstanding_workflow_tasks,
                        max_outstanding_activities: o.max_outstanding_activities,
                        max_outstanding_nexus_tasks: o.max_outstanding_nexus_tasks,
                        max_concurrent_workflow_task_polls: o.max_concurrent_workflow_task_polls,
                        max_concurrent_activity_task_polls: o.max_concurrent_activity_task_polls,
                        nonsticky_to_sticky_poll_ratio: o.nonsticky_to_sticky_poll_ratio,
                        graceful_shutdown_period_millis: o.graceful_shutdown_period_millis,
                        no_remote_activities: o.no_remote_activities,
                    });
                }
                st.faults.worker_new.take()
            }
        };
        if let Some(m) = fault {
            return WorkerOrFail {
                worker: std::ptr::null_mut(),
                fail: self.alloc_byte_array(m.into_bytes()),
            };
        }
        let addr = self.alloc_object();
        self.lock().workers.insert(
            addr,
            WorkerState {
                client: client as usize,
                shutdown: false,
            },
        );
        self.stats.bump(Counter::WorkersCreated);
        WorkerOrFail {
            worker: addr as *mut RawWorker,
            fail: std::ptr::null(),
        }
    }

    unsafe fn worker_free(&self, worker: *mut RawWorker) {
        let addr = worker as usize;
        let removed = {
            let mut st = self.lock();
            let removed = st.workers.remove(&addr).is_some();
            let before = st.pending.len();
            st.pending.retain(|p| p.worker != addr);
            let parked = before - st.pending.len();
            let dispatched = self.in_flight.count(addr);
            if parked + dispatched > 0 {
                tracing::warn!(ptr = ?worker, parked, dispatched, "worker freed with calls outstanding");
                self.stats.bump(Counter::FreedWithPendingCalls);
            }
            removed
        };
        if removed {
            Self::free_object(addr);
            self.stats.bump(Counter::WorkersFreed);
        } else {
            tracing::warn!(ptr = ?worker, "free of unknown or already freed worker");
            self.stats.bump(Counter::DoubleFrees);
        }
    }

    unsafe fn worker_validate(&self, worker: *mut RawWorker, user_data: *mut c_void, callback: WorkerCallback) {
        let fail = {
            let mut st = self.lock();
            if !self.worker_live(&st, worker) {
                Some("worker is not live".to_string())
            } else {
                st.faults.validation.take()
            }
        };
        self.fire_complete(worker as usize, user_data as usize, callback, fail);
    }

    unsafe fn worker_replace_client(&self, worker: *mut RawWorker, client: *mut RawClient) {
        let mut st = self.lock();
        if !self.worker_live(&st, worker) {
            return;
        }
        if !st.clients.contains(&(client as usize)) {
            tracing::warn!(ptr = ?client, "replacement client is not live");
            self.stats.bump(Counter::UseAfterFree);
            return;
        }
        if let Some(w) = st.workers.get_mut(&(worker as usize)) {
            w.client = client as usize;
        }
        self.stats.bump(Counter::ClientReplacements);
    }

    unsafe fn worker_poll_workflow_activation(
        &self,
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerPollCallback,
    ) {
        self.poll(SimTaskKind::WorkflowActivation, worker, user_data, callback);
    }

    unsafe fn worker_poll_activity_task(
        &self,
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerPollCallback,
    ) {
        self.poll(SimTaskKind::ActivityTask, worker, user_data, callback);
    }

    unsafe fn worker_poll_nexus_task(
        &self,
        worker: *mut RawWorker,
        user_data: *mut c_void,
        callback: WorkerPollCallback,
    ) {
        self.poll(SimTaskKind::NexusTask, worker, user_data, callback);
    }

    unsafe fn worker_complete_workflow_activation(
        &self,
        worker: *mut RawWorker,
        completion: ByteArrayRef,
        user_data: *mut c_void,
        callback: WorkerCallback,
    ) {
        self.complete(SimTaskKind::WorkflowActivation, worker, completion, user_data, callback);
    }

    unsafe fn worker_complete_activity_task(
        &self,
        worker: *mut RawWorker,
        completion: ByteArrayRef,
        user_data: *mut c_void,
        callback: WorkerCallback,
    ) {
        self.complete(SimTaskKind::ActivityTask, worker, completion, user_data, callback);
    }

    unsafe fn worker_complete_nexus_task(
        &self,
        worker: *mut RawWorker,
        completion: ByteArrayRef,
        user_data: *mut c_void,
        callback: WorkerCallback,
    ) {
        self.complete(SimTaskKind::NexusTask, worker, completion, user_data, callback);
    }

    unsafe fn worker_record_activity_heartbeat(
        &self,
        worker: *mut RawWorker,
        heartbeat: ByteArrayRef,
    ) -> *const ByteArray {
        let fail = {
            let mut st = self.lock();
            if !self.worker_live(&st, worker) {
                Some("worker is not live".to_string())
            } else {
                st.heartbeats.push(heartbeat.to_slice().to_vec());
                st.faults.heartbeat.take()
            }
        };
        match fail {
            Some(m) => self.alloc_byte_array(m.into_bytes()),
            None => std::ptr::null(),
        }
    }

    unsafe fn worker_request_workflow_eviction(&self, worker: *mut RawWorker, run_id: ByteArrayRef) {
        let mut st = self.lock();
        if self.worker_live(&st, worker) {
            st.evictions.push(text(run_id));
        }
    }

    unsafe fn worker_initiate_shutdown(&self, worker: *mut RawWorker) {
        let released: Vec<PendingPoll> = {
            let mut st = self.lock();
            if !self.worker_live(&st, worker) {
                return;
            }
            let addr = worker as usize;
            if let Some(w) = st.workers.get_mut(&addr) {
                w.shutdown = true;
            }
            let (released, kept): (Vec<_>, Vec<_>) =
                std::mem::take(&mut st.pending).into_iter().partition(|p| p.worker == addr);
            st.pending = kept;
            released
        };
        for p in released {
            self.fire_poll(p.worker, p.user_data, p.callback, PollOutcome::ShutDown);
        }
    }

    unsafe fn worker_finalize_shutdown(&self, worker: *mut RawWorker, user_data: *mut c_void, callback: WorkerCallback) {
        let fail = {
            let st = self.lock();
            let addr = worker as usize;
            if !self.worker_live(&st, worker) {
                Some("worker is not live".to_string())
            } else if !st.workers.get(&addr).map_or(false, |w| w.shutdown) {
                Some("shutdown was not initiated".to_string())
            } else if st.pending.iter().any(|p| p.worker == addr) {
                Some("pollers still outstanding".to_string())
            } else {
                None
            }
        };
        self.fire_complete(worker as usize, user_data as usize, callback, fail);
    }
}

impl Drop for SimEngine {
    fn drop(&mut self) {
        let st = self.lock();
        if !st.live_arrays.is_empty() || !st.clients.is_empty() || !st.workers.is_empty() {
            tracing::debug!(
                arrays = st.live_arrays.len(),
                clients = st.clients.len(),
                workers = st.workers.len(),
                "sim engine dropped with live objects"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    static TX: Mutex<Option<mpsc::Sender<(usize, Vec<u8>, Option<String>)>>> = Mutex::new(None);

    #[test]
    fn test_byte_array_double_free_detected() {
        let sim = SimEngine::new();
        let raw = sim.alloc_byte_array(b"abc".to_vec());
        unsafe {
            sim.byte_array_free(raw);
            sim.byte_array_free(raw);
        }
        assert_eq!(sim.stats().byte_arrays_freed(), 1);
        assert_eq!(sim.stats().double_frees(), 1);
    }

    #[test]
    fn test_worker_on_freed_client_fails() {
        let sim = SimEngine::new();
        let client = sim.new_raw_client();
        unsafe { sim.client_free(client) };
        let r = unsafe { sim.worker_new(client, std::ptr::null()) };
        assert!(r.worker.is_null());
        assert!(!r.fail.is_null());
        assert_eq!(sim.stats().use_after_free(), 1);
        unsafe { sim.byte_array_free(r.fail) };
    }

    unsafe extern "C" fn record_poll(user_data: *mut c_void, success: *const ByteArray, fail: *const ByteArray) {
        let payload = success.as_ref().map(|a| a.as_slice().to_vec()).unwrap_or_default();
        let fail_msg = fail
            .as_ref()
            .map(|a| String::from_utf8_lossy(a.as_slice()).into_owned());
        if let Some(tx) = TX.lock().unwrap().as_ref() {
            tx.send((user_data as usize, payload, fail_msg)).unwrap();
        }
    }

    #[test]
    fn test_poll_parks_until_task_pushed() {
        let (tx, rx) = mpsc::channel();
        *TX.lock().unwrap() = Some(tx);

        let sim = SimEngine::new();
        let client = sim.new_raw_client();
        let w = unsafe { sim.worker_new(client, std::ptr::null()) };
        unsafe { sim.worker_poll_activity_task(w.worker, 7 as *mut c_void, record_poll) };
        assert_eq!(sim.pending_polls(), 1);

        sim.push_activity_task(b"task".to_vec());
        let (ud, payload, fail) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(ud, 7);
        assert_eq!(payload, b"task");
        assert!(fail.is_none());
        assert_eq!(sim.pending_polls(), 0);
        assert_eq!(sim.callbacks_fired(), 1);
    }

    unsafe extern "C" fn ignore_complete(_user_data: *mut c_void, _fail: *const ByteArray) {}

    #[test]
    fn test_free_with_parked_poll_counted() {
        let sim = SimEngine::new();
        let client = sim.new_raw_client();
        let w = unsafe { sim.worker_new(client, std::ptr::null()) };
        unsafe {
            sim.worker_poll_nexus_task(w.worker, 1 as *mut c_void, record_poll);
            sim.worker_free(w.worker);
        }
        assert_eq!(sim.pending_polls(), 0);
        assert_eq!(sim.stats().freed_with_pending_calls(), 1);
    }

    #[test]
    fn test_held_callback_counts_as_outstanding() {
        let sim = SimEngine::new();
        let client = sim.new_raw_client();
        let w = unsafe { sim.worker_new(client, std::ptr::null()) };

        sim.hold_callbacks();
        unsafe { sim.worker_validate(w.worker, 2 as *mut c_void, ignore_complete) };
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sim.callbacks_fired(), 0);

        sim.release_callbacks();
        for _ in 0..500 {
            if sim.callbacks_fired() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(sim.callbacks_fired(), 1);
        unsafe { sim.worker_free(w.worker) };
        assert_eq!(sim.stats().freed_with_pending_calls(), 0);
    }

    #[test]
    fn test_free_with_held_callback_counted() {
        let sim = SimEngine::new();
        let client = sim.new_raw_client();
        let w = unsafe { sim.worker_new(client, std::ptr::null()) };

        sim.hold_callbacks();
        unsafe {
            sim.worker_validate(w.worker, 3 as *mut c_void, ignore_complete);
            sim.worker_free(w.worker);
        }
        assert_eq!(sim.stats().freed_with_pending_calls(), 1);
    }
}
