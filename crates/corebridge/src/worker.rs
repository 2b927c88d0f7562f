//! Worker session.
//!
//! A `Worker` drives one native worker through its lifecycle:
//!
//! ```text
//!   new ─► validate ─► poll_* / complete_* / heartbeat / evict ─┐
//!                                                               │
//!   initiate_shutdown ─► (pollers observe None) ─► finalize_shutdown ─► dispose
//! ```
//!
//! Every operation leases the worker handle into a fresh `Scope` for its
//! duration, so disposing the worker while calls are in flight defers the
//! native free until the last of them returns. Callback-based operations
//! hand the scope to the pending call: dropping their future early leaves
//! the lease and payload in place until the engine calls back.
//!
//! Failures carry the engine's message verbatim (`NativeCall`) and are never
//! retried here.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use corebridge_core::codec::{Decode, Encode};
use corebridge_core::engine::NativeEngine;
use corebridge_core::error::{BridgeError, BridgeResult};
use corebridge_core::sys::WorkerOrFail;

use crate::byte_buffer::ByteBuffer;
use crate::client::Client;
use crate::completion::{begin_call, on_complete, on_poll, Completion};
use crate::config::WorkerConfig;
use crate::handle::{ClientKind, NativeHandle, WorkerKind};
use crate::handle_ref::HandleRef;
use crate::scope::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    WorkflowActivation,
    ActivityTask,
    NexusTask,
}

impl TaskKind {
    fn name(self) -> &'static str {
        match self {
            TaskKind::WorkflowActivation => "workflow activation",
            TaskKind::ActivityTask => "activity task",
            TaskKind::NexusTask => "nexus task",
        }
    }
}

pub struct Worker {
    engine: Arc<dyn NativeEngine>,
    handle: HandleRef<WorkerKind>,
    /// Borrow of the client the worker talks through. `None` for sessions
    /// built from a bare handle.
    client: Mutex<Option<HandleRef<ClientKind>>>,
}

impl Worker {
    /// Construct a native worker on `client`.
    ///
    /// The worker borrows the client for its whole life; disposing the
    /// client first only defers the client's free.
    pub fn new(client: &Client, namespace: &str, config: &WorkerConfig) -> BridgeResult<Self> {
        config.validate()?;
        let engine = client.engine().clone();
        let client_ref = client.handle_ref().borrow()?;

        let mut scope = Scope::new();
        let client_ptr = scope.handle(&client_ref)?;
        let options = config.to_native(&mut scope, namespace);
        let options = scope.pin(options);

        tracing::trace!(namespace, task_queue = %config.task_queue, "creating native worker");
        // Safety: client pointer and options stay alive in `scope` for the
        // synchronous constructor call.
        let WorkerOrFail { worker, fail } = unsafe { engine.worker_new(client_ptr, options) };
        let handle = unsafe { NativeHandle::from_construction(engine.clone(), worker, fail) }?;
        scope.end();

        Ok(Self {
            engine,
            handle: HandleRef::owned(handle),
            client: Mutex::new(Some(client_ref)),
        })
    }

    /// Borrowed session over an existing worker handle, without a client.
    pub fn from_handle(
        engine: Arc<dyn NativeEngine>,
        handle: &Arc<NativeHandle<WorkerKind>>,
    ) -> BridgeResult<Self> {
        Ok(Self {
            engine,
            handle: HandleRef::add_ref(handle)?,
            client: Mutex::new(None),
        })
    }

    /// Second, borrowed session over the same native worker.
    pub fn borrow(&self) -> BridgeResult<Self> {
        let handle = self.handle.borrow()?;
        let client = match self.lock_client().as_ref() {
            Some(c) => Some(c.borrow()?),
            None => None,
        };
        Ok(Self {
            engine: self.engine.clone(),
            handle,
            client: Mutex::new(client),
        })
    }

    pub fn handle_ref(&self) -> &HandleRef<WorkerKind> {
        &self.handle
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    pub fn has_client(&self) -> bool {
        self.lock_client().is_some()
    }

    fn lock_client(&self) -> std::sync::MutexGuard<'_, Option<HandleRef<ClientKind>>> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Lifecycle ──

    /// Ask the engine to check the worker against the server.
    pub async fn validate(&self) -> BridgeResult<()> {
        let completion = {
            let mut scope = Scope::new();
            let worker = scope.handle(&self.handle)?;
            let engine = &self.engine;
            begin_call(engine, scope, move |user_data| unsafe {
                engine.worker_validate(worker, user_data, on_complete)
            })
        };
        finish_unit(completion).await
    }

    /// Signal shutdown. Pending and future polls resolve to `None` once
    /// outstanding work drains.
    pub fn initiate_shutdown(&self) -> BridgeResult<()> {
        let mut scope = Scope::new();
        let worker = scope.handle(&self.handle)?;
        tracing::trace!("initiating worker shutdown");
        unsafe { self.engine.worker_initiate_shutdown(worker) };
        Ok(())
    }

    /// Complete shutdown.
    ///
    /// Call only after `initiate_shutdown` and after every poller has
    /// observed `None`. The engine reports misuse as a failure.
    pub async fn finalize_shutdown(&self) -> BridgeResult<()> {
        let completion = {
            let mut scope = Scope::new();
            let worker = scope.handle(&self.handle)?;
            let engine = &self.engine;
            begin_call(engine, scope, move |user_data| unsafe {
                engine.worker_finalize_shutdown(worker, user_data, on_complete)
            })
        };
        finish_unit(completion).await
    }

    /// Owned: close the worker. Borrowed: drop the borrow. Either way the
    /// client borrow goes too. Also runs on drop (worker first, then client).
    pub fn dispose(&self) {
        self.handle.dispose();
        if let Some(client) = self.lock_client().take() {
            client.dispose();
        }
    }

    /// `dispose`, blocking an owned worker until in-flight calls and
    /// borrowed sessions have released it and the native free has run.
    /// Never call from a task that holds a borrowed session of this worker.
    pub fn dispose_and_wait(&self) {
        self.dispose();
        if self.handle.is_owned() {
            self.handle.handle().wait_freed();
        }
    }

    // ── Polling ──

    /// `Ok(None)` once the poller has shut down.
    pub async fn poll_workflow_activation<T: Decode>(&self) -> BridgeResult<Option<T>> {
        self.poll(TaskKind::WorkflowActivation).await
    }

    pub async fn poll_activity_task<T: Decode>(&self) -> BridgeResult<Option<T>> {
        self.poll(TaskKind::ActivityTask).await
    }

    pub async fn poll_nexus_task<T: Decode>(&self) -> BridgeResult<Option<T>> {
        self.poll(TaskKind::NexusTask).await
    }

    async fn poll<T: Decode>(&self, kind: TaskKind) -> BridgeResult<Option<T>> {
        let completion = {
            let mut scope = Scope::new();
            let worker = scope.handle(&self.handle)?;
            let engine = &self.engine;
            begin_call(engine, scope, move |user_data| unsafe {
                match kind {
                    TaskKind::WorkflowActivation => {
                        engine.worker_poll_workflow_activation(worker, user_data, on_poll)
                    }
                    TaskKind::ActivityTask => {
                        engine.worker_poll_activity_task(worker, user_data, on_poll)
                    }
                    TaskKind::NexusTask => engine.worker_poll_nexus_task(worker, user_data, on_poll),
                }
            })
        };
        match completion.await?.into_result()? {
            Some(payload) => T::decode(payload.as_slice()).map(Some),
            None => {
                tracing::debug!(kind = kind.name(), "poller shut down");
                Ok(None)
            }
        }
    }

    // ── Completion ──

    pub async fn complete_workflow_activation<P: Encode + ?Sized>(
        &self,
        completion: &P,
    ) -> BridgeResult<()> {
        self.complete(TaskKind::WorkflowActivation, completion.encode())
            .await
    }

    pub async fn complete_activity_task<P: Encode + ?Sized>(
        &self,
        completion: &P,
    ) -> BridgeResult<()> {
        self.complete(TaskKind::ActivityTask, completion.encode()).await
    }

    pub async fn complete_nexus_task<P: Encode + ?Sized>(&self, completion: &P) -> BridgeResult<()> {
        self.complete(TaskKind::NexusTask, completion.encode()).await
    }

    async fn complete(&self, kind: TaskKind, bytes: Vec<u8>) -> BridgeResult<()> {
        let completion = {
            let mut scope = Scope::new();
            let worker = scope.handle(&self.handle)?;
            let payload = scope.byte_array(bytes);
            let engine = &self.engine;
            begin_call(engine, scope, move |user_data| unsafe {
                match kind {
                    TaskKind::WorkflowActivation => engine
                        .worker_complete_workflow_activation(worker, payload, user_data, on_complete),
                    TaskKind::ActivityTask => {
                        engine.worker_complete_activity_task(worker, payload, user_data, on_complete)
                    }
                    TaskKind::NexusTask => {
                        engine.worker_complete_nexus_task(worker, payload, user_data, on_complete)
                    }
                }
            })
        };
        finish_unit(completion).await
    }

    // ── Synchronous calls ──

    /// Record a heartbeat for a running activity. The engine's inline
    /// failure, if any, is returned as `NativeCall`.
    pub fn record_activity_heartbeat<P: Encode + ?Sized>(&self, heartbeat: &P) -> BridgeResult<()> {
        let mut scope = Scope::new();
        let worker = scope.handle(&self.handle)?;
        let payload = scope.byte_array(heartbeat.encode());
        let fail = unsafe {
            let raw = self.engine.worker_record_activity_heartbeat(worker, payload);
            ByteBuffer::from_raw(self.engine.clone(), raw)
        };
        match fail {
            Some(fail) => Err(BridgeError::NativeCall(fail.to_utf8())),
            None => Ok(()),
        }
    }

    /// Ask the engine to drop a workflow run from its cache. Only handle
    /// liveness can fail here.
    pub fn request_workflow_eviction(&self, run_id: &str) -> BridgeResult<()> {
        let mut scope = Scope::new();
        let worker = scope.handle(&self.handle)?;
        let run_id = scope.str(run_id);
        unsafe { self.engine.worker_request_workflow_eviction(worker, run_id) };
        Ok(())
    }

    /// Point the worker at a different client.
    ///
    /// The new client is borrowed before the swap and the old borrow is
    /// released after it. In-flight polls are not serialized against the
    /// swap; callers must quiesce them first if that matters.
    pub fn replace_client(&self, client: &Client) -> BridgeResult<()> {
        let new_ref = client.handle_ref().borrow()?;
        {
            let mut scope = Scope::new();
            let worker = scope.handle(&self.handle)?;
            let new_client = scope.handle(&new_ref)?;
            tracing::trace!("replacing worker client");
            unsafe { self.engine.worker_replace_client(worker, new_client) };
        }
        let old = self.lock_client().replace(new_ref);
        if let Some(old) = old {
            old.dispose();
        }
        Ok(())
    }
}

async fn finish_unit(completion: Completion) -> BridgeResult<()> {
    completion.await?.into_result().map(|_| ())
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("handle", &self.handle)
            .field("has_client", &self.has_client())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use corebridge_sim::{SimEngine, SimTaskKind, CALLBACK_THREAD_PREFIX};
    use std::time::Duration;

    fn setup(sim: &Arc<SimEngine>) -> (Client, Worker) {
        let client = Client::new(sim.clone(), &ClientConfig::new()).unwrap();
        let worker = Worker::new(&client, "default", &WorkerConfig::new("orders")).unwrap();
        (client, worker)
    }

    fn assert_no_leaks(sim: &SimEngine) {
        let stats = sim.stats();
        assert_eq!(stats.byte_arrays_freed(), stats.byte_arrays_allocated());
        assert_eq!(stats.double_frees(), 0);
        assert_eq!(stats.use_after_free(), 0);
        assert_eq!(stats.freed_with_pending_calls(), 0);
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..500 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached within 1s");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_options_translated() {
        let sim = SimEngine::new();
        let client = Client::new(sim.clone(), &ClientConfig::new()).unwrap();
        let config = WorkerConfig::new("orders")
            .build_id("build-3")
            .max_cached_workflows(12)
            .max_outstanding_activities(4)
            .max_concurrent_activity_task_polls(2)
            .nonsticky_to_sticky_poll_ratio(0.5)
            .graceful_shutdown_period(Duration::from_millis(1500))
            .no_remote_activities(true);
        let _worker = Worker::new(&client, "billing", &config).unwrap();

        let seen = sim.last_worker_options().unwrap();
        assert_eq!(seen.namespace, "billing");
        assert_eq!(seen.task_queue, "orders");
        assert_eq!(seen.build_id, "build-3");
        assert_eq!(seen.identity_override, "");
        assert_eq!(seen.max_cached_workflows, 12);
        assert_eq!(seen.max_outstanding_activities, 4);
        assert_eq!(seen.max_concurrent_activity_task_polls, 2);
        assert_eq!(seen.nonsticky_to_sticky_poll_ratio, 0.5);
        assert_eq!(seen.graceful_shutdown_period_millis, 1500);
        assert!(seen.no_remote_activities);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_construction_failure() {
        let sim = SimEngine::new();
        let client = Client::new(sim.clone(), &ClientConfig::new()).unwrap();
        sim.fail_next_worker_new("Invalid task queue");
        let err = Worker::new(&client, "default", &WorkerConfig::new("orders")).unwrap_err();
        assert!(matches!(err, BridgeError::NativeConstruction(ref m) if m == "Invalid task queue"));
        // The client borrow taken for the worker is released again.
        assert_eq!(client.handle_ref().handle().ref_count(), 1);
        assert_no_leaks(&sim);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_validate() {
        let sim = SimEngine::new();
        let (_client, worker) = setup(&sim);
        worker.validate().await.unwrap();

        sim.fail_validation("namespace not found");
        let err = worker.validate().await.unwrap_err();
        assert_eq!(err.to_string(), "namespace not found");
        assert_no_leaks(&sim);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_poll_three_way() {
        let sim = SimEngine::new();
        let (_client, worker) = setup(&sim);

        sim.push_workflow_activation(b"activation-1".to_vec());
        let task: Option<Vec<u8>> = worker.poll_workflow_activation().await.unwrap();
        assert_eq!(task.as_deref(), Some(&b"activation-1"[..]));

        sim.fail_next_poll("poll failed: unavailable");
        let err = worker.poll_activity_task::<Vec<u8>>().await.unwrap_err();
        assert_eq!(err.native_message(), Some("poll failed: unavailable"));

        worker.initiate_shutdown().unwrap();
        let task: Option<Vec<u8>> = worker.poll_nexus_task().await.unwrap();
        assert!(task.is_none());
        assert_no_leaks(&sim);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pending_poll_released_by_shutdown() {
        let sim = SimEngine::new();
        let (_client, worker) = setup(&sim);
        let poller = worker.borrow().unwrap();

        let pending = tokio::spawn(async move { poller.poll_activity_task::<Vec<u8>>().await });
        while sim.pending_polls() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(!pending.is_finished());

        worker.initiate_shutdown().unwrap();
        let polled = pending.await.unwrap().unwrap();
        assert!(polled.is_none());
        worker.finalize_shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_poll_decode_error() {
        let sim = SimEngine::new();
        let (_client, worker) = setup(&sim);
        sim.push_activity_task(vec![0xff, 0xfe]);
        let err = worker.poll_activity_task::<String>().await.unwrap_err();
        assert!(matches!(err, BridgeError::Decode { .. }));
        assert_no_leaks(&sim);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_complete_failure_message() {
        let sim = SimEngine::new();
        let (_client, worker) = setup(&sim);
        worker.complete_activity_task(&b"result"[..]).await.unwrap();

        sim.fail_next_completion("boom");
        let err = worker.complete_activity_task("second").await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(matches!(err, BridgeError::NativeCall(_)));

        let seen = sim.completions(SimTaskKind::ActivityTask);
        assert_eq!(seen, vec![b"result".to_vec(), b"second".to_vec()]);
        assert_no_leaks(&sim);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_complete_each_kind() {
        let sim = SimEngine::new();
        let (_client, worker) = setup(&sim);
        worker.complete_workflow_activation("wf").await.unwrap();
        worker.complete_nexus_task(&vec![1u8, 2, 3]).await.unwrap();
        assert_eq!(sim.completions(SimTaskKind::WorkflowActivation), vec![b"wf".to_vec()]);
        assert_eq!(sim.completions(SimTaskKind::NexusTask), vec![vec![1, 2, 3]]);
        assert!(sim.completions(SimTaskKind::ActivityTask).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_continuation_off_callback_thread() {
        let sim = SimEngine::new();
        let (_client, worker) = setup(&sim);
        sim.push_workflow_activation(b"x".to_vec());
        let _: Option<Vec<u8>> = worker.poll_workflow_activation().await.unwrap();

        let current = std::thread::current();
        let name = current.name().unwrap_or("");
        assert!(!name.starts_with(CALLBACK_THREAD_PREFIX), "resumed on {}", name);
        assert!(sim.callbacks_fired() >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_double_fire_resolves_once() {
        let sim = SimEngine::new();
        let (_client, worker) = setup(&sim);
        sim.set_double_fire(true);
        sim.fail_next_completion("first failure");
        let err = worker.complete_workflow_activation("c").await.unwrap_err();
        assert_eq!(err.to_string(), "first failure");
        assert_eq!(sim.stats().double_frees(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_heartbeat_bytes_identical() {
        let sim = SimEngine::new();
        let (_client, worker) = setup(&sim);
        let details: Vec<u8> = (0..=255u8).collect();
        worker.record_activity_heartbeat(&details).unwrap();
        assert_eq!(sim.heartbeats(), vec![details.clone()]);

        sim.fail_next_heartbeat("activity not found");
        let err = worker.record_activity_heartbeat(&details).unwrap_err();
        assert_eq!(err.native_message(), Some("activity not found"));
        assert_no_leaks(&sim);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_eviction_recorded() {
        let sim = SimEngine::new();
        let (_client, worker) = setup(&sim);
        worker.request_workflow_eviction("run-42").unwrap();
        assert_eq!(sim.evictions(), vec!["run-42".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_finalize_without_initiate_fails() {
        let sim = SimEngine::new();
        let (_client, worker) = setup(&sim);
        let err = worker.finalize_shutdown().await.unwrap_err();
        assert!(matches!(err, BridgeError::NativeCall(_)));

        worker.initiate_shutdown().unwrap();
        worker.finalize_shutdown().await.unwrap();
        assert_no_leaks(&sim);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispose_while_polling_defers_free() {
        let sim = SimEngine::new();
        let (_client, worker) = setup(&sim);
        let poller = worker.borrow().unwrap();
        let raw = worker.handle_ref().handle().clone();

        let pending = tokio::spawn(async move { poller.poll_workflow_activation::<Vec<u8>>().await });
        while sim.pending_polls() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        worker.dispose();
        assert!(raw.is_closed());
        assert!(!raw.is_freed());
        assert_eq!(sim.stats().workers_freed(), 0);

        sim.push_workflow_activation(b"late".to_vec());
        let polled = pending.await.unwrap().unwrap();
        assert_eq!(polled.as_deref(), Some(&b"late"[..]));

        raw.wait_freed();
        assert_eq!(sim.stats().workers_freed(), 1);
        assert_eq!(sim.stats().use_after_free(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_poll_keeps_worker_until_callback() {
        let sim = SimEngine::new();
        let (_client, worker) = setup(&sim);
        let raw = worker.handle_ref().handle().clone();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), worker.poll_activity_task::<Vec<u8>>()).await;
        assert!(timed_out.is_err());
        assert_eq!(sim.pending_polls(), 1);

        worker.dispose();
        assert!(raw.is_closed());
        assert!(!raw.is_freed());
        assert_eq!(sim.stats().workers_freed(), 0);

        // The engine still answers the abandoned poll; only then may the
        // worker go, and the task buffer is freed with nobody awaiting it.
        sim.push_activity_task(b"orphan".to_vec());
        wait_until(|| sim.stats().workers_freed() == 1).await;
        assert!(raw.is_freed());
        assert_no_leaks(&sim);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_completion_keeps_worker_until_callback() {
        let sim = SimEngine::new();
        let (_client, worker) = setup(&sim);
        let raw = worker.handle_ref().handle().clone();

        sim.hold_callbacks();
        sim.fail_next_completion("rejected late");
        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), worker.complete_activity_task("result")).await;
        assert!(timed_out.is_err());

        worker.dispose();
        assert!(!raw.is_freed());
        assert_eq!(sim.stats().workers_freed(), 0);

        sim.release_callbacks();
        wait_until(|| sim.stats().workers_freed() == 1).await;
        assert_eq!(
            sim.completions(SimTaskKind::ActivityTask),
            vec![b"result".to_vec()]
        );
        assert_no_leaks(&sim);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispose_and_wait_after_poll_returns() {
        let sim = SimEngine::new();
        let (_client, worker) = setup(&sim);
        let poller = worker.borrow().unwrap();
        let pending = tokio::spawn(async move { poller.poll_nexus_task::<Vec<u8>>().await });
        while sim.pending_polls() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let feeder = sim.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            feeder.push_nexus_task(b"n".to_vec());
        });
        let worker = Arc::new(worker);
        let disposer = worker.clone();
        tokio::task::spawn_blocking(move || disposer.dispose_and_wait())
            .await
            .unwrap();

        assert!(pending.await.unwrap().unwrap().is_some());
        assert_eq!(sim.stats().workers_freed(), 1);
        assert_eq!(sim.stats().use_after_free(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_calls_after_dispose_fail() {
        let sim = SimEngine::new();
        let (_client, worker) = setup(&sim);
        worker.dispose();
        assert!(worker.validate().await.unwrap_err().is_invalid_handle());
        assert!(worker.initiate_shutdown().unwrap_err().is_invalid_handle());
        assert!(worker.borrow().unwrap_err().is_invalid_handle());
        assert_eq!(sim.stats().workers_freed(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replace_client_releases_old() {
        let sim = SimEngine::new();
        let (old_client, worker) = setup(&sim);
        let new_client = Client::new(sim.clone(), &ClientConfig::new()).unwrap();

        worker.replace_client(&new_client).unwrap();
        assert_eq!(sim.stats().client_replacements(), 1);

        old_client.dispose();
        assert_eq!(sim.stats().clients_freed(), 1);

        new_client.dispose();
        assert_eq!(sim.stats().clients_freed(), 1);
        worker.dispose();
        assert_eq!(sim.stats().clients_freed(), 2);
        assert_eq!(sim.stats().workers_freed(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_keeps_client_alive() {
        let sim = SimEngine::new();
        let (client, worker) = setup(&sim);
        client.dispose();
        assert_eq!(sim.stats().clients_freed(), 0);
        worker.validate().await.unwrap();
        drop(worker);
        assert_eq!(sim.stats().workers_freed(), 1);
        assert_eq!(sim.stats().clients_freed(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_from_handle_session() {
        let sim = SimEngine::new();
        let (_client, owner) = setup(&sim);
        let replay = Worker::from_handle(sim.clone(), owner.handle_ref().handle()).unwrap();
        assert!(!replay.has_client());
        replay.request_workflow_eviction("run-1").unwrap();

        owner.dispose();
        assert_eq!(sim.stats().workers_freed(), 0);
        replay.dispose();
        assert_eq!(sim.stats().workers_freed(), 1);
    }
}
