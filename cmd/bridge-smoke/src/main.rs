//! corebridge End-to-End Smoke Test
//!
//! Drives the full safety layer against the simulated engine:
//!   Part A — Handles: owned/borrowed guards, deferred free, disposer wins
//!   Part B — Scopes: pinned values, payload bytes, handle leases
//!   Part C — Worker lifecycle: validate, poll, complete, heartbeat, evict,
//!            replace client, shutdown
//!   Part D — Failure paths: construction, completion, poll, heartbeat,
//!            abandoned poll
//!   Part E — Accounting: every buffer and object freed exactly once
//!
//! Run: ./target/release/bridge-smoke
//! (set COREBRIDGE_LOG=corebridge=trace to watch the boundary)

use std::sync::Arc;
use std::time::Duration;

use corebridge::handle::{ClientKind, NativeHandle};
use corebridge::{BridgeError, Client, ClientConfig, HandleRef, Scope, Worker, WorkerConfig};
use corebridge_sim::{SimEngine, SimTaskKind, CALLBACK_THREAD_PREFIX};

// ── Test harness ──

const LINE: &str = "────────────────────────────────────────────────────────────";

/// Pass/fail tally for one part of the run.
struct Section {
    name: String,
    passed: usize,
    failed: usize,
}

/// Numbered PASS/FAIL lines, tallied per section.
#[derive(Default)]
struct TestRunner {
    sections: Vec<Section>,
    total: usize,
}

impl TestRunner {
    fn new() -> Self {
        Self::default()
    }

    fn section(&mut self, name: &str) {
        println!("\n{}\n  {}\n{}", LINE, name, LINE);
        self.sections.push(Section {
            name: name.to_string(),
            passed: 0,
            failed: 0,
        });
    }

    fn record(&mut self, ok: bool) {
        self.total += 1;
        if let Some(s) = self.sections.last_mut() {
            if ok {
                s.passed += 1;
            } else {
                s.failed += 1;
            }
        }
    }

    fn pass(&mut self, name: &str) {
        self.record(true);
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.record(false);
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok {
            self.pass(name);
        } else {
            self.fail(name, reason);
        }
    }

    fn check_result<T, E: std::fmt::Display>(&mut self, name: &str, r: &Result<T, E>) {
        match r {
            Ok(_) => self.pass(name),
            Err(e) => self.fail(name, &e.to_string()),
        }
    }

    fn failed(&self) -> usize {
        self.sections.iter().map(|s| s.failed).sum()
    }

    /// Print the per-section table and return the process exit code.
    fn summary(&self) -> i32 {
        println!("\n{}", LINE);
        for s in &self.sections {
            let mark = if s.failed == 0 { "ok" } else { "FAILED" };
            println!("  {:<44} {:>3}/{:<3} {}", s.name, s.passed, s.passed + s.failed, mark);
        }
        println!("{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total,
            self.total - self.failed(),
            self.failed()
        );
        println!("{}", LINE);
        if self.failed() > 0 {
            1
        } else {
            0
        }
    }
}

// ════════════════════════════════════════════════════════════
// Part A: Handles
// ════════════════════════════════════════════════════════════

fn test_handles(t: &mut TestRunner, sim: &Arc<SimEngine>) {
    t.section("Part A: Handles and guards");

    let raw = sim.new_raw_client();
    let owner = match unsafe { NativeHandle::<ClientKind>::from_raw(sim.clone(), raw) } {
        Ok(h) => HandleRef::owned(h),
        Err(e) => {
            t.fail("adopt raw client", &e.to_string());
            return;
        }
    };
    t.pass("adopt raw client");

    let borrowed = owner.borrow();
    t.check_result("borrow open handle", &borrowed);
    t.check(
        "ref count is owner + borrow",
        owner.handle().ref_count() == 2,
        &format!("refs={}", owner.handle().ref_count()),
    );

    let freed_before = sim.stats().clients_freed();
    owner.dispose();
    t.check(
        "dispose while borrowed defers free",
        sim.stats().clients_freed() == freed_before && sim.is_client_live(raw),
        "client freed under a live borrow",
    );

    let late = owner.borrow();
    t.check(
        "borrow after dispose is InvalidHandle",
        matches!(late, Err(ref e) if e.is_invalid_handle()),
        "borrow succeeded on a closed handle",
    );

    drop(borrowed);
    t.check(
        "last release frees",
        sim.stats().clients_freed() == freed_before + 1,
        "client not freed after last release",
    );

    // Racing borrowers against dispose.
    let raw = sim.new_raw_client();
    let handle = match unsafe { NativeHandle::<ClientKind>::from_raw(sim.clone(), raw) } {
        Ok(h) => Arc::new(h),
        Err(e) => {
            t.fail("adopt raw client for race", &e.to_string());
            return;
        }
    };
    let freed_before = sim.stats().clients_freed();
    let uaf_before = sim.stats().use_after_free();
    let mut threads = Vec::new();
    for _ in 0..4 {
        let handle = handle.clone();
        threads.push(std::thread::spawn(move || {
            for _ in 0..10_000 {
                if handle.add_ref().is_ok() {
                    handle.release();
                }
            }
        }));
    }
    handle.dispose();
    for th in threads {
        let _ = th.join();
    }
    handle.wait_freed();
    t.check(
        "concurrent borrow/dispose frees once",
        sim.stats().clients_freed() == freed_before + 1
            && sim.stats().use_after_free() == uaf_before,
        &format!("freed={}", sim.stats().clients_freed() - freed_before),
    );
}

// ════════════════════════════════════════════════════════════
// Part B: Scopes
// ════════════════════════════════════════════════════════════

fn test_scopes(t: &mut TestRunner, sim: &Arc<SimEngine>) {
    t.section("Part B: Call scopes");

    let mut scope = Scope::new();
    let value = scope.pin([3u32, 1, 4, 1, 5]);
    let bytes = scope.str("scoped payload");
    t.check(
        "pinned value readable",
        unsafe { *value } == [3, 1, 4, 1, 5],
        "pinned value changed",
    );
    t.check(
        "pinned bytes match",
        unsafe { bytes.to_slice() } == b"scoped payload",
        "pinned bytes changed",
    );

    let owner = match unsafe { NativeHandle::<ClientKind>::from_raw(sim.clone(), sim.new_raw_client()) } {
        Ok(h) => HandleRef::owned(h),
        Err(e) => {
            t.fail("adopt client for lease", &e.to_string());
            return;
        }
    };
    let leased = scope.handle(&owner);
    t.check_result("lease handle into scope", &leased);

    let freed_before = sim.stats().clients_freed();
    owner.dispose();
    t.check(
        "lease keeps handle alive",
        sim.stats().clients_freed() == freed_before,
        "freed under lease",
    );
    scope.end();
    t.check(
        "scope end releases lease",
        sim.stats().clients_freed() == freed_before + 1 && scope.is_empty(),
        "lease not released",
    );
}

// ════════════════════════════════════════════════════════════
// Part C: Worker lifecycle
// ════════════════════════════════════════════════════════════

async fn test_worker(t: &mut TestRunner, sim: &Arc<SimEngine>) {
    t.section("Part C: Worker lifecycle");

    let client = match Client::new(sim.clone(), &ClientConfig::new()) {
        Ok(c) => c,
        Err(e) => {
            t.fail("create client", &e.to_string());
            return;
        }
    };
    t.pass("create client");

    let config = WorkerConfig::new("smoke-queue").max_cached_workflows(10);
    let worker = match Worker::new(&client, "default", &config) {
        Ok(w) => w,
        Err(e) => {
            t.fail("create worker", &e.to_string());
            return;
        }
    };
    let seen = sim.last_worker_options();
    t.check(
        "worker options observed",
        seen.map_or(false, |o| o.task_queue == "smoke-queue" && o.max_cached_workflows == 10),
        "options mismatch",
    );

    t.check_result("validate", &worker.validate().await);

    sim.push_workflow_activation(b"activation".to_vec());
    sim.push_activity_task(b"activity".to_vec());
    sim.push_nexus_task(b"nexus".to_vec());

    let wf = worker.poll_workflow_activation::<Vec<u8>>().await;
    t.check(
        "poll workflow activation",
        matches!(wf, Ok(Some(ref b)) if b == b"activation"),
        &format!("{:?}", wf),
    );
    let act = worker.poll_activity_task::<String>().await;
    t.check(
        "poll activity task",
        matches!(act, Ok(Some(ref s)) if s == "activity"),
        &format!("{:?}", act),
    );
    let nx = worker.poll_nexus_task::<Vec<u8>>().await;
    t.check(
        "poll nexus task",
        matches!(nx, Ok(Some(ref b)) if b == b"nexus"),
        &format!("{:?}", nx),
    );
    let off_thread = std::thread::current()
        .name()
        .map_or(true, |n| !n.starts_with(CALLBACK_THREAD_PREFIX));
    t.check("continuation off callback thread", off_thread, "resumed on engine thread");

    t.check_result("complete workflow activation", &worker.complete_workflow_activation("wf-done").await);
    t.check_result("complete activity task", &worker.complete_activity_task("act-done").await);
    t.check_result("complete nexus task", &worker.complete_nexus_task("nx-done").await);
    t.check(
        "completion payloads observed",
        sim.completions(SimTaskKind::ActivityTask) == vec![b"act-done".to_vec()],
        "payload mismatch",
    );

    let details = vec![0u8, 1, 2, 254, 255];
    t.check_result("record heartbeat", &worker.record_activity_heartbeat(&details));
    t.check(
        "heartbeat bytes identical",
        sim.heartbeats().last() == Some(&details),
        "heartbeat mismatch",
    );

    t.check_result("request eviction", &worker.request_workflow_eviction("run-1"));

    match Client::new(sim.clone(), &ClientConfig::new()) {
        Ok(next) => {
            t.check_result("replace client", &worker.replace_client(&next));
            let freed_before = sim.stats().clients_freed();
            client.dispose();
            t.check(
                "old client freed after replacement",
                sim.stats().clients_freed() == freed_before + 1,
                "old client still borrowed",
            );
        }
        Err(e) => t.fail("create replacement client", &e.to_string()),
    }

    let poller = match worker.borrow() {
        Ok(p) => p,
        Err(e) => {
            t.fail("borrow worker", &e.to_string());
            return;
        }
    };
    let pending = tokio::spawn(async move { poller.poll_activity_task::<Vec<u8>>().await });
    while sim.pending_polls() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    t.check_result("initiate shutdown", &worker.initiate_shutdown());
    let drained = pending.await;
    t.check(
        "pending poll sees shutdown",
        matches!(drained, Ok(Ok(None))),
        "poll did not observe shutdown",
    );
    t.check_result("finalize shutdown", &worker.finalize_shutdown().await);

    worker.dispose();
    t.check(
        "calls after dispose fail",
        matches!(worker.validate().await, Err(BridgeError::InvalidHandle { .. })),
        "call succeeded on disposed worker",
    );
}

// ════════════════════════════════════════════════════════════
// Part D: Failure paths
// ════════════════════════════════════════════════════════════

async fn test_failures(t: &mut TestRunner, sim: &Arc<SimEngine>) {
    t.section("Part D: Failure paths");

    sim.fail_next_client_new("bad target");
    let r = Client::new(sim.clone(), &ClientConfig::new());
    t.check(
        "client construction failure",
        matches!(r, Err(BridgeError::NativeConstruction(ref m)) if m == "bad target"),
        "wrong error",
    );

    let client = match Client::new(sim.clone(), &ClientConfig::new()) {
        Ok(c) => c,
        Err(e) => {
            t.fail("create client", &e.to_string());
            return;
        }
    };

    let r = Worker::new(&client, "default", &WorkerConfig::new(""));
    t.check(
        "empty task queue rejected",
        matches!(r, Err(BridgeError::InvalidConfig(_))),
        "config accepted",
    );

    sim.fail_next_worker_new("Invalid options");
    let r = Worker::new(&client, "default", &WorkerConfig::new("q"));
    t.check(
        "worker construction failure",
        matches!(r, Err(BridgeError::NativeConstruction(ref m)) if m == "Invalid options"),
        "wrong error",
    );

    let worker = match Worker::new(&client, "default", &WorkerConfig::new("q")) {
        Ok(w) => w,
        Err(e) => {
            t.fail("create worker", &e.to_string());
            return;
        }
    };

    sim.fail_next_completion("boom");
    let r = worker.complete_activity_task("x").await;
    t.check(
        "completion failure verbatim",
        matches!(r, Err(ref e) if e.to_string() == "boom"),
        "wrong error",
    );

    sim.fail_next_poll("poll failed");
    let r = worker.poll_workflow_activation::<Vec<u8>>().await;
    t.check(
        "poll failure",
        matches!(r, Err(BridgeError::NativeCall(ref m)) if m == "poll failed"),
        "wrong error",
    );

    sim.fail_next_heartbeat("no such activity");
    let r = worker.record_activity_heartbeat("hb");
    t.check(
        "heartbeat failure",
        matches!(r, Err(BridgeError::NativeCall(ref m)) if m == "no such activity"),
        "wrong error",
    );

    let r = worker.finalize_shutdown().await;
    t.check("finalize before initiate fails", r.is_err(), "finalize accepted");

    let abandoned = match Worker::new(&client, "default", &WorkerConfig::new("abandoned")) {
        Ok(w) => w,
        Err(e) => {
            t.fail("create worker for abandoned poll", &e.to_string());
            return;
        }
    };
    let raw = abandoned.handle_ref().handle().clone();
    let r = tokio::time::timeout(Duration::from_millis(20), abandoned.poll_nexus_task::<Vec<u8>>()).await;
    t.check("abandoned poll times out", r.is_err(), "poll resolved");
    abandoned.dispose();
    t.check("worker kept while abandoned poll in flight", !raw.is_freed(), "freed early");

    sim.push_nexus_task(b"orphan".to_vec());
    let mut freed = false;
    for _ in 0..500 {
        if raw.is_freed() {
            freed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    t.check("worker freed once the poll is answered", freed, "still live after 1s");
}

// ════════════════════════════════════════════════════════════
// Part E: Accounting
// ════════════════════════════════════════════════════════════

fn test_accounting(t: &mut TestRunner, sim: &Arc<SimEngine>) {
    t.section("Part E: Accounting");
    let s = sim.stats();
    t.check(
        "all byte arrays freed",
        s.byte_arrays_freed() == s.byte_arrays_allocated(),
        &format!("allocated={} freed={}", s.byte_arrays_allocated(), s.byte_arrays_freed()),
    );
    t.check(
        "all clients freed",
        s.clients_freed() == s.clients_created(),
        &format!("created={} freed={}", s.clients_created(), s.clients_freed()),
    );
    t.check(
        "all workers freed",
        s.workers_freed() == s.workers_created(),
        &format!("created={} freed={}", s.workers_created(), s.workers_freed()),
    );
    t.check("no double frees", s.double_frees() == 0, &s.double_frees().to_string());
    t.check("no use after free", s.use_after_free() == 0, &s.use_after_free().to_string());
    t.check(
        "no worker freed with calls outstanding",
        s.freed_with_pending_calls() == 0,
        &s.freed_with_pending_calls().to_string(),
    );
}

fn main() {
    corebridge::logging::init();
    println!("=== corebridge End-to-End Smoke Test ===");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            println!("\nFATAL: runtime build failed: {}", e);
            std::process::exit(1);
        }
    };

    let sim = match SimEngine::with_threads(2) {
        Ok(sim) => sim,
        Err(e) => {
            println!("\nFATAL: sim engine failed to start: {}", e);
            std::process::exit(1);
        }
    };

    let mut t = TestRunner::new();
    test_handles(&mut t, &sim);
    test_scopes(&mut t, &sim);
    rt.block_on(async {
        test_worker(&mut t, &sim).await;
        test_failures(&mut t, &sim).await;
    });
    tracing::debug!(callbacks = sim.callbacks_fired(), "smoke run complete");
    test_accounting(&mut t, &sim);

    std::process::exit(t.summary());
}
