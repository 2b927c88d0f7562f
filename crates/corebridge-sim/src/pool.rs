//! `CallbackPool` — the simulated engine's callback threads.
//!
//! Spawns N OS threads at creation. Jobs (callback invocations) go through a
//! lock-free MPMC queue; `submit` unparks one thread round-robin so a job
//! does not wait for the idle park timeout.
//!
//! No dynamic scaling. Threads exit once the pool is dropped and the queue
//! drains.

use crossbeam_queue::ArrayQueue;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::Duration;

/// Thread name prefix; threads are named `sim-engine-{i}`.
pub const CALLBACK_THREAD_PREFIX: &str = "sim-engine";

pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolInner {
    queue: ArrayQueue<Job>,
    shutdown: AtomicBool,
}

pub struct CallbackPool {
    inner: Arc<PoolInner>,
    threads: Vec<Thread>,
    next: AtomicUsize,
}

impl CallbackPool {
    /// `n` threads (clamped to 1..=16), at most `depth` queued jobs.
    pub fn new(n: usize, depth: usize) -> io::Result<Self> {
        let n = n.clamp(1, 16);
        let inner = Arc::new(PoolInner {
            queue: ArrayQueue::new(depth.max(1)),
            shutdown: AtomicBool::new(false),
        });

        let mut threads = Vec::with_capacity(n);
        for id in 0..n {
            let inner = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", CALLBACK_THREAD_PREFIX, id))
                .spawn(move || callback_loop(inner))?;
            threads.push(handle.thread().clone());
        }

        Ok(Self {
            inner,
            threads,
            next: AtomicUsize::new(0),
        })
    }

    /// Queue a job. Hands it back if the queue is full.
    pub fn submit(&self, job: Job) -> Result<(), Job> {
        self.inner.queue.push(job)?;
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.threads.len();
        self.threads[i].unpark();
        Ok(())
    }

    pub fn threads(&self) -> usize {
        self.threads.len()
    }
}

impl Drop for CallbackPool {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        for t in &self.threads {
            t.unpark();
        }
        // Not joined: a job may be the one dropping the last engine reference.
    }
}

fn callback_loop(inner: Arc<PoolInner>) {
    loop {
        match inner.queue.pop() {
            Some(job) => job(),
            None => {
                if inner.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                thread::park_timeout(Duration::from_millis(1));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_jobs_run_on_named_threads() {
        let pool = CallbackPool::new(2, 16).unwrap();
        let (tx, rx) = mpsc::channel();
        for _ in 0..4 {
            let tx = tx.clone();
            pool.submit(Box::new(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send(name).unwrap();
            }))
            .unwrap_or_else(|_| panic!("queue full"));
        }
        for _ in 0..4 {
            let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
            assert!(name.starts_with(CALLBACK_THREAD_PREFIX));
        }
        assert_eq!(pool.threads(), 2);
    }

    #[test]
    fn test_full_queue_returns_job() {
        let pool = CallbackPool::new(1, 1).unwrap();
        let (block_tx, block_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel();
        pool.submit(Box::new(move || {
            started_tx.send(()).unwrap();
            let _ = block_rx.recv();
        }))
        .unwrap_or_else(|_| panic!("queue full"));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert!(pool.submit(Box::new(|| {})).is_ok());
        assert!(pool.submit(Box::new(|| {})).is_err());
        drop(block_tx);
    }
}
