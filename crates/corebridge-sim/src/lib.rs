//! # corebridge-sim — simulated native engine
//!
//! `SimEngine` implements every `NativeEngine` entry point in-process, with
//! the same ownership rules as the real engine: buffers it returns must be
//! freed through it, callbacks fire from its own threads, and objects stay
//! valid only until their destructor runs.
//!
//! ## What it checks
//!
//! | Concern            | How                                              |
//! |--------------------|--------------------------------------------------|
//! | Buffer leaks       | `byte_arrays_allocated` vs `byte_arrays_freed`   |
//! | Double free        | live-set lookup on every free (`double_frees`)   |
//! | Use after free     | live-set lookup on every worker call             |
//! | Early worker free  | parked or undelivered calls at `worker_free`     |
//! | Callback threading | callbacks run on `sim-engine-{i}` threads        |
//!
//! ## Scripting
//!
//! Tasks are queued per kind (`push_*`); a poll with nothing queued parks
//! until a task arrives or the worker shuts down. Faults are one-shot
//! (`fail_next_*`), except `set_double_fire`, which stays on.
//! `hold_callbacks` queues callbacks until `release_callbacks`.

pub mod engine;
pub mod pool;
pub mod stats;

pub use engine::{ClientOptionsSnapshot, SimEngine, SimTaskKind, WorkerOptionsSnapshot};
pub use pool::{CallbackPool, CALLBACK_THREAD_PREFIX};
pub use stats::SimStats;
