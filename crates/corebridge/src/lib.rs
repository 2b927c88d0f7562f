//! # corebridge — safe handles over a native workflow engine
//!
//! The engine owns long-lived objects (clients, workers) behind raw
//! pointers and answers long-running calls through C callbacks fired from
//! its own threads. This crate makes driving it safe:
//!
//! - `handle` / `handle_ref` - refcounted guards; a handle is freed exactly
//!   once, never while a call is using it
//! - `scope` / `pinned` - per-call arenas keeping pinned structs, payload
//!   bytes and handle leases alive until the engine is done with them
//! - `byte_buffer` - engine-allocated buffers, freed through the engine
//! - `completion` - one-shot callbacks turned into futures
//! - `client` / `worker` - the client and the worker session
//! - `config` / `logging` - configuration and log output setup
//!
//! ## Call path
//!
//! ```text
//!   Worker::poll_activity_task
//!     │  Scope::handle(&guard)      lease worker pointer
//!     │  begin_call(engine, scope)  register CallId with the scope,
//!     │                             issue native call
//!     │        ... engine thread: on_poll(CallId, success, fail)
//!     │  Completion.await           resumed on the caller's runtime,
//!     │                             scope ends (maybe deferred free)
//!     ▼  T::decode(buffer)          buffer freed after decode
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use corebridge::{Client, ClientConfig, Worker, WorkerConfig};
//!
//! let client = Client::new(engine, &ClientConfig::from_env())?;
//! let worker = Worker::new(&client, "default", &WorkerConfig::from_env())?;
//! worker.validate().await?;
//! while let Some(task) = worker.poll_activity_task::<Vec<u8>>().await? {
//!     worker.complete_activity_task(&run(task)).await?;
//! }
//! worker.finalize_shutdown().await?;
//! ```

pub mod byte_buffer;
pub mod client;
pub mod completion;
pub mod config;
pub mod handle;
pub mod handle_ref;
pub mod logging;
pub mod pinned;
pub mod scope;
pub mod worker;

pub use byte_buffer::ByteBuffer;
pub use client::Client;
pub use completion::{begin_call, CallId, Completion, Resolution};
pub use config::{ClientConfig, WorkerConfig};
pub use handle::{ClientKind, HandleKind, NativeHandle, WorkerKind};
pub use handle_ref::HandleRef;
pub use pinned::{Pinned, PinnedBytes};
pub use scope::Scope;
pub use worker::Worker;

pub use corebridge_core::{BridgeError, BridgeResult, Decode, Encode, NativeEngine};

#[cfg(feature = "link-native")]
pub use corebridge_core::LinkedEngine;
