//! # corebridge-core — the native boundary contract
//!
//! This crate defines everything that crosses the foreign boundary between
//! a Rust host and an external native workflow engine:
//!
//! - `sys` - `#[repr(C)]` structs and callback signatures (the ABI)
//! - `engine` - the `NativeEngine` trait, one method per native entry point
//! - `error` - the bridge error taxonomy
//! - `codec` - opaque payload encode/decode traits
//! - `native` - raw `extern "C"` bindings (feature `link-native`)
//!
//! ## Design principle
//!
//! Every safe wrapper in `corebridge` talks to the engine only through
//! `NativeEngine`. The production binding (`LinkedEngine`) and the
//! in-process simulation (`corebridge-sim`) are two impls of the same trait,
//! so the safety layer is exercised identically by both.

pub mod sys;
pub mod engine;
pub mod error;
pub mod codec;

cfg_if::cfg_if! {
    if #[cfg(feature = "link-native")] {
        pub mod native;
        pub use native::LinkedEngine;
    }
}

pub use codec::{Decode, Encode};
pub use engine::NativeEngine;
pub use error::{BridgeError, BridgeResult};
pub use sys::{ByteArray, ByteArrayRef, RawClient, RawWorker};
