//! Bridge error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// A native constructor reported failure. Message is the engine's text.
    #[error("{0}")]
    NativeConstruction(String),
    /// Any other native-reported failure. Message is the engine's text.
    #[error("{0}")]
    NativeCall(String),
    /// Attempt to use a disposed or null handle.
    #[error("{kind} handle is no longer valid")]
    InvalidHandle { kind: &'static str },
    /// A payload returned by the engine could not be decoded.
    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },
    /// Host-side configuration rejected before reaching the engine.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// The pending call was torn down before the engine signalled it.
    #[error("native callback dropped before resolution")]
    CallbackDropped,
}

impl BridgeError {
    /// The native engine's message, if this error came from the engine.
    pub fn native_message(&self) -> Option<&str> {
        match self {
            Self::NativeConstruction(msg) | Self::NativeCall(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, Self::InvalidHandle { .. })
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
