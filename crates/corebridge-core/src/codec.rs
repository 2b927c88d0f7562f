//! Payload codec seam.
//!
//! The bridge treats task and completion payloads as opaque bytes. Callers
//! plug their message types in by implementing `Decode` (engine -> host) and
//! `Encode` (host -> engine); protobuf messages are the usual choice.

use crate::error::{BridgeError, BridgeResult};

/// Decode a message from engine-provided bytes.
///
/// `bytes` is only valid for the duration of the call; implementations must
/// copy whatever they keep.
pub trait Decode: Sized {
    /// Short name used in decode error messages.
    const WHAT: &'static str;

    fn decode(bytes: &[u8]) -> BridgeResult<Self>;
}

/// Encode a message into bytes handed to the engine.
pub trait Encode {
    fn encode(&self) -> Vec<u8>;
}

impl Decode for Vec<u8> {
    const WHAT: &'static str = "bytes";

    fn decode(bytes: &[u8]) -> BridgeResult<Self> {
        Ok(bytes.to_vec())
    }
}

impl Decode for String {
    const WHAT: &'static str = "utf-8 string";

    fn decode(bytes: &[u8]) -> BridgeResult<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|e| BridgeError::Decode {
            what: Self::WHAT,
            reason: e.to_string(),
        })
    }
}

impl Encode for [u8] {
    fn encode(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl Encode for Vec<u8> {
    fn encode(&self) -> Vec<u8> {
        self.clone()
    }
}

impl Encode for str {
    fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl Encode for String {
    fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_decode_rejects_invalid_utf8() {
        let err = String::decode(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, BridgeError::Decode { what: "utf-8 string", .. }));
    }

    #[test]
    fn test_bytes_decode_copies() {
        let src = [1u8, 2, 3];
        let out = Vec::<u8>::decode(&src).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }
}
