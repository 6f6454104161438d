//! Payload codec for the LBS characteristics
//!
//! Wire formats handled here:
//! ```text
//! notification / indication : [ N bytes: unsigned integer, little-endian ]
//! CCCD enable write         : [ 2 bytes: u16 little-endian ] 0x0001 notify, 0x0002 indicate
//! LED value write           : [ 1 byte ] 0x01 on, 0x00 off
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Widest payload that still fits the decoded integer
pub const MAX_PAYLOAD_LEN: usize = 16;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Payload too long: {0} bytes (max: {MAX_PAYLOAD_LEN})")]
    PayloadTooLong(usize),

    #[error("Invalid CCCD value length: {0} (expected 2)")]
    InvalidCccdLength(usize),

    #[error("Unknown CCCD value: {0:#06x}")]
    UnknownCccdValue(u16),
}

/// Value written to a Client Characteristic Configuration Descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CccdValue {
    /// Updates disabled
    Disabled = 0x0000,
    /// Unacknowledged notifications
    Notify = 0x0001,
    /// Acknowledged indications
    Indicate = 0x0002,
}

impl CccdValue {
    /// Encode as the 2-byte little-endian descriptor value
    pub fn encode(self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2);
        buf.put_u16_le(self as u16);
        buf.freeze()
    }

    /// Decode a descriptor value previously written to a CCCD
    pub fn decode(mut value: &[u8]) -> Result<Self, CodecError> {
        if value.len() != 2 {
            return Err(CodecError::InvalidCccdLength(value.len()));
        }
        match value.get_u16_le() {
            0x0000 => Ok(Self::Disabled),
            0x0001 => Ok(Self::Notify),
            0x0002 => Ok(Self::Indicate),
            other => Err(CodecError::UnknownCccdValue(other)),
        }
    }
}

/// Decode a notification payload as an unsigned little-endian integer.
///
/// The integer is as wide as the payload; an empty payload is zero.
pub fn decode_le(payload: &[u8]) -> Result<u128, CodecError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLong(payload.len()));
    }
    Ok(payload
        .iter()
        .rev()
        .fold(0u128, |acc, &byte| (acc << 8) | u128::from(byte)))
}

/// Interpret a button indication: any nonzero value means pressed, at any width
pub fn decode_button(payload: &[u8]) -> bool {
    payload.iter().any(|&byte| byte != 0)
}

/// Single-byte LED value
pub fn led_value(on: bool) -> [u8; 1] {
    if on {
        [0x01]
    } else {
        [0x00]
    }
}
