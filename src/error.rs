//! Error types for the Kvaser USB library
//!
//! This module defines the error types used throughout the library
//! for handling USB communication, protocol and channel-state errors.

use thiserror::Error;

use crate::constants::{firmware_error_name, FIRMWARE_ERR_PARAMETER};

/// Result type alias for Kvaser USB operations
pub type Result<T> = std::result::Result<T, KvaserError>;

/// Error types for Kvaser USB operations
#[derive(Error, Debug)]
pub enum KvaserError {
    /// A required argument was missing or empty
    #[error("Missing argument: {0}")]
    NullArgument(&'static str),

    /// Operation before configure/initialize
    #[error("Channel is not initialized")]
    NotInitialized,

    /// Operation mode or frame flag combination not allowed
    #[error("Illegal parameter: {0}")]
    IllegalParameter(&'static str),

    /// Transmit tracker at capacity
    #[error("Transmitter busy ({outstanding} messages awaiting acknowledgment)")]
    Busy { outstanding: u16 },

    /// Queue or pipe read returned without data
    #[error("Receive queue empty")]
    Empty,

    /// Receive queue overflow
    #[error("Receive queue full")]
    Full,

    /// Unexpected wire-format mismatch
    #[error("Fatal protocol error: {0}")]
    Fatal(&'static str),

    /// USB error from the rusb library
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// Failed to claim interface
    #[error("Failed to claim USB interface: {0}")]
    ClaimInterface(rusb::Error),

    /// No response from the device within the timeout
    #[error("Timeout waiting for response 0x{opcode:02X}")]
    Timeout { opcode: u8 },

    /// Bounds-checked writer or reader ran past the buffer
    #[error("Buffer overrun: {needed} bytes needed, {available} available")]
    BufferOverrun { needed: usize, available: usize },

    /// Response could not be decoded
    #[error("Invalid response 0x{opcode:02X}: expected {expected} bytes, got {actual}")]
    InvalidResponse {
        opcode: u8,
        expected: usize,
        actual: usize,
    },

    /// Error event reported by the device firmware
    #[error("Firmware error: {}", firmware_error_name(*.0))]
    Firmware(u8),

    /// Pipe or queue cancelled during teardown
    #[error("Operation aborted")]
    Aborted,

    /// No Kvaser device found
    #[error("No Kvaser device found")]
    DeviceNotFound,

    /// Product or feature not supported by this driver
    #[error("Not supported: {0}")]
    NotSupported(&'static str),
}

impl KvaserError {
    /// Map a firmware error code from an error event
    pub fn from_firmware(code: u8) -> Self {
        if code == FIRMWARE_ERR_PARAMETER {
            KvaserError::IllegalParameter("rejected by firmware")
        } else {
            KvaserError::Firmware(code)
        }
    }

    /// Check if this error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            KvaserError::Timeout { .. } | KvaserError::Empty | KvaserError::Usb(rusb::Error::Timeout)
        )
    }

    /// Check if this error is a USB error
    pub fn is_usb_error(&self) -> bool {
        matches!(self, KvaserError::Usb(_) | KvaserError::ClaimInterface(_))
    }

    /// Check if the caller may simply retry the operation later
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            KvaserError::Busy { .. } | KvaserError::Empty | KvaserError::Full | KvaserError::Timeout { .. }
        )
    }
}
