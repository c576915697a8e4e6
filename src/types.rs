//! Common types, enums, and error definitions for the G-Shock protocol engine

use std::fmt;
use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, GShockError>;

/// Error types for watch communication
#[derive(Error, Debug)]
pub enum GShockError {
    #[error("Response too short: expected at least {expected} bytes, got {got}")]
    ResponseTooShort { expected: usize, got: usize },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Unknown register tag: {0:#04x}")]
    UnknownRegister(u8),

    #[error("Invalid register key: {0}")]
    InvalidKey(String),

    #[error("No response for key {0} within the request timeout")]
    NoResponse(String),

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown time zone: {0}")]
    UnknownTimeZone(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Unexpected value: {0}")]
    UnexpectedValue(String),
}

/// Watch buttons reported by the BLE-features register (`0x10`)
///
/// The watch reports which button initiated the connection; the value also
/// distinguishes automatic time-sync connections and find-phone requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchButton {
    LowerLeft,
    LowerRight,
    NoButton,
    FindPhone,
    AlwaysConnected,
    Invalid,
}

impl fmt::Display for WatchButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchButton::LowerLeft => write!(f, "LOWER_LEFT"),
            WatchButton::LowerRight => write!(f, "LOWER_RIGHT"),
            WatchButton::NoButton => write!(f, "NO_BUTTON"),
            WatchButton::FindPhone => write!(f, "FIND_PHONE"),
            WatchButton::AlwaysConnected => write!(f, "ALWAYS_CONNECTED"),
            WatchButton::Invalid => write!(f, "INVALID"),
        }
    }
}

/// DST watch-state record selector (register `0x1d`)
///
/// Each record covers a pair of clocks: `Zero` holds the main clock and world
/// clock 1, `Two` holds world clocks 2-3, `Four` holds world clocks 4-5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DstSlot {
    Zero = 0,
    Two = 2,
    Four = 4,
}

impl DstSlot {
    pub fn code(self) -> u8 {
        self as u8
    }
}
