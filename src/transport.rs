//! Transport abstraction over the BLE link
//!
//! The protocol engine never talks to a radio directly. A [`Transport`]
//! implementation owns the GATT plumbing and maps each [`WriteMode`] onto
//! the matching characteristic; tests substitute an in-memory fake.

use crate::types::Result;
use async_trait::async_trait;

/// Which characteristic a payload is destined for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Request a register read; the watch answers with a notification
    Get,
    /// Write a register value
    Set,
    /// Forward an obfuscated phone notification
    Notify,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one payload to the characteristic selected by `mode`
    async fn write(&self, mode: WriteMode, payload: &[u8]) -> Result<()>;

    fn is_connected(&self) -> bool;
}
