//! Register identifiers and cache/routing key derivation
//!
//! Every addressable unit of watch state (alarms, timer, settings block, a
//! world-city slot, ...) is a register identified by a one-byte tag. A few
//! tags are ambiguous on their own because the second byte selects a
//! sub-register (a clock slot or reminder index); keys for those extend to
//! two bytes. The same derivation is applied to outbound requests and to the
//! first bytes of inbound responses, which is what lets the dispatcher route
//! an arbitrary-order notification stream back to the right waiter.

use crate::types::{GShockError, Result};
use std::fmt;

/// Register tags understood by the protocol engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegisterTag {
    CurrentTime = 0x09,
    BleFeatures = 0x10,
    SettingForBle = 0x11,
    BasicSettings = 0x13,
    AlarmPrimary = 0x15,
    AlarmSecondary = 0x16,
    Timer = 0x18,
    DstWatchState = 0x1d,
    DstSetting = 0x1e,
    WorldCities = 0x1f,
    AppInformation = 0x22,
    WatchName = 0x23,
    WatchCondition = 0x28,
    ReminderTitle = 0x30,
    ReminderTime = 0x31,
}

impl RegisterTag {
    /// Convert a byte to a RegisterTag
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x09 => Ok(RegisterTag::CurrentTime),
            0x10 => Ok(RegisterTag::BleFeatures),
            0x11 => Ok(RegisterTag::SettingForBle),
            0x13 => Ok(RegisterTag::BasicSettings),
            0x15 => Ok(RegisterTag::AlarmPrimary),
            0x16 => Ok(RegisterTag::AlarmSecondary),
            0x18 => Ok(RegisterTag::Timer),
            0x1d => Ok(RegisterTag::DstWatchState),
            0x1e => Ok(RegisterTag::DstSetting),
            0x1f => Ok(RegisterTag::WorldCities),
            0x22 => Ok(RegisterTag::AppInformation),
            0x23 => Ok(RegisterTag::WatchName),
            0x28 => Ok(RegisterTag::WatchCondition),
            0x30 => Ok(RegisterTag::ReminderTitle),
            0x31 => Ok(RegisterTag::ReminderTime),
            _ => Err(GShockError::UnknownRegister(value)),
        }
    }

    /// Get the wire-level tag byte
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for RegisterTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}", self.code())
    }
}

/// Leading bytes whose registers are disambiguated by the second byte.
///
/// DST watch state, DST-for-city, world city, and the two reminder
/// sub-registers all multiplex several slots behind one tag.
const TWO_BYTE_KEY_TAGS: [u8; 5] = [0x1d, 0x1e, 0x1f, 0x30, 0x31];

/// Canonical correlation key for a register
///
/// A short uppercase hex string (2 or 4 characters) used for both cache
/// lookups and response routing. Keys derived from the same logical register
/// are stable across calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterKey(String);

impl RegisterKey {
    /// Build a key from an explicit hex string, e.g. `"18"` or `"1F00"`
    pub fn new(key: &str) -> Result<Self> {
        if key.len() != 2 && key.len() != 4 {
            return Err(GShockError::InvalidKey(key.to_string()));
        }
        if !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(GShockError::InvalidKey(key.to_string()));
        }
        Ok(Self(key.to_ascii_uppercase()))
    }

    /// Key for a single-byte register
    pub fn for_tag(tag: RegisterTag) -> Self {
        Self(format!("{:02X}", tag.code()))
    }

    /// Key for a slot-multiplexed register, e.g. world city 0 -> `"1F00"`
    pub fn for_slot(tag: RegisterTag, slot: u8) -> Self {
        Self(format!("{:02X}{:02X}", tag.code(), slot))
    }

    /// Derive the key from the first bytes of a raw response
    pub fn from_response(raw: &[u8]) -> Result<Self> {
        let first = *raw.first().ok_or(GShockError::ResponseTooShort {
            expected: 1,
            got: 0,
        })?;
        if TWO_BYTE_KEY_TAGS.contains(&first) {
            let second = *raw.get(1).ok_or(GShockError::ResponseTooShort {
                expected: 2,
                got: 1,
            })?;
            Ok(Self(format!("{:02X}{:02X}", first, second)))
        } else {
            Ok(Self(format!("{:02X}", first)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The request payload for this key: each hex pair becomes one byte
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0
            .as_bytes()
            .chunks_exact(2)
            .map(|pair| {
                // constructed from validated hex, cannot fail
                u8::from_str_radix(std::str::from_utf8(pair).unwrap_or("0"), 16).unwrap_or(0)
            })
            .collect()
    }
}

impl fmt::Display for RegisterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Uppercase hex rendering of a byte slice, no separators
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
