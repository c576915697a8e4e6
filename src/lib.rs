//! Protocol engine for Casio G-Shock bluetooth watches
//!
//! This crate implements the register protocol spoken by G-Shock watches
//! (GW-B5600, GA/GMA-B2100, DW-H5600, ECB-30 and relatives) over BLE:
//! request/response correlation for a watch that never tags its replies,
//! binary codecs for every register, a per-connection cache, and the
//! multi-register time synchronization flow.
//!
//! The crate is transport-agnostic. The embedding application implements
//! [`transport::Transport`] over its BLE stack, feeds inbound notification
//! payloads to [`session::ConnectionSession::on_notification`], and calls
//! the typed operations on the session. One session maps to one
//! connection; drop or reset it on disconnect.

pub mod codec;
pub mod notifications;
pub mod progress;
pub mod registers;
pub mod session;
mod timesync;
pub mod timezone;
pub mod transport;
pub mod types;
pub mod watch_info;

pub use codec::{
    Alarm, Event, EventDate, EventTime, RepeatPeriod, Settings, TimeAdjustment, WatchCondition,
    Weekdays,
};
pub use notifications::{AppNotification, NotificationType};
pub use progress::{ProgressEvent, ProgressEvents};
pub use registers::{RegisterKey, RegisterTag};
pub use session::{ConnectionSession, ResponseValue, SessionConfig};
pub use timezone::{find_time_zone, CasioTimeZone};
pub use transport::{Transport, WriteMode};
pub use types::{DstSlot, GShockError, Result, WatchButton};
pub use watch_info::{WatchInfo, WatchModel};
