//! Shared identifiers and time utilities used across all veil crates.

pub mod ids;
pub mod time;

pub use {
    ids::{ChatId, DeviceFingerprint, MessageId, UserHash},
    time::now_ms,
};
