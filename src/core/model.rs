//! Stable data model and DTOs.
//!
//! Field names follow the device documentation (SAWLOG / DTL); serialized
//! forms use camelCase and `*_ms` integer durations so configuration files
//! stay toolchain-neutral.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::layout::{LayoutVersion, RecordLayout, REGISTER_CAPACITY};

fn default_tcp_port() -> u16 {
    102
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_timeout_ms() -> u64 {
    1000
}

/// Siemens DTL date-and-time structure (12 bytes on the wire).
///
/// Values are carried uninterpreted; a month of 13 coming off the device is
/// preserved as-is and survives re-encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dtl {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub nanosecond: u32,
}

/// One sawing-event record.
///
/// `flags` and `buttons` lengths must match the active [`RecordLayout`]
/// (`flag_count` / `button_count`); the codec rejects mismatched shapes.
/// `position` is only carried by layouts with `has_position` and decodes as 0
/// elsewhere.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SawLog {
    pub id: u32,
    pub zone: u8,
    pub sensor_id: u8,
    pub length: u16,
    #[serde(default)]
    pub position: u32,
    pub drop_box: u16,
    pub flags: Vec<bool>,
    pub buttons: Vec<u8>,
    pub timestamp: Dtl,
}

impl SawLog {
    /// All-zero record shaped for `layout`.
    pub fn zeroed(layout: &RecordLayout) -> Self {
        Self {
            id: 0,
            zone: 0,
            sensor_id: 0,
            length: 0,
            position: 0,
            drop_box: 0,
            flags: vec![false; layout.flag_count],
            buttons: vec![0; layout.button_count],
            timestamp: Dtl::default(),
        }
    }
}

/// The full register data block: exactly [`RegisterPage::CAPACITY`] records.
///
/// Pages are immutable once published; the poller replaces them wholesale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RegisterPage {
    records: Vec<SawLog>,
}

impl RegisterPage {
    pub const CAPACITY: usize = REGISTER_CAPACITY;

    pub(crate) fn from_records(records: Vec<SawLog>) -> Self {
        debug_assert_eq!(records.len(), Self::CAPACITY);
        Self { records }
    }

    pub fn records(&self) -> &[SawLog] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&SawLog> {
        self.records.get(index)
    }
}

/// Connection parameters plus the polled range, as consumed by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlcConfig {
    pub ip: String,
    pub rack: u16,
    pub slot: u16,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    pub block_id: u16,
    /// Absolute byte offset within the data block.
    pub start_offset: u32,
    /// Byte length of the polled range.
    pub length: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per transport call (connect / read / write).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub layout_version: LayoutVersion,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 5000,
        }
    }
}

/// Poller connection state; owned by the poll loop, read-only elsewhere.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Retrying { attempt: u32, next_delay_ms: u64 },
}

/// What a successful poll produced.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum SnapshotPayload {
    /// Full-register read, decoded.
    Page(RegisterPage),
    /// Ad-hoc range; no structure is guessed for partial reads.
    Raw(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Monotonic per poller; a subscriber never observes a rollback.
    pub seq: u64,
    pub payload: SnapshotPayload,
    pub read_at: DateTime<Utc>,
}
