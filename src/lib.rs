//! SAWLOG register acquisition for Siemens S7 data blocks.
//!
//! The crate has three layers:
//!
//! - [`core`]: the binary data model. Byte-exact codecs for the DTL
//!   timestamp, the SAWLOG record (two on-device layout revisions) and the
//!   255-entry register page, plus the configuration/state DTOs.
//! - [`adapters::driver`]: the transport capability boundary. The raw S7
//!   read/write primitives are consumed behind [`adapters::driver::PlcDriver`];
//!   this crate ships only a mock implementation for offline use and tests.
//! - [`usecase`]: the one-shot [`usecase::session::Session`] and the cyclic
//!   [`usecase::engine::SawlogPoller`] that keeps the last good snapshot
//!   available through transient transport failures.

pub mod adapters;
pub mod core;
pub mod usecase;

pub use crate::adapters::driver::{ConnectionKey, DriverError, PlcConnection, PlcDriver};
pub use crate::core::codec::CodecError;
pub use crate::core::layout::{LayoutVersion, RecordLayout};
pub use crate::core::model::{
    ConnectionState, Dtl, PlcConfig, RegisterPage, RetryPolicy, SawLog, Snapshot, SnapshotPayload,
};
pub use crate::usecase::engine::{Latest, Request, SawlogPoller};
pub use crate::usecase::session::{Session, SessionError};
