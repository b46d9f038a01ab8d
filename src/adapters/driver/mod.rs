//! Transport capability boundary.
//!
//! The raw S7 session layer (ISO-on-TCP to a numbered rack/slot, absolute
//! data-block reads/writes) is not implemented here; production integrations
//! provide a [`PlcDriver`] and the engine stays transport-agnostic. The crate
//! ships [`mock::MockDriver`] for offline use and tests.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::core::model::PlcConfig;

pub mod mock;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("timeout")]
    Timeout,

    #[error("comm error: {message}")]
    Comm { message: String },
}

pub type ConnectFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ConnectedClient, DriverError>> + Send + 'a>>;

pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, DriverError>> + Send + 'a>>;

pub type WriteFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + 'a>>;

pub type DisconnectFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DriverError>> + Send + 'a>>;

/// Stable identity of one PLC endpoint, used for log correlation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionKey {
    S7 {
        ip: String,
        port: u16,
        rack: u16,
        slot: u16,
    },
    Mock {
        name: String,
    },
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionKey::S7 {
                ip,
                port,
                rack,
                slot,
            } => write!(f, "s7://{ip}:{port}?rack={rack}&slot={slot}"),
            ConnectionKey::Mock { name } => write!(f, "mock://{name}"),
        }
    }
}

/// A live connection that can be reused across multiple reads and writes.
///
/// Only one call may be in flight per connection; the engine serializes.
pub trait PlcConnection: Send {
    /// Absolute-offset read of `len` bytes from data block `block_id`.
    fn read_db<'a>(&'a mut self, block_id: u16, start: u32, len: usize) -> ReadFuture<'a>;

    /// Absolute-offset write into data block `block_id`.
    fn write_db<'a>(&'a mut self, block_id: u16, start: u32, payload: &'a [u8]) -> WriteFuture<'a>;

    fn disconnect<'a>(&'a mut self) -> DisconnectFuture<'a>;
}

pub type ConnectedClient = Box<dyn PlcConnection>;

pub trait PlcDriver: Send + Sync {
    fn connection_key(&self, config: &PlcConfig) -> Result<ConnectionKey, DriverError>;

    fn connect<'a>(&'a self, config: &'a PlcConfig) -> ConnectFuture<'a>;
}
