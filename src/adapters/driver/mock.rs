//! Mock driver for offline/testing scenarios.
//!
//! Backs the data block with an in-memory buffer, applies writes to it, and
//! lets tests inject connect/read failures, gate reads open/closed, and
//! inspect the transport call sequence.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::core::model::PlcConfig;

use super::{
    ConnectFuture, ConnectedClient, ConnectionKey, DisconnectFuture, DriverError, PlcConnection,
    PlcDriver, ReadFuture, WriteFuture,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockEvent {
    Connect,
    ReadStart { start: u32, len: usize },
    ReadEnd,
    WriteStart { start: u32, len: usize },
    WriteEnd,
    Disconnect,
}

#[derive(Default)]
struct MockShared {
    payload: Mutex<Vec<u8>>,
    connect_failures: AtomicUsize,
    read_failures: AtomicUsize,
    write_failures: AtomicUsize,
    hold_reads: AtomicBool,
    read_gate: Notify,
    events: Mutex<Vec<MockEvent>>,
    connects: AtomicUsize,
    written: Mutex<Vec<(u32, Vec<u8>)>>,
}

#[derive(Clone, Default)]
pub struct MockDriver {
    shared: Arc<MockShared>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver whose data block contains `payload`.
    pub fn with_payload(payload: Vec<u8>) -> Self {
        let driver = Self::new();
        driver.set_payload(payload);
        driver
    }

    pub fn set_payload(&self, payload: Vec<u8>) {
        *self.shared.payload.lock() = payload;
    }

    pub fn payload(&self) -> Vec<u8> {
        self.shared.payload.lock().clone()
    }

    /// Fail the next `n` connect attempts with a comm error.
    pub fn fail_connects(&self, n: usize) {
        self.shared.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` reads with a comm error.
    pub fn fail_reads(&self, n: usize) {
        self.shared.read_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` writes with a comm error.
    pub fn fail_writes(&self, n: usize) {
        self.shared.write_failures.store(n, Ordering::SeqCst);
    }

    /// Block subsequent reads until [`MockDriver::release_reads`].
    pub fn hold_reads(&self) {
        self.shared.hold_reads.store(true, Ordering::SeqCst);
    }

    pub fn release_reads(&self) {
        self.shared.hold_reads.store(false, Ordering::SeqCst);
        self.shared.read_gate.notify_waiters();
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.shared.events.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Writes observed so far, as `(absolute offset, bytes)`.
    pub fn written(&self) -> Vec<(u32, Vec<u8>)> {
        self.shared.written.lock().clone()
    }
}

impl PlcDriver for MockDriver {
    fn connection_key(&self, config: &PlcConfig) -> Result<ConnectionKey, DriverError> {
        Ok(ConnectionKey::Mock {
            name: format!("{}:{}", config.ip, config.tcp_port),
        })
    }

    fn connect<'a>(&'a self, _config: &'a PlcConfig) -> ConnectFuture<'a> {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            shared.connects.fetch_add(1, Ordering::SeqCst);
            if take_failure(&shared.connect_failures) {
                return Err(DriverError::Comm {
                    message: "mock connect refused".to_string(),
                });
            }
            shared.events.lock().push(MockEvent::Connect);
            let client: ConnectedClient = Box::new(MockConnection { shared });
            Ok(client)
        })
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

struct MockConnection {
    shared: Arc<MockShared>,
}

impl PlcConnection for MockConnection {
    fn read_db<'a>(&'a mut self, _block_id: u16, start: u32, len: usize) -> ReadFuture<'a> {
        Box::pin(async move {
            self.shared
                .events
                .lock()
                .push(MockEvent::ReadStart { start, len });

            while self.shared.hold_reads.load(Ordering::SeqCst) {
                self.shared.read_gate.notified().await;
            }

            if take_failure(&self.shared.read_failures) {
                return Err(DriverError::Comm {
                    message: "mock read failed".to_string(),
                });
            }

            let payload = self.shared.payload.lock();
            let start = start as usize;
            let end = start.checked_add(len).filter(|end| *end <= payload.len());
            let Some(end) = end else {
                return Err(DriverError::Comm {
                    message: format!(
                        "read range {start}..{} beyond mock data block of {} byte(s)",
                        start + len,
                        payload.len()
                    ),
                });
            };
            let data = payload[start..end].to_vec();
            drop(payload);

            self.shared.events.lock().push(MockEvent::ReadEnd);
            Ok(data)
        })
    }

    fn write_db<'a>(&'a mut self, _block_id: u16, start: u32, payload: &'a [u8]) -> WriteFuture<'a> {
        Box::pin(async move {
            self.shared.events.lock().push(MockEvent::WriteStart {
                start,
                len: payload.len(),
            });

            if take_failure(&self.shared.write_failures) {
                return Err(DriverError::Comm {
                    message: "mock write failed".to_string(),
                });
            }

            let mut block = self.shared.payload.lock();
            let offset = start as usize;
            let end = offset
                .checked_add(payload.len())
                .filter(|end| *end <= block.len());
            let Some(end) = end else {
                return Err(DriverError::Comm {
                    message: format!(
                        "write range {offset}..{} beyond mock data block of {} byte(s)",
                        offset + payload.len(),
                        block.len()
                    ),
                });
            };
            block[offset..end].copy_from_slice(payload);
            drop(block);

            self.shared
                .written
                .lock()
                .push((start, payload.to_vec()));
            self.shared.events.lock().push(MockEvent::WriteEnd);
            Ok(())
        })
    }

    fn disconnect<'a>(&'a mut self) -> DisconnectFuture<'a> {
        Box::pin(async move {
            self.shared.events.lock().push(MockEvent::Disconnect);
            Ok(())
        })
    }
}
