//! One-shot reads and writes over a live connection.
//!
//! A `Session` owns the connection handle and the active record layout and
//! nothing else; retry policy lives in the engine, byte layout in the codec.

use log::warn;

use crate::adapters::driver::{ConnectedClient, DriverError};
use crate::core::codec::{self, CodecError};
use crate::core::layout::RecordLayout;
use crate::core::model::{RegisterPage, SawLog};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("record index {index} outside 0..{capacity}")]
    IndexOutOfRange { index: usize, capacity: usize },
}

impl SessionError {
    /// Transport failures are the only class the engine retries.
    pub fn is_transport(&self) -> bool {
        matches!(self, SessionError::Driver(_))
    }
}

pub struct Session {
    client: ConnectedClient,
    layout: &'static RecordLayout,
    block_id: u16,
    base_offset: u32,
}

impl Session {
    pub fn new(
        client: ConnectedClient,
        layout: &'static RecordLayout,
        block_id: u16,
        base_offset: u32,
    ) -> Self {
        Self {
            client,
            layout,
            block_id,
            base_offset,
        }
    }

    pub fn layout(&self) -> &'static RecordLayout {
        self.layout
    }

    /// Raw bounded read; no structure is guessed for partial ranges.
    pub async fn read_range(&mut self, start: u32, len: usize) -> Result<Vec<u8>, SessionError> {
        Ok(self.client.read_db(self.block_id, start, len).await?)
    }

    /// Full-register read routed through the page codec.
    pub async fn read_page(&mut self) -> Result<RegisterPage, SessionError> {
        let payload = self
            .read_range(self.base_offset, self.layout.page_size())
            .await?;
        Ok(codec::decode_page(&payload, self.layout)?)
    }

    /// Encode and write one record at `index`. The index is validated before
    /// any transport call.
    pub async fn write_record(&mut self, index: usize, record: &SawLog) -> Result<(), SessionError> {
        if index >= RegisterPage::CAPACITY {
            return Err(SessionError::IndexOutOfRange {
                index,
                capacity: RegisterPage::CAPACITY,
            });
        }
        let payload = codec::encode_record(record, self.layout)?;
        let offset = self.base_offset + (index * self.layout.record_size()) as u32;
        self.client
            .write_db(self.block_id, offset, &payload)
            .await?;
        Ok(())
    }

    /// Best-effort disconnect; failures are logged, not surfaced.
    pub async fn disconnect(mut self) {
        if let Err(err) = self.client.disconnect().await {
            warn!("[comm][conn] disconnect failed: {err}");
        }
    }
}
