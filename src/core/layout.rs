//! Record layout tables.
//!
//! The device-side SAWLOG struct has changed shape between deployments; every
//! field width, offset and packing decision is carried here as data so the
//! codec and its callers never branch on a revision themselves.

use serde::{Deserialize, Serialize};

/// Encoded size of the DTL timestamp.
pub const DTL_SIZE: usize = 12;

/// Number of records in the register data block.
pub const REGISTER_CAPACITY: usize = 255;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayoutVersion {
    /// 56-byte record: 16 flags, 64 nibble-packed button values.
    #[serde(rename = "v1_56byte")]
    V1Compact,
    /// 94-byte record: `position` header field, 32 flags, buttons as two
    /// parallel 32-byte arrays (order / count).
    #[serde(rename = "v2_94byte")]
    V2Extended,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonPacking {
    /// Two values per byte, high nibble first; values 0-15.
    NibblePacked,
    /// Group A ("order") then group B ("count") as consecutive byte arrays.
    SplitByteArrays,
}

/// Field widths and offsets of one SAWLOG revision.
///
/// Common to both revisions: big-endian multi-byte scalars, flag bit `i`
/// stored as bit `i % 16` of flag word `i / 16`, trailing DTL timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordLayout {
    pub version: LayoutVersion,
    pub flag_count: usize,
    pub button_count: usize,
    pub has_position: bool,
    pub button_packing: ButtonPacking,
}

const V1_COMPACT: RecordLayout = RecordLayout {
    version: LayoutVersion::V1Compact,
    flag_count: 16,
    button_count: 64,
    has_position: false,
    button_packing: ButtonPacking::NibblePacked,
};

const V2_EXTENDED: RecordLayout = RecordLayout {
    version: LayoutVersion::V2Extended,
    flag_count: 32,
    button_count: 64,
    has_position: true,
    button_packing: ButtonPacking::SplitByteArrays,
};

impl RecordLayout {
    pub const fn of(version: LayoutVersion) -> &'static RecordLayout {
        match version {
            LayoutVersion::V1Compact => &V1_COMPACT,
            LayoutVersion::V2Extended => &V2_EXTENDED,
        }
    }

    /// Header scalars: id, zone, sensor_id, length, [position,] drop_box.
    pub const fn header_len(&self) -> usize {
        if self.has_position {
            14
        } else {
            10
        }
    }

    pub const fn flags_offset(&self) -> usize {
        self.header_len()
    }

    pub const fn flags_len(&self) -> usize {
        self.flag_count / 8
    }

    pub const fn buttons_offset(&self) -> usize {
        self.flags_offset() + self.flags_len()
    }

    pub const fn buttons_len(&self) -> usize {
        match self.button_packing {
            ButtonPacking::NibblePacked => self.button_count / 2,
            ButtonPacking::SplitByteArrays => self.button_count,
        }
    }

    pub const fn timestamp_offset(&self) -> usize {
        self.buttons_offset() + self.buttons_len()
    }

    /// Fixed encoded size of one record, independent of field values.
    pub const fn record_size(&self) -> usize {
        self.timestamp_offset() + DTL_SIZE
    }

    /// Encoded size of the full register data block.
    pub const fn page_size(&self) -> usize {
        REGISTER_CAPACITY * self.record_size()
    }
}
