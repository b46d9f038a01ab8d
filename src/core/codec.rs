//! Byte codecs for the SAWLOG wire layout.
//!
//! Pure functions over raw buffers; all sizing comes from [`RecordLayout`] and
//! a length mismatch is returned as [`CodecError`], never a panic. Field
//! content itself can never fail to decode: any bytes of the right length
//! produce a value, and re-encoding that value reproduces the bytes.
//!
//! Bit order within the flag words follows the controller's packed Bool
//! arrays: flag `i` is bit `i % 16` of the big-endian word `i / 16`, so flags
//! 0-7 live in the low byte of the first word.

use thiserror::Error;

use super::layout::{ButtonPacking, RecordLayout, DTL_SIZE};
use super::model::{Dtl, RegisterPage, SawLog};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("layout mismatch: {context}: expected {expected}, got {got}")]
    LayoutMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
}

fn be_u16(payload: &[u8]) -> u16 {
    u16::from_be_bytes([payload[0], payload[1]])
}

fn be_u32(payload: &[u8]) -> u32 {
    u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
}

/// Decode the 12-byte DTL structure. Never fails; out-of-calendar values are
/// passed through uninterpreted.
pub fn decode_timestamp(payload: &[u8; DTL_SIZE]) -> Dtl {
    Dtl {
        year: be_u16(&payload[0..2]),
        month: payload[2],
        day: payload[3],
        weekday: payload[4],
        hour: payload[5],
        minute: payload[6],
        second: payload[7],
        nanosecond: be_u32(&payload[8..12]),
    }
}

pub fn encode_timestamp(timestamp: &Dtl) -> [u8; DTL_SIZE] {
    let mut out = [0u8; DTL_SIZE];
    out[0..2].copy_from_slice(&timestamp.year.to_be_bytes());
    out[2] = timestamp.month;
    out[3] = timestamp.day;
    out[4] = timestamp.weekday;
    out[5] = timestamp.hour;
    out[6] = timestamp.minute;
    out[7] = timestamp.second;
    out[8..12].copy_from_slice(&timestamp.nanosecond.to_be_bytes());
    out
}

/// Decode one record. Fails only if `payload` is not exactly
/// `layout.record_size()` bytes.
pub fn decode_record(payload: &[u8], layout: &RecordLayout) -> Result<SawLog, CodecError> {
    let expected = layout.record_size();
    if payload.len() != expected {
        return Err(CodecError::LayoutMismatch {
            context: "record payload bytes",
            expected,
            got: payload.len(),
        });
    }

    let id = be_u32(&payload[0..4]);
    let zone = payload[4];
    let sensor_id = payload[5];
    let length = be_u16(&payload[6..8]);
    let (position, drop_box) = if layout.has_position {
        (be_u32(&payload[8..12]), be_u16(&payload[12..14]))
    } else {
        (0, be_u16(&payload[8..10]))
    };

    let flags_off = layout.flags_offset();
    let mut flags = Vec::with_capacity(layout.flag_count);
    for word_index in 0..layout.flag_count / 16 {
        let word = be_u16(&payload[flags_off + word_index * 2..]);
        for bit in 0..16 {
            flags.push(word & (1 << bit) != 0);
        }
    }

    let buttons_off = layout.buttons_offset();
    let buttons_bytes = &payload[buttons_off..buttons_off + layout.buttons_len()];
    let mut buttons = Vec::with_capacity(layout.button_count);
    match layout.button_packing {
        ButtonPacking::NibblePacked => {
            for byte in buttons_bytes {
                buttons.push(byte >> 4);
                buttons.push(byte & 0x0F);
            }
        }
        ButtonPacking::SplitByteArrays => buttons.extend_from_slice(buttons_bytes),
    }

    let ts_off = layout.timestamp_offset();
    let mut ts_bytes = [0u8; DTL_SIZE];
    ts_bytes.copy_from_slice(&payload[ts_off..ts_off + DTL_SIZE]);

    Ok(SawLog {
        id,
        zone,
        sensor_id,
        length,
        position,
        drop_box,
        flags,
        buttons,
        timestamp: decode_timestamp(&ts_bytes),
    })
}

/// Encode one record to its fixed wire size. Deterministic; fails if the
/// record's flag/button vectors do not match the layout shape.
///
/// Nibble-packed layouts mask each button value to 0-15, matching the device's
/// 4-bit cells.
pub fn encode_record(record: &SawLog, layout: &RecordLayout) -> Result<Vec<u8>, CodecError> {
    if record.flags.len() != layout.flag_count {
        return Err(CodecError::LayoutMismatch {
            context: "record flag count",
            expected: layout.flag_count,
            got: record.flags.len(),
        });
    }
    if record.buttons.len() != layout.button_count {
        return Err(CodecError::LayoutMismatch {
            context: "record button count",
            expected: layout.button_count,
            got: record.buttons.len(),
        });
    }

    let mut out = Vec::with_capacity(layout.record_size());
    out.extend_from_slice(&record.id.to_be_bytes());
    out.push(record.zone);
    out.push(record.sensor_id);
    out.extend_from_slice(&record.length.to_be_bytes());
    if layout.has_position {
        out.extend_from_slice(&record.position.to_be_bytes());
    }
    out.extend_from_slice(&record.drop_box.to_be_bytes());

    for word_index in 0..layout.flag_count / 16 {
        let mut word = 0u16;
        for bit in 0..16 {
            if record.flags[word_index * 16 + bit] {
                word |= 1 << bit;
            }
        }
        out.extend_from_slice(&word.to_be_bytes());
    }

    match layout.button_packing {
        ButtonPacking::NibblePacked => {
            for pair in record.buttons.chunks(2) {
                out.push(((pair[0] & 0x0F) << 4) | (pair[1] & 0x0F));
            }
        }
        ButtonPacking::SplitByteArrays => out.extend_from_slice(&record.buttons),
    }

    out.extend_from_slice(&encode_timestamp(&record.timestamp));
    debug_assert_eq!(out.len(), layout.record_size());
    Ok(out)
}

/// Decode the full register block: fails iff the buffer is not exactly
/// `255 * record_size`; any byte content then decodes.
pub fn decode_page(payload: &[u8], layout: &RecordLayout) -> Result<RegisterPage, CodecError> {
    let expected = layout.page_size();
    if payload.len() != expected {
        return Err(CodecError::LayoutMismatch {
            context: "page payload bytes",
            expected,
            got: payload.len(),
        });
    }

    let record_size = layout.record_size();
    let mut records = Vec::with_capacity(RegisterPage::CAPACITY);
    for chunk in payload.chunks_exact(record_size) {
        records.push(decode_record(chunk, layout)?);
    }
    Ok(RegisterPage::from_records(records))
}

pub fn encode_page(page: &RegisterPage, layout: &RecordLayout) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(layout.page_size());
    for record in page.records() {
        out.extend_from_slice(&encode_record(record, layout)?);
    }
    Ok(out)
}
