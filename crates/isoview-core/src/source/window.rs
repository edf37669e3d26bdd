//! Decode window: a contiguous byte buffer with a read cursor
//!
//! Every on-disk structure is decoded through a `Window`. Cloning a window is
//! cheap (the buffer is shared), which is what makes cursor snapshots plain
//! values.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use std::sync::Arc;

use crate::error::{IsoError, Result};

/// Timestamp with the GMT offset recorded on disc
pub type Timestamp = DateTime<FixedOffset>;

/// Length of the compact directory-record datetime
pub const DIRECTORY_DATETIME_LEN: usize = 7;

/// Length of the text datetime used by volume descriptors
pub const DESCRIPTOR_DATETIME_LEN: usize = 17;

#[derive(Debug, Clone, Default)]
pub struct Window {
    data: Arc<[u8]>,
    pos: usize,
}

impl Window {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            data: Arc::from(data),
            pos: 0,
        }
    }

    /// Total window length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Cursor offset from the start of the window
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left between the cursor and the end of the window
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn underrun(&self, wanted: usize) -> IsoError {
        IsoError::BufferUnderrun {
            wanted,
            available: self.remaining(),
        }
    }

    /// Consume and return the next `n` bytes
    pub fn decode_raw(&mut self, n: usize) -> Result<&[u8]> {
        if n > self.remaining() {
            return Err(self.underrun(n));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..start + n])
    }

    /// Consume everything up to the end of the window
    pub fn decode_remaining(&mut self) -> Vec<u8> {
        let start = self.pos;
        self.pos = self.data.len();
        self.data[start..].to_vec()
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.decode_raw(n).map(|_| ())
    }

    /// Move the cursor back by `n` bytes
    pub fn rewind(&mut self, n: usize) -> Result<()> {
        if n > self.pos {
            return Err(IsoError::BufferUnderrun {
                wanted: n,
                available: self.pos,
            });
        }
        self.pos -= n;
        Ok(())
    }

    /// Advance to the next multiple of `boundary`, stopping at the window end
    pub fn skip_to_boundary(&mut self, boundary: usize) {
        let next = (self.pos / boundary + 1) * boundary;
        self.pos = next.min(self.data.len());
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.underrun(1))
    }

    pub fn decode_u8(&mut self) -> Result<u8> {
        Ok(self.decode_raw(1)?[0])
    }

    pub fn decode_u16_le(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.decode_raw(2)?))
    }

    pub fn decode_u32_le(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.decode_raw(4)?))
    }

    pub fn decode_u32_be(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.decode_raw(4)?))
    }

    /// Decode a 16-bit value stored little-endian then big-endian
    pub fn decode_both_endian_u16(&mut self) -> Result<u16> {
        let bytes = self.decode_raw(4)?;
        let little = LittleEndian::read_u16(&bytes[..2]);
        let big = BigEndian::read_u16(&bytes[2..]);
        if little != big {
            return Err(IsoError::EndianMismatch {
                little: little.into(),
                big: big.into(),
            });
        }
        Ok(little)
    }

    /// Decode a 32-bit value stored little-endian then big-endian
    pub fn decode_both_endian_u32(&mut self) -> Result<u32> {
        let bytes = self.decode_raw(8)?;
        let little = LittleEndian::read_u32(&bytes[..4]);
        let big = BigEndian::read_u32(&bytes[4..]);
        if little != big {
            return Err(IsoError::EndianMismatch { little, big });
        }
        Ok(little)
    }

    /// Decode a fixed-width field, trimming trailing space or NUL padding
    pub fn decode_string(&mut self, n: usize) -> Result<Vec<u8>> {
        let raw = self.decode_raw(n)?;
        let end = raw
            .iter()
            .rposition(|&b| b != b' ' && b != 0)
            .map_or(0, |i| i + 1);
        Ok(raw[..end].to_vec())
    }

    /// Decode the 7-byte directory-record datetime.
    ///
    /// Returns `None` when the fields do not form a valid date (unrecorded).
    pub fn decode_directory_datetime(&mut self) -> Result<Option<Timestamp>> {
        let bytes = self.decode_raw(DIRECTORY_DATETIME_LEN)?;
        Ok(parse_directory_datetime(bytes))
    }

    /// Decode the 17-byte descriptor datetime ("YYYYMMDDhhmmsscc" + offset).
    ///
    /// Returns `None` for the all-zero "not specified" value.
    pub fn decode_descriptor_datetime(&mut self) -> Result<Option<Timestamp>> {
        let bytes = self.decode_raw(DESCRIPTOR_DATETIME_LEN)?;
        Ok(parse_descriptor_datetime(bytes))
    }
}

/// GMT offset is stored in 15 minute intervals
fn gmt_offset(raw: u8) -> Option<FixedOffset> {
    FixedOffset::east_opt(i32::from(raw as i8) * 15 * 60)
}

fn parse_directory_datetime(bytes: &[u8]) -> Option<Timestamp> {
    let offset = gmt_offset(bytes[6])?;
    let naive = NaiveDate::from_ymd_opt(
        1900 + i32::from(bytes[0]),
        u32::from(bytes[1]),
        u32::from(bytes[2]),
    )?
    .and_hms_opt(
        u32::from(bytes[3]),
        u32::from(bytes[4]),
        u32::from(bytes[5]),
    )?;
    offset.from_local_datetime(&naive).single()
}

fn ascii_number(digits: &[u8]) -> Option<u32> {
    digits.iter().try_fold(0u32, |acc, &d| {
        d.is_ascii_digit().then(|| acc * 10 + u32::from(d - b'0'))
    })
}

fn parse_descriptor_datetime(bytes: &[u8]) -> Option<Timestamp> {
    let year = ascii_number(&bytes[0..4])?;
    if year == 0 {
        return None;
    }
    let offset = gmt_offset(bytes[16])?;
    let naive = NaiveDate::from_ymd_opt(
        year as i32,
        ascii_number(&bytes[4..6])?,
        ascii_number(&bytes[6..8])?,
    )?
    .and_hms_nano_opt(
        ascii_number(&bytes[8..10])?,
        ascii_number(&bytes[10..12])?,
        ascii_number(&bytes[12..14])?,
        ascii_number(&bytes[14..16])? * 10_000_000,
    )?;
    offset.from_local_datetime(&naive).single()
}
