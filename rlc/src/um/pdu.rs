//! UM Data PDU Wire Format
//!
//! Header packing and parsing for UM data PDUs.
//!
//! With a 5-bit SN the SO-less header is a single byte:
//!
//! ```text
//!  7 6 5 4 3 2 1 0
//! +---+-+---------+
//! |SI |R|   SN    |
//! +---+-+---------+
//! ```
//!
//! With a 10-bit SN it spans two bytes (SI, four reserved bits, SN).
//! Middle and last segments append a 16-bit big-endian SO field.

use crate::config::SnFieldLength;
use crate::RlcError;
use bytes::{BufMut, BytesMut};
use std::fmt;

/// Segmentation Info (SI) field values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentationInfo {
    /// PDU carries a complete SDU
    FullSdu = 0b00,
    /// PDU carries the first segment of an SDU
    FirstSegment = 0b01,
    /// PDU carries the last segment of an SDU
    LastSegment = 0b10,
    /// PDU carries a segment that is neither first nor last
    MiddleSegment = 0b11,
}

impl SegmentationInfo {
    /// Whether a header with this SI carries an SO field
    pub fn has_so(&self) -> bool {
        matches!(self, Self::MiddleSegment | Self::LastSegment)
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::FullSdu,
            0b01 => Self::FirstSegment,
            0b10 => Self::LastSegment,
            _ => Self::MiddleSegment,
        }
    }
}

impl fmt::Display for SegmentationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullSdu => write!(f, "full"),
            Self::FirstSegment => write!(f, "first"),
            Self::LastSegment => write!(f, "last"),
            Self::MiddleSegment => write!(f, "middle"),
        }
    }
}

/// Header size without an SO field (full SDU or first segment),
/// i.e. SI plus SN rounded up to whole bytes
pub const fn header_size_no_so(sn_len: SnFieldLength) -> usize {
    match sn_len {
        SnFieldLength::Bits5 => 1,
        SnFieldLength::Bits10 => 2,
    }
}

/// Header size with an SO field (middle or last segment)
pub const fn header_size_with_so(sn_len: SnFieldLength) -> usize {
    header_size_no_so(sn_len) + 2
}

/// Header of a UM data PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlcUmPduHeader {
    /// Segmentation info
    pub si: SegmentationInfo,
    /// Sequence number reserved for the SDU under transmission
    pub sn: u16,
    /// Byte offset of the payload within its SDU; on the wire only
    /// when `si.has_so()`
    pub so: u16,
}

/// Pack `header` into `buf`; returns the number of bytes written
pub fn write_um_pdu_header(
    header: &RlcUmPduHeader,
    sn_len: SnFieldLength,
    buf: &mut BytesMut,
) -> usize {
    let start = buf.len();
    let si_bits = (header.si as u8) << 6;
    match sn_len {
        SnFieldLength::Bits5 => {
            buf.put_u8(si_bits | (header.sn as u8 & 0x1F));
        }
        SnFieldLength::Bits10 => {
            buf.put_u8(si_bits | ((header.sn >> 8) as u8 & 0x03));
            buf.put_u8((header.sn & 0xFF) as u8);
        }
    }
    if header.si.has_so() {
        buf.put_u16(header.so);
    }
    buf.len() - start
}

/// Parse a UM data PDU header from the start of `data`; returns the
/// header and the number of bytes it occupied
pub fn read_um_pdu_header(
    data: &[u8],
    sn_len: SnFieldLength,
) -> Result<(RlcUmPduHeader, usize), RlcError> {
    let sn_bytes = header_size_no_so(sn_len);
    if data.len() < sn_bytes {
        return Err(RlcError::InvalidPdu(format!(
            "UM header truncated: {} B, need {} B",
            data.len(),
            sn_bytes
        )));
    }

    let si = SegmentationInfo::from_bits(data[0] >> 6);
    let sn = match sn_len {
        SnFieldLength::Bits5 => (data[0] & 0x1F) as u16,
        SnFieldLength::Bits10 => (((data[0] & 0x03) as u16) << 8) | data[1] as u16,
    };

    let mut consumed = sn_bytes;
    let mut so = 0u16;
    if si.has_so() {
        if data.len() < sn_bytes + 2 {
            return Err(RlcError::InvalidPdu(format!(
                "UM header truncated: {} B, SO field missing for SI={}",
                data.len(),
                si
            )));
        }
        so = u16::from_be_bytes([data[sn_bytes], data[sn_bytes + 1]]);
        consumed += 2;
    }

    Ok((RlcUmPduHeader { si, sn, so }, consumed))
}
