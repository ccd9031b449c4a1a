// This Source Code Form is subject to the terms of the Mozilla Public
// License, v2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Conversion between modified UTF-8 and UTF-16 code units.
//!
//! Modified UTF-8 differs from standard UTF-8 in two ways: U+0000 is
//! written as the two-byte sequence `C0 80`, so encoded text never contains
//! a zero byte, and supplementary characters are written as two separately
//! encoded surrogates (three bytes each). Four-byte standard UTF-8 sequences
//! are accepted on input and turned into a surrogate pair.

use thiserror::Error;

/// A malformed modified UTF-8 byte sequence.
///
/// Offsets are byte offsets into the input.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected NUL byte at offset {offset}")]
    EmbeddedNul { offset: usize },
    #[error("invalid lead byte {byte:#04x} at offset {offset}")]
    InvalidLeadByte { byte: u8, offset: usize },
    #[error("invalid continuation byte {byte:#04x} at offset {offset}")]
    InvalidContinuation { byte: u8, offset: usize },
    #[error("sequence starting at offset {offset} is truncated")]
    Truncated { offset: usize },
    #[error("sequence starting at offset {offset} encodes an out-of-range code point")]
    InvalidCodePoint { offset: usize },
}

/// Decode modified UTF-8 into UTF-16 code units.
pub fn decode(bytes: &[u8]) -> Result<Vec<u16>, DecodeError> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut offset = 0;
    while let Some(&lead) = bytes.get(offset) {
        match lead {
            0x00 => return Err(DecodeError::EmbeddedNul { offset }),
            0x01..=0x7F => {
                units.push(lead as u16);
                offset += 1;
            }
            0xC0..=0xDF => {
                let b1 = continuation(bytes, offset, 1)?;
                units.push((((lead & 0x1F) as u16) << 6) | b1 as u16);
                offset += 2;
            }
            0xE0..=0xEF => {
                let b1 = continuation(bytes, offset, 1)?;
                let b2 = continuation(bytes, offset, 2)?;
                units.push((((lead & 0x0F) as u16) << 12) | ((b1 as u16) << 6) | b2 as u16);
                offset += 3;
            }
            0xF0..=0xF7 => {
                let b1 = continuation(bytes, offset, 1)?;
                let b2 = continuation(bytes, offset, 2)?;
                let b3 = continuation(bytes, offset, 3)?;
                let code_point = (((lead & 0x07) as u32) << 18)
                    | ((b1 as u32) << 12)
                    | ((b2 as u32) << 6)
                    | b3 as u32;
                if !(0x1_0000..=0x10_FFFF).contains(&code_point) {
                    return Err(DecodeError::InvalidCodePoint { offset });
                }
                let v = code_point - 0x1_0000;
                units.push(0xD800 | (v >> 10) as u16);
                units.push(0xDC00 | (v & 0x3FF) as u16);
                offset += 4;
            }
            byte => return Err(DecodeError::InvalidLeadByte { byte, offset }),
        }
    }
    Ok(units)
}

/// Encode UTF-16 code units as modified UTF-8.
///
/// Unpaired surrogates are encoded like any other code unit.
pub fn encode(units: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(units.len());
    for &unit in units {
        match unit {
            0x0001..=0x007F => bytes.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                bytes.push(0xC0 | (unit >> 6) as u8);
                bytes.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                bytes.push(0xE0 | (unit >> 12) as u8);
                bytes.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                bytes.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    bytes
}

/// Returns the low six bits of the `n`th continuation byte after `lead_offset`.
fn continuation(bytes: &[u8], lead_offset: usize, n: usize) -> Result<u8, DecodeError> {
    let offset = lead_offset + n;
    let byte = *bytes.get(offset).ok_or(DecodeError::Truncated {
        offset: lead_offset,
    })?;
    if byte & 0xC0 != 0x80 {
        return Err(DecodeError::InvalidContinuation { byte, offset });
    }
    Ok(byte & 0x3F)
}
