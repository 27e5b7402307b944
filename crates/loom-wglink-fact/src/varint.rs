// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Variable-length unsigned integers laid out like UTF-8 code points: the
//! leading byte announces the total length, continuation bytes carry six
//! bits each.
//!
//! | bytes | range               | layout                                |
//! |-------|---------------------|---------------------------------------|
//! | 1     | `0..0x80`           | `0xxxxxxx`                            |
//! | 2     | `0x80..0x800`       | `110xxxxx 10xxxxxx`                   |
//! | 3     | `0x800..0x10000`    | `1110xxxx 10xxxxxx 10xxxxxx`          |
//! | 4     | `0x10000..0x200000` | `11110xxx 10xxxxxx 10xxxxxx 10xxxxxx` |

use crate::error::{FactError, Result};

pub const MAX_VARINT: u32 = 0x1F_FFFF;
pub const MAX_VARINT_LEN: usize = 4;

pub fn encoded_len(value: u32) -> usize {
	match value {
		0..=0x7F => 1,
		0x80..=0x7FF => 2,
		0x800..=0xFFFF => 3,
		_ => 4,
	}
}

pub fn encode(value: u32, buf: &mut Vec<u8>) -> Result<()> {
	if value > MAX_VARINT {
		return Err(FactError::ValueTooLong(value as usize));
	}
	match encoded_len(value) {
		1 => buf.push(value as u8),
		2 => {
			buf.push(0xC0 | (value >> 6) as u8);
			buf.push(0x80 | (value & 0x3F) as u8);
		}
		3 => {
			buf.push(0xE0 | (value >> 12) as u8);
			buf.push(0x80 | ((value >> 6) & 0x3F) as u8);
			buf.push(0x80 | (value & 0x3F) as u8);
		}
		_ => {
			buf.push(0xF0 | (value >> 18) as u8);
			buf.push(0x80 | ((value >> 12) & 0x3F) as u8);
			buf.push(0x80 | ((value >> 6) & 0x3F) as u8);
			buf.push(0x80 | (value & 0x3F) as u8);
		}
	}
	Ok(())
}

/// Returns the value and the number of bytes consumed. A buffer that ends
/// mid-integer is a truncated header; a malformed lead or continuation
/// byte, or an overlong encoding, is `InvalidVarint`.
pub fn decode(buf: &[u8]) -> Result<(u32, usize)> {
	let Some(&lead) = buf.first() else {
		return Err(FactError::TruncatedHeader(0));
	};

	let (len, initial) = match lead {
		0x00..=0x7F => return Ok((lead as u32, 1)),
		0xC0..=0xDF => (2, (lead & 0x1F) as u32),
		0xE0..=0xEF => (3, (lead & 0x0F) as u32),
		0xF0..=0xF7 => (4, (lead & 0x07) as u32),
		_ => return Err(FactError::InvalidVarint),
	};

	if buf.len() < len {
		return Err(FactError::TruncatedHeader(buf.len()));
	}

	let mut value = initial;
	for &b in &buf[1..len] {
		if b & 0xC0 != 0x80 {
			return Err(FactError::InvalidVarint);
		}
		value = (value << 6) | (b & 0x3F) as u32;
	}

	if encoded_len(value) != len {
		return Err(FactError::InvalidVarint);
	}

	Ok((value, len))
}
