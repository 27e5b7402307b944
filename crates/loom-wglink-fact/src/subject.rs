// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::attribute::Attribute;
use crate::error::{FactError, Result};
use loom_wglink_common::{WgPublicKey, KEY_LEN};
use std::fmt;

/// Who a fact is about. Every current attribute is keyed by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
	Peer(WgPublicKey),
}

impl Subject {
	pub fn peer(&self) -> &WgPublicKey {
		match self {
			Subject::Peer(key) => key,
		}
	}

	pub fn as_bytes(&self) -> &[u8] {
		match self {
			Subject::Peer(key) => key.as_bytes(),
		}
	}

	pub fn encoded_len(&self) -> usize {
		self.as_bytes().len()
	}

	pub(crate) fn decode(attribute: Attribute, bytes: &[u8]) -> Result<Self> {
		match attribute {
			Attribute::Unknown => Err(FactError::UnknownAttribute(attribute.as_byte())),
			_ => {
				if bytes.len() != KEY_LEN {
					return Err(FactError::InvalidSubject {
						attribute,
						reason: format!("expected {KEY_LEN}-byte public key, got {}", bytes.len()),
					});
				}
				WgPublicKey::from_slice(bytes)
					.map(Subject::Peer)
					.map_err(|e| FactError::InvalidSubject {
						attribute,
						reason: e.to_string(),
					})
			}
		}
	}
}

impl From<WgPublicKey> for Subject {
	fn from(key: WgPublicKey) -> Self {
		Subject::Peer(key)
	}
}

impl fmt::Display for Subject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Subject::Peer(key) => write!(f, "{key}"),
		}
	}
}
