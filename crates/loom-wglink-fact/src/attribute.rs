// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::FactError;
use std::fmt;

/// What a fact asserts. The discriminant is the wire byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Attribute {
	Unknown = 0,
	EndpointV4 = b'4',
	EndpointV6 = b'6',
	AllowedCidrV4 = b'a',
	AllowedCidrV6 = b'A',
	Membership = b'm',
	Alive = b'!',
	SignedGroup = b'S',
}

impl Attribute {
	pub const ALL: [Attribute; 8] = [
		Attribute::Unknown,
		Attribute::EndpointV4,
		Attribute::EndpointV6,
		Attribute::AllowedCidrV4,
		Attribute::AllowedCidrV6,
		Attribute::Membership,
		Attribute::Alive,
		Attribute::SignedGroup,
	];

	pub fn as_byte(self) -> u8 {
		self as u8
	}

	pub fn is_endpoint(self) -> bool {
		matches!(self, Attribute::EndpointV4 | Attribute::EndpointV6)
	}

	pub fn is_allowed_cidr(self) -> bool {
		matches!(self, Attribute::AllowedCidrV4 | Attribute::AllowedCidrV6)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Attribute::Unknown => "unknown",
			Attribute::EndpointV4 => "endpoint-v4",
			Attribute::EndpointV6 => "endpoint-v6",
			Attribute::AllowedCidrV4 => "allowed-ips-v4",
			Attribute::AllowedCidrV6 => "allowed-ips-v6",
			Attribute::Membership => "membership",
			Attribute::Alive => "alive",
			Attribute::SignedGroup => "signed-group",
		}
	}
}

impl TryFrom<u8> for Attribute {
	type Error = FactError;

	fn try_from(byte: u8) -> Result<Self, Self::Error> {
		Attribute::ALL
			.into_iter()
			.find(|a| a.as_byte() == byte)
			.ok_or(FactError::UnknownAttribute(byte))
	}
}

impl fmt::Display for Attribute {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wire_bytes_roundtrip() {
		for attr in Attribute::ALL {
			assert_eq!(Attribute::try_from(attr.as_byte()).unwrap(), attr);
		}
	}

	#[test]
	fn unassigned_byte_is_rejected() {
		assert!(matches!(
			Attribute::try_from(b'z'),
			Err(FactError::UnknownAttribute(b'z'))
		));
	}

	#[test]
	fn classification() {
		assert!(Attribute::EndpointV6.is_endpoint());
		assert!(!Attribute::AllowedCidrV4.is_endpoint());
		assert!(Attribute::AllowedCidrV6.is_allowed_cidr());
		assert!(!Attribute::Membership.is_allowed_cidr());
	}
}
