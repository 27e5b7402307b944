// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::attribute::Attribute;
use crate::error::{FactError, Result};
use crate::fact::Fact;
use ipnet::IpNet;
use loom_wglink_common::normalize_ip;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;
use uuid::Uuid;

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// An authenticated batch of serialized facts between one sender and one
/// recipient. `inner` is only meaningful once the tag has been verified.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedGroupValue {
	pub nonce: [u8; NONCE_LEN],
	pub tag: [u8; TAG_LEN],
	pub inner: Vec<u8>,
}

impl SignedGroupValue {
	pub fn new(nonce: [u8; NONCE_LEN], tag: [u8; TAG_LEN], inner: Vec<u8>) -> Self {
		Self { nonce, tag, inner }
	}

	/// Decodes the concatenated inner facts. Nested signed groups are
	/// rejected outright.
	pub fn parse_inner(&self, now: Instant) -> Result<Vec<Fact>> {
		let mut facts = Vec::new();
		let mut rest = self.inner.as_slice();
		while !rest.is_empty() {
			let (fact, remainder) = Fact::decode(rest, now)?;
			if fact.attribute() == Attribute::SignedGroup {
				return Err(FactError::NestedSignedGroup);
			}
			facts.push(fact);
			rest = remainder;
		}
		Ok(facts)
	}
}

impl fmt::Debug for SignedGroupValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SignedGroupValue")
			.field("nonce", &hex_prefix(&self.nonce))
			.field("inner_len", &self.inner.len())
			.finish()
	}
}

fn hex_prefix(bytes: &[u8]) -> String {
	bytes.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
	IpPort(SocketAddr),
	IpNet(IpNet),
	Empty,
	Uuid(Uuid),
	SignedGroup(SignedGroupValue),
}

fn ip_len(ip: IpAddr) -> usize {
	match ip {
		IpAddr::V4(_) => 4,
		IpAddr::V6(_) => 16,
	}
}

fn push_ip(ip: IpAddr, buf: &mut Vec<u8>) {
	match ip {
		IpAddr::V4(v4) => buf.extend_from_slice(&v4.octets()),
		IpAddr::V6(v6) => buf.extend_from_slice(&v6.octets()),
	}
}

fn read_ip(bytes: &[u8]) -> Option<IpAddr> {
	match bytes.len() {
		4 => {
			let octets: [u8; 4] = bytes.try_into().ok()?;
			Some(IpAddr::V4(Ipv4Addr::from(octets)))
		}
		16 => {
			let octets: [u8; 16] = bytes.try_into().ok()?;
			Some(IpAddr::V6(Ipv6Addr::from(octets)))
		}
		_ => None,
	}
}

/// Address width in bytes an attribute carries, if it carries one.
fn family_len(attribute: Attribute) -> Option<usize> {
	match attribute {
		Attribute::EndpointV4 | Attribute::AllowedCidrV4 => Some(4),
		Attribute::EndpointV6 | Attribute::AllowedCidrV6 => Some(16),
		_ => None,
	}
}

impl Value {
	pub fn encoded_len(&self) -> usize {
		match self {
			Value::IpPort(addr) => ip_len(addr.ip()) + 2,
			Value::IpNet(net) => ip_len(net.addr()) + 1,
			Value::Empty => 0,
			Value::Uuid(_) => 16,
			Value::SignedGroup(g) => NONCE_LEN + TAG_LEN + g.inner.len(),
		}
	}

	pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
		match self {
			Value::IpPort(addr) => {
				push_ip(addr.ip(), buf);
				buf.extend_from_slice(&addr.port().to_be_bytes());
			}
			Value::IpNet(net) => {
				push_ip(net.addr(), buf);
				buf.push(net.prefix_len());
			}
			Value::Empty => {}
			Value::Uuid(id) => buf.extend_from_slice(id.as_bytes()),
			Value::SignedGroup(g) => {
				buf.extend_from_slice(&g.nonce);
				buf.extend_from_slice(&g.tag);
				buf.extend_from_slice(&g.inner);
			}
		}
	}

	/// Ensures the value has the shape the attribute's decoder expects, so
	/// that every constructed fact survives a round trip.
	pub(crate) fn check(&self, attribute: Attribute) -> Result<()> {
		let invalid = |reason: &str| FactError::InvalidValue {
			attribute,
			reason: reason.to_string(),
		};
		let ok = match (attribute, self) {
			(Attribute::EndpointV4 | Attribute::EndpointV6, Value::IpPort(addr)) => {
				if normalize_ip(addr.ip()) != addr.ip() {
					return Err(invalid("address is not normalized"));
				}
				family_len(attribute) == Some(ip_len(addr.ip()))
			}
			(Attribute::AllowedCidrV4 | Attribute::AllowedCidrV6, Value::IpNet(net)) => {
				if normalize_ip(net.addr()) != net.addr() {
					return Err(invalid("address is not normalized"));
				}
				family_len(attribute) == Some(ip_len(net.addr()))
			}
			(Attribute::Membership, Value::Empty) => true,
			(Attribute::Alive, Value::Uuid(_)) => true,
			(Attribute::SignedGroup, Value::SignedGroup(_)) => true,
			_ => false,
		};
		if ok {
			Ok(())
		} else {
			Err(invalid("value does not match attribute"))
		}
	}

	pub(crate) fn decode(attribute: Attribute, bytes: &[u8]) -> Result<Self> {
		let invalid = |reason: String| FactError::InvalidValue { attribute, reason };

		match attribute {
			Attribute::Unknown => Err(FactError::UnknownAttribute(attribute.as_byte())),
			Attribute::EndpointV4 | Attribute::EndpointV6 => {
				let width = family_len(attribute).unwrap_or(16);
				if bytes.len() != width + 2 {
					return Err(invalid(format!("expected {} bytes, got {}", width + 2, bytes.len())));
				}
				let ip = read_ip(&bytes[..width])
					.ok_or_else(|| invalid("bad address".to_string()))?;
				let port = u16::from_be_bytes([bytes[width], bytes[width + 1]]);
				Ok(Value::IpPort(SocketAddr::new(ip, port)))
			}
			Attribute::AllowedCidrV4 | Attribute::AllowedCidrV6 => {
				let width = family_len(attribute).unwrap_or(16);
				if bytes.len() != width + 1 {
					return Err(invalid(format!("expected {} bytes, got {}", width + 1, bytes.len())));
				}
				let ip = read_ip(&bytes[..width])
					.ok_or_else(|| invalid("bad address".to_string()))?;
				let net = IpNet::new(ip, bytes[width]).map_err(|e| invalid(e.to_string()))?;
				Ok(Value::IpNet(net))
			}
			Attribute::Membership => {
				if !bytes.is_empty() {
					return Err(invalid(format!("expected no bytes, got {}", bytes.len())));
				}
				Ok(Value::Empty)
			}
			Attribute::Alive => {
				let raw: [u8; 16] = bytes
					.try_into()
					.map_err(|_| invalid(format!("expected 16 bytes, got {}", bytes.len())))?;
				Ok(Value::Uuid(Uuid::from_bytes(raw)))
			}
			Attribute::SignedGroup => {
				if bytes.len() < NONCE_LEN + TAG_LEN {
					return Err(invalid(format!(
						"expected at least {} bytes, got {}",
						NONCE_LEN + TAG_LEN,
						bytes.len()
					)));
				}
				let mut nonce = [0u8; NONCE_LEN];
				nonce.copy_from_slice(&bytes[..NONCE_LEN]);
				let mut tag = [0u8; TAG_LEN];
				tag.copy_from_slice(&bytes[NONCE_LEN..NONCE_LEN + TAG_LEN]);
				Ok(Value::SignedGroup(SignedGroupValue::new(
					nonce,
					tag,
					bytes[NONCE_LEN + TAG_LEN..].to_vec(),
				)))
			}
		}
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::IpPort(addr) => write!(f, "{addr}"),
			Value::IpNet(net) => write!(f, "{net}"),
			Value::Empty => f.write_str("-"),
			Value::Uuid(id) => write!(f, "{id}"),
			Value::SignedGroup(g) => write!(f, "<signed {} bytes>", g.inner.len()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn endpoint_layout_is_ip_then_big_endian_port() {
		let value = Value::IpPort("192.0.2.7:51820".parse().unwrap());
		let mut buf = Vec::new();
		value.encode(&mut buf);
		assert_eq!(buf, vec![192, 0, 2, 7, 0xCA, 0x6C]);
		assert_eq!(value.encoded_len(), 6);
		assert_eq!(Value::decode(Attribute::EndpointV4, &buf).unwrap(), value);
	}

	#[test]
	fn cidr_layout_is_ip_then_prefix() {
		let value = Value::IpNet("2001:db8::/48".parse().unwrap());
		let mut buf = Vec::new();
		value.encode(&mut buf);
		assert_eq!(buf.len(), 17);
		assert_eq!(buf[16], 48);
		assert_eq!(Value::decode(Attribute::AllowedCidrV6, &buf).unwrap(), value);
	}

	#[test]
	fn rejects_wrong_width_for_attribute() {
		let mut buf = Vec::new();
		Value::IpPort("[2001:db8::1]:1".parse().unwrap()).encode(&mut buf);
		assert!(matches!(
			Value::decode(Attribute::EndpointV4, &buf),
			Err(FactError::InvalidValue { .. })
		));
	}

	#[test]
	fn rejects_oversized_prefix() {
		assert!(Value::decode(Attribute::AllowedCidrV4, &[10, 0, 0, 0, 33]).is_err());
	}

	#[test]
	fn check_matches_attribute_and_family() {
		let v4 = Value::IpPort("10.0.0.1:1".parse().unwrap());
		assert!(v4.check(Attribute::EndpointV4).is_ok());
		assert!(v4.check(Attribute::EndpointV6).is_err());
		assert!(v4.check(Attribute::Membership).is_err());
		assert!(Value::Empty.check(Attribute::Membership).is_ok());

		let mapped = Value::IpPort("[::ffff:10.0.0.1]:1".parse().unwrap());
		assert!(mapped.check(Attribute::EndpointV6).is_err());
	}

	#[test]
	fn signed_group_needs_nonce_and_tag() {
		assert!(Value::decode(Attribute::SignedGroup, &[0u8; 39]).is_err());
		let decoded = Value::decode(Attribute::SignedGroup, &[7u8; 45]).unwrap();
		match decoded {
			Value::SignedGroup(g) => {
				assert_eq!(g.nonce, [7u8; NONCE_LEN]);
				assert_eq!(g.inner.len(), 5);
			}
			other => panic!("unexpected value {other:?}"),
		}
	}
}
