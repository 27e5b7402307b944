// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The fact entity and its wire form:
//!
//! ```text
//! attribute:u8 | ttl:u8 | subject_len:u8 | value_len:varint | subject | value
//! ```
//!
//! Expiry travels as a TTL in whole seconds, so a decoded fact's expiry is
//! only accurate to within a second of the encoded one.

use crate::attribute::Attribute;
use crate::error::{FactError, Result};
use crate::key::FactKey;
use crate::subject::Subject;
use crate::value::{SignedGroupValue, Value};
use crate::varint;
use ipnet::IpNet;
use loom_wglink_common::{normalize_ip, normalize_net, WgPublicKey};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const MAX_TTL: Duration = Duration::from_secs(u8::MAX as u64);

/// attribute, ttl and subject length
const FIXED_HEADER_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fact {
	attribute: Attribute,
	subject: Subject,
	value: Value,
	expires: Instant,
}

impl Fact {
	pub fn new(attribute: Attribute, subject: Subject, value: Value, expires: Instant) -> Result<Self> {
		value.check(attribute)?;
		Ok(Self {
			attribute,
			subject,
			value,
			expires,
		})
	}

	pub fn endpoint(peer: WgPublicKey, addr: SocketAddr, expires: Instant) -> Self {
		let ip = normalize_ip(addr.ip());
		let attribute = match ip {
			IpAddr::V4(_) => Attribute::EndpointV4,
			IpAddr::V6(_) => Attribute::EndpointV6,
		};
		Self {
			attribute,
			subject: Subject::Peer(peer),
			value: Value::IpPort(SocketAddr::new(ip, addr.port())),
			expires,
		}
	}

	pub fn allowed_ips(peer: WgPublicKey, net: IpNet, expires: Instant) -> Self {
		let net = normalize_net(net);
		let attribute = match net {
			IpNet::V4(_) => Attribute::AllowedCidrV4,
			IpNet::V6(_) => Attribute::AllowedCidrV6,
		};
		Self {
			attribute,
			subject: Subject::Peer(peer),
			value: Value::IpNet(net),
			expires,
		}
	}

	pub fn membership(peer: WgPublicKey, expires: Instant) -> Self {
		Self {
			attribute: Attribute::Membership,
			subject: Subject::Peer(peer),
			value: Value::Empty,
			expires,
		}
	}

	pub fn alive(peer: WgPublicKey, boot_id: Uuid, expires: Instant) -> Self {
		Self {
			attribute: Attribute::Alive,
			subject: Subject::Peer(peer),
			value: Value::Uuid(boot_id),
			expires,
		}
	}

	pub fn signed_group(sender: WgPublicKey, group: SignedGroupValue, expires: Instant) -> Self {
		Self {
			attribute: Attribute::SignedGroup,
			subject: Subject::Peer(sender),
			value: Value::SignedGroup(group),
			expires,
		}
	}

	pub fn attribute(&self) -> Attribute {
		self.attribute
	}

	pub fn subject(&self) -> &Subject {
		&self.subject
	}

	pub fn value(&self) -> &Value {
		&self.value
	}

	pub fn expires(&self) -> Instant {
		self.expires
	}

	pub fn with_expires(mut self, expires: Instant) -> Self {
		self.expires = expires;
		self
	}

	pub fn is_expired(&self, now: Instant) -> bool {
		self.expires <= now
	}

	pub fn key(&self) -> FactKey {
		FactKey::from_fact(self)
	}

	/// Endpoint carried by an endpoint fact.
	pub fn endpoint_addr(&self) -> Option<SocketAddr> {
		match (&self.value, self.attribute.is_endpoint()) {
			(Value::IpPort(addr), true) => Some(*addr),
			_ => None,
		}
	}

	/// Network carried by an allowed-IPs fact.
	pub fn allowed_net(&self) -> Option<IpNet> {
		match (&self.value, self.attribute.is_allowed_cidr()) {
			(Value::IpNet(net), true) => Some(*net),
			_ => None,
		}
	}

	pub fn boot_id(&self) -> Option<Uuid> {
		match (&self.value, self.attribute) {
			(Value::Uuid(id), Attribute::Alive) => Some(*id),
			_ => None,
		}
	}

	/// Seconds left before expiry, rounded to the nearest second and clamped
	/// to what the wire can carry.
	pub fn ttl(&self, now: Instant) -> u8 {
		let remaining = self.expires.saturating_duration_since(now);
		let secs = (remaining.as_millis() + 500) / 1000;
		secs.min(u8::MAX as u128) as u8
	}

	pub fn encoded_len(&self) -> usize {
		let value_len = self.value.encoded_len();
		FIXED_HEADER_LEN
			+ varint::encoded_len(value_len.min(u32::MAX as usize) as u32)
			+ self.subject.encoded_len()
			+ value_len
	}

	pub fn encode(&self, now: Instant, buf: &mut Vec<u8>) -> Result<()> {
		let subject = self.subject.as_bytes();
		let subject_len = u8::try_from(subject.len())
			.map_err(|_| FactError::InvalidSubjectLength(subject.len()))?;
		let value_len = self.value.encoded_len();
		let wire_value_len = u32::try_from(value_len)
			.ok()
			.filter(|len| *len <= varint::MAX_VARINT)
			.ok_or(FactError::ValueTooLong(value_len))?;

		buf.reserve(self.encoded_len());
		buf.push(self.attribute.as_byte());
		buf.push(self.ttl(now));
		buf.push(subject_len);
		varint::encode(wire_value_len, buf)?;
		buf.extend_from_slice(subject);
		self.value.encode(buf);
		Ok(())
	}

	pub fn to_bytes(&self, now: Instant) -> Result<Vec<u8>> {
		let mut buf = Vec::with_capacity(self.encoded_len());
		self.encode(now, &mut buf)?;
		Ok(buf)
	}

	/// Decodes one fact from the front of `buf`, returning it along with
	/// the unconsumed remainder.
	pub fn decode(buf: &[u8], now: Instant) -> Result<(Fact, &[u8])> {
		if buf.len() < FIXED_HEADER_LEN + 1 {
			return Err(FactError::TruncatedHeader(buf.len()));
		}

		let attribute = Attribute::try_from(buf[0])?;
		let ttl = buf[1];
		let subject_len = buf[2] as usize;
		if subject_len == 0 {
			return Err(FactError::InvalidSubjectLength(0));
		}

		let (value_len, varint_len) = match varint::decode(&buf[FIXED_HEADER_LEN..]) {
			Err(FactError::TruncatedHeader(_)) => return Err(FactError::TruncatedHeader(buf.len())),
			other => other?,
		};
		let value_len = value_len as usize;

		let body = &buf[FIXED_HEADER_LEN + varint_len..];
		let needed = subject_len + value_len;
		if body.len() < needed {
			return Err(FactError::TruncatedBody {
				needed,
				available: body.len(),
			});
		}

		let subject = Subject::decode(attribute, &body[..subject_len])?;
		let value = Value::decode(attribute, &body[subject_len..needed])?;

		let fact = Fact {
			attribute,
			subject,
			value,
			expires: now + Duration::from_secs(ttl as u64),
		};
		Ok((fact, &body[needed..]))
	}
}

impl fmt::Display for Fact {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}={}", self.attribute, self.subject, self.value)
	}
}

/// Collapses facts sharing a key, keeping whichever expires last. The
/// result is ordered by key.
pub fn merge_list(facts: impl IntoIterator<Item = Fact>) -> Vec<Fact> {
	let mut merged: BTreeMap<FactKey, Fact> = BTreeMap::new();
	for fact in facts {
		match merged.get(&fact.key()) {
			Some(existing) if existing.expires >= fact.expires => {}
			_ => {
				merged.insert(fact.key(), fact);
			}
		}
	}
	merged.into_values().collect()
}
