// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{FactError, Result};
use crate::fact::Fact;
use crate::signer::Signer;
use crate::value::SignedGroupValue;
use loom_wglink_common::WgPublicKey;
use std::time::Instant;
use tracing::trace;

/// Largest UDP payload that avoids fragmentation on any sane path.
pub const UDP_MAX_SAFE_PAYLOAD: usize = 1232;

/// Bytes a signed-group fact adds around its inner facts: fixed header,
/// two-byte length, sender key, nonce and tag.
pub const SIGNED_GROUP_OVERHEAD: usize = 3 + 2 + 32 + 24 + 16;

pub const MAX_GROUP_LEN: usize = UDP_MAX_SAFE_PAYLOAD - SIGNED_GROUP_OVERHEAD;

/// Packs serialized facts into groups of at most `max_len` bytes, one
/// signed group per packet.
#[derive(Debug)]
pub struct GroupAccumulator {
	max_len: usize,
	now: Instant,
	groups: Vec<Vec<u8>>,
}

impl GroupAccumulator {
	/// `now` is the reference point for the TTLs written into each fact.
	pub fn new(max_len: usize, now: Instant) -> Self {
		Self {
			max_len,
			now,
			groups: Vec::new(),
		}
	}

	pub fn for_udp(now: Instant) -> Self {
		Self::new(MAX_GROUP_LEN, now)
	}

	pub fn is_empty(&self) -> bool {
		self.groups.iter().all(|g| g.is_empty())
	}

	pub fn groups(&self) -> &[Vec<u8>] {
		&self.groups
	}

	/// Appends to the current group, starting a fresh one when the fact
	/// would not fit.
	pub fn add_fact(&mut self, fact: &Fact) -> Result<()> {
		let bytes = fact.to_bytes(self.now)?;
		if bytes.len() > self.max_len {
			return Err(FactError::FactTooLarge {
				size: bytes.len(),
				max: self.max_len,
			});
		}

		match self.groups.last_mut() {
			Some(current) if current.len() + bytes.len() <= self.max_len => {
				current.extend_from_slice(&bytes);
			}
			_ => self.groups.push(bytes),
		}
		Ok(())
	}

	/// Appends only if the fact fits in the current group. Never starts a
	/// new group, so it never costs an extra packet.
	pub fn add_fact_if_room(&mut self, fact: &Fact) -> Result<bool> {
		let bytes = fact.to_bytes(self.now)?;
		match self.groups.last_mut() {
			Some(current) if current.len() + bytes.len() <= self.max_len => {
				current.extend_from_slice(&bytes);
				Ok(true)
			}
			_ => Ok(false),
		}
	}

	/// One signed-group fact per non-empty group, already expired since
	/// only the inner facts carry a meaningful TTL.
	pub fn make_signed_groups(&self, signer: &Signer, recipient: &WgPublicKey) -> Result<Vec<Fact>> {
		let mut out = Vec::with_capacity(self.groups.len());
		for group in self.groups.iter().filter(|g| !g.is_empty()) {
			let (nonce, tag) = signer.sign_for(group, recipient)?;
			trace!(recipient = %recipient, len = group.len(), "sealed fact group");
			out.push(Fact::signed_group(
				*signer.public_key(),
				SignedGroupValue::new(nonce, tag, group.clone()),
				self.now,
			));
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::Value;
	use loom_wglink_common::WgKeyPair;
	use proptest::prelude::*;
	use std::time::Duration;

	fn key() -> WgPublicKey {
		*WgKeyPair::generate().public_key()
	}

	#[test]
	fn overhead_matches_a_real_signed_group() {
		let now = Instant::now();
		let signer = Signer::new(WgKeyPair::generate());
		let recipient = key();
		let mut acc = GroupAccumulator::for_udp(now);
		while acc.groups().len() < 2 {
			acc.add_fact(&Fact::membership(key(), now + Duration::from_secs(60)))
				.unwrap();
		}
		for group in acc.make_signed_groups(&signer, &recipient).unwrap() {
			assert!(group.to_bytes(now).unwrap().len() <= UDP_MAX_SAFE_PAYLOAD);
		}
	}

	#[test]
	fn add_fact_if_room_needs_an_open_group() {
		let now = Instant::now();
		let mut acc = GroupAccumulator::for_udp(now);
		let fact = Fact::membership(key(), now);
		assert!(!acc.add_fact_if_room(&fact).unwrap());
		assert!(acc.is_empty());

		acc.add_fact(&fact).unwrap();
		assert!(acc.add_fact_if_room(&fact).unwrap());
		assert_eq!(acc.groups().len(), 1);
	}

	#[test]
	fn add_fact_if_room_refuses_to_overflow() {
		let now = Instant::now();
		let fact = Fact::membership(key(), now);
		let one = fact.encoded_len();
		let mut acc = GroupAccumulator::new(one * 2, now);
		acc.add_fact(&fact).unwrap();
		assert!(acc.add_fact_if_room(&fact).unwrap());
		assert!(!acc.add_fact_if_room(&fact).unwrap());
		assert_eq!(acc.groups().len(), 1);
	}

	#[test]
	fn oversized_fact_is_rejected() {
		let now = Instant::now();
		let mut acc = GroupAccumulator::new(10, now);
		assert!(matches!(
			acc.add_fact(&Fact::membership(key(), now)),
			Err(FactError::FactTooLarge { .. })
		));
	}

	#[test]
	fn signed_groups_verify_and_unpack() {
		let now = Instant::now();
		let alice = Signer::new(WgKeyPair::generate());
		let bob = Signer::new(WgKeyPair::generate());
		let subject = key();
		let expires = now + Duration::from_secs(100);

		let mut acc = GroupAccumulator::for_udp(now);
		acc.add_fact(&Fact::membership(subject, expires)).unwrap();
		acc.add_fact(&Fact::endpoint(subject, "192.0.2.1:51820".parse().unwrap(), expires))
			.unwrap();

		let groups = acc.make_signed_groups(&alice, bob.public_key()).unwrap();
		assert_eq!(groups.len(), 1);
		let group = &groups[0];
		assert_eq!(group.subject().peer(), alice.public_key());
		assert!(group.is_expired(now));

		let Value::SignedGroup(sg) = group.value() else {
			panic!("expected signed group");
		};
		bob.verify_from(&sg.nonce, &sg.tag, &sg.inner, alice.public_key())
			.unwrap();
		let inner = sg.parse_inner(now).unwrap();
		assert_eq!(inner.len(), 2);
		assert_eq!(inner[0].subject().peer(), &subject);
	}

	#[test]
	fn nested_groups_are_rejected() {
		let now = Instant::now();
		let alice = Signer::new(WgKeyPair::generate());
		let mut inner = GroupAccumulator::for_udp(now);
		inner.add_fact(&Fact::membership(key(), now)).unwrap();
		let nested = inner.make_signed_groups(&alice, &key()).unwrap();

		let mut outer = GroupAccumulator::for_udp(now);
		outer.add_fact(&nested[0]).unwrap();
		let wrapped = outer.make_signed_groups(&alice, &key()).unwrap();
		let Value::SignedGroup(sg) = wrapped[0].value() else {
			panic!("expected signed group");
		};
		assert!(matches!(
			sg.parse_inner(now),
			Err(FactError::NestedSignedGroup)
		));
	}

	proptest! {
		#[test]
		fn groups_never_exceed_bound(count in 1usize..200, max_len in 40usize..2000) {
			let now = Instant::now();
			let mut acc = GroupAccumulator::new(max_len, now);
			let fact = Fact::membership(key(), now);
			for _ in 0..count {
				let _ = acc.add_fact(&fact);
				let before = acc.groups().len();
				let _ = acc.add_fact_if_room(&fact);
				prop_assert_eq!(acc.groups().len(), before);
			}
			for group in acc.groups() {
				prop_assert!(group.len() <= max_len);
			}
		}
	}
}
