// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::attribute::Attribute;
use crate::fact::Fact;
use crate::subject::Subject;
use loom_wglink_common::WgPublicKey;
use std::fmt;

/// Identity of a fact for deduplication and knowledge tracking. Expiry is
/// never part of the key. Alive facts key on subject alone so that a peer
/// has at most one of them.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactKey {
	attribute: Attribute,
	subject: Subject,
	value: Vec<u8>,
}

impl FactKey {
	pub fn from_fact(fact: &Fact) -> Self {
		let value = if fact.attribute() == Attribute::Alive {
			Vec::new()
		} else {
			let mut buf = Vec::with_capacity(fact.value().encoded_len());
			fact.value().encode(&mut buf);
			buf
		};
		Self {
			attribute: fact.attribute(),
			subject: *fact.subject(),
			value,
		}
	}

	/// Key shared by every alive fact about `peer`.
	pub fn alive(peer: WgPublicKey) -> Self {
		Self {
			attribute: Attribute::Alive,
			subject: Subject::Peer(peer),
			value: Vec::new(),
		}
	}

	pub fn attribute(&self) -> Attribute {
		self.attribute
	}

	pub fn subject(&self) -> &Subject {
		&self.subject
	}
}

impl fmt::Debug for FactKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "FactKey({}:{}/{}B)", self.attribute, self.subject, self.value.len())
	}
}
