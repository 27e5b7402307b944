// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::TrustEvaluator;
use loom_wglink_common::{link_local_address, DevicePeer, TrustLevel, WgPublicKey};
use loom_wglink_fact::{Fact, Subject};
use std::collections::HashSet;
use std::net::IpAddr;

/// Any peer already on the device may tell us where peers can be reached,
/// and nothing more.
#[derive(Debug, Clone, Default)]
pub struct KnownPeerTrust {
	addresses: HashSet<IpAddr>,
	keys: HashSet<WgPublicKey>,
}

impl KnownPeerTrust {
	pub fn new(peers: &[DevicePeer]) -> Self {
		Self {
			addresses: peers
				.iter()
				.map(|p| IpAddr::V6(link_local_address(&p.public_key)))
				.collect(),
			keys: peers.iter().map(|p| p.public_key).collect(),
		}
	}
}

impl TrustEvaluator for KnownPeerTrust {
	fn is_known(&self, subject: &Subject) -> bool {
		self.keys.contains(subject.peer())
	}

	fn trust_level(&self, fact: &Fact, source: IpAddr) -> Option<TrustLevel> {
		(fact.attribute().is_endpoint() && self.addresses.contains(&source))
			.then_some(TrustLevel::Endpoint)
	}
}
