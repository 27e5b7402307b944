// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::TrustEvaluator;
use loom_wglink_common::{link_local_address, Peers, TrustLevel, WgPublicKey};
use loom_wglink_fact::{Fact, Subject};
use std::collections::HashMap;
use std::net::IpAddr;

/// Trust as written in the static peer table, applied only when the fact
/// arrives from that peer's own overlay address.
#[derive(Debug, Clone)]
pub struct ConfigTrust {
	levels: HashMap<IpAddr, TrustLevel>,
	known: Vec<WgPublicKey>,
}

impl ConfigTrust {
	pub fn new(peers: &Peers) -> Self {
		let levels = peers
			.iter()
			.filter_map(|(key, config)| {
				config
					.trust
					.map(|level| (IpAddr::V6(link_local_address(key)), level))
			})
			.collect();
		let known = peers.iter().map(|(key, _)| *key).collect();
		Self { levels, known }
	}
}

impl TrustEvaluator for ConfigTrust {
	fn is_known(&self, subject: &Subject) -> bool {
		self.known.contains(subject.peer())
	}

	fn trust_level(&self, _fact: &Fact, source: IpAddr) -> Option<TrustLevel> {
		self.levels.get(&source).copied()
	}
}
