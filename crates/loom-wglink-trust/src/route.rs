// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::TrustEvaluator;
use loom_wglink_common::{is_router_net, link_local_address, DevicePeer, TrustLevel, WgPublicKey};
use loom_wglink_fact::{Fact, Subject};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

/// Treats any device peer routing a wider network as a router and lets it
/// introduce peers. Built from a device snapshot, so router status follows
/// whatever the device says at the time.
#[derive(Debug, Clone, Default)]
pub struct RouteBasedTrust {
	routers: HashSet<IpAddr>,
	known: HashMap<WgPublicKey, bool>,
}

impl RouteBasedTrust {
	pub fn new(peers: &[DevicePeer]) -> Self {
		let mut routers = HashSet::new();
		let mut known = HashMap::new();
		for peer in peers {
			let router = is_router(peer);
			if router {
				routers.insert(IpAddr::V6(link_local_address(&peer.public_key)));
			}
			known.insert(peer.public_key, router);
		}
		Self { routers, known }
	}

	pub fn is_router(&self, key: &WgPublicKey) -> bool {
		self.known.get(key).copied().unwrap_or(false)
	}

	pub fn routers(&self) -> impl Iterator<Item = &WgPublicKey> {
		self.known.iter().filter(|(_, r)| **r).map(|(k, _)| k)
	}
}

pub fn is_router(peer: &DevicePeer) -> bool {
	peer.allowed_ips.iter().any(is_router_net)
}

impl TrustEvaluator for RouteBasedTrust {
	fn is_known(&self, subject: &Subject) -> bool {
		self.known.contains_key(subject.peer())
	}

	fn trust_level(&self, _fact: &Fact, source: IpAddr) -> Option<TrustLevel> {
		self.routers.contains(&source).then_some(TrustLevel::AddPeer)
	}
}
