// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Statically configured peers, consumed read-only by trust evaluation and
//! reconciliation.

use crate::keys::WgPublicKey;
use crate::trust_level::TrustLevel;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub trust: Option<TrustLevel>,
	#[serde(default)]
	pub allowed_ips: Vec<IpNet>,
	/// `host:port` strings, resolved when an endpoint is needed.
	#[serde(default)]
	pub endpoints: Vec<String>,
	#[serde(default = "default_true")]
	pub fact_exchanger: bool,
	/// Basic peers do not run the daemon; they get configured but never
	/// receive facts.
	#[serde(default)]
	pub basic: bool,
}

fn default_true() -> bool {
	true
}

impl Default for PeerConfig {
	fn default() -> Self {
		Self {
			name: None,
			trust: None,
			allowed_ips: Vec::new(),
			endpoints: Vec::new(),
			fact_exchanger: true,
			basic: false,
		}
	}
}

impl PeerConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	pub fn with_trust(mut self, trust: TrustLevel) -> Self {
		self.trust = Some(trust);
		self
	}

	pub fn with_allowed_ip(mut self, net: IpNet) -> Self {
		self.allowed_ips.push(net);
		self
	}

	pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.endpoints.push(endpoint.into());
		self
	}

	pub fn basic(mut self) -> Self {
		self.basic = true;
		self
	}
}

#[derive(Debug, Clone, Default)]
pub struct Peers {
	peers: HashMap<WgPublicKey, PeerConfig>,
}

impl Peers {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, key: WgPublicKey, config: PeerConfig) -> Option<PeerConfig> {
		self.peers.insert(key, config)
	}

	pub fn with_peer(mut self, key: WgPublicKey, config: PeerConfig) -> Self {
		self.peers.insert(key, config);
		self
	}

	pub fn get(&self, key: &WgPublicKey) -> Option<&PeerConfig> {
		self.peers.get(key)
	}

	pub fn contains(&self, key: &WgPublicKey) -> bool {
		self.peers.contains_key(key)
	}

	pub fn len(&self) -> usize {
		self.peers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.peers.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&WgPublicKey, &PeerConfig)> {
		self.peers.iter()
	}

	/// Configured name, falling back to the base64 key.
	pub fn name(&self, key: &WgPublicKey) -> String {
		self
			.peers
			.get(key)
			.and_then(|p| p.name.clone())
			.unwrap_or_else(|| key.to_base64())
	}

	pub fn trust(&self, key: &WgPublicKey, default: TrustLevel) -> TrustLevel {
		self
			.peers
			.get(key)
			.and_then(|p| p.trust)
			.unwrap_or(default)
	}

	pub fn is_basic(&self, key: &WgPublicKey) -> bool {
		self.peers.get(key).is_some_and(|p| p.basic)
	}

	/// Unknown peers are assumed to run the daemon.
	pub fn is_fact_exchanger(&self, key: &WgPublicKey) -> bool {
		self
			.peers
			.get(key)
			.map(|p| p.fact_exchanger && !p.basic)
			.unwrap_or(true)
	}

	pub fn allowed_ips(&self, key: &WgPublicKey) -> &[IpNet] {
		self
			.peers
			.get(key)
			.map(|p| p.allowed_ips.as_slice())
			.unwrap_or(&[])
	}

	pub fn endpoints(&self, key: &WgPublicKey) -> &[String] {
		self
			.peers
			.get(key)
			.map(|p| p.endpoints.as_slice())
			.unwrap_or(&[])
	}

	/// Peers configured to introduce members into the mesh.
	pub fn membership_sources(&self) -> impl Iterator<Item = &WgPublicKey> {
		self
			.peers
			.iter()
			.filter(|(_, p)| p.trust.is_some_and(|t| t >= TrustLevel::AddPeer))
			.map(|(k, _)| k)
	}

	pub fn has_membership_sources(&self) -> bool {
		self.membership_sources().next().is_some()
	}
}
