// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration as read from one source. Every field is optional
//! so that layers can be merged in precedence order.

use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WglinkConfigLayer {
	pub iface: Option<String>,
	pub port: Option<u16>,
	pub router: Option<bool>,
	pub manage_peers: Option<bool>,
	pub chatty: Option<bool>,
	pub debug: Option<bool>,
	pub log_json: Option<bool>,
	pub peers: Option<Vec<PeerEntry>>,
}

/// One `[[peers]]` table, still unvalidated.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PeerEntry {
	pub public_key: String,
	pub name: Option<String>,
	pub trust: Option<String>,
	pub allowed_ips: Vec<String>,
	pub endpoints: Vec<String>,
	pub fact_exchanger: Option<bool>,
	pub basic: Option<bool>,
}

impl WglinkConfigLayer {
	/// Overlays `other` on top of `self`; fields `other` sets win.
	pub fn merge(&mut self, other: WglinkConfigLayer) {
		if other.iface.is_some() {
			self.iface = other.iface;
		}
		if other.port.is_some() {
			self.port = other.port;
		}
		if other.router.is_some() {
			self.router = other.router;
		}
		if other.manage_peers.is_some() {
			self.manage_peers = other.manage_peers;
		}
		if other.chatty.is_some() {
			self.chatty = other.chatty;
		}
		if other.debug.is_some() {
			self.debug = other.debug;
		}
		if other.log_json.is_some() {
			self.log_json = other.log_json;
		}
		if other.peers.is_some() {
			self.peers = other.peers;
		}
	}
}
