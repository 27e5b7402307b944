// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::device::SharedDevice;
use crate::knowledge::PeerKnowledgeSet;
use crate::peer_state::PeerConfigSet;
use loom_wglink_common::{DeviceControl, Peers, TrustLevel, WgPublicKey};
use loom_wglink_fact::Fact;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Engine settings, already resolved from whatever configuration layers
/// the caller uses.
#[derive(Debug, Clone)]
pub struct LinkConfig {
	pub iface: String,
	/// Fact exchange port. Defaults to the device listen port plus one.
	pub port: Option<u16>,
	/// Force router mode on or off. `None` detects it from the tunnel
	/// interface's addresses.
	pub router: Option<bool>,
	/// When false, peers are only updated, never added or removed.
	pub manage_peers: bool,
	/// Log every received fact.
	pub chatty: bool,
	pub peers: Peers,
}

impl LinkConfig {
	pub fn new(iface: impl Into<String>) -> Self {
		Self {
			iface: iface.into(),
			port: None,
			router: None,
			manage_peers: true,
			chatty: false,
			peers: Peers::new(),
		}
	}

	pub fn with_peers(mut self, peers: Peers) -> Self {
		self.peers = peers;
		self
	}

	pub fn with_port(mut self, port: u16) -> Self {
		self.port = Some(port);
		self
	}

	pub fn with_router(mut self, router: bool) -> Self {
		self.router = Some(router);
		self
	}

	pub fn with_manage_peers(mut self, manage_peers: bool) -> Self {
		self.manage_peers = manage_peers;
		self
	}
}

/// State shared by every pipeline stage.
#[derive(Debug)]
pub struct LinkContext {
	pub config: LinkConfig,
	pub local: WgPublicKey,
	pub device: SharedDevice,
	pub knowledge: PeerKnowledgeSet,
	pub peer_states: PeerConfigSet,
	pub boot_id: Uuid,
	pub started: Instant,
}

impl LinkContext {
	pub fn new(
		config: LinkConfig,
		local: WgPublicKey,
		control: Arc<dyn DeviceControl>,
		started: Instant,
	) -> Self {
		let device = SharedDevice::new(config.iface.clone(), control);
		Self {
			config,
			local,
			device,
			knowledge: PeerKnowledgeSet::new(),
			peer_states: PeerConfigSet::new(),
			boot_id: Uuid::new_v4(),
			started,
		}
	}

	/// How much the static configuration trusts this node itself.
	pub fn self_trust(&self) -> TrustLevel {
		self.config.peers.trust(&self.local, TrustLevel::Untrusted)
	}

	/// Nodes that route for others, or that are trusted to set allowed-IPs
	/// themselves, never strip configuration from peers.
	pub fn allow_deconfigure(&self, router: bool) -> bool {
		!router && self.self_trust() < TrustLevel::AllowedIps
	}
}

/// A fact pulled out of a verified signed group.
#[derive(Debug, Clone)]
pub struct ReceivedFact {
	pub fact: Fact,
	pub source: SocketAddr,
	/// The verified signer, whose overlay address is `source`.
	pub sender: WgPublicKey,
}

/// Everything received during one chunk period.
#[derive(Debug, Default)]
pub struct ReceivedChunk {
	pub facts: Vec<ReceivedFact>,
	pub print: bool,
}

/// The accepted fact set after processing one chunk, handed to both the
/// broadcaster and the reconciler.
#[derive(Debug, Clone)]
pub struct FactChunk {
	pub facts: Arc<Vec<Fact>>,
	pub now: Instant,
	/// Whether this node counts as a router for this chunk.
	pub router: bool,
	pub print: bool,
}
