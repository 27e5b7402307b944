// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The narrow interfaces through which the daemon sees the outside world:
//! the WireGuard device's peer table and the host's network interfaces.

use crate::keys::{WgKeyPair, WgPrivateKey, WgPublicKey};
use async_trait::async_trait;
use ipnet::IpNet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
	#[error("device not found: {0}")]
	NotFound(String),

	#[error("permission denied: {0}")]
	PermissionDenied(String),

	#[error("device command failed: {0}")]
	Command(String),

	#[error("could not parse device state: {0}")]
	Parse(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DeviceError>;

/// A peer as currently configured on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePeer {
	pub public_key: WgPublicKey,
	pub endpoint: Option<SocketAddr>,
	pub allowed_ips: Vec<IpNet>,
	pub last_handshake: Option<Instant>,
	pub persistent_keepalive: Option<Duration>,
}

impl DevicePeer {
	pub fn new(public_key: WgPublicKey) -> Self {
		Self {
			public_key,
			endpoint: None,
			allowed_ips: Vec::new(),
			last_handshake: None,
			persistent_keepalive: None,
		}
	}

	pub fn with_endpoint(mut self, endpoint: SocketAddr) -> Self {
		self.endpoint = Some(endpoint);
		self
	}

	pub fn with_allowed_ip(mut self, net: IpNet) -> Self {
		self.allowed_ips.push(net);
		self
	}

	pub fn with_last_handshake(mut self, at: Instant) -> Self {
		self.last_handshake = Some(at);
		self
	}
}

#[derive(Debug, Clone)]
pub struct DeviceState {
	pub name: String,
	pub private_key: WgPrivateKey,
	pub public_key: WgPublicKey,
	pub listen_port: u16,
	pub peers: Vec<DevicePeer>,
}

impl DeviceState {
	pub fn new(name: impl Into<String>, keypair: &WgKeyPair, listen_port: u16) -> Self {
		Self {
			name: name.into(),
			private_key: keypair.private_key().clone(),
			public_key: *keypair.public_key(),
			listen_port,
			peers: Vec::new(),
		}
	}

	pub fn keypair(&self) -> WgKeyPair {
		WgKeyPair::from_private_key(self.private_key.clone())
	}

	pub fn peer(&self, key: &WgPublicKey) -> Option<&DevicePeer> {
		self.peers.iter().find(|p| &p.public_key == key)
	}
}

/// One peer's worth of change. Fields left at their defaults mean "leave
/// as is".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerUpdate {
	pub public_key: WgPublicKey,
	pub remove: bool,
	/// Only touch the peer if it already exists.
	pub update_only: bool,
	pub endpoint: Option<SocketAddr>,
	/// Replace rather than extend the peer's allowed-IPs.
	pub replace_allowed_ips: bool,
	pub allowed_ips: Vec<IpNet>,
}

impl PeerUpdate {
	pub fn new(public_key: WgPublicKey) -> Self {
		Self {
			public_key,
			remove: false,
			update_only: false,
			endpoint: None,
			replace_allowed_ips: false,
			allowed_ips: Vec::new(),
		}
	}

	pub fn removal(public_key: WgPublicKey) -> Self {
		Self {
			remove: true,
			..Self::new(public_key)
		}
	}

	pub fn update_only(mut self) -> Self {
		self.update_only = true;
		self
	}

	/// True when applying this would not change anything.
	pub fn is_noop(&self) -> bool {
		!self.remove && self.endpoint.is_none() && !self.replace_allowed_ips && self.allowed_ips.is_empty()
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConfig {
	pub peers: Vec<PeerUpdate>,
}

impl DeviceConfig {
	pub fn single(update: PeerUpdate) -> Self {
		Self {
			peers: vec![update],
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
	pub name: String,
	pub index: Option<u32>,
	pub addresses: Vec<IpNet>,
}

/// Reads and mutates the WireGuard device's peer table. Every mutation is a
/// complete diff for the peers it names; implementations never merge.
#[async_trait]
pub trait DeviceControl: Send + Sync {
	async fn device(&self, name: &str) -> Result<DeviceState>;

	async fn configure_device(&self, name: &str, config: DeviceConfig) -> Result<()>;
}

#[async_trait]
pub trait NetworkEnvironment: Send + Sync {
	async fn interfaces(&self) -> Result<Vec<NetInterface>>;
}
