// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory device and environment, used by tests and dry runs.

use async_trait::async_trait;
use loom_wglink_common::{
	DeviceConfig, DeviceControl, DeviceError, DevicePeer, DeviceState, NetInterface,
	NetworkEnvironment, WgPublicKey,
};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

#[derive(Debug)]
struct Inner {
	state: DeviceState,
	calls: Vec<DeviceConfig>,
	fail_reads: bool,
	fail_configure: HashSet<WgPublicKey>,
}

/// A device that applies configuration to its own state and records every
/// call it receives.
#[derive(Debug)]
pub struct MemoryDevice {
	inner: Mutex<Inner>,
}

impl MemoryDevice {
	pub fn new(state: DeviceState) -> Self {
		Self {
			inner: Mutex::new(Inner {
				state,
				calls: Vec::new(),
				fail_reads: false,
				fail_configure: HashSet::new(),
			}),
		}
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(|e| e.into_inner())
	}

	pub fn state(&self) -> DeviceState {
		self.lock().state.clone()
	}

	pub fn calls(&self) -> Vec<DeviceConfig> {
		self.lock().calls.clone()
	}

	pub fn clear_calls(&self) {
		self.lock().calls.clear();
	}

	pub fn set_peers(&self, peers: Vec<DevicePeer>) {
		self.lock().state.peers = peers;
	}

	/// Pretends a handshake with `key` completed at `at`.
	pub fn set_handshake(&self, key: &WgPublicKey, at: Instant) {
		let mut inner = self.lock();
		if let Some(peer) = inner.state.peers.iter_mut().find(|p| &p.public_key == key) {
			peer.last_handshake = Some(at);
		}
	}

	/// Makes every subsequent read fail, as if the interface went away.
	pub fn fail_reads(&self, fail: bool) {
		self.lock().fail_reads = fail;
	}

	/// Makes any configuration touching `key` fail without applying
	/// anything.
	pub fn fail_configure(&self, key: WgPublicKey, fail: bool) {
		let mut inner = self.lock();
		if fail {
			inner.fail_configure.insert(key);
		} else {
			inner.fail_configure.remove(&key);
		}
	}
}

#[async_trait]
impl DeviceControl for MemoryDevice {
	async fn device(&self, name: &str) -> Result<DeviceState, DeviceError> {
		let inner = self.lock();
		if inner.fail_reads || inner.state.name != name {
			return Err(DeviceError::NotFound(name.to_string()));
		}
		Ok(inner.state.clone())
	}

	async fn configure_device(&self, name: &str, config: DeviceConfig) -> Result<(), DeviceError> {
		let mut inner = self.lock();
		if inner.state.name != name {
			return Err(DeviceError::NotFound(name.to_string()));
		}
		if let Some(update) = config
			.peers
			.iter()
			.find(|u| inner.fail_configure.contains(&u.public_key))
		{
			return Err(DeviceError::Command(format!(
				"configuring {} rejected",
				update.public_key
			)));
		}

		for update in &config.peers {
			let peers = &mut inner.state.peers;
			let existing = peers.iter().position(|p| p.public_key == update.public_key);
			if update.remove {
				if let Some(i) = existing {
					peers.remove(i);
				}
				continue;
			}

			let peer = match existing {
				Some(i) => &mut peers[i],
				None if update.update_only => continue,
				None => {
					peers.push(DevicePeer::new(update.public_key));
					let last = peers.len() - 1;
					&mut peers[last]
				}
			};
			if let Some(endpoint) = update.endpoint {
				peer.endpoint = Some(endpoint);
			}
			if update.replace_allowed_ips {
				peer.allowed_ips.clear();
			}
			for net in &update.allowed_ips {
				if !peer.allowed_ips.contains(net) {
					peer.allowed_ips.push(*net);
				}
			}
		}

		inner.calls.push(config);
		Ok(())
	}
}

/// A fixed list of interfaces.
#[derive(Debug, Default)]
pub struct MemoryEnvironment {
	interfaces: Mutex<Vec<NetInterface>>,
}

impl MemoryEnvironment {
	pub fn new(interfaces: Vec<NetInterface>) -> Self {
		Self {
			interfaces: Mutex::new(interfaces),
		}
	}

	pub fn set_interfaces(&self, interfaces: Vec<NetInterface>) {
		*self.interfaces.lock().unwrap_or_else(|e| e.into_inner()) = interfaces;
	}
}

#[async_trait]
impl NetworkEnvironment for MemoryEnvironment {
	async fn interfaces(&self) -> Result<Vec<NetInterface>, DeviceError> {
		Ok(self.interfaces.lock().unwrap_or_else(|e| e.into_inner()).clone())
	}
}
