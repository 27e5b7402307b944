// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-peer history that decides whether touching a peer's configuration
//! is currently safe: handshake health, liveness and which endpoints have
//! been tried.

use crate::timing::{ENDPOINT_ATTEMPT, HANDSHAKE_VALIDITY};
use loom_wglink_common::{DevicePeer, WgPublicKey};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct PeerConfigState {
	observed: bool,
	last_handshake: Option<Instant>,
	last_healthy: bool,
	alive_since: Option<Instant>,
	alive_until: Option<Instant>,
	last_boot_id: Option<Uuid>,
	last_rotation: Option<Instant>,
	endpoint_last_used: HashMap<SocketAddr, Instant>,
}

impl PeerConfigState {
	pub fn new() -> Self {
		Self::default()
	}

	/// A peer without an endpoint is never healthy. One with a recent
	/// handshake always is. Past that, a handshake timestamp that moved
	/// since the previous observation means one just landed between polls.
	pub fn is_healthy(&self, peer: &DevicePeer, now: Instant) -> bool {
		if peer.endpoint.is_none() {
			return false;
		}
		match peer.last_handshake {
			Some(at) if now.saturating_duration_since(at) < HANDSHAKE_VALIDITY => true,
			current => self.observed && current != self.last_handshake,
		}
	}

	/// Folds one observation of the device peer and its liveness into the
	/// history.
	pub fn update(
		&mut self,
		peer: &DevicePeer,
		alive_until: Option<Instant>,
		boot_id: Option<Uuid>,
		now: Instant,
	) {
		self.last_healthy = self.is_healthy(peer, now);
		self.last_handshake = peer.last_handshake;
		self.observed = true;

		let alive_until = alive_until.filter(|until| *until > now);
		if alive_until.is_some() {
			let rebooted = boot_id.is_some() && self.last_boot_id.is_some() && boot_id != self.last_boot_id;
			if self.alive_since.is_none() || rebooted {
				self.alive_since = Some(now);
			}
		} else {
			self.alive_since = None;
		}
		self.alive_until = alive_until;
		if boot_id.is_some() {
			self.last_boot_id = boot_id;
		}

		if let Some(endpoint) = peer.endpoint {
			self.endpoint_last_used.insert(endpoint, now);
		}
	}

	pub fn healthy(&self) -> bool {
		self.last_healthy
	}

	pub fn last_handshake(&self) -> Option<Instant> {
		self.last_handshake
	}

	pub fn is_alive(&self, now: Instant) -> bool {
		self.alive_until.is_some_and(|until| until > now)
	}

	pub fn alive_for(&self, now: Instant) -> Duration {
		self
			.alive_since
			.map(|since| now.saturating_duration_since(since))
			.unwrap_or_default()
	}

	pub fn still_alive_for(&self, now: Instant) -> Duration {
		self
			.alive_until
			.map(|until| until.saturating_duration_since(now))
			.unwrap_or_default()
	}

	pub fn boot_id(&self) -> Option<Uuid> {
		self.last_boot_id
	}

	/// Rotation waits until the transport itself would have given up on the
	/// current endpoint, counted from the later of the last handshake and
	/// the last rotation.
	pub fn time_for_next_endpoint(&self, now: Instant) -> bool {
		if self.last_healthy {
			return false;
		}
		match self.last_handshake.max(self.last_rotation) {
			None => true,
			Some(since) => now.saturating_duration_since(since) >= ENDPOINT_ATTEMPT,
		}
	}

	/// Picks the least recently used candidate, preferring ones never
	/// tried, and records it as used.
	pub fn next_endpoint(&mut self, candidates: &[SocketAddr], now: Instant) -> Option<SocketAddr> {
		let next = candidates
			.iter()
			.copied()
			.min_by_key(|ep| self.endpoint_last_used.get(ep).copied())?;
		self.endpoint_last_used.insert(next, now);
		self.last_rotation = Some(now);
		Some(next)
	}

	pub fn describe(&self, now: Instant) -> String {
		let handshake = self
			.last_handshake
			.map(|at| format!("{}s ago", now.saturating_duration_since(at).as_secs()))
			.unwrap_or_else(|| "never".to_string());
		format!(
			"healthy={} alive={} alive_for={}s still_alive_for={}s handshake={} endpoints_tried={}",
			self.last_healthy,
			self.is_alive(now),
			self.alive_for(now).as_secs(),
			self.still_alive_for(now).as_secs(),
			handshake,
			self.endpoint_last_used.len(),
		)
	}
}

/// Every peer's [`PeerConfigState`], created on first observation.
#[derive(Debug, Default)]
pub struct PeerConfigSet {
	inner: Mutex<HashMap<WgPublicKey, PeerConfigState>>,
}

impl PeerConfigSet {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<WgPublicKey, PeerConfigState>> {
		self.inner.lock().unwrap_or_else(|e| e.into_inner())
	}

	pub fn get(&self, key: &WgPublicKey) -> Option<PeerConfigState> {
		self.lock().get(key).cloned()
	}

	pub fn update(
		&self,
		peer: &DevicePeer,
		alive_until: Option<Instant>,
		boot_id: Option<Uuid>,
		now: Instant,
	) -> PeerConfigState {
		let mut states = self.lock();
		let state = states.entry(peer.public_key).or_default();
		state.update(peer, alive_until, boot_id, now);
		state.clone()
	}

	pub fn is_healthy(&self, key: &WgPublicKey) -> bool {
		self.lock().get(key).is_some_and(|s| s.healthy())
	}

	pub fn time_for_next_endpoint(&self, key: &WgPublicKey, now: Instant) -> bool {
		self
			.lock()
			.get(key)
			.is_some_and(|s| s.time_for_next_endpoint(now))
	}

	pub fn next_endpoint(
		&self,
		key: &WgPublicKey,
		candidates: &[SocketAddr],
		now: Instant,
	) -> Option<SocketAddr> {
		self
			.lock()
			.entry(*key)
			.or_default()
			.next_endpoint(candidates, now)
	}

	/// Drops state for peers `keep` rejects. Returns how many went.
	pub fn retain(&self, mut keep: impl FnMut(&WgPublicKey) -> bool) -> usize {
		let mut states = self.lock();
		let before = states.len();
		states.retain(|key, _| keep(key));
		before - states.len()
	}

	pub fn remove(&self, key: &WgPublicKey) -> Option<PeerConfigState> {
		self.lock().remove(key)
	}

	pub fn snapshot(&self) -> Vec<(WgPublicKey, PeerConfigState)> {
		let mut all: Vec<_> = self
			.lock()
			.iter()
			.map(|(k, s)| (*k, s.clone()))
			.collect();
		all.sort_by(|a, b| a.0.cmp(&b.0));
		all
	}

	pub fn len(&self) -> usize {
		self.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
