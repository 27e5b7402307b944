// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Turns the accepted fact set into device peer changes.
//!
//! Each pass classifies every peer it can see. A peer is *valid* when it is
//! configured, has a membership fact, or is this node. A peer is *local*
//! when the device has it. Valid local peers get their allowed-IPs and
//! endpoint reconciled, valid non-local peers with facts get added, and
//! local peers that are no longer valid are removed, but only once this
//! node can be confident its own fact set is complete.

use crate::context::{FactChunk, LinkContext};
use crate::error::Result;
use crate::timing::{min_alive_for_delete, min_still_alive_for_delete, CHUNK_PERIOD, FACT_TTL};
use futures::future::join_all;
use ipnet::IpNet;
use loom_wglink_common::{
	link_local_net, DeviceConfig, DevicePeer, DeviceState, PeerUpdate, TrustLevel, WgPublicKey,
};
use loom_wglink_fact::{Attribute, Fact};
use loom_wglink_trust::is_router;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

pub struct Reconciler {
	ctx: Arc<LinkContext>,
}

/// Per-pass classification of every peer in view.
struct Plan<'a> {
	facts: BTreeMap<WgPublicKey, Vec<&'a Fact>>,
	local: BTreeMap<WgPublicKey, &'a DevicePeer>,
	valid: HashSet<WgPublicKey>,
	remove: HashSet<WgPublicKey>,
}

impl Reconciler {
	pub fn new(ctx: Arc<LinkContext>) -> Self {
		Self { ctx }
	}

	/// One reconciliation pass. Only a failure to read the device is
	/// returned; per-peer configuration failures are logged and left for
	/// the next pass.
	#[instrument(skip_all, fields(facts = chunk.facts.len(), router = chunk.router))]
	pub async fn reconcile(&self, chunk: &FactChunk) -> Result<()> {
		let ctx = &self.ctx;
		let now = chunk.now;
		let state = ctx.device.refresh().await?;

		for peer in state.peers.iter().filter(|p| p.public_key != ctx.local) {
			let key = &peer.public_key;
			ctx
				.peer_states
				.update(peer, ctx.knowledge.alive_until(key), ctx.knowledge.boot_id(key), now);
		}

		let plan = self.plan(&state, &chunk.facts);

		let trimmed = ctx.peer_states.retain(|key| {
			plan.facts.contains_key(key) || plan.local.contains_key(key) || plan.valid.contains(key)
		});
		if trimmed > 0 {
			debug!(trimmed, "dropped stale peer state");
		}

		let allow_deconfigure = ctx.allow_deconfigure(chunk.router);
		let no_facts = Vec::new();

		let updates = plan
			.local
			.iter()
			.filter(|(key, _)| plan.valid.contains(*key) && **key != ctx.local)
			.map(|(key, peer)| {
				let facts = plan.facts.get(key).unwrap_or(&no_facts);
				self.configure_peer(peer, facts, allow_deconfigure, now)
			});
		let failed = join_all(updates).await.into_iter().filter(|r| r.is_err()).count();
		if failed > 0 {
			warn!(failed, "some peers could not be configured");
		}

		if ctx.config.manage_peers && allow_deconfigure {
			self.add_peers(&plan).await;
		}
		if ctx.config.manage_peers {
			self.delete_peers(&state, &plan, chunk).await;
		}

		if chunk.print {
			self.print_state(now);
		}
		Ok(())
	}

	fn plan<'a>(&self, state: &'a DeviceState, facts: &'a [Fact]) -> Plan<'a> {
		let ctx = &self.ctx;

		let mut by_peer: BTreeMap<WgPublicKey, Vec<&Fact>> = BTreeMap::new();
		for fact in facts {
			by_peer.entry(*fact.subject().peer()).or_default().push(fact);
		}
		let local: BTreeMap<_, _> = state.peers.iter().map(|p| (p.public_key, p)).collect();

		let mut valid: HashSet<WgPublicKey> = ctx.config.peers.iter().map(|(k, _)| *k).collect();
		valid.insert(ctx.local);
		let mut remove = HashSet::new();

		for (key, peer_facts) in &by_peer {
			if valid.contains(key) {
				continue;
			}
			if peer_facts.iter().any(|f| f.attribute() == Attribute::Membership) {
				valid.insert(*key);
			} else if *key != ctx.local {
				remove.insert(*key);
			}
		}
		for key in local.keys() {
			if !valid.contains(key) && !by_peer.contains_key(key) {
				remove.insert(*key);
			}
		}

		Plan {
			facts: by_peer,
			local,
			valid,
			remove,
		}
	}

	/// Brings one device peer in line with what is known about it. Healthy,
	/// live peers get their allowed-IPs from facts and config. Unhealthy ones
	/// are cut back to their overlay address and, once the transport has
	/// given up on the current endpoint, moved to the next candidate.
	#[instrument(skip_all, fields(peer = %peer.public_key))]
	async fn configure_peer(
		&self,
		peer: &DevicePeer,
		facts: &[&Fact],
		allow_deconfigure: bool,
		now: Instant,
	) -> Result<bool> {
		let ctx = &self.ctx;
		let key = peer.public_key;
		let overlay = link_local_net(&key);
		let current: BTreeSet<IpNet> = peer.allowed_ips.iter().copied().collect();
		let healthy = ctx.peer_states.is_healthy(&key);
		let mut update = PeerUpdate::new(key).update_only();

		if healthy {
			let alive = ctx.knowledge.peer_alive(&key, now, CHUNK_PERIOD / 2);
			if alive || ctx.config.peers.is_basic(&key) {
				let mut desired = BTreeSet::from([overlay]);
				desired.extend(facts.iter().filter_map(|f| f.allowed_net()));
				desired.extend(ctx.config.peers.allowed_ips(&key).iter().copied());

				if allow_deconfigure && !current.is_subset(&desired) {
					update.replace_allowed_ips = true;
					update.allowed_ips = desired.into_iter().collect();
				} else {
					update.allowed_ips = desired.difference(&current).copied().collect();
				}
			}
		} else {
			if allow_deconfigure && current != BTreeSet::from([overlay]) {
				info!(dropped = current.len().saturating_sub(1), "restricting unhealthy peer to its overlay address");
				update.replace_allowed_ips = true;
				update.allowed_ips = vec![overlay];
			} else if !current.contains(&overlay) {
				update.allowed_ips = vec![overlay];
			}

			if ctx.peer_states.time_for_next_endpoint(&key, now) {
				let candidates = self.endpoint_candidates(&key, facts).await;
				if let Some(next) = ctx.peer_states.next_endpoint(&key, &candidates, now) {
					if peer.endpoint != Some(next) {
						info!(endpoint = %next, candidates = candidates.len(), "trying next endpoint");
						update.endpoint = Some(next);
					}
					ctx.knowledge.force_ping(&ctx.local, &key);
				}
			}
		}

		if update.is_noop() {
			return Ok(false);
		}
		match ctx.device.configure(DeviceConfig::single(update.clone())).await {
			Ok(()) => {
				debug!(?update, "configured peer");
				Ok(true)
			}
			Err(e) => {
				warn!(?update, error = %e, "failed to configure peer");
				Err(e.into())
			}
		}
	}

	/// Endpoint facts first, then configured endpoints, resolved now.
	async fn endpoint_candidates(&self, key: &WgPublicKey, facts: &[&Fact]) -> Vec<SocketAddr> {
		let mut candidates: Vec<SocketAddr> = facts.iter().filter_map(|f| f.endpoint_addr()).collect();
		for host in self.ctx.config.peers.endpoints(key) {
			match tokio::net::lookup_host(host.as_str()).await {
				Ok(addrs) => candidates.extend(addrs),
				Err(e) => debug!(peer = %key, endpoint = %host, error = %e, "could not resolve endpoint"),
			}
		}
		let mut seen = HashSet::new();
		candidates.retain(|addr| seen.insert(*addr));
		candidates
	}

	async fn add_peers(&self, plan: &Plan<'_>) {
		let ctx = &self.ctx;
		for key in plan.facts.keys() {
			if *key == ctx.local || !plan.valid.contains(key) || plan.local.contains_key(key) {
				continue;
			}
			if plan.remove.contains(key) {
				error!(peer = %key, "bug detected: peer is both valid and marked for removal");
				continue;
			}

			let mut update = PeerUpdate::new(*key);
			update.allowed_ips = vec![link_local_net(key)];
			match ctx.device.configure(DeviceConfig::single(update)).await {
				Ok(()) => info!(peer = %key, name = %ctx.config.peers.name(key), "added peer"),
				Err(e) => warn!(peer = %key, error = %e, "failed to add peer"),
			}
		}
	}

	/// Removes local peers nobody vouches for any more, once this node has
	/// been up long enough and a trusted source is demonstrably complete.
	async fn delete_peers(&self, state: &DeviceState, plan: &Plan<'_>, chunk: &FactChunk) {
		let ctx = &self.ctx;
		let now = chunk.now;
		let automatic = !ctx.config.peers.has_membership_sources();
		let routers: HashSet<WgPublicKey> = state
			.peers
			.iter()
			.filter(|p| is_router(p))
			.map(|p| p.public_key)
			.collect();

		let candidates: Vec<WgPublicKey> = plan
			.remove
			.iter()
			.filter(|k| plan.local.contains_key(*k))
			.filter(|k| !ctx.config.peers.contains(k))
			.filter(|k| !(automatic && routers.contains(*k)))
			.copied()
			.collect();
		if candidates.is_empty() {
			return;
		}

		let uptime = now.saturating_duration_since(ctx.started);
		if uptime < FACT_TTL {
			debug!(candidates = candidates.len(), uptime_s = uptime.as_secs(), "too early to delete peers");
			return;
		}
		if chunk.router || ctx.self_trust() >= TrustLevel::AllowedIps {
			debug!(candidates = candidates.len(), "this node never deletes peers");
			return;
		}

		let sources: Vec<WgPublicKey> = if automatic {
			routers.into_iter().collect()
		} else {
			ctx.config.peers.membership_sources().copied().collect()
		};
		let complete = sources.iter().find(|source| {
			ctx.peer_states.get(source).is_some_and(|s| {
				s.healthy()
					&& s.alive_for(now) >= min_alive_for_delete()
					&& s.still_alive_for(now) > min_still_alive_for_delete()
			})
		});
		let Some(source) = complete else {
			debug!(candidates = candidates.len(), sources = sources.len(), "no trusted source is complete enough to delete peers");
			return;
		};

		for key in candidates {
			match ctx.device.configure(DeviceConfig::single(PeerUpdate::removal(key))).await {
				Ok(()) => {
					info!(peer = %key, source = %source, "removed peer");
					ctx.peer_states.remove(&key);
					ctx.knowledge.forget_peer(&key);
				}
				Err(e) => warn!(peer = %key, error = %e, "failed to remove peer"),
			}
		}
	}

	fn print_state(&self, now: Instant) {
		let ctx = &self.ctx;
		let states = ctx.peer_states.snapshot();
		info!(peers = states.len(), knowledge = ctx.knowledge.len(), "peer state");
		for (key, state) in states {
			info!(peer = %key, name = %ctx.config.peers.name(&key), state = %state.describe(now), "peer");
		}
	}
}

/// Reconciles every chunk until the stream closes. A device read failure
/// ends the loop and, with it, the daemon.
pub async fn run(reconciler: Reconciler, mut chunks: mpsc::Receiver<FactChunk>) -> Result<()> {
	while let Some(chunk) = chunks.recv().await {
		reconciler.reconcile(&chunk).await?;
	}
	debug!("reconciler input closed");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::context::LinkConfig;
	use crate::memory::MemoryDevice;
	use loom_wglink_common::{PeerConfig, Peers, WgKeyPair};
	use std::time::Duration;

	fn key() -> WgPublicKey {
		*WgKeyPair::generate().public_key()
	}

	fn chunk(facts: Vec<Fact>, now: Instant) -> FactChunk {
		FactChunk {
			facts: Arc::new(facts),
			now,
			router: false,
			print: false,
		}
	}

	fn setup(state: DeviceState, config: LinkConfig, started: Instant) -> (Reconciler, Arc<MemoryDevice>) {
		let device = Arc::new(MemoryDevice::new(state.clone()));
		let ctx = Arc::new(LinkContext::new(config, state.public_key, device.clone(), started));
		(Reconciler::new(ctx), device)
	}

	#[tokio::test]
	async fn healthy_live_peer_gets_fact_allowed_ips() {
		let local = WgKeyPair::generate();
		let remote = key();
		let now = Instant::now();
		let mut state = DeviceState::new("wg0", &local, 51820);
		state.peers.push(
			DevicePeer::new(remote)
				.with_endpoint("198.51.100.1:51820".parse().unwrap())
				.with_allowed_ip(link_local_net(&remote))
				.with_last_handshake(now),
		);
		let peers = Peers::new().with_peer(remote, PeerConfig::new());
		let (reconciler, device) = setup(state, LinkConfig::new("wg0").with_peers(peers), now);

		let expires = now + FACT_TTL;
		reconciler
			.ctx
			.knowledge
			.received(&Fact::alive(remote, uuid::Uuid::new_v4(), expires), &remote);
		let net: IpNet = "10.1.0.0/24".parse().unwrap();
		reconciler
			.reconcile(&chunk(vec![Fact::allowed_ips(remote, net, expires)], now))
			.await
			.unwrap();

		let calls = device.calls();
		assert_eq!(calls.len(), 1);
		let update = &calls[0].peers[0];
		assert!(update.update_only);
		assert!(!update.replace_allowed_ips);
		assert_eq!(update.allowed_ips, vec![net]);
	}

	#[tokio::test]
	async fn unhealthy_peer_is_restricted_to_overlay() {
		let local = WgKeyPair::generate();
		let remote = key();
		let now = Instant::now();
		let mut state = DeviceState::new("wg0", &local, 51820);
		state.peers.push(
			DevicePeer::new(remote)
				.with_allowed_ip(link_local_net(&remote))
				.with_allowed_ip("10.1.0.0/24".parse().unwrap()),
		);
		let peers = Peers::new().with_peer(remote, PeerConfig::new());
		let (reconciler, device) = setup(state, LinkConfig::new("wg0").with_peers(peers), now);

		reconciler.reconcile(&chunk(Vec::new(), now)).await.unwrap();

		let calls = device.calls();
		assert_eq!(calls.len(), 1);
		let update = &calls[0].peers[0];
		assert!(update.replace_allowed_ips);
		assert_eq!(update.allowed_ips, vec![link_local_net(&remote)]);
	}

	#[tokio::test]
	async fn non_member_facts_do_not_add_peers() {
		let local = WgKeyPair::generate();
		let stranger = key();
		let now = Instant::now();
		let (reconciler, device) = setup(
			DeviceState::new("wg0", &local, 51820),
			LinkConfig::new("wg0"),
			now,
		);

		let fact = Fact::endpoint(stranger, "198.51.100.9:51820".parse().unwrap(), now + FACT_TTL);
		reconciler.reconcile(&chunk(vec![fact], now)).await.unwrap();
		assert!(device.calls().is_empty());
	}

	#[tokio::test]
	async fn unmanaged_mode_never_adds_or_removes() {
		let local = WgKeyPair::generate();
		let member = key();
		let orphan = key();
		let started = Instant::now();
		let now = started + Duration::from_secs(1_000);
		let mut state = DeviceState::new("wg0", &local, 51820);
		state
			.peers
			.push(DevicePeer::new(orphan).with_allowed_ip(link_local_net(&orphan)));
		let (reconciler, device) = setup(
			state,
			LinkConfig::new("wg0").with_manage_peers(false),
			started,
		);

		let fact = Fact::membership(member, now + FACT_TTL);
		reconciler.reconcile(&chunk(vec![fact], now)).await.unwrap();
		assert!(device.calls().is_empty());
	}

	fn live_peer(key: WgPublicKey, endpoint: &str, now: Instant) -> DevicePeer {
		DevicePeer::new(key)
			.with_endpoint(endpoint.parse().unwrap())
			.with_allowed_ip(link_local_net(&key))
			.with_last_handshake(now)
	}

	/// Runs one pass per chunk for a full fact lifetime and a little more,
	/// keeping the handshakes of `sources` fresh and, when `alive`, their
	/// alive facts too. Returns every peer removed along the way.
	async fn drive_past_startup(
		reconciler: &Reconciler,
		device: &MemoryDevice,
		sources: &[WgPublicKey],
		alive: bool,
		started: Instant,
	) -> Vec<WgPublicKey> {
		let boot = uuid::Uuid::new_v4();
		let mut now = started;
		let end = started + FACT_TTL + CHUNK_PERIOD * 2;
		while now <= end {
			for source in sources {
				device.set_handshake(source, now);
				if alive {
					reconciler
						.ctx
						.knowledge
						.received(&Fact::alive(*source, boot, now + FACT_TTL), source);
				}
			}
			reconciler.reconcile(&chunk(Vec::new(), now)).await.unwrap();
			now += CHUNK_PERIOD;
		}

		device
			.calls()
			.into_iter()
			.flat_map(|c| c.peers)
			.filter(|u| u.remove)
			.map(|u| u.public_key)
			.collect()
	}

	#[tokio::test]
	async fn deletes_once_membership_source_is_complete() {
		let local = WgKeyPair::generate();
		let source = key();
		let orphan = key();
		let started = Instant::now();
		let mut state = DeviceState::new("wg0", &local, 51820);
		state.peers.push(live_peer(source, "198.51.100.1:51820", started));
		state
			.peers
			.push(DevicePeer::new(orphan).with_allowed_ip(link_local_net(&orphan)));
		let peers = Peers::new().with_peer(source, PeerConfig::new().with_trust(TrustLevel::AddPeer));
		let (reconciler, device) = setup(state, LinkConfig::new("wg0").with_peers(peers), started);

		let removed = drive_past_startup(&reconciler, &device, &[source], true, started).await;
		assert_eq!(removed, vec![orphan]);
		assert!(reconciler.ctx.peer_states.get(&orphan).is_none());
	}

	#[tokio::test]
	async fn configured_peers_are_never_deleted() {
		let local = WgKeyPair::generate();
		let source = key();
		let pinned = key();
		let orphan = key();
		let started = Instant::now();
		let mut state = DeviceState::new("wg0", &local, 51820);
		state.peers.push(live_peer(source, "198.51.100.1:51820", started));
		for peer in [pinned, orphan] {
			state
				.peers
				.push(DevicePeer::new(peer).with_allowed_ip(link_local_net(&peer)));
		}
		let peers = Peers::new()
			.with_peer(source, PeerConfig::new().with_trust(TrustLevel::AddPeer))
			.with_peer(pinned, PeerConfig::new().with_name("pinned"));
		let (reconciler, device) = setup(state, LinkConfig::new("wg0").with_peers(peers), started);

		let removed = drive_past_startup(&reconciler, &device, &[source], true, started).await;
		assert_eq!(removed, vec![orphan]);
		assert!(device.state().peer(&pinned).is_some());
	}

	fn router_and_orphan(started: Instant) -> (DeviceState, WgPublicKey, WgPublicKey) {
		let local = WgKeyPair::generate();
		let router = key();
		let orphan = key();
		let mut state = DeviceState::new("wg0", &local, 51820);
		state.peers.push(
			live_peer(router, "198.51.100.1:51820", started).with_allowed_ip("10.50.0.0/16".parse().unwrap()),
		);
		state
			.peers
			.push(DevicePeer::new(orphan).with_allowed_ip(link_local_net(&orphan)));
		(state, router, orphan)
	}

	#[tokio::test]
	async fn automatic_mode_keeps_routers_and_trusts_them_for_deletion() {
		let started = Instant::now();
		let (state, router, orphan) = router_and_orphan(started);
		let (reconciler, device) = setup(state, LinkConfig::new("wg0"), started);

		let removed = drive_past_startup(&reconciler, &device, &[router], true, started).await;
		assert_eq!(removed, vec![orphan]);
		assert!(device.state().peer(&router).is_some());
	}

	#[tokio::test]
	async fn automatic_mode_waits_for_a_router_alive_long_enough() {
		let started = Instant::now();
		let (state, router, orphan) = router_and_orphan(started);
		let (reconciler, device) = setup(state, LinkConfig::new("wg0"), started);

		// healthy handshakes alone do not make the router's fact set complete
		let removed = drive_past_startup(&reconciler, &device, &[router], false, started).await;
		assert!(removed.is_empty());
		assert!(device.state().peer(&orphan).is_some());

		// alive from here on, but not yet for a full fact lifetime
		device.clear_calls();
		let resumed = started + FACT_TTL * 2;
		let boot = uuid::Uuid::new_v4();
		let mut now = resumed;
		while now < resumed + FACT_TTL {
			device.set_handshake(&router, now);
			reconciler
				.ctx
				.knowledge
				.received(&Fact::alive(router, boot, now + FACT_TTL), &router);
			reconciler.reconcile(&chunk(Vec::new(), now)).await.unwrap();
			now += CHUNK_PERIOD;
		}
		assert!(device.calls().iter().all(|c| c.peers.iter().all(|u| !u.remove)));

		// one more chunk past the threshold and the orphan goes
		let now = resumed + min_alive_for_delete();
		device.set_handshake(&router, now);
		reconciler
			.ctx
			.knowledge
			.received(&Fact::alive(router, boot, now + FACT_TTL), &router);
		reconciler.reconcile(&chunk(Vec::new(), now)).await.unwrap();
		assert!(device.state().peer(&orphan).is_none());
	}

	#[tokio::test]
	async fn one_failing_peer_does_not_block_the_others() {
		let local = WgKeyPair::generate();
		let broken = key();
		let working = key();
		let now = Instant::now();
		let peers = Peers::new()
			.with_peer(broken, PeerConfig::new())
			.with_peer(working, PeerConfig::new());
		let (reconciler, device) = setup(
			DeviceState::new("wg0", &local, 51820),
			LinkConfig::new("wg0").with_peers(peers),
			now,
		);
		device.set_peers(vec![
			live_peer(broken, "198.51.100.1:51820", now),
			live_peer(working, "198.51.100.2:51820", now),
		]);

		let expires = now + FACT_TTL;
		let broken_net: IpNet = "10.1.0.0/24".parse().unwrap();
		let working_net: IpNet = "10.2.0.0/24".parse().unwrap();
		for peer in [broken, working] {
			reconciler
				.ctx
				.knowledge
				.received(&Fact::alive(peer, uuid::Uuid::new_v4(), expires), &peer);
		}
		let facts = vec![
			Fact::allowed_ips(broken, broken_net, expires),
			Fact::allowed_ips(working, working_net, expires),
		];

		device.fail_configure(broken, true);
		reconciler.reconcile(&chunk(facts.clone(), now)).await.unwrap();
		let calls = device.calls();
		assert_eq!(calls.len(), 1);
		assert_eq!(calls[0].peers[0].public_key, working);
		assert_eq!(calls[0].peers[0].allowed_ips, vec![working_net]);

		// the next pass retries what failed and leaves the rest alone
		device.clear_calls();
		device.fail_configure(broken, false);
		reconciler
			.reconcile(&chunk(facts, now + CHUNK_PERIOD))
			.await
			.unwrap();
		let calls = device.calls();
		assert_eq!(calls.len(), 1);
		assert_eq!(calls[0].peers[0].public_key, broken);
		assert_eq!(calls[0].peers[0].allowed_ips, vec![broken_net]);
	}
}
