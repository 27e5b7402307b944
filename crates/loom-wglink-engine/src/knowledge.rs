// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! What each remote peer is believed to know, and until when.
//!
//! Entries come from two directions: facts a peer sent us (it clearly knows
//! them) and facts we sent it (it probably does). A change in a peer's boot
//! id means it restarted and forgot everything, so its entries are dropped.

use loom_wglink_common::WgPublicKey;
use loom_wglink_fact::{Fact, FactKey};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Knowledge {
	entries: HashMap<(FactKey, WgPublicKey), Instant>,
	boot_ids: HashMap<WgPublicKey, Uuid>,
}

impl Knowledge {
	fn upsert(&mut self, key: FactKey, peer: WgPublicKey, expires: Instant) -> bool {
		match self.entries.get_mut(&(key.clone(), peer)) {
			Some(known) if *known >= expires => false,
			Some(known) => {
				*known = expires;
				true
			}
			None => {
				self.entries.insert((key, peer), expires);
				true
			}
		}
	}

	fn forget(&mut self, peer: &WgPublicKey) -> usize {
		let before = self.entries.len();
		self.entries.retain(|(_, p), _| p != peer);
		before - self.entries.len()
	}
}

#[derive(Debug, Default)]
pub struct PeerKnowledgeSet {
	inner: Mutex<Knowledge>,
}

impl PeerKnowledgeSet {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, Knowledge> {
		self.inner.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Records that `source` told us `fact`. An alive fact about the source
	/// itself carrying a new boot id first wipes everything known about the
	/// source. Returns whether anything new was learned.
	pub fn received(&self, fact: &Fact, source: &WgPublicKey) -> bool {
		let mut k = self.lock();
		if let Some(boot_id) = fact.boot_id() {
			if fact.subject().peer() == source {
				match k.boot_ids.insert(*source, boot_id) {
					Some(previous) if previous != boot_id => {
						let dropped = k.forget(source);
						debug!(peer = %source, %previous, current = %boot_id, dropped, "peer restarted");
					}
					_ => {}
				}
			}
		}
		k.upsert(fact.key(), *source, fact.expires())
	}

	/// Records that we just sent `fact` to `peer`.
	pub fn sent(&self, peer: &WgPublicKey, fact: &Fact) -> bool {
		self.lock().upsert(fact.key(), *peer, fact.expires())
	}

	/// True when `peer` already holds `fact`, or one that expires no more
	/// than `hysteresis` before it.
	pub fn peer_knows(&self, peer: &WgPublicKey, fact: &Fact, hysteresis: Duration) -> bool {
		self
			.lock()
			.entries
			.get(&(fact.key(), *peer))
			.is_some_and(|known| *known + hysteresis >= fact.expires())
	}

	/// True when `peer` has never seen `fact`, or will forget it within
	/// `max_ttl` while `fact` would last longer.
	pub fn peer_needs(&self, peer: &WgPublicKey, fact: &Fact, max_ttl: Duration, now: Instant) -> bool {
		match self.lock().entries.get(&(fact.key(), *peer)) {
			None => true,
			Some(known) => *known < now + max_ttl && fact.expires() > *known,
		}
	}

	/// Whether `peer` told us it is alive, with at least `margin` of that
	/// claim left.
	pub fn peer_alive(&self, peer: &WgPublicKey, now: Instant, margin: Duration) -> bool {
		self.alive_until(peer).is_some_and(|until| until > now + margin)
	}

	pub fn alive_until(&self, peer: &WgPublicKey) -> Option<Instant> {
		self.lock().entries.get(&(FactKey::alive(*peer), *peer)).copied()
	}

	pub fn boot_id(&self, peer: &WgPublicKey) -> Option<Uuid> {
		self.lock().boot_ids.get(peer).copied()
	}

	/// Drops every expired entry, returning how many went.
	pub fn expire(&self, now: Instant) -> usize {
		let mut k = self.lock();
		let before = k.entries.len();
		k.entries.retain(|_, expires| *expires > now);
		before - k.entries.len()
	}

	/// Forgets that `peer` knows our alive fact so the next broadcast sends
	/// it again.
	pub fn force_ping(&self, local: &WgPublicKey, peer: &WgPublicKey) -> bool {
		self
			.lock()
			.entries
			.remove(&(FactKey::alive(*local), *peer))
			.is_some()
	}

	pub fn forget_peer(&self, peer: &WgPublicKey) {
		let mut k = self.lock();
		k.forget(peer);
		k.boot_ids.remove(peer);
	}

	pub fn len(&self) -> usize {
		self.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use loom_wglink_common::WgKeyPair;
	use proptest::prelude::*;

	fn key() -> WgPublicKey {
		*WgKeyPair::generate().public_key()
	}

	const HYSTERESIS: Duration = Duration::from_secs(5);

	#[test]
	fn sent_and_received_both_count() {
		let set = PeerKnowledgeSet::new();
		let now = Instant::now();
		let (a, b, subject) = (key(), key(), key());
		let fact = Fact::membership(subject, now + Duration::from_secs(60));

		assert!(!set.peer_knows(&a, &fact, HYSTERESIS));
		assert!(set.sent(&a, &fact));
		assert!(set.peer_knows(&a, &fact, HYSTERESIS));

		assert!(set.received(&fact, &b));
		assert!(!set.received(&fact, &b));
		assert!(set.peer_knows(&b, &fact, HYSTERESIS));
	}

	#[test]
	fn hysteresis_tolerates_slightly_older_knowledge() {
		let set = PeerKnowledgeSet::new();
		let now = Instant::now();
		let (peer, subject) = (key(), key());
		set.sent(&peer, &Fact::membership(subject, now + Duration::from_secs(60)));

		let slightly_fresher = Fact::membership(subject, now + Duration::from_secs(63));
		let much_fresher = Fact::membership(subject, now + Duration::from_secs(90));
		assert!(set.peer_knows(&peer, &slightly_fresher, HYSTERESIS));
		assert!(!set.peer_knows(&peer, &much_fresher, HYSTERESIS));
	}

	#[test]
	fn peer_needs_refresh_before_lapse() {
		let set = PeerKnowledgeSet::new();
		let now = Instant::now();
		let (peer, subject) = (key(), key());
		let window = Duration::from_secs(225);
		let fresh = Fact::membership(subject, now + Duration::from_secs(255));

		assert!(set.peer_needs(&peer, &fresh, window, now));

		set.sent(&peer, &Fact::membership(subject, now + Duration::from_secs(250)));
		assert!(!set.peer_needs(&peer, &fresh, window, now));

		set.sent(&peer, &Fact::membership(subject, now + Duration::from_secs(100)));
		// upsert never moves expiry backwards
		assert!(!set.peer_needs(&peer, &fresh, window, now));

		let other = key();
		set.sent(&other, &Fact::membership(subject, now + Duration::from_secs(100)));
		assert!(set.peer_needs(&other, &fresh, window, now));
		let stale = Fact::membership(subject, now + Duration::from_secs(50));
		assert!(!set.peer_needs(&other, &stale, window, now));
	}

	#[test]
	fn boot_id_change_resets_peer() {
		let set = PeerKnowledgeSet::new();
		let now = Instant::now();
		let (peer, subject, bystander) = (key(), key(), key());
		let expires = now + Duration::from_secs(60);
		let fact = Fact::membership(subject, expires);

		set.received(&Fact::alive(peer, Uuid::new_v4(), expires), &peer);
		set.sent(&peer, &fact);
		set.sent(&bystander, &fact);
		assert!(set.peer_knows(&peer, &fact, HYSTERESIS));

		let reboot = Uuid::new_v4();
		set.received(&Fact::alive(peer, reboot, expires), &peer);
		assert!(!set.peer_knows(&peer, &fact, HYSTERESIS));
		assert!(set.peer_knows(&bystander, &fact, HYSTERESIS));
		assert_eq!(set.boot_id(&peer), Some(reboot));
		assert!(set.peer_alive(&peer, now, Duration::ZERO));
	}

	#[test]
	fn relayed_alive_does_not_reset() {
		let set = PeerKnowledgeSet::new();
		let now = Instant::now();
		let (peer, relay) = (key(), key());
		let expires = now + Duration::from_secs(60);
		set.received(&Fact::alive(relay, Uuid::new_v4(), expires), &relay);
		let fact = Fact::membership(peer, expires);
		set.sent(&relay, &fact);

		set.received(&Fact::alive(peer, Uuid::new_v4(), expires), &relay);
		assert!(set.peer_knows(&relay, &fact, HYSTERESIS));
	}

	#[test]
	fn alive_margin() {
		let set = PeerKnowledgeSet::new();
		let now = Instant::now();
		let peer = key();
		assert!(!set.peer_alive(&peer, now, Duration::ZERO));
		set.received(&Fact::alive(peer, Uuid::new_v4(), now + Duration::from_secs(10)), &peer);
		assert!(set.peer_alive(&peer, now, Duration::from_secs(5)));
		assert!(!set.peer_alive(&peer, now, Duration::from_secs(10)));
	}

	#[test]
	fn expire_sweeps_old_entries() {
		let set = PeerKnowledgeSet::new();
		let now = Instant::now();
		let peer = key();
		set.sent(&peer, &Fact::membership(key(), now + Duration::from_secs(1)));
		set.sent(&peer, &Fact::membership(key(), now + Duration::from_secs(100)));
		assert_eq!(set.expire(now + Duration::from_secs(2)), 1);
		assert_eq!(set.len(), 1);
	}

	#[test]
	fn force_ping_drops_our_alive_entry() {
		let set = PeerKnowledgeSet::new();
		let now = Instant::now();
		let (local, peer) = (key(), key());
		let alive = Fact::alive(local, Uuid::new_v4(), now + Duration::from_secs(255));
		set.sent(&peer, &alive);
		assert!(set.peer_knows(&peer, &alive, HYSTERESIS));
		assert!(set.force_ping(&local, &peer));
		assert!(!set.peer_knows(&peer, &alive, HYSTERESIS));
		assert!(!set.force_ping(&local, &peer));
	}

	proptest! {
		#[test]
		fn knowledge_is_monotonic(ttls in proptest::collection::vec(0u64..600, 1..20), by_receive in any::<bool>()) {
			let set = PeerKnowledgeSet::new();
			let now = Instant::now();
			let (peer, subject) = (key(), key());
			for ttl in ttls {
				let fact = Fact::membership(subject, now + Duration::from_secs(ttl));
				let knew = set.peer_knows(&peer, &fact, Duration::ZERO);
				if by_receive {
					set.received(&fact, &peer);
				} else {
					set.sent(&peer, &fact);
				}
				prop_assert!(set.peer_knows(&peer, &fact, Duration::ZERO));
				if !knew {
					prop_assert!(!set.peer_needs(&peer, &fact, Duration::ZERO, now));
				}
			}
		}
	}
}
