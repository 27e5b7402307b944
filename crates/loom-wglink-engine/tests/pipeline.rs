// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Two nodes wired together without sockets: one node's broadcaster feeds
//! the other's unpack, process and reconcile stages.

use async_trait::async_trait;
use loom_wglink_common::{
	link_local_address, link_local_net, DevicePeer, DeviceState, PeerConfig, Peers, TrustLevel,
	WgKeyPair, WgPublicKey,
};
use loom_wglink_engine::{
	unpack_packet, Broadcaster, FactProcessor, LinkConfig, LinkContext, MemoryDevice,
	MemoryEnvironment, PacketSink, ReceivedChunk, Reconciler,
};
use loom_wglink_fact::{Fact, Signer};
use std::io;
use std::net::{SocketAddr, SocketAddrV6};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Wire {
	packets: Mutex<Vec<(WgPublicKey, Vec<u8>)>>,
}

#[async_trait]
impl PacketSink for Wire {
	async fn send_to(&self, packet: &[u8], peer: &WgPublicKey) -> io::Result<()> {
		self.packets.lock().unwrap().push((*peer, packet.to_vec()));
		Ok(())
	}
}

struct Node {
	keypair: WgKeyPair,
	ctx: Arc<LinkContext>,
	device: Arc<MemoryDevice>,
	processor: FactProcessor,
	reconciler: Reconciler,
}

fn node(keypair: WgKeyPair, device_peers: Vec<DevicePeer>, peers: Peers, started: Instant) -> Node {
	let mut state = DeviceState::new("wg0", &keypair, 51820);
	state.peers = device_peers;
	let device = Arc::new(MemoryDevice::new(state));
	let ctx = Arc::new(LinkContext::new(
		LinkConfig::new("wg0").with_peers(peers),
		*keypair.public_key(),
		device.clone(),
		started,
	));
	let env = Arc::new(MemoryEnvironment::new(Vec::new()));
	Node {
		processor: FactProcessor::new(ctx.clone(), env),
		reconciler: Reconciler::new(ctx.clone()),
		keypair,
		ctx,
		device,
	}
}

#[tokio::test]
async fn hub_introduces_member_to_spoke() {
	let now = Instant::now() + Duration::from_secs(10_000);
	let hub_keys = WgKeyPair::generate();
	let spoke_keys = WgKeyPair::generate();
	let member = *WgKeyPair::generate().public_key();
	let hub_key = *hub_keys.public_key();
	let spoke_key = *spoke_keys.public_key();

	// the hub knows the member from its config and has the spoke on its device
	let hub_peers = Peers::new()
		.with_peer(member, PeerConfig::new().with_name("member"))
		.with_peer(spoke_key, PeerConfig::new());
	let mut hub = node(
		hub_keys,
		vec![DevicePeer::new(spoke_key).with_allowed_ip(link_local_net(&spoke_key))],
		hub_peers,
		now,
	);

	// the spoke trusts the hub to introduce members
	let spoke_peers = Peers::new().with_peer(hub_key, PeerConfig::new().with_trust(TrustLevel::AddPeer));
	let mut spoke = node(
		spoke_keys,
		vec![DevicePeer::new(hub_key)
			.with_endpoint("198.51.100.1:51820".parse().unwrap())
			.with_allowed_ip(link_local_net(&hub_key))
			.with_last_handshake(now)],
		spoke_peers,
		now,
	);

	let hub_chunk = hub.processor.process(ReceivedChunk::default(), now).await.unwrap();
	let wire = Arc::new(Wire::default());
	let broadcaster = Broadcaster::new(
		hub.ctx.clone(),
		Arc::new(Signer::new(hub.keypair.clone())),
		wire.clone(),
	);
	assert!(broadcaster.broadcast(&hub_chunk).await > 0);

	let spoke_signer = Signer::new(spoke.keypair.clone());
	let source = SocketAddr::V6(SocketAddrV6::new(link_local_address(&hub_key), 51821, 0, 0));
	let mut received = Vec::new();
	for (recipient, packet) in wire.packets.lock().unwrap().iter() {
		assert_eq!(*recipient, spoke_key);
		received.extend(unpack_packet(packet, source, &spoke_signer, now).unwrap());
	}
	assert!(received.iter().any(|r| r.fact.subject().peer() == &member));

	let spoke_chunk = spoke
		.processor
		.process(
			ReceivedChunk {
				facts: received,
				print: false,
			},
			now,
		)
		.await
		.unwrap();
	assert!(spoke.ctx.knowledge.peer_alive(&hub_key, now, Duration::ZERO));

	spoke.reconciler.reconcile(&spoke_chunk).await.unwrap();
	let added = spoke.device.state();
	let member_peer = added.peer(&member).unwrap();
	assert_eq!(member_peer.allowed_ips, vec![link_local_net(&member)]);
	assert_eq!(spoke.device.calls().len(), 1);
	assert!(hub.device.calls().is_empty());
}

#[tokio::test]
async fn facts_from_untrusted_node_are_ignored() {
	let now = Instant::now() + Duration::from_secs(10_000);
	let rogue_keys = WgKeyPair::generate();
	let victim_keys = WgKeyPair::generate();
	let rogue_key = *rogue_keys.public_key();
	let victim_key = *victim_keys.public_key();
	let intruder = *WgKeyPair::generate().public_key();

	let rogue = node(
		rogue_keys.clone(),
		vec![DevicePeer::new(victim_key)],
		Peers::new(),
		now,
	);
	let mut victim = node(victim_keys.clone(), vec![DevicePeer::new(rogue_key)], Peers::new(), now);

	let wire = Arc::new(Wire::default());
	let broadcaster = Broadcaster::new(rogue.ctx.clone(), Arc::new(Signer::new(rogue_keys)), wire.clone());
	let chunk = loom_wglink_engine::FactChunk {
		facts: Arc::new(vec![
			Fact::membership(intruder, now + Duration::from_secs(200)),
			Fact::allowed_ips(intruder, "0.0.0.0/0".parse().unwrap(), now + Duration::from_secs(200)),
		]),
		now,
		router: false,
		print: false,
	};
	rogue.ctx.device.refresh().await.unwrap();
	assert_eq!(broadcaster.broadcast(&chunk).await, 1);

	let signer = Signer::new(victim_keys);
	let source = SocketAddr::V6(SocketAddrV6::new(link_local_address(&rogue_key), 51821, 0, 0));
	let packets = wire.packets.lock().unwrap().clone();
	let received = unpack_packet(&packets[0].1, source, &signer, now).unwrap();

	let processed = victim
		.processor
		.process(
			ReceivedChunk {
				facts: received,
				print: false,
			},
			now,
		)
		.await
		.unwrap();
	assert!(!processed.facts.iter().any(|f| f.subject().peer() == &intruder));

	victim.reconciler.reconcile(&processed).await.unwrap();
	assert!(victim.device.state().peer(&intruder).is_none());
}
