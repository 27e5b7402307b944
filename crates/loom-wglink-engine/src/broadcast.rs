// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outbound side of the pipeline: per peer, send only the facts it is
//! about to forget, sealed for that peer alone.

use crate::context::{FactChunk, LinkContext};
use crate::error::Result;
use crate::timing::{refresh_window, ALIVE_PERIOD, CHUNK_PERIOD};
use async_trait::async_trait;
use futures::future::join_all;
use loom_wglink_common::{link_local_address, WgPublicKey};
use loom_wglink_fact::{Attribute, Fact, GroupAccumulator, Signer};
use std::io;
use std::net::SocketAddrV6;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace, warn};

/// Where sealed packets go.
#[async_trait]
pub trait PacketSink: Send + Sync {
	async fn send_to(&self, packet: &[u8], peer: &WgPublicKey) -> io::Result<()>;
}

/// Sends to each peer's derived link-local address on the shared port,
/// scoped to the tunnel interface.
#[derive(Debug, Clone)]
pub struct UdpSink {
	socket: Arc<UdpSocket>,
	port: u16,
	scope_id: u32,
}

impl UdpSink {
	pub fn new(socket: Arc<UdpSocket>, port: u16, scope_id: u32) -> Self {
		Self {
			socket,
			port,
			scope_id,
		}
	}
}

#[async_trait]
impl PacketSink for UdpSink {
	async fn send_to(&self, packet: &[u8], peer: &WgPublicKey) -> io::Result<()> {
		let addr = SocketAddrV6::new(link_local_address(peer), self.port, 0, self.scope_id);
		self.socket.send_to(packet, addr).await.map(|_| ())
	}
}

pub struct Broadcaster {
	ctx: Arc<LinkContext>,
	signer: Arc<Signer>,
	sink: Arc<dyn PacketSink>,
}

impl Broadcaster {
	pub fn new(ctx: Arc<LinkContext>, signer: Arc<Signer>, sink: Arc<dyn PacketSink>) -> Self {
		Self { ctx, signer, sink }
	}

	/// Sends one chunk's worth of updates to every fact-exchanging device
	/// peer concurrently. Returns how many packets went out.
	#[instrument(skip_all, fields(facts = chunk.facts.len()))]
	pub async fn broadcast(&self, chunk: &FactChunk) -> usize {
		let Some(state) = self.ctx.device.cached().await else {
			debug!("no device state yet, skipping broadcast");
			return 0;
		};

		let recipients: Vec<WgPublicKey> = state
			.peers
			.iter()
			.map(|p| p.public_key)
			.filter(|k| *k != self.ctx.local && self.ctx.config.peers.is_fact_exchanger(k))
			.collect();

		let results = join_all(recipients.iter().map(|peer| self.send_facts(peer, chunk))).await;

		let mut sent = 0;
		for (peer, result) in recipients.iter().zip(results) {
			match result {
				Ok(packets) => sent += packets,
				Err(e) => warn!(peer = %peer, error = %e, "failed to send facts"),
			}
		}
		sent
	}

	async fn send_facts(&self, peer: &WgPublicKey, chunk: &FactChunk) -> Result<usize> {
		let knowledge = &self.ctx.knowledge;
		let now = chunk.now;
		let mut acc = GroupAccumulator::for_udp(now);
		let mut included: Vec<&Fact> = Vec::new();
		let mut own_alive = None;

		for fact in chunk.facts.iter() {
			if fact.attribute() == Attribute::Alive {
				if fact.subject().peer() == &self.ctx.local {
					own_alive = Some(fact);
				}
				continue;
			}
			if fact.is_expired(now) {
				continue;
			}
			// a peer can learn how others reach it, nothing else about itself
			if fact.subject().peer() == peer && !fact.attribute().is_endpoint() {
				continue;
			}
			if knowledge.peer_needs(peer, fact, refresh_window(), now)
				&& !knowledge.peer_knows(peer, fact, CHUNK_PERIOD)
			{
				acc.add_fact(fact)?;
				included.push(fact);
			}
		}

		if let Some(alive) = own_alive {
			if !knowledge.peer_knows(peer, alive, ALIVE_PERIOD) {
				acc.add_fact(alive)?;
				included.push(alive);
			} else if acc.add_fact_if_room(alive)? {
				included.push(alive);
			}
		}

		if acc.is_empty() {
			return Ok(0);
		}

		let packets = acc.make_signed_groups(&self.signer, peer)?;
		for packet in &packets {
			self.sink.send_to(&packet.to_bytes(now)?, peer).await?;
		}
		for fact in included {
			knowledge.sent(peer, fact);
		}
		trace!(peer = %peer, packets = packets.len(), "sent facts");
		Ok(packets.len())
	}
}

/// Broadcasts every chunk until the chunk stream closes.
pub async fn run(broadcaster: Broadcaster, mut chunks: mpsc::Receiver<FactChunk>) -> Result<()> {
	while let Some(chunk) = chunks.recv().await {
		broadcaster.broadcast(&chunk).await;
	}
	debug!("broadcaster input closed");
	Ok(())
}
