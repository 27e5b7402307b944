// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::context::{FactChunk, LinkContext, ReceivedChunk};
use crate::error::Result;
use crate::local_facts;
use loom_wglink_common::{DevicePeer, NetworkEnvironment, Peers};
use loom_wglink_fact::{merge_list, Attribute, Fact};
use loom_wglink_trust::{
	should_accept, CompositeMode, CompositeTrust, ConfigTrust, KnownPeerTrust, RouteBasedTrust,
	TrustEvaluator,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};

/// Config first, then routers, then anyone already on the device.
pub fn build_trust(peers: &Peers, device_peers: &[DevicePeer]) -> CompositeTrust {
	CompositeTrust::new(CompositeMode::FirstOnly)
		.with(ConfigTrust::new(peers))
		.with(RouteBasedTrust::new(device_peers))
		.with(KnownPeerTrust::new(device_peers))
}

/// Holds the accepted fact set across chunks, folding in trusted received
/// facts and this node's own facts each time.
pub struct FactProcessor {
	ctx: Arc<LinkContext>,
	env: Arc<dyn NetworkEnvironment>,
	current: Vec<Fact>,
}

impl FactProcessor {
	pub fn new(ctx: Arc<LinkContext>, env: Arc<dyn NetworkEnvironment>) -> Self {
		Self {
			ctx,
			env,
			current: Vec::new(),
		}
	}

	pub fn current(&self) -> &[Fact] {
		&self.current
	}

	#[instrument(skip_all, fields(received = chunk.facts.len()))]
	pub async fn process(&mut self, chunk: ReceivedChunk, now: Instant) -> Result<FactChunk> {
		let ctx = &self.ctx;
		let state = ctx.device.refresh().await?;
		let interfaces = match self.env.interfaces().await {
			Ok(interfaces) => interfaces,
			Err(e) => {
				warn!(error = %e, "could not list network interfaces");
				Vec::new()
			}
		};
		let router = local_facts::is_local_router(ctx, &interfaces);
		let trust = build_trust(&ctx.config.peers, &state.peers);

		let mut accepted = Vec::new();
		for received in chunk.facts {
			let fact = received.fact;
			ctx.knowledge.received(&fact, &received.sender);
			if ctx.config.chatty {
				debug!(%fact, source = %received.source, "received fact");
			}

			// liveness lives in the knowledge set only
			if fact.attribute() == Attribute::Alive || fact.is_expired(now) {
				continue;
			}

			let known = fact.subject().peer() == &ctx.local || trust.is_known(fact.subject());
			match trust.trust_level(&fact, received.source.ip()) {
				Some(level) if should_accept(fact.attribute(), known, level) => accepted.push(fact),
				level => trace!(%fact, source = %received.source, ?level, "rejected fact"),
			}
		}

		let own = local_facts::collect(ctx, &state, &interfaces, now);
		let merged = merge_list(self.current.drain(..).chain(accepted).chain(own));
		self.current = merged.into_iter().filter(|f| !f.is_expired(now)).collect();

		let expired = ctx.knowledge.expire(now);
		trace!(expired, facts = self.current.len(), "processed chunk");

		if chunk.print {
			info!(count = self.current.len(), router, "current facts");
			for fact in &self.current {
				info!(%fact, ttl = fact.ttl(now), "fact");
			}
		}

		Ok(FactChunk {
			facts: Arc::new(self.current.clone()),
			now,
			router,
			print: chunk.print,
		})
	}
}

/// Processes chunks until the chunk stream closes, fanning each result
/// out to the broadcaster and the reconciler.
pub async fn run(
	mut processor: FactProcessor,
	mut chunks: mpsc::Receiver<ReceivedChunk>,
	outputs: Vec<mpsc::Sender<FactChunk>>,
) -> Result<()> {
	while let Some(chunk) = chunks.recv().await {
		let processed = processor.process(chunk, Instant::now()).await?;
		let mut delivered = 0;
		for output in &outputs {
			if output.send(processed.clone()).await.is_ok() {
				delivered += 1;
			}
		}
		if delivered == 0 {
			debug!("no fact chunk consumers left");
			break;
		}
	}
	Ok(())
}
