// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Facts this node asserts on its own authority each chunk.

use crate::context::LinkContext;
use crate::timing::{FACT_TTL, HANDSHAKE_VALIDITY};
use loom_wglink_common::{
	is_global_unicast, is_link_local, is_router_net, normalize_net, DeviceState, NetInterface,
};
use loom_wglink_fact::Fact;
use std::net::SocketAddr;
use std::time::Instant;

/// Router status: forced by configuration, otherwise whether any
/// non-link-local tunnel address covers a routable network wider than a
/// host.
pub fn is_local_router(ctx: &LinkContext, interfaces: &[NetInterface]) -> bool {
	if let Some(router) = ctx.config.router {
		return router;
	}
	interfaces
		.iter()
		.filter(|i| i.name == ctx.config.iface)
		.flat_map(|i| i.addresses.iter())
		.filter(|net| !is_link_local(net.addr()))
		.any(is_router_net)
}

pub fn collect(
	ctx: &LinkContext,
	state: &DeviceState,
	interfaces: &[NetInterface],
	now: Instant,
) -> Vec<Fact> {
	let expires = now + FACT_TTL;
	let local = ctx.local;
	let mut facts = Vec::new();

	for iface in interfaces {
		if iface.name == ctx.config.iface {
			// what we route
			for net in iface.addresses.iter().filter(|n| !is_link_local(n.addr())) {
				facts.push(Fact::allowed_ips(local, normalize_net(*net), expires));
			}
		} else {
			// where we can be reached
			for net in iface.addresses.iter().filter(|n| is_global_unicast(n.addr())) {
				let endpoint = SocketAddr::new(net.addr(), state.listen_port);
				facts.push(Fact::endpoint(local, endpoint, expires));
			}
		}
	}

	for net in ctx.config.peers.allowed_ips(&local) {
		facts.push(Fact::allowed_ips(local, *net, expires));
	}

	facts.push(Fact::alive(local, ctx.boot_id, expires));

	// Endpoints we have seen work.
	for peer in &state.peers {
		let fresh = peer
			.last_handshake
			.is_some_and(|at| now.saturating_duration_since(at) < HANDSHAKE_VALIDITY);
		if let (true, Some(endpoint)) = (fresh, peer.endpoint) {
			facts.push(Fact::endpoint(peer.public_key, endpoint, expires));
		}
	}

	for (key, config) in ctx.config.peers.iter().filter(|(k, _)| **k != local) {
		facts.push(Fact::membership(*key, expires));
		for net in &config.allowed_ips {
			facts.push(Fact::allowed_ips(*key, *net, expires));
		}
	}

	facts
}
