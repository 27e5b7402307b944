// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Overlay addressing.
//!
//! Every peer is reachable inside the tunnel on a deterministic IPv6
//! link-local address computed from its public key, so no allocator or
//! coordinator is needed to know where to send facts.

use crate::keys::WgPublicKey;
use ipnet::{IpNet, Ipv4Net};
use sha2::{Digest, Sha256};
use std::net::{IpAddr, Ipv6Addr};
use thiserror::Error;

const LINK_LOCAL_BASE: u128 = 0xfe80_0000_0000_0000_0000_0000_0000_0000;
const LINK_LOCAL_MASK: u128 = 0xffc0_0000_0000_0000_0000_0000_0000_0000;

#[derive(Error, Debug)]
pub enum IpError {
	#[error("invalid address: {0}")]
	InvalidAddress(String),

	#[error("invalid network: {0}")]
	InvalidNetwork(String),
}

pub type Result<T> = std::result::Result<T, IpError>;

/// The overlay link-local address for `key`: `fe80::/64` followed by the
/// first 8 bytes of SHA-256 over the key.
pub fn link_local_address(key: &WgPublicKey) -> Ipv6Addr {
	let digest = Sha256::digest(key.as_bytes());
	let mut octets = [0u8; 16];
	octets[0] = 0xfe;
	octets[1] = 0x80;
	octets[8..].copy_from_slice(&digest[..8]);
	Ipv6Addr::from(octets)
}

/// Host route for [`link_local_address`], the one allowed-IP every peer keeps.
pub fn link_local_net(key: &WgPublicKey) -> IpNet {
	IpNet::from(IpAddr::V6(link_local_address(key)))
}

pub fn is_link_local(addr: IpAddr) -> bool {
	match normalize_ip(addr) {
		IpAddr::V4(v4) => v4.is_link_local(),
		IpAddr::V6(v6) => (u128::from(v6) & LINK_LOCAL_MASK) == LINK_LOCAL_BASE,
	}
}

/// Collapses IPv4-mapped IPv6 addresses down to plain IPv4.
pub fn normalize_ip(addr: IpAddr) -> IpAddr {
	match addr {
		IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
			Some(v4) => IpAddr::V4(v4),
			None => IpAddr::V6(v6),
		},
		v4 => v4,
	}
}

pub fn normalize_net(net: IpNet) -> IpNet {
	match net {
		IpNet::V6(v6) => match v6.addr().to_ipv4_mapped() {
			Some(v4) if v6.prefix_len() >= 96 => Ipv4Net::new(v4, v6.prefix_len() - 96)
				.map(|n| IpNet::V4(n.trunc()))
				.unwrap_or(net),
			_ => net.trunc(),
		},
		v4 => v4.trunc(),
	}
}

/// Global unicast in the sense the routing layer cares about: not loopback,
/// not link-local, not multicast, not unspecified, not broadcast. Private
/// (RFC 1918 / ULA) ranges count as routable.
pub fn is_global_unicast(addr: IpAddr) -> bool {
	match normalize_ip(addr) {
		IpAddr::V4(v4) => {
			!(v4.is_unspecified()
				|| v4.is_loopback()
				|| v4.is_link_local()
				|| v4.is_multicast()
				|| v4.is_broadcast())
		}
		IpAddr::V6(v6) => {
			!(v6.is_unspecified()
				|| v6.is_loopback()
				|| v6.is_multicast()
				|| is_link_local(IpAddr::V6(v6)))
		}
	}
}

/// A network wider than a single host whose base address is routable. Peers
/// holding one of these in their allowed-IPs are forwarding for someone else.
pub fn is_router_net(net: &IpNet) -> bool {
	net.prefix_len() < net.max_prefix_len() && is_global_unicast(net.addr())
}

pub fn parse_net(s: &str) -> Result<IpNet> {
	let s = s.trim();
	if let Ok(net) = s.parse::<IpNet>() {
		return Ok(normalize_net(net));
	}
	s.parse::<IpAddr>()
		.map(|ip| normalize_net(IpNet::from(ip)))
		.map_err(|_| IpError::InvalidNetwork(s.to_string()))
}

pub fn parse_ip(s: &str) -> Result<IpAddr> {
	s.trim()
		.parse::<IpAddr>()
		.map(normalize_ip)
		.map_err(|_| IpError::InvalidAddress(s.to_string()))
}
