// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use get_if_addrs::{get_if_addrs, IfAddr};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use loom_wglink_common::{DeviceError, NetInterface, NetworkEnvironment};
use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// The host's real interfaces.
#[derive(Debug, Clone, Default)]
pub struct SystemEnvironment;

impl SystemEnvironment {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl NetworkEnvironment for SystemEnvironment {
	async fn interfaces(&self) -> Result<Vec<NetInterface>, DeviceError> {
		let addrs = tokio::task::spawn_blocking(get_if_addrs)
			.await
			.map_err(|e| DeviceError::Command(format!("interface listing task failed: {e}")))??;

		let mut by_name: BTreeMap<String, Vec<IpNet>> = BTreeMap::new();
		for iface in addrs {
			let net = match iface.addr {
				IfAddr::V4(v4) => {
					let prefix = u32::from(v4.netmask).leading_ones() as u8;
					Ipv4Net::new(v4.ip, prefix).ok().map(IpNet::V4)
				}
				IfAddr::V6(v6) => {
					let prefix = u128::from(v6.netmask).leading_ones() as u8;
					Ipv6Net::new(v6.ip, prefix).ok().map(IpNet::V6)
				}
			};
			let entry = by_name.entry(iface.name).or_default();
			if let Some(net) = net {
				entry.push(net);
			}
		}

		Ok(by_name
			.into_iter()
			.map(|(name, addresses)| {
				let index = interface_index(&name);
				NetInterface {
					name,
					index,
					addresses,
				}
			})
			.collect())
	}
}

pub fn interface_index(name: &str) -> Option<u32> {
	nix::net::if_::if_nametoindex(name).ok()
}

/// Assigns `addr/64` to `iface`, replacing any previous assignment of the
/// same address.
#[instrument]
pub async fn ensure_link_local(iface: &str, addr: Ipv6Addr) -> Result<(), DeviceError> {
	let cidr = format!("{addr}/64");
	let output = Command::new("ip")
		.args(["-6", "address", "replace", cidr.as_str(), "dev", iface])
		.output()
		.await?;
	if output.status.success() {
		info!(%cidr, "assigned overlay address");
		return Ok(());
	}
	let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
	debug!(%stderr, "ip address replace failed");
	if stderr.contains("Operation not permitted") {
		Err(DeviceError::PermissionDenied(stderr))
	} else if stderr.contains("Cannot find device") {
		Err(DeviceError::NotFound(iface.to_string()))
	} else {
		Err(DeviceError::Command(stderr))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn lists_loopback() {
		let interfaces = SystemEnvironment::new().interfaces().await.unwrap();
		let has_loopback = interfaces
			.iter()
			.flat_map(|i| i.addresses.iter())
			.any(|net| net.addr().is_loopback());
		assert!(has_loopback || interfaces.is_empty());
	}

	#[test]
	fn missing_interface_has_no_index() {
		assert_eq!(interface_index("definitely-not-an-interface0"), None);
	}
}
