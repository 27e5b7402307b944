// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use ipnet::IpNet;
use loom_wglink_common::{
	parse_net, DeviceConfig, DeviceControl, DeviceError, DevicePeer, DeviceState, PeerUpdate,
	WgPrivateKey, WgPublicKey,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::process::Command;
use tracing::{debug, trace, warn};

/// Device control through the `wg` tool.
#[derive(Debug, Clone)]
pub struct WgCommandDevice {
	program: String,
}

impl WgCommandDevice {
	pub fn new() -> Self {
		Self {
			program: "wg".to_string(),
		}
	}

	pub fn with_program(mut self, program: impl Into<String>) -> Self {
		self.program = program.into();
		self
	}

	async fn run(&self, args: &[String]) -> Result<String, DeviceError> {
		trace!(cmd = %format!("{} {}", self.program, args.join(" ")), "running wg command");

		let output = Command::new(&self.program)
			.args(args)
			.output()
			.await
			.map_err(|e| {
				if e.kind() == std::io::ErrorKind::NotFound {
					warn!(program = %self.program, "wg not found in PATH");
				}
				DeviceError::Io(e)
			})?;

		if output.status.success() {
			return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
		}

		let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
		Err(classify_failure(args.get(1).map(String::as_str).unwrap_or(""), stderr))
	}
}

impl Default for WgCommandDevice {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl DeviceControl for WgCommandDevice {
	async fn device(&self, name: &str) -> Result<DeviceState, DeviceError> {
		let dump = self
			.run(&["show".to_string(), name.to_string(), "dump".to_string()])
			.await?;
		parse_dump(name, &dump, Instant::now(), SystemTime::now())
	}

	async fn configure_device(&self, name: &str, config: DeviceConfig) -> Result<(), DeviceError> {
		// `wg set` replaces allowed-ips wholesale, so additive updates are
		// merged against what the device has now.
		let current = self.device(name).await?;

		for update in &config.peers {
			let existing = current.peer(&update.public_key);
			if existing.is_none() && update.update_only && !update.remove {
				debug!(peer = %update.public_key, "skipping update for absent peer");
				continue;
			}
			let args = set_args(name, update, existing);
			self.run(&args).await?;
		}
		Ok(())
	}
}

fn classify_failure(iface: &str, stderr: String) -> DeviceError {
	if stderr.contains("No such device") || stderr.contains("Unable to access interface") {
		DeviceError::NotFound(iface.to_string())
	} else if stderr.contains("Operation not permitted") || stderr.contains("Permission denied") {
		DeviceError::PermissionDenied(stderr)
	} else {
		DeviceError::Command(stderr)
	}
}

/// Arguments for one `wg set` call applying `update`.
pub fn set_args(name: &str, update: &PeerUpdate, existing: Option<&DevicePeer>) -> Vec<String> {
	let mut args = vec![
		"set".to_string(),
		name.to_string(),
		"peer".to_string(),
		update.public_key.to_base64(),
	];
	if update.remove {
		args.push("remove".to_string());
		return args;
	}

	if let Some(endpoint) = update.endpoint {
		args.push("endpoint".to_string());
		args.push(endpoint.to_string());
	}

	if update.replace_allowed_ips || !update.allowed_ips.is_empty() {
		let mut nets: Vec<IpNet> = if update.replace_allowed_ips {
			Vec::new()
		} else {
			existing.map(|p| p.allowed_ips.clone()).unwrap_or_default()
		};
		for net in &update.allowed_ips {
			if !nets.contains(net) {
				nets.push(*net);
			}
		}
		args.push("allowed-ips".to_string());
		args.push(nets.iter().map(IpNet::to_string).collect::<Vec<_>>().join(","));
	}
	args
}

/// Parses `wg show <iface> dump`. Handshake times are unix seconds and are
/// mapped onto the monotonic clock through the `now` pair.
pub fn parse_dump(
	name: &str,
	dump: &str,
	now: Instant,
	wall_now: SystemTime,
) -> Result<DeviceState, DeviceError> {
	let mut lines = dump.lines().filter(|l| !l.trim().is_empty());
	let header = lines
		.next()
		.ok_or_else(|| DeviceError::Parse("empty dump".to_string()))?;
	let fields: Vec<&str> = header.split('\t').collect();
	if fields.len() < 3 {
		return Err(DeviceError::Parse(format!("bad interface line: {header}")));
	}

	let private_key =
		WgPrivateKey::from_base64(fields[0]).map_err(|e| DeviceError::Parse(e.to_string()))?;
	let public_key = private_key.public_key();
	let listen_port = fields[2]
		.parse()
		.map_err(|_| DeviceError::Parse(format!("bad listen port: {}", fields[2])))?;

	let wall_secs = wall_now
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or_default();

	let mut peers = Vec::new();
	for line in lines {
		let fields: Vec<&str> = line.split('\t').collect();
		if fields.len() < 8 {
			return Err(DeviceError::Parse(format!("bad peer line: {line}")));
		}

		let key = WgPublicKey::from_base64(fields[0]).map_err(|e| DeviceError::Parse(e.to_string()))?;
		let mut peer = DevicePeer::new(key);

		if fields[2] != "(none)" {
			let endpoint: SocketAddr = fields[2]
				.parse()
				.map_err(|_| DeviceError::Parse(format!("bad endpoint: {}", fields[2])))?;
			peer.endpoint = Some(endpoint);
		}

		if fields[3] != "(none)" {
			for net in fields[3].split(',').filter(|s| !s.is_empty()) {
				peer.allowed_ips.push(parse_net(net).map_err(|e| DeviceError::Parse(e.to_string()))?);
			}
		}

		let handshake: u64 = fields[4]
			.parse()
			.map_err(|_| DeviceError::Parse(format!("bad handshake time: {}", fields[4])))?;
		if handshake > 0 {
			peer.last_handshake = handshake_at(now, wall_secs, handshake);
		}

		if let Ok(secs) = fields[7].parse::<u64>() {
			peer.persistent_keepalive = Some(Duration::from_secs(secs));
		}

		peers.push(peer);
	}

	Ok(DeviceState {
		name: name.to_string(),
		private_key,
		public_key,
		listen_port,
		peers,
	})
}

/// Maps a wall-clock handshake time onto the monotonic clock. A handshake
/// too far back to represent counts as never having happened.
fn handshake_at(now: Instant, wall_secs: u64, handshake: u64) -> Option<Instant> {
	now.checked_sub(Duration::from_secs(wall_secs.saturating_sub(handshake)))
}

#[cfg(test)]
mod tests {
	use super::*;
	use loom_wglink_common::{link_local_net, WgKeyPair};

	#[test]
	fn parses_dump() {
		let local = WgKeyPair::generate();
		let a = *WgKeyPair::generate().public_key();
		let b = *WgKeyPair::generate().public_key();
		let dump = format!(
			"{}\t{}\t51820\toff\n\
			 {}\t(none)\t203.0.113.5:51820\t10.0.0.2/32,fe80::1/128\t1700000000\t100\t200\t25\n\
			 {}\t(none)\t(none)\t(none)\t0\t0\t0\toff\n",
			local.private_key().to_base64().as_str(),
			local.public_key(),
			a,
			b,
		);
		let now = Instant::now() + Duration::from_secs(3_600);
		let wall = UNIX_EPOCH + Duration::from_secs(1_700_000_030);

		let state = parse_dump("wg0", &dump, now, wall).unwrap();
		assert_eq!(state.public_key, *local.public_key());
		assert_eq!(state.listen_port, 51820);
		assert_eq!(state.peers.len(), 2);

		let first = state.peer(&a).unwrap();
		assert_eq!(first.endpoint, Some("203.0.113.5:51820".parse().unwrap()));
		assert_eq!(first.allowed_ips.len(), 2);
		assert_eq!(first.last_handshake, Some(now - Duration::from_secs(30)));
		assert_eq!(first.persistent_keepalive, Some(Duration::from_secs(25)));

		let second = state.peer(&b).unwrap();
		assert!(second.endpoint.is_none());
		assert!(second.allowed_ips.is_empty());
		assert!(second.last_handshake.is_none());
	}

	#[test]
	fn unrepresentable_handshake_is_none() {
		let now = Instant::now() + Duration::from_secs(3_600);
		assert_eq!(handshake_at(now, 1_700_000_030, 1_700_000_000), Some(now - Duration::from_secs(30)));
		assert_eq!(handshake_at(now, 1_700_000_000, 1_700_000_030), Some(now));
		assert_eq!(handshake_at(now, u64::MAX, 1), None);
	}

	#[test]
	fn rejects_garbage_dump() {
		let now = Instant::now();
		assert!(parse_dump("wg0", "", now, SystemTime::now()).is_err());
		assert!(parse_dump("wg0", "nonsense", now, SystemTime::now()).is_err());
	}

	#[test]
	fn additive_update_merges_existing() {
		let key = *WgKeyPair::generate().public_key();
		let existing = DevicePeer::new(key).with_allowed_ip(link_local_net(&key));
		let mut update = PeerUpdate::new(key);
		update.allowed_ips = vec!["10.0.0.0/24".parse().unwrap()];

		let args = set_args("wg0", &update, Some(&existing));
		let expected = format!("{},10.0.0.0/24", link_local_net(&key));
		assert_eq!(args[4], "allowed-ips");
		assert_eq!(args[5], expected);
	}

	#[test]
	fn replacement_and_removal() {
		let key = *WgKeyPair::generate().public_key();
		let existing = DevicePeer::new(key).with_allowed_ip("10.0.0.0/24".parse().unwrap());
		let mut update = PeerUpdate::new(key);
		update.replace_allowed_ips = true;
		update.allowed_ips = vec![link_local_net(&key)];
		update.endpoint = Some("[2001:db8::1]:51820".parse().unwrap());

		let args = set_args("wg0", &update, Some(&existing));
		assert_eq!(
			&args[4..],
			&[
				"endpoint".to_string(),
				"[2001:db8::1]:51820".to_string(),
				"allowed-ips".to_string(),
				link_local_net(&key).to_string(),
			]
		);

		let args = set_args("wg0", &PeerUpdate::removal(key), Some(&existing));
		assert_eq!(args.last().map(String::as_str), Some("remove"));
	}

	#[test]
	fn classifies_failures() {
		assert!(matches!(
			classify_failure("wg0", "Unable to access interface: No such device".to_string()),
			DeviceError::NotFound(_)
		));
		assert!(matches!(
			classify_failure("wg0", "Unable to modify interface: Operation not permitted".to_string()),
			DeviceError::PermissionDenied(_)
		));
	}
}
