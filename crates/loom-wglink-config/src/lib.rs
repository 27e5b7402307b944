// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the WireGuard fact-exchange daemon.
//!
//! Layers, lowest precedence first:
//! - built-in defaults
//! - a TOML file (`--config`, `LOOM_WGLINK_CONFIG`, or the per-interface
//!   file under the XDG config directory)
//! - `LOOM_WGLINK_*` environment variables
//! - command-line flags

pub mod error;
pub mod layer;
pub mod paths;
pub mod sources;

pub use error::{ConfigError, Result};
pub use layer::{PeerEntry, WglinkConfigLayer};
pub use sources::{
	CliOverrides, CliSource, ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource,
};

use loom_wglink_common::{parse_net, PeerConfig, Peers, TrustLevel, WgPublicKey};
use tracing::debug;

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct WglinkConfig {
	pub iface: String,
	/// `None` means the device listen port plus one.
	pub port: Option<u16>,
	/// `None` means detect from the tunnel interface's addresses.
	pub router: Option<bool>,
	pub manage_peers: bool,
	pub chatty: bool,
	pub debug: bool,
	pub log_json: bool,
	pub peers: Peers,
}

impl WglinkConfig {
	/// Validates a merged layer.
	pub fn from_layer(layer: WglinkConfigLayer) -> Result<Self> {
		let iface = layer.iface.unwrap_or_default();
		if iface.trim().is_empty() {
			return Err(ConfigError::validation("interface name must not be empty"));
		}
		if layer.port == Some(0) {
			return Err(ConfigError::invalid_value("port", "must not be 0"));
		}

		let mut peers = Peers::new();
		for (i, entry) in layer.peers.unwrap_or_default().into_iter().enumerate() {
			let (key, config) = peer_from_entry(i, entry)?;
			if peers.insert(key, config).is_some() {
				return Err(ConfigError::validation(format!("duplicate peer {key}")));
			}
		}

		Ok(Self {
			iface,
			port: layer.port,
			router: layer.router,
			manage_peers: layer.manage_peers.unwrap_or(true),
			chatty: layer.chatty.unwrap_or(false),
			debug: layer.debug.unwrap_or(false),
			log_json: layer.log_json.unwrap_or(false),
			peers,
		})
	}
}

fn peer_from_entry(index: usize, entry: PeerEntry) -> Result<(WgPublicKey, PeerConfig)> {
	let field = |name: &str| format!("peers[{index}].{name}");

	let key = WgPublicKey::from_base64(entry.public_key.trim())
		.map_err(|e| ConfigError::invalid_value(field("public_key"), e.to_string()))?;

	let mut config = PeerConfig::new();
	config.name = entry.name;
	config.trust = entry
		.trust
		.map(|t| t.parse::<TrustLevel>())
		.transpose()
		.map_err(|e| ConfigError::invalid_value(field("trust"), e.to_string()))?;

	for net in &entry.allowed_ips {
		let net = parse_net(net).map_err(|e| ConfigError::invalid_value(field("allowed_ips"), e.to_string()))?;
		config.allowed_ips.push(net);
	}

	for endpoint in &entry.endpoints {
		let valid = endpoint
			.rsplit_once(':')
			.is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
		if !valid {
			return Err(ConfigError::invalid_value(
				field("endpoints"),
				format!("'{endpoint}' is not host:port"),
			));
		}
		config.endpoints.push(endpoint.clone());
	}

	if let Some(fact_exchanger) = entry.fact_exchanger {
		config.fact_exchanger = fact_exchanger;
	}
	config.basic = entry.basic.unwrap_or(false);

	Ok((key, config))
}

/// Merges `sources` in precedence order and validates the result.
pub fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<WglinkConfig> {
	sources.sort_by_key(|s| s.precedence());
	let mut merged = WglinkConfigLayer::default();
	for source in &sources {
		debug!(source = source.name(), "applying config source");
		merged.merge(source.load()?);
	}
	WglinkConfig::from_layer(merged)
}

/// Loads configuration from every layer, given the command-line values.
pub fn load_config(cli: CliOverrides) -> Result<WglinkConfig> {
	load_config_with_env(cli, EnvSource::system())
}

pub fn load_config_with_env(cli: CliOverrides, env: EnvSource) -> Result<WglinkConfig> {
	let file = match cli.config.clone().or_else(|| env.config_path()) {
		Some(path) => Some(TomlSource::new(path).required()),
		None => {
			let iface = cli
				.iface
				.clone()
				.or_else(|| env.iface())
				.unwrap_or_else(|| "wg0".to_string());
			paths::default_config_path(&iface).map(TomlSource::new)
		}
	};

	let mut sources: Vec<Box<dyn ConfigSource>> = vec![Box::new(DefaultsSource)];
	if let Some(file) = file {
		sources.push(Box::new(file));
	}
	sources.push(Box::new(env));
	sources.push(Box::new(CliSource::new(cli)));
	load_from_sources(sources)
}
