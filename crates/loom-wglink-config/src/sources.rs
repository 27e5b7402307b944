// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: defaults, a TOML file, environment variables and
//! command-line overrides.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::{ConfigError, Result};
use crate::layer::WglinkConfigLayer;

pub const ENV_PREFIX: &str = "LOOM_WGLINK_";

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
	Cli = 100,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<WglinkConfigLayer>;
}

pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<WglinkConfigLayer> {
		Ok(WglinkConfigLayer {
			iface: Some("wg0".to_string()),
			manage_peers: Some(true),
			chatty: Some(false),
			debug: Some(false),
			log_json: Some(false),
			..Default::default()
		})
	}
}

/// TOML file source. An explicitly requested file must exist; the
/// per-interface default is skipped when absent.
pub struct TomlSource {
	path: PathBuf,
	required: bool,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			required: false,
		}
	}

	pub fn required(mut self) -> Self {
		self.required = true;
		self
	}

	pub fn path(&self) -> &PathBuf {
		&self.path
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<WglinkConfigLayer> {
		if !self.required && !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(WglinkConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: WglinkConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!(peers = layer.peers.as_ref().map(Vec::len), "parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: LOOM_WGLINK_<FIELD>
pub struct EnvSource {
	vars: HashMap<String, String>,
}

impl EnvSource {
	/// Snapshot of the process environment.
	pub fn system() -> Self {
		Self::from_vars(std::env::vars().filter(|(k, _)| k.starts_with(ENV_PREFIX)))
	}

	pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
		Self {
			vars: vars.into_iter().collect(),
		}
	}

	fn var(&self, field: &str) -> Option<&str> {
		self
			.vars
			.get(&format!("{ENV_PREFIX}{field}"))
			.map(String::as_str)
			.filter(|s| !s.is_empty())
	}

	fn bool(&self, field: &str) -> Option<bool> {
		self
			.var(field)
			.map(|v| v.eq_ignore_ascii_case("true") || v == "1")
	}

	/// `LOOM_WGLINK_CONFIG`, if set.
	pub fn config_path(&self) -> Option<PathBuf> {
		self.var("CONFIG").map(PathBuf::from)
	}

	/// `LOOM_WGLINK_IFACE`, if set.
	pub fn iface(&self) -> Option<String> {
		self.var("IFACE").map(str::to_string)
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<WglinkConfigLayer> {
		debug!("loading environment variables");
		let port = match self.var("PORT") {
			Some(v) => Some(v.parse().map_err(|_| {
				ConfigError::invalid_value(format!("{ENV_PREFIX}PORT"), format!("invalid u16 value '{v}'"))
			})?),
			None => None,
		};
		// "auto" leaves router detection to the daemon
		let router = match self.var("ROUTER") {
			Some(v) if v.eq_ignore_ascii_case("auto") => None,
			Some(_) => self.bool("ROUTER"),
			None => None,
		};

		Ok(WglinkConfigLayer {
			iface: self.iface(),
			port,
			router,
			manage_peers: self.bool("MANAGE_PEERS"),
			chatty: self.bool("CHATTY"),
			debug: self.bool("DEBUG"),
			log_json: self.bool("LOG_JSON"),
			peers: None,
		})
	}
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
	pub config: Option<PathBuf>,
	pub iface: Option<String>,
	pub port: Option<u16>,
	pub router: Option<bool>,
	pub no_manage_peers: bool,
	pub chatty: bool,
	pub debug: bool,
	pub log_json: bool,
}

pub struct CliSource {
	overrides: CliOverrides,
}

impl CliSource {
	pub fn new(overrides: CliOverrides) -> Self {
		Self { overrides }
	}
}

impl ConfigSource for CliSource {
	fn name(&self) -> &'static str {
		"cli"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Cli
	}

	fn load(&self) -> Result<WglinkConfigLayer> {
		let cli = &self.overrides;
		// flags only ever switch things on
		Ok(WglinkConfigLayer {
			iface: cli.iface.clone(),
			port: cli.port,
			router: cli.router,
			manage_peers: cli.no_manage_peers.then_some(false),
			chatty: cli.chatty.then_some(true),
			debug: cli.debug.then_some(true),
			log_json: cli.log_json.then_some(true),
			peers: None,
		})
	}
}
