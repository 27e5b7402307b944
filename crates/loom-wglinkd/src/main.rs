// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! WireGuard fact-exchange daemon.

use anyhow::Context;
use clap::Parser;
use loom_wglink_common::{link_local_address, DeviceControl};
use loom_wglink_config::{CliOverrides, WglinkConfig};
use loom_wglink_engine::{
	ensure_link_local, LinkConfig, LinkServer, ServerHandle, SystemEnvironment, WgCommandDevice,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exchanges signed peer facts over a WireGuard interface and keeps the
/// interface's peers in line with what trusted peers report.
#[derive(Parser, Debug)]
#[command(name = "loom-wglinkd", version, about)]
struct Args {
	/// WireGuard interface to manage
	#[arg(long)]
	iface: Option<String>,

	/// UDP port for fact exchange (default: device listen port + 1)
	#[arg(long)]
	port: Option<u16>,

	/// Force router mode on or off instead of detecting it
	#[arg(long)]
	router: Option<bool>,

	/// Only update existing peers; never add or remove them
	#[arg(long)]
	no_manage_peers: bool,

	/// Log every received fact
	#[arg(long)]
	chatty: bool,

	/// Raise the default log level to debug
	#[arg(long)]
	debug: bool,

	/// Emit logs as JSON
	#[arg(long)]
	log_json: bool,

	/// Configuration file
	#[arg(long, env = "LOOM_WGLINK_CONFIG")]
	config: Option<PathBuf>,
}

impl From<Args> for CliOverrides {
	fn from(args: Args) -> Self {
		CliOverrides {
			config: args.config,
			iface: args.iface,
			port: args.port,
			router: args.router,
			no_manage_peers: args.no_manage_peers,
			chatty: args.chatty,
			debug: args.debug,
			log_json: args.log_json,
		}
	}
}

fn init_tracing(config: &WglinkConfig) {
	let default_level = if config.debug { "debug" } else { "info" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
	let registry = tracing_subscriber::registry().with(filter);
	if config.log_json {
		registry.with(tracing_subscriber::fmt::layer().json()).init();
	} else {
		registry.with(tracing_subscriber::fmt::layer()).init();
	}
}

fn link_config(config: WglinkConfig) -> LinkConfig {
	LinkConfig {
		iface: config.iface,
		port: config.port,
		router: config.router,
		manage_peers: config.manage_peers,
		chatty: config.chatty,
		peers: config.peers,
	}
}

/// SIGINT and SIGTERM stop the server, SIGUSR1 dumps its state.
fn spawn_signal_handler(handle: ServerHandle) -> std::io::Result<tokio::task::JoinHandle<()>> {
	let mut sigint = signal(SignalKind::interrupt())?;
	let mut sigterm = signal(SignalKind::terminate())?;
	let mut sigusr1 = signal(SignalKind::user_defined1())?;

	Ok(tokio::spawn(async move {
		loop {
			tokio::select! {
				_ = sigint.recv() => {
					tracing::info!("received SIGINT, shutting down");
					handle.stop();
					return;
				}
				_ = sigterm.recv() => {
					tracing::info!("received SIGTERM, shutting down");
					handle.stop();
					return;
				}
				_ = sigusr1.recv() => {
					handle.request_print();
				}
			}
		}
	}))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	let config = loom_wglink_config::load_config(args.into()).context("loading configuration")?;
	init_tracing(&config);

	tracing::info!(
		iface = %config.iface,
		port = ?config.port,
		router = ?config.router,
		manage_peers = config.manage_peers,
		peers = config.peers.len(),
		"starting loom-wglinkd"
	);

	let device = Arc::new(WgCommandDevice::new());
	let state = device
		.device(&config.iface)
		.await
		.with_context(|| format!("reading WireGuard interface {}", config.iface))?;
	ensure_link_local(&config.iface, link_local_address(&state.public_key))
		.await
		.context("assigning overlay address")?;

	let server = LinkServer::bind(link_config(config), device, Arc::new(SystemEnvironment::new()))
		.await
		.context("binding fact socket")?;
	let signals = spawn_signal_handler(server.handle()).context("installing signal handlers")?;

	let result = server.run().await;
	signals.abort();
	result.context("fact exchange stopped")?;

	tracing::info!("loom-wglinkd stopped");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flags_map_onto_overrides() {
		let args = Args::try_parse_from([
			"loom-wglinkd",
			"--iface",
			"wg1",
			"--port",
			"7000",
			"--router",
			"false",
			"--no-manage-peers",
		])
		.unwrap();
		let cli = CliOverrides::from(args);

		assert_eq!(cli.iface.as_deref(), Some("wg1"));
		assert_eq!(cli.port, Some(7000));
		assert_eq!(cli.router, Some(false));
		assert!(cli.no_manage_peers);
		assert!(!cli.chatty);
	}

	#[test]
	fn rejects_bad_port() {
		assert!(Args::try_parse_from(["loom-wglinkd", "--port", "70000"]).is_err());
	}

	#[test]
	fn link_config_carries_resolved_values() {
		let config = WglinkConfig {
			iface: "wg2".to_string(),
			port: Some(4000),
			router: None,
			manage_peers: false,
			chatty: true,
			debug: false,
			log_json: false,
			peers: Default::default(),
		};
		let link = link_config(config);
		assert_eq!(link.iface, "wg2");
		assert_eq!(link.port, Some(4000));
		assert!(!link.manage_peers);
		assert!(link.chatty);
	}
}
