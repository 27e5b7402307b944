// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::broadcast::{self, Broadcaster, UdpSink};
use crate::chunker;
use crate::context::{LinkConfig, LinkContext};
use crate::error::{EngineError, Result};
use crate::processor::{self, FactProcessor};
use crate::reader;
use crate::reconcile::{self, Reconciler};
use crate::timing::CHUNK_PERIOD;
use loom_wglink_common::{link_local_address, DeviceControl, NetworkEnvironment};
use loom_wglink_fact::Signer;
use std::net::SocketAddrV6;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

const FACT_QUEUE: usize = 256;

/// Control surface for a running [`LinkServer`].
#[derive(Debug, Clone)]
pub struct ServerHandle {
	cancel: CancellationToken,
	print_tx: mpsc::Sender<()>,
}

impl ServerHandle {
	/// Stops the packet reader; the rest of the pipeline drains behind it.
	pub fn stop(&self) {
		self.cancel.cancel();
	}

	/// Asks every stage to log its state on the next chunk.
	pub fn request_print(&self) {
		if self.print_tx.try_send(()).is_err() {
			warn!("state dump already pending");
		}
	}
}

/// The fact exchange pipeline bound to one WireGuard interface.
pub struct LinkServer {
	ctx: Arc<LinkContext>,
	env: Arc<dyn NetworkEnvironment>,
	socket: Arc<UdpSocket>,
	signer: Arc<Signer>,
	port: u16,
	scope_id: u32,
	cancel: CancellationToken,
	print_tx: mpsc::Sender<()>,
	print_rx: mpsc::Receiver<()>,
}

impl LinkServer {
	/// Reads the device once, then binds the fact socket on this node's
	/// overlay address.
	#[instrument(skip_all, fields(iface = %config.iface))]
	pub async fn bind(
		config: LinkConfig,
		device: Arc<dyn DeviceControl>,
		env: Arc<dyn NetworkEnvironment>,
	) -> Result<Self> {
		let state = device.device(&config.iface).await?;
		let port = match config.port {
			Some(port) => port,
			None => state
				.listen_port
				.checked_add(1)
				.ok_or_else(|| EngineError::Stage(format!("no port above {}", state.listen_port)))?,
		};

		let scope_id = env
			.interfaces()
			.await?
			.into_iter()
			.find(|i| i.name == config.iface)
			.and_then(|i| i.index)
			.ok_or_else(|| EngineError::NoInterfaceIndex(config.iface.clone()))?;

		let addr = SocketAddrV6::new(link_local_address(&state.public_key), port, 0, scope_id);
		let socket = UdpSocket::bind(addr).await?;
		Self::with_socket(config, device, env, socket, scope_id).await
	}

	/// Builds the server around a socket the caller has already bound. Peers
	/// are sent to on the socket's own port in the given link scope.
	pub async fn with_socket(
		config: LinkConfig,
		device: Arc<dyn DeviceControl>,
		env: Arc<dyn NetworkEnvironment>,
		socket: UdpSocket,
		scope_id: u32,
	) -> Result<Self> {
		let state = device.device(&config.iface).await?;
		let local = state.public_key;
		let addr = socket.local_addr()?;
		info!(%addr, peer = %local, "fact socket bound");

		let signer = Arc::new(Signer::new(state.keypair()));
		let ctx = Arc::new(LinkContext::new(config, local, device, Instant::now()));
		let (print_tx, print_rx) = mpsc::channel(1);

		Ok(Self {
			ctx,
			env,
			socket: Arc::new(socket),
			signer,
			port: addr.port(),
			scope_id,
			cancel: CancellationToken::new(),
			print_tx,
			print_rx,
		})
	}

	pub fn context(&self) -> &Arc<LinkContext> {
		&self.ctx
	}

	pub fn handle(&self) -> ServerHandle {
		ServerHandle {
			cancel: self.cancel.clone(),
			print_tx: self.print_tx.clone(),
		}
	}

	/// Runs every stage until the handle stops the server or a stage fails.
	/// The first failure cancels the rest and is returned.
	pub async fn run(self) -> Result<()> {
		let (fact_tx, fact_rx) = mpsc::channel(FACT_QUEUE);
		let (chunk_tx, chunk_rx) = mpsc::channel(1);
		let (broadcast_tx, broadcast_rx) = mpsc::channel(1);
		let (reconcile_tx, reconcile_rx) = mpsc::channel(1);

		let sink = Arc::new(UdpSink::new(self.socket.clone(), self.port, self.scope_id));
		let broadcaster = Broadcaster::new(self.ctx.clone(), self.signer.clone(), sink);
		let fact_processor = FactProcessor::new(self.ctx.clone(), self.env.clone());
		let reconciler = Reconciler::new(self.ctx.clone());
		let print_rx = self.print_rx;

		let mut tasks: JoinSet<(&'static str, Result<()>)> = JoinSet::new();
		tasks.spawn({
			let cancel = self.cancel.clone();
			let fut = reader::run(self.socket.clone(), self.signer.clone(), fact_tx, cancel);
			async move { ("reader", fut.await) }
		});
		tasks.spawn(async move {
			(
				"chunker",
				chunker::run(fact_rx, print_rx, chunk_tx, CHUNK_PERIOD).await,
			)
		});
		tasks.spawn(async move {
			(
				"processor",
				processor::run(fact_processor, chunk_rx, vec![broadcast_tx, reconcile_tx]).await,
			)
		});
		tasks.spawn(async move { ("broadcaster", broadcast::run(broadcaster, broadcast_rx).await) });
		tasks.spawn(async move { ("reconciler", reconcile::run(reconciler, reconcile_rx).await) });

		let mut first_error = None;
		while let Some(joined) = tasks.join_next().await {
			let failure = match joined {
				Ok((stage, Ok(()))) => {
					info!(stage, "stage finished");
					None
				}
				Ok((stage, Err(e))) => {
					error!(stage, error = %e, "stage failed");
					Some(e)
				}
				Err(e) => {
					error!(error = %e, "stage panicked or was aborted");
					Some(EngineError::Stage(e.to_string()))
				}
			};
			if let Some(e) = failure {
				self.cancel.cancel();
				first_error.get_or_insert(e);
			}
		}

		match first_error {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::{MemoryDevice, MemoryEnvironment};
	use loom_wglink_common::{DeviceState, WgKeyPair};
	use std::time::Duration;

	async fn server(device: Arc<MemoryDevice>) -> LinkServer {
		let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		LinkServer::with_socket(
			LinkConfig::new("wg0"),
			device,
			Arc::new(MemoryEnvironment::new(Vec::new())),
			socket,
			0,
		)
		.await
		.unwrap()
	}

	#[tokio::test]
	async fn device_read_failure_stops_every_stage() {
		let keys = WgKeyPair::generate();
		let device = Arc::new(MemoryDevice::new(DeviceState::new("wg0", &keys, 51820)));
		let server = server(device.clone()).await;
		assert_eq!(server.context().local, *keys.public_key());

		device.fail_reads(true);
		let result = tokio::time::timeout(Duration::from_secs(10), server.run())
			.await
			.expect("server did not shut down");
		assert!(matches!(result, Err(EngineError::Device(_))));
	}

	#[tokio::test]
	async fn stop_ends_a_healthy_server() {
		let keys = WgKeyPair::generate();
		let device = Arc::new(MemoryDevice::new(DeviceState::new("wg0", &keys, 51820)));
		let server = server(device).await;
		let handle = server.handle();

		let task = tokio::spawn(server.run());
		handle.stop();
		let result = tokio::time::timeout(Duration::from_secs(10), task)
			.await
			.expect("server did not shut down")
			.unwrap();
		assert!(result.is_ok());
	}
}
