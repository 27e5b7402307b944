// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::context::ReceivedFact;
use crate::error::Result;
use async_trait::async_trait;
use loom_wglink_common::{link_local_address, WgPublicKey};
use loom_wglink_fact::{Attribute, Fact, FactError, Signer, SignerError, Value};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Largest datagram we bother reading.
const MAX_PACKET: usize = 65_535;

const MAX_RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum PacketError {
	#[error("malformed packet: {0}")]
	Malformed(#[from] FactError),

	#[error("{0} trailing bytes after fact")]
	TrailingBytes(usize),

	#[error("top-level {0} fact is not a signed group")]
	NotSignedGroup(Attribute),

	#[error("packet from {addr} claims to be from {claimed}")]
	WrongSource { addr: IpAddr, claimed: WgPublicKey },

	#[error("signed group failed verification: {0}")]
	Verification(#[from] SignerError),
}

impl PacketError {
	/// Authentication failures are worth a warning; garbage is not.
	pub fn is_auth_failure(&self) -> bool {
		matches!(
			self,
			PacketError::WrongSource { .. } | PacketError::Verification(_)
		)
	}
}

/// Decodes one datagram. Only a signed group from the sender's own overlay
/// address that verifies against its key yields any facts.
pub fn unpack_packet(
	packet: &[u8],
	source: SocketAddr,
	signer: &Signer,
	now: Instant,
) -> std::result::Result<Vec<ReceivedFact>, PacketError> {
	let (fact, rest) = Fact::decode(packet, now)?;
	if !rest.is_empty() {
		return Err(PacketError::TrailingBytes(rest.len()));
	}

	let Value::SignedGroup(group) = fact.value() else {
		return Err(PacketError::NotSignedGroup(fact.attribute()));
	};

	let sender = *fact.subject().peer();
	if source.ip() != IpAddr::V6(link_local_address(&sender)) {
		return Err(PacketError::WrongSource {
			addr: source.ip(),
			claimed: sender,
		});
	}

	signer.verify_from(&group.nonce, &group.tag, &group.inner, &sender)?;

	Ok(group
		.parse_inner(now)?
		.into_iter()
		.map(|fact| ReceivedFact {
			fact,
			source,
			sender,
		})
		.collect())
}

/// Where datagrams come from.
#[async_trait]
pub trait PacketSource: Send + Sync {
	async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

#[async_trait]
impl PacketSource for UdpSocket {
	async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
		UdpSocket::recv_from(self, buf).await
	}
}

/// Delay before the next receive after `failures` consecutive errors. The
/// first retry is immediate.
fn receive_backoff(failures: u32) -> Duration {
	if failures <= 1 {
		return Duration::ZERO;
	}
	let millis = 10u64.saturating_mul(1 << (failures - 2).min(7));
	Duration::from_millis(millis).min(MAX_RECEIVE_BACKOFF)
}

/// Reads datagrams until cancelled or until nobody wants the facts,
/// forwarding every verified inner fact. Receive errors are logged and
/// retried.
#[instrument(skip_all)]
pub async fn run(
	source: Arc<dyn PacketSource>,
	signer: Arc<Signer>,
	tx: mpsc::Sender<ReceivedFact>,
	cancel: CancellationToken,
) -> Result<()> {
	let mut buf = vec![0u8; MAX_PACKET];
	let mut failures: u32 = 0;

	loop {
		let received = tokio::select! {
			biased;

			_ = cancel.cancelled() => {
				info!("packet reader cancelled");
				return Ok(());
			}

			received = source.recv_from(&mut buf) => received,
		};

		let (len, addr) = match received {
			Ok(received) => {
				failures = 0;
				received
			}
			Err(e) => {
				failures = failures.saturating_add(1);
				let backoff = receive_backoff(failures);
				warn!(error = %e, failures, backoff_ms = backoff.as_millis() as u64, "receive failed");
				if !backoff.is_zero() {
					tokio::select! {
						biased;

						_ = cancel.cancelled() => {
							info!("packet reader cancelled");
							return Ok(());
						}

						_ = tokio::time::sleep(backoff) => {}
					}
				}
				continue;
			}
		};

		trace!(source = %addr, len, "received packet");
		match unpack_packet(&buf[..len], addr, &signer, Instant::now()) {
			Ok(facts) => {
				for fact in facts {
					if tx.send(fact).await.is_err() {
						debug!("fact receiver closed");
						return Ok(());
					}
				}
			}
			Err(e) if e.is_auth_failure() => warn!(source = %addr, error = %e, "rejected packet"),
			Err(e) => debug!(source = %addr, error = %e, "dropped packet"),
		}
	}
}
