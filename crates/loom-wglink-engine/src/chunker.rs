// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::context::{ReceivedChunk, ReceivedFact};
use crate::error::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, instrument};

/// Batches received facts into one chunk per `period`. A print request
/// flushes early and marks the chunk so later stages dump their state.
/// Ends when the fact stream closes, after passing on whatever was still
/// pending.
#[instrument(skip_all, fields(period_ms = period.as_millis() as u64))]
pub async fn run(
	mut facts: mpsc::Receiver<ReceivedFact>,
	mut print_requests: mpsc::Receiver<()>,
	chunks: mpsc::Sender<ReceivedChunk>,
	period: Duration,
) -> Result<()> {
	let mut ticker = tokio::time::interval(period);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
	let mut pending = ReceivedChunk::default();

	loop {
		tokio::select! {
			biased;

			_ = ticker.tick() => {}

			Some(()) = print_requests.recv() => {
				pending.print = true;
			}

			received = facts.recv() => match received {
				Some(fact) => {
					pending.facts.push(fact);
					continue;
				}
				None => {
					debug!(pending = pending.facts.len(), "fact stream closed");
					if (!pending.facts.is_empty() || pending.print) && chunks.send(pending).await.is_err() {
						debug!("chunk receiver closed");
					}
					return Ok(());
				}
			},
		}

		while let Ok(fact) = facts.try_recv() {
			pending.facts.push(fact);
		}
		let chunk = std::mem::take(&mut pending);
		if chunks.send(chunk).await.is_err() {
			debug!("chunk receiver closed");
			return Ok(());
		}
	}
}
