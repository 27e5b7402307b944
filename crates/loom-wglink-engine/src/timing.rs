// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Protocol periods and the WireGuard timers they are derived from. Health
//! thresholds built from these are policy, not precision.

use std::time::Duration;

/// Lifetime of every locally produced fact. The most the wire TTL can hold.
pub const FACT_TTL: Duration = Duration::from_secs(255);

/// How often received facts are batched and processed.
pub const CHUNK_PERIOD: Duration = Duration::from_secs(5);

/// How often each peer must hear our alive fact.
pub const ALIVE_PERIOD: Duration = Duration::from_secs(30);

/// How often facts are refreshed ahead of their expiry.
pub const FACT_INTERVAL: Duration = Duration::from_secs(30);

pub const REKEY_AFTER_TIME: Duration = Duration::from_secs(120);
pub const REKEY_TIMEOUT: Duration = Duration::from_secs(5);
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);
pub const HANDSHAKE_JITTER: Duration = Duration::from_secs(5);

/// How long a handshake keeps a peer healthy without a newer one.
pub const HANDSHAKE_VALIDITY: Duration = Duration::from_secs(
	REKEY_AFTER_TIME.as_secs()
		+ REKEY_TIMEOUT.as_secs()
		+ KEEPALIVE_TIMEOUT.as_secs()
		+ HANDSHAKE_JITTER.as_secs(),
);

/// The transport has given up on an endpoint once this passes without a
/// handshake.
pub const ENDPOINT_ATTEMPT: Duration =
	Duration::from_secs(REKEY_TIMEOUT.as_secs() + KEEPALIVE_TIMEOUT.as_secs());

/// How far ahead a fact must still be valid before we stop resending it.
pub fn refresh_window() -> Duration {
	FACT_TTL - FACT_INTERVAL
}

/// A trust source must have been alive at least this long for its fact set
/// to be complete.
pub fn min_alive_for_delete() -> Duration {
	FACT_TTL + CHUNK_PERIOD
}

/// And must stay alive at least this much longer.
pub fn min_still_alive_for_delete() -> Duration {
	CHUNK_PERIOD * 3 / 2
}
