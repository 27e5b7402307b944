// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// What a fact source is permitted to assert. Ordered: every level includes
/// the permissions of the levels below it.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TrustLevel {
	Untrusted,
	/// May report endpoints.
	Endpoint,
	/// May change allowed-IPs of peers we already know.
	AllowedIps,
	/// May introduce new peers (membership and their first allowed-IPs).
	#[serde(alias = "membership")]
	AddPeer,
	/// May cause peers to be removed.
	DelPeer,
	/// May hand trust to others.
	#[serde(alias = "delegate")]
	SetTrust,
}

#[derive(Error, Debug)]
#[error("unknown trust level: {0}")]
pub struct ParseTrustLevelError(String);

impl TrustLevel {
	pub const ALL: [TrustLevel; 6] = [
		TrustLevel::Untrusted,
		TrustLevel::Endpoint,
		TrustLevel::AllowedIps,
		TrustLevel::AddPeer,
		TrustLevel::DelPeer,
		TrustLevel::SetTrust,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			TrustLevel::Untrusted => "untrusted",
			TrustLevel::Endpoint => "endpoint",
			TrustLevel::AllowedIps => "allowed-ips",
			TrustLevel::AddPeer => "add-peer",
			TrustLevel::DelPeer => "del-peer",
			TrustLevel::SetTrust => "set-trust",
		}
	}
}

impl fmt::Display for TrustLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for TrustLevel {
	type Err = ParseTrustLevelError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
		match normalized.as_str() {
			"membership" => return Ok(TrustLevel::AddPeer),
			"delegate" => return Ok(TrustLevel::SetTrust),
			_ => {}
		}
		TrustLevel::ALL
			.into_iter()
			.find(|level| level.as_str() == normalized)
			.ok_or_else(|| ParseTrustLevelError(s.to_string()))
	}
}
