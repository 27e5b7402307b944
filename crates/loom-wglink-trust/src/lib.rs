// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Which facts to believe, and from whom.
//!
//! An evaluator maps a received fact and the address it arrived from to a
//! [`TrustLevel`], or `None` to defer. [`should_accept`] then decides
//! whether that level is enough for the fact's attribute.

mod composite;
mod config;
mod known;
mod route;

pub use composite::{CompositeMode, CompositeTrust};
pub use config::ConfigTrust;
pub use known::KnownPeerTrust;
pub use loom_wglink_common::TrustLevel;
pub use route::{is_router, RouteBasedTrust};

use loom_wglink_fact::{Attribute, Fact, Subject};
use std::net::IpAddr;

pub trait TrustEvaluator: Send + Sync {
	fn is_known(&self, subject: &Subject) -> bool;

	fn trust_level(&self, fact: &Fact, source: IpAddr) -> Option<TrustLevel>;
}

impl<T: TrustEvaluator + ?Sized> TrustEvaluator for Box<T> {
	fn is_known(&self, subject: &Subject) -> bool {
		(**self).is_known(subject)
	}

	fn trust_level(&self, fact: &Fact, source: IpAddr) -> Option<TrustLevel> {
		(**self).trust_level(fact, source)
	}
}

/// Final gate for a received fact. Introducing a peer by way of its
/// allowed-IPs takes more trust than updating one already known. Alive and
/// signed-group facts never pass through here.
pub fn should_accept(attribute: Attribute, known: bool, level: TrustLevel) -> bool {
	match attribute {
		Attribute::EndpointV4 | Attribute::EndpointV6 => level >= TrustLevel::Endpoint,
		Attribute::AllowedCidrV4 | Attribute::AllowedCidrV6 => {
			if known {
				level >= TrustLevel::AllowedIps
			} else {
				level >= TrustLevel::AddPeer
			}
		}
		Attribute::Membership => level >= TrustLevel::AddPeer,
		Attribute::Unknown | Attribute::Alive | Attribute::SignedGroup => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn new_subjects_need_add_peer_for_allowed_ips() {
		assert!(!should_accept(Attribute::AllowedCidrV4, false, TrustLevel::AllowedIps));
		assert!(should_accept(Attribute::AllowedCidrV4, false, TrustLevel::AddPeer));
		assert!(should_accept(Attribute::AllowedCidrV6, true, TrustLevel::AllowedIps));
		assert!(!should_accept(Attribute::AllowedCidrV6, true, TrustLevel::Endpoint));
	}

	#[test]
	fn endpoints_need_endpoint_trust() {
		assert!(!should_accept(Attribute::EndpointV4, true, TrustLevel::Untrusted));
		assert!(should_accept(Attribute::EndpointV4, false, TrustLevel::Endpoint));
		assert!(should_accept(Attribute::EndpointV6, false, TrustLevel::SetTrust));
	}

	#[test]
	fn membership_needs_add_peer() {
		assert!(!should_accept(Attribute::Membership, true, TrustLevel::AllowedIps));
		assert!(should_accept(Attribute::Membership, false, TrustLevel::AddPeer));
	}

	#[test]
	fn internal_attributes_never_pass() {
		for attr in [Attribute::Unknown, Attribute::Alive, Attribute::SignedGroup] {
			for level in TrustLevel::ALL {
				assert!(!should_accept(attr, true, level), "{attr} at {level}");
			}
		}
	}
}
