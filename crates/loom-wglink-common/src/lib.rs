// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub mod device;
pub mod ip;
pub mod keys;
pub mod peer;
pub mod trust_level;

pub use device::{
	DeviceConfig, DeviceControl, DeviceError, DevicePeer, DeviceState, NetInterface,
	NetworkEnvironment, PeerUpdate,
};
pub use ip::{
	is_global_unicast, is_link_local, is_router_net, link_local_address, link_local_net,
	normalize_ip, normalize_net, parse_ip, parse_net, IpError,
};
pub use keys::{KeyError, WgKeyPair, WgPrivateKey, WgPublicKey, KEY_LEN};
pub use peer::{PeerConfig, Peers};
pub use trust_level::{ParseTrustLevelError, TrustLevel};
