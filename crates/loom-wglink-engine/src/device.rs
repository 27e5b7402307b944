// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use loom_wglink_common::{DeviceConfig, DeviceControl, DeviceError, DeviceState};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

struct Inner {
	control: Arc<dyn DeviceControl>,
	state: Option<DeviceState>,
}

/// The device-control interface and its last-read state behind one lock.
/// Configuration writes from concurrent reconciliations serialize here.
pub struct SharedDevice {
	name: String,
	inner: Mutex<Inner>,
}

impl SharedDevice {
	pub fn new(name: impl Into<String>, control: Arc<dyn DeviceControl>) -> Self {
		Self {
			name: name.into(),
			inner: Mutex::new(Inner {
				control,
				state: None,
			}),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Reads the device and caches the result.
	#[instrument(skip(self), fields(iface = %self.name))]
	pub async fn refresh(&self) -> Result<DeviceState, DeviceError> {
		let mut inner = self.inner.lock().await;
		let state = inner.control.device(&self.name).await?;
		debug!(peers = state.peers.len(), "read device state");
		inner.state = Some(state.clone());
		Ok(state)
	}

	/// Last state read by [`refresh`](Self::refresh), if any.
	pub async fn cached(&self) -> Option<DeviceState> {
		self.inner.lock().await.state.clone()
	}

	#[instrument(skip(self, config), fields(iface = %self.name, peers = config.peers.len()))]
	pub async fn configure(&self, config: DeviceConfig) -> Result<(), DeviceError> {
		let inner = self.inner.lock().await;
		inner.control.configure_device(&self.name, config).await
	}
}

impl fmt::Debug for SharedDevice {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SharedDevice")
			.field("name", &self.name)
			.finish_non_exhaustive()
	}
}
