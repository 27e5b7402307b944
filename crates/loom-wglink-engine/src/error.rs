// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("device error: {0}")]
	Device(#[from] loom_wglink_common::DeviceError),

	#[error("fact error: {0}")]
	Fact(#[from] loom_wglink_fact::FactError),

	#[error("interface {0} has no index")]
	NoInterfaceIndex(String),

	#[error("pipeline stage {0} failed")]
	Stage(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
