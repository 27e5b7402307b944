// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

/// `$XDG_CONFIG_HOME/loom/wglink/<iface>.toml`, falling back to the
/// platform config directory.
pub fn default_config_path(iface: &str) -> Option<PathBuf> {
	let config_home = std::env::var_os("XDG_CONFIG_HOME")
		.filter(|v| !v.is_empty())
		.map(PathBuf::from)
		.or_else(dirs::config_dir)?;
	Some(config_home.join("loom").join("wglink").join(format!("{iface}.toml")))
}
