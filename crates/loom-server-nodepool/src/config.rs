// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Runtime configuration for a provider, its pools and their labels.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::quota::QuotaInformation;

/// Default number of create attempts before a launch fails.
pub const DEFAULT_LAUNCH_RETRIES: u32 = 3;

/// Default time to wait for an instance to report ready.
pub const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default interval between leak reconciliation passes.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Default time to wait for an instance to disappear after deletion.
pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(600);

/// Default adapter operations per second.
pub const DEFAULT_RATE: f64 = 1.0;

/// How clients connect to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
	#[default]
	Ssh,
	NetworkCli,
	Winrm,
	Kubectl,
}

impl ConnectionType {
	/// Whether host keys should be collected when scanning this connection type.
	pub fn gathers_host_keys(self) -> bool {
		matches!(self, ConnectionType::Ssh | ConnectionType::NetworkCli)
	}
}

impl std::fmt::Display for ConnectionType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			ConnectionType::Ssh => "ssh",
			ConnectionType::NetworkCli => "network_cli",
			ConnectionType::Winrm => "winrm",
			ConnectionType::Kubectl => "kubectl",
		};
		f.write_str(s)
	}
}

/// The image a label boots and how to log into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudImage {
	pub name: String,
	pub username: String,
	/// Public key installed for `username`, sent to the cloud as the `ssh-keys` tag
	pub key: Option<String>,
	pub connection_port: u16,
	pub connection_type: ConnectionType,
	pub python_path: Option<String>,
	pub shell_type: Option<String>,
}

impl CloudImage {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			username: "zuul".to_string(),
			key: None,
			connection_port: 22,
			connection_type: ConnectionType::Ssh,
			python_path: None,
			shell_type: None,
		}
	}
}

/// A label as configured in a provider pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderLabel {
	pub name: String,
	pub pool: String,
	pub instance_type: Option<String>,
	pub cloud_image: CloudImage,
}

/// A pool within a provider with its own limits and labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
	pub name: String,
	pub max_cores: Option<u64>,
	pub max_servers: Option<u64>,
	pub max_ram: Option<u64>,
	pub ignore_provider_quota: bool,
	pub host_key_checking: bool,
	pub use_internal_ip: bool,
	pub boot_timeout: Option<Duration>,
	pub launch_retries: Option<u32>,
	pub labels: BTreeMap<String, ProviderLabel>,
}

impl PoolConfig {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			max_cores: None,
			max_servers: None,
			max_ram: None,
			ignore_provider_quota: false,
			host_key_checking: true,
			use_internal_ip: false,
			boot_timeout: None,
			launch_retries: None,
			labels: BTreeMap::new(),
		}
	}

	/// Add a label booting `image`, keyed by its name.
	pub fn with_label(mut self, name: impl Into<String>, image: CloudImage) -> Self {
		let name = name.into();
		let label = ProviderLabel {
			name: name.clone(),
			pool: self.name.clone(),
			instance_type: None,
			cloud_image: image,
		};
		self.labels.insert(name, label);
		self
	}

	/// Pool limits with every unset dimension unbounded.
	pub fn quota_limits(&self) -> QuotaInformation {
		QuotaInformation::new(
			self.max_cores.map(|v| v as f64),
			self.max_servers.map(|v| v as f64),
			self.max_ram.map(|v| v as f64),
			f64::INFINITY,
		)
	}

	pub fn label(&self, name: &str) -> Option<&ProviderLabel> {
		self.labels.get(name)
	}
}

/// A cloud provider and the pools it serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
	pub name: String,
	/// Adapter operations per second
	pub rate: f64,
	pub boot_timeout: Duration,
	pub launch_retries: u32,
	pub cleanup_interval: Duration,
	pub delete_timeout: Duration,
	pub pools: BTreeMap<String, PoolConfig>,
}

impl ProviderConfig {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			rate: DEFAULT_RATE,
			boot_timeout: DEFAULT_BOOT_TIMEOUT,
			launch_retries: DEFAULT_LAUNCH_RETRIES,
			cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
			delete_timeout: DEFAULT_DELETE_TIMEOUT,
			pools: BTreeMap::new(),
		}
	}

	pub fn with_pool(mut self, pool: PoolConfig) -> Self {
		self.pools.insert(pool.name.clone(), pool);
		self
	}

	pub fn pool(&self, name: &str) -> Option<&PoolConfig> {
		self.pools.get(name)
	}

	/// Boot timeout for `pool`, falling back to the provider default.
	pub fn boot_timeout_for(&self, pool: &PoolConfig) -> Duration {
		pool.boot_timeout.unwrap_or(self.boot_timeout)
	}

	/// Create attempts for `pool`, falling back to the provider default.
	pub fn launch_retries_for(&self, pool: &PoolConfig) -> u32 {
		pool.launch_retries.unwrap_or(self.launch_retries)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unset_pool_limits_are_unbounded() {
		let mut pool = PoolConfig::new("main");
		pool.max_servers = Some(2);
		let limits = pool.quota_limits();
		assert_eq!(limits.instances, 2.0);
		assert!(limits.cores.is_infinite());
		assert!(limits.ram.is_infinite());
	}

	#[test]
	fn pool_overrides_take_precedence() {
		let provider = ProviderConfig::new("fake");
		let mut pool = PoolConfig::new("main");
		assert_eq!(provider.launch_retries_for(&pool), DEFAULT_LAUNCH_RETRIES);
		assert_eq!(provider.boot_timeout_for(&pool), DEFAULT_BOOT_TIMEOUT);

		pool.launch_retries = Some(5);
		pool.boot_timeout = Some(Duration::from_secs(5));
		assert_eq!(provider.launch_retries_for(&pool), 5);
		assert_eq!(provider.boot_timeout_for(&pool), Duration::from_secs(5));
	}

	#[test]
	fn with_label_records_owning_pool() {
		let pool = PoolConfig::new("main").with_label("small", CloudImage::new("ubuntu"));
		let label = pool.label("small").unwrap();
		assert_eq!(label.pool, "main");
		assert_eq!(label.cloud_image.username, "zuul");
		assert!(pool.label("large").is_none());
	}

	#[test]
	fn only_ssh_like_connections_gather_keys() {
		assert!(ConnectionType::Ssh.gathers_host_keys());
		assert!(ConnectionType::NetworkCli.gathers_host_keys());
		assert!(!ConnectionType::Winrm.gathers_host_keys());
		assert!(!ConnectionType::Kubectl.gathers_host_keys());
	}
}
