// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Provider, pool and label sections.
//!
//! ```toml
//! [[providers]]
//! name = "fake"
//! rate = 2.0
//!
//! [[providers.cloud_images]]
//! name = "ubuntu"
//! key = "ssh-ed25519 AAAA..."
//!
//! [[providers.pools]]
//! name = "main"
//! max_servers = 10
//!
//! [[providers.pools.labels]]
//! name = "small"
//! cloud_image = "ubuntu"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use loom_server_nodepool::config::{
	CloudImage, ConnectionType, PoolConfig, ProviderConfig, ProviderLabel,
};
use serde::{Deserialize, Serialize};

use super::defaults::ProviderDefaults;
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CloudImageConfigLayer {
	pub name: Option<String>,
	pub username: Option<String>,
	pub key: Option<String>,
	pub connection_port: Option<u16>,
	pub connection_type: Option<ConnectionType>,
	pub python_path: Option<String>,
	pub shell_type: Option<String>,
}

impl CloudImageConfigLayer {
	fn resolve(self, provider: &str) -> Result<CloudImage, ConfigError> {
		let name = self.name.ok_or_else(|| {
			ConfigError::Validation(format!("provider {provider}: cloud image name is required"))
		})?;
		let mut image = CloudImage::new(name);
		if let Some(username) = self.username {
			image.username = username;
		}
		if let Some(port) = self.connection_port {
			image.connection_port = port;
		}
		if let Some(connection_type) = self.connection_type {
			image.connection_type = connection_type;
		}
		image.key = self.key;
		image.python_path = self.python_path;
		image.shell_type = self.shell_type;
		Ok(image)
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LabelConfigLayer {
	pub name: Option<String>,
	/// Name of a `cloud_images` entry on the same provider
	pub cloud_image: Option<String>,
	pub instance_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PoolConfigLayer {
	pub name: Option<String>,
	pub max_cores: Option<u64>,
	pub max_servers: Option<u64>,
	pub max_ram: Option<u64>,
	pub ignore_provider_quota: Option<bool>,
	pub host_key_checking: Option<bool>,
	pub use_internal_ip: Option<bool>,
	pub boot_timeout_secs: Option<u64>,
	pub launch_retries: Option<u32>,
	#[serde(default)]
	pub labels: Vec<LabelConfigLayer>,
}

impl PoolConfigLayer {
	fn resolve(
		self,
		provider: &str,
		images: &HashMap<String, CloudImage>,
	) -> Result<PoolConfig, ConfigError> {
		let name = self.name.ok_or_else(|| {
			ConfigError::Validation(format!("provider {provider}: pool name is required"))
		})?;
		let mut pool = PoolConfig::new(name);
		pool.max_cores = self.max_cores;
		pool.max_servers = self.max_servers;
		pool.max_ram = self.max_ram;
		pool.ignore_provider_quota = self.ignore_provider_quota.unwrap_or(false);
		pool.host_key_checking = self.host_key_checking.unwrap_or(true);
		pool.use_internal_ip = self.use_internal_ip.unwrap_or(false);
		pool.boot_timeout = self.boot_timeout_secs.map(Duration::from_secs);
		pool.launch_retries = self.launch_retries;

		for label in self.labels {
			let label_name = label.name.ok_or_else(|| {
				ConfigError::Validation(format!(
					"provider {provider}, pool {}: label name is required",
					pool.name
				))
			})?;
			if pool.labels.contains_key(&label_name) {
				return Err(ConfigError::Validation(format!(
					"provider {provider}, pool {}: duplicate label {label_name}",
					pool.name
				)));
			}
			let image_name = label.cloud_image.ok_or_else(|| {
				ConfigError::Validation(format!(
					"provider {provider}, label {label_name}: cloud_image is required"
				))
			})?;
			let cloud_image = images.get(&image_name).cloned().ok_or_else(|| {
				ConfigError::Validation(format!(
					"provider {provider}, label {label_name}: unknown cloud image {image_name}"
				))
			})?;
			pool.labels.insert(
				label_name.clone(),
				ProviderLabel {
					name: label_name,
					pool: pool.name.clone(),
					instance_type: label.instance_type,
					cloud_image,
				},
			);
		}
		Ok(pool)
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfigLayer {
	pub name: Option<String>,
	pub rate: Option<f64>,
	pub boot_timeout_secs: Option<u64>,
	pub launch_retries: Option<u32>,
	pub cleanup_interval_secs: Option<u64>,
	pub delete_timeout_secs: Option<u64>,
	#[serde(default)]
	pub cloud_images: Vec<CloudImageConfigLayer>,
	#[serde(default)]
	pub pools: Vec<PoolConfigLayer>,
}

impl ProviderConfigLayer {
	/// Resolves this layer, filling unset settings from `defaults`.
	pub fn resolve(self, defaults: &ProviderDefaults) -> Result<ProviderConfig, ConfigError> {
		let name = self
			.name
			.ok_or_else(|| ConfigError::Validation("provider name is required".to_string()))?;

		let mut images = HashMap::new();
		for image in self.cloud_images {
			let image = image.resolve(&name)?;
			if images.contains_key(&image.name) {
				return Err(ConfigError::Validation(format!(
					"provider {name}: duplicate cloud image {}",
					image.name
				)));
			}
			images.insert(image.name.clone(), image);
		}

		let mut pools = BTreeMap::new();
		for pool in self.pools {
			let pool = pool.resolve(&name, &images)?;
			if pools.contains_key(&pool.name) {
				return Err(ConfigError::Validation(format!(
					"provider {name}: duplicate pool {}",
					pool.name
				)));
			}
			pools.insert(pool.name.clone(), pool);
		}

		Ok(ProviderConfig {
			rate: self.rate.unwrap_or(defaults.rate),
			boot_timeout: self
				.boot_timeout_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.boot_timeout),
			launch_retries: self.launch_retries.unwrap_or(defaults.launch_retries),
			cleanup_interval: self
				.cleanup_interval_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.cleanup_interval),
			delete_timeout: self
				.delete_timeout_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.delete_timeout),
			pools,
			name,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn layer() -> ProviderConfigLayer {
		ProviderConfigLayer {
			name: Some("fake".to_string()),
			cloud_images: vec![CloudImageConfigLayer {
				name: Some("ubuntu".to_string()),
				username: Some("ubuntu".to_string()),
				connection_type: Some(ConnectionType::NetworkCli),
				..Default::default()
			}],
			pools: vec![PoolConfigLayer {
				name: Some("main".to_string()),
				max_servers: Some(4),
				labels: vec![LabelConfigLayer {
					name: Some("small".to_string()),
					cloud_image: Some("ubuntu".to_string()),
					instance_type: Some("m1.small".to_string()),
				}],
				..Default::default()
			}],
			..Default::default()
		}
	}

	#[test]
	fn test_resolve_links_labels_to_images() {
		let provider = layer().resolve(&ProviderDefaults::default()).unwrap();
		let pool = provider.pool("main").unwrap();
		assert_eq!(pool.max_servers, Some(4));
		assert!(pool.host_key_checking);

		let label = pool.label("small").unwrap();
		assert_eq!(label.pool, "main");
		assert_eq!(label.instance_type.as_deref(), Some("m1.small"));
		assert_eq!(label.cloud_image.username, "ubuntu");
		assert_eq!(label.cloud_image.connection_type, ConnectionType::NetworkCli);
		assert_eq!(label.cloud_image.connection_port, 22);
	}

	#[test]
	fn test_provider_settings_override_defaults() {
		let defaults = ProviderDefaults {
			rate: 4.0,
			launch_retries: 7,
			..Default::default()
		};
		let mut layer = layer();
		layer.launch_retries = Some(2);

		let provider = layer.resolve(&defaults).unwrap();
		assert_eq!(provider.rate, 4.0);
		assert_eq!(provider.launch_retries, 2);
		assert_eq!(provider.delete_timeout, defaults.delete_timeout);
	}

	#[test]
	fn test_unknown_cloud_image_rejected() {
		let mut layer = layer();
		layer.pools[0].labels[0].cloud_image = Some("debian".to_string());
		let err = layer.resolve(&ProviderDefaults::default()).unwrap_err();
		assert!(err.to_string().contains("unknown cloud image debian"));
	}

	#[test]
	fn test_duplicate_pool_and_label_rejected() {
		let mut dup_pool = layer();
		let pool = dup_pool.pools[0].clone();
		dup_pool.pools.push(pool);
		let err = dup_pool.resolve(&ProviderDefaults::default()).unwrap_err();
		assert!(err.to_string().contains("duplicate pool main"));

		let mut dup_label = layer();
		let label = dup_label.pools[0].labels[0].clone();
		dup_label.pools[0].labels.push(label);
		let err = dup_label.resolve(&ProviderDefaults::default()).unwrap_err();
		assert!(err.to_string().contains("duplicate label small"));
	}

	#[test]
	fn test_missing_names_rejected() {
		let mut layer = layer();
		layer.name = None;
		assert!(matches!(
			layer.resolve(&ProviderDefaults::default()),
			Err(ConfigError::Validation(_))
		));
	}
}
