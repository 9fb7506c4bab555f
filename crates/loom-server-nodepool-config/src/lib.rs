// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the Loom nodepool launcher.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Resolution of providers, pools and labels into driver configuration
//! - Consistent environment variable naming (`LOOM_NODEPOOL_*`)
//!
//! # Usage
//!
//! ```ignore
//! use loom_server_nodepool_config::load_config;
//!
//! let config = load_config()?;
//! for provider in &config.providers {
//!     println!("{} serves {} pools", provider.name, provider.pools.len());
//! }
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

use std::collections::HashSet;

pub use error::ConfigError;
pub use layer::NodepoolConfigLayer;
use loom_server_nodepool::ProviderConfig;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved launcher configuration.
#[derive(Debug, Clone, Default)]
pub struct NodepoolConfig {
	pub providers: Vec<ProviderConfig>,
	pub logging: LoggingConfig,
}

impl NodepoolConfig {
	pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
		self.providers.iter().find(|p| p.name == name)
	}
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`LOOM_NODEPOOL_*`)
/// 2. Config file (`/etc/loom/nodepool.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<NodepoolConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only (for testing or simple deployments).
pub fn load_config_from_env() -> Result<NodepoolConfig, ConfigError> {
	let mut merged = NodepoolConfigLayer::default();
	merged.merge(EnvSource.load()?);
	finalize(merged)
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<NodepoolConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<NodepoolConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = NodepoolConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
fn finalize(layer: NodepoolConfigLayer) -> Result<NodepoolConfig, ConfigError> {
	let defaults = layer.defaults.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();
	let providers = layer
		.providers
		.unwrap_or_default()
		.into_iter()
		.map(|p| p.resolve(&defaults))
		.collect::<Result<Vec<_>, ConfigError>>()?;

	validate_config(&providers)?;

	info!(
		providers = providers.len(),
		pools = providers.iter().map(|p| p.pools.len()).sum::<usize>(),
		log_level = %logging.level,
		"Nodepool configuration loaded"
	);

	Ok(NodepoolConfig { providers, logging })
}

/// Validate cross-field configuration rules.
fn validate_config(providers: &[ProviderConfig]) -> Result<(), ConfigError> {
	let mut names = HashSet::new();
	for provider in providers {
		if !names.insert(provider.name.as_str()) {
			return Err(ConfigError::Validation(format!(
				"duplicate provider {}",
				provider.name
			)));
		}
		if !(provider.rate.is_finite() && provider.rate > 0.0) {
			return Err(ConfigError::Validation(format!(
				"provider {}: rate must be a positive number of tasks per second, got {}",
				provider.name, provider.rate
			)));
		}
		if provider.launch_retries == 0 {
			return Err(ConfigError::Validation(format!(
				"provider {}: launch_retries must be at least 1",
				provider.name
			)));
		}
		for pool in provider.pools.values() {
			if pool.launch_retries == Some(0) {
				return Err(ConfigError::Validation(format!(
					"provider {}, pool {}: launch_retries must be at least 1",
					provider.name, pool.name
				)));
			}
		}
	}

	Ok(())
}
