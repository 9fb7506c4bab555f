// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::NodepoolConfigLayer;
use crate::sections::{DefaultsConfigLayer, LoggingConfigLayer};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<NodepoolConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<NodepoolConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(NodepoolConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/loom/nodepool.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<NodepoolConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(NodepoolConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: NodepoolConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: LOOM_NODEPOOL_<FIELD>. Values land in the `defaults` section,
/// so a provider that sets a field explicitly still wins.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<NodepoolConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(NodepoolConfigLayer {
			defaults: Some(load_defaults_from_env()?),
			providers: None,
			logging: Some(load_logging_from_env()),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u32 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u64 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_f64(name: &str) -> Result<Option<f64>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid number '{v}'"),
		}),
		None => Ok(None),
	}
}

fn load_defaults_from_env() -> Result<DefaultsConfigLayer, ConfigError> {
	Ok(DefaultsConfigLayer {
		rate: env_f64("LOOM_NODEPOOL_RATE")?,
		boot_timeout_secs: env_u64("LOOM_NODEPOOL_BOOT_TIMEOUT_SECS")?,
		launch_retries: env_u32("LOOM_NODEPOOL_LAUNCH_RETRIES")?,
		cleanup_interval_secs: env_u64("LOOM_NODEPOOL_CLEANUP_INTERVAL_SECS")?,
		delete_timeout_secs: env_u64("LOOM_NODEPOOL_DELETE_TIMEOUT_SECS")?,
	})
}

fn load_logging_from_env() -> LoggingConfigLayer {
	LoggingConfigLayer {
		level: env_var("LOOM_NODEPOOL_LOG_LEVEL"),
		json: env_bool("LOOM_NODEPOOL_LOG_JSON"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_precedence_order() {
		assert!(Precedence::Defaults < Precedence::ConfigFile);
		assert!(Precedence::ConfigFile < Precedence::Environment);
	}

	#[test]
	fn test_missing_file_is_skipped() {
		let dir = tempfile::tempdir().unwrap();
		let layer = TomlSource::new(dir.path().join("absent.toml")).load().unwrap();
		assert!(layer.providers.is_none());
		assert!(layer.defaults.is_none());
	}

	#[test]
	fn test_malformed_file_reports_path() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nodepool.toml");
		std::fs::write(&path, "[[providers]\nname = ").unwrap();

		let err = TomlSource::new(&path).load().unwrap_err();
		match err {
			ConfigError::TomlParse { path: reported, .. } => assert_eq!(reported, path),
			other => panic!("unexpected error: {other}"),
		}
	}

	#[test]
	fn test_invalid_numbers_are_rejected() {
		std::env::set_var("LOOM_NODEPOOL_TEST_BAD_RATE", "fast");
		let err = env_f64("LOOM_NODEPOOL_TEST_BAD_RATE").unwrap_err();
		assert!(err.to_string().contains("LOOM_NODEPOOL_TEST_BAD_RATE"));

		std::env::set_var("LOOM_NODEPOOL_TEST_BAD_RETRIES", "-1");
		assert!(env_u32("LOOM_NODEPOOL_TEST_BAD_RETRIES").is_err());
	}

	#[test]
	fn test_empty_values_are_unset() {
		std::env::set_var("LOOM_NODEPOOL_TEST_EMPTY", "");
		assert_eq!(env_var("LOOM_NODEPOOL_TEST_EMPTY"), None);
		assert_eq!(env_u64("LOOM_NODEPOOL_TEST_EMPTY").unwrap(), None);
	}
}
