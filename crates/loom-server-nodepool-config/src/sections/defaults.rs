// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Launcher-wide defaults inherited by every provider.

use std::time::Duration;

use loom_server_nodepool::config::{
	DEFAULT_BOOT_TIMEOUT, DEFAULT_CLEANUP_INTERVAL, DEFAULT_DELETE_TIMEOUT, DEFAULT_LAUNCH_RETRIES,
	DEFAULT_RATE,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DefaultsConfigLayer {
	pub rate: Option<f64>,
	pub boot_timeout_secs: Option<u64>,
	pub launch_retries: Option<u32>,
	pub cleanup_interval_secs: Option<u64>,
	pub delete_timeout_secs: Option<u64>,
}

impl DefaultsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.rate.is_some() {
			self.rate = other.rate;
		}
		if other.boot_timeout_secs.is_some() {
			self.boot_timeout_secs = other.boot_timeout_secs;
		}
		if other.launch_retries.is_some() {
			self.launch_retries = other.launch_retries;
		}
		if other.cleanup_interval_secs.is_some() {
			self.cleanup_interval_secs = other.cleanup_interval_secs;
		}
		if other.delete_timeout_secs.is_some() {
			self.delete_timeout_secs = other.delete_timeout_secs;
		}
	}

	pub fn finalize(self) -> ProviderDefaults {
		ProviderDefaults {
			rate: self.rate.unwrap_or(DEFAULT_RATE),
			boot_timeout: self
				.boot_timeout_secs
				.map(Duration::from_secs)
				.unwrap_or(DEFAULT_BOOT_TIMEOUT),
			launch_retries: self.launch_retries.unwrap_or(DEFAULT_LAUNCH_RETRIES),
			cleanup_interval: self
				.cleanup_interval_secs
				.map(Duration::from_secs)
				.unwrap_or(DEFAULT_CLEANUP_INTERVAL),
			delete_timeout: self
				.delete_timeout_secs
				.map(Duration::from_secs)
				.unwrap_or(DEFAULT_DELETE_TIMEOUT),
		}
	}
}

/// Values a provider falls back to when it leaves a setting unset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderDefaults {
	pub rate: f64,
	pub boot_timeout: Duration,
	pub launch_retries: u32,
	pub cleanup_interval: Duration,
	pub delete_timeout: Duration,
}

impl Default for ProviderDefaults {
	fn default() -> Self {
		DefaultsConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_unset_defaults_match_driver_constants() {
		let defaults = ProviderDefaults::default();
		assert_eq!(defaults.rate, DEFAULT_RATE);
		assert_eq!(defaults.launch_retries, 3);
		assert_eq!(defaults.boot_timeout, Duration::from_secs(60));
		assert_eq!(defaults.cleanup_interval, Duration::from_secs(60));
		assert_eq!(defaults.delete_timeout, Duration::from_secs(600));
	}

	#[test]
	fn test_seconds_are_converted() {
		let defaults = DefaultsConfigLayer {
			boot_timeout_secs: Some(5),
			delete_timeout_secs: Some(30),
			..Default::default()
		}
		.finalize();
		assert_eq!(defaults.boot_timeout, Duration::from_secs(5));
		assert_eq!(defaults.delete_timeout, Duration::from_secs(30));
	}

	mod proptests {
		use proptest::prelude::*;

		use super::*;

		fn layer() -> impl Strategy<Value = DefaultsConfigLayer> {
			(
				proptest::option::of(0.1f64..100.0),
				proptest::option::of(any::<u64>()),
				proptest::option::of(1u32..10),
				proptest::option::of(any::<u64>()),
				proptest::option::of(any::<u64>()),
			)
				.prop_map(|(rate, boot, retries, cleanup, delete)| DefaultsConfigLayer {
					rate,
					boot_timeout_secs: boot,
					launch_retries: retries,
					cleanup_interval_secs: cleanup,
					delete_timeout_secs: delete,
				})
		}

		proptest! {
			#[test]
			fn merging_empty_layer_is_identity(base in layer()) {
				let mut merged = base.clone();
				merged.merge(DefaultsConfigLayer::default());
				prop_assert_eq!(merged, base);
			}

			#[test]
			fn later_layer_wins_where_set(base in layer(), over in layer()) {
				let mut merged = base.clone();
				merged.merge(over.clone());
				prop_assert_eq!(merged.rate, over.rate.or(base.rate));
				prop_assert_eq!(merged.launch_retries, over.launch_retries.or(base.launch_retries));
				prop_assert_eq!(merged.delete_timeout_secs, over.delete_timeout_secs.or(base.delete_timeout_secs));
			}
		}
	}
}
