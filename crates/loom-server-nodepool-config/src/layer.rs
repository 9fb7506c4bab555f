// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration layer for merging from multiple sources.

use serde::Deserialize;

use crate::sections::{DefaultsConfigLayer, LoggingConfigLayer, ProviderConfigLayer};

/// Nodepool configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodepoolConfigLayer {
	#[serde(default)]
	pub defaults: Option<DefaultsConfigLayer>,
	#[serde(default)]
	pub providers: Option<Vec<ProviderConfigLayer>>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl NodepoolConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	///
	/// Provider lists are replaced wholesale rather than merged entry by entry.
	pub fn merge(&mut self, other: NodepoolConfigLayer) {
		merge_option(&mut self.defaults, other.defaults, DefaultsConfigLayer::merge);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
		if other.providers.is_some() {
			self.providers = other.providers;
		}
	}
}

fn merge_option<T, F>(target: &mut Option<T>, source: Option<T>, merge_fn: F)
where
	F: FnOnce(&mut T, T),
{
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_merge_keeps_unset_sections() {
		let mut base = NodepoolConfigLayer {
			defaults: Some(DefaultsConfigLayer {
				rate: Some(2.0),
				launch_retries: Some(5),
				..Default::default()
			}),
			providers: Some(vec![ProviderConfigLayer {
				name: Some("fake".to_string()),
				..Default::default()
			}]),
			logging: None,
		};
		base.merge(NodepoolConfigLayer {
			defaults: Some(DefaultsConfigLayer {
				rate: Some(8.0),
				..Default::default()
			}),
			..Default::default()
		});

		let defaults = base.defaults.unwrap();
		assert_eq!(defaults.rate, Some(8.0));
		assert_eq!(defaults.launch_retries, Some(5));
		assert_eq!(base.providers.unwrap().len(), 1);
		assert!(base.logging.is_none());
	}

	#[test]
	fn test_provider_lists_are_replaced() {
		let named = |name: &str| ProviderConfigLayer {
			name: Some(name.to_string()),
			..Default::default()
		};
		let mut base = NodepoolConfigLayer {
			providers: Some(vec![named("a"), named("b")]),
			..Default::default()
		};
		base.merge(NodepoolConfigLayer {
			providers: Some(vec![named("c")]),
			..Default::default()
		});
		let providers = base.providers.unwrap();
		assert_eq!(providers.len(), 1);
		assert_eq!(providers[0].name.as_deref(), Some("c"));
	}
}
