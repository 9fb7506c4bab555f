// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Normalized view of a cloud instance and its ownership tags.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::quota::QuotaInformation;
use crate::types::NodeId;

/// Tag carrying the id of the node an instance was created for.
pub const TAG_NODE_ID: &str = "nodepool_node_id";

/// Tag carrying the pool an instance was created in.
pub const TAG_POOL_NAME: &str = "nodepool_pool_name";

/// Tag carrying the provider that created an instance.
pub const TAG_PROVIDER_NAME: &str = "nodepool_provider_name";

/// Tag carrying `<user>:<public key>` for image login.
pub const TAG_SSH_KEYS: &str = "ssh-keys";

/// Who created an instance, decoded from its tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceOwner {
	pub provider: String,
	pub pool: Option<String>,
	pub node_id: Option<NodeId>,
}

impl InstanceOwner {
	/// Decode ownership from cloud tags; `None` when the provider tag is absent.
	pub fn from_tags(tags: &BTreeMap<String, String>) -> Option<Self> {
		let provider = tags.get(TAG_PROVIDER_NAME)?.clone();
		Some(Self {
			provider,
			pool: tags.get(TAG_POOL_NAME).cloned(),
			node_id: tags.get(TAG_NODE_ID).map(|id| NodeId::new(id.as_str())),
		})
	}

	pub fn to_tags(&self) -> BTreeMap<String, String> {
		let mut tags = BTreeMap::new();
		tags.insert(TAG_PROVIDER_NAME.to_string(), self.provider.clone());
		if let Some(pool) = &self.pool {
			tags.insert(TAG_POOL_NAME.to_string(), pool.clone());
		}
		if let Some(node_id) = &self.node_id {
			tags.insert(TAG_NODE_ID.to_string(), node_id.to_string());
		}
		tags
	}

	pub fn is_provider(&self, provider: &str) -> bool {
		self.provider == provider
	}
}

/// Metadata attached to an instance at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceMetadata {
	pub owner: InstanceOwner,
	pub ssh_keys: Option<String>,
}

impl InstanceMetadata {
	pub fn to_tags(&self) -> BTreeMap<String, String> {
		let mut tags = self.owner.to_tags();
		if let Some(keys) = &self.ssh_keys {
			tags.insert(TAG_SSH_KEYS.to_string(), keys.clone());
		}
		tags
	}
}

/// A cloud instance as reported by an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
	pub external_id: String,
	pub ready: bool,
	pub deleted: bool,
	pub interface_ip: Option<IpAddr>,
	pub public_ipv4: Option<IpAddr>,
	pub private_ipv4: Option<IpAddr>,
	pub public_ipv6: Option<IpAddr>,
	pub region: Option<String>,
	pub az: Option<String>,
	pub owner: Option<InstanceOwner>,
	pub quota: Option<QuotaInformation>,
}

impl Instance {
	pub fn new(external_id: impl Into<String>) -> Self {
		Self {
			external_id: external_id.into(),
			ready: false,
			deleted: false,
			interface_ip: None,
			public_ipv4: None,
			private_ipv4: None,
			public_ipv6: None,
			region: None,
			az: None,
			owner: None,
			quota: None,
		}
	}

	/// Resources this instance consumes; zero when the adapter cannot tell.
	pub fn quota_information(&self) -> QuotaInformation {
		self.quota.unwrap_or_default()
	}

	pub fn owned_by(&self, provider: &str) -> bool {
		self.owner.as_ref().is_some_and(|owner| owner.is_provider(provider))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn owner_tags_roundtrip() {
		let owner = InstanceOwner {
			provider: "fake".to_string(),
			pool: Some("main".to_string()),
			node_id: Some(NodeId::new("0000000001")),
		};
		let tags = owner.to_tags();
		assert_eq!(tags[TAG_NODE_ID], "0000000001");
		assert_eq!(InstanceOwner::from_tags(&tags), Some(owner));
	}

	#[test]
	fn untagged_instances_have_no_owner() {
		let mut tags = BTreeMap::new();
		tags.insert(TAG_NODE_ID.to_string(), "42".to_string());
		assert!(InstanceOwner::from_tags(&tags).is_none());
	}

	#[test]
	fn metadata_adds_ssh_keys() {
		let metadata = InstanceMetadata {
			owner: InstanceOwner {
				provider: "fake".to_string(),
				pool: None,
				node_id: None,
			},
			ssh_keys: Some("zuul:ssh-ed25519 AAAA".to_string()),
		};
		let tags = metadata.to_tags();
		assert_eq!(tags[TAG_SSH_KEYS], "zuul:ssh-ed25519 AAAA");
		assert!(!tags.contains_key(TAG_POOL_NAME));
	}

	#[test]
	fn missing_quota_counts_as_zero() {
		let instance = Instance::new("i-1");
		assert_eq!(instance.quota_information(), QuotaInformation::zero());
		assert!(!instance.owned_by("fake"));
	}
}
