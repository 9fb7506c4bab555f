// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

use crate::config::ProviderLabel;
use crate::error::AdapterError;
use crate::instance::{Instance, InstanceMetadata};
use crate::quota::{Cost, Limit};

/// Trait for the cloud calls a provider needs.
///
/// One implementation exists per cloud. Calls are only ever made from a
/// [`crate::task::TaskManager`] worker, which owns rate limiting, so
/// implementations just perform the request.
#[async_trait]
pub trait Adapter: Send + Sync {
	/// Create an instance and return its external id.
	///
	/// `metadata` must be attached to the instance so that later listings
	/// report the same [`crate::instance::InstanceOwner`].
	async fn create_instance(
		&self,
		hostname: &str,
		metadata: &InstanceMetadata,
		label: &ProviderLabel,
	) -> Result<String, AdapterError>;

	/// Delete an instance by external id.
	async fn delete_instance(&self, external_id: &str) -> Result<(), AdapterError>;

	/// List every instance visible to this account, managed or not.
	async fn list_instances(&self) -> Result<Vec<Instance>, AdapterError>;

	/// Provider-wide limits.
	async fn get_quota_limits(&self) -> Result<Limit, AdapterError> {
		Ok(Limit::Unbounded)
	}

	/// Cost of one node of `label`.
	async fn get_quota_for_label(&self, _label: &ProviderLabel) -> Result<Cost, AdapterError> {
		Ok(Cost::Unknown)
	}
}
