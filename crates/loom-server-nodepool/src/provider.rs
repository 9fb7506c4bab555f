// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Provider-wide state: the instance cache, quota accounting and leaked
//! resource reconciliation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::adapter::Adapter;
use crate::cache::TtlCache;
use crate::config::{PoolConfig, ProviderConfig};
use crate::error::{AdapterError, ProviderError, Result, StoreError, TaskError};
use crate::handler::Handler;
use crate::instance::Instance;
use crate::keyscan::HostKeyScanner;
use crate::quota::QuotaInformation;
use crate::store::NodeStore;
use crate::task::{
	DeleteInstanceTask, GetQuotaForLabelTask, GetQuotaLimitsTask, ListInstancesTask, TaskManager,
};
use crate::types::{Node, NodeId, NodeRequest, NodeState};

/// How long an instance listing is served from cache.
pub const INSTANCE_CACHE_TTL: Duration = Duration::from_secs(5);

/// How long the estimated nodepool quota is served from cache.
pub const MAX_QUOTA_AGE: Duration = Duration::from_secs(300);

/// Interval between instance state polls while waiting on boot or deletion.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// One configured cloud provider.
pub struct Provider {
	config: ProviderConfig,
	adapter: Arc<dyn Adapter>,
	store: Arc<dyn NodeStore>,
	scanner: Arc<dyn HostKeyScanner>,
	task_manager: TaskManager,
	instances: TtlCache<Vec<Instance>>,
	nodepool_quota: TtlCache<QuotaInformation>,
	launcher_id: String,
}

impl Provider {
	pub fn new(
		config: ProviderConfig,
		adapter: Arc<dyn Adapter>,
		store: Arc<dyn NodeStore>,
		scanner: Arc<dyn HostKeyScanner>,
	) -> Self {
		let task_manager = TaskManager::new(config.name.clone(), config.rate);
		let launcher_id = format!("{}-{}", config.name, uuid7::uuid7());
		Self {
			config,
			adapter,
			store,
			scanner,
			task_manager,
			instances: TtlCache::new(INSTANCE_CACHE_TTL),
			nodepool_quota: TtlCache::new(MAX_QUOTA_AGE),
			launcher_id,
		}
	}

	pub fn name(&self) -> &str {
		&self.config.name
	}

	pub fn config(&self) -> &ProviderConfig {
		&self.config
	}

	pub fn adapter(&self) -> &Arc<dyn Adapter> {
		&self.adapter
	}

	pub fn store(&self) -> &Arc<dyn NodeStore> {
		&self.store
	}

	pub fn scanner(&self) -> &Arc<dyn HostKeyScanner> {
		&self.scanner
	}

	pub fn task_manager(&self) -> &TaskManager {
		&self.task_manager
	}

	/// Identity recorded on nodes launched and requests declined by this process.
	pub fn launcher_id(&self) -> &str {
		&self.launcher_id
	}

	pub async fn start(&self) {
		self.task_manager.start().await;
		info!(provider = %self.config.name, "Provider started");
	}

	pub async fn stop(&self) {
		self.task_manager.stop().await;
		info!(provider = %self.config.name, "Provider stopped");
	}

	/// Labels are always ready; there are no images to build.
	pub fn label_ready(&self, _label: &str) -> bool {
		true
	}

	/// Create the handler for `request` in `pool`.
	pub fn get_request_handler(self: &Arc<Self>, pool: &str, request: NodeRequest) -> Result<Handler> {
		let pool = self.pool(pool)?.clone();
		Ok(Handler::new(Arc::clone(self), pool, request))
	}

	fn pool(&self, name: &str) -> Result<&PoolConfig> {
		self.config.pool(name).ok_or_else(|| ProviderError::UnknownPool {
			provider: self.config.name.clone(),
			pool: name.to_string(),
		})
	}

	/// Provider-wide limits; unbounded when the adapter cannot report them.
	#[instrument(skip(self), fields(provider = %self.config.name))]
	pub async fn get_provider_limits(&self) -> Result<QuotaInformation> {
		let limit = self
			.task_manager
			.submit_task(GetQuotaLimitsTask {
				adapter: Arc::clone(&self.adapter),
			})
			.wait()
			.await?;
		Ok(limit.resolve())
	}

	/// Cost of one node of `ntype` in `pool`; zero when the adapter cannot price it.
	pub async fn quota_needed_by_label(&self, ntype: &str, pool: &PoolConfig) -> Result<QuotaInformation> {
		let label = pool.label(ntype).ok_or_else(|| ProviderError::UnknownLabel {
			label: ntype.to_string(),
			pool: pool.name.clone(),
		})?;
		let cost = self
			.task_manager
			.submit_task(GetQuotaForLabelTask {
				adapter: Arc::clone(&self.adapter),
				label: label.clone(),
			})
			.wait()
			.await?;
		Ok(cost.resolve())
	}

	/// Resources used by instances this launcher does not track.
	///
	/// An instance is excluded only when this provider owns it and its node id
	/// is present in the store. Leaked instances of this provider count.
	#[instrument(skip(self), fields(provider = %self.config.name))]
	pub async fn unmanaged_quota_used(&self) -> Result<QuotaInformation> {
		let known = self.known_node_ids().await?;
		let instances = self.list_nodes().await?;

		let mut used = QuotaInformation::zero();
		for instance in instances.iter() {
			let tracked = instance.owner.as_ref().is_some_and(|owner| {
				owner.is_provider(&self.config.name)
					&& owner.node_id.as_ref().is_some_and(|id| known.contains(id))
			});
			if tracked {
				continue;
			}
			used += &instance.quota_information();
		}
		Ok(used)
	}

	/// Provider limits minus unmanaged usage, cached for [`MAX_QUOTA_AGE`].
	pub async fn estimated_nodepool_quota(&self) -> Result<QuotaInformation> {
		let quota = self
			.nodepool_quota
			.get_or_refresh(|| async {
				let mut quota = self.get_provider_limits().await?;
				quota -= &self.unmanaged_quota_used().await?;
				debug!(provider = %self.config.name, %quota, "Refreshed estimated nodepool quota");
				Ok::<_, ProviderError>(quota)
			})
			.await?;
		Ok(*quota)
	}

	/// Force the next quota estimate to refetch limits and usage.
	pub async fn invalidate_quota_cache(&self) {
		self.nodepool_quota.invalidate().await;
	}

	/// Resources used by nodes of this provider, optionally only in `pool`.
	pub async fn estimated_nodepool_quota_used(&self, pool: Option<&str>) -> Result<QuotaInformation> {
		let mut used = QuotaInformation::zero();
		for node in self.store.nodes().await? {
			if node.provider.as_deref() != Some(self.config.name.as_str()) {
				continue;
			}
			if let Some(pool) = pool {
				if node.pool.as_deref() != Some(pool) {
					continue;
				}
			}
			let Some(node_pool) = node.pool.as_deref() else {
				continue;
			};
			let Some(provider_pool) = self.config.pool(node_pool) else {
				warn!(
					provider = %self.config.name,
					pool = node_pool,
					node_id = ?node.id,
					"Node is in a pool that is no longer configured"
				);
				continue;
			};
			let Some(label) = node.label() else {
				continue;
			};
			match self.quota_needed_by_label(label, provider_pool).await {
				Ok(needed) => used += &needed,
				Err(ProviderError::UnknownLabel { .. }) => {
					warn!(
						provider = %self.config.name,
						pool = node_pool,
						label,
						node_id = ?node.id,
						"Node has a label that is no longer configured"
					);
				}
				Err(e) => return Err(e),
			}
		}
		Ok(used)
	}

	/// Mark every leaked instance of this provider for deletion.
	///
	/// Returns the ids of the markers stored by this pass. Instances already
	/// held by a DELETING node are left alone, so repeated passes are no-ops.
	#[instrument(skip(self), fields(provider = %self.config.name))]
	pub async fn cleanup_leaked_resources(&self) -> Result<Vec<NodeId>> {
		let nodes = self.store.nodes().await?;
		let known: HashSet<NodeId> = nodes.iter().filter_map(|n| n.id.clone()).collect();
		let mut deleting: HashSet<String> = nodes
			.iter()
			.filter(|n| {
				n.state == NodeState::Deleting
					&& n.provider.as_deref() == Some(self.config.name.as_str())
			})
			.filter_map(|n| n.external_id.clone())
			.collect();

		let instances = self.list_nodes().await?;
		let mut markers = Vec::new();
		for instance in instances.iter() {
			if instance.deleted {
				continue;
			}
			let Some(owner) = instance.owner.as_ref() else {
				continue;
			};
			if !owner.is_provider(&self.config.name) {
				continue;
			}
			if owner.node_id.as_ref().is_some_and(|id| known.contains(id)) {
				continue;
			}
			if deleting.contains(&instance.external_id) {
				continue;
			}

			info!(
				provider = %self.config.name,
				external_id = %instance.external_id,
				node_id = ?owner.node_id,
				"Marking leaked instance for deletion"
			);
			let mut marker = Node::deleting_marker(&self.config.name, &instance.external_id);
			let id = self.store.store_node(&mut marker).await?;
			deleting.insert(instance.external_id.clone());
			markers.push(id);
		}
		Ok(markers)
	}

	/// Every instance visible to the adapter, served from a 5s cache.
	pub async fn list_nodes(&self) -> Result<Arc<Vec<Instance>>> {
		self.instances
			.get_or_refresh(|| async {
				let instances = self
					.task_manager
					.submit_task(ListInstancesTask {
						adapter: Arc::clone(&self.adapter),
					})
					.wait()
					.await?;
				debug!(provider = %self.config.name, count = instances.len(), "Listed instances");
				Ok::<_, ProviderError>(instances)
			})
			.await
	}

	pub async fn get_instance(&self, external_id: &str) -> Result<Option<Instance>> {
		let instances = self.list_nodes().await?;
		Ok(instances
			.iter()
			.find(|instance| instance.external_id == external_id)
			.cloned())
	}

	/// Live instances this provider owns, optionally only in `pool`.
	pub async fn count_nodes(&self, pool: Option<&str>) -> Result<usize> {
		let instances = self.list_nodes().await?;
		Ok(instances
			.iter()
			.filter(|instance| !instance.deleted && instance.owned_by(&self.config.name))
			.filter_map(|instance| instance.owner.as_ref())
			.filter(|owner| pool.is_none() || owner.pool.as_deref() == pool)
			.count())
	}

	/// Request deletion of an instance.
	#[instrument(skip(self), fields(provider = %self.config.name))]
	pub async fn cleanup_node(&self, external_id: &str) -> Result<()> {
		let present = self
			.get_instance(external_id)
			.await?
			.is_some_and(|instance| !instance.deleted);
		if !present {
			return Err(ProviderError::NotFound {
				external_id: external_id.to_string(),
			});
		}

		let result = self
			.task_manager
			.submit_task(DeleteInstanceTask {
				adapter: Arc::clone(&self.adapter),
				external_id: external_id.to_string(),
			})
			.wait()
			.await;
		match result {
			Ok(()) => Ok(()),
			Err(TaskError::Adapter(AdapterError::NotFound { external_id })) => {
				Err(ProviderError::NotFound { external_id })
			}
			Err(e) => Err(e.into()),
		}
	}

	/// Poll until the instance is gone or deleted.
	pub async fn wait_for_node_cleanup(&self, external_id: &str, timeout: Duration) -> Result<()> {
		let start = Instant::now();
		loop {
			let gone = self
				.get_instance(external_id)
				.await?
				.map_or(true, |instance| instance.deleted);
			if gone {
				return Ok(());
			}
			if start.elapsed() >= timeout {
				return Err(ProviderError::ServerDeleteTimeout {
					external_id: external_id.to_string(),
					timeout,
				});
			}
			tokio::time::sleep(POLL_INTERVAL).await;
		}
	}

	/// Delete a node's instance, wait for it to disappear, then drop the record.
	#[instrument(skip(self, node), fields(provider = %self.config.name, node_id = ?node.id))]
	pub async fn delete_node(&self, node: &Node) -> Result<()> {
		if let Some(external_id) = node.external_id.as_deref() {
			match self.cleanup_node(external_id).await {
				Ok(()) => {
					self.wait_for_node_cleanup(external_id, self.config.delete_timeout)
						.await?;
				}
				Err(ProviderError::NotFound { .. }) => {
					debug!(external_id, "Instance already gone");
				}
				Err(e) => return Err(e),
			}
		}

		if let Some(id) = node.id.as_ref() {
			match self.store.delete_node(id).await {
				Ok(()) | Err(StoreError::NodeNotFound { .. }) => {}
				Err(e) => return Err(e.into()),
			}
		}
		info!(external_id = ?node.external_id, "Deleted node");
		Ok(())
	}

	/// Reap every DELETING, FAILED or ABORTED node of this provider.
	///
	/// Failed and aborted launches are first moved to DELETING so a delete
	/// that does not finish is retried on the next pass.
	#[instrument(skip(self), fields(provider = %self.config.name))]
	pub async fn cleanup_deleting_nodes(&self) -> Result<usize> {
		let mut deleted = 0;
		for mut node in self.store.nodes().await? {
			if node.provider.as_deref() != Some(self.config.name.as_str()) {
				continue;
			}
			match node.state {
				NodeState::Deleting => {}
				NodeState::Failed | NodeState::Aborted => {
					debug!(node_id = ?node.id, state = %node.state, "Marking failed launch for deletion");
					node.set_state(NodeState::Deleting);
					if let Err(e) = self.store.store_node(&mut node).await {
						warn!(node_id = ?node.id, error = %e, "Failed to mark node for deletion");
						continue;
					}
				}
				_ => continue,
			}
			match self.delete_node(&node).await {
				Ok(()) => deleted += 1,
				Err(e) => {
					warn!(
						node_id = ?node.id,
						external_id = ?node.external_id,
						error = %e,
						"Failed to delete node, will retry"
					);
				}
			}
		}
		Ok(deleted)
	}

	async fn known_node_ids(&self) -> Result<HashSet<NodeId>> {
		Ok(self
			.store
			.nodes()
			.await?
			.into_iter()
			.filter_map(|node| node.id)
			.collect())
	}
}

impl std::fmt::Debug for Provider {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Provider")
			.field("name", &self.config.name)
			.field("launcher_id", &self.launcher_id)
			.finish_non_exhaustive()
	}
}
