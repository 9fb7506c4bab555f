// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Node request handling: quota admission and launch fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::PoolConfig;
use crate::error::{LaunchError, ProviderError, Result};
use crate::group::LaunchGroup;
use crate::launcher::Launcher;
use crate::provider::Provider;
use crate::quota::QuotaInformation;
use crate::types::{Node, NodeHandle, NodeId, NodeRequest, NodeState, RequestId, RequestState};

/// Result of one pass of [`Handler::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerStatus {
	/// The request can never be satisfied by this pool
	Declined,
	/// Some node types are waiting for quota; call `run` again later
	Paused,
	/// Every node type has a launcher
	Launched,
}

/// Terminal state of one node in a request.
#[derive(Debug)]
pub struct NodeOutcome {
	pub node_id: NodeId,
	pub state: NodeState,
	pub external_id: Option<String>,
	pub error: Option<LaunchError>,
}

/// Per-node report returned by [`Handler::wait_for_launches`].
#[derive(Debug)]
pub struct RequestOutcome {
	pub request_id: RequestId,
	pub state: RequestState,
	pub nodes: Vec<NodeOutcome>,
}

impl RequestOutcome {
	pub fn is_fulfilled(&self) -> bool {
		self.state == RequestState::Fulfilled
	}

	pub fn failed_nodes(&self) -> impl Iterator<Item = &NodeOutcome> {
		self.nodes.iter().filter(|n| n.state != NodeState::Ready)
	}
}

/// Owns one node request and the launches made for it.
pub struct Handler {
	provider: Arc<Provider>,
	pool: PoolConfig,
	request: NodeRequest,
	nodeset: Vec<NodeHandle>,
	group: LaunchGroup,
	paused: bool,
}

impl Handler {
	pub(crate) fn new(provider: Arc<Provider>, pool: PoolConfig, mut request: NodeRequest) -> Self {
		request.provider = Some(provider.name().to_string());
		Self {
			provider,
			pool,
			request,
			nodeset: Vec::new(),
			group: LaunchGroup::new(),
			paused: false,
		}
	}

	pub fn request(&self) -> &NodeRequest {
		&self.request
	}

	pub fn pool(&self) -> &PoolConfig {
		&self.pool
	}

	pub fn nodeset(&self) -> &[NodeHandle] {
		&self.nodeset
	}

	pub fn is_paused(&self) -> bool {
		self.paused
	}

	/// Images need no building, so they are always available.
	pub fn images_available(&self) -> bool {
		true
	}

	/// Whether the whole request could ever fit, ignoring current usage.
	#[instrument(skip(self), fields(request_id = %self.request.id, pool = %self.pool.name))]
	pub async fn has_provider_quota(&self, node_types: &[String]) -> Result<bool> {
		let mut needed = QuotaInformation::zero();
		for ntype in node_types {
			needed += &self.provider.quota_needed_by_label(ntype, &self.pool).await?;
		}

		if !self.pool.ignore_provider_quota {
			let mut cloud_quota = self.provider.estimated_nodepool_quota().await?;
			cloud_quota -= &needed;
			if !cloud_quota.non_negative() {
				debug!(%cloud_quota, %needed, "Request exceeds provider quota");
				return Ok(false);
			}
		}

		let mut pool_quota = self.pool.quota_limits();
		pool_quota -= &needed;
		if !pool_quota.non_negative() {
			debug!(%pool_quota, %needed, "Request exceeds pool quota");
			return Ok(false);
		}
		Ok(true)
	}

	/// Whether one more node of `ntype` fits right now.
	#[instrument(skip(self), fields(request_id = %self.request.id, pool = %self.pool.name))]
	pub async fn has_remaining_quota(&self, ntype: &str) -> Result<bool> {
		let needed = self.provider.quota_needed_by_label(ntype, &self.pool).await?;

		if !self.pool.ignore_provider_quota {
			let mut cloud_quota = self.provider.estimated_nodepool_quota().await?;
			cloud_quota -= &self.provider.estimated_nodepool_quota_used(None).await?;
			cloud_quota -= &needed;
			if !cloud_quota.non_negative() {
				debug!(%cloud_quota, "Provider quota exhausted");
				return Ok(false);
			}
		}

		let mut pool_quota = self.pool.quota_limits();
		pool_quota -= &self
			.provider
			.estimated_nodepool_quota_used(Some(&self.pool.name))
			.await?;
		pool_quota -= &needed;
		if !pool_quota.non_negative() {
			debug!(%pool_quota, "Pool quota exhausted");
			return Ok(false);
		}
		Ok(true)
	}

	/// Snapshot of whether every launcher has finished.
	pub fn launches_complete(&self) -> bool {
		self.group.all_done()
			&& self
				.nodeset
				.iter()
				.all(|node| node.state().is_launch_terminal())
	}

	/// Start a launcher for `node`, which must already be stored.
	pub fn launch(&mut self, node: NodeHandle) -> Result<()> {
		let snapshot = node.snapshot();
		let node_id = snapshot.id.clone().ok_or(ProviderError::UnstoredNode)?;
		let ntype = snapshot.label().unwrap_or_default();
		let label = self
			.pool
			.label(ntype)
			.cloned()
			.ok_or_else(|| ProviderError::UnknownLabel {
				label: ntype.to_string(),
				pool: self.pool.name.clone(),
			})?;

		let launcher = Launcher::new(Arc::clone(&self.provider), node.clone(), &self.pool, label);
		self.group.spawn(node_id, launcher.run());
		self.nodeset.push(node);
		Ok(())
	}

	/// Advance the request: decline it, pause on quota, or launch its nodes.
	#[instrument(skip(self), fields(request_id = %self.request.id, pool = %self.pool.name))]
	pub async fn run(&mut self) -> Result<HandlerStatus> {
		match self.request.state {
			RequestState::Failed => return Ok(HandlerStatus::Declined),
			RequestState::Requested => {
				self.request.set_state(RequestState::Pending);
				if let Some(reason) = self.decline_reason().await? {
					info!(reason, "Declining node request");
					self.request
						.declined_by
						.push(self.provider.launcher_id().to_string());
					self.request.set_state(RequestState::Failed);
					return Ok(HandlerStatus::Declined);
				}
			}
			RequestState::Pending | RequestState::Fulfilled => {}
		}

		let node_types = self.request.node_types.clone();
		for ntype in node_types.iter().skip(self.nodeset.len()) {
			if !self.has_remaining_quota(ntype).await? {
				if !self.paused {
					info!(label = %ntype, "Pausing request handling until quota frees up");
				}
				self.paused = true;
				return Ok(HandlerStatus::Paused);
			}
			self.paused = false;

			let node = self.allocate_node(ntype).await?;
			self.launch(node)?;
		}

		self.paused = false;
		Ok(HandlerStatus::Launched)
	}

	/// Join every launcher within `timeout` and settle the request state.
	#[instrument(skip(self), fields(request_id = %self.request.id))]
	pub async fn wait_for_launches(&mut self, timeout: Duration) -> Result<RequestOutcome> {
		let reports = self
			.group
			.join(timeout)
			.await
			.map_err(|running| ProviderError::LaunchesPending {
				request_id: self.request.id,
				running,
			})?;
		let mut errors: HashMap<NodeId, LaunchError> = reports
			.into_iter()
			.filter_map(|report| report.result.err().map(|e| (report.node_id, e)))
			.collect();

		let nodes: Vec<NodeOutcome> = self
			.nodeset
			.iter()
			.filter_map(|handle| {
				let node = handle.snapshot();
				let node_id = node.id?;
				Some(NodeOutcome {
					error: errors.remove(&node_id),
					node_id,
					state: node.state,
					external_id: node.external_id,
				})
			})
			.collect();

		let all_launched = self.nodeset.len() == self.request.node_types.len();
		let fulfilled = all_launched && nodes.iter().all(|n| n.state == NodeState::Ready);
		if fulfilled {
			self.request.set_state(RequestState::Fulfilled);
			info!(nodes = nodes.len(), "Node request fulfilled");
		} else {
			self.request.set_state(RequestState::Failed);
			warn!(
				failed = nodes.iter().filter(|n| n.state != NodeState::Ready).count(),
				"Node request failed"
			);
		}

		Ok(RequestOutcome {
			request_id: self.request.id,
			state: self.request.state,
			nodes,
		})
	}

	async fn decline_reason(&self) -> Result<Option<&'static str>> {
		if !self.images_available() {
			return Ok(Some("images unavailable"));
		}
		let unknown = self
			.request
			.node_types
			.iter()
			.any(|ntype| self.pool.label(ntype).is_none() || !self.provider.label_ready(ntype));
		if unknown {
			return Ok(Some("label not served by this pool"));
		}
		if !self.has_provider_quota(&self.request.node_types).await? {
			return Ok(Some("request exceeds quota"));
		}
		Ok(None)
	}

	async fn allocate_node(&mut self, ntype: &str) -> Result<NodeHandle> {
		let mut node = Node::new(NodeState::Init);
		node.node_type = vec![ntype.to_string()];
		node.provider = Some(self.provider.name().to_string());
		node.pool = Some(self.pool.name.clone());
		node.launcher = Some(self.provider.launcher_id().to_string());
		node.allocated_to = Some(self.request.id);

		let store = self.provider.store();
		let id = store.store_node(&mut node).await?;
		node.set_state(NodeState::Building);
		store.store_node(&mut node).await?;

		self.request.nodes.push(id.clone());
		debug!(node_id = %id, label = ntype, "Allocated node");
		Ok(NodeHandle::new(node))
	}
}

impl std::fmt::Debug for Handler {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Handler")
			.field("provider", &self.provider.name())
			.field("pool", &self.pool.name)
			.field("request", &self.request.id)
			.field("nodes", &self.nodeset.len())
			.field("paused", &self.paused)
			.finish()
	}
}
