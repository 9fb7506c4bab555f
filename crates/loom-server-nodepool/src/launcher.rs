// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Launch state machine for a single node.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{PoolConfig, ProviderLabel};
use crate::error::{AdapterError, LaunchError, TaskError};
use crate::instance::{Instance, InstanceMetadata, InstanceOwner};
use crate::keyscan::KEYSCAN_TIMEOUT;
use crate::provider::{Provider, POLL_INTERVAL};
use crate::task::CreateInstanceTask;
use crate::types::{NodeHandle, NodeId, NodeState};

/// Delay between create attempts.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Brings one node from BUILDING to READY, or to FAILED/ABORTED.
pub struct Launcher {
	provider: Arc<Provider>,
	node: NodeHandle,
	pool: PoolConfig,
	label: ProviderLabel,
	retries: u32,
	boot_timeout: Duration,
}

impl Launcher {
	pub fn new(provider: Arc<Provider>, node: NodeHandle, pool: &PoolConfig, label: ProviderLabel) -> Self {
		let retries = provider.config().launch_retries_for(pool).max(1);
		let boot_timeout = provider.config().boot_timeout_for(pool);
		Self {
			provider,
			node,
			pool: pool.clone(),
			label,
			retries,
			boot_timeout,
		}
	}

	/// Run the launch and record its outcome on the node.
	///
	/// On failure the node is marked ABORTED when the cloud is out of quota
	/// and FAILED otherwise. The node keeps any `external_id` it obtained so
	/// the reaper in [`Provider::cleanup_deleting_nodes`] can delete the
	/// instance along with the record.
	pub async fn run(self) -> Result<(), LaunchError> {
		let result = self.launch().await;
		let Err(err) = result else {
			return Ok(());
		};

		let state = match err {
			LaunchError::QuotaExceeded { .. } => NodeState::Aborted,
			_ => NodeState::Failed,
		};
		let node = self.node.update(|n| {
			n.set_state(state);
			n.clone()
		});
		error!(
			node_id = ?node.id,
			provider = %self.provider.name(),
			state = %state,
			error = %err,
			"Launch failed"
		);

		if let Err(e) = self.persist().await {
			warn!(node_id = ?node.id, error = %e, "Failed to persist launch failure");
		}
		Err(err)
	}

	/// The launch itself, without failure bookkeeping.
	pub async fn launch(&self) -> Result<(), LaunchError> {
		let node_id = match self.node.id() {
			Some(id) => id,
			None => self.persist().await?,
		};
		let hostname = format!("nodepool-{node_id}");
		self.node.update(|n| n.hostname = Some(hostname.clone()));

		let external_id = self.create_instance(&node_id, &hostname).await?;
		self.node.update(|n| n.external_id = Some(external_id.clone()));
		self.persist().await?;

		let instance = self.wait_for_ready(&external_id).await?;
		let interface_ip = self.connection_ip(&instance);

		let image = &self.label.cloud_image;
		let host_keys = if self.pool.host_key_checking {
			let ip = interface_ip.ok_or_else(|| LaunchError::Keyscan {
				hostname: hostname.clone(),
				reason: "instance has no usable address".to_string(),
			})?;
			self.provider
				.scanner()
				.scan(
					ip,
					image.connection_port,
					KEYSCAN_TIMEOUT,
					image.connection_type.gathers_host_keys(),
				)
				.await
				.map_err(|e| LaunchError::Keyscan {
					hostname: hostname.clone(),
					reason: e.to_string(),
				})?
		} else {
			Vec::new()
		};

		self.node.update(|n| {
			n.interface_ip = interface_ip;
			n.public_ipv4 = instance.public_ipv4;
			n.private_ipv4 = instance.private_ipv4;
			n.public_ipv6 = instance.public_ipv6;
			n.region = instance.region.clone();
			n.az = instance.az.clone();
			n.host_keys = host_keys;
			n.username = image.username.clone();
			n.connection_type = image.connection_type;
			n.connection_port = image.connection_port;
			n.python_path = image.python_path.clone();
			n.shell_type = image.shell_type.clone();
			n.set_state(NodeState::Ready);
		});
		self.persist().await?;

		info!(
			node_id = %node_id,
			external_id = %external_id,
			provider = %self.provider.name(),
			ip = ?interface_ip,
			"Node is ready"
		);
		Ok(())
	}

	async fn create_instance(&self, node_id: &NodeId, hostname: &str) -> Result<String, LaunchError> {
		let image = &self.label.cloud_image;
		let metadata = InstanceMetadata {
			owner: InstanceOwner {
				provider: self.provider.name().to_string(),
				pool: Some(self.pool.name.clone()),
				node_id: Some(node_id.clone()),
			},
			ssh_keys: image.key.as_ref().map(|key| format!("{}:{}", image.username, key)),
		};

		let mut attempts = 0;
		loop {
			attempts += 1;
			debug!(node_id = %node_id, attempt = attempts, retries = self.retries, "Creating instance");

			let result = self
				.provider
				.task_manager()
				.submit_task(CreateInstanceTask {
					adapter: Arc::clone(self.provider.adapter()),
					hostname: hostname.to_string(),
					metadata: metadata.clone(),
					label: self.label.clone(),
				})
				.wait()
				.await;

			match result {
				Ok(external_id) => return Ok(external_id),
				Err(TaskError::Adapter(AdapterError::QuotaExceeded { message })) => {
					self.provider.invalidate_quota_cache().await;
					return Err(LaunchError::QuotaExceeded {
						node_id: node_id.clone(),
						message,
					});
				}
				Err(e @ TaskError::ManagerStopped { .. }) => return Err(e.into()),
				Err(e) if attempts >= self.retries => {
					return Err(LaunchError::Failed {
						node_id: node_id.clone(),
						attempts,
						source: e,
					});
				}
				Err(e) => {
					warn!(
						node_id = %node_id,
						attempt = attempts,
						retries = self.retries,
						error = %e,
						"Launch attempt failed"
					);
					tokio::time::sleep(RETRY_DELAY).await;
				}
			}
		}
	}

	async fn wait_for_ready(&self, external_id: &str) -> Result<Instance, LaunchError> {
		let start = Instant::now();
		loop {
			if let Some(instance) = self.provider.get_instance(external_id).await? {
				if instance.ready {
					return Ok(instance);
				}
			}
			if start.elapsed() >= self.boot_timeout {
				return Err(LaunchError::StatusTimeout {
					external_id: external_id.to_string(),
					timeout: self.boot_timeout,
				});
			}
			tokio::time::sleep(POLL_INTERVAL).await;
		}
	}

	fn connection_ip(&self, instance: &Instance) -> Option<IpAddr> {
		let public = instance
			.interface_ip
			.or(instance.public_ipv4)
			.or(instance.public_ipv6);
		if self.pool.use_internal_ip {
			instance.private_ipv4.or(public)
		} else {
			public
		}
	}

	async fn persist(&self) -> Result<NodeId, LaunchError> {
		let mut node = self.node.snapshot();
		let id = self.provider.store().store_node(&mut node).await?;
		self.node.update(|n| n.id = Some(id.clone()));
		Ok(id)
	}
}
