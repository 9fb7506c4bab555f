// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Driver error types.

use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;

use crate::types::{NodeId, RequestId};

/// Errors returned by a provider adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
	/// The cloud API rejected or failed the call
	#[error("Cloud API error: {message}")]
	Api { message: String },

	/// The cloud reported that the account is out of quota
	#[error("Quota exceeded: {message}")]
	QuotaExceeded { message: String },

	/// The instance does not exist
	#[error("Instance not found: {external_id}")]
	NotFound { external_id: String },
}

impl AdapterError {
	pub fn api(message: impl Into<String>) -> Self {
		AdapterError::Api {
			message: message.into(),
		}
	}
}

/// Errors surfaced by [`crate::task::TaskHandle::wait`].
#[derive(Debug, Error)]
pub enum TaskError {
	#[error(transparent)]
	Adapter(#[from] AdapterError),

	#[error("Task manager {manager} stopped before {task} completed")]
	ManagerStopped { manager: String, task: &'static str },
}

/// Errors from the node persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("Node not found: {id}")]
	NodeNotFound { id: NodeId },

	#[error("Node store error: {message}")]
	Backend { message: String },
}

/// Errors from a host key scan.
#[derive(Debug, Error)]
pub enum ScanError {
	#[error("Connection to {ip}:{port} failed: {message}")]
	Connect {
		ip: IpAddr,
		port: u16,
		message: String,
	},

	#[error("Timed out after {timeout:?} scanning {ip}:{port}")]
	Timeout {
		ip: IpAddr,
		port: u16,
		timeout: Duration,
	},
}

/// Errors that end a single node launch.
///
/// These never cross the handler boundary; the handler only observes the
/// terminal state the launcher persisted for its node.
#[derive(Debug, Error)]
pub enum LaunchError {
	/// Every create attempt failed; carries the last adapter failure
	#[error("Launch failed for node {node_id} after {attempts} attempts: {source}")]
	Failed {
		node_id: NodeId,
		attempts: u32,
		#[source]
		source: TaskError,
	},

	/// The cloud is out of quota; the node is aborted rather than failed
	#[error("Quota exceeded launching node {node_id}: {message}")]
	QuotaExceeded { node_id: NodeId, message: String },

	/// The instance never reported ready within the boot timeout
	#[error("Timeout waiting for server {external_id} creation after {timeout:?}")]
	StatusTimeout {
		external_id: String,
		timeout: Duration,
	},

	/// Host key scanning failed
	#[error("Can't scan instance {hostname} key: {reason}")]
	Keyscan { hostname: String, reason: String },

	/// The node's label is not configured in its pool
	#[error("Label {label} not found in pool {pool}")]
	UnknownLabel { label: String, pool: String },

	/// The launcher task panicked or was cancelled
	#[error("Launcher for node {node_id} crashed: {message}")]
	Crashed { node_id: NodeId, message: String },

	#[error(transparent)]
	Task(#[from] TaskError),

	#[error(transparent)]
	Store(#[from] StoreError),

	#[error(transparent)]
	Provider(#[from] ProviderError),
}

/// Errors from provider-wide operations and request handling.
#[derive(Debug, Error)]
pub enum ProviderError {
	/// The instance is absent or already deleted
	#[error("Instance not found: {external_id}")]
	NotFound { external_id: String },

	/// Cleanup polling exceeded its bound
	#[error("Timeout waiting for server {external_id} deletion after {timeout:?}")]
	ServerDeleteTimeout {
		external_id: String,
		timeout: Duration,
	},

	#[error("Pool {pool} not found in provider {provider}")]
	UnknownPool { provider: String, pool: String },

	#[error("Label {label} not found in pool {pool}")]
	UnknownLabel { label: String, pool: String },

	/// Launching requires a node id assigned by the store
	#[error("Node has not been stored")]
	UnstoredNode,

	/// Launchers were still running when the join timeout expired
	#[error("Request {request_id} still has {running} running launches")]
	LaunchesPending { request_id: RequestId, running: usize },

	#[error(transparent)]
	Task(#[from] TaskError),

	#[error(transparent)]
	Store(#[from] StoreError),
}

pub type Result<T, E = ProviderError> = std::result::Result<T, E>;
