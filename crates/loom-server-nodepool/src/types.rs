// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Node and node request records.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConnectionType;

/// Identifier assigned to a node by the node store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for NodeId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&str> for NodeId {
	fn from(s: &str) -> Self {
		Self(s.to_string())
	}
}

impl From<String> for NodeId {
	fn from(s: String) -> Self {
		Self(s)
	}
}

/// Unique identifier for a node request, using UUID7 (time-ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(uuid7::Uuid);

impl RequestId {
	pub fn new() -> Self {
		Self(uuid7::uuid7())
	}
}

impl Default for RequestId {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for RequestId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for RequestId {
	type Err = uuid7::ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(s.parse::<uuid7::Uuid>()?))
	}
}

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeState {
	/// Record allocated, launch not started
	Init,
	/// Instance is being created
	Building,
	/// Instance is being tested
	Testing,
	/// Ready for use
	Ready,
	/// Assigned to a requestor
	InUse,
	/// Finished being used
	Used,
	/// Held for inspection
	Hold,
	/// Scheduled for deletion
	Deleting,
	/// Launch failed
	Failed,
	/// Launch aborted, typically because the cloud ran out of quota
	Aborted,
	/// Removed
	Deleted,
}

impl NodeState {
	/// True for the states a launch attempt can end in.
	pub fn is_launch_terminal(self) -> bool {
		matches!(self, NodeState::Ready | NodeState::Failed | NodeState::Aborted)
	}
}

impl std::fmt::Display for NodeState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			NodeState::Init => "init",
			NodeState::Building => "building",
			NodeState::Testing => "testing",
			NodeState::Ready => "ready",
			NodeState::InUse => "in-use",
			NodeState::Used => "used",
			NodeState::Hold => "hold",
			NodeState::Deleting => "deleting",
			NodeState::Failed => "failed",
			NodeState::Aborted => "aborted",
			NodeState::Deleted => "deleted",
		};
		f.write_str(s)
	}
}

fn default_username() -> String {
	"zuul".to_string()
}

fn default_connection_port() -> u16 {
	22
}

/// A provisioned (or to-be-provisioned) machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
	pub id: Option<NodeId>,
	#[serde(rename = "type", default)]
	pub node_type: Vec<String>,
	pub state: NodeState,
	pub state_time: DateTime<Utc>,
	pub provider: Option<String>,
	pub pool: Option<String>,
	pub launcher: Option<String>,
	pub allocated_to: Option<RequestId>,
	pub external_id: Option<String>,
	pub hostname: Option<String>,
	pub interface_ip: Option<IpAddr>,
	pub public_ipv4: Option<IpAddr>,
	pub private_ipv4: Option<IpAddr>,
	pub public_ipv6: Option<IpAddr>,
	pub region: Option<String>,
	pub az: Option<String>,
	#[serde(default)]
	pub host_keys: Vec<String>,
	#[serde(default = "default_username")]
	pub username: String,
	#[serde(default)]
	pub connection_type: ConnectionType,
	#[serde(default = "default_connection_port")]
	pub connection_port: u16,
	pub python_path: Option<String>,
	pub shell_type: Option<String>,
	pub created_time: DateTime<Utc>,
}

impl Node {
	pub fn new(state: NodeState) -> Self {
		let now = Utc::now();
		Self {
			id: None,
			node_type: Vec::new(),
			state,
			state_time: now,
			provider: None,
			pool: None,
			launcher: None,
			allocated_to: None,
			external_id: None,
			hostname: None,
			interface_ip: None,
			public_ipv4: None,
			private_ipv4: None,
			public_ipv6: None,
			region: None,
			az: None,
			host_keys: Vec::new(),
			username: default_username(),
			connection_type: ConnectionType::default(),
			connection_port: default_connection_port(),
			python_path: None,
			shell_type: None,
			created_time: now,
		}
	}

	/// A DELETING placeholder standing in for a leaked instance.
	pub fn deleting_marker(provider: &str, external_id: &str) -> Self {
		let mut node = Self::new(NodeState::Deleting);
		node.provider = Some(provider.to_string());
		node.external_id = Some(external_id.to_string());
		node
	}

	pub fn set_state(&mut self, state: NodeState) {
		self.state = state;
		self.state_time = Utc::now();
	}

	/// The label the node was requested with.
	pub fn label(&self) -> Option<&str> {
		self.node_type.first().map(String::as_str)
	}
}

/// Shared handle on a node owned by one launcher and observed by its handler.
///
/// The lock is only ever held for the duration of a copy or a closure, never
/// across an await point.
#[derive(Debug, Clone)]
pub struct NodeHandle(Arc<Mutex<Node>>);

impl NodeHandle {
	pub fn new(node: Node) -> Self {
		Self(Arc::new(Mutex::new(node)))
	}

	pub fn snapshot(&self) -> Node {
		self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
	}

	pub fn update<R>(&self, f: impl FnOnce(&mut Node) -> R) -> R {
		let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
		f(&mut guard)
	}

	pub fn state(&self) -> NodeState {
		self.0.lock().unwrap_or_else(|e| e.into_inner()).state
	}

	pub fn id(&self) -> Option<NodeId> {
		self.0.lock().unwrap_or_else(|e| e.into_inner()).id.clone()
	}
}

/// Lifecycle state of a node request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestState {
	Requested,
	Pending,
	Fulfilled,
	Failed,
}

/// A request for a set of nodes, one per entry in `node_types`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRequest {
	pub id: RequestId,
	pub state: RequestState,
	pub state_time: DateTime<Utc>,
	pub node_types: Vec<String>,
	#[serde(default)]
	pub nodes: Vec<NodeId>,
	pub provider: Option<String>,
	pub requestor: Option<String>,
	#[serde(default)]
	pub declined_by: Vec<String>,
}

impl NodeRequest {
	pub fn new(node_types: Vec<String>) -> Self {
		Self {
			id: RequestId::new(),
			state: RequestState::Requested,
			state_time: Utc::now(),
			node_types,
			nodes: Vec::new(),
			provider: None,
			requestor: None,
			declined_by: Vec::new(),
		}
	}

	pub fn with_requestor(mut self, requestor: impl Into<String>) -> Self {
		self.requestor = Some(requestor.into());
		self
	}

	pub fn set_state(&mut self, state: RequestState) {
		self.state = state;
		self.state_time = Utc::now();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn node_state_serializes_kebab_case() {
		let json = serde_json::to_string(&NodeState::InUse).unwrap();
		assert_eq!(json, "\"in-use\"");
		let back: NodeState = serde_json::from_str("\"deleting\"").unwrap();
		assert_eq!(back, NodeState::Deleting);
	}

	#[test]
	fn node_type_serializes_as_type() {
		let mut node = Node::new(NodeState::Building);
		node.node_type = vec!["ubuntu-noble".to_string()];
		let value = serde_json::to_value(&node).unwrap();
		assert_eq!(value["type"][0], "ubuntu-noble");
		assert_eq!(value["username"], "zuul");
		assert_eq!(value["connection_port"], 22);
	}

	#[test]
	fn launch_terminal_states() {
		assert!(NodeState::Ready.is_launch_terminal());
		assert!(NodeState::Failed.is_launch_terminal());
		assert!(NodeState::Aborted.is_launch_terminal());
		assert!(!NodeState::Building.is_launch_terminal());
		assert!(!NodeState::Deleting.is_launch_terminal());
	}

	#[test]
	fn set_state_advances_state_time() {
		let mut node = Node::new(NodeState::Init);
		let before = node.state_time;
		node.set_state(NodeState::Building);
		assert_eq!(node.state, NodeState::Building);
		assert!(node.state_time >= before);
	}

	#[test]
	fn handle_updates_are_visible_to_clones() {
		let handle = NodeHandle::new(Node::new(NodeState::Building));
		let observer = handle.clone();
		handle.update(|n| n.set_state(NodeState::Ready));
		assert_eq!(observer.state(), NodeState::Ready);
	}

	#[test]
	fn deleting_marker_carries_external_id() {
		let marker = Node::deleting_marker("fake-provider", "i-123");
		assert_eq!(marker.state, NodeState::Deleting);
		assert_eq!(marker.provider.as_deref(), Some("fake-provider"));
		assert_eq!(marker.external_id.as_deref(), Some("i-123"));
		assert!(marker.id.is_none());
	}

	#[test]
	fn request_id_roundtrips_through_display() {
		let id = RequestId::new();
		let parsed: RequestId = id.to_string().parse().unwrap();
		assert_eq!(id, parsed);
	}
}
