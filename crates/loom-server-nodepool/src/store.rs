// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Node persistence boundary.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{Node, NodeId};

/// Durable storage for node records.
#[async_trait]
pub trait NodeStore: Send + Sync {
	/// Persist `node`, assigning an id first if it has none.
	async fn store_node(&self, node: &mut Node) -> Result<NodeId, StoreError>;

	async fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StoreError>;

	/// Every stored node.
	async fn nodes(&self) -> Result<Vec<Node>, StoreError>;

	async fn delete_node(&self, id: &NodeId) -> Result<(), StoreError>;
}

/// In-process store handing out sequence ids like `0000000001`.
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
	nodes: Mutex<BTreeMap<NodeId, Node>>,
	sequence: AtomicU64,
}

impl MemoryNodeStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn next_id(&self) -> NodeId {
		let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
		NodeId::new(format!("{n:010}"))
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<NodeId, Node>> {
		self.nodes.lock().unwrap_or_else(|e| e.into_inner())
	}
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
	async fn store_node(&self, node: &mut Node) -> Result<NodeId, StoreError> {
		let id = match &node.id {
			Some(id) => id.clone(),
			None => {
				let id = self.next_id();
				node.id = Some(id.clone());
				id
			}
		};
		self.lock().insert(id.clone(), node.clone());
		Ok(id)
	}

	async fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StoreError> {
		Ok(self.lock().get(id).cloned())
	}

	async fn nodes(&self) -> Result<Vec<Node>, StoreError> {
		Ok(self.lock().values().cloned().collect())
	}

	async fn delete_node(&self, id: &NodeId) -> Result<(), StoreError> {
		match self.lock().remove(id) {
			Some(_) => Ok(()),
			None => Err(StoreError::NodeNotFound { id: id.clone() }),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::NodeState;

	#[tokio::test]
	async fn assigns_sequential_padded_ids() {
		let store = MemoryNodeStore::new();
		let mut a = Node::new(NodeState::Init);
		let mut b = Node::new(NodeState::Init);

		assert_eq!(store.store_node(&mut a).await.unwrap().as_str(), "0000000001");
		assert_eq!(store.store_node(&mut b).await.unwrap().as_str(), "0000000002");
		assert_eq!(a.id, Some(NodeId::new("0000000001")));
	}

	#[tokio::test]
	async fn restoring_keeps_id_and_overwrites() {
		let store = MemoryNodeStore::new();
		let mut node = Node::new(NodeState::Init);
		let id = store.store_node(&mut node).await.unwrap();

		node.set_state(NodeState::Building);
		assert_eq!(store.store_node(&mut node).await.unwrap(), id);

		let stored = store.get_node(&id).await.unwrap().unwrap();
		assert_eq!(stored.state, NodeState::Building);
		assert_eq!(store.nodes().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn delete_missing_node_errors() {
		let store = MemoryNodeStore::new();
		let err = store.delete_node(&NodeId::new("0000000009")).await.unwrap_err();
		assert!(matches!(err, StoreError::NodeNotFound { .. }));
	}
}
