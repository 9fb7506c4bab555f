// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Supervision of the launchers started for one request.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::LaunchError;
use crate::types::NodeId;

/// Outcome of one supervised launcher.
#[derive(Debug)]
pub struct LaunchReport {
	pub node_id: NodeId,
	pub result: Result<(), LaunchError>,
}

/// Counts a launcher as finished when its future completes, panics or is dropped.
struct FinishGuard(Arc<watch::Sender<usize>>);

impl Drop for FinishGuard {
	fn drop(&mut self) {
		self.0.send_modify(|finished| *finished += 1);
	}
}

/// Owns one join handle per launcher.
pub struct LaunchGroup {
	handles: Mutex<Vec<(NodeId, JoinHandle<Result<(), LaunchError>>)>>,
	spawned: AtomicUsize,
	finished: Arc<watch::Sender<usize>>,
}

impl LaunchGroup {
	pub fn new() -> Self {
		let (finished, _) = watch::channel(0);
		Self {
			handles: Mutex::new(Vec::new()),
			spawned: AtomicUsize::new(0),
			finished: Arc::new(finished),
		}
	}

	/// Spawn `launch` on the runtime under supervision.
	pub fn spawn<F>(&self, node_id: NodeId, launch: F)
	where
		F: Future<Output = Result<(), LaunchError>> + Send + 'static,
	{
		self.spawned.fetch_add(1, Ordering::SeqCst);
		let guard = FinishGuard(Arc::clone(&self.finished));
		let handle = tokio::spawn(async move {
			let _guard = guard;
			launch.await
		});
		self.handles
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.push((node_id, handle));
	}

	pub fn len(&self) -> usize {
		self.spawned.load(Ordering::SeqCst)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Launchers that have not finished yet.
	pub fn running(&self) -> usize {
		self.len().saturating_sub(*self.finished.borrow())
	}

	pub fn all_done(&self) -> bool {
		self.running() == 0
	}

	/// Wait up to `timeout` for every launcher to finish and collect their
	/// results. Returns the number still running on expiry.
	pub async fn join(&self, timeout: Duration) -> Result<Vec<LaunchReport>, usize> {
		let spawned = self.len();
		let mut rx = self.finished.subscribe();
		let finished = tokio::time::timeout(timeout, async move {
			rx.wait_for(|finished| *finished >= spawned).await.is_ok()
		})
		.await
		.unwrap_or(false);
		if !finished {
			return Err(self.running());
		}

		let handles: Vec<_> = {
			let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
			handles.drain(..).collect()
		};

		let mut reports = Vec::with_capacity(handles.len());
		for (node_id, handle) in handles {
			let result = match handle.await {
				Ok(result) => result,
				Err(e) => Err(LaunchError::Crashed {
					node_id: node_id.clone(),
					message: e.to_string(),
				}),
			};
			reports.push(LaunchReport { node_id, result });
		}
		Ok(reports)
	}
}

impl Default for LaunchGroup {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn empty_group_is_done() {
		let group = LaunchGroup::new();
		assert!(group.all_done());
		assert!(group.join(Duration::from_secs(1)).await.unwrap().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn tracks_running_launchers() {
		let group = LaunchGroup::new();
		group.spawn(NodeId::new("1"), async {
			tokio::time::sleep(Duration::from_secs(10)).await;
			Ok(())
		});
		group.spawn(NodeId::new("2"), async { Ok(()) });

		tokio::task::yield_now().await;
		assert!(!group.all_done());

		let err = group.join(Duration::from_secs(5)).await.unwrap_err();
		assert_eq!(err, 1);

		let reports = group.join(Duration::from_secs(10)).await.unwrap();
		assert_eq!(reports.len(), 2);
		assert!(reports.iter().all(|r| r.result.is_ok()));
		assert!(group.all_done());
	}

	#[tokio::test]
	async fn panicking_launcher_counts_as_finished() {
		let group = LaunchGroup::new();
		group.spawn(NodeId::new("7"), async {
			if true {
				panic!("launcher blew up");
			}
			Ok(())
		});

		let reports = group.join(Duration::from_secs(5)).await.unwrap();
		assert!(group.all_done());
		assert_eq!(reports.len(), 1);
		assert!(matches!(
			reports[0].result,
			Err(LaunchError::Crashed { ref node_id, .. }) if node_id.as_str() == "7"
		));
	}
}
