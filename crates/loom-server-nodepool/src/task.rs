// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Rate-limited execution of adapter calls.
//!
//! Every cloud call is wrapped in a [`Task`] and submitted to the provider's
//! [`TaskManager`]. The manager's worker starts queued tasks in submission
//! order, waiting `1 / rate` seconds between starts, and hands each result
//! back through a [`TaskHandle`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::adapter::Adapter;
use crate::config::ProviderLabel;
use crate::error::{AdapterError, TaskError};
use crate::instance::{Instance, InstanceMetadata};
use crate::quota::{Cost, Limit};

/// A single adapter call and its arguments.
#[async_trait]
pub trait Task: Send + Sync + 'static {
	type Output: Send + 'static;

	fn name(&self) -> &'static str;

	async fn main(&self) -> Result<Self::Output, AdapterError>;
}

struct QueuedTask {
	name: &'static str,
	run: BoxFuture<'static, ()>,
}

/// Awaitable result of a submitted task.
pub struct TaskHandle<T> {
	manager: String,
	task: &'static str,
	rx: oneshot::Receiver<Result<T, AdapterError>>,
}

impl<T> TaskHandle<T> {
	/// Wait for the task to finish.
	///
	/// Adapter errors are returned as-is. If the manager stops before the
	/// task runs, returns [`TaskError::ManagerStopped`].
	pub async fn wait(self) -> Result<T, TaskError> {
		match self.rx.await {
			Ok(result) => result.map_err(TaskError::from),
			Err(_) => Err(TaskError::ManagerStopped {
				manager: self.manager,
				task: self.task,
			}),
		}
	}
}

/// Serial, rate-limited dispatcher for one provider's adapter calls.
pub struct TaskManager {
	name: String,
	interval: Duration,
	queue_tx: mpsc::UnboundedSender<QueuedTask>,
	queue_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<QueuedTask>>>,
	shutdown_tx: broadcast::Sender<()>,
	worker: Mutex<Option<JoinHandle<()>>>,
	submitted: std::sync::Mutex<HashMap<&'static str, u64>>,
	stopped: AtomicBool,
}

impl TaskManager {
	/// `rate` is in operations per second; a non-positive rate disables the delay.
	pub fn new(name: impl Into<String>, rate: f64) -> Self {
		let interval = if rate.is_finite() && rate > 0.0 {
			Duration::from_secs_f64(1.0 / rate)
		} else {
			Duration::ZERO
		};
		let (queue_tx, queue_rx) = mpsc::unbounded_channel();
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			name: name.into(),
			interval,
			queue_tx,
			queue_rx: std::sync::Mutex::new(Some(queue_rx)),
			shutdown_tx,
			worker: Mutex::new(None),
			submitted: std::sync::Mutex::new(HashMap::new()),
			stopped: AtomicBool::new(false),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn interval(&self) -> Duration {
		self.interval
	}

	/// Spawn the worker. Tasks submitted before `start` run once it begins.
	#[instrument(skip(self), fields(manager = %self.name))]
	pub async fn start(&self) {
		let queue_rx = {
			let mut slot = self.queue_rx.lock().unwrap_or_else(|e| e.into_inner());
			slot.take()
		};
		let Some(mut queue_rx) = queue_rx else {
			debug!("Task manager already started");
			return;
		};

		let mut shutdown_rx = self.shutdown_tx.subscribe();
		let interval = self.interval;
		let manager = self.name.clone();

		let handle = tokio::spawn(async move {
			let mut last_start: Option<Instant> = None;
			loop {
				tokio::select! {
					biased;
					_ = shutdown_rx.recv() => {
						info!(manager = %manager, "Shutting down task manager");
						break;
					}
					next = queue_rx.recv() => {
						let Some(task) = next else { break };
						if let Some(last) = last_start {
							let wait = interval.saturating_sub(last.elapsed());
							if !wait.is_zero() {
								tokio::select! {
									biased;
									_ = shutdown_rx.recv() => {
										info!(manager = %manager, "Shutting down task manager");
										break;
									}
									_ = tokio::time::sleep(wait) => {}
								}
							}
						}
						last_start = Some(Instant::now());
						debug!(manager = %manager, task = task.name, "Starting task");
						tokio::spawn(task.run);
					}
				}
			}
		});

		*self.worker.lock().await = Some(handle);
		info!("Task manager started");
	}

	/// Stop the worker; tasks still queued resolve to `ManagerStopped`.
	#[instrument(skip(self), fields(manager = %self.name))]
	pub async fn stop(&self) {
		self.stopped.store(true, Ordering::SeqCst);
		let _ = self.shutdown_tx.send(());
		if let Some(handle) = self.worker.lock().await.take() {
			let _ = handle.await;
		}
		let unstarted = {
			let mut slot = self.queue_rx.lock().unwrap_or_else(|e| e.into_inner());
			slot.take()
		};
		drop(unstarted);
		info!("Task manager stopped");
	}

	pub fn is_stopped(&self) -> bool {
		self.stopped.load(Ordering::SeqCst)
	}

	/// Queue `task` for execution; never blocks.
	pub fn submit_task<T: Task>(&self, task: T) -> TaskHandle<T::Output> {
		let name = task.name();
		*self
			.submitted
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.entry(name)
			.or_insert(0) += 1;

		let (tx, rx) = oneshot::channel();
		let handle = TaskHandle {
			manager: self.name.clone(),
			task: name,
			rx,
		};

		if self.is_stopped() {
			return handle;
		}

		let run = async move {
			let result = task.main().await;
			let _ = tx.send(result);
		}
		.boxed();

		// A send error drops the task and with it the result sender.
		let _ = self.queue_tx.send(QueuedTask { name, run });
		handle
	}

	/// How many tasks named `name` have been submitted.
	pub fn submitted(&self, name: &str) -> u64 {
		self.submitted
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.get(name)
			.copied()
			.unwrap_or(0)
	}
}

pub struct CreateInstanceTask {
	pub adapter: Arc<dyn Adapter>,
	pub hostname: String,
	pub metadata: InstanceMetadata,
	pub label: ProviderLabel,
}

#[async_trait]
impl Task for CreateInstanceTask {
	type Output = String;

	fn name(&self) -> &'static str {
		"create_instance"
	}

	async fn main(&self) -> Result<String, AdapterError> {
		self.adapter
			.create_instance(&self.hostname, &self.metadata, &self.label)
			.await
	}
}

pub struct DeleteInstanceTask {
	pub adapter: Arc<dyn Adapter>,
	pub external_id: String,
}

#[async_trait]
impl Task for DeleteInstanceTask {
	type Output = ();

	fn name(&self) -> &'static str {
		"delete_instance"
	}

	async fn main(&self) -> Result<(), AdapterError> {
		self.adapter.delete_instance(&self.external_id).await
	}
}

pub struct ListInstancesTask {
	pub adapter: Arc<dyn Adapter>,
}

#[async_trait]
impl Task for ListInstancesTask {
	type Output = Vec<Instance>;

	fn name(&self) -> &'static str {
		"list_instances"
	}

	async fn main(&self) -> Result<Vec<Instance>, AdapterError> {
		self.adapter.list_instances().await
	}
}

pub struct GetQuotaLimitsTask {
	pub adapter: Arc<dyn Adapter>,
}

#[async_trait]
impl Task for GetQuotaLimitsTask {
	type Output = Limit;

	fn name(&self) -> &'static str {
		"get_quota_limits"
	}

	async fn main(&self) -> Result<Limit, AdapterError> {
		self.adapter.get_quota_limits().await
	}
}

pub struct GetQuotaForLabelTask {
	pub adapter: Arc<dyn Adapter>,
	pub label: ProviderLabel,
}

#[async_trait]
impl Task for GetQuotaForLabelTask {
	type Output = Cost;

	fn name(&self) -> &'static str {
		"get_quota_for_label"
	}

	async fn main(&self) -> Result<Cost, AdapterError> {
		self.adapter.get_quota_for_label(&self.label).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicU32;

	struct EchoTask {
		value: u32,
		runs: Arc<AtomicU32>,
	}

	#[async_trait]
	impl Task for EchoTask {
		type Output = u32;

		fn name(&self) -> &'static str {
			"echo"
		}

		async fn main(&self) -> Result<u32, AdapterError> {
			self.runs.fetch_add(1, Ordering::SeqCst);
			Ok(self.value)
		}
	}

	struct FailingTask;

	#[async_trait]
	impl Task for FailingTask {
		type Output = ();

		fn name(&self) -> &'static str {
			"failing"
		}

		async fn main(&self) -> Result<(), AdapterError> {
			Err(AdapterError::api("no capacity"))
		}
	}

	#[tokio::test]
	async fn runs_submitted_tasks_and_counts_them() {
		let manager = TaskManager::new("test", 0.0);
		manager.start().await;
		let runs = Arc::new(AtomicU32::new(0));

		let a = manager.submit_task(EchoTask {
			value: 1,
			runs: Arc::clone(&runs),
		});
		let b = manager.submit_task(EchoTask {
			value: 2,
			runs: Arc::clone(&runs),
		});

		assert_eq!(a.wait().await.unwrap(), 1);
		assert_eq!(b.wait().await.unwrap(), 2);
		assert_eq!(manager.submitted("echo"), 2);
		assert_eq!(manager.submitted("failing"), 0);
		assert_eq!(runs.load(Ordering::SeqCst), 2);
		manager.stop().await;
	}

	#[tokio::test]
	async fn adapter_errors_pass_through_unchanged() {
		let manager = TaskManager::new("test", 0.0);
		manager.start().await;

		let err = manager.submit_task(FailingTask).wait().await.unwrap_err();
		assert!(matches!(
			err,
			TaskError::Adapter(AdapterError::Api { ref message }) if message == "no capacity"
		));
		manager.stop().await;
	}

	#[tokio::test(start_paused = true)]
	async fn starts_are_spaced_by_rate() {
		let manager = TaskManager::new("test", 2.0);
		assert_eq!(manager.interval(), Duration::from_millis(500));
		manager.start().await;
		let runs = Arc::new(AtomicU32::new(0));

		let began = Instant::now();
		let handles: Vec<_> = (0..3)
			.map(|value| {
				manager.submit_task(EchoTask {
					value,
					runs: Arc::clone(&runs),
				})
			})
			.collect();
		for handle in handles {
			handle.wait().await.unwrap();
		}

		assert!(began.elapsed() >= Duration::from_millis(1000));
		manager.stop().await;
	}

	#[tokio::test(start_paused = true)]
	async fn stop_interrupts_rate_limit_delay() {
		let manager = TaskManager::new("test", 0.01);
		manager.start().await;
		let runs = Arc::new(AtomicU32::new(0));

		let first = manager.submit_task(EchoTask {
			value: 1,
			runs: Arc::clone(&runs),
		});
		let delayed = manager.submit_task(EchoTask {
			value: 2,
			runs: Arc::clone(&runs),
		});
		assert_eq!(first.wait().await.unwrap(), 1);

		tokio::time::timeout(Duration::from_secs(1), manager.stop())
			.await
			.expect("stop waited out the rate limit");
		let err = delayed.wait().await.unwrap_err();
		assert!(matches!(err, TaskError::ManagerStopped { task: "echo", .. }));
		assert_eq!(runs.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn tasks_after_stop_report_manager_stopped() {
		let manager = TaskManager::new("test", 0.0);
		manager.start().await;
		manager.stop().await;

		let err = manager.submit_task(FailingTask).wait().await.unwrap_err();
		assert!(matches!(err, TaskError::ManagerStopped { task: "failing", .. }));
	}
}
