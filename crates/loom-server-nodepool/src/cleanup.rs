// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background reconciliation of leaked instances and DELETING nodes.

use std::sync::Arc;

use crate::provider::Provider;

/// Start the background cleanup task for `provider`.
///
/// Runs one pass immediately so a restarted launcher reconciles at once,
/// then loops at the provider's cleanup interval.
pub async fn start_cleanup_task(provider: Arc<Provider>) {
	tracing::info!(provider = %provider.name(), "Starting cleanup task");

	run_cleanup(&provider).await;

	let interval = provider.config().cleanup_interval;

	loop {
		tokio::time::sleep(interval).await;
		run_cleanup(&provider).await;
	}
}

/// One leak reconciliation pass followed by one reaping pass.
pub async fn run_cleanup(provider: &Provider) {
	tracing::debug!(provider = %provider.name(), "Running leaked resource cleanup");

	match provider.cleanup_leaked_resources().await {
		Ok(markers) if !markers.is_empty() => {
			tracing::info!(
				provider = %provider.name(),
				count = markers.len(),
				"Marked leaked instances for deletion"
			);
		}
		Ok(_) => {
			tracing::debug!(provider = %provider.name(), "No leaked instances found");
		}
		Err(e) => {
			tracing::error!(provider = %provider.name(), error = %e, "Leaked resource cleanup failed");
		}
	}

	match provider.cleanup_deleting_nodes().await {
		Ok(count) if count > 0 => {
			tracing::info!(provider = %provider.name(), count, "Deleted nodes");
		}
		Ok(_) => {
			tracing::debug!(provider = %provider.name(), "No nodes awaiting deletion");
		}
		Err(e) => {
			tracing::error!(provider = %provider.name(), error = %e, "Node deletion pass failed");
		}
	}
}
