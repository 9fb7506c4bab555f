// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Loom nodepool launcher binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use loom_server_nodepool::{
	start_cleanup_task, Driver, FakeDriver, FakeScanner, HandlerStatus, HostKeyScanner,
	MemoryNodeStore, NodeRequest, NodeStore, TcpProbeScanner,
};
use loom_server_nodepool_config::{LoggingConfig, NodepoolConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Loom nodepool - node provisioning and quota admission.
#[derive(Parser, Debug)]
#[command(name = "loom-nodepool", about = "Loom nodepool launcher", version)]
struct Args {
	/// Config file (defaults to /etc/loom/nodepool.toml)
	#[arg(long, short, global = true, env = "LOOM_NODEPOOL_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Validate the configuration and print the resolved providers
	Check,
	/// Run one node request against an in-memory cloud
	Simulate(SimulateArgs),
}

#[derive(clap::Args, Debug)]
struct SimulateArgs {
	/// Provider to launch from (defaults to the first configured)
	#[arg(long)]
	provider: Option<String>,

	/// Pool to launch from (defaults to the provider's first pool)
	#[arg(long)]
	pool: Option<String>,

	/// Label to request; repeat for multi-node requests
	#[arg(long = "label", short, required = true)]
	labels: Vec<String>,

	/// Reject this many creates before the cloud starts accepting them
	#[arg(long, default_value_t = 0)]
	fail_creates: u32,

	/// Probe the node's SSH port over TCP instead of faking the keyscan
	#[arg(long)]
	tcp_keyscan: bool,

	/// Give up on quota and launches after this many seconds
	#[arg(long, default_value_t = 600)]
	timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let config = match &args.config {
		Some(path) => loom_server_nodepool_config::load_config_with_file(path),
		None => loom_server_nodepool_config::load_config(),
	}
	.context("failed to load nodepool configuration")?;

	init_tracing(&config.logging);

	match args.command {
		Command::Check => check(&config),
		Command::Simulate(sim) => simulate(config, sim).await,
	}
}

fn init_tracing(logging: &LoggingConfig) {
	let fmt_layer = if logging.json {
		tracing_subscriber::fmt::layer().json().boxed()
	} else {
		tracing_subscriber::fmt::layer().boxed()
	};

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| logging.level.clone().into()),
		)
		.with(fmt_layer)
		.init();
}

fn check(config: &NodepoolConfig) -> anyhow::Result<()> {
	if config.providers.is_empty() {
		bail!("no providers configured");
	}

	for provider in &config.providers {
		println!(
			"provider {} (rate {}/s, {} retries, boot timeout {}s)",
			provider.name,
			provider.rate,
			provider.launch_retries,
			provider.boot_timeout.as_secs()
		);
		for pool in provider.pools.values() {
			println!("  pool {} limits {}", pool.name, pool.quota_limits());
			for label in pool.labels.values() {
				println!(
					"    label {} image {} via {}",
					label.name, label.cloud_image.name, label.cloud_image.connection_type
				);
			}
		}
	}
	Ok(())
}

async fn simulate(config: NodepoolConfig, args: SimulateArgs) -> anyhow::Result<()> {
	let provider_config = match &args.provider {
		Some(name) => config
			.provider(name)
			.with_context(|| format!("unknown provider {name}"))?,
		None => config.providers.first().context("no providers configured")?,
	}
	.clone();
	let pool = match args.pool {
		Some(pool) => pool,
		None => provider_config
			.pools
			.keys()
			.next()
			.cloned()
			.with_context(|| format!("provider {} has no pools", provider_config.name))?,
	};

	let driver = FakeDriver::default();
	driver.adapter().fail_next_creates(args.fail_creates);

	let store: Arc<dyn NodeStore> = Arc::new(MemoryNodeStore::new());
	let scanner: Arc<dyn HostKeyScanner> = if args.tcp_keyscan {
		Arc::new(TcpProbeScanner)
	} else {
		Arc::new(FakeScanner::new(Vec::new()))
	};

	let provider = driver.get_provider(provider_config, store, scanner)?;
	provider.start().await;
	let cleanup = tokio::spawn(start_cleanup_task(Arc::clone(&provider)));

	let timeout = Duration::from_secs(args.timeout_secs);
	let request = NodeRequest::new(args.labels).with_requestor("loom-nodepool-cli");
	let mut handler = provider.get_request_handler(&pool, request)?;

	let admission = tokio::time::timeout(timeout, async {
		loop {
			match handler.run().await? {
				HandlerStatus::Paused => tokio::time::sleep(Duration::from_secs(1)).await,
				status => return anyhow::Ok(status),
			}
		}
	})
	.await;

	let result = match admission {
		Err(_) => Err(anyhow::anyhow!(
			"request still waiting for quota after {}s",
			timeout.as_secs()
		)),
		Ok(Err(e)) => Err(e),
		Ok(Ok(HandlerStatus::Declined)) => {
			println!("request {} declined by {}", handler.request().id, provider.launcher_id());
			Ok(())
		}
		Ok(Ok(_)) => handler
			.wait_for_launches(timeout)
			.await
			.map_err(anyhow::Error::from)
			.and_then(report),
	};

	cleanup.abort();
	provider.stop().await;
	result
}

fn report(outcome: loom_server_nodepool::RequestOutcome) -> anyhow::Result<()> {
	println!("request {} {:?}", outcome.request_id, outcome.state);
	for node in &outcome.nodes {
		let external_id = node.external_id.as_deref().unwrap_or("-");
		match &node.error {
			Some(error) => println!("  node {} {} {external_id}: {error}", node.node_id, node.state),
			None => println!("  node {} {} {external_id}", node.node_id, node.state),
		}
	}
	if !outcome.is_fulfilled() {
		bail!("{} node(s) failed to launch", outcome.failed_nodes().count());
	}
	Ok(())
}
