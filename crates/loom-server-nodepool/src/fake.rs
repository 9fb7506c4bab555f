// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory cloud for tests and simulations.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::adapter::Adapter;
use crate::config::{ProviderConfig, ProviderLabel};
use crate::driver::Driver;
use crate::error::{AdapterError, ScanError};
use crate::instance::{Instance, InstanceMetadata};
use crate::keyscan::HostKeyScanner;
use crate::quota::{Cost, Limit, QuotaInformation};

struct FakeServer {
	instance: Instance,
	lists_until_ready: u32,
}

struct FakeCloud {
	servers: BTreeMap<String, FakeServer>,
	next_id: u32,
	fail_creates: u32,
	quota_exceeded_creates: u32,
	ready_after_lists: u32,
	never_ready: bool,
	ignore_deletes: bool,
	limits: Limit,
	label_costs: HashMap<String, Cost>,
	default_cost: Cost,
}

/// A programmable cloud adapter backed by a map of instances.
pub struct FakeAdapter {
	cloud: Mutex<FakeCloud>,
	create_calls: AtomicU32,
	delete_calls: AtomicU32,
	list_calls: AtomicU32,
}

impl FakeAdapter {
	/// An unlimited cloud whose instances are ready on the first listing and
	/// cost one instance each.
	pub fn new() -> Self {
		Self {
			cloud: Mutex::new(FakeCloud {
				servers: BTreeMap::new(),
				next_id: 0,
				fail_creates: 0,
				quota_exceeded_creates: 0,
				ready_after_lists: 0,
				never_ready: false,
				ignore_deletes: false,
				limits: Limit::Unbounded,
				label_costs: HashMap::new(),
				default_cost: Cost::Known(QuotaInformation::for_instance(0.0, 0.0)),
			}),
			create_calls: AtomicU32::new(0),
			delete_calls: AtomicU32::new(0),
			list_calls: AtomicU32::new(0),
		}
	}

	fn cloud(&self) -> MutexGuard<'_, FakeCloud> {
		self.cloud.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Reject the next `n` creates with an API error.
	pub fn fail_next_creates(&self, n: u32) {
		self.cloud().fail_creates = n;
	}

	/// Reject the next `n` creates as over quota.
	pub fn quota_exceeded_next_creates(&self, n: u32) {
		self.cloud().quota_exceeded_creates = n;
	}

	/// New instances report ready only after `n` listings.
	pub fn set_ready_after_lists(&self, n: u32) {
		self.cloud().ready_after_lists = n;
	}

	pub fn set_never_ready(&self, never_ready: bool) {
		self.cloud().never_ready = never_ready;
	}

	/// Accept deletes without removing anything.
	pub fn set_ignore_deletes(&self, ignore: bool) {
		self.cloud().ignore_deletes = ignore;
	}

	pub fn set_limits(&self, limits: Limit) {
		self.cloud().limits = limits;
	}

	pub fn set_label_cost(&self, label: impl Into<String>, cost: Cost) {
		self.cloud().label_costs.insert(label.into(), cost);
	}

	pub fn set_default_cost(&self, cost: Cost) {
		self.cloud().default_cost = cost;
	}

	/// Seed an instance this launcher did not create.
	pub fn add_instance(&self, instance: Instance) {
		self.cloud().servers.insert(
			instance.external_id.clone(),
			FakeServer {
				instance,
				lists_until_ready: 0,
			},
		);
	}

	pub fn instances(&self) -> Vec<Instance> {
		self.cloud()
			.servers
			.values()
			.map(|server| server.instance.clone())
			.collect()
	}

	pub fn create_calls(&self) -> u32 {
		self.create_calls.load(Ordering::SeqCst)
	}

	pub fn delete_calls(&self) -> u32 {
		self.delete_calls.load(Ordering::SeqCst)
	}

	pub fn list_calls(&self) -> u32 {
		self.list_calls.load(Ordering::SeqCst)
	}
}

impl Default for FakeAdapter {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Adapter for FakeAdapter {
	async fn create_instance(
		&self,
		hostname: &str,
		metadata: &InstanceMetadata,
		label: &ProviderLabel,
	) -> Result<String, AdapterError> {
		self.create_calls.fetch_add(1, Ordering::SeqCst);
		let mut cloud = self.cloud();

		if cloud.quota_exceeded_creates > 0 {
			cloud.quota_exceeded_creates -= 1;
			return Err(AdapterError::QuotaExceeded {
				message: format!("no quota left for {hostname}"),
			});
		}
		if cloud.fail_creates > 0 {
			cloud.fail_creates -= 1;
			return Err(AdapterError::api(format!("create {hostname} rejected")));
		}

		cloud.next_id += 1;
		let n = cloud.next_id;
		let external_id = format!("fake-{n:04}");
		let host = (n % 250 + 1) as u8;

		let mut instance = Instance::new(external_id.clone());
		instance.public_ipv4 = Some(IpAddr::V4(Ipv4Addr::new(198, 51, 100, host)));
		instance.private_ipv4 = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, host)));
		instance.interface_ip = instance.public_ipv4;
		instance.region = Some("fake-region".to_string());
		instance.az = Some("fake-az".to_string());
		instance.owner = Some(metadata.owner.clone());
		instance.quota = match cloud.label_costs.get(&label.name).unwrap_or(&cloud.default_cost) {
			Cost::Known(quota) => Some(*quota),
			Cost::Unknown => None,
		};

		let lists_until_ready = cloud.ready_after_lists;
		cloud.servers.insert(
			external_id.clone(),
			FakeServer {
				instance,
				lists_until_ready,
			},
		);
		Ok(external_id)
	}

	async fn delete_instance(&self, external_id: &str) -> Result<(), AdapterError> {
		self.delete_calls.fetch_add(1, Ordering::SeqCst);
		let mut cloud = self.cloud();
		if !cloud.servers.contains_key(external_id) {
			return Err(AdapterError::NotFound {
				external_id: external_id.to_string(),
			});
		}
		if !cloud.ignore_deletes {
			cloud.servers.remove(external_id);
		}
		Ok(())
	}

	async fn list_instances(&self) -> Result<Vec<Instance>, AdapterError> {
		self.list_calls.fetch_add(1, Ordering::SeqCst);
		let mut cloud = self.cloud();
		let never_ready = cloud.never_ready;
		let mut instances = Vec::with_capacity(cloud.servers.len());
		for server in cloud.servers.values_mut() {
			if server.lists_until_ready > 0 {
				server.lists_until_ready -= 1;
			} else if !never_ready {
				server.instance.ready = true;
			}
			instances.push(server.instance.clone());
		}
		Ok(instances)
	}

	async fn get_quota_limits(&self) -> Result<Limit, AdapterError> {
		Ok(self.cloud().limits)
	}

	async fn get_quota_for_label(&self, label: &ProviderLabel) -> Result<Cost, AdapterError> {
		let cloud = self.cloud();
		Ok(*cloud.label_costs.get(&label.name).unwrap_or(&cloud.default_cost))
	}
}

/// Driver handing out one shared [`FakeAdapter`].
#[derive(Clone, Default)]
pub struct FakeDriver {
	adapter: Arc<FakeAdapter>,
}

impl FakeDriver {
	pub fn new(adapter: Arc<FakeAdapter>) -> Self {
		Self { adapter }
	}

	pub fn adapter(&self) -> &Arc<FakeAdapter> {
		&self.adapter
	}
}

impl Driver for FakeDriver {
	fn name(&self) -> &str {
		"fake"
	}

	fn get_adapter(&self, _config: &ProviderConfig) -> Result<Arc<dyn Adapter>, AdapterError> {
		Ok(self.adapter.clone())
	}
}

/// Scanner that returns canned keys, optionally failing the next few scans.
#[derive(Default)]
pub struct FakeScanner {
	keys: Vec<String>,
	fail_scans: AtomicU32,
	scans: AtomicU32,
}

impl FakeScanner {
	pub fn new(keys: Vec<String>) -> Self {
		Self {
			keys,
			fail_scans: AtomicU32::new(0),
			scans: AtomicU32::new(0),
		}
	}

	pub fn fail_next_scans(&self, n: u32) {
		self.fail_scans.store(n, Ordering::SeqCst);
	}

	pub fn scans(&self) -> u32 {
		self.scans.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl HostKeyScanner for FakeScanner {
	async fn scan(
		&self,
		ip: IpAddr,
		port: u16,
		_timeout: Duration,
		gather_hostkeys: bool,
	) -> Result<Vec<String>, ScanError> {
		self.scans.fetch_add(1, Ordering::SeqCst);
		let failing = self
			.fail_scans
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if failing {
			return Err(ScanError::Connect {
				ip,
				port,
				message: "connection refused".to_string(),
			});
		}
		Ok(if gather_hostkeys { self.keys.clone() } else { Vec::new() })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::CloudImage;
	use crate::instance::InstanceOwner;

	fn label() -> ProviderLabel {
		ProviderLabel {
			name: "small".to_string(),
			pool: "main".to_string(),
			instance_type: None,
			cloud_image: CloudImage::new("ubuntu"),
		}
	}

	fn metadata() -> InstanceMetadata {
		InstanceMetadata {
			owner: InstanceOwner {
				provider: "fake".to_string(),
				pool: Some("main".to_string()),
				node_id: None,
			},
			ssh_keys: None,
		}
	}

	#[tokio::test]
	async fn created_instances_carry_owner_and_become_ready() {
		let adapter = FakeAdapter::new();
		adapter.set_ready_after_lists(1);

		let id = adapter.create_instance("nodepool-1", &metadata(), &label()).await.unwrap();
		let first = adapter.list_instances().await.unwrap();
		assert!(!first[0].ready);
		assert!(first[0].owned_by("fake"));

		let second = adapter.list_instances().await.unwrap();
		assert_eq!(second[0].external_id, id);
		assert!(second[0].ready);
		assert_eq!(adapter.list_calls(), 2);
	}

	#[tokio::test]
	async fn programmed_failures_are_consumed() {
		let adapter = FakeAdapter::new();
		adapter.fail_next_creates(1);

		assert!(adapter.create_instance("a", &metadata(), &label()).await.is_err());
		assert!(adapter.create_instance("a", &metadata(), &label()).await.is_ok());
		assert_eq!(adapter.create_calls(), 2);
	}

	#[tokio::test]
	async fn delete_missing_instance_is_not_found() {
		let adapter = FakeAdapter::new();
		let err = adapter.delete_instance("fake-9999").await.unwrap_err();
		assert!(matches!(err, AdapterError::NotFound { .. }));
	}

	#[tokio::test]
	async fn scanner_fails_then_recovers() {
		let scanner = FakeScanner::new(vec!["ssh-ed25519 AAAA".to_string()]);
		scanner.fail_next_scans(1);
		let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);

		assert!(scanner.scan(ip, 22, Duration::from_secs(1), true).await.is_err());
		let keys = scanner.scan(ip, 22, Duration::from_secs(1), true).await.unwrap();
		assert_eq!(keys, vec!["ssh-ed25519 AAAA".to_string()]);
		assert!(scanner.scan(ip, 22, Duration::from_secs(1), false).await.unwrap().is_empty());
		assert_eq!(scanner.scans(), 3);
	}
}
