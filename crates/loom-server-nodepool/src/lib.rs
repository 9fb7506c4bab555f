// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Node provisioning and quota admission for Loom.
//!
//! This crate turns node requests into running cloud instances while
//! enforcing provider-wide and per-pool quotas, and reconciles instances
//! that leaked out of the node store.
//!
//! # Architecture
//!
//! A [`Driver`] builds one [`Provider`] per configured cloud. The provider
//! owns the instance and quota caches and hands out a [`Handler`] per node
//! request. The handler admits the request against quota and starts one
//! [`Launcher`] per node, supervised by a [`LaunchGroup`]. Every cloud call
//! goes through the provider's rate-limited [`TaskManager`] to an
//! [`Adapter`].

pub mod adapter;
pub mod cache;
pub mod cleanup;
pub mod config;
pub mod driver;
pub mod error;
pub mod fake;
pub mod group;
pub mod handler;
pub mod instance;
pub mod keyscan;
pub mod launcher;
pub mod provider;
pub mod quota;
pub mod store;
pub mod task;
pub mod types;

pub use adapter::Adapter;
pub use cache::TtlCache;
pub use cleanup::{run_cleanup, start_cleanup_task};
pub use config::{CloudImage, ConnectionType, PoolConfig, ProviderConfig, ProviderLabel};
pub use driver::Driver;
pub use error::{AdapterError, LaunchError, ProviderError, ScanError, StoreError, TaskError};
pub use fake::{FakeAdapter, FakeDriver, FakeScanner};
pub use group::{LaunchGroup, LaunchReport};
pub use handler::{Handler, HandlerStatus, NodeOutcome, RequestOutcome};
pub use instance::{Instance, InstanceMetadata, InstanceOwner};
pub use keyscan::{HostKeyScanner, TcpProbeScanner};
pub use launcher::Launcher;
pub use provider::Provider;
pub use quota::{Cost, Limit, QuotaInformation};
pub use store::{MemoryNodeStore, NodeStore};
pub use task::{Task, TaskHandle, TaskManager};
pub use types::{Node, NodeHandle, NodeId, NodeRequest, NodeState, RequestId, RequestState};
