// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use crate::adapter::Adapter;
use crate::config::ProviderConfig;
use crate::error::AdapterError;
use crate::keyscan::HostKeyScanner;
use crate::provider::Provider;
use crate::store::NodeStore;

/// Factory for the adapter of one kind of cloud.
pub trait Driver: Send + Sync {
	/// Name used to select this driver in configuration.
	fn name(&self) -> &str;

	/// Build an adapter for `config`.
	fn get_adapter(&self, config: &ProviderConfig) -> Result<Arc<dyn Adapter>, AdapterError>;

	/// Wire an adapter for `config` into a new provider.
	fn get_provider(
		&self,
		config: ProviderConfig,
		store: Arc<dyn NodeStore>,
		scanner: Arc<dyn HostKeyScanner>,
	) -> Result<Arc<Provider>, AdapterError> {
		let adapter = self.get_adapter(&config)?;
		tracing::debug!(driver = self.name(), provider = %config.name, "Creating provider");
		Ok(Arc::new(Provider::new(config, adapter, store, scanner)))
	}
}
