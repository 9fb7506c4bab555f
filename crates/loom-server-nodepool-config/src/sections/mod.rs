// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections for the nodepool launcher.

pub mod defaults;
pub mod logging;
pub mod provider;

pub use defaults::{DefaultsConfigLayer, ProviderDefaults};
pub use logging::{LoggingConfig, LoggingConfigLayer};
pub use provider::{
	CloudImageConfigLayer, LabelConfigLayer, PoolConfigLayer, ProviderConfigLayer,
};
