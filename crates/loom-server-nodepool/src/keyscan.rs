// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host key scanning boundary.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ScanError;

/// How long a launcher waits for a node's connection port.
pub const KEYSCAN_TIMEOUT: Duration = Duration::from_secs(180);

const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Collects host keys from a freshly booted node.
#[async_trait]
pub trait HostKeyScanner: Send + Sync {
	/// Wait for `ip:port` to answer and return its host keys.
	///
	/// When `gather_hostkeys` is false the scan only proves reachability and
	/// returns an empty list.
	async fn scan(
		&self,
		ip: IpAddr,
		port: u16,
		timeout: Duration,
		gather_hostkeys: bool,
	) -> Result<Vec<String>, ScanError>;
}

/// Scanner that only checks the port accepts TCP connections.
#[derive(Debug, Clone, Default)]
pub struct TcpProbeScanner;

#[async_trait]
impl HostKeyScanner for TcpProbeScanner {
	async fn scan(
		&self,
		ip: IpAddr,
		port: u16,
		timeout: Duration,
		_gather_hostkeys: bool,
	) -> Result<Vec<String>, ScanError> {
		let addr = SocketAddr::new(ip, port);
		let deadline = Instant::now() + timeout;

		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return Err(ScanError::Timeout { ip, port, timeout });
			}

			match tokio::time::timeout(remaining, TcpStream::connect(addr)).await {
				Ok(Ok(_stream)) => return Ok(Vec::new()),
				Ok(Err(e)) => {
					debug!(%addr, error = %e, "Connection refused, retrying");
				}
				Err(_) => return Err(ScanError::Timeout { ip, port, timeout }),
			}

			let remaining = deadline.saturating_duration_since(Instant::now());
			tokio::time::sleep(PROBE_INTERVAL.min(remaining)).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::Ipv4Addr;
	use tokio::net::TcpListener;

	#[tokio::test]
	async fn probe_succeeds_on_listening_port() {
		let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
		let port = listener.local_addr().unwrap().port();

		let keys = TcpProbeScanner
			.scan(IpAddr::V4(Ipv4Addr::LOCALHOST), port, Duration::from_secs(5), true)
			.await
			.unwrap();
		assert!(keys.is_empty());
	}

	#[tokio::test]
	async fn probe_times_out_on_closed_port() {
		let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
		let port = listener.local_addr().unwrap().port();
		drop(listener);

		let err = TcpProbeScanner
			.scan(IpAddr::V4(Ipv4Addr::LOCALHOST), port, Duration::from_millis(300), false)
			.await
			.unwrap_err();
		assert!(matches!(err, ScanError::Timeout { .. }));
	}
}
