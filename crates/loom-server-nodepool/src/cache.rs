// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! A single-value cache with a time-to-live.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Holds one value for `ttl`, refetching it on the first read after expiry.
///
/// Concurrent readers during a refresh wait for the single in-flight fetch
/// rather than issuing their own.
#[derive(Debug)]
pub struct TtlCache<T> {
	ttl: Duration,
	state: Mutex<Option<(Instant, Arc<T>)>>,
}

impl<T> TtlCache<T> {
	pub fn new(ttl: Duration) -> Self {
		Self {
			ttl,
			state: Mutex::new(None),
		}
	}

	/// Return the cached value, or run `fetch` and cache its result if the
	/// value is missing or at least `ttl` old. A failed fetch leaves the
	/// previous value in place.
	pub async fn get_or_refresh<F, Fut, E>(&self, fetch: F) -> Result<Arc<T>, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, E>>,
	{
		let mut state = self.state.lock().await;
		if let Some((fetched_at, value)) = state.as_ref() {
			if fetched_at.elapsed() < self.ttl {
				return Ok(Arc::clone(value));
			}
		}

		let value = Arc::new(fetch().await?);
		*state = Some((Instant::now(), Arc::clone(&value)));
		Ok(value)
	}

	/// Force the next read to refetch.
	pub async fn invalidate(&self) {
		*self.state.lock().await = None;
	}

	#[cfg(test)]
	async fn peek(&self) -> Option<Arc<T>> {
		self.state.lock().await.as_ref().map(|(_, value)| Arc::clone(value))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	async fn counting_fetch(calls: &AtomicUsize) -> Result<usize, ()> {
		Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
	}

	#[tokio::test(start_paused = true)]
	async fn returns_same_arc_within_ttl() {
		let cache = TtlCache::new(Duration::from_secs(5));
		let calls = AtomicUsize::new(0);

		let first = cache.get_or_refresh(|| counting_fetch(&calls)).await.unwrap();
		tokio::time::advance(Duration::from_secs(4)).await;
		let second = cache.get_or_refresh(|| counting_fetch(&calls)).await.unwrap();

		assert!(Arc::ptr_eq(&first, &second));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn refetches_once_after_expiry() {
		let cache = TtlCache::new(Duration::from_secs(5));
		let calls = AtomicUsize::new(0);

		let first = cache.get_or_refresh(|| counting_fetch(&calls)).await.unwrap();
		tokio::time::advance(Duration::from_secs(5)).await;
		let second = cache.get_or_refresh(|| counting_fetch(&calls)).await.unwrap();
		let third = cache.get_or_refresh(|| counting_fetch(&calls)).await.unwrap();

		assert!(!Arc::ptr_eq(&first, &second));
		assert!(Arc::ptr_eq(&second, &third));
		assert_eq!(*second, 2);
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn failed_fetch_keeps_previous_value() {
		let cache = TtlCache::new(Duration::from_secs(5));
		cache.get_or_refresh(|| async { Ok::<_, ()>(7) }).await.unwrap();
		tokio::time::advance(Duration::from_secs(6)).await;

		let result = cache.get_or_refresh(|| async { Err::<i32, _>("boom") }).await;
		assert_eq!(result.unwrap_err(), "boom");
		assert_eq!(cache.peek().await.as_deref(), Some(&7));
	}

	#[tokio::test]
	async fn invalidate_forces_refetch() {
		let cache = TtlCache::new(Duration::from_secs(300));
		let calls = AtomicUsize::new(0);

		cache.get_or_refresh(|| counting_fetch(&calls)).await.unwrap();
		cache.invalidate().await;
		assert!(cache.peek().await.is_none());
		cache.get_or_refresh(|| counting_fetch(&calls)).await.unwrap();

		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}
}
