//! Retry decorator (§4.5): wraps any [`super::ObjectStoreDriver`] and
//! retries transient failures with capped, jittered backoff, honoring
//! cancellation during both the sleep and the remote call itself.

use super::{Condition, ListEntry, ObjectMeta, ObjectStoreDriver, PutOpts};
use crate::error::{DeployError, ErrorKind};
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

const BACKOFF_BASE_MS: u64 = 100;
const BACKOFF_CAP_MS: u64 = 30_000;
const JITTER_FRACTION: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
	Exponential,
	Linear,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
	pub max_retries: usize,
	pub backoff: BackoffKind,
	pub per_attempt_timeout: Duration,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self { max_retries: 5, backoff: BackoffKind::Exponential, per_attempt_timeout: Duration::from_secs(30) }
	}
}

/// A cooperative cancellation handle. Every suspension point in this crate
/// - semaphore acquires, remote calls, backoff sleeps - accepts one of
/// these and races it against the real work (§5).
#[derive(Clone, Default)]
pub struct CancellationToken {
	notify: Arc<Notify>,
	cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
		self.notify.notify_waiters();
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}

	/// Resolves immediately if already cancelled, otherwise waits for the
	/// next `cancel()` call.
	pub async fn cancelled(&self) {
		if self.is_cancelled() {
			return;
		}
		self.notify.notified().await;
	}
}

fn backoff_duration(attempt: u32, kind: BackoffKind) -> Duration {
	let base = match kind {
		BackoffKind::Exponential => BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(20)),
		BackoffKind::Linear => BACKOFF_BASE_MS.saturating_mul(u64::from(attempt) + 1),
	}
	.min(BACKOFF_CAP_MS);

	let jitter_range = (base as f64 * JITTER_FRACTION) as i64;
	let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
	let jittered = (base as i64 + jitter).max(0) as u64;
	Duration::from_millis(jittered)
}

/// Sleep for `duration`, or return the cancellation error immediately if
/// `token` fires first. Never sleeps unconditionally (§9's design note).
async fn sleep_cancellable(duration: Duration, token: &CancellationToken) -> Result<(), DeployError> {
	tokio::select! {
		_ = tokio::time::sleep(duration) => Ok(()),
		_ = token.cancelled() => Err(DeployError::fatal("operation cancelled during retry backoff")),
	}
}

/// Wraps an inner driver and retries every operation on transient failure.
/// `NotFound`, `PreconditionFailed`, and `LeaseConflict` are never retried - /// they cause exactly one remote call (§8 property 8).
pub struct RetryingDriver {
	inner: Arc<dyn ObjectStoreDriver>,
	config: RetryConfig,
	cancellation: CancellationToken,
}

impl RetryingDriver {
	pub fn new(inner: Arc<dyn ObjectStoreDriver>, config: RetryConfig, cancellation: CancellationToken) -> Self {
		Self { inner, config, cancellation }
	}

	async fn run<T, F, Fut>(&self, op_name: &str, mut f: F) -> Result<T, DeployError>
	where
		F: FnMut() -> Fut,
		Fut: std::future::Future<Output = Result<T, DeployError>>,
	{
		let mut attempt = 0u32;
		loop {
			if self.cancellation.is_cancelled() {
				return Err(DeployError::fatal(format!("{op_name} cancelled before attempt {attempt}")));
			}

			let attempt_result = tokio::time::timeout(self.config.per_attempt_timeout, f()).await;

			let err = match attempt_result {
				Ok(Ok(value)) => return Ok(value),
				Ok(Err(e)) => e,
				Err(_) => DeployError::transient(format!("{op_name} timed out after one attempt")),
			};

			if !matches!(
				err.kind(),
				ErrorKind::Transient
			) {
				debug!(op = op_name, kind = %err.kind(), "non-retryable error, returning immediately");
				return Err(err);
			}

			if attempt as usize >= self.config.max_retries {
				warn!(op = op_name, attempts = attempt + 1, "retry streak exhausted");
				return Err(err);
			}

			let sleep_for = backoff_duration(attempt, self.config.backoff);
			debug!(op = op_name, attempt, ?sleep_for, "retrying after transient error");
			sleep_cancellable(sleep_for, &self.cancellation).await?;
			attempt += 1;
		}
	}
}

#[async_trait]
impl ObjectStoreDriver for RetryingDriver {
	async fn put(&self, key: &str, body: Vec<u8>, opts: PutOpts) -> Result<(), DeployError> {
		self.run("put", || {
			let body = body.clone();
			let opts = opts.clone();
			async move { self.inner.put(key, body, opts).await }
		})
		.await
	}

	async fn get(&self, key: &str) -> Result<(Vec<u8>, ObjectMeta), DeployError> {
		self.run("get", || async move { self.inner.get(key).await }).await
	}

	async fn head(&self, key: &str) -> Result<ObjectMeta, DeployError> {
		self.run("head", || async move { self.inner.head(key).await }).await
	}

	async fn delete(&self, key: &str) -> Result<(), DeployError> {
		self.run("delete", || async move { self.inner.delete(key).await }).await
	}

	async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, DeployError> {
		self.run("list", || async move { self.inner.list(prefix).await }).await
	}

	async fn conditional_put(
		&self,
		key: &str,
		body: Vec<u8>,
		condition: Condition,
		opts: PutOpts,
	) -> Result<(), DeployError> {
		self.run("conditional_put", || {
			let body = body.clone();
			let condition = condition.clone();
			let opts = opts.clone();
			async move { self.inner.conditional_put(key, body, condition, opts).await }
		})
		.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::memory::InMemoryDriver;
	use std::sync::atomic::AtomicUsize;

	struct FlakyDriver {
		inner: InMemoryDriver,
		fail_count: AtomicUsize,
		remaining_failures: std::sync::atomic::AtomicI64,
	}

	#[async_trait]
	impl ObjectStoreDriver for FlakyDriver {
		async fn put(&self, key: &str, body: Vec<u8>, opts: PutOpts) -> Result<(), DeployError> {
			if self.remaining_failures.fetch_sub(1, Ordering::SeqCst) > 0 {
				self.fail_count.fetch_add(1, Ordering::SeqCst);
				return Err(DeployError::transient("simulated flake"));
			}
			self.inner.put(key, body, opts).await
		}
		async fn get(&self, key: &str) -> Result<(Vec<u8>, ObjectMeta), DeployError> {
			self.inner.get(key).await
		}
		async fn head(&self, key: &str) -> Result<ObjectMeta, DeployError> {
			self.inner.head(key).await
		}
		async fn delete(&self, key: &str) -> Result<(), DeployError> {
			self.inner.delete(key).await
		}
		async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, DeployError> {
			self.inner.list(prefix).await
		}
		async fn conditional_put(
			&self,
			key: &str,
			body: Vec<u8>,
			condition: Condition,
			opts: PutOpts,
		) -> Result<(), DeployError> {
			self.inner.conditional_put(key, body, condition, opts).await
		}
	}

	#[tokio::test]
	async fn transient_streak_shorter_than_max_is_consumed_silently() {
		let flaky = Arc::new(FlakyDriver {
			inner: InMemoryDriver::new(),
			fail_count: AtomicUsize::new(0),
			remaining_failures: std::sync::atomic::AtomicI64::new(2),
		});
		let retrying = RetryingDriver::new(
			flaky.clone(),
			RetryConfig { max_retries: 5, ..Default::default() },
			CancellationToken::new(),
		);

		let result = retrying.put("k", b"v".to_vec(), PutOpts::default()).await;
		assert!(result.is_ok());
		assert_eq!(flaky.fail_count.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn transient_streak_longer_than_max_surfaces_last_error() {
		let flaky = Arc::new(FlakyDriver {
			inner: InMemoryDriver::new(),
			fail_count: AtomicUsize::new(0),
			remaining_failures: std::sync::atomic::AtomicI64::new(100),
		});
		let retrying = RetryingDriver::new(
			flaky.clone(),
			RetryConfig { max_retries: 2, ..Default::default() },
			CancellationToken::new(),
		);

		let result = retrying.put("k", b"v".to_vec(), PutOpts::default()).await;
		assert!(result.is_err());
		assert_eq!(result.unwrap_err().kind(), &ErrorKind::Transient);
	}

	#[tokio::test]
	async fn not_found_is_never_retried() {
		let inner = Arc::new(InMemoryDriver::new());
		let retrying = RetryingDriver::new(inner, RetryConfig::default(), CancellationToken::new());
		let result = retrying.get("missing").await;
		assert_eq!(result.unwrap_err().kind(), &ErrorKind::NotFound);
	}

	#[test]
	fn exponential_backoff_is_capped_and_jittered_within_range() {
		for attempt in 0..10 {
			let d = backoff_duration(attempt, BackoffKind::Exponential);
			assert!(d.as_millis() as u64 <= BACKOFF_CAP_MS + (BACKOFF_CAP_MS / 4));
		}
	}
}

// vim: ts=4
