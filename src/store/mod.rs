//! Object-store driver (C5): a uniform `Put/Get/Head/Delete/List/ConditionalPut`
//! surface across S3, Azure Blob, and GCS, plus the retry decorator and an
//! in-memory driver for tests.

mod azure;
mod gcs;
mod memory;
mod retry;
mod s3;

pub use azure::AzureDriver;
pub use gcs::GcsDriver;
pub use memory::{InMemoryDriver, InMemoryRegistry};
pub use retry::{BackoffKind, CancellationToken, RetryConfig, RetryingDriver};
pub use s3::S3Driver;

use crate::error::DeployError;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Write-side options shared by `Put` and `ConditionalPut` (§4.5).
#[derive(Debug, Clone, Default)]
pub struct PutOpts {
	pub content_type: String,
	pub metadata: BTreeMap<String, String>,
	pub kms_key: Option<String>,
}

/// A tagged condition for `ConditionalPut` (§4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
	/// `IfMatch("*")` is create-only; `IfMatch(etag)` is compare-and-set.
	IfMatch(String),
	/// GCS-style optimistic concurrency on the object generation.
	Generation(i64),
	/// Azure lease-scoped write.
	LeaseId(String),
}

impl Condition {
	pub fn create_only() -> Self {
		Condition::IfMatch("*".to_string())
	}
}

/// Metadata returned by `Head`/`Get`/successful writes.
#[derive(Debug, Clone, Default)]
pub struct ObjectMeta {
	pub etag: Option<String>,
	pub generation: Option<i64>,
	pub size: u64,
	pub content_type: Option<String>,
}

/// One entry returned by `List`. Order across entries is not guaranteed
/// (§4.5).
#[derive(Debug, Clone)]
pub struct ListEntry {
	pub key: String,
	pub size: u64,
	pub etag: Option<String>,
}

/// Map an HTTP status code to the taxonomy in §7, shared by every HTTP-backed
/// driver. 404 is `NotFound`; 412/409 are `PreconditionFailed` (the backend
/// modules upgrade Azure lease conflicts to `LeaseConflict` themselves,
/// since that distinction is header-encoded, not status-encoded); 429/5xx
/// are `Transient`; everything else is `Fatal`.
pub(crate) fn map_http_status(status: u16, body: &str) -> DeployError {
	match status {
		404 => DeployError::not_found(format!("object not found (HTTP {status}): {body}")),
		412 | 409 => DeployError::precondition_failed(format!("conditional write rejected (HTTP {status}): {body}")),
		429 => DeployError::transient(format!("rate limited (HTTP {status}): {body}")),
		s if s >= 500 => DeployError::transient(format!("server error (HTTP {status}): {body}")),
		s => DeployError::fatal(format!("unexpected HTTP {s}: {body}")),
	}
}

/// The uniform driver surface every backend (and the in-memory test
/// driver) implements.
#[async_trait]
pub trait ObjectStoreDriver: Send + Sync {
	async fn put(&self, key: &str, body: Vec<u8>, opts: PutOpts) -> Result<(), DeployError>;

	async fn get(&self, key: &str) -> Result<(Vec<u8>, ObjectMeta), DeployError>;

	async fn head(&self, key: &str) -> Result<ObjectMeta, DeployError>;

	/// Idempotent: deleting a missing key is success (§4.5).
	async fn delete(&self, key: &str) -> Result<(), DeployError>;

	async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, DeployError>;

	async fn conditional_put(
		&self,
		key: &str,
		body: Vec<u8>,
		condition: Condition,
		opts: PutOpts,
	) -> Result<(), DeployError>;
}

// vim: ts=4
