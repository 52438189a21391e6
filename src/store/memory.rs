//! In-memory object-store driver (§4.5, §8 property 9): implements all five
//! condition forms with the same semantics as the real backends, for tests.
//! Also provides a process-wide named registry so repeat lookups inside one
//! test process can share state without threading an `Arc` through every
//! helper.

use super::{Condition, ListEntry, ObjectMeta, ObjectStoreDriver, PutOpts};
use crate::error::DeployError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct StoredObject {
	body: Vec<u8>,
	etag: String,
	generation: i64,
	content_type: String,
	lease_id: Option<String>,
}

/// An in-process object store with per-instance mutual exclusion on its
/// key→object map and an atomically-advanced generation counter, matching
/// the shared-resource policy in §5.
pub struct InMemoryDriver {
	objects: Mutex<BTreeMap<String, StoredObject>>,
	next_generation: AtomicI64,
}

impl InMemoryDriver {
	pub fn new() -> Self {
		Self { objects: Mutex::new(BTreeMap::new()), next_generation: AtomicI64::new(1) }
	}

	fn next_etag(&self) -> String {
		uuid::Uuid::new_v4().to_string()
	}
}

impl Default for InMemoryDriver {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl ObjectStoreDriver for InMemoryDriver {
	async fn put(&self, key: &str, body: Vec<u8>, opts: PutOpts) -> Result<(), DeployError> {
		let mut objects = self.objects.lock().unwrap();
		let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
		objects.insert(
			key.to_string(),
			StoredObject { body, etag: self.next_etag(), generation, content_type: opts.content_type, lease_id: None },
		);
		Ok(())
	}

	async fn get(&self, key: &str) -> Result<(Vec<u8>, ObjectMeta), DeployError> {
		let objects = self.objects.lock().unwrap();
		let obj = objects.get(key).ok_or_else(|| DeployError::not_found(format!("{key} not found")))?;
		Ok((
			obj.body.clone(),
			ObjectMeta {
				etag: Some(obj.etag.clone()),
				generation: Some(obj.generation),
				size: obj.body.len() as u64,
				content_type: Some(obj.content_type.clone()),
			},
		))
	}

	async fn head(&self, key: &str) -> Result<ObjectMeta, DeployError> {
		let objects = self.objects.lock().unwrap();
		let obj = objects.get(key).ok_or_else(|| DeployError::not_found(format!("{key} not found")))?;
		Ok(ObjectMeta {
			etag: Some(obj.etag.clone()),
			generation: Some(obj.generation),
			size: obj.body.len() as u64,
			content_type: Some(obj.content_type.clone()),
		})
	}

	async fn delete(&self, key: &str) -> Result<(), DeployError> {
		let mut objects = self.objects.lock().unwrap();
		objects.remove(key);
		Ok(())
	}

	async fn list(&self, prefix: &str) -> Result<Vec<ListEntry>, DeployError> {
		let objects = self.objects.lock().unwrap();
		Ok(objects
			.iter()
			.filter(|(k, _)| k.starts_with(prefix))
			.map(|(k, v)| ListEntry { key: k.clone(), size: v.body.len() as u64, etag: Some(v.etag.clone()) })
			.collect())
	}

	async fn conditional_put(
		&self,
		key: &str,
		body: Vec<u8>,
		condition: Condition,
		opts: PutOpts,
	) -> Result<(), DeployError> {
		let mut objects = self.objects.lock().unwrap();

		match &condition {
			Condition::IfMatch(expected) => {
				let current = objects.get(key);
				if expected == "*" {
					if current.is_some() {
						return Err(DeployError::precondition_failed(format!(
							"{key} already exists; create-only condition failed"
						)));
					}
				} else {
					match current {
						Some(obj) if &obj.etag == expected => {}
						_ => {
							return Err(DeployError::precondition_failed(format!(
								"{key} etag does not match {expected}"
							)))
						}
					}
				}
			}
			Condition::Generation(expected) => {
				let current_gen = objects.get(key).map(|o| o.generation).unwrap_or(0);
				if current_gen != *expected {
					return Err(DeployError::precondition_failed(format!(
						"{key} generation {current_gen} does not match expected {expected}"
					)));
				}
			}
			Condition::LeaseId(expected) => {
				if let Some(obj) = objects.get(key) {
					if let Some(ref held) = obj.lease_id {
						if held != expected {
							return Err(DeployError::lease_conflict(format!("{key} is leased by another writer")));
						}
					}
				}
			}
		}

		let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
		let lease_id = match &condition {
			Condition::LeaseId(id) => Some(id.clone()),
			_ => None,
		};
		objects.insert(
			key.to_string(),
			StoredObject { body, etag: self.next_etag(), generation, content_type: opts.content_type, lease_id },
		);
		Ok(())
	}
}

/// Process-wide named registry of [`InMemoryDriver`] instances, so repeat
/// lookups inside one test process reach the same store without threading
/// an `Arc` through every helper (§4.5, §9's "global singleton" note - /// scoped here to an explicit `reset()` rather than an implicit global).
pub struct InMemoryRegistry;

static REGISTRY: OnceLock<Mutex<BTreeMap<String, Arc<InMemoryDriver>>>> = OnceLock::new();

impl InMemoryRegistry {
	fn map() -> &'static Mutex<BTreeMap<String, Arc<InMemoryDriver>>> {
		REGISTRY.get_or_init(|| Mutex::new(BTreeMap::new()))
	}

	pub fn get_or_create(name: &str) -> Arc<InMemoryDriver> {
		let mut map = Self::map().lock().unwrap();
		map.entry(name.to_string()).or_insert_with(|| Arc::new(InMemoryDriver::new())).clone()
	}

	/// Drop all named drivers, for test isolation between cases that reuse
	/// the same name.
	pub fn reset() {
		Self::map().lock().unwrap().clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn create_only_fails_when_object_exists() {
		let driver = InMemoryDriver::new();
		driver.put("ACTIVE", b"dep_1".to_vec(), PutOpts::default()).await.unwrap();
		let result =
			driver.conditional_put("ACTIVE", b"dep_2".to_vec(), Condition::create_only(), PutOpts::default()).await;
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn create_only_succeeds_when_object_absent() {
		let driver = InMemoryDriver::new();
		let result =
			driver.conditional_put("ACTIVE", b"dep_1".to_vec(), Condition::create_only(), PutOpts::default()).await;
		assert!(result.is_ok());
	}

	#[tokio::test]
	async fn if_match_on_stale_etag_fails() {
		let driver = InMemoryDriver::new();
		driver.put("ACTIVE", b"dep_1".to_vec(), PutOpts::default()).await.unwrap();
		let result = driver
			.conditional_put("ACTIVE", b"dep_2".to_vec(), Condition::IfMatch("stale-etag".to_string()), PutOpts::default())
			.await;
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn if_match_on_current_etag_succeeds() {
		let driver = InMemoryDriver::new();
		driver.put("ACTIVE", b"dep_1".to_vec(), PutOpts::default()).await.unwrap();
		let (_, meta) = driver.get("ACTIVE").await.unwrap();
		let result = driver
			.conditional_put("ACTIVE", b"dep_2".to_vec(), Condition::IfMatch(meta.etag.unwrap()), PutOpts::default())
			.await;
		assert!(result.is_ok());
	}

	#[tokio::test]
	async fn generation_mismatch_fails() {
		let driver = InMemoryDriver::new();
		let result =
			driver.conditional_put("obj", b"v".to_vec(), Condition::Generation(5), PutOpts::default()).await;
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn delete_is_idempotent_for_missing_key() {
		let driver = InMemoryDriver::new();
		assert!(driver.delete("never-existed").await.is_ok());
	}

	#[tokio::test]
	async fn registry_returns_same_instance_for_same_name() {
		InMemoryRegistry::reset();
		let a = InMemoryRegistry::get_or_create("target-a");
		a.put("k", b"v".to_vec(), PutOpts::default()).await.unwrap();
		let b = InMemoryRegistry::get_or_create("target-a");
		assert!(b.get("k").await.is_ok());
	}
}

// vim: ts=4
