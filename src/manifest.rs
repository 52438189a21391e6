//! Manifest codec (C3): schema_version=2, byte-deterministic serialization.
//!
//! Serialization is hand-written with `serde_json::Value` construction in
//! declared field order rather than relying on `#[derive(Serialize)]` plus
//! struct-field order, because the Files map must also be emitted in
//! sorted-key order irrespective of the host's `HashMap` iteration order - //! the same custom-`Serialize` idiom the teacher uses for `FileData` in
//! `types.rs`, generalized to a whole document via `serde_json::Map`
//! (which preserves insertion order).

use crate::error::DeployError;
use crate::types::{CanonicalStore, Origin, RegistryOrigin};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const SCHEMA_VERSION: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
	pub provider_version: String,
	pub resource_type: String,
	pub resource_name: String,
	pub canonical_store: String,
	pub deployment_id: String,
	pub created_at: DateTime<Utc>,
	pub source_hash: String,
	pub bundle_hash: String,
	pub origin: Option<Origin>,
	pub registry: Option<RegistryOrigin>,
	pub files: BTreeMap<String, String>,
}

impl Manifest {
	pub fn new(
		provider_version: impl Into<String>,
		resource_name: impl Into<String>,
		canonical_store: impl Into<String>,
		deployment_id: impl Into<String>,
		created_at: DateTime<Utc>,
		source_hash: impl Into<String>,
		bundle_hash: impl Into<String>,
		files: BTreeMap<String, String>,
	) -> Self {
		Self {
			provider_version: provider_version.into(),
			resource_type: "skill".to_string(),
			resource_name: resource_name.into(),
			canonical_store: canonical_store.into(),
			deployment_id: deployment_id.into(),
			created_at,
			source_hash: source_hash.into(),
			bundle_hash: bundle_hash.into(),
			origin: None,
			registry: None,
			files,
		}
	}

	/// Serialize to pretty-printed JSON (2-space indent), top-level keys in
	/// the declared order from §3/§6, Files in sorted-key order. Byte-
	/// identical across runs for identical logical content (§8 property 5).
	pub fn to_json(&self) -> Result<String, DeployError> {
		let mut top = Map::new();
		top.insert("schema_version".to_string(), Value::from(SCHEMA_VERSION));
		top.insert("provider_version".to_string(), Value::from(self.provider_version.clone()));
		top.insert("resource_type".to_string(), Value::from(self.resource_type.clone()));
		top.insert("resource_name".to_string(), Value::from(self.resource_name.clone()));
		top.insert("canonical_store".to_string(), Value::from(self.canonical_store.clone()));
		top.insert("deployment_id".to_string(), Value::from(self.deployment_id.clone()));
		top.insert("created_at".to_string(), Value::from(self.created_at.to_rfc3339()));
		top.insert("source_hash".to_string(), Value::from(self.source_hash.clone()));
		top.insert("bundle_hash".to_string(), Value::from(self.bundle_hash.clone()));

		if let Some(ref origin) = self.origin {
			let mut o = Map::new();
			o.insert("type".to_string(), Value::from(origin.origin_type.as_str()));
			if let Some(ref source_dir) = origin.source_dir {
				o.insert("source_dir".to_string(), Value::from(source_dir.clone()));
			}
			top.insert("origin".to_string(), Value::Object(o));
		}

		if let Some(ref registry) = self.registry {
			let mut r = Map::new();
			r.insert("type".to_string(), Value::from(registry.registry_type.clone()));
			r.insert("skill_id".to_string(), Value::from(registry.skill_id.clone()));
			r.insert("version".to_string(), Value::from(registry.version.clone()));
			r.insert("bundle_hash".to_string(), Value::from(registry.bundle_hash.clone()));
			top.insert("registry".to_string(), Value::Object(r));
		}

		// BTreeMap already iterates in sorted-key order; serde_json::Map
		// preserves insertion order under its "preserve_order" behavior, so
		// inserting from a BTreeMap in order is what makes this deterministic.
		let mut files = Map::new();
		for (path, hash) in &self.files {
			files.insert(path.clone(), Value::from(hash.clone()));
		}
		top.insert("files".to_string(), Value::Object(files));

		serde_json::to_string_pretty(&Value::Object(top)).map_err(DeployError::from)
	}

	/// Deserialize from JSON. Unknown fields are tolerated; the Files map
	/// may arrive in any key order and is stored in a `BTreeMap` so order
	/// never needs to be tracked again.
	pub fn from_json(data: &str) -> Result<Self, DeployError> {
		let value: Value = serde_json::from_str(data)?;
		let obj = value
			.as_object()
			.ok_or_else(|| DeployError::fatal("manifest must be a JSON object"))?;

		let get_str = |key: &str| -> Result<String, DeployError> {
			obj.get(key)
				.and_then(Value::as_str)
				.map(str::to_string)
				.ok_or_else(|| DeployError::fatal(format!("manifest missing required field {key:?}")))
		};

		let created_at = DateTime::parse_from_rfc3339(&get_str("created_at")?)
			.map_err(|e| DeployError::fatal(format!("manifest has invalid created_at: {e}")))?
			.with_timezone(&Utc);

		let origin = obj.get("origin").and_then(Value::as_object).map(|o| Origin {
			origin_type: if o.get("type").and_then(Value::as_str) == Some("registry") {
				CanonicalStore::Registry
			} else {
				CanonicalStore::Source
			},
			source_dir: o.get("source_dir").and_then(Value::as_str).map(str::to_string),
		});

		let registry = obj.get("registry").and_then(Value::as_object).map(|r| RegistryOrigin {
			registry_type: r.get("type").and_then(Value::as_str).unwrap_or_default().to_string(),
			skill_id: r.get("skill_id").and_then(Value::as_str).unwrap_or_default().to_string(),
			version: r.get("version").and_then(Value::as_str).unwrap_or_default().to_string(),
			bundle_hash: r.get("bundle_hash").and_then(Value::as_str).unwrap_or_default().to_string(),
		});

		let mut files = BTreeMap::new();
		if let Some(files_obj) = obj.get("files").and_then(Value::as_object) {
			for (k, v) in files_obj {
				if let Some(hash) = v.as_str() {
					files.insert(k.clone(), hash.to_string());
				}
			}
		}

		Ok(Self {
			provider_version: get_str("provider_version")?,
			resource_type: get_str("resource_type")?,
			resource_name: get_str("resource_name")?,
			canonical_store: get_str("canonical_store")?,
			deployment_id: get_str("deployment_id")?,
			created_at,
			source_hash: get_str("source_hash")?,
			bundle_hash: get_str("bundle_hash")?,
			origin,
			registry,
			files,
		})
	}
}


// vim: ts=4
